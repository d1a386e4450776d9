// SPDX-License-Identifier: AGPL-3.0-or-later

use core::fmt;

/// Worker-pool routing choice for command/response dispatch (§6
/// `swarm.gdp.{command,response}.runinthread`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRouting {
    /// Run the handler inline on the channel's own task.
    MainThread,
    /// Hand the handler off to the worker pool.
    Pool,
}

impl fmt::Display for WorkerRouting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkerRouting::MainThread => "mainthread",
            WorkerRouting::Pool => "pool",
        })
    }
}

/// Process exit codes for `logd` (§6 CLI): clean shutdown, signal-driven
/// shutdown, and init failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Clean = 0,
    /// `sysexits.h` `EX_TEMPFAIL`.
    TempFail = 75,
    /// `sysexits.h` `EX_SOFTWARE`.
    Software = 70,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}
