// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-log secret key storage (§6): a PEM-like file named
//! `<printable-log-name>-{owner|writer}.pem` under a configurable search
//! path, created exclusively with mode `0400`, with an optional `.BAK`
//! rotation on delete.

use std::{
    fs, io,
    os::unix::fs::{OpenOptionsExt, PermissionsExt},
    path::{Path, PathBuf},
};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::{
    crypto::{KeyPair, SignAlg},
    error::{GdpError, GdpResult},
    metadata::LogName,
};

const KEY_MODE: u32 = 0o400;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRole {
    Owner,
    Writer,
}

impl KeyRole {
    fn suffix(self) -> &'static str {
        match self {
            KeyRole::Owner => "owner",
            KeyRole::Writer => "writer",
        }
    }
}

fn pem_label(role: KeyRole) -> &'static str {
    match role {
        KeyRole::Owner => "GDP OWNER PRIVATE KEY",
        KeyRole::Writer => "GDP WRITER PRIVATE KEY",
    }
}

pub fn key_path(search_path: &Path, name: &LogName, role: KeyRole) -> PathBuf {
    search_path.join(format!("{}-{}.pem", name.printable(), role.suffix()))
}

fn encode_pem(label: &str, alg: SignAlg, bytes: &[u8]) -> String {
    let mut body = Vec::with_capacity(1 + bytes.len());
    body.push(alg.as_byte());
    body.extend_from_slice(bytes);
    let b64 = BASE64.encode(body);
    let mut out = format!("-----BEGIN {label}-----\n");
    for chunk in b64.as_bytes().chunks(64) {
        out.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        out.push('\n');
    }
    out.push_str(&format!("-----END {label}-----\n"));
    out
}

fn decode_pem(label: &str, text: &str) -> GdpResult<(SignAlg, Vec<u8>)> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let start = text.find(&begin).ok_or(GdpError::SkeyMissing)? + begin.len();
    let stop = text.find(&end).ok_or(GdpError::SkeyMissing)?;
    let b64: String = text[start..stop].chars().filter(|c| !c.is_whitespace()).collect();
    let body = BASE64
        .decode(b64)
        .map_err(|e| GdpError::CryptoError(e.to_string()))?;
    let (alg_byte, rest) = body.split_first().ok_or(GdpError::SkeyMissing)?;
    let alg = SignAlg::from_byte(*alg_byte)?;
    Ok((alg, rest.to_vec()))
}

/// Write a fresh key file exclusively (`O_CREAT | O_EXCL`), mode `0400`.
pub fn create(search_path: &Path, name: &LogName, role: KeyRole, keypair: &KeyPair) -> GdpResult<PathBuf> {
    fs::create_dir_all(search_path).map_err(io_err)?;
    let path = key_path(search_path, name, role);
    let pem = encode_pem(pem_label(role), keypair.alg(), &keypair.secret_bytes());

    let mut opts = fs::OpenOptions::new();
    opts.write(true).create_new(true).mode(KEY_MODE);
    let mut file = opts.open(&path).map_err(|e| {
        if e.kind() == io::ErrorKind::AlreadyExists {
            GdpError::PhysioError(format!("key file already exists: {}", path.display()))
        } else {
            io_err(e)
        }
    })?;
    use std::io::Write as _;
    file.write_all(pem.as_bytes()).map_err(io_err)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(KEY_MODE)).map_err(io_err)?;
    Ok(path)
}

pub fn load(search_path: &Path, name: &LogName, role: KeyRole) -> GdpResult<KeyPair> {
    let path = key_path(search_path, name, role);
    let text = fs::read_to_string(&path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            GdpError::SkeyMissing
        } else {
            io_err(e)
        }
    })?;
    let (alg, bytes) = decode_pem(pem_label(role), &text)?;
    KeyPair::from_bytes(alg, &bytes)
}

/// Remove a key file, optionally rotating it to `<path>.BAK` first
/// (§6: "On delete, optionally rotate to `.BAK`").
pub fn remove(search_path: &Path, name: &LogName, role: KeyRole, keep_backup: bool) -> GdpResult<()> {
    let path = key_path(search_path, name, role);
    if keep_backup {
        let backup = path.with_extension("pem.BAK");
        fs::rename(&path, &backup).map_err(io_err)?;
    } else {
        fs::remove_file(&path).map_err(io_err)?;
    }
    Ok(())
}

fn io_err(e: io::Error) -> GdpError {
    GdpError::PhysioError(e.to_string())
}
