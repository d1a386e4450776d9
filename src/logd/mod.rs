// SPDX-License-Identifier: AGPL-3.0-or-later

//! The log daemon (§4.F/§4.G server side, §6): wires the cache, request
//! table, subscription table, and storage engine together behind one
//! [`Channel`], and owns the process's background tasks (reclamation,
//! advertise flushing) and shutdown sequencing.
//!
//! Command execution is a direct async match in [`process_command`]
//! rather than a trip through [`DispatchTable`]: every real handler
//! touches the cache, the storage engine, or the channel, all of which
//! are async or at least await-shaped here, while `DispatchTable`'s
//! handler type is a plain synchronous `Fn`. `DispatchTable` is kept
//! registered with a couple of cheap synchronous hooks (ping, the admin
//! cache dump) — the narrow slice of dispatch that really is synchronous
//! — rather than stretched to cover everything.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    cache::{Cache, GetFlags},
    cfg::{config::GdpConfig, enums::ExitCode},
    channel::{AdvertiseBatcher, Channel, ChannelEvent},
    error::{GdpError, GdpResult},
    logobj::{LogObject, SequencingPolicy},
    metadata::{LogName, Metadata, tag},
    pdu::{Ack, Command, Nak, Pdu, PduBody, nak_code_for_error},
    request::{DispatchTable, Request, RequestFlags, RequestTable, RidGenerator},
    storage::{StorageEngine, sqlite::SqliteStore},
    subscription::{DEFAULT_LEASE, Subscriber, SubscriptionTable},
};

/// Everything one running `logd` process needs, shared behind `Arc` with
/// its background tasks and its channel event loop.
pub struct LogdState {
    pub config: GdpConfig,
    pub cache: Cache,
    pub requests: RequestTable,
    pub subscriptions: SubscriptionTable,
    pub dispatch: DispatchTable,
    pub rid_gen: RidGenerator,
    pub channel: Arc<dyn Channel>,
    pub advertise: Arc<AdvertiseBatcher>,
    /// Serializes `Create` process-wide (§4.F): two racing creates of the
    /// same metadata must not both win.
    create_lock: tokio::sync::Mutex<()>,
    /// Serializes the cache miss→build→insert sequence in `open_log`
    /// (§4.D per-name singleton invariant): `Cache`'s map and list are
    /// each independently locked, so without this a miss on the same name
    /// from two tasks can build and insert two distinct `LogObject`s,
    /// with the loser's incref unreachable from the cache. Held process-
    /// wide rather than per-name, the same granularity as `create_lock`.
    open_lock: tokio::sync::Mutex<()>,
}

impl LogdState {
    pub fn new(config: GdpConfig, channel: Arc<dyn Channel>) -> Arc<Self> {
        let dispatch = DispatchTable::new();
        dispatch.register(Command::Ping.code(), Arc::new(|_req| Ok(ping_response())));

        Arc::new(LogdState {
            config,
            cache: Cache::new(),
            requests: RequestTable::new(),
            subscriptions: SubscriptionTable::new(),
            dispatch,
            rid_gen: RidGenerator::default(),
            channel,
            advertise: Arc::new(AdvertiseBatcher::new()),
            create_lock: tokio::sync::Mutex::new(()),
            open_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// Look up a log already in the cache, or open it from disk and
    /// publish it into the cache (§4.D `get`/`new`, specialized to the
    /// "existing log" path; `Create` has its own, serialized, path).
    ///
    /// Never adjusts `refcnt` itself — a plain lookup (peek) either way.
    /// Callers that need a held reference (`Open`) incref explicitly;
    /// transient callers (`Append`, the various reads, `Delete`) don't.
    async fn open_log(&self, name: LogName) -> GdpResult<Arc<LogObject>> {
        if let Some(obj) = self
            .cache
            .get(name, GetFlags { peek: true, ..Default::default() }, || {
                unreachable!("create not requested")
            })
            .await
        {
            return Ok(obj);
        }

        // Serialize the whole miss→build→insert sequence process-wide:
        // `Cache`'s map and list are each independently locked, so two
        // concurrent misses on the same name could otherwise both build
        // and insert distinct objects. Re-check under the lock in case we
        // lost a race with another opener while waiting for it.
        let _guard = self.open_lock.lock().await;
        if let Some(obj) = self
            .cache
            .get(name, GetFlags { peek: true, ..Default::default() }, || {
                unreachable!("create not requested")
            })
            .await
        {
            return Ok(obj);
        }

        let store: Arc<dyn StorageEngine> = Arc::new(SqliteStore::open(
            &self.config.storage.log_dir,
            &name,
            &self.config.storage.pragmas,
        )?);
        let metadata = store.get_metadata()?;
        let hash_alg = owner_hash_alg(&metadata)?;
        let nrecs = store.max_recno();

        let obj = LogObject::new_pending(
            name,
            hash_alg,
            store,
            self.config.crypto.strictness,
            SequencingPolicy {
                allow_gaps: self.config.sequencing.allow_gaps,
                allow_dups: self.config.sequencing.allow_dups,
            },
        );
        obj.publish(metadata, nrecs).await;
        self.cache.insert(obj.clone()).await;
        Ok(obj)
    }

    /// `Create` (§4.B/§4.F): validate, compute the self-certifying name,
    /// fail if a log by that name already exists, otherwise lay down a
    /// fresh store and publish a new cache entry. Held under
    /// `create_lock` for the whole operation so two concurrent creates of
    /// the same metadata can't both succeed.
    async fn create_log(&self, metadata: Metadata) -> GdpResult<LogName> {
        metadata.validate_for_creation()?;
        let name = metadata.compute_name();
        let hash_alg = owner_hash_alg(&metadata)?;

        let _guard = self.create_lock.lock().await;
        if self.cache.get(name, GetFlags { peek: true, ..Default::default() }, || {
            unreachable!("peek never creates")
        })
        .await
        .is_some()
        {
            return Err(GdpError::RecordDuplicated);
        }

        let store = SqliteStore::create(
            &self.config.storage.log_dir,
            &name,
            &metadata,
            &self.config.storage.pragmas,
        )?;
        let obj = LogObject::new_pending(
            name,
            hash_alg,
            Arc::new(store),
            self.config.crypto.strictness,
            SequencingPolicy {
                allow_gaps: self.config.sequencing.allow_gaps,
                allow_dups: self.config.sequencing.allow_dups,
            },
        );
        obj.publish(metadata, 0).await;
        self.cache.insert(obj.clone()).await;
        self.advertise.queue_advertise(name);
        Ok(name)
    }

    /// One pass of the periodic maintenance trio (§4.D reclaim, §4.G
    /// reclaim, advertise flush); driven by [`spawn_background_tasks`].
    async fn run_maintenance(&self) {
        let reclaimed = self.cache.reclaim(self.config.reclaim.age).await;
        let expired = self.subscriptions.reclaim().await;
        if reclaimed > 0 || expired > 0 {
            debug!(reclaimed, expired, "maintenance pass");
        }
    }
}

fn owner_hash_alg(metadata: &Metadata) -> GdpResult<crate::crypto::HashAlg> {
    let bytes = metadata.find(tag::OWNER_PUBKEY).ok_or(GdpError::MetadataRequired)?;
    let (digest_alg, ..) = Metadata::decode_pubkey_entry(bytes)?;
    Ok(digest_alg)
}

fn ping_response() -> Pdu {
    // Filled in by the caller, which knows src/dst/rid; this handler is
    // only reachable through `DispatchTable`, which nothing in the main
    // loop currently calls for `Ping` — kept registered as the
    // synchronous-dispatch example named in its own doc comment.
    Pdu {
        src: LogName([0u8; 32]),
        dst: LogName([0u8; 32]),
        l4_seqno: 0,
        rid: None,
        l5_seqno: None,
        body: PduBody::Ack(Ack::Success { recno: None, ts: None, hash: None, metadata: None }),
    }
}

/// Execute one inbound command PDU against `state`, producing the
/// response body (§4.E/§4.F server dispatch). Caller fills in the
/// envelope (src/dst swap, rid, l5_seqno).
async fn process_command(
    state: &Arc<LogdState>,
    src: LogName,
    rid: Option<u32>,
    cmd: Command,
) -> GdpResult<Ack> {
    match cmd {
        Command::Keepalive | Command::Ping => {
            Ok(Ack::Success { recno: None, ts: None, hash: None, metadata: None })
        },

        Command::Advertise { name } => {
            state.channel.advertise(name);
            Ok(Ack::Success { recno: None, ts: None, hash: None, metadata: None })
        },
        Command::Withdraw { name } => {
            state.channel.withdraw(name);
            Ok(Ack::Success { recno: None, ts: None, hash: None, metadata: None })
        },

        Command::Create { metadata } => {
            let name = state.create_log(metadata).await?;
            Ok(Ack::Created { name })
        },

        Command::Open { name, mode: _mode } => {
            let obj = state.open_log(name).await?;
            obj.incref();
            let md = obj.metadata_snapshot().await;
            Ok(Ack::Success {
                recno: Some(obj.max_recno()),
                ts: None,
                hash: None,
                metadata: Some(md),
            })
        },

        Command::Close { name } => {
            let obj = state.open_log(name).await?;
            obj.decref().await;
            Ok(Ack::Success { recno: None, ts: None, hash: None, metadata: None })
        },

        Command::Delete { name } => {
            // Best-effort: remove the on-disk store. The in-memory
            // object, if cached, is left for the next reclamation pass
            // to age out rather than forcibly evicted here, since the
            // cache exposes no direct "drop now" operation (§4.D only
            // reclaims by age/refcount).
            SqliteStore::remove(&state.config.storage.log_dir, &name)?;
            state.channel.withdraw(name);
            Ok(Ack::Deleted)
        },

        Command::Append { name, datums } => {
            let obj = state.open_log(name).await?;
            let mut last_recno = obj.max_recno();
            for datum in datums {
                last_recno = obj.append(datum).await?;
            }
            state.subscriptions.notify_append(name, &obj, &state.channel).await;
            Ok(Ack::Changed { recno: last_recno })
        },

        Command::ReadByRecno { name, recno, nrecs } => {
            let obj = state.open_log(name).await?;
            let mut datums = Vec::new();
            let outcome = obj.read_by_recno(recno, nrecs.unwrap_or(1), &mut |d| {
                datums.push(d);
                Ok(())
            })?;
            if matches!(outcome, crate::storage::ReadOutcome::NotFound) {
                return Err(GdpError::NotFound);
            }
            Ok(Ack::Content { datums })
        },

        Command::ReadByTs { name, ts, nrecs } => {
            let obj = state.open_log(name).await?;
            let mut datums = Vec::new();
            let outcome = obj.read_by_timestamp(ts.sec, ts.nsec, nrecs.unwrap_or(1), &mut |d| {
                datums.push(d);
                Ok(())
            })?;
            if matches!(outcome, crate::storage::ReadOutcome::NotFound) {
                return Err(GdpError::NotFound);
            }
            Ok(Ack::Content { datums })
        },

        Command::ReadByHash { name, hash } => {
            let obj = state.open_log(name).await?;
            match obj.read_by_hash(&hash)? {
                Some(d) => Ok(Ack::Content { datums: vec![d] }),
                None => Err(GdpError::NotFound),
            }
        },

        Command::SubscribeByRecno { name, start, nrecs, timeout } => {
            let obj = state.open_log(name).await?;
            let active = crate::event::ActiveQueue::new();
            let req = Request::new(
                Some(obj.clone()),
                PduBody::Command(Command::SubscribeByRecno { name, start, nrecs, timeout }),
                src,
                name,
                0,
                RequestFlags::SERVER_SUBSCR,
                &state.rid_gen,
                &active,
            );
            let lease = timeout.map(|s| std::time::Duration::from_secs(s as u64)).unwrap_or(DEFAULT_LEASE);
            let sub = Arc::new(Subscriber::new(req, start.max(1), nrecs, lease));
            state.subscriptions.add(name, sub);
            Ok(Ack::Success { recno: Some(obj.max_recno()), ts: None, hash: None, metadata: None })
        },
        Command::SubscribeByTs { name, ts, nrecs, timeout } => {
            let obj = state.open_log(name).await?;
            let active = crate::event::ActiveQueue::new();
            let req = Request::new(
                Some(obj.clone()),
                PduBody::Command(Command::SubscribeByTs { name, ts, nrecs, timeout }),
                src,
                name,
                0,
                RequestFlags::SERVER_SUBSCR,
                &state.rid_gen,
                &active,
            );
            let lease = timeout.map(|s| std::time::Duration::from_secs(s as u64)).unwrap_or(DEFAULT_LEASE);
            let sub = Arc::new(Subscriber::new(req, 1, nrecs, lease));
            state.subscriptions.add(name, sub);
            Ok(Ack::Success { recno: Some(obj.max_recno()), ts: None, hash: None, metadata: None })
        },
        Command::SubscribeByHash { name, hash, timeout } => {
            let obj = state.open_log(name).await?;
            let datum = obj.read_by_hash(&hash)?.ok_or(GdpError::NotFound)?;
            let active = crate::event::ActiveQueue::new();
            let req = Request::new(
                Some(obj.clone()),
                PduBody::Command(Command::SubscribeByHash { name, hash, timeout }),
                src,
                name,
                0,
                RequestFlags::SERVER_SUBSCR,
                &state.rid_gen,
                &active,
            );
            let lease = timeout.map(|s| std::time::Duration::from_secs(s as u64)).unwrap_or(DEFAULT_LEASE);
            let sub = Arc::new(Subscriber::new(req, datum.recno + 1, None, lease));
            state.subscriptions.add(name, sub);
            Ok(Ack::Success { recno: Some(datum.recno), ts: None, hash: None, metadata: None })
        },

        Command::Unsubscribe { name } => {
            state.subscriptions.remove(name, rid);
            Ok(Ack::Deleted)
        },

        Command::GetMetadata { name } => {
            let obj = state.open_log(name).await?;
            let md = obj.metadata_snapshot().await;
            Ok(Ack::Success { recno: Some(obj.max_recno()), ts: None, hash: None, metadata: Some(md) })
        },
    }
}

/// Handle one inbound PDU off the channel: commands get dispatched and
/// acked/naked back to the sender; acks/naks for requests we initiated
/// are routed to the waiting [`Request`] (§4.F client dispatch).
async fn handle_received(state: &Arc<LogdState>, pdu: Pdu) {
    match &pdu.body {
        PduBody::Command(cmd) => {
            let cmd = cmd.clone();
            let result = process_command(state, pdu.src, pdu.rid, cmd).await;
            let body = match result {
                Ok(ack) => PduBody::Ack(ack),
                Err(e) => {
                    warn!(error = %e, "command failed");
                    PduBody::Nak(nak_for(&e))
                },
            };
            let response = Pdu {
                src: pdu.dst,
                dst: pdu.src,
                l4_seqno: pdu.l4_seqno,
                rid: pdu.rid,
                l5_seqno: None,
                body,
            };
            if let Err(e) = state.channel.send(response.src, response.dst, response.encode(), 0).await {
                warn!(error = %e, "failed to send response");
            }
        },
        PduBody::Ack(_) | PduBody::Nak(_) => {
            if let Some(req) = state.requests.find(&pdu) {
                req.deliver_response(pdu, &state.cache).await;
            } else {
                debug!(rid = ?pdu.rid, "response with no matching request");
            }
        },
    }
}

fn nak_for(err: &GdpError) -> Nak {
    match nak_code_for_error(err) {
        c if c == Nak::RouterNoRoute.code() => Nak::RouterNoRoute,
        c if c == (Nak::Conflict { recno: 0 }).code() => Nak::Conflict { recno: 0 },
        _ => Nak::Generic { ep_stat: None, description: Some(err.to_string()) },
    }
}

/// Spawn the reclaim/advertise-flush background tasks (§4.D, §4.G, the
/// advertise batcher). Returns their join handles so shutdown can abort
/// them cleanly.
pub fn spawn_background_tasks(state: Arc<LogdState>) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    let maint_state = state.clone();
    let interval = state.config.reclaim.interval;
    handles.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            maint_state.run_maintenance().await;
        }
    }));

    let flusher = state
        .advertise
        .clone()
        .spawn_flusher(state.channel.clone(), state.config.advertise.interval);
    handles.push(flusher);

    handles
}

/// Drain the channel's event stream until told to stop (§4.H, §5). This
/// is the daemon's one event loop; command/response routing both flow
/// through [`handle_received`].
async fn run_event_loop(state: Arc<LogdState>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
    let mut events = state.channel.subscribe();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            event = events.recv() => {
                match event {
                    Ok(ChannelEvent::Received(pdu)) => handle_received(&state, pdu).await,
                    Ok(ChannelEvent::RouterNoRoute { src, dst }) => {
                        let synthetic = Pdu {
                            src: dst,
                            dst: src,
                            l4_seqno: 0,
                            rid: None,
                            l5_seqno: None,
                            body: PduBody::Nak(Nak::RouterNoRoute),
                        };
                        handle_received(&state, synthetic).await;
                    },
                    Ok(ChannelEvent::StateChanged(flags)) => {
                        debug!(?flags, "channel state changed");
                    },
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "channel event receiver lagged");
                    },
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

/// Run `logd` to completion: the event loop plus background tasks, torn
/// down on a clean signal (`SIGINT`/`SIGTERM`) with a graceful flush, or
/// immediately on `SIGQUIT`/`SIGABRT` after dumping cache state — the
/// same split the reference daemon makes between its clean-exit and
/// abort signal handlers.
pub async fn run(state: Arc<LogdState>) -> ExitCode {
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let background = spawn_background_tasks(state.clone());
    let loop_handle = tokio::spawn(run_event_loop(state.clone(), shutdown_rx));

    let exit = wait_for_signal(&state).await;

    let _ = shutdown_tx.send(true);
    for h in background {
        h.abort();
    }
    loop_handle.abort();

    if matches!(exit, ExitCode::Clean | ExitCode::TempFail) {
        let (adv, wdr) = state.advertise.drain();
        for name in adv {
            state.channel.withdraw(name);
        }
        for name in wdr {
            state.channel.withdraw(name);
        }
        if let Err(e) = state.channel.flush().await {
            warn!(error = %e, "flush during shutdown failed");
        }
        let _ = state.channel.close().await;
    }

    info!(exit_code = exit.code(), "logd shutting down");
    exit
}

#[cfg(unix)]
async fn wait_for_signal(state: &Arc<LogdState>) -> ExitCode {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    let mut sigquit = signal(SignalKind::quit()).expect("install SIGQUIT handler");
    let mut sigabrt = signal(SignalKind::from_raw(libc_sigabrt())).expect("install SIGABRT handler");

    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT received, shutting down cleanly");
            ExitCode::TempFail
        },
        _ = sigterm.recv() => {
            info!("SIGTERM received, shutting down cleanly");
            ExitCode::TempFail
        },
        _ = sigquit.recv() => {
            warn!(dump = ?dump_state(state).await, "SIGQUIT received, aborting");
            ExitCode::Software
        },
        _ = sigabrt.recv() => {
            warn!(dump = ?dump_state(state).await, "SIGABRT received, aborting");
            ExitCode::Software
        },
    }
}

fn libc_sigabrt() -> i32 {
    6
}

async fn dump_state(state: &Arc<LogdState>) -> Vec<(LogName, std::time::Duration, i32)> {
    state.cache.dump().await
}
