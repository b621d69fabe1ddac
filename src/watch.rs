// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Certificate store change detection.
//!
//! The detector waits for the store file to appear, then reports every write
//! to it as a [`ChangeSignal`]. Signals go through a queue of capacity one:
//! while a signal is pending, further writes are folded into it. Consumers
//! are therefore guaranteed at least one signal per burst of writes, not one
//! signal per write.

use crate::error::{Error, Result};
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pending signals beyond the first are coalesced.
pub const SIGNAL_QUEUE_CAPACITY: usize = 1;

/// "Re-read the store." Carries no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeSignal;

/// Everything the watch task needs, built once at startup.
#[derive(Debug, Clone)]
pub struct WatchContext {
    pub store_path: PathBuf,
    pub poll_interval: Duration,
    pub cancel: CancellationToken,
    signals: mpsc::Sender<ChangeSignal>,
}

impl WatchContext {
    /// Build a context and the receiving end of its signal queue.
    pub fn new(
        store_path: impl Into<PathBuf>,
        poll_interval: Duration,
    ) -> (Self, mpsc::Receiver<ChangeSignal>) {
        let (signals, receiver) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
        let ctx = Self {
            store_path: store_path.into(),
            poll_interval,
            cancel: CancellationToken::new(),
            signals,
        };
        (ctx, receiver)
    }

    /// Queue a signal without waiting. Returns false if it was folded into
    /// one already pending (or nobody is listening any more).
    pub fn notify_change(&self) -> bool {
        notify_change(&self.signals)
    }

    /// Directory to register with the OS watcher.
    fn watch_dir(&self) -> &Path {
        match self.store_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}

fn notify_change(signals: &mpsc::Sender<ChangeSignal>) -> bool {
    match signals.try_send(ChangeSignal) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            debug!("change signal coalesced with pending one");
            false
        }
        Err(TrySendError::Closed(_)) => false,
    }
}

/// Run the detector on the current runtime.
pub fn spawn(ctx: WatchContext) -> JoinHandle<Result<()>> {
    tokio::spawn(watch(ctx))
}

/// Wait for the store, signal once, then signal on every write until cancelled.
///
/// Returns an error only if the store cannot be polled or watched. Errors
/// reported by the OS watcher afterwards are logged and skipped.
pub async fn watch(ctx: WatchContext) -> Result<()> {
    if !wait_for_store(&ctx).await? {
        debug!("watch cancelled before certificate store appeared");
        return Ok(());
    }
    info!(path = %ctx.store_path.display(), "certificate store found");

    // Register before the first signal so no write slips between the two
    let _watcher = start_watcher(&ctx)?;
    info!(path = %ctx.store_path.display(), "watching certificate store");

    ctx.notify_change();

    ctx.cancel.cancelled().await;
    debug!(path = %ctx.store_path.display(), "watch stopped");
    Ok(())
}

/// Poll until the store exists. Returns false if cancelled first.
async fn wait_for_store(ctx: &WatchContext) -> Result<bool> {
    let mut announced = false;
    loop {
        match tokio::fs::metadata(&ctx.store_path).await {
            Ok(_) => return Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if !announced {
                    info!(path = %ctx.store_path.display(), "waiting for certificate store");
                    announced = true;
                }
            }
            Err(e) => {
                return Err(Error::WatchSetup {
                    path: ctx.store_path.clone(),
                    source: e,
                })
            }
        }

        tokio::select! {
            _ = ctx.cancel.cancelled() => return Ok(false),
            _ = tokio::time::sleep(ctx.poll_interval) => {}
        }
    }
}

fn start_watcher(ctx: &WatchContext) -> Result<RecommendedWatcher> {
    let file_name: OsString = ctx
        .store_path
        .file_name()
        .ok_or_else(|| Error::InvalidPath(ctx.store_path.clone()))?
        .to_os_string();
    let signals = ctx.signals.clone();

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
        Ok(event) => {
            if is_store_write(&event, &file_name) {
                debug!(kind = ?event.kind, "certificate store modified");
                notify_change(&signals);
            }
        }
        Err(e) => warn!(error = %e, "file watch error"),
    })
    .map_err(|e| Error::watch_setup(&ctx.store_path, e))?;

    // The parent is watched so that rename-over replacements are seen too
    watcher
        .watch(ctx.watch_dir(), RecursiveMode::NonRecursive)
        .map_err(|e| Error::watch_setup(&ctx.store_path, e))?;

    Ok(watcher)
}

/// Does this event mean the store file now has new content?
fn is_store_write(event: &Event, file_name: &OsString) -> bool {
    let targets: &[PathBuf] = match event.kind {
        EventKind::Create(_)
        | EventKind::Modify(ModifyKind::Data(_))
        | EventKind::Modify(ModifyKind::Any)
        | EventKind::Access(AccessKind::Close(AccessMode::Write))
        | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Any)) => &event.paths,
        // paths are [from, to]
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.get(1..).unwrap_or(&[])
        }
        _ => return false,
    };

    targets
        .iter()
        .any(|p| p.file_name() == Some(file_name.as_os_str()))
}
