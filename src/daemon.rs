// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Lifecycle controller: drives the detect → split cycle.
//!
//! The controller owns the receiving end of the change queue and is the only
//! place where change signals and the termination request meet. Each signal
//! triggers one split. A failed split ends the run with an error, and a
//! termination request ends it cleanly. In one-shot mode the run ends after
//! the first split.

use crate::config::{Config, Paths};
use crate::error::{Error, Result};
use crate::split::{PemSplitter, SplitReport, Splitter};
use crate::watch::{self, ChangeSignal, WatchContext};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, watch as state_watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Split once, then exit
    OneShot,
    /// Split on every change until terminated
    Daemon,
}

impl Mode {
    pub fn from_flag(daemon: bool) -> Self {
        if daemon {
            Mode::Daemon
        } else {
            Mode::OneShot
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    WaitingForStore,
    Watching,
    Splitting,
    Terminated,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Idle => "idle",
            State::WaitingForStore => "waiting-for-store",
            State::Watching => "watching",
            State::Splitting => "splitting",
            State::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// How a run that did not fail came to an end. Both map to exit status 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// One-shot mode finished its split
    Completed,
    /// A termination request arrived
    Terminated,
}

pub struct Controller<S: Splitter = PemSplitter> {
    paths: Paths,
    mode: Mode,
    renew_warning_days: u32,
    splitter: Arc<S>,
    cancel: CancellationToken,
    /// Handed to the watch task when the run starts
    ctx: Option<WatchContext>,
    signals: mpsc::Receiver<ChangeSignal>,
    state: state_watch::Sender<State>,
}

impl Controller<PemSplitter> {
    pub fn new(paths: Paths, config: &Config) -> Self {
        Self::with_splitter(paths, config, PemSplitter)
    }
}

impl<S: Splitter> Controller<S> {
    pub fn with_splitter(paths: Paths, config: &Config, splitter: S) -> Self {
        let (ctx, signals) = WatchContext::new(paths.bundle.clone(), config.poll_interval());
        let (state, _) = state_watch::channel(State::Idle);
        Self {
            paths,
            mode: Mode::from_flag(config.daemon),
            renew_warning_days: config.renew_warning_days,
            splitter: Arc::new(splitter),
            cancel: ctx.cancel.clone(),
            ctx: Some(ctx),
            signals,
            state,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn state(&self) -> State {
        *self.state.borrow()
    }

    /// Follow state changes, including those made after `run` takes the controller.
    pub fn subscribe(&self) -> state_watch::Receiver<State> {
        self.state.subscribe()
    }

    /// The watch context, until the run starts. A clone can inject signals.
    pub fn context(&self) -> Option<&WatchContext> {
        self.ctx.as_ref()
    }

    fn transition(&self, next: State) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "controller state change");
        }
    }

    /// Run until one-shot completion, termination or a fatal error.
    ///
    /// `shutdown` resolves when termination is requested. It is checked
    /// before every split and wins over a change signal that is ready at the
    /// same time. A split in progress always runs to completion.
    pub async fn run<F>(mut self, shutdown: F) -> Result<Outcome>
    where
        F: Future<Output = ()>,
    {
        info!(
            store = %self.paths.bundle.display(),
            mode = ?self.mode,
            "starting certificate store watch"
        );

        // The controller keeps no sender, so a dead watch task shows up as a
        // closed queue
        let mut watcher = self.ctx.take().map(watch::spawn);
        self.transition(State::WaitingForStore);

        tokio::pin!(shutdown);

        let result = loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("received termination request, shutting down");
                    break Ok(Outcome::Terminated);
                }
                signal = self.signals.recv() => {
                    if signal.is_none() {
                        break Err(watch_failure(watcher.take()).await);
                    }
                }
            }

            // The first signal is only sent once the OS watch is registered
            if self.state() == State::WaitingForStore {
                self.transition(State::Watching);
            }

            self.transition(State::Splitting);
            info!(store = %self.paths.bundle.display(), "certificate store changed");

            match split_blocking(Arc::clone(&self.splitter), self.paths.clone()).await {
                Ok(report) => self.log_report(&report),
                Err(e) => {
                    error!(error = %e, "failed to split certificate store");
                    break Err(e);
                }
            }

            if self.mode == Mode::OneShot {
                break Ok(Outcome::Completed);
            }
            self.transition(State::Watching);
        };

        self.transition(State::Terminated);
        self.cancel.cancel();
        if let Some(handle) = watcher {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "watch task ended with error"),
                Err(e) => warn!(error = %e, "watch task panicked"),
            }
        }

        result
    }

    fn log_report(&self, report: &SplitReport) {
        info!(
            key = %report.key_path.display(),
            cert = %report.cert_path.display(),
            keys = report.key_blocks,
            certificates = report.cert_blocks,
            "wrote key and certificate chain"
        );

        let Some(leaf) = &report.leaf else {
            return;
        };
        let days = leaf.days_remaining();
        if leaf.is_expired() {
            warn!(
                name = leaf.display_name(),
                expired = %leaf.expiry_string(),
                "certificate has expired"
            );
        } else if days <= i64::from(self.renew_warning_days) {
            warn!(
                name = leaf.display_name(),
                expires = %leaf.expiry_string(),
                days_remaining = days,
                "certificate expires soon"
            );
        } else {
            info!(
                name = leaf.display_name(),
                expires = %leaf.expiry_string(),
                days_remaining = days,
                "certificate valid"
            );
        }
    }
}

/// Splitting is plain file I/O, so it runs on the blocking pool.
async fn split_blocking<S: Splitter>(splitter: Arc<S>, paths: Paths) -> Result<SplitReport> {
    tokio::task::spawn_blocking(move || splitter.split(&paths))
        .await
        .map_err(|e| Error::Task(format!("split task failed: {}", e)))?
}

/// Turn the end of the watch task into the error that ends the run.
async fn watch_failure(handle: Option<JoinHandle<Result<()>>>) -> Error {
    let Some(handle) = handle else {
        return Error::Task("watch task already finished".into());
    };
    match handle.await {
        Ok(Err(e)) => e,
        Ok(Ok(())) => Error::Task("watch task ended unexpectedly".into()),
        Err(e) => Error::Task(format!("watch task panicked: {}", e)),
    }
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
///
/// Must be called inside the runtime; fails if a handler cannot be installed.
pub fn termination_signal() -> Result<impl Future<Output = ()> + Send> {
    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| Error::SignalHandler(e.to_string()))?;

    Ok(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }

        #[cfg(not(unix))]
        ctrl_c.await;
    })
}
