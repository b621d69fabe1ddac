// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Republish an ACME certificate store as separate key and chain files.
//!
//! ACME clients commonly cache the issued certificate as one combined file
//! holding the private key followed by the certificate chain. Most
//! TLS-terminating software wants two files instead. `certsplit` waits for
//! that combined file to appear, splits it into `<store>.key` and
//! `<store>.crt`, and in daemon mode does it again every time the ACME
//! client renews the certificate.
//!
//! ```rust,no_run
//! use certsplit::{Config, Controller, Paths};
//!
//! # async fn demo() -> certsplit::Result<()> {
//! let paths = Paths::new("/var/lib/acme".as_ref(), "example.com")?;
//! let config = Config::default();
//!
//! let controller = Controller::new(paths, &config);
//! controller.run(certsplit::daemon::termination_signal()?).await?;
//! # Ok(())
//! # }
//! ```

/// Configuration and on-disk layout.
pub mod config;
/// Lifecycle controller for the detect/split cycle.
pub mod daemon;
/// Error types.
pub mod error;
/// Filesystem utilities.
pub mod fs;
/// Tracing subscriber setup.
pub mod logging;
/// PEM bundle splitting.
pub mod split;
/// Certificate store change detection.
pub mod watch;
/// X.509 certificate parsing.
pub mod x509;

pub use config::{Config, Paths};
pub use daemon::{termination_signal, Controller, Mode, Outcome, State};
pub use error::{Error, Result};
pub use fs::{atomic_write_secret, create_private_dir, write_secret_file};
pub use split::{split, split_bundle, MalformedReason, PemSplitter, SplitBundle, SplitReport, Splitter};
pub use watch::{ChangeSignal, WatchContext, SIGNAL_QUEUE_CAPACITY};
pub use x509::{parse_cert_pem, CertInfo};
