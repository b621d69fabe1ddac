// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to watch certificate store {path}: {source}")]
    WatchSetup {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to install termination signal handler: {0}")]
    SignalHandler(String),

    #[error("Failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Malformed certificate bundle {path}: {reason}")]
    MalformedBundle {
        path: PathBuf,
        reason: crate::split::MalformedReason,
    },

    #[error("Invalid domain '{domain}': {reason}")]
    InvalidDomain { domain: String, reason: String },

    #[error("Invalid path: {0}")]
    InvalidPath(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse certificate: {0}")]
    CertParse(String),

    #[error("Background task failed: {0}")]
    Task(String),
}

impl Error {
    /// Wrap a `notify` failure raised while registering the watch.
    pub(crate) fn watch_setup(path: &std::path::Path, err: notify::Error) -> Self {
        let source = match err.kind {
            notify::ErrorKind::Io(io) => io,
            other => std::io::Error::other(format!("{:?}", other)),
        };
        Error::WatchSetup {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
