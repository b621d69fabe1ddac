// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Split a combined key + certificate chain bundle into `.key` and `.crt` files.
//!
//! The bundle is scanned once, line by line, by a three-state machine
//! (`Scanning`, `InKeyBlock`, `InCertBlock`). Marker lines are recognised by
//! substring so annotated PEM (`Bag Attributes`, trailing comments) still
//! splits. Both outputs are fully assembled in memory before anything is
//! written, and each file is replaced atomically.

use crate::config::Paths;
use crate::error::{Error, Result};
use crate::x509::CertInfo;
use std::path::PathBuf;
use thiserror::Error;

const BEGIN: &str = "-----BEGIN";
const END: &str = "-----END";
const PRIVATE_KEY_TAIL: &str = "PRIVATE KEY-----";
const CERT_BEGIN: &str = "-----BEGIN CERTIFICATE-----";
const CERT_END: &str = "-----END CERTIFICATE-----";

/// Why a bundle could not be split. Line numbers are 1-based.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedReason {
    #[error("private key block opened at line {line} is never closed")]
    UnterminatedKey { line: usize },

    #[error("certificate block opened at line {line} is never closed")]
    UnterminatedCertificate { line: usize },

    #[error("begin marker at line {line} inside a block opened at line {opened_at}")]
    NestedBegin { line: usize, opened_at: usize },

    #[error("end marker at line {line} does not close an open block")]
    UnexpectedEnd { line: usize },

    #[error("line {line} inside a PEM block is not valid UTF-8")]
    InvalidText { line: usize },

    #[error("no private key block found")]
    MissingKey,

    #[error("no certificate block found")]
    MissingCertificate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    KeyBegin,
    KeyEnd,
    CertBegin,
    CertEnd,
}

fn contains(line: &[u8], needle: &str) -> bool {
    let needle = needle.as_bytes();
    line.len() >= needle.len() && line.windows(needle.len()).any(|w| w == needle)
}

impl Marker {
    fn classify(line: &[u8]) -> Option<Self> {
        if contains(line, CERT_BEGIN) {
            Some(Marker::CertBegin)
        } else if contains(line, CERT_END) {
            Some(Marker::CertEnd)
        } else if contains(line, PRIVATE_KEY_TAIL) {
            if contains(line, BEGIN) {
                Some(Marker::KeyBegin)
            } else if contains(line, END) {
                Some(Marker::KeyEnd)
            } else {
                None
            }
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Scanning,
    InKeyBlock { opened_at: usize },
    InCertBlock { opened_at: usize },
}

/// The two halves of a bundle, ready to be written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitBundle {
    /// Every private key block in bundle order, markers inclusive
    pub key_pem: String,
    /// Every certificate block, in bundle order
    pub chain_pem: String,
    /// First certificate block of the chain
    pub leaf_pem: String,
    pub key_blocks: usize,
    pub cert_blocks: usize,
}

/// Lines split on `\n` with a trailing `\r` dropped, like `str::lines`.
fn lines(content: &[u8]) -> impl Iterator<Item = &[u8]> {
    let content = content.strip_suffix(b"\n").unwrap_or(content);
    let pieces = (!content.is_empty()).then(|| content.split(|&b| b == b'\n'));
    pieces
        .into_iter()
        .flatten()
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}

fn push_line(
    out: &mut String,
    line: &[u8],
    line_no: usize,
) -> std::result::Result<(), MalformedReason> {
    let text =
        std::str::from_utf8(line).map_err(|_| MalformedReason::InvalidText { line: line_no })?;
    out.push_str(text);
    out.push('\n');
    Ok(())
}

/// Split bundle bytes into key and chain. Pure; touches no files.
///
/// Text between blocks may hold arbitrary bytes and is skipped. Lines inside
/// a block are copied verbatim and must be UTF-8.
pub fn split_bundle(
    content: impl AsRef<[u8]>,
) -> std::result::Result<SplitBundle, MalformedReason> {
    let mut out = SplitBundle::default();
    let mut state = ScanState::Scanning;

    for (idx, line) in lines(content.as_ref()).enumerate() {
        let line_no = idx + 1;
        let marker = Marker::classify(line);

        state = match (state, marker) {
            (ScanState::Scanning, Some(Marker::KeyBegin)) => {
                push_line(&mut out.key_pem, line, line_no)?;
                ScanState::InKeyBlock { opened_at: line_no }
            }
            (ScanState::Scanning, Some(Marker::CertBegin)) => {
                push_line(&mut out.chain_pem, line, line_no)?;
                if out.cert_blocks == 0 {
                    push_line(&mut out.leaf_pem, line, line_no)?;
                }
                ScanState::InCertBlock { opened_at: line_no }
            }
            (ScanState::Scanning, Some(Marker::KeyEnd | Marker::CertEnd)) => {
                return Err(MalformedReason::UnexpectedEnd { line: line_no });
            }
            // Anything between blocks is ignored
            (ScanState::Scanning, None) => ScanState::Scanning,

            (
                ScanState::InKeyBlock { opened_at } | ScanState::InCertBlock { opened_at },
                Some(Marker::KeyBegin | Marker::CertBegin),
            ) => {
                return Err(MalformedReason::NestedBegin {
                    line: line_no,
                    opened_at,
                });
            }

            (ScanState::InKeyBlock { .. }, Some(Marker::KeyEnd)) => {
                push_line(&mut out.key_pem, line, line_no)?;
                out.key_blocks += 1;
                ScanState::Scanning
            }
            (ScanState::InKeyBlock { .. }, Some(Marker::CertEnd)) => {
                return Err(MalformedReason::UnexpectedEnd { line: line_no });
            }
            (ScanState::InKeyBlock { opened_at }, None) => {
                push_line(&mut out.key_pem, line, line_no)?;
                ScanState::InKeyBlock { opened_at }
            }

            (ScanState::InCertBlock { .. }, Some(Marker::CertEnd)) => {
                push_line(&mut out.chain_pem, line, line_no)?;
                if out.cert_blocks == 0 {
                    push_line(&mut out.leaf_pem, line, line_no)?;
                }
                out.cert_blocks += 1;
                ScanState::Scanning
            }
            (ScanState::InCertBlock { .. }, Some(Marker::KeyEnd)) => {
                return Err(MalformedReason::UnexpectedEnd { line: line_no });
            }
            (ScanState::InCertBlock { opened_at }, None) => {
                push_line(&mut out.chain_pem, line, line_no)?;
                if out.cert_blocks == 0 {
                    push_line(&mut out.leaf_pem, line, line_no)?;
                }
                ScanState::InCertBlock { opened_at }
            }
        };
    }

    match state {
        ScanState::InKeyBlock { opened_at } => {
            return Err(MalformedReason::UnterminatedKey { line: opened_at })
        }
        ScanState::InCertBlock { opened_at } => {
            return Err(MalformedReason::UnterminatedCertificate { line: opened_at })
        }
        ScanState::Scanning => {}
    }

    if out.key_blocks == 0 {
        return Err(MalformedReason::MissingKey);
    }
    if out.cert_blocks == 0 {
        return Err(MalformedReason::MissingCertificate);
    }

    Ok(out)
}

/// What a successful split produced.
#[derive(Debug, Clone)]
pub struct SplitReport {
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
    pub key_blocks: usize,
    pub cert_blocks: usize,
    /// Parsed leaf certificate, when it decodes as X.509
    pub leaf: Option<CertInfo>,
}

/// Read the bundle at `paths.bundle` and atomically rewrite both artifacts.
///
/// A malformed bundle leaves any existing artifacts untouched.
pub fn split(paths: &Paths) -> Result<SplitReport> {
    let content = std::fs::read(&paths.bundle).map_err(|e| Error::ReadFile {
        path: paths.bundle.clone(),
        source: e,
    })?;

    let bundle = split_bundle(&content).map_err(|reason| Error::MalformedBundle {
        path: paths.bundle.clone(),
        reason,
    })?;

    crate::fs::atomic_write_secret(&paths.key, bundle.key_pem.as_bytes())?;
    crate::fs::atomic_write_secret(&paths.cert, bundle.chain_pem.as_bytes())?;

    let leaf = match crate::x509::parse_cert_pem(&bundle.leaf_pem) {
        Ok(info) => Some(info),
        Err(e) => {
            tracing::warn!(path = %paths.cert.display(), error = %e, "leaf certificate could not be decoded");
            None
        }
    };

    Ok(SplitReport {
        key_path: paths.key.clone(),
        cert_path: paths.cert.clone(),
        key_blocks: bundle.key_blocks,
        cert_blocks: bundle.cert_blocks,
        leaf,
    })
}

/// Something that turns the store into derived artifacts.
pub trait Splitter: Send + Sync + 'static {
    fn split(&self, paths: &Paths) -> Result<SplitReport>;
}

/// The PEM line splitter used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct PemSplitter;

impl Splitter for PemSplitter {
    fn split(&self, paths: &Paths) -> Result<SplitReport> {
        split(paths)
    }
}
