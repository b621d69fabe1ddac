// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Summarise the leaf certificate of a freshly split chain.

use crate::error::{Error, Result};
use x509_parser::prelude::*;

#[derive(Debug, Clone)]
pub struct CertInfo {
    pub not_after_timestamp: i64,
    pub common_name: Option<String>,
    pub subject_alt_names: Vec<String>,
}

impl CertInfo {
    pub fn expiry_string(&self) -> String {
        match ::time::OffsetDateTime::from_unix_timestamp(self.not_after_timestamp) {
            Ok(dt) => format!("{}-{:02}-{:02}", dt.year(), dt.month() as u8, dt.day()),
            Err(_) => "Invalid date".to_string(),
        }
    }

    pub fn days_remaining(&self) -> i64 {
        let now = ::time::OffsetDateTime::now_utc();
        match ::time::OffsetDateTime::from_unix_timestamp(self.not_after_timestamp) {
            Ok(expiry) => (expiry - now).whole_days(),
            Err(_) => -1, // Treat invalid timestamps as expired
        }
    }

    pub fn is_expired(&self) -> bool {
        self.days_remaining() < 0
    }

    /// CN if present, else the first SAN.
    pub fn display_name(&self) -> &str {
        self.common_name
            .as_deref()
            .or_else(|| self.subject_alt_names.first().map(String::as_str))
            .unwrap_or("<unnamed>")
    }
}

/// Parse the first PEM block of `pem_str`, which must be a certificate.
pub fn parse_cert_pem(pem_str: &str) -> Result<CertInfo> {
    let pem = ::pem::parse(pem_str)
        .map_err(|e| Error::CertParse(format!("Failed to parse PEM: {}", e)))?;

    if pem.tag() != "CERTIFICATE" {
        return Err(Error::CertParse(format!(
            "Expected CERTIFICATE, got {}",
            pem.tag()
        )));
    }

    let (_, cert) = X509Certificate::from_der(pem.contents())
        .map_err(|e| Error::CertParse(format!("Invalid X.509: {}", e)))?;

    let common_name = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(String::from);

    let mut subject_alt_names = Vec::new();
    for ext in cert.extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
            for name in &san.general_names {
                match name {
                    GeneralName::DNSName(dns) => subject_alt_names.push(dns.to_string()),
                    GeneralName::IPAddress(ip_bytes) if ip_bytes.len() == 4 => {
                        if let Ok(bytes) = <[u8; 4]>::try_from(*ip_bytes) {
                            subject_alt_names.push(std::net::Ipv4Addr::from(bytes).to_string());
                        }
                    }
                    GeneralName::IPAddress(ip_bytes) if ip_bytes.len() == 16 => {
                        if let Ok(bytes) = <[u8; 16]>::try_from(*ip_bytes) {
                            subject_alt_names.push(std::net::Ipv6Addr::from(bytes).to_string());
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(CertInfo {
        not_after_timestamp: cert.validity().not_after.timestamp(),
        common_name,
        subject_alt_names,
    })
}
