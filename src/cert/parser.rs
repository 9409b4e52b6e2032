use crate::cert::SerialNumber;
use crate::utils::errors::{PkiError, Result};
use crate::utils::pem::{self, CERTIFICATE_LABEL, CRL_LABEL};
use chrono::{DateTime, Utc};
use x509_parser::der_parser::oid;
use x509_parser::prelude::*;

const BASIC_CONSTRAINTS_OID: oid::Oid = oid!(2.5.29 .19);

/// Fields of an issued certificate the revocation ledger cares about
#[derive(Debug, Clone)]
pub struct ParsedCertificate {
    pub serial: SerialNumber,
    pub cn: String,
    pub issuer: String,
    pub not_after: DateTime<Utc>,
    pub is_ca: bool,
}

/// One revoked entry read back from an encoded CRL
#[derive(Debug, Clone, PartialEq)]
pub struct CrlSummaryEntry {
    pub serial: SerialNumber,
    pub revocation_time: DateTime<Utc>,
}

/// Decoded view of a CRL
#[derive(Debug, Clone)]
pub struct CrlSummary {
    pub issuer: String,
    pub this_update: DateTime<Utc>,
    pub next_update: Option<DateTime<Utc>>,
    pub entries: Vec<CrlSummaryEntry>,
}

impl CrlSummary {
    pub fn contains(&self, serial: &SerialNumber) -> bool {
        self.entries.iter().any(|entry| &entry.serial == serial)
    }
}

pub struct CertificateParser;

impl CertificateParser {
    /// Parse certificate PEM data
    pub fn parse_pem(pem_data: &str) -> Result<ParsedCertificate> {
        let der_bytes = pem::decode_first(pem_data, CERTIFICATE_LABEL)?;
        Self::parse_der(&der_bytes)
    }

    /// Parse a DER certificate
    pub fn parse_der(der_bytes: &[u8]) -> Result<ParsedCertificate> {
        let (_, cert) = X509Certificate::from_der(der_bytes)
            .map_err(|e| PkiError::CertParsing(format!("DER parsing error: {e}")))?;

        let serial = SerialNumber::from_bytes(&cert.serial.to_bytes_be())?;

        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("Unknown")
            .to_string();

        let issuer = cert.issuer().to_string();

        let not_after = timestamp(cert.validity().not_after.timestamp())?;

        let mut is_ca = false;
        for ext in cert.extensions() {
            if ext.oid == BASIC_CONSTRAINTS_OID {
                if let Ok((_rem, bc)) = BasicConstraints::from_der(ext.value) {
                    is_ca = bc.ca;
                }
                break;
            }
        }

        Ok(ParsedCertificate {
            serial,
            cn,
            issuer,
            not_after,
            is_ca,
        })
    }

    /// Parse a PEM encoded CRL
    pub fn parse_crl_pem(pem_data: &str) -> Result<CrlSummary> {
        let der_bytes = pem::decode_first(pem_data, CRL_LABEL)?;
        Self::parse_crl_der(&der_bytes)
    }

    /// Parse a DER encoded CRL
    pub fn parse_crl_der(der_bytes: &[u8]) -> Result<CrlSummary> {
        let (_, crl) = CertificateRevocationList::from_der(der_bytes)
            .map_err(|e| PkiError::CertParsing(format!("CRL parsing error: {e}")))?;

        let mut entries = Vec::new();
        for revoked in crl.iter_revoked_certificates() {
            entries.push(CrlSummaryEntry {
                serial: SerialNumber::from_bytes(&revoked.user_certificate.to_bytes_be())?,
                revocation_time: timestamp(revoked.revocation_date.timestamp())?,
            });
        }

        let next_update = match crl.next_update() {
            Some(t) => Some(timestamp(t.timestamp())?),
            None => None,
        };

        Ok(CrlSummary {
            issuer: crl.issuer().to_string(),
            this_update: timestamp(crl.last_update().timestamp())?,
            next_update,
            entries,
        })
    }
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| PkiError::CertParsing(format!("timestamp out of range: {secs}")))
}
