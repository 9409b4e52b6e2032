use super::store::RevocationRecord;
use super::Ledger;
use crate::cert::SerialNumber;
use crate::utils::errors::{PkiError, Result};
use chrono::{DateTime, Utc};

pub struct RevokeRequest {
    pub serial: SerialNumber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationStatus {
    /// Newly revoked by this request
    Revoked,
    /// Was already on the ledger, nothing changed
    AlreadyRevoked,
    /// Certificate already expired, nothing recorded
    AlreadyExpired,
}

#[derive(Debug, Clone)]
pub struct RevokeResponse {
    pub serial: SerialNumber,
    pub status: RevocationStatus,
    pub revocation_time: Option<DateTime<Utc>>,
}

/// Revoke a certificate and regenerate the CRL before returning.
///
/// Holds the exclusive revocation lock for the whole operation. A CRL rebuild
/// failure after the record is written is returned as [`PkiError::CrlStale`]; the
/// revocation itself stays in place.
pub async fn revoke_certificate(
    ledger: &Ledger,
    request: RevokeRequest,
    now: DateTime<Utc>,
) -> Result<RevokeResponse> {
    let serial = request.serial;
    let revocations = ledger.revocations.write().await;

    let Some(cert) = ledger.certs.get(&serial).await? else {
        return Err(PkiError::NotFound(serial.to_string()));
    };

    if let Some(existing) = revocations.get(&serial).await? {
        tracing::debug!(
            "Certificate {} already revoked at {}",
            serial,
            existing.revocation_time
        );
        return Ok(RevokeResponse {
            serial,
            status: RevocationStatus::AlreadyRevoked,
            revocation_time: Some(existing.revocation_time),
        });
    }

    if let Ok(identity) = ledger.crl.signer().identity() {
        if identity.ca_serial.as_ref() == Some(&serial) {
            return Err(PkiError::InvalidInput(
                "Refusing to revoke the CA certificate through its own CRL".to_string(),
            ));
        }
    }

    if cert.is_expired_at(now) {
        tracing::info!(
            "Certificate {} expired at {}, nothing to revoke",
            serial,
            cert.expiration
        );
        return Ok(RevokeResponse {
            serial,
            status: RevocationStatus::AlreadyExpired,
            revocation_time: None,
        });
    }

    let record = RevocationRecord {
        serial: serial.clone(),
        revocation_time: now,
        certificate_expiration: cert.expiration,
        certificate_pem: cert.certificate_pem,
    };
    revocations.put(&record).await?;
    tracing::info!("Revoked certificate {}", serial);

    if let Err(e) = ledger.crl.rebuild(revocations.store(), now).await {
        tracing::warn!("Certificate {} revoked but CRL rebuild failed: {}", serial, e);
        return Err(PkiError::CrlStale {
            serial: serial.to_string(),
            source: Box::new(e),
        });
    }

    Ok(RevokeResponse {
        serial,
        status: RevocationStatus::Revoked,
        revocation_time: Some(now),
    })
}
