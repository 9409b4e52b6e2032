use crate::ca::{CaIdentity, CaSigner};
use crate::cert::SerialNumber;
use crate::revocation::store::RevocationStore;
use crate::storage::Storage;
use crate::utils::errors::{PkiError, Result};
use chrono::{DateTime, Datelike, Duration, Utc};
use der::asn1::{BitString, GeneralizedTime, UtcTime};
use der::Encode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::SystemTime;
use x509_cert::crl::{CertificateList, RevokedCert, TbsCertList};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber as X509Serial;
use x509_cert::time::Time;
use x509_cert::Version;

pub const CRL_KEY: &str = "crl";

/// Serial and revocation time as listed on a CRL
#[derive(Debug, Clone, PartialEq)]
pub struct CrlEntry {
    pub serial: SerialNumber,
    pub revocation_time: DateTime<Utc>,
}

/// The CRL most recently written by [`CrlBuilder::rebuild`]
#[derive(Debug, Clone)]
pub struct BuiltCrl {
    pub this_update: DateTime<Utc>,
    pub next_update: DateTime<Utc>,
    pub entries: Vec<CrlEntry>,
    pub der: Vec<u8>,
}

impl BuiltCrl {
    pub fn contains(&self, serial: &SerialNumber) -> bool {
        self.entries.iter().any(|entry| &entry.serial == serial)
    }
}

/// Produces the signed CRL from the full set of revocation records.
///
/// Callers decide the locking: revoke and tidy call in while holding the write
/// side of the revocation lock, a standalone rotation holds the read side.
pub struct CrlBuilder {
    storage: Arc<dyn Storage>,
    signer: Arc<dyn CaSigner>,
    crl_lifetime: Duration,
}

impl CrlBuilder {
    pub fn new(storage: Arc<dyn Storage>, signer: Arc<dyn CaSigner>, crl_lifetime: Duration) -> Self {
        Self {
            storage,
            signer,
            crl_lifetime,
        }
    }

    pub fn crl_lifetime(&self) -> Duration {
        self.crl_lifetime
    }

    pub fn signer(&self) -> &dyn CaSigner {
        self.signer.as_ref()
    }

    /// Regenerate the CRL as of `now` and overwrite the stored one.
    ///
    /// On any failure the previously stored CRL is left untouched.
    pub async fn rebuild(&self, revocations: &RevocationStore, now: DateTime<Utc>) -> Result<BuiltCrl> {
        let identity = self.signer.identity()?;

        let mut entries = Vec::new();
        for serial in revocations.list().await? {
            let Some(record) = revocations.get(&serial).await? else {
                // Removed between list and get
                continue;
            };
            if record.is_expired_at(now) {
                tracing::debug!("Leaving expired certificate {} off the CRL", serial);
                continue;
            }
            entries.push(CrlEntry {
                serial: record.serial,
                revocation_time: record.revocation_time,
            });
        }
        entries.sort_by(|a, b| a.serial.cmp(&b.serial));

        let next_update = now + self.crl_lifetime;
        let der = self.encode(&identity, &entries, now, next_update)?;

        self.storage.put(CRL_KEY, &der).await?;
        tracing::info!(
            "Rebuilt CRL with {} entries, next update {}",
            entries.len(),
            next_update
        );

        Ok(BuiltCrl {
            this_update: now,
            next_update,
            entries,
            der,
        })
    }

    /// The stored CRL, DER encoded
    pub async fn fetch_der(&self) -> Result<Option<Vec<u8>>> {
        self.storage.get(CRL_KEY).await
    }

    fn encode(
        &self,
        identity: &CaIdentity,
        entries: &[CrlEntry],
        this_update: DateTime<Utc>,
        next_update: DateTime<Utc>,
    ) -> Result<Vec<u8>> {
        let issuer = Name::from_str(&identity.issuer).map_err(|e| {
            PkiError::Signing(format!("Invalid issuer name '{}': {e}", identity.issuer))
        })?;

        let mut revoked = Vec::with_capacity(entries.len());
        for entry in entries {
            revoked.push(RevokedCert {
                serial_number: X509Serial::new(&entry.serial.to_bytes())?,
                revocation_date: x509_time(entry.revocation_time)?,
                crl_entry_extensions: None,
            });
        }

        let tbs_cert_list = TbsCertList {
            version: Version::V2,
            signature: identity.algorithm.clone(),
            issuer,
            this_update: x509_time(this_update)?,
            next_update: Some(x509_time(next_update)?),
            // An empty list is omitted rather than encoded as an empty sequence
            revoked_certificates: if revoked.is_empty() {
                None
            } else {
                Some(revoked)
            },
            crl_extensions: None,
        };

        let signature = self.signer.sign(&tbs_cert_list.to_der()?)?;

        let crl = CertificateList {
            tbs_cert_list,
            signature_algorithm: identity.algorithm.clone(),
            signature: BitString::from_bytes(&signature)?,
        };

        Ok(crl.to_der()?)
    }
}

/// UTCTime through 2049, GeneralizedTime after, per RFC 5280
pub(crate) fn x509_time(at: DateTime<Utc>) -> Result<Time> {
    let system_time = SystemTime::from(at);
    if at.year() < 2050 {
        Ok(Time::UtcTime(UtcTime::from_system_time(system_time)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_system_time(
            system_time,
        )?))
    }
}
