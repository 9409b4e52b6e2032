pub mod crl;
pub mod periodic;
pub mod revoke;
pub mod store;
pub mod tidy;

pub use crl::{BuiltCrl, CrlBuilder, CrlEntry, CRL_KEY};
pub use periodic::{spawn_periodic, PeriodicHandle, PeriodicTask};
pub use revoke::{revoke_certificate, RevocationStatus, RevokeRequest, RevokeResponse};
pub use store::{RevocationRecord, RevocationStore, RevocationWriteGuard, REVOKED_PREFIX};
pub use tidy::{
    tidy, TidyOutcome, TidyParams, TidyReport, TidyState, DEFAULT_SAFETY_BUFFER_SECS,
    DEFAULT_TIDY_INTERVAL_SECS,
};

use crate::ca::CaSigner;
use crate::cert::CertificateStore;
use crate::storage::Storage;
use std::sync::Arc;

/// The stores revoke and tidy operate on together
pub struct Ledger {
    pub certs: CertificateStore,
    pub revocations: RevocationStore,
    pub crl: CrlBuilder,
}

impl Ledger {
    pub fn new(storage: Arc<dyn Storage>, signer: Arc<dyn CaSigner>, crl_lifetime: chrono::Duration) -> Self {
        Self {
            certs: CertificateStore::new(storage.clone()),
            revocations: RevocationStore::new(storage.clone()),
            crl: CrlBuilder::new(storage, signer, crl_lifetime),
        }
    }
}
