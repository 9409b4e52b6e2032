//! CA signing material as seen by the CRL builder.
//!
//! Key generation and issuance live elsewhere; this module only needs an issuer
//! name, a signature algorithm and something that can sign bytes with the CA key.

pub mod ecdsa;

pub use ecdsa::EcdsaCaSigner;

use crate::cert::SerialNumber;
use crate::utils::errors::{PkiError, Result};
use x509_cert::spki::AlgorithmIdentifierOwned;

/// Who signs the CRL and how
#[derive(Debug, Clone)]
pub struct CaIdentity {
    /// Issuer distinguished name in RFC 4514 form, e.g. `CN=Example Root CA,O=Example`
    pub issuer: String,
    pub algorithm: AlgorithmIdentifierOwned,
    /// Serial of the CA certificate itself, which must never be revoked through the ledger
    pub ca_serial: Option<SerialNumber>,
}

/// Signing collaborator backed by the CA private key.
///
/// Implementations are shared read-only across tasks.
pub trait CaSigner: Send + Sync {
    fn identity(&self) -> Result<CaIdentity>;

    /// Sign DER bytes, returning the encoded signature value
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>>;
}

/// Stand-in used before the backend has been given CA material
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredSigner;

impl CaSigner for UnconfiguredSigner {
    fn identity(&self) -> Result<CaIdentity> {
        Err(PkiError::Signing(
            "CA key material has not been configured".to_string(),
        ))
    }

    fn sign(&self, _message: &[u8]) -> Result<Vec<u8>> {
        Err(PkiError::Signing(
            "CA key material has not been configured".to_string(),
        ))
    }
}
