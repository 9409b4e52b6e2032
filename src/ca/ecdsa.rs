use super::{CaIdentity, CaSigner};
use crate::cert::SerialNumber;
use crate::utils::errors::{PkiError, Result};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{DerSignature, SigningKey, VerifyingKey};
use p256::pkcs8::DecodePrivateKey;
use std::path::Path;
use x509_cert::spki::AlgorithmIdentifierOwned;

/// CA signer holding a P-256 key, signing with ecdsa-with-SHA256
pub struct EcdsaCaSigner {
    key: SigningKey,
    issuer: String,
    ca_serial: Option<SerialNumber>,
}

impl EcdsaCaSigner {
    pub fn new(key: SigningKey, issuer: impl Into<String>) -> Self {
        Self {
            key,
            issuer: issuer.into(),
            ca_serial: None,
        }
    }

    /// Remember the CA certificate's own serial so it can be protected from revocation
    pub fn with_ca_serial(mut self, serial: SerialNumber) -> Self {
        self.ca_serial = Some(serial);
        self
    }

    /// Load a PKCS#8 PEM private key
    pub fn from_pkcs8_pem(pem_data: &str, issuer: impl Into<String>) -> Result<Self> {
        let key = SigningKey::from_pkcs8_pem(pem_data)
            .map_err(|e| PkiError::Signing(format!("Invalid CA private key: {e}")))?;
        Ok(Self::new(key, issuer))
    }

    /// Load a PKCS#8 PEM private key from disk
    pub fn load(path: &Path, issuer: impl Into<String>) -> Result<Self> {
        let pem_data = std::fs::read_to_string(path).map_err(|e| {
            PkiError::Signing(format!(
                "Cannot read CA private key {}: {e}",
                path.display()
            ))
        })?;
        Self::from_pkcs8_pem(&pem_data, issuer)
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        self.key.verifying_key()
    }
}

impl CaSigner for EcdsaCaSigner {
    fn identity(&self) -> Result<CaIdentity> {
        Ok(CaIdentity {
            issuer: self.issuer.clone(),
            algorithm: AlgorithmIdentifierOwned {
                oid: const_oid::db::rfc5912::ECDSA_WITH_SHA_256,
                parameters: None,
            },
            ca_serial: self.ca_serial.clone(),
        })
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let signature: DerSignature = self
            .key
            .try_sign(message)
            .map_err(|e| PkiError::Signing(format!("ECDSA signing failed: {e}")))?;
        Ok(signature.as_bytes().to_vec())
    }
}
