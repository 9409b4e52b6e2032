pub mod backend;
pub mod ca;
pub mod cert;
pub mod cli;
pub mod config;
pub mod revocation;
pub mod storage;
pub mod utils;

pub use backend::PkiBackend;
pub use cert::{CertificateEntry, SerialNumber};
pub use config::BackendConfig;
pub use revocation::{RevocationStatus, TidyOutcome, TidyParams, TidyReport};
pub use utils::errors::{PkiError, Result};
