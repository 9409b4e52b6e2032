pub mod parser;
pub mod serial;
pub mod store;

pub use parser::{CertificateParser, CrlSummary, CrlSummaryEntry, ParsedCertificate};
pub use serial::SerialNumber;
pub use store::{CertificateEntry, CertificateStore};
