use crate::utils::errors::{PkiError, Result};
use base64::{engine::general_purpose, Engine as _};

pub const CERTIFICATE_LABEL: &str = "CERTIFICATE";
pub const CRL_LABEL: &str = "X509 CRL";

const LINE_WIDTH: usize = 64;

/// Wrap DER bytes in a PEM block with the given label
pub fn encode(label: &str, der: &[u8]) -> String {
    let body = general_purpose::STANDARD.encode(der);
    let mut pem = format!("-----BEGIN {label}-----\n");
    for chunk in body.as_bytes().chunks(LINE_WIDTH) {
        pem.push_str(&String::from_utf8_lossy(chunk));
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {label}-----\n"));
    pem
}

/// Decode the first PEM block carrying `label`
pub fn decode_first(pem_data: &str, label: &str) -> Result<Vec<u8>> {
    let begin = format!("-----BEGIN {label}-----");
    let end = format!("-----END {label}-----");
    let mut in_block = false;
    let mut lines = Vec::new();

    for line in pem_data.lines() {
        let line = line.trim();
        if line == begin {
            in_block = true;
            continue;
        } else if line == end {
            break;
        } else if in_block {
            lines.push(line);
        }
    }

    if lines.is_empty() {
        return Err(PkiError::CertParsing(format!(
            "No {label} data found in PEM"
        )));
    }

    general_purpose::STANDARD
        .decode(lines.concat())
        .map_err(|e| PkiError::CertParsing(format!("Base64 decode error: {e}")))
}

/// Normalize PEM data to ensure consistent formatting
pub fn normalize_pem(pem_data: &str) -> String {
    let trimmed = pem_data.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    format!("{trimmed}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_wraps_lines() {
        let der = vec![0x30u8; 100];
        let pem = encode(CRL_LABEL, &der);
        assert!(pem.starts_with("-----BEGIN X509 CRL-----\n"));
        assert!(pem.ends_with("-----END X509 CRL-----\n"));
        assert!(pem.lines().all(|line| line.len() <= LINE_WIDTH));
        assert_eq!(decode_first(&pem, CRL_LABEL).unwrap(), der);
    }

    #[test]
    fn test_decode_picks_matching_label() {
        let cert = encode(CERTIFICATE_LABEL, b"cert");
        let crl = encode(CRL_LABEL, b"crl");
        let bundle = format!("{cert}{crl}");
        assert_eq!(decode_first(&bundle, CRL_LABEL).unwrap(), b"crl");
        assert_eq!(decode_first(&bundle, CERTIFICATE_LABEL).unwrap(), b"cert");
    }

    #[test]
    fn test_decode_without_block_fails() {
        assert!(matches!(
            decode_first("not pem", CRL_LABEL),
            Err(PkiError::CertParsing(_))
        ));
    }

    #[test]
    fn test_normalize_pem() {
        assert_eq!(normalize_pem("  abc \n\n"), "abc\n");
        assert_eq!(normalize_pem("   "), "");
    }
}
