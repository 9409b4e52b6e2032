//! The revocation backend as one mount would see it.
//!
//! [`PkiBackend`] owns the ledger, the tidy bookkeeping and the clock, and is the
//! entry point used by the CLI and the periodic scheduler.

use crate::ca::CaSigner;
use crate::cert::{CertificateEntry, CertificateParser, CrlSummary, SerialNumber};
use crate::config::BackendConfig;
use crate::revocation::{
    self, BuiltCrl, Ledger, PeriodicTask, RevocationRecord, RevokeRequest, RevokeResponse,
    TidyOutcome, TidyParams, TidyReport, TidyState,
};
use crate::storage::Storage;
use crate::utils::clock::{Clock, SystemClock};
use crate::utils::errors::{PkiError, Result};
use crate::utils::pem::{self, CRL_LABEL};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct PkiBackend {
    ledger: Ledger,
    tidy_state: TidyState,
    safety_buffer: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl PkiBackend {
    pub fn new(storage: Arc<dyn Storage>, signer: Arc<dyn CaSigner>, config: &BackendConfig) -> Self {
        Self::with_clock(storage, signer, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        storage: Arc<dyn Storage>,
        signer: Arc<dyn CaSigner>,
        config: &BackendConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger: Ledger::new(storage, signer, config.crl_lifetime()),
            tidy_state: TidyState::new(config.tidy_interval()),
            safety_buffer: config.safety_buffer(),
            clock,
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Parameters used by the periodic trigger
    pub fn default_tidy_params(&self) -> TidyParams {
        TidyParams {
            safety_buffer: self.safety_buffer,
            ..TidyParams::default()
        }
    }

    pub async fn revoke(&self, serial: &str) -> Result<RevokeResponse> {
        let serial = SerialNumber::parse(serial)?;
        revocation::revoke_certificate(&self.ledger, RevokeRequest { serial }, self.now()).await
    }

    /// Manual sweep; skips the interval check but not the single-sweep guard
    pub async fn tidy(&self, params: &TidyParams) -> Result<TidyOutcome> {
        revocation::tidy(&self.ledger, &self.tidy_state, params, self.now()).await
    }

    /// Periodic entry point: sweep with defaults if the tidy interval has elapsed.
    ///
    /// Returns `None` when the interval has not passed or another sweep is running.
    pub async fn periodic_func(&self) -> Result<Option<TidyReport>> {
        let now = self.now();
        if !self.tidy_state.claim_periodic_run(now) {
            tracing::trace!("Tidy interval not elapsed, last run {:?}", self.last_tidy());
            return Ok(None);
        }

        tracing::debug!("Tidy interval elapsed, starting periodic sweep");
        match revocation::tidy(&self.ledger, &self.tidy_state, &self.default_tidy_params(), now)
            .await?
        {
            TidyOutcome::Completed(report) => Ok(Some(report)),
            TidyOutcome::Skipped => Ok(None),
        }
    }

    pub fn last_tidy(&self) -> Option<DateTime<Utc>> {
        self.tidy_state.last_run()
    }

    pub fn tidy_running(&self) -> bool {
        self.tidy_state.is_running()
    }

    /// Rebuild the CRL outside of a revoke, e.g. to refresh next-update
    pub async fn rotate_crl(&self) -> Result<BuiltCrl> {
        let _read = self.ledger.revocations.read().await;
        self.ledger
            .crl
            .rebuild(&self.ledger.revocations, self.now())
            .await
    }

    pub async fn fetch_crl_der(&self) -> Result<Vec<u8>> {
        self.ledger
            .crl
            .fetch_der()
            .await?
            .ok_or_else(|| PkiError::NotFound("no CRL has been built yet".to_string()))
    }

    pub async fn fetch_crl_pem(&self) -> Result<String> {
        Ok(pem::encode(CRL_LABEL, &self.fetch_crl_der().await?))
    }

    pub async fn crl_summary(&self) -> Result<CrlSummary> {
        CertificateParser::parse_crl_der(&self.fetch_crl_der().await?)
    }

    /// Record an issued PEM certificate in the certificate store
    pub async fn import_certificate(&self, pem_data: &str, role: &str) -> Result<CertificateEntry> {
        self.ledger.certs.import_pem(pem_data, role).await
    }

    pub async fn register_certificate(&self, entry: &CertificateEntry) -> Result<()> {
        self.ledger.certs.put(entry).await
    }

    pub async fn list_certificates(&self) -> Result<Vec<CertificateEntry>> {
        let mut entries = Vec::new();
        for serial in self.ledger.certs.list().await? {
            match self.ledger.certs.get(&serial).await {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(PkiError::Json(e)) => {
                    tracing::warn!("Skipping unreadable certificate entry {}: {}", serial, e)
                }
                Err(e) => return Err(e),
            }
        }
        entries.sort_by(|a, b| a.serial.cmp(&b.serial));
        Ok(entries)
    }

    pub async fn list_revoked(&self) -> Result<Vec<RevocationRecord>> {
        let mut records = Vec::new();
        for serial in self.ledger.revocations.list().await? {
            match self.ledger.revocations.get(&serial).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(PkiError::Json(e)) => {
                    tracing::warn!("Skipping unreadable revocation record {}: {}", serial, e)
                }
                Err(e) => return Err(e),
            }
        }
        records.sort_by(|a, b| a.serial.cmp(&b.serial));
        Ok(records)
    }
}

#[async_trait]
impl PeriodicTask for PkiBackend {
    async fn run_periodic(&self) -> Result<()> {
        if let Some(report) = self.periodic_func().await? {
            if !report.errors.is_empty() {
                tracing::warn!("Periodic tidy finished with {} errors", report.errors.len());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::testing::{issue_certificate, test_signer};
    use crate::ca::UnconfiguredSigner;
    use crate::revocation::{spawn_periodic, RevocationStatus, CRL_KEY};
    use crate::storage::testing::FailingStorage;
    use crate::storage::InMemoryStorage;
    use crate::utils::clock::ManualClock;
    use chrono::Duration;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    struct Fixture {
        storage: Arc<InMemoryStorage>,
        clock: Arc<ManualClock>,
        backend: Arc<PkiBackend>,
    }

    fn fixture() -> Fixture {
        let storage = Arc::new(InMemoryStorage::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let backend = Arc::new(PkiBackend::with_clock(
            storage.clone(),
            Arc::new(test_signer()),
            &BackendConfig::default(),
            clock.clone(),
        ));
        Fixture {
            storage,
            clock,
            backend,
        }
    }

    async fn issue(backend: &PkiBackend, serial: &str, expires: DateTime<Utc>) -> SerialNumber {
        let serial = SerialNumber::parse(serial).unwrap();
        backend
            .register_certificate(&CertificateEntry::new(serial.clone(), expires, "web"))
            .await
            .unwrap();
        serial
    }

    #[tokio::test]
    async fn test_revoke_rebuild_tidy_scenario() {
        let f = fixture();
        let expires = t0() + Duration::days(365);
        let serial = issue(&f.backend, "1A:2B", expires).await;

        let response = f.backend.revoke("1A:2B").await.unwrap();
        assert_eq!(response.status, RevocationStatus::Revoked);
        assert_eq!(response.revocation_time, Some(t0()));

        let summary = f.backend.crl_summary().await.unwrap();
        assert!(summary.contains(&serial));
        assert_eq!(summary.this_update, t0());
        assert_eq!(summary.next_update, Some(t0() + Duration::hours(72)));

        let record = f.backend.list_revoked().await.unwrap().remove(0);
        assert_eq!(record.serial, serial);
        assert_eq!(record.certificate_expiration, expires);

        f.clock.set(expires + Duration::hours(72) + Duration::seconds(1));
        let report = match f.backend.tidy(&TidyParams::default()).await.unwrap() {
            TidyOutcome::Completed(report) => report,
            TidyOutcome::Skipped => panic!("sweep skipped"),
        };
        assert_eq!(report.revoked_deleted, 1);
        assert!(report.crl_rebuilt);
        assert!(f.backend.list_revoked().await.unwrap().is_empty());
        assert!(f.backend.list_certificates().await.unwrap().is_empty());

        let summary = f.backend.crl_summary().await.unwrap();
        assert!(!summary.contains(&serial));
        assert_eq!(summary.this_update, f.clock.now());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let f = fixture();
        issue(&f.backend, "0a:0b", t0() + Duration::days(30)).await;

        f.backend.revoke("0a:0b").await.unwrap();
        let crl_before = f.storage.get(CRL_KEY).await.unwrap();

        f.clock.advance(Duration::hours(1));
        let again = f.backend.revoke("0A-0B").await.unwrap();
        assert_eq!(again.status, RevocationStatus::AlreadyRevoked);
        assert_eq!(again.revocation_time, Some(t0()));
        assert_eq!(f.backend.list_revoked().await.unwrap().len(), 1);
        // No rebuild for a no-op revoke
        assert_eq!(f.storage.get(CRL_KEY).await.unwrap(), crl_before);
    }

    #[tokio::test]
    async fn test_revoke_unknown_serial() {
        let f = fixture();
        let result = f.backend.revoke("de:ad").await;
        assert!(matches!(result, Err(PkiError::NotFound(_))));
        assert!(f.backend.list_revoked().await.unwrap().is_empty());

        let result = f.backend.revoke("xyz").await;
        assert!(matches!(result, Err(PkiError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_revoke_expired_certificate_records_nothing() {
        let f = fixture();
        issue(&f.backend, "07", t0() - Duration::seconds(1)).await;

        let response = f.backend.revoke("07").await.unwrap();
        assert_eq!(response.status, RevocationStatus::AlreadyExpired);
        assert!(response.revocation_time.is_none());
        assert!(f.backend.list_revoked().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ca_serial_is_protected() {
        let storage = Arc::new(InMemoryStorage::new());
        let ca_serial = SerialNumber::parse("01").unwrap();
        let signer = test_signer().with_ca_serial(ca_serial.clone());
        let backend = PkiBackend::with_clock(
            storage,
            Arc::new(signer),
            &BackendConfig::default(),
            Arc::new(ManualClock::new(t0())),
        );
        issue(&backend, "01", t0() + Duration::days(3650)).await;

        let result = backend.revoke("01").await;
        assert!(matches!(result, Err(PkiError::InvalidInput(_))));
        assert!(backend.list_revoked().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_crl_rebuild_keeps_revocation() {
        let storage = Arc::new(FailingStorage::default());
        storage.fail_put_of(CRL_KEY);
        let backend = PkiBackend::with_clock(
            storage.clone(),
            Arc::new(test_signer()),
            &BackendConfig::default(),
            Arc::new(ManualClock::new(t0())),
        );
        let serial = issue(&backend, "33", t0() + Duration::days(10)).await;

        let result = backend.revoke("33").await;
        match result {
            Err(PkiError::CrlStale { serial: stale, source }) => {
                assert_eq!(stale, "33");
                assert!(source.is_storage());
            }
            other => panic!("unexpected result {other:?}"),
        }
        assert!(backend.ledger().revocations.get(&serial).await.unwrap().is_some());
        assert!(matches!(backend.fetch_crl_der().await, Err(PkiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_unconfigured_signer_reports_signing_error() {
        let storage = Arc::new(InMemoryStorage::new());
        let backend = PkiBackend::with_clock(
            storage,
            Arc::new(UnconfiguredSigner),
            &BackendConfig::default(),
            Arc::new(ManualClock::new(t0())),
        );
        assert!(matches!(backend.rotate_crl().await, Err(PkiError::Signing(_))));
    }

    #[tokio::test]
    async fn test_periodic_trigger_respects_interval() {
        let f = fixture();
        let serial = issue(&f.backend, "11", t0() - Duration::days(30)).await;

        let first = f.backend.periodic_func().await.unwrap();
        assert_eq!(first.map(|r| r.certs_deleted), Some(1));
        assert_eq!(f.backend.last_tidy(), Some(t0()));
        assert!(f.backend.ledger().certs.get(&serial).await.unwrap().is_none());

        issue(&f.backend, "12", t0() - Duration::days(30)).await;
        f.clock.advance(Duration::seconds(1));
        assert!(f.backend.periodic_func().await.unwrap().is_none());
        assert_eq!(f.backend.last_tidy(), Some(t0()));
        assert_eq!(f.backend.list_certificates().await.unwrap().len(), 1);

        f.clock.set(t0() + Duration::hours(48) + Duration::seconds(1));
        assert!(f.backend.periodic_func().await.unwrap().is_some());
        assert!(f.backend.list_certificates().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_manual_sweeps_do_work_once() {
        let f = fixture();
        for i in 0..20u8 {
            issue(&f.backend, &format!("{:02x}", i + 1), t0() - Duration::days(30)).await;
        }
        let params = TidyParams {
            pause_duration: std::time::Duration::from_millis(2),
            ..TidyParams::default()
        };

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let backend = f.backend.clone();
            let params = params.clone();
            tasks.push(tokio::spawn(async move { backend.tidy(&params).await.unwrap() }));
        }

        let mut deleted = 0;
        let mut skipped = 0;
        for task in tasks {
            match task.await.unwrap() {
                TidyOutcome::Completed(report) => deleted += report.certs_deleted,
                TidyOutcome::Skipped => skipped += 1,
            }
        }
        assert_eq!(deleted, 20);
        assert!(skipped <= 3);
        assert!(!f.backend.tidy_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_revokes_and_sweep_interleave_safely() {
        let f = fixture();
        for i in 0..10u8 {
            issue(&f.backend, &format!("{:02x}", i + 0x40), t0() + Duration::days(30)).await;
        }

        let mut tasks = Vec::new();
        for i in 0..10u8 {
            let backend = f.backend.clone();
            tasks.push(tokio::spawn(async move {
                backend.revoke(&format!("{:02x}", i + 0x40)).await.map(|_| ())
            }));
        }
        let sweeper = {
            let backend = f.backend.clone();
            tokio::spawn(async move { backend.tidy(&TidyParams::default()).await.map(|_| ()) })
        };
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        sweeper.await.unwrap().unwrap();

        let summary = f.backend.crl_summary().await.unwrap();
        assert_eq!(summary.entries.len(), 10);
        assert_eq!(f.backend.list_revoked().await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_import_then_revoke() {
        let f = fixture();
        let signer = test_signer();
        let not_after = t0() + Duration::days(90);
        let pem_data = issue_certificate(&signer, &[0x0c, 0x0d], "api.example.com", not_after);

        let entry = f.backend.import_certificate(&pem_data, "api").await.unwrap();
        assert_eq!(entry.serial.as_colon_hex(), "0c:0d");

        f.backend.revoke("0c:0d").await.unwrap();
        let record = f.backend.list_revoked().await.unwrap().remove(0);
        assert_eq!(record.certificate_expiration, not_after);
        assert!(record.certificate_pem.is_some());

        let pem_crl = f.backend.fetch_crl_pem().await.unwrap();
        assert!(pem_crl.starts_with("-----BEGIN X509 CRL-----"));
        let summary = CertificateParser::parse_crl_pem(&pem_crl).unwrap();
        assert!(summary.contains(&entry.serial));
    }

    #[tokio::test]
    async fn test_rotate_refreshes_next_update() {
        let f = fixture();
        let first = f.backend.rotate_crl().await.unwrap();
        f.clock.advance(Duration::hours(24));
        let second = f.backend.rotate_crl().await.unwrap();
        assert_eq!(second.next_update - first.next_update, Duration::hours(24));
        assert_eq!(f.backend.fetch_crl_der().await.unwrap(), second.der);
    }

    #[tokio::test]
    async fn test_scheduler_drives_periodic_sweep() {
        let f = fixture();
        issue(&f.backend, "21", t0() - Duration::days(30)).await;

        let handle = spawn_periodic(f.backend.clone(), std::time::Duration::from_millis(10));
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        handle.shutdown().await;

        assert_eq!(f.backend.last_tidy(), Some(t0()));
        assert!(f.backend.list_certificates().await.unwrap().is_empty());
    }
}
