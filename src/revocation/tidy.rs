use super::store::RevocationWriteGuard;
use super::Ledger;
use crate::cert::SerialNumber;
use crate::utils::errors::{PkiError, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Grace period past expiry before anything is deleted (72 hours)
pub const DEFAULT_SAFETY_BUFFER_SECS: i64 = 259_200;

/// Default spacing of automatic sweeps (48 hours)
pub const DEFAULT_TIDY_INTERVAL_SECS: i64 = 172_800;

#[derive(Debug, Clone)]
pub struct TidyParams {
    pub tidy_cert_store: bool,
    pub tidy_revoked_certs: bool,
    pub safety_buffer: Duration,
    /// Sleep after each deletion to spread load on the backing store
    pub pause_duration: std::time::Duration,
    /// Log and collect per-entry storage failures instead of aborting
    pub continue_on_error: bool,
}

impl Default for TidyParams {
    fn default() -> Self {
        Self {
            tidy_cert_store: true,
            tidy_revoked_certs: true,
            safety_buffer: Duration::seconds(DEFAULT_SAFETY_BUFFER_SECS),
            pause_duration: std::time::Duration::ZERO,
            continue_on_error: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TidyReport {
    /// Expired certificate-store entries removed
    pub certs_deleted: usize,
    /// Revocation records removed
    pub revoked_deleted: usize,
    pub crl_rebuilt: bool,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum TidyOutcome {
    /// Another sweep held the guard
    Skipped,
    Completed(TidyReport),
}

/// Per-backend sweep bookkeeping, reset on restart
#[derive(Debug)]
pub struct TidyState {
    running: AtomicBool,
    last_run: Mutex<Option<DateTime<Utc>>>,
    tidy_interval: Duration,
}

/// Held while a sweep runs; dropping it lets the next sweep in
pub struct SweepGuard<'a> {
    running: &'a AtomicBool,
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

impl TidyState {
    pub fn new(tidy_interval: Duration) -> Self {
        Self {
            running: AtomicBool::new(false),
            last_run: Mutex::new(None),
            tidy_interval,
        }
    }

    pub fn tidy_interval(&self) -> Duration {
        self.tidy_interval
    }

    /// Claim the single-sweep guard without waiting
    pub fn try_acquire(&self) -> Option<SweepGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SweepGuard {
                running: &self.running,
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        *self.last_run.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_run(&self, at: DateTime<Utc>) {
        *self.last_run.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
    }

    /// Check the interval and, when it has elapsed, stamp `now` as the last run.
    ///
    /// A state that has never swept is always due.
    pub fn claim_periodic_run(&self, now: DateTime<Utc>) -> bool {
        let mut last_run = self.last_run.lock().unwrap_or_else(|e| e.into_inner());
        let due = match *last_run {
            None => true,
            Some(previous) => now - previous > self.tidy_interval,
        };
        if due {
            *last_run = Some(now);
        }
        due
    }
}

/// Run one sweep unless another is already in progress.
///
/// The whole sweep holds the exclusive revocation lock, so no revoke interleaves
/// with the deletion scan. The sweep guard is released on every exit path.
pub async fn tidy(
    ledger: &Ledger,
    state: &TidyState,
    params: &TidyParams,
    now: DateTime<Utc>,
) -> Result<TidyOutcome> {
    let Some(_guard) = state.try_acquire() else {
        tracing::debug!("Tidy already running, skipping");
        return Ok(TidyOutcome::Skipped);
    };

    let result = sweep(ledger, params, now).await;
    state.record_run(now);
    result.map(TidyOutcome::Completed)
}

async fn sweep(ledger: &Ledger, params: &TidyParams, now: DateTime<Utc>) -> Result<TidyReport> {
    let revocations = ledger.revocations.write().await;
    let mut report = TidyReport::default();

    if params.tidy_cert_store {
        tidy_cert_store(ledger, &revocations, params, now, &mut report).await?;
    }
    if params.tidy_revoked_certs {
        tidy_revoked_certs(ledger, &revocations, params, now, &mut report).await?;
    }

    if report.revoked_deleted > 0 {
        ledger.crl.rebuild(revocations.store(), now).await?;
        report.crl_rebuilt = true;
    }

    tracing::info!(
        "Tidy finished: {} certificates and {} revocation records removed, {} errors",
        report.certs_deleted,
        report.revoked_deleted,
        report.errors.len()
    );
    Ok(report)
}

async fn tidy_cert_store(
    ledger: &Ledger,
    revocations: &RevocationWriteGuard<'_>,
    params: &TidyParams,
    now: DateTime<Utc>,
    report: &mut TidyReport,
) -> Result<()> {
    for name in ledger.certs.list_names().await? {
        let serial = match SerialNumber::parse(&name) {
            Ok(serial) => serial,
            Err(e) => {
                tracing::warn!("Removing certificate entry with invalid key '{}': {}", name, e);
                match ledger.certs.delete_name(&name).await {
                    Ok(()) => report.certs_deleted += 1,
                    Err(e) => note_failure(params, report, &name, e)?,
                }
                continue;
            }
        };

        let entry = match ledger.certs.get(&serial).await {
            Ok(Some(entry)) => entry,
            Ok(None) => continue,
            Err(PkiError::Json(e)) => {
                tracing::warn!("Removing unreadable certificate entry {}: {}", serial, e);
                match ledger.certs.delete(&serial).await {
                    Ok(()) => report.certs_deleted += 1,
                    Err(e) => note_failure(params, report, &name, e)?,
                }
                continue;
            }
            Err(e) => {
                note_failure(params, report, &name, e)?;
                continue;
            }
        };

        if now <= entry.expiration + params.safety_buffer {
            continue;
        }

        // Revocation evidence outlives the certificate entry until the revoked scan drops it
        match revocations.get(&serial).await {
            Ok(Some(_)) => {
                tracing::debug!("Keeping certificate {} while it is still on the ledger", serial);
                continue;
            }
            Ok(None) => {}
            Err(PkiError::Json(_)) => continue,
            Err(e) => {
                note_failure(params, report, &name, e)?;
                continue;
            }
        }

        match ledger.certs.delete(&serial).await {
            Ok(()) => {
                tracing::debug!("Removed expired certificate {}", serial);
                report.certs_deleted += 1;
                pause(params).await;
            }
            Err(e) => note_failure(params, report, &name, e)?,
        }
    }
    Ok(())
}

async fn tidy_revoked_certs(
    ledger: &Ledger,
    revocations: &RevocationWriteGuard<'_>,
    params: &TidyParams,
    now: DateTime<Utc>,
    report: &mut TidyReport,
) -> Result<()> {
    for name in revocations.list_names().await? {
        let serial = match SerialNumber::parse(&name) {
            Ok(serial) => serial,
            // Revocation evidence is never discarded just because it cannot be read
            Err(e) => {
                note_failure(params, report, &name, e.into())?;
                continue;
            }
        };

        let record = match revocations.get(&serial).await {
            Ok(Some(record)) => record,
            Ok(None) => continue,
            Err(e) => {
                note_failure(params, report, &name, e)?;
                continue;
            }
        };

        if !record.is_tidy_eligible(now, params.safety_buffer) {
            continue;
        }

        match revocations.delete(&serial).await {
            Ok(()) => {
                tracing::debug!("Removed expired revocation record {}", serial);
                report.revoked_deleted += 1;
            }
            Err(e) => {
                note_failure(params, report, &name, e)?;
                continue;
            }
        }

        if params.tidy_cert_store {
            match ledger.certs.get(&serial).await {
                Ok(Some(_)) => match ledger.certs.delete(&serial).await {
                    Ok(()) => report.certs_deleted += 1,
                    Err(e) => note_failure(params, report, &name, e)?,
                },
                Ok(None) => {}
                Err(e) => note_failure(params, report, &name, e)?,
            }
        }

        pause(params).await;
    }
    Ok(())
}

fn note_failure(params: &TidyParams, report: &mut TidyReport, name: &str, err: PkiError) -> Result<()> {
    if !params.continue_on_error {
        return Err(err);
    }
    tracing::warn!("Tidy could not process '{}': {}", name, err);
    report.errors.push(format!("{name}: {err}"));
    Ok(())
}

async fn pause(params: &TidyParams) {
    if !params.pause_duration.is_zero() {
        tokio::time::sleep(params.pause_duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca::testing::test_signer;
    use crate::cert::CertificateEntry;
    use crate::revocation::store::RevocationRecord;
    use crate::revocation::CRL_KEY;
    use crate::storage::testing::FailingStorage;
    use crate::storage::{InMemoryStorage, Storage};
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn ledger(storage: Arc<dyn Storage>) -> Ledger {
        Ledger::new(storage, Arc::new(test_signer()), Duration::hours(72))
    }

    async fn issue(ledger: &Ledger, serial: &str, expires: DateTime<Utc>) -> SerialNumber {
        let serial = SerialNumber::parse(serial).unwrap();
        ledger
            .certs
            .put(&CertificateEntry::new(serial.clone(), expires, "test"))
            .await
            .unwrap();
        serial
    }

    async fn revoke(ledger: &Ledger, serial: &SerialNumber, revoked: DateTime<Utc>, expires: DateTime<Utc>) {
        ledger
            .revocations
            .write()
            .await
            .put(&RevocationRecord {
                serial: serial.clone(),
                revocation_time: revoked,
                certificate_expiration: expires,
                certificate_pem: None,
            })
            .await
            .unwrap();
    }

    fn completed(outcome: TidyOutcome) -> TidyReport {
        match outcome {
            TidyOutcome::Completed(report) => report,
            TidyOutcome::Skipped => panic!("sweep was skipped"),
        }
    }

    #[tokio::test]
    async fn test_safety_buffer_boundary() {
        let ledger = ledger(Arc::new(InMemoryStorage::new()));
        let state = TidyState::new(Duration::hours(48));
        let params = TidyParams::default();
        let now = at(1_700_000_000);
        let cutoff = now - params.safety_buffer;

        let kept = issue(&ledger, "01", cutoff + Duration::seconds(1)).await;
        let exact = issue(&ledger, "02", cutoff).await;
        let gone = issue(&ledger, "03", cutoff - Duration::seconds(1)).await;
        let kept_revoked = issue(&ledger, "04", cutoff + Duration::seconds(1)).await;
        revoke(&ledger, &kept_revoked, at(1_600_000_000), cutoff + Duration::seconds(1)).await;
        let gone_revoked = issue(&ledger, "05", cutoff - Duration::seconds(1)).await;
        revoke(&ledger, &gone_revoked, at(1_600_000_000), cutoff - Duration::seconds(1)).await;

        let report = completed(tidy(&ledger, &state, &params, now).await.unwrap());

        assert!(ledger.certs.get(&kept).await.unwrap().is_some());
        assert!(ledger.certs.get(&exact).await.unwrap().is_some());
        assert!(ledger.certs.get(&gone).await.unwrap().is_none());
        assert!(ledger.revocations.get(&kept_revoked).await.unwrap().is_some());
        assert!(ledger.revocations.get(&gone_revoked).await.unwrap().is_none());
        assert!(ledger.certs.get(&gone_revoked).await.unwrap().is_none());

        assert_eq!(report.revoked_deleted, 1);
        assert_eq!(report.certs_deleted, 2);
        assert!(report.crl_rebuilt);
        assert!(report.errors.is_empty());
        assert_eq!(state.last_run(), Some(now));
    }

    #[tokio::test]
    async fn test_no_crl_rebuild_without_revoked_deletions() {
        let storage = Arc::new(InMemoryStorage::new());
        let ledger = ledger(storage.clone());
        let state = TidyState::new(Duration::hours(48));
        let now = at(1_700_000_000);
        issue(&ledger, "0a", at(1_000_000_000)).await;

        let report = completed(tidy(&ledger, &state, &TidyParams::default(), now).await.unwrap());
        assert_eq!(report.certs_deleted, 1);
        assert!(!report.crl_rebuilt);
        assert!(storage.get(CRL_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cert_store_keeps_serials_still_revoked() {
        let ledger = ledger(Arc::new(InMemoryStorage::new()));
        let state = TidyState::new(Duration::hours(48));
        let params = TidyParams {
            tidy_revoked_certs: false,
            ..TidyParams::default()
        };
        let expired = at(1_000_000_000);
        let serial = issue(&ledger, "1a:2b", expired).await;
        revoke(&ledger, &serial, at(900_000_000), expired).await;

        let report = completed(tidy(&ledger, &state, &params, at(1_700_000_000)).await.unwrap());
        assert_eq!(report.certs_deleted, 0);
        assert!(ledger.certs.get(&serial).await.unwrap().is_some());
        assert!(ledger.revocations.get(&serial).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_concurrent_sweep_is_skipped() {
        let ledger = ledger(Arc::new(InMemoryStorage::new()));
        let state = TidyState::new(Duration::hours(48));
        let serial = issue(&ledger, "0b", at(1_000_000_000)).await;

        let guard = state.try_acquire().unwrap();
        let outcome = tidy(&ledger, &state, &TidyParams::default(), at(1_700_000_000))
            .await
            .unwrap();
        assert!(matches!(outcome, TidyOutcome::Skipped));
        assert!(ledger.certs.get(&serial).await.unwrap().is_some());
        assert_eq!(state.last_run(), None);
        drop(guard);

        let outcome = tidy(&ledger, &state, &TidyParams::default(), at(1_700_000_000))
            .await
            .unwrap();
        assert_eq!(completed(outcome).certs_deleted, 1);
    }

    #[tokio::test]
    async fn test_storage_failure_is_collected_when_continuing() {
        let storage = Arc::new(FailingStorage::default());
        storage.fail_delete_of("revoked/01");
        let ledger = ledger(storage.clone());
        let state = TidyState::new(Duration::hours(48));
        let expired = at(1_000_000_000);
        for name in ["01", "02"] {
            let serial = issue(&ledger, name, expired).await;
            revoke(&ledger, &serial, at(900_000_000), expired).await;
        }

        let report = completed(
            tidy(&ledger, &state, &TidyParams::default(), at(1_700_000_000))
                .await
                .unwrap(),
        );
        assert_eq!(report.revoked_deleted, 1);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("01:"));
        assert!(storage.inner.get("revoked/01").await.unwrap().is_some());
        assert!(storage.inner.get("revoked/02").await.unwrap().is_none());
        assert!(storage.inner.get("certs/02").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_storage_failure_aborts_and_releases_guard() {
        let storage = Arc::new(FailingStorage::default());
        storage.fail_delete_of("revoked/01");
        let ledger = ledger(storage.clone());
        let state = TidyState::new(Duration::hours(48));
        let expired = at(1_000_000_000);
        let serial = issue(&ledger, "01", expired).await;
        revoke(&ledger, &serial, at(900_000_000), expired).await;

        let params = TidyParams {
            continue_on_error: false,
            ..TidyParams::default()
        };
        let now = at(1_700_000_000);
        let result = tidy(&ledger, &state, &params, now).await;
        assert!(matches!(result, Err(PkiError::Storage(_))));
        assert!(!state.is_running());
        assert_eq!(state.last_run(), Some(now));

        // The revocation lock was released too
        drop(ledger.revocations.write().await);
    }

    #[tokio::test]
    async fn test_unreadable_cert_entries_are_removed() {
        let storage = Arc::new(InMemoryStorage::new());
        let ledger = ledger(storage.clone());
        let state = TidyState::new(Duration::hours(48));
        storage.put("certs/05", b"not json").await.unwrap();
        storage.put("certs/zz", b"{}").await.unwrap();

        let report = completed(
            tidy(&ledger, &state, &TidyParams::default(), at(1_700_000_000))
                .await
                .unwrap(),
        );
        assert_eq!(report.certs_deleted, 2);
        assert!(report.errors.is_empty());
        assert!(ledger.certs.list_names().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_revocations_are_kept_and_reported() {
        let storage = Arc::new(InMemoryStorage::new());
        let ledger = ledger(storage.clone());
        let state = TidyState::new(Duration::hours(48));
        storage.put("revoked/qq", b"{}").await.unwrap();
        storage.put("revoked/06", b"[1, 2]").await.unwrap();

        let report = completed(
            tidy(&ledger, &state, &TidyParams::default(), at(1_700_000_000))
                .await
                .unwrap(),
        );
        assert_eq!(report.revoked_deleted, 0);
        assert_eq!(report.errors.len(), 2);
        assert!(!report.crl_rebuilt);
        assert!(storage.get(CRL_KEY).await.unwrap().is_none());
        assert!(storage.get("revoked/qq").await.unwrap().is_some());
        assert!(storage.get("revoked/06").await.unwrap().is_some());

        let params = TidyParams {
            continue_on_error: false,
            ..TidyParams::default()
        };
        let result = tidy(&ledger, &state, &params, at(1_700_000_000)).await;
        assert!(result.is_err());
        assert!(!state.is_running());
        assert_eq!(ledger.revocations.list_names().await.unwrap().len(), 2);
    }

    #[test]
    fn test_guard_is_exclusive_and_released_on_drop() {
        let state = TidyState::new(Duration::hours(48));
        let guard = state.try_acquire().unwrap();
        assert!(state.is_running());
        assert!(state.try_acquire().is_none());

        drop(guard);
        assert!(!state.is_running());
        assert!(state.try_acquire().is_some());
    }

    #[test]
    fn test_periodic_claim_respects_interval() {
        let state = TidyState::new(Duration::hours(48));
        let t0 = at(1_700_000_000);

        assert!(state.claim_periodic_run(t0));
        assert_eq!(state.last_run(), Some(t0));

        assert!(!state.claim_periodic_run(t0 + Duration::seconds(1)));
        assert_eq!(state.last_run(), Some(t0));

        // Exactly the interval is not enough, it has to be exceeded
        assert!(!state.claim_periodic_run(t0 + Duration::hours(48)));
        assert!(state.claim_periodic_run(t0 + Duration::hours(48) + Duration::seconds(1)));
    }

    #[test]
    fn test_default_params_sweep_everything() {
        let params = TidyParams::default();
        assert!(params.tidy_cert_store);
        assert!(params.tidy_revoked_certs);
        assert!(params.continue_on_error);
        assert_eq!(params.safety_buffer, Duration::hours(72));
    }
}
