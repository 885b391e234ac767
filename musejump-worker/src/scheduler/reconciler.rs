//! Directory reconciliation.
//!
//! Periodically brings registry membership in line with the directory:
//! new subjects are registered Idle, vanished ones are removed (canceling
//! their timers), and missing or expired credentials are fetched.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::metrics::SchedulerMetrics;
use super::registry::{SubjectEntry, SubjectRegistry};
use crate::Result;
use crate::directory::{DirectoryProvider, SPOTIFY_PROVIDER};
use crate::domain::{SubjectSnapshot, needs_refresh};
use crate::error::with_timeout;

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub added: usize,
    pub removed: usize,
    pub refreshed: usize,
    pub failed: usize,
    /// Registry size after the pass.
    pub total: usize,
}

enum RefreshResult {
    Refreshed,
    Unchanged,
    Failed,
}

pub struct Reconciler {
    directory: Arc<dyn DirectoryProvider>,
    registry: Arc<SubjectRegistry>,
    concurrency: usize,
    call_timeout: Duration,
    metrics: Arc<SchedulerMetrics>,
}

impl Reconciler {
    pub fn new(
        directory: Arc<dyn DirectoryProvider>,
        registry: Arc<SubjectRegistry>,
        concurrency: usize,
        call_timeout: Duration,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            directory,
            registry,
            concurrency: concurrency.max(1),
            call_timeout,
            metrics,
        }
    }

    /// Run one pass. A directory listing failure aborts the pass and leaves
    /// membership untouched.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let snapshots = match with_timeout(
            "list_subjects",
            self.call_timeout,
            self.directory.list_subjects(),
        )
        .await
        {
            Ok(snapshots) => snapshots,
            Err(e) => {
                self.metrics.record_reconcile_failure();
                return Err(e);
            }
        };

        let change = self
            .registry
            .apply_membership(snapshots.iter().map(|s| s.id.as_str()));
        for id in &change.removed {
            info!(subject_id = %id, "Subject left the directory");
        }
        for id in &change.added {
            info!(subject_id = %id, "Subject joined the directory");
        }

        let mut report = ReconcileReport {
            added: change.added.len(),
            removed: change.removed.len(),
            ..Default::default()
        };

        let by_id: HashMap<&str, Arc<SubjectEntry>> = change
            .entries
            .iter()
            .map(|entry| (entry.id(), Arc::clone(entry)))
            .collect();
        let mut seen = HashSet::new();
        let updates: Vec<(Arc<SubjectEntry>, SubjectSnapshot)> = snapshots
            .into_iter()
            .filter(|snapshot| seen.insert(snapshot.id.clone()))
            .filter_map(|snapshot| {
                let entry = by_id.get(snapshot.id.as_str())?;
                Some((Arc::clone(entry), snapshot))
            })
            .collect();

        let results: Vec<RefreshResult> = stream::iter(updates)
            .map(|(entry, snapshot)| async move { self.sync_subject(&entry, snapshot).await })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for result in results {
            match result {
                RefreshResult::Refreshed => report.refreshed += 1,
                RefreshResult::Unchanged => {}
                RefreshResult::Failed => report.failed += 1,
            }
        }

        report.total = self.registry.len();
        self.metrics.record_reconcile_pass();
        Ok(report)
    }

    /// Copy the snapshot's contact details onto the subject and refresh its
    /// credential when needed.
    ///
    /// Runs after the membership change, so a subject busy with a tick only
    /// delays its own update.
    async fn sync_subject(
        &self,
        entry: &SubjectEntry,
        snapshot: SubjectSnapshot,
    ) -> RefreshResult {
        {
            let mut record = entry.lock().await;
            if entry.is_removed() {
                return RefreshResult::Unchanged;
            }
            record.contact_email = snapshot.contact_email;

            if !snapshot.has_linked_credential {
                if record.credential.take().is_some() {
                    info!(
                        subject_id = entry.id(),
                        "Playback account unlinked, dropping credential"
                    );
                }
                return RefreshResult::Unchanged;
            }
            if !needs_refresh(record.credential.as_ref(), Utc::now()) {
                return RefreshResult::Unchanged;
            }
        }

        self.refresh_credential(entry).await
    }

    /// Fetch a credential without holding the subject's lock, then store it
    /// only if the subject still needs one.
    async fn refresh_credential(&self, entry: &SubjectEntry) -> RefreshResult {
        let subject_id = entry.id();
        let fetched = with_timeout(
            "list_credential",
            self.call_timeout,
            self.directory.list_credential(subject_id, SPOTIFY_PROVIDER),
        )
        .await;

        let credential = match fetched {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                debug!(subject_id, "No playback credential linked");
                return RefreshResult::Unchanged;
            }
            Err(e) => {
                warn!(subject_id, error = %e, "Credential refresh failed");
                return RefreshResult::Failed;
            }
        };

        let mut record = entry.lock().await;
        if entry.is_removed() || !needs_refresh(record.credential.as_ref(), Utc::now()) {
            return RefreshResult::Unchanged;
        }
        debug!(subject_id, expires_at = ?credential.expires_at(), "Credential refreshed");
        record.credential = Some(credential);
        RefreshResult::Refreshed
    }

    /// Reconcile every `period` until `token` is canceled. The first pass
    /// runs one period from now.
    pub async fn run(self: Arc<Self>, period: Duration, token: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    match self.reconcile().await {
                        Ok(report) => log_report(&report),
                        Err(e) => warn!(error = %e, "Reconciliation failed, keeping current subjects"),
                    }
                }
            }
        }
        debug!("Reconciliation loop stopped");
    }
}

pub fn log_report(report: &ReconcileReport) {
    if report.added + report.removed + report.refreshed + report.failed > 0 {
        info!(
            added = report.added,
            removed = report.removed,
            refreshed = report.refreshed,
            failed = report.failed,
            total = report.total,
            "Synced subjects from directory"
        );
    } else {
        debug!(total = report.total, "Directory unchanged");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Credential, SubjectSnapshot, SubjectState};
    use crate::scheduler::testing::FakeDirectory;

    struct Fixture {
        directory: Arc<FakeDirectory>,
        registry: Arc<SubjectRegistry>,
        reconciler: Reconciler,
    }

    fn fixture(concurrency: usize) -> Fixture {
        let directory = Arc::new(FakeDirectory::default());
        let registry = Arc::new(SubjectRegistry::new(CancellationToken::new()));
        let reconciler = Reconciler::new(
            directory.clone(),
            registry.clone(),
            concurrency,
            Duration::from_secs(5),
            Arc::new(SchedulerMetrics::new()),
        );
        Fixture {
            directory,
            registry,
            reconciler,
        }
    }

    fn sorted_ids(registry: &SubjectRegistry) -> Vec<String> {
        let mut ids = registry.ids();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_membership_follows_directory() {
        let f = fixture(4);
        f.directory.set_subjects(&["a", "b", "c"]);
        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.added, 3);
        assert_eq!(report.total, 3);

        let b = f.registry.get("b").unwrap();
        {
            let mut record = b.lock().await;
            record.state = SubjectState::Active;
            record.last_track_id = Some("t1".into());
            record.last_progress_ms = 12_345;
        }
        let a = f.registry.get("a").unwrap();

        f.directory.set_subjects(&["b", "c", "d"]);
        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(sorted_ids(&f.registry), vec!["b", "c", "d"]);
        assert!(a.is_removed());

        let record = f.registry.get("b").unwrap();
        let record = record.lock().await;
        assert_eq!(record.state, SubjectState::Active);
        assert_eq!(record.last_track_id.as_deref(), Some("t1"));
        assert_eq!(record.last_progress_ms, 12_345);
    }

    #[tokio::test]
    async fn test_directory_failure_keeps_membership() {
        let f = fixture(4);
        f.directory.set_subjects(&["a", "b"]);
        f.reconciler.reconcile().await.unwrap();

        f.directory.set_subjects(&[]);
        f.directory.fail_list(true);
        assert!(f.reconciler.reconcile().await.is_err());
        assert_eq!(sorted_ids(&f.registry), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_valid_credential_is_never_replaced() {
        let f = fixture(4);
        f.directory.set_subjects(&["a"]);
        f.directory.set_credential(
            "a",
            Credential::new("first", Some(Utc::now() + chrono::Duration::hours(1))),
        );
        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.refreshed, 1);

        f.directory.set_credential("a", Credential::new("second", None));
        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.refreshed, 0);
        assert_eq!(f.directory.credential_calls(), 1);

        let entry = f.registry.get("a").unwrap();
        let record = entry.lock().await;
        assert_eq!(record.credential.as_ref().unwrap().access_token(), "first");
    }

    #[tokio::test]
    async fn test_expired_credential_is_refreshed() {
        let f = fixture(4);
        f.directory.set_subjects(&["a"]);
        f.directory.set_credential(
            "a",
            Credential::new("old", Some(Utc::now() - chrono::Duration::seconds(1))),
        );
        f.reconciler.reconcile().await.unwrap();

        f.directory.set_credential("a", Credential::new("new", None));
        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.refreshed, 1);

        let entry = f.registry.get("a").unwrap();
        let record = entry.lock().await;
        assert_eq!(record.credential.as_ref().unwrap().access_token(), "new");
    }

    #[tokio::test]
    async fn test_credential_failure_is_isolated() {
        let f = fixture(4);
        f.directory.set_subjects(&["a", "b"]);
        f.directory.set_credential("a", Credential::new("tok-a", None));
        f.directory.set_credential("b", Credential::new("tok-b", None));
        f.directory.fail_credential("a");

        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.total, 2);

        let a = f.registry.get("a").unwrap();
        assert!(a.lock().await.credential.is_none());
        let b = f.registry.get("b").unwrap();
        assert!(b.lock().await.credential.is_some());
    }

    #[tokio::test]
    async fn test_unlinked_subjects_are_not_queried() {
        let f = fixture(4);
        let mut snapshot = SubjectSnapshot::new("a");
        snapshot.has_linked_credential = false;
        snapshot.contact_email = Some("a@example.com".into());
        f.directory.set_snapshots(vec![snapshot]);

        f.reconciler.reconcile().await.unwrap();
        assert_eq!(f.directory.credential_calls(), 0);

        let entry = f.registry.get("a").unwrap();
        assert_eq!(
            entry.lock().await.contact_email.as_deref(),
            Some("a@example.com")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_subject_does_not_hold_up_membership() {
        let f = fixture(4);
        f.directory.set_subjects(&["old", "keep"]);
        f.reconciler.reconcile().await.unwrap();

        let keep = f.registry.get("keep").unwrap();
        let busy = keep.lock().await;

        f.directory.set_subjects(&["keep", "new"]);
        let pass = f.reconciler.reconcile();
        tokio::pin!(pass);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), &mut pass)
                .await
                .is_err()
        );
        assert_eq!(sorted_ids(&f.registry), vec!["keep", "new"]);

        drop(busy);
        let report = pass.await.unwrap();
        assert_eq!(report.added, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(report.total, 2);
    }

    #[tokio::test]
    async fn test_unlinked_subject_drops_credential() {
        let f = fixture(4);
        f.directory.set_subjects(&["a"]);
        f.directory.set_credential("a", Credential::new("tok-a", None));
        f.reconciler.reconcile().await.unwrap();
        let entry = f.registry.get("a").unwrap();
        assert!(entry.lock().await.credential.is_some());

        let mut snapshot = SubjectSnapshot::new("a");
        snapshot.has_linked_credential = false;
        f.directory.set_snapshots(vec![snapshot]);
        f.reconciler.reconcile().await.unwrap();

        assert!(entry.lock().await.credential.is_none());
        assert_eq!(f.directory.credential_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_fan_out_is_bounded() {
        let f = fixture(2);
        let ids: Vec<String> = (0..6).map(|i| format!("u{}", i)).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        f.directory.set_subjects(&refs);
        for id in &ids {
            f.directory.set_credential(id, Credential::new(id.clone(), None));
        }
        f.directory.set_credential_delay(Duration::from_millis(100));

        let report = f.reconciler.reconcile().await.unwrap();
        assert_eq!(report.refreshed, 6);
        assert_eq!(f.directory.max_in_flight(), 2);
    }
}
