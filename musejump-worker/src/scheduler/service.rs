//! Worker service.
//!
//! Owns the registry and the two control loops (reconciliation and the
//! poll sweep). Every subject task hangs off the worker's root
//! cancellation token, so shutdown is a single cancel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::config::SchedulerConfig;
use super::metrics::{MetricsSnapshot, SchedulerMetrics};
use super::poll::PollScheduler;
use super::reconciler::{ReconcileReport, Reconciler, log_report};
use super::registry::{SubjectRegistry, SubjectStatus};
use crate::database::repositories::TriggerStore;
use crate::directory::DirectoryProvider;
use crate::playback::PlaybackProvider;
use crate::{Error, Result};

/// Time allowed for control loops to exit during shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct Worker {
    config: SchedulerConfig,
    registry: Arc<SubjectRegistry>,
    poller: Arc<PollScheduler>,
    reconciler: Arc<Reconciler>,
    metrics: Arc<SchedulerMetrics>,
    cancellation_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Worker {
    pub fn new(
        config: SchedulerConfig,
        directory: Arc<dyn DirectoryProvider>,
        playback: Arc<dyn PlaybackProvider>,
        store: Arc<dyn TriggerStore>,
    ) -> Self {
        Self::with_cancellation(config, directory, playback, store, CancellationToken::new())
    }

    /// Create a worker whose root token is `cancellation_token`.
    pub fn with_cancellation(
        config: SchedulerConfig,
        directory: Arc<dyn DirectoryProvider>,
        playback: Arc<dyn PlaybackProvider>,
        store: Arc<dyn TriggerStore>,
        cancellation_token: CancellationToken,
    ) -> Self {
        let metrics = Arc::new(SchedulerMetrics::new());
        let registry = Arc::new(SubjectRegistry::new(cancellation_token.clone()));
        let poller =
            PollScheduler::from_parts(config.clone(), store, playback, Arc::clone(&metrics));
        let reconciler = Arc::new(Reconciler::new(
            directory,
            Arc::clone(&registry),
            config.credential_refresh_concurrency,
            config.call_timeout,
            Arc::clone(&metrics),
        ));

        Self {
            config,
            registry,
            poller,
            reconciler,
            metrics,
            cancellation_token,
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Run the first reconciliation, then spawn the control loops.
    ///
    /// A failing first reconciliation aborts startup.
    pub async fn start(&self) -> Result<ReconcileReport> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::Other("worker already started".into()));
        }

        info!(
            sync_interval = ?self.config.sync_interval,
            idle_interval = ?self.config.idle_interval,
            active_interval = ?self.config.active_interval,
            "Starting worker"
        );

        let report = match self.reconciler.reconcile().await {
            Ok(report) => report,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };
        log_report(&report);

        let started = self.poller.sweep(&self.registry);
        info!(
            subjects = report.total,
            timers = started,
            "Initial reconciliation complete"
        );

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(Arc::clone(&self.reconciler).run(
            self.config.sync_interval,
            self.cancellation_token.clone(),
        )));
        tasks.push(tokio::spawn(Arc::clone(&self.poller).run(
            Arc::clone(&self.registry),
            self.cancellation_token.clone(),
        )));

        Ok(report)
    }

    /// Cancel every loop, timer and pending jump, and empty the registry.
    ///
    /// Jumps that already started firing run to completion.
    pub async fn shutdown(&self) {
        info!("Shutting down worker");
        self.cancellation_token.cancel();
        let cleared = self.registry.clear();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            match tokio::time::timeout(SHUTDOWN_GRACE, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "Control loop ended abnormally"),
                Err(_) => warn!("Control loop did not stop within {:?}", SHUTDOWN_GRACE),
            }
        }

        let metrics = self.metrics.snapshot();
        info!(
            subjects = cleared,
            ticks = metrics.ticks,
            jumps_fired = metrics.jumps_fired,
            "Worker stopped"
        );
    }

    /// Point-in-time status of one subject.
    pub async fn subject_status(&self, id: &str) -> Option<SubjectStatus> {
        let entry = self.registry.get(id)?;
        Some(entry.status().await)
    }

    pub fn registry(&self) -> &Arc<SubjectRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.cancellation_token.is_cancelled()
    }
}
