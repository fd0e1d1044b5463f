//! Drives each detector on its own fixed interval.
//!
//! Every detector gets a dedicated task. A pass opens a fresh session, runs, and
//! drops the session before the loop waits again, so nothing outlives a pass.
//! Ticks that fall due while a pass is still running are skipped, never queued,
//! which keeps passes of one detector strictly sequential. Failures are logged and
//! the loop carries on; only the shutdown token ends it.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::clock::Clock;
use crate::config::AlertConfig;
use crate::db::Datastore;
use crate::detectors::{
    AnomalyDetector, DeadlineNotifier, Detector, IdleDetector, PassContext, PassReport,
};
use crate::error::StoreError;

pub struct AlertScheduler {
    store: Arc<dyn Datastore>,
    clock: Arc<dyn Clock>,
    detectors: Vec<Arc<dyn Detector>>,
    shutdown: CancellationToken,
}

impl AlertScheduler {
    pub fn new(store: Arc<dyn Datastore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            detectors: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Scheduler with the idle, deadline and anomaly detectors registered.
    pub fn with_default_detectors(
        store: Arc<dyn Datastore>,
        clock: Arc<dyn Clock>,
        config: &AlertConfig,
    ) -> Self {
        Self::new(store, clock)
            .with_detector(Arc::new(IdleDetector::new(config.idle.clone())))
            .with_detector(Arc::new(DeadlineNotifier::new(config.deadline.clone())))
            .with_detector(Arc::new(AnomalyDetector::new(config.anomaly.clone())))
    }

    #[must_use]
    pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detectors.push(detector);
        self
    }

    /// Starts one task per detector on the current runtime.
    pub fn spawn(self) -> SchedulerHandle {
        let tasks = self
            .detectors
            .into_iter()
            .map(|detector| {
                let store = Arc::clone(&self.store);
                let clock = Arc::clone(&self.clock);
                let shutdown = self.shutdown.clone();
                tokio::spawn(detector_loop(store, clock, detector, shutdown))
            })
            .collect();

        SchedulerHandle {
            tasks,
            shutdown: self.shutdown,
        }
    }
}

pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

impl SchedulerHandle {
    /// Stops every loop after its current pass and waits for them.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "detector task ended abnormally");
            }
        }
    }
}

/// One pass with its own session. The session is dropped on every path out.
pub async fn run_pass(
    store: &dyn Datastore,
    clock: &dyn Clock,
    detector: &dyn Detector,
) -> Result<PassReport, StoreError> {
    let mut session = store.open_session().await?;
    let ctx = PassContext::from_clock(clock);
    detector.run_pass(session.as_mut(), ctx).await
}

async fn detector_loop(
    store: Arc<dyn Datastore>,
    clock: Arc<dyn Clock>,
    detector: Arc<dyn Detector>,
    shutdown: CancellationToken,
) {
    let name = detector.name();
    let mut ticker = interval(detector.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(detector = name, interval_secs = detector.interval().as_secs(), "detector started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match run_pass(store.as_ref(), clock.as_ref(), detector.as_ref()).await {
            Ok(report) => info!(
                detector = name,
                examined = report.examined,
                flagged = report.flagged,
                notifications = report.notifications,
                suppressed = report.suppressed,
                skipped = report.skipped,
                "pass complete"
            ),
            Err(e) => error!(detector = name, error = %e, "pass failed"),
        }
    }

    info!(detector = name, "detector stopped");
}
