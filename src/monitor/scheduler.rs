use std::{
    sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use tokio::{
    select,
    sync::Mutex,
    task::JoinHandle,
    time::{interval_at, timeout, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use crate::{
    capture::FrameSource,
    classify::Classifier,
    similarity::{compare, SimilarityComparator},
    storage::{
        activity_store::ActivityStore,
        entities::{CheckResult, NewCheck},
    },
};

/// Called after every logged check. Runs on a blocking thread, so it may take its time.
pub type Observer = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Logged(CheckResult),
    NoActiveTask,
    /// The cycle was abandoned. The cause has already been logged.
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForceCheck {
    Completed(CheckOutcome),
    NotRunning,
}

/// One capture, compare, classify, persist cycle. Every cycle runs while holding the comparator
/// lock, which is the only place the previous fingerprint is read or replaced.
pub struct CheckPipeline {
    comparator: Mutex<SimilarityComparator>,
    source: Arc<dyn FrameSource>,
    classifier: Classifier,
    store: Arc<dyn ActivityStore>,
    observer: Option<Observer>,
    capture_timeout: Duration,
}

impl CheckPipeline {
    pub fn new(
        source: Arc<dyn FrameSource>,
        classifier: Classifier,
        store: Arc<dyn ActivityStore>,
        inactivity_threshold: f64,
        capture_timeout: Duration,
    ) -> Self {
        Self {
            comparator: Mutex::new(SimilarityComparator::new(inactivity_threshold)),
            source,
            classifier,
            store,
            observer: None,
            capture_timeout,
        }
    }

    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Runs a full cycle. Never fails; anything that goes wrong is logged and reported as
    /// [CheckOutcome::Failed].
    pub async fn perform_check(&self) -> CheckOutcome {
        let mut comparator = self.comparator.lock().await;

        let span = info_span!("check");
        async {
            match self.run_cycle(&mut comparator).await {
                Ok(Some(result)) => {
                    self.notify();
                    CheckOutcome::Logged(result)
                }
                Ok(None) => CheckOutcome::NoActiveTask,
                Err(e) => {
                    error!("Check failed {e:?}");
                    CheckOutcome::Failed
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run_cycle(&self, comparator: &mut SimilarityComparator) -> Result<Option<CheckResult>> {
        let Some(task) = self.store.get_active_task().await? else {
            debug!("No active task, skipping check");
            return Ok(None);
        };

        let frame = timeout(self.capture_timeout, self.source.capture())
            .await
            .with_context(|| format!("capture timed out after {:?}", self.capture_timeout))?
            .context("failed to capture frame")?;

        let previous = comparator.previous().cloned();
        let hashed = frame.clone();
        let (fingerprint, similarity) =
            tokio::task::spawn_blocking(move || compare(previous.as_ref(), &hashed))
                .await
                .context("fingerprint task panicked")??;
        let comparison = comparator.accept(fingerprint, similarity);
        debug!("Similarity {:.3}, idle {}", comparison.similarity, comparison.is_idle);

        let verdict = self
            .classifier
            .classify(
                &frame,
                &task.description,
                comparison.is_idle,
                comparison.similarity,
            )
            .await;

        let result = self
            .store
            .log_check(NewCheck {
                task_id: Some(task.id),
                on_task: verdict.on_task,
                is_idle: comparison.is_idle,
                rationale: verdict.rationale,
                confidence: verdict.confidence,
            })
            .await?;

        info!(
            "Logged check {} for '{}': {:?} ({:.2})",
            result.id,
            task.description,
            result.category(),
            result.confidence
        );
        Ok(Some(result))
    }

    fn notify(&self) {
        if let Some(observer) = self.observer.clone() {
            tokio::task::spawn_blocking(move || observer());
        }
    }
}

struct Schedule {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Runs [CheckPipeline::perform_check] on a fixed interval until stopped.
pub struct MonitorScheduler {
    pipeline: Arc<CheckPipeline>,
    interval: Duration,
    schedule: StdMutex<Option<Schedule>>,
}

impl MonitorScheduler {
    pub fn new(pipeline: Arc<CheckPipeline>, interval: Duration) -> Self {
        Self {
            pipeline,
            interval,
            schedule: StdMutex::new(None),
        }
    }

    fn lock_schedule(&self) -> MutexGuard<'_, Option<Schedule>> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_running(&self) -> bool {
        self.lock_schedule().is_some()
    }

    /// Starts the schedule and runs one check straight away. Returns `false` without doing
    /// anything if already running. Fails, leaving the monitor stopped, when the interval can't
    /// be represented as a deadline.
    pub async fn start(&self) -> Result<bool> {
        {
            let mut schedule = self.lock_schedule();
            if schedule.is_some() {
                debug!("Monitor already running");
                return Ok(false);
            }

            let first_tick = Instant::now()
                .checked_add(self.interval)
                .ok_or_else(|| anyhow!("check interval {:?} is too long", self.interval))?;

            let cancel = CancellationToken::new();
            let handle = tokio::spawn(run_schedule(
                self.pipeline.clone(),
                first_tick,
                self.interval,
                cancel.clone(),
            ));
            *schedule = Some(Schedule { cancel, handle });
        }

        info!("Monitor started, checking every {:?}", self.interval);
        self.pipeline.perform_check().await;
        Ok(true)
    }

    fn cancel_schedule(&self) -> Option<JoinHandle<()>> {
        let schedule = self.lock_schedule().take()?;
        schedule.cancel.cancel();
        info!("Monitor stopped");
        Some(schedule.handle)
    }

    /// Prevents future cycles. A cycle already in progress is left to finish. Returns `false` if
    /// the monitor wasn't running.
    pub fn stop(&self) -> bool {
        self.cancel_schedule().is_some()
    }

    /// Like [MonitorScheduler::stop], but also waits for an in-progress cycle to finish.
    pub async fn stop_and_wait(&self) -> bool {
        let Some(handle) = self.cancel_schedule() else {
            return false;
        };
        if let Err(e) = handle.await {
            error!("Schedule task ended abnormally {e:?}");
        }
        true
    }

    pub async fn force_check(&self) -> ForceCheck {
        if !self.is_running() {
            info!("Monitor is not running, ignoring forced check");
            return ForceCheck::NotRunning;
        }
        ForceCheck::Completed(self.pipeline.perform_check().await)
    }
}

impl Drop for MonitorScheduler {
    fn drop(&mut self) {
        self.cancel_schedule();
    }
}

async fn run_schedule(
    pipeline: Arc<CheckPipeline>,
    first_tick: Instant,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = interval_at(first_tick, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                pipeline.perform_check().await;
            }
        }
    }
    debug!("Schedule loop exited");
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use futures::future::join_all;
    use tempfile::{tempdir, TempDir};
    use tokio::sync::mpsc;

    use crate::{
        capture::{
            test_frames::{blocks, inverted_blocks, solid},
            Frame, FrameSource, MockFrameSource,
        },
        classify::{Classifier, MockClassificationService, ServiceError, IDLE_CONFIDENCE},
        storage::activity_store::{ActivityStore, MockActivityStore, SqliteActivityStore},
        utils::{clock::FixedClock, logging::TEST_LOGGING},
    };

    use super::{CheckOutcome, CheckPipeline, ForceCheck, MonitorScheduler};

    const ON_TASK_REPLY: &str = r#"{"is_on_task": true, "confidence": 0.8, "what_user_is_doing": "Editing a document", "reasoning": "The report is open"}"#;
    const CAPTURE_TIMEOUT: Duration = Duration::from_secs(5);

    fn open_store() -> Result<(TempDir, Arc<SqliteActivityStore>)> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let clock = Arc::new(FixedClock::at(NaiveDate::from_ymd_opt(2018, 7, 4).unwrap()));
        let store = SqliteActivityStore::open(dir.path().join("acuity.db"), clock)?;
        Ok((dir, Arc::new(store)))
    }

    fn steady_source() -> MockFrameSource {
        let mut source = MockFrameSource::new();
        source.expect_capture().returning(|| Ok(solid(20, 40, 60)));
        source
    }

    fn replying_service() -> MockClassificationService {
        let mut service = MockClassificationService::new();
        service
            .expect_submit()
            .returning(|_, _| Ok(ON_TASK_REPLY.to_string()));
        service
    }

    fn pipeline(
        source: impl FrameSource + 'static,
        service: MockClassificationService,
        store: Arc<dyn ActivityStore>,
    ) -> CheckPipeline {
        CheckPipeline::new(
            Arc::new(source),
            Classifier::new(Arc::new(service)),
            store,
            0.95,
            CAPTURE_TIMEOUT,
        )
    }

    #[tokio::test]
    async fn test_end_to_end_check() -> Result<()> {
        let (_dir, store) = open_store()?;
        let task_id = store.create_task("write report").await?;
        let pipeline = pipeline(steady_source(), replying_service(), store.clone());

        let CheckOutcome::Logged(result) = pipeline.perform_check().await else {
            panic!("check should have been logged");
        };
        assert_eq!(result.task_id, Some(task_id));
        assert!(result.on_task);
        assert!(!result.is_idle);
        assert_eq!(result.confidence, 0.8);
        assert_eq!(result.rationale, "Editing a document. The report is open");

        let summary = store.get_today_summary().await?;
        assert_eq!(summary.total_checks, 1);
        assert_eq!(summary.on_task_count, 1);
        assert_eq!(summary.on_task_percentage, 100.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_unchanged_screen_skips_service() -> Result<()> {
        let (_dir, store) = open_store()?;
        store.create_task("write report").await?;

        let mut service = MockClassificationService::new();
        service
            .expect_submit()
            .times(1)
            .returning(|_, _| Ok(ON_TASK_REPLY.to_string()));
        let pipeline = pipeline(steady_source(), service, store.clone());

        pipeline.perform_check().await;
        let CheckOutcome::Logged(second) = pipeline.perform_check().await else {
            panic!("check should have been logged");
        };
        assert!(second.is_idle);
        assert!(!second.on_task);
        assert_eq!(second.confidence, IDLE_CONFIDENCE);

        let summary = store.get_today_summary().await?;
        assert_eq!(summary.on_task_count, 1);
        assert_eq!(summary.idle_count, 1);
        assert_eq!(summary.on_task_percentage, 50.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_changed_screen_is_classified_again() -> Result<()> {
        let (_dir, store) = open_store()?;
        store.create_task("write report").await?;

        let mut frames = vec![blocks(), inverted_blocks()].into_iter();
        let mut source = MockFrameSource::new();
        source
            .expect_capture()
            .times(2)
            .returning(move || frames.next().ok_or_else(|| anyhow!("out of frames")));
        let mut service = MockClassificationService::new();
        service
            .expect_submit()
            .times(2)
            .returning(|_, _| Ok(ON_TASK_REPLY.to_string()));
        let pipeline = pipeline(source, service, store.clone());

        pipeline.perform_check().await;
        let CheckOutcome::Logged(second) = pipeline.perform_check().await else {
            panic!("check should have been logged");
        };
        assert!(!second.is_idle);
        assert!(second.on_task);

        let summary = store.get_today_summary().await?;
        assert_eq!(summary.on_task_count, 2);
        assert_eq!(summary.idle_count, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_fresh_pipeline_has_no_baseline() -> Result<()> {
        let (_dir, store) = open_store()?;
        store.create_task("write report").await?;

        let first = pipeline(steady_source(), replying_service(), store.clone());
        first.perform_check().await;

        let second = pipeline(steady_source(), replying_service(), store.clone());
        let CheckOutcome::Logged(result) = second.perform_check().await else {
            panic!("check should have been logged");
        };
        assert!(!result.is_idle);
        assert_eq!(store.get_today_summary().await?.on_task_count, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_no_active_task_writes_nothing() -> Result<()> {
        let (_dir, store) = open_store()?;
        let mut source = MockFrameSource::new();
        source.expect_capture().never();
        let mut service = MockClassificationService::new();
        service.expect_submit().never();
        let pipeline = pipeline(source, service, store.clone());

        assert_eq!(pipeline.perform_check().await, CheckOutcome::NoActiveTask);
        assert!(store.get_recent_checks(10).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_capture_failure_writes_nothing() -> Result<()> {
        let (_dir, store) = open_store()?;
        store.create_task("write report").await?;
        let mut source = MockFrameSource::new();
        source
            .expect_capture()
            .returning(|| Err(anyhow!("display unavailable")));
        let mut service = MockClassificationService::new();
        service.expect_submit().never();
        let pipeline = pipeline(source, service, store.clone());

        assert_eq!(pipeline.perform_check().await, CheckOutcome::Failed);
        assert!(store.get_recent_checks(10).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_service_error_is_still_logged() -> Result<()> {
        let (_dir, store) = open_store()?;
        store.create_task("write report").await?;
        let mut service = MockClassificationService::new();
        service
            .expect_submit()
            .returning(|_, _| Err(ServiceError::Auth("invalid x-api-key".into())));
        let pipeline = pipeline(steady_source(), service, store.clone());

        let CheckOutcome::Logged(result) = pipeline.perform_check().await else {
            panic!("check should have been logged");
        };
        assert!(!result.on_task);
        assert_eq!(result.confidence, 0.0);
        assert!(result.rationale.contains("auth"));
        assert_eq!(store.get_today_summary().await?.off_task_count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_storage_failure_keeps_scheduler_alive() -> Result<()> {
        *TEST_LOGGING;
        let mut store = MockActivityStore::new();
        store
            .expect_get_active_task()
            .returning(|| Err(anyhow!("disk I/O error")));
        let mut service = MockClassificationService::new();
        service.expect_submit().never();
        let pipeline = Arc::new(pipeline(steady_source(), service, Arc::new(store)));
        let scheduler = MonitorScheduler::new(pipeline, Duration::from_secs(3600));

        assert!(scheduler.start().await?);
        assert!(scheduler.is_running());
        assert_eq!(
            scheduler.force_check().await,
            ForceCheck::Completed(CheckOutcome::Failed)
        );
        assert!(scheduler.is_running());
        scheduler.stop();
        Ok(())
    }

    #[tokio::test]
    async fn test_force_check_while_stopped() -> Result<()> {
        let (_dir, store) = open_store()?;
        store.create_task("write report").await?;
        let mut source = MockFrameSource::new();
        source.expect_capture().never();
        let pipeline = Arc::new(pipeline(source, replying_service(), store.clone()));
        let scheduler = MonitorScheduler::new(pipeline, Duration::from_secs(3600));

        assert_eq!(scheduler.force_check().await, ForceCheck::NotRunning);
        assert!(store.get_recent_checks(10).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_unrepresentable_interval_does_not_start() -> Result<()> {
        let (_dir, store) = open_store()?;
        store.create_task("write report").await?;
        let mut source = MockFrameSource::new();
        source.expect_capture().never();
        let pipeline = Arc::new(pipeline(source, replying_service(), store.clone()));
        let scheduler = MonitorScheduler::new(pipeline, Duration::from_secs(u64::MAX));

        assert!(scheduler.start().await.is_err());
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.force_check().await, ForceCheck::NotRunning);
        assert!(store.get_recent_checks(10).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() -> Result<()> {
        let (_dir, store) = open_store()?;
        store.create_task("write report").await?;
        let mut source = MockFrameSource::new();
        source
            .expect_capture()
            .times(2)
            .returning(|| Ok(solid(20, 40, 60)));
        let pipeline = Arc::new(pipeline(source, replying_service(), store.clone()));
        let scheduler = MonitorScheduler::new(pipeline, Duration::from_secs(3600));

        assert!(scheduler.start().await?);
        assert!(!scheduler.start().await?);
        assert_eq!(store.get_recent_checks(10).await?.len(), 1);

        assert!(matches!(
            scheduler.force_check().await,
            ForceCheck::Completed(CheckOutcome::Logged(_))
        ));
        assert_eq!(store.get_recent_checks(10).await?.len(), 2);

        assert!(scheduler.stop());
        assert!(!scheduler.stop());
        assert!(!scheduler.is_running());
        assert_eq!(scheduler.force_check().await, ForceCheck::NotRunning);
        Ok(())
    }

    #[tokio::test]
    async fn test_schedule_keeps_ticking_until_stopped() -> Result<()> {
        let (_dir, store) = open_store()?;
        store.create_task("write report").await?;
        let pipeline = Arc::new(pipeline(steady_source(), replying_service(), store.clone()));
        let scheduler = MonitorScheduler::new(pipeline, Duration::from_millis(50));

        scheduler.start().await?;
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(scheduler.stop_and_wait().await);

        let stopped_at = store.get_recent_checks(100).await?.len();
        assert!(stopped_at >= 3, "expected at least 3 checks, got {stopped_at}");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.get_recent_checks(100).await?.len(), stopped_at);
        Ok(())
    }

    #[tokio::test]
    async fn test_observer_is_notified() -> Result<()> {
        let (_dir, store) = open_store()?;
        store.create_task("write report").await?;
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let pipeline = pipeline(steady_source(), replying_service(), store.clone())
            .with_observer(Arc::new(move || {
                let _ = sender.send(());
            }));

        pipeline.perform_check().await;
        tokio::time::timeout(Duration::from_secs(5), receiver.recv())
            .await?
            .ok_or_else(|| anyhow!("observer channel closed"))?;
        Ok(())
    }

    /// Frame source that records how many captures overlap.
    struct ContendedSource {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl FrameSource for ContendedSource {
        async fn capture(&self) -> Result<Frame> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(solid(20, 40, 60))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_checks_never_overlap() -> Result<()> {
        let (_dir, store) = open_store()?;
        store.create_task("write report").await?;
        let source = Arc::new(ContendedSource {
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });
        let pipeline = Arc::new(CheckPipeline::new(
            source.clone(),
            Classifier::new(Arc::new(replying_service())),
            store.clone(),
            0.95,
            CAPTURE_TIMEOUT,
        ));

        let checks = (0..4).map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.perform_check().await })
        });
        for outcome in join_all(checks).await {
            assert!(matches!(outcome?, CheckOutcome::Logged(_)));
        }

        assert_eq!(source.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_recent_checks(10).await?.len(), 4);
        assert_eq!(store.get_today_summary().await?.idle_count, 3);
        Ok(())
    }
}
