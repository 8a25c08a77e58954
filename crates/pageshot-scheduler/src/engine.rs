//! Task scheduler engine — the tick loop that turns due cron slots into
//! capture fires.
//!
//! Due tasks enter a FIFO queue; fires are spawned while the concurrency
//! budget allows and retried with a fixed delay up to the configured
//! attempt budget. A fire still running at its next natural slot skips
//! that slot instead of overlapping.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pageshot_core::config::SchedulerConfig;
use pageshot_core::error::{PageshotError, Result};
use pageshot_core::types::CaptureRequest;
use pageshot_capture::cancel::CancelFlag;
use pageshot_capture::executor::CaptureExecutor;
use pageshot_capture::progress::ProgressSink;

use crate::cron;
use crate::notify::{NotificationDispatcher, NotificationEvent};
use crate::store::TaskStore;
use crate::tasks::{NotificationSettings, ScheduledTask, TaskStatus};

/// Cheaply-cloneable handle to the scheduler. All clones share one
/// registry and one fire budget.
#[derive(Clone)]
pub struct TaskScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    executor: Arc<CaptureExecutor>,
    dispatcher: NotificationDispatcher,
    store: TaskStore,
    state: tokio::sync::Mutex<SchedState>,
}

#[derive(Default)]
struct SchedState {
    tasks: HashMap<String, ScheduledTask>,
    /// Due tasks waiting for a free fire slot, oldest first.
    queue: VecDeque<String>,
    /// Tasks with a fire currently executing.
    running: HashSet<String>,
    active_fires: usize,
}

impl TaskScheduler {
    /// Create a scheduler, reloading persisted task definitions.
    pub fn new(
        config: SchedulerConfig,
        executor: Arc<CaptureExecutor>,
        dispatcher: NotificationDispatcher,
        store: TaskStore,
    ) -> Self {
        let now = Utc::now();
        let mut tasks = HashMap::new();
        for mut task in store.load() {
            // Stale or missing slots get recomputed on load.
            if task.next_run.map_or(true, |next| next < now) {
                task.next_run = cron::next_fire_time(&task.schedule, now);
            }
            tasks.insert(task.id.clone(), task);
        }
        if !tasks.is_empty() {
            tracing::info!("📅 Loaded {} scheduled task(s)", tasks.len());
        }
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                executor,
                dispatcher,
                store,
                state: tokio::sync::Mutex::new(SchedState {
                    tasks,
                    ..Default::default()
                }),
            }),
        }
    }

    /// Register a new recurring task. The expression is validated and the
    /// first fire time computed up front.
    pub async fn schedule_task(
        &self,
        request: CaptureRequest,
        schedule: &str,
        notifications: NotificationSettings,
    ) -> Result<ScheduledTask> {
        request.validate()?;
        if !cron::validate(schedule) {
            return Err(PageshotError::InvalidSchedule(schedule.to_string()));
        }
        let mut task = ScheduledTask::new(request, schedule, notifications);
        task.next_run = cron::next_fire_time(schedule, Utc::now())
            .ok_or_else(|| PageshotError::InvalidSchedule(schedule.to_string()))?
            .into();

        let mut state = self.inner.state.lock().await;
        state.tasks.insert(task.id.clone(), task.clone());
        self.inner.save_locked(&state);
        tracing::info!("📅 Scheduled task {} ({} @ {})", task.id, task.request.url, schedule);
        Ok(task)
    }

    /// Suspend firing. A paused task keeps its definition and history.
    /// Returns false for an unknown id.
    pub async fn pause_task(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock().await;
        let Some(task) = state.tasks.get_mut(id) else {
            return false;
        };
        task.status = TaskStatus::Paused;
        task.updated_at = Utc::now();
        self.inner.save_locked(&state);
        true
    }

    /// Resume firing from the next natural slot. Returns false for an
    /// unknown id.
    pub async fn resume_task(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock().await;
        let Some(task) = state.tasks.get_mut(id) else {
            return false;
        };
        task.status = TaskStatus::Active;
        task.next_run = cron::next_fire_time(&task.schedule, Utc::now());
        task.updated_at = Utc::now();
        self.inner.save_locked(&state);
        true
    }

    /// Remove a task. Returns false for an unknown id. A fire already in
    /// flight finishes, but its bookkeeping is discarded.
    pub async fn delete_task(&self, id: &str) -> bool {
        let mut state = self.inner.state.lock().await;
        let removed = state.tasks.remove(id).is_some();
        if removed {
            state.queue.retain(|queued| queued != id);
            self.inner.save_locked(&state);
            tracing::info!("🗑️ Deleted task {id}");
        }
        removed
    }

    pub async fn get_task(&self, id: &str) -> Option<ScheduledTask> {
        self.inner.state.lock().await.tasks.get(id).cloned()
    }

    pub async fn list_tasks(&self) -> Vec<ScheduledTask> {
        let state = self.inner.state.lock().await;
        let mut tasks: Vec<ScheduledTask> = state.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    /// Fires currently executing.
    pub async fn active_fires(&self) -> usize {
        self.inner.state.lock().await.active_fires
    }

    /// Due tasks waiting for a free slot.
    pub async fn pending_fires(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    /// One scheduler pass: queue every due task and spawn fires while the
    /// concurrency budget allows.
    pub async fn tick(&self) {
        let now = Utc::now();
        let mut state = self.inner.state.lock().await;
        let due: Vec<String> = state
            .tasks
            .values()
            .filter(|t| t.is_due(now))
            .map(|t| t.id.clone())
            .collect();

        let mut dirty = false;
        for id in due {
            if state.running.contains(&id) {
                // Previous fire still going; this slot is skipped, not queued.
                if let Some(task) = state.tasks.get_mut(&id) {
                    tracing::warn!("⚠️ task {id} still running, skipping slot");
                    task.next_run = cron::next_fire_time(&task.schedule, now);
                    dirty = true;
                }
                continue;
            }
            if !state.queue.contains(&id) {
                state.queue.push_back(id);
            }
        }
        if dirty {
            self.inner.save_locked(&state);
        }
        SchedulerInner::spawn_fires(&self.inner, &mut state);
    }

    /// Drive ticks forever at the configured check interval.
    pub async fn run_loop(self) {
        let period = Duration::from_secs(self.inner.config.check_interval_secs.max(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tracing::info!("📅 Scheduler running (check interval {period:?})");
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    #[cfg(test)]
    async fn force_due(&self, id: &str) {
        let mut state = self.inner.state.lock().await;
        if let Some(task) = state.tasks.get_mut(id) {
            task.next_run = Some(Utc::now() - chrono::Duration::seconds(1));
        }
    }
}

impl SchedulerInner {
    fn save_locked(&self, state: &SchedState) {
        let mut tasks: Vec<ScheduledTask> = state.tasks.values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        if let Err(e) = self.store.save(&tasks) {
            tracing::warn!("⚠️ Failed to persist tasks: {e}");
        }
    }

    /// Pop queued tasks into fire slots. Caller holds the state lock.
    fn spawn_fires(inner: &Arc<Self>, state: &mut SchedState) {
        while state.active_fires < inner.config.max_concurrent.max(1) {
            let Some(id) = state.queue.pop_front() else {
                break;
            };
            // Deleted or paused while waiting in the queue.
            match state.tasks.get(&id) {
                Some(task) if task.status != TaskStatus::Paused => {}
                _ => continue,
            }
            state.running.insert(id.clone());
            state.active_fires += 1;
            let inner = inner.clone();
            tokio::spawn(async move {
                inner.run_fire(&id).await;
            });
        }
    }

    /// Execute one fire: run the capture with retries, notify, update the
    /// task's bookkeeping, and release the slot.
    async fn run_fire(self: &Arc<Self>, id: &str) {
        let snapshot = self.state.lock().await.tasks.get(id).cloned();
        let Some(task) = snapshot else {
            // Deleted between queueing and spawning.
            let mut state = self.state.lock().await;
            state.running.remove(id);
            state.active_fires -= 1;
            return;
        };

        let attempts = self.config.retry_attempts.max(1);
        let retry_delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut outcome: Result<usize> = Err(PageshotError::Cancelled);

        for attempt in 1..=attempts {
            tracing::info!("▶️ Firing task {id} ({}) attempt {attempt}/{attempts}", task.request.url);
            match self
                .executor
                .run(&task.request, &CancelFlag::never(), &ProgressSink::Silent)
                .await
            {
                Ok(results) => {
                    tracing::info!("✅ Task {id} captured {} section(s)", results.len());
                    outcome = Ok(results.len());
                    break;
                }
                Err(e) => {
                    tracing::warn!("❌ Task {id} attempt {attempt}/{attempts} failed: {e}");
                    if !task.notifications.is_empty() {
                        let event = NotificationEvent::error(&task, &e.to_string());
                        self.dispatcher.dispatch(&task.notifications, &event).await;
                    }
                    outcome = Err(e);
                    if attempt < attempts {
                        tokio::time::sleep(retry_delay).await;
                    }
                }
            }
        }

        if let Ok(sections) = &outcome {
            if !task.notifications.is_empty() {
                let event = NotificationEvent::success(
                    &task,
                    serde_json::json!({ "sections": sections }),
                );
                self.dispatcher.dispatch(&task.notifications, &event).await;
            }
        }

        let now = Utc::now();
        let mut state = self.state.lock().await;
        state.running.remove(id);
        state.active_fires -= 1;
        if let Some(task) = state.tasks.get_mut(id) {
            task.last_run = Some(now);
            task.run_count += 1;
            task.updated_at = now;
            // Retries never shift the cadence; the next slot is the natural one.
            task.next_run = cron::next_fire_time(&task.schedule, now);
            if task.status != TaskStatus::Paused {
                task.status = if outcome.is_ok() {
                    TaskStatus::Active
                } else {
                    TaskStatus::Error
                };
            }
            self.save_locked(&state);
        }
        // A slot just freed up; pull the next queued fire if any.
        Self::spawn_fires(self, &mut state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pageshot_core::config::{RendererConfig, SmtpConfig};
    use pageshot_core::render::{RenderEngine, RenderSession};
    use pageshot_core::types::{Authentication, Viewport};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StubEngine {
        opens: Arc<AtomicU32>,
        fail: bool,
        navigate_delay: Duration,
    }

    impl StubEngine {
        fn ok() -> Self {
            Self {
                opens: Arc::new(AtomicU32::new(0)),
                fail: false,
                navigate_delay: Duration::ZERO,
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::ok()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                navigate_delay: delay,
                ..Self::ok()
            }
        }
    }

    #[async_trait]
    impl RenderEngine for StubEngine {
        async fn open(&self, _viewport: &Viewport) -> Result<Box<dyn RenderSession>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PageshotError::Delegate("renderer offline".into()));
            }
            Ok(Box::new(StubSession {
                navigate_delay: self.navigate_delay,
            }))
        }
    }

    struct StubSession {
        navigate_delay: Duration,
    }

    #[async_trait]
    impl RenderSession for StubSession {
        async fn login(&mut self, _auth: &Authentication) -> Result<()> {
            Ok(())
        }
        async fn set_viewport(&mut self, _viewport: &Viewport) -> Result<()> {
            Ok(())
        }
        async fn block_content(&mut self, _ads: bool, _banners: bool) -> Result<()> {
            Ok(())
        }
        async fn navigate(&mut self, _url: &str) -> Result<()> {
            if !self.navigate_delay.is_zero() {
                tokio::time::sleep(self.navigate_delay).await;
            }
            Ok(())
        }
        async fn wait_for_selector(&mut self, _selector: &str) -> Result<()> {
            Ok(())
        }
        async fn click(&mut self, _selector: &str) -> Result<()> {
            Ok(())
        }
        async fn hover(&mut self, _selector: &str) -> Result<()> {
            Ok(())
        }
        async fn content_height(&mut self) -> Result<u32> {
            Ok(800)
        }
        async fn scroll_to(&mut self, _y: u32) -> Result<()> {
            Ok(())
        }
        async fn capture_viewport(&mut self) -> Result<Vec<u8>> {
            Ok(vec![0x89, 0x50, 0x4e, 0x47])
        }
        async fn capture_element(&mut self, _selector: &str) -> Result<Vec<u8>> {
            Ok(vec![0x89, 0x50, 0x4e, 0x47])
        }
        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn scheduler_with(engine: StubEngine, config: SchedulerConfig) -> (TaskScheduler, Arc<AtomicU32>) {
        let opens = engine.opens.clone();
        let executor = Arc::new(CaptureExecutor::new(
            Arc::new(engine),
            RendererConfig::default(),
        ));
        let dir = std::env::temp_dir().join(format!("pageshot-sched-{}", uuid::Uuid::new_v4()));
        let scheduler = TaskScheduler::new(
            config,
            executor,
            NotificationDispatcher::new(SmtpConfig::default()),
            TaskStore::new(&dir),
        );
        (scheduler, opens)
    }

    async fn wait_idle(scheduler: &TaskScheduler) {
        for _ in 0..200 {
            if scheduler.active_fires().await == 0 && scheduler.pending_fires().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("scheduler never drained");
    }

    #[tokio::test]
    async fn test_schedule_computes_next_run() {
        let (scheduler, _) = scheduler_with(StubEngine::ok(), SchedulerConfig::default());
        let task = scheduler
            .schedule_task(
                CaptureRequest::for_url("https://example.com"),
                "*/5 * * * *",
                NotificationSettings::default(),
            )
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Active);
        assert!(task.next_run.unwrap() > Utc::now());
        assert_eq!(scheduler.list_tasks().await.len(), 1);
        assert!(scheduler.get_task(&task.id).await.is_some());
    }

    #[tokio::test]
    async fn test_invalid_expression_is_rejected() {
        let (scheduler, _) = scheduler_with(StubEngine::ok(), SchedulerConfig::default());
        let err = scheduler
            .schedule_task(
                CaptureRequest::for_url("https://example.com"),
                "not-a-cron",
                NotificationSettings::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PageshotError::InvalidSchedule(_)));
        assert!(scheduler.list_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_paused_task_never_fires() {
        let (scheduler, opens) = scheduler_with(StubEngine::ok(), SchedulerConfig::default());
        let task = scheduler
            .schedule_task(
                CaptureRequest::for_url("https://example.com"),
                "* * * * *",
                NotificationSettings::default(),
            )
            .await
            .unwrap();
        assert!(scheduler.pause_task(&task.id).await);
        scheduler.force_due(&task.id).await;

        scheduler.tick().await;
        wait_idle(&scheduler).await;
        assert_eq!(opens.load(Ordering::SeqCst), 0);
        assert_eq!(
            scheduler.get_task(&task.id).await.unwrap().status,
            TaskStatus::Paused
        );
    }

    #[tokio::test]
    async fn test_due_task_fires_and_reschedules() {
        let (scheduler, opens) = scheduler_with(StubEngine::ok(), SchedulerConfig::default());
        let task = scheduler
            .schedule_task(
                CaptureRequest::for_url("https://example.com"),
                "* * * * *",
                NotificationSettings::default(),
            )
            .await
            .unwrap();
        scheduler.force_due(&task.id).await;
        scheduler.tick().await;
        wait_idle(&scheduler).await;

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        let after = scheduler.get_task(&task.id).await.unwrap();
        assert_eq!(after.run_count, 1);
        assert_eq!(after.status, TaskStatus::Active);
        assert!(after.last_run.is_some());
        assert!(after.next_run.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_retry_exhaustion_flags_error_but_keeps_cadence() {
        let config = SchedulerConfig {
            retry_attempts: 3,
            retry_delay_ms: 1,
            ..Default::default()
        };
        let (scheduler, opens) = scheduler_with(StubEngine::failing(), config);
        let task = scheduler
            .schedule_task(
                CaptureRequest::for_url("https://example.com"),
                "0 8 * * *",
                NotificationSettings::default(),
            )
            .await
            .unwrap();
        scheduler.force_due(&task.id).await;
        scheduler.tick().await;
        wait_idle(&scheduler).await;

        assert_eq!(opens.load(Ordering::SeqCst), 3);
        let after = scheduler.get_task(&task.id).await.unwrap();
        assert_eq!(after.status, TaskStatus::Error);
        assert_eq!(after.run_count, 1);
        // Still scheduled for the next natural 08:00 slot.
        assert!(after.next_run.unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn test_concurrency_budget_queues_excess_fires() {
        let config = SchedulerConfig {
            max_concurrent: 1,
            ..Default::default()
        };
        let (scheduler, opens) =
            scheduler_with(StubEngine::slow(Duration::from_millis(100)), config);
        let a = scheduler
            .schedule_task(
                CaptureRequest::for_url("https://a.example.com"),
                "* * * * *",
                NotificationSettings::default(),
            )
            .await
            .unwrap();
        let b = scheduler
            .schedule_task(
                CaptureRequest::for_url("https://b.example.com"),
                "* * * * *",
                NotificationSettings::default(),
            )
            .await
            .unwrap();
        scheduler.force_due(&a.id).await;
        scheduler.force_due(&b.id).await;
        scheduler.tick().await;

        // One slot: one fire runs, the other waits in the queue.
        assert_eq!(scheduler.active_fires().await, 1);
        assert_eq!(scheduler.pending_fires().await, 1);

        wait_idle(&scheduler).await;
        assert_eq!(opens.load(Ordering::SeqCst), 2);
        assert_eq!(scheduler.get_task(&a.id).await.unwrap().run_count, 1);
        assert_eq!(scheduler.get_task(&b.id).await.unwrap().run_count, 1);
    }

    #[tokio::test]
    async fn test_running_task_skips_overlapping_slot() {
        let (scheduler, opens) = scheduler_with(
            StubEngine::slow(Duration::from_millis(100)),
            SchedulerConfig::default(),
        );
        let task = scheduler
            .schedule_task(
                CaptureRequest::for_url("https://example.com"),
                "* * * * *",
                NotificationSettings::default(),
            )
            .await
            .unwrap();
        scheduler.force_due(&task.id).await;
        scheduler.tick().await;
        assert_eq!(scheduler.active_fires().await, 1);

        // Due again while the fire is still in flight: slot is skipped.
        scheduler.force_due(&task.id).await;
        scheduler.tick().await;
        assert_eq!(scheduler.pending_fires().await, 0);

        wait_idle(&scheduler).await;
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.get_task(&task.id).await.unwrap().run_count, 1);
    }

    #[tokio::test]
    async fn test_delete_task() {
        let (scheduler, _) = scheduler_with(StubEngine::ok(), SchedulerConfig::default());
        let task = scheduler
            .schedule_task(
                CaptureRequest::for_url("https://example.com"),
                "* * * * *",
                NotificationSettings::default(),
            )
            .await
            .unwrap();
        assert!(scheduler.delete_task(&task.id).await);
        assert!(!scheduler.delete_task(&task.id).await);
        assert!(scheduler.get_task(&task.id).await.is_none());
    }

    #[tokio::test]
    async fn test_pause_resume_round_trip() {
        let (scheduler, _) = scheduler_with(StubEngine::ok(), SchedulerConfig::default());
        let task = scheduler
            .schedule_task(
                CaptureRequest::for_url("https://example.com"),
                "0 8 * * *",
                NotificationSettings::default(),
            )
            .await
            .unwrap();
        assert!(scheduler.pause_task(&task.id).await);
        assert_eq!(
            scheduler.get_task(&task.id).await.unwrap().status,
            TaskStatus::Paused
        );
        assert!(scheduler.resume_task(&task.id).await);
        let resumed = scheduler.get_task(&task.id).await.unwrap();
        assert_eq!(resumed.status, TaskStatus::Active);
        assert!(resumed.next_run.unwrap() > Utc::now());

        assert!(!scheduler.pause_task("missing").await);
        assert!(!scheduler.resume_task("missing").await);
    }
}
