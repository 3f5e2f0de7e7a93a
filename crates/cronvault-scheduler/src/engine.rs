//! Dispatch Engine: the loop that reloads running tasks, evaluates every
//! command and fans due ones out to worker tasks.
//! Busy cycles follow each other directly; an idle engine sleeps between polls.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;
use cronvault_core::{CronvaultError, EngineConfig, Result};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::context::ExecutionContext;
use crate::dispatch;
use crate::execution::{DelayMode, Execution};
use crate::store::SchedulerStore;
use crate::tasks::CommandRef;

/// Lifecycle state of the engine. `Paused` is never entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Running,
    Stopped,
    Paused,
}

/// Engine timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Pause between cycles.
    pub idle_interval: Duration,
    /// Admission window of one dispatch cycle.
    pub collect_window: Duration,
    /// Poll interval of `wait()`.
    pub wait_poll: Duration,
    pub delay_mode: DelayMode,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            idle_interval: Duration::from_secs(5),
            collect_window: Duration::from_secs(10),
            wait_poll: Duration::from_secs(15),
            delay_mode: DelayMode::UntilDue,
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Ok(Self {
            idle_interval: Duration::from_secs(config.idle_interval_secs),
            collect_window: Duration::from_secs(config.collect_window_secs),
            wait_poll: Duration::from_secs(config.wait_poll_secs),
            delay_mode: DelayMode::from_value(&config.delay_mode)?,
        })
    }
}

impl SchedulerStore {
    pub fn engine_options(&self) -> EngineOptions {
        *self
            .inner
            .options
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Takes effect on the next `start()` or `run_once()`.
    pub fn set_engine_options(&self, options: EngineOptions) {
        *self
            .inner
            .options
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = options;
    }

    pub fn is_running(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SchedulerState {
        if self.is_running() {
            SchedulerState::Running
        } else {
            SchedulerState::Stopped
        }
    }

    /// Spawn the engine loop on the current tokio runtime.
    pub fn start(&self) -> Result<()> {
        if self.inner.active.swap(true, Ordering::SeqCst) {
            return Err(CronvaultError::AlreadyRunning);
        }
        let options = self.engine_options();
        tracing::info!(
            "⏰ Scheduler started (check every {}s)",
            options.idle_interval.as_secs_f64()
        );
        let store = self.clone();
        tokio::spawn(async move { store.run_loop(options).await });
        Ok(())
    }

    /// Stop starting new cycles. In-flight runs finish on their own.
    pub fn stop(&self) -> Result<()> {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return Err(CronvaultError::NotRunning);
        }
        tracing::info!("⏹️ Scheduler stopped");
        Ok(())
    }

    /// Return once the engine is no longer running.
    pub async fn wait(&self) {
        let poll = self.engine_options().wait_poll;
        while self.is_running() {
            tokio::time::sleep(poll).await;
        }
    }

    /// One reload + evaluate + dispatch cycle. Returns how many runs were
    /// executed, or `NoActiveTasks` when nothing was due.
    pub async fn run_once(&self) -> Result<usize> {
        self.cycle(self.engine_options()).await
    }

    async fn run_loop(self, options: EngineOptions) {
        while self.is_running() {
            let outcome = self.cycle(options).await;
            if !self.settle_cycle(outcome, options).await {
                break;
            }
        }
    }

    /// Act on one cycle's outcome: go straight on after a busy cycle, sleep
    /// the idle interval when nothing was due, halt on anything else. Returns
    /// whether the loop should keep going.
    async fn settle_cycle(&self, outcome: Result<usize>, options: EngineOptions) -> bool {
        match outcome {
            Ok(runs) => {
                tracing::debug!("🔁 Cycle finished, {runs} runs");
                true
            }
            Err(CronvaultError::NoActiveTasks) => {
                tracing::debug!("💤 No active tasks, next poll in {:?}", options.idle_interval);
                tokio::time::sleep(options.idle_interval).await;
                true
            }
            Err(e) => {
                self.inner.active.store(false, Ordering::SeqCst);
                tracing::error!("💥 Scheduler halted: {e}");
                self.reporter().error(e);
                false
            }
        }
    }

    async fn cycle(&self, options: EngineOptions) -> Result<usize> {
        if let Err(e) = self.load_executions().await {
            tracing::debug!("📂 Running tasks not reloaded: {e}");
        }
        if self.check_next_tasks().await == 0 {
            return Err(CronvaultError::NoActiveTasks);
        }
        self.dispatch_cycle(options).await
    }

    /// Evaluate every command; returns how many are due.
    async fn check_next_tasks(&self) -> usize {
        let now = Utc::now();
        let mut due = 0;
        for cref in self.all_refs().await {
            let spec = match self.resolve_spec(&cref.id).await {
                Ok(spec) => spec,
                Err(e) => {
                    tracing::warn!("⚠️ Command {} not evaluated: {e}", cref.id);
                    continue;
                }
            };
            if self
                .with_execution(&cref.id, spec, now, |e| e.need_scheduling_at(now))
                .await
            {
                due += 1;
            }
        }
        due
    }

    /// Feed every ref through a channel to its own worker, admitting refs
    /// for at most one collection window, then wait for every admitted
    /// worker and scheduled run.
    async fn dispatch_cycle(&self, options: EngineOptions) -> Result<usize> {
        let refs = self.all_refs().await;
        let (tx, mut rx) = mpsc::channel::<CommandRef>(refs.len().max(1));
        let producer = tokio::spawn(async move {
            for cref in refs {
                if tx.send(cref).await.is_err() {
                    break;
                }
            }
        });

        let mut workers = JoinSet::new();
        let window = tokio::time::sleep(options.collect_window);
        tokio::pin!(window);
        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(cref) => {
                        let store = self.clone();
                        workers.spawn(async move { store.dispatch_ref(cref, options).await });
                    }
                    None => break,
                },
                _ = &mut window => {
                    tracing::warn!("⌛ Collection window elapsed, remaining commands wait for the next cycle");
                    break;
                }
            }
        }
        drop(rx);
        let _ = producer.await;

        let mut runs: Vec<JoinHandle<()>> = Vec::new();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Some(handle)) => runs.push(handle),
                Ok(None) => {}
                Err(e) => return Err(CronvaultError::Fatal(format!("dispatch worker failed: {e}"))),
            }
        }

        let count = runs.len();
        for handle in runs {
            handle
                .await
                .map_err(|e| CronvaultError::Fatal(format!("scheduled run failed: {e}")))?;
        }
        Ok(count)
    }

    /// Worker: resolve a ref and, when due, claim its execution and spawn
    /// the scheduled run.
    async fn dispatch_ref(self, cref: CommandRef, options: EngineOptions) -> Option<JoinHandle<()>> {
        let spec = match self.resolve_spec(&cref.id).await {
            Ok(spec) => spec,
            Err(e) => {
                self.reporter().error(e);
                return None;
            }
        };
        let now = Utc::now();
        let claimed = self
            .with_execution(&cref.id, spec, now, |e| {
                if e.need_scheduling_at(now) {
                    e.scheduled = true;
                    Some(e.clone())
                } else {
                    None
                }
            })
            .await?;
        Some(tokio::spawn(self.schedule_task(claimed, options)))
    }

    /// One run: persist the claim, sleep until due, execute, record.
    async fn schedule_task(self, exec: Execution, options: EngineOptions) {
        let reporter = self.reporter();
        if let Err(e) = self.save_executions().await {
            reporter.error(e);
        }

        let delay = if self.is_sync().await {
            Duration::ZERO
        } else {
            exec.delay_until_due(Utc::now(), options.delay_mode)
        };
        if !delay.is_zero() {
            tracing::debug!("⏳ {} starts in {:?}", exec.id, delay);
            tokio::time::sleep(delay).await;
        }

        let started = Utc::now();
        tracing::info!("🔔 Command triggered: '{}' ({})", exec.command.payload.label(), exec.id);
        let ctx = ExecutionContext::new(
            exec.id.clone(),
            Arc::new(self.catalog_snapshot().await),
            exec.command.clone(),
            exec.times + 1,
            exec.context.clone(),
            reporter.clone(),
        );
        let context = dispatch::execute(ctx, &reporter).await;
        self.finish_run(&exec.id, context, started, Utc::now()).await;

        if let Err(e) = self.save_executions().await {
            reporter.error(e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Encoding;

    #[test]
    fn test_options_from_config() {
        let options = EngineOptions::from_config(&EngineConfig::default()).unwrap();
        assert_eq!(options, EngineOptions::default());

        let config = EngineConfig {
            idle_interval_secs: 1,
            delay_mode: "immediate".into(),
            ..EngineConfig::default()
        };
        let options = EngineOptions::from_config(&config).unwrap();
        assert_eq!(options.idle_interval, Duration::from_secs(1));
        assert_eq!(options.delay_mode, DelayMode::Immediate);

        let bad = EngineConfig {
            delay_mode: "tomorrow".into(),
            ..EngineConfig::default()
        };
        assert!(EngineOptions::from_config(&bad).is_err());
    }

    #[tokio::test]
    async fn test_fatal_outcome_halts_and_reports_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = SchedulerStore::create_empty(&dir.path().join("config.json"), Encoding::Json, false)
            .await
            .unwrap();
        let options = EngineOptions {
            idle_interval: Duration::from_millis(20),
            ..EngineOptions::default()
        };
        store.set_engine_options(options);
        let mut errors = store.take_errors().unwrap();
        store.start().unwrap();

        let fatal = Err(CronvaultError::Fatal("dispatch worker failed".into()));
        assert!(!store.settle_cycle(fatal, options).await);
        assert!(!store.is_running());
        assert_eq!(store.state(), SchedulerState::Stopped);

        match errors.recv().await.unwrap() {
            CronvaultError::Fatal(message) => assert_eq!(message, "dispatch worker failed"),
            other => panic!("unexpected error: {other}"),
        }
        // The loop notices the halt after its idle sleep and exits quietly.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(errors.try_recv().is_err());
        assert!(store.stop().is_err());
    }

    #[tokio::test]
    async fn test_idle_and_busy_outcomes_keep_going() {
        let dir = tempfile::tempdir().unwrap();
        let store = SchedulerStore::create_empty(&dir.path().join("config.json"), Encoding::Json, false)
            .await
            .unwrap();
        let options = EngineOptions {
            idle_interval: Duration::from_millis(50),
            ..EngineOptions::default()
        };

        let started = std::time::Instant::now();
        assert!(store.settle_cycle(Ok(3), options).await);
        assert!(started.elapsed() < Duration::from_millis(50));

        assert!(store.settle_cycle(Err(CronvaultError::NoActiveTasks), options).await);
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
