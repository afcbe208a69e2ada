use crate::trigger::{parse_timezone, TimeOfDay, TriggerId, TriggerTable};
use crate::types::{DigestError, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Work run on every fire. Errors are logged; the scheduler never retries.
pub type DigestCallback = Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    /// No trigger registered yet.
    Idle,
    /// One trigger registered, timer loop not started.
    Scheduled,
    /// Timer loop engaged.
    Running,
    /// Terminal. A new scheduler is needed to resume.
    Stopped,
}

/// Everything the timer loop and `update` must agree on, behind one mutex.
#[derive(Debug)]
pub struct ScheduleState {
    timezone: Tz,
    time_of_day: TimeOfDay,
    triggers: TriggerTable,
    active: Option<TriggerId>,
    phase: SchedulerPhase,
}

impl ScheduleState {
    fn new(timezone: Tz, time_of_day: TimeOfDay) -> Self {
        Self {
            timezone,
            time_of_day,
            triggers: TriggerTable::new(),
            active: None,
            phase: SchedulerPhase::Idle,
        }
    }

    /// Installs a trigger for the current time and timezone and cancels the
    /// previous one. Callers hold the state lock, so no observer ever sees
    /// zero or two entries.
    fn install_trigger(&mut self) -> TriggerId {
        let id = self.triggers.schedule_daily(self.timezone, self.time_of_day);
        if let Some(previous) = self.active.replace(id) {
            self.triggers.cancel(previous);
        }
        if self.phase == SchedulerPhase::Idle {
            self.phase = SchedulerPhase::Scheduled;
        }
        id
    }

    fn next_fire(&self, now: DateTime<Utc>) -> Option<(TriggerId, DateTime<Utc>)> {
        let id = self.active?;
        let trigger = self.triggers.get(id)?;
        trigger.next_fire_after(now).map(|at| (id, at))
    }
}

/// Owns exactly one daily trigger and runs a callback when it fires.
pub struct DigestScheduler {
    state: Arc<Mutex<ScheduleState>>,
    retime: Arc<Notify>,
    cancel: CancellationToken,
    worker: std::sync::Mutex<Option<JoinHandle<()>>>,
    callback: DigestCallback,
}

impl DigestScheduler {
    /// Resolves the timezone, parses `HH:MM` and registers the trigger.
    ///
    /// Fails without creating anything on an unknown timezone or a malformed
    /// or out-of-range time.
    pub fn new<F, Fut>(timezone: &str, time_of_day: &str, callback: F) -> Result<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let timezone = parse_timezone(timezone)?;
        let time_of_day = TimeOfDay::parse(time_of_day)?;

        let mut state = ScheduleState::new(timezone, time_of_day);
        let id = state.install_trigger();
        info!("Registered daily digest trigger {} at {} {}", id, time_of_day, timezone.name());

        let callback: DigestCallback = Arc::new(move || -> BoxFuture<'static, anyhow::Result<()>> {
            Box::pin(callback())
        });

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
            retime: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
            worker: std::sync::Mutex::new(None),
            callback,
        })
    }

    /// Starts the timer loop. Calling it while running is a no-op; calling it
    /// after [`stop`](Self::stop) fails with `SchedulerStopped`.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match state.phase {
            SchedulerPhase::Running => {
                debug!("Digest scheduler already running");
                return Ok(());
            }
            SchedulerPhase::Stopped => return Err(DigestError::SchedulerStopped),
            SchedulerPhase::Idle | SchedulerPhase::Scheduled => {}
        }
        state.phase = SchedulerPhase::Running;

        let handle = tokio::spawn(run_timer_loop(
            self.state.clone(),
            self.retime.clone(),
            self.cancel.clone(),
            self.callback.clone(),
        ));
        *self.worker.lock().map_err(|_| poisoned())? = Some(handle);

        info!("Digest scheduler started: {} {}", state.time_of_day, state.timezone.name());
        Ok(())
    }

    /// Deregisters the trigger and waits for the timer loop to exit,
    /// including any digest callback already in flight. No callback starts
    /// after this returns. Idempotent.
    ///
    /// Must not be awaited from inside the digest callback.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().await;
            if state.phase != SchedulerPhase::Stopped {
                if let Some(id) = state.active.take() {
                    state.triggers.cancel(id);
                }
                state.phase = SchedulerPhase::Stopped;
                self.cancel.cancel();
                info!("Digest scheduler stopping");
            }
        }

        let handle = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(_) => None,
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Digest timer loop ended abnormally: {}", e);
            }
            info!("Digest scheduler stopped");
        }
    }

    /// Replaces the daily time. On a parse failure the current trigger stays
    /// active and the error is returned.
    pub async fn update(&self, time_of_day: &str) -> Result<()> {
        let time_of_day = TimeOfDay::parse(time_of_day)?;
        self.retime_with(|state| state.time_of_day = time_of_day).await
    }

    /// Replaces the timezone under the same rules as [`update`](Self::update).
    pub async fn update_timezone(&self, timezone: &str) -> Result<()> {
        let timezone = parse_timezone(timezone)?;
        self.retime_with(|state| state.timezone = timezone).await
    }

    async fn retime_with(&self, change: impl FnOnce(&mut ScheduleState)) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.phase == SchedulerPhase::Stopped {
            return Err(DigestError::SchedulerStopped);
        }
        change(&mut state);
        let id = state.install_trigger();
        info!(
            "Retimed digest trigger to {} at {} {}",
            id,
            state.time_of_day,
            state.timezone.name()
        );
        drop(state);

        self.retime.notify_one();
        Ok(())
    }

    pub async fn phase(&self) -> SchedulerPhase {
        self.state.lock().await.phase
    }

    /// Number of registered trigger entries; at most one.
    pub async fn trigger_count(&self) -> usize {
        self.state.lock().await.triggers.len()
    }

    pub async fn next_fire(&self) -> Option<DateTime<Tz>> {
        let state = self.state.lock().await;
        state
            .next_fire(Utc::now())
            .map(|(_, at)| at.with_timezone(&state.timezone))
    }

    pub async fn cron_expression(&self) -> Option<String> {
        let state = self.state.lock().await;
        let id = state.active?;
        state.triggers.get(id).map(|t| t.cron_expression())
    }
}

impl Drop for DigestScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn poisoned() -> DigestError {
    DigestError::General("scheduler worker lock poisoned".to_string())
}

async fn run_timer_loop(
    state: Arc<Mutex<ScheduleState>>,
    retime: Arc<Notify>,
    cancel: CancellationToken,
    callback: DigestCallback,
) {
    loop {
        let next = state.lock().await.next_fire(Utc::now());

        let (trigger_id, fire_at) = match next {
            Some(next) => next,
            None => {
                warn!("No upcoming fire for the active trigger; waiting for a retime");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = retime.notified() => continue,
                }
            }
        };

        let wait = (fire_at - Utc::now()).to_std().unwrap_or_default();
        debug!("Next digest fire at {} (in {:?})", fire_at, wait);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = retime.notified() => continue,
            _ = tokio::time::sleep(wait) => {}
        }

        {
            let mut state = state.lock().await;
            if cancel.is_cancelled() {
                break;
            }
            if state.active != Some(trigger_id) {
                debug!("Trigger {} was replaced before firing", trigger_id);
                continue;
            }
            match state.triggers.get_mut(trigger_id) {
                Some(trigger) => trigger.mark_fired(fire_at),
                None => continue,
            }
        }

        info!("Digest trigger {} fired for {}", trigger_id, fire_at);
        if let Err(e) = (callback)().await {
            error!("Digest cycle failed: {:#}", e);
        }
    }

    debug!("Digest timer loop exited");
}
