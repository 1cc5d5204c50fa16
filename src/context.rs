//! Process-scoped run state: the interrupt signal, invocation throttle and
//! heartbeat timers.
//!
//! A single [`RunContext`] is created per orchestrator run and shared (via
//! `Arc`) by the orchestrator and the tool executor. Nothing here is global.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ThrottleSettings;

pub struct RunContext {
    cancel: CancellationToken,
    automation: bool,
    min_interval: Duration,
    kill_grace: Duration,
    heartbeat_interval: Duration,
    last_invocation: Mutex<Option<Instant>>,
}

impl RunContext {
    pub fn new(settings: &ThrottleSettings, automation: bool) -> Self {
        Self {
            cancel: CancellationToken::new(),
            automation,
            min_interval: Duration::from_millis(settings.min_interval_ms),
            kill_grace: Duration::from_secs(settings.kill_grace_secs),
            heartbeat_interval: Duration::from_secs(settings.heartbeat_secs.max(1)),
            last_invocation: Mutex::new(None),
        }
    }

    /// Context for automated runs: no throttling, no cooldowns, short kill grace.
    pub fn automated() -> Self {
        Self {
            cancel: CancellationToken::new(),
            automation: true,
            min_interval: Duration::ZERO,
            kill_grace: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(30),
            last_invocation: Mutex::new(None),
        }
    }

    pub fn kill_grace(&self) -> Duration {
        self.kill_grace
    }

    /// Raise the interrupt. Idempotent.
    pub fn interrupt(&self) {
        self.cancel.cancel();
    }

    pub fn is_interrupted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the interrupt has been raised.
    pub async fn interrupted(&self) {
        self.cancel.cancelled().await
    }

    /// Route Ctrl+C into the interrupt signal.
    pub fn install_interrupt_handler(self: &Arc<Self>) -> JoinHandle<()> {
        let ctx = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, finishing the in-flight agent and saving state");
                ctx.interrupt();
            }
        })
    }

    /// Wait until at least `min_interval` has passed since the previous invocation.
    ///
    /// Returns `false` if the run was interrupted while waiting.
    pub async fn throttle(&self) -> bool {
        if self.automation || self.min_interval.is_zero() {
            return !self.is_interrupted();
        }

        let mut last = self.last_invocation.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                tracing::debug!(wait_ms = wait.as_millis() as u64, "throttling agent invocation");
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = self.cancel.cancelled() => return false,
                }
            }
        }
        *last = Some(Instant::now());
        !self.is_interrupted()
    }

    /// Sleep for a rate-limit cooldown. Skipped in automation mode.
    ///
    /// Returns `false` if the run was interrupted while waiting.
    pub async fn cooldown(&self, duration: Duration) -> bool {
        if self.automation || duration.is_zero() {
            return !self.is_interrupted();
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_interrupted(),
            _ = self.cancel.cancelled() => false,
        }
    }

    /// Start a heartbeat that logs elapsed time while `label` is running.
    pub fn heartbeat(&self, label: String) -> Heartbeat {
        let interval = self.heartbeat_interval;
        let started = Instant::now();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tracing::info!(
                    elapsed_secs = started.elapsed().as_secs(),
                    "{} still running",
                    label
                );
            }
        });
        Heartbeat {
            handle: Some(handle),
        }
    }
}

/// Handle to a running heartbeat task. Stopping (or dropping) cancels it.
pub struct Heartbeat {
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    pub fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttled(min_interval_ms: u64) -> RunContext {
        RunContext::new(
            &ThrottleSettings {
                min_interval_ms,
                ..ThrottleSettings::default()
            },
            false,
        )
    }

    #[tokio::test]
    async fn test_interrupt_is_observable() {
        let ctx = RunContext::automated();
        assert!(!ctx.is_interrupted());
        ctx.interrupt();
        assert!(ctx.is_interrupted());
        // Resolves immediately once raised
        tokio::time::timeout(Duration::from_millis(100), ctx.interrupted())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_automation_skips_throttle_and_cooldown() {
        let ctx = RunContext::automated();
        let start = Instant::now();
        assert!(ctx.throttle().await);
        assert!(ctx.throttle().await);
        assert!(ctx.cooldown(Duration::from_secs(60)).await);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_throttle_spaces_invocations() {
        let ctx = throttled(150);
        let start = Instant::now();
        assert!(ctx.throttle().await);
        assert!(ctx.throttle().await);
        assert!(start.elapsed() >= Duration::from_millis(150));
    }

    #[tokio::test]
    async fn test_throttle_returns_false_when_interrupted() {
        let ctx = Arc::new(throttled(10_000));
        assert!(ctx.throttle().await);
        let waiter = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.throttle().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.interrupt();
        assert!(!waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_cooldown_aborts_on_interrupt() {
        let ctx = Arc::new(throttled(0));
        let sleeper = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.cooldown(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        ctx.interrupt();
        let finished = tokio::time::timeout(Duration::from_secs(2), sleeper)
            .await
            .unwrap()
            .unwrap();
        assert!(!finished);
    }

    #[tokio::test]
    async fn test_heartbeat_stops_cleanly() {
        let ctx = RunContext::automated();
        let beat = ctx.heartbeat("agent".to_string());
        beat.stop();
        let dropped = ctx.heartbeat("agent".to_string());
        drop(dropped);
    }
}
