use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use taskwire_core::config::CircuitBreakerConfig;
use taskwire_core::{AgentId, TaskwireError};
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Tracks consecutive failures for one agent.
#[derive(Debug, Clone)]
pub struct CircuitBreakerState {
    pub failure_count: u32,
    pub last_failure: Option<Instant>,
    pub state: BreakerState,
    /// Start of the half-open trial call currently in flight, if any.
    trial_started: Option<Instant>,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            failure_count: 0,
            last_failure: None,
            state: BreakerState::Closed,
            trial_started: None,
        }
    }
}

impl CircuitBreakerState {
    /// Decide whether a call may proceed at `now`, moving open → half-open
    /// once the reset timeout has elapsed.
    pub fn admit(&mut self, now: Instant, config: &CircuitBreakerConfig) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                let cooled = self
                    .last_failure
                    .is_none_or(|at| now.duration_since(at) >= config.reset_timeout);
                if cooled {
                    self.state = BreakerState::HalfOpen;
                    self.trial_started = Some(now);
                }
                cooled
            }
            BreakerState::HalfOpen => {
                // A trial abandoned by a dropped caller stops blocking after one reset period.
                let free = self
                    .trial_started
                    .is_none_or(|at| now.duration_since(at) >= config.reset_timeout);
                if free {
                    self.trial_started = Some(now);
                }
                free
            }
        }
    }

    pub fn record_success(&mut self) {
        self.failure_count = 0;
        self.state = BreakerState::Closed;
        self.trial_started = None;
    }

    pub fn record_failure(&mut self, now: Instant, config: &CircuitBreakerConfig) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure = Some(now);
        self.trial_started = None;
        if self.state == BreakerState::HalfOpen || self.failure_count >= config.failure_threshold {
            self.state = BreakerState::Open;
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == BreakerState::Open
    }
}

/// Diagnostic view of one agent's breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub failure_count: u32,
    pub since_last_failure: Option<Duration>,
}

/// Per-agent circuit breakers. Entries are created on the first call for an agent.
pub struct CircuitBreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<AgentId, CircuitBreakerState>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `f` through the breaker for `agent_id`.
    ///
    /// While the breaker is open this fails fast with `CircuitOpen` and `f` is
    /// never invoked. Cancellation is not counted as an agent failure.
    pub async fn call<T, F, Fut>(&self, agent_id: &str, f: F) -> Result<T, TaskwireError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, TaskwireError>>,
    {
        {
            let mut breakers = self.breakers.lock().await;
            let breaker = breakers.entry(agent_id.to_string()).or_default();
            if !breaker.admit(Instant::now(), &self.config) {
                tracing::debug!(agent_id, "circuit open, rejecting call");
                return Err(TaskwireError::CircuitOpen {
                    agent_id: agent_id.to_string(),
                });
            }
        }

        let outcome = f().await;

        let mut breakers = self.breakers.lock().await;
        let breaker = breakers.entry(agent_id.to_string()).or_default();
        match &outcome {
            Ok(_) => {
                if breaker.state != BreakerState::Closed {
                    tracing::info!(agent_id, "circuit breaker closed");
                }
                breaker.record_success();
            }
            Err(err) if err.is_cancelled() => {
                breaker.trial_started = None;
            }
            Err(_) => {
                let was_open = breaker.is_open();
                breaker.record_failure(Instant::now(), &self.config);
                if breaker.is_open() && !was_open {
                    tracing::warn!(
                        agent_id,
                        failures = breaker.failure_count,
                        "circuit breaker opened"
                    );
                }
            }
        }
        outcome
    }

    pub async fn snapshot(&self, agent_id: &str) -> Option<BreakerSnapshot> {
        let breakers = self.breakers.lock().await;
        breakers.get(agent_id).map(|breaker| BreakerSnapshot {
            state: breaker.state,
            failure_count: breaker.failure_count,
            since_last_failure: breaker
                .last_failure
                .map(|at| Instant::now().duration_since(at)),
        })
    }

    /// Force the breaker for `agent_id` back to closed.
    pub async fn reset(&self, agent_id: &str) {
        if let Some(breaker) = self.breakers.lock().await.get_mut(agent_id) {
            breaker.record_success();
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use taskwire_core::TransportError;

    fn config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_secs(60),
        }
    }

    async fn fail(registry: &CircuitBreakerRegistry, calls: &AtomicU32) -> Result<(), TaskwireError> {
        registry
            .call("sales", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(TaskwireError::from(TransportError::InvalidResponse("boom".into())))
            })
            .await
    }

    async fn succeed(registry: &CircuitBreakerRegistry, calls: &AtomicU32) -> Result<(), TaskwireError> {
        registry
            .call("sales", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_fails_fast() {
        let registry = CircuitBreakerRegistry::new(config());
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            assert!(fail(&registry, &calls).await.is_err());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        let err = succeed(&registry, &calls).await.unwrap_err();
        assert!(matches!(err, TaskwireError::CircuitOpen { ref agent_id } if agent_id == "sales"));
        assert_eq!(calls.load(Ordering::SeqCst), 3, "open breaker must not invoke f");
    }

    #[tokio::test(start_paused = true)]
    async fn default_config_opens_on_fifth_failure() {
        let registry = CircuitBreakerRegistry::default();
        assert_eq!(registry.config().failure_threshold, 5);
        let calls = AtomicU32::new(0);

        for attempt in 1..=5 {
            let err = fail(&registry, &calls).await.unwrap_err();
            assert!(
                !matches!(err, TaskwireError::CircuitOpen { .. }),
                "attempt {attempt} should reach the agent"
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        let err = fail(&registry, &calls).await.unwrap_err();
        assert!(matches!(err, TaskwireError::CircuitOpen { ref agent_id } if agent_id == "sales"));
        assert_eq!(calls.load(Ordering::SeqCst), 5, "sixth call must fail fast");
        let snapshot = registry.snapshot("sales").await.expect("snapshot");
        assert_eq!(snapshot.state, BreakerState::Open);
        assert_eq!(snapshot.failure_count, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_trial_closes_on_success() {
        let registry = CircuitBreakerRegistry::new(config());
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let _ = fail(&registry, &calls).await;
        }

        tokio::time::advance(Duration::from_secs(61)).await;
        succeed(&registry, &calls).await.expect("trial call");

        let snapshot = registry.snapshot("sales").await.expect("snapshot");
        assert_eq!(snapshot.state, BreakerState::Closed);
        assert_eq!(snapshot.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens() {
        let registry = CircuitBreakerRegistry::new(config());
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let _ = fail(&registry, &calls).await;
        }

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(fail(&registry, &calls).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4);

        let err = succeed(&registry, &calls).await.unwrap_err();
        assert!(matches!(err, TaskwireError::CircuitOpen { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_failure_count() {
        let registry = CircuitBreakerRegistry::new(config());
        let calls = AtomicU32::new(0);
        let _ = fail(&registry, &calls).await;
        let _ = fail(&registry, &calls).await;
        succeed(&registry, &calls).await.expect("success");
        let _ = fail(&registry, &calls).await;

        let snapshot = registry.snapshot("sales").await.expect("snapshot");
        assert_eq!(snapshot.state, BreakerState::Closed);
        assert_eq!(snapshot.failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_half_open_trial_at_a_time() {
        let registry = Arc::new(CircuitBreakerRegistry::new(config()));
        let calls = AtomicU32::new(0);
        for _ in 0..3 {
            let _ = fail(&registry, &calls).await;
        }
        tokio::time::advance(Duration::from_secs(61)).await;

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_registry = registry.clone();
        let trial = tokio::spawn(async move {
            trial_registry
                .call("sales", || async {
                    let _ = release_rx.await;
                    Ok(())
                })
                .await
        });
        tokio::task::yield_now().await;

        let err = succeed(&registry, &calls).await.unwrap_err();
        assert!(matches!(err, TaskwireError::CircuitOpen { .. }));

        release_tx.send(()).expect("release trial");
        trial.await.expect("join").expect("trial succeeds");
        succeed(&registry, &calls).await.expect("closed again");
    }

    #[tokio::test]
    async fn breakers_are_isolated_per_agent() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_secs(60),
        });
        let calls = AtomicU32::new(0);
        let _ = fail(&registry, &calls).await;

        let other = registry
            .call("creative", || async { Ok::<_, TaskwireError>(7) })
            .await
            .expect("other agent unaffected");
        assert_eq!(other, 7);

        registry.reset("sales").await;
        succeed(&registry, &calls).await.expect("reset closes the breaker");
    }
}
