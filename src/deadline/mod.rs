//! Wall-clock deadline enforcement.
//!
//! The engine computes `deadline = now + timeout_seconds` at execution start
//! and shares one [`DeadlineGuard`] handle with the executors and the
//! context. Executors call [`DeadlineGuard::check`] between steps; components
//! call it through `Context::check_deadline`. In strict mode the guard also
//! tracks the gap since the last check within a component invocation and
//! reports a `DeadlineCheck` violation at teardown time.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{FlowError, FlowResult};

/// Strict mode: longest a component may process without checking in
pub const STRICT_CHECK_THRESHOLD: Duration = Duration::from_secs(1);

#[derive(Debug)]
struct InvocationState {
    current_component: Option<String>,
    last_check: Option<Instant>,
}

#[derive(Debug)]
struct Inner {
    started: Instant,
    deadline: Option<Instant>,
    strict: bool,
    state: Mutex<InvocationState>,
}

/// Clonable handle enforcing one execution's deadline
#[derive(Debug, Clone)]
pub struct DeadlineGuard {
    inner: Arc<Inner>,
}

impl DeadlineGuard {
    /// Install a deadline `timeout_seconds` from now; `None` means unbounded
    /// (only strict-mode tracking applies).
    pub fn new(timeout_seconds: Option<f64>, strict: bool) -> Self {
        let started = Instant::now();
        let deadline = timeout_seconds.map(|secs| started + Duration::from_secs_f64(secs));
        Self {
            inner: Arc::new(Inner {
                started,
                deadline,
                strict,
                state: Mutex::new(InvocationState {
                    current_component: None,
                    last_check: None,
                }),
            }),
        }
    }

    /// Seconds since the guard was installed
    pub fn elapsed(&self) -> f64 {
        self.inner.started.elapsed().as_secs_f64()
    }

    /// Whether the deadline has passed
    pub fn expired(&self) -> bool {
        match self.inner.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Time left before the deadline, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Compare `now` against the deadline, labelling a failure with `at_step`
    pub fn check(&self, at_step: &str) -> FlowResult<()> {
        self.inner.state.lock().last_check = Some(Instant::now());
        if self.expired() {
            return Err(FlowError::timeout(self.elapsed(), at_step));
        }
        Ok(())
    }

    /// Deadline check from inside a component invocation
    pub fn check_current(&self) -> FlowResult<()> {
        let label = self
            .inner
            .state
            .lock()
            .current_component
            .clone()
            .unwrap_or_else(|| "<between steps>".to_string());
        self.check(&label)
    }

    /// Begin strict-mode tracking for one component invocation
    pub fn begin_invocation(&self, component: &str) {
        let mut state = self.inner.state.lock();
        state.current_component = Some(component.to_string());
        state.last_check = Some(Instant::now());
    }

    /// End strict-mode tracking; raises `DeadlineCheck` when the component
    /// processed past the threshold without a single check.
    pub fn finish_invocation(&self, component: &str) -> FlowResult<()> {
        let mut state = self.inner.state.lock();
        let last_check = state.last_check.take();
        state.current_component = None;
        drop(state);

        if !self.inner.strict {
            return Ok(());
        }
        let Some(last_check) = last_check else {
            return Ok(());
        };
        let gap = last_check.elapsed();
        if gap > STRICT_CHECK_THRESHOLD {
            return Err(FlowError::DeadlineCheck {
                component: component.to_string(),
                observed: gap.as_secs_f64(),
                threshold: STRICT_CHECK_THRESHOLD.as_secs_f64(),
            });
        }
        Ok(())
    }
}
