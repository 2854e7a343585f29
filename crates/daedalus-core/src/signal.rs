//! Single-slot control signals.
//!
//! A [`Signal`] holds at most one settled value between resets. It is used
//! twice in the execution core:
//!
//! - [`ControlSignal`] (`Signal<Flow>`) reports how a middleware step wants
//!   the pipeline to continue. Middleware settles it through a [`Control`]
//!   handle (`next`, `skip`, `done`, `throwException`).
//! - `Signal<Construction>` reports that an async factory finished. Factories
//!   settle it through a [`Continuation`] handle.
//!
//! Waiters use [`synchronize`](crate::synchronizer::synchronize) to suspend
//! until the slot is settled.

use crate::definition::Instance;
use crate::error::{DaedalusError, DaedalusResult};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// How the pipeline continues after a middleware step.
#[derive(Debug, Clone)]
pub enum Flow {
    /// Continue with the next callable.
    Proceed,
    /// Abandon this callable's further effect; continues like `Proceed`.
    Skip,
    /// End the whole run successfully with the state accumulated so far.
    Terminate,
    /// End the run with an error, handing it to the error boundary.
    Fail(DaedalusError),
}

impl Flow {
    /// Returns the flow name used in logs and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Proceed => "proceed",
            Self::Skip => "skip",
            Self::Terminate => "terminate",
            Self::Fail(_) => "fail",
        }
    }
}

/// A single-slot value with wake-up notification.
///
/// Settling an occupied slot is a contract violation; the slot must be
/// reset (taken) first.
pub struct Signal<T> {
    slot: parking_lot::Mutex<Option<T>>,
    pub(crate) notify: Notify,
}

/// The signal a middleware step settles.
pub type ControlSignal = Signal<Flow>;

impl<T> Signal<T> {
    /// Creates a pending signal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: parking_lot::Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Settles the signal and wakes any waiter.
    ///
    /// # Errors
    ///
    /// Returns `ContractViolation` if the signal is already settled.
    pub fn settle(&self, value: T) -> DaedalusResult<()> {
        {
            let mut slot = self.slot.lock();
            if slot.is_some() {
                return Err(DaedalusError::contract_violation(
                    "signal settled twice before reset",
                ));
            }
            *slot = Some(value);
        }
        self.notify.notify_waiters();
        Ok(())
    }

    /// Returns true while no value is settled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.slot.lock().is_none()
    }

    /// Takes the settled value, returning the signal to pending.
    pub fn reset(&self) -> Option<T> {
        self.slot.lock().take()
    }
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// The four control primitives bound to one middleware step.
///
/// The handle is cheap to clone and `'static`, so middleware may move it
/// into a spawned task and settle the step later. Only the first primitive
/// invoked counts; any further invocation returns `ContractViolation`.
#[derive(Clone)]
pub struct Control {
    signal: Arc<ControlSignal>,
    fired: Arc<AtomicBool>,
}

impl Control {
    /// Binds a control handle to a signal.
    #[must_use]
    pub fn new(signal: Arc<ControlSignal>) -> Self {
        Self {
            signal,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Continue with the next callable (`next`).
    pub fn next(&self) -> DaedalusResult<()> {
        self.settle(Flow::Proceed)
    }

    /// Skip the rest of this callable's effect (`skip`).
    pub fn skip(&self) -> DaedalusResult<()> {
        self.settle(Flow::Skip)
    }

    /// Stop the whole run without error (`done`).
    pub fn done(&self) -> DaedalusResult<()> {
        self.settle(Flow::Terminate)
    }

    /// Fail the run with the given error (`throwException`).
    pub fn throw_exception(&self, error: DaedalusError) -> DaedalusResult<()> {
        self.settle(Flow::Fail(error))
    }

    /// Fail the run with a user error.
    pub fn throw(&self, error: impl Into<anyhow::Error>) -> DaedalusResult<()> {
        self.throw_exception(DaedalusError::thrown(error))
    }

    /// Settles the step with an explicit flow.
    pub fn settle(&self, flow: Flow) -> DaedalusResult<()> {
        if self.fired.swap(true, Ordering::AcqRel) {
            tracing::warn!(flow = flow.as_str(), "control primitive invoked more than once");
            return Err(DaedalusError::contract_violation(format!(
                "control primitive '{}' invoked after the step was already settled",
                flow.as_str()
            )));
        }
        self.signal.settle(flow)
    }

    /// Returns true once any primitive has been invoked.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Control")
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Deferred instance producer delivered by an async factory.
pub type Thunk = Box<dyn FnOnce() -> Option<Instance> + Send>;

/// What an async factory delivers through its continuation.
pub type Construction = DaedalusResult<Thunk>;

/// The continuation handed to an async factory.
///
/// The factory must call exactly one of [`resolve`](Self::resolve),
/// [`resolve_optional`](Self::resolve_optional) or [`reject`](Self::reject),
/// either before returning or later from a spawned task.
#[derive(Clone)]
pub struct Continuation {
    signal: Arc<Signal<Construction>>,
    fired: Arc<AtomicBool>,
}

impl Continuation {
    /// Binds a continuation to a construction signal.
    #[must_use]
    pub fn new(signal: Arc<Signal<Construction>>) -> Self {
        Self {
            signal,
            fired: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Delivers a thunk producing the instance.
    pub fn resolve<T, F>(&self, thunk: F) -> DaedalusResult<()>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T + Send + 'static,
    {
        self.deliver(Ok(Box::new(move || Some(Arc::new(thunk()) as Instance))))
    }

    /// Delivers a thunk that may produce no instance.
    ///
    /// `None` makes the construction fail with `EmptyService`.
    pub fn resolve_optional<T, F>(&self, thunk: F) -> DaedalusResult<()>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> Option<T> + Send + 'static,
    {
        self.deliver(Ok(Box::new(move || {
            thunk().map(|value| Arc::new(value) as Instance)
        })))
    }

    /// Signals that construction failed.
    pub fn reject(&self, error: DaedalusError) -> DaedalusResult<()> {
        self.deliver(Err(error))
    }

    fn deliver(&self, construction: Construction) -> DaedalusResult<()> {
        if self.fired.swap(true, Ordering::AcqRel) {
            return Err(DaedalusError::contract_violation(
                "continuation invoked more than once",
            ));
        }
        self.signal.settle(construction)
    }
}

impl fmt::Debug for Continuation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("settled", &self.fired.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_settle_and_reset() {
        let signal: Signal<u32> = Signal::new();
        assert!(signal.is_pending());

        signal.settle(7).unwrap();
        assert!(!signal.is_pending());
        assert_eq!(signal.reset(), Some(7));
        assert!(signal.is_pending());

        // A reset signal accepts a new value.
        signal.settle(8).unwrap();
        assert_eq!(signal.reset(), Some(8));
    }

    #[test]
    fn test_signal_second_settle_is_violation() {
        let signal: Signal<u32> = Signal::new();
        signal.settle(1).unwrap();

        let err = signal.settle(2).unwrap_err();
        assert!(matches!(err, DaedalusError::ContractViolation { .. }));
        assert_eq!(signal.reset(), Some(1));
    }

    #[test]
    fn test_control_primitives() {
        let signal = Arc::new(ControlSignal::new());
        let control = Control::new(signal.clone());

        control.skip().unwrap();
        assert!(control.is_settled());
        assert!(matches!(signal.reset(), Some(Flow::Skip)));
    }

    #[test]
    fn test_control_double_invocation_after_reset() {
        let signal = Arc::new(ControlSignal::new());
        let control = Control::new(signal.clone());

        control.next().unwrap();
        let _ = signal.reset();

        let err = control.done().unwrap_err();
        assert!(matches!(err, DaedalusError::ContractViolation { .. }));
        assert!(signal.is_pending());
    }

    #[test]
    fn test_control_throw_carries_error() {
        let signal = Arc::new(ControlSignal::new());
        Control::new(signal.clone())
            .throw(anyhow::anyhow!("bad input"))
            .unwrap();

        match signal.reset() {
            Some(Flow::Fail(err)) => assert_eq!(err.to_string(), "bad input"),
            other => panic!("unexpected flow: {other:?}"),
        }
    }

    #[test]
    fn test_continuation_resolve() {
        let signal = Arc::new(Signal::<Construction>::new());
        let continuation = Continuation::new(signal.clone());

        continuation.resolve(|| 42_u64).unwrap();

        let thunk = signal.reset().unwrap().unwrap();
        let instance = thunk().unwrap();
        assert_eq!(*instance.downcast::<u64>().unwrap(), 42);
    }

    #[test]
    fn test_continuation_resolve_optional_none() {
        let signal = Arc::new(Signal::<Construction>::new());
        Continuation::new(signal.clone())
            .resolve_optional(|| None::<String>)
            .unwrap();

        let thunk = signal.reset().unwrap().unwrap();
        assert!(thunk().is_none());
    }

    #[test]
    fn test_continuation_reject_then_resolve() {
        let signal = Arc::new(Signal::<Construction>::new());
        let continuation = Continuation::new(signal.clone());

        continuation.reject(DaedalusError::msg("offline")).unwrap();
        assert!(continuation.resolve(|| 1_u8).is_err());
        assert!(signal.reset().unwrap().is_err());
    }

    #[test]
    fn test_flow_names() {
        assert_eq!(Flow::Proceed.as_str(), "proceed");
        assert_eq!(Flow::Skip.as_str(), "skip");
        assert_eq!(Flow::Terminate.as_str(), "terminate");
        assert_eq!(Flow::Fail(DaedalusError::msg("x")).as_str(), "fail");
    }
}
