//! Callback payloads for triggers, segments, and state machine hooks.
//!
//! A payload is anything invocable with the argument its slot provides: the
//! firing time for triggers, the normalized progress for segments, the state
//! id for lifecycle hooks, and nothing for guards. Each payload is a tagged
//! variant: a native Rust closure, or a script function pointer resolved once
//! at registration time and invoked against the host-owned engine each tick.

use std::fmt;
use std::sync::Arc;

use rhai::FnPtr;

use crate::machine::StateId;
use crate::timing::SongTime;
use crate::Result;

/// Payload of a one-shot or repeating trigger.
#[derive(Clone)]
pub enum TriggerPayload {
    /// Host-side Rust callback, invoked with the trigger's scheduled time.
    Native(Arc<dyn Fn(SongTime) -> Result<()> + Send + Sync>),
    /// Script function registered through the scripting bridge.
    Script(FnPtr),
}

impl TriggerPayload {
    /// Wrap a native closure as a trigger payload.
    pub fn native(f: impl Fn(SongTime) -> Result<()> + Send + Sync + 'static) -> Self {
        Self::Native(Arc::new(f))
    }
}

/// Payload of a segment, invoked with progress in `[0, 1]` while active.
#[derive(Clone)]
pub enum SegmentPayload {
    /// Host-side Rust callback.
    Native(Arc<dyn Fn(f64) -> Result<()> + Send + Sync>),
    /// Script function registered through the scripting bridge.
    Script(FnPtr),
}

impl SegmentPayload {
    /// Wrap a native closure as a segment payload.
    pub fn native(f: impl Fn(f64) -> Result<()> + Send + Sync + 'static) -> Self {
        Self::Native(Arc::new(f))
    }
}

/// Payload of a state lifecycle hook (enter / update / leave).
#[derive(Clone)]
pub enum StatePayload {
    /// Host-side Rust callback, invoked with the state's id.
    Native(Arc<dyn Fn(StateId) -> Result<()> + Send + Sync>),
    /// Script function registered through the scripting bridge.
    Script(FnPtr),
}

impl StatePayload {
    /// Wrap a native closure as a state hook payload.
    pub fn native(f: impl Fn(StateId) -> Result<()> + Send + Sync + 'static) -> Self {
        Self::Native(Arc::new(f))
    }
}

/// Guard predicate of a transition edge.
#[derive(Clone)]
pub enum Guard {
    /// Host-side predicate.
    Native(Arc<dyn Fn() -> bool + Send + Sync>),
    /// Script predicate returning a boolean.
    Script(FnPtr),
}

impl Guard {
    /// Wrap a native predicate as a guard.
    pub fn native(f: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self::Native(Arc::new(f))
    }
}

macro_rules! impl_payload_debug {
    ($ty:ident) => {
        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self {
                    Self::Native(_) => write!(f, concat!(stringify!($ty), "::Native")),
                    Self::Script(ptr) => {
                        write!(f, concat!(stringify!($ty), "::Script({})"), ptr.fn_name())
                    }
                }
            }
        }
    };
}

impl_payload_debug!(TriggerPayload);
impl_payload_debug!(SegmentPayload);
impl_payload_debug!(StatePayload);
impl_payload_debug!(Guard);

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    #[test]
    fn test_native_trigger_payload_invokes() {
        let seen = Arc::new(AtomicI64::new(0));
        let seen2 = seen.clone();
        let payload = TriggerPayload::native(move |t| {
            seen2.store(t.as_millis(), Ordering::Relaxed);
            Ok(())
        });
        match payload {
            TriggerPayload::Native(f) => f(SongTime::from_millis(123)).unwrap(),
            TriggerPayload::Script(_) => unreachable!(),
        }
        assert_eq!(seen.load(Ordering::Relaxed), 123);
    }

    #[test]
    fn test_payload_debug_names_variant() {
        let payload = SegmentPayload::native(|_| Ok(()));
        assert_eq!(format!("{:?}", payload), "SegmentPayload::Native");
    }
}
