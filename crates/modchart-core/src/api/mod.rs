//! Script-facing API registered with the Rhai engine.
//!
//! All functions internally use a thread-local [`ScriptHandle`] to talk to
//! the host: calls allocate any ids synchronously and send a deferred
//! [`ScriptMessage`](crate::messages::ScriptMessage), which the host applies
//! at the start of the next update pass.
//!
//! # Usage
//!
//! 1. Initialize the API with a ScriptHandle using `init_api()`
//! 2. Register all functions with a Rhai engine using `register_api()`
//! 3. Execute scripts that call the registered functions

pub mod machines;
pub mod timeline;

use std::cell::RefCell;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use rhai::Engine;

use crate::idgen::IdGen;
use crate::machine::StateId;
use crate::messages::ScriptMessage;
use crate::session::MAX_OPERATIONS_PER_CALL;
use crate::timing::SongTime;

/// Handle the script API uses to reach the host.
#[derive(Clone)]
pub struct ScriptHandle {
    tx: Sender<ScriptMessage>,
    ids: IdGen,
    song_time: Arc<AtomicI64>,
    root: StateId,
}

impl ScriptHandle {
    /// Create a handle sending messages over `tx`.
    pub fn new(
        tx: Sender<ScriptMessage>,
        ids: IdGen,
        song_time: Arc<AtomicI64>,
        root: StateId,
    ) -> Self {
        Self {
            tx,
            ids,
            song_time,
            root,
        }
    }

    /// Send a message to the host. The host outlives every script call, so
    /// a send failure only happens during teardown and is just logged.
    pub fn send(&self, msg: ScriptMessage) {
        if let Err(e) = self.tx.send(msg) {
            log::warn!("script message dropped: {e}");
        }
    }

    /// Allocate the next id from the shared generator.
    pub fn next_id(&self) -> u64 {
        self.ids.next_id()
    }

    /// Song time of the current update pass.
    pub fn song_time(&self) -> SongTime {
        SongTime::from_millis(self.song_time.load(Ordering::Relaxed))
    }

    /// Id of the root machine.
    pub fn root(&self) -> StateId {
        self.root
    }
}

// Thread-local storage for the script handle.
// This allows Rhai functions to access the host without passing it explicitly.
thread_local! {
    static SCRIPT_HANDLE: RefCell<Option<ScriptHandle>> = const { RefCell::new(None) };
}

/// Initialize the API with a ScriptHandle.
///
/// This must be called before executing any scripts that use the API.
/// The handle is stored in thread-local storage and used by all API functions.
pub fn init_api(handle: ScriptHandle) {
    SCRIPT_HANDLE.with(|h| {
        *h.borrow_mut() = Some(handle);
    });
}

/// Get the current ScriptHandle.
///
/// Returns None if `init_api()` hasn't been called on this thread.
pub fn get_handle() -> Option<ScriptHandle> {
    SCRIPT_HANDLE.with(|h| h.borrow().clone())
}

/// Get the current ScriptHandle, panicking if not initialized.
///
/// Use this in API functions where the handle is required.
pub fn require_handle() -> ScriptHandle {
    get_handle().expect("script API not initialized. Call init_api() first.")
}

/// Register all API functions with a Rhai engine.
pub fn register_api(engine: &mut Engine) {
    // Register timeline functions (triggers, segments, song time)
    timeline::register(engine);

    // Register state machine functions
    machines::register(engine);
}

/// Create a Rhai engine with the whole API registered.
pub fn create_engine() -> Engine {
    let mut engine = Engine::new();

    // Abort any single script call that runs away
    engine.set_max_operations(MAX_OPERATIONS_PER_CALL);

    // Override print() to route through the log system instead of stdout
    engine.on_print(|text| {
        log::info!("[script] {}", text);
    });

    // Override debug() similarly
    engine.on_debug(|text, source, pos| {
        let loc = match (source, pos) {
            (Some(src), pos) if !pos.is_none() => format!(" ({}:{})", src, pos),
            (Some(src), _) => format!(" ({})", src),
            (None, pos) if !pos.is_none() => format!(" ({})", pos),
            _ => String::new(),
        };
        log::debug!("[script]{} {}", loc, text);
    });

    register_api(&mut engine);

    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    fn test_handle() -> (ScriptHandle, crossbeam_channel::Receiver<ScriptMessage>) {
        let (tx, rx) = unbounded();
        let handle = ScriptHandle::new(
            tx,
            IdGen::new(),
            Arc::new(AtomicI64::new(0)),
            StateId::new(0),
        );
        (handle, rx)
    }

    #[test]
    fn test_handle_round_trip_through_thread_local() {
        let (handle, rx) = test_handle();
        init_api(handle);
        require_handle().send(ScriptMessage::Halt);
        assert!(matches!(rx.try_recv(), Ok(ScriptMessage::Halt)));
    }

    #[test]
    fn test_song_time_reflects_shared_atomic() {
        let (handle, _rx) = test_handle();
        handle.song_time.store(1234, Ordering::Relaxed);
        assert_eq!(handle.song_time(), SongTime::from_millis(1234));
    }
}
