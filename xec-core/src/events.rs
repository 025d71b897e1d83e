//! Lifecycle event bus.
//!
//! Modeled after the broadcast-to-many-cheap-subscribers pattern: emission
//! never blocks on a slow or absent listener. A lagging subscriber drops
//! older events rather than backpressuring the engine.

use std::time::Duration;

use tokio::sync::broadcast;

/// A lifecycle event emitted by the engine. Cloned to each subscriber.
#[derive(Debug, Clone)]
pub enum Event {
    CommandStart {
        command: String,
        adapter: &'static str,
        cwd: Option<String>,
        timestamp: i64,
    },
    CommandComplete {
        command: String,
        exit_code: Option<i32>,
        duration: Duration,
        adapter: &'static str,
        timestamp: i64,
    },
    CommandError {
        command: String,
        error: String,
        duration: Duration,
        adapter: &'static str,
        timestamp: i64,
    },
    FileRead {
        path: String,
        size: Option<u64>,
        adapter: &'static str,
        timestamp: i64,
    },
    FileWrite {
        path: String,
        size: Option<u64>,
        adapter: &'static str,
        timestamp: i64,
    },
    FileDelete {
        path: String,
        adapter: &'static str,
        timestamp: i64,
    },
    StepRetry {
        attempt: u32,
        max_attempts: u32,
        error: String,
        delay: Duration,
    },
}

/// Broadcast-backed event bus shared by an `Engine` and every derived
/// engine. Cheap to clone; all clones publish to and subscribe from the
/// same channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    enabled: bool,
}

impl EventBus {
    /// `capacity` is `maxEventListeners`'s companion buffer size: how many
    /// events a slow subscriber may lag behind before older ones are
    /// dropped for it.
    pub fn new(capacity: usize, enabled: bool) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, enabled }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publishes an event. A no-op when events are disabled or there are no
    /// subscribers; never fails or panics on behalf of a lagging listener.
    pub fn emit(&self, event: Event) {
        if !self.enabled {
            return;
        }
        let _ = self.sender.send(event);
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
