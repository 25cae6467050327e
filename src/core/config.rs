//! # Machine configuration.
//!
//! Provides [`MachineConfig`], centralized settings for one machine instance.
//!
//! ## Sentinel values
//! - capacities are clamped to a minimum of 1 (see the `*_clamped` accessors)
//! - `grace = 0s` → side jobs are force-cancelled as soon as graceful shutdown reaches them
//! - a `None` dispatcher → work is spawned on the ambient tokio runtime

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

/// Execution contexts for the four categories of work a machine spawns.
///
/// Each category can run on its own runtime so that, for example, a slow event
/// handler cannot starve input processing.
#[derive(Clone, Debug, Default)]
pub struct Dispatchers {
    /// Input strategy loop and input handlers.
    pub inputs: Option<Handle>,
    /// Event dispatch loop and event handlers.
    pub events: Option<Handle>,
    /// Side job bodies and the side job request loop.
    pub side_jobs: Option<Handle>,
    /// Interceptor workers and the notification pump.
    pub interceptors: Option<Handle>,
}

/// Configuration for one machine.
///
/// ## Field semantics
/// - `name`: attached to every notification and log line
/// - `grace`: default side job grace period for graceful shutdown
/// - `input_capacity`: main queue buffer size (min 1)
/// - `event_capacity`: event queue buffer size (min 1)
/// - `notification_capacity`: notification ingestion buffer size (min 1)
/// - `broadcast_capacity`: per-interceptor backlog before lagging (min 1)
/// - `dispatchers`: execution context per category of work
#[derive(Clone, Debug)]
pub struct MachineConfig {
    /// Machine name (for notifications and logs).
    pub name: Arc<str>,

    /// Maximum time side jobs get to finish on their own during graceful shutdown.
    ///
    /// Also bounds how long graceful shutdown waits for the event queue and
    /// interceptors to drain.
    pub grace: Duration,

    /// Capacity of the main input queue.
    ///
    /// `send` waits when it is full; `try_send` drops the input (`InputDropped`).
    pub input_capacity: usize,

    /// Capacity of the event queue.
    ///
    /// Posting an event waits when it is full, which happens when no event handler is attached.
    pub event_capacity: usize,

    /// Capacity of the notification ingestion queue.
    pub notification_capacity: usize,

    /// Capacity of the broadcast ring feeding interceptors.
    ///
    /// Interceptors falling behind by more than this many notifications skip the oldest ones.
    pub broadcast_capacity: usize,

    /// Execution contexts.
    pub dispatchers: Dispatchers,
}

impl MachineConfig {
    /// Main queue capacity clamped to a minimum of 1.
    #[inline]
    pub fn input_capacity_clamped(&self) -> usize {
        self.input_capacity.max(1)
    }

    /// Event queue capacity clamped to a minimum of 1.
    #[inline]
    pub fn event_capacity_clamped(&self) -> usize {
        self.event_capacity.max(1)
    }

    /// Notification queue capacity clamped to a minimum of 1.
    #[inline]
    pub fn notification_capacity_clamped(&self) -> usize {
        self.notification_capacity.max(1)
    }

    /// Broadcast capacity clamped to a minimum of 1.
    #[inline]
    pub fn broadcast_capacity_clamped(&self) -> usize {
        self.broadcast_capacity.max(1)
    }
}

impl Default for MachineConfig {
    /// Default configuration:
    ///
    /// - `name = "machine"`
    /// - `grace = 5s`
    /// - `input_capacity = 64`, `event_capacity = 64`
    /// - `notification_capacity = 1024`, `broadcast_capacity = 1024`
    /// - all dispatchers on the ambient runtime
    fn default() -> Self {
        Self {
            name: Arc::from("machine"),
            grace: Duration::from_secs(5),
            input_capacity: 64,
            event_capacity: 64,
            notification_capacity: 1024,
            broadcast_capacity: 1024,
            dispatchers: Dispatchers::default(),
        }
    }
}
