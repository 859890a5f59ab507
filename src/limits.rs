//! Centralized tunables.
//!
//! arbor is a library component with no config files or CLI; embedders that
//! want different bounds construct a `Limits` and pass it where it is
//! consumed (currently the observation bus).

/// Resource bounds for the observation layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Limits {
    /// Maximum concurrently registered event subscribers.
    pub max_event_subscribers: usize,
    /// Per-subscriber queue depth, in event batches. A full queue drops the
    /// batch for that subscriber and counts it as lag.
    pub event_queue_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_event_subscribers: 64,
            event_queue_depth: 256,
        }
    }
}
