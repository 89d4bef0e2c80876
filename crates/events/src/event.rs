use chrono::{DateTime, Utc};

/// A fact about a committed state change.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable dotted name (e.g. "inventory.movement.recorded").
    fn event_type(&self) -> &'static str;

    /// When the change happened (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
