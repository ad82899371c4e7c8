//! Deterministic ordering of scheduled events.

use std::time::Duration;

use vertebra_core::{Event, EventPriority};

use crate::NodeIndex;

/// Total order over scheduled events: delivery time first, then priority,
/// then target node, then insertion sequence. The sequence counter breaks
/// every remaining tie, so a `BTreeMap<EventKey, Event>` replays runs in
/// exactly one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    pub time: Duration,
    pub priority: EventPriority,
    pub node_index: NodeIndex,
    pub sequence: u64,
}

impl EventKey {
    pub fn new(time: Duration, event: &Event, node_index: NodeIndex, sequence: u64) -> Self {
        Self {
            time,
            priority: event.priority(),
            node_index,
            sequence,
        }
    }
}
