use crate::connection::ConnectionEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reconfiguration events keyed by simulation step.
///
/// Events within a step keep their insertion order; later events observe
/// the graph left by earlier ones.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventSchedule {
    steps: BTreeMap<usize, Vec<ConnectionEvent>>,
}

impl EventSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: usize, event: ConnectionEvent) {
        self.steps.entry(step).or_default().push(event);
    }

    /// Events scheduled at `step`, in application order.
    pub fn events_at(&self, step: usize) -> &[ConnectionEvent] {
        self.steps.get(&step).map(Vec::as_slice).unwrap_or_default()
    }

    /// Steps that carry at least one event, ascending.
    pub fn steps(&self) -> impl Iterator<Item = usize> + '_ {
        self.steps.keys().copied()
    }

    /// Total number of scheduled events.
    pub fn len(&self) -> usize {
        self.steps.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.values().all(Vec::is_empty)
    }
}

impl FromIterator<(usize, ConnectionEvent)> for EventSchedule {
    fn from_iter<I: IntoIterator<Item = (usize, ConnectionEvent)>>(iter: I) -> Self {
        let mut schedule = Self::new();
        for (step, event) in iter {
            schedule.push(step, event);
        }
        schedule
    }
}
