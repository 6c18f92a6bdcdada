//! Topic-based event bus implementation.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::types::{DamageEvent, ReactionEvent, WorkflowEvent};

/// Topics for event routing
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub enum Topic {
    /// Workflow lifecycle (state entered, suspended, finished)
    Workflow,
    /// Damage batches, effect expiry and concentration
    Damage,
    /// Reactions taken during other actors' workflows
    Reaction,
}

/// Event wrapper that carries the topic and typed event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Workflow(WorkflowEvent),
    Damage(DamageEvent),
    Reaction(ReactionEvent),
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Event::Workflow(_) => Topic::Workflow,
            Event::Damage(_) => Topic::Damage,
            Event::Reaction(_) => Topic::Reaction,
        }
    }
}

impl From<WorkflowEvent> for Event {
    fn from(event: WorkflowEvent) -> Self {
        Event::Workflow(event)
    }
}

impl From<DamageEvent> for Event {
    fn from(event: DamageEvent) -> Self {
        Event::Damage(event)
    }
}

impl From<ReactionEvent> for Event {
    fn from(event: ReactionEvent) -> Self {
        Event::Reaction(event)
    }
}

struct Channels {
    workflow: broadcast::Sender<Event>,
    damage: broadcast::Sender<Event>,
    reaction: broadcast::Sender<Event>,
}

impl Channels {
    fn get(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Workflow => &self.workflow,
            Topic::Damage => &self.damage,
            Topic::Reaction => &self.reaction,
        }
    }
}

/// Topic-based event bus
///
/// Allows consumers to subscribe to specific topics and only receive
/// events they care about. The topic set is fixed, so channels are created
/// up front and never locked.
#[derive(Clone)]
pub struct EventBus {
    channels: Arc<Channels>,
}

impl EventBus {
    /// Creates a new event bus with default capacity for each topic
    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    /// Creates a new event bus with specified capacity per topic
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            channels: Arc::new(Channels {
                workflow: broadcast::channel(capacity).0,
                damage: broadcast::channel(capacity).0,
                reaction: broadcast::channel(capacity).0,
            }),
        }
    }

    /// Publish an event to its corresponding topic
    pub fn publish(&self, event: impl Into<Event>) {
        let event = event.into();
        let topic = event.topic();
        if self.channels.get(topic).send(event).is_err() {
            // No subscribers for this topic - this is normal, not an error
            tracing::trace!(target: "runtime::events", ?topic, "no subscribers");
        }
    }

    /// Subscribe to a specific topic
    pub fn subscribe(&self, topic: Topic) -> broadcast::Receiver<Event> {
        self.channels.get(topic).subscribe()
    }

    /// Subscribe to multiple topics
    pub fn subscribe_multiple(
        &self,
        topics: &[Topic],
    ) -> std::collections::HashMap<Topic, broadcast::Receiver<Event>> {
        topics
            .iter()
            .map(|&topic| (topic, self.subscribe(topic)))
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
