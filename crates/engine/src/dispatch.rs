use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use volition_core::UniqueId;

use crate::event::Event;

/// Producer side of an entity's event queue. Clonable and usable from any
/// thread; pushes never block.
#[derive(Clone)]
pub struct QueueHandle {
    tx: mpsc::UnboundedSender<Event>,
}

impl QueueHandle {
    pub fn push(&self, event: Event) {
        if self.tx.send(event).is_err() {
            tracing::warn!("Event dropped, entity queue is closed");
        }
    }
}

/// Multi-producer single-consumer event queue owned by one agent or
/// service. Producers push lock-free; the owner drains on its tick.
pub struct EventQueue {
    tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            tx: self.tx.clone(),
        }
    }

    pub fn try_pop(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Drain up to `bound` events for fair handling across entities.
    pub fn drain(&mut self, bound: usize) -> Vec<Event> {
        let mut events = Vec::new();
        while events.len() < bound {
            match self.try_pop() {
                Some(event) => events.push(event),
                None => break,
            }
        }
        events
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Directory of entity queues keyed by id. Events addressed to an
/// unregistered or unspecified recipient fall back to the engine's own
/// queue for routing inference.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RwLock<HashMap<UniqueId, QueueHandle>>>,
    engine: QueueHandle,
}

impl Router {
    pub fn new(engine: QueueHandle) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            engine,
        }
    }

    pub fn register(&self, id: UniqueId, handle: QueueHandle) {
        self.inner.write().insert(id, handle);
    }

    pub fn deregister(&self, id: UniqueId) {
        self.inner.write().remove(&id);
    }

    pub fn queue_of(&self, id: UniqueId) -> Option<QueueHandle> {
        self.inner.read().get(&id).cloned()
    }

    pub fn engine_queue(&self) -> QueueHandle {
        self.engine.clone()
    }

    /// Deliver to the recipient's queue, or to the engine for inference
    /// when the recipient is unknown.
    pub fn route(&self, event: Event) {
        if event.recipient.id.valid() {
            if let Some(queue) = self.queue_of(event.recipient.id) {
                queue.push(event);
                return;
            }
        }
        self.engine.push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{ControlCommand, EventBody};
    use volition_core::AgentHandle;

    fn control_event(recipient: AgentHandle) -> Event {
        Event::new(
            AgentHandle::default(),
            recipient,
            EventBody::Control {
                command: ControlCommand::Start,
            },
        )
    }

    #[test]
    fn test_drain_is_fifo_and_bounded() {
        let mut queue = EventQueue::new();
        let handle = queue.handle();
        for _ in 0..5 {
            handle.push(control_event(AgentHandle::default()));
        }
        assert_eq!(queue.drain(3).len(), 3);
        assert_eq!(queue.drain(16).len(), 2);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_route_falls_back_to_engine() {
        let mut engine_queue = EventQueue::new();
        let router = Router::new(engine_queue.handle());

        let mut agent_queue = EventQueue::new();
        let agent = AgentHandle::new("bob", UniqueId::random());
        router.register(agent.id, agent_queue.handle());

        router.route(control_event(agent.clone()));
        assert!(agent_queue.try_pop().is_some());

        let stranger = AgentHandle::new("ghost", UniqueId::random());
        router.route(control_event(stranger));
        assert!(engine_queue.try_pop().is_some());
        assert!(agent_queue.try_pop().is_none());
    }

    #[test]
    fn test_producers_push_from_other_threads() {
        let mut queue = EventQueue::new();
        let handle = queue.handle();
        let worker = std::thread::spawn(move || {
            for _ in 0..10 {
                handle.push(control_event(AgentHandle::default()));
            }
        });
        worker.join().unwrap();
        assert_eq!(queue.drain(64).len(), 10);
    }
}
