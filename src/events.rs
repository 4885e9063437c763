use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
};

use anyhow::{anyhow, Result};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::data_model::Event;

pub const DEFAULT_MAX_SUBSCRIBERS: usize = 1024;
pub const DEFAULT_QUEUE_SIZE: usize = 1024;

/// The only way controllers publish domain events.
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: Event);
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    senders: HashMap<u64, mpsc::Sender<Event>>,
    closed: bool,
}

/// Fans events out to a bounded set of subscribers, each with a bounded
/// queue. A subscriber whose queue is full is dropped instead of slowing
/// the emitter down.
pub struct EventHub {
    subscribers: Arc<Mutex<Subscribers>>,
    max_subscribers: usize,
    queue_size: usize,
}

impl EventHub {
    pub fn new(max_subscribers: usize, queue_size: usize) -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
            max_subscribers,
            queue_size: queue_size.max(1),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Subscribers> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn subscribe(&self) -> Result<Subscription> {
        let mut subscribers = self.lock();
        if subscribers.closed {
            return Err(anyhow!("event hub is closed"));
        }
        if subscribers.senders.len() >= self.max_subscribers {
            return Err(anyhow!(
                "event hub is full, max subscribers: {}",
                self.max_subscribers
            ));
        }
        let (tx, rx) = mpsc::channel(self.queue_size);
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.senders.insert(id, tx);
        debug!(subscription_id = id, "event subscriber added");
        Ok(Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.subscribers),
        })
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().senders.len()
    }

    /// Ends every subscription and rejects new ones.
    pub fn close(&self) {
        let mut subscribers = self.lock();
        subscribers.closed = true;
        subscribers.senders.clear();
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SUBSCRIBERS, DEFAULT_QUEUE_SIZE)
    }
}

impl EventEmitter for EventHub {
    fn emit(&self, event: Event) {
        let mut subscribers = self.lock();
        subscribers.senders.retain(|id, tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    subscription_id = id,
                    event_type = event.event_type(),
                    "dropping lagging event subscriber"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }
}

pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<Event>,
    hub: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    /// Next event, or `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    pub fn close(&mut self) {
        self.rx.close();
        self.unsubscribe();
    }

    fn unsubscribe(&self) {
        if let Some(hub) = self.hub.upgrade() {
            let mut subscribers = hub.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            subscribers.senders.remove(&self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
