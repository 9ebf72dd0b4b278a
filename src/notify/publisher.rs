//! Topic-based fan-out with per-topic sequence numbers
//!
//! Every published message gets the next sequence number of its topic,
//! whether or not anyone is listening. Subscribers each own a bounded queue;
//! publishing never waits on them. A subscriber whose queue is full is
//! disconnected, which the subscriber notices as a closed channel.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use crate::constants::{TOPIC_BLOCK_ATTACH, TOPIC_BLOCK_DETACH, TOPIC_PENDING_MOVE};

/// Topic families of the game interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    BlockAttach,
    BlockDetach,
    PendingMove,
}

impl TopicKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            TopicKind::BlockAttach => TOPIC_BLOCK_ATTACH,
            TopicKind::BlockDetach => TOPIC_BLOCK_DETACH,
            TopicKind::PendingMove => TOPIC_PENDING_MOVE,
        }
    }

    /// Full topic string for one game
    pub fn topic(&self, game: &str) -> String {
        format!("{} json {}", self.prefix(), game)
    }
}

/// A message as handed to subscribers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub topic: String,
    pub body: String,
    pub sequence: u32,
}

impl Notification {
    /// The three wire parts: topic, JSON body, little-endian sequence
    pub fn frames(&self) -> [Vec<u8>; 3] {
        [
            self.topic.as_bytes().to_vec(),
            self.body.as_bytes().to_vec(),
            self.sequence.to_le_bytes().to_vec(),
        ]
    }
}

struct Subscriber {
    id: u64,
    topics: Arc<RwLock<HashSet<String>>>,
    sender: mpsc::Sender<Arc<Notification>>,
}

/// Receiving end of a subscription
pub struct Subscription {
    id: u64,
    topics: Arc<RwLock<HashSet<String>>>,
    receiver: mpsc::Receiver<Arc<Notification>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn subscribe(&self, topic: impl Into<String>) {
        self.topics.write().insert(topic.into());
    }

    pub fn unsubscribe(&self, topic: &str) {
        self.topics.write().remove(topic);
    }

    pub async fn recv(&mut self) -> Option<Arc<Notification>> {
        self.receiver.recv().await
    }

    /// Next queued message without waiting
    pub fn try_recv(&mut self) -> Option<Arc<Notification>> {
        self.receiver.try_recv().ok()
    }

    /// Drain everything queued so far
    pub fn drain(&mut self) -> Vec<Arc<Notification>> {
        let mut out = Vec::new();
        while let Some(n) = self.try_recv() {
            out.push(n);
        }
        out
    }
}

/// One publishing endpoint
pub struct Publisher {
    name: String,
    queue_capacity: usize,
    sequences: Mutex<HashMap<String, u32>>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Publisher {
    pub fn new(name: impl Into<String>, queue_capacity: usize) -> Self {
        Self {
            name: name.into(),
            queue_capacity: queue_capacity.max(1),
            sequences: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// New subscriber, initially listening to `topics`
    pub fn subscribe<I, S>(&self, topics: I) -> Subscription
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let topics = Arc::new(RwLock::new(topics.into_iter().map(Into::into).collect()));

        self.subscribers.lock().push(Subscriber {
            id,
            topics: Arc::clone(&topics),
            sender,
        });
        debug!(publisher = %self.name, subscriber = id, "subscriber added");

        Subscription { id, topics, receiver }
    }

    /// Assign the next sequence number of `topic` and fan out
    pub fn publish(&self, topic: String, body: String) -> Arc<Notification> {
        let sequence = {
            let mut sequences = self.sequences.lock();
            let counter = sequences.entry(topic.clone()).or_insert(0);
            let current = *counter;
            *counter = counter.wrapping_add(1);
            current
        };

        let notification = Arc::new(Notification { topic, body, sequence });

        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|sub| {
            if !sub.topics.read().contains(&notification.topic) {
                return !sub.sender.is_closed();
            }
            match sub.sender.try_send(Arc::clone(&notification)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        publisher = %self.name,
                        subscriber = sub.id,
                        topic = %notification.topic,
                        "subscriber queue full, disconnecting"
                    );
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(publisher = %self.name, subscriber = sub.id, "subscriber gone");
                    false
                }
            }
        });

        notification
    }
}
