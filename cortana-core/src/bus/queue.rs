//! Async message queue implementation

use super::events::{InboundMessage, OutboundEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

type OutboundCallback = Arc<
    dyn Fn(OutboundEvent) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        + Send
        + Sync,
>;

type Subscribers = Arc<RwLock<HashMap<String, Vec<OutboundCallback>>>>;

/// (channel, chat_id)
type ChatKey = (String, String);

/// How long a chat worker waits for its next event before exiting
const CHAT_WORKER_IDLE: std::time::Duration = std::time::Duration::from_secs(60);

/// Async message bus that decouples chat channels from the router
///
/// Channels push messages to the inbound queue; the router handles them and
/// pushes typing indicators and replies to the outbound queue. Both queues
/// are unbounded.
#[derive(Clone)]
pub struct MessageBus {
    inbound_tx: mpsc::UnboundedSender<InboundMessage>,
    inbound_rx: Arc<RwLock<Option<mpsc::UnboundedReceiver<InboundMessage>>>>,
    outbound_tx: mpsc::UnboundedSender<OutboundEvent>,
    outbound_rx: Arc<RwLock<Option<mpsc::UnboundedReceiver<OutboundEvent>>>>,
    /// Outbound subscribers by channel
    subscribers: Subscribers,
    running: Arc<RwLock<bool>>,
}

impl MessageBus {
    /// Create a new message bus
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        Self {
            inbound_tx,
            inbound_rx: Arc::new(RwLock::new(Some(inbound_rx))),
            outbound_tx,
            outbound_rx: Arc::new(RwLock::new(Some(outbound_rx))),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Take the inbound receiver (can only be called once)
    pub async fn take_inbound_receiver(&self) -> Option<mpsc::UnboundedReceiver<InboundMessage>> {
        self.inbound_rx.write().await.take()
    }

    /// Take the outbound receiver (can only be called once)
    pub async fn take_outbound_receiver(&self) -> Option<mpsc::UnboundedReceiver<OutboundEvent>> {
        self.outbound_rx.write().await.take()
    }

    /// Sender handle channels use to publish inbound messages
    pub fn inbound_sender(&self) -> mpsc::UnboundedSender<InboundMessage> {
        self.inbound_tx.clone()
    }

    /// Publish a message from a channel to the router
    pub fn publish_inbound(&self, msg: InboundMessage) -> crate::Result<()> {
        self.inbound_tx
            .send(msg)
            .map_err(|_| crate::Error::Channel("Inbound channel closed".to_string()))
    }

    /// Publish a typing indicator or reply to channels
    pub fn publish_outbound(&self, event: impl Into<OutboundEvent>) -> crate::Result<()> {
        self.outbound_tx
            .send(event.into())
            .map_err(|_| crate::Error::Channel("Outbound channel closed".to_string()))
    }

    /// Subscribe to outbound events for a specific channel with a callback
    pub async fn subscribe_outbound<F, Fut>(&self, channel: impl Into<String>, callback: F)
    where
        F: Fn(OutboundEvent) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let channel = channel.into();
        let wrapped: OutboundCallback = Arc::new(move |event| Box::pin(callback(event)));

        let mut subscribers = self.subscribers.write().await;
        subscribers.entry(channel).or_default().push(wrapped);
    }

    /// Dispatch outbound events to subscribed channels
    ///
    /// Run this as a background task. Each chat gets its own delivery
    /// worker, so events for one chat arrive in publish order while a slow
    /// delivery in one chat does not hold up the others.
    pub async fn dispatch_outbound_loop(&self) {
        let Some(mut outbound_rx) = self.take_outbound_receiver().await else {
            debug!("Outbound receiver already taken");
            return;
        };

        *self.running.write().await = true;
        debug!("Starting outbound dispatcher");

        let mut workers: HashMap<ChatKey, mpsc::UnboundedSender<OutboundEvent>> = HashMap::new();

        while *self.running.read().await {
            tokio::select! {
                Some(event) = outbound_rx.recv() => {
                    self.route_to_worker(&mut workers, event);
                }
                _ = tokio::time::sleep(tokio::time::Duration::from_millis(100)) => {
                    continue;
                }
            }
        }

        debug!("Outbound dispatcher stopped");
    }

    /// Queue an event on its chat's worker, restarting the worker if it went idle
    fn route_to_worker(
        &self,
        workers: &mut HashMap<ChatKey, mpsc::UnboundedSender<OutboundEvent>>,
        event: OutboundEvent,
    ) {
        let key = (event.channel().to_string(), event.chat_id().to_string());

        let event = match workers.get(&key) {
            Some(tx) => match tx.send(event) {
                Ok(()) => return,
                Err(mpsc::error::SendError(event)) => event,
            },
            None => event,
        };

        let tx = spawn_chat_worker(Arc::clone(&self.subscribers));
        if tx.send(event).is_err() {
            debug!("Chat worker for {}:{} exited early", key.0, key.1);
        }
        workers.insert(key, tx);
    }

    /// Stop the dispatcher loop
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    /// Check if the dispatcher is running
    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

/// Deliver one event to every subscriber of its channel
async fn deliver(subscribers: &Subscribers, event: OutboundEvent) {
    // Clone the callbacks so the lock is not held across delivery
    let callbacks = subscribers.read().await.get(event.channel()).cloned();
    match callbacks {
        Some(callbacks) => {
            for callback in callbacks {
                callback(event.clone()).await;
            }
        }
        None => debug!("No subscribers for channel: {}", event.channel()),
    }
}

/// Ordered delivery for one chat; exits after sitting idle
fn spawn_chat_worker(subscribers: Subscribers) -> mpsc::UnboundedSender<OutboundEvent> {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundEvent>();

    tokio::spawn(async move {
        loop {
            match tokio::time::timeout(CHAT_WORKER_IDLE, rx.recv()).await {
                Ok(Some(event)) => deliver(&subscribers, event).await,
                Ok(None) => break,
                Err(_) => {
                    // Refuse new events, then finish what was already queued
                    rx.close();
                    while let Ok(event) = rx.try_recv() {
                        deliver(&subscribers, event).await;
                    }
                    break;
                }
            }
        }
    });

    tx
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::events::{Author, OutboundMessage};
    use tokio::time::{timeout, Duration};

    fn inbound() -> InboundMessage {
        InboundMessage::new(
            "discord",
            "m1",
            "chat1",
            Author {
                id: "1".to_string(),
                name: "ana".to_string(),
                is_bot: false,
            },
            "Hello",
        )
    }

    #[tokio::test]
    async fn test_message_bus_creation() {
        let bus = MessageBus::new();
        assert!(!bus.is_running().await);
    }

    #[tokio::test]
    async fn test_publish_inbound() {
        let bus = MessageBus::new();
        let mut inbound_rx = bus.take_inbound_receiver().await.unwrap();

        bus.publish_inbound(inbound()).unwrap();

        let received = inbound_rx.try_recv().unwrap();
        assert_eq!(received.content, "Hello");
        assert!(bus.take_inbound_receiver().await.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_reaches_subscriber() {
        let bus = MessageBus::new();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        bus.subscribe_outbound("discord", move |event| {
            let seen_tx = seen_tx.clone();
            async move {
                let _ = seen_tx.send(event);
            }
        })
        .await;

        let dispatcher = bus.clone();
        let handle = tokio::spawn(async move { dispatcher.dispatch_outbound_loop().await });

        bus.publish_outbound(OutboundEvent::typing_for(&inbound())).unwrap();
        bus.publish_outbound(OutboundMessage::new("discord", "chat1", "hi")).unwrap();

        let first = timeout(Duration::from_secs(2), seen_rx.recv()).await.unwrap().unwrap();
        let second = timeout(Duration::from_secs(2), seen_rx.recv()).await.unwrap().unwrap();
        assert!(matches!(first, OutboundEvent::Typing { .. }));
        assert!(matches!(second, OutboundEvent::Message(ref m) if m.content == "hi"));

        bus.stop().await;
        timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_slow_chat_does_not_block_other_chats() {
        let bus = MessageBus::new();
        let release = Arc::new(tokio::sync::Notify::new());
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

        let gate = Arc::clone(&release);
        bus.subscribe_outbound("discord", move |event| {
            let gate = Arc::clone(&gate);
            let seen_tx = seen_tx.clone();
            async move {
                if let OutboundEvent::Message(msg) = &event {
                    if msg.content == "slow" {
                        gate.notified().await;
                    }
                    let _ = seen_tx.send(format!("{}:{}", msg.chat_id, msg.content));
                }
            }
        })
        .await;

        let dispatcher = bus.clone();
        let handle = tokio::spawn(async move { dispatcher.dispatch_outbound_loop().await });

        bus.publish_outbound(OutboundMessage::new("discord", "chatA", "slow")).unwrap();
        bus.publish_outbound(OutboundMessage::new("discord", "chatA", "after")).unwrap();
        bus.publish_outbound(OutboundMessage::new("discord", "chatB", "fast")).unwrap();

        let first = timeout(Duration::from_secs(2), seen_rx.recv()).await.unwrap().unwrap();
        assert_eq!(first, "chatB:fast");

        release.notify_one();
        let second = timeout(Duration::from_secs(2), seen_rx.recv()).await.unwrap().unwrap();
        let third = timeout(Duration::from_secs(2), seen_rx.recv()).await.unwrap().unwrap();
        assert_eq!(second, "chatA:slow");
        assert_eq!(third, "chatA:after");

        bus.stop().await;
        timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }
}
