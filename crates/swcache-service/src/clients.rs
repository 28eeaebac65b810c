//! The registry of open client views.
//!
//! The worker never owns a client view. It only keeps the sending half of each view's message
//! channel, plus which generation controls the view. A view unregisters itself when its
//! [`ClientView`] is dropped.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::control::ControlMessage;
use crate::lifecycle::GenerationId;

/// Failure to deliver a message to a client view.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotificationError {
    #[error("client view {0} is closed")]
    Closed(Uuid),
}

#[derive(Debug)]
struct ClientEntry {
    sender: mpsc::UnboundedSender<ControlMessage>,
    controller: Option<GenerationId>,
}

type Registry = Mutex<BTreeMap<Uuid, ClientEntry>>;

/// All client views currently open.
#[derive(Debug, Clone, Default)]
pub struct Clients {
    registry: Arc<Registry>,
}

impl Clients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new client view, controlled by `controller` if given.
    pub fn open(&self, controller: Option<GenerationId>) -> ClientView {
        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::unbounded_channel();
        self.registry
            .lock()
            .unwrap()
            .insert(id, ClientEntry { sender, controller });

        tracing::debug!(client = %id, ?controller, "Client view opened");
        ClientView {
            id,
            receiver,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Makes `generation` the controller of every open client view.
    ///
    /// Returns the number of views whose controller changed.
    pub fn claim(&self, generation: GenerationId) -> usize {
        let mut registry = self.registry.lock().unwrap();
        let mut claimed = 0;
        for entry in registry.values_mut() {
            if entry.controller != Some(generation) {
                entry.controller = Some(generation);
                claimed += 1;
            }
        }
        claimed
    }

    /// Returns handles to the views controlled by `generation`, and with `include_uncontrolled`
    /// to every other open view as well.
    pub fn match_all(
        &self,
        generation: GenerationId,
        include_uncontrolled: bool,
    ) -> Vec<ClientHandle> {
        let registry = self.registry.lock().unwrap();
        registry
            .iter()
            .filter(|(_, entry)| include_uncontrolled || entry.controller == Some(generation))
            .map(|(id, entry)| ClientHandle {
                id: *id,
                sender: entry.sender.clone(),
            })
            .collect()
    }

    /// The number of open views controlled by `generation`.
    pub fn controlled_by(&self, generation: GenerationId) -> usize {
        let registry = self.registry.lock().unwrap();
        registry
            .values()
            .filter(|entry| entry.controller == Some(generation))
            .count()
    }

    /// The number of open views.
    pub fn len(&self) -> usize {
        self.registry.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A handle for sending messages to one client view.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    id: Uuid,
    sender: mpsc::UnboundedSender<ControlMessage>,
}

impl ClientHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queues `message` for the view without waiting for it to be read.
    pub fn post_message(&self, message: ControlMessage) -> Result<(), NotificationError> {
        self.sender
            .send(message)
            .map_err(|_| NotificationError::Closed(self.id))
    }
}

/// The receiving end of an open client view.
#[derive(Debug)]
pub struct ClientView {
    id: Uuid,
    receiver: mpsc::UnboundedReceiver<ControlMessage>,
    registry: Weak<Registry>,
}

impl ClientView {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The generation currently controlling this view.
    pub fn controller(&self) -> Option<GenerationId> {
        let registry = self.registry.upgrade()?;
        let registry = registry.lock().unwrap();
        registry.get(&self.id)?.controller
    }

    /// Waits for the next message sent to this view.
    ///
    /// Returns `None` once the worker is gone.
    pub async fn recv(&mut self) -> Option<ControlMessage> {
        self.receiver.recv().await
    }

    /// Returns the next message if one is queued.
    pub fn try_recv(&mut self) -> Option<ControlMessage> {
        self.receiver.try_recv().ok()
    }

    /// Closes the receiving end while keeping the view registered.
    ///
    /// Messages sent afterwards fail with [`NotificationError::Closed`].
    pub fn close(&mut self) {
        self.receiver.close();
    }
}

impl Drop for ClientView {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().unwrap().remove(&self.id);
            tracing::debug!(client = %self.id, "Client view closed");
        }
    }
}
