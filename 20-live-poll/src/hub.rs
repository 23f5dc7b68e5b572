//! The hub: one task that owns every live connection.
//!
//! Connections never touch each other or the connection set directly. They
//! push events (join, leave, inbound message) into the hub's inbox, and the
//! tally store pushes its open/close transitions into the same inbox. The hub
//! handles one event at a time, so all joins, leaves, votes and broadcasts
//! are totally ordered and the connection map needs no lock.

use std::{collections::HashMap, fmt, sync::Arc};

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::{
    message::{Envelope, MessageKind},
    tally::{TallyStore, VoteError, VoteStatus},
};

/// Opaque identity assigned to each connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    pub fn generate() -> Self {
        Self(nanoid::nanoid!())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The hub's side of a connection: its id and the sending half of its
/// outbound queue. Dropping the handle closes the queue, which tells the
/// connection's send path to shut down.
#[derive(Debug)]
pub struct ClientHandle {
    id: ClientId,
    outbound: mpsc::UnboundedSender<String>,
}

impl ClientHandle {
    /// Creates a handle with a fresh id, returning the receiving half of its
    /// outbound queue. Items are already-encoded JSON text.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: ClientId::generate(),
            outbound,
        };
        (handle, rx)
    }

    pub fn id(&self) -> &ClientId {
        &self.id
    }

    fn send(&self, encoded: String) {
        if self.outbound.send(encoded).is_err() {
            debug!(client_id = %self.id, "outbound queue already closed");
        }
    }
}

enum HubEvent {
    Register(ClientHandle),
    Deregister(ClientId),
    Inbound {
        source: ClientId,
        message: Envelope,
    },
    StatusChanged(bool),
    ConnectionCount {
        respond_to: oneshot::Sender<usize>,
    },
}

/// Cloneable handle for talking to the running hub.
#[derive(Clone)]
pub struct HubHandle {
    events: mpsc::UnboundedSender<HubEvent>,
}

impl HubHandle {
    pub fn register(&self, client: ClientHandle) -> Result<()> {
        self.send(HubEvent::Register(client))
    }

    /// Removes a connection. Unknown ids are ignored.
    pub fn deregister(&self, id: ClientId) -> Result<()> {
        self.send(HubEvent::Deregister(id))
    }

    /// Hands a decoded client message to the hub for handling.
    pub fn dispatch(&self, source: ClientId, message: Envelope) -> Result<()> {
        self.send(HubEvent::Inbound { source, message })
    }

    pub async fn connection_count(&self) -> Result<usize> {
        let (respond_to, response) = oneshot::channel();
        self.send(HubEvent::ConnectionCount { respond_to })?;
        response.await.context("hub dropped connection count request")
    }

    fn send(&self, event: HubEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| anyhow::anyhow!("hub is not running"))
    }
}

/// Starts the hub on the current Tokio runtime and subscribes it to the
/// store's open/close transitions.
///
/// The hub stops once every [`HubHandle`] has been dropped.
pub fn spawn(tally: Arc<TallyStore>) -> HubHandle {
    let (events, inbox) = mpsc::unbounded_channel();

    // A weak sender keeps the store from holding the hub alive on its own.
    let notifier = events.downgrade();
    tally.set_change_notifier(move |open| {
        if let Some(events) = notifier.upgrade() {
            let _ = events.send(HubEvent::StatusChanged(open));
        }
    });

    let hub = Hub {
        tally,
        clients: HashMap::new(),
        inbox,
    };
    tokio::spawn(hub.run());

    HubHandle { events }
}

struct Hub {
    tally: Arc<TallyStore>,
    clients: HashMap<ClientId, ClientHandle>,
    inbox: mpsc::UnboundedReceiver<HubEvent>,
}

impl Hub {
    async fn run(mut self) {
        info!("starting hub");
        while let Some(event) = self.inbox.recv().await {
            self.handle_event(event);
        }
        info!("hub stopped");
    }

    fn handle_event(&mut self, event: HubEvent) {
        match event {
            HubEvent::Register(client) => self.register(client),
            HubEvent::Deregister(id) => self.deregister(&id),
            HubEvent::Inbound { source, message } => self.handle_message(&source, &message),
            HubEvent::StatusChanged(open) => self.broadcast_status_change(open),
            HubEvent::ConnectionCount { respond_to } => {
                let _ = respond_to.send(self.clients.len());
            }
        }
    }

    fn register(&mut self, client: ClientHandle) {
        let id = client.id().clone();
        let Some(welcome) = encode(&Envelope::connect_success(id.as_str())) else {
            return;
        };
        client.send(welcome);
        self.clients.insert(id.clone(), client);
        info!(client_id = %id, num_clients = self.clients.len(), "registering client");
    }

    fn deregister(&mut self, id: &ClientId) {
        // Dropping the handle closes the outbound queue.
        if self.clients.remove(id).is_some() {
            info!(client_id = %id, num_clients = self.clients.len(), "deregistering client");
        }
    }

    fn broadcast_status_change(&self, open: bool) {
        let Some(encoded) = encode(&Envelope::vote_status_change(open)) else {
            return;
        };
        debug!(new_status = open, num_clients = self.clients.len(), "broadcasting vote status");
        for client in self.clients.values() {
            client.send(encoded.clone());
        }
    }

    fn handle_message(&self, source: &ClientId, message: &Envelope) {
        trace!(message_kind = %message.kind, client_id = %source, "message received");

        match message.message_kind() {
            Some(MessageKind::Vote) => self.handle_vote(source, message),
            Some(MessageKind::QueryVoteStatus) => self.handle_query_vote_status(source, message),
            _ => warn!(kind = %message.kind, client_id = %source, "invalid message kind"),
        }
    }

    fn handle_vote(&self, source: &ClientId, message: &Envelope) {
        let Some(vote) = message.str_field("vote") else {
            warn!(client_id = %source, "no vote found");
            return;
        };
        let Some(vote_key) = message.str_field("vote_key") else {
            warn!(client_id = %source, "no vote key found");
            return;
        };

        // A repeated key is acknowledged like a fresh vote; clients cannot
        // tell the two apart.
        let reply = match self.tally.submit_vote(vote, vote_key) {
            Ok(_) | Err(VoteError::AlreadyVoted) => Envelope::vote_success(),
            Err(VoteError::VoteClosed) => Envelope::vote_status(VoteStatus::VotesClosed),
            Err(VoteError::InvalidVote) => {
                warn!(client_id = %source, vote_key, vote, "invalid vote");
                return;
            }
        };
        self.reply(source, &reply);
    }

    fn handle_query_vote_status(&self, source: &ClientId, message: &Envelope) {
        let Some(vote_key) = message.str_field("vote_key") else {
            return;
        };
        let status = self.tally.vote_status(vote_key);
        self.reply(source, &Envelope::vote_status(status));
    }

    fn reply(&self, target: &ClientId, message: &Envelope) {
        let Some(client) = self.clients.get(target) else {
            debug!(client_id = %target, kind = %message.kind, "dropping reply to departed client");
            return;
        };
        if let Some(encoded) = encode(message) {
            client.send(encoded);
        }
    }
}

fn encode(message: &Envelope) -> Option<String> {
    match message.encode() {
        Ok(encoded) => Some(encoded),
        Err(err) => {
            error!(error = ?err, kind = %message.kind, "failed to encode message");
            None
        }
    }
}
