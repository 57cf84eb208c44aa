//! Session relay
//!
//! Routes messages produced anywhere in the process to the single outbound
//! stream of a session and tracks who owns each session. One relay instance
//! is shared by the whole process; every map lives behind one lock.

mod message;

pub use message::{MessageType, StreamMessage};

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// How long a non-partial message waits for channel space before it is dropped
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("session already open: {0}")]
    AlreadyOpen(String),
    #[error("outbound stream disconnected")]
    Disconnected,
}

/// Destination the forwarding task drains into
#[async_trait]
pub trait OutboundSink: Send + Sync + 'static {
    async fn deliver(&self, message: StreamMessage) -> Result<(), RelayError>;
}

#[async_trait]
impl OutboundSink for mpsc::Sender<StreamMessage> {
    async fn deliver(&self, message: StreamMessage) -> Result<(), RelayError> {
        self.send(message)
            .await
            .map_err(|_| RelayError::Disconnected)
    }
}

/// What happened to a message handed to the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Channel full (or blocked past the timeout); message discarded
    Dropped,
    /// Session not open; nothing happened
    NoSession,
}

/// Result of checking a per-session tool guard
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolClaim {
    /// First invocation; the caller performs the side effect
    First,
    /// Already done in this session
    Repeat,
    SessionClosed,
}

struct SessionEntry {
    sender: mpsc::Sender<StreamMessage>,
    owner: String,
    created_at: Instant,
    last_activity: Instant,
    claimed_tools: HashSet<String>,
    turn_lock: Arc<tokio::sync::Mutex<()>>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct RelayInner {
    sessions: HashMap<String, SessionEntry>,
    reserved: HashSet<String>,
}

pub struct SessionRelay {
    inner: Mutex<RelayInner>,
    capacity: usize,
    send_timeout: Duration,
}

impl SessionRelay {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RelayInner::default()),
            capacity: capacity.max(1),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = timeout;
        self
    }

    // Every operation leaves the maps consistent, so a poisoned lock is safe to reuse
    fn lock(&self) -> MutexGuard<'_, RelayInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a session id that is neither open nor reserved.
    ///
    /// The check and the insert happen under the same lock, so concurrent
    /// callers can never receive the same id.
    pub fn reserve_id(&self) -> String {
        let mut inner = self.lock();
        loop {
            let id = uuid::Uuid::new_v4().to_string();
            if !inner.sessions.contains_key(&id) && inner.reserved.insert(id.clone()) {
                return id;
            }
            tracing::warn!(session_id = %id, "Session id collision, regenerating");
        }
    }

    /// Give back a reservation that will never be opened
    pub fn release(&self, session_id: &str) {
        self.lock().reserved.remove(session_id);
    }

    /// Register the outbound stream for a session and start its forwarder.
    pub fn open<S: OutboundSink>(
        &self,
        session_id: &str,
        sink: S,
        owner: &str,
    ) -> Result<(), RelayError> {
        let (sender, mut receiver) = mpsc::channel::<StreamMessage>(self.capacity);
        {
            let mut inner = self.lock();
            if inner.sessions.contains_key(session_id) {
                return Err(RelayError::AlreadyOpen(session_id.to_string()));
            }
            inner.reserved.remove(session_id);
            let now = Instant::now();
            inner.sessions.insert(
                session_id.to_string(),
                SessionEntry {
                    sender,
                    owner: owner.to_string(),
                    created_at: now,
                    last_activity: now,
                    claimed_tools: HashSet::new(),
                    turn_lock: Arc::new(tokio::sync::Mutex::new(())),
                    cancel: CancellationToken::new(),
                },
            );
        }

        let id = session_id.to_string();
        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                if let Err(e) = sink.deliver(message).await {
                    tracing::debug!(session_id = %id, error = %e, "Outbound stream gone, forwarder stopping");
                    break;
                }
            }
            tracing::debug!(session_id = %id, "Forwarder exited");
        });

        tracing::info!(session_id = %session_id, owner = %owner, "Session opened");
        Ok(())
    }

    fn sender_for(&self, session_id: &str) -> Option<mpsc::Sender<StreamMessage>> {
        let mut inner = self.lock();
        let entry = inner.sessions.get_mut(session_id)?;
        entry.last_activity = Instant::now();
        Some(entry.sender.clone())
    }

    /// Enqueue a message, waiting up to the send timeout for space.
    ///
    /// Unknown or closed sessions are a silent no-op.
    pub async fn send(&self, message: StreamMessage) -> Delivery {
        let Some(sender) = self.sender_for(&message.session_id) else {
            return Delivery::NoSession;
        };
        let session_id = message.session_id.clone();
        let message_type = message.message_type;

        match sender.send_timeout(message, self.send_timeout).await {
            Ok(()) => Delivery::Queued,
            Err(SendTimeoutError::Timeout(_)) => {
                tracing::warn!(
                    session_id = %session_id,
                    message_type = message_type.as_str(),
                    "Relay channel full past timeout, dropping message"
                );
                Delivery::Dropped
            }
            Err(SendTimeoutError::Closed(_)) => Delivery::NoSession,
        }
    }

    /// Enqueue without waiting; used for partial tokens, which are
    /// disposable when the client falls behind.
    pub fn offer(&self, message: StreamMessage) -> Delivery {
        let Some(sender) = self.sender_for(&message.session_id) else {
            return Delivery::NoSession;
        };
        match sender.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(dropped)) => {
                tracing::debug!(session_id = %dropped.session_id, "Relay channel full, dropping partial");
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::NoSession,
        }
    }

    pub fn is_open(&self, session_id: &str) -> bool {
        self.lock().sessions.contains_key(session_id)
    }

    /// True only while the session is open and was opened for `user_id`
    pub fn is_owner(&self, session_id: &str, user_id: &str) -> bool {
        self.lock()
            .sessions
            .get(session_id)
            .is_some_and(|entry| entry.owner == user_id)
    }

    /// Check and set the per-session guard for a tool name
    pub fn claim_tool(&self, session_id: &str, tool: &str) -> ToolClaim {
        let mut inner = self.lock();
        match inner.sessions.get_mut(session_id) {
            None => ToolClaim::SessionClosed,
            Some(entry) => {
                if entry.claimed_tools.insert(tool.to_string()) {
                    ToolClaim::First
                } else {
                    ToolClaim::Repeat
                }
            }
        }
    }

    /// Lock serializing turns of one session
    pub fn turn_lock(&self, session_id: &str) -> Option<Arc<tokio::sync::Mutex<()>>> {
        self.lock()
            .sessions
            .get(session_id)
            .map(|entry| Arc::clone(&entry.turn_lock))
    }

    /// Token cancelled when the session closes
    pub fn cancellation(&self, session_id: &str) -> Option<CancellationToken> {
        self.lock()
            .sessions
            .get(session_id)
            .map(|entry| entry.cancel.clone())
    }

    pub fn touch(&self, session_id: &str) {
        if let Some(entry) = self.lock().sessions.get_mut(session_id) {
            entry.last_activity = Instant::now();
        }
    }

    /// Close a session. Idempotent; unknown ids are ignored.
    ///
    /// Dropping the entry drops the relay's sender, so the forwarder drains
    /// whatever is queued and exits.
    pub fn close(&self, session_id: &str) -> bool {
        let removed = self.lock().sessions.remove(session_id);
        match removed {
            Some(entry) => {
                entry.cancel.cancel();
                tracing::info!(
                    session_id = %session_id,
                    lifetime_secs = entry.created_at.elapsed().as_secs(),
                    "Session closed"
                );
                true
            }
            None => false,
        }
    }

    /// Sessions with no activity for at least `max_idle`
    pub fn idle_sessions(&self, max_idle: Duration) -> Vec<String> {
        let now = Instant::now();
        self.lock()
            .sessions
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_activity) >= max_idle)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn open_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Ids handed out by `reserve_id` and not yet opened or released
    pub fn reserved_count(&self) -> usize {
        self.lock().reserved.len()
    }
}
