//! Conversation orchestrator
//!
//! Drives the turn state machine against the real collaborators: the model,
//! the relay, the history store and the tool registry. Each `advance` holds
//! the session's turn lock for its whole load-append-persist chain, so
//! concurrent sends to one session run one after another.

mod sniff;

use sniff::PartialFilter;

use crate::history::{HistoryError, SecureHistoryStore};
use crate::llm::{LlmError, LlmResponse, LlmService};
use crate::relay::{MessageType, OutboundSink, RelayError, SessionRelay, StreamMessage};
use crate::state_machine::{transition, Effect, Event, TransitionError, TurnContext, TurnState};
use crate::system_prompt::build_system_prompt;
use crate::tools::{DispatchError, ToolContext, ToolRegistry};
use crate::transcript::{Role, ToolCall, Transcript};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Model error: {0}")]
    Llm(#[from] LlmError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Relay(#[from] RelayError),
    #[error("Turn cancelled: session closed")]
    Cancelled,
    #[error("Model kept calling tools past {0} continuations")]
    ContinuationLimit(u32),
    #[error("Invalid turn: {0}")]
    InvalidTurn(String),
}

impl From<TransitionError> for ConversationError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::ContinuationLimit { limit } => Self::ContinuationLimit(limit),
            TransitionError::SessionClosed => Self::Cancelled,
            TransitionError::InvalidTransition(msg) => Self::InvalidTurn(msg),
        }
    }
}

/// Sent on the stream when a turn fails upstream; the user's message can be resent
pub const TURN_FAILED_NOTICE: &str =
    "Sorry, I couldn't process that just now. Could you send it again?";

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_continuations: u32,
    pub idle_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_continuations: 6,
            idle_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Outcome of `start`
#[derive(Debug)]
pub struct Started {
    pub session_id: String,
    pub correlation_id: String,
    pub message: String,
    reservation: Reservation,
}

/// A reserved session id not yet attached to a stream.
///
/// Dropping it while armed releases the id and deletes whatever history the
/// opening turn persisted, so an abandoned start leaves nothing behind.
struct Reservation {
    relay: Arc<SessionRelay>,
    history: Arc<SecureHistoryStore>,
    session_id: String,
    armed: bool,
}

impl Reservation {
    fn new(relay: &Arc<SessionRelay>, history: &Arc<SecureHistoryStore>) -> Self {
        Self {
            session_id: relay.reserve_id(),
            relay: Arc::clone(relay),
            history: Arc::clone(history),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    /// Release now, waiting for the history delete
    async fn abandon(mut self) {
        self.armed = false;
        self.relay.release(&self.session_id);
        if let Err(e) = self.history.delete(&self.session_id).await {
            tracing::warn!(session_id = %self.session_id, error = %e, "Failed to clean up history after failed start");
        }
    }
}

impl std::fmt::Debug for Reservation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reservation")
            .field("session_id", &self.session_id)
            .field("armed", &self.armed)
            .finish_non_exhaustive()
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::info!(session_id = %self.session_id, "Start abandoned before attach, releasing session");
        self.relay.release(&self.session_id);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let history = Arc::clone(&self.history);
        let session_id = std::mem::take(&mut self.session_id);
        handle.spawn(async move {
            if let Err(e) = history.delete(&session_id).await {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to delete history of abandoned start");
            }
        });
    }
}

/// Outcome of `advance`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReply {
    pub session_id: String,
    pub correlation_id: String,
    /// Plain-text reply; `None` when the turn ended the session
    pub message: Option<String>,
    pub closed: bool,
}

pub struct ConversationEngine {
    llm: Arc<dyn LlmService>,
    relay: Arc<SessionRelay>,
    history: Arc<SecureHistoryStore>,
    tools: Arc<ToolRegistry>,
    settings: EngineSettings,
}

impl ConversationEngine {
    pub fn new(
        llm: Arc<dyn LlmService>,
        relay: Arc<SessionRelay>,
        history: Arc<SecureHistoryStore>,
        tools: Arc<ToolRegistry>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            llm,
            relay,
            history,
            tools,
            settings,
        }
    }

    pub fn relay(&self) -> &Arc<SessionRelay> {
        &self.relay
    }

    /// Allocate a session, get the opening line and persist the transcript.
    ///
    /// The caller opens the relay stream with [`Self::attach`].
    pub async fn start(&self) -> Result<Started, ConversationError> {
        let reservation = Reservation::new(&self.relay, &self.history);
        let session_id = reservation.session_id.clone();
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let ctx = TurnContext::new(&session_id, self.settings.max_continuations);
        let mut transcript = Transcript::new(build_system_prompt());

        let result = self
            .drive(&ctx, &correlation_id, &mut transcript, TurnState::Starting, Event::Begin, None)
            .await;

        match result {
            Ok((_, Some(message))) => {
                tracing::info!(session_id = %session_id, "Session started");
                Ok(Started {
                    session_id,
                    correlation_id,
                    message,
                    reservation,
                })
            }
            Ok((state, None)) => {
                tracing::error!(session_id = %session_id, state = ?state, "Opening turn produced no greeting");
                reservation.abandon().await;
                Err(ConversationError::InvalidTurn(
                    "opening turn ended without a greeting".to_string(),
                ))
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Failed to start session");
                reservation.abandon().await;
                Err(e)
            }
        }
    }

    /// Open the relay stream for a started session and deliver the opening line.
    ///
    /// On success the session is owned by the relay; on failure `started`
    /// still holds the reservation and cleans up when dropped.
    pub async fn attach<S: OutboundSink>(
        &self,
        started: &mut Started,
        sink: S,
        owner: &str,
    ) -> Result<(), ConversationError> {
        self.relay.open(&started.session_id, sink, owner)?;
        started.reservation.disarm();
        self.relay
            .send(StreamMessage::new(
                &started.session_id,
                &started.correlation_id,
                MessageType::Chat,
                &started.message,
            ))
            .await;
        Ok(())
    }

    /// Append a turn and run the model until it replies in prose, ends the
    /// session, or exceeds the continuation cap.
    pub async fn advance(
        &self,
        session_id: &str,
        text: &str,
        role: Role,
    ) -> Result<TurnReply, ConversationError> {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        self.run_turn(session_id, text, role, &correlation_id).await
    }

    async fn run_turn(
        &self,
        session_id: &str,
        text: &str,
        role: Role,
        correlation_id: &str,
    ) -> Result<TurnReply, ConversationError> {
        let not_found = || ConversationError::SessionNotFound(session_id.to_string());
        let lock = self.relay.turn_lock(session_id).ok_or_else(not_found)?;
        let _turn = lock.lock().await;
        // The session may have closed while this call waited for the lock
        let cancel = self.relay.cancellation(session_id).ok_or_else(not_found)?;
        self.relay.touch(session_id);

        let ctx = TurnContext::new(session_id, self.settings.max_continuations);
        let mut transcript = self.history.load(session_id).await?;

        let (state, message) = self
            .drive(
                &ctx,
                correlation_id,
                &mut transcript,
                TurnState::AwaitingUser,
                Event::Input {
                    role,
                    text: text.to_string(),
                },
                Some(&cancel),
            )
            .await?;

        Ok(TurnReply {
            session_id: session_id.to_string(),
            correlation_id: correlation_id.to_string(),
            message,
            closed: state == TurnState::Closed,
        })
    }

    /// Run a human turn and deliver its reply on the session stream.
    ///
    /// A failed turn is logged and reported on the stream as a chat notice;
    /// the session stays open for a retry.
    pub async fn handle_message(&self, session_id: &str, text: &str) {
        let correlation_id = uuid::Uuid::new_v4().to_string();
        let message = match self
            .run_turn(session_id, text, Role::Human, &correlation_id)
            .await
        {
            Ok(TurnReply {
                message: Some(message),
                ..
            }) => message,
            Ok(_) => return,
            Err(ConversationError::Cancelled | ConversationError::SessionNotFound(_)) => {
                tracing::debug!(session_id = %session_id, "Turn abandoned, session closed");
                return;
            }
            Err(e) => {
                tracing::error!(session_id = %session_id, correlation_id = %correlation_id, error = %e, "Failed to advance conversation");
                TURN_FAILED_NOTICE.to_string()
            }
        };

        self.relay
            .send(StreamMessage::new(
                session_id,
                correlation_id,
                MessageType::Chat,
                message,
            ))
            .await;
    }

    /// Close the relay session and drop its history. Idempotent.
    pub async fn close_session(&self, session_id: &str) {
        self.relay.close(session_id);
        if let Err(e) = self.history.delete(session_id).await {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to delete history on close");
        }
    }

    /// Close sessions idle past the timeout and purge expired history rows
    pub async fn sweep_idle(&self) -> usize {
        let idle = self.relay.idle_sessions(self.settings.idle_timeout);
        for session_id in &idle {
            tracing::info!(session_id = %session_id, "Closing idle session");
            self.close_session(session_id).await;
        }
        match self.history.purge_expired().await {
            Ok(0) => {}
            Ok(n) => tracing::debug!(purged = n, "Purged expired history records"),
            Err(e) => tracing::warn!(error = %e, "Failed to purge expired history"),
        }
        idle.len()
    }

    /// Feed events through the state machine, executing effects in order,
    /// until no further events are produced.
    async fn drive(
        &self,
        ctx: &TurnContext,
        correlation_id: &str,
        transcript: &mut Transcript,
        mut state: TurnState,
        first: Event,
        cancel: Option<&CancellationToken>,
    ) -> Result<(TurnState, Option<String>), ConversationError> {
        let mut pending = VecDeque::from([first]);
        let mut reply = None;

        while let Some(event) = pending.pop_front() {
            let result = transition(&state, ctx, event)?;
            state = result.new_state;

            for effect in result.effects {
                if cancel.is_some_and(CancellationToken::is_cancelled) {
                    return Err(ConversationError::Cancelled);
                }
                match effect {
                    Effect::AppendTurn(turn) => transcript.push(turn),
                    Effect::RequestModel { opening } => {
                        let response = self
                            .request_model(ctx, correlation_id, transcript, opening, cancel)
                            .await?;
                        pending.push_back(Event::ModelReplied {
                            text: response.text(),
                            tool_calls: tool_calls_of(&response),
                        });
                    }
                    Effect::DispatchTools(calls) => {
                        pending.push_back(self.dispatch_all(ctx, correlation_id, &calls).await?);
                    }
                    Effect::PersistTranscript => {
                        if let Err(e) = self.history.save(transcript, &ctx.session_id).await {
                            tracing::error!(session_id = %ctx.session_id, error = %e, "Failed to persist transcript");
                            return Err(e.into());
                        }
                    }
                    Effect::Continue { prompt } => {
                        tracing::debug!(session_id = %ctx.session_id, depth = state.depth(), prompt = %prompt, "Continuing without user input");
                        pending.push_back(Event::Input {
                            role: Role::System,
                            text: prompt,
                        });
                    }
                    Effect::Reply(text) => reply = Some(text),
                }
            }
        }

        Ok((state, reply))
    }

    async fn request_model(
        &self,
        ctx: &TurnContext,
        correlation_id: &str,
        transcript: &Transcript,
        opening: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<LlmResponse, ConversationError> {
        let request = transcript.to_request(self.tools.definitions());
        let relay = &self.relay;
        let mut filter = PartialFilter::new();
        let mut on_token = |chunk: &str| {
            // The opening line is sent whole once the stream is attached
            if opening {
                return;
            }
            if let Some(text) = filter.push(chunk) {
                relay.offer(StreamMessage::new(
                    &ctx.session_id,
                    correlation_id,
                    MessageType::Partial,
                    text,
                ));
            }
        };

        let call = self.llm.complete(&request, &mut on_token);
        let response = match cancel {
            Some(token) => tokio::select! {
                result = call => result?,
                () = token.cancelled() => return Err(ConversationError::Cancelled),
            },
            None => call.await?,
        };
        Ok(response)
    }

    async fn dispatch_all(
        &self,
        ctx: &TurnContext,
        correlation_id: &str,
        calls: &[ToolCall],
    ) -> Result<Event, ConversationError> {
        let tool_ctx = ToolContext::new(
            &ctx.session_id,
            correlation_id,
            Arc::clone(&self.relay),
            Arc::clone(&self.history),
        );

        let mut names = Vec::new();
        let mut terminal = false;
        for call in calls {
            let report = self.tools.dispatch(call, &tool_ctx).await.map_err(|e| {
                tracing::error!(session_id = %ctx.session_id, tool = %call.name, error = %e, "Tool dispatch failed");
                e
            })?;
            if report.executed.is_empty() {
                names.push(call.name.clone());
            }
            names.extend(report.executed.iter().map(|(name, _)| name.clone()));
            if report.terminal() {
                terminal = true;
                break;
            }
        }

        Ok(Event::ToolsDispatched { names, terminal })
    }
}

fn tool_calls_of(response: &LlmResponse) -> Vec<ToolCall> {
    response
        .tool_uses()
        .into_iter()
        .map(|(id, name, input)| ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: input.clone(),
        })
        .collect()
}
