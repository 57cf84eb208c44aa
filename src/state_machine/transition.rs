//! Pure state transition function

use super::{Effect, Event, TurnContext, TurnState};
use crate::transcript::{Role, Turn};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: TurnState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: TurnState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Session is closed")]
    SessionClosed,
    #[error("Model kept calling tools past {limit} continuations")]
    ContinuationLimit { limit: u32 },
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Directive sent to the model after non-terminal tools ran
pub fn continuation_prompt(names: &[String]) -> String {
    format!("{} completed; continue", names.join(", "))
}

/// Pure transition function: same inputs, same outputs, no I/O.
pub fn transition(
    state: &TurnState,
    context: &TurnContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        (TurnState::Closed, _) => Err(TransitionError::SessionClosed),

        (TurnState::Starting, Event::Begin) => Ok(TransitionResult::new(
            TurnState::AwaitingModel {
                depth: 0,
                opening: true,
            },
        )
        .with_effect(Effect::RequestModel { opening: true })),

        // Fresh input starts a new chain
        (TurnState::AwaitingUser, Event::Input { role, text }) => Ok(TransitionResult::new(
            TurnState::AwaitingModel {
                depth: 0,
                opening: false,
            },
        )
        .with_effect(Effect::AppendTurn(Turn::new(role, text)))
        .with_effect(Effect::RequestModel { opening: false })),

        (TurnState::Continuing { depth }, Event::Input { role, text }) => {
            Ok(TransitionResult::new(TurnState::AwaitingModel {
                depth: *depth,
                opening: false,
            })
            .with_effect(Effect::AppendTurn(Turn::new(role, text)))
            .with_effect(Effect::RequestModel { opening: false }))
        }

        // The opening line is always delivered as chat; tool calls in it are ignored
        (TurnState::AwaitingModel { opening: true, .. }, Event::ModelReplied { text, .. }) => {
            if text.trim().is_empty() {
                return Err(TransitionError::InvalidTransition(
                    "opening reply carried no greeting".to_string(),
                ));
            }
            Ok(reply(text))
        }

        (
            TurnState::AwaitingModel {
                depth,
                opening: false,
            },
            Event::ModelReplied { text, tool_calls },
        ) => {
            if tool_calls.is_empty() {
                return Ok(reply(text));
            }
            Ok(TransitionResult::new(TurnState::Dispatching {
                depth: *depth,
                calls: tool_calls.clone(),
            })
            .with_effect(Effect::AppendTurn(Turn::assistant(text, tool_calls.clone())))
            .with_effect(Effect::DispatchTools(tool_calls)))
        }

        (TurnState::Dispatching { .. }, Event::ToolsDispatched { terminal: true, .. }) => {
            // The terminal tool already closed the relay and dropped the history
            Ok(TransitionResult::new(TurnState::Closed))
        }

        (TurnState::Dispatching { depth, .. }, Event::ToolsDispatched { names, .. }) => {
            if *depth >= context.max_continuations {
                return Err(TransitionError::ContinuationLimit {
                    limit: context.max_continuations,
                });
            }
            Ok(
                TransitionResult::new(TurnState::Continuing { depth: depth + 1 })
                    .with_effect(Effect::PersistTranscript)
                    .with_effect(Effect::Continue {
                        prompt: continuation_prompt(&names),
                    }),
            )
        }

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "{event:?} in state {state:?}"
        ))),
    }
}

fn reply(text: String) -> TransitionResult {
    TransitionResult::new(TurnState::AwaitingUser)
        .with_effect(Effect::AppendTurn(Turn::new(Role::Assistant, text.clone())))
        .with_effect(Effect::PersistTranscript)
        .with_effect(Effect::Reply(text))
}
