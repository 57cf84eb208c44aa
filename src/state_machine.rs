//! Turn state machine
//!
//! Elm-style pure transitions: the orchestrator feeds events in and executes
//! the returned effects, so every continue-or-stop decision is testable
//! without a model, relay or store.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::Event;
pub use state::{TurnContext, TurnState};
pub use transition::{transition, TransitionError};
