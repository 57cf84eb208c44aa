//! Property-based tests for the turn state machine

use super::transition::*;
use super::*;
use crate::transcript::{Role, ToolCall};
use proptest::prelude::*;
use serde_json::json;

const TOOL_NAMES: &[&str] = &["parseActivities", "parseFood", "endSession"];

fn arb_tool_call() -> impl Strategy<Value = ToolCall> {
    ("[a-z]{6}", prop::sample::select(TOOL_NAMES)).prop_map(|(id, name)| ToolCall {
        id,
        name: name.to_string(),
        arguments: json!({}),
    })
}

fn arb_role() -> impl Strategy<Value = Role> {
    prop_oneof![Just(Role::System), Just(Role::Human)]
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        Just(Event::Begin),
        (arb_role(), "[a-z ]{0,20}").prop_map(|(role, text)| Event::Input { role, text }),
        ("[a-zA-Z ]{0,20}", prop::collection::vec(arb_tool_call(), 0..3))
            .prop_map(|(text, tool_calls)| Event::ModelReplied { text, tool_calls }),
        (prop::collection::vec("[a-zA-Z]{3,10}", 1..3), any::<bool>())
            .prop_map(|(names, terminal)| Event::ToolsDispatched { names, terminal }),
    ]
}

fn arb_state() -> impl Strategy<Value = TurnState> {
    prop_oneof![
        Just(TurnState::Starting),
        (0u32..8, any::<bool>()).prop_map(|(depth, opening)| TurnState::AwaitingModel { depth, opening }),
        (0u32..8, prop::collection::vec(arb_tool_call(), 1..3))
            .prop_map(|(depth, calls)| TurnState::Dispatching { depth, calls }),
        (0u32..8).prop_map(|depth| TurnState::Continuing { depth }),
        Just(TurnState::AwaitingUser),
        Just(TurnState::Closed),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Depth never exceeds the cap, whatever the model does
    #[test]
    fn prop_depth_bounded(max in 0u32..5, events in prop::collection::vec(arb_event(), 0..40)) {
        let ctx = TurnContext::new("s", max);
        let mut state = TurnState::Starting;
        for event in events {
            if let Ok(result) = transition(&state, &ctx, event) {
                state = result.new_state;
                prop_assert!(state.depth() <= max, "depth {} over cap {}", state.depth(), max);
            }
        }
    }

    // Closed absorbs every event
    #[test]
    fn prop_closed_is_absorbing(event in arb_event()) {
        let result = transition(&TurnState::Closed, &TurnContext::new("s", 3), event);
        prop_assert_eq!(result.unwrap_err(), TransitionError::SessionClosed);
    }

    // A reply without tool calls always ends the chain with persisted text
    #[test]
    fn prop_plain_reply_ends_turn(depth in 0u32..4, opening in any::<bool>(), text in "[a-z][a-z ]{0,29}") {
        let state = TurnState::AwaitingModel { depth, opening };
        let result = transition(
            &state,
            &TurnContext::new("s", 4),
            Event::ModelReplied { text: text.clone(), tool_calls: vec![] },
        ).unwrap();
        prop_assert_eq!(result.new_state, TurnState::AwaitingUser);
        prop_assert!(result.effects.contains(&Effect::PersistTranscript));
        prop_assert_eq!(result.effects.last(), Some(&Effect::Reply(text)));
    }

    // Effects are only ever requested from states that can act on them
    #[test]
    fn prop_effects_match_new_state(state in arb_state(), event in arb_event()) {
        if let Ok(result) = transition(&state, &TurnContext::new("s", 4), event) {
            for effect in &result.effects {
                let ok = match effect {
                    Effect::RequestModel { .. } => matches!(result.new_state, TurnState::AwaitingModel { .. }),
                    Effect::DispatchTools(calls) => {
                        matches!(&result.new_state, TurnState::Dispatching { calls: c, .. } if c == calls)
                    }
                    Effect::Continue { .. } => matches!(result.new_state, TurnState::Continuing { .. }),
                    Effect::Reply(_) => result.new_state == TurnState::AwaitingUser,
                    Effect::AppendTurn(_) | Effect::PersistTranscript => true,
                };
                prop_assert!(ok, "{:?} produced from {:?}", effect, result.new_state);
            }
            if result.new_state == TurnState::Closed {
                prop_assert!(result.effects.is_empty());
            }
        }
    }

    // Continuation prompt names every tool that ran
    #[test]
    fn prop_continuation_prompt_names_tools(names in prop::collection::vec("[a-zA-Z]{3,12}", 1..4)) {
        let prompt = continuation_prompt(&names);
        for name in &names {
            prop_assert!(prompt.contains(name.as_str()));
        }
        prop_assert!(prompt.ends_with("completed; continue"));
    }
}
