//! Unpacking of the `multi_tool_use.parallel` wrapper some models emit

use super::DispatchError;
use serde::Deserialize;
use serde_json::Value;

pub const PARALLEL_TOOL_NAME: &str = "multi_tool_use.parallel";

#[derive(Debug, Deserialize)]
struct ParallelInput {
    tool_uses: Vec<ParallelUse>,
}

#[derive(Debug, Deserialize)]
struct ParallelUse {
    recipient_name: String,
    #[serde(default)]
    parameters: Value,
}

/// Split the wrapper into `(tool name, arguments)` pairs, in call order
pub fn unpack(arguments: &Value) -> Result<Vec<(String, Value)>, DispatchError> {
    let input = ParallelInput::deserialize(arguments)
        .map_err(|e| DispatchError::invalid(PARALLEL_TOOL_NAME, e))?;

    Ok(input
        .tool_uses
        .into_iter()
        .map(|u| {
            let name = u
                .recipient_name
                .strip_prefix("functions.")
                .map_or_else(|| u.recipient_name.clone(), str::to_string);
            (name, u.parameters)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_namespace_and_keeps_order() {
        let calls = unpack(&json!({"tool_uses": [
            {"recipient_name": "functions.parseFood", "parameters": {"meals": []}},
            {"recipient_name": "endSession", "parameters": {"message": "bye"}}
        ]}))
        .unwrap();
        assert_eq!(calls[0].0, "parseFood");
        assert_eq!(calls[1].0, "endSession");
        assert_eq!(calls[1].1, json!({"message": "bye"}));
    }

    #[test]
    fn rejects_malformed_wrapper() {
        assert!(matches!(
            unpack(&json!({"uses": []})),
            Err(DispatchError::InvalidArguments { .. })
        ));
    }
}
