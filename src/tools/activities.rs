//! `parseActivities` - logs the user's activities for the day

use super::{emit_once, normalize_mood, DispatchError, Tool, ToolContext, ToolOutcome};
use crate::relay::MessageType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub struct ParseActivitiesTool;

#[derive(Debug, Deserialize)]
struct ParseActivitiesInput {
    activities: Vec<ActivityInput>,
}

#[derive(Debug, Deserialize)]
struct ActivityInput {
    name: String,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    time_minutes_ago: Option<f64>,
    #[serde(default)]
    mood: Option<f64>,
}

/// Activity as delivered to the client
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Activity {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    /// Unix seconds
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<u8>,
}

#[async_trait]
impl Tool for ParseActivitiesTool {
    fn name(&self) -> &'static str {
        "parseActivities"
    }

    fn description(&self) -> String {
        "Log the user's activities for the day in a structured format. Call once, after all activities have been collected.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["activities"],
            "properties": {
                "activities": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["name"],
                        "properties": {
                            "name": {
                                "type": "string",
                                "description": "Full name of the activity (e.g. 'Running', 'Reading', 'Cooking')"
                            },
                            "duration": {
                                "type": "string",
                                "description": "Duration as a string (e.g. '30 minutes', '1 hour'). Omit if unknown."
                            },
                            "time_minutes_ago": {
                                "type": "number",
                                "description": "How many minutes ago the activity happened. Omit if it is happening now or unknown."
                            },
                            "mood": {
                                "type": "number",
                                "minimum": 0,
                                "maximum": 100,
                                "description": "Mood during the activity, 0-100. Only if the user said so."
                            }
                        }
                    }
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutcome, DispatchError> {
        let parsed: ParseActivitiesInput =
            serde_json::from_value(input).map_err(|e| DispatchError::invalid(self.name(), e))?;

        let activities = parsed
            .activities
            .into_iter()
            .map(|a| -> Result<Activity, DispatchError> {
                Ok(Activity {
                    timestamp: ctx.resolve_minutes_ago(self.name(), a.time_minutes_ago)?,
                    name: a.name,
                    duration: a.duration,
                    mood: normalize_mood(a.mood),
                })
            })
            .collect::<Result<Vec<_>, DispatchError>>()?;

        emit_once(self.name(), MessageType::Activities, &activities, ctx).await
    }
}
