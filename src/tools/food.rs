//! `parseFood` - logs meals and how the user felt about them

use super::{emit_once, normalize_mood, DispatchError, Tool, ToolContext, ToolOutcome};
use crate::relay::MessageType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub struct ParseFoodTool;

#[derive(Debug, Deserialize)]
struct ParseFoodInput {
    meals: Vec<MealInput>,
}

#[derive(Debug, Deserialize)]
struct MealInput {
    name: String,
    #[serde(default)]
    time_minutes_ago: Option<f64>,
    #[serde(default)]
    mood: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Meal {
    pub name: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<u8>,
}

#[async_trait]
impl Tool for ParseFoodTool {
    fn name(&self) -> &'static str {
        "parseFood"
    }

    fn description(&self) -> String {
        "Log the user's meals in a structured format. Call once, after all meals have been collected.".to_string()
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["meals"],
            "properties": {
                "meals": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["name"],
                        "properties": {
                            "name": {
                                "type": "string",
                                "description": "What was eaten (e.g. 'Oatmeal with berries')"
                            },
                            "time_minutes_ago": {
                                "type": "number",
                                "description": "How many minutes ago the meal was eaten. Omit if unknown."
                            },
                            "mood": {
                                "type": "number",
                                "minimum": 0,
                                "maximum": 100,
                                "description": "Mood after the meal, 0-100. Only if the user said so."
                            }
                        }
                    }
                }
            }
        })
    }

    async fn run(&self, input: Value, ctx: &ToolContext) -> Result<ToolOutcome, DispatchError> {
        let parsed: ParseFoodInput =
            serde_json::from_value(input).map_err(|e| DispatchError::invalid(self.name(), e))?;

        let meals = parsed
            .meals
            .into_iter()
            .map(|m| -> Result<Meal, DispatchError> {
                Ok(Meal {
                    timestamp: ctx.resolve_minutes_ago(self.name(), m.time_minutes_ago)?,
                    name: m.name,
                    mood: normalize_mood(m.mood),
                })
            })
            .collect::<Result<Vec<_>, DispatchError>>()?;

        emit_once(self.name(), MessageType::Nutrition, &meals, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tests::Harness;

    #[tokio::test]
    async fn emits_nutrition_once() {
        let mut h = Harness::new();
        let ctx = h.ctx();
        let input = json!({"meals": [{"name": "Toast", "time_minutes_ago": 60, "mood": 120}]});

        assert_eq!(
            ParseFoodTool.run(input.clone(), &ctx).await.unwrap(),
            ToolOutcome::Completed
        );
        assert_eq!(
            ParseFoodTool.run(input, &ctx).await.unwrap(),
            ToolOutcome::Duplicate
        );

        let msg = h.rx.recv().await.unwrap();
        assert_eq!(msg.message_type, MessageType::Nutrition);
        let meals: Vec<Meal> = serde_json::from_str(&msg.message).unwrap();
        assert_eq!(
            meals,
            vec![Meal {
                name: "Toast".into(),
                timestamp: ctx.now.timestamp() - 3600,
                mood: Some(100),
            }]
        );
        assert!(h.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_session_emits_nothing() {
        let mut h = Harness::new();
        h.relay.close(&h.session_id);
        let outcome = ParseFoodTool
            .run(json!({"meals": [{"name": "Soup"}]}), &h.ctx())
            .await
            .unwrap();
        assert_eq!(outcome, ToolOutcome::Duplicate);
        assert!(h.rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn fractional_mood_is_accepted() {
        let mut h = Harness::new();
        let ctx = h.ctx();
        ParseFoodTool
            .run(
                json!({"meals": [{"name": "Curry", "mood": 72.5}, {"name": "Tea", "mood": 70.0}]}),
                &ctx,
            )
            .await
            .unwrap();
        let meals: Vec<Meal> = serde_json::from_str(&h.rx.recv().await.unwrap().message).unwrap();
        assert_eq!(meals[0].mood, Some(73));
        assert_eq!(meals[1].mood, Some(70));
    }

    #[tokio::test]
    async fn negative_or_huge_mood_is_clamped() {
        let mut h = Harness::new();
        ParseFoodTool
            .run(
                json!({"meals": [{"name": "Cake", "mood": -4}, {"name": "Pie", "mood": 300}]}),
                &h.ctx(),
            )
            .await
            .unwrap();
        let meals: Vec<Meal> = serde_json::from_str(&h.rx.recv().await.unwrap().message).unwrap();
        assert_eq!(meals[0].mood, Some(0));
        assert_eq!(meals[1].mood, Some(100));
    }
}
