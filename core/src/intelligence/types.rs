use uuid::Uuid;

use crate::llm::ToolCall;
use crate::llm::prompts::{ADD_TOOL, DELETE_TOOL, NONE_TOOL, UPDATE_TOOL};

/// The four-way decision the Consolidator's LLM call resolves to. Modeled as
/// a sum type so the commit step (see [`crate::intelligence::consolidator`])
/// is a single match over a closed set of transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsolidationDecision {
    Add {
        content: String,
    },
    Update {
        id: Uuid,
        content: String,
        reason: Option<String>,
    },
    Delete {
        id: Uuid,
        reason: Option<String>,
    },
    None {
        reason: Option<String>,
    },
}

impl ConsolidationDecision {
    /// Parses the model's chosen tool call into a decision. Tool calls with
    /// missing required parameters return `Err` so the caller can coerce the
    /// decision to skip-with-warning rather than commit a malformed mutation.
    pub fn from_tool_call(call: &ToolCall) -> Result<Self, String> {
        match call.name.as_str() {
            ADD_TOOL => {
                let content = call
                    .arguments
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                Ok(Self::Add { content })
            }
            UPDATE_TOOL => {
                let id = parse_id(call);
                let content = call
                    .arguments
                    .get("updated_content")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);

                match (id, content) {
                    (Some(id), Some(content)) => Ok(Self::Update {
                        id,
                        content,
                        reason: parse_reason(call),
                    }),
                    _ => Err("update call missing required id/updated_content".to_string()),
                }
            }
            DELETE_TOOL => match parse_id(call) {
                Some(id) => Ok(Self::Delete {
                    id,
                    reason: parse_reason(call),
                }),
                None => Err("delete call missing required id".to_string()),
            },
            NONE_TOOL => Ok(Self::None {
                reason: parse_reason(call),
            }),
            other => Err(format!("unknown consolidation tool call: {other}")),
        }
    }
}

fn parse_id(call: &ToolCall) -> Option<Uuid> {
    call.arguments
        .get("id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn parse_reason(call: &ToolCall) -> Option<String> {
    call.arguments.get("reason").and_then(|v| v.as_str()).map(str::to_string)
}

/// Outcome of running the Consolidator over a single extracted fact.
#[derive(Debug, Clone)]
pub enum ConsolidationOutcome {
    Added(crate::models::MemoryFact),
    Updated(crate::models::MemoryFact),
    Deleted(Uuid),
    None,
}

/// Context carried alongside a raw fact string from the chunk it was
/// extracted from, so the Consolidator's ADD path can stamp provenance
/// metadata per the spec's exact field set.
#[derive(Debug, Clone)]
pub struct FactOrigin {
    pub subject: String,
    pub document_reference: crate::models::DocumentReference,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub source: String,
    pub metadata: std::collections::HashMap<String, String>,
    pub original_turn_id: Option<String>,
    pub original_turn_content_preview: Option<String>,
    pub fact_index_in_turn: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            name: name.to_string(),
            arguments,
        }
    }

    #[test]
    fn add_defaults_to_empty_content_when_omitted() {
        let decision = ConsolidationDecision::from_tool_call(&call("add", json!({}))).unwrap();
        assert_eq!(decision, ConsolidationDecision::Add { content: String::new() });
    }

    #[test]
    fn update_without_id_is_an_error() {
        let decision = ConsolidationDecision::from_tool_call(&call(
            "update",
            json!({"updated_content": "new content"}),
        ));
        assert!(decision.is_err());
    }

    #[test]
    fn update_with_required_params_parses() {
        let id = Uuid::new_v4();
        let decision = ConsolidationDecision::from_tool_call(&call(
            "update",
            json!({"id": id.to_string(), "updated_content": "revised", "reason": "contradiction"}),
        ))
        .unwrap();

        match decision {
            ConsolidationDecision::Update { id: parsed_id, content, reason } => {
                assert_eq!(parsed_id, id);
                assert_eq!(content, "revised");
                assert_eq!(reason.as_deref(), Some("contradiction"));
            }
            other => panic!("expected Update, got {other:?}"),
        }
    }

    #[test]
    fn delete_without_id_is_an_error() {
        let decision = ConsolidationDecision::from_tool_call(&call("delete", json!({})));
        assert!(decision.is_err());
    }

    #[test]
    fn unknown_tool_name_is_an_error() {
        let decision = ConsolidationDecision::from_tool_call(&call("unexpected", json!({})));
        assert!(decision.is_err());
    }
}
