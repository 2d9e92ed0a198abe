//! Prompt and tool-schema builders for the Fact Extractor and Consolidator.
//!
//! Both components speak to the model exclusively through function-calling
//! tools rather than free-form JSON, so a malformed response is a missing
//! tool call rather than a JSON parse failure.

use serde_json::{json, Value};

use crate::llm::ToolDefinition;
use crate::models::ScoredFact;

pub const EXTRACT_FACTS_TOOL: &str = "extract_facts";
pub const ADD_TOOL: &str = "add";
pub const UPDATE_TOOL: &str = "update";
pub const DELETE_TOOL: &str = "delete";
pub const NONE_TOOL: &str = "none";

pub fn extraction_system_prompt() -> &'static str {
    "You extract atomic, self-contained facts about the subjects named in the \
     given content. Each fact must stand alone without requiring the original \
     content for context, and must assert exactly one thing. Call the \
     extract_facts tool with every fact you find; call it with an empty facts \
     array if the content contains nothing worth remembering."
}

pub fn extract_facts_tool() -> ToolDefinition {
    ToolDefinition {
        name: EXTRACT_FACTS_TOOL.to_string(),
        description: "Record the atomic facts extracted from the content.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "facts": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Self-contained fact strings, one assertion each."
                }
            },
            "required": ["facts"]
        }),
    }
}

pub fn consolidation_system_prompt() -> &'static str {
    "You decide how a newly extracted fact relates to a set of existing, \
     semantically similar facts. Call exactly one of add, update, delete, or \
     none. Call update only when the new fact should replace the content of \
     an existing fact by id; call delete only when the new fact shows an \
     existing fact by id is no longer true and should be removed; call none \
     when the new fact is redundant with an existing one; otherwise call add."
}

pub fn consolidation_tools() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: ADD_TOOL.to_string(),
            description: "Store the new fact as a fresh entry, optionally revising its wording.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "content": {
                        "type": "string",
                        "description": "Revised fact content to store; omit to store the fact as given."
                    }
                }
            }),
        },
        ToolDefinition {
            name: UPDATE_TOOL.to_string(),
            description: "Replace the content of an existing fact with revised content.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "id of the existing fact to update" },
                    "updated_content": { "type": "string", "description": "the new content for that fact" },
                    "reason": { "type": "string" }
                },
                "required": ["id", "updated_content"]
            }),
        },
        ToolDefinition {
            name: DELETE_TOOL.to_string(),
            description: "Remove an existing fact that the new fact supersedes or invalidates.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string", "description": "id of the existing fact to delete" },
                    "reason": { "type": "string" }
                },
                "required": ["id"]
            }),
        },
        ToolDefinition {
            name: NONE_TOOL.to_string(),
            description: "Take no action; the new fact is redundant or not worth storing.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "reason": { "type": "string" }
                }
            }),
        },
    ]
}

pub fn consolidation_user_prompt(new_fact: &str, neighbors: &[ScoredFact]) -> String {
    if neighbors.is_empty() {
        return format!("New fact:\n{new_fact}\n\nNo existing similar facts were found.");
    }

    let neighbor_list = neighbors
        .iter()
        .map(|scored| format!("[id: {}] {} (distance: {:.3})", scored.fact.id, scored.fact.content, scored.distance))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "New fact:\n{new_fact}\n\nExisting similar facts:\n{neighbor_list}"
    )
}

pub fn facts_from_tool_arguments(arguments: &Value) -> Vec<String> {
    arguments
        .get("facts")
        .and_then(|v| v.as_array())
        .map(|items| items.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}
