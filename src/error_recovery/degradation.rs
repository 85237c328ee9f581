//! Canned payloads returned in place of a real agent result.

use serde_json::{json, Value};

use crate::types::AgentType;

const SUMMARY_WORDS: usize = 50;

#[derive(Debug, Default, Clone)]
pub struct GracefulDegradation;

impl GracefulDegradation {
    pub fn new() -> Self {
        Self
    }

    /// Build a degraded payload shaped like the output of `agent_type`.
    pub fn handle_agent_failure(&self, agent_type: &AgentType, input: &Value, error: &str) -> Value {
        let mut payload = match agent_type {
            AgentType::Nlp => nlp_fallback(input),
            AgentType::Asr => asr_fallback(input),
            AgentType::Document => document_fallback(input),
            AgentType::Prototype => prototype_fallback(input),
            AgentType::Summarizer => summarizer_fallback(input),
            AgentType::Custom(name) => json!({
                "message": format!("Agent '{}' is unavailable; no result was produced", name),
            }),
        };

        if let Some(obj) = payload.as_object_mut() {
            obj.insert("degraded".to_string(), json!(true));
            obj.insert("fallback_reason".to_string(), json!(error));
        }
        payload
    }
}

fn input_text(input: &Value) -> &str {
    input
        .get("text")
        .or_else(|| input.get("description"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn nlp_fallback(input: &Value) -> Value {
    let words: Vec<&str> = input_text(input).split_whitespace().collect();
    let summary = words
        .iter()
        .take(SUMMARY_WORDS)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

    json!({
        "summary": summary,
        "word_count": words.len(),
        "entities": [],
        "sentiment": "neutral",
        "analysis_type": "basic_fallback",
    })
}

fn asr_fallback(input: &Value) -> Value {
    json!({
        "transcript": "",
        "confidence": 0.0,
        "audio_url": input.get("audio_url").cloned().unwrap_or(Value::Null),
        "message": "Speech recognition is temporarily unavailable; please provide a text description",
    })
}

fn document_fallback(input: &Value) -> Value {
    let files: Vec<Value> = input
        .get("files")
        .and_then(|f| f.as_array())
        .map(|files| {
            files
                .iter()
                .map(|file| {
                    let name = file
                        .get("filename")
                        .and_then(|n| n.as_str())
                        .or_else(|| file.as_str())
                        .unwrap_or("unknown");
                    json!({
                        "filename": name,
                        "status": "not_processed",
                        "extracted_text": "",
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    json!({
        "processed_files": files,
        "total_files": files.len(),
    })
}

fn prototype_fallback(_input: &Value) -> Value {
    json!({
        "prototype_type": "template",
        "sections": ["overview", "features", "next_steps"],
        "content": "A generic prototype outline was produced because the prototype service is unavailable",
    })
}

fn summarizer_fallback(input: &Value) -> Value {
    let text = input_text(input);
    let lead = text
        .split_terminator(['.', '!', '?'])
        .next()
        .unwrap_or("")
        .trim();

    json!({
        "summary": lead,
        "method": "lead_sentence",
    })
}
