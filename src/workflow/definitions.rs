//! Built-in workflow definitions.

use serde_json::{json, Value};

use super::WorkflowEngine;
use crate::error::{OrchestratorError, Result};
use crate::types::{AgentTask, AgentType};

pub const BUSINESS_ANALYSIS: &str = "business_analysis";

pub const NLP_TASK_ID: &str = "nlp_analysis";
pub const ASR_TASK_ID: &str = "asr_transcription";
pub const SUMMARY_TASK_ID: &str = "summary";
pub const PROTOTYPE_TASK_ID: &str = "prototype";

/// Register every built-in workflow type on `engine`.
pub fn register_builtin_workflows(engine: &WorkflowEngine) {
    engine.register_workflow(BUSINESS_ANALYSIS, business_analysis);
}

fn non_empty_str<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Task graph for analysing one business submission.
///
/// Document and ASR extraction run first, NLP analysis waits on both, and
/// the summary and prototype tasks build on the analysis.
pub fn business_analysis(input: &Value) -> Result<Vec<AgentTask>> {
    let text = non_empty_str(input, "text").or_else(|| non_empty_str(input, "description"));
    let audio_url = non_empty_str(input, "audio_url");
    let files: Vec<Value> = input
        .get("files")
        .and_then(|f| f.as_array())
        .cloned()
        .unwrap_or_default();

    if text.is_none() && audio_url.is_none() && files.is_empty() {
        return Err(OrchestratorError::validation(
            "business_analysis requires text, files or audio_url",
        ));
    }

    let mut tasks = Vec::new();
    let mut extraction_ids = Vec::new();

    for (index, file) in files.iter().enumerate() {
        let task_id = format!("document_{}", index);
        tasks.push(
            AgentTask::new(
                task_id.clone(),
                AgentType::Document,
                "document-processor",
                json!({ "file": file }),
            )
            .with_priority(8)
            .with_timeout(120),
        );
        extraction_ids.push(task_id);
    }

    if let Some(audio_url) = audio_url {
        tasks.push(
            AgentTask::new(
                ASR_TASK_ID,
                AgentType::Asr,
                "speech-recognizer",
                json!({ "audio_url": audio_url }),
            )
            .with_priority(8)
            .with_timeout(300),
        );
        extraction_ids.push(ASR_TASK_ID.to_string());
    }

    let mut nlp = AgentTask::new(
        NLP_TASK_ID,
        AgentType::Nlp,
        "business-analyzer",
        json!({
            "text": text.unwrap_or_default(),
            "sources": extraction_ids,
            "analysis_type": "business",
        }),
    )
    .with_priority(6)
    .with_timeout(180);
    for id in &extraction_ids {
        nlp = nlp.depends_on(id.clone());
    }
    tasks.push(nlp);

    tasks.push(
        AgentTask::new(
            SUMMARY_TASK_ID,
            AgentType::Summarizer,
            "summarizer",
            json!({ "text": text.unwrap_or_default(), "max_sentences": 5 }),
        )
        .with_priority(4)
        .with_timeout(120)
        .depends_on(NLP_TASK_ID),
    );

    tasks.push(
        AgentTask::new(
            PROTOTYPE_TASK_ID,
            AgentType::Prototype,
            "prototype-generator",
            json!({ "description": text.unwrap_or_default() }),
        )
        .with_priority(3)
        .with_timeout(300)
        .depends_on(NLP_TASK_ID),
    );

    Ok(tasks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_only_graph() {
        let tasks = business_analysis(&json!({"text": "An online bakery"})).unwrap();
        let ids: Vec<&str> = tasks.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec![NLP_TASK_ID, SUMMARY_TASK_ID, PROTOTYPE_TASK_ID]);
        assert!(tasks[0].dependencies.is_empty());
        assert!(tasks[1].dependencies.contains(NLP_TASK_ID));
    }

    #[test]
    fn test_nlp_waits_for_extraction() {
        let tasks = business_analysis(&json!({
            "files": [{"filename": "plan.pdf"}, {"filename": "deck.pptx"}],
            "audio_url": "https://example.com/pitch.mp3",
        }))
        .unwrap();

        assert_eq!(tasks.len(), 6);
        let nlp = tasks.iter().find(|t| t.task_id == NLP_TASK_ID).unwrap();
        assert!(nlp.dependencies.contains("document_0"));
        assert!(nlp.dependencies.contains("document_1"));
        assert!(nlp.dependencies.contains(ASR_TASK_ID));
    }

    #[test]
    fn test_requires_some_input() {
        assert!(matches!(
            business_analysis(&json!({"text": "   "})),
            Err(OrchestratorError::Validation(_))
        ));
        assert!(business_analysis(&json!({"files": []})).is_err());
    }
}
