//! Business analysis reports built from finished workflows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{TaskStatus, WorkflowState, WorkflowStatus};

const FULL_CONFIDENCE: f64 = 0.7;
const PARTIAL_COMPLETENESS: f64 = 0.5;

/// One agent's contribution to the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSection {
    pub task_id: String,
    pub agent_type: String,
    pub status: TaskStatus,
    pub confidence: f64,
    pub degraded: bool,
    pub data: Option<Value>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusinessAnalysis {
    pub workflow_id: String,
    pub submission_id: String,
    pub workflow_status: WorkflowStatus,
    pub sections: Vec<AnalysisSection>,
    /// Mean confidence over completed results
    pub overall_confidence: f64,
    pub failed_tasks: Vec<String>,
    /// Completed results over total tasks
    pub completeness: f64,
    pub generated_at: DateTime<Utc>,
}

impl BusinessAnalysis {
    pub fn from_workflow(state: &WorkflowState) -> Self {
        // Task order first, then results for tasks no longer in the graph
        let mut ids: Vec<&String> = state
            .tasks
            .iter()
            .map(|t| &t.task_id)
            .filter(|id| state.agent_results.contains_key(*id))
            .collect();
        let mut extra: Vec<&String> = state
            .agent_results
            .keys()
            .filter(|id| state.task(id).is_none())
            .collect();
        extra.sort();
        ids.extend(extra);

        let sections: Vec<AnalysisSection> = ids
            .into_iter()
            .filter_map(|id| state.agent_results.get(id))
            .map(|result| AnalysisSection {
                task_id: result.task_id.clone(),
                agent_type: result.agent_type.to_string(),
                status: result.status,
                confidence: result.confidence_score,
                degraded: result.is_degraded(),
                data: result.result_data.clone(),
                error: result.error_message.clone(),
            })
            .collect();

        let completed: Vec<&AnalysisSection> = sections
            .iter()
            .filter(|s| s.status == TaskStatus::Completed)
            .collect();
        let overall_confidence = if completed.is_empty() {
            0.0
        } else {
            completed.iter().map(|s| s.confidence).sum::<f64>() / completed.len() as f64
        };
        let total = state.total_tasks().max(sections.len());
        let completeness = if total == 0 {
            0.0
        } else {
            completed.len() as f64 / total as f64
        };

        Self {
            workflow_id: state.workflow_id.clone(),
            submission_id: state.submission_id.clone(),
            workflow_status: state.status,
            overall_confidence,
            failed_tasks: state.failed_tasks.clone(),
            completeness,
            sections,
            generated_at: Utc::now(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.sections.iter().any(|s| s.degraded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferTier {
    Full,
    Partial,
    Minimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferSummary {
    pub submission_id: String,
    pub tier: OfferTier,
    pub confidence: f64,
    pub delivered_components: Vec<String>,
    pub missing_components: Vec<String>,
    pub headline: String,
}

impl OfferSummary {
    pub fn from_analysis(analysis: &BusinessAnalysis) -> Self {
        let tier = if analysis.completeness >= 1.0
            && analysis.overall_confidence >= FULL_CONFIDENCE
            && !analysis.is_degraded()
        {
            OfferTier::Full
        } else if analysis.completeness >= PARTIAL_COMPLETENESS {
            OfferTier::Partial
        } else {
            OfferTier::Minimal
        };

        let mut delivered_components = Vec::new();
        let mut missing_components = Vec::new();
        for section in &analysis.sections {
            let bucket = if section.status == TaskStatus::Completed {
                &mut delivered_components
            } else {
                &mut missing_components
            };
            if !bucket.contains(&section.agent_type) {
                bucket.push(section.agent_type.clone());
            }
        }

        let headline = match tier {
            OfferTier::Full => "Complete business analysis ready".to_string(),
            OfferTier::Partial => format!(
                "Partial business analysis ({} of {} components)",
                delivered_components.len(),
                delivered_components.len() + missing_components.len()
            ),
            OfferTier::Minimal => "Preliminary business analysis; key components unavailable".to_string(),
        };

        Self {
            submission_id: analysis.submission_id.clone(),
            tier,
            confidence: analysis.overall_confidence,
            delivered_components,
            missing_components,
            headline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultUrls {
    pub status_url: String,
    pub analysis_url: String,
    pub offer_url: String,
}

impl ResultUrls {
    pub fn for_workflow(base_url: &str, state: &WorkflowState) -> Self {
        let base = base_url.trim_end_matches('/');
        let workflow = format!("{}/workflows/{}", base, state.workflow_id);
        Self {
            status_url: workflow.clone(),
            analysis_url: format!("{}/analysis", workflow),
            offer_url: format!("{}/offer", workflow),
        }
    }
}
