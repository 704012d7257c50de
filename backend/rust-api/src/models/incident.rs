use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::store::Record;
use crate::utils::time::rfc3339_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    #[default]
    Open,
    Archived,
}

/// Single "better action" question attached to an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentQuiz {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer_index: usize,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_selected_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: String,
    pub user_id: String,
    #[serde(default)]
    pub status: IncidentStatus,
    #[serde(with = "rfc3339_millis")]
    pub created_at: DateTime<Utc>,
    pub incident_summary: String,
    pub severity: Severity,
    pub video_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_details: Option<String>,
    pub quiz: IncidentQuiz,
    pub simulation_html: String,
    pub simulation_better_html: String,
}

impl Record for Incident {
    const KIND: &'static str = "incident";
    const SCHEMA_VERSION: u32 = 1;
}

/// Structured part of the generator's video analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentAnalysisSummary {
    pub incident_summary: String,
    pub severity: Severity,
    pub better_action_quiz: IncidentQuiz,
}

/// Full generator response for a dashcam video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentAnalysis {
    pub analysis: IncidentAnalysisSummary,
    pub simulation_actual_html: String,
    pub simulation_better_outcome_html: String,
}

impl IncidentAnalysis {
    pub fn validate_structure(&self) -> Result<(), String> {
        let quiz = &self.analysis.better_action_quiz;
        if self.analysis.incident_summary.trim().is_empty() {
            return Err("incident summary is empty".to_string());
        }
        if quiz.options.len() < 2 {
            return Err("incident quiz has fewer than 2 options".to_string());
        }
        if quiz.correct_answer_index >= quiz.options.len() {
            return Err(format!(
                "incident quiz correct_answer_index {} out of range",
                quiz.correct_answer_index
            ));
        }
        Ok(())
    }
}

// ---------- Requests ----------

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AnalyzeIncidentRequest {
    #[validate(url(message = "video_url must be a valid URL"))]
    pub video_url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct UpdateIncidentRequest {
    #[validate(length(max = 5000, message = "Incident details must be at most 5000 characters"))]
    pub incident_details: Option<String>,
    pub status: Option<IncidentStatus>,
}

impl UpdateIncidentRequest {
    pub fn is_empty(&self) -> bool {
        self.incident_details.is_none() && self.status.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentQuizSubmission {
    pub selected_answer_index: i64,
}

// ---------- Responses ----------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentQuizResult {
    pub is_correct: bool,
    pub correct_answer_index: usize,
    pub explanation: String,
}
