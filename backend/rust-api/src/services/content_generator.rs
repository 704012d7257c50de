//! Client for the multimodal model that writes quizzes and analyzes dashcam video.
//!
//! Model output is treated as untrusted: every response is cut down to its JSON
//! object, parsed into typed structures and structurally validated before any
//! service sees it. The API key is never logged.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::config::GeneratorConfig;
use crate::metrics::track_generation;
use crate::models::incident::IncidentAnalysis;
use crate::models::quiz::GeneratedQuiz;

#[derive(Debug, Clone, thiserror::Error)]
pub enum GenerationError {
    #[error("generator call timed out after {0:?}")]
    Timeout(Duration),

    #[error("generator transport error: {0}")]
    Transport(String),

    #[error("generator returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("generator output is not valid JSON: {0}")]
    Malformed(String),

    #[error("generator output failed validation: {0}")]
    Invalid(String),

    #[error("generated topic {0:?} is excluded")]
    ExcludedTopic(String),
}

/// Lower-cased, whitespace-collapsed form used for topic comparisons.
pub fn normalize_topic(topic: &str) -> String {
    topic
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Topics the generator must avoid. Only ever grows while a refill is running.
#[derive(Debug, Clone, Default)]
pub struct TopicExclusions {
    normalized: HashSet<String>,
    display: Vec<String>,
}

impl TopicExclusions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when an equivalent topic is already excluded.
    pub fn insert(&mut self, topic: &str) -> bool {
        let key = normalize_topic(topic);
        if key.is_empty() || !self.normalized.insert(key) {
            return false;
        }
        self.display.push(topic.trim().to_string());
        true
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.normalized.contains(&normalize_topic(topic))
    }

    pub fn topics(&self) -> &[String] {
        &self.display
    }

    pub fn len(&self) -> usize {
        self.display.len()
    }

    pub fn is_empty(&self) -> bool {
        self.display.is_empty()
    }
}

impl<'a> FromIterator<&'a str> for TopicExclusions {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut exclusions = TopicExclusions::new();
        for topic in iter {
            exclusions.insert(topic);
        }
        exclusions
    }
}

#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate_quiz(
        &self,
        topic: &str,
        experience: &str,
    ) -> Result<GeneratedQuiz, GenerationError>;

    /// Generates a quiz on a topic of the model's choosing outside `excluded`.
    async fn generate_quiz_excluding(
        &self,
        experience: &str,
        excluded: &TopicExclusions,
    ) -> Result<GeneratedQuiz, GenerationError>;

    async fn analyze_incident(&self, video_url: &str) -> Result<IncidentAnalysis, GenerationError>;
}

/// Runs a generator call under a deadline.
pub async fn bounded<T, F>(timeout: Duration, future: F) -> Result<T, GenerationError>
where
    F: Future<Output = Result<T, GenerationError>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(GenerationError::Timeout(timeout)),
    }
}

/// Validates a generated quiz and, when given, checks it against the exclusion set.
pub fn check_generated_quiz(
    quiz: GeneratedQuiz,
    excluded: Option<&TopicExclusions>,
) -> Result<GeneratedQuiz, GenerationError> {
    quiz.validate_structure().map_err(GenerationError::Invalid)?;
    if let Some(excluded) = excluded {
        if excluded.contains(&quiz.topic) {
            return Err(GenerationError::ExcludedTopic(quiz.topic));
        }
    }
    Ok(quiz)
}

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"```(?:json|JSON)?").unwrap();
}

/// Strips Markdown code fences and returns the outermost `{...}` span.
pub fn extract_json_object(raw: &str) -> Option<String> {
    let cleaned = CODE_FENCE.replace_all(raw, "");
    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end < start {
        return None;
    }
    Some(cleaned[start..=end].to_string())
}

pub fn parse_model_json<T: for<'de> Deserialize<'de>>(raw: &str) -> Result<T, GenerationError> {
    let json = extract_json_object(raw)
        .ok_or_else(|| GenerationError::Malformed("no JSON object in response".to_string()))?;
    serde_json::from_str::<T>(&json).map_err(|e| GenerationError::Malformed(e.to_string()))
}

fn guess_video_mime(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
    if path.ends_with(".mov") {
        "video/quicktime"
    } else if path.ends_with(".webm") {
        "video/webm"
    } else if path.ends_with(".avi") {
        "video/x-msvideo"
    } else if path.ends_with(".mkv") {
        "video/x-matroska"
    } else {
        "video/mp4"
    }
}

// ---------- Gemini REST client ----------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_data: Option<FileData>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FileData {
    mime_type: &'static str,
    file_uri: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

fn extract_api_error(body: &str) -> Option<String> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()?
        .get("error")?
        .get("message")?
        .as_str()
        .map(|s| s.to_string())
}

#[derive(Clone)]
pub struct GeminiContentGenerator {
    client: reqwest::Client,
    config: GeneratorConfig,
}

impl GeminiContentGenerator {
    pub fn new(config: GeneratorConfig) -> Result<Self, GenerationError> {
        // Per-call deadlines are applied by callers; this only caps runaway requests.
        let client = reqwest::Client::builder()
            .timeout(config.analysis_timeout() + Duration::from_secs(30))
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self { client, config })
    }

    #[instrument(level = "info", skip(self, parts), fields(model = %model))]
    async fn generate_content(
        &self,
        model: &str,
        parts: Vec<Part>,
        temperature: f32,
    ) -> Result<String, GenerationError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.api_url.trim_end_matches('/'),
            model
        );
        let request = GenerateContentRequest {
            contents: vec![Content { role: "user", parts }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
                temperature,
            },
        };

        let start = std::time::Instant::now();
        let res = self
            .client
            .post(&url)
            .header(USER_AGENT, "drivecoach-api/0.1")
            .header(CONTENT_TYPE, "application/json")
            .header("x-goog-api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            let message = extract_api_error(&body).unwrap_or(body);
            error!(status, elapsed = ?start.elapsed(), "Generator call failed");
            return Err(GenerationError::Upstream { status, message });
        }

        let body: GenerateContentResponse = res
            .json()
            .await
            .map_err(|e| GenerationError::Malformed(e.to_string()))?;

        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        info!(elapsed = ?start.elapsed(), response_len = text.len(), "Generator response received");

        if text.trim().is_empty() {
            return Err(GenerationError::Malformed("empty response".to_string()));
        }
        Ok(text)
    }

    fn text_part(text: String) -> Part {
        Part {
            text: Some(text),
            file_data: None,
        }
    }
}

fn quiz_prompt(topic: &str, experience: &str) -> String {
    format!(
        r#"You are a driving instructor writing a short quiz.
Write a 5-question quiz on the topic "{topic}" for a driver with {experience} experience.
Include at least one true/false question. Multiple-choice options must be distinct and plausible.
Respond with a single JSON object:
{{"topic": "{topic}", "questions": [
  {{"question_text": "...", "question_type": "multiple_choice", "options": ["A", "B", "C", "D"], "correct_answer_index": 0}},
  {{"question_text": "...", "question_type": "true_false", "options": ["True", "False"], "correct_answer_index": 1}}
]}}"#
    )
}

fn excluding_prompt(experience: &str, excluded: &TopicExclusions) -> String {
    let avoid = if excluded.is_empty() {
        "(none)".to_string()
    } else {
        excluded
            .topics()
            .iter()
            .map(|t| format!("- {}", t))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        r#"You are a driving instructor choosing the next lesson for a driver with {experience} experience.
Pick ONE specific driving-safety topic that is clearly different from every topic below:
{avoid}
Then write a 5-question quiz on it with at least one true/false question.
Respond with a single JSON object:
{{"topic": "<your topic>", "questions": [
  {{"question_text": "...", "question_type": "multiple_choice", "options": ["A", "B", "C", "D"], "correct_answer_index": 0}},
  {{"question_text": "...", "question_type": "true_false", "options": ["True", "False"], "correct_answer_index": 1}}
]}}"#
    )
}

fn analysis_prompt() -> &'static str {
    r#"You are a traffic analyst and a Three.js developer.
Analyze the driving incident in the attached video and respond with a single JSON object with exactly these keys:
- "analysis": {"incident_summary": string, "severity": "low" | "medium" | "high",
  "better_action_quiz": {"question": string, "options": [4 strings], "correct_answer_index": 0-3, "explanation": string}}
- "simulation_actual_html": a complete self-contained HTML page with a Three.js chase-camera simulation of what happened.
- "simulation_better_outcome_html": the same simulation showing the safer outcome.
Simulations must loop, include a pause/play button and contain no overlay text."#
}

#[async_trait]
impl ContentGenerator for GeminiContentGenerator {
    async fn generate_quiz(
        &self,
        topic: &str,
        experience: &str,
    ) -> Result<GeneratedQuiz, GenerationError> {
        let model = self.config.quiz_model.clone();
        track_generation("quiz", async {
            let text = self
                .generate_content(&model, vec![Self::text_part(quiz_prompt(topic, experience))], 0.7)
                .await?;
            parse_model_json::<GeneratedQuiz>(&text)
        })
        .await
    }

    async fn generate_quiz_excluding(
        &self,
        experience: &str,
        excluded: &TopicExclusions,
    ) -> Result<GeneratedQuiz, GenerationError> {
        let model = self.config.quiz_model.clone();
        track_generation("quiz_excluding", async {
            let text = self
                .generate_content(
                    &model,
                    vec![Self::text_part(excluding_prompt(experience, excluded))],
                    0.9,
                )
                .await?;
            parse_model_json::<GeneratedQuiz>(&text)
        })
        .await
    }

    async fn analyze_incident(&self, video_url: &str) -> Result<IncidentAnalysis, GenerationError> {
        let model = self.config.analysis_model.clone();
        let parts = vec![
            Part {
                text: None,
                file_data: Some(FileData {
                    mime_type: guess_video_mime(video_url),
                    file_uri: video_url.to_string(),
                }),
            },
            Self::text_part(analysis_prompt().to_string()),
        ];

        track_generation("incident_analysis", async {
            let text = self.generate_content(&model, parts, 0.4).await?;
            parse_model_json::<IncidentAnalysis>(&text)
        })
        .await
    }
}
