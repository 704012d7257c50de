use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::store::Record;
use crate::utils::time::rfc3339_millis;

pub const DAILY_QUIZ_PREFIX: &str = "daily_";

/// Value recorded for questions the user left unanswered.
pub const UNANSWERED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    TrueFalse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub question_text: String,
    pub question_type: QuestionType,
    pub options: Vec<String>,
    pub correct_answer_index: usize,
}

/// Quiz as produced by the content generator, before it is stored anywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedQuiz {
    pub topic: String,
    pub questions: Vec<QuizQuestion>,
}

impl GeneratedQuiz {
    /// Structural checks applied to every generator response.
    pub fn validate_structure(&self) -> Result<(), String> {
        if self.topic.trim().is_empty() {
            return Err("quiz topic is empty".to_string());
        }
        if self.questions.is_empty() {
            return Err("quiz has no questions".to_string());
        }

        for (index, question) in self.questions.iter().enumerate() {
            if question.question_text.trim().is_empty() {
                return Err(format!("question {} has no text", index));
            }
            if question.options.len() < 2 {
                return Err(format!("question {} has fewer than 2 options", index));
            }
            if question.question_type == QuestionType::TrueFalse && question.options.len() != 2 {
                return Err(format!(
                    "true/false question {} must have exactly 2 options",
                    index
                ));
            }
            if question.correct_answer_index >= question.options.len() {
                return Err(format!(
                    "question {} has correct_answer_index {} out of range",
                    index, question.correct_answer_index
                ));
            }
        }

        Ok(())
    }
}

/// Personalized quiz in a user's rotating pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveQuiz {
    pub quiz_id: String,
    pub topic: String,
    pub questions: Vec<QuizQuestion>,
    #[serde(default = "default_experience_level")]
    pub experience_level: String,
    #[serde(with = "rfc3339_millis")]
    pub created_at: DateTime<Utc>,
}

impl Record for ActiveQuiz {
    const KIND: &'static str = "active_quiz";
    const SCHEMA_VERSION: u32 = 1;
}

/// Process-wide quiz shared by all users for one calendar day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyQuiz {
    pub quiz_id: String,
    pub quiz_date: NaiveDate,
    pub topic: String,
    pub questions: Vec<QuizQuestion>,
    #[serde(with = "rfc3339_millis")]
    pub generated_at: DateTime<Utc>,
}

impl Record for DailyQuiz {
    const KIND: &'static str = "daily_quiz";
    const SCHEMA_VERSION: u32 = 1;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResult {
    pub is_correct: bool,
    pub user_answer_index: i64,
    pub correct_answer_index: usize,
}

/// Write-once record of a submitted quiz. Its presence blocks resubmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizCompletion {
    pub quiz_id: String,
    pub topic: String,
    #[serde(with = "rfc3339_millis")]
    pub completed_at: DateTime<Utc>,
    pub final_score: f64,
    pub correct_count: usize,
    pub results: Vec<QuestionResult>,
    pub questions: Vec<QuizQuestion>,
}

impl Record for QuizCompletion {
    const KIND: &'static str = "quiz_completion";
    const SCHEMA_VERSION: u32 = 1;
}

pub fn is_daily_quiz_id(quiz_id: &str) -> bool {
    quiz_id.starts_with(DAILY_QUIZ_PREFIX)
}

pub fn default_experience_level() -> String {
    "Intermediate".to_string()
}

// ---------- Requests ----------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerSubmission {
    pub question_index: usize,
    pub selected_answer_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitQuizRequest {
    #[validate(length(max = 100, message = "Too many answers"))]
    pub answers: Vec<AnswerSubmission>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct GenerateQuizRequest {
    #[validate(length(min = 1, max = 200, message = "Topic must be 1-200 characters"))]
    pub topic: String,
    #[validate(length(min = 1, max = 50, message = "Experience must be 1-50 characters"))]
    pub experience: Option<String>,
}

// ---------- Responses ----------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizResult {
    #[serde(with = "rfc3339_millis")]
    pub completed_at: DateTime<Utc>,
    pub final_score: f64,
    pub correct_count: usize,
    pub new_quiz_streak: u32,
    pub new_safety_score: f64,
    pub results: Vec<QuestionResult>,
}

/// Question as shown before submission; the correct answer is withheld.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionView {
    pub question_text: String,
    pub question_type: QuestionType,
    pub options: Vec<String>,
}

impl From<&QuizQuestion> for QuestionView {
    fn from(question: &QuizQuestion) -> Self {
        Self {
            question_text: question.question_text.clone(),
            question_type: question.question_type,
            options: question.options.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PastResults {
    #[serde(with = "rfc3339_millis")]
    pub completed_at: DateTime<Utc>,
    pub final_score: f64,
    pub correct_count: usize,
    pub results: Vec<QuestionResult>,
    pub questions: Vec<QuizQuestion>,
}

impl From<QuizCompletion> for PastResults {
    fn from(completion: QuizCompletion) -> Self {
        Self {
            completed_at: completion.completed_at,
            final_score: completion.final_score,
            correct_count: completion.correct_count,
            results: completion.results,
            questions: completion.questions,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizView {
    pub quiz_id: String,
    pub topic: String,
    pub is_daily: bool,
    pub questions: Vec<QuestionView>,
    pub is_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub past_results: Option<PastResults>,
}

impl QuizView {
    pub fn new(
        quiz_id: String,
        topic: String,
        questions: &[QuizQuestion],
        completion: Option<QuizCompletion>,
    ) -> Self {
        Self {
            is_daily: is_daily_quiz_id(&quiz_id),
            quiz_id,
            topic,
            questions: questions.iter().map(QuestionView::from).collect(),
            is_completed: completion.is_some(),
            past_results: completion.map(PastResults::from),
        }
    }

    pub fn from_completion(completion: QuizCompletion) -> Self {
        let quiz_id = completion.quiz_id.clone();
        let topic = completion.topic.clone();
        let questions = completion.questions.clone();
        Self::new(quiz_id, topic, &questions, Some(completion))
    }
}
