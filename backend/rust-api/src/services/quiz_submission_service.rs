//! Scores quiz submissions and applies the resulting streak and safety-score
//! changes. A submission either commits completion and profile together or
//! leaves no trace.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::metrics::QUIZ_SUBMISSIONS_TOTAL;
use crate::models::quiz::{
    is_daily_quiz_id, ActiveQuiz, AnswerSubmission, DailyQuiz, QuestionResult, QuizCompletion,
    QuizQuestion, QuizResult, UNANSWERED,
};
use crate::models::user::UserProfile;
use crate::services::gamification::{next_safety_score, next_streak};
use crate::store::{paths, run_in_transaction, DocumentStore, StoreError, Transaction};
use crate::utils::retry::RetryConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredQuiz {
    pub final_score: f64,
    pub correct_count: usize,
    pub results: Vec<QuestionResult>,
}

/// Grades answers against the questions in question order.
///
/// Answers may arrive unsorted or incomplete; when a question is answered more
/// than once the last answer counts. Answers for question indexes outside the
/// quiz are ignored. Returns `None` for a quiz without questions.
pub fn score_answers(questions: &[QuizQuestion], answers: &[AnswerSubmission]) -> Option<ScoredQuiz> {
    if questions.is_empty() {
        return None;
    }

    let mut selected = vec![None; questions.len()];
    for answer in answers {
        if let Some(slot) = selected.get_mut(answer.question_index) {
            *slot = Some(answer.selected_answer_index);
        }
    }

    let results: Vec<QuestionResult> = questions
        .iter()
        .zip(selected)
        .map(|(question, selected)| {
            let user_answer_index = selected.unwrap_or(UNANSWERED);
            QuestionResult {
                is_correct: user_answer_index >= 0
                    && user_answer_index as usize == question.correct_answer_index,
                user_answer_index,
                correct_answer_index: question.correct_answer_index,
            }
        })
        .collect();

    let correct_count = results.iter().filter(|r| r.is_correct).count();
    let final_score = 100.0 * correct_count as f64 / questions.len() as f64;

    Some(ScoredQuiz {
        final_score,
        correct_count,
        results,
    })
}

pub struct QuizSubmissionService {
    store: Arc<dyn DocumentStore>,
    retry: RetryConfig,
}

impl QuizSubmissionService {
    pub fn new(store: Arc<dyn DocumentStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    pub async fn submit(
        &self,
        user_id: &str,
        quiz_id: &str,
        answers: &[AnswerSubmission],
        now: DateTime<Utc>,
    ) -> AppResult<QuizResult> {
        let result = run_in_transaction(self.store.as_ref(), &self.retry, |tx| {
            submit_in_transaction(tx, user_id, quiz_id, answers, now)
        })
        .await;

        let outcome = match &result {
            Ok(_) => "accepted",
            Err(AppError::AlreadySubmitted(_)) => "already_submitted",
            Err(AppError::QuizNotFound(_)) | Err(AppError::UserNotFound(_)) => "not_found",
            Err(_) => "error",
        };
        QUIZ_SUBMISSIONS_TOTAL.with_label_values(&[outcome]).inc();

        match &result {
            Ok(r) => tracing::info!(
                "Quiz {} submitted by {}: score {:.2}, streak {}, safety {}",
                quiz_id,
                user_id,
                r.final_score,
                r.new_quiz_streak,
                r.new_safety_score
            ),
            Err(e) => tracing::debug!("Quiz {} submission by {} rejected: {}", quiz_id, user_id, e),
        }

        result
    }
}

async fn load_questions(
    tx: &Transaction,
    user_id: &str,
    quiz_id: &str,
) -> AppResult<(String, Vec<QuizQuestion>)> {
    if is_daily_quiz_id(quiz_id) {
        let daily: Option<DailyQuiz> = tx.get_record(&paths::daily_quiz()).await?;
        return match daily {
            Some(daily) if daily.quiz_id == quiz_id => Ok((daily.topic, daily.questions)),
            _ => Err(AppError::QuizNotFound(quiz_id.to_string())),
        };
    }

    let active: Option<ActiveQuiz> = tx.get_record(&paths::active_quiz(user_id, quiz_id)).await?;
    active
        .map(|quiz| (quiz.topic, quiz.questions))
        .ok_or_else(|| AppError::QuizNotFound(quiz_id.to_string()))
}

async fn submit_in_transaction(
    tx: Transaction,
    user_id: &str,
    quiz_id: &str,
    answers: &[AnswerSubmission],
    now: DateTime<Utc>,
) -> AppResult<QuizResult> {
    let completion_path = paths::completed_quiz(user_id, quiz_id);
    if tx.exists(&completion_path).await? {
        return Err(AppError::AlreadySubmitted(quiz_id.to_string()));
    }

    let (topic, questions) = load_questions(&tx, user_id, quiz_id).await?;

    let scored = score_answers(&questions, answers)
        .ok_or_else(|| AppError::InvalidQuiz(quiz_id.to_string()))?;

    let profile_path = paths::user(user_id);
    let profile: UserProfile = tx
        .get_record(&profile_path)
        .await?
        .ok_or_else(|| AppError::UserNotFound(user_id.to_string()))?;

    let new_quiz_streak = next_streak(profile.daily_quiz_streak, profile.last_daily_quiz, now);
    let new_safety_score = next_safety_score(profile.safety_score, scored.final_score);

    let completed_at = now;
    let mut fields = Map::new();
    fields.insert("safety_score".to_string(), Value::from(new_safety_score));
    fields.insert("daily_quiz_streak".to_string(), Value::from(new_quiz_streak));
    fields.insert(
        "last_daily_quiz".to_string(),
        serde_json::to_value(StoredInstant(completed_at)).map_err(StoreError::from)?,
    );
    tx.update_fields(&profile_path, fields).await?;

    let completion = QuizCompletion {
        quiz_id: quiz_id.to_string(),
        topic,
        completed_at,
        final_score: scored.final_score,
        correct_count: scored.correct_count,
        results: scored.results.clone(),
        questions,
    };

    tx.create_record(&completion_path, &completion)
        .await
        .map_err(|e| match e {
            StoreError::AlreadyExists(_) => AppError::AlreadySubmitted(quiz_id.to_string()),
            other => AppError::from(other),
        })?;

    Ok(QuizResult {
        completed_at,
        final_score: scored.final_score,
        correct_count: scored.correct_count,
        new_quiz_streak,
        new_safety_score,
        results: scored.results,
    })
}

/// Serializes a timestamp exactly as stored records do.
#[derive(serde::Serialize)]
#[serde(transparent)]
struct StoredInstant(#[serde(with = "crate::utils::time::rfc3339_millis")] DateTime<Utc>);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::quiz::QuestionType;

    fn questions(correct: &[usize]) -> Vec<QuizQuestion> {
        correct
            .iter()
            .map(|&c| QuizQuestion {
                question_text: "q".into(),
                question_type: QuestionType::MultipleChoice,
                options: vec!["a".into(), "b".into(), "c".into()],
                correct_answer_index: c,
            })
            .collect()
    }

    fn answer(question_index: usize, selected_answer_index: i64) -> AnswerSubmission {
        AnswerSubmission {
            question_index,
            selected_answer_index,
        }
    }

    #[test]
    fn test_scores_unsorted_answers() {
        let scored = score_answers(
            &questions(&[1, 2, 0]),
            &[answer(2, 0), answer(0, 1), answer(1, 0)],
        )
        .unwrap();

        assert_eq!(scored.correct_count, 2);
        assert!((scored.final_score - 66.6667).abs() < 0.001);
        assert_eq!(
            scored.results.iter().map(|r| r.is_correct).collect::<Vec<_>>(),
            vec![true, false, true]
        );
    }

    #[test]
    fn test_unanswered_questions_are_incorrect() {
        let scored = score_answers(&questions(&[1, 2, 0]), &[answer(0, 1)]).unwrap();

        assert_eq!(scored.correct_count, 1);
        assert_eq!(scored.results[1].user_answer_index, UNANSWERED);
        assert!(!scored.results[1].is_correct);
        assert_eq!(scored.results[2].correct_answer_index, 0);
    }

    #[test]
    fn test_out_of_range_question_index_is_ignored() {
        let scored = score_answers(&questions(&[0]), &[answer(7, 0), answer(0, 0)]).unwrap();
        assert_eq!(scored.results.len(), 1);
        assert_eq!(scored.final_score, 100.0);
    }

    #[test]
    fn test_negative_selection_never_matches() {
        let scored = score_answers(&questions(&[0]), &[answer(0, -1)]).unwrap();
        assert_eq!(scored.correct_count, 0);
    }

    #[test]
    fn test_empty_quiz_cannot_be_scored() {
        assert!(score_answers(&[], &[answer(0, 0)]).is_none());
    }
}
