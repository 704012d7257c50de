//! Per-user rotating quiz pool plus the shared daily quiz.
//!
//! The pool is maintained lazily on read: quizzes completed on an earlier day
//! are dropped, then the pool is topped back up to the target size with quizzes
//! on topics the user has not seen yet.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::config::QuizPoolConfig;
use crate::error::{AppError, AppResult};
use crate::metrics::{QUIZ_POOL_CLEANUPS_TOTAL, QUIZ_POOL_GENERATIONS_TOTAL};
use crate::models::quiz::{ActiveQuiz, DailyQuiz, GeneratedQuiz, QuizCompletion, QuizView};
use crate::models::user::UserProfile;
use crate::services::content_generator::{
    bounded, check_generated_quiz, ContentGenerator, GenerationError, TopicExclusions,
};
use crate::store::{decode_all, decode_record, encode_record, paths, Direction, DocumentStore, Query};
use crate::utils::time::{daily_quiz_id, utc_date};

pub struct QuizPoolService {
    store: Arc<dyn DocumentStore>,
    generator: Arc<dyn ContentGenerator>,
    config: QuizPoolConfig,
    generation_timeout: Duration,
}

impl QuizPoolService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        generator: Arc<dyn ContentGenerator>,
        config: QuizPoolConfig,
        generation_timeout: Duration,
    ) -> Self {
        Self {
            store,
            generator,
            config,
            generation_timeout,
        }
    }

    /// Today's daily quiz (if any) followed by the user's personal quizzes.
    pub async fn get_active_quizzes(&self, user_id: &str, now: DateTime<Utc>) -> AppResult<Vec<QuizView>> {
        let today = utc_date(now);
        let profile = self.load_profile(user_id).await?;
        let completions = self.load_completions(user_id).await?;

        let mut views = Vec::new();
        if let Some(daily) = self.todays_daily_quiz(today).await? {
            let completion = completions.get(&daily.quiz_id).cloned();
            views.push(QuizView::new(
                daily.quiz_id,
                daily.topic,
                &daily.questions,
                completion,
            ));
        }

        let active = self.list_active(user_id).await?;
        let mut remaining = Vec::with_capacity(active.len());
        for quiz in active {
            if completed_before(&completions, &quiz.quiz_id, today) {
                self.store.delete(&paths::active_quiz(user_id, &quiz.quiz_id)).await?;
                QUIZ_POOL_CLEANUPS_TOTAL.inc();
                tracing::debug!("Removed expired quiz {} for user {}", quiz.quiz_id, user_id);
            } else {
                remaining.push(quiz);
            }
        }

        if remaining.len() < self.config.target_count {
            let missing = self.config.target_count - remaining.len();
            let mut excluded = self.exclusions(&completions, &remaining);
            self.refill(user_id, &profile.experience_level, missing, &mut excluded, now)
                .await?;
        }

        for quiz in self.list_active(user_id).await? {
            if completed_before(&completions, &quiz.quiz_id, today) {
                continue;
            }
            let completion = completions.get(&quiz.quiz_id).cloned();
            views.push(QuizView::new(
                quiz.quiz_id,
                quiz.topic,
                &quiz.questions,
                completion,
            ));
        }

        Ok(views)
    }

    /// Completed quizzes, most recent first.
    pub async fn get_quiz_history(&self, user_id: &str) -> AppResult<Vec<QuizView>> {
        let docs = self
            .store
            .query(
                &paths::completed_quizzes(user_id),
                &Query::all().order_by("completed_at", Direction::Descending),
            )
            .await?;

        Ok(decode_all::<QuizCompletion>(docs)
            .into_iter()
            .map(QuizView::from_completion)
            .collect())
    }

    /// Generates a quiz on an explicit topic and adds it to the user's pool.
    pub async fn generate_quiz_for_user(
        &self,
        user_id: &str,
        topic: &str,
        experience: Option<String>,
        now: DateTime<Utc>,
    ) -> AppResult<QuizView> {
        let experience = match experience {
            Some(experience) => experience,
            None => self
                .store
                .get(&paths::user(user_id))
                .await?
                .map(decode_record::<UserProfile>)
                .transpose()?
                .map(|profile| profile.experience_level)
                .unwrap_or_else(|| self.config.default_experience.clone()),
        };

        let quiz = bounded(
            self.generation_timeout,
            self.generator.generate_quiz(topic, &experience),
        )
        .await
        .and_then(|quiz| check_generated_quiz(quiz, None))
        .map_err(|e| {
            tracing::error!("Quiz generation for topic {:?} failed: {}", topic, e);
            AppError::GenerationFailure(e)
        })?;

        let active = self.store_active_quiz(user_id, quiz, &experience, now).await?;
        Ok(QuizView::new(active.quiz_id, active.topic, &active.questions, None))
    }

    pub async fn todays_daily_quiz(&self, today: NaiveDate) -> AppResult<Option<DailyQuiz>> {
        let Some(value) = self.store.get(&paths::daily_quiz()).await? else {
            return Ok(None);
        };
        let daily: DailyQuiz = match decode_record(value) {
            Ok(daily) => daily,
            Err(e) => {
                tracing::warn!("Ignoring unreadable daily quiz document: {}", e);
                return Ok(None);
            }
        };
        if daily.quiz_id != daily_quiz_id(today) {
            tracing::warn!(
                "Daily quiz {} is stale for {}, omitting it",
                daily.quiz_id,
                today
            );
            return Ok(None);
        }
        Ok(Some(daily))
    }

    async fn load_profile(&self, user_id: &str) -> AppResult<UserProfile> {
        let value = self
            .store
            .get(&paths::user(user_id))
            .await?
            .ok_or_else(|| AppError::UserNotFound(user_id.to_string()))?;
        Ok(decode_record(value)?)
    }

    async fn load_completions(&self, user_id: &str) -> AppResult<HashMap<String, QuizCompletion>> {
        let docs = self
            .store
            .query(&paths::completed_quizzes(user_id), &Query::all())
            .await?;
        Ok(decode_all::<QuizCompletion>(docs)
            .into_iter()
            .map(|c| (c.quiz_id.clone(), c))
            .collect())
    }

    async fn list_active(&self, user_id: &str) -> AppResult<Vec<ActiveQuiz>> {
        let docs = self
            .store
            .query(
                &paths::active_quizzes(user_id),
                &Query::all().order_by("created_at", Direction::Ascending),
            )
            .await?;
        Ok(decode_all(docs))
    }

    fn exclusions(
        &self,
        completions: &HashMap<String, QuizCompletion>,
        remaining: &[ActiveQuiz],
    ) -> TopicExclusions {
        completions
            .values()
            .map(|c| c.topic.as_str())
            .chain(remaining.iter().map(|q| q.topic.as_str()))
            .chain(self.config.default_topics.iter().map(String::as_str))
            .collect()
    }

    /// One generator call per missing slot. A failed slot is skipped; every
    /// accepted topic joins the exclusion set before the next call.
    async fn refill(
        &self,
        user_id: &str,
        experience: &str,
        missing: usize,
        excluded: &mut TopicExclusions,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        for _ in 0..missing {
            let generated = bounded(
                self.generation_timeout,
                self.generator.generate_quiz_excluding(experience, excluded),
            )
            .await
            .and_then(|quiz| check_generated_quiz(quiz, Some(&*excluded)));

            match generated {
                Ok(quiz) => {
                    let topic = quiz.topic.clone();
                    self.store_active_quiz(user_id, quiz, experience, now).await?;
                    excluded.insert(&topic);
                    QUIZ_POOL_GENERATIONS_TOTAL
                        .with_label_values(&["generated"])
                        .inc();
                    tracing::info!("Added quiz on {:?} to pool of user {}", topic, user_id);
                }
                Err(e) => {
                    QUIZ_POOL_GENERATIONS_TOTAL
                        .with_label_values(&[generation_failure_label(&e)])
                        .inc();
                    tracing::warn!("Skipping quiz pool slot for user {}: {}", user_id, e);
                }
            }
        }
        Ok(())
    }

    async fn store_active_quiz(
        &self,
        user_id: &str,
        quiz: GeneratedQuiz,
        experience: &str,
        now: DateTime<Utc>,
    ) -> AppResult<ActiveQuiz> {
        let active = ActiveQuiz {
            quiz_id: Uuid::new_v4().to_string(),
            topic: quiz.topic,
            questions: quiz.questions,
            experience_level: experience.to_string(),
            created_at: now,
        };
        self.store
            .create(
                &paths::active_quiz(user_id, &active.quiz_id),
                encode_record(&active)?,
            )
            .await?;
        Ok(active)
    }
}

fn completed_before(
    completions: &HashMap<String, QuizCompletion>,
    quiz_id: &str,
    today: NaiveDate,
) -> bool {
    completions
        .get(quiz_id)
        .map(|c| utc_date(c.completed_at) < today)
        .unwrap_or(false)
}

fn generation_failure_label(err: &GenerationError) -> &'static str {
    match err {
        GenerationError::Timeout(_) => "timeout",
        GenerationError::ExcludedTopic(_) => "excluded_topic",
        GenerationError::Invalid(_) | GenerationError::Malformed(_) => "invalid",
        GenerationError::Transport(_) | GenerationError::Upstream { .. } => "failed",
    }
}
