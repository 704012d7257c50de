use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveTime, Utc};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics::DAILY_QUIZ_JOB_RUNS_TOTAL;
use crate::models::quiz::DailyQuiz;
use crate::services::content_generator::{
    bounded, check_generated_quiz, ContentGenerator, TopicExclusions,
};
use crate::store::{decode_record, encode_record, paths, DocumentStore};
use crate::utils::retry::{retry_async_with_config, RetryConfig};
use crate::utils::time::{daily_quiz_id, next_scheduler_wake, parse_run_at, utc_date};

pub struct DailyQuizService {
    store: Arc<dyn DocumentStore>,
    generator: Arc<dyn ContentGenerator>,
    experience: String,
    generation_timeout: Duration,
    run_at: NaiveTime,
    retry_interval: chrono::Duration,
    retry: RetryConfig,
}

impl DailyQuizService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        generator: Arc<dyn ContentGenerator>,
        config: &Config,
    ) -> Self {
        let run_at = parse_run_at(&config.daily_quiz.run_at).unwrap_or_else(|| {
            warn!(
                "Invalid daily_quiz.run_at {:?}, falling back to 00:05",
                config.daily_quiz.run_at
            );
            NaiveTime::from_hms_opt(0, 5, 0).unwrap_or(NaiveTime::MIN)
        });

        Self {
            store,
            generator,
            experience: config.quiz_pool.default_experience.clone(),
            generation_timeout: config.generator.quiz_timeout(),
            run_at,
            retry_interval: chrono::Duration::from_std(config.daily_quiz.retry_interval())
                .unwrap_or_else(|_| chrono::Duration::minutes(5)),
            retry: RetryConfig::patient(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn current(&self) -> AppResult<Option<DailyQuiz>> {
        let Some(value) = self.store.get(&paths::daily_quiz()).await? else {
            return Ok(None);
        };
        match decode_record::<DailyQuiz>(value) {
            Ok(daily) => Ok(Some(daily)),
            Err(e) => {
                warn!("Ignoring unreadable daily quiz document: {}", e);
                Ok(None)
            }
        }
    }

    /// Replaces the daily quiz with a fresh one for the UTC date of `now`.
    pub async fn regenerate_daily_quiz(&self, now: DateTime<Utc>) -> AppResult<DailyQuiz> {
        let result = self.generate_and_store(now).await;
        let status = if result.is_ok() { "success" } else { "error" };
        DAILY_QUIZ_JOB_RUNS_TOTAL.with_label_values(&[status]).inc();
        result
    }

    async fn generate_and_store(&self, now: DateTime<Utc>) -> AppResult<DailyQuiz> {
        let today = utc_date(now);

        let mut excluded = TopicExclusions::new();
        if let Some(previous) = self.current().await? {
            excluded.insert(&previous.topic);
        }

        let excluded = &excluded;
        let quiz = retry_async_with_config(self.retry.clone(), || async move {
            bounded(
                self.generation_timeout,
                self.generator
                    .generate_quiz_excluding(&self.experience, excluded),
            )
            .await
            .and_then(|quiz| check_generated_quiz(quiz, Some(excluded)))
            .inspect_err(|e| warn!("Daily quiz generation attempt failed: {}", e))
        })
        .await
        .map_err(AppError::GenerationFailure)?;

        let daily = DailyQuiz {
            quiz_id: daily_quiz_id(today),
            quiz_date: today,
            topic: quiz.topic,
            questions: quiz.questions,
            generated_at: now,
        };

        self.store
            .set(&paths::daily_quiz(), encode_record(&daily)?)
            .await?;

        info!("Daily quiz {} generated on {:?}", daily.quiz_id, daily.topic);
        Ok(daily)
    }

    /// Generates today's quiz unless it already exists.
    pub async fn ensure_daily_quiz(&self, now: DateTime<Utc>) -> AppResult<DailyQuiz> {
        if let Some(daily) = self.current().await? {
            if daily.quiz_id == daily_quiz_id(utc_date(now)) {
                return Ok(daily);
            }
        }
        self.regenerate_daily_quiz(now).await
    }

    /// Scheduler loop: makes sure today's quiz exists, then once per day at `run_at`.
    ///
    /// While today's quiz is missing after a failed run it retries every
    /// `daily_quiz.retry_interval_secs`.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!("Starting daily quiz scheduler (run_at {} UTC)", self.run_at);

        let mut last_failed = match self.ensure_daily_quiz(Utc::now()).await {
            Ok(_) => false,
            Err(e) => {
                warn!(error = %e, "Initial daily quiz check failed");
                true
            }
        };

        loop {
            let now = Utc::now();
            let next = next_scheduler_wake(now, self.run_at, last_failed, self.retry_interval);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            info!("Next daily quiz run at {}", next);
            sleep(wait).await;

            last_failed = match self.ensure_daily_quiz(Utc::now()).await {
                Ok(daily) => {
                    info!("Daily quiz job completed: {}", daily.quiz_id);
                    false
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        "Daily quiz job failed, retrying in {}s",
                        self.retry_interval.num_seconds()
                    );
                    true
                }
            };
        }
    }
}
