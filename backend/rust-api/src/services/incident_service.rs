use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics::INCIDENT_QUIZ_SUBMISSIONS_TOTAL;
use crate::models::incident::{
    Incident, IncidentQuizResult, IncidentStatus, UpdateIncidentRequest,
};
use crate::services::content_generator::{bounded, ContentGenerator, GenerationError};
use crate::store::{
    decode_all, encode_record, paths, run_in_transaction, Direction, DocumentStore, Query,
    Transaction,
};
use crate::utils::retry::RetryConfig;

pub struct IncidentService {
    store: Arc<dyn DocumentStore>,
    generator: Arc<dyn ContentGenerator>,
    retry: RetryConfig,
    analysis_timeout: Duration,
}

impl IncidentService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        generator: Arc<dyn ContentGenerator>,
        retry: RetryConfig,
        analysis_timeout: Duration,
    ) -> Self {
        Self {
            store,
            generator,
            retry,
            analysis_timeout,
        }
    }

    /// Analyzes an uploaded dashcam video and records the incident for its owner.
    pub async fn analyze_video(
        &self,
        user_id: &str,
        video_url: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Incident> {
        let analysis = bounded(self.analysis_timeout, self.generator.analyze_incident(video_url))
            .await
            .and_then(|analysis| {
                analysis
                    .validate_structure()
                    .map_err(GenerationError::Invalid)?;
                Ok(analysis)
            })
            .map_err(|e| {
                tracing::error!("Incident analysis for user {} failed: {}", user_id, e);
                AppError::GenerationFailure(e)
            })?;

        let mut quiz = analysis.analysis.better_action_quiz;
        quiz.user_selected_index = None;
        quiz.is_correct = None;

        let incident = Incident {
            incident_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            status: IncidentStatus::Open,
            created_at: now,
            incident_summary: analysis.analysis.incident_summary,
            severity: analysis.analysis.severity,
            video_url: video_url.to_string(),
            incident_details: None,
            quiz,
            simulation_html: analysis.simulation_actual_html,
            simulation_better_html: analysis.simulation_better_outcome_html,
        };

        self.store
            .create(&paths::incident(&incident.incident_id), encode_record(&incident)?)
            .await?;

        tracing::info!(
            "Incident {} recorded for user {} (severity {:?})",
            incident.incident_id,
            user_id,
            incident.severity
        );
        Ok(incident)
    }

    /// The caller's incidents, newest first.
    pub async fn list_incidents(&self, user_id: &str) -> AppResult<Vec<Incident>> {
        let docs = self
            .store
            .query(
                &paths::incidents(),
                &Query::all()
                    .where_eq("user_id", user_id)
                    .order_by("created_at", Direction::Descending),
            )
            .await?;
        Ok(decode_all(docs))
    }

    pub async fn get_incident(&self, user_id: &str, incident_id: &str) -> AppResult<Incident> {
        let value = self
            .store
            .get(&paths::incident(incident_id))
            .await?
            .ok_or_else(|| AppError::IncidentNotFound(incident_id.to_string()))?;
        let incident: Incident = crate::store::decode_record(value)?;
        ensure_owner(&incident, user_id)?;
        Ok(incident)
    }

    pub async fn update_incident(
        &self,
        user_id: &str,
        incident_id: &str,
        update: &UpdateIncidentRequest,
    ) -> AppResult<Incident> {
        if update.is_empty() {
            return Err(AppError::Validation("No update data provided".to_string()));
        }

        run_in_transaction(self.store.as_ref(), &self.retry, |tx| async move {
            let mut incident = load_owned(&tx, user_id, incident_id).await?;
            if let Some(details) = &update.incident_details {
                incident.incident_details = Some(details.clone());
            }
            if let Some(status) = update.status {
                incident.status = status;
            }
            tx.set_record(&paths::incident(incident_id), &incident).await?;
            Ok(incident)
        })
        .await
    }

    pub async fn delete_incident(&self, user_id: &str, incident_id: &str) -> AppResult<()> {
        run_in_transaction(self.store.as_ref(), &self.retry, |tx| async move {
            load_owned(&tx, user_id, incident_id).await?;
            tx.delete(&paths::incident(incident_id)).await?;
            Ok::<_, AppError>(())
        })
        .await?;

        tracing::info!("Incident {} deleted by {}", incident_id, user_id);
        Ok(())
    }

    /// Records the user's answer to the incident's "better action" question.
    ///
    /// A later answer replaces an earlier one.
    pub async fn submit_incident_quiz(
        &self,
        user_id: &str,
        incident_id: &str,
        selected_index: i64,
    ) -> AppResult<IncidentQuizResult> {
        let result = run_in_transaction(self.store.as_ref(), &self.retry, |tx| async move {
            let mut incident = load_owned(&tx, user_id, incident_id).await?;

            let option_count = incident.quiz.options.len();
            let selected = usize::try_from(selected_index)
                .ok()
                .filter(|index| *index < option_count)
                .ok_or_else(|| {
                    AppError::Validation(format!(
                        "selected_answer_index must be between 0 and {}",
                        option_count.saturating_sub(1)
                    ))
                })?;

            if let Some(previous) = incident.quiz.user_selected_index {
                tracing::info!(
                    "Overwriting incident {} quiz answer {} with {}",
                    incident_id,
                    previous,
                    selected
                );
            }

            let is_correct = selected == incident.quiz.correct_answer_index;
            incident.quiz.user_selected_index = Some(selected);
            incident.quiz.is_correct = Some(is_correct);
            tx.set_record(&paths::incident(incident_id), &incident).await?;

            Ok::<_, AppError>(IncidentQuizResult {
                is_correct,
                correct_answer_index: incident.quiz.correct_answer_index,
                explanation: incident.quiz.explanation.clone(),
            })
        })
        .await?;

        INCIDENT_QUIZ_SUBMISSIONS_TOTAL
            .with_label_values(&[if result.is_correct { "true" } else { "false" }])
            .inc();
        Ok(result)
    }
}

fn ensure_owner(incident: &Incident, user_id: &str) -> AppResult<()> {
    if incident.user_id != user_id {
        tracing::warn!(
            "User {} attempted to access incident {} owned by another user",
            user_id,
            incident.incident_id
        );
        return Err(AppError::Forbidden(
            "Not authorized for this incident".to_string(),
        ));
    }
    Ok(())
}

async fn load_owned(tx: &Transaction, user_id: &str, incident_id: &str) -> AppResult<Incident> {
    let incident: Incident = tx
        .get_record(&paths::incident(incident_id))
        .await?
        .ok_or_else(|| AppError::IncidentNotFound(incident_id.to_string()))?;
    ensure_owner(&incident, user_id)?;
    Ok(incident)
}
