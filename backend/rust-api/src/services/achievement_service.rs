use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::achievement::{Achievement, RECENT_ACHIEVEMENTS_LIMIT};
use crate::store::{decode_all, encode_record, paths, Direction, DocumentStore, Query};

pub struct AchievementService {
    store: Arc<dyn DocumentStore>,
}

impl AchievementService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Grants a badge stamped with the server time.
    pub async fn grant(
        &self,
        user_id: &str,
        achievement_name: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Achievement> {
        let achievement = Achievement {
            id: Uuid::new_v4().to_string(),
            achievement_name: achievement_name.to_string(),
            achieved_at: now,
        };

        self.store
            .create(
                &paths::achievements(user_id).doc(achievement.id.clone()),
                encode_record(&achievement)?,
            )
            .await?;

        tracing::info!("Granted achievement {:?} to {}", achievement_name, user_id);
        Ok(achievement)
    }

    pub async fn recent(&self, user_id: &str) -> AppResult<Vec<Achievement>> {
        let docs = self
            .store
            .query(
                &paths::achievements(user_id),
                &Query::all()
                    .order_by("achieved_at", Direction::Descending)
                    .limit(RECENT_ACHIEVEMENTS_LIMIT),
            )
            .await?;
        Ok(decode_all(docs))
    }
}
