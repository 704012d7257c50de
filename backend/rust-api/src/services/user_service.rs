use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::models::user::{CreateProfileRequest, UserInfo, UserProfile};
use crate::store::{decode_record, encode_record, paths, DocumentStore, StoreError};

pub struct UserService {
    store: Arc<dyn DocumentStore>,
}

impl UserService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub async fn create_profile(
        &self,
        user_id: &str,
        req: CreateProfileRequest,
        now: DateTime<Utc>,
    ) -> AppResult<UserInfo> {
        let profile = UserProfile::new(req.first_name, req.email, req.experience_level, now);

        self.store
            .create(&paths::user(user_id), encode_record(&profile)?)
            .await
            .map_err(|e| match e {
                StoreError::AlreadyExists(_) => AppError::ProfileExists(user_id.to_string()),
                other => AppError::from(other),
            })?;

        tracing::info!("Created profile for user {}", user_id);
        Ok(profile.into())
    }

    pub async fn get_profile(&self, user_id: &str) -> AppResult<UserProfile> {
        let value = self
            .store
            .get(&paths::user(user_id))
            .await?
            .ok_or_else(|| AppError::UserNotFound(user_id.to_string()))?;
        Ok(decode_record(value)?)
    }

    pub async fn get_user_info(&self, user_id: &str) -> AppResult<UserInfo> {
        Ok(self.get_profile(user_id).await?.into())
    }

    pub async fn update_resolved_incidents(
        &self,
        user_id: &str,
        resolved_incidents: u32,
    ) -> AppResult<UserInfo> {
        self.update_field(user_id, "resolved_incidents", Value::from(resolved_incidents))
            .await
    }

    pub async fn update_experience_level(
        &self,
        user_id: &str,
        experience_level: &str,
    ) -> AppResult<UserInfo> {
        self.update_field(user_id, "experience_level", Value::from(experience_level))
            .await
    }

    async fn update_field(&self, user_id: &str, field: &str, value: Value) -> AppResult<UserInfo> {
        let mut fields = Map::new();
        fields.insert(field.to_string(), value);

        self.store
            .update(&paths::user(user_id), fields)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => AppError::UserNotFound(user_id.to_string()),
                other => AppError::from(other),
            })?;

        self.get_user_info(user_id).await
    }
}
