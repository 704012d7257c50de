use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::quiz::default_experience_level;
use crate::store::Record;
use crate::utils::time::rfc3339_millis;

pub const DEFAULT_SAFETY_SCORE: f64 = 50.0;

/// Profile document at `users/{uid}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default = "default_safety_score")]
    pub safety_score: f64,
    #[serde(default)]
    pub daily_quiz_streak: u32,
    #[serde(default, with = "rfc3339_millis::option")]
    pub last_daily_quiz: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_incidents: u32,
    #[serde(default = "default_experience_level")]
    pub experience_level: String,
    #[serde(with = "rfc3339_millis")]
    pub created_at: DateTime<Utc>,
}

impl Record for UserProfile {
    const KIND: &'static str = "user_profile";
    const SCHEMA_VERSION: u32 = 1;
}

fn default_safety_score() -> f64 {
    DEFAULT_SAFETY_SCORE
}

impl UserProfile {
    pub fn new(
        first_name: String,
        email: Option<String>,
        experience_level: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            first_name,
            email,
            safety_score: DEFAULT_SAFETY_SCORE,
            daily_quiz_streak: 0,
            last_daily_quiz: None,
            resolved_incidents: 0,
            experience_level: experience_level.unwrap_or_else(default_experience_level),
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub first_name: String,
    pub safety_score: f64,
    pub daily_quiz_streak: u32,
    pub resolved_incidents: u32,
    pub experience_level: String,
}

impl From<UserProfile> for UserInfo {
    fn from(profile: UserProfile) -> Self {
        Self {
            first_name: profile.first_name,
            safety_score: profile.safety_score,
            daily_quiz_streak: profile.daily_quiz_streak,
            resolved_incidents: profile.resolved_incidents,
            experience_level: profile.experience_level,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateProfileRequest {
    #[validate(length(min = 1, max = 100, message = "First name must be 1-100 characters"))]
    pub first_name: String,
    #[validate(email(message = "Invalid email format"))]
    pub email: Option<String>,
    #[validate(length(min = 1, max = 50, message = "Experience level must be 1-50 characters"))]
    pub experience_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateResolvedIncidentsRequest {
    #[validate(range(max = 100000))]
    pub resolved_incidents: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct UpdateExperienceRequest {
    #[validate(length(min = 1, max = 50, message = "Experience level must be 1-50 characters"))]
    pub experience_level: String,
}
