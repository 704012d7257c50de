use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::store::Record;
use crate::utils::time::rfc3339_millis;

pub const RECENT_ACHIEVEMENTS_LIMIT: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Achievement {
    pub id: String,
    pub achievement_name: String,
    #[serde(with = "rfc3339_millis")]
    pub achieved_at: DateTime<Utc>,
}

impl Record for Achievement {
    const KIND: &'static str = "achievement";
    const SCHEMA_VERSION: u32 = 1;
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateAchievementRequest {
    #[validate(length(min = 1, max = 100, message = "Achievement name must be 1-100 characters"))]
    pub achievement_name: String,
}
