use std::sync::Arc;

use crate::config::Config;
use crate::services::content_generator::{ContentGenerator, GeminiContentGenerator};
use crate::store::{DocumentStore, MongoStore};
use crate::utils::retry::RetryConfig;
use mongodb::Client as MongoClient;
use redis::aio::ConnectionManager;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn DocumentStore>,
    pub generator: Arc<dyn ContentGenerator>,
    pub redis: Option<ConnectionManager>,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: Option<redis::Client>,
    ) -> anyhow::Result<Self> {
        let store = MongoStore::new(mongo_client, &config.mongo_database);
        if let Err(e) = store.ensure_indexes().await {
            tracing::warn!("Failed to create MongoDB indexes: {}", e);
        }

        let generator = GeminiContentGenerator::new(config.generator.clone())?;

        let redis = match redis_client {
            Some(client) => Some(connect_redis(client).await?),
            None => {
                tracing::warn!("Redis URI not configured, rate limiting disabled");
                None
            }
        };

        Ok(Self {
            config,
            store: Arc::new(store),
            generator: Arc::new(generator),
            redis,
        })
    }

    /// Assembles state from ready-made parts (in-memory store, fake generator).
    pub fn with_components(
        config: Config,
        store: Arc<dyn DocumentStore>,
        generator: Arc<dyn ContentGenerator>,
        redis: Option<ConnectionManager>,
    ) -> Self {
        Self {
            config,
            store,
            generator,
            redis,
        }
    }

    pub fn transaction_retry(&self) -> RetryConfig {
        self.config.transactions.retry_config()
    }
}

async fn connect_redis(redis_client: redis::Client) -> anyhow::Result<ConnectionManager> {
    tracing::info!("Attempting to connect to Redis...");

    let redis = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        ConnectionManager::new(redis_client),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    tracing::info!("Redis ConnectionManager created, testing with PING...");

    let mut conn = redis.clone();
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    tracing::info!("Redis connection established successfully");

    Ok(redis)
}

pub mod achievement_service;
pub mod content_generator;
pub mod daily_quiz_service;
pub mod gamification;
pub mod incident_service;
pub mod quiz_pool_service;
pub mod quiz_submission_service;
pub mod user_service;
