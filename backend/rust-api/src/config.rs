use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::utils::retry::RetryConfig;

pub const DEFAULT_TOPICS: [&str; 4] = [
    "Stop Sign Rules",
    "Defensive Driving",
    "4-Way Intersections",
    "Proper Braking",
];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub bind_addr: String,
    pub mongo_uri: String,
    pub mongo_database: String,
    pub redis_uri: Option<String>,
    pub jwt_secret: String,
    pub metrics_auth: String,
    pub cors_allowed_origins: Vec<String>,
    pub generator: GeneratorConfig,
    pub quiz_pool: QuizPoolConfig,
    pub daily_quiz: DailyQuizConfig,
    pub transactions: TransactionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    pub api_url: String,
    pub api_key: String,
    pub quiz_model: String,
    pub analysis_model: String,
    pub timeout_secs: u64,
    pub analysis_timeout_secs: u64,
}

impl GeneratorConfig {
    pub fn quiz_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuizPoolConfig {
    pub target_count: usize,
    pub default_topics: Vec<String>,
    pub default_experience: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DailyQuizConfig {
    /// UTC wall-clock time, `HH:MM`.
    pub run_at: String,
    pub embedded_scheduler: bool,
    /// Wait between attempts while today's quiz is missing after a failed run.
    pub retry_interval_secs: u64,
}

impl DailyQuizConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionConfig {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl TransactionConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            jitter_max: Some(Duration::from_millis(self.base_backoff_ms)),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: String::new(),
            quiz_model: "gemini-2.5-flash".to_string(),
            analysis_model: "gemini-2.5-pro".to_string(),
            timeout_secs: 30,
            analysis_timeout_secs: 300,
        }
    }
}

impl Default for QuizPoolConfig {
    fn default() -> Self {
        Self {
            target_count: 3,
            default_topics: DEFAULT_TOPICS.iter().map(|t| t.to_string()).collect(),
            default_experience: "Intermediate".to_string(),
        }
    }
}

impl Default for DailyQuizConfig {
    fn default() -> Self {
        Self {
            run_at: "00:05".to_string(),
            embedded_scheduler: false,
            retry_interval_secs: 300,
        }
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 20,
            max_backoff_ms: 500,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load environment variables from root .env file (two levels up)
        // Try root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        // Determine environment (defaults to dev)
        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // Build configuration from config/*.toml + ENV overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            // Override with environment variables (prefix: APP_)
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017/?replicaSet=rs0".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "drivecoach".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .ok()
            .filter(|uri| !uri.is_empty());

        let jwt_secret = match settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
        {
            Ok(secret) => secret,
            Err(_) if app_env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            Err(_) => {
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                "dev-secret-only-for-local-testing".to_string()
            }
        };

        let metrics_auth = settings
            .get_string("metrics.auth")
            .or_else(|_| env::var("METRICS_AUTH"))
            .unwrap_or_else(|_| "admin:changeme".to_string());

        let cors_allowed_origins = settings
            .get_string("server.cors_allowed_origins")
            .or_else(|_| env::var("CORS_ALLOWED_ORIGINS"))
            .map(|raw| {
                raw.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let generator_defaults = GeneratorConfig::default();
        let generator = GeneratorConfig {
            api_url: settings
                .get_string("generator.api_url")
                .or_else(|_| env::var("GENERATOR_API_URL"))
                .unwrap_or(generator_defaults.api_url),
            api_key: settings
                .get_string("generator.api_key")
                .or_else(|_| env::var("GEMINI_API_KEY"))
                .unwrap_or_default(),
            quiz_model: settings
                .get_string("generator.quiz_model")
                .unwrap_or(generator_defaults.quiz_model),
            analysis_model: settings
                .get_string("generator.analysis_model")
                .unwrap_or(generator_defaults.analysis_model),
            timeout_secs: settings
                .get_int("generator.timeout_secs")
                .ok()
                .map(|v| v as u64)
                .or_else(|| env_parse("GENERATOR_TIMEOUT_SECS"))
                .unwrap_or(generator_defaults.timeout_secs),
            analysis_timeout_secs: settings
                .get_int("generator.analysis_timeout_secs")
                .ok()
                .map(|v| v as u64)
                .or_else(|| env_parse("GENERATOR_ANALYSIS_TIMEOUT_SECS"))
                .unwrap_or(generator_defaults.analysis_timeout_secs),
        };

        if generator.api_key.is_empty() {
            eprintln!("WARNING: GEMINI_API_KEY is not set, content generation will fail");
        }

        let pool_defaults = QuizPoolConfig::default();
        let quiz_pool = QuizPoolConfig {
            target_count: settings
                .get_int("quiz_pool.target_count")
                .ok()
                .map(|v| v.max(0) as usize)
                .or_else(|| env_parse("QUIZ_POOL_TARGET_COUNT"))
                .unwrap_or(pool_defaults.target_count),
            default_topics: settings
                .get_array("quiz_pool.default_topics")
                .ok()
                .map(|values| {
                    values
                        .into_iter()
                        .filter_map(|v| v.into_string().ok())
                        .collect()
                })
                .unwrap_or(pool_defaults.default_topics),
            default_experience: settings
                .get_string("quiz_pool.default_experience")
                .unwrap_or(pool_defaults.default_experience),
        };

        let daily_defaults = DailyQuizConfig::default();
        let daily_quiz = DailyQuizConfig {
            run_at: settings
                .get_string("daily_quiz.run_at")
                .or_else(|_| env::var("DAILY_QUIZ_RUN_AT"))
                .unwrap_or(daily_defaults.run_at),
            embedded_scheduler: settings
                .get_bool("daily_quiz.embedded_scheduler")
                .ok()
                .or_else(|| env_parse("DAILY_QUIZ_EMBEDDED_SCHEDULER"))
                .unwrap_or(daily_defaults.embedded_scheduler),
            retry_interval_secs: settings
                .get_int("daily_quiz.retry_interval_secs")
                .ok()
                .map(|v| v as u64)
                .or_else(|| env_parse("DAILY_QUIZ_RETRY_INTERVAL_SECS"))
                .unwrap_or(daily_defaults.retry_interval_secs),
        };

        if crate::utils::time::parse_run_at(&daily_quiz.run_at).is_none() {
            return Err(config::ConfigError::Message(format!(
                "daily_quiz.run_at must be HH:MM, got {:?}",
                daily_quiz.run_at
            )));
        }

        let tx_defaults = TransactionConfig::default();
        let transactions = TransactionConfig {
            max_attempts: settings
                .get_int("transactions.max_attempts")
                .ok()
                .map(|v| v.max(1) as usize)
                .unwrap_or(tx_defaults.max_attempts),
            base_backoff_ms: settings
                .get_int("transactions.base_backoff_ms")
                .ok()
                .map(|v| v.max(0) as u64)
                .unwrap_or(tx_defaults.base_backoff_ms),
            max_backoff_ms: settings
                .get_int("transactions.max_backoff_ms")
                .ok()
                .map(|v| v.max(0) as u64)
                .unwrap_or(tx_defaults.max_backoff_ms),
        };

        Ok(Config {
            bind_addr,
            mongo_uri,
            mongo_database,
            redis_uri,
            jwt_secret,
            metrics_auth,
            cors_allowed_origins,
            generator,
            quiz_pool,
            daily_quiz,
            transactions,
        })
    }

    /// Configuration with local defaults and no external services, used by tests.
    pub fn for_tests() -> Self {
        Config {
            bind_addr: "127.0.0.1:0".to_string(),
            mongo_uri: String::new(),
            mongo_database: "drivecoach_test".to_string(),
            redis_uri: None,
            jwt_secret: "test-secret".to_string(),
            metrics_auth: "admin:changeme".to_string(),
            cors_allowed_origins: Vec::new(),
            generator: GeneratorConfig {
                timeout_secs: 2,
                analysis_timeout_secs: 2,
                ..GeneratorConfig::default()
            },
            quiz_pool: QuizPoolConfig::default(),
            daily_quiz: DailyQuizConfig::default(),
            transactions: TransactionConfig {
                max_attempts: 10,
                base_backoff_ms: 1,
                max_backoff_ms: 10,
            },
        }
    }
}
