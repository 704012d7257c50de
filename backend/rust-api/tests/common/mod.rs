#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tower::ServiceExt;

use drivecoach_api::{
    config::Config,
    create_router,
    middlewares::auth::{JwtClaims, JwtService, ROLE_DRIVER},
    models::{
        incident::{IncidentAnalysis, IncidentAnalysisSummary, IncidentQuiz, Severity},
        quiz::{
            ActiveQuiz, DailyQuiz, GeneratedQuiz, QuestionResult, QuestionType, QuizCompletion,
            QuizQuestion,
        },
        user::UserProfile,
    },
    services::{
        content_generator::{ContentGenerator, GenerationError, TopicExclusions},
        AppState,
    },
    store::{encode_record, paths, DocumentStore, MemoryStore},
    utils::time::{daily_quiz_id, utc_date},
};

/// One scripted generator reply.
pub enum Scripted<T> {
    Reply(T),
    Fail(GenerationError),
    /// Never answers within any test timeout.
    Hang,
}

/// Generator fake: replays queued replies, then falls back to unique canned content.
#[derive(Default)]
pub struct ScriptedGenerator {
    quizzes: Mutex<VecDeque<Scripted<GeneratedQuiz>>>,
    analyses: Mutex<VecDeque<Scripted<IncidentAnalysis>>>,
    exclusion_log: Mutex<Vec<Vec<String>>>,
    counter: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn push_quiz(&self, reply: Scripted<GeneratedQuiz>) {
        self.quizzes.lock().unwrap().push_back(reply);
    }

    pub fn push_analysis(&self, reply: Scripted<IncidentAnalysis>) {
        self.analyses.lock().unwrap().push_back(reply);
    }

    /// Exclusion sets seen by each `generate_quiz_excluding` call, in call order.
    pub fn exclusion_log(&self) -> Vec<Vec<String>> {
        self.exclusion_log.lock().unwrap().clone()
    }

    async fn next_quiz(&self, topic: Option<&str>) -> Result<GeneratedQuiz, GenerationError> {
        let scripted = self.quizzes.lock().unwrap().pop_front();
        match scripted {
            Some(Scripted::Reply(quiz)) => Ok(quiz),
            Some(Scripted::Fail(err)) => Err(err),
            Some(Scripted::Hang) => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(GenerationError::Transport("hung".to_string()))
            }
            None => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst);
                let topic = topic
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Generated Topic {}", n));
                Ok(sample_quiz(&topic, &[0, 1]))
            }
        }
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn generate_quiz(
        &self,
        topic: &str,
        _experience: &str,
    ) -> Result<GeneratedQuiz, GenerationError> {
        self.next_quiz(Some(topic)).await
    }

    async fn generate_quiz_excluding(
        &self,
        _experience: &str,
        excluded: &TopicExclusions,
    ) -> Result<GeneratedQuiz, GenerationError> {
        self.exclusion_log
            .lock()
            .unwrap()
            .push(excluded.topics().to_vec());
        self.next_quiz(None).await
    }

    async fn analyze_incident(&self, _video_url: &str) -> Result<IncidentAnalysis, GenerationError> {
        let scripted = self.analyses.lock().unwrap().pop_front();
        match scripted {
            Some(Scripted::Reply(analysis)) => Ok(analysis),
            Some(Scripted::Fail(err)) => Err(err),
            Some(Scripted::Hang) => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(GenerationError::Transport("hung".to_string()))
            }
            None => Ok(sample_analysis()),
        }
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub generator: Arc<ScriptedGenerator>,
}

pub fn create_test_app() -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let store = Arc::new(MemoryStore::new());
    let generator = Arc::new(ScriptedGenerator::default());

    let state = Arc::new(AppState::with_components(
        Config::for_tests(),
        store.clone(),
        generator.clone(),
        None,
    ));

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
        generator,
    }
}

pub fn token_for(user_id: &str, role: &str) -> String {
    JwtService::new(&Config::for_tests().jwt_secret)
        .generate_token(&JwtClaims::new(user_id, role, 3600))
        .unwrap()
}

pub fn driver_token(user_id: &str) -> String {
    token_for(user_id, ROLE_DRIVER)
}

/// Sends a request through the router and returns the status with the parsed JSON body
/// (`Value::Null` for empty bodies).
pub async fn send(
    app: &TestApp,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

// ---------- Fixtures ----------

/// Multiple-choice quiz with one question per entry of `correct`.
pub fn sample_quiz(topic: &str, correct: &[usize]) -> GeneratedQuiz {
    GeneratedQuiz {
        topic: topic.to_string(),
        questions: correct
            .iter()
            .enumerate()
            .map(|(i, &answer)| QuizQuestion {
                question_text: format!("{} question {}", topic, i + 1),
                question_type: QuestionType::MultipleChoice,
                options: vec![
                    "Option A".to_string(),
                    "Option B".to_string(),
                    "Option C".to_string(),
                    "Option D".to_string(),
                ],
                correct_answer_index: answer,
            })
            .collect(),
    }
}

pub fn sample_analysis() -> IncidentAnalysis {
    IncidentAnalysis {
        analysis: IncidentAnalysisSummary {
            incident_summary: "Driver rolled through a stop sign at low speed.".to_string(),
            severity: Severity::Medium,
            better_action_quiz: IncidentQuiz {
                question: "What should the driver have done?".to_string(),
                options: vec![
                    "Come to a full stop".to_string(),
                    "Speed up".to_string(),
                    "Honk".to_string(),
                ],
                correct_answer_index: 0,
                explanation: "A full stop is required at every stop sign.".to_string(),
                user_selected_index: None,
                is_correct: None,
            },
        },
        simulation_actual_html: "<html>actual</html>".to_string(),
        simulation_better_outcome_html: "<html>better</html>".to_string(),
    }
}

pub async fn seed_profile(store: &MemoryStore, user_id: &str, profile: UserProfile) {
    store
        .create(&paths::user(user_id), encode_record(&profile).unwrap())
        .await
        .unwrap();
}

pub async fn seed_default_profile(store: &MemoryStore, user_id: &str) -> UserProfile {
    let profile = UserProfile::new("Alex".to_string(), None, None, Utc::now());
    seed_profile(store, user_id, profile.clone()).await;
    profile
}

pub async fn seed_active_quiz(
    store: &MemoryStore,
    user_id: &str,
    quiz_id: &str,
    quiz: GeneratedQuiz,
    created_at: DateTime<Utc>,
) {
    let active = ActiveQuiz {
        quiz_id: quiz_id.to_string(),
        topic: quiz.topic,
        questions: quiz.questions,
        experience_level: "Intermediate".to_string(),
        created_at,
    };
    store
        .create(
            &paths::active_quiz(user_id, quiz_id),
            encode_record(&active).unwrap(),
        )
        .await
        .unwrap();
}

/// Stores `quiz` as the daily quiz for the UTC date of `at` and returns its id.
pub async fn seed_daily_quiz(store: &MemoryStore, quiz: GeneratedQuiz, at: DateTime<Utc>) -> String {
    let date = utc_date(at);
    let daily = DailyQuiz {
        quiz_id: daily_quiz_id(date),
        quiz_date: date,
        topic: quiz.topic,
        questions: quiz.questions,
        generated_at: at,
    };
    store
        .set(&paths::daily_quiz(), encode_record(&daily).unwrap())
        .await
        .unwrap();
    daily.quiz_id
}

pub async fn seed_completion(
    store: &MemoryStore,
    user_id: &str,
    quiz_id: &str,
    topic: &str,
    completed_at: DateTime<Utc>,
) {
    let quiz = sample_quiz(topic, &[0]);
    let completion = QuizCompletion {
        quiz_id: quiz_id.to_string(),
        topic: topic.to_string(),
        completed_at,
        final_score: 100.0,
        correct_count: 1,
        results: vec![QuestionResult {
            is_correct: true,
            user_answer_index: 0,
            correct_answer_index: 0,
        }],
        questions: quiz.questions,
    };
    store
        .create(
            &paths::completed_quiz(user_id, quiz_id),
            encode_record(&completion).unwrap(),
        )
        .await
        .unwrap();
}

pub async fn load_profile(store: &MemoryStore, user_id: &str) -> UserProfile {
    let value = store.get(&paths::user(user_id)).await.unwrap().unwrap();
    drivecoach_api::store::decode_record(value).unwrap()
}
