mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use drivecoach_api::{
    config::DEFAULT_TOPICS,
    models::quiz::{GeneratedQuiz, QuestionType, QuizQuestion},
    services::content_generator::GenerationError,
    store::{paths, DocumentStore, Query},
};
use serde_json::json;
use uuid::Uuid;

use common::{
    driver_token, sample_quiz, seed_active_quiz, seed_completion, seed_daily_quiz,
    seed_default_profile, send, Scripted,
};

fn user_id() -> String {
    format!("driver-{}", Uuid::new_v4())
}

fn quiz_ids(body: &serde_json::Value) -> Vec<String> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|q| q["quiz_id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn test_active_quizzes_put_daily_first_and_fill_pool() {
    let app = common::create_test_app();
    let uid = user_id();
    seed_default_profile(&app.store, &uid).await;
    let daily_id = seed_daily_quiz(&app.store, sample_quiz("Night Driving", &[1]), Utc::now()).await;

    let (status, body) = send(&app, "GET", "/api/v1/quiz/active", Some(&driver_token(&uid)), None).await;

    assert_eq!(status, StatusCode::OK);
    let quizzes = body.as_array().unwrap();
    assert_eq!(quizzes.len(), 4);
    assert_eq!(quizzes[0]["quiz_id"], daily_id.as_str());
    assert_eq!(quizzes[0]["is_daily"], true);
    assert_eq!(quizzes[0]["is_completed"], false);
    for quiz in &quizzes[1..] {
        assert_eq!(quiz["is_daily"], false);
        assert_eq!(quiz["is_completed"], false);
        // Answers are never exposed before submission
        assert!(quiz["questions"][0].get("correct_answer_index").is_none());
    }

    let stored = app
        .store
        .query(&paths::active_quizzes(&uid), &Query::all())
        .await
        .unwrap();
    assert_eq!(stored.len(), 3);
}

#[tokio::test]
async fn test_refill_exclusions_grow_with_each_generated_topic() {
    let app = common::create_test_app();
    let uid = user_id();
    seed_default_profile(&app.store, &uid).await;
    seed_completion(&app.store, &uid, "done-1", "Tailgating", Utc::now()).await;

    let (status, body) = send(&app, "GET", "/api/v1/quiz/active", Some(&driver_token(&uid)), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);

    let log = app.generator.exclusion_log();
    assert_eq!(log.len(), 3);

    for topic in DEFAULT_TOPICS {
        assert!(log[0].iter().any(|t| t == topic));
    }
    assert!(log[0].iter().any(|t| t == "Tailgating"));

    for window in log.windows(2) {
        let (before, after) = (&window[0], &window[1]);
        assert_eq!(after.len(), before.len() + 1);
        assert!(before.iter().all(|t| after.contains(t)));
    }

    // Each call adds exactly the topic accepted by the previous one
    let topics: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|q| q["topic"].as_str().unwrap())
        .collect();
    for window in log.windows(2) {
        let added: Vec<&String> = window[1].iter().filter(|t| !window[0].contains(*t)).collect();
        assert_eq!(added.len(), 1);
        assert!(topics.contains(&added[0].as_str()));
    }
}

#[tokio::test]
async fn test_quizzes_completed_before_today_are_cleaned_up() {
    let app = common::create_test_app();
    let uid = user_id();
    let now = Utc::now();
    seed_default_profile(&app.store, &uid).await;

    seed_active_quiz(&app.store, &uid, "old", sample_quiz("Old Topic", &[0]), now - Duration::days(2)).await;
    seed_completion(&app.store, &uid, "old", "Old Topic", now - Duration::days(1)).await;

    seed_active_quiz(&app.store, &uid, "done-today", sample_quiz("Today Topic", &[0]), now - Duration::minutes(2)).await;
    seed_completion(&app.store, &uid, "done-today", "Today Topic", now).await;

    seed_active_quiz(&app.store, &uid, "open", sample_quiz("Open Topic", &[0]), now - Duration::minutes(1)).await;

    let (status, body) = send(&app, "GET", "/api/v1/quiz/active", Some(&driver_token(&uid)), None).await;
    assert_eq!(status, StatusCode::OK);

    let ids = quiz_ids(&body);
    assert_eq!(ids.len(), 3);
    assert!(!ids.contains(&"old".to_string()));
    assert!(ids.contains(&"done-today".to_string()));
    assert!(ids.contains(&"open".to_string()));

    let done_today = body
        .as_array()
        .unwrap()
        .iter()
        .find(|q| q["quiz_id"] == "done-today")
        .unwrap();
    assert_eq!(done_today["is_completed"], true);
    assert_eq!(done_today["past_results"]["final_score"], 100.0);

    assert!(app.store.get(&paths::active_quiz(&uid, "old")).await.unwrap().is_none());
    // Completion history is kept
    assert!(app.store.get(&paths::completed_quiz(&uid, "old")).await.unwrap().is_some());

    // Only the single missing slot was generated, avoiding every known topic
    let log = app.generator.exclusion_log();
    assert_eq!(log.len(), 1);
    for topic in ["Old Topic", "Today Topic", "Open Topic"] {
        assert!(log[0].iter().any(|t| t == topic));
    }
}

#[tokio::test]
async fn test_failed_generations_skip_slots() {
    let app = common::create_test_app();
    let uid = user_id();
    seed_default_profile(&app.store, &uid).await;

    app.generator.push_quiz(Scripted::Fail(GenerationError::Transport(
        "connection reset".to_string(),
    )));
    // Collides with a default topic
    app.generator
        .push_quiz(Scripted::Reply(sample_quiz("defensive  driving", &[0])));
    app.generator.push_quiz(Scripted::Reply(GeneratedQuiz {
        topic: "Broken".to_string(),
        questions: vec![QuizQuestion {
            question_text: "Out of range".to_string(),
            question_type: QuestionType::MultipleChoice,
            options: vec!["a".to_string(), "b".to_string()],
            correct_answer_index: 5,
        }],
    }));

    let token = driver_token(&uid);
    let (status, body) = send(&app, "GET", "/api/v1/quiz/active", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());

    // The next read tries again
    let (status, body) = send(&app, "GET", "/api/v1/quiz/active", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_generator_timeout_skips_only_that_slot() {
    let app = common::create_test_app();
    let uid = user_id();
    seed_default_profile(&app.store, &uid).await;
    app.generator.push_quiz(Scripted::Hang);

    let (status, body) = send(&app, "GET", "/api/v1/quiz/active", Some(&driver_token(&uid)), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_stale_daily_quiz_is_omitted() {
    let app = common::create_test_app();
    let uid = user_id();
    seed_default_profile(&app.store, &uid).await;
    let stale_id = seed_daily_quiz(
        &app.store,
        sample_quiz("Yesterday's Topic", &[0]),
        Utc::now() - Duration::days(2),
    )
    .await;

    let (status, body) = send(&app, "GET", "/api/v1/quiz/active", Some(&driver_token(&uid)), None).await;

    assert_eq!(status, StatusCode::OK);
    assert!(!quiz_ids(&body).contains(&stale_id));
    assert!(body.as_array().unwrap().iter().all(|q| q["is_daily"] == false));
}

#[tokio::test]
async fn test_unreadable_daily_quiz_is_omitted() {
    let app = common::create_test_app();
    let uid = user_id();
    seed_default_profile(&app.store, &uid).await;
    let daily_id = seed_daily_quiz(&app.store, sample_quiz("Night Driving", &[1]), Utc::now()).await;

    // Written by a newer release
    let mut raw = app.store.get(&paths::daily_quiz()).await.unwrap().unwrap();
    raw["schema_version"] = json!(99);
    app.store.set(&paths::daily_quiz(), raw).await.unwrap();

    let (status, body) = send(&app, "GET", "/api/v1/quiz/active", Some(&driver_token(&uid)), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 3);
    assert!(!quiz_ids(&body).contains(&daily_id));
    assert!(body.as_array().unwrap().iter().all(|q| q["is_daily"] == false));
}

#[tokio::test]
async fn test_active_quizzes_require_profile() {
    let app = common::create_test_app();
    let uid = user_id();

    let (status, body) = send(&app, "GET", "/api/v1/quiz/active", Some(&driver_token(&uid)), None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "USER_NOT_FOUND");
    assert!(app.generator.exclusion_log().is_empty());
}

#[tokio::test]
async fn test_history_is_newest_first() {
    let app = common::create_test_app();
    let uid = user_id();
    let now = Utc::now();
    seed_default_profile(&app.store, &uid).await;
    seed_completion(&app.store, &uid, "q-old", "Old", now - Duration::days(3)).await;
    seed_completion(&app.store, &uid, "q-new", "New", now).await;
    seed_completion(&app.store, &uid, "q-mid", "Mid", now - Duration::days(1)).await;

    let (status, body) = send(&app, "GET", "/api/v1/quiz/history", Some(&driver_token(&uid)), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(quiz_ids(&body), vec!["q-new", "q-mid", "q-old"]);
    assert!(body.as_array().unwrap().iter().all(|q| q["is_completed"] == true));
}

#[tokio::test]
async fn test_generate_quiz_adds_topic_to_pool() {
    let app = common::create_test_app();
    let uid = user_id();
    seed_default_profile(&app.store, &uid).await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/quiz/generate",
        Some(&driver_token(&uid)),
        Some(json!({"topic": "Highway Merging"})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["topic"], "Highway Merging");
    assert_eq!(body["is_daily"], false);

    let quiz_id = body["quiz_id"].as_str().unwrap();
    assert!(app
        .store
        .get(&paths::active_quiz(&uid, quiz_id))
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_generate_quiz_failure_is_reported() {
    let app = common::create_test_app();
    let uid = user_id();
    seed_default_profile(&app.store, &uid).await;
    app.generator.push_quiz(Scripted::Fail(GenerationError::Upstream {
        status: 503,
        message: "overloaded".to_string(),
    }));

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/quiz/generate",
        Some(&driver_token(&uid)),
        Some(json!({"topic": "Highway Merging"})),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "GENERATION_FAILED");
}

#[tokio::test]
async fn test_generate_quiz_validates_topic() {
    let app = common::create_test_app();
    let uid = user_id();

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/quiz/generate",
        Some(&driver_token(&uid)),
        Some(json!({"topic": ""})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}
