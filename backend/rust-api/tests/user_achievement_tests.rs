mod common;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use drivecoach_api::{
    models::achievement::Achievement,
    store::{encode_record, paths, DocumentStore},
};
use serde_json::json;
use uuid::Uuid;

use common::{driver_token, send};

fn user_id() -> String {
    format!("driver-{}", Uuid::new_v4())
}

#[tokio::test]
async fn test_create_profile_with_defaults() {
    let app = common::create_test_app();
    let token = driver_token(&user_id());

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/users/profile",
        Some(&token),
        Some(json!({"first_name": "Jordan", "email": "jordan@example.com"})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["first_name"], "Jordan");
    assert_eq!(body["safety_score"], 50.0);
    assert_eq!(body["daily_quiz_streak"], 0);
    assert_eq!(body["resolved_incidents"], 0);
    assert_eq!(body["experience_level"], "Intermediate");

    let (status, body) = send(&app, "GET", "/api/v1/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["first_name"], "Jordan");
}

#[tokio::test]
async fn test_duplicate_profile_is_conflict() {
    let app = common::create_test_app();
    let token = driver_token(&user_id());
    let request = json!({"first_name": "Jordan", "experience_level": "Beginner"});

    let (status, _) = send(&app, "POST", "/api/v1/users/profile", Some(&token), Some(request.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, "POST", "/api/v1/users/profile", Some(&token), Some(request)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "PROFILE_EXISTS");
}

#[tokio::test]
async fn test_profile_validation_and_missing_profile() {
    let app = common::create_test_app();
    let token = driver_token(&user_id());

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/users/profile",
        Some(&token),
        Some(json!({"first_name": "Jordan", "email": "not-an-email"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, "GET", "/api/v1/users/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "USER_NOT_FOUND");

    let (status, _) = send(
        &app,
        "PATCH",
        "/api/v1/users/me/experience",
        Some(&token),
        Some(json!({"experience_level": "Expert"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_update_resolved_incidents_and_experience() {
    let app = common::create_test_app();
    let uid = user_id();
    let token = driver_token(&uid);
    common::seed_default_profile(&app.store, &uid).await;

    let (status, body) = send(
        &app,
        "PATCH",
        "/api/v1/users/me/resolved-incidents",
        Some(&token),
        Some(json!({"resolved_incidents": 7})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resolved_incidents"], 7);

    let (status, body) = send(
        &app,
        "PATCH",
        "/api/v1/users/me/experience",
        Some(&token),
        Some(json!({"experience_level": "Expert"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["experience_level"], "Expert");
    assert_eq!(body["resolved_incidents"], 7);

    let profile = common::load_profile(&app.store, &uid).await;
    assert_eq!(profile.experience_level, "Expert");
    assert_eq!(profile.safety_score, 50.0);
}

#[tokio::test]
async fn test_grant_achievement_uses_server_time() {
    let app = common::create_test_app();
    let token = driver_token(&user_id());
    let before = Utc::now();

    let (status, body) = send(
        &app,
        "POST",
        "/api/v1/achievements",
        Some(&token),
        Some(json!({"achievement_name": "First Quiz"})),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["achievement_name"], "First Quiz");
    let achieved_at: chrono::DateTime<Utc> = body["achieved_at"].as_str().unwrap().parse().unwrap();
    assert!(achieved_at >= before - Duration::seconds(1));
}

#[tokio::test]
async fn test_recent_achievements_returns_latest_four() {
    let app = common::create_test_app();
    let uid = user_id();
    let now = Utc::now();

    for i in 0..6 {
        let achievement = Achievement {
            id: format!("a{}", i),
            achievement_name: format!("Badge {}", i),
            achieved_at: now - Duration::hours(6 - i),
        };
        app.store
            .create(
                &paths::achievements(&uid).doc(achievement.id.clone()),
                encode_record(&achievement).unwrap(),
            )
            .await
            .unwrap();
    }

    let (status, body) = send(&app, "GET", "/api/v1/achievements/recent", Some(&driver_token(&uid)), None).await;

    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|a| a["achievement_name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Badge 5", "Badge 4", "Badge 3", "Badge 2"]);
}

#[tokio::test]
async fn test_health_and_metrics_endpoints() {
    let app = common::create_test_app();

    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["dependencies"]["redis"]["status"], "disabled");

    let (status, _) = send(&app, "GET", "/metrics", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
