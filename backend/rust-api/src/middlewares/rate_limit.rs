use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use redis::aio::ConnectionManager;
use std::net::SocketAddr;
use std::sync::Arc;

use super::auth::JwtClaims;
use crate::metrics::RATE_LIMIT_REJECTIONS_TOTAL;
use crate::services::AppState;

const RATE_LIMIT_PER_USER: u32 = 100; // requests per minute
const RATE_LIMIT_PER_IP: u32 = 200; // requests per minute
const RATE_WINDOW_SECONDS: u64 = 60;

// Quiz generation and video analysis call the model and are expensive
const GENERATION_RATE_LIMIT: u32 = 10; // per user per 10 minutes
const GENERATION_RATE_WINDOW_SECONDS: u64 = 600;

// Fixed window: the first hit sets the counter with an expiry
const RATE_LIMIT_SCRIPT: &str = r#"
    local key = KEYS[1]
    local limit = tonumber(ARGV[1])
    local window = tonumber(ARGV[2])

    local current = redis.call('GET', key)

    if current == false then
        redis.call('SET', key, 1, 'EX', window)
        return 1
    end

    current = tonumber(current)

    if current >= limit then
        return 0
    end

    redis.call('INCR', key)
    return 1
"#;

fn extract_client_ip_from(headers: &HeaderMap, extensions: &axum::http::Extensions) -> String {
    // Preferred order: X-Forwarded-For, Forwarded, X-Real-IP, ConnectInfo
    if let Some(v) = headers.get("x-forwarded-for") {
        if let Ok(s) = v.to_str() {
            return s.split(',').next().unwrap_or(s).trim().to_string();
        }
    }

    if let Some(v) = headers.get("forwarded") {
        if let Ok(s) = v.to_str() {
            for part in s.split(';') {
                let p = part.trim();
                if let Some(val) = p.strip_prefix("for=") {
                    return val.trim().trim_matches('"').to_string();
                }
            }
        }
    }

    if let Some(v) = headers.get("x-real-ip") {
        if let Ok(s) = v.to_str() {
            return s.trim().to_string();
        }
    }

    if let Some(ci) = extensions.get::<ConnectInfo<SocketAddr>>() {
        return ci.0.ip().to_string();
    }

    "unknown".to_string()
}

fn rate_limit_disabled() -> bool {
    std::env::var("RATE_LIMIT_DISABLED").unwrap_or_default() == "1"
}

fn limit_from_env(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(default)
}

/// Returns `Err(TOO_MANY_REQUESTS)` when the key is over its limit.
async fn enforce(
    redis: &ConnectionManager,
    scope: &str,
    key: &str,
    limit: u32,
    window_seconds: u64,
) -> Result<(), StatusCode> {
    let allowed = check_rate_limit_with_window(redis, key, limit, window_seconds)
        .await
        .map_err(|e| {
            tracing::error!("Rate limit check failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    if !allowed {
        RATE_LIMIT_REJECTIONS_TOTAL.with_label_values(&[scope]).inc();
        tracing::warn!("Rate limit exceeded for {}", key);
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }
    Ok(())
}

/// General per-user and per-IP limit for authenticated API routes.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(redis) = state.redis.as_ref() else {
        return Ok(next.run(request).await);
    };
    if rate_limit_disabled() {
        tracing::debug!("Rate limiting disabled via RATE_LIMIT_DISABLED=1");
        return Ok(next.run(request).await);
    }

    let client_ip = extract_client_ip_from(request.headers(), request.extensions());
    let user_id = request
        .extensions()
        .get::<JwtClaims>()
        .map(|claims| claims.sub.clone());

    if let Some(uid) = &user_id {
        enforce(
            redis,
            "user",
            &format!("ratelimit:user:{}", uid),
            limit_from_env("RATE_LIMIT_PER_USER", RATE_LIMIT_PER_USER),
            RATE_WINDOW_SECONDS,
        )
        .await?;
    }

    enforce(
        redis,
        "ip",
        &format!("ratelimit:ip:{}", client_ip),
        limit_from_env("RATE_LIMIT_PER_IP", RATE_LIMIT_PER_IP),
        RATE_WINDOW_SECONDS,
    )
    .await?;

    Ok(next.run(request).await)
}

/// Stricter per-user limit for routes that call the content generator.
pub async fn generation_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Some(redis) = state.redis.as_ref() else {
        return Ok(next.run(request).await);
    };
    if rate_limit_disabled() {
        return Ok(next.run(request).await);
    }

    let subject = request
        .extensions()
        .get::<JwtClaims>()
        .map(|claims| claims.sub.clone())
        .unwrap_or_else(|| extract_client_ip_from(request.headers(), request.extensions()));

    enforce(
        redis,
        "generation",
        &format!("ratelimit:generation:{}", subject),
        limit_from_env("RATE_LIMIT_GENERATION", GENERATION_RATE_LIMIT),
        GENERATION_RATE_WINDOW_SECONDS,
    )
    .await?;

    Ok(next.run(request).await)
}

/// Check rate limit using Redis with Lua script for atomicity
async fn check_rate_limit_with_window(
    redis: &ConnectionManager,
    key: &str,
    limit: u32,
    window_seconds: u64,
) -> anyhow::Result<bool> {
    let mut conn = redis.clone();

    let allowed: u32 = redis::Script::new(RATE_LIMIT_SCRIPT)
        .key(key)
        .arg(limit)
        .arg(window_seconds)
        .invoke_async(&mut conn)
        .await?;

    Ok(allowed == 1)
}
