//! Account registration endpoint.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::error;

use crate::account::{normalize_email, valid_email};
use crate::api::ApiState;
use crate::flow::{FlowError, RegisterOutcome};

use super::rate_limit::{RateLimitAction, RateLimitDecision, extract_client_ip};
use super::types::RegisterRequest;

/// Create an unverified account and queue a welcome message.
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created"),
        (status = 409, description = "Email already registered", body = String),
        (status = 422, description = "Invalid email or password policy violation", body = String),
        (status = 429, description = "Rate limited", body = String),
        (status = 503, description = "Credential store unavailable", body = String)
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    state: Extension<Arc<ApiState>>,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    let request: RegisterRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let client_ip = extract_client_ip(&headers);
    if state
        .limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Register)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            "Invalid email address".to_string(),
        )
            .into_response();
    }
    if !state.flow().config().policy().allows(&request.password) {
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            password_policy_message(state.flow().config().policy().min_length()),
        )
            .into_response();
    }

    if state.limiter().check_email(&email, RateLimitAction::Register)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    match state.flow().register(&email, &request.password).await {
        Ok(RegisterOutcome::Created) => StatusCode::CREATED.into_response(),
        Ok(RegisterOutcome::AlreadyExists) => (
            StatusCode::CONFLICT,
            "Email already registered".to_string(),
        )
            .into_response(),
        Ok(RegisterOutcome::PolicyViolation) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            password_policy_message(state.flow().config().policy().min_length()),
        )
            .into_response(),
        Err(FlowError::Store(err)) => {
            error!("registration store failure: {err}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service unavailable".to_string(),
            )
                .into_response()
        }
        Err(err) => {
            error!("registration failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response()
        }
    }
}

pub(super) fn password_policy_message(min_length: usize) -> String {
    format!("Password must be at least {min_length} characters")
}
