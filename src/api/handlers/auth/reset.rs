//! Password recovery endpoints.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::{debug, error};

use crate::account::{normalize_email, valid_email};
use crate::api::ApiState;
use crate::flow::{FlowError, ResetOutcome};

use super::rate_limit::{RateLimitAction, RateLimitDecision, extract_client_ip};
use super::register::password_policy_message;
use super::types::{ResetPasswordRequest, SendOtpRequest};
use super::{INVALID_CODE_MESSAGE, valid_otp};

/// Issue a password-reset code (always 204 to avoid account probing).
#[utoipa::path(
    post,
    path = "/send-reset-otp",
    request_body = SendOtpRequest,
    responses(
        (status = 204, description = "Request accepted")
    ),
    tag = "auth"
)]
pub async fn send_reset_otp(
    headers: HeaderMap,
    state: Extension<Arc<ApiState>>,
    payload: Option<Json<SendOtpRequest>>,
) -> impl IntoResponse {
    let request: SendOtpRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let client_ip = extract_client_ip(&headers);
    if state
        .limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::SendResetOtp)
        == RateLimitDecision::Limited
    {
        return StatusCode::NO_CONTENT.into_response();
    }

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return StatusCode::NO_CONTENT.into_response();
    }
    if state
        .limiter()
        .check_email(&email, RateLimitAction::SendResetOtp)
        == RateLimitDecision::Limited
    {
        return StatusCode::NO_CONTENT.into_response();
    }

    match state.flow().request_password_reset(&email).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("failed to issue reset code: {err}");
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

/// Consume a reset code and replace the account password.
#[utoipa::path(
    post,
    path = "/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 204, description = "Password reset"),
        (status = 400, description = "Invalid or expired code", body = String),
        (status = 422, description = "Password policy violation", body = String),
        (status = 429, description = "Rate limited", body = String),
        (status = 503, description = "Credential store unavailable", body = String)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    headers: HeaderMap,
    state: Extension<Arc<ApiState>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> impl IntoResponse {
    let request: ResetPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let client_ip = extract_client_ip(&headers);
    if state
        .limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::ResetPassword)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    let email = normalize_email(&request.email);
    let otp = request.otp.trim();
    if !valid_email(&email) || !valid_otp(otp) {
        return (StatusCode::BAD_REQUEST, INVALID_CODE_MESSAGE.to_string()).into_response();
    }

    let min_length = state.flow().config().policy().min_length();
    if !state.flow().config().policy().allows(&request.new_password) {
        // Checked before the flow so a hopeless request does not burn the code.
        return (
            StatusCode::UNPROCESSABLE_ENTITY,
            password_policy_message(min_length),
        )
            .into_response();
    }

    if state
        .limiter()
        .check_email(&email, RateLimitAction::ResetPassword)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    match state
        .flow()
        .complete_password_reset(&email, otp, &request.new_password)
        .await
    {
        Ok(ResetOutcome::Reset) => StatusCode::NO_CONTENT.into_response(),
        Ok(ResetOutcome::Rejected(outcome)) => {
            debug!(?outcome, "password reset rejected");
            (StatusCode::BAD_REQUEST, INVALID_CODE_MESSAGE.to_string()).into_response()
        }
        Ok(ResetOutcome::PolicyViolation) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            password_policy_message(min_length),
        )
            .into_response(),
        Ok(ResetOutcome::AccountMissing) => {
            debug!("verified reset code for a missing account");
            (StatusCode::BAD_REQUEST, INVALID_CODE_MESSAGE.to_string()).into_response()
        }
        Err(FlowError::Store(err)) => {
            error!("password reset store failure: {err}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service unavailable".to_string(),
            )
                .into_response()
        }
        Err(err) => {
            error!("password reset failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Password reset failed".to_string(),
            )
                .into_response()
        }
    }
}
