//! Email verification endpoints.

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
use crate::flow::{ConfirmOutcome, FlowError};

use super::rate_limit::{RateLimitAction, RateLimitDecision, extract_client_ip};
use super::types::{SendOtpRequest, VerifyEmailRequest};
use super::{INVALID_CODE_MESSAGE, valid_otp};

/// Issue an email-verification code (always 204 to avoid account probing).
#[utoipa::path(
    post,
    path = "/send-otp",
    request_body = SendOtpRequest,
    responses(
        (status = 204, description = "Request accepted")
    ),
    tag = "auth"
)]
pub async fn send_otp(
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
        .check_ip(client_ip.as_deref(), RateLimitAction::SendOtp)
        == RateLimitDecision::Limited
    {
        // Issuance stays opaque even when limited.
        return StatusCode::NO_CONTENT.into_response();
    }

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        // Always 204 for invalid emails to avoid account probing.
        return StatusCode::NO_CONTENT.into_response();
    }
    if state.limiter().check_email(&email, RateLimitAction::SendOtp)
        == RateLimitDecision::Limited
    {
        return StatusCode::NO_CONTENT.into_response();
    }

    match state.flow().request_email_verification(&email).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            // Store failures are logged but never leak through this endpoint.
            error!("failed to issue verification code: {err}");
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

/// Consume a verification code and mark the account verified.
#[utoipa::path(
    post,
    path = "/verify-email",
    request_body = VerifyEmailRequest,
    responses(
        (status = 204, description = "Email verified"),
        (status = 400, description = "Invalid or expired code", body = String),
        (status = 429, description = "Rate limited", body = String),
        (status = 503, description = "Credential store unavailable", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    headers: HeaderMap,
    state: Extension<Arc<ApiState>>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> impl IntoResponse {
    let request: VerifyEmailRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let client_ip = extract_client_ip(&headers);
    if state
        .limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::VerifyEmail)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    let email = normalize_email(&request.email);
    let otp = request.otp.trim();
    if !valid_email(&email) || !valid_otp(otp) {
        // Same message as a wrong code; shape errors are not a separate oracle.
        return (StatusCode::BAD_REQUEST, INVALID_CODE_MESSAGE.to_string()).into_response();
    }
    if state
        .limiter()
        .check_email(&email, RateLimitAction::VerifyEmail)
        == RateLimitDecision::Limited
    {
        return (StatusCode::TOO_MANY_REQUESTS, "Rate limited".to_string()).into_response();
    }

    match state.flow().confirm_email_verification(&email, otp).await {
        Ok(ConfirmOutcome::Verified) => StatusCode::NO_CONTENT.into_response(),
        Ok(ConfirmOutcome::Rejected(outcome)) => {
            debug!(?outcome, "email verification rejected");
            (StatusCode::BAD_REQUEST, INVALID_CODE_MESSAGE.to_string()).into_response()
        }
        Ok(ConfirmOutcome::AccountMissing) => {
            debug!("verified code for a missing account");
            (StatusCode::BAD_REQUEST, INVALID_CODE_MESSAGE.to_string()).into_response()
        }
        Err(FlowError::Store(err)) => {
            error!("email verification store failure: {err}");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service unavailable".to_string(),
            )
                .into_response()
        }
        Err(err) => {
            error!("email verification failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Verification failed".to_string(),
            )
                .into_response()
        }
    }
}
