//! OpenAPI document for the served endpoints.

use utoipa::OpenApi;

use super::handlers::auth::types::{
    RegisterRequest, ResetPasswordRequest, SendOtpRequest, VerifyEmailRequest,
};
use super::handlers::health::Health;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "sesamo",
        description = "Email verification and password recovery via one-time passcodes"
    ),
    paths(
        super::handlers::health::health,
        super::handlers::auth::register::register,
        super::handlers::auth::verification::send_otp,
        super::handlers::auth::verification::verify_email,
        super::handlers::auth::reset::send_reset_otp,
        super::handlers::auth::reset::reset_password,
    ),
    components(schemas(
        RegisterRequest,
        SendOtpRequest,
        VerifyEmailRequest,
        ResetPasswordRequest,
        Health
    )),
    tags(
        (name = "auth", description = "Registration, email verification and password recovery"),
        (name = "health", description = "Service health")
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
