//! Server wiring: pool, router, middleware, and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Method, Request, header::CONTENT_TYPE},
    routing::{get, post},
};
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, error, info, info_span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

use crate::account::password::Argon2Hasher;
use crate::account::store::PgCredentialStore;
use crate::flow::{AuthFlow, FlowConfig};
use crate::notify::{self, LogNotifier, Notifier, SmtpConfig, SmtpNotifier};
use crate::otp::{OtpConfig, OtpLedger};

pub mod handlers;
mod openapi;

pub use openapi::openapi;

use handlers::auth::rate_limit::{NoopRateLimiter, RateLimiter};

/// Request-scoped state shared by the auth handlers.
pub struct ApiState {
    flow: Arc<AuthFlow>,
    limiter: Arc<dyn RateLimiter>,
}

impl ApiState {
    #[must_use]
    pub fn new(flow: Arc<AuthFlow>, limiter: Arc<dyn RateLimiter>) -> Self {
        Self { flow, limiter }
    }

    #[must_use]
    pub fn flow(&self) -> &AuthFlow {
        &self.flow
    }

    pub(crate) fn limiter(&self) -> &dyn RateLimiter {
        self.limiter.as_ref()
    }
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, dsn: &str, smtp: Option<SmtpConfig>) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(dsn)
        .await
        .context("Failed to connect to database")?;

    // Without an SMTP relay the log notifier keeps local dev working.
    let notifier: Arc<dyn Notifier> = match smtp {
        Some(config) => Arc::new(SmtpNotifier::new(&config)?),
        None => Arc::new(LogNotifier),
    };
    let (outbox, _worker) = notify::spawn_delivery_worker(notifier);

    let flow = Arc::new(AuthFlow::new(
        Arc::new(PgCredentialStore::new(pool.clone())),
        Arc::new(Argon2Hasher),
        OtpLedger::new(OtpConfig::new()),
        outbox,
        FlowConfig::new(),
    ));
    let state = Arc::new(ApiState::new(flow, Arc::new(NoopRateLimiter)));

    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any);

    let app = router()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(state))
                .layer(Extension(pool)),
        );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router() -> Router {
    Router::new()
        .route("/register", post(handlers::auth::register))
        .route("/send-otp", post(handlers::auth::send_otp))
        .route("/verify-email", post(handlers::auth::verify_email))
        .route("/send-reset-otp", post(handlers::auth::send_reset_otp))
        .route("/reset-password", post(handlers::auth::reset_password))
        .route("/health", get(handlers::health::health))
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install ctrl-c handler: {err}");
        }
    };

    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => error!("failed to install SIGTERM handler: {err}"),
        }
    };

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}
