//! # loudcast: audio loudness analysis server
//!
//! `loudcast` accepts audio uploads over HTTP, runs an ffmpeg loudness
//! scan against each upload in the background, and streams the reduced
//! loudnorm summary to connected browsers over server-sent events.
//!
//! ## Request Flow
//!
//! A `POST` to the upload route stores the file under the configured
//! storage directory and dispatches a supervised background job; the
//! response returns as soon as the file is on disk. The job runs the
//! analysis subprocess with a wall-clock budget, reduces its combined
//! output to the loudness summary lines, and publishes the outcome on
//! the notification channel. Every client connected to the events route
//! holds its own subscription and receives each outcome as one SSE
//! frame, with heartbeat frames in between while idle.
//!
//! The waveform image the analysis renders next to the uploaded file is
//! picked up by the UI through the static file fallback; the server
//! itself never touches it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use loudcast::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     // Parse CLI arguments and load configuration
//!     let args = loudcast::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     // Initialize structured logging
//!     loudcast::telemetry::init_telemetry()?;
//!
//!     // Create and start the application
//!     let app = Application::new(config).await?;
//!
//!     // Run with graceful shutdown on Ctrl+C
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     }).await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod analysis;
pub mod api;
pub mod config;
pub mod errors;
pub mod jobs;
pub mod notify;
pub mod telemetry;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use bon::Builder;
pub use config::Config;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::{
    services::ServeDir,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info};

use crate::jobs::Dispatcher;
use crate::notify::Notifier;

/// Application state shared across all request handlers.
///
/// Holds the configuration, the outcome notification channel, and the
/// background job dispatcher. Constructed once at startup and cloned
/// into each handler; there is no ambient global state.
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub notifier: Notifier,
    pub jobs: Dispatcher,
}

/// Build the application router with all endpoints and middleware.
///
/// - the upload route, with a raised body limit for large audio files
/// - the event stream route
/// - a `/healthz` liveness probe
/// - static UI files from the configured directory as the fallback
pub fn build_router(state: &AppState) -> Router {
    // The handler enforces the configured cap itself (rejecting with a
    // 400 once crossed); the transport limit above it only bounds the
    // rest of the multipart framing.
    let body_limit = usize::try_from(state.config.storage.max_upload_size)
        .unwrap_or(usize::MAX)
        .saturating_add(64 * 1024);

    let router = Router::new()
        .route(
            &state.config.upload_path,
            post(api::handlers::upload::upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route(&state.config.events_path, get(api::handlers::events::events))
        .route("/healthz", get(|| async { "OK" }))
        .fallback_service(ServeDir::new(&state.config.ui_dir))
        .with_state(state.clone());

    // Add tracing layer
    router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

/// Main application struct that owns all resources and lifecycle.
///
/// # Lifecycle
///
/// 1. **Create**: [`Application::new`] wires the notification channel and
///    job dispatcher and builds the router
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles
///    requests until the shutdown future resolves
/// 3. **Shutdown**: in-flight analysis jobs are cancelled through the
///    dispatcher's token and their supervisors are awaited
pub struct Application {
    router: Router,
    app_state: AppState,
    config: Config,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting loudcast with configuration: {:#?}", config);

        let shutdown_token = CancellationToken::new();
        let notifier = Notifier::new(config.events.channel_capacity);
        let jobs = Dispatcher::new(notifier.clone(), config.analysis.timeout, shutdown_token);

        let app_state = AppState::builder()
            .config(config.clone())
            .notifier(notifier)
            .jobs(jobs)
            .build();

        let router = build_router(&app_state);

        Ok(Self {
            router,
            app_state,
            config,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!(
            "Server listening on http://{}, uploads at {}, events at {}",
            bind_addr, self.config.upload_path, self.config.events_path
        );

        // Run the server with graceful shutdown
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        // Cancel in-flight analysis jobs and wait for their supervisors
        info!("Stopping background analysis jobs...");
        self.app_state.jobs.shutdown().await;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use axum::http::StatusCode;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.analysis.program = "true".to_string();
        config.storage.dir = std::env::temp_dir().join("loudcast-lib-tests");
        config
    }

    #[tokio::test]
    async fn healthz_responds_ok() {
        let app = Application::new(test_config()).await.unwrap();
        let server = app.into_test_server();

        let response = server.get("/healthz").await;
        response.assert_status(StatusCode::OK);
        response.assert_text("OK");
    }

    #[tokio::test]
    async fn upload_route_rejects_get() {
        let app = Application::new(test_config()).await.unwrap();
        let server = app.into_test_server();

        let response = server.get("/upload").await;
        response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn unknown_paths_fall_through_to_static_serving() {
        let app = Application::new(test_config()).await.unwrap();
        let server = app.into_test_server();

        // No UI directory in tests, so the fallback has nothing to serve
        let response = server.get("/no-such-page.html").await;
        response.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn routes_follow_the_configuration() {
        let mut config = test_config();
        config.upload_path = "/api/upload".to_string();

        let app = Application::new(config).await.unwrap();
        let server = app.into_test_server();

        let response = server.get("/api/upload").await;
        response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
    }
}
