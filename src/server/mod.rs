pub mod auth;
pub mod handlers;

use crate::config::{self, Config};
use crate::error::{AppError, AppResult};
use crate::poster::{token, Poster};
use axum::extract::DefaultBodyLimit;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{middleware, Json, Router};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// JSON с четырьмя base64 вложениями по 8 MiB плюс запас
const MAX_BODY_BYTES: usize = 48 * 1024 * 1024;

/// Состояние сервера: конфиг и клиент под одной блокировкой
pub struct App {
    state: RwLock<AppState>,
    /// None в stateless режиме: на диск ничего не пишется
    config_path: Option<PathBuf>,
}

struct AppState {
    config: Config,
    poster: Result<Arc<Poster>, String>,
}

impl App {
    pub fn new(config: Config, config_path: Option<PathBuf>) -> Self {
        let poster = resolve_poster(&config);
        if let Err(e) = &poster {
            warn!("X auth is not ready yet: {}", e);
        }
        App::from_parts(config, poster, config_path)
    }

    pub(crate) fn from_parts(
        config: Config,
        poster: Result<Arc<Poster>, String>,
        config_path: Option<PathBuf>,
    ) -> Self {
        App {
            state: RwLock::new(AppState { config, poster }),
            config_path,
        }
    }

    /// Конфиг только из переменных окружения; ошибки фатальны при старте
    pub fn stateless_from_env() -> AppResult<Self> {
        let mut cfg = Config::with_defaults();
        config::apply_env_overrides(&mut cfg);
        if cfg.security.api_token.trim().is_empty() {
            return Err(AppError::Config(
                "XPOST_API_TOKEN is required in stateless mode".to_string(),
            ));
        }
        config::ensure_first_boot_auth_configured(&cfg.credentials)?;
        let poster = Poster::resolve(&cfg.credentials)?;
        Ok(App::from_parts(cfg, Ok(Arc::new(poster)), None))
    }

    pub async fn addr(&self) -> String {
        self.state.read().await.config.server.addr.clone()
    }

    pub async fn api_token(&self) -> String {
        self.state.read().await.config.security.api_token.clone()
    }

    pub async fn poster(&self) -> Result<Arc<Poster>, String> {
        self.state.read().await.poster.clone()
    }

    /// Заменяет конфиг и пересобирает клиент одной записью под блокировкой
    pub async fn replace_config(&self, config: Config) {
        let poster = resolve_poster(&config);
        let mut state = self.state.write().await;
        state.config = config;
        state.poster = poster;
    }

    /// Перечитывает конфиг с диска. При ошибке остаётся прежний конфиг.
    pub async fn reload(&self) -> AppResult<()> {
        let Some(path) = &self.config_path else {
            return Ok(());
        };
        let (mut cfg, _) = config::load_or_init(path)?;
        config::apply_env_overrides(&mut cfg);
        self.replace_config(cfg).await;
        Ok(())
    }

    /// Сохраняет обновлённый OAuth2 токен; ошибки только в лог.
    /// Токен клиента, который уже заменён перезагрузкой конфига, не пишется.
    pub async fn persist_oauth2_token(&self, poster: &Arc<Poster>) {
        let Some(path) = &self.config_path else {
            return;
        };
        let mut state = self.state.write().await;
        if !matches!(&state.poster, Ok(current) if Arc::ptr_eq(current, poster)) {
            debug!("Config was reloaded, skipping token persist for the previous client");
            return;
        }
        if let Err(e) = token::persist_oauth2_token(&mut state.config, path, poster) {
            warn!("Failed to persist refreshed OAuth2 token: {}", e);
        }
    }
}

fn resolve_poster(cfg: &Config) -> Result<Arc<Poster>, String> {
    Poster::resolve(&cfg.credentials)
        .map(Arc::new)
        .map_err(|e| e.to_string())
}

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

pub fn build_router(app: Arc<App>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-api-token"),
        ]);

    Router::new()
        .route("/v1/tweets", post(handlers::create_tweet))
        .route_layer(middleware::from_fn_with_state(
            app.clone(),
            auth::require_api_token,
        ))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app)
}

pub async fn run_server(app: Arc<App>) -> AppResult<()> {
    let addr = config::bind_addr(&app.addr().await);
    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP server listening on: {}", addr);

    #[cfg(unix)]
    tokio::spawn(reload_on_sighup(app.clone()));

    axum::serve(listener, build_router(app))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

#[cfg(unix)]
async fn reload_on_sighup(app: Arc<App>) {
    let mut hangup = match signal::unix::signal(signal::unix::SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            warn!("Failed to install SIGHUP handler: {}", e);
            return;
        }
    };
    while hangup.recv().await.is_some() {
        match app.reload().await {
            Ok(()) => match app.poster().await {
                Ok(_) => info!("Config reloaded"),
                Err(e) => warn!("Config reloaded, X auth is not ready: {}", e),
            },
            Err(e) => error!("Config reload failed, keeping previous config: {}", e),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
