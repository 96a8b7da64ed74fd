use axum::{http::Method, response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

mod config;
mod database;
mod errors;
mod handlers;
mod middleware;
mod models;
mod routes;
mod services;
mod state;

use axum::extract::State;
use config::AppConfig;
use services::mpesa_service::MpesaService;
use state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = AppConfig::from_env();

    let pool = match database::connection::connect(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("❌ Failed to connect to PostgreSQL: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = database::connection::run_migrations(&pool).await {
        tracing::error!("❌ Failed to run migrations: {}", e);
        std::process::exit(1);
    }

    let app_state = initialize_app_state(pool, &config).await;
    let app = build_router(app_state);
    start_server(app, &config).await;
}

async fn initialize_app_state(pool: sqlx::PgPool, config: &AppConfig) -> AppState {
    let mut app_state = AppState::new(pool, config.jwt_secret.clone());

    match &config.mpesa {
        Some(mpesa_config) => {
            tracing::info!("📱 M-Pesa short code: {}", mpesa_config.short_code);
            tracing::info!("🌐 M-Pesa environment: {}", mpesa_config.environment);

            let mpesa_service = Arc::new(MpesaService::new(mpesa_config.clone()));

            // Credential probe; a transient failure here must not disable
            // payments for the process lifetime.
            match mpesa_service.get_access_token().await {
                Ok(_) => tracing::info!("✅ M-Pesa access token obtained"),
                Err(e) => tracing::warn!("M-Pesa token probe failed (continuing): {}", e),
            }

            app_state = app_state.with_mpesa(mpesa_service);
            tracing::info!("✅ M-Pesa service initialized");
        }
        None => {
            tracing::warn!("M-Pesa not configured, mobile-money payments disabled");
        }
    }

    app_state
}

fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .allow_credentials(false);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_check))
        .route("/api/health", get(api_health_check))
        .nest("/api/bookings", routes::bookings::routes(app_state.clone()))
        .nest("/api/payments", routes::payments::routes(app_state.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

async fn start_server(app: Router, config: &AppConfig) {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Invalid HOST/PORT");

    tracing::info!("🚀 Server starting on {}", addr);

    match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("Server error: {}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    }
}

async fn root_handler() -> &'static str {
    "🏠 Student Hostels Booking API"
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn api_health_check(State(state): State<AppState>) -> Json<Value> {
    let db_status = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => "connected",
        Err(_) => "disconnected",
    };

    Json(json!({
        "status": "healthy",
        "database": db_status,
        "mpesa": state.mpesa_service.is_some(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
