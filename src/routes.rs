//! Route definitions and router setup
//!
//! Read-only governance API over the same engines the CLI uses.

mod migrations;
mod schema;
mod templates;
mod trust;

use crate::config::Settings;
use crate::state::SharedState;
use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::MakeRequestUuid,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
    ServiceBuilderExt,
};
use tracing::Level;

/// Create the application router with all routes and middleware
pub fn create_router(state: SharedState, settings: &Settings) -> Router {
    let cors = build_cors_layer(settings);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let middleware = ServiceBuilder::new()
        .set_x_request_id(MakeRequestUuid)
        .layer(trace_layer)
        .layer(CompressionLayer::new())
        .layer(cors)
        .propagate_x_request_id();

    Router::new()
        .route("/health", get(health_check))
        .route("/api/schema/lint", post(schema::lint_schema))
        .route("/api/migrations", get(migrations::list_migrations))
        .route("/api/templates/verify", get(templates::verify_templates))
        .route("/api/trust-gate/summary", get(trust::trust_summary))
        .route("/api/trust-gate/diff", post(trust::trust_diff))
        .layer(middleware)
        .with_state(state)
}

/// Build CORS layer from settings
fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<_> = settings
        .cors
        .allowed_origins
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();

    let layer = if origins.is_empty() {
        CorsLayer::new().allow_origin(Any)
    } else {
        CorsLayer::new().allow_origin(origins)
    };

    layer
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(3600))
}

/// Health check endpoint
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "success": true,
        "message": "Governance gates are up.",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::AppState;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn app(settings: Settings) -> Router {
        let state = Arc::new(AppState::new(settings.clone()).await.unwrap());
        create_router(state, &settings)
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(
            app(Settings::default()).await,
            Request::get("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(true));
    }

    #[tokio::test]
    async fn test_lint_reports_removed_type() {
        let request = post_json(
            "/api/schema/lint",
            json!({
                "oldSchema": "define entity person, owns name; attribute name, value string;",
                "newSchema": "define attribute name, value string;"
            }),
        );
        let (status, body) = call(app(Settings::default()).await, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], json!(false));
        assert_eq!(
            body["report"]["violations"][0],
            json!("REMOVED: Type 'person' was deleted.")
        );
    }

    #[tokio::test]
    async fn test_lint_rejects_empty_new_schema() {
        let request = post_json("/api/schema/lint", json!({ "newSchema": "" }));
        let (status, body) = call(app(Settings::default()).await, request).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], json!("VALIDATION_ERROR"));
    }

    #[tokio::test]
    async fn test_migrations_lists_pending() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("001_init.tql"),
            "define attribute schema_version, owns ordinal, owns git-commit, owns applied-at;",
        )
        .unwrap();
        fs::write(dir.path().join("002_people.tql"), "define entity person;").unwrap();

        let mut settings = Settings::default();
        settings.migrations.dir = dir.path().to_path_buf();
        let (status, body) = call(
            app(settings).await,
            Request::get("/api/migrations").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["headOrdinal"], json!(2));
        assert_eq!(body["currentOrdinal"], json!(0));
        assert_eq!(body["pending"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_migrations_surface_ledger_errors() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("init.tql"), "define entity a;").unwrap();

        let mut settings = Settings::default();
        settings.migrations.dir = dir.path().to_path_buf();
        let (status, body) = call(
            app(settings).await,
            Request::get("/api/migrations").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["code"], json!("FORMAT_ERROR"));
    }

    #[tokio::test]
    async fn test_trust_diff() {
        let request = post_json(
            "/api/trust-gate/diff",
            json!({
                "base": { "commit_gate": { "pass": true, "duration_ms": 100 } },
                "head": { "commit_gate": { "pass": false, "duration_ms": 180 } }
            }),
        );
        let (status, body) = call(app(Settings::default()).await, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["diff"]["commit_gate"]["pass_changed"], json!(true));
        assert_eq!(body["diff"]["commit_gate"]["duration_ms_delta"], json!(80));
    }

    #[tokio::test]
    async fn test_trust_diff_accepts_null_gates() {
        let request = post_json(
            "/api/trust-gate/diff",
            json!({
                "base": { "commit_gate": null, "run_prefixes": null },
                "head": { "hold_gate": { "pass": null, "hold_code": 7 } }
            }),
        );
        let (status, body) = call(app(Settings::default()).await, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["diff"]["hold_gate"]["head_hold_code"], json!("7"));
        assert_eq!(body["diff"]["commit_gate"]["duration_ms_delta"], json!(null));
    }
}
