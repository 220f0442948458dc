//! Routes: one streaming endpoint, plus the thin capability queries the
//! controller exposes.

use axum::routing::get;
use axum::Router;
use serde_json::json;

use crate::request_processor::{default_format, stream_handler, supported_formats, textual_formats, AppState};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/reads", get(stream_handler))
        .route("/formats", get(formats_handler))
        .with_state(state)
}

async fn formats_handler() -> axum::response::Json<serde_json::Value> {
    axum::response::Json(json!({
        "supported": supported_formats().map(|f| format!("{f:?}")),
        "default": format!("{:?}", default_format()),
        "textual": textual_formats().map(|f| format!("{f:?}")),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[tokio::test]
    async fn formats_endpoint_reports_the_supported_and_default_formats() {
        let state = AppState::new(GatewayConfig::default());
        let router = create_router(state);

        let response = router
            .oneshot(Request::builder().uri("/formats").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["supported"].as_array().unwrap().len(), 4);
        assert!(json["default"].is_string());
    }
}
