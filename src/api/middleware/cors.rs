//! CORS configuration for the operator UI

use axum::http::header;
use axum::http::{HeaderValue, Method};
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};

const LOCAL_UI_ORIGINS: [&str; 2] = ["http://localhost:3000", "http://127.0.0.1:3000"];

/// Only whitelisted origins are allowed; an empty list means the local UI
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = if allowed_origins.is_empty() {
        debug!("CORS: No origins specified, allowing localhost only");
        LOCAL_UI_ORIGINS
            .iter()
            .map(|o| HeaderValue::from_static(o))
            .collect()
    } else {
        debug!("CORS: Allowing origins: {:?}", allowed_origins);
        allowed_origins
            .iter()
            .filter_map(|o| match o.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("CORS: Ignoring invalid origin '{}'", o);
                    None
                }
            })
            .collect()
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::routing::get;
    use tower::ServiceExt;

    async fn allowed_origin(origins: &[String], origin: &str) -> Option<String> {
        let app = axum::Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(cors_layer(origins));

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::GET)
                    .uri("/")
                    .header("Origin", origin)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        response
            .headers()
            .get("access-control-allow-origin")
            .map(|v| v.to_str().unwrap().to_string())
    }

    #[tokio::test]
    async fn test_cors_defaults_to_local_ui() {
        assert_eq!(
            allowed_origin(&[], "http://localhost:3000").await.as_deref(),
            Some("http://localhost:3000")
        );
        assert!(allowed_origin(&[], "https://example.com").await.is_none());
    }

    #[tokio::test]
    async fn test_cors_with_configured_origins() {
        let origins = vec![
            "https://ops.example.com".to_string(),
            "not a header\n".to_string(),
        ];

        assert_eq!(
            allowed_origin(&origins, "https://ops.example.com")
                .await
                .as_deref(),
            Some("https://ops.example.com")
        );
        assert!(allowed_origin(&origins, "http://localhost:3000")
            .await
            .is_none());
    }
}
