//! JWT authentication for operator endpoints

use axum::body::Body;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::{header, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, warn};

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Operator name
    pub sub: String,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
}

impl Claims {
    pub fn new(operator: &str, expiry_hours: i64) -> Self {
        let now = Utc::now();
        Self {
            sub: operator.to_string(),
            exp: (now + Duration::hours(expiry_hours)).timestamp(),
            iat: now.timestamp(),
        }
    }
}

/// Token issuer and verifier
#[derive(Clone)]
pub struct JwtAuth {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtAuth {
    /// An empty secret gets a random per-process key, so tokens do not
    /// survive a restart.
    pub fn new(secret: &str) -> Self {
        let key = if secret.is_empty() {
            let mut key_bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut key_bytes);
            warn!("JWT_SECRET is not set, using a random secret");
            key_bytes.to_vec()
        } else {
            secret.as_bytes().to_vec()
        };

        Self {
            encoding_key: EncodingKey::from_secret(&key),
            decoding_key: DecodingKey::from_secret(&key),
        }
    }

    pub fn generate_token(&self, operator: &str, expiry_hours: i64) -> Result<String, AuthError> {
        let claims = Claims::new(operator, expiry_hours);

        encode(&Header::default(), &claims, &self.encoding_key).map_err(|e| {
            error!("Failed to generate JWT: {}", e);
            AuthError::TokenCreation
        })
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| {
                debug!("JWT validation failed: {}", e);
                AuthError::InvalidToken
            })
    }

    /// Token part of a `Bearer` authorization header
    pub fn extract_token(authorization: &str) -> Option<&str> {
        authorization
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug)]
pub enum AuthError {
    WrongCredentials,
    TokenCreation,
    InvalidToken,
    MissingToken,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::WrongCredentials => (StatusCode::UNAUTHORIZED, "Invalid credentials"),
            AuthError::TokenCreation => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create token")
            }
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token"),
            AuthError::MissingToken => (StatusCode::UNAUTHORIZED, "Missing authorization token"),
        };

        (
            status,
            Json(json!({ "error": message, "kind": "unauthorized" })),
        )
            .into_response()
    }
}

/// Operator identity attached by `require_auth`
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub claims: Claims,
}

/// Reject requests without a valid bearer token
pub async fn require_auth(
    State(auth): State<JwtAuth>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let header_value = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(AuthError::MissingToken)?;

    let token = JwtAuth::extract_token(header_value).ok_or(AuthError::InvalidToken)?;
    let claims = auth.validate_token(token)?;

    req.extensions_mut().insert(AuthenticatedUser {
        user_id: claims.sub.clone(),
        claims,
    });

    Ok(next.run(req).await)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or(AuthError::MissingToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use tower::ServiceExt;

    #[test]
    fn test_jwt_generation_and_validation() {
        let auth = JwtAuth::new("test-secret");

        let token = auth.generate_token("operator", 24).unwrap();
        let claims = auth.validate_token(&token).unwrap();

        assert_eq!(claims.sub, "operator");
    }

    #[test]
    fn test_jwt_random_secret() {
        let auth = JwtAuth::new("");
        let token = auth.generate_token("operator", 24).unwrap();
        assert!(auth.validate_token(&token).is_ok());

        // A different random key cannot verify it
        assert!(JwtAuth::new("").validate_token(&token).is_err());
    }

    #[test]
    fn test_jwt_expired_token() {
        let auth = JwtAuth::new("test-secret");

        let token = auth.generate_token("operator", -1).unwrap();
        let result = auth.validate_token(&token);
        assert!(matches!(result, Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_extract_token() {
        assert_eq!(JwtAuth::extract_token("Bearer abc123"), Some("abc123"));
        assert_eq!(JwtAuth::extract_token("Bearer "), None);
        assert_eq!(JwtAuth::extract_token("abc123"), None);
    }

    #[tokio::test]
    async fn test_require_auth_guards_routes() {
        let auth = JwtAuth::new("test-secret");
        let app = axum::Router::new()
            .route(
                "/",
                get(|user: AuthenticatedUser| async move { user.user_id }),
            )
            .route_layer(from_fn_with_state(auth.clone(), require_auth));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let token = auth.generate_token("operator", 1).unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(header::AUTHORIZATION, format!("Bearer {}", token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
