use crate::models::ApiError;
use axum::{
    Json,
    body::Body,
    extract::State,
    http::{self, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::{collections::HashMap, env, sync::Arc};
use tracing::{debug, info, warn};

pub const KEY_HEADER: &str = "X-Appraisal-Key";

/// Key table for the `/ai` routes. `None` leaves the routes open.
#[derive(Clone, Default)]
pub struct AuthState {
    keys: Option<Arc<HashMap<String, String>>>,
}

impl AuthState {
    pub fn from_env() -> Self {
        Self::from_list(env::var("APPRAISAL_API_KEYS").ok().as_deref())
    }

    /// Parse `owner:key,owner:key`. Malformed entries are skipped.
    pub fn from_list(raw: Option<&str>) -> Self {
        let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
            warn!(
                target = "appraisal.api",
                "APPRAISAL_API_KEYS unset; /ai routes are open"
            );
            return Self::default();
        };

        let mut keys = HashMap::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.split_once(':') {
                Some((owner, key)) if !owner.trim().is_empty() && !key.trim().is_empty() => {
                    keys.insert(key.trim().to_string(), owner.trim().to_string());
                }
                _ => warn!(
                    target = "appraisal.api",
                    "ignored malformed APPRAISAL_API_KEYS entry"
                ),
            }
        }
        info!(target = "appraisal.api", key_count = keys.len(), "loaded API keys");
        Self {
            keys: Some(Arc::new(keys)),
        }
    }

    pub fn is_open(&self) -> bool {
        self.keys.is_none()
    }

    fn owner_of(&self, presented: &str) -> Option<&str> {
        self.keys
            .as_ref()
            .and_then(|keys| keys.get(presented))
            .map(String::as_str)
    }
}

pub async fn require_api_auth(
    State(state): State<AuthState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if state.is_open() {
        return next.run(request).await;
    }

    let Some(presented) = extract_api_key(request.headers()) else {
        return unauthorized_response(
            "missing_api_key",
            "Provide X-Appraisal-Key or Bearer token",
        );
    };

    let Some(owner) = state.owner_of(&presented) else {
        return unauthorized_response("invalid_api_key", "Key not recognized");
    };

    debug!(
        target = "appraisal.api",
        owner = owner,
        path = %request.uri().path(),
        "api_key_accepted"
    );
    next.run(request).await
}

fn extract_api_key(headers: &http::HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(http::header::AUTHORIZATION)
        && let Ok(raw) = value.to_str()
        && let Some((scheme, token)) = raw.split_once(' ')
        && scheme.eq_ignore_ascii_case("bearer")
        && !token.trim().is_empty()
    {
        return Some(token.trim().to_string());
    }
    headers
        .get(KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn unauthorized_response(code: &str, message: &str) -> Response {
    let payload = ApiError {
        error: code.to_string(),
        detail: Some(message.to_string()),
    };
    (StatusCode::UNAUTHORIZED, Json(payload)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, middleware, routing::get};
    use tower::ServiceExt;

    async fn status() -> &'static str {
        "ok"
    }

    fn app(state: AuthState) -> Router {
        Router::new()
            .route("/ai/status", get(status))
            .layer(middleware::from_fn_with_state(state, require_api_auth))
    }

    async fn call(state: AuthState, header: Option<(&str, &str)>) -> Response {
        let mut builder = Request::builder().uri("/ai/status");
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        app(state)
            .oneshot(builder.body(Body::empty()).expect("request"))
            .await
            .expect("response")
    }

    #[test]
    fn parses_owner_key_pairs() {
        let state = AuthState::from_list(Some("booth-12:k1, broken ,:k2, store:k3"));
        assert_eq!(state.owner_of("k1"), Some("booth-12"));
        assert_eq!(state.owner_of("k3"), Some("store"));
        assert_eq!(state.owner_of("k2"), None);
        assert!(AuthState::from_list(None).is_open());
        assert!(AuthState::from_list(Some("  ")).is_open());
    }

    #[tokio::test]
    async fn open_gate_passes_through() {
        let response = call(AuthState::default(), None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_and_wrong_keys_are_rejected() {
        let state = AuthState::from_list(Some("booth:secret"));
        assert_eq!(call(state.clone(), None).await.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            call(state, Some((KEY_HEADER, "guess"))).await.status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn bearer_and_header_keys_are_accepted() {
        let state = AuthState::from_list(Some("booth:secret"));
        let bearer = call(state.clone(), Some(("authorization", "Bearer secret"))).await;
        assert_eq!(bearer.status(), StatusCode::OK);
        let header = call(state, Some((KEY_HEADER, "secret"))).await;
        assert_eq!(header.status(), StatusCode::OK);
    }
}
