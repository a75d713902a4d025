use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{self, Body};
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::api::{chat, health};
use crate::state::AppState;

#[derive(Debug, PartialEq, Eq)]
enum RouteMatch<'a> {
    Health,
    Chat { provider: &'a str },
    MethodNotAllowed,
    NotFound,
}

/// Dispatch a raw HTTP request to the matching handler.
///
/// # Errors
///
/// This function currently never returns `Err` and uses `Infallible`.
pub async fn dispatch_request(
    state: Arc<AppState>,
    base_path: Arc<str>,
    request: Request<Body>,
) -> Result<Response, Infallible> {
    let (parts, body) = request.into_parts();
    let route = match_route(&parts.method, parts.uri.path(), base_path.as_ref());

    let response = match route {
        RouteMatch::Health => health::health_handler(State(state)).into_response(),
        RouteMatch::Chat { provider } => {
            let limit = state.config.server.max_body_bytes;
            let body_bytes = match read_request_body(body, limit).await {
                Ok(bytes) => bytes,
                Err(response) => return Ok(response),
            };
            chat::handler(State(state), provider, parts.headers, body_bytes).await
        }
        RouteMatch::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED.into_response(),
        RouteMatch::NotFound => StatusCode::NOT_FOUND.into_response(),
    };

    Ok(response)
}

#[must_use]
pub fn normalize_base_path(base_path: &str) -> String {
    let trimmed = base_path.trim();
    if trimmed.is_empty() || trimmed == "/" {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("/{}", trimmed.trim_end_matches('/'))
    }
}

async fn read_request_body(body: Body, limit: usize) -> Result<bytes::Bytes, Response> {
    body::to_bytes(body, limit).await.map_err(|_| {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            format!("Request body too large (max {limit} bytes)"),
        )
            .into_response()
    })
}

fn match_route<'a>(method: &Method, path: &'a str, base_path: &str) -> RouteMatch<'a> {
    let Some(path) = strip_base_path(path, base_path) else {
        return RouteMatch::NotFound;
    };

    match path {
        "/" | "/health" => {
            if method == Method::GET {
                RouteMatch::Health
            } else {
                RouteMatch::MethodNotAllowed
            }
        }
        _ => {
            let Some(provider) = path.strip_prefix("/chat/") else {
                return RouteMatch::NotFound;
            };
            if provider.is_empty() || provider.contains('/') {
                RouteMatch::NotFound
            } else if method != Method::POST {
                RouteMatch::MethodNotAllowed
            } else {
                RouteMatch::Chat { provider }
            }
        }
    }
}

fn strip_base_path<'a>(path: &'a str, base_path: &str) -> Option<&'a str> {
    if base_path.is_empty() {
        return Some(path);
    }

    let remainder = path.strip_prefix(base_path)?;
    if remainder.is_empty() {
        Some("/")
    } else if remainder.starts_with('/') {
        Some(remainder)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_path() {
        assert_eq!(normalize_base_path(""), "");
        assert_eq!(normalize_base_path("/"), "");
        assert_eq!(normalize_base_path("api/"), "/api");
        assert_eq!(normalize_base_path(" /api// "), "/api");
    }

    #[test]
    fn test_match_chat_route() {
        assert_eq!(
            match_route(&Method::POST, "/api/chat/openai", "/api"),
            RouteMatch::Chat { provider: "openai" }
        );
        assert_eq!(
            match_route(&Method::GET, "/api/chat/openai", "/api"),
            RouteMatch::MethodNotAllowed
        );
        assert_eq!(
            match_route(&Method::POST, "/api/chat/", "/api"),
            RouteMatch::NotFound
        );
        assert_eq!(
            match_route(&Method::POST, "/api/chat/openai/extra", "/api"),
            RouteMatch::NotFound
        );
        assert_eq!(
            match_route(&Method::POST, "/apix/chat/openai", "/api"),
            RouteMatch::NotFound
        );
    }

    #[test]
    fn test_match_health_route() {
        assert_eq!(match_route(&Method::GET, "/api", "/api"), RouteMatch::Health);
        assert_eq!(
            match_route(&Method::GET, "/api/health", "/api"),
            RouteMatch::Health
        );
        assert_eq!(match_route(&Method::GET, "/health", ""), RouteMatch::Health);
        assert_eq!(
            match_route(&Method::POST, "/health", ""),
            RouteMatch::MethodNotAllowed
        );
    }
}
