use crate::state::AppState;
use axum::http::{HeaderValue, header};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Build the CORS layer from `CHATLINE_CORS_ORIGINS`.
///
/// The `x-conversation-id` header is exposed so browsers can read the id of a
/// newly created conversation.
pub fn cors_layer(state: Arc<AppState>) -> CorsLayer {
    let allow_origin = match allowed_origins(&state.config.cors_allowed_origins) {
        Some(origins) => AllowOrigin::list(origins),
        None => AllowOrigin::from(Any),
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_methods(Any)
        .expose_headers([header::HeaderName::from_static(
            crate::routes::chat::CONVERSATION_ID_HEADER,
        )])
}

/// `None` means any origin: the list contains `*`, or no entry parses.
fn allowed_origins(raw: &str) -> Option<Vec<HeaderValue>> {
    let entries: Vec<&str> = raw.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
    if entries.contains(&"*") {
        return None;
    }
    let origins: Vec<HeaderValue> = entries.into_iter().filter_map(|s| s.parse().ok()).collect();
    (!origins.is_empty()).then_some(origins)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn explicit_origins_are_listed() {
        let origins = allowed_origins("http://a, http://b,").unwrap();
        assert_eq!(origins, ["http://a", "http://b"]);
    }

    #[test]
    fn wildcard_anywhere_allows_any_origin() {
        assert!(allowed_origins("*").is_none());
        assert!(allowed_origins("http://a,*").is_none());
        assert!(allowed_origins(" * , http://a").is_none());
    }

    #[test]
    fn nothing_usable_allows_any_origin() {
        assert!(allowed_origins("").is_none());
        assert!(allowed_origins("bad\norigin").is_none());
    }
}
