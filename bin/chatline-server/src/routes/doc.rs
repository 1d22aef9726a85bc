use crate::routes::{auth, chat, health};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "chatline",
        description = "Chat backend: accounts, conversations and streamed agent replies",
        version = "0.1.0",
    ),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Accounts and access tokens"),
        (name = "chat", description = "Conversations and streamed replies"),
        (name = "health", description = "Liveness"),
    )
)]
pub struct ApiDoc;

/// Registers the `bearer` scheme referenced by `security(("bearer" = []))`.
struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(auth::AuthApi::openapi());
    root.merge(chat::ChatApi::openapi());
    root
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn docs_cover_every_route() {
        let docs = get_docs();
        for path in [
            "/health",
            "/auth/signup",
            "/auth/signin",
            "/auth/me",
            "/chat",
            "/chat/stream",
            "/chat/{id}/messages",
            "/chat/{id}/title",
        ] {
            assert!(docs.paths.paths.contains_key(path), "missing {path}");
        }
    }

    #[test]
    fn bearer_scheme_is_registered() {
        let docs = get_docs();
        let components = docs.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer"));
    }
}
