//! Axum router construction.
//!
//! [`build`] assembles the complete application router, including:
//! - Middleware layers (CORS, per-request trace-ID injection)
//! - Optional OpenAPI reference UI (disable with `CHATLINE_ENABLE_DOCS=false`)
//! - Health / heartbeat route
//! - `/auth` signup and signin (public) and `/auth/me` (bearer)
//! - `/chat` routes (bearer)

pub mod auth;
pub mod chat;
pub mod doc;
mod health;

use crate::middleware::{auth::require_user, cors, trace};
use crate::state::AppState;
use axum::{Json, Router, middleware, routing::get};
use std::sync::Arc;
use tower::ServiceBuilder;
use utoipa_scalar::{Scalar, Servable};

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    // `route_layer` so that unknown paths stay 404 instead of 401.
    let protected = Router::new()
        .merge(auth::protected_router())
        .merge(chat::router())
        .route_layer(middleware::from_fn_with_state(state.clone(), require_user));

    let mut app = Router::new()
        .merge(health::router())
        .merge(auth::public_router())
        .merge(protected);

    if state.config.enable_docs {
        let api_doc = doc::get_docs();
        app = app
            .merge(Scalar::with_url("/docs", api_doc.clone()))
            .route("/openapi.json", get(move || async move { Json(api_doc) }));
    }

    app
        // Outermost layers execute first on the way in.
        .layer(ServiceBuilder::new().layer(cors::cors_layer(state.clone())))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::entities::{ConversationStore, DEFAULT_TITLE, MessageStore};
    use crate::testing::{Script, ScriptedAgent, test_state};
    use axum::body::Body;
    use axum::http::{Request, Response, StatusCode, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        state: Arc<AppState>,
        agent: Arc<ScriptedAgent>,
        title_agent: Arc<ScriptedAgent>,
    }

    impl TestApp {
        async fn new(scripts: Vec<Script>, title_scripts: Vec<Script>) -> Self {
            let agent = Arc::new(ScriptedAgent::new(scripts));
            let title_agent = Arc::new(ScriptedAgent::new(title_scripts));
            let state = test_state(agent.clone(), title_agent.clone()).await;
            Self {
                router: build(state.clone()),
                state,
                agent,
                title_agent,
            }
        }

        async fn send(&self, req: Request<Body>) -> Response<Body> {
            self.router.clone().oneshot(req).await.unwrap()
        }

        async fn post_json(&self, uri: &str, token: Option<&str>, body: Value) -> Response<Body> {
            let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            self.send(builder.body(Body::from(body.to_string())).unwrap()).await
        }

        async fn get(&self, uri: &str, token: Option<&str>) -> Response<Body> {
            let mut builder = Request::get(uri);
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            self.send(builder.body(Body::empty()).unwrap()).await
        }

        async fn signup(&self, email: &str) -> String {
            let resp = self
                .post_json(
                    "/auth/signup",
                    None,
                    json!({ "email": email, "password": "password123", "name": "Test" }),
                )
                .await;
            assert_eq!(resp.status(), StatusCode::OK);
            json_body(resp).await["access_token"].as_str().unwrap().to_owned()
        }

        /// Run one turn to completion; returns (conversation id, SSE body).
        async fn turn(&self, token: &str, conversation_id: Option<&str>, prompt: &str) -> (String, String) {
            let resp = self
                .post_json(
                    "/chat/stream",
                    Some(token),
                    json!({ "conversation_id": conversation_id, "prompt": prompt }),
                )
                .await;
            assert_eq!(resp.status(), StatusCode::OK);
            let id = resp.headers()[chat::CONVERSATION_ID_HEADER].to_str().unwrap().to_owned();
            (id, text_body(resp).await)
        }
    }

    async fn text_body(resp: Response<Body>) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn json_body(resp: Response<Body>) -> Value {
        serde_json::from_str(&text_body(resp).await).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = TestApp::new(vec![], vec![]).await;
        let resp = app.get("/health", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key(trace::X_TRACE_ID));
    }

    #[tokio::test]
    async fn protected_routes_reject_missing_or_bad_tokens() {
        let app = TestApp::new(vec![Script::reply(["x"])], vec![]).await;

        for uri in ["/chat", "/auth/me", "/chat/abc/messages"] {
            let resp = app.get(uri, None).await;
            assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{uri}");
            assert_eq!(resp.headers()[header::WWW_AUTHENTICATE], "Bearer");
        }

        let resp = app
            .post_json("/chat/stream", Some("garbage"), json!({ "prompt": "Hello" }))
            .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(app.agent.call_count(), 0);
    }

    #[tokio::test]
    async fn unknown_path_is_not_found_even_without_token() {
        let app = TestApp::new(vec![], vec![]).await;
        assert_eq!(app.get("/nope", None).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn signup_signin_and_me() {
        let app = TestApp::new(vec![], vec![]).await;
        let token = app.signup("Ada@Example.com").await;

        let resp = app.get("/auth/me", Some(&token)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let me = json_body(resp).await;
        assert_eq!(me["email"], "ada@example.com");
        assert_eq!(me["name"], "Test");

        let resp = app
            .post_json(
                "/auth/signup",
                None,
                json!({ "email": "ada@example.com", "password": "password123" }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"], "Email already registered");

        let resp = app
            .post_json(
                "/auth/signin",
                None,
                json!({ "email": "ADA@example.com", "password": "password123" }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["token_type"], "bearer");
        assert_eq!(body["user"]["email"], "ada@example.com");

        let resp = app
            .post_json(
                "/auth/signin",
                None,
                json!({ "email": "ada@example.com", "password": "wrong-password" }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(resp).await["error"], "Incorrect email or password");
    }

    #[tokio::test]
    async fn invalid_bodies_are_bad_requests() {
        let app = TestApp::new(vec![], vec![]).await;
        let resp = app
            .post_json("/auth/signup", None, json!({ "email": "ada@example.com", "password": "short" }))
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .send(
                Request::post("/auth/signin")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let token = app.signup("ada@example.com").await;
        let resp = app.post_json("/chat/stream", Some(&token), json!({ "prompt": "   " })).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let resp = app
            .post_json("/chat/stream", Some(&token), json!({ "prompt": "x".repeat(2000) }))
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(app.agent.call_count(), 0);
    }

    #[tokio::test]
    async fn stream_relays_fragments_and_persists_reply() {
        let app = TestApp::new(vec![Script::reply(["Hi", " there", "!"])], vec![]).await;
        let token = app.signup("ada@example.com").await;

        let (id, body) = app.turn(&token, None, "Hello").await;
        assert_eq!(body, "data: Hi\n\ndata:  there\n\ndata: !\n\ndata: [DONE]\n\n");

        let resp = app.get(&format!("/chat/{id}/messages"), Some(&token)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let messages = json_body(resp).await;
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[0]["content"], "Hello");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"], "Hi there!");

        let resp = app.get("/chat", Some(&token)).await;
        let conversations = json_body(resp).await;
        assert_eq!(conversations[0]["id"], id.as_str());
        assert_eq!(conversations[0]["title"], DEFAULT_TITLE);
    }

    #[tokio::test]
    async fn multi_line_fragments_keep_their_newlines() {
        let app = TestApp::new(vec![Script::reply(["line one\r\nline two"])], vec![]).await;
        let token = app.signup("ada@example.com").await;

        let (id, body) = app.turn(&token, Some("c-1"), "Hello").await;
        assert_eq!(id, "c-1");
        assert_eq!(body, "data: line one\ndata: line two\n\ndata: [DONE]\n\n");
        let stored = app.state.store.list_messages("c-1").await.unwrap();
        assert_eq!(stored[1].content, "line one\nline two");
    }

    #[tokio::test]
    async fn agent_failure_ends_stream_with_error_sentinel() {
        let app = TestApp::new(vec![Script::fail_after(["partial"], "connection reset")], vec![]).await;
        let token = app.signup("ada@example.com").await;

        let (id, body) = app.turn(&token, None, "Hello").await;
        assert!(body.starts_with("data: partial\n\n"));
        assert!(body.ends_with("event: error\ndata: [ERROR] agent request failed\n\n"));
        assert!(!body.contains("[DONE]"));
        assert_eq!(app.state.store.count_messages(&id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn done_sentinel_only_follows_a_stored_reply() {
        let app = TestApp::new(
            vec![Script::reply(["[DONE]", " ok"]), Script::fail_after(["[DONE]"], "reset")],
            vec![],
        )
        .await;
        let token = app.signup("ada@example.com").await;

        let (id, body) = app.turn(&token, Some("c-1"), "first").await;
        assert_eq!(body, "data: [DONE] ok\n\ndata: [DONE]\n\n");
        assert_eq!(app.state.store.count_messages(&id).await.unwrap(), 2);

        let (_, body) = app.turn(&token, Some("c-1"), "second").await;
        assert_eq!(body, "event: error\ndata: [ERROR] agent request failed\n\n");
        assert_eq!(app.state.store.count_messages(&id).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn conversations_of_other_users_are_not_found() {
        let app = TestApp::new(vec![Script::reply(["mine"])], vec![Script::reply(["T"])]).await;
        let alice = app.signup("alice@example.com").await;
        let bob = app.signup("bob@example.com").await;
        app.turn(&alice, Some("private"), "secret").await;

        let resp = app.get("/chat/private/messages", Some(&bob)).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = app
            .post_json("/chat/stream", Some(&bob), json!({ "conv_id": "private", "prompt": "hi" }))
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = app.post_json("/chat/private/title", Some(&bob), json!({})).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        assert!(json_body(app.get("/chat", Some(&bob)).await).await.as_array().unwrap().is_empty());
        assert_eq!(app.state.store.count_messages("private").await.unwrap(), 2);
        assert_eq!(app.title_agent.call_count(), 0);
    }

    #[tokio::test]
    async fn title_is_generated_once_after_threshold() {
        let app = TestApp::new(
            vec![Script::reply(["one"]), Script::reply(["two"]), Script::reply(["three"])],
            vec![Script::reply(["\"Counting\""]), Script::reply(["Never used"])],
        )
        .await;
        let token = app.signup("ada@example.com").await;

        let (id, _) = app.turn(&token, None, "first").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(app.title_agent.call_count(), 0, "two messages are below the threshold");

        app.turn(&token, Some(&id), "second").await;
        let mut title = String::new();
        for _ in 0..200 {
            let conversation = app.state.store.get_conversation(&id).await.unwrap().unwrap();
            if conversation.title_generated {
                title = conversation.title;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(title, "Counting");

        app.turn(&token, Some(&id), "third").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(app.title_agent.call_count(), 1);
        let history = &app.title_agent.calls()[0][1].content;
        assert!(history.contains("User: first\nAssistant: one\nUser: second\nAssistant: two"));
    }

    #[tokio::test]
    async fn title_endpoint_forces_generation() {
        let app = TestApp::new(
            vec![Script::reply(["reply"])],
            vec![Script::reply(["Forced title"]), Script::refuse("down")],
        )
        .await;
        let token = app.signup("ada@example.com").await;
        let (id, _) = app.turn(&token, None, "Hello").await;

        let resp = app.post_json(&format!("/chat/{id}/title"), Some(&token), json!({})).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["title"], "Forced title");
        let conversation = app.state.store.get_conversation(&id).await.unwrap().unwrap();
        assert!(conversation.title_generated);

        let resp = app.post_json(&format!("/chat/{id}/title"), Some(&token), json!({})).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        let conversation = app.state.store.get_conversation(&id).await.unwrap().unwrap();
        assert_eq!(conversation.title, "Forced title");
    }

    #[tokio::test]
    async fn docs_are_served_when_enabled() {
        let app = TestApp::new(vec![], vec![]).await;
        assert_eq!(app.get("/docs", None).await.status(), StatusCode::OK);
        let openapi = json_body(app.get("/openapi.json", None).await).await;
        assert!(openapi["paths"]["/chat/stream"].is_object());
    }
}
