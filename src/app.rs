use std::net::SocketAddr;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::{auth, ingredients, recipes, tags, users};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(auth::router())
                .merge(users::router())
                .merge(tags::router())
                .merge(ingredients::router())
                .merge(recipes::router())
                .route("/health", get(|| async { "ok" })),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!("http_request", %method, uri = %uri, status = tracing::field::Empty)
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::{
        body::Body,
        extract::FromRef,
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::auth::JwtKeys;

    fn bearer(state: &AppState, user_id: Uuid) -> String {
        let token = JwtKeys::from_ref(state).sign_access(user_id).unwrap();
        format!("Bearer {token}")
    }

    async fn send(state: &AppState, req: Request<Body>) -> (StatusCode, Value) {
        let res = build_app(state.clone()).oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn json_request(method: Method, uri: &str, auth: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(auth) = auth {
            builder = builder.header(header::AUTHORIZATION, auth);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn recipe_body() -> Value {
        json!({
            "ingredients": [{"id": Uuid::new_v4(), "amount": 10}],
            "tags": [Uuid::new_v4()],
            "image": "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=",
            "name": "Porridge",
            "text": "Cook oats in milk.",
            "cooking_time": 10
        })
    }

    #[tokio::test]
    async fn health_is_ok() {
        let state = AppState::fake();
        let req = Request::get("/api/health").body(Body::empty()).unwrap();
        let res = build_app(state).oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn writes_require_authentication() {
        let state = AppState::fake();

        let (status, body) =
            send(&state, json_request(Method::POST, "/api/recipes", None, recipe_body())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["detail"].is_string());

        let req = Request::get("/api/recipes/download_shopping_cart")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&state, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let uri = format!("/api/recipes/{}/favorite", Uuid::new_v4());
        let req = Request::post(uri).body(Body::empty()).unwrap();
        let (status, _) = send(&state, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn bad_token_is_rejected_even_on_public_reads() {
        let state = AppState::fake();
        let req = Request::get("/api/recipes")
            .header(header::AUTHORIZATION, "Bearer not-a-jwt")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&state, req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn recipe_create_validates_before_touching_the_database() {
        let state = AppState::fake();
        let auth = bearer(&state, Uuid::new_v4());

        let mut no_tags = recipe_body();
        no_tags["tags"] = json!([]);
        let (status, body) =
            send(&state, json_request(Method::POST, "/api/recipes", Some(&auth), no_tags)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "At least one tag is required");

        let mut no_ingredients = recipe_body();
        no_ingredients["ingredients"] = json!([]);
        let (status, _) =
            send(&state, json_request(Method::POST, "/api/recipes", Some(&auth), no_ingredients))
                .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let ingredient = Uuid::new_v4();
        let mut repeated = recipe_body();
        repeated["ingredients"] = json!([
            {"id": ingredient, "amount": 1},
            {"id": ingredient, "amount": 2}
        ]);
        let (status, body) =
            send(&state, json_request(Method::POST, "/api/recipes", Some(&auth), repeated)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Ingredients must not repeat");

        let tag = Uuid::new_v4();
        let mut repeated_tags = recipe_body();
        repeated_tags["tags"] = json!([tag, tag]);
        let (status, body) =
            send(&state, json_request(Method::POST, "/api/recipes", Some(&auth), repeated_tags))
                .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Tags must not repeat");
    }

    #[tokio::test]
    async fn subscribing_to_yourself_is_a_bad_request() {
        let state = AppState::fake();
        let me = Uuid::new_v4();
        let auth = bearer(&state, me);
        let req = Request::post(format!("/api/users/{me}/subscribe"))
            .header(header::AUTHORIZATION, auth)
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&state, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "You cannot subscribe to yourself");
    }

    #[tokio::test]
    async fn registration_validates_before_touching_the_database() {
        let state = AppState::fake();
        let body = json!({
            "email": "not-an-email",
            "username": "cook",
            "first_name": "A",
            "last_name": "B",
            "password": "long-enough-password"
        });
        let (status, body) = send(&state, json_request(Method::POST, "/api/users", None, body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], "Invalid email");
    }

    #[tokio::test]
    async fn recipe_query_errors_are_bad_requests() {
        let state = AppState::fake();
        let req = Request::get("/api/recipes?is_favorited=perhaps")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&state, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
