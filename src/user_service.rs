//! Demo upstream for HttpProxy routes: a small user directory.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub tier: String,
}

#[derive(Debug, Deserialize)]
pub struct NewUser {
    pub name: Option<String>,
    pub email: Option<String>,
    pub tier: Option<String>,
}

pub type UserStore = Arc<Mutex<Vec<User>>>;

fn seed() -> Vec<User> {
    vec![
        User {
            user_id: "u-001".into(),
            name: "Alice Johnson".into(),
            email: "alice@example.com".into(),
            tier: "premium".into(),
        },
        User {
            user_id: "u-002".into(),
            name: "Bob Smith".into(),
            email: "bob@example.com".into(),
            tier: "basic".into(),
        },
    ]
}

pub fn router() -> Router {
    let store: UserStore = Arc::new(Mutex::new(seed()));

    Router::new()
        .route(
            "/users",
            get(list_users)
                .post(create_user)
                .fallback(method_not_allowed),
        )
        .route("/health", get(health))
        .with_state(store)
}

async fn list_users(State(store): State<UserStore>) -> impl IntoResponse {
    let users = store.lock().clone();
    Json(json!({ "count": users.len(), "users": users }))
}

async fn create_user(
    State(store): State<UserStore>,
    body: Option<Json<NewUser>>,
) -> impl IntoResponse {
    let Some(Json(NewUser {
        name: Some(name),
        email: Some(email),
        tier,
    })) = body
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "name and email are required" })),
        );
    };

    let mut users = store.lock();
    let user = User {
        user_id: format!("u-{:03}", users.len() + 1),
        name,
        email,
        tier: tier.unwrap_or_else(|| "basic".to_string()),
    };
    users.push(user.clone());
    tracing::info!(user_id = %user.user_id, "Created user");

    (StatusCode::CREATED, Json(json!(user)))
}

async fn method_not_allowed() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(json!({ "error": "Method Not Allowed" })),
    )
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy", "service": "user-service" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn send(app: Router, method: Method, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri("/users");
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_list_seeded_users() {
        let (status, body) = send(router(), Method::GET, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["users"][0]["userId"], "u-001");
    }

    #[tokio::test]
    async fn test_create_user() {
        let (status, body) = send(
            router(),
            Method::POST,
            Some(json!({ "name": "Carol", "email": "carol@example.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["userId"], "u-003");
        assert_eq!(body["tier"], "basic");
    }

    #[tokio::test]
    async fn test_other_verbs_rejected() {
        let (status, body) = send(router(), Method::DELETE, None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["error"], "Method Not Allowed");
    }

    #[tokio::test]
    async fn test_create_user_requires_fields() {
        let (status, body) = send(router(), Method::POST, Some(json!({ "name": "Dave" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "name and email are required");
    }
}
