#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use econnectone::api::{self, AppState};
use econnectone::config::Config;
use econnectone::db::init_db;
use econnectone::domain::NewUser;
use econnectone::services::password::hash_password;
use econnectone::{Repository, Role};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub const PASSWORD: &str = "correct horse battery";

pub struct TestApp {
    pub app: axum::Router,
    pub repo: Arc<Repository>,
    _temp: TempDir,
}

pub async fn setup_test_app() -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();

    let pool = init_db(&db_path).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));

    let env = HashMap::from([
        ("DATABASE_PATH".to_string(), db_path),
        ("MAX_FAILED_LOGINS".to_string(), "3".to_string()),
    ]);
    let config = Config::from_env_map(env).unwrap();
    repo.seed_risk_limits(&config.default_limits).await.unwrap();

    let app = api::create_router(AppState::new(repo.clone(), config));
    TestApp {
        app,
        repo,
        _temp: temp_dir,
    }
}

impl TestApp {
    /// Insert a user straight into the database with [`PASSWORD`].
    pub async fn seed_user(&self, email: &str, role: Role) -> i64 {
        let user = self
            .repo
            .insert_user(&NewUser {
                email: email.to_string(),
                full_name: email.split('@').next().unwrap().to_string(),
                phone: None,
                role,
                password_hash: hash_password(PASSWORD).unwrap(),
            })
            .await
            .unwrap();
        if role == Role::Csp {
            self.repo.ensure_wallet(user.id, "NGN").await.unwrap();
        }
        user.id
    }

    pub async fn login(&self, email: &str) -> String {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/auth/login",
                None,
                Some(serde_json::json!({ "email": email, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {}", body);
        body["token"].as_str().unwrap().to_string()
    }

    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {}", token));
        }
        let req = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).to_string())
            })
        };
        (status, value)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::POST, uri, Some(token), Some(body)).await
    }
}
