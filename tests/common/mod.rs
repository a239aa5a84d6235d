//! Shared fixtures for the integration tests.

#![allow(dead_code)] // each test binary uses a different subset

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use chrono::Utc;
use serde_json::{Map, Value, json};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

use concrete::auth::TokenGenerator;
use concrete::config::AuthConfig;
use concrete::datamodel::{self, Registry};
use concrete::server::{AppState, create_router};
use concrete::store::{SqliteStore, Store};
use concrete::types::{Level, Record, RecordGrants, User};

pub const PASSWORD: &str = "correct horse battery";

/// Wraps `data_modeling` in a current-version manifest.
pub fn manifest(data_modeling: Value) -> Value {
    json!({"manifest": {"version": "1.0.0", "data_modeling": data_modeling}})
}

/// `Company` divides `Project`; `Note` is undivided.
pub fn company_workspace() -> Value {
    manifest(json!({
        "models": [
            {"uid": "m-company", "name": "Company", "fields": [
                {"name": "label", "datatype": "char", "attributes": {"max_length": 80}}
            ]},
            {"uid": "m-project", "name": "Project", "fields": [
                {"name": "title", "datatype": "char", "attributes": {"max_length": 120}},
                {"name": "budget", "datatype": "decimal"}
            ]},
            {"uid": "m-note", "name": "Note", "fields": [
                {"name": "body", "datatype": "txt"}
            ]}
        ],
        "permissions": [
            {"model_uid": "m-company", "create": "admin", "retrieve": "authenticated"},
            {"model_uid": "m-project", "lookups": ["m-company"], "create": "authenticated",
             "retrieve": "authenticated", "update": "manager", "delete": "admin"},
            {"model_uid": "m-note", "retrieve": "anonymous", "create": "manager"}
        ],
        "resource_queries": [
            {"model_uid": "m-company"},
            {"model_uid": "m-project", "display_fields": ["title"], "search_fields": ["title"]},
            {"model_uid": "m-note"}
        ],
        "one_to_many_relations": [],
        "many_to_many_relations": []
    }))
}

pub fn compile(doc: &Value) -> Registry {
    datamodel::compile_value(doc).expect("compile datamodel")
}

/// An in-process server over a temporary database.
pub struct TestApp {
    pub temp_dir: TempDir,
    pub store: Arc<SqliteStore>,
    pub router: Router,
}

impl TestApp {
    pub fn new(doc: &Value) -> Self {
        Self::with_auth(doc, AuthConfig::default())
    }

    pub fn with_auth(doc: &Value, auth: AuthConfig) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");
        let store = Arc::new(
            SqliteStore::new(temp_dir.path().join("concrete.db")).expect("open store"),
        );
        store.initialize().expect("initialize store");

        let state = Arc::new(AppState::new(
            store.clone(),
            Arc::new(compile(doc)),
            auth,
        ));

        Self {
            temp_dir,
            store,
            router: create_router(state),
        }
    }

    /// Creates a user at `level` and returns its id.
    pub fn create_user(&self, email: &str, level: Level) -> String {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_hash: TokenGenerator::for_passwords()
                .hash(PASSWORD)
                .expect("hash password"),
            first_name: String::new(),
            last_name: String::new(),
            flags: level.flags(),
            password_modification_date: now,
            unsubscribe_all: false,
            data: Map::new(),
            created_at: now,
            updated_at: now,
        };
        self.store.create_user(&user).expect("create user");
        user.id
    }

    /// Inserts a record directly, bypassing the API.
    pub fn create_record(&self, entity: &str, divider: Option<&str>, public: bool) -> String {
        let now = Utc::now();
        let record = Record {
            uid: Uuid::new_v4().to_string(),
            entity: entity.to_string(),
            divider: divider.map(str::to_string),
            public,
            additional_filtering: false,
            data: Map::new(),
            grants: RecordGrants::default(),
            creation_date: now,
            modification_date: now,
        };
        self.store.create_record(&record).expect("create record");
        record.uid
    }

    pub fn user_level(&self, id: &str) -> Level {
        self.store
            .get_user(id)
            .expect("get user")
            .expect("user exists")
            .level()
    }

    pub async fn login(&self, email: &str) -> String {
        let (status, body) = self
            .request(
                Method::POST,
                "/api/v1/auth/login",
                None,
                Some(json!({"email": email, "password": PASSWORD})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "login failed: {body}");
        body["data"]["token"]
            .as_str()
            .expect("token in login response")
            .to_string()
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}
