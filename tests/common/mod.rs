use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use cyphire::auth::jwt::JwtService;
use cyphire::auth::password::hash_password;
use cyphire::config::AppConfig;
use cyphire::db::{self, PgPool};
use cyphire::domain::{slugify, Plan};
use cyphire::models::NewUser;
use cyphire::payments::{
    sign_payment, verify_payment_signature, GatewayOrder, PaymentGateway, PaymentResult,
};
use cyphire::routes;
use cyphire::state::AppState;
use cyphire::storage::{AttachmentUpload, ObjectStorage};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

pub const PAYMENT_SECRET: &str = "test-secret";

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, AttachmentUpload>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_attachment(&self, upload: AttachmentUpload) -> Result<()> {
        let mut guard = self.objects.lock().await;
        guard.insert(upload.key.clone(), upload);
        Ok(())
    }

    async fn presign_attachment(&self, key: &str, expires_in: Duration) -> Result<String> {
        let guard = self.objects.lock().await;
        ensure!(guard.contains_key(key), "object {key} missing");
        Ok(format!(
            "https://fake-storage/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn keys(&self) -> Vec<String> {
        let guard = self.objects.lock().await;
        guard.keys().cloned().collect()
    }

    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<AttachmentUpload> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }
}

/// Gateway double that hands out sequential order ids and checks signatures
/// with [`PAYMENT_SECRET`].
#[derive(Default)]
pub struct FakePaymentGateway {
    next_order: AtomicU64,
}

#[async_trait]
impl PaymentGateway for FakePaymentGateway {
    fn key_id(&self) -> &str {
        "rzp_test_key"
    }

    async fn create_order(
        &self,
        amount: i64,
        currency: &str,
        receipt: &str,
    ) -> PaymentResult<GatewayOrder> {
        let n = self.next_order.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(GatewayOrder {
            id: format!("order_test_{n}"),
            amount,
            currency: currency.to_string(),
            receipt: Some(receipt.to_string()),
        })
    }

    fn verify_payment(&self, order_id: &str, payment_id: &str, signature: &str) -> bool {
        verify_payment_signature(PAYMENT_SECRET, order_id, payment_id, signature)
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: 4,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "jwt-test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            jwt_expiry_minutes: 60,
            refresh_token_expiry_days: 30,
            refresh_cookie_secure: false,
            refresh_cookie_domain: None,
            cors_allowed_origin: None,
            frontend_base: Some("https://cyphire.test".to_string()),
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: "test-bucket".to_string(),
            razorpay_key_id: "rzp_test_key".to_string(),
            razorpay_key_secret: PAYMENT_SECRET.to_string(),
            razorpay_api_base: "http://127.0.0.1:9".to_string(),
            payment_currency: "INR".to_string(),
            platform_fee_bps: 1000,
        };

        let pool = db::init_pool(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let payments: Arc<dyn PaymentGateway> = Arc::new(FakePaymentGateway::default());
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool.clone(), config, storage_for_state, payments, jwt);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            storage,
        })
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    /// Inserts a user straight into the database and returns its id.
    pub async fn insert_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: &str,
    ) -> Result<Uuid> {
        let name = name.to_string();
        let email = email.to_string();
        let password = password.to_string();
        let role = role.to_string();
        self.with_conn(move |conn| {
            let password_hash = hash_password(&password)?;
            let id = Uuid::new_v4();
            let user = NewUser {
                id,
                slug: format!("{}-{}", slugify(&name), &id.simple().to_string()[..6]),
                name,
                email,
                password_hash: Some(password_hash),
                country: None,
                phone: None,
                skills: Vec::new(),
                plan: Plan::Free.as_str().to_string(),
                role,
            };
            diesel::insert_into(cyphire::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    /// Creates a regular user and returns `(id, access_token)`.
    pub async fn user_with_token(&self, name: &str, email: &str) -> Result<(Uuid, String)> {
        let id = self.insert_user(name, email, "password123", "user").await?;
        let token = self.login_token(email, "password123").await?;
        Ok((id, token))
    }

    #[allow(dead_code)]
    pub async fn admin_with_token(&self, email: &str) -> Result<(Uuid, String)> {
        let id = self.insert_user("Admin", email, "password123", "admin").await?;
        let token = self.login_token(email, "password123").await?;
        Ok((id, token))
    }

    pub async fn login_token(&self, email: &str, password: &str) -> Result<String> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            email: &'a str,
            password: &'a str,
        }

        let response = self
            .post_json("/api/auth/login", &LoginPayload { email, password }, None)
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let body = json_body(response).await?;
        body["access_token"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("login response without access_token"))
    }

    /// Posts a task priced `price` and returns its id.
    #[allow(dead_code)]
    pub async fn create_task(&self, token: &str, title: &str, price: i64) -> Result<Uuid> {
        let deadline = (chrono::Utc::now() + chrono::Duration::days(7)).to_rfc3339();
        let response = self
            .post_json(
                "/api/tasks",
                &json!({
                    "title": title,
                    "description": format!("{title} details"),
                    "price": price,
                    "category": ["design"],
                    "deadline": deadline,
                }),
                Some(token),
            )
            .await?;
        ensure!(
            response.status() == StatusCode::CREATED,
            "task creation failed with status {}",
            response.status()
        );
        let body = json_body(response).await?;
        parse_id(&body["id"])
    }

    /// Applies, opens an order and verifies a correctly signed payment.
    /// Returns the workroom id.
    #[allow(dead_code)]
    pub async fn hire(
        &self,
        client_token: &str,
        worker_id: Uuid,
        worker_token: &str,
        task_id: Uuid,
    ) -> Result<Uuid> {
        let response = self
            .post_json(
                &format!("/api/tasks/{task_id}/apply"),
                &json!({ "cover_letter": "I can do this" }),
                Some(worker_token),
            )
            .await?;
        ensure!(
            response.status() == StatusCode::CREATED,
            "apply failed with status {}",
            response.status()
        );

        let order_id = self.create_order(client_token, task_id, worker_id).await?;
        let response = self
            .verify_payment(client_token, &order_id, "pay_test_1")
            .await?;
        ensure!(
            response.status() == StatusCode::OK,
            "verify failed with status {}",
            response.status()
        );
        let body = json_body(response).await?;
        parse_id(&body["workroom_id"])
    }

    #[allow(dead_code)]
    pub async fn create_order(
        &self,
        client_token: &str,
        task_id: Uuid,
        applicant_id: Uuid,
    ) -> Result<String> {
        let response = self
            .post_json(
                "/api/payments/orders",
                &json!({ "task_id": task_id, "applicant_id": applicant_id }),
                Some(client_token),
            )
            .await?;
        ensure!(
            response.status() == StatusCode::CREATED,
            "order creation failed with status {}",
            response.status()
        );
        let body = json_body(response).await?;
        body["order_id"]
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| anyhow!("order response without order_id"))
    }

    #[allow(dead_code)]
    pub async fn verify_payment(
        &self,
        client_token: &str,
        order_id: &str,
        payment_id: &str,
    ) -> Result<hyper::Response<Body>> {
        let signature = sign_payment(PAYMENT_SECRET, order_id, payment_id);
        self.post_json(
            "/api/payments/verify",
            &json!({
                "order_id": order_id,
                "payment_id": payment_id,
                "signature": signature,
            }),
            Some(client_token),
        )
        .await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PATCH, path, payload, token).await
    }

    #[allow(dead_code)]
    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send_empty(Method::GET, path, token).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        self.send_empty(Method::DELETE, path, token).await
    }

    #[allow(dead_code)]
    pub async fn upload_file(
        &self,
        filename: &str,
        content_type: &str,
        data: &[u8],
        token: &str,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend(data);
        body.extend(b"\r\n");
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/uploads")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .header("authorization", format!("Bearer {token}"))
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn send_request(&self, request: Request<Body>) -> Result<hyper::Response<Body>> {
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::from(body))?;
        self.send_request(request).await
    }

    async fn send_empty(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        self.send_request(request).await
    }

    #[allow(dead_code)]
    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn json_body(response: hyper::Response<Body>) -> Result<Value> {
    let bytes = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&bytes).context("response body is not JSON")
}

pub fn parse_id(value: &Value) -> Result<Uuid> {
    value
        .as_str()
        .ok_or_else(|| anyhow!("expected a uuid string, got {value}"))?
        .parse()
        .context("invalid uuid")
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        db::run_migrations(&pool)?;
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE ticket_comments, tickets, payment_logs, messages, workrooms, \
         payment_orders, task_applicants, tasks, user_projects, refresh_tokens, users \
         RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
