use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use docbuilder::auth::jwt::TokenService;
use docbuilder::config::AppConfig;
use docbuilder::db::{self, PgPool};
use docbuilder::email::{Mailer, OutgoingEmail};
use docbuilder::export::{
    DocumentRenderer, NativeDocxRenderer, RenderError, RenderInput, RenderedFile, Renderers,
};
use docbuilder::routes;
use docbuilder::state::AppState;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Default)]
pub struct FakeMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
}

#[async_trait]
impl Mailer for FakeMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<()> {
        self.sent.lock().await.push(email);
        Ok(())
    }
}

impl FakeMailer {
    #[allow(dead_code)]
    pub async fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().await.clone()
    }

    /// Token from the most recent mail sent to `to`.
    pub async fn last_token_for(&self, to: &str) -> Result<String> {
        let guard = self.sent.lock().await;
        let mail = guard
            .iter()
            .rev()
            .find(|mail| mail.to == to)
            .ok_or_else(|| anyhow!("no mail sent to {to}"))?;
        let start = mail
            .body
            .find("token=")
            .ok_or_else(|| anyhow!("mail to {to} has no token link"))?
            + "token=".len();
        let token: String = mail.body[start..]
            .chars()
            .take_while(|ch| ch.is_ascii_hexdigit())
            .collect();
        ensure!(!token.is_empty(), "empty token in mail to {to}");
        Ok(token)
    }
}

/// Returns canned bytes and remembers what it was asked to render.
pub struct FakeRenderer {
    extension: &'static str,
    content_type: &'static str,
    inputs: Mutex<Vec<RenderInput>>,
}

impl FakeRenderer {
    fn new(extension: &'static str, content_type: &'static str) -> Self {
        Self {
            extension,
            content_type,
            inputs: Mutex::new(Vec::new()),
        }
    }

    #[allow(dead_code)]
    pub async fn inputs(&self) -> Vec<RenderInput> {
        self.inputs.lock().await.clone()
    }
}

#[async_trait]
impl DocumentRenderer for FakeRenderer {
    async fn render(&self, input: RenderInput) -> Result<RenderedFile, RenderError> {
        let file_name = format!("{}.{}", input.file_stem, self.extension);
        let bytes = format!("fake {} of {} bytes", self.extension, input.html.len()).into_bytes();
        self.inputs.lock().await.push(input);
        Ok(RenderedFile {
            file_name,
            content_type: self.content_type.to_string(),
            bytes,
        })
    }
}

#[derive(Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub user_id: Uuid,
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    mailer: Arc<FakeMailer>,
    pandoc: Arc<FakeRenderer>,
    pdf: Arc<FakeRenderer>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "test-issuer".to_string(),
            jwt_audience: "test-audience".to_string(),
            refresh_token_audience: "test-refresh".to_string(),
            access_token_expiry_minutes: 60,
            refresh_token_expiry_days: 7,
            refresh_cookie_secure: false,
            refresh_cookie_domain: None,
            frontend_url: "http://frontend.test".to_string(),
            cors_allowed_origin: None,
            smtp: None,
            mail_drop_dir: PathBuf::from("mail-drop"),
            pandoc_path: "pandoc".to_string(),
            wkhtmltopdf_path: "wkhtmltopdf".to_string(),
            converter_timeout_seconds: 5,
            export_dir: PathBuf::from("exports"),
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let mailer = Arc::new(FakeMailer::default());
        let pandoc = Arc::new(FakeRenderer::new("docx", docbuilder::export::DOCX_CONTENT_TYPE));
        let pdf = Arc::new(FakeRenderer::new("pdf", docbuilder::export::PDF_CONTENT_TYPE));
        let renderers = Renderers {
            native_docx: Arc::new(NativeDocxRenderer::new(None)),
            pandoc_docx: pandoc.clone(),
            pdf: pdf.clone(),
        };

        let tokens = TokenService::from_config(&config);
        let state = AppState::new(pool, config, tokens, mailer.clone(), renderers);
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            mailer,
            pandoc,
            pdf,
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

    pub fn mailer(&self) -> Arc<FakeMailer> {
        self.mailer.clone()
    }

    #[allow(dead_code)]
    pub fn pandoc(&self) -> Arc<FakeRenderer> {
        self.pandoc.clone()
    }

    #[allow(dead_code)]
    pub fn pdf(&self) -> Arc<FakeRenderer> {
        self.pdf.clone()
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<hyper::Response<Body>> {
        self.post_json(
            "/register",
            &json!({
                "first_name": "Test",
                "last_name": email.split('@').next().unwrap_or_default(),
                "email": email,
                "password": password,
            }),
            None,
        )
        .await
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<hyper::Response<Body>> {
        self.post_json(
            "/login",
            &json!({ "email": email, "password": password }),
            None,
        )
        .await
    }

    /// Registers, confirms the emailed token and logs in.
    pub async fn signup(&self, email: &str, password: &str) -> Result<LoginResponse> {
        let response = self.register(email, password).await?;
        ensure!(
            response.status() == StatusCode::CREATED,
            "register failed with status {}",
            response.status()
        );

        let token = self.mailer.last_token_for(email).await?;
        let response = self
            .post_json("/verify", &json!({ "token": token }), None)
            .await?;
        ensure!(
            response.status() == StatusCode::OK,
            "verify failed with status {}",
            response.status()
        );

        let response = self.login(email, password).await?;
        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );
        read_json(response).await
    }

    /// Invites `email` and completes the set-password step.
    #[allow(dead_code)]
    pub async fn invite_member(
        &self,
        inviter_token: &str,
        email: &str,
        role: Option<&str>,
    ) -> Result<LoginResponse> {
        let response = self
            .post_json(
                "/invite",
                &json!({ "email": email, "first_name": "Invited", "role": role }),
                Some(inviter_token),
            )
            .await?;
        ensure!(
            response.status() == StatusCode::OK,
            "invite failed with status {}",
            response.status()
        );

        let token = self.mailer.last_token_for(email).await?;
        let response = self
            .post_json(
                "/set-password",
                &json!({ "token": token, "password": "member-pass" }),
                None,
            )
            .await?;
        ensure!(
            response.status() == StatusCode::OK,
            "set-password failed with status {}",
            response.status()
        );
        read_json(response).await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token).await
    }

    /// Sends the request on its own task so it runs alongside the caller.
    #[allow(dead_code)]
    pub fn spawn_post_json(
        &self,
        path: &str,
        payload: serde_json::Value,
        token: &str,
    ) -> tokio::task::JoinHandle<Result<StatusCode>> {
        let router = self.router.clone();
        let path = path.to_string();
        let token = token.to_string();
        tokio::spawn(async move {
            let request = Request::builder()
                .method(Method::POST)
                .uri(path)
                .header("content-type", "application/json")
                .header("authorization", format!("Bearer {token}"))
                .body(Body::from(serde_json::to_vec(&payload)?))?;
            let response = router.oneshot(request).await.expect("infallible response");
            Ok(response.status())
        })
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, payload, token).await
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
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn post_with_cookie(&self, path: &str, cookie: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("cookie", cookie)
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let builder = Request::builder().method(Method::DELETE).uri(path);
        let builder = if let Some(token) = token {
            builder.header("authorization", format!("Bearer {token}"))
        } else {
            builder
        };
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
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

pub async fn read_json<T: for<'de> Deserialize<'de>>(response: hyper::Response<Body>) -> Result<T> {
    let body = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&body).with_context(|| {
        format!(
            "unexpected response body: {}",
            String::from_utf8_lossy(&body)
        )
    })
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

/// Keeps the seeded built-in roles; organization roles go with their organization.
fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE document_revisions, document_data, documents, template_styles, templates, \
         tags, sessions, users RESTART IDENTITY CASCADE; \
         DELETE FROM roles WHERE organization_id IS NOT NULL; \
         DELETE FROM organizations;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
