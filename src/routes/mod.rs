use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{delete, get, post, put},
    Router,
};
use serde::Serialize;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::{auth::AuthenticatedUser, state::AppState};

pub mod auth;
pub mod documents;
pub mod health;
pub mod tags;
pub mod templates;
pub mod users;

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins()
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let allow_origin = if origins.is_empty() {
        AllowOrigin::mirror_request()
    } else {
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

pub fn create_router(state: AppState) -> Router<()> {
    let cors = cors_layer(&state);

    let public_routes = Router::new()
        .route("/login", post(auth::login))
        .route("/register", post(auth::register))
        .route("/refresh", post(auth::refresh))
        .route("/verify", post(auth::verify).get(auth::verify_link))
        .route("/set-password", post(auth::set_password))
        .route("/health", get(health::health_check));

    let account_routes = Router::new()
        .route("/logout", post(auth::logout))
        .route("/me", get(auth::me))
        .route("/auth/check", get(auth::check))
        .route("/invite", post(auth::invite));

    let user_routes = Router::new()
        .route("/users/invited", get(users::list_members))
        .route("/users/assign-role", post(users::assign_role))
        .route("/users/:id/block", post(users::block_user))
        .route("/users/:id/unblock", post(users::unblock_user))
        .route("/users/:id", delete(users::delete_user))
        .route("/api/users", get(users::list_users))
        .route("/api/roles", get(users::list_roles))
        .route("/roles/rename", post(users::rename_role))
        .route("/roles/delete", post(users::delete_role));

    let template_routes = Router::new()
        .route("/create", post(templates::create_template))
        .route("/get", get(templates::get_template_by_query))
        .route("/all", get(templates::list_templates))
        .route("/update", put(templates::update_template))
        .route("/delete", delete(templates::delete_template))
        .route("/rename", post(templates::rename_template))
        .route("/update-content", put(templates::update_template_content))
        .route("/styles", post(templates::create_style))
        .route("/:id", get(templates::get_template))
        .route("/:id/styles", get(templates::list_styles));

    let tag_routes = Router::new()
        .route("/create", post(tags::create_tag))
        .route("/all", get(tags::list_tags))
        .route("/:id", put(tags::update_tag));

    let document_routes = Router::new()
        .route("/create", post(documents::create_document))
        .route("/update-content", post(documents::update_rendered_content))
        .route("/user/:id", get(documents::list_user_documents))
        .route("/:id", get(documents::get_document))
        .route("/:id/revision", post(documents::save_revision))
        .route("/:id/revisions", get(documents::list_revisions))
        .route(
            "/:id/data",
            get(documents::get_document_data).post(documents::save_document_field),
        )
        .route("/:id/export-word", post(documents::export_word))
        .route("/:id/export", get(documents::export_docx))
        .route("/:id/export-docx", get(documents::export_docx))
        .route("/:id/export-pdf", get(documents::export_pdf));

    let protected_state = state.clone();
    let protected_routes = Router::new()
        .merge(account_routes)
        .merge(user_routes)
        .nest("/templates", template_routes)
        .nest("/tags", tag_routes)
        .nest("/documents", document_routes)
        .layer(middleware::from_extractor_with_state::<AuthenticatedUser, _>(protected_state));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
}
