use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    export::{standalone_html, DocumentRenderer, RenderError, RenderInput, RenderedFile},
    models::{Document, DocumentRevision, NewDocument, NewDocumentField, NewDocumentRevision},
    routes::{templates::find_template, MessageResponse},
    schema::{document_data, document_revisions, documents, users},
    state::AppState,
    styles,
};

fn attachment_content_disposition(filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(&sanitized, percent_encoding::NON_ALPHANUMERIC);
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        sanitized, encoded
    )
}

/// Loads a document owned by someone in the caller's organization.
fn find_document(conn: &mut PgConnection, organization_id: Uuid, id: Uuid) -> AppResult<Document> {
    documents::table
        .inner_join(users::table)
        .filter(documents::id.eq(id))
        .filter(users::organization_id.eq(organization_id))
        .select(documents::all_columns)
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)
}

#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub template_id: Option<Uuid>,
    pub name: String,
    pub content: String,
    pub rendered_content: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            user_id: doc.user_id,
            template_id: doc.template_id,
            name: doc.name,
            content: doc.content,
            rendered_content: doc.rendered_content.unwrap_or_default(),
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}

#[derive(Deserialize)]
pub struct CreateDocumentRequest {
    pub template_id: Uuid,
}

#[derive(Serialize)]
pub struct CreateDocumentResponse {
    pub document_id: Uuid,
}

/// Starts a document as a copy of a template's name and content.
pub async fn create_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateDocumentRequest>,
) -> AppResult<(StatusCode, Json<CreateDocumentResponse>)> {
    let mut conn = state.db()?;
    let template = find_template(&mut conn, user.organization_id, payload.template_id)?;

    let document_id = Uuid::new_v4();
    diesel::insert_into(documents::table)
        .values(&NewDocument {
            id: document_id,
            user_id: user.user_id,
            template_id: Some(template.id),
            name: template.name,
            content: template.content,
        })
        .execute(&mut conn)?;

    tracing::info!(%document_id, template_id = %template.id, user_id = %user.user_id, "created document");
    Ok((
        StatusCode::CREATED,
        Json(CreateDocumentResponse { document_id }),
    ))
}

pub async fn get_document(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DocumentResponse>> {
    let mut conn = state.db()?;
    let document = find_document(&mut conn, user.organization_id, id)?;
    Ok(Json(document.into()))
}

pub async fn list_user_documents(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(owner_id): Path<Uuid>,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<Document> = documents::table
        .inner_join(users::table)
        .filter(documents::user_id.eq(owner_id))
        .filter(users::organization_id.eq(user.organization_id))
        .order(documents::created_at.desc())
        .select(documents::all_columns)
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(DocumentResponse::from).collect()))
}

#[derive(Deserialize)]
pub struct UpdateRenderedContentRequest {
    pub id: Uuid,
    pub content: String,
}

/// Replaces the document's rendered HTML. Placeholder substitution happens
/// on the client.
pub async fn update_rendered_content(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateRenderedContentRequest>,
) -> AppResult<Json<MessageResponse>> {
    let mut conn = state.db()?;
    let document = find_document(&mut conn, user.organization_id, payload.id)?;
    diesel::update(documents::table.find(document.id))
        .set((
            documents::rendered_content.eq(Some(&payload.content)),
            documents::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;

    tracing::debug!(document_id = %document.id, bytes = payload.content.len(), "updated rendered content");
    Ok(Json(MessageResponse::new("rendered content updated")))
}

#[derive(Deserialize)]
pub struct SaveRevisionRequest {
    pub content: String,
}

pub async fn save_revision(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<SaveRevisionRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    let mut conn = state.db()?;
    let document = find_document(&mut conn, user.organization_id, id)?;
    diesel::insert_into(document_revisions::table)
        .values(&NewDocumentRevision {
            id: Uuid::new_v4(),
            document_id: document.id,
            content: payload.content,
        })
        .execute(&mut conn)?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("revision saved")),
    ))
}

#[derive(Serialize)]
pub struct RevisionResponse {
    pub id: Uuid,
    pub content: String,
    pub created_at: NaiveDateTime,
}

pub async fn list_revisions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<RevisionResponse>>> {
    let mut conn = state.db()?;
    let document = find_document(&mut conn, user.organization_id, id)?;
    let rows: Vec<DocumentRevision> = document_revisions::table
        .filter(document_revisions::document_id.eq(document.id))
        .order(document_revisions::created_at.desc())
        .load(&mut conn)?;

    Ok(Json(
        rows.into_iter()
            .map(|rev| RevisionResponse {
                id: rev.id,
                content: rev.content,
                created_at: rev.created_at,
            })
            .collect(),
    ))
}

pub async fn get_document_data(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<BTreeMap<String, String>>> {
    let mut conn = state.db()?;
    let document = find_document(&mut conn, user.organization_id, id)?;
    let rows: Vec<(String, String)> = document_data::table
        .filter(document_data::document_id.eq(document.id))
        .select((document_data::field_name, document_data::field_value))
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().collect()))
}

#[derive(Deserialize)]
pub struct SaveFieldRequest {
    pub field_name: String,
    #[serde(default)]
    pub field_value: String,
}

/// Upserts one field value; the last write for a name wins.
pub async fn save_document_field(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<SaveFieldRequest>,
) -> AppResult<Json<MessageResponse>> {
    let field_name = payload.field_name.trim();
    if field_name.is_empty() {
        return Err(AppError::bad_request("field_name is required"));
    }

    let mut conn = state.db()?;
    let document = find_document(&mut conn, user.organization_id, id)?;
    diesel::insert_into(document_data::table)
        .values(&NewDocumentField {
            document_id: document.id,
            field_name: field_name.to_string(),
            field_value: payload.field_value,
        })
        .on_conflict((document_data::document_id, document_data::field_name))
        .do_update()
        .set((
            document_data::field_value.eq(excluded(document_data::field_value)),
            document_data::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;
    Ok(Json(MessageResponse::new("saved")))
}

/// Converts the rendered content through pandoc.
pub async fn export_word(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let input = {
        let mut conn = state.db()?;
        let document = find_document(&mut conn, user.organization_id, id)?;
        let html = document.rendered_content.ok_or_else(AppError::not_found)?;
        RenderInput {
            file_stem: file_stem(document.id),
            html: standalone_html(&html),
            ..Default::default()
        }
    };
    render(&state.renderers.pandoc_docx, input, id).await
}

/// Builds the Word file natively, sizing styled spans from the template's
/// inline rules.
pub async fn export_docx(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let input = {
        let mut conn = state.db()?;
        let document = find_document(&mut conn, user.organization_id, id)?;
        let html = document.rendered_content.ok_or_else(AppError::not_found)?;
        let font_sizes = styles::font_sizes_for_document(&mut conn, document.id)?;
        RenderInput {
            file_stem: file_stem(document.id),
            html,
            font_sizes,
        }
    };
    render(&state.renderers.native_docx, input, id).await
}

/// Renders the working content, not the rendered snapshot, to PDF.
pub async fn export_pdf(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    let input = {
        let mut conn = state.db()?;
        let document = find_document(&mut conn, user.organization_id, id)?;
        if document.content.trim().is_empty() {
            return Err(AppError::not_found());
        }
        RenderInput {
            file_stem: file_stem(document.id),
            html: standalone_html(&document.content),
            ..Default::default()
        }
    };
    render(&state.renderers.pdf, input, id).await
}

fn file_stem(document_id: Uuid) -> String {
    format!("document_{document_id}")
}

async fn render(
    renderer: &Arc<dyn DocumentRenderer>,
    input: RenderInput,
    document_id: Uuid,
) -> AppResult<Response> {
    let file = renderer.render(input).await.map_err(|err: RenderError| {
        AppError::internal(format!("export of document {document_id} failed: {err}"))
    })?;
    tracing::info!(%document_id, file = %file.file_name, bytes = file.bytes.len(), "exported document");
    file_response(file)
}

fn file_response(file: RenderedFile) -> AppResult<Response> {
    let content_type = HeaderValue::from_str(&file.content_type).map_err(AppError::internal)?;
    let disposition = HeaderValue::from_str(&attachment_content_disposition(&file.file_name))
        .map_err(AppError::internal)?;
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        file.bytes,
    )
        .into_response())
}
