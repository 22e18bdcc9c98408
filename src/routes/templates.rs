use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    error::{AppError, AppResult},
    models::{NewTemplate, NewTemplateStyle, Template, TemplateStyle},
    routes::MessageResponse,
    schema::{template_styles, templates, users},
    state::AppState,
    styles,
};

#[derive(Serialize)]
pub struct TemplateResponse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub content: String,
    pub created_at: NaiveDateTime,
}

impl From<Template> for TemplateResponse {
    fn from(template: Template) -> Self {
        Self {
            id: template.id,
            user_id: template.user_id,
            name: template.name,
            content: template.content,
            created_at: template.created_at,
        }
    }
}

/// Loads a template owned by someone in the caller's organization.
pub(crate) fn find_template(
    conn: &mut PgConnection,
    organization_id: Uuid,
    id: Uuid,
) -> AppResult<Template> {
    templates::table
        .inner_join(users::table)
        .filter(templates::id.eq(id))
        .filter(users::organization_id.eq(organization_id))
        .select(templates::all_columns)
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)
}

#[derive(Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Serialize)]
pub struct CreatedResponse {
    pub id: Uuid,
}

pub async fn create_template(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateTemplateRequest>,
) -> AppResult<(StatusCode, Json<CreatedResponse>)> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name is required"));
    }

    let mut conn = state.db()?;
    let template = NewTemplate {
        id: Uuid::new_v4(),
        user_id: user.user_id,
        name: name.to_string(),
        content: payload.content,
    };
    diesel::insert_into(templates::table)
        .values(&template)
        .execute(&mut conn)?;

    tracing::info!(template_id = %template.id, user_id = %user.user_id, "created template");
    Ok((StatusCode::CREATED, Json(CreatedResponse { id: template.id })))
}

#[derive(Deserialize)]
pub struct TemplateIdQuery {
    pub id: Uuid,
}

pub async fn get_template_by_query(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<TemplateIdQuery>,
) -> AppResult<Json<TemplateResponse>> {
    let mut conn = state.db()?;
    let template = find_template(&mut conn, user.organization_id, query.id)?;
    Ok(Json(template.into()))
}

pub async fn get_template(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<TemplateResponse>> {
    let mut conn = state.db()?;
    let template = find_template(&mut conn, user.organization_id, id)?;
    Ok(Json(template.into()))
}

#[derive(Serialize)]
pub struct Creator {
    pub first_name: String,
    pub last_name: String,
}

#[derive(Serialize)]
pub struct TemplateSummary {
    pub id: Uuid,
    pub name: String,
    pub created_at: NaiveDateTime,
    pub creator: Creator,
}

pub async fn list_templates(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<TemplateSummary>>> {
    let mut conn = state.db()?;
    let rows: Vec<(Uuid, String, NaiveDateTime, String, String)> = templates::table
        .inner_join(users::table)
        .filter(users::organization_id.eq(user.organization_id))
        .order(templates::created_at.desc())
        .select((
            templates::id,
            templates::name,
            templates::created_at,
            users::first_name,
            users::last_name,
        ))
        .load(&mut conn)?;

    Ok(Json(
        rows.into_iter()
            .map(|(id, name, created_at, first_name, last_name)| TemplateSummary {
                id,
                name,
                created_at,
                creator: Creator {
                    first_name,
                    last_name,
                },
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
pub struct UpdateTemplateRequest {
    pub id: Uuid,
    pub name: String,
    pub content: String,
}

pub async fn update_template(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateTemplateRequest>,
) -> AppResult<Json<MessageResponse>> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name is required"));
    }

    let mut conn = state.db()?;
    let template = find_template(&mut conn, user.organization_id, payload.id)?;
    diesel::update(templates::table.find(template.id))
        .set((
            templates::name.eq(name),
            templates::content.eq(&payload.content),
        ))
        .execute(&mut conn)?;
    Ok(Json(MessageResponse::new("template updated")))
}

pub async fn delete_template(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<TemplateIdQuery>,
) -> AppResult<Json<MessageResponse>> {
    let mut conn = state.db()?;
    let template = find_template(&mut conn, user.organization_id, query.id)?;
    diesel::delete(templates::table.find(template.id)).execute(&mut conn)?;

    tracing::info!(template_id = %template.id, user_id = %user.user_id, "deleted template");
    Ok(Json(MessageResponse::new("template deleted")))
}

#[derive(Deserialize)]
pub struct RenameTemplateRequest {
    pub id: Uuid,
    pub name: String,
}

pub async fn rename_template(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<RenameTemplateRequest>,
) -> AppResult<Json<MessageResponse>> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }

    let mut conn = state.db()?;
    let template = find_template(&mut conn, user.organization_id, payload.id)?;
    diesel::update(templates::table.find(template.id))
        .set(templates::name.eq(name))
        .execute(&mut conn)?;
    Ok(Json(MessageResponse::new("template renamed")))
}

#[derive(Deserialize)]
pub struct UpdateContentRequest {
    pub id: Uuid,
    pub content: String,
}

pub async fn update_template_content(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<UpdateContentRequest>,
) -> AppResult<Json<MessageResponse>> {
    let mut conn = state.db()?;
    let template = find_template(&mut conn, user.organization_id, payload.id)?;
    diesel::update(templates::table.find(template.id))
        .set(templates::content.eq(&payload.content))
        .execute(&mut conn)?;

    tracing::debug!(template_id = %template.id, bytes = payload.content.len(), "updated template content");
    Ok(Json(MessageResponse::new("template content updated")))
}

#[derive(Deserialize)]
pub struct CreateStyleRequest {
    pub template_id: Uuid,
    #[serde(default)]
    pub selector: String,
    #[serde(default)]
    pub styles: Map<String, Value>,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Serialize)]
pub struct StyleCreatedResponse {
    pub message: String,
    pub selector: String,
}

/// Stores a style rule unless an equal property map already exists for the
/// same template and scope, in which case that rule's selector is returned.
pub async fn create_style(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<CreateStyleRequest>,
) -> AppResult<(StatusCode, Json<StyleCreatedResponse>)> {
    if payload.styles.is_empty() {
        return Err(AppError::bad_request("styles must not be empty"));
    }
    let selector = payload.selector.trim();
    if selector.is_empty() {
        return Err(AppError::bad_request("selector is required"));
    }
    let scope = styles::validate_scope(payload.scope.as_deref())
        .ok_or_else(|| AppError::bad_request("scope must be \"global\" or \"inline\""))?;
    let normalized = Value::Object(styles::normalize_style_keys(&payload.styles));

    let mut conn = state.db()?;
    let template = find_template(&mut conn, user.organization_id, payload.template_id)?;

    let existing: Option<String> = template_styles::table
        .filter(template_styles::template_id.eq(template.id))
        .filter(template_styles::scope.eq(scope))
        .filter(template_styles::styles.eq(&normalized))
        .select(template_styles::selector)
        .first(&mut conn)
        .optional()?;

    if let Some(selector) = existing {
        return Ok((
            StatusCode::OK,
            Json(StyleCreatedResponse {
                message: "style already exists".to_string(),
                selector,
            }),
        ));
    }

    diesel::insert_into(template_styles::table)
        .values(&NewTemplateStyle {
            id: Uuid::new_v4(),
            template_id: template.id,
            selector: selector.to_string(),
            styles: normalized,
            scope: scope.to_string(),
        })
        .on_conflict((
            template_styles::template_id,
            template_styles::selector,
            template_styles::scope,
        ))
        .do_update()
        .set(template_styles::styles.eq(excluded(template_styles::styles)))
        .execute(&mut conn)?;

    Ok((
        StatusCode::CREATED,
        Json(StyleCreatedResponse {
            message: "style created".to_string(),
            selector: selector.to_string(),
        }),
    ))
}

#[derive(Serialize)]
pub struct StyleResponse {
    pub id: Uuid,
    pub template_id: Uuid,
    pub selector: String,
    pub styles: Value,
    pub scope: String,
    pub created_at: NaiveDateTime,
}

impl From<TemplateStyle> for StyleResponse {
    fn from(style: TemplateStyle) -> Self {
        Self {
            id: style.id,
            template_id: style.template_id,
            selector: style.selector,
            styles: style.styles,
            scope: style.scope,
            created_at: style.created_at,
        }
    }
}

pub async fn list_styles(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Vec<StyleResponse>>> {
    let mut conn = state.db()?;
    let template = find_template(&mut conn, user.organization_id, id)?;
    let rows: Vec<TemplateStyle> = template_styles::table
        .filter(template_styles::template_id.eq(template.id))
        .order(template_styles::created_at.asc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(StyleResponse::from).collect()))
}
