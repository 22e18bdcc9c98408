use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{is_unique_violation, AppError, AppResult},
    models::{NewTag, Tag},
    schema::tags,
    state::AppState,
};

#[derive(Deserialize)]
pub struct TagPayload {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default = "default_tag_type")]
    pub tag_type: String,
}

fn default_tag_type() -> String {
    "text".to_string()
}

#[derive(Serialize)]
pub struct TagResponse {
    pub id: Uuid,
    pub name: String,
    pub label: String,
    pub description: String,
    #[serde(rename = "type")]
    pub tag_type: String,
    pub style_id: Option<Uuid>,
    pub created_at: NaiveDateTime,
}

impl From<Tag> for TagResponse {
    fn from(tag: Tag) -> Self {
        Self {
            id: tag.id,
            name: tag.name,
            label: tag.label,
            description: tag.description,
            tag_type: tag.tag_type,
            style_id: tag.style_id,
            created_at: tag.created_at,
        }
    }
}

pub async fn list_tags(State(state): State<AppState>) -> AppResult<Json<Vec<TagResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<Tag> = tags::table.order(tags::name.asc()).load(&mut conn)?;
    Ok(Json(rows.into_iter().map(TagResponse::from).collect()))
}

pub async fn create_tag(
    State(state): State<AppState>,
    Json(payload): Json<TagPayload>,
) -> AppResult<(StatusCode, Json<TagResponse>)> {
    let name = validate_name(&payload.name)?;
    let mut conn = state.db()?;

    let tag: Tag = diesel::insert_into(tags::table)
        .values(&NewTag {
            id: Uuid::new_v4(),
            name: name.to_string(),
            label: payload.label.trim().to_string(),
            description: payload.description,
            tag_type: payload.tag_type,
        })
        .get_result(&mut conn)
        .map_err(map_duplicate)?;

    Ok((StatusCode::CREATED, Json(tag.into())))
}

pub async fn update_tag(
    State(state): State<AppState>,
    Path(tag_id): Path<Uuid>,
    Json(payload): Json<TagPayload>,
) -> AppResult<Json<TagResponse>> {
    let name = validate_name(&payload.name)?;
    let mut conn = state.db()?;

    let tag: Tag = diesel::update(tags::table.find(tag_id))
        .set((
            tags::name.eq(name),
            tags::label.eq(payload.label.trim()),
            tags::description.eq(&payload.description),
            tags::tag_type.eq(&payload.tag_type),
        ))
        .get_result(&mut conn)
        .map_err(map_duplicate)?;

    Ok(Json(tag.into()))
}

fn validate_name(name: &str) -> AppResult<&str> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request("tag name is required"));
    }
    if trimmed.contains("{{") || trimmed.contains("}}") {
        return Err(AppError::bad_request("tag name must not contain braces"));
    }
    Ok(trimmed)
}

fn map_duplicate(err: diesel::result::Error) -> AppError {
    if is_unique_violation(&err) {
        AppError::conflict("tag already exists")
    } else {
        AppError::from(err)
    }
}
