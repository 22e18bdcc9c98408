use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::PgConnection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{AuthenticatedUser, Privilege},
    error::{is_foreign_key_violation, is_unique_violation, AppError, AppResult},
    models::{NewRole, Organization, Role, User},
    routes::MessageResponse,
    schema::{documents, organizations, roles, templates, users},
    state::AppState,
};

pub const OWNER_ROLE: &str = "Owner";
pub const MEMBER_ROLE: &str = "Member";
const BUILTIN_ROLES: [&str; 3] = [OWNER_ROLE, "Administrator", MEMBER_ROLE];

/// Resolves a built-in role or one of the organization's own roles. Unknown
/// names become a new role of that organization with member privilege.
pub fn get_or_create_role(
    conn: &mut PgConnection,
    organization_id: Uuid,
    name: &str,
) -> QueryResult<Role> {
    let existing = roles::table
        .filter(roles::name.eq(name))
        .filter(
            roles::organization_id
                .is_null()
                .or(roles::organization_id.eq(organization_id)),
        )
        .first(conn)
        .optional()?;
    if let Some(role) = existing {
        return Ok(role);
    }

    diesel::insert_into(roles::table)
        .values(&NewRole {
            id: Uuid::new_v4(),
            organization_id: Some(organization_id),
            name: name.to_string(),
            privilege: Privilege::Member.as_str().to_string(),
        })
        .on_conflict((roles::organization_id, roles::name))
        .do_nothing()
        .execute(conn)?;
    roles::table
        .filter(roles::organization_id.eq(organization_id))
        .filter(roles::name.eq(name))
        .first(conn)
}

/// Serializes role changes within one organization for the rest of the
/// surrounding transaction.
pub fn lock_organization(conn: &mut PgConnection, organization_id: Uuid) -> AppResult<Organization> {
    organizations::table
        .find(organization_id)
        .for_update()
        .first(conn)
        .map_err(AppError::from)
}

/// An organization has at most one holder of an owner-privileged role. Must
/// run after `lock_organization` in the same transaction.
pub fn ensure_owner_slot(
    conn: &mut PgConnection,
    organization_id: Uuid,
    targets: &[Uuid],
) -> AppResult<()> {
    if targets.len() > 1 {
        return Err(AppError::conflict("only one user can hold the owner role"));
    }
    let holders: Vec<Uuid> = users::table
        .inner_join(roles::table)
        .filter(users::organization_id.eq(organization_id))
        .filter(roles::privilege.eq(Privilege::Owner.as_str()))
        .select(users::id)
        .load(conn)?;
    if holders.iter().any(|holder| !targets.contains(holder)) {
        return Err(AppError::conflict(
            "the owner role is already assigned to another user",
        ));
    }
    Ok(())
}

#[derive(Serialize)]
pub struct MemberResponse {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub email_verified: bool,
    pub is_owner: bool,
    pub is_blocked: bool,
    pub role: Option<String>,
}

pub async fn list_members(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<MemberResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<(User, Option<Role>)> = users::table
        .left_join(roles::table)
        .filter(users::organization_id.eq(user.organization_id))
        .order(users::created_at.asc())
        .select((users::all_columns, roles::all_columns.nullable()))
        .load(&mut conn)?;

    let members = rows
        .into_iter()
        .map(|(member, role)| MemberResponse {
            id: member.id,
            first_name: member.first_name,
            last_name: member.last_name,
            email: member.email,
            email_verified: member.email_verified,
            is_owner: member.is_owner,
            is_blocked: member.is_blocked,
            role: role.map(|role| role.name),
        })
        .collect();
    Ok(Json(members))
}

#[derive(Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub position: Option<String>,
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<UserSummary>>> {
    let mut conn = state.db()?;
    let rows: Vec<(User, Option<String>)> = users::table
        .left_join(roles::table)
        .filter(users::organization_id.eq(user.organization_id))
        .order((users::last_name.asc(), users::first_name.asc()))
        .select((users::all_columns, roles::name.nullable()))
        .load(&mut conn)?;

    Ok(Json(
        rows.into_iter()
            .map(|(member, position)| UserSummary {
                id: member.id,
                name: member.full_name(),
                position,
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
pub struct AssignRoleRequest {
    pub user_ids: Vec<Uuid>,
    pub role: String,
}

pub async fn assign_role(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Json(payload): Json<AssignRoleRequest>,
) -> AppResult<Json<MessageResponse>> {
    admin.require_user_admin()?;

    let role_name = payload.role.trim();
    let mut user_ids = payload.user_ids;
    user_ids.sort_unstable();
    user_ids.dedup();
    if role_name.is_empty() || user_ids.is_empty() {
        return Err(AppError::bad_request("role and user_ids are required"));
    }

    let mut conn = state.db()?;
    let role = conn.transaction::<_, AppError, _>(|conn| {
        lock_organization(conn, admin.organization_id)?;
        let role = get_or_create_role(conn, admin.organization_id, role_name)?;

        let members: i64 = users::table
            .filter(users::id.eq_any(&user_ids))
            .filter(users::organization_id.eq(admin.organization_id))
            .count()
            .get_result(conn)?;
        if members as usize != user_ids.len() {
            return Err(AppError::not_found());
        }

        if role.privilege == Privilege::Owner.as_str() {
            ensure_owner_slot(conn, admin.organization_id, &user_ids)?;
        }

        diesel::update(users::table.filter(users::id.eq_any(&user_ids)))
            .set((
                users::role_id.eq(role.id),
                users::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;
        Ok(role)
    })?;

    tracing::info!(
        admin_id = %admin.user_id,
        role = %role.name,
        users = user_ids.len(),
        "assigned role"
    );
    Ok(Json(MessageResponse::new("role assigned")))
}

pub async fn block_user(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    set_blocked(&state, &admin, id, true)?;
    Ok(Json(MessageResponse::new("user blocked")))
}

pub async fn unblock_user(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    set_blocked(&state, &admin, id, false)?;
    Ok(Json(MessageResponse::new("user unblocked")))
}

fn set_blocked(
    state: &AppState,
    admin: &AuthenticatedUser,
    target_id: Uuid,
    blocked: bool,
) -> AppResult<()> {
    admin.require_user_admin()?;
    if target_id == admin.user_id {
        return Err(AppError::bad_request("you cannot block yourself"));
    }

    let mut conn = state.db()?;
    let target = find_member(&mut conn, admin.organization_id, target_id)?;
    if blocked && target.is_owner {
        return Err(AppError::forbidden("the organization founder cannot be blocked"));
    }

    diesel::update(users::table.find(target.id))
        .set((
            users::is_blocked.eq(blocked),
            users::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)?;
    tracing::info!(admin_id = %admin.user_id, user_id = %target.id, blocked, "changed block status");
    Ok(())
}

pub async fn delete_user(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<MessageResponse>> {
    admin.require_user_admin()?;
    if id == admin.user_id {
        return Err(AppError::bad_request("you cannot delete yourself"));
    }

    let mut conn = state.db()?;
    let target = find_member(&mut conn, admin.organization_id, id)?;
    if target.is_owner {
        return Err(AppError::forbidden("the organization founder cannot be deleted"));
    }

    let owns_templates: bool =
        diesel::select(exists(templates::table.filter(templates::user_id.eq(target.id))))
            .get_result(&mut conn)?;
    let owns_documents: bool =
        diesel::select(exists(documents::table.filter(documents::user_id.eq(target.id))))
            .get_result(&mut conn)?;
    if owns_templates || owns_documents {
        return Err(AppError::conflict("user still owns templates or documents"));
    }

    diesel::delete(users::table.find(target.id))
        .execute(&mut conn)
        .map_err(|err| {
            if is_foreign_key_violation(&err) {
                AppError::conflict("user still owns templates or documents")
            } else {
                AppError::from(err)
            }
        })?;

    tracing::info!(admin_id = %admin.user_id, user_id = %target.id, "deleted user");
    Ok(Json(MessageResponse::new("user deleted")))
}

fn find_member(conn: &mut PgConnection, organization_id: Uuid, id: Uuid) -> AppResult<User> {
    users::table
        .filter(users::id.eq(id))
        .filter(users::organization_id.eq(organization_id))
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)
}

#[derive(Serialize)]
pub struct RoleResponse {
    pub id: Uuid,
    pub name: String,
    pub privilege: String,
}

impl From<Role> for RoleResponse {
    fn from(role: Role) -> Self {
        Self {
            id: role.id,
            name: role.name,
            privilege: role.privilege,
        }
    }
}

/// Built-in roles plus the caller's organization roles.
pub async fn list_roles(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<RoleResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<Role> = roles::table
        .filter(
            roles::organization_id
                .is_null()
                .or(roles::organization_id.eq(user.organization_id)),
        )
        .order(roles::name.asc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(RoleResponse::from).collect()))
}

#[derive(Deserialize)]
pub struct RenameRoleRequest {
    pub old_name: String,
    pub new_name: String,
}

pub async fn rename_role(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Json(payload): Json<RenameRoleRequest>,
) -> AppResult<Json<MessageResponse>> {
    admin.require_user_admin()?;
    let new_name = payload.new_name.trim();
    if new_name.is_empty() {
        return Err(AppError::bad_request("new_name is required"));
    }
    if BUILTIN_ROLES.contains(&payload.old_name.as_str()) {
        return Err(AppError::bad_request("built-in roles cannot be renamed"));
    }
    if BUILTIN_ROLES.contains(&new_name) {
        return Err(AppError::conflict("a role with this name already exists"));
    }

    let mut conn = state.db()?;
    let role = find_role(&mut conn, admin.organization_id, &payload.old_name)?;
    diesel::update(roles::table.find(role.id))
        .set(roles::name.eq(new_name))
        .execute(&mut conn)
        .map_err(|err| {
            if is_unique_violation(&err) {
                AppError::conflict("a role with this name already exists")
            } else {
                AppError::from(err)
            }
        })?;

    tracing::info!(
        organization_id = %admin.organization_id,
        old = %role.name,
        new = %new_name,
        "renamed role"
    );
    Ok(Json(MessageResponse::new("role renamed")))
}

#[derive(Deserialize)]
pub struct DeleteRoleRequest {
    pub name: String,
}

pub async fn delete_role(
    State(state): State<AppState>,
    admin: AuthenticatedUser,
    Json(payload): Json<DeleteRoleRequest>,
) -> AppResult<Json<MessageResponse>> {
    admin.require_user_admin()?;
    if BUILTIN_ROLES.contains(&payload.name.as_str()) {
        return Err(AppError::bad_request("built-in roles cannot be deleted"));
    }

    let mut conn = state.db()?;
    conn.transaction::<_, AppError, _>(|conn| {
        let role: Role = roles::table
            .filter(roles::organization_id.eq(admin.organization_id))
            .filter(roles::name.eq(&payload.name))
            .for_update()
            .first(conn)
            .optional()?
            .ok_or_else(AppError::not_found)?;

        let holders: i64 = users::table
            .filter(users::role_id.eq(role.id))
            .count()
            .get_result(conn)?;
        if holders > 0 {
            return Err(AppError::conflict("role is still assigned to users"));
        }

        diesel::delete(roles::table.find(role.id)).execute(conn)?;
        Ok(())
    })?;

    tracing::info!(organization_id = %admin.organization_id, role = %payload.name, "deleted role");
    Ok(Json(MessageResponse::new("role deleted")))
}

/// Custom roles of one organization; built-ins are never returned.
fn find_role(conn: &mut PgConnection, organization_id: Uuid, name: &str) -> AppResult<Role> {
    roles::table
        .filter(roles::organization_id.eq(organization_id))
        .filter(roles::name.eq(name))
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)
}
