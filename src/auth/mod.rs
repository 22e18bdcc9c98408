pub mod jwt;
pub mod password;
pub mod privilege;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use chrono::Utc;
use diesel::prelude::*;
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::{AppError, AppResult},
    models::{Role, Session, User},
    schema::{roles, sessions, users},
    state::AppState,
};

pub use privilege::Privilege;

/// Identity resolved from a bearer token and its live session.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub organization_id: Uuid,
    pub role: Option<String>,
    pub privilege: Privilege,
    pub is_owner: bool,
    #[serde(skip)]
    pub token: String,
}

impl AuthenticatedUser {
    pub fn require_user_admin(&self) -> AppResult<()> {
        if self.privilege.can_manage_users() {
            Ok(())
        } else {
            Err(AppError::forbidden("insufficient privileges"))
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // The route layer already resolved this request.
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(user.clone());
        }

        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .tokens
            .verify_access(bearer.token())
            .map_err(|err| {
                tracing::debug!(error = %err, "rejected bearer token");
                AppError::unauthorized()
            })?;

        let mut conn = state.db()?;

        let session: Session = sessions::table
            .filter(sessions::jwt_token.eq(bearer.token()))
            .first(&mut conn)
            .optional()?
            .ok_or_else(AppError::unauthorized)?;
        if session.revoked
            || session.expires_at <= Utc::now().naive_utc()
            || session.user_id != claims.user_id
        {
            return Err(AppError::unauthorized());
        }

        let (user, role): (User, Option<Role>) = users::table
            .left_join(roles::table)
            .filter(users::id.eq(claims.user_id))
            .select((users::all_columns, roles::all_columns.nullable()))
            .first(&mut conn)
            .optional()?
            .ok_or_else(AppError::unauthorized)?;

        if user.is_blocked {
            tracing::info!(user_id = %user.id, "blocked user attempted access");
            return Err(AppError::forbidden("account is blocked"));
        }

        let privilege = resolve_privilege(&user, role.as_ref());
        let authenticated = AuthenticatedUser {
            user_id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            organization_id: user.organization_id,
            role: role.map(|role| role.name),
            privilege,
            is_owner: user.is_owner,
            token: bearer.token().to_owned(),
        };
        parts.extensions.insert(authenticated.clone());
        Ok(authenticated)
    }
}

/// Organization founders keep owner capability even before a role is assigned.
pub fn resolve_privilege(user: &User, role: Option<&Role>) -> Privilege {
    let from_role = role
        .and_then(|role| role.privilege.parse::<Privilege>().ok())
        .unwrap_or(Privilege::Member);
    if user.is_owner {
        Privilege::Owner
    } else {
        from_role
    }
}
