use axum::{
    extract::{Query, State},
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use diesel::dsl::exists;
use diesel::prelude::*;
use diesel::PgConnection;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{password, AuthenticatedUser, Privilege},
    email,
    error::{is_unique_violation, AppError, AppResult},
    models::{NewOrganization, NewSession, NewUser, User},
    routes::{
        users::{ensure_owner_slot, get_or_create_role, lock_organization, MEMBER_ROLE, OWNER_ROLE},
        MessageResponse,
    },
    schema::{organizations, sessions, users},
    state::AppState,
};

const REFRESH_COOKIE_NAME: &str = "refresh_token";
const VERIFICATION_TOKEN_HOURS: i64 = 24;

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<TokenResponse>)> {
    let email = normalize_email(&payload.email);
    let mut conn = state.db()?;

    let user: User = users::table
        .filter(users::email.eq(&email))
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::new(StatusCode::UNAUTHORIZED, "invalid email or password"))?;

    if !user.email_verified {
        return Err(AppError::new(
            StatusCode::UNAUTHORIZED,
            "email address is not verified",
        ));
    }
    if user.password_hash.is_empty() {
        return Err(AppError::new(
            StatusCode::UNAUTHORIZED,
            "password has not been set, follow the invitation link",
        ));
    }

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        tracing::info!(user_id = %user.id, "failed login attempt");
        return Err(AppError::new(
            StatusCode::UNAUTHORIZED,
            "invalid email or password",
        ));
    }
    if user.is_blocked {
        return Err(AppError::forbidden("account is blocked"));
    }

    let (headers, body) = start_session(&state, &mut conn, user.id, None)?;
    tracing::info!(user_id = %user.id, "user logged in");
    Ok((headers, body))
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    pub password: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    let email = normalize_email(&payload.email);
    if !email.contains('@') {
        return Err(AppError::bad_request("a valid email is required"));
    }
    if payload.password.is_empty() {
        return Err(AppError::bad_request("password is required"));
    }

    let password_hash = password::hash_password(&payload.password)?;
    let token = generate_verification_token();
    let expires_at = Utc::now() + Duration::hours(VERIFICATION_TOKEN_HOURS);

    let user_id = {
        let mut conn = state.db()?;
        conn.transaction::<_, AppError, _>(|conn| {
            ensure_email_free(conn, &email)?;

            let organization = NewOrganization {
                id: Uuid::new_v4(),
                name: organization_name(&payload.first_name, &payload.last_name, &email),
            };
            diesel::insert_into(organizations::table)
                .values(&organization)
                .execute(conn)?;

            // The founder always starts as owner; any requested role is ignored.
            let role = get_or_create_role(conn, organization.id, OWNER_ROLE)?;

            let user = NewUser {
                id: Uuid::new_v4(),
                email: email.clone(),
                password_hash,
                first_name: payload.first_name.trim().to_string(),
                last_name: payload.last_name.trim().to_string(),
                organization_id: organization.id,
                role_id: Some(role.id),
                is_owner: true,
                email_verified: false,
                verification_token: Some(token.clone()),
                verification_token_expires: Some(expires_at.naive_utc()),
            };
            insert_user(conn, &user)?;
            Ok(user.id)
        })?
    };

    state
        .mailer
        .send(email::verification_email(
            &email,
            &state.config.frontend_url,
            &token,
        ))
        .await
        .map_err(AppError::internal)?;

    tracing::info!(%user_id, "registered user, verification email sent");
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse::new("verification email sent")),
    ))
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    pub token: String,
}

pub async fn verify(
    State(state): State<AppState>,
    Json(payload): Json<VerifyRequest>,
) -> AppResult<Json<MessageResponse>> {
    confirm_email(&state, &payload.token)
}

pub async fn verify_link(
    State(state): State<AppState>,
    Query(params): Query<VerifyRequest>,
) -> AppResult<Json<MessageResponse>> {
    confirm_email(&state, &params.token)
}

/// Single-use: the token is cleared in the same statement that checks it.
/// Invitation tokens belong to users without a password and only work
/// through `set_password`.
fn confirm_email(state: &AppState, token: &str) -> AppResult<Json<MessageResponse>> {
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::bad_request("verification token is required"));
    }

    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let updated = diesel::update(
        users::table
            .filter(users::verification_token.eq(token))
            .filter(users::verification_token_expires.gt(now))
            .filter(users::password_hash.ne("")),
    )
    .set((
        users::email_verified.eq(true),
        users::verification_token.eq(None::<String>),
        users::verification_token_expires.eq(None::<NaiveDateTime>),
        users::updated_at.eq(now),
    ))
    .execute(&mut conn)?;

    if updated == 0 {
        return Err(AppError::bad_request("invalid or expired verification token"));
    }
    Ok(Json(MessageResponse::new("email verified")))
}

#[derive(Deserialize)]
pub struct SetPasswordRequest {
    pub token: String,
    pub password: String,
}

pub async fn set_password(
    State(state): State<AppState>,
    Json(payload): Json<SetPasswordRequest>,
) -> AppResult<(HeaderMap, Json<TokenResponse>)> {
    let token = payload.token.trim();
    if token.is_empty() {
        return Err(AppError::bad_request("invitation token is required"));
    }
    if payload.password.is_empty() {
        return Err(AppError::bad_request("password is required"));
    }

    let password_hash = password::hash_password(&payload.password)?;
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();

    let user_id: Uuid = diesel::update(
        users::table
            .filter(users::verification_token.eq(token))
            .filter(users::verification_token_expires.gt(now)),
    )
    .set((
        users::password_hash.eq(&password_hash),
        users::email_verified.eq(true),
        users::verification_token.eq(None::<String>),
        users::verification_token_expires.eq(None::<NaiveDateTime>),
        users::updated_at.eq(now),
    ))
    .returning(users::id)
    .get_result(&mut conn)
    .optional()?
    .ok_or_else(|| AppError::bad_request("invalid or expired invitation token"))?;

    tracing::info!(%user_id, "invited user set a password");
    start_session(&state, &mut conn, user_id, Some("password set"))
}

#[derive(Deserialize)]
pub struct InviteRequest {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    pub email: String,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Serialize)]
pub struct InviteResponse {
    pub message: String,
    pub user_id: Uuid,
}

pub async fn invite(
    State(state): State<AppState>,
    inviter: AuthenticatedUser,
    Json(payload): Json<InviteRequest>,
) -> AppResult<Json<InviteResponse>> {
    inviter.require_user_admin()?;

    let email = normalize_email(&payload.email);
    if !email.contains('@') {
        return Err(AppError::bad_request("a valid email is required"));
    }

    let token = generate_verification_token();
    let expires_at = Utc::now() + Duration::hours(VERIFICATION_TOKEN_HOURS);

    let user_id = {
        let mut conn = state.db()?;
        conn.transaction::<_, AppError, _>(|conn| {
            lock_organization(conn, inviter.organization_id)?;
            ensure_email_free(conn, &email)?;

            let role_name = payload
                .role
                .as_deref()
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .unwrap_or(MEMBER_ROLE);
            let role = get_or_create_role(conn, inviter.organization_id, role_name)?;

            let user = NewUser {
                id: Uuid::new_v4(),
                email: email.clone(),
                password_hash: String::new(),
                first_name: payload.first_name.trim().to_string(),
                last_name: payload.last_name.trim().to_string(),
                organization_id: inviter.organization_id,
                role_id: Some(role.id),
                is_owner: false,
                email_verified: false,
                verification_token: Some(token.clone()),
                verification_token_expires: Some(expires_at.naive_utc()),
            };
            if role.privilege == Privilege::Owner.as_str() {
                ensure_owner_slot(conn, inviter.organization_id, &[user.id])?;
            }
            insert_user(conn, &user)?;
            Ok(user.id)
        })?
    };

    let inviter_name = format!("{} {}", inviter.first_name, inviter.last_name);
    let inviter_name = match inviter_name.trim() {
        "" => inviter.email.as_str(),
        name => name,
    };
    state
        .mailer
        .send(email::invitation_email(
            &email,
            inviter_name,
            &state.config.frontend_url,
            &token,
        ))
        .await
        .map_err(AppError::internal)?;

    tracing::info!(inviter_id = %inviter.user_id, %user_id, "invitation sent");
    Ok(Json(InviteResponse {
        message: "invitation sent".to_string(),
        user_id,
    }))
}

pub async fn refresh(
    State(state): State<AppState>,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, Json<TokenResponse>)> {
    let cookies = jar.ok_or_else(AppError::unauthorized)?;
    let refresh_value = cookies
        .get(REFRESH_COOKIE_NAME)
        .ok_or_else(AppError::unauthorized)?;

    let claims = state
        .tokens
        .verify_refresh(refresh_value)
        .map_err(|_| AppError::unauthorized())?;

    let mut conn = state.db()?;
    let user: User = users::table
        .find(claims.user_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;
    if user.is_blocked {
        return Err(AppError::forbidden("account is blocked"));
    }

    start_session(&state, &mut conn, user.id, None)
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<(HeaderMap, Json<MessageResponse>)> {
    let mut conn = state.db()?;
    diesel::update(sessions::table.filter(sessions::jwt_token.eq(&user.token)))
        .set(sessions::revoked.eq(true))
        .execute(&mut conn)?;

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, build_clear_refresh_cookie(&state)?);
    tracing::info!(user_id = %user.user_id, "user logged out");
    Ok((headers, Json(MessageResponse::new("logged out"))))
}

pub async fn me(user: AuthenticatedUser) -> Json<AuthenticatedUser> {
    Json(user)
}

#[derive(Serialize)]
pub struct AuthCheckResponse {
    pub status: &'static str,
    pub user: AuthCheckUser,
}

#[derive(Serialize)]
pub struct AuthCheckUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
}

pub async fn check(user: AuthenticatedUser) -> Json<AuthCheckResponse> {
    let username = format!("{} {}", user.first_name, user.last_name)
        .trim()
        .to_string();
    Json(AuthCheckResponse {
        status: "authorized",
        user: AuthCheckUser {
            id: user.user_id,
            username,
            email: user.email,
        },
    })
}

/// Issues a token pair, records the access token as a session and sets the
/// refresh cookie.
fn start_session(
    state: &AppState,
    conn: &mut PgConnection,
    user_id: Uuid,
    message: Option<&str>,
) -> AppResult<(HeaderMap, Json<TokenResponse>)> {
    let pair = state
        .tokens
        .issue_pair(user_id)
        .map_err(AppError::internal)?;

    diesel::insert_into(sessions::table)
        .values(&NewSession {
            id: Uuid::new_v4(),
            user_id,
            jwt_token: pair.access.token.clone(),
            expires_at: pair.access.expires_at.naive_utc(),
        })
        .execute(conn)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        build_refresh_cookie(state, &pair.refresh.token, pair.refresh.expires_at)?,
    );

    Ok((
        headers,
        Json(TokenResponse {
            access_token: pair.access.token,
            token_type: "Bearer".to_string(),
            expires_in: state.tokens.access_expiry().num_seconds(),
            user_id,
            message: message.map(str::to_string),
        }),
    ))
}

fn ensure_email_free(conn: &mut PgConnection, email: &str) -> AppResult<()> {
    let taken: bool =
        diesel::select(exists(users::table.filter(users::email.eq(email)))).get_result(conn)?;
    if taken {
        return Err(AppError::conflict("a user with this email already exists"));
    }
    Ok(())
}

fn insert_user(conn: &mut PgConnection, user: &NewUser) -> AppResult<()> {
    diesel::insert_into(users::table)
        .values(user)
        .execute(conn)
        .map_err(|err| {
            if is_unique_violation(&err) {
                AppError::conflict("a user with this email already exists")
            } else {
                AppError::from(err)
            }
        })?;
    Ok(())
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn organization_name(first_name: &str, last_name: &str, email: &str) -> String {
    let name = format!("{} {}", first_name.trim(), last_name.trim());
    match name.trim() {
        "" => email.to_string(),
        name => name.to_string(),
    }
}

fn generate_verification_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn build_refresh_cookie(
    state: &AppState,
    token: &str,
    expires_at: DateTime<Utc>,
) -> AppResult<HeaderValue> {
    let max_age = state.tokens.refresh_expiry().num_seconds();

    let mut parts = vec![format!("{}={}", REFRESH_COOKIE_NAME, token)];
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Strict".into());
    parts.push(format!("Max-Age={}", max_age));
    parts.push(format!("Expires={}", expires_at.format("%a, %d %b %Y %H:%M:%S GMT")));
    push_cookie_scope(state, &mut parts);

    HeaderValue::from_str(&parts.join("; ")).map_err(AppError::internal)
}

fn build_clear_refresh_cookie(state: &AppState) -> AppResult<HeaderValue> {
    let mut parts = vec![format!("{}=", REFRESH_COOKIE_NAME)];
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Strict".into());
    parts.push("Max-Age=0".into());
    parts.push("Expires=Thu, 01 Jan 1970 00:00:00 GMT".into());
    push_cookie_scope(state, &mut parts);

    HeaderValue::from_str(&parts.join("; ")).map_err(AppError::internal)
}

fn push_cookie_scope(state: &AppState, parts: &mut Vec<String>) {
    if state.config.refresh_cookie_secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = &state.config.refresh_cookie_domain {
        parts.push(format!("Domain={}", domain));
    }
}
