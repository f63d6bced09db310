//! Registration, login and token refresh.
//!
//! Lobby logins are signed with the platform key and carry no refresh
//! token; re-login is the only way to extend a lobby session. Tenant
//! logins are signed with the tenant's own secret and come with a DB-backed
//! rotating refresh token.

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};

use ledgerline_core::auth::{Claims, TokenService};
use ledgerline_core::error::CoreError;

use crate::api::error::ApiResult;
use crate::api::routes::AuthState;
use crate::db::executor::map_db_error;
use crate::db::refresh_token::RefreshTokenRepository;
use crate::db::session::DbPool;
use crate::db::user::{NewUser, User, UserRepository};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(rename = "fullName", default)]
    pub full_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
struct UserBody {
    id: String,
    email: String,
    #[serde(rename = "tenantId")]
    tenant_id: Option<String>,
    role: String,
}

impl From<&User> for UserBody {
    fn from(user: &User) -> Self {
        Self {
            id: user.id.to_string(),
            email: user.email.clone(),
            tenant_id: user.tenant_id.map(|id| id.to_string()),
            role: user.role.clone(),
        }
    }
}

/// `POST /auth/register` — create a lobby user.
pub async fn register(
    pool: web::Data<DbPool>,
    body: web::Json<RegisterRequest>,
) -> ApiResult<HttpResponse> {
    let mut problems = Vec::new();
    if !body.email.contains('@') {
        problems.push("email must be a valid address".to_string());
    }
    if body.password.len() < 8 {
        problems.push("password must be at least 8 characters".to_string());
    }
    if !problems.is_empty() {
        return Err(CoreError::validation(problems).into());
    }

    let mut conn = checkout(&pool)?;
    let user = UserRepository::new(&mut conn)
        .create(NewUser::lobby(
            body.email.trim().to_lowercase(),
            body.full_name.trim().to_string(),
            &body.password,
        ))
        .map_err(map_db_error)?;

    log::info!("registered lobby user {}", user.id);
    Ok(HttpResponse::Created().json(serde_json::json!({
        "id": user.id,
        "email": user.email,
        "tenantId": serde_json::Value::Null,
    })))
}

/// `POST /auth/login` — verify credentials and issue tokens.
pub async fn login(
    pool: web::Data<DbPool>,
    auth: web::Data<AuthState>,
    body: web::Json<LoginRequest>,
) -> ApiResult<HttpResponse> {
    let mut conn = checkout(&pool)?;
    let user = UserRepository::new(&mut conn)
        .validate_credentials(&body.email.trim().to_lowercase(), &body.password)
        .map_err(map_db_error)?
        .ok_or_else(|| CoreError::unauthorized("invalid email or password"))?;

    let role = user.parsed_role()?;

    match user.tenant_id {
        None => {
            // Lobby session: platform-signed, no refresh token
            let claims = Claims::access(user.id, user.email.clone(), role, None, "public");
            let token =
                TokenService::new(auth.platform_secret.as_bytes().to_vec())?.sign(&claims)?;

            Ok(HttpResponse::Ok().json(serde_json::json!({
                "access_token": token,
                "user": UserBody::from(&user),
            })))
        }
        Some(tenant_id) => {
            let tenant = auth
                .registry
                .find_by_id(tenant_id)?
                .ok_or_else(|| CoreError::forbidden("unknown tenant"))?;
            if !tenant.is_active() {
                return Err(CoreError::forbidden(format!("tenant is {}", tenant.status)).into());
            }

            let secret = auth.envelope.unwrap(&tenant.tenant_secret)?;
            let claims = Claims::access(
                user.id,
                user.email.clone(),
                role,
                Some(tenant_id),
                tenant.schema_name.clone(),
            );
            let access_token = TokenService::new(secret)?.sign(&claims)?;
            let refresh_token = RefreshTokenRepository::new(&mut conn).issue(user.id)?;

            Ok(HttpResponse::Ok().json(serde_json::json!({
                "access_token": access_token,
                "refresh_token": refresh_token,
                "user": UserBody::from(&user),
            })))
        }
    }
}

/// `POST /auth/refresh` — rotate a tenant refresh token.
///
/// Lobby sessions have nothing to rotate; a refresh attempt for a user with
/// no tenant binding is a 401.
pub async fn refresh(
    pool: web::Data<DbPool>,
    auth: web::Data<AuthState>,
    body: web::Json<RefreshRequest>,
) -> ApiResult<HttpResponse> {
    let mut conn = checkout(&pool)?;

    let user_id = RefreshTokenRepository::new(&mut conn).consume(&body.refresh_token)?;
    let user = UserRepository::new(&mut conn)
        .find_by_id(user_id)
        .map_err(map_db_error)?
        .ok_or_else(|| CoreError::unauthorized("credential subject no longer exists"))?;

    let tenant_id = user
        .tenant_id
        .ok_or_else(|| CoreError::unauthorized("refresh is not supported for lobby sessions"))?;

    let tenant = auth
        .registry
        .find_by_id(tenant_id)?
        .ok_or_else(|| CoreError::forbidden("unknown tenant"))?;
    if !tenant.is_active() {
        return Err(CoreError::forbidden(format!("tenant is {}", tenant.status)).into());
    }

    let secret = auth.envelope.unwrap(&tenant.tenant_secret)?;
    let claims = Claims::access(
        user.id,
        user.email.clone(),
        user.parsed_role()?,
        Some(tenant_id),
        tenant.schema_name.clone(),
    );
    let access_token = TokenService::new(secret)?.sign(&claims)?;
    let refresh_token = RefreshTokenRepository::new(&mut conn).issue(user.id)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
    })))
}

fn checkout(
    pool: &DbPool,
) -> Result<
    diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<diesel::PgConnection>>,
    CoreError,
> {
    pool.get()
        .map_err(|e| CoreError::unavailable(format!("connection checkout failed: {}", e)))
}
