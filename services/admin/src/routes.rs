//! Admin panel routes
//!
//! Three groups: public login/health, admin user and link management behind
//! [`admin_auth_middleware`], and the anonymous `/cert/:link_id` bearer flow.

use axum::{
    Form, Json, Router,
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use common::error::DatabaseError;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::AppState;
use crate::artifacts::ArtifactRef;
use crate::clock::Clock;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{
    ADMIN_COOKIE, admin_auth_middleware, bearer_session, session_cookie, session_from_jar,
};
use crate::models::{
    CertLinkSummary, LoginCredentials, NewUser, Platform, ProvisionStatus, UpdateDisplayName,
    VpnUser,
};
use crate::rate_limiter::{RateLimitDecision, RateLimiter};
use crate::session::SessionId;
use crate::validation::{validate_display_name, validate_username};
use crate::validator::{LinkStatus, PlatformPolicy};

/// Create the router for the admin service
pub fn create_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/:username", delete(delete_user))
        .route("/users/:username/provision", post(provision_user))
        .route("/users/:username/toggle", post(toggle_user))
        .route("/users/:username/display_name", put(update_display_name))
        .route("/users/:username/certs/:platform", get(download_user_cert))
        .route("/users/:username/links", get(list_links))
        .route("/users/:username/links/:platform", post(issue_link))
        .route("/links/:link_id", delete(revoke_link))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/cert/:link_id", get(show_link).post(redeem_link))
        .merge(admin)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = common::database::health_check(&state.db_pool)
        .await
        .unwrap_or(false);
    let sessions = state.session_store.health_check().await.unwrap_or(false);

    let status = if database && sessions {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "status": if status == StatusCode::OK { "ok" } else { "degraded" },
            "service": "vpn-admin",
            "database": database,
            "session_store": sessions,
        })),
    )
}

/// Admin login endpoint
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(payload): Json<LoginCredentials>,
) -> ApiResult<(CookieJar, Json<Value>)> {
    let key = format!("login:{}", payload.username);
    if let RateLimitDecision::Blocked { retry_after } =
        state.login_limiter.try_acquire(&key).await?
    {
        warn!(username = %payload.username, "Login attempt while banned");
        return Err(ApiError::TooManyRequests { retry_after });
    }

    if !state.admin.verify(&payload.username, &payload.password) {
        warn!(username = %payload.username, "Failed admin login");
        return Err(rejected_attempt(&state.login_limiter, &key, ApiError::Unauthorized).await?);
    }

    state.login_limiter.reset(&key).await?;
    let session = state.admin_sessions.create().await.map_err(|e| {
        error!("Failed to create admin session: {}", e);
        ApiError::InternalServerError
    })?;

    info!(username = %payload.username, "Admin logged in");
    let jar = jar.add(session_cookie(
        ADMIN_COOKIE,
        &session,
        state.config.secure_cookies,
    ));
    Ok((jar, Json(json!({ "success": true }))))
}

/// Logout endpoint
pub async fn logout(State(state): State<AppState>, jar: CookieJar) -> ApiResult<impl IntoResponse> {
    if let Some(session) = session_from_jar(&jar, ADMIN_COOKIE) {
        state.admin_sessions.destroy(&session).await.map_err(|e| {
            error!("Failed to destroy admin session: {}", e);
            ApiError::InternalServerError
        })?;
    }

    let jar = jar.remove(Cookie::build(ADMIN_COOKIE).path("/"));
    Ok((jar, Json(json!({ "success": true }))))
}

/// User listing entry
#[derive(Serialize)]
pub struct UserView {
    #[serde(flatten)]
    pub user: VpnUser,
    /// Platforms with an artifact on disk
    pub platforms: Vec<Platform>,
}

pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let users = state.user_repository.list().await?;

    let mut views = Vec::with_capacity(users.len());
    for user in users {
        let platforms = state.artifacts.available_platforms(&user.username).await;
        views.push(UserView { user, platforms });
    }

    Ok(Json(json!({ "users": views })))
}

fn require_valid_username(username: &str) -> ApiResult<()> {
    validate_username(username).map_err(ApiError::BadRequest)
}

async fn require_user(state: &AppState, username: &str) -> ApiResult<VpnUser> {
    state
        .user_repository
        .find(username)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", username)))
}

/// Run the provisioning tool and record the outcome on the user row
async fn provision_and_record(state: &AppState, username: &str) -> ApiResult<Vec<Platform>> {
    match state.provisioner.provision(username).await {
        Ok(platforms) => {
            state
                .user_repository
                .set_provision_status(username, ProvisionStatus::Ready)
                .await?;
            Ok(platforms)
        }
        Err(e) => {
            error!(username = %username, error = %e, "Provisioning failed");
            state
                .user_repository
                .set_provision_status(username, ProvisionStatus::Failed)
                .await?;
            Err(ApiError::Provisioning(e.to_string()))
        }
    }
}

/// Create a user: record it as pending, provision, record the outcome
pub async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<NewUser>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let username = payload.username.trim().to_string();
    require_valid_username(&username)?;

    state
        .user_repository
        .create_pending(&username, state.clock.now())
        .await
        .map_err(|e| match e {
            DatabaseError::Duplicate(_) => {
                ApiError::Conflict(format!("User {} already exists", username))
            }
            other => ApiError::Database(other),
        })?;

    let platforms = provision_and_record(&state, &username).await?;
    info!(username = %username, "User created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "username": username,
            "provision_status": ProvisionStatus::Ready,
            "platforms": platforms,
        })),
    ))
}

/// Retry provisioning for an existing user
pub async fn provision_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<Value>> {
    require_valid_username(&username)?;
    let user = require_user(&state, &username).await?;
    if user.provision_status == ProvisionStatus::Ready {
        return Err(ApiError::Conflict(format!(
            "User {} is already provisioned",
            username
        )));
    }

    let platforms = provision_and_record(&state, &username).await?;
    Ok(Json(json!({
        "success": true,
        "provision_status": ProvisionStatus::Ready,
        "platforms": platforms,
    })))
}

/// Revoke a user's credentials, then delete the user, its links and its
/// artifacts
pub async fn delete_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<Value>> {
    require_valid_username(&username)?;
    let user = require_user(&state, &username).await?;

    // A user whose provisioning failed has no credentials to revoke
    if user.provision_status != ProvisionStatus::Failed {
        state.provisioner.revoke(&username).await.map_err(|e| {
            error!(username = %username, error = %e, "Revocation failed, keeping user");
            ApiError::Provisioning(e.to_string())
        })?;
    }

    if let Err(e) = state.user_repository.delete(&username).await {
        // Credentials are gone; a retry must not revoke again
        if let Err(mark) = state
            .user_repository
            .set_provision_status(&username, ProvisionStatus::Failed)
            .await
        {
            warn!(username = %username, error = %mark, "Failed to mark revoked user");
        }
        return Err(e.into());
    }

    if let Err(e) = state.artifacts.remove_all(&username).await {
        warn!(username = %username, error = %e, "Failed to remove certificate artifacts");
    }

    info!(username = %username, "User deleted");
    Ok(Json(json!({ "success": true })))
}

pub async fn toggle_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<Value>> {
    let active = state
        .user_repository
        .toggle_active(&username)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", username)))?;

    info!(username = %username, active, "Toggled user status");
    Ok(Json(json!({ "success": true, "active": active })))
}

pub async fn update_display_name(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Json(payload): Json<UpdateDisplayName>,
) -> ApiResult<Json<Value>> {
    let display_name = payload
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());
    validate_display_name(display_name).map_err(ApiError::BadRequest)?;

    if !state
        .user_repository
        .update_display_name(&username, display_name)
        .await?
    {
        return Err(ApiError::NotFound(format!("User {} not found", username)));
    }

    info!(username = %username, "Updated display name");
    Ok(Json(json!({ "success": true })))
}

fn attachment(artifact: &ArtifactRef, bytes: Vec<u8>) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", artifact.file_name);
    (
        [
            (header::CONTENT_TYPE, artifact.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response()
}

/// Admin download of a user's artifact
pub async fn download_user_cert(
    State(state): State<AppState>,
    Path((username, platform)): Path<(String, String)>,
) -> ApiResult<Response> {
    require_valid_username(&username)?;
    require_user(&state, &username).await?;

    let artifact = state.artifacts.resolve_artifact(&username, &platform).await?;
    let bytes = state.artifacts.read(&artifact).await?;

    info!(username = %username, platform = %platform, "Admin downloaded certificate");
    Ok(attachment(&artifact, bytes))
}

/// Issue a new certificate link
pub async fn issue_link(
    State(state): State<AppState>,
    Path((username, platform)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let platform: Platform = platform
        .parse()
        .map_err(|e: crate::models::UnknownPlatform| {
            ApiError::BadRequest(format!("Invalid platform: {}", e.0))
        })?;
    require_user(&state, &username).await?;

    let issued = state.issuer.issue(&username, platform).await?;

    Ok(Json(json!({
        "success": true,
        "link": state.config.link_url(&issued.link_id),
        "link_id": issued.link_id,
        "password": issued.password,
        "expires_at": issued.expires_at,
    })))
}

pub async fn list_links(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<Value>> {
    require_user(&state, &username).await?;

    let now = state.clock.now();
    let links: Vec<CertLinkSummary> = state
        .link_repository
        .list_for_user(&username)
        .await?
        .iter()
        .map(|link| CertLinkSummary::from_link(link, now))
        .collect();

    Ok(Json(json!({ "links": links })))
}

/// Revoke a single link
pub async fn revoke_link(
    State(state): State<AppState>,
    Path(link_id): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.link_repository.delete(&link_id).await? {
        return Err(ApiError::NotFound("Link not found".to_string()));
    }

    info!(link_id = %link_id, "Revoked certificate link");
    Ok(Json(json!({ "success": true })))
}

/// Error for a failed attempt: 429 once that attempt used up the limit
async fn rejected_attempt(
    limiter: &RateLimiter,
    key: &str,
    otherwise: ApiError,
) -> ApiResult<ApiError> {
    Ok(match limiter.check(key).await? {
        RateLimitDecision::Blocked { retry_after } => ApiError::TooManyRequests { retry_after },
        RateLimitDecision::Allowed => otherwise,
    })
}

/// What the bearer may see for a link
async fn link_view(state: &AppState, session: &SessionId, link_id: &str) -> ApiResult<Value> {
    let LinkStatus::Valid {
        username,
        platform_hint,
    } = state.validator.resolve_link(link_id).await?
    else {
        return Err(ApiError::LinkInvalid);
    };

    if !state.validator.is_authorized(session, link_id).await? {
        return Ok(json!({ "view": "password_required" }));
    }

    let mut platforms = state.artifacts.available_platforms(&username).await;
    if state.config.platform_policy == PlatformPolicy::Strict {
        platforms.retain(|platform| *platform == platform_hint);
    }

    Ok(json!({
        "view": "authorized",
        "username": username,
        "platform": platform_hint,
        "platforms": platforms,
    }))
}

/// Show a link: invalid, password challenge or platform selection
pub async fn show_link(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(link_id): Path<String>,
) -> ApiResult<(CookieJar, Json<Value>)> {
    let (jar, session) = bearer_session(jar, state.config.secure_cookies);
    let view = link_view(&state, &session, &link_id).await?;
    Ok((jar, Json(view)))
}

/// Bearer form submission: either `password` or `platform`
#[derive(Debug, Deserialize)]
pub struct CertForm {
    pub password: Option<String>,
    pub platform: Option<String>,
}

/// Verify a link password or download an artifact
pub async fn redeem_link(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(link_id): Path<String>,
    Form(form): Form<CertForm>,
) -> ApiResult<(CookieJar, Response)> {
    let (jar, session) = bearer_session(jar, state.config.secure_cookies);

    if let Some(password) = form.password {
        if !matches!(
            state.validator.resolve_link(&link_id).await?,
            LinkStatus::Valid { .. }
        ) {
            return Err(ApiError::LinkInvalid);
        }

        let key = format!("link:{}", link_id);
        if let RateLimitDecision::Blocked { retry_after } =
            state.link_limiter.try_acquire(&key).await?
        {
            return Err(ApiError::TooManyRequests { retry_after });
        }

        if !state
            .validator
            .check_password(&session, &link_id, &password)
            .await?
        {
            return Err(
                rejected_attempt(&state.link_limiter, &key, ApiError::IncorrectPassword).await?,
            );
        }

        state.link_limiter.reset(&key).await?;
        let view = link_view(&state, &session, &link_id).await?;
        return Ok((jar, Json(view).into_response()));
    }

    let Some(platform) = form.platform else {
        return Err(ApiError::BadRequest(
            "Either password or platform is required".to_string(),
        ));
    };

    let download = state
        .validator
        .authorize_download(&session, &link_id, &platform)
        .await?;
    let artifact = state
        .artifacts
        .resolve(&download.username, download.platform)
        .await?;
    let bytes = state.artifacts.read(&artifact).await?;
    state.validator.record_redemption(&download).await?;

    info!(
        link_id = %link_id,
        username = %download.username,
        platform = %download.platform,
        "Certificate downloaded through link"
    );
    Ok((jar, attachment(&artifact, bytes)))
}
