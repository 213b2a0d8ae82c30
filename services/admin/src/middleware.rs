//! Session cookies and admin authentication middleware

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::{debug, error};

use crate::AppState;
use crate::error::ApiError;
use crate::session::SessionId;

pub const ADMIN_COOKIE: &str = "admin_session";
pub const BEARER_COOKIE: &str = "cert_session";

/// Build an HttpOnly, SameSite=Lax session cookie
pub fn session_cookie(name: &'static str, session: &SessionId, secure: bool) -> Cookie<'static> {
    Cookie::build((name, session.as_str().to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .build()
}

/// Read a session id from a cookie, ignoring malformed values
pub fn session_from_jar(jar: &CookieJar, name: &str) -> Option<SessionId> {
    jar.get(name).and_then(|cookie| SessionId::parse(cookie.value()))
}

/// Return the bearer's session, minting one on first contact
pub fn bearer_session(jar: CookieJar, secure: bool) -> (CookieJar, SessionId) {
    match session_from_jar(&jar, BEARER_COOKIE) {
        Some(session) => (jar, session),
        None => {
            let session = SessionId::generate();
            debug!("Minting bearer session");
            let jar = jar.add(session_cookie(BEARER_COOKIE, &session, secure));
            (jar, session)
        }
    }
}

/// Reject requests without a valid admin session
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    jar: CookieJar,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let session = session_from_jar(&jar, ADMIN_COOKIE).ok_or(ApiError::Unauthorized)?;

    let valid = state.admin_sessions.is_valid(&session).await.map_err(|e| {
        error!("Failed to check admin session: {}", e);
        ApiError::InternalServerError
    })?;
    if !valid {
        return Err(ApiError::Unauthorized);
    }

    // Add session to request extensions for use in handlers
    req.extensions_mut().insert(session);

    Ok(next.run(req).await)
}
