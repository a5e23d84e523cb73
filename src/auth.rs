/// Authentication extractors and cookie helpers
use crate::{
    context::AppContext,
    error::PortalError,
    session::{AdminSession, UserSession},
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

/// End-user session cookie
pub const USER_COOKIE: &str = "eduhub_session";
/// Administrator session cookie
pub const ADMIN_COOKIE: &str = "eduhub_admin";

/// Build an HttpOnly session cookie; the token's own expiry governs its lifetime
pub fn session_cookie(name: &'static str, token: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, token))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .build()
}

/// Cookie that clears `name`
pub fn removal_cookie(name: &'static str) -> Cookie<'static> {
    Cookie::build((name, "")).path("/").build()
}

/// Signed-in end user
#[derive(Debug, Clone)]
pub struct UserAuth(pub UserSession);

#[async_trait]
impl FromRequestParts<AppContext> for UserAuth {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        OptionalUserAuth::from_request_parts(parts, state)
            .await?
            .0
            .map(UserAuth)
            .ok_or_else(|| PortalError::Authentication("Not signed in".to_string()))
    }
}

/// End user if a valid session cookie is present
#[derive(Debug, Clone)]
pub struct OptionalUserAuth(pub Option<UserSession>);

#[async_trait]
impl FromRequestParts<AppContext> for OptionalUserAuth {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let session = jar
            .get(USER_COOKIE)
            .and_then(|cookie| state.sessions.verify_user(cookie.value()));

        Ok(OptionalUserAuth(session))
    }
}

/// Signed-in administrator still on the allowlist
#[derive(Debug, Clone)]
pub struct AdminAuth(pub AdminSession);

#[async_trait]
impl FromRequestParts<AppContext> for AdminAuth {
    type Rejection = PortalError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let session = jar
            .get(ADMIN_COOKIE)
            .and_then(|cookie| state.sessions.verify_admin(cookie.value()))
            .ok_or_else(|| PortalError::Authentication("Admin session required".to_string()))?;

        if !state.config.is_admin_email(&session.admin_email) {
            tracing::warn!(admin_email = %session.admin_email, "admin session for removed admin");
            return Err(PortalError::Forbidden("Not an administrator".to_string()));
        }

        Ok(AdminAuth(session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = session_cookie(USER_COOKIE, "token".to_string(), true);
        assert_eq!(cookie.name(), "eduhub_session");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.path(), Some("/"));
    }
}
