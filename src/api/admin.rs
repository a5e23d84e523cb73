/// Admin endpoints: admin session and activation code management
use crate::{
    admin::GenerateCodesRequest,
    api::portal::json_body,
    auth::{removal_cookie, session_cookie, AdminAuth, ADMIN_COOKIE},
    context::AppContext,
    db::{ActivationCode, AuditEntry, CodeStatus, RevokeOutcome},
    error::{PortalError, PortalResult},
    identity::IdentityError,
    saga::normalize_email,
};
use axum::{
    extract::{rejection::JsonRejection, Query, State},
    routing::post,
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};

/// Build admin routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/admin/login", post(admin_login))
        .route("/admin/logout", post(admin_logout))
        .route(
            "/admin/codes",
            post(generate_codes).get(list_codes).patch(revoke_codes),
        )
}

#[derive(Debug, Deserialize)]
struct AdminLoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct AdminLoginResponse {
    admin_email: String,
}

/// Authenticate an allowlisted administrator
async fn admin_login(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    payload: Result<Json<AdminLoginRequest>, JsonRejection>,
) -> PortalResult<(CookieJar, Json<AdminLoginResponse>)> {
    let request = json_body(payload)?;
    let email = normalize_email(&request.email);

    match ctx.identity.authenticate(&email, &request.password).await {
        Ok(_) => {}
        Err(IdentityError::Rejected { .. }) => {
            return Err(PortalError::Authentication("Invalid email or password".to_string()))
        }
        Err(e) => return Err(e.into()),
    }

    if !ctx.config.is_admin_email(&email) {
        tracing::warn!(email = %email, "non-admin attempted admin login");
        return Err(PortalError::Forbidden("Not an administrator".to_string()));
    }

    let token = ctx.sessions.issue_admin(&email)?;
    if let Err(e) = ctx
        .store
        .record_audit(&AuditEntry::new(email.as_str(), "admin.login"), ctx.clock.now())
        .await
    {
        tracing::warn!("failed to write audit record: {}", e);
    }
    tracing::info!(admin_email = %email, "admin logged in");

    let cookie = session_cookie(ADMIN_COOKIE, token, ctx.config.authentication.secure_cookies);
    Ok((jar.add(cookie), Json(AdminLoginResponse { admin_email: email })))
}

/// Drop the admin session
async fn admin_logout(jar: CookieJar) -> (CookieJar, Json<serde_json::Value>) {
    (
        jar.remove(removal_cookie(ADMIN_COOKIE)),
        Json(serde_json::json!({ "success": true })),
    )
}

#[derive(Debug, Serialize)]
struct GeneratedCodes {
    codes: Vec<String>,
}

/// Mint a batch of activation codes
async fn generate_codes(
    State(ctx): State<AppContext>,
    AdminAuth(admin): AdminAuth,
    payload: Result<Json<GenerateCodesRequest>, JsonRejection>,
) -> PortalResult<Json<GeneratedCodes>> {
    let request = json_body(payload)?;
    let codes = ctx.codes.create_batch(&request, &admin.admin_email).await?;
    Ok(Json(GeneratedCodes { codes }))
}

#[derive(Debug, Deserialize)]
struct ListCodesParams {
    status: Option<String>,
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct CodeList {
    codes: Vec<ActivationCode>,
}

/// List codes, optionally filtered by status
async fn list_codes(
    State(ctx): State<AppContext>,
    AdminAuth(_admin): AdminAuth,
    Query(params): Query<ListCodesParams>,
) -> PortalResult<Json<CodeList>> {
    let status = params
        .status
        .filter(|s| !s.trim().is_empty() && s.as_str() != "all")
        .map(|s| s.parse::<CodeStatus>())
        .transpose()
        .map_err(PortalError::Validation)?;

    let codes = ctx.codes.list(status, params.limit.unwrap_or(200)).await?;
    Ok(Json(CodeList { codes }))
}

#[derive(Debug, Deserialize)]
struct RevokeRequest {
    codes: Vec<String>,
}

/// Revoke a batch of unused codes
async fn revoke_codes(
    State(ctx): State<AppContext>,
    AdminAuth(admin): AdminAuth,
    payload: Result<Json<RevokeRequest>, JsonRejection>,
) -> PortalResult<Json<RevokeOutcome>> {
    let request = json_body(payload)?;
    let outcome = ctx.codes.revoke_batch(&request.codes, &admin.admin_email).await?;
    Ok(Json(outcome))
}
