/// End-user endpoints: redemption, login and session mode transitions
use crate::{
    auth::{removal_cookie, session_cookie, OptionalUserAuth, UserAuth, USER_COOKIE},
    context::AppContext,
    error::{PortalError, PortalResult},
    gate::{Elevation, Overview},
    saga::{RedeemInput, RedeemReceipt},
    session::SessionMode,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};

/// Build portal routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/redeem", post(redeem))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/sso", get(sso))
        .route("/return", post(return_to_personal))
        .route("/me", get(me))
}

/// Turn body extraction failures into the portal's 400
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> PortalResult<T> {
    payload
        .map(|Json(body)| body)
        .map_err(|e| PortalError::Validation(e.body_text()))
}

/// Redeem an activation code
async fn redeem(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    payload: Result<Json<RedeemInput>, JsonRejection>,
) -> PortalResult<(CookieJar, Json<RedeemReceipt>)> {
    let input = json_body(payload)?;
    let receipt = ctx.saga.redeem(input).await?;

    let cookie = session_cookie(
        USER_COOKIE,
        receipt.session_token.clone(),
        ctx.config.authentication.secure_cookies,
    );
    Ok((jar.add(cookie), Json(receipt)))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
    #[serde(default = "default_mode")]
    mode: SessionMode,
}

fn default_mode() -> SessionMode {
    SessionMode::Personal
}

#[derive(Debug, Serialize)]
struct ModeResponse {
    mode: SessionMode,
}

/// Sign in as personal or edu
async fn login(
    State(ctx): State<AppContext>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> PortalResult<(CookieJar, Json<ModeResponse>)> {
    let request = json_body(payload)?;
    let outcome = ctx
        .gate
        .login(&request.email, &request.password, request.mode)
        .await?;

    let cookie = session_cookie(USER_COOKIE, outcome.token, ctx.config.authentication.secure_cookies);
    Ok((jar.add(cookie), Json(ModeResponse { mode: outcome.mode })))
}

/// Drop the end-user session
async fn logout(jar: CookieJar) -> (CookieJar, Json<serde_json::Value>) {
    (
        jar.remove(removal_cookie(USER_COOKIE)),
        Json(serde_json::json!({ "success": true })),
    )
}

/// Elevate to edu mode and hand off to webmail
async fn sso(
    State(ctx): State<AppContext>,
    OptionalUserAuth(session): OptionalUserAuth,
    jar: CookieJar,
) -> PortalResult<Response> {
    let Some(session) = session else {
        return Ok(Redirect::to("/login").into_response());
    };

    match ctx.gate.elevate(&session).await? {
        Elevation::Granted { token, .. } => {
            let cookie = session_cookie(USER_COOKIE, token, ctx.config.authentication.secure_cookies);
            Ok((jar.add(cookie), Redirect::to(&ctx.config.mailbox.webmail_url)).into_response())
        }
        Elevation::Refused(reason) => {
            let redirect = Redirect::to(&format!("/dashboard?edu={}", reason.as_str()));
            if session.mode == SessionMode::Edu {
                let token = ctx.gate.return_to_personal(&session)?;
                let cookie = session_cookie(USER_COOKIE, token, ctx.config.authentication.secure_cookies);
                return Ok((jar.add(cookie), redirect).into_response());
            }
            Ok(redirect.into_response())
        }
    }
}

/// Back from edu to personal mode
async fn return_to_personal(
    State(ctx): State<AppContext>,
    UserAuth(session): UserAuth,
    jar: CookieJar,
) -> PortalResult<(CookieJar, Json<ModeResponse>)> {
    let token = ctx.gate.return_to_personal(&session)?;
    let cookie = session_cookie(USER_COOKIE, token, ctx.config.authentication.secure_cookies);
    Ok((
        jar.add(cookie),
        Json(ModeResponse {
            mode: SessionMode::Personal,
        }),
    ))
}

/// Dashboard data
async fn me(State(ctx): State<AppContext>, UserAuth(session): UserAuth) -> PortalResult<Json<Overview>> {
    Ok(Json(ctx.gate.overview(&session).await?))
}
