/// External trigger for the expiry sweep
use crate::{
    api::middleware::extract_bearer_token,
    context::AppContext,
    error::{PortalError, PortalResult},
    jobs::SweepReport,
};
use axum::{extract::State, http::HeaderMap, routing::get, Json, Router};
use subtle::ConstantTimeEq;

/// Build cron routes
pub fn routes() -> Router<AppContext> {
    Router::new().route("/cron/expire", get(expire).post(expire))
}

fn secret_matches(presented: &str, expected: &str) -> bool {
    presented.as_bytes().ct_eq(expected.as_bytes()).into()
}

/// Run one expiry sweep
async fn expire(State(ctx): State<AppContext>, headers: HeaderMap) -> PortalResult<Json<SweepReport>> {
    let token = extract_bearer_token(&headers)
        .ok_or_else(|| PortalError::Authentication("Missing authorization header".to_string()))?;

    if !secret_matches(&token, &ctx.config.authentication.cron_secret) {
        tracing::warn!("cron trigger with wrong secret");
        return Err(PortalError::Authentication("Invalid cron secret".to_string()));
    }

    Ok(Json(ctx.sweep.run().await?))
}
