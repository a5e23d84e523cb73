/// API routes and handlers
pub mod admin;
pub mod cron;
pub mod middleware;
pub mod portal;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(portal::routes())
        .merge(admin::routes())
        .merge(cron::routes())
}
