pub mod account;
pub mod cart;
pub mod catalog;
pub mod public;

use axum::Router;
use tower_http::services::ServeDir;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(public::router())
        .merge(catalog::router())
        .merge(cart::router())
        .merge(account::router())
        .nest_service("/static", ServeDir::new("static"))
        .with_state(state)
}
