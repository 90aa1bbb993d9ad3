//! Chat transport routes

use crate::core::AppState;
use axum::{routing::get, Router};

pub mod socket;

pub fn router(enable_developer_api: bool) -> Router<AppState> {
    let router = Router::new().route("/ws", get(socket::user_socket));

    if enable_developer_api {
        router.route("/ws/developer", get(socket::developer_socket))
    } else {
        router
    }
}
