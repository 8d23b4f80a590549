//! Admin storage browser: a gateway over a bucket/object storage API, folder
//! emulation on its flat key space, the browser state machine with its
//! preview cache, and the admin HTTP API.

use axum::Router;
use services::{gateway::StorageGateway, local_backend::LocalBackend};
use std::sync::Arc;

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<StorageGateway>,
    /// Present only when objects are stored by this process.
    pub local: Option<LocalBackend>,
}

/// Router with every route mounted and `state` attached.
pub fn app(state: AppState) -> Router {
    routes::routes::routes().with_state(state)
}
