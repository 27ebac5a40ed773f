use axum::Router;

pub mod clients;
pub mod system;

/// Router for the ledger endpoints.
pub fn router() -> Router {
    Router::new().nest("/clientes", clients::router())
}
