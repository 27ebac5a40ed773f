use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use saldo_core::AccountId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/:id/transacoes", post(post_transaction))
        .route("/:id/extrato", get(get_statement))
}

/// A path segment that is not an account id names no account.
fn parse_account_id(raw: &str) -> Result<AccountId, axum::response::Response> {
    raw.parse::<AccountId>().map_err(|_| {
        errors::json_error(StatusCode::NOT_FOUND, "not_found", format!("account {raw:?} not found"))
    })
}

pub async fn post_transaction(
    Extension(services): Extension<Arc<AppServices>>,
    Path(raw_id): Path<String>,
    body: Result<Json<dto::TransactionPayload>, JsonRejection>,
) -> axum::response::Response {
    let account_id = match parse_account_id(&raw_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let Json(payload) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    match services.apply_transaction(account_id, payload.into()).await {
        Ok(view) => (StatusCode::OK, Json(dto::BalanceResponse::from(view))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}

pub async fn get_statement(
    Extension(services): Extension<Arc<AppServices>>,
    Path(raw_id): Path<String>,
) -> axum::response::Response {
    let account_id = match parse_account_id(&raw_id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    match services.get_statement(account_id).await {
        Ok(statement) => (StatusCode::OK, Json(dto::StatementResponse::from(statement))).into_response(),
        Err(e) => errors::ledger_error_to_response(e),
    }
}
