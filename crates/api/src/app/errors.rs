use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use saldo_infra::engine::LedgerError;

pub fn ledger_error_to_response(err: LedgerError) -> axum::response::Response {
    match err {
        LedgerError::NotFound(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("account {id} not found"))
        }
        LedgerError::InvalidInput(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "validation_error", msg)
        }
        e @ LedgerError::LimitExceeded { .. } => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "limit_exceeded", e.to_string())
        }
        e @ LedgerError::AlreadyExists(_) => json_error(StatusCode::CONFLICT, "conflict", e.to_string()),
        e @ LedgerError::GateTimeout(_) => {
            json_error(StatusCode::SERVICE_UNAVAILABLE, "account_busy", e.to_string())
        }
        e @ LedgerError::Store(_) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", e.to_string())
        }
    }
}

/// Malformed or incomplete bodies are a validation failure, same as bad field values.
pub fn json_rejection_to_response(rejection: JsonRejection) -> axum::response::Response {
    json_error(
        StatusCode::UNPROCESSABLE_ENTITY,
        "validation_error",
        rejection.body_text(),
    )
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
