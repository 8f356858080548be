//! Auth route handlers.
//!
//! The gateway owns no auth logic: every route forwards the request over
//! RPC to the auth queue and translates the `{success, status, ...}`
//! reply body onto an HTTP response. A broker failure or timeout becomes
//! a clear 5xx — a login must never appear to hang or silently succeed.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use validator::Validate;

use crate::application::dto::{EmailRequest, LoginRequest, RegisterRequest, VerifyOtpRequest};
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Translate a service reply body to an HTTP response, taking the status
/// from the body itself.
fn reply_response(reply: Value) -> Response {
    let status = reply
        .get("status")
        .and_then(Value::as_u64)
        .and_then(|s| StatusCode::from_u16(s as u16).ok())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(reply)).into_response()
}

pub async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> Result<Response, AppError> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let reply = state
        .rpc
        .call(
            &state.settings.broker.auth_queue,
            "register",
            json!({ "name": body.name, "email": body.email, "password": body.password }),
        )
        .await?;
    Ok(reply_response(reply))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Response, AppError> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let reply = state
        .rpc
        .call(
            &state.settings.broker.auth_queue,
            "login",
            json!({ "email": body.email, "password": body.password }),
        )
        .await?;
    Ok(reply_response(reply))
}

pub async fn verify_otp(
    State(state): State<AppState>,
    Json(body): Json<VerifyOtpRequest>,
) -> Result<Response, AppError> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let reply = state
        .rpc
        .call(
            &state.settings.broker.auth_queue,
            "verify_otp",
            json!({ "email": body.email, "otp": body.otp }),
        )
        .await?;
    Ok(reply_response(reply))
}

pub async fn resend_otp(
    State(state): State<AppState>,
    Json(body): Json<EmailRequest>,
) -> Result<Response, AppError> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let reply = state
        .rpc
        .call(
            &state.settings.broker.auth_queue,
            "resend_otp",
            json!({ "email": body.email }),
        )
        .await?;
    Ok(reply_response(reply))
}

pub async fn logout(
    State(state): State<AppState>,
    Json(body): Json<EmailRequest>,
) -> Result<Response, AppError> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let reply = state
        .rpc
        .call(
            &state.settings.broker.auth_queue,
            "logout",
            json!({ "email": body.email }),
        )
        .await?;
    Ok(reply_response(reply))
}
