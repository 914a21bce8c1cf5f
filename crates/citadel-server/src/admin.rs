//! Operator surface: healing control, fix lifecycle, circuit control,
//! metrics and the dashboard

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::state::Gateway;

fn not_found(message: String) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "kind": "not_found", "message": message }))).into_response()
}

/// Handle `GET /api/v1/healing/status`
pub(crate) async fn healing_status(State(gateway): State<Gateway>) -> Response {
    let config = &gateway.inner.config;
    let health: Vec<serde_json::Value> = config
        .available_providers()
        .iter()
        .map(|name| json!(gateway.inner.health.snapshot(name)))
        .collect();

    Json(json!({
        "enabled": gateway.inner.health.is_enabled(),
        "heal_model": config.healing.heal_model,
        "auto_apply": config.healing.auto_apply,
        "research_preference_order": config.healing.research_preference_order,
        "providers": health,
        "reload": gateway.inner.reload.status(),
    }))
    .into_response()
}

/// Handle `POST /api/v1/healing/pause/{provider}`
///
/// Also cancels any in-flight heal cycle, leaving the provider on its
/// pre-cycle adapter version.
pub(crate) async fn pause_healing(State(gateway): State<Gateway>, Path(provider): Path<String>) -> Response {
    gateway.inner.health.pause(&provider);
    gateway.inner.heal_worker.cancel(&provider);
    Json(json!({ "status": "paused", "provider": provider })).into_response()
}

/// Handle `POST /api/v1/healing/resume/{provider}`
pub(crate) async fn resume_healing(State(gateway): State<Gateway>, Path(provider): Path<String>) -> Response {
    gateway.inner.health.resume(&provider);
    Json(json!({ "status": "resumed", "provider": provider })).into_response()
}

/// Handle `GET /api/v1/fixes/pending`
pub(crate) async fn pending_fixes(State(gateway): State<Gateway>) -> Response {
    let pending = gateway.inner.reload.pending_fixes().await;
    Json(json!({ "pending_fixes": pending })).into_response()
}

/// Handle `POST /api/v1/fixes/{provider}/approve`
pub(crate) async fn approve_fix(State(gateway): State<Gateway>, Path(provider): Path<String>) -> Response {
    match gateway.inner.reload.approve(&provider, None).await {
        Ok(outcome) => {
            // An approved fix that verified cleanly also clears the
            // provider's error window
            if matches!(outcome, citadel_resilience::FixOutcome::Committed { .. }) {
                gateway.inner.health.heal_complete(&provider, true);
            }
            Json(json!({ "provider": provider, "result": outcome })).into_response()
        }
        Err(error) => not_found(error.to_string()),
    }
}

/// Handle `POST /api/v1/fixes/{provider}/reject`
pub(crate) async fn reject_fix(State(gateway): State<Gateway>, Path(provider): Path<String>) -> Response {
    match gateway.inner.reload.reject(&provider, "rejected by operator").await {
        Ok(()) => Json(json!({ "status": "rejected", "provider": provider })).into_response(),
        Err(error) => not_found(error.to_string()),
    }
}

/// Handle `GET /api/v1/fixes/{provider}/history`
pub(crate) async fn fix_history(State(gateway): State<Gateway>, Path(provider): Path<String>) -> Response {
    Json(json!({
        "provider": provider,
        "current": gateway.inner.reload.current_version(&provider),
        "versions": gateway.inner.reload.history(&provider),
    }))
    .into_response()
}

/// Handle `POST /api/v1/fixes/{provider}/rollback/{version}`
pub(crate) async fn rollback(
    State(gateway): State<Gateway>,
    Path((provider, version)): Path<(String, u64)>,
) -> Response {
    match gateway.inner.reload.rollback_to(&provider, version).await {
        Ok(new_version) => Json(json!({
            "status": "rolled_back",
            "provider": provider,
            "target": version,
            "as_version": new_version,
        }))
        .into_response(),
        Err(error) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "kind": "rollback_failed", "message": error.to_string(), "provider": provider })),
        )
            .into_response(),
    }
}

/// Handle `POST /api/v1/circuit/{provider}/{action}`
pub(crate) async fn circuit_control(
    State(gateway): State<Gateway>,
    Path((provider, action)): Path<(String, String)>,
) -> Response {
    let circuit = &gateway.inner.circuit;
    match action.as_str() {
        "open" => circuit.force_open(&provider),
        "close" => circuit.force_close(&provider),
        "reset" => circuit.reset(&provider),
        other => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "kind": "validation", "message": format!("unknown circuit action '{other}'") })),
            )
                .into_response();
        }
    }
    Json(json!({ "status": action, "provider": provider, "state": circuit.snapshot(&provider) })).into_response()
}

/// Handle `GET /api/v1/metrics`
pub(crate) async fn metrics(State(gateway): State<Gateway>) -> Response {
    Json(gateway.inner.metrics.snapshot()).into_response()
}

/// Handle `GET /api/v1/dashboard`: everything an operator wants on one
/// screen
pub(crate) async fn dashboard(State(gateway): State<Gateway>) -> Response {
    let config = &gateway.inner.config;

    let providers: Vec<serde_json::Value> = config
        .available_providers()
        .iter()
        .map(|name| {
            json!({
                "name": name,
                "circuit": gateway.inner.circuit.snapshot(name),
                "health": gateway.inner.health.snapshot(name),
                "adapter_version": gateway.inner.reload.current_version(name),
                "pending_fix": gateway.inner.reload.has_pending(name),
            })
        })
        .collect();

    Json(json!({
        "system": {
            "service": "citadel",
            "healing_enabled": gateway.inner.health.is_enabled(),
            "default_provider": config.behaviour.default_provider,
            "fallback_enabled": config.behaviour.enable_fallback,
        },
        "providers": providers,
        "reload": gateway.inner.reload.status(),
        "metrics": gateway.inner.metrics.snapshot(),
    }))
    .into_response()
}
