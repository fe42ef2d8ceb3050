//! The read-only operator surface: health, latest snapshots, aggregate
//! range reads, per-monitor uptime statistics, the public system-config
//! property, and the notification channel test operation.

use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pika_common::types::MetricKind;
use serde::Deserialize;
use serde_json::json;
use std::str::FromStr;

/// Administrative failures surface as `{"error": "..."}` bodies.
fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

pub async fn healthz(State(state): State<AppState>) -> Response {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let agents_online = match state.store.list_online_agents().await {
        Ok(agents) => agents.len(),
        Err(e) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };
    Json(json!({
        "status": "ok",
        "uptimeSecs": (now_ms - state.start_time_ms) / 1000,
        "sessions": state.link.session_count(),
        "agentsOnline": agents_online,
    }))
    .into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestQuery {
    pub agent_id: String,
}

pub async fn latest_metrics(
    State(state): State<AppState>,
    Query(query): Query<LatestQuery>,
) -> Response {
    let now_ms = chrono::Utc::now().timestamp_millis();
    let cells = state.overlay.snapshot_for_agent(&query.agent_id, now_ms);
    let body: Vec<serde_json::Value> = cells
        .into_iter()
        .map(|(kind, subject, value)| {
            json!({
                "kind": kind.as_str(),
                "subject": if subject.is_empty() { serde_json::Value::Null } else { subject.into() },
                "timestamp": value.ts_ms,
                "fields": value.fields,
            })
        })
        .collect();
    Json(body).into_response()
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeQuery {
    pub agent_id: String,
    pub kind: String,
    pub from: i64,
    pub to: i64,
}

pub async fn range_metrics(
    State(state): State<AppState>,
    Query(query): Query<RangeQuery>,
) -> Response {
    let kind = match MetricKind::from_str(&query.kind) {
        Ok(kind) => kind,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    if query.to <= query.from {
        return error_response(StatusCode::BAD_REQUEST, "empty time range");
    }

    let series = state.series.clone();
    let agent_id = query.agent_id.clone();
    let (from, to) = (query.from, query.to);
    let result = tokio::task::spawn_blocking(move || {
        pika_ingest::range_query(series.as_ref(), &agent_id, kind, from, to)
    })
    .await;

    match result {
        Ok(Ok((resolution, rows))) => {
            let points: Vec<serde_json::Value> = rows
                .into_iter()
                .map(|row| {
                    json!({
                        "bucketStart": row.bucket_start_ms,
                        "subject": if row.subject.is_empty() { serde_json::Value::Null } else { row.subject.into() },
                        "fields": serde_json::from_str::<serde_json::Value>(&row.fields_json)
                            .unwrap_or(serde_json::Value::Null),
                    })
                })
                .collect();
            Json(json!({ "resolution": resolution.as_str(), "points": points })).into_response()
        }
        Ok(Err(e)) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn monitor_stats(
    State(state): State<AppState>,
    Path(monitor_id): Path<String>,
) -> Response {
    match state.store.get_monitor(&monitor_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "monitor not found"),
        Err(e) => return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }

    let now_ms = chrono::Utc::now().timestamp_millis();
    match state.uptime.stats(&monitor_id, now_ms).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Public system config; absent property falls back to the built-in
/// defaults instead of a 404.
pub async fn system_config(State(state): State<AppState>) -> Response {
    use pika_storage::store::property::PROPERTY_SYSTEM_CONFIG;

    match state.store.get_property(PROPERTY_SYSTEM_CONFIG).await {
        Ok(Some(row)) => Json(json!({
            "id": row.id,
            "name": row.name,
            "value": row.value,
        }))
        .into_response(),
        Ok(None) => Json(json!({
            "id": PROPERTY_SYSTEM_CONFIG,
            "name": "系统配置",
            "value": {
                "systemNameEn": "Pika Monitor",
                "systemNameZh": "皮卡监控",
                "logoBase64": "",
            },
        }))
        .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub async fn test_notification_channel(
    State(state): State<AppState>,
    Path(channel_type): Path<String>,
) -> Response {
    let channel_type = match channel_type.parse::<pika_notify::ChannelType>() {
        Ok(t) => t,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    match state.notifier.test_channel(channel_type).await {
        Ok(()) => Json(json!({ "message": "test notification sent" })).into_response(),
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("test notification failed ({channel_type}): {e}"),
        ),
    }
}
