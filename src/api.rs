use std::sync::Arc;

use anyhow::{Error, Result};
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::{
    clients::health::HealthChecker,
    dispatch::TaskPublisher,
    models::{
        health::HealthStatus,
        message::{NotificationAccepted, NotificationRequest},
        response::ApiResponse,
        task::DispatchTask,
    },
    registry::RegistryEntry,
    utils::shutdown_signal,
};

pub struct AppState {
    pub health_checker: HealthChecker,
    pub publisher: Arc<dyn TaskPublisher>,
    /// Where inbound events are queued for routing.
    pub master: RegistryEntry,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/notifications", post(submit_notification))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(port: u16, state: Arc<AppState>) -> Result<(), Error> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!(address = %addr, "Ingestion server started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Queues the event for the master and returns. Delivery outcome is only visible in the
/// delivery logs.
async fn submit_notification(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NotificationRequest>,
) -> (StatusCode, Json<ApiResponse<NotificationAccepted>>) {
    let event = match request.into_event() {
        Ok(event) => event,
        Err(reason) => {
            warn!(reason = %reason, "Rejected notification request");
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error(
                    reason,
                    "Invalid notification request".to_string(),
                )),
            );
        }
    };

    let data = serde_json::to_vec(&event.payload).unwrap_or_default();
    let task = DispatchTask::route_notification(
        &state.master.binding_key,
        &event.tenant_id,
        event.account().unwrap_or_default(),
        event.event_type,
        data,
    );

    match state.publisher.publish(&state.master, &task).await {
        Ok(()) => {
            info!(
                task_id = %task.uuid,
                tenant_id = %event.tenant_id,
                account_id = event.account().unwrap_or_default(),
                event_type = %event.event_type,
                "Notification accepted"
            );
            (
                StatusCode::ACCEPTED,
                Json(ApiResponse::success(
                    NotificationAccepted { task_id: task.uuid },
                    "Notification queued for routing".to_string(),
                )),
            )
        }
        Err(e) => {
            error!(error = %e, event_type = %event.event_type, "Failed to queue notification");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ApiResponse::error(
                    e.to_string(),
                    "Notification could not be queued".to_string(),
                )),
            )
        }
    }
}
