use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use taskbot_core::config::TransportMode;
use tracing::{error, info};

#[derive(Clone)]
pub struct HealthState {
    transport_mode: TransportMode,
    roster_size: usize,
    started_at: DateTime<Utc>,
}

impl HealthState {
    pub fn new(transport_mode: TransportMode, roster_size: usize) -> Self {
        Self { transport_mode, roster_size, started_at: Utc::now() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub transport_mode: &'static str,
    pub roster_size: usize,
    pub started_at: String,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

/// Binds `bind_address:port` and serves `app` on a background task.
pub async fn spawn(bind_address: &str, port: u16, app: Router) -> std::io::Result<()> {
    let address = format!("{bind_address}:{port}");
    let listener = tokio::net::TcpListener::bind(&address).await?;

    info!(
        event_name = "system.http.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "http listener started"
    );

    tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, app).await {
            error!(
                event_name = "system.http.error",
                correlation_id = "bootstrap",
                error = %error,
                "http listener terminated unexpectedly"
            );
        }
    });

    Ok(())
}

pub async fn health(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        transport_mode: state.transport_mode.as_str(),
        roster_size: state.roster_size,
        started_at: state.started_at.to_rfc3339(),
        checked_at: Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use taskbot_core::config::TransportMode;
    use tower::ServiceExt;

    use super::{router, HealthState};

    #[tokio::test]
    async fn reports_transport_mode_and_roster_size() {
        let response = router(HealthState::new(TransportMode::SocketMode, 3))
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let payload: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["transport_mode"], "socket");
        assert_eq!(payload["roster_size"], 3);
    }
}
