//! Read-only HTTP status endpoint.
//!
//! - `GET /`: plain-text server status block (last modified, elapsed time).
//! - `GET /cake`: the latest [`Snapshot`](crate::snapshot::Snapshot) as pretty JSON.
//!
//! Anything else answers `404` with `[404] NOT FOUND`.

use std::net::SocketAddr;

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Extension, Router};
use chrono::{DateTime, Utc};
use tokio::net::TcpListener;

use crate::service::ShaperController;

#[derive(Clone)]
struct StatusState {
    controller: ShaperController,
    started: DateTime<Utc>,
}

pub fn router(controller: ShaperController) -> Router {
    let state = StatusState {
        controller,
        started: Utc::now(),
    };
    Router::new()
        .route("/", get(home))
        .route("/cake", get(cake))
        .fallback(not_found)
        .layer(Extension(state))
}

/// Bind `address` and serve the status endpoint until the process exits.
pub async fn serve(address: SocketAddr, controller: ShaperController) -> anyhow::Result<()> {
    let listener = TcpListener::bind(address).await?;
    serve_on(listener, controller).await
}

pub async fn serve_on(listener: TcpListener, controller: ShaperController) -> anyhow::Result<()> {
    tracing::info!(address = ?listener.local_addr()?, "Status endpoint listening");
    axum::serve(listener, router(controller)).await?;
    Ok(())
}

async fn home(Extension(state): Extension<StatusState>) -> String {
    let snapshot = state.controller.snapshot();
    status_banner(Utc::now(), state.started, snapshot.ticks)
}

fn status_banner(now: DateTime<Utc>, started: DateTime<Utc>, ticks: u64) -> String {
    let elapsed = now.signed_duration_since(started).num_seconds().max(0);
    format!(
        "\n •===========================• \n • [SERVER STATUS] \n • Last Modified: {} \n • Control Ticks: {} \n • Time Elapsed: {}s \n •===========================• \n\n",
        now.format("%A, %d-%b-%y %H:%M:%S UTC"),
        ticks,
        elapsed,
    )
}

async fn cake(Extension(state): Extension<StatusState>) -> axum::response::Response {
    let snapshot = state.controller.snapshot();
    match serde_json::to_string_pretty(&*snapshot) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Failed to serialize snapshot");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "[404] NOT FOUND")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShaperConfig;
    use crate::service::ControlLoop;
    use crate::shaper::RecordingShaper;

    #[test]
    fn banner_reports_last_modified_and_elapsed_time() -> testresult::TestResult {
        let started: DateTime<Utc> = "2024-03-01T10:00:00Z".parse()?;
        let now: DateTime<Utc> = "2024-03-01T10:02:05Z".parse()?;

        let banner = status_banner(now, started, 42);

        assert!(banner.contains(" • Last Modified: Friday, 01-Mar-24 10:02:05 UTC \n"));
        assert!(banner.contains(" • Control Ticks: 42 \n"));
        assert!(banner.contains(" • Time Elapsed: 125s \n"));
        Ok(())
    }

    #[tokio::test]
    async fn serves_snapshot_banner_and_404() -> testresult::TestResult {
        let (controller, mut control) = ControlLoop::new(&ShaperConfig::default(), RecordingShaper::new())?;
        controller.record_rtt(20_000_000)?;
        control.tick().await;

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let server = tokio::spawn(serve_on(listener, controller));

        let base = format!("http://{address}");
        let banner = reqwest::get(format!("{base}/")).await?.text().await?;
        assert!(banner.contains("[SERVER STATUS]"));
        assert!(banner.contains("Control Ticks: 1"));

        let response = reqwest::get(format!("{base}/cake")).await?;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let json: serde_json::Value = response.json().await?;
        assert_eq!(json["rttAverage"], 20_000_000u64);
        assert_eq!(json["rttAverageString"], "20.00 ms | 20000.00 μs");
        assert_eq!(json["dataTotal"], "1 of 10000");
        assert_eq!(json["controller"]["state"], "growing");

        let missing = reqwest::get(format!("{base}/nope")).await?;
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
        assert_eq!(missing.text().await?, "[404] NOT FOUND");

        server.abort();
        Ok(())
    }
}
