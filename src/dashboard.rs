//! ==============================================================================
//! dashboard.rs - web view of the device display
//! ==============================================================================
//!
//! the three screens of the device (status, measurements, recommendations)
//! rendered from the UiStore. read-only: nothing here writes device state.
//!
//! routes:
//!     GET /      html page with all three screens
//!     GET /api   UiState as json
//!
//! ==============================================================================

use crate::ui::{UiState, UiStore};

use anyhow::Result;
use axum::{
    extract::State,
    response::{Html, Json},
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;

pub fn router(store: UiStore) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/api", get(api_handler))
        .layer(CorsLayer::permissive())
        .with_state(store)
}

pub async fn run_server(store: UiStore, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("[DASHBOARD] live at http://{}", listener.local_addr()?);
    axum::serve(listener, router(store)).await?;
    Ok(())
}

async fn dashboard_handler(State(store): State<UiStore>) -> Html<String> {
    Html(render(&store.snapshot().await))
}

async fn api_handler(State(store): State<UiStore>) -> Json<UiState> {
    Json(store.snapshot().await)
}

pub fn render(state: &UiState) -> String {
    let measurements = match &state.measurements {
        Some(m) => format!(
            r#"<table>
      <tr><td>Temperature</td><td>{:.1} &deg;F</td></tr>
      <tr><td>Noise level</td><td>{}</td></tr>
      <tr><td>Light intensity</td><td>{}</td></tr>
      <tr><td>TVOC</td><td>{} ppb</td></tr>
      <tr><td>eCO2</td><td>{} ppm</td></tr>
    </table>"#,
            m.temperature, m.noise_level, m.light_intensity, m.tvoc, m.eco2
        ),
        None => "<p class=\"dim\">waiting for first reading...</p>".to_string(),
    };

    format!(
        r#"<!doctype html>
<html>
<head>
  <title>Healthy Home Office</title>
  <meta http-equiv="refresh" content="2">
  <style>
    body {{ font-family: system-ui; padding: 2rem; background: #1a1a2e; color: #eee; }}
    section {{ background: #16213e; padding: 1rem; border-radius: 8px; margin-bottom: 1rem; }}
    pre {{ white-space: pre-wrap; }}
    .dim {{ color: #888; }}
    .badge {{ color: #ff6b6b; font-weight: bold; }}
  </style>
</head>
<body>
  <section id="status">
    <h2>Status</h2>
    <pre>{}</pre>
  </section>
  <section id="measurements">
    <h2>Measurements</h2>
    {}
  </section>
  <section id="recommendations">
    <h2>Recommendations <span class="badge">{}</span></h2>
    <pre>{}</pre>
  </section>
</body>
</html>"#,
        html_escape(&state.status),
        measurements,
        html_escape(&state.notification_badge),
        html_escape(&state.notifications),
    )
}

/// escape html special characters to prevent xss
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
