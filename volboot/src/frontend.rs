// volboot/src/frontend.rs
//! Minimal prompt form in front of the inference server: fill the workflow
//! template, run the job, hand back the first image.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use tracing::{error, info};
use volboot_common::config::Config;
use volboot_common::error::{BootError, Result};
use volboot_core::{InferenceClient, JobParams};

const FORM_PAGE: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>volboot</title></head>
<body>
<form method="post" action="/generate">
  <p><label>Prompt<br><textarea name="prompt" rows="4" cols="60" required></textarea></label></p>
  <p><label>Negative prompt<br><textarea name="negative_prompt" rows="2" cols="60"></textarea></label></p>
  <p>
    <label>Width <input name="width" type="number" value="1024" min="64" step="8"></label>
    <label>Height <input name="height" type="number" value="1024" min="64" step="8"></label>
  </p>
  <p>
    <label>Steps <input name="steps" type="number" value="20" min="1"></label>
    <label>Seed <input name="seed" type="number" value="0" min="0"></label>
  </p>
  <p><button type="submit">Generate</button></p>
</form>
</body>
</html>
"#;

pub struct FrontendState {
    client: InferenceClient,
    template: String,
    job_timeout: Duration,
    poll_interval: Duration,
}

impl FrontendState {
    pub fn new(client: InferenceClient, template: String) -> Self {
        Self {
            client,
            template,
            job_timeout: Duration::from_secs(180),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_timing(mut self, job_timeout: Duration, poll_interval: Duration) -> Self {
        self.job_timeout = job_timeout;
        self.poll_interval = poll_interval;
        self
    }

    /// Reads the workflow template named in `[frontend]` and points the
    /// client at the local server.
    pub fn from_config(config: &Config) -> Result<Self> {
        let path = config.frontend.workflow_template.as_ref().ok_or_else(|| {
            BootError::Config("frontend.workflow_template is not set".to_string())
        })?;
        let template = std::fs::read_to_string(path).map_err(|e| {
            BootError::Config(format!(
                "Cannot read workflow template {}: {}",
                path.display(),
                e
            ))
        })?;
        let client = InferenceClient::new(config.server.local_base_url())?;
        Ok(Self::new(client, template).with_timing(
            Duration::from_secs(config.frontend.job_timeout_secs),
            Duration::from_millis(config.frontend.poll_interval_ms),
        ))
    }
}

pub fn router(state: Arc<FrontendState>) -> Router {
    Router::new()
        .route("/", get(form_page))
        .route("/generate", post(generate))
        .route("/healthz", get(healthz))
        .with_state(state)
}

/// Binds `[frontend].host:port` and serves until `shutdown` resolves.
pub async fn serve<F>(config: &Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let state = Arc::new(FrontendState::from_config(config)?);
    let addr = format!("{}:{}", config.frontend.host, config.frontend.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| BootError::Config(format!("Cannot bind front end to {addr}: {e}")))?;
    info!("Front end listening on http://{}", addr);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

async fn form_page() -> Html<&'static str> {
    Html(FORM_PAGE)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn generate(
    State(state): State<Arc<FrontendState>>,
    Form(params): Form<JobParams>,
) -> std::result::Result<Response, FrontendError> {
    let workflow = params.render(&state.template)?;
    let job_id = state.client.submit(&workflow).await?;
    info!("Job {} queued ({}x{}, {} steps)", job_id, params.width, params.height, params.steps);

    let images = state
        .client
        .wait_for_outputs(&job_id, state.job_timeout, state.poll_interval)
        .await?;
    let first = images
        .first()
        .ok_or_else(|| BootError::Api(format!("job {job_id} produced no images")))?;
    let bytes = state.client.view(first).await?;
    Ok(([(CONTENT_TYPE, "image/png")], bytes).into_response())
}

/// Upstream failures surface as 502, everything else as 500.
struct FrontendError(BootError);

impl From<BootError> for FrontendError {
    fn from(err: BootError) -> Self {
        Self(err)
    }
}

impl IntoResponse for FrontendError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BootError::Api(_) | BootError::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        error!("Generation failed: {}", self.0);
        (status, self.0.to_string()).into_response()
    }
}
