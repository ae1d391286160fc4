// volboot-core/src/inference.rs
//! Client for the inference server's job API: submit a job graph, poll its
//! history entry, fetch generated images.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};
use uuid::Uuid;
use volboot_common::error::{BootError, Result};

/// Form parameters substituted into a job graph template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default = "default_side")]
    pub width: u32,
    #[serde(default = "default_side")]
    pub height: u32,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default)]
    pub seed: u64,
}

fn default_side() -> u32 {
    1024
}

fn default_steps() -> u32 {
    20
}

impl JobParams {
    /// Fills `{{prompt}}`, `{{negative_prompt}}`, `{{width}}`, `{{height}}`,
    /// `{{steps}}` and `{{seed}}` in a JSON template. Text values are JSON
    /// escaped, so the template places them inside quotes.
    pub fn render(&self, template: &str) -> Result<Value> {
        let rendered = template
            .replace("{{prompt}}", &escape_json(&self.prompt)?)
            .replace("{{negative_prompt}}", &escape_json(&self.negative_prompt)?)
            .replace("{{width}}", &self.width.to_string())
            .replace("{{height}}", &self.height.to_string())
            .replace("{{steps}}", &self.steps.to_string())
            .replace("{{seed}}", &self.seed.to_string());
        serde_json::from_str(&rendered).map_err(|e| {
            BootError::ValidationError(format!("workflow template is not valid JSON: {e}"))
        })
    }
}

fn escape_json(text: &str) -> Result<String> {
    let quoted = serde_json::to_string(text)?;
    Ok(quoted[1..quoted.len() - 1].to_string())
}

/// One generated artifact as listed in a job's history entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputImage {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default = "default_output_type")]
    pub kind: String,
}

fn default_output_type() -> String {
    "output".to_string()
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    prompt_id: String,
}

#[derive(Debug, Clone)]
pub struct InferenceClient {
    client: Client,
    base_url: String,
    client_id: Uuid,
}

impl InferenceClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BootError::Generic(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: Uuid::new_v4(),
        })
    }

    /// Queues a job graph and returns its id.
    pub async fn submit(&self, workflow: &Value) -> Result<String> {
        let url = format!("{}/prompt", self.base_url);
        let body = json!({ "prompt": workflow, "client_id": self.client_id.to_string() });
        let response = self.client.post(&url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BootError::Api(format!("job submission rejected ({status}): {text}")));
        }
        let parsed: SubmitResponse = response.json().await?;
        debug!("Submitted job {}", parsed.prompt_id);
        Ok(parsed.prompt_id)
    }

    /// The job's history entry, or `None` while it is still queued/running.
    pub async fn history(&self, job_id: &str) -> Result<Option<Value>> {
        let url = format!("{}/history/{}", self.base_url, job_id);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BootError::Api(format!("history lookup for {job_id} failed ({status})")));
        }
        let mut body: Value = response.json().await?;
        Ok(body.get_mut(job_id).map(Value::take))
    }

    /// Polls until the job has outputs or `timeout` passes.
    pub async fn wait_for_outputs(
        &self,
        job_id: &str,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Vec<OutputImage>> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.history(job_id).await {
                Ok(Some(entry)) => {
                    if let Some(message) = failed_status(&entry) {
                        return Err(BootError::Api(format!("job {job_id} failed: {message}")));
                    }
                    let images = output_images(&entry);
                    if !images.is_empty() {
                        return Ok(images);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Polling job {} failed: {}", job_id, e),
            }
            if Instant::now() + poll_interval > deadline {
                return Err(BootError::Api(format!(
                    "job {job_id} did not finish within {}",
                    humantime::format_duration(timeout)
                )));
            }
            sleep(poll_interval).await;
        }
    }

    /// Raw bytes of a generated artifact.
    pub async fn view(&self, image: &OutputImage) -> Result<Vec<u8>> {
        let url = format!("{}/view", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("filename", image.filename.as_str()),
                ("subfolder", image.subfolder.as_str()),
                ("type", image.kind.as_str()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(BootError::Api(format!(
                "fetching {} failed ({status})",
                image.filename
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

fn failed_status(entry: &Value) -> Option<String> {
    let status = entry.get("status")?;
    if status.get("status_str").and_then(Value::as_str) == Some("error") {
        return Some(
            status
                .get("messages")
                .map(|m| m.to_string())
                .unwrap_or_else(|| "error".to_string()),
        );
    }
    None
}

/// Images across all output nodes, ordered by node id.
pub fn output_images(entry: &Value) -> Vec<OutputImage> {
    let Some(outputs) = entry.get("outputs").and_then(Value::as_object) else {
        return Vec::new();
    };
    let mut nodes: Vec<(&String, &Value)> = outputs.iter().collect();
    nodes.sort_by(|a, b| a.0.cmp(b.0));
    nodes
        .into_iter()
        .filter_map(|(_, node)| node.get("images").and_then(Value::as_array))
        .flatten()
        .filter_map(|image| serde_json::from_value(image.clone()).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use httpmock::Method::{GET, POST};
    use httpmock::MockServer;

    use super::*;

    const TEMPLATE: &str = r#"{
        "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "{{prompt}}"}},
        "7": {"class_type": "CLIPTextEncode", "inputs": {"text": "{{negative_prompt}}"}},
        "5": {"class_type": "EmptyLatentImage", "inputs": {"width": {{width}}, "height": {{height}}}},
        "3": {"class_type": "KSampler", "inputs": {"steps": {{steps}}, "seed": {{seed}}}}
    }"#;

    fn params() -> JobParams {
        JobParams {
            prompt: "a \"quoted\" cat\non two lines".into(),
            negative_prompt: String::new(),
            width: 512,
            height: 768,
            steps: 4,
            seed: 42,
        }
    }

    #[test]
    fn renders_template_with_escaping() {
        let graph = params().render(TEMPLATE).unwrap();
        assert_eq!(graph["6"]["inputs"]["text"], "a \"quoted\" cat\non two lines");
        assert_eq!(graph["5"]["inputs"]["height"], 768);
        assert_eq!(graph["3"]["inputs"]["seed"], 42);
    }

    #[test]
    fn broken_template_is_rejected() {
        assert!(matches!(
            params().render("{ not json"),
            Err(BootError::ValidationError(_))
        ));
    }

    #[tokio::test]
    async fn submit_poll_and_view() {
        let server = MockServer::start_async().await;
        let submit = server
            .mock_async(|when, then| {
                when.method(POST).path("/prompt");
                then.status(200)
                    .json_body(json!({ "prompt_id": "job-1", "number": 0 }));
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/history/job-1");
                then.status(200).json_body(json!({
                    "job-1": {
                        "status": { "status_str": "success", "completed": true },
                        "outputs": {
                            "9": { "images": [
                                { "filename": "out_0001.png", "subfolder": "", "type": "output" }
                            ]}
                        }
                    }
                }));
            })
            .await;
        let view = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/view")
                    .query_param("filename", "out_0001.png")
                    .query_param("type", "output");
                then.status(200).body(b"\x89PNG".to_vec());
            })
            .await;

        let client = InferenceClient::new(server.base_url()).unwrap();
        let graph = params().render(TEMPLATE).unwrap();
        let job = client.submit(&graph).await.unwrap();
        assert_eq!(job, "job-1");

        let images = client
            .wait_for_outputs(&job, Duration::from_secs(5), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(client.view(&images[0]).await.unwrap(), b"\x89PNG");
        assert_eq!(submit.hits_async().await, 1);
        assert_eq!(view.hits_async().await, 1);
    }

    #[tokio::test]
    async fn unfinished_job_times_out() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/history/slow");
                then.status(200).json_body(json!({}));
            })
            .await;
        let client = InferenceClient::new(server.base_url()).unwrap();

        let err = client
            .wait_for_outputs("slow", Duration::from_millis(50), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, BootError::Api(_)));
    }
}
