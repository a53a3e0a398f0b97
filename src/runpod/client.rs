//! `RunPod` API client implementation.
//!
//! This module provides the HTTP client for the `RunPod` GraphQL API.

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::error::{KeeperError, Result, RunPodError};

use super::api::PodApi;
use super::types::{CreatePodRequest, Pod};

/// `RunPod` API endpoint.
pub const RUNPOD_API_URL: &str = "https://api.runpod.io/graphql";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default number of retries for transient failures.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Upper bound on a rate-limit wait.
const MAX_RATE_LIMIT_WAIT_SECS: u64 = 30;

/// Fields requested for every pod.
const POD_FIELDS: &str = r"
    id
    name
    desiredStatus
    imageName
    costPerHr
    gpuCount
    volumeInGb
    containerDiskInGb
    machine {
        gpuTypeId
        podHostId
    }
    runtime {
        uptimeInSeconds
        ports {
            ip
            isIpPublic
            privatePort
            publicPort
            type
        }
    }
";

/// Provider messages meaning "no capacity for this GPU type".
const CAPACITY_MARKERS: &[&str] = &[
    "no longer any instances available",
    "no instances",
    "not available",
    "insufficient",
    "could not find any pods with required specifications",
];

/// `RunPod` API client.
#[derive(Debug, Clone)]
pub struct RunPodClient {
    /// HTTP client.
    client: Client,
    /// API key.
    api_key: String,
    /// GraphQL endpoint.
    base_url: String,
    /// Retries for rate-limited or network-failed requests.
    max_retries: u32,
}

/// GraphQL request structure.
#[derive(Debug, Serialize)]
struct GraphQLRequest {
    query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<serde_json::Value>,
}

/// GraphQL response structure.
#[derive(Debug, Deserialize)]
struct GraphQLResponse<T> {
    data: Option<T>,
    errors: Option<Vec<GraphQLError>>,
}

/// GraphQL error structure.
#[derive(Debug, Deserialize)]
struct GraphQLError {
    message: String,
}

impl RunPodClient {
    /// Creates a new `RunPod` API client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_key: &str) -> Result<Self> {
        Self::with_timeout(api_key, DEFAULT_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(api_key: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RunPodError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            base_url: RUNPOD_API_URL.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// Points the client at another GraphQL endpoint.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Sets the retry count; zero disables retries.
    #[must_use]
    pub const fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Executes a GraphQL query.
    async fn execute<T: for<'de> Deserialize<'de>>(
        &self,
        query: &str,
        variables: Option<serde_json::Value>,
    ) -> Result<T> {
        let request = GraphQLRequest {
            query: query.to_string(),
            variables,
        };

        let mut attempt = 0;
        loop {
            match self.execute_once::<T>(&request).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = match e.retry_delay_secs() {
                        Some(secs) if secs > 1 => {
                            Duration::from_secs(secs.min(MAX_RATE_LIMIT_WAIT_SECS))
                        }
                        _ => Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt)),
                    };
                    warn!("RunPod request failed ({e}), retry {attempt}/{} in {delay:?}", self.max_retries);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Executes a single GraphQL request.
    async fn execute_once<T: for<'de> Deserialize<'de>>(
        &self,
        request: &GraphQLRequest,
    ) -> Result<T> {
        trace!("Executing GraphQL query: {}", request.query);

        let response = self
            .client
            .post(&self.base_url)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .json(request)
            .send()
            .await
            .map_err(|e| RunPodError::network(format!("Request failed: {e}")))?;

        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(60);

            return Err(KeeperError::RunPod(RunPodError::RateLimited {
                retry_after_secs: retry_after,
            }));
        }

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(KeeperError::RunPod(RunPodError::AuthenticationFailed {
                message: String::from("Invalid API key"),
            }));
        }

        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(RunPodError::network(format!("Server error {status}: {body}")).into());
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RunPodError::api_error(status.as_u16(), body).into());
        }

        let gql_response: GraphQLResponse<T> = response.json().await.map_err(|e| {
            KeeperError::RunPod(RunPodError::InvalidResponse {
                message: format!("Failed to parse response: {e}"),
            })
        })?;

        if let Some(errors) = gql_response.errors.filter(|e| !e.is_empty()) {
            let message = errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(RunPodError::api_error(400, message).into());
        }

        gql_response.data.ok_or_else(|| {
            KeeperError::RunPod(RunPodError::InvalidResponse {
                message: String::from("No data in response"),
            })
        })
    }
}

/// Maps a "not found" API message onto `PodNotFound`.
fn pod_not_found(err: KeeperError, pod_id: &str) -> KeeperError {
    match err {
        KeeperError::RunPod(RunPodError::ApiRequestFailed { ref message, .. })
            if message.to_lowercase().contains("not found") =>
        {
            RunPodError::PodNotFound {
                pod_id: pod_id.to_string(),
            }
            .into()
        }
        other => other,
    }
}

/// Maps a capacity rejection onto `GpuNotAvailable`.
fn capacity_rejection(err: KeeperError, gpu_type: &str) -> KeeperError {
    match err {
        KeeperError::RunPod(RunPodError::ApiRequestFailed { message, status }) => {
            let lower = message.to_lowercase();
            if CAPACITY_MARKERS.iter().any(|m| lower.contains(m)) {
                RunPodError::GpuNotAvailable {
                    gpu_type: gpu_type.to_string(),
                    message,
                }
                .into()
            } else {
                RunPodError::ApiRequestFailed { status, message }.into()
            }
        }
        other => other,
    }
}

#[async_trait]
impl PodApi for RunPodClient {
    async fn list_pods(&self) -> Result<Vec<Pod>> {
        #[derive(Deserialize)]
        struct Response {
            myself: MyselfResponse,
        }
        #[derive(Deserialize)]
        struct MyselfResponse {
            #[serde(default)]
            pods: Vec<Pod>,
        }

        let query = format!("query Pods {{ myself {{ pods {{ {POD_FIELDS} }} }} }}");

        let response: Response = self.execute(&query, None).await?;
        debug!("Listed {} pods", response.myself.pods.len());
        Ok(response.myself.pods)
    }

    async fn get_pod(&self, pod_id: &str) -> Result<Pod> {
        #[derive(Deserialize)]
        struct Response {
            pod: Option<Pod>,
        }

        let query = format!(
            "query Pod($podId: String!) {{ pod(input: {{ podId: $podId }}) {{ {POD_FIELDS} }} }}"
        );

        let variables = serde_json::json!({ "podId": pod_id });
        let response: Response = self
            .execute(&query, Some(variables))
            .await
            .map_err(|e| pod_not_found(e, pod_id))?;

        match response.pod {
            Some(pod) if pod.desired_status != super::types::PodStatus::Terminated => Ok(pod),
            _ => Err(RunPodError::PodNotFound {
                pod_id: pod_id.to_string(),
            }
            .into()),
        }
    }

    async fn create_pod(&self, request: &CreatePodRequest) -> Result<Pod> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(rename = "podFindAndDeployOnDemand")]
            pod: Option<Pod>,
        }

        let query = format!(
            "mutation CreatePod($input: PodFindAndDeployOnDemandInput!) {{ \
             podFindAndDeployOnDemand(input: $input) {{ {POD_FIELDS} }} }}"
        );

        let input = serde_json::to_value(request).map_err(|e| {
            KeeperError::RunPod(RunPodError::InvalidResponse {
                message: format!("Failed to encode create request: {e}"),
            })
        })?;

        let variables = serde_json::json!({ "input": input });
        let response: Response = self
            .execute(&query, Some(variables))
            .await
            .map_err(|e| capacity_rejection(e, &request.gpu_type_id))?;

        // A null pod without an error is how the provider reports no capacity.
        response.pod.ok_or_else(|| {
            RunPodError::GpuNotAvailable {
                gpu_type: request.gpu_type_id.clone(),
                message: String::from("provider returned no pod"),
            }
            .into()
        })
    }

    async fn stop_pod(&self, pod_id: &str) -> Result<()> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(rename = "podStop")]
            _pod: Option<serde_json::Value>,
        }

        let query = r"
            mutation StopPod($podId: String!) {
                podStop(input: { podId: $podId }) {
                    id
                    desiredStatus
                }
            }
        ";

        let variables = serde_json::json!({ "podId": pod_id });
        let _: Response = self
            .execute(query, Some(variables))
            .await
            .map_err(|e| pod_not_found(e, pod_id))?;

        Ok(())
    }

    async fn resume_pod(&self, pod_id: &str) -> Result<Pod> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(rename = "podResume")]
            pod: Option<Pod>,
        }

        let query = format!(
            "mutation ResumePod($podId: String!) {{ \
             podResume(input: {{ podId: $podId, gpuCount: 1 }}) {{ {POD_FIELDS} }} }}"
        );

        let variables = serde_json::json!({ "podId": pod_id });
        let response: Response = self
            .execute(&query, Some(variables))
            .await
            .map_err(|e| pod_not_found(e, pod_id))?;

        response.pod.ok_or_else(|| {
            RunPodError::InvalidResponse {
                message: format!("Resume of {pod_id} returned no pod"),
            }
            .into()
        })
    }

    async fn terminate_pod(&self, pod_id: &str) -> Result<()> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(rename = "podTerminate")]
            _result: Option<serde_json::Value>,
        }

        let query = r"
            mutation TerminatePod($podId: String!) {
                podTerminate(input: { podId: $podId })
            }
        ";

        let variables = serde_json::json!({ "podId": pod_id });
        let _: Response = self
            .execute(query, Some(variables))
            .await
            .map_err(|e| pod_not_found(e, pod_id))?;

        Ok(())
    }
}
