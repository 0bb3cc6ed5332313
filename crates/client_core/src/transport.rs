use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{
    domain::{DeviceId, DeviceSummary},
    error::CloudErrorBody,
    protocol::{FunctionCall, FunctionResponse, VariableResponse},
};
use tracing::debug;
use url::Url;

use crate::{error::ClientError, types::AccessToken};

pub const DEFAULT_API_BASE_URL: &str = "https://api.particle.io";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Raw calls against the device cloud. One HTTP request per call, no retries.
#[async_trait]
pub trait DeviceTransport: Send + Sync {
    async fn list_devices(&self, token: &AccessToken) -> Result<Vec<DeviceSummary>, ClientError>;

    /// Returns the `result` member of the variable response.
    async fn read_variable(
        &self,
        token: &AccessToken,
        device: &DeviceId,
        variable: &str,
    ) -> Result<Value, ClientError>;

    /// Returns the function's `return_value`.
    async fn invoke_function(
        &self,
        token: &AccessToken,
        device: &DeviceId,
        function: &str,
        argument: &str,
    ) -> Result<i64, ClientError>;
}

pub struct CloudClient {
    http: Client,
    base_url: Url,
}

impl CloudClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("invalid device cloud url: {base_url}"))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("device cloud url cannot carry a path: {base_url}");
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(["v1", "devices"]).extend(segments);
        }
        url
    }
}

#[async_trait]
impl DeviceTransport for CloudClient {
    async fn list_devices(&self, token: &AccessToken) -> Result<Vec<DeviceSummary>, ClientError> {
        let url = self.endpoint(&[]);
        debug!("cloud: GET {url}");
        let response = self
            .http
            .get(url)
            .query(&[("access_token", token.as_str())])
            .send()
            .await?;
        decode_response(response).await
    }

    async fn read_variable(
        &self,
        token: &AccessToken,
        device: &DeviceId,
        variable: &str,
    ) -> Result<Value, ClientError> {
        let url = self.endpoint(&[device.as_str(), variable]);
        debug!("cloud: GET {url}");
        let response = self
            .http
            .get(url)
            .query(&[("access_token", token.as_str())])
            .send()
            .await?;
        let body: VariableResponse = decode_response(response).await?;
        Ok(body.result)
    }

    async fn invoke_function(
        &self,
        token: &AccessToken,
        device: &DeviceId,
        function: &str,
        argument: &str,
    ) -> Result<i64, ClientError> {
        let url = self.endpoint(&[device.as_str(), function]);
        debug!("cloud: POST {url} args={argument}");
        // `form` sets the content type to exactly application/x-www-form-urlencoded
        let response = self
            .http
            .post(url)
            .form(&FunctionCall {
                access_token: token.as_str().to_string(),
                args: argument.to_string(),
            })
            .send()
            .await?;
        let body: FunctionResponse = decode_response(response).await?;
        Ok(body.return_value)
    }
}

async fn decode_response<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    let bytes = response.bytes().await?;
    if !status.is_success() {
        let body: CloudErrorBody = serde_json::from_slice(&bytes).unwrap_or_default();
        return Err(ClientError::remote(status.as_u16(), &body));
    }
    serde_json::from_slice(&bytes).map_err(|err| ClientError::Decode(err.to_string()))
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
