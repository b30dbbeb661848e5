// Pinning-service publisher (Pinata `pinFileToIPFS` API)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use super::{ContentPublisher, PublishError, PublishResult};
use crate::batch::artifact::BatchArtifact;
use crate::batch::types::Cid;
use crate::config::StoreSettings;

const CID_FIELD: &str = "IpfsHash";
const CID_VERSION: u8 = 1;

pub struct PinataPublisher {
    pub endpoint: String,
    api_key: Option<String>,
    api_secret: Option<String>,
    client: reqwest::Client,
}

impl PinataPublisher {
    pub fn new(settings: &StoreSettings) -> PublishResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;
        Ok(Self::with_client(settings, client))
    }

    pub fn with_client(settings: &StoreSettings, client: reqwest::Client) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            api_key: non_empty(settings.api_key.as_deref()),
            api_secret: non_empty(settings.api_secret.as_deref()),
            client,
        }
    }

    fn credentials(&self) -> PublishResult<(&str, &str)> {
        match (self.api_key.as_deref(), self.api_secret.as_deref()) {
            (Some(key), Some(secret)) => Ok((key, secret)),
            _ => Err(PublishError::MissingCredentials),
        }
    }

    fn form(artifact: &BatchArtifact) -> PublishResult<Form> {
        let file = Part::bytes(artifact.bytes.clone())
            .file_name(artifact.name.clone())
            .mime_str("application/json")?;
        Ok(Form::new()
            .part("file", file)
            .text("pinataMetadata", json!({ "name": artifact.name }).to_string())
            .text("pinataOptions", json!({ "cidVersion": CID_VERSION }).to_string()))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

/// Pulls the identifier out of a pinning response body.
pub fn cid_from_response(body: &str) -> PublishResult<Cid> {
    let value: Value = serde_json::from_str(body).map_err(|e| PublishError::Decode(e.to_string()))?;
    value
        .get(CID_FIELD)
        .and_then(Value::as_str)
        .and_then(Cid::new)
        .ok_or(PublishError::MissingIdentifier(CID_FIELD))
}

#[async_trait]
impl ContentPublisher for PinataPublisher {
    #[instrument(skip(self, artifact), fields(artifact = %artifact.name, bytes = artifact.bytes.len()))]
    async fn publish(&self, artifact: &BatchArtifact) -> PublishResult<Cid> {
        let (key, secret) = self.credentials()?;

        debug!(endpoint = %self.endpoint, "Uploading batch to content store");
        let response = self
            .client
            .post(&self.endpoint)
            .header("pinata_api_key", key)
            .header("pinata_secret_api_key", secret)
            .multipart(Self::form(artifact)?)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            warn!(status = status.as_u16(), "Content store rejected upload");
            return Err(PublishError::Rejected { status: status.as_u16(), body });
        }

        let cid = cid_from_response(&body)?;
        info!(cid = %cid, "Batch pinned");
        Ok(cid)
    }
}
