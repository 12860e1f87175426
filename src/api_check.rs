// Cloud API key validators.
//
// Pure request/response collaborators: no shared state with the protocol
// engine. The wizard calls these before the keys are ever sent to the device,
// so a typo fails fast on the host instead of silently on the gadget.

use std::time::Duration;

use async_trait::async_trait;

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[async_trait]
pub trait KeyValidator: Send + Sync {
    async fn test_openai_key(&self, key: &str) -> Result<(), String>;
    async fn test_azure_speech(
        &self,
        key: &str,
        region: &str,
        subdomain: &str,
    ) -> Result<(), String>;
}

pub struct HttpKeyValidator {
    client: reqwest::Client,
}

impl HttpKeyValidator {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpKeyValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValidator for HttpKeyValidator {
    /// A key is valid when the models listing accepts it.
    async fn test_openai_key(&self, key: &str) -> Result<(), String> {
        let resp = self
            .client
            .get("https://api.openai.com/v1/models")
            .bearer_auth(key)
            .send()
            .await
            .map_err(|e| format!("OpenAI request failed: {}", e))?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            reqwest::StatusCode::UNAUTHORIZED => Err("OpenAI rejected the key (401)".to_string()),
            s => Err(format!("OpenAI returned {}", s)),
        }
    }

    /// Azure Speech keys validate against the token endpoint. Custom
    /// subdomains (required for some voices) use their own host.
    async fn test_azure_speech(
        &self,
        key: &str,
        region: &str,
        subdomain: &str,
    ) -> Result<(), String> {
        let url = if subdomain.is_empty() {
            format!(
                "https://{}.api.cognitive.microsoft.com/sts/v1.0/issueToken",
                region
            )
        } else {
            format!(
                "https://{}.cognitiveservices.azure.com/sts/v1.0/issueToken",
                subdomain
            )
        };

        let resp = self
            .client
            .post(&url)
            .header("Ocp-Apim-Subscription-Key", key)
            .header("Content-Length", "0")
            .send()
            .await
            .map_err(|e| format!("Azure request failed: {}", e))?;

        match resp.status() {
            s if s.is_success() => Ok(()),
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                Err("Azure rejected the key".to_string())
            }
            s => Err(format!("Azure returned {}", s)),
        }
    }
}
