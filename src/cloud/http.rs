//! HTTP implementation of the capability traits against the Power Virtual
//! Server REST API
//!
//! Requests authenticate with an IAM bearer token obtained from the API key
//! and scoped to the workspace through the `CRN` header. Tokens are cached
//! and refreshed shortly before they expire; the account id is looked up
//! from the API key once when it is not configured.

use super::client::{DhcpApi, ImageApi, InstanceApi, JobApi, NetworkApi};
use super::error::ApiError;
use super::types::{
    CosImageImport, DhcpServer, DhcpServerCreate, DhcpServerDetail, Image, ImageCreate,
    ImageReference, Images, InstanceAction, InstanceCapture, InstanceCreate, Job, JobReference,
    Network, NetworkCreate, PvmInstance,
};
use crate::config::{BuildConfig, Secret};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

const DEFAULT_IAM_ENDPOINT: &str = "https://iam.cloud.ibm.com";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const APIKEY_GRANT_TYPE: &str = "urn:ibm:params:oauth:grant-type:apikey";
/// Refresh tokens this long before the service would reject them
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Deserialize)]
struct IamToken {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Deserialize)]
struct ApiKeyDetails {
    account_id: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::seconds(TOKEN_REFRESH_MARGIN_SECS) < self.expires_at
    }
}

/// Power Virtual Server client for one workspace
pub struct PowerVsClient {
    http: Client,
    endpoint: String,
    iam_endpoint: String,
    api_key: Secret,
    zone: String,
    service_instance_id: String,
    account_id: Mutex<Option<String>>,
    token: Mutex<Option<CachedToken>>,
}

impl PowerVsClient {
    pub fn new(config: &BuildConfig) -> Result<Self, ApiError> {
        Self::with_timeout(config, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(config: &BuildConfig, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: config.endpoint_url(),
            iam_endpoint: config
                .access
                .iam_endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_IAM_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key: config.access.api_key.clone(),
            zone: config.access.zone.clone(),
            service_instance_id: config.access.service_instance_id.clone(),
            account_id: Mutex::new(config.access.account_id.clone()),
            token: Mutex::new(None),
        })
    }

    fn v1(&self, path: &str) -> String {
        format!(
            "{}/pcloud/v1/cloud-instances/{}/{}",
            self.endpoint, self.service_instance_id, path
        )
    }

    fn v2(&self, path: &str) -> String {
        format!(
            "{}/pcloud/v2/cloud-instances/{}/{}",
            self.endpoint, self.service_instance_id, path
        )
    }

    fn crn(&self, account_id: &str) -> String {
        format!(
            "crn:v1:bluemix:public:power-iaas:{}:a/{}:{}::",
            self.zone, account_id, self.service_instance_id
        )
    }

    async fn token(&self) -> Result<String, ApiError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|token| token.is_fresh(Utc::now())) {
            return Ok(token.access_token.clone());
        }

        debug!("Requesting IAM token");
        let response = self
            .http
            .post(format!("{}/identity/token", self.iam_endpoint))
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", APIKEY_GRANT_TYPE),
                ("apikey", self.api_key.expose()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Auth(format!(
                "IAM token request failed ({}): {}",
                status,
                error_message(&body)
            )));
        }

        let token: IamToken = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;
        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Utc::now() + ChronoDuration::seconds(token.expires_in),
        });
        Ok(access_token)
    }

    async fn account_id(&self, token: &str) -> Result<String, ApiError> {
        let mut account = self.account_id.lock().await;
        if let Some(id) = account.as_ref() {
            return Ok(id.clone());
        }

        debug!("Looking up the account owning the API key");
        let response = self
            .http
            .get(format!("{}/v1/apikeys/details", self.iam_endpoint))
            .bearer_auth(token)
            .header("IAM-ApiKey", self.api_key.expose())
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Auth(format!(
                "could not retrieve the account id ({}): {}",
                status,
                error_message(&body)
            )));
        }
        let details: ApiKeyDetails = response
            .json()
            .await
            .map_err(|e| ApiError::Decode(e.to_string()))?;

        *account = Some(details.account_id.clone());
        Ok(details.account_id)
    }

    async fn request(&self, method: Method, url: String) -> Result<RequestBuilder, ApiError> {
        let token = self.token().await?;
        let account_id = self.account_id(&token).await?;
        debug!("{} {}", method, url);
        Ok(self
            .http
            .request(method, url)
            .bearer_auth(token)
            .header("CRN", self.crn(&account_id))
            .header("Accept", "application/json"))
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        resource: &'static str,
        id: &str,
    ) -> Result<T, ApiError> {
        let response = check(builder.send().await?, resource, id).await?;
        response
            .json()
            .await
            .map_err(|e| ApiError::Decode(format!("{} {}: {}", resource, id, e)))
    }

    async fn execute(
        &self,
        builder: RequestBuilder,
        resource: &'static str,
        id: &str,
    ) -> Result<(), ApiError> {
        check(builder.send().await?, resource, id).await?;
        Ok(())
    }
}

impl std::fmt::Debug for PowerVsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerVsClient")
            .field("endpoint", &self.endpoint)
            .field("zone", &self.zone)
            .field("service_instance_id", &self.service_instance_id)
            .finish_non_exhaustive()
    }
}

async fn check(response: Response, resource: &'static str, id: &str) -> Result<Response, ApiError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(ApiError::not_found(resource, id));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ApiError::Status {
            status: status.as_u16(),
            message: error_message(&body),
        });
    }
    Ok(response)
}

/// Extracts the human-readable part of an error body
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        description: Option<String>,
        message: Option<String>,
        error: Option<String>,
        #[serde(rename = "errorMessage")]
        error_message: Option<String>,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed
            .description
            .or(parsed.message)
            .or(parsed.error_message)
            .or(parsed.error)
            .unwrap_or_else(|| body.trim().to_string()),
        Err(_) => body.trim().to_string(),
    }
}

#[async_trait]
impl NetworkApi for PowerVsClient {
    async fn create_network(&self, body: &NetworkCreate) -> Result<Network, ApiError> {
        let builder = self.request(Method::POST, self.v1("networks")).await?;
        self.fetch(builder.json(body), "network", "new").await
    }

    async fn get_network(&self, id: &str) -> Result<Network, ApiError> {
        let builder = self
            .request(Method::GET, self.v1(&format!("networks/{}", id)))
            .await?;
        self.fetch(builder, "network", id).await
    }

    async fn delete_network(&self, id: &str) -> Result<(), ApiError> {
        let builder = self
            .request(Method::DELETE, self.v1(&format!("networks/{}", id)))
            .await?;
        self.execute(builder, "network", id).await
    }
}

#[async_trait]
impl InstanceApi for PowerVsClient {
    async fn create_instance(&self, body: &InstanceCreate) -> Result<Vec<PvmInstance>, ApiError> {
        let builder = self.request(Method::POST, self.v1("pvm-instances")).await?;
        self.fetch(builder.json(body), "instance", &body.server_name)
            .await
    }

    async fn get_instance(&self, id: &str) -> Result<PvmInstance, ApiError> {
        let builder = self
            .request(Method::GET, self.v1(&format!("pvm-instances/{}", id)))
            .await?;
        self.fetch(builder, "instance", id).await
    }

    async fn delete_instance(&self, id: &str) -> Result<(), ApiError> {
        let builder = self
            .request(Method::DELETE, self.v1(&format!("pvm-instances/{}", id)))
            .await?;
        self.execute(builder, "instance", id).await
    }

    async fn instance_action(&self, id: &str, body: &InstanceAction) -> Result<(), ApiError> {
        let builder = self
            .request(
                Method::POST,
                self.v1(&format!("pvm-instances/{}/action", id)),
            )
            .await?;
        self.execute(builder.json(body), "instance", id).await
    }

    async fn capture_instance(
        &self,
        id: &str,
        body: &InstanceCapture,
    ) -> Result<JobReference, ApiError> {
        let builder = self
            .request(
                Method::POST,
                self.v2(&format!("pvm-instances/{}/capture", id)),
            )
            .await?;
        self.fetch(builder.json(body), "instance", id).await
    }
}

#[async_trait]
impl ImageApi for PowerVsClient {
    async fn import_cos_image(&self, body: &CosImageImport) -> Result<JobReference, ApiError> {
        let builder = self.request(Method::POST, self.v1("cos-images")).await?;
        self.fetch(builder.json(body), "image", &body.image_name)
            .await
    }

    async fn create_image(&self, body: &ImageCreate) -> Result<Image, ApiError> {
        let builder = self.request(Method::POST, self.v1("images")).await?;
        self.fetch(builder.json(body), "stock image", &body.image_id)
            .await
    }

    async fn get_image(&self, id: &str) -> Result<Image, ApiError> {
        let builder = self
            .request(Method::GET, self.v1(&format!("images/{}", id)))
            .await?;
        self.fetch(builder, "image", id).await
    }

    async fn list_images(&self) -> Result<Vec<ImageReference>, ApiError> {
        let builder = self.request(Method::GET, self.v1("images")).await?;
        let images: Images = self.fetch(builder, "images", "*").await?;
        Ok(images.images)
    }

    async fn list_stock_images(&self) -> Result<Vec<ImageReference>, ApiError> {
        let builder = self.request(Method::GET, self.v1("stock-images")).await?;
        let images: Images = self.fetch(builder, "stock images", "*").await?;
        Ok(images.images)
    }

    async fn delete_image(&self, id: &str) -> Result<(), ApiError> {
        let builder = self
            .request(Method::DELETE, self.v1(&format!("images/{}", id)))
            .await?;
        self.execute(builder, "image", id).await
    }
}

#[async_trait]
impl JobApi for PowerVsClient {
    async fn get_job(&self, id: &str) -> Result<Job, ApiError> {
        let builder = self
            .request(Method::GET, self.v1(&format!("jobs/{}", id)))
            .await?;
        self.fetch(builder, "job", id).await
    }
}

#[async_trait]
impl DhcpApi for PowerVsClient {
    async fn create_dhcp_server(&self, body: &DhcpServerCreate) -> Result<DhcpServer, ApiError> {
        let builder = self.request(Method::POST, self.v1("services/dhcp")).await?;
        self.fetch(builder.json(body), "dhcp server", "new").await
    }

    async fn get_dhcp_server(&self, id: &str) -> Result<DhcpServerDetail, ApiError> {
        let builder = self
            .request(Method::GET, self.v1(&format!("services/dhcp/{}", id)))
            .await?;
        self.fetch(builder, "dhcp server", id).await
    }

    async fn delete_dhcp_server(&self, id: &str) -> Result<(), ApiError> {
        let builder = self
            .request(Method::DELETE, self.v1(&format!("services/dhcp/{}", id)))
            .await?;
        self.execute(builder, "dhcp server", id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BuildConfig {
        BuildConfig::from_toml_str(
            r#"
            [access]
            api_key = "key"
            zone = "dal10"
            service_instance_id = "ws-1"

            [instance]
            name = "builder"

            [capture]
            name = "golden"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_urls_are_scoped_to_workspace() {
        let client = PowerVsClient::new(&config()).unwrap();

        assert_eq!(
            client.v1("pvm-instances/abc"),
            "https://dal.power-iaas.cloud.ibm.com/pcloud/v1/cloud-instances/ws-1/pvm-instances/abc"
        );
        assert_eq!(
            client.v2("pvm-instances/abc/capture"),
            "https://dal.power-iaas.cloud.ibm.com/pcloud/v2/cloud-instances/ws-1/pvm-instances/abc/capture"
        );
        assert_eq!(client.iam_endpoint, DEFAULT_IAM_ENDPOINT);
    }

    #[test]
    fn test_crn_format() {
        let client = PowerVsClient::new(&config()).unwrap();
        assert_eq!(
            client.crn("acct-1"),
            "crn:v1:bluemix:public:power-iaas:dal10:a/acct-1:ws-1::"
        );
    }

    #[test]
    fn test_debug_hides_api_key() {
        let client = PowerVsClient::new(&config()).unwrap();
        let debug = format!("{:?}", client);
        assert!(!debug.contains("api_key"));
        assert!(debug.contains("ws-1"));
    }

    #[test]
    fn test_token_refreshes_before_expiry() {
        let now = Utc::now();
        let token = CachedToken {
            access_token: "t".to_string(),
            expires_at: now + ChronoDuration::seconds(3600),
        };
        assert!(token.is_fresh(now));
        assert!(!token.is_fresh(now + ChronoDuration::seconds(3550)));
    }

    #[test]
    fn test_error_message_prefers_description() {
        assert_eq!(
            error_message(r#"{"description": "quota exceeded", "error": "bad request"}"#),
            "quota exceeded"
        );
        assert_eq!(error_message("plain failure\n"), "plain failure");
        assert_eq!(error_message(r#"{"code": 1}"#), r#"{"code": 1}"#);
    }

    #[tokio::test]
    async fn test_configured_account_skips_lookup() {
        let mut config = config();
        config.access.account_id = Some("acct-9".to_string());
        let client = PowerVsClient::new(&config).unwrap();

        assert_eq!(client.account_id("unused").await.unwrap(), "acct-9");
    }
}
