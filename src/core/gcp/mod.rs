//! Google Cloud REST access for the two lookups a build needs:
//! Resource Manager v3 (project number) and Filestore v1 (instance networks).
//!
//! Calls are blocking, sequential and never retried.

pub mod auth;

use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;

use crate::error::{Error, Result};

pub const DEFAULT_RESOURCE_MANAGER_ENDPOINT: &str = "https://cloudresourcemanager.googleapis.com";
pub const DEFAULT_FILESTORE_ENDPOINT: &str = "https://file.googleapis.com";

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The cloud lookups a build depends on. Implemented by `GcpClient` and by
/// test doubles.
pub trait CloudProvider {
    /// Resolve a project id to its numeric project number.
    fn project_number(&self, project_id: &str) -> Result<String>;

    /// Fetch a Filestore instance by fully-qualified resource name.
    fn filestore_instance(&self, instance_name: &str) -> Result<FilestoreInstance>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FilestoreInstance {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub networks: Vec<NetworkConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_ip_range: Option<String>,
}

#[derive(Deserialize)]
struct ProjectResponse {
    name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub resource_manager_endpoint: String,
    pub filestore_endpoint: String,
    pub access_token: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            resource_manager_endpoint: DEFAULT_RESOURCE_MANAGER_ENDPOINT.to_string(),
            filestore_endpoint: DEFAULT_FILESTORE_ENDPOINT.to_string(),
            access_token: None,
        }
    }
}

/// Blocking REST client for Google Cloud. The access token is resolved on
/// the first request, not at construction.
pub struct GcpClient {
    http: Client,
    config: ProviderConfig,
    token: OnceCell<String>,
}

impl GcpClient {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(format!("afpipe/{}", VERSION))
            .build()
            .map_err(|e| Error::internal_io(e.to_string(), Some("create HTTP client".to_string())))?;

        Ok(Self {
            http,
            config,
            token: OnceCell::new(),
        })
    }

    fn access_token(&self) -> Result<&str> {
        if let Some(token) = self.token.get() {
            return Ok(token.as_str());
        }

        let (token, source) =
            auth::resolve_access_token(self.config.access_token.as_deref(), &self.http)?;
        crate::log_status!("auth", "Using access token from {:?}", source);
        Ok(self.token.get_or_init(|| token).as_str())
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let token = self.access_token()?;
        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .map_err(|e| Error::provider_request_failed(url, e.to_string()))?;
        parse_json_response(url, response)
    }
}

impl CloudProvider for GcpClient {
    fn project_number(&self, project_id: &str) -> Result<String> {
        let url = format!(
            "{}/v3/projects/{}",
            self.config.resource_manager_endpoint.trim_end_matches('/'),
            project_id
        );
        let project: ProjectResponse = self.get_json(&url)?;
        parse_project_number(&project.name)
            .ok_or_else(|| {
                Error::provider_request_failed(
                    &url,
                    format!("unexpected project resource name '{}'", project.name),
                )
            })
            .map(str::to_string)
    }

    fn filestore_instance(&self, instance_name: &str) -> Result<FilestoreInstance> {
        let url = format!(
            "{}/v1/{}",
            self.config.filestore_endpoint.trim_end_matches('/'),
            instance_name
        );
        self.get_json(&url)
    }
}

/// Extract `123456` from `projects/123456`.
pub fn parse_project_number(name: &str) -> Option<&str> {
    name.split('/').nth(1).filter(|n| !n.is_empty())
}

fn parse_json_response<T: DeserializeOwned>(url: &str, response: Response) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .map_err(|e| Error::provider_request_failed(url, e.to_string()))?;

    if !status.is_success() {
        return Err(Error::provider_status(url, status.as_u16(), body));
    }

    serde_json::from_str(&body).map_err(|e| {
        Error::internal_json(e.to_string(), Some(format!("parse response from {}", url)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_number_from_resource_name() {
        assert_eq!(parse_project_number("projects/123456"), Some("123456"));
        assert_eq!(parse_project_number("projects/"), None);
        assert_eq!(parse_project_number("123456"), None);
    }

    #[test]
    fn filestore_instance_parses_camel_case() {
        let raw = r#"{
            "name": "projects/my-proj/locations/us-central1-a/instances/af",
            "tier": "BASIC_HDD",
            "networks": [{
                "network": "projects/my-proj/global/networks/default",
                "modes": ["MODE_IPV4"],
                "reservedIpRange": "10.0.0.0/29",
                "ipAddresses": ["10.0.0.2"]
            }]
        }"#;
        let instance: FilestoreInstance = serde_json::from_str(raw).unwrap();
        assert_eq!(instance.networks.len(), 1);
        assert_eq!(instance.networks[0].ip_addresses, vec!["10.0.0.2".to_string()]);
        assert_eq!(
            instance.networks[0].reserved_ip_range.as_deref(),
            Some("10.0.0.0/29")
        );
    }

    #[test]
    fn filestore_instance_tolerates_missing_networks() {
        let instance: FilestoreInstance = serde_json::from_str(r#"{"name":"x"}"#).unwrap();
        assert!(instance.networks.is_empty());
    }
}
