//! Shared storage provisioning.
//!
//! A run needs a volume that every Nextflow task can mount. The cluster's
//! dispatcher service allocates one on request; the volume is released by the
//! platform, not here.

use crate::RunError;
use log::{debug, info};
use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt::{self, Debug, Formatter};
use std::io::Write;

/// Authorization scheme the dispatcher expects in front of the token.
pub const TOKEN_SCHEME: &str = "Latch-Execution-Token";

/// Credential scoped to a single workflow execution.
#[derive(Clone, PartialEq, Eq)]
pub struct ExecutionToken(String);

impl ExecutionToken {
    pub fn new(token: &str) -> Self {
        ExecutionToken(token.to_string())
    }

    /// Read the token from the task environment. A missing token is a setup
    /// error; there is nothing to retry. An empty value is passed through and
    /// left for the dispatcher to reject.
    pub fn from_env(var: &str) -> Result<Self, RunError> {
        match env::var(var) {
            Ok(token) => Ok(ExecutionToken(token)),
            Err(_) => Err(RunError::Configuration(format!(
                "failed to get execution token: {var} is not set"
            ))),
        }
    }

    /// Value of the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("{TOKEN_SCHEME} {}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Debug for ExecutionToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("ExecutionToken(..)")
    }
}

/// Something that can hand out a shared volume for a run.
pub trait StorageProvisioner {
    /// Allocate a volume of `storage_gib` and return its identifier.
    fn provision_storage(&self, storage_gib: u32) -> Result<String, RunError>;
}

#[derive(Serialize)]
struct ProvisionRequest {
    storage_gib: u32,
}

#[derive(Deserialize)]
struct ProvisionResponse {
    name: String,
}

/// HTTP client for the cluster-internal storage dispatcher.
pub struct DispatcherClient {
    url: String,
    token: ExecutionToken,
    client: Client,
}

impl DispatcherClient {
    pub fn new(base_url: &str, token: ExecutionToken) -> Result<Self, RunError> {
        // The dispatcher is only reachable from inside the cluster.
        let client = Client::builder()
            .no_proxy()
            .build()
            .map_err(|e| RunError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(DispatcherClient {
            url: format!("{}/provision-storage", base_url.trim_end_matches('/')),
            token,
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl StorageProvisioner for DispatcherClient {
    /// One synchronous request; any non-success status is fatal.
    fn provision_storage(&self, storage_gib: u32) -> Result<String, RunError> {
        print!("Provisioning shared storage volume... ");
        if let Err(e) = std::io::stdout().flush() {
            debug!("failed to flush stdout: {e}");
        }
        debug!("POST {} storage_gib={storage_gib}", self.url);

        let resp = self
            .client
            .post(&self.url)
            .header(AUTHORIZATION, self.token.authorization())
            .json(&ProvisionRequest { storage_gib })
            .send()
            .map_err(|source| {
                println!();
                RunError::ProvisioningRequest {
                    url: self.url.clone(),
                    source,
                }
            })?;

        let status = resp.status();
        let body = resp.text().map_err(|source| {
            println!();
            RunError::ProvisioningRequest {
                url: self.url.clone(),
                source,
            }
        })?;
        if !status.is_success() {
            println!();
            return Err(RunError::ProvisioningStatus {
                url: self.url.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let resp: ProvisionResponse =
            serde_json::from_str(&body).map_err(|e| RunError::ProvisioningResponse {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;
        println!("Done.");
        info!("provisioned shared volume {}", resp.name);
        Ok(resp.name)
    }
}
