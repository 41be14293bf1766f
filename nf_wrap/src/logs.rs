//! Persisting the runner log after a run.
//!
//! Nothing in here can fail a run: an unresolvable execution name or a failed
//! upload is reported and otherwise ignored.

use crate::config::WrapperConfig;
use crate::provision::ExecutionToken;
use anyhow::{ensure, Context, Result};
use itertools::Itertools;
use log::{debug, warn};
use reqwest::blocking::Client;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::process::Command;

/// File name the log is stored under remotely.
pub const REMOTE_LOG_NAME: &str = "nextflow.log";

/// Looks up the human-readable name of the current execution.
pub trait ExecutionNameResolver {
    fn execution_name(&self) -> Option<String>;
}

/// Copies a local file to a remote path.
pub trait LogUploader {
    fn upload(&self, local: &Path, remote: &str) -> Result<()>;
}

/// An execution name known up front, e.g. passed on the command line.
#[derive(Debug, Clone)]
pub struct StaticName(pub Option<String>);

impl ExecutionNameResolver for StaticName {
    fn execution_name(&self) -> Option<String> {
        self.0.clone()
    }
}

const EXECUTION_NAME_QUERY: &str = "query executionCreatorsByToken($token: String!) {
    executionCreatorByToken(token: $token) {
        info {
            displayName
        }
    }
}";

#[derive(Deserialize)]
struct GqlResponse {
    data: Option<GqlData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GqlData {
    execution_creator_by_token: Option<ExecutionCreator>,
}

#[derive(Deserialize)]
struct ExecutionCreator {
    info: Option<ExecutionInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionInfo {
    display_name: Option<String>,
}

/// Asks the platform's GraphQL API which execution the token belongs to.
pub struct GraphqlResolver {
    url: String,
    token: Option<ExecutionToken>,
}

impl GraphqlResolver {
    pub fn new(url: &str, token: Option<ExecutionToken>) -> Self {
        GraphqlResolver {
            url: url.to_string(),
            token,
        }
    }

    fn query(&self, token: &ExecutionToken) -> Result<Option<String>> {
        let resp = Client::builder()
            .build()?
            .post(&self.url)
            .header(AUTHORIZATION, token.authorization())
            .json(&json!({
                "query": EXECUTION_NAME_QUERY,
                "variables": { "token": token.as_str() },
            }))
            .send()
            .with_context(|| format!("querying {}", self.url))?;
        ensure!(
            resp.status().is_success(),
            "{} returned {}",
            self.url,
            resp.status()
        );
        let body: GqlResponse = resp.json()?;
        Ok(body
            .data
            .and_then(|d| d.execution_creator_by_token)
            .and_then(|c| c.info)
            .and_then(|i| i.display_name))
    }
}

impl ExecutionNameResolver for GraphqlResolver {
    fn execution_name(&self) -> Option<String> {
        let token = self.token.as_ref()?;
        match self.query(token) {
            Ok(name) => name,
            Err(err) => {
                debug!("execution name lookup failed: {err:#}");
                None
            }
        }
    }
}

/// Uploads with an external copy command, `<program> <args..> <local> <remote>`.
#[derive(Debug, Clone)]
pub struct CommandUploader {
    command: Vec<String>,
}

impl CommandUploader {
    pub fn new(command: Vec<String>) -> Self {
        CommandUploader { command }
    }
}

impl LogUploader for CommandUploader {
    fn upload(&self, local: &Path, remote: &str) -> Result<()> {
        let (program, args) = self
            .command
            .split_first()
            .context("no upload command configured")?;
        let status = Command::new(program)
            .args(args)
            .arg(local)
            .arg(remote)
            .status()
            .with_context(|| format!("Running {program}"))?;
        ensure!(status.success(), "{program} failed: {status}");
        Ok(())
    }
}

/// Join URL segments with exactly one `/` between them.
pub fn urljoins(base: &str, segments: &[&str]) -> String {
    std::iter::once(base.trim_end_matches('/'))
        .chain(segments.iter().map(|s| s.trim_matches('/')))
        .join("/")
}

/// Remote location of the log for `execution_name`.
pub fn remote_log_path(config: &WrapperConfig, execution_name: &str) -> String {
    urljoins(
        &config.log_remote_base,
        &[&config.pipeline_slug, execution_name, REMOTE_LOG_NAME],
    )
}

/// What happened to the runner log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogUpload {
    /// The runner left no log behind.
    NoLog,
    /// The execution name could not be determined.
    NameUnavailable,
    /// Uploaded to the given remote path.
    Uploaded(String),
    /// The copy to the given remote path failed.
    Failed(String),
}

/// Upload `<workdir>/<log_file>` if it exists.
pub fn upload_run_log(
    config: &WrapperConfig,
    workdir: &Path,
    resolver: &dyn ExecutionNameResolver,
    uploader: &dyn LogUploader,
) -> LogUpload {
    let log = workdir.join(&config.log_file);
    if !log.exists() {
        debug!("no {} in {}", config.log_file, workdir.display());
        return LogUpload::NoLog;
    }

    let Some(name) = resolver.execution_name() else {
        println!("Skipping logs upload, failed to get execution name");
        return LogUpload::NameUnavailable;
    };

    let remote = remote_log_path(config, &name);
    println!("Uploading {} to {remote}", config.log_file);
    match uploader.upload(&log, &remote) {
        Ok(()) => LogUpload::Uploaded(remote),
        Err(err) => {
            warn!("failed to upload {}: {err:#}", log.display());
            LogUpload::Failed(remote)
        }
    }
}
