// Warning groups (as of rust 1.55)
#![deny(
    future_incompatible,
    nonstandard_style,
    rust_2018_compatibility,
    rust_2021_compatibility,
    rust_2018_idioms,
    unused
)]
//! Run the nf-core/scnanoseq Nextflow pipeline as a single workflow unit:
//! provision a shared volume, stage a working directory, translate declared
//! parameters into runner flags, execute the runner and upload its log.

pub mod config;
pub mod logs;
pub mod param_args;
pub mod provision;
pub mod runtime;
pub mod utils;
pub mod workdir;

use config::WrapperConfig;
use logs::{ExecutionNameResolver, LogUploader};
use nf_types::{ParamError, ParameterSchema, ParameterValues};
use provision::StorageProvisioner;
use runtime::RuntimeTask;
use std::path::PathBuf;
use std::process::{ExitCode, ExitStatus};
use thiserror::Error;

/// Convert something to an ExitCode.
pub trait IntoExitCode {
    fn into_exit_code(self) -> ExitCode;
}

impl IntoExitCode for ExitStatus {
    /// Convert an ExitStatus to an ExitCode.
    fn into_exit_code(self) -> ExitCode {
        self.code()
            .map_or(ExitCode::FAILURE, |x| ExitCode::from(x as u8))
    }
}

/// Everything that can abort a run. All variants are fatal; nothing here is
/// retried.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid pipeline parameters")]
    Parameters(#[from] ParamError),

    #[error("provisioning request to {url} failed")]
    ProvisioningRequest {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("provisioning request to {url} returned {status}: {body}")]
    ProvisioningStatus {
        url: String,
        status: u16,
        body: String,
    },

    #[error("malformed provisioning response from {url}: {reason}")]
    ProvisioningResponse { url: String, reason: String },

    #[error("failed to stage working directory {}", .path.display())]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to launch {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed: {status}")]
    Execution { program: String, status: ExitStatus },
}

impl RunError {
    /// True for errors raised before or while requesting the volume.
    pub fn is_provisioning(&self) -> bool {
        matches!(
            self,
            RunError::ProvisioningRequest { .. }
                | RunError::ProvisioningStatus { .. }
                | RunError::ProvisioningResponse { .. }
        )
    }

    /// True for errors raised by the runner process itself.
    pub fn is_execution(&self) -> bool {
        matches!(self, RunError::Spawn { .. } | RunError::Execution { .. })
    }

    /// Exit code to report for this error: the runner's own code when it
    /// failed, otherwise a generic failure.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            RunError::Execution { status, .. } => status.into_exit_code(),
            _ => ExitCode::FAILURE,
        }
    }
}

/// The whole workflow: validate parameters, provision storage, then run.
///
/// Parameters are resolved before the volume is requested so a bad
/// invocation never allocates cluster storage.
pub fn launch(
    config: &WrapperConfig,
    schema: &ParameterSchema,
    values: &ParameterValues,
    provisioner: &dyn StorageProvisioner,
    resolver: &dyn ExecutionNameResolver,
    uploader: &dyn LogUploader,
) -> Result<(), RunError> {
    let flags = schema.build_flags(values)?;
    let volume_id = provisioner.provision_storage(config.storage_gib)?;
    RuntimeTask::new(config, resolver, uploader).run_with_flags(&volume_id, flags)
}
