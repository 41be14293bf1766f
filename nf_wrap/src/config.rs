//! Deployment settings for a workflow run, and the environment overlay handed
//! to the runner.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Name of the execution-scoped credential in the task environment.
pub const EXECUTION_TOKEN_VAR: &str = "FLYTE_INTERNAL_EXECUTION_ID";

/// Top-level entries of the template root that are never staged.
pub const DEFAULT_IGNORE_LIST: [&str; 9] = [
    "latch",
    ".latch",
    "nextflow",
    ".nextflow",
    "work",
    "results",
    "miniconda",
    "anaconda3",
    "mambaforge",
];

/// Compute requested by the provisioning task.
pub const INITIALIZE_RESOURCES: TaskResources = TaskResources {
    cpu: 0.25,
    memory_gib: 0.5,
    storage_gib: 1,
};

/// Compute requested by the runtime task.
pub const RUNTIME_RESOURCES: TaskResources = TaskResources {
    cpu: 4.0,
    memory_gib: 8.0,
    storage_gib: 100,
};

/// Resources a task declares to the orchestration platform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TaskResources {
    pub cpu: f32,
    pub memory_gib: f32,
    pub storage_gib: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnvModType {
    /// Replace the variable, e.g. `export KEY=value`
    #[serde(alias = "string")]
    Set,
    /// Prepend a path entry, e.g. `export KEY=value:$KEY`
    #[serde(alias = "path_prepend")]
    Prepend,
    /// Append a path entry, e.g. `export KEY=$KEY:value`
    #[serde(alias = "path_append")]
    Append,
    /// Remove the variable. The value is ignored.
    Unset,
}

/// One modification of the runner's environment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentMod {
    pub key: String,

    #[serde(default)]
    pub value: String,

    #[serde(rename = "type", default = "default_mod_type")]
    pub mod_type: EnvModType,
}

fn default_mod_type() -> EnvModType {
    EnvModType::Set
}

impl EnvironmentMod {
    pub fn set(key: &str, value: &str) -> Self {
        EnvironmentMod {
            key: key.to_string(),
            value: value.to_string(),
            mod_type: EnvModType::Set,
        }
    }
}

fn split_paths(value: Option<&OsString>) -> Vec<PathBuf> {
    value
        .map(|v| env::split_paths(v).collect())
        .unwrap_or_default()
}

/// The net effect of a list of modifications on top of the current process
/// environment. `None` means the variable is removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverlay {
    vars: BTreeMap<String, Option<OsString>>,
}

impl EnvOverlay {
    /// Fold `mods` in order. Prepend/append read the value left by earlier
    /// modifications, falling back to the inherited environment.
    pub fn resolve(mods: &[EnvironmentMod]) -> Result<Self> {
        let mut vars: BTreeMap<String, Option<OsString>> = BTreeMap::new();
        for m in mods {
            let current = match vars.get(&m.key) {
                Some(v) => v.clone(),
                None => env::var_os(&m.key),
            };
            let new = match m.mod_type {
                EnvModType::Set => Some(OsString::from(&m.value)),
                EnvModType::Prepend => {
                    let mut paths = vec![PathBuf::from(&m.value)];
                    paths.extend(split_paths(current.as_ref()));
                    Some(env::join_paths(paths).with_context(|| m.key.clone())?)
                }
                EnvModType::Append => {
                    let mut paths = split_paths(current.as_ref());
                    paths.push(PathBuf::from(&m.value));
                    Some(env::join_paths(paths).with_context(|| m.key.clone())?)
                }
                EnvModType::Unset => None,
            };
            vars.insert(m.key.clone(), new);
        }
        Ok(EnvOverlay { vars })
    }

    pub fn get(&self, key: &str) -> Option<Option<&OsString>> {
        self.vars.get(key).map(Option::as_ref)
    }

    /// Apply on top of the environment `cmd` inherits.
    pub fn apply(&self, cmd: &mut Command) {
        for (key, value) in &self.vars {
            match value {
                Some(v) => cmd.env(key, v),
                None => cmd.env_remove(key),
            };
        }
    }

    /// `KEY=value` lines, for dry runs.
    pub fn describe(&self) -> Vec<String> {
        self.vars
            .iter()
            .map(|(k, v)| match v {
                Some(v) => format!("{k}={}", v.to_string_lossy()),
                None => format!("unset {k}"),
            })
            .collect()
    }
}

/// Everything about a run that is fixed by the deployment rather than
/// supplied by the caller. Every field defaults to the production value, so a
/// config file only needs to list what it overrides.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WrapperConfig {
    /// Cluster-internal storage dispatcher.
    pub dispatcher_url: String,
    /// Size of the shared volume requested per run.
    pub storage_gib: u32,
    /// Variable holding the execution token.
    pub token_env_var: String,

    /// Directory the working directory is copied from.
    pub template_root: PathBuf,
    /// Working directory shared with the runner's tasks.
    pub shared_dir: PathBuf,
    /// Top-level template entries skipped when staging.
    pub ignore_list: Vec<String>,

    /// Runner executable.
    pub runner: PathBuf,
    /// Pipeline entry script, relative to the working directory.
    pub main_script: String,
    /// Runner execution profile.
    pub profile: String,
    /// Runner config file, relative to the working directory.
    pub config_file: String,
    /// Variable the volume identifier is exported under.
    pub volume_env_var: String,
    /// Extra environment for the runner.
    pub env: Vec<EnvironmentMod>,

    /// Runner log file, relative to the working directory.
    pub log_file: String,
    /// Remote prefix logs are uploaded under.
    pub log_remote_base: String,
    /// Pipeline segment of the remote log path.
    pub pipeline_slug: String,
    /// Platform GraphQL endpoint used to look up the execution name.
    pub graphql_url: String,
    /// Command prefix used to upload a local file to a remote path.
    pub upload_command: Vec<String>,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        WrapperConfig {
            dispatcher_url: "http://nf-dispatcher-service.flyte.svc.cluster.local".to_string(),
            storage_gib: 100,
            token_env_var: EXECUTION_TOKEN_VAR.to_string(),
            template_root: PathBuf::from("/root"),
            shared_dir: PathBuf::from("/nf-workdir"),
            ignore_list: DEFAULT_IGNORE_LIST.iter().map(ToString::to_string).collect(),
            runner: PathBuf::from("/root/nextflow"),
            main_script: "main.nf".to_string(),
            profile: "docker".to_string(),
            config_file: "latch.config".to_string(),
            volume_env_var: "K8S_STORAGE_CLAIM_NAME".to_string(),
            env: vec![
                EnvironmentMod::set("NXF_HOME", "/root/.nextflow"),
                EnvironmentMod::set("NXF_OPTS", "-Xms2048M -Xmx8G -XX:ActiveProcessorCount=4"),
                EnvironmentMod::set("NXF_DISABLE_CHECK_LATEST", "true"),
            ],
            log_file: ".nextflow.log".to_string(),
            log_remote_base: "latch:///your_log_dir".to_string(),
            pipeline_slug: "nf_nf_core_scnanoseq".to_string(),
            graphql_url: "https://vacuole.latch.bio/graphql".to_string(),
            upload_command: vec!["latch".to_string(), "cp".to_string()],
        }
    }
}

impl WrapperConfig {
    /// Load from a TOML file, or use the deployment defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(WrapperConfig::default());
        };
        let s = read_to_string(path).with_context(|| path.display().to_string())?;
        toml::from_str(&s).with_context(|| format!("parsing {}", path.display()))
    }

    /// Environment modifications for a run attached to `volume_id`.
    pub fn env_mods(&self, volume_id: &str) -> Vec<EnvironmentMod> {
        let mut mods = self.env.clone();
        mods.push(EnvironmentMod::set(&self.volume_env_var, volume_id));
        mods
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_partial_config() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("wrapper.toml");
        std::fs::write(
            &path,
            r#"
storage_gib = 250
template_root = "/opt/template"

[[env]]
key = "NXF_OPTS"
value = "-Xmx16G"
"#,
        )?;
        let cfg = WrapperConfig::load(Some(&path))?;
        assert_eq!(cfg.storage_gib, 250);
        assert_eq!(cfg.template_root, PathBuf::from("/opt/template"));
        assert_eq!(cfg.env, vec![EnvironmentMod::set("NXF_OPTS", "-Xmx16G")]);
        assert_eq!(cfg.runner, PathBuf::from("/root/nextflow"));
        assert_eq!(cfg.ignore_list.len(), 9);
        Ok(())
    }

    #[test]
    fn test_unknown_key_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("wrapper.toml");
        std::fs::write(&path, "storage_gb = 100\n")?;
        assert!(WrapperConfig::load(Some(&path)).is_err());
        assert!(WrapperConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
        Ok(())
    }

    #[test]
    fn test_default_overlay() -> Result<()> {
        let cfg = WrapperConfig::default();
        let overlay = EnvOverlay::resolve(&cfg.env_mods("pvc-0123"))?;
        assert_eq!(
            overlay.describe(),
            [
                "K8S_STORAGE_CLAIM_NAME=pvc-0123",
                "NXF_DISABLE_CHECK_LATEST=true",
                "NXF_HOME=/root/.nextflow",
                "NXF_OPTS=-Xms2048M -Xmx8G -XX:ActiveProcessorCount=4",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_path_mods_accumulate() -> Result<()> {
        let key = "NF_WRAP_TEST_PATH_MODS";
        let mods = vec![
            EnvironmentMod::set(key, "/b"),
            EnvironmentMod {
                key: key.to_string(),
                value: "/a".to_string(),
                mod_type: EnvModType::Prepend,
            },
            EnvironmentMod {
                key: key.to_string(),
                value: "/c".to_string(),
                mod_type: EnvModType::Append,
            },
        ];
        let overlay = EnvOverlay::resolve(&mods)?;
        assert_eq!(
            overlay.get(key),
            Some(Some(&OsString::from("/a:/b:/c")))
        );

        let unset = EnvironmentMod {
            key: key.to_string(),
            value: String::new(),
            mod_type: EnvModType::Unset,
        };
        let overlay = EnvOverlay::resolve(&[unset])?;
        assert_eq!(overlay.get(key), Some(None));
        assert_eq!(overlay.describe(), [format!("unset {key}")]);
        Ok(())
    }

    #[test]
    fn test_mod_type_aliases() -> Result<()> {
        let m: EnvironmentMod =
            serde_json::from_str(r#"{"key": "PATH", "value": "bin", "type": "path_prepend"}"#)?;
        assert_eq!(m.mod_type, EnvModType::Prepend);
        let m: EnvironmentMod = serde_json::from_str(r#"{"key": "NXF_HOME", "value": "/x"}"#)?;
        assert_eq!(m.mod_type, EnvModType::Set);
        Ok(())
    }
}
