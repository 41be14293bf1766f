//! The run step: stage the working directory, launch Nextflow, upload its log.

use crate::config::{EnvOverlay, WrapperConfig};
use crate::logs::{upload_run_log, ExecutionNameResolver, LogUpload, LogUploader};
use crate::workdir::stage_working_dir;
use crate::RunError;
use itertools::Itertools;
use log::{debug, info, log, Level};
use nf_types::{ParameterSchema, ParameterValues};
use shell_escape::escape;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use strum_macros::Display;

/// Log target the runner's output is relayed under.
pub const RUNNER_LOG_TARGET: &str = "nextflow";

/// Where a run is in its lifecycle. Once staging starts, every run passes
/// through `LogUploadAttempted` before `Terminal`.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Staging,
    Executing,
    Succeeded,
    Failed,
    LogUploadAttempted,
    Terminal,
}

/// A fully specified runner invocation.
#[derive(Debug, Clone)]
pub struct NextflowCommand {
    program: PathBuf,
    args: Vec<String>,
    cwd: PathBuf,
    env: EnvOverlay,
}

impl NextflowCommand {
    /// `<runner> run <workdir>/<main> -work-dir <workdir> -profile <profile>
    /// -c <config> <flags..>`, run from the working directory.
    pub fn new(config: &WrapperConfig, volume_id: &str, flags: Vec<String>) -> Result<Self, RunError> {
        let workdir = &config.shared_dir;
        let env = EnvOverlay::resolve(&config.env_mods(volume_id))
            .map_err(|e| RunError::Configuration(format!("invalid runner environment: {e:#}")))?;

        let mut args = vec![
            "run".to_string(),
            workdir.join(&config.main_script).display().to_string(),
            "-work-dir".to_string(),
            workdir.display().to_string(),
            "-profile".to_string(),
            config.profile.clone(),
            "-c".to_string(),
            config.config_file.clone(),
        ];
        args.extend(flags);

        Ok(NextflowCommand {
            program: config.runner.clone(),
            args,
            cwd: workdir.clone(),
            env,
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn env(&self) -> &EnvOverlay {
        &self.env
    }

    /// The command line as it could be pasted into a shell.
    pub fn display(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .map(|a| escape(a.into()))
            .join(" ")
    }

    /// Run to completion. The runner's stdout and stderr are relayed line by
    /// line to the log; a non-zero exit is an error.
    pub fn run(&self) -> Result<ExitStatus, RunError> {
        let program = self.program.display().to_string();
        let spawn_error = |source: std::io::Error| RunError::Spawn {
            program: program.clone(),
            source,
        };

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        self.env.apply(&mut cmd);

        let mut child = cmd.spawn().map_err(spawn_error)?;
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let status = thread::scope(|s| {
            if let Some(out) = stdout {
                s.spawn(move || relay(out, Level::Info));
            }
            if let Some(err) = stderr {
                s.spawn(move || relay(err, Level::Warn));
            }
            child.wait()
        })
        .map_err(spawn_error)?;

        debug!("{program} exited with {status}");
        if status.success() {
            Ok(status)
        } else {
            Err(RunError::Execution { program, status })
        }
    }
}

/// Read `stream` to EOF, logging each line. Bytes that are not UTF-8 are
/// replaced rather than ending the relay, so the runner never sees a closed
/// pipe.
fn relay(stream: impl Read, level: Level) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                log!(target: RUNNER_LOG_TARGET, level, "{}", line.trim_end_matches(['\r', '\n']));
            }
            Err(e) => {
                debug!("stopped relaying runner output: {e}");
                break;
            }
        }
    }
}

/// One run of the pipeline against an already provisioned volume.
pub struct RuntimeTask<'a> {
    config: &'a WrapperConfig,
    resolver: &'a dyn ExecutionNameResolver,
    uploader: &'a dyn LogUploader,
    phase: RunPhase,
    log_upload: Option<LogUpload>,
}

impl<'a> RuntimeTask<'a> {
    pub fn new(
        config: &'a WrapperConfig,
        resolver: &'a dyn ExecutionNameResolver,
        uploader: &'a dyn LogUploader,
    ) -> Self {
        RuntimeTask {
            config,
            resolver,
            uploader,
            phase: RunPhase::Idle,
            log_upload: None,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    /// What the finalizer did with the runner log, once it has run.
    pub fn log_upload(&self) -> Option<&LogUpload> {
        self.log_upload.as_ref()
    }

    fn advance(&mut self, phase: RunPhase) {
        debug!("run phase {} -> {phase}", self.phase);
        self.phase = phase;
    }

    /// The command a run would execute, without touching the filesystem.
    pub fn plan(&self, volume_id: &str, flags: Vec<String>) -> Result<NextflowCommand, RunError> {
        NextflowCommand::new(self.config, volume_id, flags)
    }

    /// Resolve `values` against `schema` and run.
    pub fn run(
        &mut self,
        volume_id: &str,
        schema: &ParameterSchema,
        values: &ParameterValues,
    ) -> Result<(), RunError> {
        let flags = schema.build_flags(values)?;
        self.run_with_flags(volume_id, flags)
    }

    /// Stage, execute, and then upload the runner log whatever happened.
    /// The log upload never changes the result.
    pub fn run_with_flags(&mut self, volume_id: &str, flags: Vec<String>) -> Result<(), RunError> {
        let command = self.plan(volume_id, flags)?;

        let outcome = self.stage_and_execute(&command);
        self.advance(if outcome.is_ok() {
            RunPhase::Succeeded
        } else {
            RunPhase::Failed
        });

        println!();
        let upload = upload_run_log(
            self.config,
            &self.config.shared_dir,
            self.resolver,
            self.uploader,
        );
        debug!("log upload: {upload:?}");
        self.log_upload = Some(upload);
        self.advance(RunPhase::LogUploadAttempted);
        self.advance(RunPhase::Terminal);
        outcome
    }

    fn stage_and_execute(&mut self, command: &NextflowCommand) -> Result<(), RunError> {
        self.advance(RunPhase::Staging);
        stage_working_dir(
            &self.config.template_root,
            &self.config.shared_dir,
            &self.config.ignore_list,
        )?;

        self.advance(RunPhase::Executing);
        println!("Launching Nextflow Runtime");
        println!("{}", command.display());
        println!();
        info!("runner environment: {}", command.env().describe().join(", "));
        command.run()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logs::StaticName;
    use anyhow::Result;
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::fs;

    struct Recorder(RefCell<Vec<String>>);

    impl LogUploader for Recorder {
        fn upload(&self, _local: &Path, remote: &str) -> Result<()> {
            self.0.borrow_mut().push(remote.to_string());
            Ok(())
        }
    }

    fn test_config(template: &Path, shared: &Path) -> WrapperConfig {
        WrapperConfig {
            template_root: template.to_path_buf(),
            shared_dir: shared.to_path_buf(),
            runner: PathBuf::from("/bin/sh"),
            ..WrapperConfig::default()
        }
    }

    #[test]
    fn test_command_line() -> Result<()> {
        let cfg = WrapperConfig::default();
        let cmd = NextflowCommand::new(
            &cfg,
            "pvc-42",
            vec!["--min_length".into(), "500".into(), "--skip_qc".into()],
        )?;
        assert_eq!(cmd.program(), Path::new("/root/nextflow"));
        assert_eq!(
            cmd.args(),
            [
                "run",
                "/nf-workdir/main.nf",
                "-work-dir",
                "/nf-workdir",
                "-profile",
                "docker",
                "-c",
                "latch.config",
                "--min_length",
                "500",
                "--skip_qc",
            ]
        );
        assert_eq!(cmd.cwd(), Path::new("/nf-workdir"));
        assert_eq!(
            cmd.env().get("K8S_STORAGE_CLAIM_NAME"),
            Some(Some(&"pvc-42".into()))
        );
        Ok(())
    }

    #[test]
    fn test_display_escapes() -> Result<()> {
        let cfg = WrapperConfig::default();
        let cmd = NextflowCommand::new(
            &cfg,
            "pvc-42",
            vec!["--multiqc_title".into(), "my run".into()],
        )?;
        assert_eq!(
            cmd.display(),
            "/root/nextflow run /nf-workdir/main.nf -work-dir /nf-workdir \
             -profile docker -c latch.config --multiqc_title 'my run'"
        );
        Ok(())
    }

    #[test]
    fn test_relay_survives_invalid_utf8() -> Result<()> {
        let template = tempfile::tempdir()?;
        let shared = tempfile::tempdir()?;
        fs::write(
            shared.path().join("run"),
            "printf 'sample caf\\351\\n'\nprintf 'bare \\377'\necho\nsleep 1\necho after\ntouch finished\n",
        )?;
        let cfg = test_config(template.path(), shared.path());
        let status = NextflowCommand::new(&cfg, "pvc-utf8", vec![])?.run()?;
        assert!(status.success());
        assert!(shared.path().join("finished").is_file());
        Ok(())
    }

    #[test]
    fn test_phases_and_finalizer_on_failure() -> Result<()> {
        let template = tempfile::tempdir()?;
        fs::write(
            template.path().join("run"),
            "echo started > .nextflow.log\nexit 3\n",
        )?;
        let shared = tempfile::tempdir()?;
        let cfg = test_config(template.path(), shared.path());
        let resolver = StaticName(Some("quiet_lamarr".to_string()));
        let uploader = Recorder(RefCell::new(vec![]));

        let mut task = RuntimeTask::new(&cfg, &resolver, &uploader);
        assert_eq!(task.phase(), RunPhase::Idle);
        let err = task.run_with_flags("pvc-1", vec![]).unwrap_err();

        match &err {
            RunError::Execution { status, .. } => assert_eq!(status.code(), Some(3)),
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(task.phase(), RunPhase::Terminal);
        let remote = "latch:///your_log_dir/nf_nf_core_scnanoseq/quiet_lamarr/nextflow.log";
        assert_eq!(*uploader.0.borrow(), [remote]);
        assert_eq!(task.log_upload(), Some(&LogUpload::Uploaded(remote.to_string())));
        Ok(())
    }

    #[test]
    fn test_staging_failure_still_finalizes() -> Result<()> {
        let shared = tempfile::tempdir()?;
        let cfg = test_config(Path::new("/nonexistent/template"), shared.path());
        let resolver = StaticName(None);
        let uploader = Recorder(RefCell::new(vec![]));
        let mut task = RuntimeTask::new(&cfg, &resolver, &uploader);

        let err = task.run_with_flags("pvc-1", vec![]).unwrap_err();
        assert!(matches!(err, RunError::Staging { .. }));
        assert_eq!(task.phase(), RunPhase::Terminal);
        assert_eq!(task.log_upload(), Some(&LogUpload::NoLog));
        assert!(uploader.0.borrow().is_empty());
        Ok(())
    }

    #[test]
    fn test_spawn_failure() -> Result<()> {
        let template = tempfile::tempdir()?;
        let shared = tempfile::tempdir()?;
        let cfg = WrapperConfig {
            runner: PathBuf::from("/nonexistent/nextflow"),
            ..test_config(template.path(), shared.path())
        };
        let resolver = StaticName(None);
        let uploader = Recorder(RefCell::new(vec![]));
        let mut task = RuntimeTask::new(&cfg, &resolver, &uploader);
        let err = task.run_with_flags("pvc-1", vec![]).unwrap_err();
        assert!(err.is_execution());
        assert!(matches!(err, RunError::Spawn { .. }));
        Ok(())
    }
}
