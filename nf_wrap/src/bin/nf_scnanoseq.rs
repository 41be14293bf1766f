//! nf-scnanoseq
#![deny(missing_docs)]

use anyhow::{Context, Result};
use clap::{CommandFactory, FromArgMatches, Parser, Subcommand};
use log::info;
use nf_types::schema::scnanoseq;
use nf_types::ParameterSchema;
use nf_wrap::config::{WrapperConfig, INITIALIZE_RESOURCES, RUNTIME_RESOURCES};
use nf_wrap::logs::{CommandUploader, ExecutionNameResolver, GraphqlResolver, StaticName};
use nf_wrap::param_args::{schema_args, values_from_matches};
use nf_wrap::provision::{DispatcherClient, ExecutionToken, StorageProvisioner};
use nf_wrap::runtime::{NextflowCommand, RuntimeTask};
use nf_wrap::utils::{init_logging, print_error_chain};
use nf_wrap::RunError;
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;

const CMD: &str = "nf-scnanoseq";

/// Subcommands that take pipeline parameters as flags.
const PARAMETERIZED: [&str; 2] = ["run", "launch"];

/// Run the nf-core/scnanoseq single-cell nanopore pipeline on shared cluster
/// storage
#[derive(Parser, Debug)]
#[clap(name = CMD, version)]
struct NfScnanoseq {
    #[clap(subcommand)]
    subcmd: SubCommand,

    /// TOML file overriding deployment settings.
    #[clap(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[clap(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum SubCommand {
    /// Print the pipeline's parameters
    Params {
        /// Print as JSON.
        #[clap(long)]
        json: bool,
    },

    /// Request a shared storage volume and print its identifier
    Provision {
        /// Volume size, overriding the configured size.
        #[clap(long, value_name = "GIB")]
        storage_gib: Option<u32>,
    },

    /// Run the pipeline on an existing volume
    Run {
        /// Shared volume to attach.
        #[clap(long, value_name = "ID")]
        volume: String,

        #[clap(flatten)]
        opts: RunOpts,
    },

    /// Provision a volume, then run the pipeline on it
    Launch {
        #[clap(flatten)]
        opts: RunOpts,
    },
}

#[derive(clap::Args, Debug)]
struct RunOpts {
    /// Name the log is uploaded under. Looked up from the platform if not
    /// given.
    #[clap(long, env = "LATCH_EXECUTION_NAME", value_name = "NAME")]
    execution_name: Option<String>,

    /// Print the runner command and environment without running anything.
    #[clap(long)]
    dry: bool,
}

fn execution_token(config: &WrapperConfig) -> Result<ExecutionToken, RunError> {
    ExecutionToken::from_env(&config.token_env_var)
}

fn name_resolver(config: &WrapperConfig, opts: &RunOpts) -> Box<dyn ExecutionNameResolver> {
    match &opts.execution_name {
        Some(name) => Box::new(StaticName(Some(name.clone()))),
        None => Box::new(GraphqlResolver::new(
            &config.graphql_url,
            execution_token(config).ok(),
        )),
    }
}

fn print_plan(command: &NextflowCommand) {
    println!("{}", command.display());
    println!();
    for var in command.env().describe() {
        println!("{var}");
    }
}

fn print_params(schema: &ParameterSchema, as_json: bool) -> Result<()> {
    if as_json {
        let doc = json!({
            "parameters": schema,
            "resources": {
                "initialize": INITIALIZE_RESOURCES,
                "runtime": RUNTIME_RESOURCES,
            },
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        print!("{}", schema.render_table());
        println!();
        for (task, r) in [("initialize", INITIALIZE_RESOURCES), ("runtime", RUNTIME_RESOURCES)] {
            println!(
                "{task}: {} CPU, {} GiB memory, {} GiB storage",
                r.cpu, r.memory_gib, r.storage_gib
            );
        }
    }
    Ok(())
}

fn inner_main() -> Result<ExitCode> {
    let schema = scnanoseq()?;

    let mut command = NfScnanoseq::command();
    for name in PARAMETERIZED {
        command = command.mut_subcommand(name, |sc| sc.args(schema_args(&schema)));
    }
    let matches = command.get_matches();
    let opts = NfScnanoseq::from_arg_matches(&matches)?;
    init_logging(opts.verbose);

    let config = WrapperConfig::load(opts.config.as_deref())?;
    let values = match matches.subcommand() {
        Some((name, sub)) if PARAMETERIZED.contains(&name) => values_from_matches(&schema, sub)?,
        _ => Default::default(),
    };

    match opts.subcmd {
        SubCommand::Params { json } => print_params(&schema, json)?,

        SubCommand::Provision { storage_gib } => {
            let client = DispatcherClient::new(&config.dispatcher_url, execution_token(&config)?)?;
            let volume = client.provision_storage(storage_gib.unwrap_or(config.storage_gib))?;
            println!("{volume}");
        }

        SubCommand::Run { volume, opts } => {
            let flags = schema.build_flags(&values)?;
            let resolver = name_resolver(&config, &opts);
            let uploader = CommandUploader::new(config.upload_command.clone());
            let mut task = RuntimeTask::new(&config, resolver.as_ref(), &uploader);
            if opts.dry {
                print_plan(&task.plan(&volume, flags)?);
            } else {
                task.run_with_flags(&volume, flags)?;
            }
        }

        SubCommand::Launch { opts } => {
            if opts.dry {
                let flags = schema.build_flags(&values)?;
                print_plan(&NextflowCommand::new(&config, "<volume>", flags)?);
                return Ok(ExitCode::SUCCESS);
            }
            let token = execution_token(&config)?;
            let provisioner = DispatcherClient::new(&config.dispatcher_url, token)?;
            let resolver = name_resolver(&config, &opts);
            let uploader = CommandUploader::new(config.upload_command.clone());
            nf_wrap::launch(
                &config,
                &schema,
                &values,
                &provisioner,
                resolver.as_ref(),
                &uploader,
            )
            .context("nf-core/scnanoseq run failed")?;
            info!("run complete");
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    match inner_main() {
        Ok(exit_code) => exit_code,
        Err(err) => {
            print_error_chain(&err);
            match err.downcast_ref::<RunError>() {
                Some(run_err) => run_err.exit_code(),
                None => ExitCode::FAILURE,
            }
        }
    }
}
