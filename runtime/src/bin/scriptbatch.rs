//! ScriptBatch CLI
//!
//! List, validate and run script plugins from the terminal.

use clap::{Args, Parser, Subcommand};
use scriptbatch_runtime::{
    open_output_dir, validate_source, OutputStream, RunRequest, RunStatus, RuntimeConfig,
    RuntimeError, ScriptRuntime, TracingAuditSink,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "scriptbatch", version, about = "Run batch-processing scripts as plugins")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Script directory, overriding the config
    #[arg(long, short = 's', global = true)]
    scripts: Option<PathBuf>,

    /// Output base directory, overriding the config
    #[arg(long, short = 'o', global = true)]
    output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List plugins in the script directory
    List {
        #[arg(long)]
        json: bool,
        /// Also show rejected scripts and why
        #[arg(long)]
        rejected: bool,
    },
    /// Validate a script file without installing it
    Validate {
        file: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Run a plugin over input files
    Run {
        plugin: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Parameter value as name=value (repeatable)
        #[arg(short = 'p', long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,
        /// Open the output folder when the run succeeds
        #[arg(long)]
        open: bool,
        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,
    },
    /// List saved versions of a script
    Versions { file: String },
    /// Restore a saved version of a script
    Restore { file: String, version: u32 },
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("SCRIPTBATCH_LOG")
                .unwrap_or_else(|_| "scriptbatch=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_config(global: &GlobalArgs) -> Result<RuntimeConfig, RuntimeError> {
    let mut config = match &global.config {
        Some(path) => RuntimeConfig::load(path)?,
        None => RuntimeConfig::load_default()?,
    };
    if let Some(scripts) = &global.scripts {
        config.script_dir = scripts.clone();
    }
    if let Some(output) = &global.output {
        config.output_base = output.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Validate { file, json } => cmd_validate(&file, json),
        command => match load_config(&cli.global).and_then(ScriptRuntime::from_config) {
            Ok(runtime) => dispatch(runtime, command).await,
            Err(err) => Err(err),
        },
    };

    match result {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(runtime: ScriptRuntime, command: Command) -> Result<ExitCode, RuntimeError> {
    match command {
        Command::List { json, rejected } => cmd_list(&runtime, json, rejected),
        Command::Run {
            plugin,
            files,
            params,
            open,
            json,
        } => {
            let runtime = runtime.with_audit_sink(Arc::new(TracingAuditSink));
            let mut request = RunRequest::new(plugin, files);
            request.params.extend(params);
            cmd_run(&runtime, request, open, json).await
        }
        Command::Versions { file } => cmd_versions(&runtime, &file),
        Command::Restore { file, version } => {
            let entry = runtime.restore_script(&file, version)?;
            println!("Restored {file} to v{} ({})", entry.version, entry.timestamp);
            Ok(ExitCode::SUCCESS)
        }
        Command::Validate { file, json } => cmd_validate(&file, json),
    }
}

fn cmd_list(runtime: &ScriptRuntime, json: bool, rejected: bool) -> Result<ExitCode, RuntimeError> {
    let snapshot = runtime.snapshot();
    let dir = runtime.config().script_dir.display();

    if json {
        let mut output = serde_json::json!({ "plugins": snapshot.descriptors() });
        if rejected {
            output["rejected"] = serde_json::to_value(snapshot.rejected())?;
        }
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(ExitCode::SUCCESS);
    }

    if snapshot.is_empty() {
        println!("No plugins found in {dir}");
    } else {
        println!("Plugins in {dir}:");
        for p in snapshot.descriptors() {
            let mode = if p.accepts_multiple_files { "batch" } else { "per-file" };
            println!("  {} [{}] ({mode})", p.name, p.file);
            println!("    {}", p.description);
            println!("    accepts: {}", p.input_types);
        }
    }
    if rejected && !snapshot.rejected().is_empty() {
        println!();
        println!("Rejected:");
        for r in snapshot.rejected() {
            println!("  {}: {}", r.path.display(), r.reason);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_validate(file: &Path, json: bool) -> Result<ExitCode, RuntimeError> {
    let source = std::fs::read_to_string(file)?;
    let file_name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    match validate_source(&file_name, &source) {
        Ok(manifest) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&manifest)?);
            } else {
                println!("✓ {} is a valid plugin: {}", file.display(), manifest.name);
                for p in &manifest.parameters {
                    println!("    --{} ({}, default {})", p.name, p.kind, p.default);
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(RuntimeError::InvalidPlugin(reason)) => {
            if json {
                println!("{}", serde_json::json!({ "valid": false, "reason": reason }));
            } else {
                println!("✗ {}: {reason}", file.display());
            }
            Ok(ExitCode::FAILURE)
        }
        Err(other) => Err(other),
    }
}

async fn cmd_run(
    runtime: &ScriptRuntime,
    request: RunRequest,
    open: bool,
    json: bool,
) -> Result<ExitCode, RuntimeError> {
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling...");
            ctrl_c.cancel();
        }
    });

    let outcome = runtime
        .run(
            &request,
            |line| match line.stream {
                OutputStream::Stdout => println!("{}", line.text),
                OutputStream::Stderr => eprintln!("{}", line.text),
            },
            &cancel,
        )
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        eprintln!();
        eprintln!("{}: {}", outcome.plugin, outcome.status);
        eprintln!("Output: {}", outcome.output_dir.display());
    }

    if open && outcome.is_success() {
        if let Err(e) = open_output_dir(&outcome.output_dir) {
            eprintln!("Could not open output folder: {e}");
        }
    }

    Ok(match outcome.status {
        RunStatus::Succeeded => ExitCode::SUCCESS,
        RunStatus::Cancelled => ExitCode::from(130),
        _ => ExitCode::FAILURE,
    })
}

fn cmd_versions(runtime: &ScriptRuntime, file: &str) -> Result<ExitCode, RuntimeError> {
    let versions = runtime.store().versions(file)?;
    if versions.is_empty() {
        println!("No saved versions of {file}");
        return Ok(ExitCode::SUCCESS);
    }
    println!("Versions of {file}:");
    for v in versions {
        let note = if v.change_note.is_empty() {
            "No description"
        } else {
            v.change_note.as_str()
        };
        println!("  v{} {} [{:?}] {note}", v.version, v.timestamp, v.origin);
    }
    Ok(ExitCode::SUCCESS)
}
