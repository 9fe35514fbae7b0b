use std::env;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use opencode_toolbox::config::{self, CreateOverrides, ENGINE_ENV};
use opencode_toolbox::error::{ErrorDetails, Result, ToolboxError};
use opencode_toolbox::toolbox::validate_name;
use opencode_toolbox::{
    CancelFlag, CreateOutcome, CreateReport, EngineSelector, LifecycleManager, SystemRunner,
    ToolboxRecord, TtyConfig,
};

const LOG_ENV: &str = "OPENCODE_TOOLBOX_LOG";

#[derive(Parser, Debug)]
#[command(
    name = "opencode-toolbox",
    version,
    about = "Disposable development containers on Docker or Podman"
)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_parser = ["auto", "docker", "podman"])]
    engine: Option<String>,
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a toolbox, or resume it if it already exists
    Create {
        name: String,
        #[arg(long)]
        image: Option<String>,
        #[arg(short = 'v', long = "volume", value_name = "HOST:CONTAINER[:ro]")]
        volumes: Vec<String>,
        #[arg(short, long, value_name = "KEY=VALUE")]
        env: Vec<String>,
        #[arg(short, long)]
        workdir: Option<String>,
        #[arg(long, default_value_t = false)]
        recreate: bool,
    },
    /// Open an interactive login shell in a toolbox
    Enter { name: String },
    /// Run a command in a toolbox
    Run {
        name: String,
        #[arg(last = true)]
        command: Vec<String>,
    },
    /// List managed toolboxes
    #[command(alias = "ls")]
    List,
    /// Remove a toolbox
    Rm {
        name: String,
        #[arg(short, long, default_value_t = false)]
        force: bool,
    },
    /// Remove an image that no toolbox uses
    Rmi {
        image: String,
        #[arg(short, long, default_value_t = false)]
        force: bool,
    },
}

impl Commands {
    fn toolbox_name(&self) -> Option<&str> {
        match self {
            Commands::Create { name, .. }
            | Commands::Enter { name }
            | Commands::Run { name, .. }
            | Commands::Rm { name, .. } => Some(name.as_str()),
            Commands::List | Commands::Rmi { .. } => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonResult<T: Serialize> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_details: Option<ErrorDetails>,
}

struct Context {
    json: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let ctx = Context { json: cli.json };

    match dispatch(&ctx, cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            report_error(&ctx, &err);
            process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn dispatch(ctx: &Context, cli: Cli) -> Result<i32> {
    if let Some(name) = cli.command.toolbox_name() {
        validate_name(name)?;
    }
    if let Commands::Run { command, .. } = &cli.command {
        if command.is_empty() {
            return Err(ToolboxError::InvalidInput(
                "run needs a command after `--`".to_string(),
            ));
        }
    }

    let location = config::resolve_config_path(cli.config.as_deref());
    let cfg = config::load(&location)?;
    let env_engine = env::var(ENGINE_ENV).ok();
    let preference = cfg.effective_preference(cli.engine.as_deref(), env_engine.as_deref())?;
    debug!(config = %location.path.display(), %preference, "resolved configuration");

    // Bad create input fails before any engine probe.
    let create_spec = match &cli.command {
        Commands::Create {
            name,
            image,
            volumes,
            env,
            workdir,
            ..
        } => Some(cfg.resolve_spec(
            name,
            &CreateOverrides {
                image: image.clone(),
                mounts: volumes.clone(),
                env: env.clone(),
                workdir: workdir.clone(),
            },
        )?),
        _ => None,
    };

    let selector = EngineSelector::new(SystemRunner, cfg.engine_options());
    let engine = selector.select(preference)?;
    let mut manager = LifecycleManager::new(engine, cfg.shell());
    debug!(engine = %manager.engine_kind(), "engine ready");

    match cli.command {
        Commands::Create { recreate, .. } => {
            let spec = create_spec.ok_or_else(|| {
                ToolboxError::InvalidInput("create needs a toolbox spec".to_string())
            })?;
            let report = manager.create(&spec, recreate)?;
            print_create(ctx, &report)?;
            Ok(0)
        }
        Commands::Enter { name } => {
            let cancel = CancelFlag::new();
            cancel.install_signal_handler()?;
            let code = manager.enter(&name, TtyConfig::detect(), &cancel)?;
            print_exit(ctx, &name, code)?;
            Ok(code)
        }
        Commands::Run { name, command } => {
            let cancel = CancelFlag::new();
            cancel.install_signal_handler()?;
            let code = manager.run(&name, &command, TtyConfig::detect(), &cancel)?;
            print_exit(ctx, &name, code)?;
            Ok(code)
        }
        Commands::List => {
            let records = manager.list()?;
            if ctx.json {
                print_ok(&records)?;
            } else {
                print_table(&records);
            }
            Ok(0)
        }
        Commands::Rm { name, force } => {
            manager.remove(&name, force)?;
            if ctx.json {
                print_ok(&json!({ "name": name, "removed": true }))?;
            } else {
                println!("removed toolbox '{name}'");
            }
            Ok(0)
        }
        Commands::Rmi { image, force } => {
            manager.remove_image(&image, force)?;
            if ctx.json {
                print_ok(&json!({ "image": image, "removed": true }))?;
            } else {
                println!("removed image '{image}'");
            }
            Ok(0)
        }
    }
}

fn print_create(ctx: &Context, report: &CreateReport) -> Result<()> {
    if ctx.json {
        return print_ok(report);
    }
    let verb = match report.outcome {
        CreateOutcome::Created => "created",
        CreateOutcome::AlreadyExists => "already exists:",
        CreateOutcome::Resumed => "resumed",
        CreateOutcome::Recreated => "recreated",
    };
    println!(
        "{verb} toolbox '{}' ({}, {})",
        report.record.name, report.record.image, report.record.state
    );
    Ok(())
}

/// Interactive output already went to the terminal; only `--json` callers
/// get a summary line.
fn print_exit(ctx: &Context, name: &str, code: i32) -> Result<()> {
    if ctx.json {
        print_ok(&json!({ "name": name, "exit_code": code }))?;
    }
    Ok(())
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

fn print_table(records: &[ToolboxRecord]) {
    if records.is_empty() {
        println!("no toolboxes");
        return;
    }
    let name_width = records
        .iter()
        .map(|record| record.name.len())
        .max()
        .unwrap_or(0)
        .max("NAME".len());
    let image_width = records
        .iter()
        .map(|record| record.image.len())
        .max()
        .unwrap_or(0)
        .max("IMAGE".len());
    println!(
        "{:<name_width$}  {:<12}  {:<8}  {:<image_width$}  CREATED",
        "NAME", "ID", "STATE", "IMAGE"
    );
    for record in records {
        println!(
            "{:<name_width$}  {:<12}  {:<8}  {:<image_width$}  {}",
            record.name,
            short_id(&record.id),
            record.state.to_string(),
            record.image,
            record.created.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
}

fn print_ok<T: Serialize>(payload: &T) -> Result<()> {
    print_json(&JsonResult {
        ok: true,
        result: Some(payload),
        error: None,
        error_details: None,
    })
}

fn print_json<T: Serialize>(payload: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{text}");
    Ok(())
}

fn error_envelope(err: &ToolboxError) -> JsonResult<serde_json::Value> {
    JsonResult {
        ok: false,
        result: None,
        error: Some(err.to_string()),
        error_details: Some(err.details()),
    }
}

fn report_error(ctx: &Context, err: &ToolboxError) {
    if ctx.json && print_json(&error_envelope(err)).is_ok() {
        return;
    }
    eprintln!("error: {err}");
    if let Some(hint) = err.hint() {
        eprintln!("hint: {hint}");
    }
}
