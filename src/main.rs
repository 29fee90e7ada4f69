//! Orchestra CLI Entry Point
//!
//! Requests a workflow action from a packs directory as a given user, and
//! optionally runs it to completion in-process or lists visible executions.
//!
//! # Usage
//!
//! ```bash
//! # Request a workflow action as the system user
//! orchestra wolfpack.sequential --packs ./packs
//!
//! # Pass input and run it to completion
//! orchestra wolfpack.sequential --input who=Tom --simulate --parallel 8
//!
//! # List executions visible to a user, with RBAC definitions and isolation
//! orchestra --list --user user_two --rbac ./rbac --isolation
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use colored::{ColoredString, Colorize};
use log::{debug, error, info};
use serde_json::{Map, Value};

use orchestra::execution::{
    ChannelPublisher, ExecutionService, ExecutionStatus, ListRequest, LocalRunner,
};
use orchestra::rbac::RbacSnapshot;
use orchestra::workflow::PackLoader;
use orchestra::{EngineConfig, APP_NAME, VERSION};

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct Config {
    action_ref: Option<String>,
    config_path: Option<PathBuf>,
    packs_path: Option<PathBuf>,
    rbac_path: Option<PathBuf>,
    user: Option<String>,
    input: Map<String, Value>,
    simulate: bool,
    failing_tasks: Vec<String>,
    max_parallel: Option<usize>,
    isolation: bool,
    list: bool,
    limit: Option<i64>,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints the application banner with version information.
fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Workflow Execution Core");
    println!();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: orchestra [OPTIONS] [ACTION_REF]");
    println!();
    println!("Arguments:");
    println!("  [ACTION_REF]        Action to request, as pack.name");
    println!();
    println!("Options:");
    println!("  --config PATH       Engine configuration file (YAML)");
    println!("  --packs PATH        Packs directory (default: packs)");
    println!("  --rbac PATH         Directory with roles/ and assignments/");
    println!("  --user NAME         Request as this user (default: system user)");
    println!("  --input KEY=VALUE   Action input; VALUE is parsed as JSON when possible");
    println!("  --simulate          Run the workflow to completion in-process");
    println!("  --fail TASK         Make TASK fail during --simulate");
    println!("  --parallel N        Maximum tasks in flight (default: CPU count)");
    println!("  --isolation         Restrict users to their own executions");
    println!("  --list              List executions visible to the user");
    println!("  --limit N           Page size for --list (-1 for all)");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  orchestra wolfpack.sequential --packs ./packs");
    println!("  orchestra wolfpack.sequential --input who=Tom --simulate");
    println!("  orchestra --list --user user_two --rbac ./rbac --isolation");
}

/// Parses `KEY=VALUE`, reading VALUE as JSON and falling back to a string.
fn parse_input(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("Invalid input '{}', expected KEY=VALUE", raw))?;
    if key.trim().is_empty() {
        return Err(format!("Invalid input '{}', empty key", raw));
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.trim().to_string(), value))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    fn value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
        *i += 1;
        args.get(*i)
            .map(String::as_str)
            .ok_or_else(|| format!("{} requires an argument", flag))
    }

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--verbose" | "-v" => config.verbose = true,
            "--simulate" => config.simulate = true,
            "--isolation" => config.isolation = true,
            "--list" => config.list = true,
            "--config" => config.config_path = Some(PathBuf::from(value(args, &mut i, arg)?)),
            "--packs" => config.packs_path = Some(PathBuf::from(value(args, &mut i, arg)?)),
            "--rbac" => config.rbac_path = Some(PathBuf::from(value(args, &mut i, arg)?)),
            "--user" => config.user = Some(value(args, &mut i, arg)?.to_string()),
            "--fail" => config.failing_tasks.push(value(args, &mut i, arg)?.to_string()),
            "--input" => {
                let (key, parsed) = parse_input(value(args, &mut i, arg)?)?;
                config.input.insert(key, parsed);
            }
            "--parallel" => {
                let raw = value(args, &mut i, arg)?;
                config.max_parallel = Some(
                    raw.parse()
                        .map_err(|_| format!("Invalid parallel value: {}", raw))?,
                );
            }
            "--limit" => {
                let raw = value(args, &mut i, arg)?;
                config.limit = Some(raw.parse().map_err(|_| format!("Invalid limit: {}", raw))?);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.action_ref.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.action_ref = Some(arg.clone());
            }
        }
        i += 1;
    }

    if config.action_ref.is_none() && !config.list {
        return Err("Nothing to do: give an action reference or --list".to_string());
    }

    Ok(config)
}

/// Builds the engine configuration from the file (if any) and CLI overrides.
fn engine_config(cli: &Config) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config_path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };

    if let Some(packs) = &cli.packs_path {
        config.packs_path = packs.clone();
    }
    if let Some(rbac) = &cli.rbac_path {
        config.rbac_path = Some(rbac.clone());
    }
    if cli.isolation {
        config.rbac.permission_isolation = true;
    }

    config.validate()?;
    Ok(config)
}

fn paint(status: ExecutionStatus) -> ColoredString {
    let text = status.as_str();
    match status {
        ExecutionStatus::Succeeded => text.green(),
        ExecutionStatus::Failed | ExecutionStatus::TimedOut => text.red(),
        ExecutionStatus::Canceled | ExecutionStatus::Paused => text.yellow(),
        ExecutionStatus::Requested | ExecutionStatus::Running => text.cyan(),
    }
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    // Parse arguments
    let cli = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(cli.verbose);
    print_banner();

    let config = engine_config(&cli)?;
    let user = cli
        .user
        .clone()
        .unwrap_or_else(|| config.rbac.system_user.clone());

    info!("Packs: {}", config.packs_path.display());
    if config.rbac.permission_isolation {
        info!("Permission isolation: on");
    }

    let snapshot = match &config.rbac_path {
        Some(path) => RbacSnapshot::load_from_dir(path)?,
        None => RbacSnapshot::new(),
    };

    // Drain published events on a background thread
    let (publisher, events) = ChannelPublisher::new();
    let drain = thread::spawn(move || {
        let mut count = 0;
        for event in events {
            debug!(
                "Event: {:?} {:?} {} rev {} -> {}",
                event.kind, event.record, event.execution_id, event.revision, event.status
            );
            count += 1;
        }
        count
    });

    let loader = PackLoader::new(config.packs_path.clone());
    let service = ExecutionService::new(config, Arc::new(loader), snapshot, Arc::new(publisher))?;

    if let Some(action_ref) = &cli.action_ref {
        info!("Requesting {} as '{}'", action_ref, user);
        let (execution, workflow) = service
            .request(&user, action_ref, cli.input.clone())
            .map_err(|e| {
                error!("Request failed: {}", e);
                e
            })?;

        println!("{}", serde_json::to_string_pretty(&execution)?);
        println!();
        println!("Execution {} is {}", execution.id, paint(execution.status));

        if let Some(workflow) = workflow {
            if cli.simulate {
                let mut runner = LocalRunner::for_service(&service);
                if let Some(max) = cli.max_parallel {
                    runner = runner.with_max_parallel(max);
                }
                for task in &cli.failing_tasks {
                    runner = runner.with_failing_task(task.clone());
                }

                let finished = runner.run(&workflow)?;
                println!();
                println!("{}", serde_json::to_string_pretty(&finished)?);
                println!();
                println!(
                    "Workflow execution {} finished as {} ({} tasks)",
                    finished.id,
                    paint(finished.status),
                    finished.flow.sequence.len()
                );
            } else {
                println!("Workflow execution {} is {}", workflow.id, paint(workflow.status));
            }
        }
    }

    if cli.list {
        let mut request = ListRequest::new();
        if let Some(limit) = cli.limit {
            request = request.with_limit(limit);
        }

        let executions = service.list_executions(&user, request)?;
        println!();
        println!("{} executions visible to '{}':", executions.len(), user);
        for execution in &executions {
            println!(
                "  {}  {:<32} {:<10} {}",
                execution.id,
                execution.action,
                paint(execution.status),
                execution.context.user
            );
        }
    }

    // Closing the service closes the event channel
    drop(service);
    let published = drain.join().map_err(|_| "Event thread panicked")?;
    debug!("{} events published", published);

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
