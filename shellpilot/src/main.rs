//! Interactive shell agent CLI.
//!
//! `shellpilot run` starts the agent on an execution thread and the console
//! UI on the main thread; `shellpilot init` writes a default config.

use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::{Arc, mpsc};
use std::thread;

use anyhow::{Context, Result, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use shellpilot::agent::Agent;
use shellpilot::core::mode::Mode;
use shellpilot::core::types::ExitStatus;
use shellpilot::events::EventSink;
use shellpilot::exit_codes;
use shellpilot::io::config::{Config, load_config, write_config};
use shellpilot::io::cost::CostTracker;
use shellpilot::io::executor::LocalExecutor;
use shellpilot::io::model::CommandModel;
use shellpilot::io::trajectory::save_trajectory;
use shellpilot::logging;
use shellpilot::rendezvous::Rendezvous;
use shellpilot::ui::{ConsoleSink, ConsoleUi, ExitNotice, spawn_line_reader};

const DEFAULT_CONFIG: &str = ".shellpilot/config.toml";
const DEFAULT_OUTPUT: &str = ".shellpilot/last.traj.json";

#[derive(Parser)]
#[command(
    name = "shellpilot",
    version,
    about = "Interactive shell agent driven by a language model"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
        #[arg(long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
    },
    /// Run the agent on a task.
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Task description given to the model.
    #[arg(short, long)]
    task: String,
    /// Config file; defaults apply when it does not exist.
    #[arg(long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
    /// Initial mode.
    #[arg(long, conflicts_with = "yolo")]
    mode: Option<Mode>,
    /// Shorthand for `--mode yolo`.
    #[arg(long)]
    yolo: bool,
    /// Per-run cost limit; 0 disables.
    #[arg(long)]
    cost_limit: Option<f64>,
    /// Per-run model call limit; 0 disables.
    #[arg(long)]
    step_limit: Option<u64>,
    /// Where to write the trajectory JSON.
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,
}

impl RunArgs {
    fn apply(&self, config: &mut Config) {
        if self.yolo {
            config.agent.mode = Mode::Yolo;
        } else if let Some(mode) = self.mode {
            config.agent.mode = mode;
        }
        if let Some(cost_limit) = self.cost_limit {
            config.agent.cost_limit = cost_limit;
        }
        if let Some(step_limit) = self.step_limit {
            config.agent.step_limit = step_limit;
        }
    }
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::ERROR);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force, config } => cmd_init(&config, force),
        Command::Run(args) => cmd_run(&args),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &Config::default())?;
    println!("{}", path.display());
    Ok(exit_codes::SUBMITTED)
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    let mut config = load_config(&args.config)?;
    args.apply(&mut config);
    config.validate().context("validate config with overrides")?;

    let tracker = Arc::new(CostTracker::from_config(&config.limits));
    let model = CommandModel::new(config.model.clone(), tracker)?;
    let executor = LocalExecutor::new(config.executor.clone());

    let (tx, rx) = mpsc::channel();
    let sink: Arc<dyn EventSink> = Arc::new(ConsoleSink::new(tx.clone()));
    let rendezvous = Arc::new(Rendezvous::with_sink(Arc::clone(&sink)));
    let mut agent = Agent::new(config.agent, model, executor)?
        .with_rendezvous(Arc::clone(&rendezvous))
        .with_event_sink(sink);
    let exit_notice = ExitNotice::new(tx.clone());
    spawn_line_reader(BufReader::new(io::stdin()), tx);

    let task = args.task.clone();
    let output = args.output.clone();
    let worker = thread::Builder::new()
        .name("agent".to_string())
        .spawn(move || -> Result<ExitStatus> {
            let _exit_notice = exit_notice;
            let (status, _result) = agent.run(&task);
            save_trajectory(&output, &agent.trajectory(Some(&status)))?;
            info!(path = %output.display(), "trajectory written");
            Ok(status)
        })
        .context("spawn agent thread")?;

    if ConsoleUi::new(rendezvous, io::stdout()).run(&rx)?.is_none() {
        warn!("agent thread stopped without reporting a result");
    }

    let status = worker
        .join()
        .map_err(|_| anyhow!("agent thread panicked"))??;
    Ok(exit_codes::for_status(&status))
}
