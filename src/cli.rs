use crate::export::{DirectorySink, ExportHandler};
use crate::gateway::{RequestGateway, ReqwestTransport};
use crate::health::HealthProbe;
use crate::model::{ChartKind, ChartSelections, ClientConfig, ExportKind, WorkflowEvent};
use crate::orchestrator::{
    batch_commands, run_controller, run_shell_threaded, BatchPlan, ControllerOptions, UiCommand,
};
use crate::session::{FileStore, KeyValueStore, MemoryStore, SessionIdentity};
use crate::text_summary::{build_text_summary, status_lines};
use crate::workflow::WorkflowController;
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "analyst-cli",
    version,
    about = "Client for the data analyst backend: upload, clean, chart, ask and export"
)]
pub struct Cli {
    /// Base URL of the analysis API
    #[arg(long, env = "ANALYST_API_URL", default_value = "http://localhost:5000/api")]
    pub base_url: String,

    /// Default per-request timeout
    #[arg(long, default_value = "5m")]
    pub timeout: humantime::Duration,

    /// Timeout for dataset uploads
    #[arg(long, default_value = "10m")]
    pub upload_timeout: humantime::Duration,

    /// Timeout for the startup health check
    #[arg(long, default_value = "5s")]
    pub health_timeout: humantime::Duration,

    /// Do not probe the backend at startup
    #[arg(long)]
    pub skip_health_check: bool,

    /// File holding the persisted session identity
    #[arg(long)]
    pub session_file: Option<PathBuf>,

    /// Keep the session identity in memory only; every run starts a fresh server session
    #[arg(long, conflicts_with = "session_file")]
    pub ephemeral_session: bool,

    /// Directory for exports and saved chart images
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Run the whole pipeline on this dataset and exit (no interactive shell)
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Chart category to generate (repeatable); defaults to every category except all_plots
    #[arg(long = "chart", value_enum)]
    pub charts: Vec<ChartKind>,

    /// Skip chart generation in batch mode
    #[arg(long)]
    pub no_charts: bool,

    /// Skip insight generation in batch mode
    #[arg(long)]
    pub no_insights: bool,

    /// Decode chart images and Q&A figures into PNG files in the output directory
    #[arg(long)]
    pub save_charts: bool,

    /// Question to ask after cleaning (repeatable, batch mode)
    #[arg(long = "ask")]
    pub questions: Vec<String>,

    /// Report to download at the end (repeatable, batch mode)
    #[arg(long = "export", value_enum)]
    pub exports: Vec<ExportKind>,

    /// Print the final workflow state as JSON (batch mode)
    #[arg(long)]
    pub json: bool,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

pub async fn run(args: Cli) -> Result<()> {
    if args.json && args.file.is_none() {
        return Err(anyhow::anyhow!(
            "--json needs --file. Use --file <PATH> --json together."
        ));
    }

    let cfg = build_config(&args);
    tracing::debug!(?cfg, "configuration resolved");

    match args.file.clone() {
        Some(file) => run_batch(&args, &cfg, file).await,
        None => run_shell(&args, &cfg).await,
    }
}

/// Build a `ClientConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> ClientConfig {
    ClientConfig {
        base_url: args.base_url.clone(),
        request_timeout: Duration::from(args.timeout),
        upload_timeout: Duration::from(args.upload_timeout),
        health_timeout: Duration::from(args.health_timeout),
        skip_health_check: args.skip_health_check,
        session_file: (!args.ephemeral_session).then(|| {
            args.session_file
                .clone()
                .unwrap_or_else(FileStore::default_path)
        }),
        output_dir: args.output_dir.clone(),
        save_charts: args.save_charts,
        user_agent: format!("analyst-cli/{}", env!("CARGO_PKG_VERSION")),
    }
}

/// Chart selection for batch runs and the shell's bare `charts` command.
fn chart_selections(args: &Cli) -> ChartSelections {
    if args.charts.is_empty() {
        ChartSelections::default()
    } else {
        ChartSelections::from_kinds(&args.charts)
    }
}

fn build_controller(cfg: &ClientConfig) -> Result<(WorkflowController, Option<HealthProbe>)> {
    let transport =
        ReqwestTransport::new(&cfg.user_agent).context("failed to build HTTP client")?;
    let store: Box<dyn KeyValueStore> = match cfg.session_file.as_ref() {
        Some(path) => Box::new(FileStore::new(path.clone())),
        None => Box::new(MemoryStore::default()),
    };
    let session = Arc::new(SessionIdentity::new(store));
    let gateway = RequestGateway::new(
        &cfg.base_url,
        cfg.request_timeout,
        Arc::new(transport),
        session,
    );
    let exporter = ExportHandler::new(
        Box::new(DirectorySink::new(cfg.output_dir.clone())),
        cfg.request_timeout,
    );
    let health = (!cfg.skip_health_check)
        .then(|| HealthProbe::new(gateway.clone(), cfg.health_timeout));
    Ok((
        WorkflowController::new(gateway, exporter, cfg.upload_timeout),
        health,
    ))
}

fn controller_options(cfg: &ClientConfig, stop_on_error: bool) -> ControllerOptions {
    ControllerOptions {
        save_images_to: cfg.save_charts.then(|| cfg.output_dir.clone()),
        stop_on_error,
    }
}

/// Map a workflow event to output lines. Stage results go to stdout, progress to stderr.
fn render_event(ev: WorkflowEvent, results_to_stdout: bool) -> Vec<OutputLine> {
    match ev {
        WorkflowEvent::StageStarted { stage } => vec![OutputLine::Stderr(format!("== {stage} =="))],
        WorkflowEvent::StageCompleted(output) => {
            if !results_to_stdout {
                return Vec::new();
            }
            build_text_summary(&output)
                .lines
                .into_iter()
                .map(OutputLine::Stdout)
                .collect()
        }
        WorkflowEvent::StageFailed { stage, error } => vec![OutputLine::Stderr(format!(
            "{stage} failed ({}): {}",
            error.kind.label(),
            error.message
        ))],
        WorkflowEvent::StageLocked { stage, requires } => vec![OutputLine::Stderr(format!(
            "{stage} is not available yet: run {requires} first"
        ))],
        WorkflowEvent::Busy => vec![OutputLine::Stderr(
            "Busy: wait for the current action to finish.".into(),
        )],
        WorkflowEvent::Warning(w) => vec![OutputLine::Stderr(format!("Warning: {w}"))],
        WorkflowEvent::Status(s) => status_lines(&s).into_iter().map(OutputLine::Stdout).collect(),
        WorkflowEvent::Info(msg) => vec![OutputLine::Stderr(msg)],
    }
}

fn spawn_event_printer(
    mut event_rx: mpsc::UnboundedReceiver<WorkflowEvent>,
    out_tx: mpsc::UnboundedSender<OutputLine>,
    results_to_stdout: bool,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(ev) = event_rx.recv().await {
            for line in render_event(ev, results_to_stdout) {
                let _ = out_tx.send(line);
            }
        }
    })
}

async fn run_batch(args: &Cli, cfg: &ClientConfig, file: PathBuf) -> Result<()> {
    let (mut controller, health) = build_controller(cfg)?;
    let plan = BatchPlan {
        file,
        charts: (!args.no_charts).then(|| chart_selections(args)),
        insights: !args.no_insights,
        questions: args.questions.clone(),
        exports: args.exports.clone(),
    };

    let (out_tx, out_handle) = spawn_output_writer();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<WorkflowEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();
    for cmd in batch_commands(&plan) {
        cmd_tx.send(cmd).context("controller channel closed")?;
    }
    drop(cmd_tx);

    let printer = spawn_event_printer(event_rx, out_tx.clone(), !args.json);
    let ok = run_controller(
        &mut controller,
        health,
        &controller_options(cfg, true),
        event_tx,
        cmd_rx,
    )
    .await;
    let _ = printer.await;

    if args.json {
        let report = serde_json::json!({
            "session_id": controller.gateway().session().resolve(),
            "phase": controller.state().phase(),
            "state": controller.state(),
            "last_error": controller.last_error(),
        });
        let out = serde_json::to_string_pretty(&report)?;
        let _ = out_tx.send(OutputLine::Stdout(out));
    }

    drop(out_tx);
    let _ = out_handle.await;

    if ok {
        Ok(())
    } else {
        match controller.last_error() {
            Some(e) => Err(anyhow::anyhow!("pipeline stopped: {} ({})", e.message, e.kind.label())),
            None => Err(anyhow::anyhow!("pipeline stopped before completion")),
        }
    }
}

async fn run_shell(args: &Cli, cfg: &ClientConfig) -> Result<()> {
    let (mut controller, health) = build_controller(cfg)?;
    let (out_tx, out_handle) = spawn_output_writer();
    let (event_tx, event_rx) = mpsc::unbounded_channel::<WorkflowEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let _ = out_tx.send(OutputLine::Stderr(format!(
        "Connected to {} (session {}). Type 'help' for commands.",
        cfg.base_url,
        controller.gateway().session().resolve()
    )));

    // Stdin is read on a dedicated thread to keep blocking I/O off the runtime.
    let busy = controller.busy_flag();
    let defaults = chart_selections(args);
    let reply_tx = out_tx.clone();
    let shell = std::thread::spawn(move || {
        run_shell_threaded(cmd_tx, busy, defaults, move |msg| {
            let _ = reply_tx.send(OutputLine::Stdout(msg));
        })
    });

    let printer = spawn_event_printer(event_rx, out_tx.clone(), true);
    run_controller(
        &mut controller,
        health,
        &controller_options(cfg, false),
        event_tx,
        cmd_rx,
    )
    .await;
    let _ = printer.await;

    let join_res = tokio::task::spawn_blocking(move || shell.join()).await;
    if let Ok(Err(_)) = join_res {
        return Err(anyhow::anyhow!("shell thread panicked"));
    }

    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}
