//! Workflow command loop.
//!
//! Owns the [`WorkflowController`], runs one command at a time and emits events for
//! presentation layers. The startup health probe runs beside it on its own task.

use crate::charts;
use crate::error::WorkflowError;
use crate::health::HealthProbe;
use crate::model::{
    ChartSelections, ExportKind, HealthStatus, Stage, StageOutput, WorkflowEvent,
};
use crate::workflow::{health_warning, WorkflowController};
use std::path::PathBuf;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Commands emitted by presentation layers.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum UiCommand {
    Upload(PathBuf),
    Overview,
    Clean,
    Charts(ChartSelections),
    Ask(String),
    Insights,
    Export(ExportKind),
    Status,
    Session,
    ResetSession,
    Quit,
}

impl UiCommand {
    fn stage(&self) -> Option<Stage> {
        match self {
            UiCommand::Upload(_) => Some(Stage::Upload),
            UiCommand::Overview => Some(Stage::Overview),
            UiCommand::Clean => Some(Stage::Clean),
            UiCommand::Charts(_) => Some(Stage::Charts),
            UiCommand::Ask(_) => Some(Stage::Ask),
            UiCommand::Insights => Some(Stage::Insights),
            UiCommand::Export(_) => Some(Stage::Export),
            UiCommand::Status | UiCommand::Session | UiCommand::ResetSession | UiCommand::Quit => {
                None
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ControllerOptions {
    /// Write chart images and Q&A figures into this directory when set.
    pub save_images_to: Option<PathBuf>,
    /// Stop processing commands after the first failed or refused stage.
    pub stop_on_error: bool,
}

/// Process commands until `Quit`, the channel closes, or (with `stop_on_error`) a stage fails.
/// Returns whether every stage that ran succeeded.
pub(crate) async fn run_controller(
    controller: &mut WorkflowController,
    health: Option<HealthProbe>,
    opts: &ControllerOptions,
    event_tx: UnboundedSender<WorkflowEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> bool {
    // The health task reports its own warning; a running stage does not delay it.
    let mut health_task = health.map(|probe| {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            let status = probe.check().await;
            if let Some(warning) = health_warning(probe.base_url(), &status) {
                let _ = tx.send(WorkflowEvent::Warning(warning));
            }
            status
        })
    });
    let mut all_ok = true;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                if cmd == UiCommand::Quit {
                    break;
                }
                let ok = dispatch(controller, cmd, opts, &event_tx).await;
                all_ok &= ok;
                if !ok && opts.stop_on_error {
                    break;
                }
            }
            // Keep the JoinHandle in place until this branch wins so a losing select does not drop it.
            status = async {
                match health_task.as_mut() {
                    Some(h) => h.await,
                    None => futures::future::pending().await,
                }
            } => {
                health_task = None;
                let status = status.unwrap_or_else(|e| HealthStatus::Unreachable {
                    reason: format!("health probe task failed: {e}"),
                });
                controller.note_health(&status);
            }
        }
    }

    if let Some(h) = health_task {
        h.abort();
    }
    all_ok
}

/// Run one command and report its outcome. Returns false when a stage failed or was refused.
async fn dispatch(
    controller: &mut WorkflowController,
    cmd: UiCommand,
    opts: &ControllerOptions,
    event_tx: &UnboundedSender<WorkflowEvent>,
) -> bool {
    let Some(stage) = cmd.stage() else {
        match cmd {
            UiCommand::Status => {
                let _ = event_tx.send(WorkflowEvent::Status(controller.snapshot()));
            }
            UiCommand::Session => {
                let id = controller.gateway().session().resolve();
                let _ = event_tx.send(WorkflowEvent::Info(format!("Session: {id}")));
            }
            UiCommand::ResetSession => {
                let id = controller.reset_session();
                let _ = event_tx.send(WorkflowEvent::Info(format!(
                    "Started a new session: {id}"
                )));
            }
            _ => {}
        }
        return true;
    };

    let _ = event_tx.send(WorkflowEvent::StageStarted { stage });
    let res = match cmd {
        UiCommand::Upload(path) => controller.upload(&path).await.map(StageOutput::Uploaded),
        UiCommand::Overview => controller.compute_overview().await.map(StageOutput::Overview),
        UiCommand::Clean => controller.clean().await.map(StageOutput::Cleaned),
        UiCommand::Charts(sel) => controller
            .generate_charts(sel)
            .await
            .map(StageOutput::Charts),
        UiCommand::Ask(question) => controller
            .ask_question(&question)
            .await
            .map(|answer| StageOutput::Answer { question, answer }),
        UiCommand::Insights => controller.get_insights().await.map(StageOutput::Insights),
        UiCommand::Export(kind) => controller
            .export(kind)
            .await
            .map(|path| StageOutput::Exported { kind, path }),
        UiCommand::Status | UiCommand::Session | UiCommand::ResetSession | UiCommand::Quit => {
            return true
        }
    };

    match res {
        Ok(output) => {
            if let Some(dir) = opts.save_images_to.as_deref() {
                save_images(dir, &output, event_tx).await;
            }
            let _ = event_tx.send(WorkflowEvent::StageCompleted(output));
            true
        }
        Err(WorkflowError::Request(error)) => {
            let _ = event_tx.send(WorkflowEvent::StageFailed { stage, error });
            false
        }
        Err(WorkflowError::StageLocked { stage, requires }) => {
            let _ = event_tx.send(WorkflowEvent::StageLocked { stage, requires });
            false
        }
        Err(WorkflowError::Busy) => {
            let _ = event_tx.send(WorkflowEvent::Busy);
            false
        }
    }
}

/// Image writes are a convenience: failures become warnings and never fail the stage.
async fn save_images(
    dir: &std::path::Path,
    output: &StageOutput,
    event_tx: &UnboundedSender<WorkflowEvent>,
) {
    let res = match output {
        StageOutput::Charts(list) if !list.is_empty() => charts::save_charts(dir, list)
            .await
            .map(|paths| format!("Saved {} chart images to {}", paths.len(), dir.display())),
        StageOutput::Answer { question, answer } => match answer.figure.as_deref() {
            Some(fig) => charts::save_figure(dir, question, fig)
                .await
                .map(|p| format!("Saved figure to {}", p.display())),
            None => return,
        },
        _ => return,
    };
    let ev = match res {
        Ok(msg) => WorkflowEvent::Info(msg),
        Err(e) => WorkflowEvent::Warning(format!("Could not save images: {e}")),
    };
    let _ = event_tx.send(ev);
}
