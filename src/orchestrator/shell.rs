//! Line-oriented interactive shell.
//!
//! Stdin is read on a dedicated thread so blocking reads stay off the Tokio runtime. Parsed
//! commands go to the controller loop; input that arrives while an action is running is
//! refused here.

use super::controller::UiCommand;
use crate::model::{ChartKind, ChartSelections, ExportKind};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

pub(crate) const HELP: &[&str] = &[
    "Commands:",
    "  upload <path>        upload a CSV, XLS, XLSX or JSON dataset",
    "  overview             compute the dataset overview",
    "  clean                run automatic cleaning",
    "  charts [kinds...]    generate charts (basic scatter time_series correlation categorical all)",
    "  ask <question>       ask a question about the cleaned data",
    "  insights             generate narrative insights",
    "  export <kind>        download a report (excel, powerbi, pdf)",
    "  status               show progress and available actions",
    "  session [reset]      show or reset the session identity",
    "  help                 show this help",
    "  quit                 exit",
];

#[derive(Debug, PartialEq)]
pub(crate) enum ShellInput {
    Command(UiCommand),
    Help,
    Blank,
}

pub(crate) fn parse_line(line: &str, default_charts: ChartSelections) -> Result<ShellInput, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(ShellInput::Blank);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((v, r)) => (v, r.trim()),
        None => (line, ""),
    };

    let cmd = match verb.to_ascii_lowercase().as_str() {
        "help" | "?" => return Ok(ShellInput::Help),
        "quit" | "exit" | "q" => UiCommand::Quit,
        "upload" => {
            if rest.is_empty() {
                return Err("usage: upload <path>".to_string());
            }
            UiCommand::Upload(PathBuf::from(unquote(rest)))
        }
        "overview" => UiCommand::Overview,
        "clean" => UiCommand::Clean,
        "charts" | "eda" => {
            if rest.is_empty() {
                UiCommand::Charts(default_charts)
            } else {
                let kinds = rest
                    .split(|c: char| c.is_whitespace() || c == ',')
                    .filter(|s| !s.is_empty())
                    .map(|s| ChartKind::parse(s).ok_or_else(|| format!("unknown chart kind: {s}")))
                    .collect::<Result<Vec<_>, _>>()?;
                UiCommand::Charts(ChartSelections::from_kinds(&kinds))
            }
        }
        // Blank questions go through so the controller can classify them.
        "ask" => UiCommand::Ask(rest.to_string()),
        "insights" => UiCommand::Insights,
        "export" => {
            let kind = ExportKind::parse(rest)
                .ok_or_else(|| "usage: export <excel|powerbi|pdf>".to_string())?;
            UiCommand::Export(kind)
        }
        "status" => UiCommand::Status,
        "session" => match rest {
            "" => UiCommand::Session,
            "reset" => UiCommand::ResetSession,
            _ => return Err("usage: session [reset]".to_string()),
        },
        other => return Err(format!("unknown command: {other} (try 'help')")),
    };
    Ok(ShellInput::Command(cmd))
}

fn unquote(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(s)
}

/// Read commands from stdin until EOF or `quit`. `reply` receives messages for the user.
pub(crate) fn run_threaded(
    cmd_tx: UnboundedSender<UiCommand>,
    busy: Arc<AtomicBool>,
    default_charts: ChartSelections,
    reply: impl Fn(String),
) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        match parse_line(&line, default_charts) {
            Ok(ShellInput::Blank) => {}
            Ok(ShellInput::Help) => HELP.iter().for_each(|l| reply(l.to_string())),
            Ok(ShellInput::Command(UiCommand::Quit)) => break,
            Ok(ShellInput::Command(cmd)) => {
                if busy.load(Ordering::Acquire) {
                    reply("Busy: wait for the current action to finish.".to_string());
                    continue;
                }
                if cmd_tx.send(cmd).is_err() {
                    break;
                }
            }
            Err(msg) => reply(msg),
        }
    }
    let _ = cmd_tx.send(UiCommand::Quit);
}
