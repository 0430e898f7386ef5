//! Application-level orchestration.
//!
//! The controller loop owns the workflow and serializes commands. Presentation layers
//! (the batch pipeline and the interactive shell) only produce commands and consume events.

mod controller;
mod pipeline;
mod shell;

pub(crate) use controller::{run_controller, ControllerOptions, UiCommand};
pub(crate) use pipeline::{batch_commands, BatchPlan};
pub(crate) use shell::run_threaded as run_shell_threaded;
