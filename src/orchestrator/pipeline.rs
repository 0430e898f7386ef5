//! Batch mode: the full pipeline expressed as a fixed command script.

use super::controller::UiCommand;
use crate::model::{ChartSelections, ExportKind};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub(crate) struct BatchPlan {
    pub file: PathBuf,
    /// `None` skips chart generation.
    pub charts: Option<ChartSelections>,
    pub insights: bool,
    pub questions: Vec<String>,
    pub exports: Vec<ExportKind>,
}

/// Upload, overview and clean always run; the rest follows the plan. Questions run after
/// charts and insights so their answers do not delay the main results.
pub(crate) fn batch_commands(plan: &BatchPlan) -> Vec<UiCommand> {
    let mut cmds = vec![
        UiCommand::Upload(plan.file.clone()),
        UiCommand::Overview,
        UiCommand::Clean,
    ];
    if let Some(sel) = plan.charts {
        cmds.push(UiCommand::Charts(sel));
    }
    if plan.insights {
        cmds.push(UiCommand::Insights);
    }
    cmds.extend(plan.questions.iter().cloned().map(UiCommand::Ask));
    cmds.extend(plan.exports.iter().copied().map(UiCommand::Export));
    cmds
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_plan_orders_stages() {
        let plan = BatchPlan {
            file: PathBuf::from("sales.csv"),
            charts: Some(ChartSelections::default()),
            insights: true,
            questions: vec!["how many rows".into()],
            exports: vec![ExportKind::Excel, ExportKind::Pdf],
        };
        assert_eq!(
            batch_commands(&plan),
            vec![
                UiCommand::Upload(PathBuf::from("sales.csv")),
                UiCommand::Overview,
                UiCommand::Clean,
                UiCommand::Charts(ChartSelections::default()),
                UiCommand::Insights,
                UiCommand::Ask("how many rows".into()),
                UiCommand::Export(ExportKind::Excel),
                UiCommand::Export(ExportKind::Pdf),
            ]
        );
    }

    #[test]
    fn skipped_stages_are_left_out() {
        let plan = BatchPlan {
            file: PathBuf::from("sales.csv"),
            charts: None,
            insights: false,
            questions: Vec::new(),
            exports: Vec::new(),
        };
        assert_eq!(batch_commands(&plan).len(), 3);
    }
}
