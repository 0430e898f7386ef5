use crate::error::RequestError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub upload_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub health_timeout: Duration,
    pub skip_health_check: bool,
    /// `None` keeps the session identity in memory only.
    pub session_file: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub save_charts: bool,
    pub user_agent: String,
}

/// One step of the analysis pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Upload,
    Overview,
    Clean,
    Charts,
    Ask,
    Insights,
    Export,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Upload,
        Stage::Overview,
        Stage::Clean,
        Stage::Charts,
        Stage::Ask,
        Stage::Insights,
        Stage::Export,
    ];

    /// The stage whose result must be present before this one may run.
    pub fn prerequisite(self) -> Option<Stage> {
        match self {
            Stage::Upload => None,
            Stage::Overview => Some(Stage::Upload),
            Stage::Clean => Some(Stage::Overview),
            Stage::Charts | Stage::Ask => Some(Stage::Clean),
            Stage::Insights | Stage::Export => Some(Stage::Overview),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Upload => "upload",
            Stage::Overview => "overview",
            Stage::Clean => "clean",
            Stage::Charts => "charts",
            Stage::Ask => "ask",
            Stage::Insights => "insights",
            Stage::Export => "export",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse progress of the pipeline, derived from which stage results are present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    Empty,
    Uploaded,
    OverviewComputed,
    Cleaned,
    ChartsGenerated,
    InsightsGenerated,
    ExportReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub rows: u64,
    pub cols: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSummary {
    pub filename: String,
    pub shape: Shape,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub memory_usage: Option<f64>,
    /// Column labels; numeric headers (spreadsheet years, positional JSON columns) arrive as numbers.
    #[serde(default, deserialize_with = "labels_as_strings")]
    pub columns: Vec<String>,
    #[serde(default)]
    pub dtypes: BTreeMap<String, String>,
}

fn labels_as_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|v| match v {
            Value::String(s) => s,
            other => other.to_string(),
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Overview {
    pub num_rows: u64,
    pub num_cols: u64,
    #[serde(default)]
    pub missing_counts: BTreeMap<String, u64>,
    #[serde(default)]
    pub dtypes: BTreeMap<String, String>,
    #[serde(default)]
    pub summary_stats: BTreeMap<String, BTreeMap<String, Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleaningReport {
    pub rows_before: u64,
    pub rows_after: u64,
    pub duplicates_removed: u64,
    #[serde(default)]
    pub imputations: BTreeMap<String, String>,
    #[serde(default)]
    pub inferred_types: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanResult {
    #[serde(default)]
    pub preview: Vec<Map<String, Value>>,
    pub cleaning_report: CleaningReport,
    #[serde(default)]
    pub shape: Option<Shape>,
}

/// Which chart categories the server should compute. Sent verbatim as `chart_selections`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartSelections {
    pub basic_plots: bool,
    pub scatter_plots: bool,
    pub time_series: bool,
    pub correlation: bool,
    pub categorical: bool,
    pub all_plots: bool,
}

impl Default for ChartSelections {
    fn default() -> Self {
        Self {
            basic_plots: true,
            scatter_plots: true,
            time_series: true,
            correlation: true,
            categorical: true,
            all_plots: false,
        }
    }
}

impl ChartSelections {
    pub fn none() -> Self {
        Self {
            basic_plots: false,
            scatter_plots: false,
            time_series: false,
            correlation: false,
            categorical: false,
            all_plots: false,
        }
    }

    pub fn from_kinds(kinds: &[ChartKind]) -> Self {
        let mut sel = Self::none();
        for kind in kinds {
            sel.enable(*kind);
        }
        sel
    }

    pub fn enable(&mut self, kind: ChartKind) {
        match kind {
            ChartKind::BasicPlots => self.basic_plots = true,
            ChartKind::ScatterPlots => self.scatter_plots = true,
            ChartKind::TimeSeries => self.time_series = true,
            ChartKind::Correlation => self.correlation = true,
            ChartKind::Categorical => self.categorical = true,
            ChartKind::AllPlots => self.all_plots = true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum ChartKind {
    BasicPlots,
    ScatterPlots,
    TimeSeries,
    Correlation,
    Categorical,
    AllPlots,
}

impl ChartKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "basic" | "basic_plots" => Some(ChartKind::BasicPlots),
            "scatter" | "scatter_plots" => Some(ChartKind::ScatterPlots),
            "time_series" | "timeseries" => Some(ChartKind::TimeSeries),
            "correlation" => Some(ChartKind::Correlation),
            "categorical" => Some(ChartKind::Categorical),
            "all" | "all_plots" => Some(ChartKind::AllPlots),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chart {
    pub title: String,
    /// Embeddable image reference, usually a `data:image/png;base64,` URL.
    pub image: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QaAnswer {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub table: Option<Vec<Map<String, Value>>>,
    #[serde(default)]
    pub figure: Option<String>,
    /// Server-reported failure delivered with a success status.
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ExportKind {
    Excel,
    Powerbi,
    Pdf,
}

impl ExportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExportKind::Excel => "excel",
            ExportKind::Powerbi => "powerbi",
            ExportKind::Pdf => "pdf",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportKind::Excel => "xlsx",
            ExportKind::Powerbi => "zip",
            ExportKind::Pdf => "pdf",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "excel" | "xlsx" => Some(ExportKind::Excel),
            "powerbi" | "power-bi" | "zip" => Some(ExportKind::Powerbi),
            "pdf" => Some(ExportKind::Pdf),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the startup reachability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    Ok,
    Unreachable { reason: String },
}

/// Point-in-time view of the controller for presentation layers.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub phase: WorkflowPhase,
    pub available: Vec<Stage>,
    pub session_id: String,
    pub last_error: Option<RequestError>,
    pub warning: Option<String>,
}

/// Result payload of a completed stage.
#[derive(Debug, Clone)]
pub enum StageOutput {
    Uploaded(UploadSummary),
    Overview(Overview),
    Cleaned(CleanResult),
    Charts(Vec<Chart>),
    Answer { question: String, answer: QaAnswer },
    Insights(String),
    Exported { kind: ExportKind, path: PathBuf },
}

#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    StageStarted { stage: Stage },
    StageCompleted(StageOutput),
    StageFailed { stage: Stage, error: RequestError },
    StageLocked { stage: Stage, requires: Stage },
    Busy,
    Warning(String),
    Status(StatusSnapshot),
    Info(String),
}
