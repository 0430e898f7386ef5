//! The analysis pipeline as an explicit state machine.
//!
//! [`WorkflowController`] owns the committed stage results and refuses any stage whose
//! prerequisite result is absent. Results are committed only after a call succeeds, so a
//! failed attempt leaves [`WorkflowState`] exactly as it was.

use crate::error::{RequestError, WorkflowError};
use crate::export::ExportHandler;
use crate::gateway::{FilePart, RequestBody, RequestGateway, RequestOptions};
use crate::model::{
    Chart, ChartSelections, CleanResult, ExportKind, HealthStatus, Overview, QaAnswer, Stage,
    StatusSnapshot, UploadSummary, WorkflowPhase,
};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Largest dataset accepted for upload.
pub const MAX_UPLOAD_BYTES: u64 = 200 * 1024 * 1024;

/// Accepted dataset extensions and the MIME type sent with each.
const ACCEPTED_FORMATS: [(&str, &str); 4] = [
    ("csv", "text/csv"),
    ("xls", "application/vnd.ms-excel"),
    (
        "xlsx",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    ),
    ("json", "application/json"),
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WorkflowState {
    pub upload: Option<UploadSummary>,
    pub overview: Option<Overview>,
    pub cleaned: Option<CleanResult>,
    pub charts: Option<Vec<Chart>>,
    pub insights: Option<String>,
}

impl WorkflowState {
    /// Whether `stage` has a committed result. Q&A and export never commit one.
    pub fn has(&self, stage: Stage) -> bool {
        match stage {
            Stage::Upload => self.upload.is_some(),
            Stage::Overview => self.overview.is_some(),
            Stage::Clean => self.cleaned.is_some(),
            Stage::Charts => self.charts.is_some(),
            Stage::Insights => self.insights.is_some(),
            Stage::Ask | Stage::Export => false,
        }
    }

    /// The missing prerequisite of `stage`, if any.
    pub fn missing_prerequisite(&self, stage: Stage) -> Option<Stage> {
        stage.prerequisite().filter(|p| !self.has(*p))
    }

    pub fn is_available(&self, stage: Stage) -> bool {
        self.missing_prerequisite(stage).is_none()
    }

    pub fn phase(&self) -> WorkflowPhase {
        match (
            self.upload.is_some(),
            self.overview.is_some(),
            self.cleaned.is_some(),
            self.charts.is_some(),
            self.insights.is_some(),
        ) {
            (false, ..) => WorkflowPhase::Empty,
            (true, false, ..) => WorkflowPhase::Uploaded,
            (true, true, _, true, true) => WorkflowPhase::ExportReady,
            (true, true, _, true, false) => WorkflowPhase::ChartsGenerated,
            (true, true, _, false, true) => WorkflowPhase::InsightsGenerated,
            (true, true, true, false, false) => WorkflowPhase::Cleaned,
            (true, true, false, false, false) => WorkflowPhase::OverviewComputed,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChartsResponse {
    #[serde(default)]
    charts: Vec<Chart>,
}

#[derive(Debug, Deserialize)]
struct InsightsResponse {
    insights: String,
}

/// Resets the shared busy flag when an action finishes, however it finishes.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct WorkflowController {
    gateway: RequestGateway,
    exporter: ExportHandler,
    upload_timeout: Duration,
    state: WorkflowState,
    last_error: Option<RequestError>,
    warning: Option<String>,
    busy: Arc<AtomicBool>,
}

impl WorkflowController {
    pub fn new(gateway: RequestGateway, exporter: ExportHandler, upload_timeout: Duration) -> Self {
        Self {
            gateway,
            exporter,
            upload_timeout,
            state: WorkflowState::default(),
            last_error: None,
            warning: None,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> &WorkflowState {
        &self.state
    }

    pub fn gateway(&self) -> &RequestGateway {
        &self.gateway
    }

    /// The error surfaced by the most recent action, cleared when the next one starts.
    pub fn last_error(&self) -> Option<&RequestError> {
        self.last_error.as_ref()
    }

    /// Flag raised while an action is in flight; presentation layers read it to refuse input.
    pub fn busy_flag(&self) -> Arc<AtomicBool> {
        self.busy.clone()
    }

    pub fn available_actions(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|s| self.state.is_available(*s))
            .collect()
    }

    pub fn note_health(&mut self, status: &HealthStatus) -> Option<&str> {
        self.warning = health_warning(self.gateway.base_url(), status);
        self.warning.as_deref()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            phase: self.state.phase(),
            available: self.available_actions(),
            session_id: self.gateway.session().resolve(),
            last_error: self.last_error.clone(),
            warning: self.warning.clone(),
        }
    }

    fn begin(&mut self, stage: Stage) -> Result<BusyGuard, WorkflowError> {
        if let Some(requires) = self.state.missing_prerequisite(stage) {
            return Err(WorkflowError::StageLocked { stage, requires });
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(WorkflowError::Busy);
        }
        self.last_error = None;
        tracing::debug!(%stage, "stage started");
        Ok(BusyGuard(self.busy.clone()))
    }

    fn settle<T>(&mut self, stage: Stage, res: Result<T, RequestError>) -> Result<T, WorkflowError> {
        match res {
            Ok(v) => Ok(v),
            Err(e) => {
                tracing::warn!(%stage, kind = e.kind.label(), "stage failed: {}", e.message);
                self.last_error = Some(e.clone());
                Err(e.into())
            }
        }
    }

    /// Upload a dataset. Valid from any state; success discards every downstream result.
    pub async fn upload(&mut self, path: &Path) -> Result<UploadSummary, WorkflowError> {
        let _busy = self.begin(Stage::Upload)?;
        let res = match prepare_upload(path).await {
            Ok(part) => {
                self.gateway
                    .send_json::<UploadSummary>(
                        Method::POST,
                        "/upload",
                        RequestBody::Multipart(part),
                        RequestOptions::default().with_timeout(self.upload_timeout),
                    )
                    .await
            }
            Err(e) => Err(e),
        };
        let summary = self.settle(Stage::Upload, res)?;
        self.state = WorkflowState {
            upload: Some(summary.clone()),
            ..WorkflowState::default()
        };
        Ok(summary)
    }

    pub async fn compute_overview(&mut self) -> Result<Overview, WorkflowError> {
        let _busy = self.begin(Stage::Overview)?;
        let res = self.gateway.get_json::<Overview>("/overview").await;
        let overview = self.settle(Stage::Overview, res)?;
        self.state.overview = Some(overview.clone());
        Ok(overview)
    }

    pub async fn clean(&mut self) -> Result<CleanResult, WorkflowError> {
        let _busy = self.begin(Stage::Clean)?;
        let res = self
            .gateway
            .post_json::<CleanResult>("/clean", RequestBody::Empty)
            .await;
        let cleaned = self.settle(Stage::Clean, res)?;
        self.state.cleaned = Some(cleaned.clone());
        Ok(cleaned)
    }

    pub async fn generate_charts(
        &mut self,
        selections: ChartSelections,
    ) -> Result<Vec<Chart>, WorkflowError> {
        let _busy = self.begin(Stage::Charts)?;
        let body = serde_json::json!({ "chart_selections": selections });
        let res = self
            .gateway
            .post_json::<ChartsResponse>("/eda", RequestBody::Json(body))
            .await;
        let charts = self.settle(Stage::Charts, res)?.charts;
        self.state.charts = Some(charts.clone());
        Ok(charts)
    }

    /// Ask a natural-language question. The answer is returned, never stored.
    pub async fn ask_question(&mut self, question: &str) -> Result<QaAnswer, WorkflowError> {
        let _busy = self.begin(Stage::Ask)?;
        let question = question.trim();
        let res = if question.is_empty() {
            Err(RequestError::invalid_input("Please enter a question."))
        } else {
            let body = serde_json::json!({ "question": question });
            self.gateway
                .post_json::<QaAnswer>("/qa", RequestBody::Json(body))
                .await
        };
        self.settle(Stage::Ask, res)
    }

    pub async fn get_insights(&mut self) -> Result<String, WorkflowError> {
        let _busy = self.begin(Stage::Insights)?;
        let res = self.gateway.get_json::<InsightsResponse>("/insights").await;
        let insights = self.settle(Stage::Insights, res)?.insights;
        self.state.insights = Some(insights.clone());
        Ok(insights)
    }

    pub async fn export(&mut self, kind: ExportKind) -> Result<PathBuf, WorkflowError> {
        let _busy = self.begin(Stage::Export)?;
        let res = self.exporter.export(&self.gateway, kind).await;
        self.settle(Stage::Export, res)
    }

    /// Drop the session identity so the next call starts a fresh server session.
    pub fn reset_session(&mut self) -> String {
        self.gateway.session().reset();
        self.state = WorkflowState::default();
        self.last_error = None;
        self.gateway.session().resolve()
    }
}

/// User-facing advisory for a failed startup probe.
pub fn health_warning(base_url: &str, status: &HealthStatus) -> Option<String> {
    match status {
        HealthStatus::Ok => None,
        HealthStatus::Unreachable { reason } => Some(format!(
            "Cannot reach backend server at {base_url} ({reason}). Actions will fail until it is running."
        )),
    }
}

/// Validate a dataset locally and load it as a multipart file part.
pub async fn prepare_upload(path: &Path) -> Result<FilePart, RequestError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| RequestError::invalid_input(format!("{} is not a file", path.display())))?
        .to_string();

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let mime = ACCEPTED_FORMATS
        .iter()
        .find(|(accepted, _)| *accepted == ext)
        .map(|(_, mime)| *mime)
        .ok_or_else(|| {
            RequestError::invalid_input(format!(
                "Unsupported file type for {file_name}. Accepted formats: CSV, XLSX, XLS, JSON."
            ))
        })?;

    let meta = tokio::fs::metadata(path).await.map_err(|e| {
        RequestError::invalid_input(format!("Cannot read {}: {e}", path.display()))
    })?;
    if !meta.is_file() {
        return Err(RequestError::invalid_input(format!(
            "{} is not a file",
            path.display()
        )));
    }
    if meta.len() == 0 {
        return Err(RequestError::invalid_input(format!("{file_name} is empty.")));
    }
    if meta.len() > MAX_UPLOAD_BYTES {
        return Err(RequestError::invalid_input(format!(
            "{file_name} is {:.1} MB; the limit is 200 MB.",
            meta.len() as f64 / (1024.0 * 1024.0)
        )));
    }

    let bytes = tokio::fs::read(path).await.map_err(|e| {
        RequestError::invalid_input(format!("Cannot read {}: {e}", path.display()))
    })?;

    Ok(FilePart {
        field: "file".to_string(),
        file_name,
        mime: mime.to_string(),
        bytes: bytes.into(),
    })
}
