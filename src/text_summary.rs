//! Text summary builder for CLI output.
//!
//! Formats stage results into human-readable lines for batch and shell modes.

use crate::model::{
    Chart, CleanResult, ExportKind, Overview, QaAnswer, StageOutput, StatusSnapshot,
    UploadSummary,
};
use serde_json::{Map, Value};
use std::path::Path;

/// Most columns listed by name in the missing-value section.
const TOP_MISSING: usize = 5;
/// Widest a rendered table cell may grow before truncation.
const MAX_CELL_WIDTH: usize = 32;

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

/// Build a text summary for one completed stage.
pub(crate) fn build_text_summary(output: &StageOutput) -> TextSummary {
    let lines = match output {
        StageOutput::Uploaded(u) => upload_lines(u),
        StageOutput::Overview(o) => overview_lines(o),
        StageOutput::Cleaned(c) => cleaning_lines(c),
        StageOutput::Charts(charts) => chart_lines(charts),
        StageOutput::Answer { question, answer } => answer_lines(question, answer),
        StageOutput::Insights(text) => insight_lines(text),
        StageOutput::Exported { kind, path } => export_lines(*kind, path),
    };
    TextSummary { lines }
}

fn upload_lines(u: &UploadSummary) -> Vec<String> {
    let mut lines = vec![format!(
        "Uploaded: {} ({} rows x {} cols)",
        u.filename, u.shape.rows, u.shape.cols
    )];
    if let Some(size) = u.file_size {
        lines.push(format!("File size: {}", human_bytes(size)));
    }
    if let Some(mem) = u.memory_usage {
        lines.push(format!("Memory usage: {mem:.2} MB"));
    }
    if !u.columns.is_empty() {
        lines.push(format!("Columns: {}", u.columns.join(", ")));
    }
    lines
}

fn overview_lines(o: &Overview) -> Vec<String> {
    let mut lines = vec![format!("Overview: {} rows x {} cols", o.num_rows, o.num_cols)];

    let mut missing: Vec<(&String, &u64)> =
        o.missing_counts.iter().filter(|(_, n)| **n > 0).collect();
    if missing.is_empty() {
        lines.push("Missing values: none".to_string());
    } else {
        missing.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        let total: u64 = missing.iter().map(|(_, n)| **n).sum();
        let top: Vec<String> = missing
            .iter()
            .take(TOP_MISSING)
            .map(|(col, n)| format!("{col} ({n})"))
            .collect();
        lines.push(format!(
            "Missing values: {total} across {} columns; most in {}",
            missing.len(),
            top.join(", ")
        ));
    }

    if !o.dtypes.is_empty() {
        lines.push("Types:".to_string());
        let width = o.dtypes.keys().map(|k| k.chars().count()).max().unwrap_or(0);
        for (col, ty) in &o.dtypes {
            lines.push(format!("  {col:<width$}  {ty}"));
        }
    }
    lines
}

fn cleaning_lines(c: &CleanResult) -> Vec<String> {
    let r = &c.cleaning_report;
    let mut lines = vec![format!(
        "Cleaned: {} -> {} rows, {} duplicates removed",
        r.rows_before, r.rows_after, r.duplicates_removed
    )];
    if r.imputations.is_empty() {
        lines.push("Imputations: none".to_string());
    } else {
        lines.push("Imputations:".to_string());
        for (col, how) in &r.imputations {
            lines.push(format!("  {col}: {how}"));
        }
    }
    if !r.inferred_types.is_empty() {
        let types: Vec<String> = r
            .inferred_types
            .iter()
            .map(|(col, ty)| format!("{col}={ty}"))
            .collect();
        lines.push(format!("Inferred types: {}", types.join(", ")));
    }
    if !c.preview.is_empty() {
        lines.push(format!("Preview ({} rows):", c.preview.len()));
        lines.extend(render_table(&c.preview).into_iter().map(|l| format!("  {l}")));
    }
    lines
}

fn chart_lines(charts: &[Chart]) -> Vec<String> {
    if charts.is_empty() {
        return vec!["Charts: none generated for this selection".to_string()];
    }
    let mut lines = vec![format!("Charts: {}", charts.len())];
    for (i, chart) in charts.iter().enumerate() {
        lines.push(format!("  {:>2}. {}", i + 1, chart.title));
    }
    lines
}

fn answer_lines(question: &str, answer: &QaAnswer) -> Vec<String> {
    let mut lines = vec![format!("Q: {question}")];
    if let Some(err) = answer.error.as_deref() {
        lines.push(format!("A: (server could not answer) {err}"));
        return lines;
    }
    match answer.message.as_deref() {
        Some(msg) if !msg.trim().is_empty() => lines.push(format!("A: {msg}")),
        _ => lines.push("A:".to_string()),
    }
    if let Some(rows) = answer.table.as_deref() {
        if !rows.is_empty() {
            lines.extend(render_table(rows));
        }
    }
    if answer.figure.is_some() {
        lines.push("(figure attached)".to_string());
    }
    lines
}

fn insight_lines(text: &str) -> Vec<String> {
    let mut lines = vec!["Insights:".to_string()];
    lines.extend(text.lines().map(|l| format!("  {l}")));
    lines
}

fn export_lines(kind: ExportKind, path: &Path) -> Vec<String> {
    vec![format!("Exported {kind}: {}", path.display())]
}

pub(crate) fn status_lines(s: &StatusSnapshot) -> Vec<String> {
    let available: Vec<&str> = s.available.iter().map(|st| st.as_str()).collect();
    let mut lines = vec![
        format!("Phase: {:?}", s.phase),
        format!("Available: {}", available.join(", ")),
        format!("Session: {}", s.session_id),
    ];
    if let Some(w) = s.warning.as_deref() {
        lines.push(format!("Warning: {w}"));
    }
    if let Some(e) = s.last_error.as_ref() {
        lines.push(format!("Last error ({}): {}", e.kind.label(), e.message));
    }
    lines
}

/// Render JSON records as a left-aligned text table; columns follow first appearance.
pub(crate) fn render_table(rows: &[Map<String, Value>]) -> Vec<String> {
    let mut headers: Vec<&str> = Vec::new();
    for row in rows {
        for key in row.keys() {
            if !headers.contains(&key.as_str()) {
                headers.push(key);
            }
        }
    }
    if headers.is_empty() {
        return Vec::new();
    }

    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            headers
                .iter()
                .map(|h| row.get(*h).map(cell_text).unwrap_or_default())
                .collect()
        })
        .collect();

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            cells
                .iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(h.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let fmt_row = |values: &[String]| -> String {
        values
            .iter()
            .zip(&widths)
            .map(|(v, &w)| format!("{v:<w$}"))
            .collect::<Vec<_>>()
            .join(" | ")
            .trim_end()
            .to_string()
    };

    let header_cells: Vec<String> = headers.iter().map(|h| h.to_string()).collect();
    let mut out = vec![fmt_row(&header_cells)];
    out.push(
        widths
            .iter()
            .map(|w| "-".repeat(*w))
            .collect::<Vec<_>>()
            .join("-+-"),
    );
    out.extend(cells.iter().map(|r| fmt_row(r)));
    out
}

fn cell_text(v: &Value) -> String {
    let s = match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => format!("{f:.4}")
                .trim_end_matches('0')
                .trim_end_matches('.')
                .to_string(),
            _ => n.to_string(),
        },
        other => other.to_string(),
    };
    if s.chars().count() > MAX_CELL_WIDTH {
        let cut: String = s.chars().take(MAX_CELL_WIDTH - 1).collect();
        format!("{cut}…")
    } else {
        s
    }
}

fn human_bytes(n: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{n} B")
    } else {
        format!("{v:.1} {}", UNITS[unit])
    }
}
