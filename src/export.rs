//! Report downloads.
//!
//! Exports travel through the gateway with a binary expectation, so error statuses arrive
//! as raw buffers too. The handler decides by status whether the buffer is an artifact or
//! an encoded error message.

use crate::error::RequestError;
use crate::gateway::{BinaryResponse, Payload, RequestBody, RequestGateway, RequestOptions};
use crate::model::ExportKind;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_DISPOSITION;
use reqwest::Method;
use std::path::PathBuf;
use std::time::Duration;

/// A downloaded report, held only until it is delivered.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub kind: ExportKind,
    pub filename: String,
    pub bytes: Bytes,
}

/// Where finished artifacts go.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn deliver(&self, artifact: ExportArtifact) -> Result<PathBuf, RequestError>;
}

/// Writes artifacts into a directory on disk.
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    async fn deliver(&self, artifact: ExportArtifact) -> Result<PathBuf, RequestError> {
        let path = self.dir.join(&artifact.filename);
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| RequestError::delivery(&self.dir, &e))?;
        tokio::fs::write(&path, &artifact.bytes)
            .await
            .map_err(|e| RequestError::delivery(&path, &e))?;
        tracing::info!(kind = %artifact.kind, path = %path.display(), bytes = artifact.bytes.len(), "export saved");
        Ok(path)
    }
}

pub struct ExportHandler {
    sink: Box<dyn ArtifactSink>,
    timeout: Duration,
}

impl ExportHandler {
    pub fn new(sink: Box<dyn ArtifactSink>, timeout: Duration) -> Self {
        Self { sink, timeout }
    }

    /// Download one report and hand it to the sink. Returns where it was delivered.
    pub async fn export(
        &self,
        gateway: &RequestGateway,
        kind: ExportKind,
    ) -> Result<PathBuf, RequestError> {
        let endpoint = format!("/export/{}", kind.as_str());
        let payload = gateway
            .send(
                Method::GET,
                &endpoint,
                RequestBody::Empty,
                RequestOptions::default()
                    .with_timeout(self.timeout)
                    .binary(),
            )
            .await?;

        let resp = match payload {
            Payload::Binary(resp) => resp,
            Payload::Json { .. } => {
                return Err(RequestError::malformed(
                    None,
                    format!("Expected a file from {endpoint}"),
                ))
            }
        };

        let artifact = artifact_from_response(kind, resp)?;
        // The sink takes ownership; the buffer is released once it has been written out.
        self.sink.deliver(artifact).await
    }
}

fn artifact_from_response(
    kind: ExportKind,
    resp: BinaryResponse,
) -> Result<ExportArtifact, RequestError> {
    let status = resp.status;
    if status.is_client_error() || status.is_server_error() {
        return Err(decode_export_error(status.as_u16(), &resp.body));
    }

    let filename = resp
        .headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(filename_from_disposition)
        .unwrap_or_else(|| synthesize_filename(kind));

    Ok(ExportArtifact {
        kind,
        filename,
        bytes: resp.body,
    })
}

/// Turn an error body delivered as a binary buffer into a classified error.
pub fn decode_export_error(status: u16, body: &[u8]) -> RequestError {
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    let message = match serde_json::from_str::<serde_json::Value>(text) {
        Ok(v) if v.is_object() => {
            crate::gateway::error_message(&v).unwrap_or_else(|| "Export failed".to_string())
        }
        _ if !text.is_empty() => text.to_string(),
        _ => format!("Export failed with status {status}"),
    };
    RequestError::server(status, message)
}

/// Extract the `filename=` parameter of a Content-Disposition value.
pub fn filename_from_disposition(value: &str) -> Option<String> {
    let raw = value.split(';').map(str::trim).find_map(|param| {
        let (name, val) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("filename")
            .then(|| val.trim().trim_matches('"').to_string())
    })?;
    sanitize_filename(&raw)
}

/// Keep only the final path component of a server-provided name.
fn sanitize_filename(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or("").trim();
    if name.is_empty() || name == "." || name == ".." {
        return None;
    }
    Some(name.to_string())
}

fn synthesize_filename(kind: ExportKind) -> String {
    let millis = time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    format!("export_{}_{}.{}", kind.as_str(), millis, kind.extension())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::test_utils::{binary_response, gateway_with, ScriptedTransport};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingSink {
        delivered: Arc<Mutex<Vec<ExportArtifact>>>,
    }

    #[async_trait]
    impl ArtifactSink for RecordingSink {
        async fn deliver(&self, artifact: ExportArtifact) -> Result<PathBuf, RequestError> {
            let path = PathBuf::from(&artifact.filename);
            self.delivered.lock().unwrap().push(artifact);
            Ok(path)
        }
    }

    fn handler(sink: RecordingSink) -> ExportHandler {
        ExportHandler::new(Box::new(sink), Duration::from_secs(300))
    }

    #[tokio::test]
    async fn pdf_export_uses_disposition_filename() {
        let transport = ScriptedTransport::new(vec![binary_response(
            200,
            Some("attachment; filename=\"report.pdf\""),
            b"%PDF-1.7",
        )]);
        let (gateway, _) = gateway_with(transport.clone());
        let sink = RecordingSink::default();

        let path = handler(sink.clone())
            .export(&gateway, ExportKind::Pdf)
            .await
            .unwrap();

        assert_eq!(path, PathBuf::from("report.pdf"));
        let delivered = sink.delivered.lock().unwrap();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].filename, "report.pdf");
        assert_eq!(&delivered[0].bytes[..], b"%PDF-1.7");
        assert_eq!(transport.requests()[0].url, "http://backend.test/api/export/pdf");
    }

    #[tokio::test]
    async fn excel_error_body_is_decoded_and_nothing_delivered() {
        let transport = ScriptedTransport::new(vec![binary_response(
            400,
            None,
            br#"{"error":"no data"}"#,
        )]);
        let (gateway, _) = gateway_with(transport);
        let sink = RecordingSink::default();

        let err = handler(sink.clone())
            .export(&gateway, ExportKind::Excel)
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::ServerError);
        assert_eq!(err.message, "no data");
        assert_eq!(err.status, Some(400));
        assert!(sink.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn plain_text_error_body_is_surfaced_verbatim() {
        let transport = ScriptedTransport::new(vec![binary_response(
            500,
            None,
            b"Internal failure while building bundle",
        )]);
        let (gateway, _) = gateway_with(transport);

        let err = handler(RecordingSink::default())
            .export(&gateway, ExportKind::Powerbi)
            .await
            .unwrap_err();
        assert_eq!(err.message, "Internal failure while building bundle");
        assert_eq!(err.status, Some(500));
    }

    #[tokio::test]
    async fn missing_disposition_synthesizes_name_per_kind() {
        let transport = ScriptedTransport::new(vec![binary_response(200, None, b"PK\x03\x04")]);
        let (gateway, _) = gateway_with(transport);
        let sink = RecordingSink::default();

        handler(sink.clone())
            .export(&gateway, ExportKind::Powerbi)
            .await
            .unwrap();

        let name = sink.delivered.lock().unwrap()[0].filename.clone();
        assert!(name.starts_with("export_powerbi_"), "{name}");
        assert!(name.ends_with(".zip"), "{name}");
    }

    #[test]
    fn empty_error_body_falls_back_to_status() {
        let err = decode_export_error(404, b"");
        assert_eq!(err.message, "Export failed with status 404");
    }

    #[test]
    fn json_error_without_message_field_gets_generic_text() {
        let err = decode_export_error(400, br#"{"code": 7}"#);
        assert_eq!(err.message, "Export failed");
    }

    #[test]
    fn disposition_parsing_handles_bare_and_path_values() {
        assert_eq!(
            filename_from_disposition("attachment; filename=data_20240101.xlsx"),
            Some("data_20240101.xlsx".into())
        );
        assert_eq!(
            filename_from_disposition("attachment; FILENAME=\"../../etc/passwd\""),
            Some("passwd".into())
        );
        assert_eq!(filename_from_disposition("attachment"), None);
        assert_eq!(filename_from_disposition("attachment; filename=\"\""), None);
    }

    #[tokio::test]
    async fn directory_sink_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = DirectorySink::new(dir.path().join("out"));
        let path = sink
            .deliver(ExportArtifact {
                kind: ExportKind::Pdf,
                filename: "report.pdf".into(),
                bytes: Bytes::from_static(b"pdf"),
            })
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("out").join("report.pdf"));
        assert_eq!(std::fs::read(&path).unwrap(), b"pdf");
    }
}
