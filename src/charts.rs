//! Materializes chart images and Q&A figures delivered as data URLs.

use crate::model::Chart;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("image reference is not a data URL")]
    NotDataUrl,

    #[error("image data URL is not base64-encoded")]
    NotBase64,

    #[error("base64 decode error: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("I/O error writing {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A decoded `data:<mime>;base64,<payload>` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DecodedImage {
    pub fn extension(&self) -> &'static str {
        match self.mime.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/svg+xml" => "svg",
            "image/gif" => "gif",
            "image/webp" => "webp",
            _ => "png",
        }
    }
}

pub fn decode_data_url(reference: &str) -> Result<DecodedImage, ImageError> {
    let rest = reference
        .trim()
        .strip_prefix("data:")
        .ok_or(ImageError::NotDataUrl)?;
    let (header, payload) = rest.split_once(',').ok_or(ImageError::NotDataUrl)?;
    let mime = header.strip_suffix(";base64").ok_or(ImageError::NotBase64)?;
    let bytes = BASE64.decode(payload.trim().as_bytes())?;
    Ok(DecodedImage {
        mime: if mime.is_empty() {
            "image/png".to_string()
        } else {
            mime.to_ascii_lowercase()
        },
        bytes,
    })
}

/// Filesystem-safe stem derived from a chart title.
pub fn slug_from_title(title: &str) -> String {
    let s: String = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    let mut slug = String::with_capacity(s.len());
    for c in s.chars() {
        if c == '_' && slug.ends_with('_') {
            continue;
        }
        slug.push(c);
    }
    let slug = slug.trim_matches('_');
    if slug.is_empty() {
        "chart".to_string()
    } else {
        slug.to_string()
    }
}

async fn write_image(dir: &Path, stem: &str, image: &DecodedImage) -> Result<PathBuf, ImageError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| ImageError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    let path = dir.join(format!("{stem}.{}", image.extension()));
    tokio::fs::write(&path, &image.bytes)
        .await
        .map_err(|source| ImageError::Io {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}

/// Write every chart into `dir`, prefixed with its position so the received order survives.
/// Charts whose image is not a data URL are skipped.
pub async fn save_charts(dir: &Path, charts: &[Chart]) -> Result<Vec<PathBuf>, ImageError> {
    let mut saved = Vec::with_capacity(charts.len());
    for (i, chart) in charts.iter().enumerate() {
        let image = match decode_data_url(&chart.image) {
            Ok(image) => image,
            Err(ImageError::NotDataUrl) => {
                tracing::debug!(title = %chart.title, "chart image is not inline, skipping");
                continue;
            }
            Err(e) => return Err(e),
        };
        let stem = format!("{:02}_{}", i + 1, slug_from_title(&chart.title));
        saved.push(write_image(dir, &stem, &image).await?);
    }
    tracing::info!(count = saved.len(), dir = %dir.display(), "charts saved");
    Ok(saved)
}

pub async fn save_figure(dir: &Path, question: &str, figure: &str) -> Result<PathBuf, ImageError> {
    let image = decode_data_url(figure)?;
    let stem = format!("qa_{}", slug_from_title(question));
    write_image(dir, &stem, &image).await
}
