//! `local_file` sources: one file per source.

use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::extract;

use super::{json, web};

/// Read `path` and convert it to text. Returns `(text, content_type)`.
pub async fn read_local(path: &Path) -> Result<(String, String)> {
    let meta = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    if !meta.is_file() {
        bail!("{} is not a regular file", path.display());
    }

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;

    if let Some(content_type) = extract::binary_content_type(path) {
        let text = tokio::task::spawn_blocking(move || extract::extract_text(&bytes, content_type))
            .await??;
        return Ok((text, content_type.to_string()));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let text = String::from_utf8_lossy(&bytes).into_owned();

    Ok(match ext.as_str() {
        "html" | "htm" => (web::html_to_text(&text), "text/html".to_string()),
        "json" => {
            let value: serde_json::Value = serde_json::from_str(&text)
                .with_context(|| format!("{} is not valid JSON", path.display()))?;
            (json::flatten_json(&value), "application/json".to_string())
        }
        _ => (text, "text/plain".to_string()),
    })
}
