use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::AppConfig;

pub mod docx;
pub mod process;

pub use docx::NativeDocxRenderer;
pub use process::ExternalProcessRenderer;

pub const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("converter binary {program} was not found")]
    BinaryMissing { program: String },
    #[error("converter {program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("converter {program} did not finish within {seconds}s")]
    Timeout { program: String, seconds: u64 },
    #[error("failed to encode document: {0}")]
    Encoding(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct RenderInput {
    /// Used to name the produced file.
    pub file_stem: String,
    pub html: String,
    /// Style id → font size in points.
    pub font_sizes: HashMap<String, f64>,
}

#[derive(Debug, Clone)]
pub struct RenderedFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait DocumentRenderer: Send + Sync + 'static {
    async fn render(&self, input: RenderInput) -> Result<RenderedFile, RenderError>;
}

/// The renderers each export route delegates to.
#[derive(Clone)]
pub struct Renderers {
    pub native_docx: Arc<dyn DocumentRenderer>,
    pub pandoc_docx: Arc<dyn DocumentRenderer>,
    pub pdf: Arc<dyn DocumentRenderer>,
}

impl Renderers {
    pub fn from_config(config: &AppConfig) -> Self {
        let timeout = Duration::from_secs(config.converter_timeout_seconds);
        Self {
            native_docx: Arc::new(NativeDocxRenderer::new(Some(config.export_dir.clone()))),
            pandoc_docx: Arc::new(ExternalProcessRenderer::pandoc(
                config.pandoc_path.clone(),
                timeout,
            )),
            pdf: Arc::new(ExternalProcessRenderer::wkhtmltopdf(
                config.wkhtmltopdf_path.clone(),
                timeout,
            )),
        }
    }
}

/// Wraps an HTML body in a UTF-8 page so converters do not guess the encoding.
pub fn standalone_html(body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="UTF-8">
  <style>body {{ font-family: "Times New Roman", serif; font-size: 14pt; }}</style>
</head>
<body>
{body}
</body>
</html>"#
    )
}
