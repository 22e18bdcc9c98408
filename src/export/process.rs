use std::io::ErrorKind;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use super::{
    DocumentRenderer, RenderError, RenderInput, RenderedFile, DOCX_CONTENT_TYPE, PDF_CONTENT_TYPE,
};

const INPUT_PLACEHOLDER: &str = "{input}";
const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Converts HTML by running an external binary over temporary files.
///
/// `args` may reference `{input}` and `{output}`, which are replaced with the
/// paths of the HTML file written for the run and the file the converter is
/// expected to produce. The child is killed if it outlives `timeout`.
#[derive(Debug, Clone)]
pub struct ExternalProcessRenderer {
    program: String,
    args: Vec<String>,
    extension: String,
    content_type: String,
    timeout: Duration,
}

impl ExternalProcessRenderer {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        extension: impl Into<String>,
        content_type: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            extension: extension.into(),
            content_type: content_type.into(),
            timeout,
        }
    }

    pub fn pandoc(program: String, timeout: Duration) -> Self {
        Self::new(
            program,
            vec![
                INPUT_PLACEHOLDER.into(),
                "-o".into(),
                OUTPUT_PLACEHOLDER.into(),
            ],
            "docx",
            DOCX_CONTENT_TYPE,
            timeout,
        )
    }

    pub fn wkhtmltopdf(program: String, timeout: Duration) -> Self {
        Self::new(
            program,
            vec![
                "--quiet".into(),
                "--encoding".into(),
                "utf-8".into(),
                INPUT_PLACEHOLDER.into(),
                OUTPUT_PLACEHOLDER.into(),
            ],
            "pdf",
            PDF_CONTENT_TYPE,
            timeout,
        )
    }
}

#[async_trait]
impl DocumentRenderer for ExternalProcessRenderer {
    async fn render(&self, input: RenderInput) -> Result<RenderedFile, RenderError> {
        let workdir = tempfile::tempdir()?;
        let input_path = workdir.path().join("document.html");
        let output_path = workdir.path().join(format!("document.{}", self.extension));
        tokio::fs::write(&input_path, input.html.as_bytes()).await?;

        let input_arg = input_path.to_string_lossy();
        let output_arg = output_path.to_string_lossy();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                arg.replace(INPUT_PLACEHOLDER, &input_arg)
                    .replace(OUTPUT_PLACEHOLDER, &output_arg)
            })
            .collect();

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| match err.kind() {
                ErrorKind::NotFound => RenderError::BinaryMissing {
                    program: self.program.clone(),
                },
                _ => RenderError::Io(err),
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(program = %self.program, "converter timed out");
                return Err(RenderError::Timeout {
                    program: self.program.clone(),
                    seconds: self.timeout.as_secs(),
                });
            }
        };

        if !output.status.success() {
            return Err(RenderError::Failed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let bytes = tokio::fs::read(&output_path).await?;
        Ok(RenderedFile {
            file_name: format!("{}.{}", input.file_stem, self.extension),
            content_type: self.content_type.clone(),
            bytes,
        })
    }
}
