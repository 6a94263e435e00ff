use std::{fmt, time::Duration};

use thiserror::Error;

use super::encoding;

/// Physical paper dimensions in inches, as expected by the print protocol.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaperSize {
    pub width_in: f64,
    pub height_in: f64,
}

impl PaperSize {
    pub const A4: Self = Self {
        width_in: 8.27,
        height_in: 11.7,
    };
}

/// Print configuration handed to the capture stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PdfOptions {
    pub paper: PaperSize,
    pub print_background: bool,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            paper: PaperSize::A4,
            print_background: true,
        }
    }
}

/// A single HTML document accepted for conversion.
///
/// The output format is fixed: A4 paper with background graphics enabled.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderRequest {
    html: String,
    options: PdfOptions,
}

impl RenderRequest {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            options: PdfOptions::default(),
        }
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn options(&self) -> &PdfOptions {
        &self.options
    }
}

/// The captured PDF together with its transport encoding.
#[derive(Clone, PartialEq, Eq)]
pub struct RenderedArtifact {
    bytes: Vec<u8>,
    encoded: String,
}

impl RenderedArtifact {
    pub(crate) fn from_pdf(bytes: Vec<u8>) -> Self {
        let encoded = encoding::encode(&bytes);
        Self { bytes, encoded }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn into_encoded(self) -> String {
        self.encoded
    }
}

impl fmt::Debug for RenderedArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderedArtifact")
            .field("pdf_bytes", &self.bytes.len())
            .field("encoded_len", &self.encoded.len())
            .finish()
    }
}

/// Pipeline stages that can suspend on the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStage {
    Launch,
    Load,
    Capture,
}

impl RenderStage {
    pub fn as_str(self) -> &'static str {
        match self {
            RenderStage::Launch => "launch",
            RenderStage::Load => "load",
            RenderStage::Capture => "capture",
        }
    }
}

impl fmt::Display for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a conversion. Every variant is fatal for the request
/// and is never retried internally.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    #[error("rendering engine failed to start: {message}")]
    Launch { message: String },
    #[error("document content failed to load: {message}")]
    Load { message: String },
    #[error("pdf capture failed: {message}")]
    Capture { message: String },
    #[error("{stage} stage did not finish within {limit:?}")]
    Timeout { stage: RenderStage, limit: Duration },
    #[error("render task aborted: {message}")]
    Aborted { message: String },
}

impl RenderError {
    pub fn launch(message: impl Into<String>) -> Self {
        Self::Launch {
            message: message.into(),
        }
    }

    pub fn load(message: impl Into<String>) -> Self {
        Self::Load {
            message: message.into(),
        }
    }

    pub fn capture(message: impl Into<String>) -> Self {
        Self::Capture {
            message: message.into(),
        }
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted {
            message: message.into(),
        }
    }

    /// Short machine-readable label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RenderError::Launch { .. } => "launch_error",
            RenderError::Load { .. } => "load_error",
            RenderError::Capture { .. } => "capture_error",
            RenderError::Timeout { .. } => "timeout",
            RenderError::Aborted { .. } => "aborted",
        }
    }
}

/// Failure while releasing engine resources. Only ever logged.
#[derive(Debug, Clone, Error)]
pub enum TeardownError {
    #[error("failed to close page context: {message}")]
    Page { message: String },
    #[error("failed to terminate engine session: {message}")]
    Session { message: String },
}

impl TeardownError {
    pub fn stage(&self) -> &'static str {
        match self {
            TeardownError::Page { .. } => "page",
            TeardownError::Session { .. } => "session",
        }
    }
}
