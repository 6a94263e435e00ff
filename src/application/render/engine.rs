//! Seams between the render pipeline and an out-of-process rendering engine.
//!
//! The pipeline only ever talks to these traits. The default launcher spawns a
//! fresh engine per conversion; a pooled launcher can hand out recycled
//! sessions instead, as long as `EngineSession::close` leaves the engine in a
//! reusable state (or terminates it) and never fails twice for one session.

use async_trait::async_trait;
use thiserror::Error;

use super::types::PdfOptions;

/// Opaque failure reported by an engine driver. The pipeline classifies it by
/// the stage that produced it.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Acquires an engine session for exactly one conversion.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn EngineSession>, EngineError>;
}

/// One live engine instance.
#[async_trait]
pub trait EngineSession: Send {
    /// Open a document context inside this session.
    async fn new_page(&mut self) -> Result<Box<dyn PageContext>, EngineError>;

    /// Terminate the engine. Must be a no-op once the session is closed.
    async fn close(&mut self) -> Result<(), EngineError>;

    /// OS process backing this session, when there is one.
    fn process_id(&self) -> Option<u32> {
        None
    }
}

/// A single document view inside a session.
#[async_trait]
pub trait PageContext: Send {
    /// Inject `html` and resolve once the engine reports a full resource load.
    async fn load(&mut self, html: &str) -> Result<(), EngineError>;

    /// Paginate the loaded document and return the PDF bytes.
    async fn print_pdf(&mut self, options: &PdfOptions) -> Result<Vec<u8>, EngineError>;

    /// Release the page. Must be a no-op once the page is closed.
    async fn close(&mut self) -> Result<(), EngineError>;
}
