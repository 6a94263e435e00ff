//! HTML to PDF rendering pipeline.
//!
//! A conversion owns one engine session and one page context. Content is
//! loaded, the page is printed, and both handles are released in reverse
//! acquisition order no matter which stage failed.

mod encoding;
mod engine;
mod pipeline;
mod runtime;
mod session;
mod teardown;
mod types;

pub use encoding::encode;
pub use engine::{EngineError, EngineLauncher, EngineSession, PageContext};
pub use pipeline::{PdfRenderer, RenderPolicy, RenderTimeouts};
pub use runtime::{RenderPermit, RenderPermits};
pub use session::{LoadState, SessionState};
pub use types::{
    PaperSize, PdfOptions, RenderError, RenderRequest, RenderStage, RenderedArtifact,
    TeardownError,
};
