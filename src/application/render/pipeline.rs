use std::{future::Future, panic::AssertUnwindSafe, sync::Arc, time::Duration, time::Instant};

use futures::FutureExt;
use metrics::{counter, histogram};
use tracing::{debug, info, warn};

use super::engine::EngineLauncher;
use super::runtime::RenderPermits;
use super::session::{PageScope, SessionScope};
use super::teardown::{panic_message, teardown};
use super::types::{RenderError, RenderRequest, RenderStage, RenderedArtifact};
use crate::config::RenderSettings;

/// Upper bounds for the suspending stages. `None` waits for the engine
/// indefinitely.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderTimeouts {
    pub load: Option<Duration>,
    pub capture: Option<Duration>,
}

/// Runtime policy for the pipeline, resolved from settings.
#[derive(Clone, Default)]
pub struct RenderPolicy {
    pub timeouts: RenderTimeouts,
    pub permits: RenderPermits,
}

impl From<&RenderSettings> for RenderPolicy {
    fn from(settings: &RenderSettings) -> Self {
        let permits = match settings.max_concurrent_sessions {
            Some(max) => RenderPermits::bounded(max),
            None => RenderPermits::unbounded(),
        };
        Self {
            timeouts: RenderTimeouts {
                load: settings.load_timeout,
                capture: settings.capture_timeout,
            },
            permits,
        }
    }
}

/// Converts HTML into PDF using one isolated engine session per call.
#[derive(Clone)]
pub struct PdfRenderer {
    launcher: Arc<dyn EngineLauncher>,
    policy: RenderPolicy,
}

impl PdfRenderer {
    pub fn new(launcher: Arc<dyn EngineLauncher>, policy: RenderPolicy) -> Self {
        Self { launcher, policy }
    }

    pub fn permits(&self) -> &RenderPermits {
        &self.policy.permits
    }

    /// Run a full conversion: launch, load, capture, encode.
    ///
    /// Page and session are released before this returns on every path that
    /// got past launch, including a panic inside a stage. Teardown failures
    /// are logged and never replace the conversion outcome.
    ///
    /// Teardown runs inside this future. Dropping it mid-flight skips the
    /// page and session release, leaving the engine to its own drop handling,
    /// so callers that may abandon a conversion should run it on its own task
    /// (`tokio::spawn`) and await the handle instead.
    pub async fn convert(&self, request: &RenderRequest) -> Result<RenderedArtifact, RenderError> {
        let started_at = Instant::now();
        let result = match self.policy.permits.acquire().await {
            Ok(_permit) => self.run(request).await,
            Err(err) => Err(err),
        };
        let elapsed_ms = started_at.elapsed().as_millis() as u64;

        histogram!("html2pdf_render_ms").record(elapsed_ms as f64);
        match &result {
            Ok(artifact) => {
                counter!("html2pdf_render_total", "result" => "ok").increment(1);
                info!(
                    target = "application::render::pipeline",
                    op = "render::convert",
                    result = "ok",
                    elapsed_ms,
                    html_bytes = request.html().len(),
                    pdf_bytes = artifact.bytes().len(),
                    "HTML converted to PDF"
                );
            }
            Err(err) => {
                counter!("html2pdf_render_total", "result" => err.kind()).increment(1);
                warn!(
                    target = "application::render::pipeline",
                    op = "render::convert",
                    result = "error",
                    error_code = err.kind(),
                    elapsed_ms,
                    html_bytes = request.html().len(),
                    error = %err,
                    "HTML to PDF conversion failed"
                );
            }
        }

        result
    }

    async fn run(&self, request: &RenderRequest) -> Result<RenderedArtifact, RenderError> {
        let mut session = SessionScope::acquire(self.launcher.as_ref()).await?;
        let mut page: Option<PageScope> = None;

        let outcome = AssertUnwindSafe(self.drive(&mut session, &mut page, request))
            .catch_unwind()
            .await;

        let failures = teardown(page.as_mut(), &mut session).await;
        debug!(
            target = "application::render::pipeline",
            op = "render::teardown",
            failures = failures.len(),
            "engine resources released"
        );

        match outcome {
            Ok(result) => result,
            Err(payload) => Err(RenderError::aborted(format!(
                "render stage panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }

    async fn drive(
        &self,
        session: &mut SessionScope,
        slot: &mut Option<PageScope>,
        request: &RenderRequest,
    ) -> Result<RenderedArtifact, RenderError> {
        let page = slot.insert(session.create_page().await?);

        bounded(
            RenderStage::Load,
            self.policy.timeouts.load,
            page.load(request.html()),
        )
        .await?;

        let bytes = bounded(
            RenderStage::Capture,
            self.policy.timeouts.capture,
            page.capture(request.options()),
        )
        .await?;

        Ok(RenderedArtifact::from_pdf(bytes))
    }
}

async fn bounded<T, F>(stage: RenderStage, limit: Option<Duration>, step: F) -> Result<T, RenderError>
where
    F: Future<Output = Result<T, RenderError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, step)
            .await
            .map_err(|_| RenderError::Timeout { stage, limit })?,
        None => step.await,
    }
}
