use std::time::Instant;

use tracing::debug;

use super::engine::{EngineLauncher, EngineSession, PageContext};
use super::types::{PdfOptions, RenderError, TeardownError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Ready,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Empty,
    Loading,
    Loaded,
    Failed,
    Closed,
}

/// Exclusive owner of one engine session for the duration of a conversion.
pub(crate) struct SessionScope {
    session: Box<dyn EngineSession>,
    state: SessionState,
}

impl SessionScope {
    pub(crate) async fn acquire(launcher: &dyn EngineLauncher) -> Result<Self, RenderError> {
        let started_at = Instant::now();
        let session = launcher
            .launch()
            .await
            .map_err(|err| RenderError::launch(err.message()))?;

        debug!(
            target = "application::render::session",
            op = "session::acquire",
            pid = session.process_id(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "engine session launched"
        );

        Ok(Self {
            session,
            state: SessionState::Ready,
        })
    }

    pub(crate) fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) async fn create_page(&mut self) -> Result<PageScope, RenderError> {
        if self.state != SessionState::Ready {
            return Err(RenderError::launch("engine session is not ready"));
        }

        // A session that cannot open a page is an unusable engine instance.
        let page = self
            .session
            .new_page()
            .await
            .map_err(|err| RenderError::launch(format!("failed to open page: {err}")))?;

        debug!(
            target = "application::render::session",
            op = "session::create_page",
            "page context created"
        );

        Ok(PageScope {
            page,
            state: LoadState::Empty,
        })
    }

    /// Terminate the session. Later calls are no-ops.
    pub(crate) async fn release(&mut self) -> Result<(), TeardownError> {
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;

        self.session
            .close()
            .await
            .map_err(|err| TeardownError::Session {
                message: err.message().to_string(),
            })?;

        debug!(
            target = "application::render::session",
            op = "session::release",
            "engine session closed"
        );
        Ok(())
    }
}

/// The single page context opened inside a [`SessionScope`].
pub(crate) struct PageScope {
    page: Box<dyn PageContext>,
    state: LoadState,
}

impl PageScope {
    pub(crate) fn state(&self) -> LoadState {
        self.state
    }

    pub(crate) async fn load(&mut self, html: &str) -> Result<(), RenderError> {
        if self.state != LoadState::Empty {
            return Err(RenderError::load(format!(
                "page cannot accept content in state {:?}",
                self.state
            )));
        }

        let started_at = Instant::now();
        self.state = LoadState::Loading;
        match self.page.load(html).await {
            Ok(()) => {
                self.state = LoadState::Loaded;
                debug!(
                    target = "application::render::session",
                    op = "page::load",
                    result = "loaded",
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    html_bytes = html.len(),
                    "page content loaded"
                );
                Ok(())
            }
            Err(err) => {
                self.state = LoadState::Failed;
                Err(RenderError::load(err.message()))
            }
        }
    }

    pub(crate) async fn capture(&mut self, options: &PdfOptions) -> Result<Vec<u8>, RenderError> {
        if self.state != LoadState::Loaded {
            return Err(RenderError::capture(format!(
                "page is not loaded (state {:?})",
                self.state
            )));
        }

        let started_at = Instant::now();
        let bytes = self
            .page
            .print_pdf(options)
            .await
            .map_err(|err| RenderError::capture(err.message()))?;

        if !bytes.starts_with(PDF_SIGNATURE) {
            return Err(RenderError::capture(format!(
                "engine returned {} bytes without a pdf signature",
                bytes.len()
            )));
        }

        debug!(
            target = "application::render::session",
            op = "page::capture",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            pdf_bytes = bytes.len(),
            "pdf captured"
        );
        Ok(bytes)
    }

    /// Close the page. Later calls are no-ops.
    pub(crate) async fn release(&mut self) -> Result<(), TeardownError> {
        if self.state == LoadState::Closed {
            return Ok(());
        }
        self.state = LoadState::Closed;

        self.page.close().await.map_err(|err| TeardownError::Page {
            message: err.message().to_string(),
        })?;

        debug!(
            target = "application::render::session",
            op = "page::release",
            "page context closed"
        );
        Ok(())
    }
}

const PDF_SIGNATURE: &[u8] = b"%PDF-";

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;

    use super::*;
    use crate::application::render::engine::EngineError;

    #[derive(Default, Clone)]
    struct Counters {
        session_closes: Arc<AtomicUsize>,
        page_closes: Arc<AtomicUsize>,
    }

    struct StubLauncher {
        counters: Counters,
        pdf: &'static [u8],
        fail_load: bool,
    }

    struct StubSession {
        counters: Counters,
        pdf: &'static [u8],
        fail_load: bool,
    }

    struct StubPage {
        counters: Counters,
        pdf: &'static [u8],
        fail_load: bool,
    }

    #[async_trait]
    impl EngineLauncher for StubLauncher {
        async fn launch(&self) -> Result<Box<dyn EngineSession>, EngineError> {
            Ok(Box::new(StubSession {
                counters: self.counters.clone(),
                pdf: self.pdf,
                fail_load: self.fail_load,
            }))
        }
    }

    #[async_trait]
    impl EngineSession for StubSession {
        async fn new_page(&mut self) -> Result<Box<dyn PageContext>, EngineError> {
            Ok(Box::new(StubPage {
                counters: self.counters.clone(),
                pdf: self.pdf,
                fail_load: self.fail_load,
            }))
        }

        async fn close(&mut self) -> Result<(), EngineError> {
            self.counters.session_closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl PageContext for StubPage {
        async fn load(&mut self, _html: &str) -> Result<(), EngineError> {
            if self.fail_load {
                Err(EngineError::new("net::ERR_ABORTED"))
            } else {
                Ok(())
            }
        }

        async fn print_pdf(&mut self, _options: &PdfOptions) -> Result<Vec<u8>, EngineError> {
            Ok(self.pdf.to_vec())
        }

        async fn close(&mut self) -> Result<(), EngineError> {
            self.counters.page_closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn launcher(pdf: &'static [u8], fail_load: bool) -> (StubLauncher, Counters) {
        let counters = Counters::default();
        (
            StubLauncher {
                counters: counters.clone(),
                pdf,
                fail_load,
            },
            counters,
        )
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let (launcher, counters) = launcher(b"%PDF-1.7", false);
        let mut session = SessionScope::acquire(&launcher).await.expect("session");
        let mut page = session.create_page().await.expect("page");

        page.release().await.expect("first page close");
        page.release().await.expect("second page close");
        session.release().await.expect("first session close");
        session.release().await.expect("second session close");

        assert_eq!(counters.page_closes.load(Ordering::SeqCst), 1);
        assert_eq!(counters.session_closes.load(Ordering::SeqCst), 1);
        assert_eq!(page.state(), LoadState::Closed);
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn load_failure_is_terminal() {
        let (launcher, _) = launcher(b"%PDF-1.7", true);
        let mut session = SessionScope::acquire(&launcher).await.expect("session");
        let mut page = session.create_page().await.expect("page");

        let err = page.load("<p>x</p>").await.expect_err("load fails");
        assert!(matches!(err, RenderError::Load { .. }));
        assert_eq!(page.state(), LoadState::Failed);

        let err = page.load("<p>x</p>").await.expect_err("no reload");
        assert!(matches!(err, RenderError::Load { .. }));
        let err = page
            .capture(&PdfOptions::default())
            .await
            .expect_err("no capture after failure");
        assert!(matches!(err, RenderError::Capture { .. }));
    }

    #[tokio::test]
    async fn capture_rejects_output_without_signature() {
        let (launcher, _) = launcher(b"<html>not a pdf</html>", false);
        let mut session = SessionScope::acquire(&launcher).await.expect("session");
        let mut page = session.create_page().await.expect("page");
        page.load("<p>x</p>").await.expect("load");

        let err = page
            .capture(&PdfOptions::default())
            .await
            .expect_err("invalid pdf");
        assert!(matches!(err, RenderError::Capture { .. }));
    }

    #[tokio::test]
    async fn closed_session_refuses_new_pages() {
        let (launcher, _) = launcher(b"%PDF-1.7", false);
        let mut session = SessionScope::acquire(&launcher).await.expect("session");
        session.release().await.expect("close");

        let err = session.create_page().await.err().expect("closed session");
        assert!(matches!(err, RenderError::Launch { .. }));
    }
}
