#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use html2pdf::application::render::{
    EngineError, EngineLauncher, EngineSession, PageContext, PdfOptions, PdfRenderer,
    RenderPolicy,
};
use tokio::sync::Notify;

pub const MINIMAL_PDF: &[u8] = b"%PDF-1.7\n1 0 obj\n<< /Type /Catalog >>\nendobj\n%%EOF\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Launch,
    NewPage,
    Load,
    Capture,
    PageClosed,
    SessionClosed,
}

/// Which engine calls fail, stall or panic.
#[derive(Clone, Default)]
pub struct Script {
    pub fail_launch: bool,
    pub fail_new_page: bool,
    pub fail_load: bool,
    pub fail_capture: bool,
    pub fail_page_close: bool,
    pub fail_session_close: bool,
    pub panic_on_capture: bool,
    pub load_delay: Option<Duration>,
    pub load_gate: Option<Arc<Notify>>,
    pub pdf: Option<&'static [u8]>,
}

#[derive(Clone, Default)]
pub struct FakeEngine {
    script: Script,
    journal: Arc<Mutex<Vec<Event>>>,
    live: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FakeEngine {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            ..Default::default()
        }
    }

    pub fn renderer(&self, policy: RenderPolicy) -> PdfRenderer {
        PdfRenderer::new(Arc::new(self.clone()), policy)
    }

    pub fn journal(&self) -> Vec<Event> {
        self.journal.lock().expect("journal lock").clone()
    }

    pub fn count(&self, event: Event) -> usize {
        self.journal().into_iter().filter(|e| *e == event).count()
    }

    /// Engine processes launched and not yet closed.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn record(&self, event: Event) {
        self.journal.lock().expect("journal lock").push(event);
    }
}

#[async_trait]
impl EngineLauncher for FakeEngine {
    async fn launch(&self) -> Result<Box<dyn EngineSession>, EngineError> {
        self.record(Event::Launch);
        if self.script.fail_launch {
            return Err(EngineError::new("chromium executable not found"));
        }

        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(live, Ordering::SeqCst);
        // Give concurrent conversions a chance to overlap.
        tokio::task::yield_now().await;

        Ok(Box::new(FakeSession {
            engine: self.clone(),
            closed: false,
        }))
    }
}

struct FakeSession {
    engine: FakeEngine,
    closed: bool,
}

#[async_trait]
impl EngineSession for FakeSession {
    async fn new_page(&mut self) -> Result<Box<dyn PageContext>, EngineError> {
        self.engine.record(Event::NewPage);
        if self.engine.script.fail_new_page {
            return Err(EngineError::new("target crashed"));
        }
        Ok(Box::new(FakePage {
            engine: self.engine.clone(),
        }))
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.engine.record(Event::SessionClosed);
        if !self.closed {
            self.closed = true;
            self.engine.live.fetch_sub(1, Ordering::SeqCst);
        }
        if self.engine.script.fail_session_close {
            return Err(EngineError::new("browser process did not exit"));
        }
        Ok(())
    }
}

struct FakePage {
    engine: FakeEngine,
}

#[async_trait]
impl PageContext for FakePage {
    async fn load(&mut self, _html: &str) -> Result<(), EngineError> {
        self.engine.record(Event::Load);
        if let Some(gate) = self.engine.script.load_gate.as_ref() {
            gate.notified().await;
        }
        if let Some(delay) = self.engine.script.load_delay {
            tokio::time::sleep(delay).await;
        }
        if self.engine.script.fail_load {
            return Err(EngineError::new("net::ERR_FILE_NOT_FOUND"));
        }
        Ok(())
    }

    async fn print_pdf(&mut self, _options: &PdfOptions) -> Result<Vec<u8>, EngineError> {
        self.engine.record(Event::Capture);
        if self.engine.script.panic_on_capture {
            panic!("printer exploded");
        }
        if self.engine.script.fail_capture {
            return Err(EngineError::new("Printing failed"));
        }
        Ok(self.engine.script.pdf.unwrap_or(MINIMAL_PDF).to_vec())
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.engine.record(Event::PageClosed);
        if self.engine.script.fail_page_close {
            return Err(EngineError::new("target already gone"));
        }
        Ok(())
    }
}
