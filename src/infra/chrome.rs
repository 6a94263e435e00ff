//! Headless Chromium driver for the render pipeline.
//!
//! `headless_chrome` is synchronous, so every call into it runs on tokio's
//! blocking pool. Dropping the last `Browser` handle kills and reaps the
//! child process; sessions that are dropped without `close` still end their
//! process that way.
//!
//! Content loading does not use the driver's own navigation wait, which
//! settles on network idleness rather than the document `load` event and
//! cannot be interrupted. Each page listens for lifecycle events itself and
//! waits in a loop that ends as soon as the page is closed.

use std::{
    ffi::OsStr,
    io::Write,
    path::PathBuf,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use headless_chrome::{
    Browser, LaunchOptions, Tab,
    protocol::cdp::{Page, types::Event},
    types::PrintToPdfOptions,
};
use tempfile::NamedTempFile;
use tokio::task;
use tracing::{debug, info};
use url::Url;

use crate::application::render::{
    EngineError, EngineLauncher, EngineSession, PageContext, PdfOptions,
};

const DISABLE_DEV_SHM_ARG: &str = "--disable-dev-shm-usage";

/// Stand-in for "no limit" on the driver's internal waits. The pipeline owns
/// the real bound; the driver must never give up first.
const DRIVER_WAIT_CEILING: Duration = Duration::from_secs(60 * 60 * 24 * 365);

const LOAD_POLL_INTERVAL: Duration = Duration::from_millis(25);
const CONNECTION_CHECK_INTERVAL: Duration = Duration::from_secs(1);
const TAB_CLOSE_GRACE: Duration = Duration::from_secs(10);

const LOAD_LIFECYCLE_EVENT: &str = "load";

/// Launches one headless Chromium process per conversion.
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    chrome_path: Option<PathBuf>,
}

impl ChromeLauncher {
    pub fn new(chrome_path: Option<PathBuf>) -> Self {
        Self { chrome_path }
    }

    fn launch_options(&self) -> Result<LaunchOptions<'static>, EngineError> {
        LaunchOptions::default_builder()
            .headless(true)
            .sandbox(false)
            .path(self.chrome_path.clone())
            .idle_browser_timeout(DRIVER_WAIT_CEILING)
            .args(vec![OsStr::new(DISABLE_DEV_SHM_ARG)])
            .build()
            .map_err(|err| EngineError::new(format!("invalid chromium launch options: {err}")))
    }
}

#[async_trait]
impl EngineLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn EngineSession>, EngineError> {
        let options = self.launch_options()?;
        let started_at = Instant::now();

        let browser = blocking("launch", move || {
            Browser::new(options)
                .map_err(|err| EngineError::new(format!("failed to launch chromium: {err:#}")))
        })
        .await?;

        info!(
            target = "infra::chrome",
            op = "chrome::launch",
            pid = browser.get_process_id().unwrap_or_default(),
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            "Chromium process started"
        );

        Ok(Box::new(ChromeSession {
            pid: browser.get_process_id(),
            browser: Some(browser),
        }))
    }
}

struct ChromeSession {
    browser: Option<Browser>,
    pid: Option<u32>,
}

#[async_trait]
impl EngineSession for ChromeSession {
    async fn new_page(&mut self) -> Result<Box<dyn PageContext>, EngineError> {
        let browser = self
            .browser
            .clone()
            .ok_or_else(|| EngineError::new("chromium session already closed"))?;

        let tab = blocking("new_tab", move || {
            browser
                .new_tab()
                .map_err(|err| EngineError::new(format!("failed to open tab: {err:#}")))
        })
        .await?;

        let signals = Arc::new(LoadSignals::default());
        let listener = Arc::clone(&signals);
        tab.add_event_listener(Arc::new(move |event: &Event| listener.observe(event)))
            .map_err(|err| EngineError::new(format!("failed to watch tab events: {err:#}")))?;

        Ok(Box::new(ChromePage {
            tab: Some(tab),
            document: None,
            signals,
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        let Some(browser) = self.browser.take() else {
            return Ok(());
        };

        blocking("close_browser", move || {
            drop(browser);
            Ok(())
        })
        .await?;

        debug!(
            target = "infra::chrome",
            op = "chrome::close",
            pid = self.pid.unwrap_or_default(),
            "Chromium process terminated"
        );
        Ok(())
    }

    fn process_id(&self) -> Option<u32> {
        self.pid
    }
}

/// Load progress reported on a tab's event stream.
#[derive(Debug, Default)]
struct LoadSignals {
    /// Loader ids whose document fired `load`.
    loaded: Mutex<Vec<String>>,
    crashed: AtomicBool,
    detached: AtomicBool,
}

impl LoadSignals {
    fn observe(&self, event: &Event) {
        match event {
            Event::PageLifecycleEvent(lifecycle)
                if lifecycle.params.name == LOAD_LIFECYCLE_EVENT =>
            {
                self.loaded
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(lifecycle.params.loader_id.clone());
            }
            Event::InspectorTargetCrashed(_) => self.crashed.store(true, Ordering::SeqCst),
            Event::InspectorDetached(_) => self.detached.store(true, Ordering::SeqCst),
            _ => {}
        }
    }

    fn reset(&self) {
        self.loaded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// `None` accepts the first `load` seen since the last reset.
    fn has_loaded(&self, loader_id: Option<&str>) -> bool {
        let loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        match loader_id {
            Some(id) => loaded.iter().any(|seen| seen == id),
            None => !loaded.is_empty(),
        }
    }
}

/// Block until the navigated document fires `load`.
///
/// Returns early with an error once `closed` is set, the renderer crashes or
/// detaches, or `connected` reports the browser connection gone. `connected`
/// is checked every [`CONNECTION_CHECK_INTERVAL`].
fn wait_for_load(
    loader_id: Option<&str>,
    signals: &LoadSignals,
    closed: &AtomicBool,
    mut connected: impl FnMut() -> bool,
) -> Result<(), EngineError> {
    let mut last_check = Instant::now();
    loop {
        if closed.load(Ordering::SeqCst) {
            return Err(EngineError::new("page closed before the document finished loading"));
        }
        if signals.has_loaded(loader_id) {
            return Ok(());
        }
        if signals.crashed.load(Ordering::SeqCst) {
            return Err(EngineError::new("renderer crashed while loading the document"));
        }
        if signals.detached.load(Ordering::SeqCst) {
            return Err(EngineError::new("devtools session detached while loading the document"));
        }
        if last_check.elapsed() >= CONNECTION_CHECK_INTERVAL {
            if !connected() {
                return Err(EngineError::new("lost connection to chromium while loading the document"));
            }
            last_check = Instant::now();
        }
        thread::sleep(LOAD_POLL_INTERVAL);
    }
}

struct ChromePage {
    tab: Option<Arc<Tab>>,
    /// Source file the tab navigated to; kept until the page is closed.
    document: Option<NamedTempFile>,
    signals: Arc<LoadSignals>,
    /// Set by `close`; ends any load wait still running on the blocking pool.
    closed: Arc<AtomicBool>,
}

impl ChromePage {
    fn tab(&self) -> Result<Arc<Tab>, EngineError> {
        self.tab
            .clone()
            .ok_or_else(|| EngineError::new("page already closed"))
    }
}

#[async_trait]
impl PageContext for ChromePage {
    async fn load(&mut self, html: &str) -> Result<(), EngineError> {
        let tab = self.tab()?;
        let html = html.to_owned();

        let document = blocking("write_document", move || write_document(&html)).await?;
        let url = Url::from_file_path(document.path()).map_err(|()| {
            EngineError::new(format!(
                "temporary document path `{}` is not absolute",
                document.path().display()
            ))
        })?;
        self.document = Some(document);

        let signals = Arc::clone(&self.signals);
        let closed = Arc::clone(&self.closed);
        blocking("load", move || {
            signals.reset();
            let navigation = tab
                .call_method(Page::Navigate {
                    url: url.to_string(),
                    referrer: None,
                    transition_Type: None,
                    frame_id: None,
                    referrer_policy: None,
                })
                .map_err(|err| EngineError::new(format!("navigation failed: {err:#}")))?;
            if let Some(error_text) = navigation.error_text {
                return Err(EngineError::new(format!("navigation failed: {error_text}")));
            }

            wait_for_load(navigation.loader_id.as_deref(), &signals, &closed, || {
                tab.get_target_info().is_ok()
            })
        })
        .await
    }

    async fn print_pdf(&mut self, options: &PdfOptions) -> Result<Vec<u8>, EngineError> {
        let tab = self.tab()?;
        let print_options = PrintToPdfOptions {
            print_background: Some(options.print_background),
            paper_width: Some(options.paper.width_in),
            paper_height: Some(options.paper.height_in),
            ..Default::default()
        };

        blocking("print_to_pdf", move || {
            tab.print_to_pdf(Some(print_options))
                .map_err(|err| EngineError::new(format!("print to pdf failed: {err:#}")))
        })
        .await
    }

    async fn close(&mut self) -> Result<(), EngineError> {
        self.closed.store(true, Ordering::SeqCst);
        let Some(tab) = self.tab.take() else {
            return Ok(());
        };

        // Target.closeTarget is handled by the browser, so a hung renderer
        // cannot hold it up.
        let closing = blocking("close_tab", move || {
            tab.close(false)
                .map(|_| ())
                .map_err(|err| EngineError::new(format!("failed to close tab: {err:#}")))
        });
        let result = match tokio::time::timeout(TAB_CLOSE_GRACE, closing).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::new(format!(
                "tab did not close within {}s",
                TAB_CLOSE_GRACE.as_secs()
            ))),
        };

        drop(self.document.take());
        result
    }
}

fn write_document(html: &str) -> Result<NamedTempFile, EngineError> {
    let mut document = tempfile::Builder::new()
        .prefix("html2pdf-")
        .suffix(".html")
        .tempfile()
        .map_err(|err| EngineError::new(format!("failed to create document file: {err}")))?;
    document
        .write_all(html.as_bytes())
        .and_then(|()| document.flush())
        .map_err(|err| EngineError::new(format!("failed to write document file: {err}")))?;
    Ok(document)
}

async fn blocking<T, F>(op: &'static str, call: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
{
    task::spawn_blocking(call)
        .await
        .map_err(|err| EngineError::new(format!("chromium `{op}` task failed: {err}")))?
}
