use std::{any::Any, future::Future, panic::AssertUnwindSafe};

use futures::FutureExt;
use metrics::counter;
use tracing::warn;

use super::session::{PageScope, SessionScope};
use super::types::TeardownError;

/// Release the page (if one was opened) and then the session.
///
/// Each step runs even if the previous one failed or panicked. Failures are
/// logged and returned for inspection; they are never propagated as the
/// conversion outcome.
pub(crate) async fn teardown(
    page: Option<&mut PageScope>,
    session: &mut SessionScope,
) -> Vec<TeardownError> {
    let mut failures = Vec::new();

    if let Some(page) = page {
        if let Err(err) = guarded(page.release(), |message| TeardownError::Page { message }).await
        {
            failures.push(err);
        }
    }

    if let Err(err) = guarded(session.release(), |message| TeardownError::Session {
        message,
    })
    .await
    {
        failures.push(err);
    }

    for failure in &failures {
        counter!("html2pdf_teardown_failure_total", "stage" => failure.stage()).increment(1);
        warn!(
            target = "application::render::teardown",
            op = "render::teardown",
            result = "error",
            stage = failure.stage(),
            error = %failure,
            "teardown step failed"
        );
    }

    failures
}

async fn guarded<F>(
    step: F,
    on_panic: impl FnOnce(String) -> TeardownError,
) -> Result<(), TeardownError>
where
    F: Future<Output = Result<(), TeardownError>>,
{
    match AssertUnwindSafe(step).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(on_panic(panic_message(payload.as_ref()))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
