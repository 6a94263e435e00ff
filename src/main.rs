use std::{path::Path, process, sync::Arc};

use html2pdf::{
    application::error::AppError,
    application::render::{PdfRenderer, RenderPolicy, RenderRequest},
    config,
    infra::{
        chrome::ChromeLauncher,
        error::InfraError,
        http::{self, HttpState},
        telemetry,
    },
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;
    let renderer = build_renderer(&settings.render);

    match command {
        config::Command::Serve(_) => run_serve(settings, renderer).await,
        config::Command::Convert(args) => run_convert(renderer, args).await,
    }
}

fn build_renderer(settings: &config::RenderSettings) -> Arc<PdfRenderer> {
    let launcher = ChromeLauncher::new(settings.chrome_path.clone());
    Arc::new(PdfRenderer::new(
        Arc::new(launcher),
        RenderPolicy::from(settings),
    ))
}

async fn run_serve(settings: config::Settings, renderer: Arc<PdfRenderer>) -> Result<(), AppError> {
    let body_limit = usize::try_from(settings.server.max_request_bytes.get())
        .map_err(|_| AppError::unexpected("request body limit exceeds usize"))?;
    let router = http::build_router(HttpState { renderer }, body_limit);

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "html2pdf::serve",
        addr = %settings.server.addr,
        max_request_bytes = body_limit,
        "Listening for conversion requests"
    );

    let grace = settings.server.graceful_shutdown;
    let server = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .into_future();
    tokio::pin!(server);

    // After the signal, in-flight conversions get `grace` to finish.
    tokio::select! {
        result = &mut server => {
            result.map_err(|err| AppError::from(InfraError::server(err.to_string())))?;
        }
        _ = async {
            shutdown_signal().await;
            tokio::time::sleep(grace).await;
        } => {
            warn!(
                target = "html2pdf::serve",
                grace_secs = grace.as_secs(),
                "Graceful shutdown window elapsed; exiting with requests in flight"
            );
        }
    }

    info!(target = "html2pdf::serve", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(target = "html2pdf::serve", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                warn!(target = "html2pdf::serve", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

async fn run_convert(renderer: Arc<PdfRenderer>, args: config::ConvertArgs) -> Result<(), AppError> {
    let html = read_input(&args.input).await?;

    info!(
        target = "html2pdf::convert",
        input = %args.input.display(),
        html_bytes = html.len(),
        "Starting conversion"
    );

    let artifact = renderer.convert(&RenderRequest::new(html)).await?;
    let payload = if args.base64 {
        artifact.into_encoded().into_bytes()
    } else {
        artifact.into_bytes()
    };

    match args.output.as_ref() {
        Some(path) => {
            tokio::fs::write(path, &payload)
                .await
                .map_err(|err| AppError::from(InfraError::from(err)))?;
            info!(
                target = "html2pdf::convert",
                output = %path.display(),
                bytes = payload.len(),
                "Conversion written"
            );
        }
        None => {
            let mut stdout = tokio::io::stdout();
            stdout
                .write_all(&payload)
                .await
                .map_err(|err| AppError::from(InfraError::from(err)))?;
            stdout
                .flush()
                .await
                .map_err(|err| AppError::from(InfraError::from(err)))?;
        }
    }

    Ok(())
}

async fn read_input(path: &Path) -> Result<String, AppError> {
    let bytes = if path == Path::new("-") {
        let mut buffer = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buffer)
            .await
            .map_err(|err| AppError::from(InfraError::from(err)))?;
        buffer
    } else {
        tokio::fs::read(path)
            .await
            .map_err(|err| AppError::from(InfraError::from(err)))?
    };

    String::from_utf8(bytes)
        .map_err(|_| AppError::validation(format!("{} is not valid UTF-8", path.display())))
}
