use imgquery::config::AppConfig;
use imgquery::fetch::{resource_name, FetchRequest, ScriptReporter, StreamingFetcher};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Fetch a single image URL with the server's limits.
///
/// Usage: `fetch-url <url> [output]`
///
/// Progress fragments go to stdout as the lookup page would receive them.
/// With `output` the validated image is kept there, otherwise it is
/// discarded after validation.
#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "imgquery=info".into())
        )
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(url) = args.next() else {
        eprintln!("usage: fetch-url <url> [output]");
        std::process::exit(2);
    };
    let output = args.next().map(PathBuf::from);

    let cfg = match AppConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };
    let fetcher = match StreamingFetcher::new(cfg.fetch.clone()) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let request = FetchRequest::new(url.clone(), cfg.fetch.limits);
    let mut reporter = ScriptReporter::new(std::io::stdout());
    match fetcher.fetch(&request, &mut reporter, cancel).await {
        Ok(artifact) => {
            eprintln!(
                "{} {}x{}, {} bytes, {} redirect(s)",
                artifact.content_type(),
                artifact.info.width,
                artifact.info.height,
                artifact.size,
                artifact.redirects
            );
            if let Some(dest) = output {
                if let Err(e) = artifact.persist(&dest) {
                    eprintln!("Cannot save to {}: {}", dest.display(), e);
                    std::process::exit(1);
                }
            }
        }
        Err(e) => {
            eprintln!("{}", e.describe(&resource_name(&url)));
            if let Some(hint) = e.hint() {
                eprintln!("{}", hint);
            }
            std::process::exit(1);
        }
    }
}
