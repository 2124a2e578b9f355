use std::time::Duration;

use clap::Parser;
use neubot_dash::client::ClientBuilder;
use neubot_dash::emitter::{Emitter, HumanReadableEmitter, JsonEmitter};
use neubot_dash::summary::Summary;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const CLIENT_NAME: &str = "dash-client-rust";

const PRIVACY_NOTICE: &str = "
Please, read the privacy policy at https://github.com/neubot/dash/blob/master/PRIVACY.md.

If you accept the privacy policy, rerun adding the `-y` flag to the command line.
";

#[derive(Clone, Debug, clap::ValueEnum)]
enum Format {
    Human,
    Json,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum Scheme {
    Https,
    Http,
}

#[derive(Parser, Debug)]
struct Cli {
    /// I have read and accept the privacy policy
    #[arg(short = 'y')]
    accept_privacy_policy: bool,
    /// Optional DASH server hostname. Discovered with the Locate API if omitted.
    #[arg(long)]
    server: Option<String>,
    /// Protocol scheme to use
    #[arg(long, default_value = "https")]
    scheme: Scheme,
    /// Seconds after which the whole test is aborted
    #[arg(long, default_value_t = 55)]
    timeout: u64,
    /// Output format to use: 'human' or 'json' for batch processing
    #[arg(long, default_value = "human")]
    format: Format,
    /// Verbose debug output on stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    if !cli.accept_privacy_policy {
        eprintln!("{PRIVACY_NOTICE}");
        std::process::exit(1);
    }

    let mut emitter: Box<dyn Emitter> = match cli.format {
        Format::Human => Box::new(HumanReadableEmitter::new(std::io::stdout())),
        Format::Json => Box::new(JsonEmitter::new(std::io::stdout())),
    };

    let mut builder = ClientBuilder::new(CLIENT_NAME, env!("CARGO_PKG_VERSION")).scheme(
        match cli.scheme {
            Scheme::Https => "https",
            Scheme::Http => "http",
        },
    );
    if let Some(server) = cli.server {
        builder = builder.server(server);
    }
    let client = builder.build()?;

    let cancel = CancellationToken::new();
    let deadline = cancel.clone();
    let timeout = Duration::from_secs(cli.timeout);
    tokio::spawn(async move {
        tokio::time::sleep(timeout).await;
        deadline.cancel();
    });

    let mut run = match client.start_download(cancel).await {
        Ok(run) => run,
        Err(e) => {
            emitter.on_error(&e.to_string())?;
            tracing::error!("DASH experiment failed: {e}");
            return Err(e.into());
        }
    };
    let server_fqdn = run.server_fqdn().to_owned();
    emitter.on_starting(&server_fqdn)?;

    let mut results = Vec::new();
    while let Some(r) = run.recv().await {
        emitter.on_iteration(&r)?;
        results.push(r);
    }

    match run.finish().await {
        Ok(server_results) => {
            emitter.on_server_results(&server_results)?;
            emitter.on_summary(&Summary::from_results(server_fqdn, &results))?;
            Ok(())
        }
        Err(e) => {
            emitter.on_error(&e.to_string())?;
            tracing::error!("DASH experiment failed: {e}");
            Err(e.into())
        }
    }
}
