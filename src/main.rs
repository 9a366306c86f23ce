use std::{io, process};

use offline_cache::{
    application::{
        commands::{run_fetch, run_resolve},
        error::AppError,
    },
    config,
    infra::telemetry,
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    let chain = error.chain();
    if dispatcher::has_been_set() {
        error!(error = %error, causes = ?&chain[1..], "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, causes = ?&chain[1..], "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;
    if settings.engine.principal_key.is_empty() {
        warn!("app.principal_key is not set; per-principal cache names use an empty HMAC key");
    }
    info!(
        app_id = settings.engine.names.app_id(),
        version = settings.engine.names.version(),
        environment = %settings.engine.environment,
        origin = %settings.engine.origin,
        "configuration loaded"
    );

    let mut stdout = io::stdout();
    match cli_args.command {
        config::Command::Resolve(args) => run_resolve(&settings, &args, &mut stdout),
        config::Command::Fetch(args) => run_fetch(&settings, &args, &mut stdout).await,
    }
}
