use std::net::SocketAddr;

use authpair::check::{CheckOptions, run_checks};
use authpair::cli::{
    Args, CheckArgs, Command, ServeArgs, build_config, init_logging, load_credentials,
    load_secrets, open_store,
};
use authpair::{create_app, init_cleanup};
use clap::Parser;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    match args.command {
        Command::Serve(serve) => run_serve(serve).await,
        Command::Check(check) => run_check(check).await,
    }
}

async fn run_serve(args: ServeArgs) {
    let Some(secrets) = load_secrets(&args) else {
        std::process::exit(1);
    };

    let Some(store) = open_store(args.database.as_deref()).await else {
        std::process::exit(1);
    };

    let Some(credentials) = load_credentials(args.subjects_file.as_deref()) else {
        std::process::exit(1);
    };

    init_cleanup(&store).await;

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    let local_addr = listener.local_addr().unwrap_or_else(|e| {
        error!(error = %e, "Failed to read local address");
        std::process::exit(1);
    });

    let config = build_config(&args, secrets, store, credentials);
    let app = create_app(&config);

    info!(
        address = %local_addr,
        origins = ?config.allowed_origins.as_slice(),
        access_ttl_secs = config.access_ttl.as_secs(),
        refresh_ttl_secs = config.refresh_ttl.as_secs(),
        "Listening"
    );

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(e) = axum::serve(listener, make_service).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}

async fn run_check(args: CheckArgs) {
    let options = CheckOptions {
        base_url: args.base_url,
        email: args.email,
        password: args.password,
        origin: args.origin,
        timeout: std::time::Duration::from_secs(args.timeout),
    };

    let report = run_checks(&options).await;
    for step in &report.steps {
        println!("{}", step);
    }

    if !report.passed() {
        std::process::exit(1);
    }
}
