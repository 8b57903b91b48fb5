//! `instagram-relay` - Main Entry Point
//!
//! Reads configuration from the environment, then serves the webhook until
//! SIGINT or SIGTERM.

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use instagram_relay::{config::Config, Relay, Server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env before the filter reads RUST_LOG
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?config,
        "starting instagram relay"
    );

    let client = config.client()?;
    let generator = config.generator.build(config.generator_http()?);
    let store = config.store.open().await?;
    info!(
        provider = generator.name(),
        store = store.name(),
        "reply pipeline ready"
    );

    let relay = Relay::builder()
        .store(store)
        .generation_timeout(config.generation_timeout)
        .build(generator, client);

    let mut server = Server::builder()
        .endpoint(config.socket_addr())
        .route(config.webhook_route.as_str())
        .verify_token(config.verify_token.as_str())
        .ack_mode(config.ack_mode)
        .shutdown(shutdown_signal());
    if let Some(app_secret) = config.app_secret.clone() {
        server = server.verify_payload(app_secret);
    }

    server.build().serve(relay).await?;
    info!("instagram relay stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "instagram_relay=info".into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Resolves on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .unwrap_or_else(|e| error!(error = %e, "ctrl-c handler failed"));
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "SIGTERM handler unavailable, relying on ctrl-c");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
