use anyhow::Context;
use bookstore_api::{app, state};
use std::net::SocketAddr;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "bookstore_api=debug,bookstore_order=debug,bookstore_payment=debug,bookstore_catalog=debug,bookstore_store=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = bookstore_store::app_config::Config::load().context("Failed to load config")?;
    tracing::info!(role = ?config.service.role, "Starting bookstore service on port {}", config.service.port);

    let runtime = state::build(&config).await?;
    let token = CancellationToken::new();
    let mut tasks = JoinSet::new();

    for host in runtime.hosts {
        let token = token.clone();
        tasks.spawn(async move {
            if let Err(e) = host.run(token.clone()).await {
                tracing::error!(error = %e, "Consumer host failed, shutting down");
                token.cancel();
            }
        });
    }

    if let Some(relay) = runtime.relay.clone() {
        let token = token.clone();
        tasks.spawn(async move { relay.run(token).await });
    }

    let supervisor = tokio::spawn(supervise(tasks, token.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.service.port));
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    axum::serve(listener, app(runtime.state))
        .with_graceful_shutdown(shutdown_signal(token.clone()))
        .await
        .context("HTTP server failed")?;

    token.cancel();
    if let Err(e) = supervisor.await {
        tracing::error!(error = %e, "Task supervisor failed");
    }
    if let Some(publisher) = runtime.publisher {
        publisher.close().await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Joins the background tasks. A task that dies takes the process down with
/// it instead of leaving its queue unconsumed.
async fn supervise(mut tasks: JoinSet<()>, token: CancellationToken) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(error = %e, "Background task panicked, shutting down");
            token.cancel();
        }
    }
}

async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Failed to listen for ctrl-c");
            }
            tracing::info!("Shutdown requested");
            token.cancel();
        }
        _ = token.cancelled() => {}
    }
}
