//! Server entry point.
//!
//! Startup order: configuration, tracing, repository, redis, fatal checks
//! (token secret, container runtime), hub, worker pool, HTTP/WebSocket
//! listener. SIGTERM or ctrl-c drains the worker pool and flushes every
//! active room before exit.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use codecollab::auth::TokenSigner;
use codecollab::config::{Config, EXIT_CONFIG_ERROR};
use codecollab::hub::Hub;
use codecollab::queue::RedisJobQueue;
use codecollab::ratelimit::RedisRateLimiter;
use codecollab::repository::PgRepository;
use codecollab::sandbox::{DockerSandbox, Sandbox};
use codecollab::services::AppServices;
use codecollab::worker::WorkerPool;
use codecollab::api;

fn main() -> anyhow::Result<()> {
    let config = match Config::from_env() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(EXIT_CONFIG_ERROR);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_level))
        .init();

    tracing::info!(version = codecollab::VERSION, "codecollab starting");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async { serve(config).await })?;

    tracing::info!("codecollab shutdown complete");
    Ok(())
}

async fn serve(config: Arc<Config>) -> anyhow::Result<()> {
    let repository = Arc::new(PgRepository::connect(&config.database_url).await.map_err(
        |err| anyhow::anyhow!("repository unavailable: {err}"),
    )?);
    tracing::info!("repository connected");

    let redis_client = redis::Client::open(config.redis_url.as_str())?;
    let redis_conn = redis_client.get_connection_manager().await?;
    tracing::info!("redis connected");

    let ratelimiter = Arc::new(RedisRateLimiter::new(redis_conn.clone()));
    let queue = Arc::new(RedisJobQueue::new(redis_conn));
    let sandbox = Arc::new(DockerSandbox::new(&config));

    // Fatal: a dead container runtime means every execution would fail.
    sandbox
        .preflight()
        .await
        .map_err(|err| anyhow::anyhow!("container runtime check failed: {err}"))?;

    let signer = Arc::new(TokenSigner::new(&config.jwt_secret, config.token_ttl));
    let hub = Hub::new(repository.clone(), queue.clone(), config.clone());

    let services = AppServices::new(
        config.clone(),
        repository.clone(),
        ratelimiter,
        queue.clone(),
        sandbox.clone(),
        hub.clone(),
        signer,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_pool = WorkerPool::new(
        queue,
        sandbox,
        repository,
        hub.clone(),
        config.worker_concurrency,
    );
    let workers = tokio::spawn(worker_pool.run(shutdown_rx.clone()));

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(addr = %config.bind_addr, "listening");

    let router = api::router(services);
    let server = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());

    server.await?;

    // Listener closed: drain workers, then flush rooms.
    tracing::info!("draining workers and flushing rooms");
    let _ = shutdown_tx.send(true);
    let _ = workers.await;
    hub.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("ctrl-c received"),
        _ = terminate => tracing::info!("SIGTERM received"),
    }
}
