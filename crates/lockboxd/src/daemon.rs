//! Daemon lifecycle: vault bootstrap, token secret, gRPC server, shutdown

use anyhow::{Context, Result};
use lockbox_core::config::{LockboxConfig, TokenConfig};
use lockbox_crypto::generate_key;
use lockbox_vault::{Authenticator, Bootstrap, Storage, TokenManager};
use secrecy::{ExposeSecret, SecretString};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::grpc::{AuthServiceImpl, StorageServiceImpl, TokenInterceptor};

/// Length of the per-process token secret used when none is configured
const GENERATED_SECRET_LENGTH: usize = 64;

/// Bind the configured address and serve until SIGINT/SIGTERM.
pub async fn run(config: LockboxConfig) -> Result<()> {
    let listener = TcpListener::bind(&config.daemon.listen)
        .await
        .with_context(|| format!("binding {}", config.daemon.listen))?;

    serve(config, listener, shutdown_signal()).await
}

/// Open the vault and serve on an already bound listener.
pub async fn serve<F>(config: LockboxConfig, listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send,
{
    info!(data_dir = %config.storage.data_dir.display(), "daemon starting");

    let data_dir = config.storage.data_dir.clone();
    let (auth, state) = tokio::task::spawn_blocking(move || Authenticator::open(data_dir))
        .await
        .context("vault bootstrap task")?
        .with_context(|| format!("opening vault at {}", config.storage.data_dir.display()))?;

    match state {
        Bootstrap::Created(_) => info!("new vault initialised"),
        Bootstrap::Existing => info!("existing vault opened"),
    }

    let secret = token_secret(&config.token)?;
    let tokens = TokenManager::new(
        secret.expose_secret().as_bytes(),
        Duration::from_secs(config.token.ttl_secs),
    )
    .context("token manager")?;

    let auth = Arc::new(auth);
    let tokens = Arc::new(tokens);

    crate::grpc::serve(
        listener,
        AuthServiceImpl::new(auth.clone(), tokens.clone()),
        StorageServiceImpl::new(Storage::new(), config.storage.chunk_size),
        TokenInterceptor::new(auth, tokens),
        shutdown,
    )
    .await?;

    info!("daemon stopped");
    Ok(())
}

fn token_secret(config: &TokenConfig) -> Result<SecretString> {
    match config.secret.as_deref() {
        Some(secret) if !secret.is_empty() => Ok(SecretString::from(secret)),
        _ => {
            warn!("no token secret configured; generated one for this process, tokens will not survive a restart");
            let secret = generate_key(GENERATED_SECRET_LENGTH).context("generating token secret")?;
            Ok(SecretString::from(String::from_utf8_lossy(&secret).into_owned()))
        }
    }
}

/// Resolves on SIGINT or (unix) SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for ctrl+c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
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
    info!("shutdown signal received");
}
