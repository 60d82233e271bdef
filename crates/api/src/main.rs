//! Broker entrypoint: wiring, background tasks, graceful shutdown.

use std::sync::Arc;

use anyhow::Context;
use tokenbridge_api::{build_router, AppState};
use tokenbridge_core::{AuthorizationService, RefreshCoordinator, RevocationService};
use tokenbridge_infra::database::{SqliteAccountRepository, SqliteAuditRepository, SqliteStateRepository};
use tokenbridge_infra::scheduling::{SweepScheduler, SweepSchedulerConfig};
use tokenbridge_infra::{AesGcmCredentialCipher, BufferedAuditSink, DbManager, ProviderHttpClient};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = tokenbridge_infra::config::load().context("configuration")?;

    // A bad key would make every stored credential unreadable; fail fast.
    let cipher = Arc::new(
        AesGcmCredentialCipher::from_base64_key(&config.security.credential_key)
            .context("credential key validation")?,
    );

    let db = Arc::new(
        DbManager::new(&config.database.path, config.database.pool_size).context("database")?,
    );
    db.run_migrations().context("migrations")?;

    let states = Arc::new(SqliteStateRepository::new(Arc::clone(&db)));
    let accounts = Arc::new(SqliteAccountRepository::new(Arc::clone(&db)));
    let audit_repo = Arc::new(SqliteAuditRepository::new(Arc::clone(&db)));
    let audit = Arc::new(BufferedAuditSink::new(audit_repo));

    let exchanger = Arc::new(
        ProviderHttpClient::new(config.provider.clone(), &config.http)
            .map_err(|err| anyhow::anyhow!("provider client: {err}"))?,
    );

    let authorization = Arc::new(AuthorizationService::new(
        config.provider.clone(),
        states.clone(),
        accounts.clone(),
        exchanger.clone(),
        cipher.clone(),
        audit.clone(),
    ));
    let refresh = Arc::new(RefreshCoordinator::new(
        accounts.clone(),
        exchanger.clone(),
        cipher.clone(),
        audit.clone(),
    ));
    let revocation =
        Arc::new(RevocationService::new(accounts, exchanger, cipher, audit.clone()));

    let mut sweeper = SweepScheduler::new(states, SweepSchedulerConfig::default());
    sweeper.start().await.context("expiry sweeper")?;

    let app = build_router(AppState {
        authorization,
        refresh,
        revocation,
        db,
        provider_name: config.provider.name.clone(),
    });

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, provider = %config.provider.name, "token broker listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server")?;

    sweeper.stop().await.context("stopping sweeper")?;
    audit.shutdown().await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => tracing::error!(error = %err, "failed to listen for shutdown signal"),
    }
}
