use std::sync::Arc;

use anyhow::Context as _;
use tracing_subscriber::{prelude::*, EnvFilter, Registry};

use relayer::{
    router, AppState, Coordinator, CoordinatorSettings, EthRpc, HttpRpcClient, RelayConfig,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_filter(filter);
    Registry::default().with(fmt_layer).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(%err, "invalid relay configuration");
            return Err(err.into());
        }
    };

    let rpc = HttpRpcClient::new(config.rpc_url.clone(), config.rpc_timeout)
        .context("failed to build RPC client")?;
    match rpc.chain_id().await {
        Ok(remote) if remote != config.chain_id => tracing::warn!(
            configured = config.chain_id,
            remote,
            "RPC endpoint reports a different chain id"
        ),
        Ok(_) => {}
        Err(err) => tracing::warn!(%err, "could not read chain id from RPC endpoint"),
    }

    let relay_address = config.relay_account.address();
    let coordinator = Coordinator::new(
        Arc::new(rpc),
        config.relay_account,
        CoordinatorSettings {
            chain_id: config.chain_id,
            fees: config.fees,
            confirmation: config.confirmation,
        },
    );
    let app = router(AppState {
        coordinator: Arc::new(coordinator),
        default_delegation_contract: config.default_delegation_contract,
    });

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    tracing::info!(
        %relay_address,
        chain_id = config.chain_id,
        listen_addr = %config.listen_addr,
        "relayer service started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(%err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
