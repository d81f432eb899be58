//! Leveraged position liquidation keeper.
//!
//! Tracks every open position's liquidation price and liquidates positions
//! as the oracle price crosses them. Features:
//! - Position lifecycle events via WebSocket subscription
//! - Price-ordered position queue with buffer-triggered full scans
//! - Nonce-pinned concurrent liquidation batches
//! - Periodic liquidation price refresh

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use keeper_api::PythClient;
use keeper_chain::gas::create_gas_strategy;
use keeper_chain::{
    ChainClient, EventListener, LiquidationChain, PositionEvent, ProviderManager, TransactionSenderBuilder,
};
use keeper_core::{
    BatchExecutor, BootstrapSettings, Bootstrapper, DedupGate, DeploymentConfig, EventProcessor, ExecutorConfig,
    JsonFileStore, KeeperConfig, KeeperStats, LiquidationScheduler, PositionQueue, PositionSet, PositionStore,
    PriceRefreshScheduler, RefreshSettings, SchedulerConfig,
};

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    dotenvy::dotenv().ok();

    init_tracing();

    // KEEPER_CONFIG selects a TOML file, otherwise KEEPER_PROFILE picks a preset.
    let keeper_config = KeeperConfig::load()?;
    keeper_config.log_config();

    let deployment = DeploymentConfig::load()?;
    info!(chain_id = deployment.chain_id, "Starting liquidation keeper");

    let (tx, rx) = watch::channel(false);
    let handles = start(keeper_config, deployment, rx).await?;

    tokio::signal::ctrl_c().await.context("listening for ctrl-c")?;
    info!("Shutdown requested, finishing current work");
    let _ = tx.send(true);

    for handle in handles {
        if let Err(e) = handle.await {
            warn!(error = %e, "Task ended abnormally");
        }
    }
    info!("Keeper stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,keeper_core=debug,keeper_chain=debug"));

    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        tracing_subscriber::registry().with(fmt::layer().json()).with(filter).init();
    } else {
        tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
    }
}

/// Wire the components, restore the queue and spawn the long-running tasks.
async fn start(
    config: KeeperConfig,
    deployment: DeploymentConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<Vec<JoinHandle<()>>> {
    info!("Initializing components...");
    let addresses = deployment.addresses()?;

    let provider = ProviderManager::new(&deployment.rpc.http, addresses).await?;
    info!(
        liquidation_module = %addresses.liquidation_module,
        leverage_module = %addresses.leverage_module,
        viewer = %addresses.viewer,
        "Provider initialized"
    );

    let gas_strategy = create_gas_strategy(
        config.gas.pricing,
        config.gas.max_fee_multiplier,
        config.gas.max_gas_price_gwei,
    );
    let sender = TransactionSenderBuilder::new(&deployment.rpc.http, deployment.chain_id, addresses.liquidation_module)
        .gas_strategy(gas_strategy)
        .gas_limit_buffer_pct(config.gas.gas_limit_buffer_pct)
        .price_update_fee(U256::from(config.gas.price_update_fee_wei))
        .confirmation_timeout(config.gas.confirmation_timeout())
        .build(&deployment.signer_private_key)?;
    let chain: Arc<dyn LiquidationChain> = Arc::new(ChainClient::new(provider, Arc::new(sender)));

    let oracle = Arc::new(PythClient::new(&deployment.oracle.hermes_url, &deployment.oracle.price_feed_id)?);
    let store: Arc<dyn PositionStore> = Arc::new(JsonFileStore::open(&deployment.store_path).await?);
    let positions: Arc<dyn PositionSet> = Arc::new(PositionQueue::new());
    let stats = Arc::new(KeeperStats::new());

    let mut handles = Vec::new();

    // Subscribe before restoring so events emitted during bootstrap queue up
    // in the channel and are applied once the queue is ready.
    let (event_tx, event_rx) = mpsc::channel::<PositionEvent>(config.events.channel_capacity);
    let listener = EventListener::new(&deployment.rpc.ws, addresses.leverage_module, addresses.liquidation_module);
    handles.push(tokio::spawn(listen(
        listener,
        event_tx,
        config.events.reconnect_delay(),
        shutdown.clone(),
    )));

    info!("Bootstrapping...");
    Bootstrapper::new(
        chain.clone(),
        positions.clone(),
        store.clone(),
        BootstrapSettings::from_keeper(&config),
    )
    .run()
    .await?;
    info!(tracked = positions.len(), pending = positions.pending_len(), "Position queue ready");

    let processor = Arc::new(EventProcessor::new(chain.clone(), positions.clone(), store.clone()));
    handles.push(tokio::spawn(processor.run(event_rx, shutdown.clone())));

    let executor = Arc::new(BatchExecutor::new(
        chain.clone(),
        oracle.clone(),
        positions.clone(),
        store.clone(),
        DedupGate::new(),
        stats.clone(),
        ExecutorConfig::from_keeper(&config),
    ));
    let scheduler = Arc::new(LiquidationScheduler::new(
        positions.clone(),
        oracle,
        executor,
        stats.clone(),
        SchedulerConfig::from_keeper(&config),
    ));
    handles.push(tokio::spawn(scheduler.run(shutdown.clone())));

    let refresher = Arc::new(PriceRefreshScheduler::new(
        chain,
        positions,
        store,
        stats,
        RefreshSettings::from_keeper(&config),
    ));
    handles.push(tokio::spawn(refresher.run(shutdown)));

    info!("All components initialized");
    Ok(handles)
}

/// Keep the event subscription alive, re-subscribing after `reconnect_delay`.
async fn listen(
    listener: EventListener,
    tx: mpsc::Sender<PositionEvent>,
    reconnect_delay: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = listener.forward(tx.clone()) => {
                if let Err(e) = result {
                    error!(error = %e, "Event subscription failed");
                }
            }
            _ = shutdown.changed() => break,
        }

        if tx.is_closed() {
            break;
        }
        warn!(delay_secs = reconnect_delay.as_secs(), "Re-subscribing to position events");
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = shutdown.changed() => break,
        }
    }
    info!("Event listener stopped");
}

/// Print startup banner.
fn print_banner() {
    println!(
        r#"
    ╦╔═┌─┐┌─┐┌─┐┌─┐┬─┐
    ╠╩╗├┤ ├┤ ├─┘├┤ ├┬┘
    ╩ ╩└─┘└─┘┴  └─┘┴└─
    Liquidation Keeper v0.1.0
    "#
    );
}
