use anyhow::Result;
use conductor_core::api::ApiServer;
use conductor_core::config::Config;
use conductor_core::monitoring::{MonitoringConfig, SystemMonitor};
use conductor_core::orchestrator::{Orchestrator, OrchestratorConfig};
use std::sync::Arc;
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("starting conductor-core");

    let config = Config::load()?;

    let orchestrator_config = OrchestratorConfig {
        engine: config.engine.clone(),
        bus: config.bus.clone(),
        memory: config.memory.clone(),
        ..OrchestratorConfig::default()
    };
    let orchestrator = Arc::new(Orchestrator::with_in_memory_store(orchestrator_config));

    let monitor = Arc::new(SystemMonitor::new(MonitoringConfig::default()));
    monitor.start(orchestrator.clone()).await;

    let api_server = ApiServer::new(config, orchestrator.clone())?.with_system_monitor(monitor.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let background = tokio::spawn(orchestrator.clone().run(
        std::time::Duration::from_secs(5),
        "dead-letter",
        shutdown_rx,
    ));

    let result = api_server.run().await;
    if let Err(e) = &result {
        error!(error = %e, "api server stopped with an error");
    }

    let _ = shutdown_tx.send(());
    let _ = background.await;
    monitor.shutdown().await;

    result.map_err(Into::into)
}
