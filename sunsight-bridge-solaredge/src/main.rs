//! SunSight bridge for SolarEdge inverters.
//!
//! Polls the inverter over Modbus TCP and serves the latest photovoltaic
//! status over HTTP.

use anyhow::{Context, Result};
use sunsight_bridge_framework::{BridgeArgs, BridgeConfig, BridgeRunner};

use sunsight_bridge_solaredge::config::SolarEdgeBridgeConfig;
use sunsight_bridge_solaredge::http::HttpServer;
use sunsight_bridge_solaredge::poller::PhotovoltaicService;
use sunsight_bridge_solaredge::transport::TcpRegisterReader;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = BridgeArgs::parse_with_default("solaredge.json5");

    let config = SolarEdgeBridgeConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let mut runner = BridgeRunner::new_with_args("solaredge", config, Some(&args))?;

    let inverter = runner.config().inverter.clone();
    let listen_addr = runner.config().http.listen_addr()?;

    tracing::info!(
        endpoint = %inverter.endpoint,
        unit_id = inverter.unit_id,
        interval_secs = inverter.poll_interval_secs,
        "Polling SolarEdge inverter"
    );

    let reader = TcpRegisterReader::new(inverter.endpoint.clone())
        .with_unit_id(inverter.unit_id)
        .with_timeout(inverter.timeout());
    let service = PhotovoltaicService::new(reader, inverter.timing());
    let server = HttpServer::new(service.status_handle(), listen_addr);

    runner.spawn("poller", move |shutdown| async move {
        service.run(shutdown).await
    });
    runner.spawn("http", move |shutdown| server.run(shutdown));

    // Run until Ctrl+C / SIGTERM or until a worker stops
    runner.run().await?;
    Ok(())
}
