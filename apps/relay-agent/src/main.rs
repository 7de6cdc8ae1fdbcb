//! 边缘遥测转发代理：轮询上游设备 agent，按采集组筛选后转发到下游目的地。

mod relay;

use relay_config::{AppConfig, RelaySettings};
use relay_telemetry::{init_tracing, metrics};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    let settings = RelaySettings::from_file(&config.config_path)?;
    settings.validate()?;
    info!(
        target: "relay.agent",
        config_path = %config.config_path,
        devices = settings.devices.len(),
        destinations = settings.destinations.len(),
        "settings_loaded"
    );

    let relay = relay::start(&config, &settings).await?;

    tokio::signal::ctrl_c().await?;
    info!(target: "relay.agent", "shutdown_requested");
    relay.stop().await;

    let snapshot = metrics().snapshot();
    info!(
        target: "relay.agent",
        received = snapshot.items_received,
        sent = snapshot.items_sent,
        buffered = snapshot.items_buffered,
        dropped = snapshot.items_dropped,
        send_failures = snapshot.send_failure,
        "relay_stopped"
    );
    Ok(())
}
