//! `matilda serve`: Start the HTTP API server.

use matilda_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> matilda_core::Result<()> {
    let mut config = AppConfig::load()?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("Matilda Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Sessions:  up to {}, idle timeout {}s", config.gateway.max_sessions, config.gateway.session_idle_secs);

    matilda_gateway::start(config).await?;

    Ok(())
}
