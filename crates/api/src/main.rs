use torque_core::TorqueConfig;

#[tokio::main]
async fn main() {
    torque_observability::init();

    let config = match TorqueConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "invalid configuration");
        std::process::exit(1);
    }

    let bind_addr = config.bind_addr.clone();
    let services = torque_api::app::build_services(config).await;
    let background = torque_api::app::spawn_background(&services);
    let app = torque_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind {bind_addr}: {e}"));

    tracing::info!("listening on {}", listener.local_addr().unwrap());

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await
        .unwrap();

    // Drain: workers finish their in-flight attempt, then exit.
    background.shutdown().await;
}
