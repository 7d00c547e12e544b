use credplane::{
    api::start_api_server,
    config::AppConfig,
    observability::{init_observability, log_config_info},
    startup::build_services,
    storage::create_pool,
    Result, APP_NAME, VERSION,
};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists (optional - won't fail if missing)
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Error loading .env file: {}", e);
        }
    }

    let config = AppConfig::load()?;
    init_observability(&config.observability)?;

    info!(app_name = APP_NAME, version = VERSION, "Starting credential rotation service");
    log_config_info(&config);

    let pool = create_pool(&config.database).await?;
    let services = build_services(&config, pool)?;

    let job_handle = services.job.clone().spawn(config.rotation.cycle_interval());

    let result = start_api_server(&config.server, services.engine.clone()).await;
    job_handle.abort();

    if let Err(e) = &result {
        error!(error = %e, "Rotation service terminated with error");
    }

    info!("Rotation service shutdown completed");
    result
}
