use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use std::net::TcpListener;
use std::time::Duration;
use tokenwarden::reclamation::ReclamationWorker;
use tokenwarden::{auth, health_check, AppError, AppState, Settings};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn cors(config: &Settings) -> Cors {
    if !config.cors.enabled {
        return Cors::default();
    }

    config
        .cors
        .allowed_origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allowed_methods(vec!["GET", "POST"])
        .allowed_headers(vec!["Content-Type"])
        .supports_credentials()
        .max_age(config.cors.max_age as usize)
}

#[actix_web::main]
async fn main() -> tokenwarden::Result<()> {
    // Load environment variables
    dotenv().ok();

    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();

    let config = Settings::new()?;
    info!(
        "Configuration loaded for {} (rotation policy: {:?})",
        config.environment, config.auth.rotation_policy
    );

    let state = AppState::new(config.clone()).await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = ReclamationWorker::new(
        state.registry.clone(),
        Duration::from_secs(config.reclamation.interval_hours * 3600),
        Duration::from_secs(config.reclamation.startup_jitter_secs),
    );
    let worker_handle = tokio::spawn(worker.run(shutdown_rx));

    let listener = TcpListener::bind(format!("{}:{}", config.server.host, config.server.port))?;
    info!("Starting server at {}:{}", config.server.host, config.server.port);

    let data = web::Data::new(state.clone());
    let server_config = config.clone();
    let result = HttpServer::new(move || {
        let registration_enabled = server_config.auth.registration_enabled;
        App::new()
            .wrap(cors(&server_config))
            .app_data(data.clone())
            .route("/health", web::get().to(health_check))
            .configure(|cfg| auth::handlers::configure(cfg, registration_enabled))
    })
    .listen(listener)?
    .workers(config.server.workers as usize)
    .client_request_timeout(Duration::from_secs(config.server.request_timeout_secs))
    .run()
    .await;

    info!("Server stopped, shutting down background tasks");
    let _ = shutdown_tx.send(true);
    if let Err(e) = worker_handle.await {
        error!("Reclamation worker ended abnormally: {}", e);
    }
    state.shutdown().await?;

    result.map_err(|e| AppError::InternalError(e.to_string()))
}
