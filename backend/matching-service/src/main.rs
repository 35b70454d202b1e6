use actix_web::{middleware, web, App, HttpServer};
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use matching_service::config::Config;
use matching_service::handlers;
use matching_service::logging;
use matching_service::repository::{ExposureTracker, RedisExposureTracker};
use matching_service::services::NotificationBus;
use matching_service::state::{AppState, Repositories, ServiceSettings};

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Stand-in for the notification collaborator: log every committed event
fn spawn_event_forwarder(bus: &NotificationBus) -> tokio::task::JoinHandle<()> {
    let mut rx = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(envelope) => {
                    let audience: Vec<String> = envelope
                        .data
                        .audience()
                        .iter()
                        .map(ToString::to_string)
                        .collect();
                    info!(
                        event_id = %envelope.event_id,
                        event_type = envelope.data.event_type(),
                        audience = ?audience,
                        "matching event"
                    );
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event forwarder lagged, notifications dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init_tracing();

    info!("🔧 Starting matching-service");

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        "✅ Configuration loaded: env={}, http_port={}",
        config.app.env, config.app.http_port
    );

    let pg_pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;

    sqlx::query("SELECT 1")
        .execute(&pg_pool)
        .await
        .context("Failed to verify database connection")?;
    info!("✅ Database pool created and verified");

    sqlx::migrate!("./migrations")
        .run(&pg_pool)
        .await
        .context("Failed to run database migrations")?;
    info!("✅ Database migrations completed");

    let settings = ServiceSettings::from_config(&config)?;
    if settings.internal_api_key.is_none() {
        warn!("INTERNAL_API_KEY not set, internal routes will refuse every request");
    }

    let exposure: Arc<dyn ExposureTracker> = match &config.redis.url {
        Some(url) => {
            let client = redis::Client::open(url.as_str()).context("Failed to create Redis client")?;
            let conn = redis::aio::ConnectionManager::new(client)
                .await
                .context("Failed to connect to Redis")?;
            info!("✅ Redis connection established");
            Arc::new(RedisExposureTracker::new(conn, settings.session_horizon_secs))
        }
        None if config.is_production() => {
            anyhow::bail!("REDIS_URL is required in production");
        }
        None => {
            warn!("REDIS_URL not set, exposure counters are process-local");
            settings.in_memory_exposure()
        }
    };

    let repos = Repositories::postgres(
        pg_pool.clone(),
        config.database.statement_timeout_ms,
        exposure,
    );
    let state = AppState::build(repos, settings);
    let forwarder = spawn_event_forwarder(&state.events);

    let http_addr = format!("{}:{}", config.app.host, config.app.http_port);
    let app_state = web::Data::new(state);
    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(middleware::Logger::default())
            .configure(handlers::configure)
    })
    .bind(&http_addr)
    .context("Failed to bind HTTP server")?
    .run();
    info!("✅ HTTP server listening on {}", http_addr);

    let handle = server.handle();
    tokio::select! {
        result = server => {
            result.context("HTTP server error")?;
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received, draining connections");
            handle.stop(true).await;
        }
    }

    forwarder.abort();
    pg_pool.close().await;
    info!("matching-service stopped");
    Ok(())
}
