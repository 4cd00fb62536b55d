use clap::Parser;
use lectern_core::cli::{Cli, Commands, DbCommands};
use lectern_core::config::Config;
use lectern_core::providers::{
    directory::PgTeacherDirectory, meetings::HttpMeetingProvider,
    notify::HttpNotificationDispatcher, payment::HttpPaymentGateway,
};
use lectern_core::services::{
    AvailabilityChecker, BookingService, JobRunner, NotificationOutbox, PayoutService,
    PgAvailabilityStore, SettlementService,
};
use sqlx::migrate::Migrator;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

/// OpenAPI Schema for the Lectern Core API
#[derive(OpenApi)]
#[openapi(
    paths(
        lectern_core::handlers::health,
        lectern_core::handlers::reports::monthly_report,
    ),
    components(
        schemas(
            lectern_core::handlers::HealthStatus,
        )
    ),
    info(
        title = "Lectern Core API",
        version = "0.1.0",
        description = "Appointment lifecycle and financial settlement engine for the tutoring marketplace",
        contact(name = "Lectern Team")
    ),
    tags(
        (name = "Health", description = "Health check endpoints"),
        (name = "Reports", description = "Earnings reporting"),
    )
)]
pub struct ApiDoc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;

    // Setup logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => lectern_core::cli::handle_db_migrate(&config).await,
        Commands::Report {
            year,
            month,
            format,
        } => lectern_core::cli::handle_report(&config, year, month, &format).await,
        Commands::Config => lectern_core::cli::handle_config_validate(&config),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    // Database pool and migrations
    let pool = lectern_core::db::create_pool(&config).await?;
    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("Database migrations completed");

    // External collaborators
    let gateway = Arc::new(HttpPaymentGateway::new(config.gateway_base_url.clone()));
    let meetings = Arc::new(HttpMeetingProvider::new(config.meeting_base_url.clone()));
    let dispatcher = Arc::new(HttpNotificationDispatcher::new(config.notify_base_url.clone()));
    let directory = Arc::new(PgTeacherDirectory::new(pool.clone()));
    let availability = AvailabilityChecker::new(Arc::new(PgAvailabilityStore::new(pool.clone())));

    // Core services
    let outbox = NotificationOutbox::spawn(dispatcher);
    let settlement = SettlementService::new(pool.clone());
    let booking = BookingService::new(
        pool.clone(),
        config.policy.clone(),
        directory.clone(),
        availability,
        gateway,
        meetings,
        settlement.clone(),
        outbox.clone(),
    );
    let payouts = PayoutService::new(pool.clone(), settlement.clone(), directory.clone());

    // Deferred jobs run on their own durable path, independent of requests
    let runner = JobRunner::new(pool.clone(), settlement.clone(), directory, outbox);
    tokio::spawn(runner.run());

    let state = lectern_core::AppState {
        db: pool,
        booking,
        settlement,
        payouts,
        webhook_secret: config.gateway_webhook_secret.clone(),
    };

    let mut app = lectern_core::create_app(state);
    if let Some(cors) = lectern_core::cors_layer(config.cors_allowed_origins.as_deref()) {
        app = app.layer(cors);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;

    Ok(())
}
