use crate::config::Config;
use crate::services::SettlementService;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "lectern-core")]
#[command(about = "Lectern Core - Appointment Lifecycle & Settlement Engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server and job runner (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Print the monthly earnings report
    Report {
        /// Report year
        #[arg(long)]
        year: i32,

        /// Report month (1-12)
        #[arg(long)]
        month: u32,

        /// Output format (json or text)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    use sqlx::migrate::Migrator;
    use std::path::Path;

    let pool = crate::db::create_pool(config).await?;
    let migrator = Migrator::new(Path::new("./migrations")).await?;

    tracing::info!("Running database migrations...");
    migrator.run(&pool).await?;

    tracing::info!("Database migrations completed");
    println!("✓ Database migrations completed");

    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Gateway URL: {}", config.gateway_base_url);
    println!("  Meeting URL: {}", config.meeting_base_url);
    println!("  Notify URL: {}", config.notify_base_url);
    println!(
        "  Bank transfer deadline: {}h (+{}h grace)",
        config.policy.bank_transfer_deadline_hours, config.policy.expire_grace_hours
    );
    println!(
        "  Cancellation cutoff: {}h before lesson",
        config.policy.cancellation_deadline_hours
    );

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

pub async fn handle_report(
    config: &Config,
    year: i32,
    month: u32,
    format: &str,
) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;
    let settlement = SettlementService::new(pool);

    let rows = settlement.monthly_report(year, month).await?;

    match format {
        "json" => {
            let json = serde_json::to_string_pretty(&rows)?;
            println!("{}", json);
        }
        _ => {
            println!("\n=== Teacher Earnings {:04}-{:02} ===", year, month);
            if rows.is_empty() {
                println!("No completed paid lessons in this period");
                return Ok(());
            }
            for row in &rows {
                println!(
                    "  {} | {} lesson(s) | gross {} | fee {} | earning {} | wallet {}",
                    row.teacher_id,
                    row.lesson_count,
                    row.total_gross,
                    row.total_platform_fee,
                    row.total_teacher_earning,
                    row.wallet_balance
                        .as_ref()
                        .map(|b| b.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
        }
    }

    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user_start = slash_pos + 2;
                let user = &url[user_start..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
