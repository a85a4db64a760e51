//! CostWatch CLI
//!
//! Command-line interface for the CostWatch alerting core.

use std::process::ExitCode;
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use uuid::Uuid;

use costwatch::alerting::AlertEngine;
use costwatch::models::{AlertRuleInput, ChannelConfig, RuleKind, RuleStatus};
use costwatch::notify::Dispatcher;
use costwatch::schedule::Scheduler;
use costwatch::store::{
    Database, PgAlertStore, PgCostFeed, PgDigestQueue, PgPreferenceStore, PgRuleStore, RuleStore,
    AlertStore,
};
use costwatch::Config;

/// CostWatch - cost alerting for cloud spend
#[derive(Parser)]
#[command(name = "costwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "COSTWATCH_CONFIG")]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler daemon (evaluation + digest jobs)
    Serve,

    /// Evaluate all active rules once, now
    Evaluate,

    /// Drain all due digest-queue entries, now
    Digest,

    /// Manage alert rules
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },

    /// Show alert history
    History {
        /// Organization filter
        #[arg(long)]
        org: Option<Uuid>,

        /// Time range (e.g., "1h", "24h", "7d")
        #[arg(long, default_value = "24h")]
        last: String,

        /// Maximum number of results
        #[arg(long, default_value = "50")]
        limit: i64,
    },

    /// Database management
    Db {
        #[command(subcommand)]
        command: DbCommands,
    },

    /// Show system health status
    Health,
}

#[derive(Subcommand)]
enum RulesCommands {
    /// List alert rules
    List {
        /// Organization filter
        #[arg(long)]
        org: Option<Uuid>,
    },

    /// Create a new alert rule
    Create {
        /// Owning organization
        #[arg(long)]
        org: Uuid,

        /// Rule name
        #[arg(long)]
        name: String,

        /// Monitored target (connected account)
        #[arg(long)]
        target: Uuid,

        /// Display name of the target
        #[arg(long)]
        target_name: String,

        /// Rule kind (threshold, percentage_spike, budget, anomaly)
        #[arg(long)]
        kind: String,

        /// Absolute threshold amount (threshold, anomaly)
        #[arg(long)]
        threshold_amount: Option<f64>,

        /// Percentage threshold (percentage_spike, budget)
        #[arg(long)]
        threshold_percent: Option<f64>,

        /// Slack webhook URL channel
        #[arg(long)]
        slack_webhook: Option<String>,

        /// Teams webhook URL channel
        #[arg(long)]
        teams_webhook: Option<String>,

        /// Email recipient channel (repeatable)
        #[arg(long)]
        email: Vec<String>,
    },

    /// Delete an alert rule
    Delete {
        /// Rule ID to delete
        rule_id: Uuid,
    },

    /// Pause an alert rule
    Pause {
        /// Rule ID to pause
        rule_id: Uuid,
    },

    /// Resume a paused alert rule
    Resume {
        /// Rule ID to resume
        rule_id: Uuid,
    },
}

#[derive(Subcommand)]
enum DbCommands {
    /// Run database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Serve => run_serve(config).await,
        Commands::Evaluate => run_evaluate(config).await,
        Commands::Digest => run_digest(config).await,
        Commands::Rules { command } => run_rules(config, command).await,
        Commands::History { org, last, limit } => run_history(config, org, &last, limit).await,
        Commands::Db { command } => run_db(config, command).await,
        Commands::Health => run_health(config).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn build_engine(config: &Config) -> anyhow::Result<(Database, Arc<AlertEngine>)> {
    let db = Database::connect(&config.database).await?;

    let dispatcher = Dispatcher::new(&config.delivery, config.email.clone())?;
    let engine = AlertEngine::new(
        Arc::new(PgRuleStore::new(&db)),
        Arc::new(PgPreferenceStore::new(&db)),
        Arc::new(PgAlertStore::new(&db)),
        Arc::new(PgDigestQueue::new(&db)),
        Arc::new(PgCostFeed::new(&db)),
        dispatcher,
        config.delivery.dashboard_base_url.clone(),
    );

    Ok((db, Arc::new(engine)))
}

async fn run_serve(config: Config) -> anyhow::Result<()> {
    let (_db, engine) = build_engine(&config).await?;
    let scheduler = Scheduler::from_config(engine, &config.scheduler)?;

    info!(
        evaluate = config.scheduler.evaluate_cron,
        digest = config.scheduler.digest_cron,
        "starting scheduler"
    );

    tokio::select! {
        result = scheduler.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    Ok(())
}

async fn run_evaluate(config: Config) -> anyhow::Result<()> {
    let (_db, engine) = build_engine(&config).await?;
    let report = engine.run_evaluation().await?;

    println!(
        "Evaluated {} rule(s): {} fired, {} suppressed, {} failed",
        report.evaluated, report.fired, report.suppressed, report.failed
    );
    Ok(())
}

async fn run_digest(config: Config) -> anyhow::Result<()> {
    let (_db, engine) = build_engine(&config).await?;
    let report = engine.run_digest().await?;

    println!(
        "Drained digests for {} organization(s): {} delivered ({} alert(s)), {} failed",
        report.organizations, report.delivered, report.alerts, report.failed
    );
    Ok(())
}

async fn run_rules(config: Config, command: RulesCommands) -> anyhow::Result<()> {
    let db = Database::connect(&config.database).await?;
    let rules = PgRuleStore::new(&db);

    match command {
        RulesCommands::List { org } => {
            for rule in rules.list(org).await? {
                println!(
                    "{}  {:<24} {:<16} {:<8} {}",
                    rule.id,
                    rule.name,
                    rule.kind.as_str(),
                    match rule.status {
                        RuleStatus::Active => "active",
                        RuleStatus::Paused => "paused",
                    },
                    rule.target_name,
                );
            }
        }
        RulesCommands::Create {
            org,
            name,
            target,
            target_name,
            kind,
            threshold_amount,
            threshold_percent,
            slack_webhook,
            teams_webhook,
            email,
        } => {
            let kind = parse_kind(&kind)?;

            let mut channels = Vec::new();
            if let Some(webhook_url) = slack_webhook {
                channels.push(ChannelConfig::Slack { webhook_url });
            }
            if let Some(webhook_url) = teams_webhook {
                channels.push(ChannelConfig::Teams { webhook_url });
            }
            if !email.is_empty() {
                channels.push(ChannelConfig::Email { to: email });
            }

            let rule = rules
                .create(AlertRuleInput {
                    org_id: org,
                    name,
                    target_id: target,
                    target_name,
                    kind,
                    threshold_amount,
                    threshold_percent,
                    channels: Some(channels),
                    status: None,
                })
                .await?;
            println!("Created rule {}", rule.id);
        }
        RulesCommands::Delete { rule_id } => {
            if rules.delete(rule_id).await? {
                println!("Deleted rule {rule_id}");
            } else {
                println!("Rule {rule_id} not found");
            }
        }
        RulesCommands::Pause { rule_id } => {
            if rules.set_status(rule_id, RuleStatus::Paused).await? {
                println!("Paused rule {rule_id}");
            } else {
                println!("Rule {rule_id} not found");
            }
        }
        RulesCommands::Resume { rule_id } => {
            if rules.set_status(rule_id, RuleStatus::Active).await? {
                println!("Resumed rule {rule_id}");
            } else {
                println!("Rule {rule_id} not found");
            }
        }
    }

    Ok(())
}

async fn run_history(
    config: Config,
    org: Option<Uuid>,
    last: &str,
    limit: i64,
) -> anyhow::Result<()> {
    let range = humantime::parse_duration(last)?;
    let since = Utc::now() - chrono::Duration::from_std(range)?;

    let db = Database::connect(&config.database).await?;
    let alerts = PgAlertStore::new(&db);

    for event in alerts.list_recent(org, since, limit).await? {
        println!(
            "{}  [{}] {} observed {:.2} vs {:.2}{}",
            event.triggered_at.format("%Y-%m-%d %H:%M"),
            event.severity.as_str(),
            event.target_name,
            event.observed_value,
            event.reference_value,
            if event.queued_for_digest {
                "  (digested)"
            } else {
                ""
            },
        );
    }

    Ok(())
}

async fn run_db(config: Config, command: DbCommands) -> anyhow::Result<()> {
    let db = Database::connect(&config.database).await?;
    match command {
        DbCommands::Migrate => {
            db.migrate().await?;
            println!("Migrations applied");
        }
    }
    Ok(())
}

async fn run_health(config: Config) -> anyhow::Result<()> {
    let db = Database::connect(&config.database).await?;
    db.health_check().await?;
    println!("Database: ok");
    Ok(())
}

fn parse_kind(kind: &str) -> anyhow::Result<RuleKind> {
    match kind {
        "threshold" => Ok(RuleKind::Threshold),
        "percentage_spike" => Ok(RuleKind::PercentageSpike),
        "budget" => Ok(RuleKind::Budget),
        "anomaly" => Ok(RuleKind::Anomaly),
        other => anyhow::bail!(
            "unknown rule kind {other:?} (expected threshold, percentage_spike, budget, anomaly)"
        ),
    }
}
