use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::LevelFilter;
use sqlx::postgres::PgPoolOptions;

mod app_config;
mod chart;
mod compliance;
mod db;
mod dispatch;
mod history;
mod mailer;
mod models;
mod period;
mod report;

use crate::app_config::AppConfig;
use crate::db::{PgWarehouse, Warehouse};
use crate::dispatch::Dispatcher;
use crate::mailer::{MailTransport, OutboxMailer, SmtpMailer};
use crate::models::EntityKey;
use crate::period::Period;
use crate::report::{ChartEmbed, ReportContext, ReportRenderer};

#[derive(Parser)]
#[command(name = "pendency-report")]
#[command(about = "Document pendency compliance reports per project, provider and contract", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score, render and email the report of every contract in a period
    Send {
        /// Target period (YYYY-MM)
        #[arg(long, env = "REPORT_COMPETENCIA")]
        competencia: Period,
        /// Write messages to this directory instead of delivering them
        #[arg(long)]
        outbox: Option<PathBuf>,
        /// Only send to these contracts
        #[arg(long = "contract")]
        contracts: Vec<String>,
    },
    /// List the contracts of a period with their compliance status
    List {
        #[arg(long, env = "REPORT_COMPETENCIA")]
        competencia: Period,
        #[arg(long)]
        json: bool,
    },
    /// Render one contract's report to an HTML file
    Preview {
        #[arg(long, env = "REPORT_COMPETENCIA")]
        competencia: Period,
        #[arg(long)]
        project: String,
        #[arg(long)]
        provider: String,
        #[arg(long)]
        contract: String,
        #[arg(long, default_value = "preview.html")]
        out: PathBuf,
    },
}

fn init_logging() {
    let mut builder = pretty_env_logger::formatted_builder();
    builder.filter_level(LevelFilter::Info);
    if let Ok(filters) = std::env::var("RUST_LOG") {
        builder.parse_filters(&filters);
    }
    builder.init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let config = AppConfig::load()?;
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to the document warehouse")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to the warehouse")?;
    let warehouse = PgWarehouse::new(pool, &config.table)?;

    let logo = match &config.logo_path {
        Some(path) => Some(
            std::fs::read(path).with_context(|| format!("failed to read logo {}", path.display()))?,
        ),
        None => None,
    };
    let renderer = ReportRenderer::new(config.palette.clone(), logo, config.utc_offset_hours)?;

    match cli.command {
        Commands::Send {
            competencia,
            outbox,
            contracts,
        } => {
            let data = db::load_report_data(&warehouse, competencia).await?;
            let mut groups = dispatch::group_records(&data.current, data.target);
            if !contracts.is_empty() {
                groups.retain(|g| contracts.contains(&g.key.entity.contract));
            }

            if groups.is_empty() {
                println!("No documents found for {competencia}.");
                return Ok(());
            }

            let transport: Box<dyn MailTransport> = match outbox {
                Some(dir) => Box::new(OutboxMailer::new(dir)?),
                None => Box::new(SmtpMailer::new(config.smtp()?)?),
            };

            println!("Sending {} reports for {competencia}...", groups.len());
            let dispatcher = Dispatcher::new(&renderer, transport.as_ref());
            let summary = dispatcher.dispatch(&groups, &data).await;
            println!(
                "Done: {} sent, {} skipped, {} failed.",
                summary.sent, summary.skipped, summary.failed
            );
        }
        Commands::List { competencia, json } => {
            let records = warehouse
                .fetch_period_records(competencia)
                .await
                .with_context(|| format!("failed to fetch records for {competencia}"))?;
            let groups = dispatch::group_records(&records, competencia);
            let summaries = dispatch::contract_summaries(&groups);

            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
                return Ok(());
            }
            if summaries.is_empty() {
                println!("No documents found for {competencia}.");
                return Ok(());
            }

            println!("Contracts for {competencia}:");
            for summary in summaries.iter() {
                println!(
                    "- {} | {} | {}: {} documents, {} pending, {} ({}) -> {}",
                    summary.project,
                    summary.provider,
                    summary.contract,
                    summary.total_documents,
                    summary.total_pendencies,
                    report::format_percent(summary.achieved),
                    summary.label,
                    summary.recipients.trim()
                );
            }
        }
        Commands::Preview {
            competencia,
            project,
            provider,
            contract,
            out,
        } => {
            let key = EntityKey::new(project, provider, contract);
            let data = db::load_report_data(&warehouse, competencia).await?;
            let records: Vec<_> = dispatch::group_records(&data.current, competencia)
                .into_iter()
                .filter(|g| g.key.entity == key)
                .flat_map(|g| g.records)
                .collect();
            let Some(first) = records.first() else {
                anyhow::bail!(
                    "no documents for {} | {} | {} in {competencia}",
                    key.project,
                    key.provider,
                    key.contract
                );
            };

            let recipients = dispatch::parse_recipients(&first.recipients);
            let history = history::reconstruct(&data.aggregates, &key, competencia);
            let rendered = renderer.render(
                &ReportContext {
                    key: &key,
                    period: competencia,
                    records: &records,
                    history: &history,
                    recipients: &recipients,
                    generated_at: renderer.now(),
                },
                ChartEmbed::Inline,
            );
            std::fs::write(&out, rendered.html)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!(
                "Preview written to {} ({}, {}).",
                out.display(),
                report::format_percent(rendered.score.achieved),
                rendered.score.label
            );
        }
    }

    Ok(())
}
