use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dbpanel::shared::ObservabilitySystem;
use dbpanel::{AdminPanel, PanelConfig, ResultSink, Role, SqlValue};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "dbpanel", version, about = "Role-gated database admin panel")]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "DBPANEL_CONFIG", default_value = "dbpanel.toml")]
    config: PathBuf,

    /// Database role to connect as
    #[arg(short, long, env = "DBPANEL_ROLE", default_value = "admin")]
    role: Role,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List tables with the write actions available on each
    Tables,
    /// List views
    Views,
    /// List report targets and their filters
    Reports,
    /// Show the options of every filter of a report
    Filters { target: String },
    /// Run a report; selections are given as key=value
    Report {
        target: String,
        #[arg(short, long = "filter", value_parser = parse_selection)]
        filters: Vec<(String, String)>,
    },
    /// First rows of a table
    Show { table: String },
    /// Row count of a table
    Count { table: String },
}

fn parse_selection(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))
}

/// Writes result sets to the log, one JSON object per row.
struct LogSink;

impl ResultSink for LogSink {
    fn display(&mut self, target_key: &str, columns: &[String], rows: &[Vec<SqlValue>]) {
        info!("{}: {} row(s) [{}]", target_key, rows.len(), columns.join(", "));
        for row in rows {
            let object: serde_json::Map<String, serde_json::Value> = columns
                .iter()
                .cloned()
                .zip(row.iter().map(|v| serde_json::to_value(v).unwrap_or_default()))
                .collect();
            info!("{}", serde_json::Value::Object(object));
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = PanelConfig::load_from_file(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    ObservabilitySystem::init(&config.observability)?;

    let mut panel = AdminPanel::connect(&config, cli.role).await?;
    let mut sink = LogSink;

    match cli.command {
        Command::Tables => {
            for table in panel.user_tables().await? {
                let actions = panel.table_actions(&table).await;
                info!(
                    "{table}: insert={} update={} delete={}",
                    actions.insert, actions.update, actions.delete
                );
            }
        }
        Command::Views => {
            for view in panel.views().await? {
                info!("{view}");
            }
        }
        Command::Reports => {
            for report in panel.catalog().reports() {
                let keys: Vec<&str> = report.filters.iter().map(|f| f.key.as_str()).collect();
                info!("{} ({:?}): {}", report.name, report.kind, keys.join(", "));
            }
        }
        Command::Filters { target } => {
            let resolved = panel.report_filters(&target).await?;
            for filter in resolved.iter() {
                info!("{}: {}", filter.decl.key, filter.option.options.join(" | "));
            }
        }
        Command::Report { target, filters } => {
            let resolved = panel.report_filters(&target).await?;
            let n = panel.run_report(&resolved, &filters, &mut sink).await?;
            info!("{target}: {n} row(s)");
        }
        Command::Show { table } => {
            panel.show_all(&table, &mut sink).await?;
        }
        Command::Count { table } => {
            let count = panel.count_rows(&table, &mut sink).await?;
            info!("{table}: {count}");
        }
    }

    panel.into_session().close().await?;
    Ok(())
}
