use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use stocksense_core::dataset;
use stocksense_core::model::DemandModel;
use stocksense_core::weather::{WeatherApiClient, WeatherSource};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod inventory;
mod seed;

#[derive(Debug, Parser)]
#[command(name = "stocksense_worker")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Retrain on the full history and persist the model artifact.
    Train {
        /// Dataset to train on. Defaults to DATA_PATH.
        #[arg(long)]
        data_path: Option<PathBuf>,

        /// Build and check the feature matrix without fitting or writing anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Restock/overstock report for the latest record of each product and region.
    Inventory {
        /// Prediction date (YYYY-MM-DD). Defaults to today's local date.
        #[arg(long)]
        as_of_date: Option<String>,

        #[arg(long)]
        data_path: Option<PathBuf>,
    },
    /// Write a deterministic synthetic sales dataset.
    SeedData {
        #[arg(long, default_value_t = 90)]
        rows_per_group: usize,

        /// Output CSV. Defaults to DATA_PATH.
        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = stocksense_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();
    let result = run(args.command, &settings).await;
    if let Err(err) = &result {
        sentry_anyhow::capture_anyhow(err);
        tracing::error!(error = %format!("{err:#}"), "worker run failed");
    }
    result
}

async fn run(command: Command, settings: &stocksense_core::config::Settings) -> anyhow::Result<()> {
    match command {
        Command::Train { data_path, dry_run } => {
            let data_path = data_path.unwrap_or_else(|| settings.data_path.clone());
            let model = Arc::new(DemandModel::from_settings(settings));

            let report = tokio::task::spawn_blocking(move || -> anyhow::Result<serde_json::Value> {
                let records = dataset::load_sales_records(&data_path)?;
                if dry_run {
                    let matrix = model.build_training_matrix(&records)?;
                    tracing::info!(
                        rows = matrix.rows.len(),
                        features = matrix.feature_names.len(),
                        dry_run = true,
                        "feature matrix built; skipping fit"
                    );
                    return Ok(serde_json::json!({
                        "dry_run": true,
                        "rows": matrix.rows.len(),
                        "feature_names": matrix.feature_names,
                    }));
                }
                let report = model.train(&records)?;
                Ok(serde_json::to_value(report)?)
            })
            .await
            .context("training task panicked")??;

            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Inventory {
            as_of_date,
            data_path,
        } => {
            let as_of_date = resolve_as_of_date(as_of_date.as_deref())?;
            let data_path = data_path.unwrap_or_else(|| settings.data_path.clone());
            let records = dataset::load_sales_records(&data_path)?;

            let weather = match WeatherApiClient::from_settings(settings) {
                Ok(client) => Some(client),
                Err(e) => {
                    tracing::debug!(error = %e, "weather lookup disabled");
                    None
                }
            };

            let model = DemandModel::from_settings(settings);
            let status = inventory::run(
                &model,
                &records,
                as_of_date,
                weather.as_ref().map(|c| c as &dyn WeatherSource),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::SeedData {
            rows_per_group,
            output,
            seed,
        } => {
            let output = output.unwrap_or_else(|| settings.data_path.clone());
            let opts = seed::SeedOptions::new(rows_per_group, seed)?;
            let records = seed::generate_sales_dataset(&opts);
            seed::write_dataset(&output, &records)?;
            tracing::info!(path = %output.display(), rows = records.len(), "wrote synthetic dataset");
        }
    }
    Ok(())
}

fn init_sentry(settings: &stocksense_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

fn resolve_as_of_date(as_of_date_arg: Option<&str>) -> anyhow::Result<chrono::NaiveDate> {
    if let Some(s) = as_of_date_arg {
        return chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .with_context(|| format!("invalid --as-of-date: {s}"));
    }
    Ok(chrono::Local::now().date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_explicit_as_of_date() {
        let d = resolve_as_of_date(Some("2024-12-31")).unwrap();
        assert_eq!(d, chrono::NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
        assert!(resolve_as_of_date(Some("31/12/2024")).is_err());
    }

    #[test]
    fn cli_parses_subcommands() {
        let args = Args::try_parse_from(["stocksense_worker", "train", "--dry-run"]).unwrap();
        assert!(matches!(args.command, Command::Train { dry_run: true, .. }));

        let args = Args::try_parse_from([
            "stocksense_worker",
            "seed-data",
            "--rows-per-group",
            "30",
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Command::SeedData { rows_per_group: 30, seed: 42, .. }
        ));
    }
}
