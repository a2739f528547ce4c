mod ads;
mod auth;
mod config;
mod gemini;
mod http;
mod images;
mod sheet;
mod validator;
mod workflow;

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::ads::AdsClient;
use crate::auth::Credentials;
use crate::config::Settings;
use crate::gemini::GeminiClient;
use crate::http::HttpClient;
use crate::images::{DriveFolder, LocalFolder};
use crate::sheet::{SqliteStore, TableStore};
use crate::validator::GeminiJudge;

#[derive(Parser)]
#[command(
    name = "brand_align",
    about = "Check Google Ads creatives against brand guidelines with Gemini"
)]
struct Cli {
    /// Settings file (default: brand_align.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Sheet store to use instead of the configured db_path
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the sheet store and seed header rows
    Init,
    /// Fetch responsive search ads into the Ads sheet
    LoadAds {
        /// Max ads to fetch (default: ads_limit from settings)
        #[arg(short = 'n', long)]
        limit: Option<u32>,
        /// Restrict to these campaign ids (default: campaign_ids from settings)
        #[arg(short, long = "campaign")]
        campaigns: Vec<String>,
    },
    /// Validate every ad text against every guideline
    Validate {
        /// Gemini model (default: gemini_model from settings)
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Validate every image against every image guideline
    ValidateImages {
        /// Read images from a local directory instead of the Drive folder
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Gemini model (default: gemini_model from settings)
        #[arg(short, long)]
        model: Option<String>,
    },
    /// Inspect or fill sheets
    Sheet {
        #[command(subcommand)]
        command: SheetCommands,
    },
}

#[derive(Subcommand)]
enum SheetCommands {
    /// List sheets with their row counts
    List,
    /// Print the rows of a sheet
    Show {
        name: String,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,
    },
    /// Replace a sheet's body with rows from a JSON array of arrays
    Import { name: String, file: PathBuf },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }
    info!(settings = %settings.redacted(), "Settings loaded");

    let result = match cli.command {
        Commands::Init => {
            let store = SqliteStore::open(&settings.db_path)?;
            println!("Sheets ready in {}:", settings.db_path.display());
            run_sheet_command(&store, SheetCommands::List)
        }
        Commands::LoadAds { limit, campaigns } => {
            let store = SqliteStore::open(&settings.db_path)?;
            let transport = HttpClient::new(Duration::from_secs(settings.http_timeout_secs))?;
            let auth = Credentials::from_settings(settings.access_token.as_deref());
            let client = AdsClient::new(&transport, &auth, &settings);

            let campaigns = if campaigns.is_empty() { settings.campaigns() } else { campaigns };
            let limit = limit.or(settings.limit());
            let customer_id = settings.customer_id();
            let rows =
                workflow::load_ads(&client, &store, &customer_id, &campaigns, limit).await?;
            println!("Wrote {} distinct ad texts to '{}'.", rows, sheet::ADS_SHEET);
            Ok(())
        }
        Commands::Validate { model } => {
            let store = SqliteStore::open(&settings.db_path)?;
            let transport = HttpClient::new(Duration::from_secs(settings.http_timeout_secs))?;
            let auth = Credentials::from_settings(settings.access_token.as_deref());
            let model = model.unwrap_or_else(|| settings.gemini_model.clone());
            let judge = GeminiJudge::new(GeminiClient::new(&transport, &auth, &settings), model);

            let summary = workflow::validate_text_ads(&judge, &store).await?;
            summary.print();
            Ok(())
        }
        Commands::ValidateImages { dir, model } => {
            let store = SqliteStore::open(&settings.db_path)?;
            let transport = HttpClient::new(Duration::from_secs(settings.http_timeout_secs))?;
            let auth = Credentials::from_settings(settings.access_token.as_deref());
            let model = model.unwrap_or_else(|| settings.gemini_model.clone());
            let judge = GeminiJudge::new(GeminiClient::new(&transport, &auth, &settings), model);

            let dir = dir.or_else(|| settings.image_dir.clone());
            let summary = match (dir, &settings.drive_folder_id) {
                (Some(dir), _) => {
                    workflow::validate_images(&judge, &store, &LocalFolder::new(dir)).await?
                }
                (None, Some(folder)) if !folder.trim().is_empty() => {
                    let source = DriveFolder::new(&transport, &auth, folder);
                    workflow::validate_images(&judge, &store, &source).await?
                }
                _ => bail!("No image source: set drive_folder_id or image_dir, or pass --dir"),
            };
            summary.print();
            Ok(())
        }
        Commands::Sheet { command } => {
            let store = SqliteStore::open(&settings.db_path)?;
            run_sheet_command(&store, command)
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn run_sheet_command(store: &SqliteStore, command: SheetCommands) -> anyhow::Result<()> {
    match command {
        SheetCommands::List => {
            let sheets = store.sheets()?;
            for (name, rows) in sheets {
                println!("{:<20} {:>6} rows", name, rows);
            }
        }
        SheetCommands::Show { name, limit } => {
            let rows = store.rows(&name)?;
            if rows.is_empty() {
                println!("Sheet '{}' is empty.", name);
                return Ok(());
            }
            print_rows(&rows, limit);
            println!("\n{} rows in '{}'", rows.len(), name);
        }
        SheetCommands::Import { name, file } => {
            let count = sheet::import_json(store, &name, &file)?;
            println!("Imported {} rows into '{}'.", count, name);
        }
    }
    Ok(())
}

fn print_rows(rows: &[sheet::Row], limit: usize) {
    const MAX_WIDTH: usize = 40;

    let shown = &rows[..rows.len().min(limit)];
    let columns = shown.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|c| {
            shown
                .iter()
                .map(|r| sheet::cell_text(r, c).chars().count())
                .max()
                .unwrap_or(0)
                .clamp(1, MAX_WIDTH + 3)
        })
        .collect();

    for (i, row) in shown.iter().enumerate() {
        let line: Vec<String> = widths
            .iter()
            .enumerate()
            .map(|(c, w)| {
                let text = truncate(&sheet::cell_text(row, c).replace('\n', " "), MAX_WIDTH);
                format!("{:<width$}", text, width = *w)
            })
            .collect();
        println!("{:>3} | {}", i + 1, line.join(" | "));
        if i == 0 {
            println!("{}", "-".repeat(6 + widths.iter().map(|w| w + 3).sum::<usize>()));
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_counts_chars() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("Größenwahn", 3), "Grö...");
    }

    #[test]
    fn durations_read_naturally() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 5s");
        assert_eq!(format_duration(Duration::from_secs(3725)), "1h 2m 5s");
    }

    #[test]
    fn cli_parses_load_ads_overrides() {
        let cli = Cli::try_parse_from([
            "brand_align", "--db", "x.sqlite", "load-ads", "-n", "5", "-c", "11", "-c", "22",
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("x.sqlite")));
        match cli.command {
            Commands::LoadAds { limit, campaigns } => {
                assert_eq!(limit, Some(5));
                assert_eq!(campaigns, vec!["11", "22"]);
            }
            _ => panic!("expected load-ads"),
        }
    }

    #[test]
    fn cli_parses_sheet_import() {
        let cli =
            Cli::try_parse_from(["brand_align", "sheet", "import", "Guidelines", "g.json"])
                .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Sheet {
                command: SheetCommands::Import { ref name, .. }
            } if name == "Guidelines"
        ));
    }
}
