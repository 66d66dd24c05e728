use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::env;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use revisit::config::Config;
use revisit::engine;
use revisit::models::JsonOutput;
use revisit::{
    Clock, ManualClock, MoveReport, ReviewEntry, SqliteStore, Stage, StageSummary, SystemClock,
    Tracker, TrackerError,
};

type CliTracker = Tracker<SqliteStore, Box<dyn Clock>>;

#[derive(Parser)]
#[command(name = "revisit")]
#[command(about = "Spaced-repetition stage tracker for practiced problems")]
#[command(version)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Learner id (defaults to REVISIT_USER, config, then $USER)
    #[arg(long, short, global = true)]
    user: Option<String>,

    /// Sheet group the items belong to
    #[arg(long, short, global = true)]
    sheet: Option<String>,

    /// Database file
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Evaluate as of this RFC 3339 instant instead of the wall clock
    #[arg(long, global = true, value_parser = parse_instant)]
    now: Option<DateTime<Utc>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database
    Init,

    /// Start tracking a solved item (no-op if already tracked)
    Add {
        /// Item id
        item: String,
    },

    /// Mark an item as still remembered for its current stage
    Confirm {
        /// Item id
        item: String,
    },

    /// Clear the confirmation for an item
    Unconfirm {
        /// Item id
        item: String,
    },

    /// Advance every due item in the sheet, or just one
    Move {
        /// Only evaluate this item
        item: Option<String>,
    },

    /// Show all items grouped by stage
    Board,

    /// List items in one stage
    Stage {
        /// today, tomorrow, day3, week1, week2, month1, completed
        stage: String,
    },

    /// Show one item's details and schedule
    Show {
        /// Item id
        item: String,
    },

    /// Stop tracking an item
    Remove {
        /// Item id
        item: String,
    },

    /// Per-sheet stage counts for the user
    Sheets,
}

fn parse_instant(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("expected RFC 3339 timestamp: {}", e))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("REVISIT_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "revisit=debug,info"
        } else {
            "revisit=info,warn"
        })
    });

    let format = env::var("REVISIT_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let json = cli.json;
    if let Err(e) = run(cli) {
        if json {
            let output = match e.downcast_ref::<TrackerError>() {
                Some(err) => JsonOutput::<()>::tracker_err(err),
                None => JsonOutput::<()>::err(format!("{:#}", e)),
            };
            match serde_json::to_string(&output) {
                Ok(line) => println!("{}", line),
                Err(_) => eprintln!("Error: {:#}", e),
            }
        } else {
            eprintln!("Error: {:#}", e);
        }
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db_path = cli.db.clone().unwrap_or_else(|| config.db_path());

    let store = SqliteStore::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    store.init().context("failed to initialize database")?;

    if let Commands::Init = cli.command {
        if cli.json {
            print_json(())?;
        } else {
            println!("Database initialized at: {}", db_path.display());
        }
        return Ok(());
    }

    let clock: Box<dyn Clock> = match cli.now {
        Some(at) => Box::new(ManualClock::new(at)),
        None => Box::new(SystemClock),
    };
    let tracker: CliTracker = Tracker::new(store, clock);

    let user = cli
        .user
        .clone()
        .or_else(|| config.user())
        .context("no user given; pass --user or set REVISIT_USER")?;
    let sheet = cli.sheet.clone().unwrap_or_else(|| config.sheet());

    match cli.command {
        Commands::Init => {}

        Commands::Add { item } => {
            let entry = tracker.add_solved(&user, &sheet, &item)?;
            if cli.json {
                print_json(&entry)?;
            } else {
                println!(
                    "Tracking '{}' in {} (stage {}).",
                    entry.item_id(),
                    entry.key.sheet_group,
                    entry.stage
                );
            }
        }

        Commands::Confirm { item } => {
            let entry = tracker.set_confirmed(&user, &sheet, &item, true)?;
            if cli.json {
                print_json(&entry)?;
            } else {
                println!("Confirmed '{}' at stage {}.", entry.item_id(), entry.stage);
            }
        }

        Commands::Unconfirm { item } => {
            let entry = tracker.set_confirmed(&user, &sheet, &item, false)?;
            if cli.json {
                print_json(&entry)?;
            } else {
                println!("Cleared confirmation for '{}'.", entry.item_id());
            }
        }

        Commands::Move { item: Some(item) } => {
            let movement = tracker.move_item(&user, &sheet, &item)?;
            if cli.json {
                print_json(&movement)?;
            } else if let Some(m) = movement {
                println!("'{}' moved {} -> {} ({}).", m.item_id, m.from, m.to, m.reason.as_str());
            } else {
                println!("'{}' is not due to move yet.", item);
            }
        }

        Commands::Move { item: None } => {
            let report = tracker.auto_move_stages(&user, &sheet)?;
            if cli.json {
                print_json(&report)?;
            } else {
                print_report(&report);
            }
        }

        Commands::Board => {
            let board = tracker.get_all(&user, &sheet)?;
            if cli.json {
                print_json(&board)?;
            } else if board.summary.total() == 0 {
                println!("No items tracked in {}.", sheet);
            } else {
                for stage in Stage::ALL {
                    let entries = board.entries(stage);
                    if entries.is_empty() {
                        continue;
                    }
                    println!("== {} ({}) ==", stage, entries.len());
                    print_entries(entries);
                    println!();
                }
                print_summary(&board.summary);
            }
        }

        Commands::Stage { stage } => {
            let stage = Stage::parse(&stage)?;
            let listing = tracker.get_stage(&user, &sheet, stage)?;
            if cli.json {
                print_json(&listing)?;
            } else if listing.entries.is_empty() {
                println!("No items in {}.", stage);
            } else {
                print_entries(&listing.entries);
                println!();
                println!("{} item(s) in {}.", listing.count, stage);
            }
        }

        Commands::Show { item } => {
            let entry = tracker.get_entry(&user, &sheet, &item)?;
            let eligible = engine::eligible_at(&entry);
            let forced = engine::forced_at(&entry);
            if cli.json {
                print_json(serde_json::json!({
                    "entry": entry,
                    "eligible_at": eligible,
                    "forced_at": forced,
                }))?;
            } else {
                println!("Item: {}", entry.item_id());
                println!("Sheet: {}", entry.key.sheet_group);
                println!("Stage: {}", entry.stage);
                println!("Confirmed: {}", if entry.confirmed { "yes" } else { "no" });
                println!("In stage since: {}", format_when(&entry.stage_entered_at));
                println!("Reviews: {}", entry.review_count);
                println!("Tracked since: {}", format_when(&entry.created_at));
                if let Some(at) = eligible {
                    println!();
                    println!("--- Schedule ---");
                    println!("Eligible to advance: {}", format_when(&at));
                    if let Some(at) = forced {
                        println!("Advances without confirmation: {}", format_when(&at));
                    }
                }
            }
        }

        Commands::Remove { item } => {
            tracker.remove(&user, &sheet, &item)?;
            if cli.json {
                print_json(())?;
            } else {
                println!("Stopped tracking '{}'.", item);
            }
        }

        Commands::Sheets => {
            let sheets = tracker.sheets(&user)?;
            if cli.json {
                print_json(&sheets)?;
            } else if sheets.is_empty() {
                println!("No sheets found for {}.", user);
            } else {
                println!("{:<30} {:>6} {:>10}", "SHEET", "ITEMS", "COMPLETED");
                println!("{}", "-".repeat(48));
                for s in sheets {
                    println!(
                        "{:<30} {:>6} {:>10}",
                        truncate(&s.sheet_group, 28),
                        s.total,
                        s.summary.count(Stage::Completed)
                    );
                }
            }
        }
    }

    Ok(())
}

fn print_json<T: Serialize>(data: T) -> Result<()> {
    println!("{}", serde_json::to_string(&JsonOutput::ok(data))?);
    Ok(())
}

fn print_entries(entries: &[ReviewEntry]) {
    println!("{:<24} {:<10} {:<17} ELIGIBLE", "ITEM", "CONFIRMED", "SINCE");
    for e in entries {
        let eligible = engine::eligible_at(e)
            .map(|at| format_when(&at))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<24} {:<10} {:<17} {}",
            truncate(e.item_id(), 22),
            if e.confirmed { "yes" } else { "no" },
            format_when(&e.stage_entered_at),
            eligible
        );
    }
}

fn print_report(report: &MoveReport) {
    if report.movements.is_empty() {
        println!("Nothing due to move.");
    } else {
        println!("{:<24} {:<10} {:<10} REASON", "ITEM", "FROM", "TO");
        println!("{}", "-".repeat(56));
        for m in &report.movements {
            println!(
                "{:<24} {:<10} {:<10} {}",
                truncate(&m.item_id, 22),
                m.from.label(),
                m.to.label(),
                m.reason.as_str()
            );
        }
    }

    for f in &report.failures {
        eprintln!("Failed to move '{}': {} ({})", f.item_id, f.error, f.code);
    }

    println!();
    print_summary(&report.summary);
}

fn print_summary(summary: &StageSummary) {
    let parts: Vec<String> = summary
        .iter()
        .map(|(stage, count)| format!("{} {}", stage, count))
        .collect();
    println!("{} | total {}", parts.join(", "), summary.total());
}

fn format_when(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
