use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use ulid::Ulid;

use sessiondesk::config::Config;
use sessiondesk::draft::{BookingDraft, CancellationNote};
use sessiondesk::engine::{attempt_commit_booking, attempt_reschedule, today_local, Engine};
use sessiondesk::model::{parse_clock, BlockedRange, ReservationStatus, Span};
use sessiondesk::notify::NotifyHub;

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Student-advisor session booking: availability and reservations.
///
/// State lives in `$SESSIONDESK_DATA_DIR`; the booking policy is read from
/// `$SESSIONDESK_POLICY` when set.
#[derive(Parser)]
#[command(name = "sessiondesk", version, about)]
struct Cli {
    /// Reference date for eligibility (defaults to the local calendar date)
    #[arg(long, global = true)]
    today: Option<NaiveDate>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List dates that still have a free slot
    Dates {
        #[arg(long)]
        advisor: String,
    },
    /// List free slots on a date
    Slots {
        #[arg(long)]
        advisor: String,
        #[arg(long)]
        date: NaiveDate,
    },
    /// Book a slot; the draft is read from a JSON file
    Book {
        #[arg(long)]
        advisor: String,
        #[arg(long)]
        date: NaiveDate,
        /// Slot label, e.g. 08:00-09:00
        #[arg(long)]
        slot: String,
        #[arg(long)]
        draft: PathBuf,
    },
    /// Change a reservation's status
    Status {
        #[arg(long)]
        id: Ulid,
        /// Pending, Confirmed, Completed, ToComplete, Cancelled or NoShow
        #[arg(long)]
        status: ReservationStatus,
        /// Cancellation reason; required with --status Cancelled
        #[arg(long)]
        reason: Option<String>,
        /// Free text when the reason is "Other"
        #[arg(long, requires = "reason")]
        other_reason: Option<String>,
    },
    /// Move a live reservation to another date and slot
    Reschedule {
        #[arg(long)]
        id: Ulid,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        slot: String,
    },
    /// Block part of an advisor's day
    Block {
        #[arg(long)]
        advisor: String,
        #[arg(long)]
        date: NaiveDate,
        /// HH:MM
        #[arg(long, value_parser = clock_arg)]
        start: NaiveTime,
        /// HH:MM
        #[arg(long, value_parser = clock_arg)]
        end: NaiveTime,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        details: Option<String>,
    },
    /// Remove a blocked range
    Unblock {
        #[arg(long)]
        id: Ulid,
    },
    /// Look a session up by its reference code
    Track {
        #[arg(long)]
        reference: String,
    },
    /// Print an advisor's reservations, or blocked ranges with --blocked
    List {
        #[arg(long)]
        advisor: Option<String>,
        #[arg(long)]
        blocked: bool,
    },
    /// Rewrite the journal from current state
    Compact,
}

fn clock_arg(s: &str) -> Result<NaiveTime, String> {
    parse_clock(s).ok_or_else(|| format!("expected HH:MM, got {s:?}"))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult {
    let config = Config::from_env();
    sessiondesk::observability::init(config.metrics_port)?;
    let policy = config.load_policy()?;

    std::fs::create_dir_all(&config.data_dir)?;
    let engine = Engine::new(config.journal_path(), Arc::new(NotifyHub::new()))?;
    let today = cli.today.unwrap_or_else(today_local);

    let mutated = matches!(
        cli.command,
        Commands::Book { .. }
            | Commands::Status { .. }
            | Commands::Reschedule { .. }
            | Commands::Block { .. }
            | Commands::Unblock { .. }
    );

    match cli.command {
        Commands::Dates { advisor } => {
            print_json(&engine.bookable_dates(&advisor, &policy, today).await)?;
        }
        Commands::Slots { advisor, date } => {
            print_json(&engine.bookable_slots(&advisor, date, &policy, today).await)?;
        }
        Commands::Book {
            advisor,
            date,
            slot,
            draft,
        } => {
            let text = std::fs::read_to_string(&draft)?;
            let draft: BookingDraft = serde_json::from_str(&text)?;
            let booked =
                attempt_commit_booking(&engine, &policy, &advisor, date, &slot, &draft, today).await?;
            print_json(&booked)?;
        }
        Commands::Status {
            id,
            status,
            reason,
            other_reason,
        } => {
            let note = reason.map(|reason| CancellationNote {
                reason,
                other_reason,
            });
            print_json(&engine.set_status(id, status, note).await?)?;
        }
        Commands::Reschedule { id, date, slot } => {
            let moved = attempt_reschedule(&engine, &policy, id, date, &slot, today).await?;
            print_json(&moved)?;
        }
        Commands::Block {
            advisor,
            date,
            start,
            end,
            reason,
            details,
        } => {
            if start >= end {
                return Err("blocked range must end after it starts".into());
            }
            let range = BlockedRange {
                id: Ulid::new(),
                advisor_id: advisor,
                date,
                span: Span::new(start, end),
                reason,
                details,
            };
            engine.block_range(range.clone()).await?;
            print_json(&range)?;
        }
        Commands::Unblock { id } => {
            print_json(&engine.unblock_range(id).await?)?;
        }
        Commands::Track { reference } => match engine.find_by_reference(&reference).await {
            Some(r) => print_json(&r)?,
            None => return Err(format!("no session with reference {reference}").into()),
        },
        Commands::List { advisor, blocked } => match advisor {
            None => print_json(&engine.advisor_ids())?,
            Some(advisor) if blocked => print_json(&engine.blocked_for(&advisor).await)?,
            Some(advisor) => print_json(&engine.reservations_for(&advisor).await)?,
        },
        Commands::Compact => {
            let records = engine.compact_journal().await?;
            print_json(&serde_json::json!({ "records": records }))?;
        }
    }

    if mutated {
        let stale = engine.stale_journal_records().await;
        if stale >= config.compact_threshold {
            info!(stale, threshold = config.compact_threshold, "compacting journal");
            engine.compact_journal().await?;
        }
    }
    Ok(())
}
