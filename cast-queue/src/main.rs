//! cast-queue - Manage scheduled publications
//!
//! Operator tool over the publication queue: schedule, inspect, cancel and
//! reschedule publications, and read engagement numbers once they land.

use clap::{Parser, Subcommand, ValueEnum};
use libcrosscast::db::PublicationFilter;
use libcrosscast::logging::LoggingConfig;
use libcrosscast::scheduling::parse_schedule_time;
use libcrosscast::{
    Config, Content, ContentUnit, CrosscastError, Database, PublicationStatus, Result, Runtime,
    ScheduleReceipt, ScheduleRequest, ScheduledPublication, Secrets, SocialPlatform,
};
use std::io::{IsTerminal, Read};
use std::path::PathBuf;

/// Line that separates thread units in thread input
const THREAD_SEPARATOR: &str = "---";

#[derive(Parser, Debug)]
#[command(name = "cast-queue")]
#[command(version)]
#[command(about = "Manage scheduled publications")]
#[command(long_about = "\
cast-queue - Manage scheduled publications

DESCRIPTION:
    cast-queue schedules content for a connected Twitter or LinkedIn account
    and manages the resulting queue. Scheduled publications are handed to
    the delayed delivery service and published by cast-serve when due.

COMMANDS:
    schedule    Schedule content for a connected account
    list        List publications
    show        Show one publication
    cancel      Cancel a scheduled publication
    reschedule  Move a scheduled publication to another time
    stats       Show queue statistics
    metrics     Fetch engagement numbers for a posted publication

USAGE EXAMPLES:
    # Schedule a post for tomorrow morning
    cast-queue schedule --account <ACCOUNT_ID> --at \"tomorrow 9am\" \"Hello!\"

    # Schedule a thread read from a file, units separated by '---' lines
    cast-queue schedule --account <ACCOUNT_ID> --at 2h --thread --file thread.txt

    # Content from stdin
    echo \"Hello\" | cast-queue schedule --account <ACCOUNT_ID> --at 30m

    # Failed publications as JSON
    cast-queue list --status failed --format json

    # Move a publication
    cast-queue reschedule <SCHEDULE_ID> \"+1h\"

TIME FORMATS:
    now, 30m, 2h 15m, 1d        Relative to now
    2026-03-05T08:30:00Z        RFC 3339
    @1772699400                 Unix seconds
    \"tomorrow 3pm\"              Natural language

CONFIGURATION:
    Configuration file: ~/.config/crosscast/config.toml

    Override with environment variables:
        CROSSCAST_CONFIG          - Path to config file
        CROSSCAST_DB_PATH         - Path to database file
        CROSSCAST_ENCRYPTION_KEY  - Token encryption key
        CROSSCAST_QUEUE_TOKEN     - Delayed queue API token

EXIT CODES:
    0 - Success
    1 - Operation failed (queue or platform unavailable)
    2 - Database, configuration or credential error
    3 - Invalid input (unknown id, bad time, content too long)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Schedule content for a connected account
    Schedule {
        /// Connected account to publish from
        #[arg(short, long)]
        account: String,

        /// When to publish (e.g. "30m", "tomorrow 9am", RFC 3339)
        #[arg(long)]
        at: String,

        /// Expected platform of the account; rejected on mismatch
        #[arg(short, long)]
        platform: Option<String>,

        /// Treat the input as a thread, units separated by '---' lines
        #[arg(long)]
        thread: bool,

        /// Read content from a file instead of the argument or stdin
        #[arg(long, value_name = "PATH", conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Use this id instead of a generated one
        #[arg(long)]
        id: Option<String>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,

        /// Content to publish (reads from stdin if not provided)
        text: Option<String>,
    },

    /// List publications, soonest first
    List {
        /// scheduled, posting, posted, failed or cancelled
        #[arg(short, long)]
        status: Option<String>,

        #[arg(short, long)]
        platform: Option<String>,

        #[arg(short, long)]
        account: Option<String>,

        #[arg(short, long)]
        limit: Option<usize>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Show one publication
    Show {
        schedule_id: String,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Cancel a scheduled publication
    Cancel { schedule_id: String },

    /// Move a scheduled publication to another time
    Reschedule {
        schedule_id: String,

        /// New time (e.g. "+2h", "tomorrow 3pm")
        time: String,
    },

    /// Show queue statistics
    Stats {
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Fetch engagement numbers for a posted publication
    Metrics {
        schedule_id: String,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    LoggingConfig::from_env("error", cli.verbose).init();

    if let Err(e) = run(cli).await {
        tracing::debug!(error = ?e, exit_code = e.exit_code(), "Command failed");
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load_or_default(cli.config.as_deref())?;
    tracing::debug!(database = %config.database.path, "Configuration loaded");

    match cli.command {
        Commands::List {
            status,
            platform,
            account,
            limit,
            format,
        } => {
            let filter = PublicationFilter {
                status: status.as_deref().map(str::parse).transpose()?,
                platform: platform.as_deref().map(str::parse).transpose()?,
                account_id: account,
                limit,
            };
            let db = Database::new(&config.database.path).await?;
            cmd_list(&db, &filter, format).await
        }
        Commands::Show {
            schedule_id,
            format,
        } => {
            let db = Database::new(&config.database.path).await?;
            let publication = db
                .get_publication(&schedule_id)
                .await?
                .ok_or_else(|| CrosscastError::NotFound(format!("publication {}", schedule_id)))?;
            print_publication(&publication, format);
            Ok(())
        }
        Commands::Stats { format } => {
            let db = Database::new(&config.database.path).await?;
            cmd_stats(&db, format).await
        }
        Commands::Schedule {
            account,
            at,
            platform,
            thread,
            file,
            id,
            format,
            text,
        } => {
            let now = chrono::Utc::now();
            let scheduled_at = parse_schedule_time(&at, now)?;
            let raw = read_input(text, file.as_deref())?;
            let request = ScheduleRequest {
                schedule_id: id,
                platform: platform.as_deref().map(str::parse::<SocialPlatform>).transpose()?,
                account_id: account,
                content: build_content(&raw, thread),
                scheduled_at: scheduled_at.timestamp(),
            };

            let runtime = Runtime::from_config(&config, &Secrets::from_env()).await?;
            let receipt = runtime.dispatcher.schedule_publication(request).await?;
            tracing::info!(
                schedule_id = %receipt.schedule_id,
                job_id = %receipt.job_id,
                "Publication scheduled"
            );
            print_receipt(&receipt, format);
            Ok(())
        }
        Commands::Cancel { schedule_id } => {
            let runtime = Runtime::from_config(&config, &Secrets::from_env()).await?;
            runtime.dispatcher.cancel_publication(&schedule_id).await?;
            println!("{}", schedule_id);
            Ok(())
        }
        Commands::Reschedule { schedule_id, time } => {
            let scheduled_at = parse_schedule_time(&time, chrono::Utc::now())?;
            let runtime = Runtime::from_config(&config, &Secrets::from_env()).await?;
            let receipt = runtime
                .dispatcher
                .reschedule_publication(&schedule_id, scheduled_at.timestamp())
                .await?;
            print_receipt(&receipt, OutputFormat::Text);
            Ok(())
        }
        Commands::Metrics {
            schedule_id,
            format,
        } => {
            let runtime = Runtime::from_config(&config, &Secrets::from_env()).await?;
            let metrics = runtime.dispatcher.fetch_metrics(&schedule_id).await?;
            match format {
                OutputFormat::Json => println!("{}", to_json(&metrics)?),
                OutputFormat::Text => {
                    for m in &metrics {
                        let impressions = m
                            .impressions
                            .map(|n| n.to_string())
                            .unwrap_or_else(|| "-".to_string());
                        println!(
                            "{} | likes {} | replies {} | reposts {} | impressions {}",
                            m.post_id, m.likes, m.replies, m.reposts, impressions
                        );
                    }
                }
            }
            Ok(())
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value)
        .map_err(|e| CrosscastError::InvalidInput(format!("Failed to render JSON: {}", e)))
}

fn read_input(text: Option<String>, file: Option<&std::path::Path>) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    if let Some(path) = file {
        return std::fs::read_to_string(path).map_err(|e| {
            CrosscastError::InvalidInput(format!("Failed to read {}: {}", path.display(), e))
        });
    }

    let stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Err(CrosscastError::InvalidInput(
            "No content given. Pass it as an argument, with --file, or on stdin".to_string(),
        ));
    }
    let mut buffer = String::new();
    stdin
        .lock()
        .read_to_string(&mut buffer)
        .map_err(|e| CrosscastError::InvalidInput(format!("Failed to read stdin: {}", e)))?;
    Ok(buffer)
}

/// Single content is the trimmed input. Thread input is split on lines
/// holding only `---`; blank units are dropped.
fn build_content(raw: &str, thread: bool) -> Content {
    if !thread {
        return Content::Single(ContentUnit::text(raw.trim()));
    }

    let mut units = Vec::new();
    let mut current = Vec::new();
    for line in raw.lines() {
        if line.trim() == THREAD_SEPARATOR {
            units.push(current.join("\n"));
            current.clear();
        } else {
            current.push(line);
        }
    }
    units.push(current.join("\n"));

    Content::Thread(
        units
            .iter()
            .map(|u| u.trim())
            .filter(|u| !u.is_empty())
            .map(ContentUnit::text)
            .collect(),
    )
}

async fn cmd_list(db: &Database, filter: &PublicationFilter, format: OutputFormat) -> Result<()> {
    let publications = db.list_publications(filter).await?;

    match format {
        OutputFormat::Json => {
            let rows: Vec<serde_json::Value> = publications.iter().map(publication_json).collect();
            println!("{}", to_json(&rows)?);
        }
        OutputFormat::Text => {
            let now = chrono::Utc::now().timestamp();
            for p in &publications {
                let first = p.content.units().first().map(|u| u.text.as_str()).unwrap_or("");
                println!(
                    "{} | {} | {} | {} | {}",
                    p.id,
                    p.platform,
                    p.status,
                    truncate_content(first, 50),
                    describe_time(p, now)
                );
            }
        }
    }
    Ok(())
}

async fn cmd_stats(db: &Database, format: OutputFormat) -> Result<()> {
    let stats = db.publication_stats().await?;

    match format {
        OutputFormat::Json => println!("{}", to_json(&stats)?),
        OutputFormat::Text => {
            println!("Scheduled: {}", stats.scheduled);
            println!("Posting:   {}", stats.posting);
            println!("Posted:    {}", stats.posted);
            println!("Failed:    {}", stats.failed);
            println!("Cancelled: {}", stats.cancelled);
            if let Some(next) = stats.next_due {
                println!(
                    "Next due:  {}",
                    format_time_until(chrono::Utc::now().timestamp(), next)
                );
            }
        }
    }
    Ok(())
}

fn publication_json(p: &ScheduledPublication) -> serde_json::Value {
    serde_json::json!({
        "id": p.id,
        "account_id": p.account_id,
        "platform": p.platform,
        "status": p.status,
        "content_type": p.content.content_type(),
        "content": p.content.to_data(),
        "scheduled_at": p.scheduled_at,
        "retry_count": p.retry_count,
        "max_retries": p.max_retries,
        "last_error": p.last_error,
        "platform_post_id": p.platform_post_id,
        "platform_post_url": p.platform_post_url,
        "published_unit_ids": p.published_unit_ids,
        "job_id": p.job_id,
        "posted_at": p.posted_at,
    })
}

fn print_publication(p: &ScheduledPublication, format: OutputFormat) {
    if format == OutputFormat::Json {
        println!("{}", publication_json(p));
        return;
    }

    println!("ID:        {}", p.id);
    println!("Account:   {} ({})", p.account_id, p.platform);
    println!("Status:    {}", p.status);
    println!("Scheduled: {}", format_timestamp(p.scheduled_at));
    println!("Attempts:  {}/{}", p.retry_count, p.max_retries);
    if let Some(url) = &p.platform_post_url {
        println!("URL:       {}", url);
    }
    if let Some(error) = &p.last_error {
        println!("Error:     {}", error);
    }
    if !p.published_unit_ids.is_empty() && p.status != PublicationStatus::Posted {
        println!("Partial:   {}", p.published_unit_ids.join(", "));
    }
    for (i, unit) in p.content.units().iter().enumerate() {
        println!("[{}] {}", i + 1, unit.text);
    }
}

fn print_receipt(receipt: &ScheduleReceipt, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::json!({
                "schedule_id": receipt.schedule_id,
                "job_id": receipt.job_id,
                "scheduled_at": receipt.scheduled_at,
            })
        ),
        OutputFormat::Text => println!(
            "{} scheduled for {}",
            receipt.schedule_id,
            format_timestamp(receipt.scheduled_at)
        ),
    }
}

fn describe_time(p: &ScheduledPublication, now: i64) -> String {
    match p.status {
        PublicationStatus::Scheduled => format_time_until(now, p.scheduled_at),
        PublicationStatus::Posted => p
            .posted_at
            .map(format_timestamp)
            .unwrap_or_else(|| "posted".to_string()),
        _ => format_timestamp(p.scheduled_at),
    }
}

fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Truncate on a character boundary with an ellipsis
fn truncate_content(content: &str, max_chars: usize) -> String {
    let single_line = content.replace('\n', " ");
    if single_line.chars().count() <= max_chars {
        single_line
    } else {
        let head: String = single_line.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

fn format_time_until(now: i64, scheduled_at: i64) -> String {
    let diff = scheduled_at - now;
    if diff < 0 {
        return "overdue".to_string();
    }

    let minutes = diff / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("in {} day{}", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("in {} hour{}", hours, if hours == 1 { "" } else { "s" })
    } else if minutes > 0 {
        format!("in {} minute{}", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        "in <1 minute".to_string()
    }
}
