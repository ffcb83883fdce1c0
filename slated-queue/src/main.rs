//! slated-queue - Manage the scheduled-post queue
//!
//! Unix-style tool for queueing, listing, and cancelling scheduled posts.

use clap::{Parser, Subcommand};
use libslated::service::ItemService;
use libslated::{Config, Database, Platform, PostContent, Result, ScheduledItem, SlatedError};

#[derive(Parser, Debug)]
#[command(name = "slated-queue")]
#[command(version)]
#[command(about = "Manage the scheduled-post queue")]
#[command(long_about = "\
slated-queue - Manage the scheduled-post queue

DESCRIPTION:
    slated-queue is a Unix-style tool for the Slated queue. Use it to
    schedule posts and threads, list a user's queue, cancel queued items,
    or view queue statistics. Publication itself is handled by the
    slated-send daemon.

COMMANDS:
    post        Schedule a post or thread
    list        List a user's scheduled items
    cancel      Cancel a queued item
    stats       Show queue statistics

USAGE EXAMPLES:
    # Schedule a post for tomorrow afternoon
    slated-queue post user_123 \"Release day!\" --platform x --at \"tomorrow 3pm\"

    # Schedule a thread (each argument is one segment)
    slated-queue post user_123 \"Part one\" \"Part two\" --platform threads --at 2h

    # List a user's queue in JSON
    slated-queue list user_123 --format json

    # Cancel a queued item
    slated-queue cancel user_123 <ITEM_ID>

    # View queue statistics
    slated-queue stats

CONFIGURATION:
    Configuration file: ~/.config/slated/config.toml

    Override with environment variables:
        SLATED_CONFIG - Path to config file

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Authentication error
    3 - Invalid input (bad item ID, time format, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Schedule a post or thread
    Post {
        /// Owning user ID
        user_id: String,

        /// Post text; multiple arguments become a thread
        #[arg(required = true)]
        text: Vec<String>,

        /// Target platform: x or threads
        #[arg(short, long)]
        platform: String,

        /// When to publish (e.g., "tomorrow 3pm", "2h"); defaults to now
        #[arg(long, value_name = "TIME")]
        at: Option<String>,
    },

    /// List a user's scheduled items
    List {
        /// Owning user ID
        user_id: String,

        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Maximum number of items to show
        #[arg(short, long)]
        limit: Option<i64>,
    },

    /// Cancel a queued item
    Cancel {
        /// Owning user ID
        user_id: String,

        /// Item ID to cancel
        item_id: String,
    },

    /// Show queue statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("error")
            .with_writer(std::io::stderr)
            .init();
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;
    let items = ItemService::new(db);

    match cli.command {
        Commands::Post {
            user_id,
            text,
            platform,
            at,
        } => {
            cmd_post(&items, &user_id, text, &platform, at.as_deref()).await?;
        }
        Commands::List {
            user_id,
            format,
            limit,
        } => {
            cmd_list(&items, &user_id, &format, limit).await?;
        }
        Commands::Cancel { user_id, item_id } => {
            cmd_cancel(&items, &user_id, &item_id).await?;
        }
        Commands::Stats { format } => {
            cmd_stats(&items, &format).await?;
        }
    }

    Ok(())
}

/// Schedule a post or thread
async fn cmd_post(
    items: &ItemService,
    user_id: &str,
    text: Vec<String>,
    platform: &str,
    at: Option<&str>,
) -> Result<()> {
    let platform: Platform = platform.parse()?;

    let content = if text.len() == 1 {
        PostContent::single(text.into_iter().next().unwrap_or_default())?
    } else {
        PostContent::thread(text)?
    };

    let scheduled_at = match at {
        Some(time) => libslated::scheduling::parse_schedule(time)?.timestamp(),
        None => chrono::Utc::now().timestamp(),
    };

    let item = items.schedule(user_id, platform, content, scheduled_at).await?;
    println!("{}", item.id);
    Ok(())
}

/// List scheduled items
async fn cmd_list(
    items: &ItemService,
    user_id: &str,
    format: &str,
    limit: Option<i64>,
) -> Result<()> {
    validate_format(format)?;
    let listed = items.list(user_id, limit).await?;

    if format == "json" {
        output_list_json(&listed)?;
    } else {
        output_list_text(&listed);
    }

    Ok(())
}

fn validate_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(SlatedError::Validation(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

/// Output items as JSON
fn output_list_json(items: &[ScheduledItem]) -> Result<()> {
    let json: Vec<serde_json::Value> = items
        .iter()
        .map(|item| {
            serde_json::json!({
                "id": item.id,
                "platform": item.platform,
                "content": item.content,
                "scheduled_at": item.scheduled_at,
                "status": item.status.as_str(),
                "posted_ref": item.posted_ref,
                "error_message": item.error_message,
            })
        })
        .collect();

    let rendered = serde_json::to_string_pretty(&json)
        .map_err(|e| SlatedError::Validation(format!("JSON encode failed: {}", e)))?;
    println!("{}", rendered);
    Ok(())
}

/// Output items as human-readable text
fn output_list_text(items: &[ScheduledItem]) {
    if items.is_empty() {
        return;
    }

    let now = chrono::Utc::now().timestamp();

    for item in items {
        let preview = truncate_content(item.content.preview(), 50);
        println!(
            "{} | {} | {} | {} | {}",
            item.id,
            item.platform,
            item.status,
            preview,
            format_time_until(now, item.scheduled_at)
        );
    }
}

/// Truncate content to max length with ellipsis
fn truncate_content(content: &str, max_len: usize) -> String {
    if content.len() <= max_len {
        content.to_string()
    } else {
        let cut = content
            .char_indices()
            .take_while(|(i, _)| *i < max_len)
            .map(|(i, c)| i + c.len_utf8())
            .last()
            .unwrap_or(0);
        format!("{}...", &content[..cut])
    }
}

/// Format time until scheduled time in human-readable format
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

/// Cancel a queued item
async fn cmd_cancel(items: &ItemService, user_id: &str, item_id: &str) -> Result<()> {
    let cancelled = items.cancel(user_id, item_id).await?;
    if cancelled == 0 {
        println!("Nothing to cancel (item unknown, already sent, or not yours)");
    } else {
        println!("Cancelled {}", item_id);
    }
    Ok(())
}

/// Show queue statistics
async fn cmd_stats(items: &ItemService, format: &str) -> Result<()> {
    validate_format(format)?;
    let stats = items.stats().await?;

    if format == "json" {
        println!(
            "{}",
            serde_json::json!({
                "queued": stats.queued,
                "posted": stats.posted,
                "failed": stats.failed,
                "cancelled": stats.cancelled,
            })
        );
    } else {
        println!("queued:    {}", stats.queued);
        println!("posted:    {}", stats.posted);
        println!("failed:    {}", stats.failed);
        println!("cancelled: {}", stats.cancelled);
    }

    Ok(())
}
