//! promo-campaign - Manage promotional campaigns
//!
//! Unix-style tool for creating campaigns, driving their lifecycle, inspecting
//! their jobs and connecting the accounts they publish to.

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use libpromocast::credentials::CredentialStore;
use libpromocast::logging::LoggingConfig;
use libpromocast::monitor::{MonitorScope, MonitorSnapshot, PublicationMonitor};
use libpromocast::{
    Campaign, CampaignPost, CampaignService, Config, Credential, Database, JobStatus, PromocastError,
    Result,
};
use std::io::BufRead;

#[derive(Parser, Debug)]
#[command(name = "promo-campaign")]
#[command(version)]
#[command(about = "Create and manage promotional campaigns")]
#[command(long_about = "\
promo-campaign - Create and manage promotional campaigns

DESCRIPTION:
    promo-campaign defines campaigns (duration, cadence, content mix, target
    platforms and catalog items), turns them into a schedule of publish jobs
    and manages their lifecycle. Jobs are published by promo-send.

COMMANDS:
    create      Create a draft campaign
    activate    Generate the schedule and start publishing
    pause       Stop publishing until resumed
    resume      Resume a paused campaign
    cancel      Complete a campaign now, skipping its remaining jobs
    delete      Delete a campaign and its history
    list        List campaigns
    jobs        List the jobs of a campaign
    skip        Skip a single job
    reschedule  Move a single job to another time
    stats       Show publishing progress
    connect     Store an access token for an account
    accounts    List connected accounts

USAGE EXAMPLES:
    # Two weeks, three posts a day, 70% content, on two platforms
    promo-campaign create --user alice --name \"Spring launch\" \\
        --start 2024-03-01 --days 14 --per-day 3 --times 09:00,13:00,18:00 \\
        --platforms x,mastodon --ratio 70 --items book-1,book-2

    # Start publishing
    promo-campaign activate <CAMPAIGN_ID>

    # Connect an account (token read from stdin)
    echo \"$TOKEN\" | promo-campaign connect --user alice --platform x --account @alice

    # Progress for the next 24 hours, as JSON
    promo-campaign --format json stats --from now --to +86400

CONFIGURATION:
    Configuration file: ~/.config/promocast/config.toml

    Override with environment variables:
        PROMOCAST_CONFIG    - Path to config file
        PROMOCAST_DB_PATH   - Path to database file

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Database or configuration error
    3 - Invalid input (bad id, invalid campaign, wrong state, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a draft campaign
    Create {
        #[arg(long)]
        user: String,

        #[arg(long)]
        name: String,

        /// First day of the campaign (YYYY-MM-DD, UTC)
        #[arg(long)]
        start: String,

        /// Number of days the campaign runs
        #[arg(long, default_value_t = 1)]
        days: u32,

        /// Posts per day
        #[arg(long, default_value_t = 1)]
        per_day: u32,

        /// Posting times, HH:MM UTC, cycled when fewer than --per-day
        #[arg(long, value_delimiter = ',', default_value = "09:00")]
        times: Vec<String>,

        /// Target platforms
        #[arg(long, value_delimiter = ',', required = true)]
        platforms: Vec<String>,

        /// Percentage of posts that are content rather than sales
        #[arg(long, default_value_t = 50)]
        ratio: u8,

        /// Catalog item ids, assigned in order
        #[arg(long, value_delimiter = ',', required = true)]
        items: Vec<String>,
    },

    /// Generate the schedule and start publishing
    Activate { campaign_id: String },

    /// Stop publishing until resumed
    Pause { campaign_id: String },

    /// Resume a paused campaign
    Resume { campaign_id: String },

    /// Complete a campaign now, skipping its remaining jobs
    Cancel { campaign_id: String },

    /// Delete a campaign, its jobs and their attempt history
    Delete { campaign_id: String },

    /// List campaigns
    List {
        /// Only campaigns of this user
        #[arg(long)]
        user: Option<String>,
    },

    /// List the jobs of a campaign
    Jobs {
        campaign_id: String,

        /// Only jobs in this status
        #[arg(long)]
        status: Option<String>,
    },

    /// Skip a job that has not been picked up yet
    Skip { job_id: String },

    /// Move a job that has not been picked up yet
    Reschedule {
        job_id: String,

        /// New time: RFC 3339, Unix seconds, "now" or "+SECONDS"
        time: String,
    },

    /// Show publishing progress
    Stats {
        /// Only jobs of this campaign
        #[arg(long)]
        campaign: Option<String>,

        /// Window start: RFC 3339, Unix seconds, "now" or "+SECONDS"
        #[arg(long, requires = "to")]
        from: Option<String>,

        /// Window end, inclusive
        #[arg(long, requires = "from")]
        to: Option<String>,
    },

    /// Store an access token for an account (token read from stdin)
    Connect {
        #[arg(long)]
        user: String,

        #[arg(long)]
        platform: String,

        /// Account handle on the platform
        #[arg(long)]
        account: String,

        /// Token expiry: RFC 3339 or Unix seconds
        #[arg(long)]
        expires_at: Option<String>,

        /// Prefer this account when listing
        #[arg(long)]
        default: bool,

        #[arg(long, env = "PROMOCAST_ACCESS_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// List connected accounts
    Accounts {
        #[arg(long)]
        user: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env_or(cli.verbose, "warn").init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;
    let service = CampaignService::new(db.clone());
    let format = cli.format;

    match cli.command {
        Commands::Create {
            user,
            name,
            start,
            days,
            per_day,
            times,
            platforms,
            ratio,
            items,
        } => {
            let start_date = NaiveDate::parse_from_str(&start, "%Y-%m-%d").map_err(|e| {
                PromocastError::InvalidInput(format!("Invalid start date '{}': {}", start, e))
            })?;

            let mut campaign = Campaign::draft(user, name, start_date);
            campaign.duration_days = days;
            campaign.posts_per_day = per_day;
            campaign.posting_times = times;
            campaign.platforms = platforms;
            campaign.content_ratio = ratio;
            campaign.items = items;

            service.create(&campaign).await?;
            match format {
                OutputFormat::Json => print_json(&campaign),
                OutputFormat::Text => println!("{}", campaign.id),
            }
        }
        Commands::Activate { campaign_id } => {
            let created = service.activate(&campaign_id).await?;
            report(format, "activated", &campaign_id, Some(created));
        }
        Commands::Pause { campaign_id } => {
            service.pause(&campaign_id).await?;
            report(format, "paused", &campaign_id, None);
        }
        Commands::Resume { campaign_id } => {
            service.resume(&campaign_id).await?;
            report(format, "resumed", &campaign_id, None);
        }
        Commands::Cancel { campaign_id } => {
            let skipped = service.cancel(&campaign_id).await?;
            report(format, "cancelled", &campaign_id, Some(skipped));
        }
        Commands::Delete { campaign_id } => {
            service.delete(&campaign_id).await?;
            report(format, "deleted", &campaign_id, None);
        }
        Commands::List { user } => {
            let campaigns = service.list(user.as_deref()).await?;
            match format {
                OutputFormat::Json => print_json(&campaigns),
                OutputFormat::Text => {
                    for c in &campaigns {
                        println!(
                            "{} | {} | {} | {} | {}d x {}/day | {}",
                            c.id,
                            c.name,
                            c.status,
                            c.start_date,
                            c.duration_days,
                            c.posts_per_day,
                            c.platforms.join(",")
                        );
                    }
                }
            }
        }
        Commands::Jobs { campaign_id, status } => {
            let status = status
                .map(|s| s.parse::<JobStatus>().map_err(PromocastError::InvalidInput))
                .transpose()?;
            let mut jobs = service.jobs(&campaign_id).await?;
            if let Some(status) = status {
                jobs.retain(|j| j.status == status);
            }
            match format {
                OutputFormat::Json => print_json(&jobs),
                OutputFormat::Text => jobs.iter().for_each(print_job),
            }
        }
        Commands::Skip { job_id } => {
            service.skip_job(&job_id).await?;
            report(format, "skipped", &job_id, None);
        }
        Commands::Reschedule { job_id, time } => {
            let at = parse_time(&time, Utc::now().timestamp())?;
            service.reschedule_job(&job_id, at).await?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({
                    "id": job_id,
                    "status": "rescheduled",
                    "scheduled_at": at,
                })),
                OutputFormat::Text => println!("Rescheduled {} to {}", job_id, format_timestamp(at)),
            }
        }
        Commands::Stats { campaign, from, to } => {
            let now = Utc::now().timestamp();
            let mut scope = MonitorScope::all();
            scope.campaign_id = campaign;
            if let (Some(from), Some(to)) = (from, to) {
                scope = scope.with_window(parse_time(&from, now)?, parse_time(&to, now)?);
            }

            let monitor = PublicationMonitor::from_config(db, &config.monitor);
            let snapshot = monitor.snapshot(&scope, now).await?;
            match format {
                OutputFormat::Json => print_json(&snapshot),
                OutputFormat::Text => print_stats(&snapshot),
            }
        }
        Commands::Connect {
            user,
            platform,
            account,
            expires_at,
            default,
            token,
        } => {
            let token = match token {
                Some(t) => t,
                None => read_token_from_stdin()?,
            };

            let mut credential = Credential::new(user, platform, account, token);
            credential.is_default = default;
            if let Some(expires_at) = expires_at {
                credential = credential.with_expiry(parse_time(&expires_at, Utc::now().timestamp())?);
            }

            let id = CredentialStore::default().connect(&db, &credential).await?;
            report(format, "connected", &id, None);
        }
        Commands::Accounts { user } => {
            let store = CredentialStore::default();
            let now = Utc::now().timestamp();
            let accounts = db.list_user_credentials(&user).await?;

            let rows: Vec<serde_json::Value> = accounts
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "id": c.id,
                        "platform": c.platform,
                        "account": c.account_identifier,
                        "default": c.is_default,
                        "expires_at": c.expires_at,
                        "valid": store.is_valid(c, now),
                    })
                })
                .collect();

            match format {
                OutputFormat::Json => print_json(&rows),
                OutputFormat::Text => {
                    for c in &accounts {
                        println!(
                            "{} | {} | {}{} | {}",
                            c.id,
                            c.platform,
                            c.account_identifier,
                            if c.is_default { " (default)" } else { "" },
                            if store.is_valid(c, now) { "valid" } else { "needs reconnect" }
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: failed to serialize output: {}", e),
    }
}

fn report(format: OutputFormat, action: &str, id: &str, count: Option<u64>) {
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "id": id,
            "status": action,
            "jobs": count,
        })),
        OutputFormat::Text => match count {
            Some(n) => println!("{} {} ({} job{})", capitalize(action), id, n, if n == 1 { "" } else { "s" }),
            None => println!("{} {}", capitalize(action), id),
        },
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn print_job(job: &CampaignPost) {
    let mut line = format!(
        "{} | {} | #{} | {} | {} | {} | {}",
        job.id,
        format_timestamp(job.scheduled_at),
        job.slot_index,
        job.platform,
        job.content_type,
        job.item_id,
        job.status
    );
    if let Some(error) = &job.last_error {
        line.push_str(&format!(" | {}", error));
    }
    println!("{}", line);
}

fn print_stats(snapshot: &MonitorSnapshot) {
    println!("Total:      {}", snapshot.total);
    println!("Scheduled:  {}", snapshot.scheduled);
    println!("Publishing: {}", snapshot.publishing);
    println!("Published:  {}", snapshot.published);
    println!("Failed:     {}", snapshot.failed);
    println!("Skipped:    {}", snapshot.skipped);
    println!("Due now:    {}", snapshot.due);
    println!("Complete:   {:.1}%", snapshot.completion_percent);
    match &snapshot.next_upcoming {
        Some(job) => println!(
            "Next:       {} on {} ({})",
            format_timestamp(job.scheduled_at),
            job.platform,
            job.id
        ),
        None => println!("Next:       none"),
    }
}

fn format_timestamp(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Parse RFC 3339, Unix seconds, "now" or "+SECONDS" relative to `now`
fn parse_time(input: &str, now: i64) -> Result<i64> {
    let input = input.trim();
    if input == "now" {
        return Ok(now);
    }
    if let Some(offset) = input.strip_prefix('+') {
        return offset
            .parse::<i64>()
            .map(|secs| now + secs)
            .map_err(|_| PromocastError::InvalidInput(format!("Invalid relative time '{}'", input)));
    }
    if let Ok(ts) = input.parse::<i64>() {
        return Ok(ts);
    }
    DateTime::parse_from_rfc3339(input)
        .map(|dt| dt.timestamp())
        .map_err(|e| PromocastError::InvalidInput(format!("Invalid time '{}': {}", input, e)))
}

fn read_token_from_stdin() -> Result<String> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| PromocastError::InvalidInput(format!("Failed to read token from stdin: {}", e)))?;

    let token = line.trim().to_string();
    if token.is_empty() {
        return Err(PromocastError::InvalidInput(
            "No access token given on stdin".to_string(),
        ));
    }
    tracing::debug!("Read access token from stdin");
    Ok(token)
}
