use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use chrono::TimeZone;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use atrio_api::{AtrioApi, FilterCriteria, InProcApi, StatusFilter};
use atrio_cloud::{FeedbackBackend, RestBackend, RestConfig};
use atrio_core::{
    parse_uid, uid_string, ChangeEvent, FeedbackRecord, FeedbackStatus, NewFeedback, Notice,
    NoticeKind, Ratings, Uid,
};
use atrio_filter::record_average;
use atrio_store::SyncConfig;

#[derive(Parser, Debug)]
#[command(name = "atrioctl", version, about = "Atrio feedback admin CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output {
    Human,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch and print the current feedback collection
    Fetch,
    /// Stream live feedback changes and print +/~/- events
    Watch,
    /// Fetch the collection and print the filtered view
    Filter {
        /// Case-insensitive substring over name, email and comments
        #[arg(long)]
        search: Option<String>,
        /// Inclusive lower bound on submission date, YYYY-MM-DD
        #[arg(long = "from")]
        date_from: Option<String>,
        /// Inclusive upper bound on submission date, YYYY-MM-DD
        #[arg(long = "to")]
        date_to: Option<String>,
        /// new | in-progress | resolved | all
        #[arg(long, default_value = "all")]
        status: String,
        #[arg(long = "min-rating", default_value_t = 0.0)]
        min_rating: f64,
        #[arg(long = "max-rating", default_value_t = 5.0)]
        max_rating: f64,
    },
    /// Update one record's status (new | in-progress | resolved)
    SetStatus { id: String, status: String },
    /// Export PDF reports for the given record ids (one id = detailed report)
    Export {
        ids: Vec<String>,
        /// Export every record in the current view
        #[arg(long = "all", action = ArgAction::SetTrue)]
        all: bool,
    },
    /// Back up the whole collection to an indented JSON file
    Backup,
    /// Collection summary and runtime stats
    Stats,
    /// Submit a new feedback entry (guest side)
    Submit {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long = "hotel-id")]
        hotel_id: Option<String>,
        #[arg(long = "room", default_value = "")]
        room_number: String,
        #[arg(long = "stay-date", default_value = "")]
        stay_date: String,
        /// Rating as category=score (1-5), repeatable
        #[arg(long = "rating", value_name = "CATEGORY=SCORE")]
        ratings: Vec<String>,
        #[arg(long)]
        comments: String,
    },
    /// List hotels offered by the submission form
    Hotels,
}

fn init_tracing() {
    let env = std::env::var("ATRIO_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("ATRIO_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid ATRIO_METRICS_ADDR; expected host:port");
        }
    }
}

fn backend_from_env() -> Result<Arc<RestBackend>> {
    Ok(Arc::new(RestBackend::new(RestConfig::from_env()?)))
}

/// One-shot commands skip the realtime feed; the explicit refresh is enough.
fn one_shot_cfg() -> SyncConfig {
    SyncConfig { with_feed: false, ..SyncConfig::from_env() }
}

async fn start_admin() -> Result<(InProcApi, mpsc::Receiver<Notice>)> {
    let backend = backend_from_env()?;
    let (api, notices) = InProcApi::start(backend, one_shot_cfg())?;
    api.refresh().await?;
    wait_for_data(&api).await;
    Ok((api, notices))
}

/// Block until the first snapshot landed (configurable via ATRIO_WAIT_SECS).
async fn wait_for_data(api: &InProcApi) {
    let wait_secs =
        std::env::var("ATRIO_WAIT_SECS").ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(8);
    let mut rx = api.subscribe_epoch();
    let deadline = Instant::now() + Duration::from_secs(wait_secs);
    while *rx.borrow() == 0 {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!("timed out waiting for the first snapshot");
            break;
        }
        if tokio::time::timeout(remaining, rx.changed()).await.is_err() {
            warn!("timed out waiting for the first snapshot");
            break;
        }
    }
}

fn drain_notices(rx: &mut mpsc::Receiver<Notice>) {
    while let Ok(n) = rx.try_recv() {
        let tag = match n.kind {
            NoticeKind::Info => "info",
            NoticeKind::Success => "ok",
            NoticeKind::Warn => "warn",
            NoticeKind::Error => "error",
        };
        eprintln!("[{}] {}: {}", tag, n.title, n.body);
    }
}

fn print_records(records: &[FeedbackRecord], output: Output) -> Result<()> {
    match output {
        Output::Json => println!("{}", serde_json::to_string_pretty(records)?),
        Output::Human => {
            for r in records {
                println!(
                    "{} • {} • {} • {} • {:.1} • {}",
                    uid_string(&r.id),
                    r.created_at.format("%Y-%m-%d"),
                    r.name,
                    r.hotel_name,
                    record_average(r),
                    r.status
                );
            }
            println!("{} record(s)", records.len());
        }
    }
    Ok(())
}

fn parse_id(raw: &str) -> Result<Uid> {
    parse_uid(raw).ok_or_else(|| anyhow!("invalid record id: {raw:?} (expected a uuid)"))
}

fn parse_day(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    let date = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid date {raw:?} (expected YYYY-MM-DD)"))?;
    let naive = date.and_hms_opt(0, 0, 0).ok_or_else(|| anyhow!("invalid date {raw:?}"))?;
    Ok(chrono::Utc.from_utc_datetime(&naive))
}

fn parse_rating_specs(specs: &[String]) -> Result<Ratings> {
    let mut out = Ratings::new();
    for spec in specs {
        let (category, score) = spec
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid rating {spec:?} (expected category=score)"))?;
        let score: u8 = score
            .trim()
            .parse()
            .with_context(|| format!("invalid score in {spec:?} (expected 1-5)"))?;
        out.insert(category.trim().to_string(), score);
    }
    Ok(out)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch => {
            let (api, mut notices) = start_admin().await?;
            let snap = api.snapshot();
            print_records(&snap.items, cli.output)?;
            drain_notices(&mut notices);
            api.shutdown();
        }
        Commands::Watch => {
            let backend = backend_from_env()?;
            info!("watch invoked");
            let mut sub = backend.subscribe().await?;
            loop {
                tokio::select! {
                    maybe = sub.rx.recv() => {
                        let Some(raw) = maybe else {
                            warn!("realtime feed closed");
                            break;
                        };
                        let Some(ev) = atrio_cloud::shape_event(backend.as_ref(), raw).await else {
                            continue;
                        };
                        match ev {
                            ChangeEvent::Inserted(r) => println!(
                                "+ {} • {} • {:.1} • {}",
                                r.name,
                                r.hotel_name,
                                record_average(&r),
                                uid_string(&r.id)
                            ),
                            ChangeEvent::Updated(r) => {
                                println!("~ {} • {} • {}", uid_string(&r.id), r.name, r.status)
                            }
                            ChangeEvent::Deleted(id) => println!("- {}", uid_string(&id)),
                        }
                    }
                    _ = tokio::signal::ctrl_c() => {
                        info!("watch interrupted");
                        break;
                    }
                }
            }
            sub.cancel.cancel();
        }
        Commands::Filter { search, date_from, date_to, status, min_rating, max_rating } => {
            let criteria = FilterCriteria {
                search: search.unwrap_or_default(),
                date_from: date_from.as_deref().map(parse_day).transpose()?,
                date_to: date_to.as_deref().map(parse_day).transpose()?,
                status: status.parse::<StatusFilter>().map_err(|e| anyhow!(e))?,
                min_rating,
                max_rating,
            };
            let (api, mut notices) = start_admin().await?;
            api.set_criteria(criteria);
            print_records(&api.filtered(), cli.output)?;
            drain_notices(&mut notices);
            api.shutdown();
        }
        Commands::SetStatus { id, status } => {
            let id = parse_id(&id)?;
            // Reject junk before anything is persisted.
            let status = status.parse::<FeedbackStatus>().map_err(|e| anyhow!(e))?;
            let (api, mut notices) = start_admin().await?;
            let res = api.update_status(id, status).await;
            drain_notices(&mut notices);
            api.shutdown();
            if let Err(e) = res {
                error!(error = %e, "status update failed");
                return Err(anyhow!(e));
            }
            println!("{} -> {}", uid_string(&id), status);
        }
        Commands::Export { ids, all } => {
            let ids: Vec<Uid> = ids.iter().map(|s| parse_id(s)).collect::<Result<_>>()?;
            let (api, mut notices) = start_admin().await?;
            if all {
                api.select_all();
            } else {
                for id in ids {
                    api.toggle_row(id);
                }
            }
            let res = api.export_selected();
            drain_notices(&mut notices);
            api.shutdown();
            match res {
                Ok(out) => {
                    println!("exported {} record(s) -> {}", out.records, out.path.display())
                }
                Err(e) => {
                    error!(error = %e, "export failed");
                    return Err(anyhow!(e));
                }
            }
        }
        Commands::Backup => {
            let (api, mut notices) = start_admin().await?;
            let res = api.backup();
            drain_notices(&mut notices);
            api.shutdown();
            match res {
                Ok(receipt) => {
                    println!("backup -> {}", receipt.path.display());
                    println!("last backup at {}", receipt.timestamp);
                }
                Err(e) => {
                    error!(error = %e, "backup failed");
                    return Err(anyhow!(e));
                }
            }
        }
        Commands::Stats => {
            let (api, mut notices) = start_admin().await?;
            let summary = api.summary();
            let stats = api.stats();
            let last_backup = api.last_backup();
            drain_notices(&mut notices);
            api.shutdown();
            match cli.output {
                Output::Json => println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "summary": summary,
                        "stats": stats,
                        "last_backup": last_backup,
                    }))?
                ),
                Output::Human => {
                    println!("total:        {}", summary.total);
                    println!("new:          {}", summary.new);
                    println!("in progress:  {}", summary.in_progress);
                    println!("resolved:     {}", summary.resolved);
                    println!("avg rating:   {:.1}", summary.average_rating);
                    println!(
                        "last backup:  {}",
                        last_backup.as_deref().unwrap_or("never")
                    );
                    println!(
                        "poll: {}s • queue: {} • export dir: {}",
                        stats.poll_secs, stats.queue_cap, stats.export_dir
                    );
                }
            }
        }
        Commands::Submit { name, email, hotel_id, room_number, stay_date, ratings, comments } => {
            let submission = NewFeedback {
                name,
                email,
                hotel_id: hotel_id.as_deref().map(parse_id).transpose()?,
                room_number,
                stay_date,
                ratings: parse_rating_specs(&ratings)?,
                comments,
                user_id: None,
            };
            let backend = backend_from_env()?;
            let (api, mut notices) = InProcApi::start(backend, one_shot_cfg())?;
            let res = api.submit(submission).await;
            drain_notices(&mut notices);
            api.shutdown();
            match res {
                Ok(id) => println!("submitted {}", uid_string(&id)),
                Err(e) => {
                    error!(error = %e, "submission failed");
                    return Err(anyhow!(e));
                }
            }
        }
        Commands::Hotels => {
            let backend = backend_from_env()?;
            match backend.list_hotels().await {
                Ok(hotels) => match cli.output {
                    Output::Human => {
                        for h in &hotels {
                            println!("{} • {}", uid_string(&h.id), h.name);
                        }
                        println!("{} hotel(s)", hotels.len());
                    }
                    Output::Json => println!("{}", serde_json::to_string_pretty(&hotels)?),
                },
                Err(e) => {
                    error!(error = ?e, "hotel listing failed");
                    eprintln!("hotels error: {}", e);
                }
            }
        }
    }

    Ok(())
}
