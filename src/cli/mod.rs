//! Command-line interface for maestro.
//!
//! Provides commands for feeding content in, moving it through review,
//! running the scheduler and dispatcher, and inspecting the journal.

use std::io::{self, Read};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::adapters::{
    Authorizer, DryRunPublisher, FabricDrafter, LogNotifier, Notifier, RoleAuthorizer,
    WebhookPublisher,
};
use crate::config::{self, ResolvedConfig};
use crate::core::{
    create_draft, ingest, ContentStore, Dispatcher, Engine, ListFilter, ScrapedCandidate,
    SystemClock,
};
use crate::domain::{
    ContentItem, ContentKind, ContentState, Decision, MediaRef, Platform, Reviewer,
};

/// maestro - Social content review, scheduling and publishing
#[derive(Parser, Debug)]
#[command(name = "maestro")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log publishes instead of calling platform endpoints
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest a scraped post (idempotent per source URL)
    Ingest {
        /// Source URL the post was collected from
        url: String,

        #[arg(short, long)]
        platform: Platform,

        #[arg(short, long, default_value = "text")]
        kind: ContentKind,

        /// Post text (reads from stdin if not provided)
        #[arg(short, long)]
        body: Option<String>,

        /// Media URI for photo/video posts
        #[arg(short, long)]
        media: Option<String>,
    },

    /// Generate an AI draft with Fabric
    Draft {
        /// Prompt (reads from stdin if not provided)
        prompt: Option<String>,

        #[arg(short, long)]
        platform: Platform,

        #[arg(short, long, default_value = "text")]
        kind: ContentKind,
    },

    /// Submit a scraped or drafted item for review
    Submit {
        id: String,

        #[arg(long, env = "MAESTRO_USER", default_value = "operator")]
        actor: String,
    },

    /// Add reviewer feedback (flags a pending item)
    Feedback {
        id: String,

        comment: String,

        #[arg(short, long, env = "MAESTRO_USER")]
        reviewer: String,
    },

    /// Approve an item under review
    Approve {
        id: String,

        #[arg(short, long, env = "MAESTRO_USER")]
        reviewer: String,
    },

    /// Reject an item (also cancels approved and scheduled items)
    Reject {
        id: String,

        #[arg(short, long, env = "MAESTRO_USER")]
        reviewer: String,
    },

    /// Reset a failed item to draft
    Reset {
        id: String,

        #[arg(short, long, env = "MAESTRO_USER")]
        reviewer: String,
    },

    /// Assign publish slots to approved items
    Schedule,

    /// Run one full pass: schedule, remind, publish what is due
    Sweep,

    /// Sweep on an interval until Ctrl-C
    Serve,

    /// Release items held after a platform's credentials expired
    Release {
        platform: Platform,
    },

    /// List content items, newest first
    List {
        #[arg(short, long)]
        state: Option<ContentState>,

        #[arg(short, long)]
        platform: Option<Platform>,

        /// Maximum number of items to show
        #[arg(short, long, default_value = "25")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Show one item in full
    Show {
        id: String,
    },

    /// Show the transition history of an item
    History {
        id: String,
    },

    /// Count items per state
    Status,

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let dry_run = self.dry_run;
        match self.command {
            Commands::Ingest {
                url,
                platform,
                kind,
                body,
                media,
            } => ingest_post(url, platform, kind, body, media).await,
            Commands::Draft {
                prompt,
                platform,
                kind,
            } => draft_post(prompt, platform, kind).await,
            Commands::Submit { id, actor } => submit(&id, &actor, dry_run).await,
            Commands::Feedback {
                id,
                comment,
                reviewer,
            } => feedback(&id, &reviewer, &comment, dry_run).await,
            Commands::Approve { id, reviewer } => {
                decide(&id, &reviewer, Decision::Approve, dry_run).await
            }
            Commands::Reject { id, reviewer } => {
                decide(&id, &reviewer, Decision::Reject, dry_run).await
            }
            Commands::Reset { id, reviewer } => reset(&id, &reviewer, dry_run).await,
            Commands::Schedule => schedule(dry_run).await,
            Commands::Sweep => sweep(dry_run).await,
            Commands::Serve => serve(dry_run).await,
            Commands::Release { platform } => release(platform, dry_run).await,
            Commands::List {
                state,
                platform,
                limit,
                offset,
            } => list_items(ListFilter {
                state,
                platform,
                limit,
                offset,
            }),
            Commands::Show { id } => show_item(&id),
            Commands::History { id } => show_history(&id),
            Commands::Status => show_status(),
            Commands::Config => show_config(),
        }
    }
}

/// Open the journal-backed store at $MAESTRO_HOME/content.jsonl
fn open_store() -> Result<Arc<ContentStore>> {
    let cfg = config::config()?;
    let path = cfg.journal_path();
    let store = ContentStore::open(&path, Arc::new(SystemClock))
        .with_context(|| format!("Failed to open content journal: {}", path.display()))?
        .with_claim_lease(cfg.sweep.claim_lease());
    Ok(Arc::new(store))
}

/// Wire an engine from configuration
fn build_engine(cfg: &ResolvedConfig, store: Arc<ContentStore>, dry_run: bool) -> Engine {
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    let mut dispatcher = Dispatcher::new(Arc::clone(&store), Arc::clone(&notifier), cfg.retry.clone())
        .with_publish_timeout(cfg.sweep.publish_timeout())
        .with_workers(cfg.sweep.workers);

    if dry_run {
        for platform in Platform::ALL {
            dispatcher = dispatcher.with_publisher(Arc::new(DryRunPublisher::new(platform)));
        }
    } else {
        for (platform, endpoint) in &cfg.platforms {
            let publisher = WebhookPublisher::new(*platform, endpoint.endpoint.clone(), endpoint.token());
            dispatcher = dispatcher.with_publisher(Arc::new(publisher));
        }
    }

    Engine::new(store, notifier, cfg.cadence.clone(), dispatcher)
        .with_sweep_interval(cfg.sweep.interval())
        .with_reminder_after(cfg.sweep.reminder_after())
}

fn open_engine(dry_run: bool) -> Result<Engine> {
    let cfg = config::config()?;
    Ok(build_engine(cfg, open_store()?, dry_run))
}

fn parse_id(id: &str) -> Result<Uuid> {
    Uuid::parse_str(id).with_context(|| format!("Invalid content ID: {}", id))
}

/// Resolve a user's privilege through the configured role table
async fn resolve_reviewer(name: &str) -> Result<Reviewer> {
    let cfg = config::config()?;
    let authorizer = RoleAuthorizer::new(cfg.reviewers.clone());
    let privilege = authorizer
        .reviewer_privilege(name)
        .await
        .with_context(|| format!("Failed to resolve privilege for {}", name))?;
    Ok(Reviewer::new(name, privilege))
}

fn read_stdin() -> Result<String> {
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read from stdin")?;
    Ok(buffer)
}

/// Ingest one scraped post
async fn ingest_post(
    url: String,
    platform: Platform,
    kind: ContentKind,
    body: Option<String>,
    media: Option<String>,
) -> Result<()> {
    let body = match body {
        Some(body) => body,
        None => read_stdin()?,
    };

    let candidate = ScrapedCandidate {
        platform,
        kind,
        body,
        source_url: url,
        media: media.map(|uri| MediaRef {
            uri,
            description: None,
        }),
    };

    let store = open_store()?;
    let outcome = ingest(&store, candidate)?;
    if outcome.is_new() {
        eprintln!("Ingested: {}", outcome.item().summary());
    } else {
        eprintln!("Already ingested: {}", outcome.item().summary());
    }
    println!("{}", outcome.item().id);
    Ok(())
}

/// Draft a post with Fabric and store it
async fn draft_post(prompt: Option<String>, platform: Platform, kind: ContentKind) -> Result<()> {
    let prompt = match prompt {
        Some(prompt) => prompt,
        None => read_stdin()?,
    };
    if prompt.trim().is_empty() {
        anyhow::bail!("No prompt provided. Pass it as an argument or pipe to stdin");
    }

    let cfg = config::config()?;
    let drafter = FabricDrafter::new(cfg.fabric.binary.clone(), cfg.fabric.pattern.clone());
    let store = open_store()?;

    let item = create_draft(&store, &drafter, &prompt, platform, kind).await?;
    eprintln!("Drafted: {}", item.summary());
    println!("{}", item.body);
    Ok(())
}

async fn submit(id: &str, actor: &str, dry_run: bool) -> Result<()> {
    let engine = open_engine(dry_run)?;
    let item = engine.review().submit_for_review(parse_id(id)?, actor).await?;
    println!("{}", item.summary());
    Ok(())
}

async fn feedback(id: &str, reviewer: &str, comment: &str, dry_run: bool) -> Result<()> {
    let engine = open_engine(dry_run)?;
    let item = engine
        .review()
        .add_feedback(parse_id(id)?, reviewer, comment)
        .await?;
    println!("{}", item.summary());
    Ok(())
}

async fn decide(id: &str, reviewer: &str, decision: Decision, dry_run: bool) -> Result<()> {
    let reviewer = resolve_reviewer(reviewer).await?;
    let engine = open_engine(dry_run)?;
    let item = engine
        .review()
        .decide(parse_id(id)?, decision, &reviewer)
        .await?;
    println!("{}", item.summary());

    // Give approved items a slot right away
    if item.state == ContentState::Approved {
        for assignment in engine.scheduler().assign()? {
            if assignment.item_id == item.id {
                println!("Scheduled for {}", assignment.scheduled_for);
            }
        }
    }
    Ok(())
}

async fn reset(id: &str, reviewer: &str, dry_run: bool) -> Result<()> {
    let reviewer = resolve_reviewer(reviewer).await?;
    let engine = open_engine(dry_run)?;
    let item = engine.review().reset(parse_id(id)?, &reviewer).await?;
    println!("{}", item.summary());
    Ok(())
}

async fn schedule(dry_run: bool) -> Result<()> {
    let engine = open_engine(dry_run)?;
    let assignments = engine.scheduler().assign()?;

    if assignments.is_empty() {
        println!("Nothing to schedule");
        return Ok(());
    }

    println!("{:<38} {:<10} {:<6} {:<25}", "ITEM ID", "PLATFORM", "KIND", "SCHEDULED FOR");
    println!("{}", "-".repeat(82));
    for a in &assignments {
        println!(
            "{:<38} {:<10} {:<6} {:<25}",
            a.item_id,
            a.platform.to_string(),
            a.kind.to_string(),
            a.scheduled_for.format("%Y-%m-%d %H:%M UTC")
        );
    }
    Ok(())
}

async fn sweep(dry_run: bool) -> Result<()> {
    let engine = open_engine(dry_run)?;
    let report = engine.sweep().await?;

    println!("Assigned:  {}", report.assigned);
    println!("Reminded:  {}", report.reminded);
    println!("Published: {}", report.published);
    println!("Retrying:  {}", report.retried);
    println!("Failed:    {}", report.failed);
    println!("Held:      {}", report.held);
    if report.errors > 0 {
        println!("Errors:    {}", report.errors);
    }
    Ok(())
}

async fn serve(dry_run: bool) -> Result<()> {
    let engine = open_engine(dry_run)?;
    engine.serve().await
}

async fn release(platform: Platform, dry_run: bool) -> Result<()> {
    let engine = open_engine(dry_run)?;
    let released = engine.dispatcher().release_holds(platform)?;
    println!("Released {} item(s) on {}", released, platform);
    Ok(())
}

fn list_items(filter: ListFilter) -> Result<()> {
    let store = open_store()?;
    let items = store.list(&filter);

    if items.is_empty() {
        println!("No items found. Use 'maestro ingest' or 'maestro draft' to add content.");
        return Ok(());
    }

    println!(
        "{:<38} {:<10} {:<6} {:<15} {:<18}",
        "ID", "PLATFORM", "KIND", "STATE", "SCHEDULED FOR"
    );
    println!("{}", "-".repeat(90));
    for item in &items {
        let scheduled = item
            .scheduled_for
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<38} {:<10} {:<6} {:<15} {:<18}",
            item.id,
            item.platform.to_string(),
            item.kind.to_string(),
            state_label(item),
            scheduled
        );
    }

    println!("\nShowing {} item(s) from offset {}", items.len(), filter.offset);
    Ok(())
}

fn state_label(item: &ContentItem) -> String {
    if item.on_hold {
        format!("{} (held)", item.state)
    } else {
        item.state.to_string()
    }
}

fn show_item(id: &str) -> Result<()> {
    let store = open_store()?;
    let item = store.get(parse_id(id)?)?;

    println!("ID:        {}", item.id);
    println!("Platform:  {}", item.platform);
    println!("Kind:      {}", item.kind);
    println!("State:     {}", state_label(&item));
    println!("Version:   {}", item.version);
    println!("Attempts:  {}", item.attempt_count);
    if let Some(ref url) = item.source_url {
        println!("Source:    {}", url);
    }
    if let Some(ref media) = item.media {
        println!("Media:     {}", media.uri);
    }
    if let Some(at) = item.scheduled_for {
        println!("Scheduled: {}", at);
    }
    if let Some(at) = item.published_at {
        println!("Published: {}", at);
    }
    if let Some(ref post_id) = item.platform_post_id {
        println!("Post ID:   {}", post_id);
    }
    if let Some(ref failure) = item.last_error {
        println!("Last error: {} at {}: {}", failure.kind, failure.at, failure.message);
    }
    println!("Created:   {}", item.created_at);
    println!("Updated:   {}", item.updated_at);
    println!();
    println!("{}", item.body);

    if !item.review_feedback.is_empty() {
        println!("\nFeedback:");
        for fb in &item.review_feedback {
            println!("  [{}] {}: {}", fb.timestamp.format("%Y-%m-%d %H:%M"), fb.reviewer, fb.comment);
        }
    }
    Ok(())
}

fn show_history(id: &str) -> Result<()> {
    let store = open_store()?;
    let id = parse_id(id)?;
    store.get(id)?;

    println!(
        "{:<20} {:<16} {:<15} {:<15} {:<12}",
        "TIMESTAMP", "TRANSITION", "FROM", "TO", "ACTOR"
    );
    println!("{}", "-".repeat(82));
    for record in store.history(id) {
        let from = record
            .from
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<20} {:<16} {:<15} {:<15} {:<12}",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            format!("{:?}", record.kind),
            from,
            record.to.to_string(),
            record.actor
        );
        if let Some(ref note) = record.note {
            println!("  {}", note);
        }
    }
    Ok(())
}

fn show_status() -> Result<()> {
    let store = open_store()?;
    let status = store.status();

    println!("{:<16} {:>6}", "STATE", "COUNT");
    println!("{}", "-".repeat(23));
    for (state, count) in &status.counts {
        println!("{:<16} {:>6}", state.to_string(), count);
    }
    println!("{}", "-".repeat(23));
    println!("{:<16} {:>6}", "total", status.total());
    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("Config file: {}", cfg.config_file.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "(none - using defaults)".to_string()));
    println!();
    println!("Paths:");
    println!("  Home:    {}", cfg.home.display());
    println!("  Journal: {}", cfg.journal_path().display());
    println!();
    println!("Cadence:");
    println!("  Posts per day:   {}", cfg.cadence.posts_per_day);
    let slots: Vec<String> = cfg.cadence.slot_times.iter().map(|s| s.to_string()).collect();
    println!("  Slot times:      {} UTC", slots.join(", "));
    println!("  Alternate kinds: {}", cfg.cadence.alternate_kinds);
    println!("  Skip weekends:   {}", cfg.cadence.skip_weekends);
    println!();
    println!("Retry:");
    println!("  Max attempts: {}", cfg.retry.max_attempts);
    println!("  Strategy:     {:?}", cfg.retry.strategy);
    println!("  Backoff:      {}s", cfg.retry.backoff_seconds);
    println!();
    println!("Sweep:");
    println!("  Interval:        {}s", cfg.sweep.interval_seconds);
    println!("  Workers:         {}", cfg.sweep.workers);
    println!("  Publish timeout: {}s", cfg.sweep.publish_timeout_seconds);
    println!("  Reminder after:  {}h", cfg.sweep.review_reminder_hours);
    println!("  Claim lease:     {}s", cfg.sweep.claim_lease().num_seconds());
    println!();
    println!("Platforms:");
    if cfg.platforms.is_empty() {
        println!("  (none configured; use --dry-run)");
    } else {
        let mut platforms: Vec<_> = cfg.platforms.iter().collect();
        platforms.sort_by_key(|(p, _)| **p);
        for (platform, endpoint) in platforms {
            let token = if endpoint.token().is_some() { "token set" } else { "no token" };
            println!("  {:<10} {} ({})", platform.to_string(), endpoint.endpoint, token);
        }
    }
    println!();
    println!("Reviewers:");
    let mut reviewers: Vec<_> = cfg.reviewers.iter().collect();
    reviewers.sort();
    for (name, level) in reviewers {
        println!("  {}: {}", name, level);
    }

    Ok(())
}
