use crate::config::{default_database_path, Settings};
use crate::export::{self, ExportOutput};
use crate::git::{GitRepo, IngestOptions};
use crate::links::{self, Segment};
use crate::model::{Alert, RepositoryRecord, Severity};
use crate::planning::FeatureAnalysis;
use crate::store::Store;
use crate::views::{AlertStatus, Insights, PersonView, RepositorySummary, RepositoryView};
use crate::window::CommitWindow;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use console::style;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "nexus")]
#[command(about = "Repository activity, knowledge concentration and expertise insights")]
#[command(version)]
pub struct Cli {
    #[clap(flatten)]
    pub common: CommonArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Clone)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Path to the nexus database (default: .nexus/nexus.db)")]
    pub db: Option<PathBuf>,

    #[arg(long, global = true, help = "Path to a TOML config file (default: .nexus/config.toml)")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Reference time as RFC3339 (default: now)")]
    pub now: Option<String>,

    #[arg(short, long, global = true, help = "Enable debug logging")]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register or update a repository
    AddRepo {
        id: String,

        #[arg(long, help = "Display name (defaults to the id)")]
        name: Option<String>,

        #[arg(long, default_value = "", help = "Short description")]
        description: String,

        #[arg(long, help = "Current pull request or commit id for alerts")]
        reference: Option<String>,

        #[arg(long = "depends-on", help = "Repository this one depends on (repeatable)")]
        depends_on: Vec<String>,
    },
    /// Point a repository's alerts at a new pull request or commit id
    SetReference { id: String, reference: String },
    /// Register a person ahead of their first commit
    AddPerson {
        email: String,

        #[arg(long, help = "Display name")]
        name: String,
    },
    /// Read commits from a local git repository
    Ingest {
        #[arg(help = "Repository id (defaults to the work tree directory name)")]
        id: Option<String>,

        #[arg(long, help = "Path to git repository")]
        repo: Option<PathBuf>,

        #[arg(long, help = "Display name when the repository is new")]
        name: Option<String>,

        #[arg(long, help = "Only read the newest N commits")]
        max_commits: Option<usize>,

        #[arg(long, help = "Skip merge commits", default_value_t = false)]
        no_merges: bool,

        #[arg(long, help = "Include binary files", default_value_t = false)]
        binary: bool,

        #[arg(long, help = "Only keep file changes under this path prefix")]
        path: Option<String>,
    },
    /// Load NDJSON commit records ('-' reads stdin)
    Import { file: PathBuf },
    /// Write a repository's stored commits
    Export {
        id: String,

        #[arg(long, help = "Output as JSON")]
        json: bool,

        #[arg(long, help = "Output as NDJSON")]
        ndjson: bool,
    },
    /// List repositories with their activity snapshot
    Repos {
        #[arg(long, help = "Output as JSON")]
        json: bool,
    },
    /// Show one repository with alerts
    Repo {
        id: String,

        #[arg(long, help = "Output as JSON")]
        json: bool,
    },
    /// Show one person with alerts
    Person {
        email: String,

        #[arg(long, help = "Output as JSON")]
        json: bool,
    },
    /// Parse link annotations in text (stdin when omitted)
    Links {
        text: Option<String>,

        #[arg(long, help = "Output as JSON")]
        json: bool,
    },
    /// Plan the impact of a feature across repositories and people
    Plan {
        description: String,

        #[arg(long, help = "Output as JSON")]
        json: bool,

        #[arg(long, help = "Output raw markdown with link annotations")]
        markdown: bool,
    },
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    pub async fn execute(self) -> Result<()> {
        let common = self.common;
        match self.command {
            Commands::AddRepo {
                id,
                name,
                description,
                reference,
                depends_on,
            } => add_repo(&common, id, name, description, reference, depends_on),
            Commands::SetReference { id, reference } => {
                let store = common.open_store()?;
                store
                    .set_reference(&id, &reference)
                    .with_context(|| format!("Failed to set reference for {id}"))?;
                println!("{} now tracks {}", style(&id).bold(), style(&reference).cyan());
                Ok(())
            }
            Commands::AddPerson { email, name } => {
                let store = common.open_store()?;
                store.register_person(&email, &name).context("Failed to register person")?;
                println!("Registered {} <{}>", style(&name).bold(), email);
                Ok(())
            }
            Commands::Ingest {
                id,
                repo,
                name,
                max_commits,
                no_merges,
                binary,
                path,
            } => {
                let options = IngestOptions {
                    max_commits,
                    include_merges: !no_merges,
                    binary,
                    path_prefix: path,
                };
                ingest(&common, id, repo, name, options)
            }
            Commands::Import { file } => import(&common, file),
            Commands::Export { id, json, ndjson } => export_commits(&common, &id, json, ndjson),
            Commands::Repos { json } => list_repositories(&common, json),
            Commands::Repo { id, json } => show_repository(&common, &id, json).await,
            Commands::Person { email, json } => show_person(&common, &email, json).await,
            Commands::Links { text, json } => show_links(text, json),
            Commands::Plan {
                description,
                json,
                markdown,
            } => plan(&common, &description, json, markdown),
        }
    }
}

impl CommonArgs {
    fn settings(&self) -> Result<Settings> {
        Settings::load(self.config.as_deref()).context("Failed to load configuration")
    }

    fn open_store(&self) -> Result<Arc<Store>> {
        let path = match &self.db {
            Some(path) => path.clone(),
            None => default_database_path(std::env::current_dir()?),
        };
        let store = Store::open(&path).with_context(|| format!("Failed to open store at {}", path.display()))?;
        Ok(Arc::new(store))
    }

    fn now(&self) -> Result<DateTime<Utc>> {
        match &self.now {
            Some(raw) => Ok(DateTime::parse_from_rfc3339(raw)
                .with_context(|| format!("Invalid --now '{raw}'"))?
                .with_timezone(&Utc)),
            None => Ok(Utc::now()),
        }
    }

    fn insights(&self) -> Result<Insights> {
        let settings = self.settings()?;
        let store = self.open_store()?;
        Insights::from_settings(store, settings).context("Failed to set up insights")
    }
}

fn add_repo(
    common: &CommonArgs,
    id: String,
    name: Option<String>,
    description: String,
    reference: Option<String>,
    depends_on: Vec<String>,
) -> Result<()> {
    let store = common.open_store()?;
    let record = RepositoryRecord {
        name: name.unwrap_or_else(|| id.clone()),
        id,
        description,
        reference,
    };
    store.upsert_repository(&record).context("Failed to store repository")?;
    for dependency in &depends_on {
        store
            .link_repositories(&record.id, dependency)
            .with_context(|| format!("Failed to link {} to {dependency}", record.id))?;
    }
    println!("Registered {} ({})", style(&record.name).bold(), record.id);
    Ok(())
}

fn ingest(
    common: &CommonArgs,
    id: Option<String>,
    repo_path: Option<PathBuf>,
    name: Option<String>,
    options: IngestOptions,
) -> Result<()> {
    let store = common.open_store()?;
    let repo = GitRepo::open(repo_path.as_ref()).context("Failed to open git repository")?;
    let id = id.unwrap_or_else(|| repo.default_name());

    if store.repository(&id)?.is_none() {
        store
            .upsert_repository(&RepositoryRecord {
                name: name.unwrap_or_else(|| id.clone()),
                id: id.clone(),
                description: String::new(),
                reference: None,
            })
            .context("Failed to register repository")?;
    }

    let commits = repo
        .collect_commits(&id, &options)
        .context("Failed to collect commits from repository")?;
    let inserted = store.insert_commits(&commits).context("Failed to store commits")?;
    info!(repository = %id, path = %repo.path().display(), collected = commits.len(), inserted, "ingested history");

    println!(
        "{}: {} commits read, {} new",
        style(&id).bold(),
        style(commits.len()).cyan(),
        style(inserted).green()
    );
    Ok(())
}

fn import(common: &CommonArgs, file: PathBuf) -> Result<()> {
    let commits = if file.as_os_str() == "-" {
        export::read_ndjson(io::stdin().lock()).context("Failed to read commits from stdin")?
    } else {
        let handle = File::open(&file).with_context(|| format!("Failed to open {}", file.display()))?;
        export::read_ndjson(BufReader::new(handle))
            .with_context(|| format!("Failed to read commits from {}", file.display()))?
    };

    let store = common.open_store()?;
    let repository_ids: BTreeSet<&str> = commits.iter().map(|c| c.repository_id.as_str()).collect();
    for id in repository_ids {
        if store.repository(id)?.is_none() {
            info!(repository = id, "registering repository seen in import");
            store.upsert_repository(&RepositoryRecord {
                id: id.to_string(),
                name: id.to_string(),
                description: String::new(),
                reference: None,
            })?;
        }
    }

    let inserted = store.insert_commits(&commits).context("Failed to store commits")?;
    println!(
        "Imported {} commits ({} new)",
        style(commits.len()).cyan(),
        style(inserted).green()
    );
    Ok(())
}

fn export_commits(common: &CommonArgs, id: &str, json: bool, ndjson: bool) -> Result<()> {
    let store = common.open_store()?;
    let mut commits = store
        .repository_window(id, usize::MAX)
        .with_context(|| format!("Failed to load commits for {id}"))?;
    commits.reverse();

    if json {
        let output = ExportOutput::new(id, commits, common.now()?);
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if ndjson {
        export::write_ndjson(io::stdout().lock(), &commits)?;
    } else {
        let summary = export::summarize(&commits);
        println!("{}", style("Export Summary").bold());
        println!("{}", "─".repeat(50));
        println!("Total commits: {}", style(summary.total_commits).cyan());
        println!("Total files changed: {}", style(summary.total_files).cyan());
        println!("Total lines added: {}", style(summary.total_added).green());
        println!("Total lines deleted: {}", style(summary.total_deleted).red());
        println!("Unique authors: {}", style(summary.unique_authors).yellow());
        if let (Some(first), Some(last)) = (summary.first_commit, summary.last_commit) {
            println!(
                "Date range: {} to {}",
                style(first.format("%Y-%m-%d")).dim(),
                style(last.format("%Y-%m-%d")).dim()
            );
        }
        println!("\nUse --json or --ndjson flags to export the raw data.");
    }
    Ok(())
}

fn list_repositories(common: &CommonArgs, json: bool) -> Result<()> {
    let insights = common.insights()?;
    let summaries = insights
        .repository_summaries(common.now()?)
        .context("Failed to compute repository summaries")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }
    if summaries.is_empty() {
        println!("No repositories registered");
        return Ok(());
    }

    println!(
        "{:<24} {:<24} {:>8} {:>8} {:>8} {:>14}",
        style("Id").bold(),
        style("Name").bold(),
        style("Commits").bold(),
        style("People").bold(),
        style("Activity").bold(),
        style("Concentration").bold()
    );
    println!("{}", "─".repeat(92));
    for summary in &summaries {
        println!(
            "{:<24} {:<24} {:>8} {:>8} {:>8} {:>13}%",
            summary.id,
            summary.name,
            summary.snapshot.total_commits,
            summary.snapshot.contributors,
            summary.snapshot.activity.label(),
            summary.snapshot.knowledge_concentration
        );
    }
    Ok(())
}

async fn show_repository(common: &CommonArgs, id: &str, json: bool) -> Result<()> {
    let insights = common.insights()?;
    let view = insights
        .repository_view(id, common.now()?)
        .await
        .with_context(|| format!("Failed to build view for repository {id}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print_repository(&view);
    }
    // Under serve_stale the generation may still be running in the background.
    insights.drain().await;
    Ok(())
}

fn print_repository(view: &RepositoryView) {
    let summary: &RepositorySummary = &view.summary;
    let snapshot = &summary.snapshot;

    println!("{} {}", style(&summary.name).bold(), style(format!("({})", summary.id)).dim());
    if !summary.description.is_empty() {
        println!("{}", summary.description);
    }
    println!("{}", "─".repeat(60));
    println!("Commits in window: {}", style(snapshot.total_commits).cyan());
    println!("Contributors: {}", style(snapshot.contributors).cyan());
    println!(
        "Activity: {} ({} commits in the last 30 days)",
        style(snapshot.activity.label()).yellow(),
        snapshot.recent_commits
    );
    println!("Knowledge concentration: {}%", style(snapshot.knowledge_concentration).magenta());

    if !summary.top_contributors.is_empty() {
        println!("\n{}", style("Top contributors").bold());
        for contributor in &summary.top_contributors {
            println!(
                "  {:<30} {:>6} {:>4}%",
                contributor.name, contributor.commits, contributor.percentage
            );
        }
    }

    if !summary.hotspots.is_empty() {
        println!("\n{}", style("Hotspots").bold());
        for hotspot in &summary.hotspots {
            println!(
                "  {:<50} {:>4} changes {:>3} authors",
                hotspot.path, hotspot.changes, hotspot.contributors
            );
        }
    }

    if !summary.dependencies.is_empty() {
        let names: Vec<&str> = summary.dependencies.iter().map(|d| d.name.as_str()).collect();
        println!("\nDepends on: {}", names.join(", "));
    }

    print_alerts(&view.alerts, &view.alert_status);
}

async fn show_person(common: &CommonArgs, email: &str, json: bool) -> Result<()> {
    let insights = common.insights()?;
    let view = insights
        .person_view(email, common.now()?)
        .await
        .with_context(|| format!("Failed to build view for person {email}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print_person(&view);
    }
    // Under serve_stale the generation may still be running in the background.
    insights.drain().await;
    Ok(())
}

fn print_person(view: &PersonView) {
    let summary = &view.summary;
    println!(
        "{} {} <{}>",
        style(format!("[{}]", summary.avatar)).cyan(),
        style(&summary.name).bold(),
        summary.email
    );
    println!("{}", "─".repeat(60));
    println!(
        "Commits in window: {} ({} in the last 30 days)",
        style(summary.total_commits).cyan(),
        summary.recent_activity
    );

    if !summary.repositories.is_empty() {
        println!("\n{}", style("Repositories").bold());
        for repo in &summary.repositories {
            println!(
                "  {:<30} {:>6} commits  expertise {:>3}  share {:>3}%  last {}",
                repo.name,
                repo.commits,
                repo.expertise,
                repo.share,
                repo.last_activity.format("%Y-%m-%d")
            );
        }
    }

    if !summary.technologies.is_empty() {
        println!("\n{}", style("Technologies").bold());
        for tech in &summary.technologies {
            println!(
                "  {:<20} {:>3}  ({} files, {} lines)",
                tech.name, tech.level, tech.files, tech.lines
            );
        }
    }

    print_alerts(&view.alerts, &view.alert_status);
}

fn print_alerts(alerts: &[Alert], status: &AlertStatus) {
    println!("\n{}", style("Alerts").bold());
    if let Some(error) = &status.error {
        println!("  {} {}", style("degraded:").red(), error);
    }
    if alerts.is_empty() {
        println!("  none");
        return;
    }
    for alert in alerts {
        let severity = match alert.severity {
            Severity::Critical => style(alert.severity.label()).red().bold(),
            Severity::Warning => style(alert.severity.label()).yellow(),
            Severity::Info => style(alert.severity.label()).blue(),
        };
        println!("  [{}] {}", severity, style(&alert.title).bold());
        println!("    {}", links::render_plain(&alert.description));
        if let Some(actions) = &alert.suggested_actions {
            println!("    {} {}", style("→").dim(), links::render_plain(actions));
        }
    }
}

fn show_links(text: Option<String>, json: bool) -> Result<()> {
    let text = match text {
        Some(text) => text,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer).context("Failed to read stdin")?;
            buffer
        }
    };
    let segments = links::parse(&text);

    if json {
        println!("{}", serde_json::to_string_pretty(&segments)?);
        return Ok(());
    }
    for segment in &segments {
        match segment {
            Segment::Text(text) => println!("{} {:?}", style("text").dim(), text),
            Segment::Link(link) => println!(
                "{} {} {}",
                style(link.kind()).cyan(),
                link,
                style(link.display_label()).bold()
            ),
        }
    }
    Ok(())
}

fn plan(common: &CommonArgs, description: &str, json: bool, markdown: bool) -> Result<()> {
    let insights = common.insights()?;
    let analysis: FeatureAnalysis = insights
        .plan(description, common.now()?)
        .context("Failed to plan feature")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
    } else if markdown {
        print!("{}", analysis.to_markdown());
    } else {
        print!("{}", links::render_plain(&analysis.to_markdown()));
    }
    Ok(())
}
