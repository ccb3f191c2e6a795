use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use chrono::Datelike;
use clap::Parser;
use project_start_core::conduit::ConduitClient;
use project_start_core::config::{DEFAULT_CONFIG_PATH, load_config};
use project_start_core::logging::{DEFAULT_LOG_FILE, init_logging};
use project_start_core::mediawiki::{MediaWikiClient, MediaWikiClientConfig, WikiApi};
use project_start_core::publish::Component;
use project_start_core::run::{RunOptions, load_inputs, run};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "project-start",
    version,
    about = "Create the year's projects on the wiki and on Phabricator"
)]
struct Cli {
    #[arg(
        value_name = "PROJECT_FILE",
        help = "Tab separated project information"
    )]
    project_file: PathBuf,
    #[arg(value_name = "GOAL_FILE", help = "Tab separated project goals")]
    goal_file: PathBuf,
    #[arg(short = 'c', long, value_name = "PATH", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[arg(
        short = 'y',
        long,
        help = "Year for the projects created. Defaults to the current year"
    )]
    year: Option<i32>,
    #[arg(short = 'd', long, help = "Don't write anything to the wiki or Phabricator")]
    dry_run: bool,
    #[arg(short = 'v', long, help = "Print all logging messages")]
    verbose: bool,
    #[arg(short = 'w', long, help = "Write to the wiki even if pages exist")]
    overwrite_wiki: bool,
    #[arg(short = 'p', long, help = "Ask before writing each year page")]
    prompt: bool,
    #[arg(
        long,
        value_name = "NUMBER",
        help = "Only start this project; year pages must then be updated by hand"
    )]
    project: Option<String>,
    #[arg(
        long = "component",
        value_name = "COMPONENT",
        help = "Only write these project pages: main, categories or a subpage title. Repeatable"
    )]
    components: Vec<String>,
    #[arg(long, value_name = "PATH", default_value = DEFAULT_LOG_FILE)]
    log_file: PathBuf,
}

fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose, &cli.log_file)?;

    info!("Creating projects.");
    let config = load_config(&cli.config)?;
    info!("Loaded config from '{}'", cli.config.display());
    let inputs = load_inputs(&config, &cli.project_file, &cli.goal_file)?;

    let options = RunOptions {
        year: cli.year.unwrap_or_else(|| chrono::Local::now().year()),
        dry_run: cli.dry_run,
        overwrite: cli.overwrite_wiki,
        prompt: cli.prompt,
        project: cli.project,
        components: cli
            .components
            .iter()
            .map(|component| Component::parse(component))
            .collect(),
    };
    if options.dry_run {
        info!("Dry run: nothing will be written.");
    }

    let mut wiki = MediaWikiClient::new(MediaWikiClientConfig::from_config(&config.wiki)?)?;
    if !options.dry_run {
        login(&mut wiki)?;
    }
    let mut tracker = ConduitClient::new(&config.phab)?;

    let report = run(&config, &options, &inputs, &mut wiki, &mut tracker);
    info!(
        "Started {} projects, touched {} pages, {} wiki requests.",
        report.started_projects.len(),
        report.touched_pages.len(),
        wiki.request_count()
    );
    if report.has_errors() {
        warn!("Finished with {} errors.", report.errors.len());
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn login(wiki: &mut MediaWikiClient) -> Result<()> {
    let (Ok(username), Ok(password)) = (env::var("WIKI_BOT_USER"), env::var("WIKI_BOT_PASS")) else {
        bail!("WIKI_BOT_USER and WIKI_BOT_PASS must be set to write to the wiki");
    };
    wiki.login(&username, &password)
        .with_context(|| format!("failed to log in as {username}"))?;
    info!("Logged in to the wiki as {username}.");
    Ok(())
}
