//! smartcheck CLI - Main Entry Point

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use smartcheck_common::ranking::recommend_batch;
use smartcheck_common::{
    default_config_path, tables, AccountProfile, HarnessConfig, OutputTable, StoryCatalogue,
};
use smartcheck_e2e::report::{self, OutputFormat};
use smartcheck_e2e::{compare_tables, HarnessRunner, LoginScript, PlaywrightDriver, RunTables};

/// smartcheck - regression harness for personalised recommendation pages
#[derive(Parser)]
#[command(name = "smartcheck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, env = "SMARTCHECK_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive the browser through every expected row and compare
    Run(RunArgs),

    /// Run the story recommendation pass only
    Stories {
        /// Account profiles table
        #[arg(long)]
        profiles: Option<PathBuf>,

        /// Story catalogue table
        #[arg(long)]
        catalogue: Option<PathBuf>,

        /// Seed for random combination picks
        #[arg(long)]
        seed: Option<u64>,

        #[arg(long, default_value = "table")]
        format: OutputFormat,
    },

    /// Compare an expected table against a previous run's output table
    Diff {
        /// Output table written by `run`
        actual: PathBuf,

        /// Expected table (defaults to paths.expected)
        #[arg(long)]
        expected: Option<PathBuf>,
    },

    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Expected table (defaults to paths.expected)
    #[arg(long)]
    expected: Option<PathBuf>,

    /// Directory for result files
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Seconds to wait for all captured responses
    #[arg(long)]
    response_timeout_secs: Option<u64>,

    /// Seconds to wait for the page content
    #[arg(long)]
    dom_timeout_secs: Option<u64>,

    /// Attempts per account/locale pair
    #[arg(long)]
    attempts: Option<u32>,

    /// Seed for random combination picks
    #[arg(long)]
    seed: Option<u64>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Login script (YAML)
    #[arg(long)]
    login_script: Option<PathBuf>,
}

impl RunArgs {
    fn apply(&self, config: &mut HarnessConfig) {
        if let Some(path) = &self.expected {
            config.paths.expected = path.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.paths.output_dir = dir.clone();
        }
        if let Some(secs) = self.response_timeout_secs {
            config.timeouts.response_wait_secs = secs;
        }
        if let Some(secs) = self.dom_timeout_secs {
            config.timeouts.dom_ready_secs = secs;
        }
        if let Some(attempts) = self.attempts {
            config.retry.max_attempts = attempts;
        }
        if self.seed.is_some() {
            config.ranking.seed = self.seed;
        }
        if self.headed {
            config.browser.headless = false;
        }
        if let Some(path) = &self.login_script {
            config.page.login_script = Some(path.clone());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let config_path = cli.config.unwrap_or_else(default_config_path);

    let clean = match cli.command {
        Commands::Run(args) => {
            let mut config = HarnessConfig::load(&config_path)?;
            args.apply(&mut config);
            config.validate()?;
            run(config).await?
        }
        Commands::Stories {
            profiles,
            catalogue,
            seed,
            format,
        } => {
            let mut config = HarnessConfig::load(&config_path)?;
            if seed.is_some() {
                config.ranking.seed = seed;
            }
            let profiles_path = profiles
                .or(config.paths.profiles.clone())
                .context("no account profiles table given")?;
            let catalogue_path = catalogue
                .or(config.paths.stories.clone())
                .context("no story catalogue given")?;

            let profiles: Vec<AccountProfile> = tables::load(&profiles_path)?;
            let catalogue: StoryCatalogue = tables::load(&catalogue_path)?;
            let stories = recommend_batch(&profiles, &catalogue, &config.ranking);
            println!("{}", report::render_stories(&stories, format)?);
            true
        }
        Commands::Diff { actual, expected } => {
            let config = HarnessConfig::load(&config_path)?;
            diff(&config, expected.as_deref().unwrap_or(&config.paths.expected), &actual)?
        }
        Commands::InitConfig { force } => {
            if config_path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", config_path.display());
            }
            HarnessConfig::default().save(&config_path)?;
            println!("Wrote {}", config_path.display());
            true
        }
    };

    if !clean {
        std::process::exit(1);
    }
    Ok(())
}

/// Full browser run; `false` when any field mismatched
async fn run(config: HarnessConfig) -> anyhow::Result<bool> {
    let expected = tables::load_expected(&config.paths.expected, &config.expected_defaults)
        .with_context(|| format!("loading expected table {}", config.paths.expected.display()))?;
    let run_tables = RunTables::load(&config)?;
    let script = match &config.page.login_script {
        Some(path) => LoginScript::from_file(path)?,
        None => LoginScript::navigate_only(),
    };
    info!("Login script: {} ({} step(s))", script.name, script.steps.len());

    let driver = PlaywrightDriver::new(config.browser.clone()).await?;
    let output_dir = config.paths.output_dir.clone();
    let runner = HarnessRunner::new(Arc::new(config), Arc::new(driver), script, run_tables);

    let run_report = runner.run(&expected).await?;
    report::write_outputs(&output_dir, &run_report)?;

    print!("{}", report::render_summary(&run_report));
    if let Some(details) = report::render_mismatches(&run_report.comparison) {
        println!("{details}");
    }
    Ok(run_report.summary.mismatched == 0)
}

/// Offline comparison; `false` when any field mismatched
fn diff(config: &HarnessConfig, expected: &Path, actual: &Path) -> anyhow::Result<bool> {
    let expected = tables::load_expected(expected, &config.expected_defaults)?;
    let output: OutputTable = tables::load(actual)?;

    let filter = tables::load_optional(config.paths.filter.as_deref())?;
    let comparison = compare_tables(&config.diff, &filter, &expected, &output.records());

    let summary = comparison.summary();
    println!(
        "{} identities, {} fields: {} matched, {} mismatched",
        summary.identities, summary.rows, summary.matched, summary.mismatched
    );
    if let Some(details) = report::render_mismatches(&comparison) {
        println!("{details}");
    }
    Ok(summary.mismatched == 0)
}
