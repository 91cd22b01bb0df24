//! newshound CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use newshound::{
    commands::{
        cmd_discover, cmd_import_sites, cmd_init, cmd_list_sites, cmd_onboard_content,
        cmd_onboard_listing, cmd_pause, cmd_queue_claim, cmd_queue_mark, cmd_reschedule,
        cmd_resume, cmd_runs, cmd_schedule_status, cmd_serve, cmd_show_site, cmd_urls,
        print_claimed, print_content_onboarding, print_discovery_reports, print_import_stats,
        print_init, print_listing_onboarding, print_runs, print_schedule_status, print_site,
        print_site_completions, print_sites, print_urls, AppContext, DiscoverTarget,
        OnboardOptions,
    },
    config::Config,
    error::{Error, Result},
    meta::{PageRequest, TrackingStatus},
    progress::LogWriterFactory,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "newshound")]
#[command(version, about = "Adaptive news discovery with LLM-assisted selector inference", long_about = None)]
struct Cli {
    /// Base directory or config file (default ~/.newshound)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON (logs go to stderr as JSON lines)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize newshound configuration and database
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Manage monitored sites
    Sites {
        #[command(subcommand)]
        action: SitesAction,
    },

    /// Run discovery now
    Discover {
        /// Site ID
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        site: Option<String>,

        /// Every active site
        #[arg(long)]
        all: bool,
    },

    /// Pause scheduled discovery for a site
    Pause { site: String },

    /// Resume scheduled discovery for a site
    Resume { site: String },

    /// Recompute a site's next due time
    Reschedule { site: String },

    /// Show a site's schedule
    Status { site: String },

    /// List discovery runs, newest first
    Runs {
        /// Only runs of this site
        #[arg(long)]
        site: Option<String>,

        #[arg(long, default_value = "1")]
        page: u32,

        #[arg(long, default_value = "20")]
        per_page: u32,
    },

    /// List tracked URLs of a site
    Urls {
        site: String,

        /// Only records in this status
        #[arg(long)]
        status: Option<TrackingStatus>,

        #[arg(long, default_value = "1")]
        page: u32,

        #[arg(long, default_value = "20")]
        per_page: u32,
    },

    /// Hand queued URLs to content extraction
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },

    /// Infer and validate selectors with the language model
    Onboard {
        #[command(subcommand)]
        target: OnboardTarget,
    },

    /// Schedule every active site and run until Ctrl-C
    Serve,

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum SitesAction {
    /// Create or update sites from a TOML file of [[sites]] tables
    Import { file: PathBuf },

    /// List sites
    List {
        /// Print only site IDs
        #[arg(long)]
        ids_only: bool,

        /// Print site IDs formatted for shell completion
        #[arg(long, value_enum, hide = true)]
        completion: Option<Shell>,
    },

    /// Show one site
    Show { site: String },
}

#[derive(Subcommand)]
enum QueueAction {
    /// Move queued URLs to processing and print them
    Claim {
        #[arg(short, long, default_value = "10")]
        limit: u32,
    },

    /// Record the extraction outcome of a URL
    Mark {
        /// Tracking record ID
        id: String,

        /// completed, failed or skipped
        status: TrackingStatus,

        /// Failure reason
        #[arg(long)]
        failure: Option<String>,

        /// Downstream content record ID
        #[arg(long)]
        content_id: Option<String>,
    },
}

#[derive(Subcommand)]
enum OnboardTarget {
    /// Propose a listing link selector for a listing page
    Listing {
        url: String,

        /// Use this site's fetch settings
        #[arg(long)]
        site: Option<String>,

        /// Save the selector to --site when it validates
        #[arg(long, requires = "site")]
        apply: bool,
    },

    /// Propose content selectors for an article page
    Content {
        url: String,

        #[arg(long)]
        site: Option<String>,

        #[arg(long, requires = "site")]
        apply: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let (plain, json) = if cli.json {
        (None, Some(fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (Some(fmt::layer().with_writer(LogWriterFactory)), None)
    };
    tracing_subscriber::registry()
        .with(plain)
        .with(json)
        .with(filter)
        .init();

    let base_dir = cli.config.as_deref().map(resolve_base_dir);

    match cli.command {
        Commands::Init { force } => {
            let summary = cmd_init(base_dir, force).await?;
            output(cli.json, &summary, print_init)?;
            return Ok(());
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "newshound", &mut std::io::stdout());
            print_completion_extras(shell);
            return Ok(());
        }
        _ => {}
    }

    let config = Config::load_from(base_dir)?;
    if !config.is_initialized() {
        return Err(Error::NotInitialized);
    }
    let ctx = AppContext::open(config).await?;

    let result = dispatch(&ctx, cli.command, cli.json).await;
    if let Err(e) = ctx.close().await {
        tracing::warn!("Browser shutdown failed: {}", e);
    }
    result
}

async fn dispatch(ctx: &AppContext, command: Commands, json: bool) -> Result<()> {
    match command {
        // Handled before the context is opened
        Commands::Init { .. } | Commands::Completions { .. } => {}

        Commands::Sites { action } => match action {
            SitesAction::Import { file } => {
                let stats = cmd_import_sites(&ctx.db, &file, &ctx.config).await?;
                output(json, &stats, print_import_stats)?;
            }
            SitesAction::List {
                ids_only,
                completion,
            } => {
                let sites = cmd_list_sites(&ctx.db).await?;
                if let Some(shell) = completion {
                    print_site_completions(&sites, shell);
                } else if ids_only {
                    for info in &sites {
                        println!("{}", info.site.id);
                    }
                } else {
                    output(json, &sites, |s| print_sites(s))?;
                }
            }
            SitesAction::Show { site } => {
                let info = cmd_show_site(&ctx.db, &site).await?;
                output(json, &info, print_site)?;
            }
        },

        Commands::Discover { site, .. } => {
            let target = match site {
                Some(id) => DiscoverTarget::Site(id),
                None => DiscoverTarget::AllActive,
            };
            let scheduler = ctx.scheduler();
            let reports = cmd_discover(&ctx.db, &scheduler, target).await;
            scheduler.shutdown().await;
            let reports = reports?;
            output(json, &reports, |r| print_discovery_reports(r))?;
        }

        Commands::Pause { site } => {
            let status = cmd_pause(&ctx.db, &site).await?;
            output(json, &status, print_schedule_status)?;
        }
        Commands::Resume { site } => {
            let status = cmd_resume(&ctx.db, &site).await?;
            output(json, &status, print_schedule_status)?;
        }
        Commands::Reschedule { site } => {
            let status = cmd_reschedule(&ctx.db, &site).await?;
            output(json, &status, print_schedule_status)?;
        }
        Commands::Status { site } => {
            let status = cmd_schedule_status(&ctx.db, &site).await?;
            output(json, &status, print_schedule_status)?;
        }

        Commands::Runs {
            site,
            page,
            per_page,
        } => {
            let runs = cmd_runs(&ctx.db, site.as_deref(), PageRequest::new(page, per_page)).await?;
            output(json, &runs, print_runs)?;
        }
        Commands::Urls {
            site,
            status,
            page,
            per_page,
        } => {
            let listing = cmd_urls(&ctx.db, &site, status, PageRequest::new(page, per_page)).await?;
            output(json, &listing, print_urls)?;
        }

        Commands::Queue { action } => match action {
            QueueAction::Claim { limit } => {
                let claimed = cmd_queue_claim(&ctx.db, limit).await?;
                output(json, &claimed, |c| print_claimed(c))?;
            }
            QueueAction::Mark {
                id,
                status,
                failure,
                content_id,
            } => {
                let record = cmd_queue_mark(
                    &ctx.db,
                    &id,
                    status,
                    failure.as_deref(),
                    content_id.as_deref(),
                )
                .await?;
                output(json, &record, |r| println!("✓ {} is now {}", r.url, r.status))?;
            }
        },

        Commands::Onboard { target } => match target {
            OnboardTarget::Listing { url, site, apply } => {
                let applied_to = site.clone().filter(|_| apply);
                let report = cmd_onboard_listing(
                    &ctx.config,
                    &ctx.db,
                    ctx.fetcher.clone(),
                    &url,
                    OnboardOptions { site_id: site, apply },
                )
                .await?;
                output(json, &report, |r| print_listing_onboarding(r, applied_to.as_deref()))?;
                if !report.valid {
                    return Err(Error::Validation(report.message));
                }
            }
            OnboardTarget::Content { url, site, apply } => {
                let applied_to = site.clone().filter(|_| apply);
                let report = cmd_onboard_content(
                    &ctx.config,
                    &ctx.db,
                    ctx.fetcher.clone(),
                    &url,
                    OnboardOptions { site_id: site, apply },
                )
                .await?;
                output(json, &report, |r| print_content_onboarding(r, applied_to.as_deref()))?;
                if !report.valid {
                    return Err(Error::Validation(report.message));
                }
            }
        },

        Commands::Serve => {
            cmd_serve(&ctx.scheduler(), ctx.config.scheduler.sync_interval()).await?;
        }
    }

    Ok(())
}

/// `--config` may name the directory or the config file inside it
fn resolve_base_dir(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|e| e == "toml") {
        path.parent()
            .map(PathBuf::from)
            .unwrap_or_else(Config::default_base_dir)
    } else {
        path.to_path_buf()
    }
}

fn output<T: Serialize + ?Sized>(json: bool, value: &T, print: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

fn print_completion_extras(shell: Shell) {
    const COMMANDS: &str = "show discover pause resume reschedule status urls";
    match shell {
        Shell::Bash => {
            println!();
            println!("# Dynamic completion of site IDs");
            println!("_newshound_sites() {{");
            println!("    local cur=\"${{COMP_WORDS[COMP_CWORD]}}\" prev=\"${{COMP_WORDS[COMP_CWORD-1]}}\"");
            println!("    case \" {} \" in", COMMANDS);
            println!("        *\" $prev \"*)");
            println!("            COMPREPLY=( $(compgen -W \"$(newshound sites list --completion bash 2>/dev/null)\" -- \"$cur\") )");
            println!("            return 0 ;;");
            println!("    esac");
            println!("    _newshound \"$@\"");
            println!("}}");
            println!("complete -F _newshound_sites -o bashdefault -o default newshound");
        }
        Shell::Zsh => {
            println!();
            println!("# Dynamic completion of site IDs");
            println!("_newshound_site_ids() {{");
            println!("    local -a entries");
            println!("    entries=(\"${{(@f)$(newshound sites list --completion zsh 2>/dev/null)}}\")");
            println!("    _describe -t sites 'site ids' entries");
            println!("}}");
            for command in COMMANDS.split(' ') {
                println!("compdef _newshound_site_ids 'newshound {}'", command);
            }
        }
        Shell::Fish => {
            println!();
            println!("# Dynamic completion of site IDs");
            println!(
                "complete -c newshound -n '__fish_seen_subcommand_from {}' -a '(newshound sites list --completion fish 2>/dev/null)'",
                COMMANDS
            );
        }
        _ => {}
    }
}
