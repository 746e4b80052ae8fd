use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Arg, ArgMatches, Command};
use console::{Emoji, Term};
use log::{error, info, LevelFilter};
use simplelog::{ConfigBuilder, TerminalMode};
use tokio::sync::{mpsc, watch};

use prefect::cache::TtlCache;
use prefect::config::{Settings, DEFAULT_EVENT_SERVER};
use prefect::gate;
use prefect::gate::GateDecision;
use prefect::github::app::{AppAuthenticator, TokenSource};
use prefect::github::client::GitHubClient;
use prefect::github::events::{EventConnector, HttpEventConnector};
use prefect::github::gateway::GitHubGateway;
use prefect::locator::PrLocator;
use prefect::metadata;
use prefect::selection::selector::Selector;
use prefect::service::http;
use prefect::service::http::OpsState;
use prefect::service::metrics::Metrics;
use prefect::service::monitor::MonitorConfig;
use prefect::service::pipeline::Pipeline;
use prefect::service::scheduler::Scheduler;

// CLI params ---
const APP_ID_PARAM: &str = "app-id";
const BOT_LIST_PARAM: &str = "bot-list";
const EVENT_SERVER_PARAM: &str = "event-server";
const GITHUB_TOKEN_PARAM: &str = "github-token";
const HTTP_PORT_PARAM: &str = "http-port";
const LOG_LEVEL_PARAM: &str = "log-level";
const LOOP_DELAY_PARAM: &str = "loop-delay";
const MAX_AGE_PARAM: &str = "max-age";
const MAX_REVIEWER_LOAD_PARAM: &str = "max-reviewer-load";
const MIN_AGE_PARAM: &str = "min-age";
const PRIVATE_KEY_PARAM: &str = "private-key";
const PR_COUNT_TTL_PARAM: &str = "pr-count-ttl";
const PR_PARAM: &str = "pr";

// CLI flags ---
const DRY_RUN_FLAG: &str = "dry-run";
const SILENT_MODE_FLAG: &str = "silent-mode";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // initialize CLI access ---
    let args = setup_cli();

    // determine if console is user attended or not (ie: output is being piped into a file) ---
    let console_is_user_attended = console::user_attended();
    let silent_mode: bool = !console_is_user_attended || args.is_present(SILENT_MODE_FLAG);

    // initialize logging facade ---
    let log_level = if !silent_mode {
        // if console _is_ attended, honor selected log-level
        args.value_of_t_or_exit(LOG_LEVEL_PARAM)
    } else {
        // automatically turn off all logs if console is unattended
        // (specially useful for piping results to a file without the extra 'noise')
        LevelFilter::Off
    };
    init_logging(log_level);

    let settings = build_settings(&args);

    if let Some(pr_reference) = args.value_of(PR_PARAM) {
        run_single_shot(pr_reference, &settings, silent_mode).await
    } else {
        run_service(settings).await
    }
}

/// Long-lived service mode: monitors, sweeps, HTTP surface, until a shutdown signal arrives.
async fn run_service(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    if settings.app_id.is_none() || settings.private_key_path.is_none() {
        eprintln!(
            "Service mode needs GitHub App credentials: supply --{} and --{} (or their \
             environment variables). Aborting operation.",
            APP_ID_PARAM, PRIVATE_KEY_PARAM
        );
        process::exit(1)
    }

    let http_client = build_http_client();
    let tokens = build_token_source(&settings, &http_client);

    let gateway: Arc<dyn GitHubGateway> =
        Arc::new(GitHubClient::new(tokens, http_client.clone()));
    let cache = Arc::new(TtlCache::default());
    let metrics = Arc::new(Metrics::default());

    let selector = Selector::new(gateway.clone(), cache, settings.selector());
    let pipeline = Arc::new(Pipeline::new(
        gateway.clone(),
        selector,
        settings.gate(),
        metrics.clone(),
        settings.dry_run,
    ));

    let connector: Arc<dyn EventConnector> =
        Arc::new(HttpEventConnector::new(http_client, &settings.event_server_url));

    let mut monitor_config = MonitorConfig::default();
    monitor_config.max_reconnect_attempts = settings.max_reconnect_attempts;

    let scheduler = Scheduler::new(
        gateway,
        connector,
        pipeline,
        metrics.clone(),
        settings.loop_delay,
        monitor_config,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (manual_tx, manual_rx) = mpsc::channel(1);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received; winding down.");
            let _ = shutdown_tx.send(true);
        }
    });

    let ops_state = Arc::new(OpsState {
        metrics,
        manual_trigger: manual_tx,
    });
    let http_shutdown = shutdown_rx.clone();
    let http_port = settings.http_port;
    tokio::spawn(async move {
        if let Err(e) = http::serve(ops_state, http_port, http_shutdown).await {
            error!("{}", e);
        }
    });

    if settings.dry_run {
        info!("Running in dry-run mode; no reviewers will actually be requested.");
    }

    scheduler.run(shutdown_rx, manual_rx).await;
    Ok(())
}

/// Single-shot mode: rank reviewers for one pull request and print the table. Never writes.
async fn run_single_shot(
    pr_reference: &str, settings: &Settings, silent_mode: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let locator: PrLocator = pr_reference.parse().unwrap_or_else(|e| {
        eprintln!("{}", e);
        process::exit(1)
    });

    let http_client = build_http_client();
    let tokens = build_token_source(settings, &http_client);
    let gateway: Arc<dyn GitHubGateway> =
        Arc::new(GitHubClient::new(tokens, http_client));
    let cache = Arc::new(TtlCache::default());
    let selector = Selector::new(gateway.clone(), cache, settings.selector());

    if !silent_mode {
        let stdout = Term::stdout();
        stdout.write_line(get_logo())?;

        let paper_emoji = Emoji("📃", "*");
        let looking_glass_emoji = Emoji("🔍", "*");

        stdout.write_line(&format!("{} Target is [{}].", paper_emoji, locator))?;
        stdout.write_line(&format!("{} Ranking reviewer candidates...", looking_glass_emoji))?;
        stdout.write_line(&"=".repeat(stdout.size().1 as usize))?;
    }

    let pr = gateway.pull_request(&locator).await.unwrap_or_else(|e| {
        error!("{}", e);
        process::exit(1)
    });

    let ranked = selector.rank(&pr).await.unwrap_or_else(|e| {
        error!("{}", e);
        process::exit(1)
    });

    // result always ignores 'silent' flag
    let result_out = Term::stdout();

    if let GateDecision::Skipped(reason) = gate::evaluate(&pr, &settings.gate(), Utc::now()) {
        result_out
            .write_line(&format!("NOTE: the service itself would skip this PR ({}).", reason))?;
    }

    if ranked.is_empty() {
        result_out.write_line("No valid reviewer candidates.")?;
        return Ok(());
    }

    for (position, candidate) in ranked.iter().enumerate() {
        result_out.write_line(&format!(
            "{:>2}. {:<24} score={:<6} {}",
            position + 1,
            candidate.username(),
            candidate.final_score(),
            candidate.selection_method()
        ))?;
    }

    Ok(())
}

/// Retrieves the application's ASCII-art logo.
fn get_logo() -> &'static str {
    r#"
        ooooooooo.   ooooooooo.              .o88o.                         .
        `888   `Y88. `888   `Y88.            888 `"                       .o8
         888   .d88'  888   .d88'  .ooooo.  o888oo   .ooooo.   .ooooo.  .o888oo
         888ooo88P'   888ooo88P'  d88' `88b  888    d88' `88b d88' `"Y8   888
         888          888`88b.    888ooo888  888    888ooo888 888         888
         888          888  `88b.  888    .o  888    888    .o 888   .o8   888 .
        o888o        o888o  o888o `Y8bod8P' o888o   `Y8bod8P' `Y8bod8P'   "888"
        -------------- Review duty, assigned before anyone asks --------------
    "#
}

/// Builds the shared HTTP client used for everything octocrab does not plumb itself.
fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(metadata::user_agent())
        .build()
        .expect("Could not build the HTTP client. Aborting operation.")
}

/// Resolves the credential source, preferring App credentials over a personal token.
fn build_token_source(settings: &Settings, http_client: &reqwest::Client) -> TokenSource {
    if let (Some(app_id), Some(key_path)) = (settings.app_id, settings.private_key_path.as_ref())
    {
        let pem = std::fs::read(key_path).unwrap_or_else(|e| {
            eprintln!("Could not read private key [{}]: {}. Aborting operation.", key_path.display(), e);
            process::exit(1)
        });

        let authenticator = AppAuthenticator::new(app_id, &pem, http_client.clone())
            .unwrap_or_else(|e| {
                eprintln!("{}. Aborting operation.", e);
                process::exit(1)
            });

        return TokenSource::App(authenticator);
    }

    if let Some(token) = settings.github_token.clone() {
        return TokenSource::Personal(token);
    }

    eprintln!(
        "Missing credentials: supply --{} and --{} (service mode) or --{} (single-PR mode). \
         Aborting operation.",
        APP_ID_PARAM, PRIVATE_KEY_PARAM, GITHUB_TOKEN_PARAM
    );
    process::exit(1)
}

/// Assembles [`Settings`] from the parsed CLI arguments, exiting with a one-line diagnostic on
/// anything unparseable.
fn build_settings(args: &ArgMatches) -> Settings {
    let mut settings = Settings::default();

    settings.app_id = args.value_of(APP_ID_PARAM).map(|raw| {
        raw.parse().unwrap_or_else(|_| {
            eprintln!("--{} must be an integer, but was [{}]. Aborting operation.", APP_ID_PARAM, raw);
            process::exit(1)
        })
    });
    settings.private_key_path = args.value_of(PRIVATE_KEY_PARAM).map(PathBuf::from);
    settings.github_token = args.value_of(GITHUB_TOKEN_PARAM).map(str::to_string);

    if let Some(event_server) = args.value_of(EVENT_SERVER_PARAM) {
        settings.event_server_url = event_server.to_string();
    }

    settings.loop_delay = parse_duration_param(args, LOOP_DELAY_PARAM);
    settings.min_age = parse_duration_param(args, MIN_AGE_PARAM);
    settings.max_age = parse_duration_param(args, MAX_AGE_PARAM);
    settings.pr_count_ttl = parse_duration_param(args, PR_COUNT_TTL_PARAM);

    settings.max_reviewer_load = args.value_of(MAX_REVIEWER_LOAD_PARAM).map(|raw| {
        raw.parse().unwrap_or_else(|_| {
            eprintln!(
                "--{} must be an integer, but was [{}]. Aborting operation.",
                MAX_REVIEWER_LOAD_PARAM, raw
            );
            process::exit(1)
        })
    });

    settings.http_port = args.value_of_t_or_exit(HTTP_PORT_PARAM);

    settings.bot_logins = args
        .value_of(BOT_LIST_PARAM)
        .map(|raw| {
            raw.split(',')
                .map(|login| login.trim().to_string())
                .filter(|login| !login.is_empty())
                .collect()
        })
        .unwrap_or_default();

    settings.dry_run = args.is_present(DRY_RUN_FLAG);

    settings
}

fn parse_duration_param(args: &ArgMatches, name: &str) -> Duration {
    // defaults are wired into the CLI definition, so a value is always present
    let raw = args.value_of(name).unwrap_or_default();

    humantime::parse_duration(raw).unwrap_or_else(|e| {
        eprintln!("--{} got an invalid duration [{}]: {}. Aborting operation.", name, raw, e);
        process::exit(1)
    })
}

/// Initializes the `Log` crate's logging facade.
fn init_logging(log_level: LevelFilter) {
    simplelog::TermLogger::init(
        log_level,
        ConfigBuilder::new()
            .add_filter_allow_str(metadata::package_name())
            .set_time_to_local(true)
            .build(),
        TerminalMode::Mixed,
    )
    .unwrap() // we want to panic if the logger couldn't be initialized, so the unwrap() is adequate
}

/// Sets up the CLI for the whole application.
fn setup_cli() -> ArgMatches {
    return Command::new(metadata::package_name())
        .version(metadata::full_version())
        .author(metadata::authors())
        .about(metadata::description())
        // params start here ---
        .arg(
            Arg::new(APP_ID_PARAM)
                .long(APP_ID_PARAM)
                .env("PREFECT_APP_ID")
                .help("The GitHub App id this service authenticates as (service mode)")
                .required(false)
                .takes_value(true),
        )
        .arg(
            Arg::new(PRIVATE_KEY_PARAM)
                .long(PRIVATE_KEY_PARAM)
                .env("PREFECT_PRIVATE_KEY")
                .help("Path to the GitHub App's RS256 private key in PEM form (service mode)")
                .required(false)
                .takes_value(true),
        )
        .arg(
            Arg::new(GITHUB_TOKEN_PARAM)
                .long(GITHUB_TOKEN_PARAM)
                .short('G')
                .env("GITHUB_TOKEN")
                .help("A personal access token; accepted in place of App credentials for single-PR runs")
                .required(false)
                .takes_value(true),
        )
        .arg(
            Arg::new(PR_PARAM)
                .long(PR_PARAM)
                .short('P')
                .help(
                    "A single pull request to rank reviewers for, as \
                     'https://github.com/<owner>/<repo>/pull/<number>' or '<owner>/<repo>#<number>'. \
                     Prints the ranking and exits without assigning anyone"
                )
                .required(false)
                .takes_value(true),
        )
        .arg(
            Arg::new(EVENT_SERVER_PARAM)
                .long(EVENT_SERVER_PARAM)
                .env("PREFECT_EVENT_SERVER")
                .help("Base URL of the push-event bus the org monitors subscribe to")
                .required(false)
                .takes_value(true)
                .default_value(DEFAULT_EVENT_SERVER),
        )
        .arg(
            Arg::new(LOOP_DELAY_PARAM)
                .long(LOOP_DELAY_PARAM)
                .help("Delay between two full sweeps over every installed organization")
                .required(false)
                .takes_value(true)
                .default_value("5m"),
        )
        .arg(
            Arg::new(MIN_AGE_PARAM)
                .long(MIN_AGE_PARAM)
                .help("Lower bound of the commit/review activity window a PR must fall into")
                .required(false)
                .takes_value(true)
                .default_value("2m"),
        )
        .arg(
            Arg::new(MAX_AGE_PARAM)
                .long(MAX_AGE_PARAM)
                .help("Upper bound of the commit/review activity window; older PRs are left alone")
                .required(false)
                .takes_value(true)
                .default_value("90days"),
        )
        .arg(
            Arg::new(PR_COUNT_TTL_PARAM)
                .long(PR_COUNT_TTL_PARAM)
                .help("How long per-user open-PR counts (the workload signal) may be cached")
                .required(false)
                .takes_value(true)
                .default_value("6h"),
        )
        .arg(
            Arg::new(MAX_REVIEWER_LOAD_PARAM)
                .long(MAX_REVIEWER_LOAD_PARAM)
                .help(
                    "Optional hard ceiling on a candidate's open authored PRs; candidates above \
                     it are rejected outright instead of merely penalized"
                )
                .required(false)
                .takes_value(true),
        )
        .arg(
            Arg::new(HTTP_PORT_PARAM)
                .long(HTTP_PORT_PARAM)
                .help("Port for the operational HTTP surface (health and manual poll)")
                .required(false)
                .takes_value(true)
                .default_value("8080"),
        )
        .arg(
            Arg::new(BOT_LIST_PARAM)
                .long(BOT_LIST_PARAM)
                .help("Comma-separated logins to treat as bots on top of the built-in heuristics")
                .required(false)
                .takes_value(true),
        )
        .arg(
            Arg::new(LOG_LEVEL_PARAM)
                .long(LOG_LEVEL_PARAM)
                .short('L')
                .help("Overrides the logging verbosity for the whole application")
                .required(false)
                .takes_value(true) // redundant by specifying 'possible_values'; declared here just to keep homogeneous build structure
                .possible_values([
                    LevelFilter::Info.as_str(),
                    LevelFilter::Debug.as_str(),
                    LevelFilter::Trace.as_str(),
                    LevelFilter::Warn.as_str(),
                    LevelFilter::Error.as_str(),
                    LevelFilter::Off.as_str(),
                ])
                .ignore_case(true)
                .default_value(metadata::default_log_level().as_str())
                .conflicts_with(SILENT_MODE_FLAG),
        )
        // optional flags start here ---
        .arg(
            Arg::new(DRY_RUN_FLAG)
                .long(DRY_RUN_FLAG)
                .short('n')
                .help(
                    "Runs the full pipeline but performs no writes; every would-be assignment is \
                     only logged"
                )
                .takes_value(false),
        )
        .arg(
            Arg::new(SILENT_MODE_FLAG)
                .long(SILENT_MODE_FLAG)
                .short('s')
                .help(
                    "Marks the operation as silent, which turns off all logging and printing to stdout, \
                    with the sole exception of the ranking results. This makes it useful for piping \
                    just the results, without the added 'noise'. (NOTE: piping is automatically detected, \
                    which activates silent-mode without having to explicitly add the flag to the command)"
                )
                .takes_value(false)
                .conflicts_with(LOG_LEVEL_PARAM),
        )
        .get_matches();
}
