use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flix_bus::{resolve_socket_path, UdsBus};
use flix_coordinator::config::config_path;
use flix_coordinator::{
    abort_pair, AddonRegistry, CommandLauncher, Coordinator, Discovery, EpisodeItem,
    FileRegistry, FlixConfig, MovieItem, PlayableItem, PlaybackFlow, ReplayCache, SearchItem,
    SeasonItem, ShowItem, TerminalPrompt, WaitOutcome,
};
use flix_core::logging::{init_logging, resolve_log_dir, LogSettings};
use flix_core::{ProviderId, StderrNotifier};
use flix_storage::SqlitePropertyStore;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "flix", about = "Ask installed flix providers where to play something")]
struct Cli {
    #[arg(long, default_value = "")]
    config: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value = "")]
    registry_dir: String,
    #[arg(long, default_value = "")]
    bus_socket: String,
    #[arg(long, default_value = "")]
    state_db: String,
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = false)]
    stderr: bool,
    /// Take the first answer without prompting.
    #[arg(long, default_value_t = false)]
    auto_choose: bool,
    /// Never offer or record replays.
    #[arg(long, default_value_t = false)]
    no_replay: bool,
    /// Seconds to wait for providers; 0 waits for all of them.
    #[arg(long)]
    providers_timeout: Option<u64>,
    #[arg(long)]
    resolve_timeout: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List discovered providers
    Providers,
    /// Check which providers answer
    Ping,
    /// Free-text search
    Search { query: String },
    Movie {
        tmdb_id: i64,
        title: String,
        #[arg(long)]
        year: Option<i32>,
        /// Alternative title as `<country>=<title>`
        #[arg(long = "alt-title", value_parser = parse_title)]
        titles: Vec<(String, String)>,
    },
    Show {
        tmdb_id: i64,
        show_title: String,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long = "alt-title", value_parser = parse_title)]
        titles: Vec<(String, String)>,
    },
    Season {
        tmdb_id: i64,
        show_title: String,
        season: u32,
        #[arg(long = "alt-title", value_parser = parse_title)]
        titles: Vec<(String, String)>,
    },
    Episode {
        tmdb_id: i64,
        show_title: String,
        season: u32,
        episode: u32,
        #[arg(long = "alt-title", value_parser = parse_title)]
        titles: Vec<(String, String)>,
    },
}

fn parse_title(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((country, title)) if !country.trim().is_empty() => {
            Ok((country.trim().to_string(), title.to_string()))
        }
        _ => Err(format!("expected <country>=<title>, got {input:?}")),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("flix: {err:#}");
            std::process::exit(2);
        }
    };
    let _log_guard = init_logging(&LogSettings {
        component: "flix".to_string(),
        instance: String::new(),
        log_dir: resolve_log_dir(&config.log_dir),
        debug: cli.debug,
        stderr: cli.stderr,
    });

    if let Err(err) = run(cli.command, config).await {
        error!(event = "flix_error", error = %format!("{err:#}"));
        eprintln!("flix: {err:#}");
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<FlixConfig> {
    let path = config_path(&cli.config);
    let mut config = FlixConfig::load(&path)?;
    config.apply_env();

    let overrides = [
        (&cli.registry_dir, &mut config.registry_dir),
        (&cli.bus_socket, &mut config.bus_socket),
        (&cli.state_db, &mut config.state_db),
        (&cli.log_dir, &mut config.log_dir),
    ];
    for (flag, slot) in overrides {
        if !flag.trim().is_empty() {
            *slot = flag.clone();
        }
    }
    if let Some(secs) = cli.providers_timeout {
        config.providers_timeout_secs = secs;
    }
    if let Some(secs) = cli.resolve_timeout {
        config.resolve_timeout_secs = secs;
    }
    config.auto_choose |= cli.auto_choose;
    if cli.no_replay {
        config.replay_enabled = false;
    }
    Ok(config)
}

async fn run(command: Commands, config: FlixConfig) -> Result<()> {
    let protocol = config.protocol();
    let registry: Arc<dyn AddonRegistry> = Arc::new(FileRegistry::new(config.registry_dir()));
    let discovery = Discovery::new(
        registry.clone(),
        protocol.coordinator_id.clone(),
        protocol.provider_prefix.clone(),
    );

    if let Commands::Providers = command {
        let providers = discovery
            .list_providers()
            .context("reading provider registry")?;
        for provider in &providers {
            println!("{provider}");
        }
        info!(event = "providers_listed", count = providers.len());
        return Ok(());
    }

    let socket = resolve_socket_path(&config.bus_socket);
    let bus = Arc::new(UdsBus::new(
        socket.clone(),
        protocol.coordinator_id.to_string(),
    ));
    let launcher = Arc::new(CommandLauncher::new(registry, socket));

    let (abort, signal) = abort_pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(event = "flix_interrupted");
            abort.abort();
        }
    });

    let terminal = Arc::new(TerminalPrompt::new(signal.clone()));
    let coordinator = Coordinator::new(protocol, discovery, launcher, bus)
        .with_abort(signal)
        .with_arrival_hook(Arc::new(|provider: &ProviderId, _: &Value| {
            info!(event = "provider_answered", provider = %provider);
        }));

    let item: Box<dyn PlayableItem> = match command {
        Commands::Providers => return Ok(()),
        Commands::Ping => return ping(&coordinator).await,
        Commands::Search { query } => Box::new(SearchItem { query }),
        Commands::Movie {
            tmdb_id,
            title,
            year,
            titles,
        } => Box::new(MovieItem {
            tmdb_id,
            title,
            titles: BTreeMap::from_iter(titles),
            year,
        }),
        Commands::Show {
            tmdb_id,
            show_title,
            year,
            titles,
        } => Box::new(ShowItem {
            tmdb_id,
            show_title,
            titles: BTreeMap::from_iter(titles),
            year,
        }),
        Commands::Season {
            tmdb_id,
            show_title,
            season,
            titles,
        } => Box::new(SeasonItem {
            tmdb_id,
            show_title,
            season_number: season,
            titles: BTreeMap::from_iter(titles),
        }),
        Commands::Episode {
            tmdb_id,
            show_title,
            season,
            episode,
            titles,
        } => Box::new(EpisodeItem {
            tmdb_id,
            show_title,
            season_number: season,
            episode_number: episode,
            titles: BTreeMap::from_iter(titles),
        }),
    };

    let state_db = config.state_db();
    let store = SqlitePropertyStore::open(&state_db)
        .with_context(|| format!("opening state db {}", state_db.display()))?;
    let flow = PlaybackFlow::new(coordinator, Arc::new(StderrNotifier))
        .with_replay(ReplayCache::new(Arc::new(store)))
        .with_chooser(terminal.clone())
        .with_prompt(terminal);

    let playable = flow
        .play(&*item)
        .await
        .context("no playable source")?;
    println!("{}", playable.path);
    Ok(())
}

async fn ping(coordinator: &Coordinator) -> Result<()> {
    let gathered = coordinator.ping().await?;
    for (provider, answer) in &gathered.responses {
        println!("ok       {provider} {answer}");
    }
    for provider in &gathered.missing {
        println!("missing  {provider}");
    }
    if gathered.outcome == WaitOutcome::Aborted {
        println!("(interrupted)");
    }
    Ok(())
}
