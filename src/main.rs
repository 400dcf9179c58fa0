use anyhow::Context;
use clap::Parser;
use nodebridge::{
    bus::BusInterface,
    config::Config,
    constants::*,
    emit_system_event,
    events::model::LogLevel,
    http::{self, AppState},
    hub::Hub,
    prompt::run_prompt,
    script::{DeclarationCompiler, ScriptCompiler},
    wire::{connect_to_targets, start_listener},
};
use std::fs;
use std::sync::Arc;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(author, version, about = "Bridge between a node wire network and HTTP / bus clients")]
struct Args {
    /// Optional path to config file (TOML)
    #[arg(short, long)]
    config: Option<String>,

    /// Enable interactive prompt mode
    #[arg(long)]
    prompt: bool,

    /// Log every wire message
    #[arg(long)]
    dump: bool,

    /// Echo forwarded messages back to the link they came from
    #[arg(long = "loop")]
    loop_back: bool,

    /// Port accepting wire links
    #[arg(short, long)]
    port: Option<u16>,

    /// Port of the HTTP front-end
    #[arg(long)]
    http_port: Option<u16>,

    /// Wire targets to connect to (`host:port` or `tcp:host;port`)
    targets: Vec<String>,
}

fn load_config(args: &Args) -> anyhow::Result<Config> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| "config.toml".to_string());
    let mut config = match fs::read_to_string(&config_path) {
        Ok(content) => {
            let cfg = Config::from_toml(&content)
                .with_context(|| format!("failed to parse config file '{}'", config_path))?;
            println!("{}Loaded config from: {}", ICON_PLACEHOLDER, config_path);
            cfg
        }
        Err(_) if args.config.is_none() => {
            println!(
                "⚠️ No config file found at '{}', falling back to default config.",
                config_path
            );
            Config::default()
        }
        Err(e) => return Err(e).with_context(|| format!("cannot read '{}'", config_path)),
    };

    // Command line takes precedence over the file.
    if let Some(p) = args.port {
        config.port = p;
    }
    let hub = config.hub.get_or_insert_with(Default::default);
    if args.dump {
        hub.dump = Some(true);
    }
    if args.loop_back {
        hub.forward_to_sender = Some(true);
    }
    if let Some(p) = args.http_port {
        config.http.get_or_insert_with(Default::default).port = Some(p);
    }
    if !args.targets.is_empty() {
        config
            .targets
            .get_or_insert_with(Vec::new)
            .extend(args.targets.iter().cloned());
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    // Events first so startup is recorded with the configured sinks.
    nodebridge::events::init_events_from_config(config.logging.as_ref()).await;
    emit_system_event!(
        "main",
        LogLevel::Info,
        "startup",
        Some(format!("version={} port={}", full_version(), config.port))
    );

    let allow_console = !args.prompt;
    let hub = Hub::new(config.hub_settings(), allow_console);
    let compiler: Arc<dyn ScriptCompiler> = Arc::new(DeclarationCompiler);

    let port = config.port;
    let listener_hub = hub.clone();
    tokio::spawn(async move {
        if let Err(e) = start_listener(port, listener_hub).await {
            eprintln!("❌ Listener error: {}", e);
        }
    });

    let _targets = connect_to_targets(
        config.targets.clone().unwrap_or_default(),
        hub.clone(),
        config.reconnect_delay(),
    );
    let _discovery = config
        .discovery_interval()
        .map(|interval| hub.spawn_discovery(interval));

    if config.http_enabled() {
        let state = AppState::new(hub.clone(), compiler.clone(), config.http_read_timeout());
        let http_port = config.http_port();
        tokio::spawn(async move {
            if let Err(e) = http::serve(http_port, state).await {
                eprintln!("❌ HTTP front-end error: {}", e);
            }
        });
        println!("{}HTTP front-end on port {}", ICON_PLACEHOLDER, http_port);
    }

    let app_name = config
        .app_name
        .clone()
        .unwrap_or_else(|| DEFAULT_APP_NAME.to_string());
    println!("🟢 {} is running on port {}. Press Ctrl+C to shut down...", app_name, port);

    if args.prompt {
        run_prompt(BusInterface::new(hub.clone()), compiler, config.clone()).await;
    } else {
        signal::ctrl_c()
            .await
            .context("failed to listen for shutdown signal")?;
    }
    println!("🛑 {} shutting down gracefully.", app_name);
    emit_system_event!("main", LogLevel::Info, "shutdown", None);
    if let Some(d) = nodebridge::events::EventDispatcher::global() {
        d.flush().await;
    }
    Ok(())
}
