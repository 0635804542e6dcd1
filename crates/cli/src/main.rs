use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "propbot")]
#[command(about = "Propbot CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: PROPBOT_CONFIG_PATH or ~/.propbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the bot service (Telegram connector + HTTP health/webhook server).
    Serve {
        /// Config file path (default: PROPBOT_CONFIG_PATH or ~/.propbot/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 15180)
        #[arg(long, short)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("propbot {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve { config, port }) => {
            if let Err(e) = run_serve(config, port).await {
                log::error!("serve failed: {}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let _dir = lib::init::init_config_dir(&path)?;
    println!(
        "initialized configuration at {}",
        path.parent().unwrap_or(std::path::Path::new(".")).display()
    );
    Ok(())
}

async fn run_serve(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, _path) = lib::config::load_config(config_path)?;
    if let Some(p) = port {
        config.server.port = p;
    }
    log::info!(
        "starting bot service on {}:{}",
        config.server.bind,
        config.server.port
    );
    lib::server::run_server(config).await
}
