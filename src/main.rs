use clap::{Args, Parser, Subcommand};
use rabindra::config::AppConfig;
use rabindra::loader::DataSource;
use std::io::{self, BufRead};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rabindra", version)]
#[command(about = "Bengali song search, rhyme finder and poetry generator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the web server (the default)
    Serve(ServeArgs),
    /// Print an argon2 hash for RABINDRA_ADMINS
    HashPassword {
        /// Password to hash; read from stdin when omitted
        password: Option<String>,
    },
}

#[derive(Args, Default)]
struct ServeArgs {
    /// Address to listen on
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Song sheet: CSV path or export URL
    #[arg(long)]
    songs: Option<String>,

    /// Rhyme word sheet: CSV path or export URL
    #[arg(long)]
    words: Option<String>,

    /// Directory for the library snapshot
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Ignore the snapshot and read the sheets again
    #[arg(long)]
    refresh: bool,
}

impl ServeArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(songs) = &self.songs {
            config.songs = Some(DataSource::parse(songs));
        }
        if let Some(words) = &self.words {
            config.words = Some(DataSource::parse(words));
        }
        if let Some(cache_dir) = &self.cache_dir {
            config.cache_dir = cache_dir.clone();
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rabindra=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn read_password(password: Option<String>) -> io::Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve(ServeArgs::default())) {
        Commands::Serve(args) => {
            let mut config = AppConfig::from_env()?;
            args.apply(&mut config);
            rabindra::app::run(config, args.refresh).await?;
        }
        Commands::HashPassword { password } => {
            let password = read_password(password)?;
            if password.is_empty() {
                return Err("password must not be empty".into());
            }
            println!("{}", rabindra::login::hash_password(&password)?);
        }
    }

    Ok(())
}
