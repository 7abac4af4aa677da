mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_FAILURE, EXIT_LOCK_ERROR, EXIT_SETTINGS_ERROR};
use glew_schema::load_settings;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "glew",
    version,
    about = "Lifecycle driver for a light Bitcoin wallet node and vault"
)]
struct Cli {
    /// Path to the settings file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to the wallet data directory.
    #[arg(long, default_value = "~/.local/share/glew", global = true)]
    data_dir: String,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Drive the wallet engine from lifecycle signals read from a script or stdin.
    ///
    /// Signals: foreground, background, terminate, bg-task, expire, suspend,
    /// status, sleep <ms>, wait <state>.
    Run {
        /// Signal script; stdin when omitted.
        #[arg(long)]
        script: Option<PathBuf>,
        /// Engine backend, overriding the settings file.
        #[arg(long, value_parser = ["launcher", "preview"])]
        backend: Option<String>,
    },
    /// Create a new wallet and print its recovery words.
    NewWallet {
        /// Chain checkpoint year to scan from.
        #[arg(long)]
        year: Option<u16>,
    },
    /// Recover a wallet from hex-encoded entropy.
    Recover {
        /// Wallet entropy as hex.
        #[arg(long)]
        entropy: String,
        /// Chain checkpoint year to scan from.
        #[arg(long)]
        year: Option<u16>,
    },
    /// List the selectable wallet birth years.
    Years,
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the given directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    match &cli.command {
        Commands::Completions { shell } => {
            return finish(commands::completions::run::<Cli>(*shell));
        }
        Commands::ManPages { dir } => return finish(commands::man_pages::run::<Cli>(dir)),
        _ => {}
    }

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| expand_tilde("~/.config/glew/glew.toml"));
    let settings = load_settings(&config_path);

    let default_level = if cli.trace {
        "trace".to_owned()
    } else if cli.verbose {
        "debug".to_owned()
    } else {
        settings
            .as_ref()
            .map_or_else(|_| "warn".to_owned(), |s| s.logging.level.clone())
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("GLEW_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();

    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: settings error: {} ({e})", config_path.display());
            return ExitCode::from(EXIT_SETTINGS_ERROR);
        }
    };
    let data_dir = expand_tilde(&cli.data_dir);
    let json_output = cli.json;

    let result = match cli.command {
        Commands::Run { script, backend } => commands::run::run(
            &settings,
            &data_dir,
            script.as_deref(),
            backend.as_deref(),
            json_output,
        ),
        Commands::NewWallet { year } => {
            commands::new_wallet::run(&settings, &data_dir, year, json_output)
        }
        Commands::Recover { entropy, year } => {
            commands::recover::run(&settings, &data_dir, &entropy, year, json_output)
        }
        Commands::Years => commands::years::run(&settings, json_output),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };
    finish(result)
}

fn finish(result: Result<u8, String>) -> ExitCode {
    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("settings error:") {
                EXIT_SETTINGS_ERROR
            } else if msg.starts_with("data dir lock:") {
                EXIT_LOCK_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}

fn expand_tilde(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
