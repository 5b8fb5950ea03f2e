//! habit - track daily habits and earn points
//!
//! Data lives in .habit/ as JSONL files, one per collection.

use clap::{Parser, Subcommand};
use std::process::ExitCode;

mod commands;

#[derive(Parser)]
#[command(name = "habit")]
#[command(about = "Track daily habits and earn points")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Act as this user
    #[arg(short, long, global = true, env = "HABIT_USER")]
    user: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new habit store in the current directory
    Init,

    /// Register a new user
    Signup {
        /// Username
        username: String,

        /// Credential hash to store for the user
        #[arg(long, default_value = "")]
        password_hash: String,
    },

    /// Show the current user and their points
    Whoami,

    /// Manage habits
    Habit {
        #[command(subcommand)]
        command: HabitCommands,
    },

    /// Show the track for a date (today by default), creating it if needed
    Track {
        /// Date as YYYY-MM-DD
        date: Option<String>,
    },

    /// Mark a habit done
    Done {
        /// Habit ID
        habit_id: String,

        /// Date as YYYY-MM-DD (today by default)
        #[arg(short, long)]
        date: Option<String>,
    },

    /// Show or reset configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum HabitCommands {
    /// Register a habit
    Add {
        /// Habit name
        name: String,
    },

    /// List habits
    List,

    /// Delete a habit
    Rm {
        /// Habit ID
        id: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Print the config file path
    Path,
    /// Reset to default configuration
    Reset,
}

fn init_tracing() {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let user = cli.user.as_deref();
    let json = cli.json;

    match cli.command {
        Commands::Init => commands::init(),
        Commands::Signup {
            username,
            password_hash,
        } => commands::signup(&username, &password_hash, json),
        Commands::Whoami => commands::whoami(user, json),
        Commands::Habit { command } => match command {
            HabitCommands::Add { name } => commands::habit_add(user, &name, json),
            HabitCommands::List => commands::habit_list(user, json),
            HabitCommands::Rm { id } => commands::habit_rm(user, &id, json),
        },
        Commands::Track { date } => commands::track(user, date.as_deref(), json),
        Commands::Done { habit_id, date } => commands::done(user, &habit_id, date.as_deref(), json),
        Commands::Config { command } => match command {
            Some(ConfigCommands::Show) | None => commands::config_show(json),
            Some(ConfigCommands::Path) => commands::config_path(),
            Some(ConfigCommands::Reset) => commands::config_reset(),
        },
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    let json = cli.json;

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            commands::report_error(&err, json);
            ExitCode::from(commands::exit_code(&err))
        }
    }
}
