//! CLI command implementations

use anyhow::{Context as _, Result, bail};
use colored::Colorize;
use habit_core::{
    Config, Context, Coordinator, DailyTrack, DocumentStore, Error, Habit, TrackDate, User,
};
use std::path::{Path, PathBuf};
use tabled::settings::Style;
use tabled::{Table, Tabled};

/// One CLI invocation: an opened store, its config and a request deadline
struct Session {
    coordinator: Coordinator,
    ctx: Context,
}

impl Session {
    fn open() -> Result<Self> {
        let db = DocumentStore::open()?;
        let config = Config::resolve(db.data_dir())?;
        if !config.display.colors {
            colored::control::set_override(false);
        }
        let ctx = Context::with_timeout(config.op_timeout());
        tracing::debug!(timeout_ms = config.op_timeout_ms, "opened habit store");
        Ok(Self {
            coordinator: Coordinator::new(db, config),
            ctx,
        })
    }

    fn config(&self) -> &Config {
        self.coordinator.config()
    }

    /// Resolve the acting user from --user / HABIT_USER
    fn user(&self, username: Option<&str>) -> Result<User> {
        let Some(username) = username else {
            bail!("No user given. Pass --user <name> or set HABIT_USER.");
        };
        Ok(self.coordinator.find_user(&self.ctx, username)?)
    }

    fn date(&self, date: Option<&str>) -> Result<TrackDate> {
        match date {
            Some(date) => Ok(date.parse()?),
            None => Ok(self.coordinator.today()),
        }
    }
}

#[derive(Tabled)]
struct HabitRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Habit")]
    name: String,
    #[tabled(rename = "Since")]
    since: String,
}

impl From<&Habit> for HabitRow {
    fn from(habit: &Habit) -> Self {
        Self {
            id: habit.id.clone(),
            name: habit.name.clone(),
            since: habit.created_at.format("%Y-%m-%d").to_string(),
        }
    }
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "")]
    mark: String,
    #[tabled(rename = "Habit")]
    name: String,
    #[tabled(rename = "ID")]
    id: String,
}

fn user_json(user: &User) -> serde_json::Value {
    serde_json::json!({
        "id": user.id,
        "username": user.username,
        "points": user.points,
        "created_at": user.created_at,
    })
}

pub fn init() -> Result<()> {
    let root = std::env::current_dir()?;
    let store = DocumentStore::init(&root)?;
    let data_dir = store
        .data_dir()
        .context("initialized store has no data directory")?;
    println!(
        "{} Initialized habit in {}",
        "✓".green(),
        data_dir.display()
    );
    Ok(())
}

pub fn signup(username: &str, password_hash: &str, json: bool) -> Result<()> {
    let session = Session::open()?;
    let user = session
        .coordinator
        .sign_up(&session.ctx, username, password_hash)?;

    if json {
        println!("{}", user_json(&user));
    } else {
        println!("{} Signed up {} ({})", "✓".green(), user.username.bold(), user.id);
        println!("  Use it with: --user {}", user.username);
    }
    Ok(())
}

pub fn whoami(username: Option<&str>, json: bool) -> Result<()> {
    let session = Session::open()?;
    let user = session.user(username)?;

    if json {
        println!("{}", user_json(&user));
    } else {
        println!("{} {}", user.username.cyan().bold(), user.id.dimmed());
        println!("Points: {}", user.points.to_string().yellow());
        println!("Joined: {}", user.created_at.format("%Y-%m-%d"));
    }
    Ok(())
}

pub fn habit_add(username: Option<&str>, name: &str, json: bool) -> Result<()> {
    let session = Session::open()?;
    let user = session.user(username)?;
    let habit = session
        .coordinator
        .register_habit(&session.ctx, &user.id, name)?;

    if json {
        println!("{}", serde_json::to_string(&habit)?);
    } else {
        println!("{} Registered habit: {}", "✓".green(), habit.id);
        println!("  Name: {}", habit.name);
    }
    Ok(())
}

pub fn habit_list(username: Option<&str>, json: bool) -> Result<()> {
    let session = Session::open()?;
    let user = session.user(username)?;
    let habits = session.coordinator.list_habits(&session.ctx, &user.id)?;

    if json {
        println!("{}", serde_json::to_string(&habits)?);
    } else if habits.is_empty() {
        println!("No habits yet");
    } else {
        let rows: Vec<HabitRow> = habits.iter().map(HabitRow::from).collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
    }
    Ok(())
}

pub fn habit_rm(username: Option<&str>, id: &str, json: bool) -> Result<()> {
    let session = Session::open()?;
    let user = session.user(username)?;
    session.coordinator.delete_habit(&session.ctx, &user.id, id)?;

    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("{} Deleted {}", "✓".green(), id);
    }
    Ok(())
}

fn print_track(track: &DailyTrack, config: &Config) {
    println!(
        "{} {}  ({}/{} done)",
        "Track".bold(),
        track.date.to_string().cyan(),
        track.done_count(),
        track.habit_statuses.len()
    );

    if track.habit_statuses.is_empty() {
        println!("No habits tracked for this day");
        return;
    }

    let rows: Vec<StatusRow> = track
        .habit_statuses
        .iter()
        .map(|status| StatusRow {
            mark: if status.done {
                config.display.done_marker.clone()
            } else {
                config.display.pending_marker.clone()
            },
            name: status.habit_name.clone(),
            id: status.habit_id.clone(),
        })
        .collect();
    println!("{}", Table::new(rows).with(Style::rounded()));
}

pub fn track(username: Option<&str>, date: Option<&str>, json: bool) -> Result<()> {
    let session = Session::open()?;
    let user = session.user(username)?;
    let date = session.date(date)?;
    let track = session
        .coordinator
        .get_or_create_track(&session.ctx, &user.id, &date)?;

    if json {
        println!("{}", serde_json::to_string(&track)?);
    } else {
        print_track(&track, session.config());
    }
    Ok(())
}

pub fn done(username: Option<&str>, habit_id: &str, date: Option<&str>, json: bool) -> Result<()> {
    let session = Session::open()?;
    let user = session.user(username)?;
    let date = session.date(date)?;
    let result = session
        .coordinator
        .mark_done(&session.ctx, &user.id, &date, habit_id)?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "track": result.track,
                "awarded": result.awarded,
                "points": result.points,
            })
        );
    } else if result.awarded == 0 {
        println!("{} Already done on {}", "!".yellow(), date);
        println!("  Points: {}", result.points);
    } else {
        println!(
            "{} Done! +{} points (total {})",
            "✓".green(),
            result.awarded.to_string().yellow(),
            result.points
        );
    }
    Ok(())
}

/// Locate `.habit/` without loading any collection
fn data_dir_from(start: &Path) -> Result<PathBuf> {
    let root = DocumentStore::find_root(start)?;
    Ok(root.join(habit_core::db::DATA_DIR))
}

fn data_dir() -> Result<PathBuf> {
    data_dir_from(&std::env::current_dir()?)
}

fn config_file() -> Result<PathBuf> {
    Ok(data_dir()?.join(habit_core::db::CONFIG_FILE))
}

pub fn config_show(json: bool) -> Result<()> {
    let dir = data_dir()?;
    let config = Config::resolve(Some(dir.as_path()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        println!("{}", "Current configuration:".bold());
        println!();
        println!("points_per_completion = {}", config.points_per_completion);
        println!("op_timeout_ms = {}", config.op_timeout_ms);
        println!();
        println!("[ids]");
        println!("user_prefix = \"{}\"", config.ids.user_prefix);
        println!("habit_prefix = \"{}\"", config.ids.habit_prefix);
        println!("track_prefix = \"{}\"", config.ids.track_prefix);
        println!();
        println!("[display]");
        println!("colors = {}", config.display.colors);
        println!("done_marker = \"{}\"", config.display.done_marker);
        println!("pending_marker = \"{}\"", config.display.pending_marker);
    }
    Ok(())
}

pub fn config_path() -> Result<()> {
    println!("{}", config_file()?.display());
    Ok(())
}

pub fn config_reset() -> Result<()> {
    let path = config_file()?;
    std::fs::write(&path, Config::default_with_comments())?;
    println!("{} Configuration reset to defaults", "✓".green());
    Ok(())
}

/// Map a failure onto a process exit status
pub fn exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>().map(Error::kind) {
        Some("not_found") => 2,
        Some("already_exists") => 3,
        Some("conflict") => 4,
        Some("invalid_argument") => 5,
        Some("unavailable") | Some("not_initialized") => 6,
        Some("deadline_exceeded") | Some("cancelled") => 7,
        _ => 1,
    }
}

fn error_json(err: &anyhow::Error) -> serde_json::Value {
    let core = err.downcast_ref::<Error>();
    serde_json::json!({
        "error": core.map_or("internal", Error::kind),
        "message": format!("{err:#}"),
        "retryable": core.is_some_and(Error::is_retryable),
    })
}

pub fn report_error(err: &anyhow::Error, json: bool) {
    if json {
        println!("{}", error_json(err));
        return;
    }

    let core = err.downcast_ref::<Error>();
    eprintln!("{} {:#}", "error:".red().bold(), err);
    if core.is_some_and(Error::is_retryable) {
        eprintln!("  The store was busy; running the command again should succeed.");
    }
}
