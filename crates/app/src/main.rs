use std::fmt;

use chrono::Duration;
use progress_core::model::{AccessTier, LessonId, LevelId, UserId};
use progress_core::rules::ProgressionRules;
use serde_json::Value;
use services::{AppServices, Clock, DEFAULT_RANKING_LIMIT};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug)]
enum ArgsError {
    MissingCommand,
    UnknownCommand(String),
    MissingValue { flag: &'static str },
    MissingFlag { flag: &'static str },
    UnknownArg(String),
    InvalidNumber { flag: &'static str, raw: String },
    InvalidDbUrl { raw: String },
    InvalidTier { raw: String },
    InvalidRankingKind { raw: String },
    InvalidEnv { name: &'static str, raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingCommand => write!(f, "a command is required"),
            ArgsError::UnknownCommand(cmd) => write!(f, "unknown command: {cmd}"),
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingFlag { flag } => write!(f, "{flag} is required for this command"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidNumber { flag, raw } => write!(f, "invalid {flag} value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidTier { raw } => {
                write!(f, "invalid --tier value (expected free|premium): {raw}")
            }
            ArgsError::InvalidRankingKind { raw } => {
                write!(f, "invalid --by value (expected xp|streak): {raw}")
            }
            ArgsError::InvalidEnv { name, raw } => write!(f, "invalid {name} value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn parse_number<T: std::str::FromStr>(flag: &'static str, raw: String) -> Result<T, ArgsError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| ArgsError::InvalidNumber { flag, raw })
}

fn required<T>(value: Option<T>, flag: &'static str) -> Result<T, ArgsError> {
    value.ok_or(ArgsError::MissingFlag { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- <command> [--db <sqlite_url>] [options]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  status      --user <id>");
    eprintln!("  mistake     --user <id>");
    eprintln!("  checkpoint  --user <id> --lesson <id> --order <n>");
    eprintln!("  complete    --user <id> --lesson <id> --score <0..100>");
    eprintln!("  trail       --user <id> [--language <code>]   (default: nhaneca)");
    eprintln!("  grid        --user <id> --level <id>");
    eprintln!("  resume      --user <id> --lesson <id>");
    eprintln!("  ranking     [--by xp|streak] [--limit <n>]   (default: xp, 10)");
    eprintln!("  position    --user <id>");
    eprintln!("  provision   --user <id> [--tier free|premium]");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite://progression.sqlite3");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PROGRESSION_DB_URL, PROGRESSION_REGEN_MINUTES, PROGRESSION_PASS_THRESHOLD,");
    eprintln!("  PROGRESSION_MAX_HEARTS, RUST_LOG (default: info, written to stderr)");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Status,
    Mistake,
    Checkpoint,
    Complete,
    Trail,
    Grid,
    Resume,
    Ranking,
    Position,
    Provision,
}

impl Command {
    fn from_arg(arg: &str) -> Option<Self> {
        match arg {
            "status" => Some(Self::Status),
            "mistake" => Some(Self::Mistake),
            "checkpoint" => Some(Self::Checkpoint),
            "complete" => Some(Self::Complete),
            "trail" => Some(Self::Trail),
            "grid" => Some(Self::Grid),
            "resume" => Some(Self::Resume),
            "ranking" => Some(Self::Ranking),
            "position" => Some(Self::Position),
            "provision" => Some(Self::Provision),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RankingKind {
    Xp,
    Streak,
}

struct Args {
    command: Command,
    db_url: String,
    user: Option<UserId>,
    lesson: Option<LessonId>,
    level: Option<LevelId>,
    order: Option<i64>,
    score: Option<i64>,
    language: String,
    tier: AccessTier,
    ranking: RankingKind,
    limit: u32,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let first = args.next().ok_or(ArgsError::MissingCommand)?;
        if matches!(first.as_str(), "--help" | "-h") {
            print_usage();
            std::process::exit(0);
        }
        let command =
            Command::from_arg(&first).ok_or_else(|| ArgsError::UnknownCommand(first.clone()))?;

        let mut parsed = Self {
            command,
            db_url: std::env::var("PROGRESSION_DB_URL")
                .ok()
                .map_or_else(|| "sqlite://progression.sqlite3".into(), normalize_sqlite_url),
            user: None,
            lesson: None,
            level: None,
            order: None,
            score: None,
            language: "nhaneca".into(),
            tier: AccessTier::Free,
            ranking: RankingKind::Xp,
            limit: DEFAULT_RANKING_LIMIT,
        };

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    parsed.db_url = normalize_sqlite_url(value);
                }
                "--user" => {
                    let value = require_value(&mut args, "--user")?;
                    parsed.user = Some(UserId::new(parse_number("--user", value)?));
                }
                "--lesson" => {
                    let value = require_value(&mut args, "--lesson")?;
                    parsed.lesson = Some(LessonId::new(parse_number("--lesson", value)?));
                }
                "--level" => {
                    let value = require_value(&mut args, "--level")?;
                    parsed.level = Some(LevelId::new(parse_number("--level", value)?));
                }
                // Signed so that the engine, not the parser, rejects negatives.
                "--order" => {
                    let value = require_value(&mut args, "--order")?;
                    parsed.order = Some(parse_number("--order", value)?);
                }
                "--score" => {
                    let value = require_value(&mut args, "--score")?;
                    parsed.score = Some(parse_number("--score", value)?);
                }
                "--language" => {
                    parsed.language = require_value(&mut args, "--language")?;
                }
                "--tier" => {
                    let value = require_value(&mut args, "--tier")?;
                    parsed.tier = AccessTier::parse(&value)
                        .map_err(|_| ArgsError::InvalidTier { raw: value.clone() })?;
                }
                "--by" => {
                    let value = require_value(&mut args, "--by")?;
                    parsed.ranking = match value.as_str() {
                        "xp" => RankingKind::Xp,
                        "streak" => RankingKind::Streak,
                        _ => return Err(ArgsError::InvalidRankingKind { raw: value }),
                    };
                }
                "--limit" => {
                    let value = require_value(&mut args, "--limit")?;
                    parsed.limit = parse_number("--limit", value)?;
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(parsed)
    }
}

fn env_number<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ArgsError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ArgsError::InvalidEnv { name, raw }),
        Err(_) => Ok(None),
    }
}

fn rules_from_env() -> Result<ProgressionRules, ArgsError> {
    let mut rules = ProgressionRules::default();
    if let Some(minutes) = env_number::<i64>("PROGRESSION_REGEN_MINUTES")? {
        rules = rules.with_regen_period(Duration::minutes(minutes));
    }
    if let Some(threshold) = env_number::<u8>("PROGRESSION_PASS_THRESHOLD")? {
        rules = rules.with_pass_threshold(threshold);
    }
    if let Some(max_hearts) = env_number::<u32>("PROGRESSION_MAX_HEARTS")? {
        rules = rules.with_default_max_hearts(max_hearts);
    }
    Ok(rules)
}

fn normalize_sqlite_url(raw: String) -> String {
    if raw == "sqlite::memory:" || raw.starts_with("sqlite://") || raw.contains("mode=memory") {
        return raw;
    }

    let trimmed = raw.trim().to_string();
    let path_str = trimmed
        .strip_prefix("sqlite:")
        .unwrap_or(trimmed.as_str())
        .to_string();
    let path = std::path::Path::new(&path_str);
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join(path)
    };
    format!("sqlite://{}", absolute.display())
}

fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    if db_url == "sqlite::memory:" || db_url.contains("mode=memory") {
        return Ok(());
    }

    let path = db_url
        .strip_prefix("sqlite://")
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        })?;
    let path = path.split('?').next().unwrap_or(path);
    if path.is_empty() {
        return Err(ArgsError::InvalidDbUrl {
            raw: db_url.to_string(),
        }
        .into());
    }

    let path = std::path::Path::new(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    if !path.exists() {
        std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(path)?;
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn dispatch(services: &AppServices, args: &Args) -> Result<Value, Box<dyn std::error::Error>> {
    let progression = services.progression();
    let ranking = services.ranking();

    let value = match args.command {
        Command::Status => {
            let user = required(args.user, "--user")?;
            serde_json::to_value(progression.get_status(user).await?)?
        }
        Command::Mistake => {
            let user = required(args.user, "--user")?;
            serde_json::to_value(progression.record_mistake(user).await?)?
        }
        Command::Checkpoint => {
            let user = required(args.user, "--user")?;
            let lesson = required(args.lesson, "--lesson")?;
            let order = required(args.order, "--order")?;
            serde_json::to_value(progression.save_checkpoint(user, lesson, order).await?)?
        }
        Command::Complete => {
            let user = required(args.user, "--user")?;
            let lesson = required(args.lesson, "--lesson")?;
            let score = required(args.score, "--score")?;
            serde_json::to_value(progression.complete_lesson(user, lesson, score).await?)?
        }
        Command::Trail => {
            let user = required(args.user, "--user")?;
            serde_json::to_value(progression.get_trail(user, &args.language).await?)?
        }
        Command::Grid => {
            let user = required(args.user, "--user")?;
            let level = required(args.level, "--level")?;
            serde_json::to_value(progression.get_unit_grid(user, level).await?)?
        }
        Command::Resume => {
            let user = required(args.user, "--user")?;
            let lesson = required(args.lesson, "--lesson")?;
            serde_json::to_value(progression.get_lesson_resume(user, lesson).await?)?
        }
        Command::Ranking => match args.ranking {
            RankingKind::Xp => serde_json::to_value(ranking.global_ranking(args.limit).await?)?,
            RankingKind::Streak => {
                serde_json::to_value(ranking.streak_ranking(args.limit).await?)?
            }
        },
        Command::Position => {
            let user = required(args.user, "--user")?;
            serde_json::to_value(ranking.user_position(user).await?)?
        }
        Command::Provision => {
            let user = required(args.user, "--user")?;
            serde_json::to_value(progression.provision_learner(user, args.tier).await?)?
        }
    };
    Ok(value)
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args = Args::parse(std::env::args().skip(1)).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;
    let rules = rules_from_env()?;

    // Open + migrate SQLite at startup.
    prepare_sqlite_file(&args.db_url)?;
    let services = AppServices::new_sqlite(&args.db_url, Clock::system(), rules).await?;
    tracing::debug!(command = ?args.command, "dispatching");

    let output = dispatch(&services, &args).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
