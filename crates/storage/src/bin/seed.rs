use std::fmt;

use progress_core::model::{
    AccessTier, Activity, ActivityId, LearnerState, Lesson, LessonId, Level, LevelId, Unit,
    UnitId, UserId,
};
use progress_core::rules::DEFAULT_MAX_HEARTS;
use storage::StorageError;
use storage::repository::Storage;

#[derive(Debug, Clone)]
struct Args {
    db_url: String,
    user_id: UserId,
    language: String,
}

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidUserId { raw: String },
    InvalidDbUrl { raw: String },
    InvalidLanguage { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidUserId { raw } => write!(f, "invalid --user-id value: {raw}"),
            ArgsError::InvalidDbUrl { raw } => write!(f, "invalid --db value: {raw}"),
            ArgsError::InvalidLanguage { raw } => write!(f, "invalid --language value: {raw}"),
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

impl Args {
    fn parse() -> Result<Self, ArgsError> {
        let mut db_url = std::env::var("PROGRESSION_DB_URL")
            .unwrap_or_else(|_| "sqlite://progression.sqlite3?mode=rwc".into());
        let mut user_id = std::env::var("PROGRESSION_SEED_USER")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .map_or_else(|| UserId::new(1), UserId::new);
        let mut language = "nhaneca".to_string();

        let mut args = std::env::args().skip(1);
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = value;
                }
                "--user-id" => {
                    let value = require_value(&mut args, "--user-id")?;
                    let parsed: u64 = value
                        .parse()
                        .map_err(|_| ArgsError::InvalidUserId { raw: value.clone() })?;
                    user_id = UserId::new(parsed);
                }
                "--language" => {
                    let value = require_value(&mut args, "--language")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidLanguage { raw: value });
                    }
                    language = value.trim().to_lowercase();
                }
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self {
            db_url,
            user_id,
            language,
        })
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p storage --bin seed -- [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --db <sqlite_url>         SQLite URL (default: sqlite://progression.sqlite3?mode=rwc)");
    eprintln!("  --user-id <id>            Demo learner to provision (default: 1)");
    eprintln!("  --language <code>         Language of the seeded curriculum (default: nhaneca)");
    eprintln!("  -h, --help                Show this help");
    eprintln!();
    eprintln!("Environment (same as flags):");
    eprintln!("  PROGRESSION_DB_URL, PROGRESSION_SEED_USER");
}

fn lesson(id: u64, order: u32, title: &str, xp_reward: u32, access_tier: AccessTier) -> Lesson {
    Lesson {
        id: LessonId::new(id),
        order,
        title: title.to_string(),
        xp_reward,
        access_tier,
    }
}

fn activity(id: u64, order: u32, kind: &str, payload: &str) -> Activity {
    Activity {
        id: ActivityId::new(id),
        order,
        kind: kind.to_string(),
        payload: payload.to_string(),
    }
}

/// Two free levels followed by a level that sits behind the paywall.
fn curriculum(language: &str) -> Result<Vec<Level>, progress_core::ValidationError> {
    let level_one = Level::new(
        LevelId::new(1),
        1,
        language,
        "Nível 1",
        vec![
            Unit::new(
                UnitId::new(1),
                1,
                "Introdução",
                vec![
                    lesson(1, 1, "Saudações", 10, AccessTier::Free),
                    lesson(2, 2, "Despedidas", 10, AccessTier::Free),
                ],
            )?,
            Unit::new(
                UnitId::new(2),
                2,
                "Números",
                vec![
                    lesson(3, 1, "Um a cinco", 15, AccessTier::Free),
                    // Zero reward: the score is granted instead.
                    lesson(4, 2, "Revisão", 0, AccessTier::Free),
                ],
            )?,
        ],
    )?;

    let level_two = Level::new(
        LevelId::new(2),
        2,
        language,
        "Nível 2",
        vec![Unit::new(
            UnitId::new(3),
            1,
            "Família",
            vec![
                lesson(5, 1, "Pais e filhos", 20, AccessTier::Free),
                lesson(6, 2, "Avós", 20, AccessTier::Premium),
            ],
        )?],
    )?;

    let level_three = Level::new(
        LevelId::new(3),
        3,
        language,
        "Nível 3",
        vec![Unit::new(
            UnitId::new(4),
            1,
            "Conversação",
            vec![lesson(7, 1, "No mercado", 30, AccessTier::Free)],
        )?],
    )?;

    Ok(vec![level_one, level_two, level_three])
}

fn activities() -> Vec<(LessonId, Vec<Activity>)> {
    vec![
        (
            LessonId::new(1),
            vec![
                activity(
                    1,
                    1,
                    "THEORY",
                    r#"{"question":"Bem-vindo ao Nhaneca","body":"Aprenda a dizer Olá."}"#,
                ),
                activity(
                    2,
                    2,
                    "SELECT",
                    r#"{"question":"Como se diz Olá?","options":["Moro","Peras"],"correct":"Moro"}"#,
                ),
            ],
        ),
        (
            LessonId::new(3),
            vec![
                activity(
                    3,
                    1,
                    "THEORY",
                    r#"{"question":"Contar","body":"Os números de um a cinco."}"#,
                ),
                activity(
                    4,
                    2,
                    "SELECT",
                    r#"{"question":"Qual é o número um?","options":["Imwe","Vali"],"correct":"Imwe"}"#,
                ),
                activity(
                    5,
                    3,
                    "WRITE",
                    r#"{"question":"Escreva o número dois","correct":"Vali"}"#,
                ),
            ],
        ),
    ]
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse().map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;

    let storage = Storage::sqlite(&args.db_url).await?;

    let levels = curriculum(&args.language)?;
    for level in &levels {
        storage.content.put_level(level).await?;
    }
    let lesson_sets = activities();
    for (lesson_id, items) in &lesson_sets {
        storage.content.put_activities(*lesson_id, items).await?;
    }

    let learner = LearnerState::new(DEFAULT_MAX_HEARTS, AccessTier::Free)?;
    let provisioned = match storage.learners.insert_learner(args.user_id, &learner).await {
        Ok(_) => true,
        Err(StorageError::Conflict) => false,
        Err(err) => return Err(err.into()),
    };

    println!(
        "Seeded {} levels and {} activity sets for '{}' into {} (learner {} {})",
        levels.len(),
        lesson_sets.len(),
        args.language,
        args.db_url,
        args.user_id.value(),
        if provisioned { "created" } else { "already present" },
    );

    Ok(())
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
