//! # Scene Sync CLI (`scenesync`)
//!
//! Author narrative scenes and keep a vector index in step with them.
//!
//! ## Usage
//!
//! ```bash
//! scenesync --config ./config/scenesync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scenesync init` | Create the SQLite database and run schema migrations |
//! | `scenesync scene add` | Author a new scene (marked dirty) |
//! | `scenesync scene edit <id>` | Change fields of a scene (marked dirty) |
//! | `scenesync scene list` | List scenes by chapter |
//! | `scenesync scene show <id>` | Print a scene, its index key and digest as JSON |
//! | `scenesync chapters` | List chapters with their next free scene index |
//! | `scenesync character add/list` | Manage characters |
//! | `scenesync sync` | Push dirty scenes to the vector index |
//! | `scenesync status` | Totals, dirty count and the last sync run |
//! | `scenesync search "<query>"` | Semantic search over synchronized scenes |
//!
//! Logging goes to stderr and is controlled with `RUST_LOG`
//! (default `warn`).

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use scene_sync::progress::ProgressMode;
use scene_sync::scene_cmd::{self, SceneArgs};
use scene_sync::{config, migrate, search, stats, sync_cmd};

/// Scene Sync: author narrative scenes and synchronize them into a vector index.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/scenesync.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "scenesync",
    about = "Scene authoring and incremental vector-index synchronization",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/scenesync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it on an existing database is safe.
    Init,

    /// Author and inspect scenes.
    Scene {
        #[command(subcommand)]
        action: SceneAction,
    },

    /// List chapters that have a title, with the next free scene index.
    Chapters,

    /// Manage characters.
    Character {
        #[command(subcommand)]
        action: CharacterAction,
    },

    /// Synchronize dirty scenes into the vector index.
    ///
    /// Scenes whose embedding or upsert fails stay dirty and are retried on
    /// the next run.
    Sync {
        /// Show what would be indexed without embedding or writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr: `off`, `human`, or `json`.
        /// Defaults to `human` on a terminal and `off` otherwise.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Show totals, dirty count and the last sync run.
    Status,

    /// Semantic search over synchronized scenes.
    Search {
        /// The search query string.
        query: String,

        /// Maximum number of results to return.
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[derive(Subcommand)]
enum SceneAction {
    /// Add a scene.
    ///
    /// The chapter is given by `--chapter`, or by the `--title` of an existing
    /// chapter. The scene index defaults to the next free one.
    Add {
        #[command(flatten)]
        fields: SceneFields,
    },
    /// Change fields of a scene; fields not given are kept.
    Edit {
        id: String,
        #[command(flatten)]
        fields: SceneFields,
    },
    /// List scenes ordered by chapter and scene index.
    List {
        #[arg(long)]
        chapter: Option<u32>,
        /// Only scenes waiting to be synchronized.
        #[arg(long)]
        dirty: bool,
    },
    /// Print one scene as JSON.
    Show { id: String },
}

#[derive(Subcommand)]
enum CharacterAction {
    Add { name: String },
    List,
}

#[derive(Args)]
struct SceneFields {
    /// Chapter index (0 is the prologue).
    #[arg(long)]
    chapter: Option<u32>,
    /// Chapter title.
    #[arg(long)]
    title: Option<String>,
    /// Scene index within the chapter.
    #[arg(long)]
    scene: Option<u32>,
    #[arg(long)]
    plot: Option<String>,
    #[arg(long)]
    location: Option<String>,
    /// Mood tag; repeat for several. Tags outside `[authoring] mood_options`
    /// are kept as free text.
    #[arg(long = "mood")]
    moods: Vec<String>,
    /// Free-text mood.
    #[arg(long)]
    mood_note: Option<String>,
    /// Character name or id; repeat for several.
    #[arg(long = "character")]
    characters: Vec<String>,
    /// Related context id; repeat for several.
    #[arg(long = "context")]
    context_ids: Vec<String>,
}

impl From<SceneFields> for SceneArgs {
    fn from(f: SceneFields) -> Self {
        SceneArgs {
            chapter: f.chapter,
            title: f.title,
            scene: f.scene,
            plot: f.plot,
            location: f.location,
            moods: f.moods,
            mood_note: f.mood_note,
            characters: f.characters,
            context_ids: f.context_ids,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Scene { action } => match action {
            SceneAction::Add { fields } => {
                scene_cmd::run_scene_add(&cfg, fields.into()).await?;
            }
            SceneAction::Edit { id, fields } => {
                scene_cmd::run_scene_edit(&cfg, &id, fields.into()).await?;
            }
            SceneAction::List { chapter, dirty } => {
                scene_cmd::run_scene_list(&cfg, chapter, dirty).await?;
            }
            SceneAction::Show { id } => {
                scene_cmd::run_scene_show(&cfg, &id).await?;
            }
        },
        Commands::Chapters => {
            scene_cmd::run_chapters(&cfg).await?;
        }
        Commands::Character { action } => match action {
            CharacterAction::Add { name } => {
                scene_cmd::run_character_add(&cfg, &name).await?;
            }
            CharacterAction::List => {
                scene_cmd::run_character_list(&cfg).await?;
            }
        },
        Commands::Sync { dry_run, progress } => {
            let mode = match progress.as_deref() {
                Some(s) => ProgressMode::parse(s).ok_or_else(|| {
                    anyhow::anyhow!("Unknown progress mode: {}. Use off, human, or json.", s)
                })?,
                None => ProgressMode::default_for_tty(),
            };
            sync_cmd::run_sync(&cfg, dry_run, mode).await?;
        }
        Commands::Status => {
            stats::run_status(&cfg).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
    }

    Ok(())
}
