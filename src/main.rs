//! modvault - mod manager engine for mobile games
//!
//! Thin CLI over the engine: scan for mods, flip them on and off, run the
//! privileged helper service. All real logic lives in the library.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use modvault::access::AccessResolver;
use modvault::config::{self, GameInfo};
use modvault::db::Database;
use modvault::fileops::FileRouter;
use modvault::helper::{service, HelperChannel};
use modvault::orchestrator::{BatchOutcome, Orchestrator};
use modvault::paths::AppPaths;
use modvault::scanner::{CancelToken, ScanEvent, ScanOptions, Scanner};
use modvault::special::SpecialGameRegistry;

const OWN_PACKAGE: &str = "com.modvault.app";

#[derive(Parser)]
#[command(name = "modvault")]
#[command(version)]
#[command(about = "Mod manager engine: scan, backup, enable, restore")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Shared storage root (defaults to the platform data dir)
    #[arg(long, global = true, env = "MODVAULT_ROOT")]
    root: Option<PathBuf>,

    /// Document-tree grants to assume (repeatable)
    #[arg(long, global = true)]
    grant: Vec<PathBuf>,

    /// Connect the privileged helper channel at this socket
    #[arg(long, global = true)]
    helper_socket: Option<PathBuf>,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan source directories for mods of one game
    Scan {
        /// Target game package name
        game: String,

        /// Extra source directories besides the shared download area
        #[arg(short, long)]
        source: Vec<PathBuf>,

        /// Drop the scan cache and re-read everything
        #[arg(long)]
        force: bool,

        /// Also scan loose directories in the mod-save dir
        #[arg(long)]
        dirs: bool,
    },

    /// List known mods of one game
    List {
        /// Target game package name
        game: String,
    },

    /// Enable mods by id
    Enable {
        /// Target game package name
        game: String,
        ids: Vec<i64>,
    },

    /// Disable mods by id
    Disable {
        /// Target game package name
        game: String,
        ids: Vec<i64>,
    },

    /// Delete mods by id (disabling them first)
    Delete {
        /// Target game package name
        game: String,
        ids: Vec<i64>,
    },

    /// Cache an archive password for an encrypted mod
    Password {
        id: i64,
        password: String,
    },

    /// Run per-game launch hooks (manifest injection and friends)
    StartGame {
        /// Target game package name
        game: String,
    },

    /// Import game descriptors from the shared download area
    ImportConfigs,

    /// Drop the temp and image caches
    ClearCache,

    /// Run the privileged helper service on its socket
    HelperServe,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let paths = match &cli.root {
        Some(root) => AppPaths::new(root, OWN_PACKAGE),
        None => AppPaths::default_layout(OWN_PACKAGE),
    };
    paths.ensure_layout()?;

    let directive = if cli.verbose { "modvault=debug" } else { "modvault=info" };
    let _log_guard = if cli.verbose || std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
            .init();
        None
    } else {
        let appender = tracing_appender::rolling::daily(paths.log_dir(), "modvault.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(directive))
            .with_writer(writer)
            .with_ansi(false)
            .init();
        Some(guard)
    };

    let channel = Arc::new(HelperChannel::new());
    if let Some(socket) = &cli.helper_socket {
        channel
            .connect(socket)
            .with_context(|| format!("cannot reach helper at {}", socket.display()))?;
    }
    let resolver = Arc::new(AccessResolver::new(
        vec![paths.root().to_path_buf()],
        Arc::clone(&channel),
    ));
    for grant in &cli.grant {
        resolver.grant(grant);
    }
    let router = Arc::new(FileRouter::new(Arc::clone(&resolver), channel));
    let hooks = Arc::new(SpecialGameRegistry::builtin());
    let db = Arc::new(Database::open(&paths.db_path())?);

    match cli.command {
        Commands::Scan {
            game,
            source,
            force,
            dirs,
        } => {
            let game = load_game(&paths, &hooks, &game)?;
            let scanner = Scanner::new(
                Arc::clone(&db),
                Arc::clone(&router),
                paths.clone(),
                Arc::clone(&hooks),
            );

            let mut sources = vec![paths.download_mods_dir()];
            sources.extend(source);

            let bar = ProgressBar::new(0);
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner} [{bar:40}] {pos}/{len} {msg}")?
                    .progress_chars("=>-"),
            );
            let progress = {
                let bar = bar.clone();
                move |event: ScanEvent| match event {
                    ScanEvent::Step {
                        current_file,
                        current,
                        total,
                        ..
                    } => {
                        bar.set_length(total as u64);
                        bar.set_position(current as u64);
                        bar.set_message(current_file);
                    }
                    ScanEvent::ModFound { name } => bar.println(format!("found: {name}")),
                }
            };

            let options = ScanOptions {
                force,
                scan_directory_mods: dirs,
            };
            let outcome = scanner.scan(&sources, &game, &options, &progress, &CancelToken::new())?;
            bar.finish_and_clear();

            println!(
                "{} added, {} updated, {} removed, {} relocated",
                outcome.added.len(),
                outcome.updated.len(),
                outcome.removed.len(),
                outcome.relocated,
            );
            for record in &outcome.deferred_removals {
                println!(
                    "! {} is enabled but its source is gone; disable it before deleting",
                    record.name
                );
            }
            for dir in &outcome.permission_failures {
                println!("! no permission to read {}; grant access and rescan", dir.display());
            }
        }

        Commands::List { game } => {
            let game = load_game(&paths, &hooks, &game)?;
            for record in db.mods_for_game(&game.package_name)? {
                println!(
                    "{:>4}  [{}]  {}  ({} files{})",
                    record.id,
                    if record.enabled { "on " } else { "off" },
                    record.name,
                    record.mod_files.len(),
                    if record.encrypted { ", encrypted" } else { "" },
                );
            }
        }

        Commands::Enable { game, ids } => {
            let game = load_game(&paths, &hooks, &game)?;
            let orchestrator = Orchestrator::new(db, router, paths.clone(), hooks);
            let outcome = orchestrator.enable_mods(&ids, &game, &CancelToken::new())?;
            report_batch("enabled", &outcome);
        }

        Commands::Disable { game, ids } => {
            let game = load_game(&paths, &hooks, &game)?;
            let orchestrator = Orchestrator::new(db, router, paths.clone(), hooks);
            let outcome = orchestrator.disable_mods(&ids, &game, &CancelToken::new())?;
            report_batch("disabled", &outcome);
        }

        Commands::Delete { game, ids } => {
            let game = load_game(&paths, &hooks, &game)?;
            let orchestrator = Orchestrator::new(db, router, paths.clone(), hooks);
            let outcome = orchestrator.delete_mods(&ids, &game, &CancelToken::new())?;
            report_batch("deleted", &outcome);
        }

        Commands::Password { id, password } => {
            let orchestrator = Orchestrator::new(db, router, paths.clone(), hooks);
            orchestrator.set_password(id, &password)?;
            println!("password accepted");
        }

        Commands::StartGame { game } => {
            let game = load_game(&paths, &hooks, &game)?;
            let orchestrator = Orchestrator::new(db, router, paths.clone(), hooks);
            let changed = orchestrator
                .backup_engine()
                .detect_external_changes(&game)?;
            for record in &changed {
                println!(
                    "! game update overwrote {}; rescan before playing",
                    record.game_file_path
                );
            }
            orchestrator.start_game(&game)?;
        }

        Commands::ImportConfigs => {
            let imported = config::import_game_configs(&paths)?;
            println!("{imported} game descriptor(s) imported");
        }

        Commands::ClearCache => {
            paths.clear_caches()?;
            println!("caches cleared");
        }

        Commands::HelperServe => {
            let listener = service::bind(&paths.helper_socket())?;
            service::serve(listener)?;
        }
    }

    Ok(())
}

/// Load the active game's descriptor from the app config dir.
fn load_game(paths: &AppPaths, hooks: &SpecialGameRegistry, package: &str) -> Result<GameInfo> {
    let configs = config::load_game_configs(&paths.game_config_dir(), paths);
    let Some(game) = configs.into_iter().find(|g| g.package_name == package) else {
        bail!(
            "no descriptor for {package}; drop one into {} and run import-configs",
            paths.game_config_import_dir().display()
        );
    };
    Ok(hooks.update_game_info(game))
}

fn report_batch(verb: &str, outcome: &BatchOutcome) {
    println!("{} mod(s) {verb}", outcome.succeeded.len());
    for (record, reason) in &outcome.failed {
        println!("! {} failed: {reason}", record.name);
    }
    for record in &outcome.password_required {
        println!("! {} is encrypted; set a password first", record.name);
    }
    for warning in &outcome.hook_warnings {
        println!("~ game-side bookkeeping warning: {warning}");
    }
}
