//! SwitchBlade - Switch homebrew package and mod manager
//!
//! Command line front end over the `switchblade` library. Long operations
//! run on a worker thread while this thread renders the shared progress.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use switchblade::config::{Layout, Settings, SETTINGS_FILE};
use switchblade::extract::{
    ArchiveExtractor, CheatRequest, CheatSetExtractor, EntryFailurePolicy, ExtractOutcome, ExtractionTarget,
    TitleModTarget,
};
use switchblade::mods::{self, library, FileComparator, ModStateReconciler, PresetStore, StatusCache};
use switchblade::paths::CfwVariant;
use switchblade::progress::ProgressSink;
use switchblade::{payload, titles};
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Parser)]
#[command(name = "switchblade")]
#[command(version)]
#[command(about = "Install packages, cheats and mods onto a Switch SD card")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SD card root
    #[arg(short, long, global = true, default_value = "/")]
    root: PathBuf,

    /// Enable verbose logging (use RUST_LOG=debug for more detail)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract a firmware or homebrew package onto the card
    Extract {
        /// Archive to extract (deleted afterwards)
        archive: PathBuf,

        /// Output directory (defaults to the card root)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Firmware variant (ams, rnx, sxos)
        #[arg(long)]
        cfw: Option<CfwVariant>,

        /// Keep existing .ini files
        #[arg(long)]
        preserve_inis: bool,

        /// Skip entries that fail to write instead of aborting
        #[arg(long)]
        keep_going: bool,

        /// Copy a bootloader payload found in the archive to bootloader/update.bin
        #[arg(long)]
        deploy_payload: bool,

        /// Also copy it to atmosphere/reboot_payload.bin
        #[arg(long, requires = "deploy_payload")]
        reboot_payload: bool,
    },

    /// Extract a title mod into contents/<title-id>
    ExtractMod {
        /// Archive to extract (deleted afterwards)
        archive: PathBuf,

        /// Title the mod belongs to
        title_id: String,

        /// Abort on the first entry that fails to write
        #[arg(long)]
        strict: bool,
    },

    /// Extract a cheat database for installed titles
    Cheats {
        /// Cheat archive (deleted afterwards)
        archive: PathBuf,

        /// Installed title-id (repeatable)
        #[arg(short, long = "title")]
        titles: Vec<String>,

        /// Extract cheats for every title
        #[arg(long)]
        all: bool,

        /// Database version to record
        #[arg(long, default_value = "offline")]
        db_version: String,

        /// Fail if the archive doesn't follow the cheat layout
        #[arg(long)]
        strict: bool,

        /// Firmware variant (ams, rnx, sxos)
        #[arg(long)]
        cfw: Option<CfwVariant>,
    },

    /// Title-id utilities
    Titles {
        #[command(subcommand)]
        command: TitleCommands,
    },

    /// Manage mods of a game
    Mods {
        #[command(subcommand)]
        command: ModCommands,
    },

    /// Manage mod presets of a game
    Preset {
        #[command(subcommand)]
        command: PresetCommands,
    },
}

#[derive(Subcommand)]
enum TitleCommands {
    /// Print the titles left after applying the exclusion list
    Exclude {
        /// Candidate title-ids
        titles: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ModCommands {
    /// List games, or the mods of one game
    List { game: Option<String> },
    /// Copy a mod onto the install base
    Apply { game: String, name: String },
    /// Remove a mod's files from the install base
    Remove { game: String, name: String },
    /// Check how much of a mod is installed
    Verify { game: String, name: String },
    /// Verify every mod of a game and rewrite its status cache
    Recheck { game: String },
    /// Remove every mod of a game
    RemoveAll { game: String },
}

#[derive(Subcommand)]
enum PresetCommands {
    /// List presets of a game
    List { game: String },
    /// Create a preset from an ordered mod list
    Create {
        game: String,
        /// Mods in application order (repeats allowed)
        mods: Vec<String>,
        /// Preset name (generated if omitted)
        #[arg(short, long, default_value = "")]
        name: String,
    },
    /// Delete a preset by name
    Delete { game: String, name: String },
    /// Replace the applied mods with a preset
    Apply { game: String, name: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(if cli.verbose { "switchblade=debug".parse()? } else { "switchblade=info".parse()? }),
        )
        .init();

    let settings = load_settings(&cli.root)?;
    let layout = Layout::new(&cli.root).with_settings(&settings);
    layout.validate()?;

    let sink = Arc::new(ProgressSink::new());

    match cli.command {
        Commands::Extract {
            archive,
            output,
            cfw,
            preserve_inis,
            keep_going,
            deploy_payload,
            reboot_payload,
        } => {
            let target = ExtractionTarget::new(output.unwrap_or_else(|| layout.root.clone()))
                .with_cfw(cfw.unwrap_or(settings.cfw))
                .preserve_inis(preserve_inis || settings.preserve_inis)
                .on_entry_error(if keep_going { EntryFailurePolicy::Continue } else { EntryFailurePolicy::Abort });
            let extractor = ArchiveExtractor::for_layout(&layout, Arc::clone(&sink));
            let outcome = run_with_progress(&sink, "Extracting", || extractor.extract(&archive, &target));
            report_extract(&outcome)?;

            if let (true, Some(found)) = (deploy_payload, outcome.payload()) {
                for written in payload::deploy_payload(&layout, found, reboot_payload)? {
                    println!("Payload copied to {}", written.display());
                }
            }
        }

        Commands::ExtractMod { archive, title_id, strict } => {
            let mut target = TitleModTarget::new(&layout, title_id.to_ascii_uppercase());
            if strict {
                target = target.on_entry_error(EntryFailurePolicy::Abort);
            }
            let extractor = ArchiveExtractor::new(Arc::clone(&sink));
            let outcome = run_with_progress(&sink, "Extracting mod", || extractor.extract_title_mod(&archive, &target));
            report_extract(&outcome)?;
        }

        Commands::Cheats {
            archive,
            titles: installed,
            all,
            db_version,
            strict,
            cfw,
        } => {
            let allowed = titles::exclude_titles(&layout.exclude_list(), &installed);
            let mut request = CheatRequest::new(cfw.unwrap_or(settings.cfw), allowed);
            request.version = db_version;
            request.extract_all = all;
            request.strict_layout = strict;

            let extractor = CheatSetExtractor::new(&layout, Arc::clone(&sink));
            if let Some(current) = extractor.installed_version() {
                println!("Installed cheat database: {}", current);
            }
            let outcome = run_with_progress(&sink, "Extracting cheats", || extractor.extract(&archive, &request));
            report_extract(&outcome)?;
        }

        Commands::Titles {
            command: TitleCommands::Exclude { titles: candidates },
        } => {
            for title in titles::exclude_titles(&layout.exclude_list(), &candidates) {
                println!("{}", title);
            }
        }

        Commands::Mods { command } => {
            let reconciler = ModStateReconciler::new(&layout.install_base, Arc::clone(&sink))
                .with_comparator(FileComparator::from_settings(&settings));
            run_mod_command(&layout, &reconciler, &sink, command)?;
        }

        Commands::Preset { command } => {
            let reconciler = ModStateReconciler::new(&layout.install_base, Arc::clone(&sink))
                .with_comparator(FileComparator::from_settings(&settings));
            run_preset_command(&layout, &reconciler, &sink, command)?;
        }
    }

    Ok(())
}

/// Settings from the card, falling back to the host config directory.
fn load_settings(root: &Path) -> Result<Settings> {
    let on_card = Layout::new(root).settings_file();
    if on_card.exists() {
        return Settings::load(&on_card);
    }
    Settings::load(&Settings::host_config_dir()?.join(SETTINGS_FILE))
}

/// Run `work` on a worker thread, rendering `sink` until it finishes.
fn run_with_progress<T: Send>(sink: &ProgressSink, label: &str, work: impl FnOnce() -> T + Send) -> T {
    sink.reset();
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {msg} [{bar:40.cyan/blue}] {pos}/{len}")
            .unwrap()
            .progress_chars("=>-"),
    );
    pb.set_message(label.to_string());

    let result = std::thread::scope(|s| {
        let worker = s.spawn(work);
        while !worker.is_finished() {
            let snapshot = sink.snapshot();
            pb.set_length(snapshot.total_steps);
            pb.set_position(snapshot.step);
            std::thread::sleep(POLL_INTERVAL);
        }
        worker.join()
    });

    let snapshot = sink.snapshot();
    pb.set_length(snapshot.total_steps);
    pb.set_position(snapshot.step);
    pb.finish_and_clear();

    match result {
        Ok(value) => value,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

fn report_extract(outcome: &ExtractOutcome) -> Result<()> {
    match outcome {
        ExtractOutcome::Completed(report) => {
            println!(
                "Extracted {} files ({} bytes), {} directories",
                report.files_written, report.bytes_written, report.directories
            );
            if report.renamed > 0 {
                println!("{} in-use system files written with a .sb suffix", report.renamed);
            }
            if report.preserved > 0 {
                println!("{} preserved files left untouched", report.preserved);
            }
            if report.failed > 0 || report.malformed > 0 {
                println!("{} entries failed, {} did not match the expected layout", report.failed, report.malformed);
            }
            if let Some(found) = &report.payload {
                println!("Bootloader payload: {}", found.display());
            }
            Ok(())
        }
        ExtractOutcome::Cancelled => anyhow::bail!("Extraction cancelled"),
        ExtractOutcome::Failed(failure) => Err(failure.clone()).context("Extraction failed"),
    }
}

fn game_dir(layout: &Layout, game: &str) -> Result<PathBuf> {
    let dir = layout.mods_root().join(game);
    if !dir.is_dir() {
        anyhow::bail!("Game folder not found: {}", dir.display());
    }
    Ok(dir)
}

fn find_mod(game_dir: &Path, name: &str) -> Result<mods::ModDescriptor> {
    library::find_mod(game_dir, name).with_context(|| format!("Mod not found: {}", game_dir.join(name).display()))
}

/// Record one mod's new status in its game's cache.
fn update_cache(game_dir: &Path, updated: &mods::ModDescriptor) -> Result<()> {
    let mut all = library::load_mods(game_dir)?;
    for m in all.iter_mut().filter(|m| m.name == updated.name) {
        m.set_status(updated.status, updated.fraction);
    }
    StatusCache::save(&library::status_cache_path(game_dir), &all)
}

fn run_mod_command(
    layout: &Layout,
    reconciler: &ModStateReconciler,
    sink: &ProgressSink,
    command: ModCommands,
) -> Result<()> {
    match command {
        ModCommands::List { game: None } => {
            for game in mods::list_games(&layout.mods_root()) {
                println!(
                    "{:<40} {:<18} {} mods",
                    game.name,
                    game.title_id.as_deref().unwrap_or("-"),
                    game.mod_count
                );
            }
        }
        ModCommands::List { game: Some(game) } => {
            for m in mods::load_mods(&game_dir(layout, &game)?)? {
                println!("{:<40} {}", m.name, m.status.label());
            }
        }
        ModCommands::Apply { game, name } => {
            let dir = game_dir(layout, &game)?;
            let mut m = find_mod(&dir, &name)?;
            let report = run_with_progress(sink, "Applying", || reconciler.apply(&m))?;
            println!("Copied {} files, {} failed", report.copied, report.failed);
            let (status, fraction) = reconciler.verify(&m)?;
            m.set_status(status, fraction);
            update_cache(&dir, &m)?;
            println!("{}: {}", m.name, m.status.label());
        }
        ModCommands::Remove { game, name } => {
            let dir = game_dir(layout, &game)?;
            let mut m = find_mod(&dir, &name)?;
            let report = run_with_progress(sink, "Removing", || reconciler.remove(&m))?;
            println!(
                "Removed {} files, kept {} changed by other mods, {} already gone",
                report.removed, report.kept, report.missing
            );
            let (status, fraction) = reconciler.verify(&m)?;
            m.set_status(status, fraction);
            update_cache(&dir, &m)?;
        }
        ModCommands::Verify { game, name } => {
            let dir = game_dir(layout, &game)?;
            let mut m = find_mod(&dir, &name)?;
            let (status, fraction) = run_with_progress(sink, "Verifying", || reconciler.verify(&m))?;
            m.set_status(status, fraction);
            update_cache(&dir, &m)?;
            println!("{}: {} ({:.0}%)", m.name, status.label(), fraction * 100.0);
        }
        ModCommands::Recheck { game } => {
            let dir = game_dir(layout, &game)?;
            let checked = run_with_progress(sink, "Checking", || reconciler.recheck_all(&dir))?;
            for m in checked {
                println!("{:<40} {}", m.name, m.status.label());
            }
        }
        ModCommands::RemoveAll { game } => {
            let dir = game_dir(layout, &game)?;
            let report = run_with_progress(sink, "Removing all", || reconciler.remove_all(&dir))?;
            println!("Removed {} mods ({} files checked)", report.mods, report.files);
        }
    }
    Ok(())
}

fn run_preset_command(
    layout: &Layout,
    reconciler: &ModStateReconciler,
    sink: &ProgressSink,
    command: PresetCommands,
) -> Result<()> {
    match command {
        PresetCommands::List { game } => {
            let store = PresetStore::load(&game_dir(layout, &game)?)?;
            for (i, preset) in store.presets().iter().enumerate() {
                println!("{:>3}. {} [{}]", i, preset.name, preset.mods.join(", "));
            }
        }
        PresetCommands::Create { game, mods, name } => {
            let mut store = PresetStore::load(&game_dir(layout, &game)?)?;
            let created = store.create(&name, mods)?;
            println!("Created preset {}", created.name);
        }
        PresetCommands::Delete { game, name } => {
            let mut store = PresetStore::load(&game_dir(layout, &game)?)?;
            if !store.delete_named(&name)? {
                anyhow::bail!("No preset named {}", name);
            }
            println!("Deleted preset {}", name);
        }
        PresetCommands::Apply { game, name } => {
            let dir = game_dir(layout, &game)?;
            let store = PresetStore::load(&dir)?;
            let preset = store.find(&name).with_context(|| format!("No preset named {}", name))?;
            let report = run_with_progress(sink, "Applying preset", || reconciler.apply_preset(&dir, preset))?;
            println!(
                "Removed {} mods, applied {} ({} files, {} failed)",
                report.removed_mods, report.applied_mods, report.files_copied, report.files_failed
            );
            for missing in &report.missing_mods {
                println!("Missing mod folder: {}", missing);
            }
        }
    }
    Ok(())
}
