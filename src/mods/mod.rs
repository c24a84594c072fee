//! Mod folders, their verification state, and applying them to the card.

pub mod cache;
pub mod compare;
pub mod files;
pub mod library;
pub mod preset;
pub mod reconciler;
pub mod status;

pub use cache::StatusCache;
pub use compare::FileComparator;
pub use files::list_files;
pub use library::{list_games, list_mods, load_mods, GameFolder};
pub use preset::{Preset, PresetError, PresetReport, PresetStore};
pub use reconciler::{ApplyReport, BatchReport, ModStateReconciler, ReconcileError, RemoveReport};
pub use status::{ModDescriptor, ModStatus};
