pub mod discovery;
pub mod engine;
pub mod expander;
pub mod gate;
pub mod manifest;
pub mod path;
pub mod transfer;
pub mod version;

pub use discovery::find_applications;
pub use engine::{AppReport, BatchReport, SyncEngine, SyncState};
pub use expander::{expand_local, expand_remote, LocalExpansion};
pub use gate::{check_compatibility, require_license, validate_license, Compatibility};
pub use manifest::{Application, Manifest, Validation};
pub use path::{EntryKind, ManifestEntry, PathSet, ResolvedPath};
pub use transfer::{decide, Action, Direction, TransferConfig, TransferExecutor, TransferReport};
pub use version::{check_update, Version};
