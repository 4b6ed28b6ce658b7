//! Shared primitives for the note-taking app's multi-device sync engine:
//! domain types, the error taxonomy, the typed event bus, id/time helpers,
//! and the filesystem capability used to keep the reconciliation engine
//! testable without touching real disk.

#![deny(unsafe_code)]

pub mod clock;
pub mod error;
pub mod events;
pub mod filesystem;
pub mod hashing;
pub mod ids;
pub mod model;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use error::{SyncError, SyncResult};
pub use events::{EventBus, SyncEvent};
pub use filesystem::{FakeFilesystem, Filesystem, RealFilesystem};
pub use model::{
    ChangeKind, EncryptionAlgo, FileChangeEvent, LocalFileClass, LocalMapping, ManifestEntry,
    Note, NoteKind, NoteVersionRow, UploadQueueItem, WorkspaceLink,
};
