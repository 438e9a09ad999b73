//! Session workspace synchronization.
//!
//! Pull-then-work-then-push cycles between a remote object prefix and a
//! local working directory: ignore rules, content fingerprinting,
//! content-type resolution, and the engine coordinating transfers.

pub mod content_type;
pub mod engine;
pub mod fingerprint;
pub mod ignore;

pub use content_type::resolve_content_type;
pub use engine::{RemoteLocation, SyncEngine, TransferOutcome, MAX_CONCURRENT_TRANSFERS};
pub use fingerprint::{fingerprint_file, fingerprint_file_async, FileRecord, Fingerprint};
pub use ignore::{IgnoreRules, BUILT_IN_PATTERNS, IGNORE_FILE_NAME};
