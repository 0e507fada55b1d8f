//! On-disk JSON corpus: payload files, discovery, zip handling, sidecars.

mod archive;
mod discovery;
mod lock;
mod payload;
mod sidecar;

pub use archive::{is_zip, pack_dir, unpack, InputCorpus, OutputCorpus};
pub use discovery::{discover_nested, discover_strict, PayloadFile};
pub use lock::{OutputLock, LOCK_FILE_NAME};
pub use payload::{
    export_timestamp, payload_path, read_payload, write_payload, ExportPayload, PayloadStats,
    PayloadWriter, WrittenPayload,
};
pub use sidecar::{
    write_atomic, AutoIncrementItem, AutoIncrementReport, AUTO_INCREMENT_REPORT, EXPORT_REPORT,
    HANDLE_REPORT,
};
