use std::io;
use std::path::PathBuf;

/// Why a single metadata record was skipped. None of these abort the run.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("{}: cannot read: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{}: malformed metadata: {source}", metadata.display())]
    Malformed {
        metadata: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{}: missing date", metadata.display())]
    MissingTimestamp { metadata: PathBuf },

    #[error("{}: invalid timestamp {value:?} in {field}", metadata.display())]
    InvalidTimestamp {
        metadata: PathBuf,
        field: &'static str,
        value: String,
    },

    #[error("{}: not found", expected.display())]
    MissingAsset { expected: PathBuf },

    #[error("{}: date format {format:?} cannot be rendered", asset.display())]
    Naming { asset: PathBuf, format: String },

    #[error("{} -> {}: {source}", from.display(), to.display())]
    Relocate {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
}
