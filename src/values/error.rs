use std::path::PathBuf;

use super::store::LayerKind;

#[derive(Debug, thiserror::Error)]
pub enum ValuesError {
    #[error("bad values in {origin}: {source}")]
    Parse {
        origin: String,
        source: serde_yaml::Error,
    },

    #[error("values in {origin} must be a mapping")]
    NotAMapping { origin: String },

    #[error("layer {kind:?} cannot be installed in {scope} scope")]
    ScopeMismatch { kind: LayerKind, scope: String },

    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot serialize values: {0}")]
    Serialize(#[from] serde_yaml::Error),
}
