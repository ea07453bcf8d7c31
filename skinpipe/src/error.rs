use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("unexpected EOF while reading {what} at offset {offset}")]
    UnexpectedEof { what: String, offset: usize },

    #[error("{chunk} magic mismatch")]
    BadMagic { chunk: String },

    #[error("{chunk} version mismatch: {version:#x}")]
    UnsupportedVersion { chunk: String, version: u32 },

    #[error("{what} count {count} outside allowed range (max {max})")]
    CountOutOfRange { what: String, count: i64, max: usize },

    #[error("{what} index {index} out of range (len {len})")]
    IndexOutOfRange { what: String, index: u64, len: usize },

    #[error("invalid value: {message}")]
    InvalidValue { message: String },

    #[error("model is not loaded")]
    NotLoaded,

    #[error("unknown animation clip: {name}")]
    UnknownClip { name: String },

    #[error(
        "invalid skin matrix for bone {bone}: max component {max_abs}, translation {max_translation}"
    )]
    InvalidSkinMatrix {
        bone: usize,
        max_abs: f32,
        max_translation: f32,
    },

    #[error("merged geometry exceeds the {limit} vertex budget")]
    VertexBudgetExceeded { limit: usize },

    #[error("model package directory not found for model id '{model_id}'")]
    PackageNotFound { model_id: String },
}

impl Error {
    pub(crate) fn io(path: &std::path::Path, err: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    pub(crate) fn eof(what: &str, offset: usize) -> Self {
        Self::UnexpectedEof {
            what: what.to_string(),
            offset,
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidValue {
            message: message.into(),
        }
    }
}
