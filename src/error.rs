use poem::http::StatusCode;
use strum::Display;
use thiserror::Error;

use crate::identifier::IdentifierError;
use crate::storage::StorageError;

/// The broad category an upload failure falls into.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum ErrorClass {
    /// The client sent something unusable.
    Input,
    Processing,
    Storage,
    Metadata,
}

/// The ways an upload can fail.
///
/// The display text is sent back to the client as the error message, the
/// underlying cause is only logged.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Error processing file!")]
    MissingField,

    #[error("Error dowloading URL!")]
    Download(String),

    #[error("File too large!")]
    TooLarge { limit: u64 },

    #[error("Error detecting mime type!")]
    UnknownMime,

    #[error("Unable to process image!")]
    Processing(anyhow::Error),

    #[error("Unable to write to /tmp")]
    TempFile(String),

    #[error("Unable to copy image to disk!")]
    Copy(String),

    #[error("Unable to generate identifier!")]
    Identifier(#[source] IdentifierError),

    #[error("Unable to save image!")]
    Storage(#[from] StorageError),

    #[error("Unable to fetch image metadata!")]
    Metadata(#[source] std::io::Error),
}

impl UploadError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::MissingField | Self::Download(_) | Self::TooLarge { .. } | Self::UnknownMime => {
                ErrorClass::Input
            },
            Self::Processing(_) => ErrorClass::Processing,
            Self::TempFile(_) | Self::Copy(_) | Self::Identifier(_) | Self::Storage(_) => {
                ErrorClass::Storage
            },
            Self::Metadata(_) => ErrorClass::Metadata,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingField | Self::Download(_) => StatusCode::BAD_REQUEST,
            Self::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::UnknownMime => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Identifier(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Processing(_)
            | Self::TempFile(_)
            | Self::Copy(_)
            | Self::Storage(_)
            | Self::Metadata(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// A description of the underlying cause for logging.
    pub fn detail(&self) -> String {
        match self {
            Self::Download(reason) | Self::TempFile(reason) | Self::Copy(reason) => reason.clone(),
            Self::TooLarge { limit } => format!("upload exceeds the {} byte limit", limit),
            Self::Processing(e) => format!("{:#}", e),
            Self::Storage(e) => e.to_string(),
            Self::Metadata(e) => e.to_string(),
            Self::Identifier(e) => e.to_string(),
            other => other.to_string(),
        }
    }
}
