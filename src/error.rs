use std::io;

/// Errors produced by the dataset pipeline
///
/// Input faults (`Validation`, `UnsupportedFormat`, `CorruptInput`, `EmptyInput`)
/// are recoverable by the user fixing the upload. `NotFound` never tells an
/// owner whether the record exists for someone else.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing required columns: {}", missing.join(", "))]
    Validation { missing: Vec<String> },
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("the uploaded file is corrupted: {0}")]
    CorruptInput(String),
    #[error("the uploaded file is empty")]
    EmptyInput,
    #[error("dataset not found")]
    NotFound,
    #[error("storage error ({context}): {source}")]
    StorageIo {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("render error: {0}")]
    Render(String),
    #[error("authentication error: {0}")]
    Auth(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn storage(context: impl Into<String>, source: io::Error) -> Self {
        Error::StorageIo {
            context: context.into(),
            source,
        }
    }

    /// True for faults caused by the uploaded content rather than the server.
    pub fn is_input_fault(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. }
                | Error::UnsupportedFormat(_)
                | Error::CorruptInput(_)
                | Error::EmptyInput
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_message_lists_every_column() {
        let err = Error::Validation {
            missing: vec!["Pressure".to_string(), "Temperature".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "missing required columns: Pressure, Temperature"
        );
        assert!(err.is_input_fault());
    }

    #[test]
    fn storage_errors_are_not_input_faults() {
        let err = Error::storage("write", io::Error::other("disk full"));
        assert!(!err.is_input_fault());
        assert!(!Error::NotFound.is_input_fault());
    }
}
