use crate::well::Well;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidWellName,
    DuplicateBarcode,
    InvalidAvailabilityValue,
    ConflictingWellSpec,
    InvalidBarcodeFormat,
    NoAvailableWell,
    AlreadyUpdated,
    NothingToUndo,
    SampleNotListed,
    ScanOutMismatch,
    PlateComplete,
    Config,
    Io,
}

/// Failure signal for every engine operation. `PlateComplete` is a
/// confirmable milestone rather than a user-input error; everything else is
/// recoverable and leaves the sequence unchanged except where an operation
/// documents otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferError {
    pub code: ErrorCode,
    pub message: String,
    pub lightup_well: Option<Well>,
}

impl TransferError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            lightup_well: None,
        }
    }

    pub fn with_well(mut self, well: Well) -> Self {
        self.lightup_well = Some(well);
        self
    }

    pub fn is_confirm(&self) -> bool {
        matches!(self.code, ErrorCode::PlateComplete)
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl Error for TransferError {}

impl From<std::io::Error> for TransferError {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorCode::Io, err.to_string())
    }
}

impl From<csv::Error> for TransferError {
    fn from(err: csv::Error) -> Self {
        Self::new(ErrorCode::Io, err.to_string())
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorCode::Config, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirm_split() {
        let complete = TransferError::new(ErrorCode::PlateComplete, "plate is complete");
        assert!(complete.is_confirm());
        let dup = TransferError::new(ErrorCode::DuplicateBarcode, "already scanned")
            .with_well("B3".to_string());
        assert!(!dup.is_confirm());
        assert_eq!(dup.lightup_well.as_deref(), Some("B3"));
    }
}
