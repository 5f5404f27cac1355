use crate::well::Well;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type TransferId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    Uncompleted,
    Started,
    Completed,
    Discarded,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Uncompleted => "uncompleted",
            TransferStatus::Started => "started",
            TransferStatus::Completed => "completed",
            TransferStatus::Discarded => "discarded",
        }
    }

    /// A live record holds its barcode against reuse elsewhere.
    pub fn is_live(&self) -> bool {
        matches!(self, TransferStatus::Started | TransferStatus::Completed)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One well's journey from empty to holding a tube's contents. Owned
/// exclusively by the sequence that created it and never deleted; a removed
/// well is a record with status Discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: TransferId,
    pub dest_plate: String,
    pub dest_well: Well,
    pub source_tube: Option<String>,
    pub status: TransferStatus,
    pub timestamp: Option<DateTime<Local>>,
}

impl TransferRecord {
    pub fn new(id: TransferId, dest_plate: &str, dest_well: Well) -> Self {
        Self {
            id,
            dest_plate: dest_plate.to_string(),
            dest_well,
            source_tube: None,
            status: TransferStatus::Uncompleted,
            timestamp: None,
        }
    }

    pub fn reserved(id: TransferId, dest_plate: &str, dest_well: Well, barcode: &str) -> Self {
        Self {
            source_tube: Some(barcode.to_string()),
            ..Self::new(id, dest_plate, dest_well)
        }
    }

    /// The timestamp tracks every status change and is None exactly in the
    /// Uncompleted state, which is what re-opens a well for scanning.
    pub fn update_status(&mut self, status: TransferStatus) {
        self.status = status;
        self.timestamp = match status {
            TransferStatus::Uncompleted => None,
            TransferStatus::Started | TransferStatus::Completed | TransferStatus::Discarded => {
                Some(Local::now())
            }
        };
    }

    pub fn reset(&mut self) {
        self.source_tube = None;
        self.update_status(TransferStatus::Uncompleted);
    }

    pub fn formatted_timestamp(&self) -> String {
        match &self.timestamp {
            Some(ts) => ts.format("%Y%m%d-%H%M%S").to_string(),
            None => String::new(),
        }
    }
}
