use crate::error::{ErrorCode, TransferError};
use crate::well::{PlateSize, Well, is_valid_well};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

const AVAILABLE: &str = "AVAILABLE";
const NOT_AVAILABLE: &str = "NOT AVAILABLE";

/// One parsed row of the well template sheet. Empty cells are None; wells
/// default to available unless a row says otherwise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WellSpecRow {
    pub well: Option<String>,
    pub availability: Option<String>,
    pub barcode: Option<String>,
}

/// Control wells (excluded from aliquoting) and barcode reservations for one
/// plate layout. Rebuilding the table replaces it wholesale; the next
/// sequence build picks it up, nothing merges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReservationTable {
    controls: Vec<Well>,
    reservations: Vec<(String, Well)>,
}

impl ReservationTable {
    pub fn from_controls(size: PlateSize, controls: &[Well]) -> Result<Self, TransferError> {
        let rows: Vec<WellSpecRow> = controls
            .iter()
            .map(|well| WellSpecRow {
                well: Some(well.clone()),
                availability: Some(NOT_AVAILABLE.to_string()),
                barcode: None,
            })
            .collect();
        Self::from_rows(size, &rows)
    }

    pub fn from_rows(size: PlateSize, rows: &[WellSpecRow]) -> Result<Self, TransferError> {
        let invalid: Vec<&str> = rows
            .iter()
            .filter_map(|row| row.well.as_deref())
            .filter(|well| !is_valid_well(size, well))
            .collect();
        if !invalid.is_empty() {
            return Err(TransferError::new(
                ErrorCode::InvalidWellName,
                format!("invalid well(s) in template: {}", invalid.join(", ")),
            ));
        }

        let mut seen_barcodes = HashSet::new();
        for barcode in rows.iter().filter_map(|row| row.barcode.as_deref()) {
            if !seen_barcodes.insert(barcode) {
                return Err(TransferError::new(
                    ErrorCode::DuplicateBarcode,
                    format!("barcode {barcode} is repeated in the template"),
                ));
            }
        }

        let invalid: Vec<String> = rows
            .iter()
            .filter_map(|row| row.availability.as_deref())
            .map(str::to_uppercase)
            .filter(|value| value != AVAILABLE && value != NOT_AVAILABLE)
            .collect();
        if !invalid.is_empty() {
            return Err(TransferError::new(
                ErrorCode::InvalidAvailabilityValue,
                format!(
                    "invalid availability entries: {} (expected AVAILABLE or NOT AVAILABLE)",
                    invalid.join(", ")
                ),
            ));
        }

        let mut table = Self::default();
        for row in rows {
            let well = match row.well.as_deref() {
                Some(well) => well.to_uppercase(),
                None => continue,
            };
            let not_available = row
                .availability
                .as_deref()
                .is_some_and(|value| value.to_uppercase() == NOT_AVAILABLE);
            match (not_available, row.barcode.as_deref()) {
                (true, Some(barcode)) => {
                    return Err(TransferError::new(
                        ErrorCode::ConflictingWellSpec,
                        format!(
                            "well {well} is marked NOT AVAILABLE but also assigned barcode {barcode}"
                        ),
                    ));
                }
                (true, None) => table.controls.push(well),
                (false, Some(barcode)) => table.reservations.push((barcode.to_string(), well)),
                (false, None) => {}
            }
        }

        // A well may appear on several rows; it must end up as a control or
        // a reservation, never both, and reserved at most once.
        for (_, well) in &table.reservations {
            if table.controls.contains(well) {
                return Err(TransferError::new(
                    ErrorCode::ConflictingWellSpec,
                    format!("well {well} is both a control and a reserved well"),
                ));
            }
        }
        let mut reserved_wells = HashSet::new();
        for (barcode, well) in &table.reservations {
            if !reserved_wells.insert(well) {
                return Err(TransferError::new(
                    ErrorCode::ConflictingWellSpec,
                    format!("well {well} is reserved more than once (barcode {barcode})"),
                ));
            }
        }

        Ok(table)
    }

    /// Loads a template sheet: header row, then (well, availability,
    /// barcode) columns. Empty cells become None.
    pub fn from_csv_path(size: PlateSize, path: &Path) -> Result<Self, TransferError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;
        let mut rows = vec![];
        for result in reader.records() {
            let record = result?;
            let cell = |idx: usize| -> Option<String> {
                record
                    .get(idx)
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
            };
            rows.push(WellSpecRow {
                well: cell(0),
                availability: cell(1),
                barcode: cell(2),
            });
        }
        Self::from_rows(size, &rows)
    }

    pub fn controls(&self) -> &[Well] {
        &self.controls
    }

    pub fn reservations(&self) -> &[(String, Well)] {
        &self.reservations
    }

    pub fn is_control(&self, well: &str) -> bool {
        self.controls.iter().any(|control| control == well)
    }

    pub fn is_reserved_barcode(&self, barcode: &str) -> bool {
        self.reservations
            .iter()
            .any(|(reserved, _)| reserved == barcode)
    }

    pub fn well_for_barcode(&self, barcode: &str) -> Option<&Well> {
        self.reservations
            .iter()
            .find(|(reserved, _)| reserved == barcode)
            .map(|(_, well)| well)
    }

    pub fn is_reserved_well(&self, well: &str) -> bool {
        self.reservations
            .iter()
            .any(|(_, reserved)| reserved == well)
    }
}
