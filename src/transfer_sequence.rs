use crate::barcode::BarcodeFormats;
use crate::error::{ErrorCode, TransferError};
use crate::reservation::ReservationTable;
use crate::transfer::{TransferId, TransferRecord, TransferStatus};
use crate::well::{PlateSize, Well, well_list};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::info;

/// Sentinel barcode that marks the current well as skipped. Skipped records
/// go straight to Discarded, so rescanning the sentinel never collides with
/// the uniqueness guard.
pub const EMPTY_FLAG: &str = "EMPTY";

/// Wells grouped by record status, maintained at the transition site instead
/// of re-sorting the whole sequence on every query. Ordered sets so renderer
/// output is stable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusBuckets {
    uncompleted: BTreeSet<Well>,
    started: BTreeSet<Well>,
    completed: BTreeSet<Well>,
    discarded: BTreeSet<Well>,
}

impl StatusBuckets {
    fn bucket_mut(&mut self, status: TransferStatus) -> &mut BTreeSet<Well> {
        match status {
            TransferStatus::Uncompleted => &mut self.uncompleted,
            TransferStatus::Started => &mut self.started,
            TransferStatus::Completed => &mut self.completed,
            TransferStatus::Discarded => &mut self.discarded,
        }
    }

    fn insert(&mut self, status: TransferStatus, well: &Well) {
        self.bucket_mut(status).insert(well.clone());
    }

    fn remove(&mut self, status: TransferStatus, well: &str) {
        self.bucket_mut(status).remove(well);
    }

    pub fn uncompleted(&self) -> &BTreeSet<Well> {
        &self.uncompleted
    }

    pub fn started(&self) -> &BTreeSet<Well> {
        &self.started
    }

    pub fn completed(&self) -> &BTreeSet<Well> {
        &self.completed
    }

    pub fn discarded(&self) -> &BTreeSet<Well> {
        &self.discarded
    }
}

/// Ordered sequence of transfers for one plate: the scan order, the record
/// store, a cursor, and the reservation data the sequence was built from.
/// Rebuilt fresh whenever plate metadata is set or the plate is reset; no
/// state carries across plates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferSequence {
    tf_seq: Vec<TransferId>,
    transfers: HashMap<TransferId, TransferRecord>,
    current_idx: usize,
    can_undo: bool,
    table: ReservationTable,
    lightup_well: Option<Well>,
    discarded_well_barcode: Option<String>,
    buckets: StatusBuckets,
    tf_counter: u64,
    #[serde(skip, default)]
    formats: BarcodeFormats,
}

impl TransferSequence {
    pub fn build(
        size: PlateSize,
        dest_plate: &str,
        table: &ReservationTable,
        formats: BarcodeFormats,
    ) -> Self {
        let mut seq = Self {
            tf_seq: vec![],
            transfers: HashMap::new(),
            current_idx: 0,
            can_undo: false,
            table: table.clone(),
            lightup_well: None,
            discarded_well_barcode: None,
            buckets: StatusBuckets::default(),
            tf_counter: 0,
            formats,
        };
        for well in well_list(size) {
            if table.is_control(&well) || table.is_reserved_well(&well) {
                continue;
            }
            let id = seq.next_tf_id();
            seq.push_record(TransferRecord::new(id, dest_plate, well));
        }
        for (barcode, well) in table.reservations() {
            let id = seq.next_tf_id();
            seq.push_record(TransferRecord::reserved(id, dest_plate, well.clone(), barcode));
        }
        seq
    }

    fn next_tf_id(&mut self) -> TransferId {
        self.tf_counter += 1;
        format!("tf-{}", self.tf_counter)
    }

    fn push_record(&mut self, tf: TransferRecord) {
        self.buckets.insert(tf.status, &tf.dest_well);
        self.tf_seq.push(tf.id.clone());
        self.transfers.insert(tf.id.clone(), tf);
    }

    pub fn len(&self) -> usize {
        self.tf_seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tf_seq.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.current_idx
    }

    pub fn can_undo(&self) -> bool {
        self.can_undo
    }

    pub fn lightup_well(&self) -> Option<&Well> {
        self.lightup_well.as_ref()
    }

    pub fn discarded_well_barcode(&self) -> Option<&str> {
        self.discarded_well_barcode.as_deref()
    }

    pub fn buckets(&self) -> &StatusBuckets {
        &self.buckets
    }

    pub fn record_at(&self, idx: usize) -> Option<&TransferRecord> {
        self.tf_seq.get(idx).and_then(|id| self.transfers.get(id))
    }

    pub fn current_transfer(&self) -> Option<&TransferRecord> {
        self.record_at(self.current_idx)
    }

    pub fn records_in_order(&self) -> impl Iterator<Item = &TransferRecord> {
        self.tf_seq.iter().filter_map(|id| self.transfers.get(id))
    }

    pub fn find_transfer_by_barcode(&self, barcode: &str) -> Option<&TransferRecord> {
        self.records_in_order().find(|tf| {
            tf.source_tube.as_deref() == Some(barcode) && tf.status != TransferStatus::Discarded
        })
    }

    /// True iff no record is still waiting for its first scan.
    pub fn plate_complete(&self) -> bool {
        self.buckets.uncompleted.is_empty()
    }

    /// Primary advance operation, one call per physical scan.
    pub fn next(&mut self, barcode: &str) -> Result<(), TransferError> {
        if self.plate_complete() {
            return Err(Self::plate_complete_signal());
        }
        self.ensure_can_update()?;
        if barcode != EMPTY_FLAG && !self.formats.is_tube(barcode) {
            return Err(TransferError::new(
                ErrorCode::InvalidBarcodeFormat,
                format!("{barcode} is not a valid barcode"),
            ));
        }

        if self.table.is_reserved_barcode(barcode) {
            match self.position_of_barcode(barcode) {
                Some((idx, TransferStatus::Uncompleted)) => self.reorder_to_cursor(idx),
                // Started or Completed: the uniqueness guard below reports it
                Some(_) => {}
                None => {
                    // The reserved well was discarded; fall back to any
                    // spare unreserved well.
                    match self.first_untouched_unreserved() {
                        Some(idx) => self.reorder_to_cursor(idx),
                        None => {
                            return Err(TransferError::new(
                                ErrorCode::NoAvailableWell,
                                format!(
                                    "tube {barcode} belongs to a reserved well that was discarded and no spare wells remain"
                                ),
                            ));
                        }
                    }
                }
            }
        } else {
            match self.first_untouched_unreserved() {
                Some(idx) => self.reorder_to_cursor(idx),
                None => {
                    return Err(TransferError::new(
                        ErrorCode::NoAvailableWell,
                        format!("no spare non-reserved wells are available for tube {barcode}"),
                    ));
                }
            }
        }

        if let Some(existing) = self.live_holder_well(barcode) {
            // The close-previous side effect commits even on this failure;
            // record files written afterwards reflect it.
            self.close_previous();
            self.lightup_well = Some(existing.clone());
            return Err(TransferError::new(
                ErrorCode::DuplicateBarcode,
                format!("Tube already scanned into well {existing}"),
            )
            .with_well(existing));
        }

        if let Some(id) = self.tf_seq.get(self.current_idx).cloned() {
            if let Some(tf) = self.transfers.get_mut(&id) {
                tf.source_tube = Some(barcode.to_string());
            }
            self.set_status(&id, TransferStatus::Started);
            if barcode == EMPTY_FLAG {
                self.set_status(&id, TransferStatus::Discarded);
            }
            if let Some(tf) = self.transfers.get(&id) {
                info!(well = %tf.dest_well, barcode, "transfer started");
            }
        }
        self.close_previous();
        self.lightup_well = None;
        self.step();
        Ok(())
    }

    /// Marks the current well as empty and moves on.
    pub fn skip(&mut self) -> Result<(), TransferError> {
        self.next(EMPTY_FLAG)
    }

    /// Discards the record at `well` wherever it sits, releasing its barcode
    /// for reuse elsewhere. The cursor does not move; unknown or already
    /// discarded wells are ignored.
    pub fn discard_specific_well(&mut self, well: &str) {
        let well = well.to_uppercase();
        let target = (0..self.tf_seq.len()).find(|idx| {
            self.record_at(*idx)
                .is_some_and(|tf| tf.dest_well == well && tf.status != TransferStatus::Discarded)
        });
        if let Some(idx) = target {
            self.discarded_well_barcode =
                self.record_at(idx).and_then(|tf| tf.source_tube.clone());
            self.set_status_at(idx, TransferStatus::Discarded);
            info!(well = %well, "well discarded");
        }
    }

    /// Cancels the in-flight scan so a new tube can go into the same well.
    /// One-shot: a second call without an intervening successful scan fails.
    pub fn undo_current_scan(&mut self) -> Result<(), TransferError> {
        if self.current_idx == 0 || !self.can_undo {
            return Err(TransferError::new(ErrorCode::NothingToUndo, "no scan to undo"));
        }
        self.current_idx -= 1;
        let reserved = self
            .current_transfer()
            .and_then(|tf| tf.source_tube.as_deref())
            .is_some_and(|barcode| self.table.is_reserved_barcode(barcode));
        if reserved {
            // Keep the reservation barcode; only the status unwinds.
            self.set_status_at(self.current_idx, TransferStatus::Uncompleted);
        } else {
            self.reset_at(self.current_idx);
        }
        self.can_undo = false;
        info!("current scan cancelled, well re-opened");
        Ok(())
    }

    /// Unwinds one full scan: the record two back from the cursor re-opens
    /// as Started and the record one back is fully reset, because every scan
    /// both closed out its predecessor and opened its own record.
    pub fn undo(&mut self) -> Result<(), TransferError> {
        if self.current_idx == 0 || !self.can_undo {
            return Err(TransferError::new(
                ErrorCode::NothingToUndo,
                "cannot undo previous operation",
            ));
        }
        if self.current_idx >= 2 {
            self.set_status_at(self.current_idx - 2, TransferStatus::Started);
            self.reset_at(self.current_idx - 1);
            self.current_idx -= 1;
        } else {
            self.reset_at(0);
            self.current_idx = 0;
        }
        self.can_undo = false;
        info!("previous transfer marked incomplete");
        Ok(())
    }

    /// First Started record in scan order, if any. Used by the scan-out
    /// confirmation gate.
    pub fn started_record(&self) -> Option<&TransferRecord> {
        self.records_in_order()
            .find(|tf| tf.status == TransferStatus::Started)
    }

    /// Completes the first Started record, returning its well.
    pub fn complete_started(&mut self) -> Option<Well> {
        let id = self
            .tf_seq
            .iter()
            .find(|id| {
                self.transfers
                    .get(*id)
                    .is_some_and(|tf| tf.status == TransferStatus::Started)
            })
            .cloned()?;
        self.set_status(&id, TransferStatus::Completed);
        self.transfers.get(&id).map(|tf| tf.dest_well.clone())
    }

    fn plate_complete_signal() -> TransferError {
        TransferError::new(
            ErrorCode::PlateComplete,
            "Plate is complete, press Finish Plate to start a new plate",
        )
    }

    fn ensure_can_update(&self) -> Result<(), TransferError> {
        match self.current_transfer() {
            Some(tf) if tf.timestamp.is_none() => Ok(()),
            Some(tf) => Err(TransferError::new(
                ErrorCode::AlreadyUpdated,
                format!(
                    "cannot update well {}: already marked as {}",
                    tf.dest_well, tf.status
                ),
            )
            .with_well(tf.dest_well.clone())),
            None => Err(Self::plate_complete_signal()),
        }
    }

    fn position_of_barcode(&self, barcode: &str) -> Option<(usize, TransferStatus)> {
        (0..self.tf_seq.len()).find_map(|idx| {
            let tf = self.record_at(idx)?;
            if tf.source_tube.as_deref() == Some(barcode)
                && tf.status != TransferStatus::Discarded
            {
                Some((idx, tf.status))
            } else {
                None
            }
        })
    }

    fn first_untouched_unreserved(&self) -> Option<usize> {
        (0..self.tf_seq.len()).find(|idx| {
            self.record_at(*idx).is_some_and(|tf| {
                tf.status == TransferStatus::Uncompleted
                    && !tf
                        .source_tube
                        .as_deref()
                        .is_some_and(|barcode| self.table.is_reserved_barcode(barcode))
            })
        })
    }

    fn live_holder_well(&self, barcode: &str) -> Option<Well> {
        self.records_in_order()
            .find(|tf| tf.source_tube.as_deref() == Some(barcode) && tf.status.is_live())
            .map(|tf| tf.dest_well.clone())
    }

    /// Moves an untouched record to the cursor position. Records that are
    /// Started, Completed, or Discarded all sit before the cursor and are
    /// never passed in here, so the committed prefix keeps its order.
    fn reorder_to_cursor(&mut self, from_idx: usize) {
        if from_idx <= self.current_idx || from_idx >= self.tf_seq.len() {
            return;
        }
        let id = self.tf_seq.remove(from_idx);
        self.tf_seq.insert(self.current_idx, id);
    }

    fn close_previous(&mut self) {
        if self.current_idx == 0 {
            return;
        }
        let keep = self
            .record_at(self.current_idx - 1)
            .is_some_and(|tf| tf.status == TransferStatus::Discarded);
        if !keep {
            self.set_status_at(self.current_idx - 1, TransferStatus::Completed);
        }
    }

    fn step(&mut self) {
        self.can_undo = true;
        if self.current_idx < self.tf_seq.len() {
            self.current_idx += 1;
        }
    }

    fn set_status_at(&mut self, idx: usize, status: TransferStatus) {
        if let Some(id) = self.tf_seq.get(idx).cloned() {
            self.set_status(&id, status);
        }
    }

    // Single transition site; the record and its bucket move together.
    fn set_status(&mut self, id: &TransferId, status: TransferStatus) {
        if let Some(tf) = self.transfers.get_mut(id) {
            self.buckets.remove(tf.status, &tf.dest_well);
            tf.update_status(status);
            self.buckets.insert(status, &tf.dest_well);
        }
    }

    fn reset_at(&mut self, idx: usize) {
        if let Some(id) = self.tf_seq.get(idx).cloned() {
            if let Some(tf) = self.transfers.get_mut(&id) {
                self.buckets.remove(tf.status, &tf.dest_well);
                tf.reset();
                self.buckets.insert(TransferStatus::Uncompleted, &tf.dest_well);
            }
        }
    }
}
