use crate::barcode::BarcodeFormats;
use crate::config::PlateConfig;
use crate::error::{ErrorCode, TransferError};
use crate::record_writer::{PlateRecordExport, RecordSink, TransferRecordRow};
use crate::reservation::ReservationTable;
use crate::transfer_sequence::TransferSequence;
use crate::well::Well;
use chrono::Local;
use std::path::Path;
use tracing::{info, warn};

/// Orchestration facade: validates raw scan input, gates on the scan-out
/// confirmation and the sample allow-list, delegates to the transfer
/// sequence, and hands the record sink a full ordered snapshot after every
/// mutation.
pub struct ScanController {
    config: PlateConfig,
    formats: BarcodeFormats,
    table: ReservationTable,
    sequence: TransferSequence,
    sample_list: Option<Vec<String>>,
    sink: Box<dyn RecordSink>,
    plate_barcode: String,
    user: String,
    plate_timestamp: String,
    scanned_out: bool,
}

impl ScanController {
    pub fn new(config: PlateConfig, sink: Box<dyn RecordSink>) -> Result<Self, TransferError> {
        let formats = config.barcode_formats()?;
        let table = ReservationTable::from_controls(config.num_wells, &config.controls)?;
        let sequence = TransferSequence::build(config.num_wells, "", &table, formats.clone());
        Ok(Self {
            config,
            formats,
            table,
            sequence,
            sample_list: None,
            sink,
            plate_barcode: String::new(),
            user: String::new(),
            plate_timestamp: String::new(),
            scanned_out: true,
        })
    }

    /// Stamps the plate metadata and starts a fresh transfer sequence;
    /// nothing carries over from the previous plate.
    pub fn set_metadata(&mut self, plate_barcode: &str, user: &str) -> Result<(), TransferError> {
        if !self.formats.is_plate(plate_barcode) {
            return Err(TransferError::new(
                ErrorCode::InvalidBarcodeFormat,
                format!("{plate_barcode} is not a valid plate barcode"),
            ));
        }
        if !self.formats.is_name(user) {
            return Err(TransferError::new(
                ErrorCode::InvalidBarcodeFormat,
                format!("{user} is not a valid username"),
            ));
        }
        self.plate_barcode = plate_barcode.to_string();
        self.user = user.to_string();
        self.plate_timestamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        self.rebuild_sequence();
        info!(plate = plate_barcode, user, "plate metadata set");
        Ok(())
    }

    pub fn reset(&mut self) {
        self.plate_barcode.clear();
        self.user.clear();
        self.plate_timestamp.clear();
        self.sample_list = None;
        self.rebuild_sequence();
        info!("plate reset");
    }

    fn rebuild_sequence(&mut self) {
        self.sequence = TransferSequence::build(
            self.config.num_wells,
            &self.plate_barcode,
            &self.table,
            self.formats.clone(),
        );
        self.scanned_out = true;
        self.sink.start_new_plate();
    }

    /// Replaces the reservation table wholesale and rebuilds the sequence.
    pub fn set_reservation_table(&mut self, table: ReservationTable) {
        self.table = table;
        self.rebuild_sequence();
    }

    pub fn load_well_template_csv(&mut self, path: &Path) -> Result<(), TransferError> {
        let table = ReservationTable::from_csv_path(self.config.num_wells, path)?;
        info!(
            controls = table.controls().len(),
            reservations = table.reservations().len(),
            "well template loaded"
        );
        self.set_reservation_table(table);
        Ok(())
    }

    pub fn set_sample_list(&mut self, samples: Vec<String>) {
        info!(count = samples.len(), "sample list loaded");
        self.sample_list = Some(samples);
    }

    /// Loads the allow-list of sample names: one header row, then one name
    /// per row in the first column.
    pub fn load_sample_list_csv(&mut self, path: &Path) -> Result<(), TransferError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)?;
        let mut samples = vec![];
        for result in reader.records() {
            let record = result?;
            if let Some(name) = record.get(0).map(str::trim).filter(|name| !name.is_empty()) {
                samples.push(name.to_string());
            }
        }
        self.set_sample_list(samples);
        Ok(())
    }

    /// One call per physical scan.
    pub fn next(&mut self, barcode: &str) -> Result<(), TransferError> {
        let barcode = barcode.trim();

        if self.config.enable_scan_out && !self.scanned_out {
            let in_flight = self
                .sequence
                .started_record()
                .and_then(|tf| tf.source_tube.clone());
            match in_flight {
                Some(prev) if prev == barcode => {
                    self.sequence.complete_started();
                    self.scanned_out = true;
                    info!(barcode, "tube scanned out");
                    return self.write_records();
                }
                Some(prev) => {
                    return Err(TransferError::new(
                        ErrorCode::ScanOutMismatch,
                        format!(
                            "You scanned a new barcode ({barcode}) without scanning out the current one ({prev})."
                        ),
                    ));
                }
                None => self.scanned_out = true,
            }
        }

        if !self.table.is_reserved_barcode(barcode) {
            if let Some(samples) = &self.sample_list {
                if !samples.iter().any(|sample| sample == barcode) {
                    return Err(TransferError::new(
                        ErrorCode::SampleNotListed,
                        format!("Sample barcode {barcode} not in list of pre-defined sample names"),
                    ));
                }
            }
        }

        self.sequence.next(barcode)?;
        if self.config.enable_scan_out {
            self.scanned_out = false;
        }
        self.write_records()
    }

    pub fn skip(&mut self) -> Result<(), TransferError> {
        self.sequence.skip()?;
        self.write_records()
    }

    pub fn discard_well(&mut self, well: &str) -> Result<(), TransferError> {
        self.sequence.discard_specific_well(well);
        self.write_records()
    }

    pub fn undo_current_scan(&mut self) -> Result<(), TransferError> {
        let undone = self.previous_row();
        self.sequence.undo_current_scan()?;
        if let Some(row) = undone {
            self.write_warning(&row)?;
        }
        self.write_records()
    }

    pub fn undo(&mut self) -> Result<(), TransferError> {
        let undone = self.previous_row();
        self.sequence.undo()?;
        if let Some(row) = undone {
            self.write_warning(&row)?;
        }
        self.write_records()
    }

    pub fn plate_complete(&self) -> bool {
        self.sequence.plate_complete()
    }

    pub fn sequence(&self) -> &TransferSequence {
        &self.sequence
    }

    pub fn reservation_table(&self) -> &ReservationTable {
        &self.table
    }

    pub fn lightup_well(&self) -> Option<&Well> {
        self.sequence.lightup_well()
    }

    pub fn plate_barcode(&self) -> &str {
        &self.plate_barcode
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn plate_timestamp(&self) -> &str {
        &self.plate_timestamp
    }

    pub fn export(&self) -> PlateRecordExport {
        PlateRecordExport::from_sequence(
            &self.plate_timestamp,
            &self.user,
            &self.plate_barcode,
            &self.sequence,
        )
    }

    fn previous_row(&self) -> Option<TransferRecordRow> {
        let cursor = self.sequence.cursor();
        if cursor == 0 {
            return None;
        }
        self.sequence
            .record_at(cursor - 1)
            .map(TransferRecordRow::from_record)
    }

    fn write_records(&mut self) -> Result<(), TransferError> {
        let export = self.export();
        self.sink.write_snapshot(&export).map_err(|e| {
            warn!("record write failed: {e:#}");
            TransferError::new(ErrorCode::Io, format!("cannot write record file: {e:#}"))
        })
    }

    fn write_warning(&mut self, row: &TransferRecordRow) -> Result<(), TransferError> {
        let export = self.export();
        self.sink.write_undo_warning(&export, row).map_err(|e| {
            warn!("warning write failed: {e:#}");
            TransferError::new(ErrorCode::Io, format!("cannot write warning file: {e:#}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_writer::NullRecordSink;
    use crate::reservation::WellSpecRow;
    use crate::transfer::TransferStatus;
    use crate::well::{PlateSize, well_list};
    use anyhow::Result;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct CapturingSink {
        snapshots: Arc<Mutex<Vec<PlateRecordExport>>>,
        warnings: Arc<Mutex<Vec<TransferRecordRow>>>,
        new_plates: Arc<Mutex<usize>>,
    }

    impl RecordSink for CapturingSink {
        fn write_snapshot(&mut self, export: &PlateRecordExport) -> Result<()> {
            self.snapshots.lock().unwrap().push(export.clone());
            Ok(())
        }

        fn write_undo_warning(
            &mut self,
            _export: &PlateRecordExport,
            row: &TransferRecordRow,
        ) -> Result<()> {
            self.warnings.lock().unwrap().push(row.clone());
            Ok(())
        }

        fn start_new_plate(&mut self) {
            *self.new_plates.lock().unwrap() += 1;
        }
    }

    fn small_config(keep: &[&str]) -> PlateConfig {
        let controls: Vec<Well> = well_list(PlateSize::Wells96)
            .into_iter()
            .filter(|well| !keep.contains(&well.as_str()))
            .collect();
        PlateConfig {
            controls,
            ..PlateConfig::default()
        }
    }

    fn controller(keep: &[&str]) -> (ScanController, CapturingSink) {
        let sink = CapturingSink::default();
        let mut ttw =
            ScanController::new(small_config(keep), Box::new(sink.clone())).unwrap();
        ttw.set_metadata("PLATE01", "jdoe").unwrap();
        (ttw, sink)
    }

    #[test]
    fn test_scan_flow_snapshots_after_each_mutation() {
        let (mut ttw, sink) = controller(&["A1", "B1"]);
        ttw.next("T0001").unwrap();
        ttw.next("T0002").unwrap();
        let snapshots = sink.snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 2);
        let last = snapshots.last().unwrap();
        assert_eq!(last.plate_barcode, "PLATE01");
        assert_eq!(last.rows.len(), 2);
        assert_eq!(last.rows[0].dest_plate, "PLATE01");
        assert!(ttw.plate_complete());
    }

    #[test]
    fn test_metadata_validation() {
        let config = PlateConfig {
            plate_barcode_pattern: Some(r"^P\d{4}$".to_string()),
            ..small_config(&["A1"])
        };
        let mut ttw = ScanController::new(config, Box::new(NullRecordSink)).unwrap();
        let err = ttw.set_metadata("nope nope", "jdoe").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidBarcodeFormat);
        ttw.set_metadata("P0001", "jdoe").unwrap();
        assert_eq!(ttw.plate_barcode(), "P0001");
        assert!(!ttw.plate_timestamp().is_empty());
    }

    #[test]
    fn test_sample_list_gate() {
        let (mut ttw, _) = controller(&["A1", "B1", "C1"]);
        ttw.set_sample_list(vec!["T0001".to_string()]);
        let err = ttw.next("T9999").unwrap_err();
        assert_eq!(err.code, ErrorCode::SampleNotListed);
        assert_eq!(ttw.sequence().cursor(), 0);
        ttw.next("T0001").unwrap();
        assert_eq!(ttw.sequence().cursor(), 1);
    }

    #[test]
    fn test_reserved_barcode_bypasses_sample_list() {
        let sink = CapturingSink::default();
        let config = small_config(&["A1"]);
        let mut ttw = ScanController::new(config, Box::new(sink)).unwrap();
        let rows = vec![WellSpecRow {
            well: Some("C1".to_string()),
            availability: None,
            barcode: Some("RES1".to_string()),
        }];
        ttw.set_reservation_table(
            ReservationTable::from_rows(PlateSize::Wells96, &rows).unwrap(),
        );
        ttw.set_metadata("PLATE01", "jdoe").unwrap();
        ttw.set_sample_list(vec![]);
        ttw.next("RES1").unwrap();
        let started = ttw.sequence().buckets().started();
        assert!(started.contains("C1"));
    }

    #[test]
    fn test_scan_out_gate() {
        let config = PlateConfig {
            enable_scan_out: true,
            ..small_config(&["A1", "B1"])
        };
        let mut ttw = ScanController::new(config, Box::new(NullRecordSink)).unwrap();
        ttw.set_metadata("PLATE01", "jdoe").unwrap();

        ttw.next("T0001").unwrap();
        let err = ttw.next("T0002").unwrap_err();
        assert_eq!(err.code, ErrorCode::ScanOutMismatch);

        // Rescanning the in-flight tube confirms it.
        ttw.next("T0001").unwrap();
        assert!(ttw.sequence().buckets().completed().contains("A1"));

        ttw.next("T0002").unwrap();
        assert!(ttw.sequence().buckets().started().contains("B1"));
    }

    #[test]
    fn test_undo_writes_warning_row() {
        let (mut ttw, sink) = controller(&["A1", "B1"]);
        ttw.next("T0001").unwrap();
        ttw.undo_current_scan().unwrap();
        let warnings = sink.warnings.lock().unwrap();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].dest_well, "A1");
        assert_eq!(warnings[0].source_tube, "T0001");
        drop(warnings);

        let err = ttw.undo_current_scan().unwrap_err();
        assert_eq!(err.code, ErrorCode::NothingToUndo);
        assert_eq!(sink.warnings.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_undo_after_two_scans() {
        let (mut ttw, sink) = controller(&["A1", "B1", "C1"]);
        ttw.next("T0001").unwrap();
        ttw.next("T0002").unwrap();
        ttw.undo().unwrap();
        assert_eq!(ttw.sequence().cursor(), 1);
        assert_eq!(
            ttw.sequence().record_at(0).unwrap().status,
            TransferStatus::Started
        );
        assert_eq!(sink.warnings.lock().unwrap().len(), 1);
        assert_eq!(sink.warnings.lock().unwrap()[0].dest_well, "B1");
    }

    #[test]
    fn test_reset_discards_plate_state() {
        let (mut ttw, sink) = controller(&["A1", "B1"]);
        ttw.set_sample_list(vec!["T0001".to_string()]);
        ttw.next("T0001").unwrap();
        ttw.reset();
        assert_eq!(ttw.sequence().cursor(), 0);
        assert_eq!(ttw.plate_barcode(), "");
        assert!(ttw.sequence().buckets().started().is_empty());
        // The sample list does not survive a reset.
        ttw.next("T0002").unwrap();
        // set_metadata + reset + construction each announce a new plate.
        assert!(*sink.new_plates.lock().unwrap() >= 2);
    }

    #[test]
    fn test_load_sample_list_csv() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("samples.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "Sample Names").unwrap();
        writeln!(file, "T0001").unwrap();
        writeln!(file, "T0002").unwrap();
        drop(file);

        let (mut ttw, _) = controller(&["A1", "B1", "C1"]);
        ttw.load_sample_list_csv(&path).unwrap();
        ttw.next("T0001").unwrap();
        ttw.next("T0002").unwrap();
        let err = ttw.next("T0003").unwrap_err();
        assert_eq!(err.code, ErrorCode::SampleNotListed);
    }

    #[test]
    fn test_template_replaces_default_controls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("template.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "Well,Availability,Barcode").unwrap();
        for well in well_list(PlateSize::Wells96) {
            if well.as_str() != "A1" && well.as_str() != "D4" {
                writeln!(file, "{well},NOT AVAILABLE,").unwrap();
            }
        }
        writeln!(file, "D4,,RES1").unwrap();
        drop(file);

        let (mut ttw, _) = controller(&["H12"]);
        ttw.load_well_template_csv(&path).unwrap();
        ttw.set_metadata("PLATE02", "jdoe").unwrap();
        // H12 is no longer usable; A1 and the reserved D4 are.
        assert_eq!(ttw.sequence().len(), 2);
        ttw.next("RES1").unwrap();
        assert!(ttw.sequence().buckets().started().contains("D4"));
    }
}
