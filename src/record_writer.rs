use crate::transfer::{TransferRecord, TransferStatus};
use crate::transfer_sequence::TransferSequence;
use crate::well::Well;
use anyhow::{Context, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

/// One exported transfer, in sequence order. Only records that have left the
/// Uncompleted state are exported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecordRow {
    pub timestamp: String,
    pub source_tube: String,
    pub dest_plate: String,
    pub dest_well: Well,
    pub status: TransferStatus,
}

impl TransferRecordRow {
    pub fn from_record(tf: &TransferRecord) -> Self {
        Self {
            timestamp: tf.formatted_timestamp(),
            source_tube: tf.source_tube.clone().unwrap_or_default(),
            dest_plate: tf.dest_plate.clone(),
            dest_well: tf.dest_well.clone(),
            status: tf.status,
        }
    }

    /// Barcode as it appears in record files; discarded wells carry a
    /// suffix so downstream tooling can tell them apart.
    pub fn file_barcode(&self) -> String {
        match self.status {
            TransferStatus::Discarded => format!("{}-discarded", self.source_tube),
            _ => self.source_tube.clone(),
        }
    }
}

/// Ordered snapshot of one plate's progress, handed to the sink after every
/// mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateRecordExport {
    pub plate_timestamp: String,
    pub username: String,
    pub plate_barcode: String,
    pub rows: Vec<TransferRecordRow>,
}

impl PlateRecordExport {
    pub fn from_sequence(
        plate_timestamp: &str,
        username: &str,
        plate_barcode: &str,
        seq: &TransferSequence,
    ) -> Self {
        let rows = seq
            .records_in_order()
            .filter(|tf| tf.status != TransferStatus::Uncompleted)
            .map(TransferRecordRow::from_record)
            .collect();
        Self {
            plate_timestamp: plate_timestamp.to_string(),
            username: username.to_string(),
            plate_barcode: plate_barcode.to_string(),
            rows,
        }
    }

    pub fn file_stem(&self) -> String {
        format!("{}_{}_tube_to_plate", self.plate_timestamp, self.plate_barcode)
    }
}

/// External collaborator that receives the record snapshot after every
/// mutation. The engine never reads anything back.
pub trait RecordSink {
    fn write_snapshot(&mut self, export: &PlateRecordExport) -> Result<()>;

    /// Called once per undone transfer, before the undo unwinds it.
    fn write_undo_warning(&mut self, export: &PlateRecordExport, row: &TransferRecordRow)
    -> Result<()> {
        let _ = (export, row);
        Ok(())
    }

    /// Forgets per-plate state such as the warning file flag.
    fn start_new_plate(&mut self) {}
}

/// Sink for tests and headless embedding.
#[derive(Debug, Default)]
pub struct NullRecordSink;

impl RecordSink for NullRecordSink {
    fn write_snapshot(&mut self, _export: &PlateRecordExport) -> Result<()> {
        Ok(())
    }
}

/// Writes one record file per plate under the records directory, optionally
/// mirrored to a second directory, plus a warning file created on the first
/// undo of the plate and appended on every further one.
#[derive(Debug)]
pub struct CsvRecordSink {
    records_dir: PathBuf,
    mirror_dir: Option<PathBuf>,
    warning_file_started: bool,
}

impl CsvRecordSink {
    pub fn new(records_dir: impl Into<PathBuf>) -> Self {
        Self {
            records_dir: records_dir.into(),
            mirror_dir: None,
            warning_file_started: false,
        }
    }

    pub fn with_mirror_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mirror_dir = Some(dir.into());
        self
    }

    fn record_path(&self, dir: &Path, export: &PlateRecordExport) -> PathBuf {
        dir.join(format!("{}.csv", export.file_stem()))
    }

    fn warning_path(&self, export: &PlateRecordExport) -> PathBuf {
        self.records_dir
            .join(format!("{}_WARNING.csv", export.file_stem()))
    }

    fn write_metadata(writer: &mut csv::Writer<File>, export: &PlateRecordExport) -> Result<()> {
        writer.write_record(["%Plate Timestamp: ", export.plate_timestamp.as_str()])?;
        writer.write_record(["%Username: ", export.username.as_str()])?;
        writer.write_record(["%Plate Barcode: ", export.plate_barcode.as_str()])?;
        Ok(())
    }

    fn write_record_file(&self, dir: &Path, export: &PlateRecordExport) -> Result<()> {
        fs::create_dir_all(dir)
            .with_context(|| format!("cannot create records directory {}", dir.display()))?;
        let path = self.record_path(dir, export);
        let file = File::create(&path)
            .with_context(|| format!("cannot write record file {}", path.display()))?;
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
        Self::write_metadata(&mut writer, export)?;
        writer.write_record(["%Timestamp", "Tube Barcode", "Location"])?;
        for row in &export.rows {
            let barcode = row.file_barcode();
            writer.write_record([
                row.timestamp.as_str(),
                barcode.as_str(),
                row.dest_well.as_str(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

impl RecordSink for CsvRecordSink {
    fn write_snapshot(&mut self, export: &PlateRecordExport) -> Result<()> {
        let records_dir = self.records_dir.clone();
        self.write_record_file(&records_dir, export)?;
        if let Some(dir) = self.mirror_dir.clone() {
            self.write_record_file(&dir, export)?;
        }
        Ok(())
    }

    fn write_undo_warning(
        &mut self,
        export: &PlateRecordExport,
        row: &TransferRecordRow,
    ) -> Result<()> {
        fs::create_dir_all(&self.records_dir).with_context(|| {
            format!(
                "cannot create records directory {}",
                self.records_dir.display()
            )
        })?;
        let path = self.warning_path(export);
        if !self.warning_file_started {
            let file = File::create(&path)
                .with_context(|| format!("cannot write warning file {}", path.display()))?;
            let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
            Self::write_metadata(&mut writer, export)?;
            writer.write_record(["Timestamp", "Source Tube", "Destination well"])?;
            writer.flush()?;
            self.warning_file_started = true;
        }
        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .with_context(|| format!("cannot append to warning file {}", path.display()))?;
        let mut writer = csv::WriterBuilder::new().flexible(true).from_writer(file);
        let marker = format!(
            " Marked Undone at {}",
            Local::now().format("%Y%m%d-%H%M%S")
        );
        writer.write_record([
            row.timestamp.as_str(),
            row.source_tube.as_str(),
            row.dest_plate.as_str(),
            row.dest_well.as_str(),
            row.status.as_str(),
            marker.as_str(),
        ])?;
        writer.flush()?;
        Ok(())
    }

    fn start_new_plate(&mut self) {
        self.warning_file_started = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barcode::BarcodeFormats;
    use crate::reservation::ReservationTable;
    use crate::transfer_sequence::TransferSequence;
    use crate::well::{PlateSize, well_list};

    fn two_well_sequence() -> TransferSequence {
        let controls: Vec<Well> = well_list(PlateSize::Wells96)
            .into_iter()
            .filter(|well| well.as_str() != "A1" && well.as_str() != "B1")
            .collect();
        let table = ReservationTable::from_controls(PlateSize::Wells96, &controls).unwrap();
        TransferSequence::build(PlateSize::Wells96, "PLATE01", &table, BarcodeFormats::default())
    }

    fn export(seq: &TransferSequence) -> PlateRecordExport {
        PlateRecordExport::from_sequence("20260805-120000", "jdoe", "PLATE01", seq)
    }

    #[test]
    fn test_export_skips_uncompleted() {
        let mut seq = two_well_sequence();
        assert!(export(&seq).rows.is_empty());
        seq.next("T0001").unwrap();
        let rows = export(&seq).rows;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].dest_well, "A1");
        assert_eq!(rows[0].source_tube, "T0001");
        assert_eq!(rows[0].status, TransferStatus::Started);
        assert!(!rows[0].timestamp.is_empty());
    }

    #[test]
    fn test_discarded_rows_get_suffix() {
        let mut seq = two_well_sequence();
        seq.skip().unwrap();
        let rows = export(&seq).rows;
        assert_eq!(rows[0].file_barcode(), "EMPTY-discarded");
    }

    #[test]
    fn test_csv_sink_writes_record_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvRecordSink::new(dir.path());
        let mut seq = two_well_sequence();
        seq.next("T0001").unwrap();
        seq.next("T0002").unwrap();
        sink.write_snapshot(&export(&seq)).unwrap();

        let path = dir.path().join("20260805-120000_PLATE01_tube_to_plate.csv");
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("%Plate Timestamp: ,20260805-120000"));
        assert!(text.contains("%Username: ,jdoe"));
        assert!(text.contains("%Timestamp,Tube Barcode,Location"));
        assert!(text.contains(",T0001,A1"));
        assert!(text.contains(",T0002,B1"));
    }

    #[test]
    fn test_csv_sink_mirrors() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = tempfile::tempdir().unwrap();
        let mut sink = CsvRecordSink::new(dir.path()).with_mirror_dir(mirror.path());
        let mut seq = two_well_sequence();
        seq.next("T0001").unwrap();
        sink.write_snapshot(&export(&seq)).unwrap();
        assert!(dir.path().join("20260805-120000_PLATE01_tube_to_plate.csv").exists());
        assert!(
            mirror
                .path()
                .join("20260805-120000_PLATE01_tube_to_plate.csv")
                .exists()
        );
    }

    #[test]
    fn test_warning_file_created_once_then_appended() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = CsvRecordSink::new(dir.path());
        let mut seq = two_well_sequence();
        seq.next("T0001").unwrap();
        let ex = export(&seq);
        let row = ex.rows[0].clone();
        sink.write_undo_warning(&ex, &row).unwrap();
        sink.write_undo_warning(&ex, &row).unwrap();

        let path = dir.path().join("20260805-120000_PLATE01_tube_to_plate_WARNING.csv");
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("Timestamp,Source Tube,Destination well").count(), 1);
        assert_eq!(text.matches("Marked Undone at").count(), 2);

        sink.start_new_plate();
        sink.write_undo_warning(&ex, &row).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        // A new plate starts a fresh file.
        assert_eq!(text.matches("Marked Undone at").count(), 1);
    }
}
