use crate::barcode::BarcodeFormats;
use crate::error::TransferError;
use crate::well::{PlateSize, Well};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Per-deployment configuration, passed explicitly at controller
/// construction. Control wells listed here apply until a well template sheet
/// replaces them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlateConfig {
    pub num_wells: PlateSize,
    pub controls: Vec<Well>,
    pub enable_scan_out: bool,
    pub records_dir: PathBuf,
    pub samples_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub tube_barcode_pattern: Option<String>,
    pub plate_barcode_pattern: Option<String>,
    pub username_pattern: Option<String>,
}

impl Default for PlateConfig {
    fn default() -> Self {
        Self {
            num_wells: PlateSize::Wells96,
            controls: vec![],
            enable_scan_out: false,
            records_dir: PathBuf::from("records"),
            samples_dir: PathBuf::from("samples"),
            templates_dir: PathBuf::from("templates"),
            tube_barcode_pattern: None,
            plate_barcode_pattern: None,
            username_pattern: None,
        }
    }
}

impl PlateConfig {
    pub fn from_json_path(path: &str) -> Result<Self, TransferError> {
        let text = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        Ok(config)
    }

    pub fn barcode_formats(&self) -> Result<BarcodeFormats, TransferError> {
        BarcodeFormats::from_patterns(
            self.tube_barcode_pattern.as_deref(),
            self.plate_barcode_pattern.as_deref(),
            self.username_pattern.as_deref(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PlateConfig::default();
        assert_eq!(config.num_wells, PlateSize::Wells96);
        assert!(config.controls.is_empty());
        assert!(!config.enable_scan_out);
    }

    #[test]
    fn test_parse_json() {
        let config: PlateConfig = serde_json::from_str(
            r#"{
                "num_wells": 384,
                "controls": ["A1", "P24"],
                "enable_scan_out": true,
                "records_dir": "/tmp/records"
            }"#,
        )
        .unwrap();
        assert_eq!(config.num_wells, PlateSize::Wells384);
        assert_eq!(config.controls, vec!["A1".to_string(), "P24".to_string()]);
        assert!(config.enable_scan_out);
        assert_eq!(config.records_dir, PathBuf::from("/tmp/records"));
        assert_eq!(config.samples_dir, PathBuf::from("samples"));
    }

    #[test]
    fn test_formats_from_config() {
        let config = PlateConfig {
            tube_barcode_pattern: Some(r"^T\d{4}$".to_string()),
            ..PlateConfig::default()
        };
        let formats = config.barcode_formats().unwrap();
        assert!(formats.is_tube("T1234"));
        assert!(!formats.is_tube("T12345"));
    }
}
