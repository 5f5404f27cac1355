use crate::error::{ErrorCode, TransferError};
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DEFAULT_TUBE: Regex = Regex::new(r"^\S{1,64}$").expect("valid pattern");
    static ref DEFAULT_PLATE: Regex = Regex::new(r"^\S{1,64}$").expect("valid pattern");
    static ref DEFAULT_NAME: Regex = Regex::new(r"^\S[ -~]{0,62}\S?$").expect("valid pattern");
}

/// Format predicates for scanned input. These are pure format checks, not
/// state; the defaults accept any single token and can be tightened per
/// deployment through the configuration pattern strings.
#[derive(Debug, Clone)]
pub struct BarcodeFormats {
    tube: Regex,
    plate: Regex,
    name: Regex,
}

impl Default for BarcodeFormats {
    fn default() -> Self {
        Self {
            tube: DEFAULT_TUBE.clone(),
            plate: DEFAULT_PLATE.clone(),
            name: DEFAULT_NAME.clone(),
        }
    }
}

impl BarcodeFormats {
    pub fn from_patterns(
        tube: Option<&str>,
        plate: Option<&str>,
        name: Option<&str>,
    ) -> Result<Self, TransferError> {
        let mut formats = Self::default();
        if let Some(pattern) = tube {
            formats.tube = Self::compile("tube_barcode_pattern", pattern)?;
        }
        if let Some(pattern) = plate {
            formats.plate = Self::compile("plate_barcode_pattern", pattern)?;
        }
        if let Some(pattern) = name {
            formats.name = Self::compile("username_pattern", pattern)?;
        }
        Ok(formats)
    }

    fn compile(which: &str, pattern: &str) -> Result<Regex, TransferError> {
        Regex::new(pattern).map_err(|e| {
            TransferError::new(ErrorCode::Config, format!("bad {which} '{pattern}': {e}"))
        })
    }

    pub fn is_tube(&self, input: &str) -> bool {
        self.tube.is_match(input)
    }

    pub fn is_plate(&self, input: &str) -> bool {
        self.plate.is_match(input)
    }

    pub fn is_name(&self, input: &str) -> bool {
        self.name.is_match(input)
    }
}
