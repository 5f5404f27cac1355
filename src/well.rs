use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// One addressable plate position, row letter plus column number ("A1").
/// Always stored uppercase.
pub type Well = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum PlateSize {
    Wells96,
    Wells384,
}

impl PlateSize {
    pub fn row_letters(&self) -> std::ops::RangeInclusive<char> {
        match self {
            PlateSize::Wells96 => 'A'..='H',
            PlateSize::Wells384 => 'A'..='P',
        }
    }

    pub fn column_count(&self) -> u16 {
        match self {
            PlateSize::Wells96 => 12,
            PlateSize::Wells384 => 24,
        }
    }

    pub fn well_count(&self) -> usize {
        match self {
            PlateSize::Wells96 => 96,
            PlateSize::Wells384 => 384,
        }
    }
}

impl TryFrom<u16> for PlateSize {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            96 => Ok(PlateSize::Wells96),
            384 => Ok(PlateSize::Wells384),
            other => Err(format!("unsupported plate size {other}, expected 96 or 384")),
        }
    }
}

impl From<PlateSize> for u16 {
    fn from(value: PlateSize) -> Self {
        match value {
            PlateSize::Wells96 => 96,
            PlateSize::Wells384 => 384,
        }
    }
}

/// All wells of a plate in scan order: column-major, rows alphabetical
/// within each column (A1, B1, .. H1, A2, ..).
pub fn well_list(size: PlateSize) -> Vec<Well> {
    (1..=size.column_count())
        .cartesian_product(size.row_letters())
        .map(|(col, row)| format!("{row}{col}"))
        .collect()
}

pub fn is_valid_well(size: PlateSize, name: &str) -> bool {
    let name = name.to_uppercase();
    let mut chars = name.chars();
    let row = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    if !size.row_letters().contains(&row) {
        return false;
    }
    match chars.as_str().parse::<u16>() {
        Ok(col) => col >= 1 && col <= size.column_count(),
        Err(_) => false,
    }
}
