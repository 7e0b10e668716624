use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Suffix every migration file carries.
pub const SUFFIX: &str = ".sql";

/// Separator between the version, name tokens and direction.
pub const DELIMITER: char = '_';

/// Largest version that fits the signed 64-bit `version` column.
pub const MAX_VERSION: u64 = i64::MAX as u64;

/// Which half of a migration a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = FilenameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(Direction::Up),
            "down" => Ok(Direction::Down),
            other => Err(FilenameError::InvalidDirection(other.to_string())),
        }
    }
}

/// Why a filename is not a migration file. These never leave the loader.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilenameError {
    #[error("not a migration filename: {0}")]
    InvalidFormat(String),

    #[error("invalid migration version: {0}")]
    InvalidVersion(String),

    #[error("invalid migration direction: {0}")]
    InvalidDirection(String),

    #[error("migration name is empty: {0}")]
    EmptyName(String),
}

/// The parts encoded in a `{version}_{name}_{direction}.sql` filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub version: u64,
    pub name: String,
    pub direction: Direction,
}

impl MigrationFile {
    /// Render the canonical filename with the version zero-padded to `width`.
    pub fn file_name(&self, width: usize) -> String {
        format!(
            "{:0width$}{DELIMITER}{}{DELIMITER}{}{SUFFIX}",
            self.version, self.name, self.direction
        )
    }
}

/// Parse a bare filename (no directory component).
pub fn parse(filename: &str) -> Result<MigrationFile, FilenameError> {
    let stem = filename
        .strip_suffix(SUFFIX)
        .ok_or_else(|| FilenameError::InvalidFormat(filename.to_string()))?;

    let segments: Vec<&str> = stem.split(DELIMITER).collect();
    if segments.len() < 3 {
        return Err(FilenameError::InvalidFormat(filename.to_string()));
    }

    let raw_version = segments[0];
    // u64::from_str accepts a leading '+', which is not a version.
    if raw_version.is_empty() || !raw_version.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FilenameError::InvalidVersion(raw_version.to_string()));
    }
    let version = raw_version
        .parse::<u64>()
        .ok()
        .filter(|v| *v <= MAX_VERSION)
        .ok_or_else(|| FilenameError::InvalidVersion(raw_version.to_string()))?;

    let direction: Direction = segments[segments.len() - 1].parse()?;

    let name = segments[1..segments.len() - 1].join(&DELIMITER.to_string());
    if name.is_empty() {
        return Err(FilenameError::EmptyName(filename.to_string()));
    }

    Ok(MigrationFile {
        version,
        name,
        direction,
    })
}
