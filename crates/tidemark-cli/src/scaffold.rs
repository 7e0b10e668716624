use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tidemark_common::{Error, Result};
use tidemark_db::filename::{self, Direction, MigrationFile};
use tracing::info;

/// Paths written by [`create_migration`].
#[derive(Debug)]
pub struct Scaffold {
    pub version: u64,
    pub up: PathBuf,
    pub down: PathBuf,
}

/// Write an empty up/down pair for a new migration in `dir`, numbered one
/// past the highest version already there.
pub fn create_migration(dir: &Path, name: &str, width: usize) -> Result<Scaffold> {
    let name = slugify(name);
    if name.is_empty() {
        return Err(Error::Config("migration name is required".into()));
    }
    if name.contains(['/', '\\']) {
        return Err(Error::Config(format!(
            "migration name must not contain path separators: {name}"
        )));
    }

    fs::create_dir_all(dir)?;
    let version = next_version(dir)?;

    let up = write_template(dir, version, &name, Direction::Up, width)?;
    let down = write_template(dir, version, &name, Direction::Down, width)?;

    info!("created migration {version}: {name}");
    Ok(Scaffold { version, up, down })
}

fn write_template(
    dir: &Path,
    version: u64,
    name: &str,
    direction: Direction,
    width: usize,
) -> Result<PathBuf> {
    let file = MigrationFile {
        version,
        name: name.to_string(),
        direction,
    };
    let file_name = file.file_name(width);
    // The slug must survive a round trip or the loader would skip the file.
    if filename::parse(&file_name).as_ref() != Ok(&file) {
        return Err(Error::Config(format!(
            "{name:?} does not produce a valid migration filename"
        )));
    }

    let path = dir.join(file_name);
    let mut out = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)?;
    writeln!(out, "-- Add migration {direction} SQL here")?;
    Ok(path)
}

fn slugify(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

fn next_version(dir: &Path) -> Result<u64> {
    let mut highest: Option<u64> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if let Some(parsed) = entry.file_name().to_str().and_then(|n| filename::parse(n).ok()) {
            highest = Some(highest.map_or(parsed.version, |h| h.max(parsed.version)));
        }
    }
    match highest {
        None => Ok(1),
        Some(v) if v < filename::MAX_VERSION => Ok(v + 1),
        Some(_) => Err(Error::Config("migration versions exhausted".into())),
    }
}
