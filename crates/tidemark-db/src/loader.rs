use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tidemark_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::filename::{self, Direction, MigrationFile};
use crate::migrations::Migration;

/// The files seen so far for one version.
#[derive(Default)]
struct VersionFiles {
    up: Option<LoadedFile>,
    down: Option<LoadedFile>,
}

struct LoadedFile {
    file_name: String,
    name: String,
    sql: String,
}

impl VersionFiles {
    fn slot(&mut self, direction: Direction) -> &mut Option<LoadedFile> {
        match direction {
            Direction::Up => &mut self.up,
            Direction::Down => &mut self.down,
        }
    }
}

/// Read every `{version}_{name}_{direction}.sql` file directly inside `dir`
/// and pair them into migrations sorted by version.
///
/// Files whose names do not parse are skipped. Two files for the same
/// version and direction are rejected.
pub fn load(dir: &Path) -> Result<Vec<Migration>> {
    let mut versions: BTreeMap<u64, VersionFiles> = BTreeMap::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        // Follows symlinks, unlike DirEntry::file_type.
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                debug!("skipping {}: not a file", path.display());
                continue;
            }
            Err(e) => {
                warn!("skipping {}: {e}", path.display());
                continue;
            }
        }

        let os_name = entry.file_name();
        let Some(file_name) = os_name.to_str() else {
            debug!("skipping non UTF-8 file name {:?}", os_name);
            continue;
        };
        if !file_name.ends_with(filename::SUFFIX) {
            continue;
        }

        let MigrationFile {
            version,
            name,
            direction,
        } = match filename::parse(file_name) {
            Ok(parsed) => parsed,
            Err(e) => {
                debug!("skipping {file_name}: {e}");
                continue;
            }
        };

        let slot = versions.entry(version).or_default().slot(direction);
        if let Some(existing) = slot.as_ref() {
            let (first, second) = if existing.file_name.as_str() <= file_name {
                (existing.file_name.clone(), file_name.to_string())
            } else {
                (file_name.to_string(), existing.file_name.clone())
            };
            return Err(Error::DuplicateMigration {
                version,
                first,
                second,
            });
        }

        let sql = fs::read_to_string(&path)?;
        *slot = Some(LoadedFile {
            file_name: file_name.to_string(),
            name,
            sql,
        });
    }

    let migrations: Vec<Migration> = versions
        .into_iter()
        .filter_map(|(version, files)| build_migration(version, files))
        .collect();

    info!(
        "loaded {} migration(s) from {}",
        migrations.len(),
        dir.display()
    );
    Ok(migrations)
}

fn build_migration(version: u64, files: VersionFiles) -> Option<Migration> {
    let VersionFiles { up, down } = files;

    let name = match (&up, &down) {
        (Some(u), Some(d)) => {
            if u.name != d.name {
                warn!(
                    "migration {version}: up file names it {:?} but down file names it {:?}; using {:?}",
                    u.name, d.name, u.name
                );
            }
            u.name.clone()
        }
        (Some(u), None) => u.name.clone(),
        (None, Some(d)) => d.name.clone(),
        (None, None) => return None,
    };

    let up_sql = up.map(|f| f.sql).unwrap_or_default();
    let down_sql = down.map(|f| f.sql).unwrap_or_default();

    if up_sql.trim().is_empty() {
        warn!("migration {version} ({name}) has no up SQL");
    }
    if down_sql.trim().is_empty() {
        warn!("migration {version} ({name}) has no down SQL");
    }

    Some(Migration {
        version,
        name,
        up_sql,
        down_sql,
    })
}
