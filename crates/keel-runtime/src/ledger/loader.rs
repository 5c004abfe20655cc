use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use keel_core::error::{KeelError, Result};
use keel_core::unit::MigrationUnit;
use keel_core::version::Version;

#[derive(Default)]
struct SqlFiles {
    name: String,
    up: Option<String>,
    down: Option<String>,
}

/// Load SQL migrations from a directory.
///
/// Files are named `<version>_<name>.up.sql` with an optional matching
/// `<version>_<name>.down.sql`. A plain `<version>_<name>.sql` is treated as
/// a forward-only unit. Other files are ignored and a missing directory
/// yields no units.
pub fn load_migrations_from_dir(dir: &Path) -> Result<Vec<MigrationUnit>> {
    if !dir.exists() {
        debug!("Migrations directory does not exist: {:?}", dir);
        return Ok(Vec::new());
    }

    let mut files: BTreeMap<Version, SqlFiles> = BTreeMap::new();

    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };

        let (stem, is_down) = if let Some(stem) = file_name.strip_suffix(".down.sql") {
            (stem, true)
        } else if let Some(stem) = file_name.strip_suffix(".up.sql") {
            (stem, false)
        } else if let Some(stem) = file_name.strip_suffix(".sql") {
            (stem, false)
        } else {
            continue;
        };

        let (version, name) = parse_stem(stem)?;
        let sql = std::fs::read_to_string(&path)?;

        let slot = files.entry(version).or_default();
        if slot.name.is_empty() {
            slot.name = name.to_string();
        } else if slot.name != name {
            return Err(KeelError::DuplicateVersion(version));
        }

        let body = if is_down { &mut slot.down } else { &mut slot.up };
        if body.replace(sql).is_some() {
            return Err(KeelError::DuplicateVersion(version));
        }
    }

    let mut units = Vec::with_capacity(files.len());
    for (version, files) in files {
        let Some(up) = files.up else {
            return Err(KeelError::Validation(format!(
                "Migration {} has a down file but no up file",
                version
            )));
        };

        let mut unit = MigrationUnit::sql(version, files.name, &up);
        if let Some(down) = files.down {
            unit = unit.with_revert_sql(&down);
        }
        units.push(unit);
    }

    debug!("Loaded {} SQL migrations", units.len());
    Ok(units)
}

/// Split `20230112115726_add_teams` into its version and name.
fn parse_stem(stem: &str) -> Result<(Version, &str)> {
    let (version, name) = match stem.split_once('_') {
        Some((version, name)) => (version, name),
        None => (stem, stem),
    };
    Ok((version.parse()?, name))
}
