use std::path::Path;

use anyhow::{Result, bail};
use tracing::info;

use crate::cli::GenerateSettingsArgs;
use crate::grid::{DEFAULT_DRAW_COUNTS, DEFAULT_PAGE_SIZES, default_grid};
use crate::util::write_json_pretty;

pub fn run(args: GenerateSettingsArgs) -> Result<()> {
    let written = write_default_grid(&args.output_path, args.force)?;
    info!(
        path = %args.output_path.display(),
        configurations = written,
        page_sizes = ?DEFAULT_PAGE_SIZES,
        draw_counts = ?DEFAULT_DRAW_COUNTS,
        "configuration grid written"
    );
    Ok(())
}

fn write_default_grid(path: &Path, force: bool) -> Result<usize> {
    if path.exists() && !force {
        bail!(
            "{} already exists; pass --force to overwrite it",
            path.display()
        );
    }

    let grid = default_grid();
    write_json_pretty(path, &grid)?;
    Ok(grid.len())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::grid::load_grid;

    #[test]
    fn written_grid_loads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("settings.json");

        let written = write_default_grid(&path, false).expect("write grid");
        let grid = load_grid(&path).expect("load grid");
        assert_eq!(grid.len(), written);
        assert_eq!(grid[0].settings_id, 0);
    }

    #[test]
    fn refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");
        fs::write(&path, "[]").expect("seed file");

        assert!(write_default_grid(&path, false).is_err());
        assert_eq!(fs::read_to_string(&path).expect("read"), "[]");

        write_default_grid(&path, true).expect("forced overwrite");
        assert!(load_grid(&path).is_ok());
    }
}
