use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::error::{HarnessError, HarnessResult};

/// Overwrite `path` with one result per line, in the given order.
pub fn write_results(results: &[String], path: &Path) -> HarnessResult<()> {
    let to_error = |source| HarnessError::ResultWrite {
        path: path.to_path_buf(),
        source,
    };

    let file = File::create(path).map_err(to_error)?;
    let mut writer = BufWriter::new(file);
    for result in results {
        writeln!(writer, "{result}").map_err(to_error)?;
    }
    writer.flush().map_err(to_error)?;

    info!(path = %path.display(), count = results.len(), "results written");
    Ok(())
}
