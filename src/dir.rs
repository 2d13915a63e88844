use std::fs::File;
use std::path::Path;

use crate::error::Result;

/// Fsync a directory so file creations, renames and removals in it are
/// durable.
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}
