use std::io::{self, Write};
use std::path::Path;

use tempfile::Builder;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Writes `contents` to `path` through a temporary sibling file.
///
/// The temporary file is flushed and fsync'd before it is renamed over the
/// target, so readers see either the previous record or the new one.
pub(crate) fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let directory = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::NotFound,
            "record path did not have a parent directory",
        )
    })?;

    let mut builder = Builder::new();
    let prefix = format!(
        ".{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("record")
    );
    builder.prefix(&prefix).suffix(".tmp");
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        builder.permissions(Permissions::from_mode(0o644));
    }

    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}
