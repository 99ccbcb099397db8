use std::os::unix::prelude::PermissionsExt;
use std::path::Path;

pub fn secure_directory<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    std::fs::set_permissions(path.as_ref(), std::fs::Permissions::from_mode(0o700))
}

pub fn secure_file<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    std::fs::set_permissions(path.as_ref(), std::fs::Permissions::from_mode(0o600))
}

/// Creates the parent directory of `path` if needed and restricts it to the owner.
pub fn ensure_private_parent<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    let Some(parent) = path.as_ref().parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    if !parent.exists() {
        std::fs::create_dir_all(parent)?;
        secure_directory(parent)?;
    }
    Ok(())
}
