use std::path::{Path, PathBuf};

const PARTIAL_SUFFIX: &str = ".part";

/// Per-user downloads directory, falling back to `~/Downloads`.
pub fn default_download_dir() -> PathBuf {
    dirs::download_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Downloads")))
        .unwrap_or_else(|| std::env::temp_dir().join("Downloads"))
}

/// `<file>.part` next to `path`. Unlike `with_extension`, the original
/// extension is kept.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(PARTIAL_SUFFIX);
    path.with_file_name(name)
}

/// Removes `path`, treating an already missing file as success.
pub fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
