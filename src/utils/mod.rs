pub mod http;
pub mod metrics;
pub mod task_tracker;

use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Characters that are unsafe in a path component on at least one platform.
const RESERVED: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Create `dir` (and parents) if missing and hand back an owned path.
pub fn ensure_dir(dir: impl AsRef<Path>) -> Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)
        .with_context(|| format!("cannot create directory {}", dir.display()))?;
    Ok(dir.to_owned())
}

/// Turn a client-supplied name into a single, visible path component.
///
/// Reserved and control characters become `_`, and a leading dot is replaced
/// so uploads never land as hidden files.
pub fn safe_filename(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if RESERVED.contains(&c) || c.is_control() { '_' } else { c })
        .collect();
    if out.starts_with('.') {
        out.replace_range(..1, "_");
    }
    out
}

/// Root for the bridge's on-disk state: `$WABRIDGE_HOME`, else `~/.wabridge`.
pub fn get_wabridge_home() -> Result<PathBuf> {
    match std::env::var_os("WABRIDGE_HOME") {
        Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => dirs::home_dir()
            .map(|home| home.join(".wabridge"))
            .context("no home directory; set WABRIDGE_HOME"),
    }
}

/// Replace `path` with `content` in one rename. Readers see the old file or
/// the new one, never a partial write.
pub fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let dir = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    ensure_dir(dir)?;

    let mut staged = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("cannot stage temp file in {}", dir.display()))?;
    staged.write_all(content.as_bytes())?;
    staged.as_file().sync_all()?;
    staged
        .persist(path)
        .with_context(|| format!("cannot replace {}", path.display()))?;
    Ok(())
}
