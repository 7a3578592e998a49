use crate::paths::AppPaths;
use crate::Result;

/// The download archive is yt-dlp's own skip list: one previously-downloaded
/// identifier per line, written by the tool itself via `--download-archive`.
/// The engine only ever reads it or deletes it.
#[derive(Debug, Clone, Default)]
pub struct ArchiveSummary {
    pub exists: bool,
    pub entries: usize,
}

pub fn archive_summary(paths: &AppPaths) -> Result<ArchiveSummary> {
    let path = paths.archive_path();
    if !path.exists() {
        return Ok(ArchiveSummary::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    let entries = contents.lines().filter(|l| !l.trim().is_empty()).count();
    Ok(ArchiveSummary {
        exists: true,
        entries,
    })
}

pub fn list_archive_entries(paths: &AppPaths) -> Result<Vec<String>> {
    let path = paths.archive_path();
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = std::fs::read_to_string(&path)?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

/// Deletes the skip list so every identifier becomes eligible for
/// re-download. Returns whether a file was actually removed.
pub fn clear_archive(paths: &AppPaths) -> Result<bool> {
    let path = paths.archive_path();
    if !path.exists() {
        return Ok(false);
    }
    std::fs::remove_file(&path)?;
    Ok(true)
}
