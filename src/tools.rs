use crate::cmd;
use crate::logging;
use crate::paths::AppPaths;
use serde::Serialize;
use std::ffi::OsStr;

#[derive(Debug, Clone, Serialize)]
pub struct YtDlpStatus {
    pub available: bool,
    pub version: Option<String>,
}

/// `yt-dlp --version` probe. A missing tool is not an error here; callers
/// disable downloading and report once.
pub fn ytdlp_status(paths: &AppPaths) -> YtDlpStatus {
    let version = tool_version_first_line("yt-dlp", "--version");
    if version.is_none() {
        logging::log_warning(paths, "yt-dlp is not available; downloads are disabled");
    }
    YtDlpStatus {
        available: version.is_some(),
        version,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FfmpegStatus {
    pub available: bool,
    pub version: Option<String>,
}

/// `ffmpeg -version` probe, run once at startup. Merging itself is delegated
/// to yt-dlp's post-processor; the engine never invokes ffmpeg beyond this
/// check.
pub fn ffmpeg_status(paths: &AppPaths) -> FfmpegStatus {
    let version = tool_version_first_line("ffmpeg", "-version");
    if version.is_none() {
        logging::log_warning(
            paths,
            "ffmpeg is not available; video and audio will not be merged",
        );
    }
    FfmpegStatus {
        available: version.is_some(),
        version,
    }
}

fn tool_version_first_line(program: impl AsRef<OsStr>, arg: &str) -> Option<String> {
    let output = cmd::command(program).arg(arg).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout);
    let first = text.lines().next()?.trim();
    if first.is_empty() {
        return None;
    }
    Some(first.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_reports_unavailable() {
        let version = tool_version_first_line("definitely-not-a-real-tool-xyz", "--version");
        assert!(version.is_none());
    }
}
