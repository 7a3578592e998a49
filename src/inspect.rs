use crate::command::{build_detail_args, build_inspect_args, is_playlist_url};
use crate::config::DownloadConfig;
use crate::logging;
use crate::paths::AppPaths;
use crate::{cmd, EngineError, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Metadata yt-dlp reports for one video before download. All fields are
/// optional; flat playlist entries in particular omit most of them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VideoInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
}

impl VideoInfo {
    pub fn target_url(&self) -> Option<&str> {
        self.webpage_url.as_deref().or(self.url.as_deref())
    }
}

const SUPPORTED_HOSTS: [&str; 5] = [
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtu.be",
];

pub fn validate_url(raw: &str) -> bool {
    let Ok(parsed) = Url::parse(raw) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    match parsed.host_str() {
        Some(host) => {
            let host = host.to_lowercase();
            SUPPORTED_HOSTS.iter().any(|h| host == *h)
        }
        None => false,
    }
}

/// Probes `url` with yt-dlp and returns the videos behind it (one for a
/// single video, many for a playlist or channel).
pub fn fetch_video_info(
    paths: &AppPaths,
    config: &DownloadConfig,
    url: &str,
) -> Result<Vec<VideoInfo>> {
    logging::log_info(paths, &format!("fetching video info for {url}"));

    let args = build_inspect_args(config, url);
    let output = cmd::command("yt-dlp")
        .args(&args)
        .output()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => EngineError::ExternalToolMissing {
                tool: "yt-dlp".to_string(),
            },
            _ => EngineError::Io(e),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        logging::log_error(paths, &format!("video info probe failed: {stderr}"));
        return Err(EngineError::ExternalToolFailed {
            tool: "yt-dlp".to_string(),
            code: output.status.code(),
            stderr,
        });
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    if is_playlist_url(url) {
        let videos = parse_playlist_dump(&stdout)?;
        logging::log_info(paths, &format!("found {} videos", videos.len()));
        return Ok(videos);
    }

    let dump = parse_flat_dump(&stdout);
    if !dump.playlist_video_ids.is_empty() {
        let detailed = fetch_detailed_videos(paths, config, &dump.playlist_video_ids);
        logging::log_info(paths, &format!("found {} videos in playlist", detailed.len()));
        return Ok(detailed);
    }
    logging::log_info(paths, &format!("found {} videos", dump.videos.len()));
    Ok(dump.videos)
}

#[derive(Debug, Default)]
struct FlatDump {
    videos: Vec<VideoInfo>,
    playlist_video_ids: Vec<String>,
}

/// One JSON object per line; unparsable lines are skipped, not errors.
/// Playlist-metadata objects are not videos: their entry ids are collected
/// for a per-id detail fetch instead.
fn parse_flat_dump(stdout: &str) -> FlatDump {
    let mut dump = FlatDump::default();
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
            continue;
        };
        if is_playlist_data(&value) {
            dump.playlist_video_ids.extend(extract_video_ids(&value));
        } else if let Ok(video) = serde_json::from_value::<VideoInfo>(value) {
            dump.videos.push(video);
        }
    }
    dump
}

fn is_playlist_data(value: &serde_json::Value) -> bool {
    let kind = value.get("_type").and_then(|v| v.as_str());
    kind == Some("playlist")
        || kind == Some("url")
        || value.get("ie_key").and_then(|v| v.as_str()) == Some("YoutubePlaylist")
}

fn extract_video_ids(value: &serde_json::Value) -> Vec<String> {
    if let Some(entries) = value.get("entries").and_then(|v| v.as_array()) {
        return entries
            .iter()
            .filter_map(|entry| {
                entry
                    .get("id")
                    .and_then(|v| v.as_str())
                    .or_else(|| entry.as_str())
                    .map(str::to_string)
            })
            .collect();
    }
    value
        .get("id")
        .and_then(|v| v.as_str())
        .map(|id| vec![id.to_string()])
        .unwrap_or_default()
}

/// Full `--dump-json` probe per collected id; a video that fails to resolve
/// is skipped rather than failing the whole inspection.
fn fetch_detailed_videos(
    paths: &AppPaths,
    config: &DownloadConfig,
    video_ids: &[String],
) -> Vec<VideoInfo> {
    let mut detailed = Vec::new();
    for id in video_ids {
        let url = format!("https://www.youtube.com/watch?v={id}");
        let args = build_detail_args(config, &url);
        let Ok(output) = cmd::command("yt-dlp").args(&args).output() else {
            continue;
        };
        if !output.status.success() {
            logging::log_warning(paths, &format!("detail probe failed for {id}"));
            continue;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Ok(video) = serde_json::from_str::<VideoInfo>(stdout.trim()) {
            detailed.push(video);
        }
    }
    detailed
}

fn parse_playlist_dump(stdout: &str) -> Result<Vec<VideoInfo>> {
    let value: serde_json::Value = serde_json::from_str(stdout.trim())?;
    if value.get("_type").and_then(|v| v.as_str()) == Some("playlist") {
        if let Some(entries) = value.get("entries").and_then(|v| v.as_array()) {
            return Ok(entries
                .iter()
                .filter(|entry| !entry.is_null())
                .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
                .collect());
        }
    }
    // Not a playlist after all; treat the whole dump as a single video.
    Ok(serde_json::from_value(value).map(|v| vec![v]).unwrap_or_default())
}

/// Formats a duration in seconds as H:MM:SS or MM:SS for display.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes:02}:{secs:02}")
    }
}
