use crate::config::DownloadConfig;
use std::path::Path;

/// Builds the yt-dlp argument list for one download job. Pure: no probing,
/// no filesystem access. `ffmpeg_available` comes from the startup tool
/// check; merge flags are only emitted when the muxer actually exists.
pub fn build_download_args(
    config: &DownloadConfig,
    archive_path: &Path,
    ffmpeg_available: bool,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    if let Some(cookies) = &config.cookies_file {
        args.push("--cookies".to_string());
        args.push(cookies.to_string_lossy().to_string());
    }

    let output_template = match &config.output_dir {
        Some(dir) => format!(
            "{}/%(playlist)s/%(title)s.%(ext)s",
            dir.to_string_lossy().trim_end_matches(['/', '\\'])
        ),
        None => "%(playlist)s/%(title)s.%(ext)s".to_string(),
    };
    args.push("-o".to_string());
    args.push(output_template);

    if config.merge_video_audio && ffmpeg_available {
        args.push("--merge-output-format".to_string());
        args.push("mkv".to_string());
        args.push("--audio-quality".to_string());
        args.push("0".to_string());
        args.push("--audio-format".to_string());
        args.push("m4a".to_string());
    }

    args.push("-f".to_string());
    args.push(config.quality.format_selector().to_string());

    push_subtitle_args(&mut args, config);

    args.push("--concurrent-fragments".to_string());
    args.push(config.concurrent_fragments.to_string());

    args.push("--download-archive".to_string());
    args.push(archive_path.to_string_lossy().to_string());

    args
}

fn push_subtitle_args(args: &mut Vec<String>, config: &DownloadConfig) {
    if config.download_subtitles {
        args.push("--write-subs".to_string());
        if config.subtitle_language == "all" {
            args.push("--all-subs".to_string());
        } else {
            args.push("--sub-langs".to_string());
            args.push(config.subtitle_language.clone());
        }
    }

    if config.auto_subtitles {
        args.push("--write-auto-subs".to_string());
        args.push("--sub-langs".to_string());
        args.push(config.auto_translate_language.clone());
    }

    if config.embed_subtitles {
        args.push("--embed-subs".to_string());
    }
}

/// Argument list for a metadata-only probe of `url`. Playlist URLs get the
/// single-JSON dump; everything else is expanded flat, one JSON per line.
pub fn build_inspect_args(config: &DownloadConfig, url: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    if let Some(cookies) = &config.cookies_file {
        args.push("--cookies".to_string());
        args.push(cookies.to_string_lossy().to_string());
    }

    if is_playlist_url(url) {
        args.push("--dump-single-json".to_string());
    } else {
        args.push("--flat-playlist".to_string());
        args.push("--dump-json".to_string());
    }

    args.push(url.to_string());
    args
}

/// Argument list for a full-metadata probe of a single video.
pub fn build_detail_args(config: &DownloadConfig, url: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    if let Some(cookies) = &config.cookies_file {
        args.push("--cookies".to_string());
        args.push(cookies.to_string_lossy().to_string());
    }

    args.push("--dump-json".to_string());
    args.push(url.to_string());
    args
}

pub fn is_playlist_url(url: &str) -> bool {
    url.contains("playlist") || url.contains("list=")
}
