use crate::paths::AppPaths;
use crate::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const MIN_CONCURRENT_JOBS: usize = 1;
pub const MAX_CONCURRENT_JOBS: usize = 5;
pub const DEFAULT_CONCURRENT_JOBS: usize = 2;
pub const MIN_CONCURRENT_FRAGMENTS: u32 = 1;
pub const MAX_CONCURRENT_FRAGMENTS: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    Best,
    Uhd2160,
    Qhd1440,
    Hd1080,
    Hd720,
    Sd480,
    Sd360,
    Worst,
}

impl QualityTier {
    /// yt-dlp format selector for this tier.
    pub fn format_selector(&self) -> &'static str {
        match self {
            QualityTier::Best => "bestvideo+bestaudio/best",
            QualityTier::Uhd2160 => "bestvideo[height<=2160]+bestaudio/best[height<=2160]",
            QualityTier::Qhd1440 => "bestvideo[height<=1440]+bestaudio/best[height<=1440]",
            QualityTier::Hd1080 => "bestvideo[height<=1080]+bestaudio/best[height<=1080]",
            QualityTier::Hd720 => "bestvideo[height<=720]+bestaudio/best[height<=720]",
            QualityTier::Sd480 => "bestvideo[height<=480]+bestaudio/best[height<=480]",
            QualityTier::Sd360 => "bestvideo[height<=360]+bestaudio/best[height<=360]",
            QualityTier::Worst => "worst",
        }
    }
}

/// Snapshot of everything a download job needs. Jobs clone this at enqueue
/// time so later edits never affect work already in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    pub quality: QualityTier,
    pub merge_video_audio: bool,
    pub download_subtitles: bool,
    pub subtitle_language: String,
    pub auto_subtitles: bool,
    pub auto_translate_language: String,
    pub embed_subtitles: bool,
    pub concurrent_fragments: u32,
    pub max_concurrent_jobs: usize,
    pub output_dir: Option<PathBuf>,
    pub cookies_file: Option<PathBuf>,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            quality: QualityTier::Best,
            merge_video_audio: true,
            download_subtitles: false,
            subtitle_language: "en".to_string(),
            auto_subtitles: false,
            auto_translate_language: "en".to_string(),
            embed_subtitles: false,
            concurrent_fragments: 4,
            max_concurrent_jobs: DEFAULT_CONCURRENT_JOBS,
            output_dir: None,
            cookies_file: None,
        }
    }
}

impl DownloadConfig {
    /// Rejects configurations no process should ever be spawned for.
    pub fn validate(&self) -> Result<()> {
        match &self.output_dir {
            None => {
                return Err(EngineError::InvalidConfig(
                    "output path is not set".to_string(),
                ))
            }
            Some(dir) if dir.as_os_str().is_empty() => {
                return Err(EngineError::InvalidConfig(
                    "output path is empty".to_string(),
                ))
            }
            Some(_) => {}
        }

        if !(MIN_CONCURRENT_JOBS..=MAX_CONCURRENT_JOBS).contains(&self.max_concurrent_jobs) {
            return Err(EngineError::InvalidConfig(format!(
                "max_concurrent_jobs must be between {MIN_CONCURRENT_JOBS} and {MAX_CONCURRENT_JOBS}, got {}",
                self.max_concurrent_jobs
            )));
        }

        if !(MIN_CONCURRENT_FRAGMENTS..=MAX_CONCURRENT_FRAGMENTS)
            .contains(&self.concurrent_fragments)
        {
            return Err(EngineError::InvalidConfig(format!(
                "concurrent_fragments must be between {MIN_CONCURRENT_FRAGMENTS} and {MAX_CONCURRENT_FRAGMENTS}, got {}",
                self.concurrent_fragments
            )));
        }

        Ok(())
    }
}

pub fn load_config(paths: &AppPaths) -> Result<DownloadConfig> {
    let path = paths.config_path();
    if !path.exists() {
        return Ok(DownloadConfig::default());
    }
    let bytes = std::fs::read(&path)?;
    let parsed: DownloadConfig = serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::InvalidConfig(format!(
            "failed to parse download config at {}: {e}",
            path.to_string_lossy()
        ))
    })?;
    Ok(parsed)
}

pub fn save_config(paths: &AppPaths, config: &DownloadConfig) -> Result<()> {
    let path = paths.config_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, format!("{json}\n"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config(dir: &std::path::Path) -> DownloadConfig {
        DownloadConfig {
            output_dir: Some(dir.to_path_buf()),
            ..DownloadConfig::default()
        }
    }

    #[test]
    fn default_config_rejects_missing_output_path() {
        let err = DownloadConfig::default().validate().expect_err("must fail");
        assert!(matches!(err, EngineError::InvalidConfig(_)));
    }

    #[test]
    fn out_of_range_concurrency_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = valid_config(dir.path());
        config.max_concurrent_jobs = 0;
        assert!(config.validate().is_err());
        config.max_concurrent_jobs = 6;
        assert!(config.validate().is_err());
        config.max_concurrent_jobs = 5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_round_trips_through_json_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());

        let mut config = valid_config(dir.path());
        config.quality = QualityTier::Hd720;
        config.download_subtitles = true;
        config.subtitle_language = "tr".to_string();
        save_config(&paths, &config).expect("save");

        let loaded = load_config(&paths).expect("load");
        assert_eq!(loaded.quality, QualityTier::Hd720);
        assert!(loaded.download_subtitles);
        assert_eq!(loaded.subtitle_language, "tr");
        assert_eq!(loaded.output_dir, config.output_dir);
    }

    #[test]
    fn missing_config_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path().to_path_buf());

        let loaded = load_config(&paths).expect("load");
        assert_eq!(loaded.max_concurrent_jobs, DEFAULT_CONCURRENT_JOBS);
        assert!(loaded.output_dir.is_none());
    }
}
