use crate::events::{ProgressUpdate, UNKNOWN};
use crate::{EngineError, Result};
use regex::Regex;
use std::path::Path;

const DEFAULT_PROGRESS_PATTERN: &str = r"(\d+\.\d+)%.*?of\s+~?\s*(\S+).*?at\s+(\S+)(?:.*?ETA\s+(\S+))?";
const DEFAULT_DESTINATION_PATTERN: &str = r"\[download\] Destination:\s+(.+)";
const DEFAULT_INFO_TITLE_PATTERN: &str = r"\[info\]\s+(.+?):";

// [info] lines that look like titles but are tool chatter.
const INFO_NOISE_KEYWORDS: [&str; 6] = [
    "format",
    "downloading",
    "available",
    "playlist",
    "writing",
    "subtitle",
];

/// The regexes used to scrape yt-dlp's human-readable output. yt-dlp does
/// not version or guarantee this format, so the patterns are configuration:
/// callers may supply their own when a tool update changes the wording.
#[derive(Debug, Clone)]
pub struct ScrapePatterns {
    progress: Regex,
    destination: Regex,
    info_title: Regex,
}

impl Default for ScrapePatterns {
    fn default() -> Self {
        // Fixed literals, known to compile.
        Self {
            progress: Regex::new(DEFAULT_PROGRESS_PATTERN).unwrap(),
            destination: Regex::new(DEFAULT_DESTINATION_PATTERN).unwrap(),
            info_title: Regex::new(DEFAULT_INFO_TITLE_PATTERN).unwrap(),
        }
    }
}

impl ScrapePatterns {
    pub fn new(progress: &str, destination: &str, info_title: &str) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| EngineError::InvalidConfig(format!("bad scrape pattern: {e}")))
        };
        Ok(Self {
            progress: compile(progress)?,
            destination: compile(destination)?,
            info_title: compile(info_title)?,
        })
    }
}

/// Per-job line scraper. Feeds on the interleaved stdout of one yt-dlp
/// process and turns matching lines into progress updates; everything else
/// is ignored. Title hints accumulate across lines, last applicable hint
/// wins, and a progress line seen before any hint reports `Unknown`.
#[derive(Debug)]
pub struct LineScraper {
    patterns: ScrapePatterns,
    video_title: Option<String>,
    current_title: Option<String>,
    current_ext: Option<String>,
}

impl LineScraper {
    pub fn new(patterns: ScrapePatterns) -> Self {
        Self {
            patterns,
            video_title: None,
            current_title: None,
            current_ext: None,
        }
    }

    /// Consumes one output line: zero or one structured update comes back.
    pub fn observe(&mut self, line: &str) -> Option<ProgressUpdate> {
        self.absorb_title_hints(line);
        self.parse_progress(line)
    }

    /// Best title hint seen so far, for terminal events.
    pub fn best_title(&self) -> String {
        self.video_title
            .clone()
            .or_else(|| self.current_title.clone())
            .unwrap_or_else(|| UNKNOWN.to_string())
    }

    fn absorb_title_hints(&mut self, line: &str) {
        if line.contains("[info]") && line.contains(':') && !self.is_info_noise(line) {
            if let Some(captures) = self.patterns.info_title.captures(line) {
                let candidate = captures[1].trim().to_string();
                if candidate.len() > 10
                    && !candidate.starts_with("http")
                    && !candidate.starts_with('[')
                {
                    self.video_title = Some(candidate);
                }
            }
        }

        if line.contains("Destination:") {
            if let Some(captures) = self.patterns.destination.captures(line) {
                let file_path = captures[1].trim().to_string();
                let file_name = Path::new(&file_path)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or(file_path);

                let (stem, ext) = match file_name.rsplit_once('.') {
                    Some((stem, ext)) => (stem.to_string(), Some(ext.to_string())),
                    None => (file_name, None),
                };
                let stem = strip_format_code(&stem);

                if stem.len() > 5 && self.video_title.is_none() {
                    self.video_title = Some(stem.clone());
                }
                self.current_title = Some(stem);
                self.current_ext = ext;
            }
        }
    }

    fn is_info_noise(&self, line: &str) -> bool {
        let lowered = line.to_lowercase();
        INFO_NOISE_KEYWORDS.iter().any(|k| lowered.contains(k))
    }

    fn parse_progress(&self, line: &str) -> Option<ProgressUpdate> {
        if !(line.contains('%') && line.contains(" of ") && line.contains(" at ")) {
            return None;
        }

        let captures = self.patterns.progress.captures(line)?;
        let percent: f64 = captures[1].parse().ok()?;

        Some(ProgressUpdate {
            percent,
            total_size: captures[2].to_string(),
            speed: captures[3].to_string(),
            eta: captures
                .get(4)
                .map(|m| m.as_str().to_string())
                .unwrap_or_else(|| "N/A".to_string()),
            title: self.best_title(),
            ext: self
                .current_ext
                .clone()
                .unwrap_or_else(|| UNKNOWN.to_string()),
        })
    }
}

/// Drops trailing yt-dlp format codes like `.f137` from a file stem.
fn strip_format_code(stem: &str) -> String {
    if let Some((head, tail)) = stem.rsplit_once(".f") {
        if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
            return head.to_string();
        }
    }
    stem.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scraper() -> LineScraper {
        LineScraper::new(ScrapePatterns::default())
    }

    #[test]
    fn progress_line_after_destination_yields_full_update() {
        let mut scraper = scraper();
        assert!(scraper
            .observe("[download] Destination: /tmp/videos/video.mkv")
            .is_none());

        let update = scraper
            .observe("  12.5% of  10.00MiB at    1.00MiB/s ETA 00:05")
            .expect("progress update");
        assert_eq!(update.percent, 12.5);
        assert_eq!(update.total_size, "10.00MiB");
        assert_eq!(update.speed, "1.00MiB/s");
        assert_eq!(update.eta, "00:05");
        assert_eq!(update.title, "video");
        assert_eq!(update.ext, "mkv");
    }

    #[test]
    fn progress_before_any_hint_uses_unknown_placeholders() {
        let mut scraper = scraper();
        let update = scraper
            .observe("[download]   3.0% of 5.00MiB at 512.00KiB/s ETA 00:10")
            .expect("progress update");
        assert_eq!(update.title, UNKNOWN);
        assert_eq!(update.ext, UNKNOWN);
    }

    #[test]
    fn unmatched_lines_are_ignored() {
        let mut scraper = scraper();
        assert!(scraper.observe("[youtube] abc123: Downloading webpage").is_none());
        assert!(scraper.observe("").is_none());
        assert!(scraper.observe("[download] Resuming download").is_none());
    }

    #[test]
    fn format_code_suffix_is_stripped_from_destination() {
        let mut scraper = scraper();
        scraper.observe("[download] Destination: My Long Video Title.f137.mp4");
        let update = scraper
            .observe(" 50.0% of 1.00GiB at 2.00MiB/s ETA 01:00")
            .expect("progress update");
        assert_eq!(update.title, "My Long Video Title");
        assert_eq!(update.ext, "mp4");
    }

    #[test]
    fn last_applicable_destination_hint_wins_for_ext() {
        let mut scraper = scraper();
        scraper.observe("[download] Destination: Some Video Name Here.f137.mp4");
        scraper.observe("[download] Destination: Some Video Name Here.f251.webm");
        let update = scraper
            .observe(" 10.0% of 3.00MiB at 1.00MiB/s ETA 00:03")
            .expect("progress update");
        assert_eq!(update.ext, "webm");
        assert_eq!(update.title, "Some Video Name Here");
    }

    #[test]
    fn info_title_hint_applies_when_long_enough() {
        let mut scraper = scraper();
        scraper.observe("[info] A Documentary About Rust: Downloading 1 format(s)");
        // "downloading" marks the line as noise, so no hint yet.
        assert_eq!(scraper.best_title(), UNKNOWN);

        scraper.observe("[info] A Documentary About Rust: 137+251");
        assert_eq!(scraper.best_title(), "A Documentary About Rust");
    }

    #[test]
    fn missing_eta_falls_back_to_na() {
        let mut scraper = scraper();
        let update = scraper
            .observe("[download] 100.0% of 10.00MiB at 4.00MiB/s")
            .expect("progress update");
        assert_eq!(update.eta, "N/A");
        assert_eq!(update.percent, 100.0);
    }

    #[test]
    fn estimated_size_marker_is_tolerated() {
        let mut scraper = scraper();
        let update = scraper
            .observe("[download]  42.1% of ~ 120.00MiB at  3.50MiB/s ETA 00:30")
            .expect("progress update");
        assert_eq!(update.total_size, "120.00MiB");
    }

    #[test]
    fn custom_patterns_are_accepted_and_bad_ones_rejected() {
        assert!(ScrapePatterns::new(r"(\d+)% of (\S+) at (\S+)", r"Dest: (.+)", r"Title: (.+?):").is_ok());
        assert!(ScrapePatterns::new(r"(((", r"Dest: (.+)", r"Title: (.+?):").is_err());
    }
}
