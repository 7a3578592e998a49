use serde::{Deserialize, Serialize};

/// Placeholder used when the scraper has not seen a usable hint yet.
pub const UNKNOWN: &str = "Unknown";

/// Parsed fields of one yt-dlp progress line. Everything but `percent` is
/// free text lifted straight out of the tool's output; there is no schema
/// guarantee behind these values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub percent: f64,
    pub total_size: String,
    pub speed: String,
    pub eta: String,
    pub title: String,
    pub ext: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ProgressEvent {
    Status { message: String },
    Log { message: String },
    Progress(ProgressUpdate),
    Complete { title: String },
    Error { title: String, message: String },
}

/// One event as it travels through the dispatcher queue.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub job_id: String,
    pub payload: ProgressEvent,
}

/// Contract the presentation layer implements. The dispatcher's consumer
/// thread calls these in per-job order; cross-job interleaving is
/// unspecified. Default bodies let implementors pick the events they care
/// about.
pub trait DownloadEvents: Send {
    fn on_status(&mut self, job_id: &str, message: &str) {
        let _ = (job_id, message);
    }

    fn on_log(&mut self, job_id: &str, line: &str) {
        let _ = (job_id, line);
    }

    fn on_progress(&mut self, job_id: &str, update: &ProgressUpdate) {
        let _ = (job_id, update);
    }

    fn on_complete(&mut self, job_id: &str, title: &str) {
        let _ = (job_id, title);
    }

    fn on_error(&mut self, job_id: &str, title: &str, message: &str) {
        let _ = (job_id, title, message);
    }
}
