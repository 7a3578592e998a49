use crate::logging;
use crate::paths::AppPaths;
use crate::{EngineError, Result};
use chrono::Local;
use rusqlite::Connection;
use serde::Serialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const DEFAULT_COOKIE_DOMAIN: &str = "youtube.com";

// Chromium stores expiry as microseconds since 1601-01-01.
const WINDOWS_EPOCH_OFFSET_SECS: i64 = 11_644_473_600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Browser {
    Chrome,
    Edge,
    Firefox,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chrome => "chrome",
            Browser::Edge => "edge",
            Browser::Firefox => "firefox",
        }
    }
}

/// One row lifted from a browser cookie store, already normalized to unix
/// epoch expiry. Chromium-encrypted values pass through as stored;
/// decryption is out of scope.
#[derive(Debug, Clone, PartialEq)]
pub struct CookieRow {
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub expiry: i64,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CookieExtraction {
    pub browser: Browser,
    pub cookie_count: usize,
    pub jar_path: String,
}

/// Netscape cookie-jar line: domain, include-subdomains flag, path, secure
/// flag, expiry epoch, name, value, tab separated.
pub fn netscape_line(row: &CookieRow) -> String {
    format!(
        "{}\tTRUE\t{}\t{}\t{}\t{}\t{}",
        row.domain,
        row.path,
        if row.secure { "TRUE" } else { "FALSE" },
        row.expiry,
        row.name,
        row.value
    )
}

pub fn write_cookie_jar(jar_path: &Path, rows: &[CookieRow]) -> Result<()> {
    if let Some(parent) = jar_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut contents = String::from("# Netscape HTTP Cookie File\n");
    contents.push_str("# This file was generated by tubegrab\n");
    contents.push_str(&format!(
        "# Generated: {}\n\n",
        Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    for row in rows {
        contents.push_str(&netscape_line(row));
        contents.push('\n');
    }
    std::fs::write(jar_path, contents)?;
    Ok(())
}

pub fn chromium_expiry_to_unix(expires_utc: i64) -> i64 {
    if expires_utc <= 0 {
        return 0;
    }
    expires_utc / 1_000_000 - WINDOWS_EPOCH_OFFSET_SECS
}

/// Extracts cookies for `domain` from `browser` into the app cookie jar.
/// The store is copied aside first; the browser may hold a lock on the live
/// file, and a failed copy is reported as unavailable rather than retried.
pub fn extract_cookies(
    paths: &AppPaths,
    browser: Browser,
    domain: &str,
) -> Result<CookieExtraction> {
    logging::log_info(
        paths,
        &format!("cookie extraction started: browser={}", browser.as_str()),
    );

    let store = locate_cookie_store(browser).ok_or_else(|| EngineError::CookieStoreUnavailable {
        browser: browser.as_str().to_string(),
        reason: "cookie store not found".to_string(),
    })?;

    let snapshot = snapshot_store(paths, browser, &store)?;
    let rows = read_snapshot_rows(browser, &snapshot, domain);
    let _ = std::fs::remove_file(&snapshot);
    let rows = rows?;

    if rows.is_empty() {
        return Err(EngineError::CookieStoreUnavailable {
            browser: browser.as_str().to_string(),
            reason: format!("no cookies matched domain {domain}"),
        });
    }

    let jar_path = paths.cookie_jar_path();
    write_cookie_jar(&jar_path, &rows)?;
    logging::log_info(
        paths,
        &format!(
            "extracted {} cookies from {} into {}",
            rows.len(),
            browser.as_str(),
            jar_path.to_string_lossy()
        ),
    );

    Ok(CookieExtraction {
        browser,
        cookie_count: rows.len(),
        jar_path: jar_path.to_string_lossy().to_string(),
    })
}

/// Tries Edge, then Chrome, then Firefox; first browser that yields matching
/// cookies wins.
pub fn extract_cookies_auto(paths: &AppPaths, domain: &str) -> Result<CookieExtraction> {
    let mut last_err: Option<EngineError> = None;
    for browser in [Browser::Edge, Browser::Chrome, Browser::Firefox] {
        match extract_cookies(paths, browser, domain) {
            Ok(extraction) => return Ok(extraction),
            Err(err) => {
                logging::log_warning(paths, &err.to_string());
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| EngineError::CookieStoreUnavailable {
        browser: "auto".to_string(),
        reason: "no browser cookie store found".to_string(),
    }))
}

fn snapshot_store(paths: &AppPaths, browser: Browser, store: &Path) -> Result<PathBuf> {
    let dir = paths.cache_dir().join("cookie_snapshots");
    std::fs::create_dir_all(&dir)?;
    let snapshot = dir.join(format!("cookies_{}.db", Uuid::new_v4()));
    std::fs::copy(store, &snapshot).map_err(|e| EngineError::CookieStoreUnavailable {
        browser: browser.as_str().to_string(),
        reason: format!("could not copy cookie store: {e}"),
    })?;
    Ok(snapshot)
}

/// Reads the snapshot with the browser's schema. A failure here means the
/// copy is not a usable cookie database, which gets the same retry hint as
/// a failed copy.
fn read_snapshot_rows(browser: Browser, snapshot: &Path, domain: &str) -> Result<Vec<CookieRow>> {
    let rows = match browser {
        Browser::Chrome | Browser::Edge => read_chromium_rows(snapshot, domain),
        Browser::Firefox => read_firefox_rows(snapshot, domain),
    };
    rows.map_err(|e| EngineError::CookieStoreUnavailable {
        browser: browser.as_str().to_string(),
        reason: format!("could not read cookie store: {e}"),
    })
}

pub fn read_chromium_rows(db_path: &Path, domain: &str) -> Result<Vec<CookieRow>> {
    let conn = Connection::open(db_path)?;
    let mut stmt = conn.prepare(
        "SELECT name, value, host_key, path, expires_utc, is_secure
         FROM cookies
         WHERE host_key LIKE ?1 OR host_key LIKE ?2
         ORDER BY host_key, name",
    )?;

    let rows = stmt
        .query_map(
            [format!("%{domain}"), format!("%.{domain}")],
            |row| {
                Ok(CookieRow {
                    name: row.get(0)?,
                    value: row.get(1)?,
                    domain: row.get(2)?,
                    path: row.get(3)?,
                    expiry: chromium_expiry_to_unix(row.get(4)?),
                    secure: row.get::<_, i64>(5)? != 0,
                })
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn read_firefox_rows(db_path: &Path, domain: &str) -> Result<Vec<CookieRow>> {
    let conn = Connection::open(db_path)?;
    let mut stmt = conn.prepare(
        "SELECT name, value, host, path, expiry, isSecure
         FROM moz_cookies
         WHERE host LIKE ?1 OR host LIKE ?2
         ORDER BY host, name",
    )?;

    let rows = stmt
        .query_map(
            [format!("%{domain}"), format!("%.{domain}")],
            |row| {
                Ok(CookieRow {
                    name: row.get(0)?,
                    value: row.get(1)?,
                    domain: row.get(2)?,
                    path: row.get(3)?,
                    expiry: row.get(4)?,
                    secure: row.get::<_, i64>(5)? != 0,
                })
            },
        )?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

fn locate_cookie_store(browser: Browser) -> Option<PathBuf> {
    match browser {
        Browser::Chrome => locate_chrome_store(),
        Browser::Edge => locate_edge_store(),
        Browser::Firefox => locate_firefox_store(),
    }
}

fn locate_chrome_store() -> Option<PathBuf> {
    let candidate = if cfg!(windows) {
        dirs::data_local_dir()?
            .join("Google")
            .join("Chrome")
            .join("User Data")
            .join("Default")
            .join("Network")
            .join("Cookies")
    } else if cfg!(target_os = "macos") {
        dirs::home_dir()?
            .join("Library")
            .join("Application Support")
            .join("Google")
            .join("Chrome")
            .join("Default")
            .join("Cookies")
    } else {
        dirs::config_dir()?
            .join("google-chrome")
            .join("Default")
            .join("Cookies")
    };
    candidate.exists().then_some(candidate)
}

fn locate_edge_store() -> Option<PathBuf> {
    if cfg!(windows) {
        let base = dirs::data_local_dir()?
            .join("Microsoft")
            .join("Edge")
            .join("User Data");
        let default = base.join("Default").join("Network").join("Cookies");
        if default.exists() {
            return Some(default);
        }
        // Fall back to numbered profiles.
        for entry in std::fs::read_dir(&base).ok()?.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with("Profile ") {
                let candidate = entry.path().join("Network").join("Cookies");
                if candidate.exists() {
                    return Some(candidate);
                }
            }
        }
        return None;
    }

    let candidate = if cfg!(target_os = "macos") {
        dirs::home_dir()?
            .join("Library")
            .join("Application Support")
            .join("Microsoft Edge")
            .join("Default")
            .join("Cookies")
    } else {
        dirs::config_dir()?
            .join("microsoft-edge")
            .join("Default")
            .join("Cookies")
    };
    candidate.exists().then_some(candidate)
}

fn locate_firefox_store() -> Option<PathBuf> {
    let profiles_dir = if cfg!(windows) {
        dirs::data_dir()?.join("Mozilla").join("Firefox").join("Profiles")
    } else if cfg!(target_os = "macos") {
        dirs::home_dir()?
            .join("Library")
            .join("Application Support")
            .join("Firefox")
            .join("Profiles")
    } else {
        dirs::home_dir()?.join(".mozilla").join("firefox")
    };

    for entry in std::fs::read_dir(&profiles_dir).ok()?.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(".default") || name.ends_with(".default-release") {
            let candidate = entry.path().join("cookies.sqlite");
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    None
}
