//! Session cookie pass-through
//!
//! yt-dlp reads cookies from a Netscape cookie jar. The configured header is converted into one
//! inside a private temporary directory that lives exactly as long as the [`CookieFile`].

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::Result;

const COOKIE_FILE_NAME: &str = "yt-cookie.txt";
const COOKIE_DOMAIN: &str = ".youtube.com";

/// Strip CR/LF so the value cannot inject extra header lines.
pub fn sanitize_cookie(header: &str) -> String {
    header.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// `name=value` pairs of a cookie header, skipping malformed entries
pub fn cookie_pairs(header: &str) -> Vec<(&str, &str)> {
    header
        .split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let (name, value) = entry.split_once('=')?;
            let name = name.trim();
            (!name.is_empty()).then_some((name, value.trim()))
        })
        .collect()
}

/// Render a cookie header as a Netscape cookie jar.
pub fn netscape_cookie_jar(header: &str) -> String {
    let mut lines = vec!["# Netscape HTTP Cookie File".to_string()];
    lines.extend(
        cookie_pairs(header).into_iter().map(|(name, value)| {
            format!("{}\tTRUE\t/\tFALSE\t0\t{}\t{}", COOKIE_DOMAIN, name, value)
        }),
    );
    lines.join("\n")
}

/// Cookie jar on disk, removed with its directory on drop
#[derive(Debug)]
pub struct CookieFile {
    header: String,
    path: PathBuf,
    _dir: TempDir,
}

impl CookieFile {
    pub fn create(header: &str) -> Result<Self> {
        let header = sanitize_cookie(header);
        let dir = tempfile::Builder::new().prefix("ytgate-").tempdir()?;
        let path = dir.path().join(COOKIE_FILE_NAME);

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path)?;
        file.write_all(netscape_cookie_jar(&header).as_bytes())?;

        Ok(Self {
            header,
            path,
            _dir: dir,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sanitized header value
    pub fn header(&self) -> &str {
        &self.header
    }

    /// yt-dlp arguments that hand the cookies over both as a jar and as a raw header
    pub fn args(&self) -> Vec<String> {
        vec![
            "--cookies".to_string(),
            self.path.to_string_lossy().into_owned(),
            "--add-header".to_string(),
            format!("Cookie: {}", self.header),
        ]
    }
}
