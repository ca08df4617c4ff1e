//! Filesystem helpers shared by the core operation types.

use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use chrono::{DateTime, Utc};
use directories::BaseDirs;
use serde::Serialize;
use std::{fs, io, path::{Path, PathBuf}};
use walkdir::WalkDir;

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(p: &str) -> PathBuf {
    let home = || BaseDirs::new().map(|b| b.home_dir().to_path_buf());
    if p == "~" {
        if let Some(h) = home() { return h; }
    } else if let Some(rest) = p.strip_prefix("~/") {
        if let Some(h) = home() { return h.join(rest); }
    }
    PathBuf::from(p)
}

/// `~`-expanded and absolute. Falls back to the expanded path if the cwd is gone.
pub fn expand_path(p: &str) -> PathBuf {
    let expanded = expand_tilde(p);
    std::path::absolute(&expanded).unwrap_or(expanded)
}

/// OS message verbatim, followed by the path it concerns.
pub fn describe_io_error(err: &io::Error, path: &Path) -> String {
    format!("{err}: '{}'", path.display())
}

pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 { format!("{bytes} B") } else { format!("{size:.1} {}", UNITS[unit]) }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Metadata {
    pub size: u64,
    pub modified: Option<String>,
    pub is_directory: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<Vec<String>>,
}

/// Metadata of `path`; directories also list their entry names (dirs end in `/`).
pub fn metadata(path: &Path) -> io::Result<Metadata> {
    let md = fs::metadata(path)?;
    let modified = md.modified().ok().map(|t| DateTime::<Utc>::from(t).to_rfc3339());
    let entries = if md.is_dir() {
        let mut names = Vec::new();
        for e in fs::read_dir(path)? {
            let e = e?;
            let mut name = e.file_name().to_string_lossy().into_owned();
            if e.file_type()?.is_dir() { name.push('/'); }
            names.push(name);
        }
        names.sort();
        Some(names)
    } else {
        None
    };
    Ok(Metadata { size: md.len(), modified, is_directory: md.is_dir(), entries })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FileContent {
    Text(String),
    Base64(String),
}

impl FileContent {
    pub fn encoding(&self) -> &'static str {
        match self { Self::Text(_) => "utf-8", Self::Base64(_) => "base64" }
    }
    pub fn into_string(self) -> String {
        match self { Self::Text(s) | Self::Base64(s) => s }
    }
}

pub fn is_binary(bytes: &[u8]) -> bool {
    bytes.contains(&0) || std::str::from_utf8(bytes).is_err()
}

pub fn read_file(path: &Path) -> io::Result<FileContent> {
    let bytes = fs::read(path)?;
    if is_binary(&bytes) {
        Ok(FileContent::Base64(B64.encode(&bytes)))
    } else {
        Ok(FileContent::Text(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

pub fn copy_dir_recursive(src: &Path, dst: &Path) -> io::Result<()> {
    for entry in WalkDir::new(src) {
        let entry = entry?;
        let rel = entry.path().strip_prefix(src).map_err(io::Error::other)?;
        let target = dst.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

pub fn remove_any(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() { fs::remove_dir_all(path) } else { fs::remove_file(path) }
}
