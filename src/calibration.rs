//! `key=value` parameter files.
//!
//! Lines starting with `#` are comments. Updating a key rewrites its line in
//! place and keeps every other line (comments included) untouched; unknown
//! keys are appended.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Local;

use crate::error::CorError;

pub const DEFAULT_PARAMETER_FILE: &str = "cor.txt";

#[derive(Clone, Debug, PartialEq, Eq)]
enum Line {
    Entry { key: String, value: String },
    Other(String),
}

/// An in-memory parameter file.
#[derive(Clone, Debug)]
pub struct KeyValueFile {
    path: PathBuf,
    lines: Vec<Line>,
}

impl KeyValueFile {
    /// Load `path`. A missing file loads as empty.
    pub fn load(path: &Path) -> Result<Self> {
        let lines = if path.exists() {
            let raw = fs::read_to_string(path).map_err(|e| CorError::configuration_io(path, e))?;
            raw.lines().map(parse_line).collect()
        } else {
            Vec::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            lines,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.lines.iter().find_map(|line| match line {
            Line::Entry { key: k, value } if k == key => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.lines.iter().filter_map(|line| match line {
            Line::Entry { key, value } => Some((key.as_str(), value.as_str())),
            Line::Other(_) => None,
        })
    }

    pub fn set(&mut self, key: &str, value: &str) {
        for line in &mut self.lines {
            if let Line::Entry { key: k, value: v } = line {
                if k == key {
                    *v = value.to_string();
                    return;
                }
            }
        }
        self.lines.push(Line::Entry {
            key: key.to_string(),
            value: value.to_string(),
        });
    }

    pub fn save(&self) -> Result<()> {
        write_file(&self.path, &self.render())
    }

    /// Write every entry to `target` under a commented, timestamped header.
    pub fn save_snapshot(&self, target: &Path, title: &str) -> Result<()> {
        let mut out = format!(
            "# {} Configuration Values\n# Generated by cor {}\n# Last Updated: {}\n\n",
            title,
            env!("CARGO_PKG_VERSION"),
            Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        for (key, value) in self.entries() {
            out.push_str(&format!("{}={}\n", key, value));
        }
        write_file(target, &out)
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Entry { key, value } => out.push_str(&format!("{}={}", key, value)),
                Line::Other(text) => out.push_str(text),
            }
            out.push('\n');
        }
        out
    }
}

fn parse_line(raw: &str) -> Line {
    if raw.trim_start().starts_with('#') {
        return Line::Other(raw.to_string());
    }
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => Line::Entry {
            key: key.trim().to_string(),
            value: value.trim().to_string(),
        },
        _ => Line::Other(raw.to_string()),
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CorError::configuration_io(path, e))?;
    }
    fs::write(path, contents).map_err(|e| CorError::configuration_io(path, e))?;
    Ok(())
}
