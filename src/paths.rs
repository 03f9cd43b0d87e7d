//! Input/output locations and video reference resolution.
//!
//! `PathConfig` is an explicit value: it is loaded from the paths file at the
//! start of a run and handed to the resolver by reference. Only the
//! `paths ...` commands mutate and save it.

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::error::CorError;

pub const DEFAULT_PATHS_FILE: &str = "cor_paths.toml";

/// Synthetic sources resolve to themselves.
pub const SYNTHETIC_PREFIX: &str = "stub://";

/// Extensions accepted as video input (compared case-insensitively).
pub const SUPPORTED_VIDEO_EXTENSIONS: [&str; 7] = ["mp4", "avi", "mov", "mkv", "wmv", "flv", "webm"];

pub fn is_supported_video(path: &Path) -> bool {
    has_extension_in(path, &SUPPORTED_VIDEO_EXTENSIONS)
}

fn has_extension_in<S: AsRef<str>>(path: &Path, extensions: &[S]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| extensions.iter().any(|s| s.as_ref().eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Configured input, output and search locations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub input_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub search_paths: Vec<PathBuf>,
}

impl PathConfig {
    /// Load a paths file. A missing file is an empty configuration.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents =
            fs::read_to_string(path).map_err(|e| CorError::configuration_io(path, e))?;
        let config = toml::from_str(&contents).map_err(|e| CorError::configuration_io(path, e))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| CorError::configuration_io(path, e))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| CorError::configuration_io(path, e))?;
        }
        fs::write(path, contents).map_err(|e| CorError::configuration_io(path, e))?;
        Ok(())
    }

    /// Set the input directory. The path must exist.
    pub fn set_input_path(&mut self, path: &Path) -> Result<&Path> {
        if !path.exists() {
            return Err(CorError::InvalidConfig(format!(
                "input path does not exist: {}",
                path.display()
            ))
            .into());
        }
        let input = self.input_path.insert(absolutize(path)?);
        Ok(input.as_path())
    }

    /// Set the output directory, creating it when missing.
    pub fn set_output_path(&mut self, path: &Path) -> Result<&Path> {
        fs::create_dir_all(path)
            .with_context(|| format!("create output directory {}", path.display()))?;
        let output = self.output_path.insert(absolutize(path)?);
        Ok(output.as_path())
    }

    /// Append a search directory. Returns false when it was already present.
    pub fn add_search_path(&mut self, path: &Path) -> Result<bool> {
        if !path.is_dir() {
            return Err(CorError::InvalidConfig(format!(
                "search path is not a directory: {}",
                path.display()
            ))
            .into());
        }
        let path = absolutize(path)?;
        if self.search_paths.contains(&path) {
            return Ok(false);
        }
        self.search_paths.push(path);
        Ok(true)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Layer `other` on top: its locations win, search paths accumulate.
    pub fn overlay(&mut self, other: PathConfig) {
        if other.input_path.is_some() {
            self.input_path = other.input_path;
        }
        if other.output_path.is_some() {
            self.output_path = other.output_path;
        }
        for path in other.search_paths {
            if !self.search_paths.contains(&path) {
                self.search_paths.push(path);
            }
        }
    }

    /// Where run outputs go: the configured output path or the current directory.
    pub fn output_root(&self) -> PathBuf {
        self.output_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = env::current_dir().context("determine current directory")?;
    Ok(cwd.join(path))
}

/// Outcome of resolving one reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Found(PathBuf),
    /// Nothing matched; carries the reference as given.
    Unresolved(String),
}

impl Resolution {
    pub fn found(&self) -> Option<&Path> {
        match self {
            Self::Found(path) => Some(path),
            Self::Unresolved(_) => None,
        }
    }
}

/// Maps user references to files using a [`PathConfig`].
pub struct PathResolver<'a> {
    config: &'a PathConfig,
    base_dir: PathBuf,
}

impl<'a> PathResolver<'a> {
    /// Resolver relative to the current working directory.
    pub fn new(config: &'a PathConfig) -> Self {
        let base_dir = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::with_base_dir(config, base_dir)
    }

    pub fn with_base_dir(config: &'a PathConfig, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            base_dir: base_dir.into(),
        }
    }

    pub fn config(&self) -> &PathConfig {
        self.config
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve a reference to an existing file or directory.
    ///
    /// Order: as given (absolute), relative to the base directory, under the
    /// input path, under each search path, then the basename as a glob inside
    /// each search path.
    pub fn resolve(&self, reference: &str) -> Resolution {
        if let Some(found) = self.resolve_literal(reference) {
            return Resolution::Found(found);
        }

        let given = Path::new(reference);
        if let Some(basename) = given.file_name().and_then(|n| n.to_str()) {
            if let Some(regex) = glob_regex(basename) {
                for search in &self.config.search_paths {
                    if let Some(hit) = first_matching_entry(&self.rooted(search), &regex) {
                        return Resolution::Found(hit);
                    }
                }
            }
        }

        log::debug!("could not resolve '{}'", reference);
        Resolution::Unresolved(reference.to_string())
    }

    /// The resolution order without the basename glob step: the reference
    /// is taken as a literal file name everywhere.
    pub fn resolve_literal(&self, reference: &str) -> Option<PathBuf> {
        if reference.starts_with(SYNTHETIC_PREFIX) {
            return Some(PathBuf::from(reference));
        }
        let given = Path::new(reference);
        if given.is_absolute() {
            if given.exists() {
                return Some(given.to_path_buf());
            }
        } else {
            let relative = self.base_dir.join(given);
            if relative.exists() {
                return Some(relative);
            }
        }

        if let Some(input) = &self.config.input_path {
            let candidate = self.rooted(input).join(given);
            if candidate.exists() {
                return Some(candidate);
            }
        }

        self.config
            .search_paths
            .iter()
            .map(|search| self.rooted(search).join(given))
            .find(|candidate| candidate.exists())
    }

    /// Videos directly inside `folder` (or below it when `recursive`),
    /// sorted. `extensions` narrows the allow-list when non-empty.
    pub fn find_videos_in_folder(
        &self,
        folder: &Path,
        recursive: bool,
        extensions: &[String],
    ) -> Vec<PathBuf> {
        let folder = self.rooted(folder);
        let mut walker = WalkDir::new(&folder).follow_links(true).min_depth(1);
        if !recursive {
            walker = walker.max_depth(1);
        }
        let mut videos: Vec<PathBuf> = walker
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| video_filter(path, extensions))
            .collect();
        videos.sort();
        videos
    }

    /// Shell-glob enumeration across the base directory, the input path and
    /// every search path. De-duplicated and sorted.
    pub fn find_videos_by_pattern(&self, pattern: &str) -> Vec<PathBuf> {
        let mut found = BTreeSet::new();
        let pattern_path = Path::new(pattern);
        let mut roots = Vec::new();
        if pattern_path.is_absolute() {
            roots.push(PathBuf::new());
        } else {
            roots.push(self.base_dir.clone());
            roots.extend(self.config.input_path.iter().map(|p| self.rooted(p)));
            roots.extend(self.config.search_paths.iter().map(|p| self.rooted(p)));
        }

        for root in roots {
            let full = root.join(pattern_path);
            for path in glob_paths(&full) {
                if is_supported_video(&path) {
                    found.insert(path);
                }
            }
        }
        found.into_iter().collect()
    }

    fn rooted(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

/// File stem usable in output names.
pub fn video_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    stem.chars()
        .map(|c| match c {
            '?' | '&' | '=' | ':' | '*' | '"' | '<' | '>' | '|' | '\\' => '_',
            c => c,
        })
        .collect()
}

/// Extension including the leading dot, or empty.
pub fn video_extension(path: &Path) -> String {
    path.extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default()
}

fn video_filter(path: &Path, extensions: &[String]) -> bool {
    if !is_supported_video(path) {
        return false;
    }
    extensions.is_empty() || has_extension_in(path, extensions)
}

/// True when `s` contains glob metacharacters.
pub fn is_glob(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Translate a shell glob into an anchored regex. `*` and `?` stay within a
/// path segment; `**` crosses segments.
pub fn glob_to_regex(glob: &str) -> String {
    let mut out = String::from("^");
    let chars: Vec<char> = glob.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                // `**/` also matches zero directories.
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
                continue;
            }
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '[' => {
                let close = chars[i + 1..].iter().position(|c| *c == ']');
                match close {
                    Some(offset) if offset > 0 => {
                        let body: String = chars[i + 1..i + 1 + offset].iter().collect();
                        out.push('[');
                        match body.strip_prefix('!') {
                            Some(rest) => {
                                out.push('^');
                                out.push_str(&rest.replace('\\', "\\\\"));
                            }
                            None => out.push_str(&body.replace('\\', "\\\\")),
                        }
                        out.push(']');
                        i += offset + 2;
                        continue;
                    }
                    _ => out.push_str(&regex::escape("[")),
                }
            }
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push('$');
    out
}

fn glob_regex(glob: &str) -> Option<Regex> {
    Regex::new(&glob_to_regex(glob)).ok()
}

fn first_matching_entry(dir: &Path, regex: &Regex) -> Option<PathBuf> {
    let mut names: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| regex.is_match(n))
        })
        .collect();
    names.sort();
    names.into_iter().next()
}

/// Expand a glob path into existing files.
fn glob_paths(pattern: &Path) -> Vec<PathBuf> {
    let mut prefix = PathBuf::new();
    let mut rest = Vec::new();
    for component in pattern.components() {
        let text = component.as_os_str().to_string_lossy();
        if rest.is_empty() && !is_glob(&text) {
            prefix.push(component);
        } else {
            rest.push(text.into_owned());
        }
    }

    if rest.is_empty() {
        return if prefix.is_file() { vec![prefix] } else { Vec::new() };
    }
    if !prefix.is_dir() {
        return Vec::new();
    }

    let Some(regex) = glob_regex(&rest.join("/")) else {
        return Vec::new();
    };
    let mut walker = WalkDir::new(&prefix).follow_links(true).min_depth(1);
    if !rest.iter().any(|segment| segment.contains("**")) {
        walker = walker.max_depth(rest.len());
    }
    walker
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(&prefix).ok()?;
            let relative = relative
                .components()
                .filter_map(|c| match c {
                    Component::Normal(s) => s.to_str(),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("/");
            regex.is_match(&relative).then(|| entry.into_path())
        })
        .collect()
}
