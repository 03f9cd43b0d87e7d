//! Append-only confidence record.
//!
//! One CSV row per processed video. The header is written when the file is
//! created (or found empty), never again.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::confidence::ConfidenceReport;
use crate::error::CorError;

pub const DEFAULT_RECORD_FILE: &str = "gaze_confidence.csv";

pub const RECORD_HEADER: [&str; 12] = [
    "Video Title",
    "Overall Accuracy Confidence (%)",
    "Average Confidence Per Point (%)",
    "Detection Rate (%)",
    "Valid Gaze Points Detected",
    "Total Frames Processed",
    "Average Position X",
    "Average Position Y",
    "Standard Deviation X",
    "Standard Deviation Y",
    "Frame Percentage X (%)",
    "Frame Percentage Y (%)",
];

/// Appends rows to `{folder}/{file_name}`.
#[derive(Clone, Debug)]
pub struct RecordWriter {
    path: PathBuf,
}

impl RecordWriter {
    pub fn new(folder: &Path, file_name: &str) -> Self {
        Self {
            path: folder.join(file_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, video_title: &str, report: &ConfidenceReport) -> Result<()> {
        let needs_header = fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| CorError::output_write(&self.path, e))?;

        let mut out = String::new();
        if needs_header {
            out.push_str(&join_row(RECORD_HEADER.iter().map(|h| h.to_string())));
        }
        out.push_str(&join_row(record_fields(video_title, report)));
        file.write_all(out.as_bytes())
            .map_err(|e| CorError::output_write(&self.path, e))?;
        log::debug!("appended confidence record to {}", self.path.display());
        Ok(())
    }
}

fn record_fields(video_title: &str, report: &ConfidenceReport) -> Vec<String> {
    vec![
        video_title.to_string(),
        format!("{:.2}", report.accuracy_confidence),
        format!("{:.2}", report.avg_confidence * 100.0),
        format!("{:.2}", report.detection_rate * 100.0),
        report.gaze_points.to_string(),
        report.total_frames.to_string(),
        format!("{:.2}", report.mean_x),
        format!("{:.2}", report.mean_y),
        format!("{:.2}", report.std_x),
        format!("{:.2}", report.std_y),
        format!("{:.2}", report.frame_pct_x),
        format!("{:.2}", report.frame_pct_y),
    ]
}

fn join_row(fields: impl IntoIterator<Item = String>) -> String {
    let mut line = fields.into_iter().map(|f| escape(&f)).collect::<Vec<_>>().join(",");
    line.push('\n');
    line
}

fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::ConfidenceAnalyzer;
    use crate::gaze::GazePoint;

    #[test]
    fn header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let writer = RecordWriter::new(dir.path(), DEFAULT_RECORD_FILE);
        let report = ConfidenceAnalyzer::default().analyze(&[GazePoint::new(960, 540)], 1);
        writer.append("first", &report).unwrap();
        writer.append("second", &report).unwrap();

        let contents = fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Video Title,"));
        assert_eq!(lines[0].split(',').count(), 12);
        assert!(lines[1].starts_with("first,"));
        assert!(lines[2].contains(",960.00,540.00,0.00,0.00,50.00,50.00"));
    }

    #[test]
    fn empty_file_gets_header() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("r.csv"), "").unwrap();
        let writer = RecordWriter::new(dir.path(), "r.csv");
        let report = ConfidenceAnalyzer::default().analyze(&[], 50);
        writer.append("idle", &report).unwrap();
        let contents = fs::read_to_string(writer.path()).unwrap();
        assert!(contents.starts_with("Video Title,"));
        assert!(contents.contains("idle,0.00,0.00,0.00,0,50,"));
    }

    #[test]
    fn record_row_has_one_field_per_header_column() {
        let report = ConfidenceAnalyzer::default().analyze(&[GazePoint::new(10, 20)], 4);
        let row = join_row(record_fields("clip", &report));
        assert!(row.ends_with('\n'));
        assert_eq!(row.trim_end().split(',').count(), RECORD_HEADER.len());
        assert!(row.starts_with("clip,"));
    }

    #[test]
    fn titles_with_commas_are_quoted() {
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape("plain"), "plain");
    }

    #[test]
    fn unwritable_folder_is_output_write_error() {
        let writer = RecordWriter::new(Path::new("/nonexistent/cor/folder"), "r.csv");
        let report = ConfidenceAnalyzer::default().analyze(&[], 1);
        let err = writer.append("x", &report).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CorError>(),
            Some(CorError::OutputWrite { .. })
        ));
    }
}
