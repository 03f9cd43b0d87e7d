//! Heatmap images and the annotated overlay video.
//!
//! Naming relative to an output folder:
//! - `{video}_heatmap-pure.{ext}`: density only
//! - `{video}_heatmap-overlay.{ext}`: density blended over a representative frame
//! - `{video}_heatmap{video_ext}`: source video with gaze marker and eye lines

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::str::FromStr;

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

use crate::error::CorError;
use crate::gaze::{GazePoint, GazeSample};
use crate::heatmap::HeatmapGrid;

pub const GAZE_MARKER_RADIUS: i32 = 10;
const EYE_MARKER_RADIUS: i32 = 3;
const GAZE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const EYE_COLOR: Rgb<u8> = Rgb([0, 128, 255]);
const LINE_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColorScheme {
    Hot,
    Jet,
    Winter,
    Gray,
}

impl ColorScheme {
    /// Map a normalized density to a color.
    pub fn color(self, value: f64) -> Rgb<u8> {
        let v = value.clamp(0.0, 1.0);
        let (r, g, b) = match self {
            Self::Hot => (3.0 * v, 3.0 * v - 1.0, 3.0 * v - 2.0),
            Self::Jet => (
                1.5 - (4.0 * v - 3.0).abs(),
                1.5 - (4.0 * v - 2.0).abs(),
                1.5 - (4.0 * v - 1.0).abs(),
            ),
            Self::Winter => (0.0, v, 1.0 - v / 2.0),
            Self::Gray => (v, v, v),
        };
        Rgb([channel(r), channel(g), channel(b)])
    }
}

fn channel(v: f64) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

impl FromStr for ColorScheme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hot" => Ok(Self::Hot),
            "jet" => Ok(Self::Jet),
            "winter" => Ok(Self::Winter),
            "gray" | "grey" => Ok(Self::Gray),
            other => Err(anyhow!("unknown color scheme '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }

    fn encoder_format(self) -> image::ImageFormat {
        match self {
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::Png => image::ImageFormat::Png,
        }
    }
}

impl FromStr for ImageFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().trim_start_matches('.') {
            "jpg" | "jpeg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            other => Err(anyhow!("unsupported image format '{}'", other)),
        }
    }
}

pub fn pure_heatmap_path(folder: &Path, video_name: &str, format: ImageFormat) -> PathBuf {
    folder.join(format!("{}_heatmap-pure.{}", video_name, format.extension()))
}

pub fn overlay_heatmap_path(folder: &Path, video_name: &str, format: ImageFormat) -> PathBuf {
    folder.join(format!("{}_heatmap-overlay.{}", video_name, format.extension()))
}

/// `video_ext` includes the leading dot, or is empty.
pub fn overlay_video_path(folder: &Path, video_name: &str, video_ext: &str) -> PathBuf {
    folder.join(format!("{}_heatmap{}", video_name, video_ext))
}

pub fn render_heatmap(grid: &HeatmapGrid, scheme: ColorScheme) -> RgbImage {
    RgbImage::from_fn(grid.width(), grid.height(), |x, y| scheme.color(grid.get(x, y)))
}

/// Alpha-blend `heat` over `base`. `heat` is resized when the sizes differ.
pub fn blend_overlay(base: &RgbImage, heat: &RgbImage, alpha: f32) -> RgbImage {
    let alpha = alpha.clamp(0.0, 1.0);
    let resized;
    let heat = if heat.dimensions() == base.dimensions() {
        heat
    } else {
        resized = imageops::resize(heat, base.width(), base.height(), FilterType::Triangle);
        &resized
    };
    let mut out = base.clone();
    for (dst, src) in out.pixels_mut().zip(heat.pixels()) {
        for c in 0..3 {
            let mixed = f32::from(dst.0[c]) * (1.0 - alpha) + f32::from(src.0[c]) * alpha;
            dst.0[c] = mixed.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Writes the heatmap images for one video into an output folder.
#[derive(Clone, Debug)]
pub struct OutputWriter {
    folder: PathBuf,
    format: ImageFormat,
    scheme: ColorScheme,
    alpha: f32,
}

impl OutputWriter {
    pub fn new(folder: &Path, format: ImageFormat, scheme: ColorScheme, alpha: f32) -> Self {
        Self {
            folder: folder.to_path_buf(),
            format,
            scheme,
            alpha,
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn write_pure(&self, video_name: &str, grid: &HeatmapGrid) -> Result<PathBuf> {
        let path = pure_heatmap_path(&self.folder, video_name, self.format);
        self.save(&render_heatmap(grid, self.scheme), &path)?;
        Ok(path)
    }

    pub fn write_overlay(
        &self,
        video_name: &str,
        grid: &HeatmapGrid,
        frame: &RgbImage,
    ) -> Result<PathBuf> {
        let path = overlay_heatmap_path(&self.folder, video_name, self.format);
        let heat = render_heatmap(grid, self.scheme);
        self.save(&blend_overlay(frame, &heat, self.alpha), &path)?;
        Ok(path)
    }

    /// Save an arbitrary frame in the configured format.
    pub fn save(&self, image: &RgbImage, path: &Path) -> Result<()> {
        image
            .save_with_format(path, self.format.encoder_format())
            .map_err(|e| CorError::output_write(path, e))?;
        log::debug!("wrote {}", path.display());
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Drawing
// ----------------------------------------------------------------------------

/// Draw eye-to-gaze lines, eye markers and the gaze marker.
pub fn draw_gaze(image: &mut RgbImage, sample: &GazeSample) {
    draw_line(image, sample.left_eye, sample.point, LINE_COLOR);
    draw_line(image, sample.right_eye, sample.point, LINE_COLOR);
    fill_circle(image, sample.left_eye, EYE_MARKER_RADIUS, EYE_COLOR);
    fill_circle(image, sample.right_eye, EYE_MARKER_RADIUS, EYE_COLOR);
    fill_circle(image, sample.point, GAZE_MARKER_RADIUS, GAZE_COLOR);
}

fn put(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}

/// Bresenham.
pub fn draw_line(image: &mut RgbImage, from: GazePoint, to: GazePoint, color: Rgb<u8>) {
    let (mut x, mut y) = (from.x, from.y);
    let dx = (to.x - from.x).abs();
    let dy = -(to.y - from.y).abs();
    let sx = if from.x < to.x { 1 } else { -1 };
    let sy = if from.y < to.y { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put(image, x, y, color);
        if x == to.x && y == to.y {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

pub fn fill_circle(image: &mut RgbImage, center: GazePoint, radius: i32, color: Rgb<u8>) {
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put(image, center.x + dx, center.y + dy, color);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Overlay video
// ----------------------------------------------------------------------------

/// Arguments for an ffmpeg process reading raw RGB24 frames from stdin.
pub fn encoder_args(output: &Path, width: u32, height: u32, fps: f64) -> Vec<String> {
    let fps = if fps > 0.0 { fps } else { 30.0 };
    vec![
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-f".to_string(),
        "rawvideo".to_string(),
        "-pix_fmt".to_string(),
        "rgb24".to_string(),
        "-s".to_string(),
        format!("{}x{}", width, height),
        "-r".to_string(),
        format!("{:.3}", fps),
        "-i".to_string(),
        "-".to_string(),
        "-vf".to_string(),
        "scale=trunc(iw/2)*2:trunc(ih/2)*2".to_string(),
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        output.to_string_lossy().to_string(),
    ]
}

/// Streams annotated frames into an `ffmpeg` subprocess.
pub struct OverlayVideoWriter {
    path: PathBuf,
    child: Child,
    stdin: Option<ChildStdin>,
    width: u32,
    height: u32,
    frames: u64,
    reaped: bool,
}

impl OverlayVideoWriter {
    pub fn create(path: &Path, width: u32, height: u32, fps: f64) -> Result<Self> {
        let mut command = Command::new("ffmpeg");
        command
            .args(encoder_args(path, width, height, fps))
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        let writer = Self::spawn(command, path, width, height)?;
        log::debug!("overlay video encoder started for {}", path.display());
        Ok(writer)
    }

    fn spawn(mut command: Command, path: &Path, width: u32, height: u32) -> Result<Self> {
        let mut child = command
            .stdin(Stdio::piped())
            .spawn()
            .map_err(|e| CorError::output_write(path, format!("failed to spawn ffmpeg: {}", e)))?;
        let stdin = child.stdin.take();
        Ok(Self {
            path: path.to_path_buf(),
            child,
            stdin,
            width,
            height,
            frames: 0,
            reaped: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_frame(&mut self, image: &RgbImage) -> Result<()> {
        if image.dimensions() != (self.width, self.height) {
            return Err(CorError::output_write(
                &self.path,
                format!(
                    "frame size {}x{} does not match encoder {}x{}",
                    image.width(),
                    image.height(),
                    self.width,
                    self.height
                ),
            )
            .into());
        }
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| CorError::output_write(&self.path, "encoder input already closed"))?;
        stdin
            .write_all(image.as_raw())
            .map_err(|e| CorError::output_write(&self.path, e))?;
        self.frames += 1;
        Ok(())
    }

    /// Close the pipe and wait for ffmpeg to finish writing.
    pub fn finish(mut self) -> Result<PathBuf> {
        drop(self.stdin.take());
        let status = self.child.wait();
        self.reaped = true;
        let status = status.map_err(|e| CorError::output_write(&self.path, e))?;
        if !status.success() {
            return Err(
                CorError::output_write(&self.path, format!("ffmpeg exited with {}", status)).into(),
            );
        }
        log::info!(
            "wrote overlay video {} ({} frames)",
            self.path.display(),
            self.frames
        );
        Ok(self.path.clone())
    }

    /// Stop the encoder without finalizing the file.
    pub fn abort(mut self) {
        self.kill_and_reap();
    }

    fn kill_and_reap(&mut self) {
        if self.reaped {
            return;
        }
        drop(self.stdin.take());
        let _ = self.child.kill();
        if let Err(e) = self.child.wait() {
            log::warn!("overlay encoder for {} was not reaped: {}", self.path.display(), e);
        } else {
            log::debug!("overlay encoder for {} stopped", self.path.display());
        }
        self.reaped = true;
    }
}

impl Drop for OverlayVideoWriter {
    fn drop(&mut self) {
        self.kill_and_reap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heatmap::{HeatmapAccumulator, HeatmapSettings};

    #[test]
    fn output_names_follow_convention() {
        let folder = Path::new("/out");
        assert_eq!(
            pure_heatmap_path(folder, "clip", ImageFormat::Jpeg),
            Path::new("/out/clip_heatmap-pure.jpg")
        );
        assert_eq!(
            overlay_heatmap_path(folder, "clip", ImageFormat::Png),
            Path::new("/out/clip_heatmap-overlay.png")
        );
        assert_eq!(
            overlay_video_path(folder, "clip", ".mp4"),
            Path::new("/out/clip_heatmap.mp4")
        );
    }

    #[test]
    fn color_schemes_span_black_to_bright() {
        assert_eq!(ColorScheme::Hot.color(0.0), Rgb([0, 0, 0]));
        assert_eq!(ColorScheme::Hot.color(1.0), Rgb([255, 255, 255]));
        assert_eq!(ColorScheme::Gray.color(0.5), Rgb([128, 128, 128]));
        assert_eq!(ColorScheme::Jet.color(0.0), Rgb([0, 0, 128]));
        assert_eq!("GREY".parse::<ColorScheme>().unwrap(), ColorScheme::Gray);
        assert!("viridis".parse::<ColorScheme>().is_err());
    }

    #[test]
    fn blend_respects_alpha() {
        let base = RgbImage::from_pixel(2, 2, Rgb([100, 100, 100]));
        let heat = RgbImage::from_pixel(1, 1, Rgb([200, 0, 0]));
        let out = blend_overlay(&base, &heat, 0.5);
        assert_eq!(out.dimensions(), (2, 2));
        assert_eq!(*out.get_pixel(0, 0), Rgb([150, 50, 50]));
        assert_eq!(blend_overlay(&base, &heat, 0.0), base);
    }

    #[test]
    fn writes_pure_and_overlay_images() {
        let dir = tempfile::tempdir().unwrap();
        let mut acc = HeatmapAccumulator::new(16, 8, &HeatmapSettings::default());
        acc.add_point(GazePoint::new(4, 4));
        let grid = acc.finish();
        let writer = OutputWriter::new(dir.path(), ImageFormat::Png, ColorScheme::Hot, 0.6);

        let pure = writer.write_pure("clip", &grid).unwrap();
        let overlay = writer
            .write_overlay("clip", &grid, &RgbImage::new(16, 8))
            .unwrap();
        let decoded = image::open(&pure).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (16, 8));
        assert_eq!(*decoded.get_pixel(4, 4), Rgb([255, 255, 255]));
        assert!(overlay.is_file());
    }

    #[test]
    fn gaze_marker_is_drawn_and_clipped() {
        let mut image = RgbImage::new(40, 40);
        let sample = GazeSample {
            point: GazePoint::new(2, 2),
            left_eye: GazePoint::new(10, 30),
            right_eye: GazePoint::new(30, 30),
        };
        draw_gaze(&mut image, &sample);
        assert_eq!(*image.get_pixel(2, 2), GAZE_COLOR);
        assert_eq!(*image.get_pixel(10, 30), EYE_COLOR);
        assert_eq!(*image.get_pixel(39, 39), Rgb([0, 0, 0]));
    }

    #[test]
    fn encoder_args_describe_raw_input() {
        let args = encoder_args(Path::new("/out/clip_heatmap.mp4"), 640, 480, 0.0);
        let joined = args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt rgb24 -s 640x480 -r 30.000 -i -"));
        assert_eq!(args.last().map(String::as_str), Some("/out/clip_heatmap.mp4"));
    }

    #[cfg(target_os = "linux")]
    fn encoder_stand_in(dir: &Path) -> OverlayVideoWriter {
        let mut command = Command::new("sleep");
        command.arg("30");
        OverlayVideoWriter::spawn(command, &dir.join("clip_heatmap.mp4"), 4, 4).unwrap()
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn dropped_encoder_is_killed_and_reaped() {
        let dir = tempfile::tempdir().unwrap();
        let writer = encoder_stand_in(dir.path());
        let proc_entry = PathBuf::from(format!("/proc/{}", writer.child.id()));
        assert!(proc_entry.exists());
        drop(writer);
        assert!(!proc_entry.exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn aborted_encoder_is_reaped() {
        let dir = tempfile::tempdir().unwrap();
        let writer = encoder_stand_in(dir.path());
        let proc_entry = PathBuf::from(format!("/proc/{}", writer.child.id()));
        writer.abort();
        assert!(!proc_entry.exists());
    }
}
