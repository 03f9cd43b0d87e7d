use std::fs;
use std::path::Path;

use cor_gaze::batch::{BatchOptions, BatchOrchestrator};
use cor_gaze::config::CorConfig;
use cor_gaze::detect::{DetectionBox, FaceDetection, ReplayBackend};
use cor_gaze::ingest::FileSourceOpener;
use cor_gaze::pipeline::NoProgress;
use cor_gaze::CorError;

fn config_in(output: &Path) -> CorConfig {
    let mut config = CorConfig::default();
    config.heatmap.image_format = "png".into();
    config.paths.output_path = Some(output.to_path_buf());
    config
}

fn looking_detector(frames: usize) -> ReplayBackend {
    let face = FaceDetection {
        face: DetectionBox::new(0, 0, 32, 16),
        eyes: vec![DetectionBox::new(4, 4, 4, 4), DetectionBox::new(20, 4, 4, 4)],
    };
    ReplayBackend::from_frames(vec![vec![face]; frames])
}

fn batch_folders(root: &Path) -> Vec<String> {
    fs::read_dir(root)
        .unwrap()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("batch_"))
        .collect()
}

#[test]
fn videos_share_one_batch_folder_and_record() {
    let out = tempfile::tempdir().unwrap();
    let config = config_in(out.path());
    let opener = FileSourceOpener;
    let orchestrator = BatchOrchestrator::new(&config, &opener).with_base_dir(out.path());
    let mut detector = looking_detector(8);

    let refs = vec![
        "stub://32x16?frames=6".to_string(),
        "stub://48x16?frames=4".to_string(),
    ];
    let result = orchestrator
        .run(&refs, &BatchOptions::default(), &mut detector, &mut NoProgress)
        .expect("batch runs");

    assert!(result.success);
    assert_eq!(result.succeeded(), 2);
    assert_eq!(result.failed(), 0);
    assert!(result.unresolved.is_empty());
    assert!(result.batch_folder.starts_with(out.path()));
    assert_eq!(batch_folders(out.path()).len(), 1);

    let folder = &result.batch_folder;
    assert!(folder.join("32x16_frames_6_heatmap-pure.png").is_file());
    assert!(folder.join("48x16_frames_4_heatmap-overlay.png").is_file());

    let record = fs::read_to_string(folder.join("gaze_confidence.csv")).unwrap();
    let lines: Vec<&str> = record.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("Video Title,"));
    assert!(lines[1].starts_with("32x16_frames_6,"));
    assert!(lines[2].starts_with("48x16_frames_4,"));

    let first = result.results[0].report.as_ref().unwrap();
    assert_eq!(first.total_frames, 6);
    assert_eq!(first.gaze_points, 6);
}

#[test]
fn nothing_matched_is_an_error_without_output() {
    let out = tempfile::tempdir().unwrap();
    let config = config_in(out.path());
    let opener = FileSourceOpener;
    let orchestrator = BatchOrchestrator::new(&config, &opener).with_base_dir(out.path());
    let mut detector = looking_detector(1);

    let refs = vec!["missing.mp4".to_string(), "*.avi".to_string()];
    let err = orchestrator
        .run(&refs, &BatchOptions::default(), &mut detector, &mut NoProgress)
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<CorError>(),
        Some(CorError::NoVideosFound { .. })
    ));
    assert!(batch_folders(out.path()).is_empty());
}

#[test]
fn failing_video_does_not_stop_the_batch() {
    let out = tempfile::tempdir().unwrap();
    let config = config_in(out.path());
    let opener = FileSourceOpener;
    let orchestrator = BatchOrchestrator::new(&config, &opener).with_base_dir(out.path());
    let mut detector = looking_detector(3);

    let refs = vec![
        "stub://32x16?bogus=1".to_string(),
        "stub://32x16?frames=3".to_string(),
    ];
    let result = orchestrator
        .run(&refs, &BatchOptions::default(), &mut detector, &mut NoProgress)
        .expect("batch runs");

    assert!(result.success);
    assert_eq!(result.results.len(), 2);
    assert!(!result.results[0].success);
    assert!(result.results[0]
        .error
        .as_deref()
        .is_some_and(|e| e.contains("cannot open video source")));
    assert!(result.results[1].success);

    let record = fs::read_to_string(result.batch_folder.join("gaze_confidence.csv")).unwrap();
    assert_eq!(record.lines().count(), 2);
}

#[test]
fn all_failures_report_unsuccessful_batch() {
    let out = tempfile::tempdir().unwrap();
    let config = config_in(out.path());
    let opener = FileSourceOpener;
    let orchestrator = BatchOrchestrator::new(&config, &opener).with_base_dir(out.path());
    let mut detector = looking_detector(1);

    let refs = vec!["stub://0x0".to_string()];
    let result = orchestrator
        .run(&refs, &BatchOptions::default(), &mut detector, &mut NoProgress)
        .expect("batch runs");

    assert!(!result.success);
    assert_eq!(result.failed(), 1);
    assert!(result.batch_folder.is_dir());
}

#[test]
fn unresolved_references_are_skipped_and_reported() {
    let out = tempfile::tempdir().unwrap();
    let config = config_in(out.path());
    let opener = FileSourceOpener;
    let orchestrator = BatchOrchestrator::new(&config, &opener).with_base_dir(out.path());
    let mut detector = looking_detector(2);

    let refs = vec!["nope.mp4".to_string(), "stub://16x16?frames=2".to_string()];
    let result = orchestrator
        .run(&refs, &BatchOptions::default(), &mut detector, &mut NoProgress)
        .expect("batch runs");

    assert_eq!(result.unresolved, vec!["nope.mp4".to_string()]);
    assert_eq!(result.results.len(), 1);
    assert!(result.success);
}

#[test]
fn collected_videos_are_unique_in_first_seen_order() {
    let dir = tempfile::tempdir().unwrap();
    let videos = dir.path().join("videos");
    fs::create_dir_all(videos.join("nested")).unwrap();
    for name in ["b.mp4", "a.avi", "nested/c.mp4", "readme.txt"] {
        fs::write(videos.join(name), b"").unwrap();
    }

    let config = config_in(dir.path());
    let opener = FileSourceOpener;
    let orchestrator = BatchOrchestrator::new(&config, &opener).with_base_dir(dir.path());

    let refs = vec![
        "videos/b.mp4".to_string(),
        "videos".to_string(),
        "videos/*.mp4".to_string(),
    ];
    let (found, unresolved) = orchestrator.collect_videos(&refs, &BatchOptions::default());
    assert!(unresolved.is_empty());
    assert_eq!(found, vec![videos.join("b.mp4"), videos.join("a.avi")]);

    let options = BatchOptions {
        recursive: true,
        extensions: vec!["mp4".to_string()],
        ..BatchOptions::default()
    };
    let (found, _) = orchestrator.collect_videos(&["videos".to_string()], &options);
    assert_eq!(found, vec![videos.join("b.mp4"), videos.join("nested/c.mp4")]);
}

#[test]
fn existing_files_are_taken_literally_before_glob_expansion() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("clip[1].mp4"), b"").unwrap();
    fs::write(dir.path().join("clip1.mp4"), b"").unwrap();
    fs::create_dir(dir.path().join("empty")).unwrap();

    let config = config_in(dir.path());
    let opener = FileSourceOpener;
    let orchestrator = BatchOrchestrator::new(&config, &opener).with_base_dir(dir.path());

    let refs = vec![
        "clip[1].mp4".to_string(),
        "*.mov".to_string(),
        "empty".to_string(),
    ];
    let (found, unresolved) = orchestrator.collect_videos(&refs, &BatchOptions::default());
    assert_eq!(found, vec![dir.path().join("clip[1].mp4")]);
    assert_eq!(unresolved, vec!["*.mov".to_string(), "empty".to_string()]);
}

#[test]
fn empty_expansions_are_reported_in_the_batch_result() {
    let out = tempfile::tempdir().unwrap();
    fs::create_dir(out.path().join("no_videos")).unwrap();
    let config = config_in(out.path());
    let opener = FileSourceOpener;
    let orchestrator = BatchOrchestrator::new(&config, &opener).with_base_dir(out.path());
    let mut detector = looking_detector(2);

    let refs = vec![
        "stub://16x16?frames=2".to_string(),
        "*.mkv".to_string(),
        "no_videos".to_string(),
    ];
    let result = orchestrator
        .run(&refs, &BatchOptions::default(), &mut detector, &mut NoProgress)
        .expect("batch runs");

    assert_eq!(result.succeeded(), 1);
    assert_eq!(
        result.unresolved,
        vec!["*.mkv".to_string(), "no_videos".to_string()]
    );
}

#[test]
fn batch_exports_attention_analysis_per_video() {
    let out = tempfile::tempdir().unwrap();
    let config = config_in(out.path());
    let opener = FileSourceOpener;
    let orchestrator = BatchOrchestrator::new(&config, &opener).with_base_dir(out.path());
    let mut detector = looking_detector(6);

    let options = BatchOptions {
        export_analysis: true,
        ..BatchOptions::default()
    };
    let refs = vec!["stub://32x16?frames=6".to_string()];
    let result = orchestrator
        .run(&refs, &options, &mut detector, &mut NoProgress)
        .expect("batch runs");

    let json = result.batch_folder.join("32x16_frames_6_analysis.json");
    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(json).unwrap()).unwrap();
    assert_eq!(value["fixation_count"], 1);
    assert_eq!(value["fixations"][0]["visit_count"], 6);
}
