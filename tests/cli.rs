//! Runs the built binary end to end.
//!
//! Tests marked `#[ignore]` need the DINOv2 weights: put an ONNX export of
//! `facebook/dinov2-base` at `models/dinov2-base.onnx` (or point
//! `EXTRACT_VECTOR_MODEL_DIR` at a directory holding it) and run
//! `cargo test -- --ignored`.

use std::path::Path;
use std::process::{Command, Output};

use image::{Rgb, RgbImage};

const DINOV2_BASE_FEATURES: usize = 257 * 768;

fn extract_vector(args: &[&str], envs: &[(&str, &str)]) -> Output
{
    Command::new(env!("CARGO_BIN_EXE_extract_vector"))
        .args(args)
        .env("RUST_LOG", "off")
        .envs(envs.iter().copied())
        .output()
        .expect("failed to run extract_vector")
}

/// The JSON error object printed on stderr.
fn error_message(output: &Output) -> String
{
    let stderr = String::from_utf8_lossy(&output.stderr);
    let line = stderr.lines().last().unwrap_or_else(|| panic!("stderr is empty"));
    let report: serde_json::Value = serde_json::from_str(line)
        .unwrap_or_else(|e| panic!("stderr is not JSON ({}): {}", e, stderr));
    report["error"].as_str().unwrap_or_else(|| panic!("no error key: {}", report)).to_string()
}

fn assert_failed_silently(output: &Output)
{
    assert_eq!(output.status.code(), Some(1));
    assert!(output.stdout.is_empty(), "unexpected stdout: {}", String::from_utf8_lossy(&output.stdout));
}

fn write_test_image(path: &Path)
{
    RgbImage::from_fn(320, 240, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]))
        .save(path)
        .unwrap();
}

fn features_of(output: &Output) -> Vec<f64>
{
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8(output.stdout.clone()).unwrap();
    assert_eq!(stdout.lines().count(), 1, "expected one line of output");
    serde_json::from_str(stdout.trim_end()).unwrap()
}

#[test]
fn no_arguments_is_a_usage_error()
{
    let output = extract_vector(&[], &[]);
    assert_failed_silently(&output);
    assert_eq!(error_message(&output), "Usage: extract_vector <image_path>");
}

#[test]
fn two_arguments_is_a_usage_error()
{
    let output = extract_vector(&["a.jpg", "b.jpg"], &[]);
    assert_failed_silently(&output);
    assert_eq!(error_message(&output), "Usage: extract_vector <image_path>");
}

#[test]
fn help_goes_to_stdout()
{
    let output = extract_vector(&["--help"], &[]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("Usage"));
    assert!(output.stderr.is_empty());
}

#[test]
fn missing_model_is_a_pipeline_error()
{
    let repository = tempfile::tempdir().unwrap();
    let image_dir = tempfile::tempdir().unwrap();
    let image_path = image_dir.path().join("image.png");
    write_test_image(&image_path);

    let output = extract_vector(
        &[image_path.to_str().unwrap()],
        &[
            ("EXTRACT_VECTOR_MODEL_DIR", repository.path().to_str().unwrap()),
            ("EXTRACT_VECTOR_MODEL", "no-such-model"),
        ],
    );
    assert_failed_silently(&output);
    let message = error_message(&output);
    assert!(message.starts_with("Failed to load pipeline: "), "{}", message);
    assert!(message.contains("no-such-model.onnx"), "{}", message);
}

#[test]
fn invalid_device_is_a_pipeline_error()
{
    let output = extract_vector(&["image.png"], &[("EXTRACT_VECTOR_DEVICE", "abacus")]);
    assert_failed_silently(&output);
    let message = error_message(&output);
    assert!(message.starts_with("Failed to load pipeline: "), "{}", message);
    assert!(message.contains("EXTRACT_VECTOR_DEVICE"), "{}", message);
}

/// The pipeline is built before the image is opened, so without weights this
/// reports the pipeline error; either way nothing reaches stdout.
#[test]
fn nonexistent_image_fails_without_output()
{
    let dir = tempfile::tempdir().unwrap();
    let output = extract_vector(&[dir.path().join("missing.jpg").to_str().unwrap()], &[]);
    assert_failed_silently(&output);
    assert!(!error_message(&output).is_empty());
}

#[test]
#[ignore = "needs models/dinov2-base.onnx"]
fn nonexistent_image_is_an_image_error()
{
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.jpg");
    let output = extract_vector(&[path.to_str().unwrap()], &[]);
    assert_failed_silently(&output);
    let message = error_message(&output);
    assert!(message.starts_with(&format!("Error opening image {}: ", path.display())), "{}", message);
}

#[test]
#[ignore = "needs models/dinov2-base.onnx"]
fn corrupt_image_is_an_image_error()
{
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.jpg");
    std::fs::write(&path, b"\xff\xd8\xff\xe0 definitely not a jpeg").unwrap();

    let output = extract_vector(&[path.to_str().unwrap()], &[]);
    assert_failed_silently(&output);
    assert!(error_message(&output).starts_with("Error opening image "));
}

#[test]
#[ignore = "needs models/dinov2-base.onnx"]
fn valid_image_prints_the_feature_vector()
{
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.png");
    write_test_image(&path);

    let output = extract_vector(&[path.to_str().unwrap()], &[("EXTRACT_VECTOR_DEVICE", "cpu")]);
    let features = features_of(&output);
    assert_eq!(features.len(), DINOV2_BASE_FEATURES);
    assert!(features.iter().all(|v| v.is_finite()));
}

#[test]
#[ignore = "needs models/dinov2-base.onnx"]
fn repeated_runs_have_the_same_length()
{
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("image.png");
    write_test_image(&path);

    let first = features_of(&extract_vector(&[path.to_str().unwrap()], &[]));
    let second = features_of(&extract_vector(&[path.to_str().unwrap()], &[]));
    assert_eq!(first.len(), second.len());
}
