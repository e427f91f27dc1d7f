use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::path::*;
use std::process::Command;
use tempfile::tempdir;

fn synthetic(dir: &Path, scene: &str, extra: &[&str]) -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("markerscale")?;
    cmd.arg("synthetic")
        .arg(dir.join(scene))
        .arg(dir.join("markers.txt"))
        .args(extra);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("True scale factor"));
    Ok(())
}

fn scale_factor(stdout: &[u8]) -> f64 {
    let stdout = String::from_utf8_lossy(stdout);
    let line = stdout
        .lines()
        .find(|l| l.starts_with("Calculated scale factor: "))
        .unwrap();
    line["Calculated scale factor: ".len()..].trim().parse().unwrap()
}

#[test]
fn scale_synthetic() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    synthetic(dir.path(), "scene.scene", &["--scene-scale", "4"])?;

    let output = Command::cargo_bin("markerscale")?
        .arg("scale")
        .arg(dir.path().join("scene.scene"))
        .arg(dir.path().join("markers.txt"))
        .arg("--marker-size")
        .arg("0.2")
        .output()?;
    assert!(output.status.success());
    assert!((scale_factor(&output.stdout) - 0.25).abs() < 1e-6);

    Ok(())
}

#[test]
fn scale_synthetic_without_ransac() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    synthetic(dir.path(), "scene.scene", &["--scene-scale", "4"])?;

    let output = Command::cargo_bin("markerscale")?
        .arg("scale")
        .arg(dir.path().join("scene.scene"))
        .arg(dir.path().join("markers.txt"))
        .arg("--marker-size")
        .arg("0.2")
        .arg("--no-ransac")
        .output()?;
    assert!(output.status.success());
    assert!((scale_factor(&output.stdout) - 0.25).abs() < 1e-6);

    Ok(())
}

#[test]
fn scale_noisy_binary_scene() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    synthetic(
        dir.path(),
        "scene.bscene",
        &[
            "--scene-scale",
            "0.5",
            "--pixel-noise",
            "0.1",
            "--outlier-chance",
            "0.02",
            "--markers",
            "15",
            "--cameras",
            "16",
        ],
    )?;

    let output = Command::cargo_bin("markerscale")?
        .arg("scale")
        .arg(dir.path().join("scene.bscene"))
        .arg(dir.path().join("markers.txt"))
        .arg("--marker-size")
        .arg("0.2")
        .output()?;
    assert!(output.status.success());
    assert!((scale_factor(&output.stdout) - 2.0).abs() < 0.05);

    Ok(())
}

#[test]
fn scale_outputs() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    synthetic(dir.path(), "scene.scene", &["--scene-scale", "2"])?;
    let mesh = dir.path().join("mesh.ply");
    std::fs::write(
        &mesh,
        "ply\nformat ascii 1.0\nelement vertex 1\nproperty float x\nproperty float y\nproperty float z\nend_header\n2 4 -8\n",
    )?;

    let mut cmd = Command::cargo_bin("markerscale")?;
    cmd.arg("scale")
        .arg(dir.path().join("scene.scene"))
        .arg(dir.path().join("markers.txt"))
        .arg("--marker-size")
        .arg("0.2")
        .arg("--output-scene")
        .arg(dir.path().join("scaled.scene"))
        .arg("--save-landmarks")
        .arg(dir.path().join("landmarks.obj"))
        .arg("--save-scaled-landmarks")
        .arg(dir.path().join("scaled_landmarks.ply"))
        .arg("--scale-mesh")
        .arg(&mesh)
        .arg(dir.path().join("scaled_mesh.ply"));
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Calculated scale factor"));

    let landmarks = std::fs::read_to_string(dir.path().join("landmarks.obj"))?;
    assert_eq!(landmarks.lines().count(), 40);
    assert!(landmarks.lines().all(|l| l.starts_with("v ")));
    assert!(dir.path().join("scaled_landmarks.ply").exists());

    let scaled_mesh = std::fs::read_to_string(dir.path().join("scaled_mesh.ply"))?;
    assert!(scaled_mesh.contains("1 2 -4"));

    // the scaled scene is metric, so estimating again gives a unit scale
    let output = Command::cargo_bin("markerscale")?
        .arg("scale")
        .arg(dir.path().join("scaled.scene"))
        .arg(dir.path().join("markers.txt"))
        .arg("--marker-size")
        .arg("0.2")
        .output()?;
    assert!(output.status.success());
    assert!((scale_factor(&output.stdout) - 1.0).abs() < 1e-6);

    Ok(())
}

#[test]
fn scale_excluding_every_view_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    synthetic(dir.path(), "scene.scene", &["--cameras", "3"])?;
    let list = dir.path().join("exclude.txt");
    std::fs::write(&list, "view_0000.jpg\nview_0001.jpg\nview_0002.jpg\n")?;

    let mut cmd = Command::cargo_bin("markerscale")?;
    cmd.arg("scale")
        .arg(dir.path().join("scene.scene"))
        .arg(dir.path().join("markers.txt"))
        .arg("--marker-size")
        .arg("0.2")
        .arg("--exclude-from")
        .arg(&list);
    cmd.assert().failure().stderr(predicate::str::contains("NoViews"));

    Ok(())
}

#[test]
fn unsupported_scene_format() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let mut cmd = Command::cargo_bin("markerscale")?;
    cmd.arg("synthetic")
        .arg(dir.path().join("scene.txt"))
        .arg(dir.path().join("markers.txt"));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("UnsupportedFormat"));

    Ok(())
}

#[test]
fn scale_mesh() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let mesh = dir.path().join("mesh.ply");
    std::fs::write(
        &mesh,
        "ply\nformat ascii 1.0\nelement vertex 2\nproperty float x\nproperty float y\nproperty float z\nend_header\n1 1 1\n0.5 0 -2\n",
    )?;

    let mut cmd = Command::cargo_bin("markerscale")?;
    cmd.arg("scale-mesh")
        .arg(&mesh)
        .arg(dir.path().join("out.ply"))
        .arg("--scale")
        .arg("3");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Scaled 2 vertices"));
    let out = std::fs::read_to_string(dir.path().join("out.ply"))?;
    assert!(out.contains("3 3 3"));
    assert!(out.contains("1.5 0 -6"));

    Ok(())
}
