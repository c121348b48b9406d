use std::fs;

use assert_cmd::Command;
use dicom_rebuild::reader::read_instance;
use dicom_rebuild::tags;
use predicates::prelude::*;

mod common;

fn cmd() -> Command {
    let mut cmd = Command::cargo_bin("dicom-rebuild").unwrap();
    cmd.env_remove("DICOM_REBUILD_LOG")
        .env_remove("DICOM_REBUILD_LOG_FILE")
        .env_remove("DICOM_REBUILD_OPTIONS");
    cmd
}

#[test]
fn outputs_tool_name() {
    cmd()
        .arg("-V")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("dicom-rebuild "));
}

#[test]
fn help_lists_subcommands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("assemble").and(predicate::str::contains("rebuild")));
}

#[test]
fn assemble_writes_a_readable_file() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let tags_path = temp.path().join("0.tags.json");
    let pixels_path = temp.path().join("0.slice");
    let output = temp.path().join("out.dcm");

    fs::write(&tags_path, serde_json::to_vec(&common::ct_records(2, 2, 16)).unwrap()).unwrap();
    fs::write(&pixels_path, common::ramp_u16(4)).unwrap();

    cmd()
        .arg("assemble")
        .arg("--tags")
        .arg(&tags_path)
        .arg("--pixels")
        .arg(&pixels_path)
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("Uncompressed"));

    let instance = read_instance(&output).expect("read output");
    assert_eq!(instance.sop_instance_uid(), Some("1.2.3.4.5.6"));
}

#[test]
fn assemble_rejects_malformed_tag_list() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let tags_path = temp.path().join("bad.json");
    let pixels_path = temp.path().join("0.slice");
    fs::write(&tags_path, "{ not json").unwrap();
    fs::write(&pixels_path, b"").unwrap();

    cmd()
        .arg("assemble")
        .arg("--tags")
        .arg(&tags_path)
        .arg("--pixels")
        .arg(&pixels_path)
        .arg("--output")
        .arg(temp.path().join("out.dcm"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Failed to parse tag list"));
}

#[test]
fn rebuild_lays_out_series_directories() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let source = temp.path().join("capture");
    let study = temp.path().join("study");

    for index in 0..3 {
        common::write_capture(
            &source.join("AX T1"),
            index,
            &common::records(&[("0008,0060", "MR"), ("0028,0010", "2"), ("0028,0011", "2"), ("0028,0100", "8")]),
            &[index as u8; 4],
        );
    }
    common::write_capture(&source.join("Scout"), 0, &common::records(&[]), &common::jpeg_gray(8, 8));
    fs::write(source.join("Scout").join("1.tags.json"), "[]").unwrap();

    cmd()
        .arg("rebuild")
        .arg(&source)
        .arg("--output")
        .arg(&study)
        .assert()
        .success()
        .stdout(predicate::str::contains("4 instance(s) written"));

    let third = read_instance(&study.join("AX T1").join("03.dcm")).expect("third instance");
    assert_eq!(third.pixel_data.first_frame_bytes(), &[2, 2, 2, 2]);
    assert!(study.join("Scout").join("01.dcm").is_file());
    assert!(!study.join("Scout").join("02.dcm").exists());
}

#[test]
fn rebuild_twice_does_not_overwrite() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let source = temp.path().join("capture");
    let study = temp.path().join("study");
    common::write_capture(&source.join("S"), 0, &common::records(&[("0008,0060", "CT")]), &[]);

    for _ in 0..2 {
        cmd().arg("rebuild").arg(&source).arg("-o").arg(&study).assert().success();
    }

    assert!(study.join("S").join("01.dcm").is_file());
    assert!(study.join("S (1)").join("01.dcm").is_file());
}

#[test]
fn rebuild_derives_study_directory() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let source = temp.path().join("capture");
    let root = temp.path().join("download");
    common::write_capture(
        &source.join("S"),
        0,
        &common::records(&[
            ("0010,0010", "Doe^Jane"),
            ("0008,1030", "Head"),
            ("0008,0020", "20240102"),
            ("0008,0030", "101500"),
        ]),
        &[],
    );

    cmd().arg("rebuild").arg(&source).arg("--root").arg(&root).assert().success();

    let instance = read_instance(&root.join("Doe^Jane-Head-20240102101500").join("S").join("01.dcm"))
        .expect("rebuilt instance");
    assert_eq!(instance.str_attr(tags::STUDY_DESCRIPTION), Some("Head"));
}

#[test]
fn validate_exit_codes() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let source = temp.path().join("capture");
    let study = temp.path().join("study");
    common::write_capture(&source.join("S"), 0, &common::records(&[("0008,0060", "CT")]), &[]);
    cmd().arg("rebuild").arg(&source).arg("-o").arg(&study).assert().success();

    cmd()
        .arg("validate")
        .arg(&study)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 of 1 file(s) readable"));

    fs::write(study.join("S").join("broken.dcm"), b"not a dicom file").unwrap();
    cmd().arg("validate").arg(&study).assert().code(2);

    let empty = temp.path().join("empty");
    fs::create_dir(&empty).unwrap();
    cmd()
        .arg("validate")
        .arg(&empty)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("No DICOM files"));
}

#[test]
fn inspect_dumps_elements_and_preview() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let source = temp.path().join("capture");
    let study = temp.path().join("study");
    common::write_capture(&source.join("S"), 0, &common::ct_records(2, 2, 8), &[0, 64, 128, 255]);
    cmd().arg("rebuild").arg(&source).arg("-o").arg(&study).assert().success();

    let preview = temp.path().join("preview.png");
    cmd()
        .arg("inspect")
        .arg(study.join("S").join("01.dcm"))
        .arg("--preview")
        .arg(&preview)
        .assert()
        .success()
        .stdout(predicate::str::contains("(0008,0060) CS Modality: CT"));

    assert!(preview.is_file());
}

#[test]
fn compare_reports_identical_trees() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let source = temp.path().join("capture");
    common::write_capture(&source.join("S"), 0, &common::ct_records(2, 2, 8), &[1, 2, 3, 4]);

    let left = temp.path().join("left");
    let right = temp.path().join("right");
    for out in [&left, &right] {
        cmd().arg("rebuild").arg(&source).arg("-o").arg(out).assert().success();
    }

    cmd()
        .arg("compare")
        .arg(&left)
        .arg(&right)
        .assert()
        .success()
        .stdout(predicate::str::contains("1 file(s) compared, 0 differ"));
}
