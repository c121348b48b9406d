use std::fs;

use dicom_rebuild::series::{make_unique_dir, suggest_save_dir, UNNAMED_SERIES};
use dicom_rebuild::SeriesTarget;

#[test]
fn unnamed_series_first_file() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let mut target = SeriesTarget::new(temp.path(), None, "", 5, true);

    let path = target.get(0, "dcm").expect("first path");

    assert_eq!(path, temp.path().join(UNNAMED_SERIES).join("01.dcm"));
    assert_eq!(target.index_width(), 2);
}

#[test]
fn same_description_twice_gets_a_suffix() {
    let temp = tempfile::tempdir().expect("create temp dir");

    let a = SeriesTarget::new(temp.path(), None, "X", 1, true)
        .get(0, "dcm")
        .expect("first series");
    let b = SeriesTarget::new(temp.path(), None, "X", 1, true)
        .get(0, "dcm")
        .expect("second series");

    assert_eq!(a.parent(), Some(temp.path().join("X").as_path()));
    assert_eq!(b.parent(), Some(temp.path().join("X (1)").as_path()));
}

#[test]
fn numbered_series_directory() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let mut target = SeriesTarget::new(temp.path(), Some(7), "AX T2", 120, true);

    let path = target.get(11, "dcm").expect("path");

    assert_eq!(path, temp.path().join("[7] AX T2").join("0012.dcm"));
}

#[test]
fn study_tree_is_created_on_demand() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let study = suggest_save_dir(temp.path(), "Doe^Jane", "Chest", "2024-05-06 07:08:09");

    let dir = make_unique_dir(&study.join("S")).expect("create");

    assert_eq!(dir, temp.path().join("Doe^Jane-Chest-20240506070809").join("S"));
    assert!(fs::metadata(&dir).expect("metadata").is_dir());
}

#[test]
fn parent_directory_description_is_contained() {
    let temp = tempfile::tempdir().expect("create temp dir");
    let study = temp.path().join("study");

    let path = SeriesTarget::new(&study, None, "..", 1, true)
        .get(0, "dcm")
        .expect("path");

    assert_eq!(path, study.join(UNNAMED_SERIES).join("01.dcm"));
    assert_eq!(fs::read_dir(temp.path()).expect("list").count(), 1);
}
