use std::{
    collections::BTreeMap,
    fs::{self, File},
    path::{Path, PathBuf},
};

use physcap::{archive::archive_subject, SubjectDir};
use walkdir::WalkDir;

fn files_under(root: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(root)
        .into_iter()
        .map(|e| e.unwrap())
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
            (rel, fs::read(e.path()).unwrap())
        })
        .collect()
}

#[test]
fn extract_reproduces_the_subject() {
    let dataset = tempfile::tempdir().unwrap();
    let subject = dataset.path().join("frank");
    fs::create_dir_all(subject.join("rgb")).unwrap();
    fs::create_dir_all(subject.join("thermal")).unwrap();
    fs::create_dir_all(subject.join("vernier")).unwrap();
    fs::write(subject.join("rgb/0_20240101_120000_000000.jpg"), [0xff, 0xd8, 0xff, 0xd9]).unwrap();
    fs::write(
        subject.join("thermal/0_20240101_120000_000000.csv"),
        "29000,30123\n65535,0\n",
    )
    .unwrap();
    fs::write(
        subject.join("vernier/frank_vernier.csv"),
        "2024-01-01 12:00:00.000000,1.5,2.5\n".repeat(500),
    )
    .unwrap();
    fs::write(subject.join("frank_report.txt"), "Source: rgb\n\n").unwrap();

    let out = tempfile::tempdir().unwrap();
    let zip_path = archive_subject(&SubjectDir::new(dataset.path(), "frank"), out.path()).unwrap();
    assert_eq!(zip_path, out.path().join("frank.zip"));

    let mut archive = zip::ZipArchive::new(File::open(&zip_path).unwrap()).unwrap();
    let names: Vec<String> = archive.file_names().map(String::from).collect();
    assert!(names.iter().all(|n| n.starts_with("frank/")));
    assert!(names.contains(&"frank/vernier/frank_vernier.csv".to_string()));

    let restored = tempfile::tempdir().unwrap();
    archive.extract(restored.path()).unwrap();
    assert_eq!(
        files_under(&restored.path().join("frank")),
        files_under(&subject)
    );
}
