//! Tests for archive extraction

use super::*;
use crate::error::ErrorKind;
use crate::test_support::{sample_game_zip, write_zip};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

/// Relative paths of every file and directory under `root`
fn file_set(root: &Path) -> BTreeSet<String> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeSet<String>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let relative = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
            if path.is_dir() {
                out.insert(format!("{}/", relative));
                walk(root, &path, out);
            } else {
                out.insert(relative);
            }
        }
    }

    let mut out = BTreeSet::new();
    walk(root, root, &mut out);
    out
}

async fn install(archive: &Path, target: &Path) -> Result<ExtractionReport> {
    ArchiveInstaller::new()
        .with_entry_point("game.exe")
        .install(archive, target, None, &CancellationToken::new())
        .await
}

#[tokio::test]
async fn extracts_entries_and_removes_archive() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("game.zip");
    std::fs::write(&archive, sample_game_zip()).unwrap();

    let report = install(&archive, dir.path()).await.unwrap();

    assert_eq!(report.files, 2);
    assert_eq!(report.directories, 1);
    assert!(report.archive_removed);
    assert!(report.entry_point_extracted);
    assert!(!archive.exists());
    assert_eq!(
        std::fs::read(dir.path().join("data/level1.pak")).unwrap(),
        b"level one"
    );
    assert_eq!(
        file_set(dir.path()),
        BTreeSet::from(["data/".to_string(), "data/level1.pak".to_string(), "game.exe".to_string()])
    );
}

#[tokio::test]
async fn reinstall_is_idempotent_and_overwrites() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("game.zip");

    std::fs::write(&archive, sample_game_zip()).unwrap();
    install(&archive, dir.path()).await.unwrap();
    let first = file_set(dir.path());

    write_zip(
        &archive,
        &[
            ("data/", None),
            ("data/level1.pak", Some(b"level one, patched".as_slice())),
            ("game.exe", Some(b"MZ new build".as_slice())),
        ],
    );
    install(&archive, dir.path()).await.unwrap();

    assert_eq!(file_set(dir.path()), first);
    assert_eq!(std::fs::read(dir.path().join("game.exe")).unwrap(), b"MZ new build");
    assert_eq!(
        std::fs::read(dir.path().join("data/level1.pak")).unwrap(),
        b"level one, patched"
    );
}

#[tokio::test]
async fn files_without_directory_entries_get_parents() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("game.zip");
    write_zip(&archive, &[("assets/textures/sky.dds", Some(b"dds".as_slice()))]);

    let report = install(&archive, dir.path()).await.unwrap();

    assert_eq!(report.files, 1);
    assert!(!report.entry_point_extracted);
    assert!(dir.path().join("assets/textures/sky.dds").is_file());
}

#[tokio::test]
async fn corrupt_archive_is_rejected_before_writing() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("install");
    std::fs::create_dir(&target).unwrap();
    let archive = dir.path().join("game.zip");
    std::fs::write(&archive, b"this is not a zip file").unwrap();

    let err = install(&archive, &target).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidArchive);
    assert!(archive.exists());
    assert!(file_set(&target).is_empty());
}

#[tokio::test]
async fn path_traversal_entry_is_rejected_before_writing() {
    let dir = tempdir().unwrap();
    let target = dir.path().join("install");
    std::fs::create_dir(&target).unwrap();
    let archive = dir.path().join("game.zip");
    write_zip(
        &archive,
        &[
            ("readme.txt", Some(b"harmless".as_slice())),
            ("../escaped.txt", Some(b"evil".as_slice())),
        ],
    );

    let err = install(&archive, &target).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidArchive);
    assert!(file_set(&target).is_empty());
    assert!(!dir.path().join("escaped.txt").exists());
    assert!(archive.exists());
}

#[tokio::test]
async fn write_failure_keeps_archive_for_retry() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("game.zip");
    std::fs::write(&archive, sample_game_zip()).unwrap();
    // A plain file where the archive expects a directory.
    std::fs::write(dir.path().join("data"), b"in the way").unwrap();

    let err = install(&archive, dir.path()).await.unwrap_err();

    match &err {
        LauncherError::ExtractionFailed { entry, .. } => assert!(entry.starts_with("data")),
        other => panic!("Expected ExtractionFailed, got {:?}", other),
    }
    assert!(err.is_retryable());
    assert!(archive.exists());
    assert!(!dir.path().join("game.exe").exists());
}

#[tokio::test]
async fn entry_point_is_written_last() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("game.zip");
    write_zip(
        &archive,
        &[
            ("game.exe", Some(b"MZ".as_slice())),
            ("data/", None),
            ("data/a.pak", Some(b"a".as_slice())),
            ("b.dll", Some(b"b".as_slice())),
        ],
    );

    let order = Arc::new(Mutex::new(Vec::new()));
    let sink = order.clone();
    let callback: ProgressCallback = Arc::new(move |event: ProgressEvent| {
        if let ProgressEvent::EntryExtracted { entry, .. } = event {
            sink.lock().unwrap().push(entry);
        }
    });

    ArchiveInstaller::new()
        .with_entry_point("game.exe")
        .install(&archive, dir.path(), Some(callback), &CancellationToken::new())
        .await
        .unwrap();

    let order = order.lock().unwrap();
    assert_eq!(order.first().map(String::as_str), Some("data/"));
    assert_eq!(order.last().map(String::as_str), Some("game.exe"));
    assert_eq!(order.len(), 4);
}

#[tokio::test]
async fn cancelled_extraction_keeps_archive() {
    let dir = tempdir().unwrap();
    let archive = dir.path().join("game.zip");
    std::fs::write(&archive, sample_game_zip()).unwrap();

    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = ArchiveInstaller::new()
        .install(&archive, dir.path(), None, &cancel)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExtractionFailed);
    assert!(err.to_string().contains("cancelled"));
    assert!(archive.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn unix_permissions_are_preserved() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let archive = dir.path().join("game.zip");
    std::fs::write(&archive, sample_game_zip()).unwrap();

    install(&archive, dir.path()).await.unwrap();

    let mode = std::fs::metadata(dir.path().join("game.exe")).unwrap().permissions().mode();
    assert_eq!(mode & 0o111, 0o111);
}

#[cfg(unix)]
fn read_only_archive(path: &Path, content: &[u8]) {
    let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
    let options = zip::write::SimpleFileOptions::default().unix_permissions(0o444);
    zip.start_file("data/readonly.pak", options).unwrap();
    std::io::Write::write_all(&mut zip, content).unwrap();
    zip.finish().unwrap();
}

#[cfg(unix)]
#[tokio::test]
async fn reinstall_replaces_read_only_files() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let target = dir.path().join("install");
    let archive = dir.path().join("game.zip");
    let extracted = target.join("data/readonly.pak");

    read_only_archive(&archive, b"first release");
    install(&archive, &target).await.unwrap();
    let mode = std::fs::metadata(&extracted).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o444);

    // A second name for the old file shows whether it was replaced or written through
    let old_copy = dir.path().join("old.pak");
    std::fs::hard_link(&extracted, &old_copy).unwrap();

    read_only_archive(&archive, b"second release");
    let report = install(&archive, &target).await.unwrap();

    assert_eq!(report.files, 1);
    assert_eq!(std::fs::read(&extracted).unwrap(), b"second release");
    assert_eq!(std::fs::read(&old_copy).unwrap(), b"first release");
}
