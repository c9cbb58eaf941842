use super::*;
use std::collections::HashSet;
use tempfile::TempDir;

fn store(dir: &TempDir) -> MediaStore {
    MediaStore::new(dir.path(), "https://bridge.example.com/", 1024).unwrap()
}

#[test]
fn test_extension_known_types() {
    assert_eq!(extension_for_mime("image/png"), "png");
    assert_eq!(extension_for_mime("image/jpeg"), "jpg");
    assert_eq!(extension_for_mime("video/mp4"), "mp4");
    assert_eq!(extension_for_mime("audio/mp4"), "m4a");
    assert_eq!(extension_for_mime("application/pdf"), "pdf");
    assert_eq!(
        extension_for_mime(
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        ),
        "docx"
    );
}

#[test]
fn test_extension_ignores_parameters_and_case() {
    assert_eq!(extension_for_mime("audio/ogg; codecs=opus"), "ogg");
    assert_eq!(extension_for_mime("IMAGE/PNG"), "png");
}

#[test]
fn test_extension_unknown_is_bin() {
    assert_eq!(extension_for_mime("application/x-whatever"), "bin");
    assert_eq!(extension_for_mime("garbage"), "bin");
    assert_eq!(extension_for_mime(""), "bin");
}

#[test]
fn test_public_url_trims_trailing_slash() {
    let dir = TempDir::new().unwrap();
    assert_eq!(
        store(&dir).public_url("521-1.png"),
        "https://bridge.example.com/uploads/521-1.png"
    );
}

#[test]
fn test_file_names_unique_in_burst() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let names: HashSet<_> = (0..1000).map(|_| store.file_name("521", "png")).collect();
    assert_eq!(names.len(), 1000);
    assert!(names.iter().all(|n| n.starts_with("521-") && n.ends_with(".png")));
}

#[test]
fn test_file_name_empty_sender() {
    let dir = TempDir::new().unwrap();
    assert!(store(&dir).file_name("", "bin").starts_with("unknown-"));
}

#[tokio::test]
async fn test_persist_writes_file() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let stored = store.persist("521", "png", b"\x89PNG data").await.unwrap();

    assert_eq!(std::fs::read(&stored.path).unwrap(), b"\x89PNG data");
    assert!(stored.filename.starts_with("521-"));
    assert_eq!(
        stored.url,
        format!("https://bridge.example.com/uploads/{}", stored.filename)
    );
}

#[tokio::test]
async fn test_persist_rejects_empty_and_oversized() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    assert!(store.persist("521", "png", b"").await.is_err());
    assert!(store.persist("521", "png", &[0u8; 2048]).await.is_err());
}

#[tokio::test]
async fn test_persist_fails_when_dir_removed() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    std::fs::remove_dir_all(dir.path()).unwrap();
    assert!(store.persist("521", "png", b"data").await.is_err());
}

#[tokio::test]
async fn test_sweep_removes_only_old_files() {
    let dir = TempDir::new().unwrap();
    let store = store(&dir);
    let stored = store.persist("521", "png", b"data").await.unwrap();

    assert_eq!(store.sweep(Duration::from_secs(3600)).await.unwrap(), 0);
    assert!(stored.path.exists());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(store.sweep(Duration::from_millis(1)).await.unwrap(), 1);
    assert!(!stored.path.exists());
}
