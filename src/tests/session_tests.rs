use crate::session::Session;

#[test]
fn test_in_memory_session() {
    let session = Session::in_memory();

    assert!(!session.is_authenticated());
    assert_eq!(session.token(), None);
    assert_eq!(session.bearer(), None);
}

#[test]
fn test_with_token_bearer_header() {
    let session = Session::with_token("abc.def");

    assert!(session.is_authenticated());
    assert_eq!(session.bearer().as_deref(), Some("Bearer abc.def"));
}

#[test]
fn test_clones_share_state() {
    let session = Session::in_memory();
    let clone = session.clone();

    session.set_token("t1", "bearer").expect("Failed to set token");
    assert_eq!(clone.token().as_deref(), Some("t1"));

    clone.clear().expect("Failed to clear");
    assert!(!session.is_authenticated());
}

#[test]
fn test_token_persists_across_loads() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("data").join("session.json");

    let session = Session::load(&path).expect("Failed to load session");
    assert!(!session.is_authenticated());

    session.set_token("persisted-token", "bearer").expect("Failed to set token");
    assert!(path.exists());

    let reloaded = Session::load(&path).expect("Failed to reload session");
    assert_eq!(reloaded.token().as_deref(), Some("persisted-token"));
}

#[test]
fn test_clear_persists_signed_out_state() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("session.json");

    let session = Session::load(&path).expect("Failed to load session");
    session.set_token("short-lived", "bearer").expect("Failed to set token");
    session.clear().expect("Failed to clear session");

    let reloaded = Session::load(&path).expect("Failed to reload session");
    assert!(!reloaded.is_authenticated());
}

#[test]
fn test_empty_session_file_is_signed_out() {
    let temp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");

    let session = Session::load(temp_file.path()).expect("Failed to load session");

    assert!(!session.is_authenticated());
}

#[test]
fn test_corrupt_session_file_is_an_error() {
    let temp_file = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    std::fs::write(temp_file.path(), "{{{").expect("Failed to write");

    assert!(Session::load(temp_file.path()).is_err());
}
