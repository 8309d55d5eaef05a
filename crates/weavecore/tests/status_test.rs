use tempfile::TempDir;
use weavecore::{Area, SharedStorage, State, StatusStore};

fn store() -> (TempDir, StatusStore, SharedStorage) {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
    let dir = TempDir::new().unwrap();
    let storage = SharedStorage::new(dir.path());
    let store = StatusStore::new(storage.clone()).unwrap();
    (dir, store, storage)
}

#[test]
fn transitions_keep_exactly_one_state_file() {
    let (_dir, store, _) = store();
    let id = "recon:resolve";

    store.write(id, State::Pending, "").unwrap();
    assert_eq!(store.state_files(id).unwrap().len(), 1);

    for state in [State::Running, State::Done] {
        store.write(id, state, "output").unwrap();
        let files = store.state_files(id).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].to_string_lossy().ends_with(state.as_str()));
    }

    let record = store.read(id).unwrap().unwrap();
    assert_eq!(record.state, State::Done);
    assert_eq!(record.body, "output");
}

#[test]
fn rewriting_same_state_updates_body() {
    let (_dir, store, _) = store();
    store.write("m:t", State::Pending, "Waiting").unwrap();
    store.write("m:t", State::Pending, "Blocked").unwrap();

    let record = store.read("m:t").unwrap().unwrap();
    assert_eq!(record.body, "Blocked");
    assert_eq!(store.state_files("m:t").unwrap().len(), 1);
}

#[test]
fn leftover_duplicates_are_cleaned_on_next_write() {
    let (_dir, store, storage) = store();
    let status_dir = storage.area_path(Area::Status);
    std::fs::write(status_dir.join("m:t.pending"), "").unwrap();
    std::fs::write(status_dir.join("m:t.running"), "").unwrap();

    store.write("m:t", State::Failed, "boom").unwrap();
    assert_eq!(store.state_files("m:t").unwrap().len(), 1);
    assert_eq!(store.read("m:t").unwrap().unwrap().state, State::Failed);
}

#[test]
fn list_ignores_temp_files() {
    let (_dir, store, storage) = store();
    store.write("recon", State::Running, "Module recon is running").unwrap();
    store.write("recon:probe", State::Pending, "").unwrap();
    std::fs::write(storage.area_path(Area::Status).join(".recon:x.tmp"), "").unwrap();

    let listed = store.list().unwrap();
    assert_eq!(
        listed,
        vec![
            ("recon".to_string(), State::Running),
            ("recon:probe".to_string(), State::Pending),
        ]
    );
}

#[test]
fn missing_record_reads_as_none() {
    let (_dir, store, _) = store();
    assert!(store.read("nothing:here").unwrap().is_none());
}
