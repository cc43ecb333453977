//! End-to-end tests of the catalog pipeline: import, virtual layout,
//! browse, removal and eventing against a real temporary database.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use opencds::cds::object::{
    CdsObject, CDS_ID_FS_ROOT, CDS_ID_ROOT, OBJECT_TYPE_ACTIVE_ITEM, OBJECT_TYPE_ITEM,
};
use opencds::config::AppConfig;
use opencds::content::ContentManager;
use opencds::database::{
    BrowseParam, SqliteStorage, Storage, BROWSE_CONTAINERS, BROWSE_DIRECT_CHILDREN, BROWSE_ITEMS,
};
use opencds::session::{SessionManager, DEFAULT_SESSION_TIMEOUT};
use opencds::update::{UpdateManager, UpdateSink};

struct NullSink;

impl UpdateSink for NullSink {
    fn send_updates(&self, _payload: &str) {}
}

struct Fixture {
    _home: tempfile::TempDir,
    _media: tempfile::TempDir,
    media_root: PathBuf,
    storage: Arc<dyn Storage>,
    session: Arc<SessionManager>,
    content: Arc<ContentManager>,
}

async fn fixture() -> Fixture {
    let home = tempdir().unwrap();
    let media = tempdir().unwrap();
    // The importer skips dot-prefixed names, and tempdir names start
    // with one; media lives in a visible subdirectory.
    let media_root = media.path().join("library");
    std::fs::create_dir(&media_root).unwrap();
    let config = Arc::new(AppConfig::default_with_home(home.path()));

    let storage = SqliteStorage::new(&config.database_file()).await.unwrap();
    storage.init().await.unwrap();
    let storage: Arc<dyn Storage> = Arc::new(storage);

    let session = SessionManager::new();
    let update = UpdateManager::new(Arc::clone(&storage), Arc::new(NullSink));
    let content = ContentManager::new(
        config,
        Arc::clone(&storage),
        update,
        Arc::clone(&session),
    );

    Fixture {
        _home: home,
        _media: media,
        media_root,
        storage,
        session,
        content,
    }
}

fn write_file(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"not really media, but enough to import").unwrap();
    path
}

async fn browse_children(storage: &Arc<dyn Storage>, id: i64) -> Vec<CdsObject> {
    let param = BrowseParam::new(
        id,
        BROWSE_DIRECT_CHILDREN | BROWSE_ITEMS | BROWSE_CONTAINERS,
    );
    storage.browse(&param).await.unwrap().0
}

#[tokio::test]
async fn test_add_file_creates_physical_item_under_pc_directory() {
    let fx = fixture().await;
    let path = write_file(&fx.media_root, "a.mp3");

    let id = fx
        .content
        .add_file(&path, false, false, false, false, false)
        .await
        .unwrap();
    assert!(id > 1);

    let item = fx.storage.load_object(id).await.unwrap();
    assert!(item.is_item());
    assert!(!item.virt);
    assert_eq!(item.title, "a.mp3");
    assert_eq!(item.mime_type(), Some("audio/mpeg"));
    assert_eq!(item.class, "object.item.audioItem.musicTrack");

    // The physical directory chain resolves back to the item's parent.
    let dir_obj = fx
        .storage
        .find_object_by_path(&fx.media_root.to_string_lossy())
        .await
        .unwrap()
        .expect("media directory should be in the catalog");
    assert_eq!(dir_obj.id, item.parent_id);

    // Walking up the parents terminates at the root.
    let mut current = item.parent_id;
    let mut hops = 0;
    while current != CDS_ID_ROOT {
        current = fx.storage.load_object(current).await.unwrap().parent_id;
        hops += 1;
        assert!(hops < 64, "parent chain must terminate at the root");
    }

    // Re-adding the same path short-circuits to the existing object.
    let again = fx
        .content
        .add_file(&path, false, false, false, false, false)
        .await
        .unwrap();
    assert_eq!(again, id);
}

#[tokio::test]
async fn test_browse_root_after_import() {
    let fx = fixture().await;
    let path = write_file(&fx.media_root, "track.mp3");
    fx.content
        .add_file(&path, false, false, false, false, false)
        .await
        .unwrap();

    let children = browse_children(&fx.storage, CDS_ID_ROOT).await;
    let titles: Vec<&str> = children.iter().map(|o| o.title.as_str()).collect();
    assert!(titles.contains(&"PC Directory"));
    assert!(titles.contains(&"Audio"));

    // Child counts hold the actual number of children.
    for child in &children {
        let count = child.as_container().unwrap().child_count;
        let actual = fx.storage.get_child_count(child.id).await.unwrap();
        assert_eq!(count, actual);
    }
}

#[tokio::test]
async fn test_layout_builds_virtual_tree_and_refs() {
    let fx = fixture().await;
    let path = write_file(&fx.media_root, "T.mp3");
    let physical_id = fx
        .content
        .add_file(&path, false, false, false, false, false)
        .await
        .unwrap();

    // No tags are readable from the fake file, so the fallback layout
    // files everything under "Unknown".
    let album = fx
        .storage
        .find_object_by_path("/Audio/Albums/Unknown")
        .await
        .unwrap()
        .expect("album container should exist");
    assert_eq!(album.class, "object.container.album.musicAlbum");

    let reflections = browse_children(&fx.storage, album.id).await;
    assert_eq!(reflections.len(), 1);
    assert_eq!(reflections[0].ref_id, Some(physical_id));
    assert!(reflections[0].virt);

    // Every proper prefix of the chain resolves to a container.
    for prefix in ["/Audio", "/Audio/Albums", "/Audio/Albums/Unknown"] {
        let obj = fx
            .storage
            .find_object_by_path(prefix)
            .await
            .unwrap()
            .unwrap_or_else(|| panic!("prefix {} should resolve", prefix));
        assert!(obj.is_container());
    }
}

#[tokio::test]
async fn test_remove_with_refs_drops_virtual_reflections() {
    let fx = fixture().await;
    let path = write_file(&fx.media_root, "gone.mp3");
    let physical_id = fx
        .content
        .add_file(&path, false, false, false, false, false)
        .await
        .unwrap();

    let album = fx
        .storage
        .find_object_by_path("/Audio/Albums/Unknown")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(browse_children(&fx.storage, album.id).await.len(), 1);

    fx.content
        .remove_object(physical_id, false, true)
        .await
        .unwrap();

    // Physical row gone, and no row references it as parent or ref.
    assert!(fx.storage.load_object(physical_id).await.is_err());
    assert!(browse_children(&fx.storage, album.id).await.is_empty());
    let in_genre = fx
        .storage
        .find_object_by_path("/Audio/Genres/Unknown")
        .await
        .unwrap()
        .unwrap();
    assert!(browse_children(&fx.storage, in_genre.id).await.is_empty());
}

#[tokio::test]
async fn test_container_chain_with_escaped_separator() {
    let fx = fixture().await;
    let (leaf, changed) = fx
        .storage
        .add_container_chain(r"/X/Y\/Z/W", None, None)
        .await
        .unwrap();
    assert!(leaf > 1);
    assert_eq!(changed, Some(CDS_ID_ROOT));

    let x = fx.storage.find_object_by_path("/X").await.unwrap().unwrap();
    let y = fx
        .storage
        .find_object_by_path(r"/X/Y\/Z")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(y.title, "Y/Z");
    assert_eq!(y.parent_id, x.id);
    let w = fx
        .storage
        .find_object_by_path(r"/X/Y\/Z/W")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(w.id, leaf);

    // Walking the same chain again creates nothing.
    let (leaf_again, changed_again) = fx
        .storage
        .add_container_chain(r"/X/Y\/Z/W", None, None)
        .await
        .unwrap();
    assert_eq!(leaf_again, leaf);
    assert_eq!(changed_again, None);
}

#[tokio::test]
async fn test_recursive_import_and_rescan_known_set() {
    let fx = fixture().await;
    let sub = fx.media_root.join("album");
    std::fs::create_dir(&sub).unwrap();
    write_file(&sub, "one.mp3");
    write_file(&sub, "two.mp3");
    write_file(&fx.media_root, "top.mp3");

    fx.content
        .add_file(&fx.media_root, true, false, false, false, false)
        .await
        .unwrap();

    let dir_obj = fx
        .storage
        .find_object_by_path(&sub.to_string_lossy())
        .await
        .unwrap()
        .expect("subdirectory should be imported");
    let children = browse_children(&fx.storage, dir_obj.id).await;
    assert_eq!(children.len(), 2);

    // Items vanished from disk are detected through the known-set diff.
    let known = fx.storage.get_objects(dir_obj.id, true).await.unwrap();
    assert_eq!(known.len(), 2);
}

#[tokio::test]
async fn test_session_observes_ui_updates_during_import() {
    let fx = fixture().await;
    let session_id = fx.session.create_session(DEFAULT_SESSION_TIMEOUT);
    fx.session.set_logged_in(&session_id).unwrap();

    let path = write_file(&fx.media_root, "s.mp3");
    fx.content
        .add_file(&path, false, false, false, false, false)
        .await
        .unwrap();

    let ids = fx.session.get_ui_update_ids(&session_id).unwrap();
    assert!(!ids.is_empty(), "import should surface UI updates");
    assert_eq!(fx.session.get_ui_update_ids(&session_id).unwrap(), "");
}

#[tokio::test]
async fn test_expired_session_is_rejected() {
    let fx = fixture().await;
    let session_id = fx.session.create_session(Duration::from_millis(10));
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(matches!(
        fx.session.get_ui_update_ids(&session_id),
        Err(opencds::error::Error::SessionExpired)
    ));
}

#[cfg(unix)]
#[tokio::test]
async fn test_convert_item_to_active_item() {
    use std::os::unix::fs::PermissionsExt;

    let fx = fixture().await;
    let path = write_file(&fx.media_root, "toggle.mp3");
    let id = fx
        .content
        .add_file(&path, false, false, false, false, false)
        .await
        .unwrap();
    let item = fx.storage.load_object(id).await.unwrap();

    // An executable stand-in for the action script.
    let script = fx.media_root.join("toggle.sh");
    std::fs::write(&script, "#!/bin/sh\ncat\n").unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut converted = fx
        .content
        .convert_object(&item, OBJECT_TYPE_ITEM | OBJECT_TYPE_ACTIVE_ITEM)
        .unwrap();
    {
        let data = converted.as_item_mut().unwrap();
        if let opencds::cds::object::ItemKind::Active { action, state } = &mut data.kind {
            *action = script.to_string_lossy().into_owned();
            *state = "off".into();
        } else {
            panic!("conversion should yield an active item");
        }
    }

    let parent_before = fx
        .storage
        .load_object(item.parent_id)
        .await
        .unwrap()
        .as_container()
        .unwrap()
        .update_id;

    fx.content.update_object(&converted).await.unwrap();

    let reloaded = fx.storage.load_object(id).await.unwrap();
    assert!(reloaded.is_active_item());
    let parent_after = fx
        .storage
        .load_object(item.parent_id)
        .await
        .unwrap()
        .as_container()
        .unwrap()
        .update_id;
    assert_eq!(parent_after, parent_before + 1);
}

#[tokio::test]
async fn test_playlist_import_enqueues_entries() {
    let fx = fixture().await;
    write_file(&fx.media_root, "one.mp3");
    write_file(&fx.media_root, "two.mp3");
    let playlist = fx.media_root.join("mix.m3u");
    std::fs::write(&playlist, "#EXTM3U\none.mp3\ntwo.mp3\nhttp://example.com/stream.mp3\n")
        .unwrap();

    let id = fx
        .content
        .add_file(&playlist, false, false, false, false, false)
        .await
        .unwrap();
    let item = fx.storage.load_object(id).await.unwrap();
    assert_eq!(item.mime_type(), Some("audio/x-mpegurl"));

    // The playlist's local entries are queued as add tasks; the remote
    // URL is not.
    let pending = fx.content.pending_tasks();
    let adds: Vec<&str> = pending
        .iter()
        .filter(|(_, task_type, _)| *task_type == opencds::content::task::TaskType::AddFile)
        .map(|(_, _, description)| description.as_str())
        .collect();
    assert_eq!(adds.len(), 2);
    assert!(adds.iter().any(|d| d.ends_with("one.mp3")));
    assert!(adds.iter().any(|d| d.ends_with("two.mp3")));
}

#[tokio::test]
async fn test_unmapped_extension_is_sniffed() {
    let fx = fixture().await;
    // An MPEG audio stream with an ID3 header and no usable extension.
    let path = fx.media_root.join("mystery.bin");
    std::fs::write(&path, b"ID3\x04\x00\x00\x00\x00\x00\x00 fake tag payload").unwrap();

    let id = fx
        .content
        .add_file(&path, false, false, false, false, false)
        .await
        .unwrap();
    assert!(id > 1);
    let item = fx.storage.load_object(id).await.unwrap();
    assert_eq!(item.mime_type(), Some("audio/mpeg"));
    assert_eq!(item.class, "object.item.audioItem.musicTrack");
}

#[tokio::test]
async fn test_find_object_by_service_id() {
    let fx = fixture().await;
    let mut item = CdsObject::new_external_url_item();
    item.parent_id = CDS_ID_FS_ROOT;
    item.title = "Feed".into();
    item.location = "http://example.com/feed.mp3".into();
    item.as_item_mut().unwrap().mime_type = "audio/mpeg".into();
    item.service_id = Some("YT:abc123".into());
    fx.storage.add_object(&mut item).await.unwrap();

    let found = fx
        .storage
        .find_object_by_service_id("YT:abc123")
        .await
        .unwrap()
        .expect("service id should address the row");
    assert_eq!(found.id, item.id);
    assert!(fx
        .storage
        .find_object_by_service_id("YT:other")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_external_url_item_round_trip() {
    let fx = fixture().await;
    let mut item = CdsObject::new_external_url_item();
    item.parent_id = CDS_ID_FS_ROOT;
    item.title = "Radio".into();
    item.location = "http://example.com/radio.mp3".into();
    item.as_item_mut().unwrap().mime_type = "audio/mpeg".into();

    fx.storage.add_object(&mut item).await.unwrap();
    let loaded = fx.storage.load_object(item.id).await.unwrap();
    assert!(loaded.is_external_url());
    assert_eq!(loaded.location, "http://example.com/radio.mp3");
}

#[tokio::test]
async fn test_schema_version_gate() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("catalog.db");

    let storage = SqliteStorage::new(&db_path).await.unwrap();
    storage.init().await.unwrap();
    assert_eq!(
        storage.get_internal_setting("db_version").await.unwrap(),
        Some("5".to_string())
    );
    // Re-init over an existing database is a no-op.
    storage.init().await.unwrap();

    storage.store_internal_setting("db_version", "99").await.unwrap();
    storage.shutdown().await;

    let newer = SqliteStorage::new(&db_path).await.unwrap();
    assert!(matches!(
        newer.init().await,
        Err(opencds::error::Error::UnsupportedSchema { found: 99, .. })
    ));
}

#[tokio::test]
async fn test_autoscan_overlap_rejected() {
    use opencds::content::autoscan::{AutoscanDirectory, ScanLevel, ScanMode};

    let fx = fixture().await;
    let mut first = AutoscanDirectory::new(
        fx.media_root.clone(),
        ScanMode::Timed,
        ScanLevel::Full,
    );
    fx.storage.add_autoscan_directory(&mut first).await.unwrap();

    let nested = AutoscanDirectory::new(
        fx.media_root.join("sub"),
        ScanMode::Timed,
        ScanLevel::Full,
    );
    assert!(fx
        .storage
        .check_overlapping_autoscans(&nested)
        .await
        .is_err());

    let elsewhere = AutoscanDirectory::new(
        PathBuf::from("/somewhere/else"),
        ScanMode::Timed,
        ScanLevel::Full,
    );
    assert!(fx
        .storage
        .check_overlapping_autoscans(&elsewhere)
        .await
        .is_ok());
}

#[tokio::test]
async fn test_total_files_accounting() {
    let fx = fixture().await;
    write_file(&fx.media_root, "a.mp3");
    write_file(&fx.media_root, "b.mp3");
    fx.content
        .add_file(&fx.media_root, true, false, false, false, false)
        .await
        .unwrap();

    // Virtual reflections do not count as files.
    assert_eq!(fx.storage.get_total_files().await.unwrap(), 2);
    assert_eq!(fx.content.total_files(), 2);

    let mimes = fx.storage.get_mime_types().await.unwrap();
    assert_eq!(mimes, vec!["audio/mpeg".to_string()]);
}
