//! Repository, ledger and subtree behaviour against a real SQLite database.

use blockbase_store::{HistoryQuery, SqlStore, StoreConfig, StoreError};
use blockbase_types::{Block, BlockPatch, BlockPatchBatch, FieldValue, SubtreeDepth};

fn store() -> SqlStore {
    SqlStore::in_memory().unwrap()
}

fn card(id: &str, board: &str) -> Block {
    Block::new(id, board, id)
        .with_type("card")
        .with_title("old")
        .with_field("test", "test value")
        .with_field("test2", "test value 2")
}

fn ids(blocks: &[Block]) -> Vec<&str> {
    let mut ids: Vec<&str> = blocks.iter().map(|b| b.id.as_str()).collect();
    ids.sort();
    ids
}

#[test]
fn test_insert_round_trip() {
    let store = store();
    let before = blockbase_types::now_millis();
    let stored = store.insert_block(&card("c1", "board1"), "user1").unwrap();

    let fetched = store.get_block("c1").unwrap().unwrap();
    assert_eq!(fetched, stored);
    assert_eq!(fetched.fields["test"], FieldValue::from("test value"));
    assert_eq!(fetched.created_by, "user1");
    assert_eq!(fetched.modified_by, "user1");
    assert!(fetched.create_at >= before);
    assert_eq!(fetched.create_at, fetched.update_at);
    assert_eq!(fetched.delete_at, 0);
    assert_eq!(store.get_blocks_for_board("board1").unwrap().len(), 1);
}

#[test]
fn test_provenance_cannot_be_forged() {
    let store = store();
    let mut forged = card("c1", "board1");
    forged.created_by = "mallory".into();
    forged.modified_by = "mallory".into();
    forged.create_at = 1;
    forged.update_at = 1;
    let first = store.insert_block(&forged, "user1").unwrap();
    assert_eq!(first.created_by, "user1");
    assert!(first.create_at > 1);

    let mut again = forged.clone().with_title("new");
    again.created_by = "mallory2".into();
    again.create_at = 5;
    let second = store.insert_block(&again, "user2").unwrap();
    assert_eq!(second.created_by, "user1");
    assert_eq!(second.create_at, first.create_at);
    assert_eq!(second.modified_by, "user2");
    assert!(second.update_at > first.update_at);
    assert_eq!(store.get_block("c1").unwrap().unwrap().title, "new");
}

#[test]
fn test_board_ownership_is_immutable() {
    let store = store();
    store.insert_block(&card("c1", "board1"), "user1").unwrap();

    let err = store
        .insert_block(&card("c1", "board2").with_title("moved"), "user1")
        .unwrap_err();
    assert!(err.is_conflict(), "unexpected error: {err}");

    let kept = store.get_block("c1").unwrap().unwrap();
    assert_eq!(kept.board_id, "board1");
    assert_eq!(kept.title, "old");
    assert_eq!(store.get_block_history("c1", &HistoryQuery::all()).unwrap().len(), 1);
}

#[test]
fn test_patch_merge() {
    let store = store();
    store.insert_block(&card("c1", "board1"), "user1").unwrap();

    let patch = BlockPatch::title("new title")
        .update_field("test", "replaced")
        .update_field("added", 3i64)
        .delete_field("test2")
        .delete_field("never-there");
    store.patch_block("c1", &patch, "user2").unwrap();

    let block = store.get_block("c1").unwrap().unwrap();
    assert_eq!(block.title, "new title");
    assert_eq!(block.fields["test"], FieldValue::from("replaced"));
    assert_eq!(block.fields["added"], FieldValue::Int(3));
    assert!(!block.fields.contains_key("test2"));
    assert_eq!(block.created_by, "user1");
    assert_eq!(block.modified_by, "user2");
    assert_eq!(block.block_type, "card");
}

#[test]
fn test_patch_errors() {
    let store = store();
    let err = store
        .patch_block("missing", &BlockPatch::title("x"), "user1")
        .unwrap_err();
    assert!(err.is_not_found());

    store.insert_block(&card("c1", "board1"), "user1").unwrap();
    let bad = BlockPatch {
        root_id: Some(String::new()),
        ..Default::default()
    };
    assert!(store.patch_block("c1", &bad, "user1").unwrap_err().is_validation());
    let nan = BlockPatch::default().update_field("ratio", f64::NAN);
    assert!(store.patch_block("c1", &nan, "user1").unwrap_err().is_validation());
    assert_eq!(store.get_block("c1").unwrap().unwrap().title, "old");
}

#[test]
fn test_patch_batch_is_all_or_nothing() {
    let store = store();
    store.insert_block(&card("c1", "board1"), "user1").unwrap();
    store.insert_block(&card("c2", "board1"), "user1").unwrap();

    let batch = BlockPatchBatch {
        block_ids: vec!["c1".into(), "missing".into()],
        block_patches: vec![BlockPatch::title("a"), BlockPatch::title("b")],
    };
    assert!(store.patch_blocks(&batch, "user2").unwrap_err().is_not_found());
    assert_eq!(store.get_block("c1").unwrap().unwrap().title, "old");
    assert_eq!(store.get_block_history("c1", &HistoryQuery::all()).unwrap().len(), 1);

    let mismatched = BlockPatchBatch {
        block_ids: vec!["c1".into()],
        block_patches: vec![],
    };
    assert!(store.patch_blocks(&mismatched, "user2").unwrap_err().is_validation());

    let batch = BlockPatchBatch {
        block_ids: vec!["c1".into(), "c2".into()],
        block_patches: vec![BlockPatch::title("a"), BlockPatch::title("b")],
    };
    store.patch_blocks(&batch, "user2").unwrap();
    assert_eq!(store.get_block("c1").unwrap().unwrap().title, "a");
    assert_eq!(store.get_block("c2").unwrap().unwrap().title, "b");
}

#[test]
fn test_insert_batch_is_all_or_nothing() {
    let store = store();
    store.insert_block(&card("taken", "board2"), "user1").unwrap();

    let invalid = vec![card("c1", "board1"), Block::new("c2", "board1", "")];
    assert!(store.insert_blocks(&invalid, "user1").unwrap_err().is_validation());

    let conflicting = vec![card("c1", "board1"), card("taken", "board1")];
    assert!(store.insert_blocks(&conflicting, "user1").unwrap_err().is_conflict());
    assert_eq!(store.get_block("c1").unwrap(), None);
    assert!(store.get_block_history("c1", &HistoryQuery::all()).unwrap().is_empty());

    let stored = store
        .insert_blocks(&[card("c1", "board1"), card("c2", "board1")], "user1")
        .unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(store.get_blocks_for_board("board1").unwrap().len(), 2);
}

#[test]
fn test_delete_is_idempotent() {
    let store = store();
    store.insert_block(&card("c1", "board1"), "user1").unwrap();

    store.delete_block("c1", "user2").unwrap();
    assert_eq!(store.get_block("c1").unwrap(), None);
    assert!(store.get_blocks_for_board("board1").unwrap().is_empty());

    let history = store.get_block_history("c1", &HistoryQuery::all()).unwrap();
    assert_eq!(history.len(), 2);
    let tombstone = &history[1];
    assert!(tombstone.delete_at > 0);
    assert_eq!(tombstone.update_at, tombstone.delete_at);
    assert_eq!(tombstone.modified_by, "user2");
    assert_eq!(tombstone.title, "old");

    store.delete_block("c1", "user3").unwrap();
    let history = store.get_block_history("c1", &HistoryQuery::all()).unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].modified_by, "user3");

    store.delete_block("never-seen", "user1").unwrap();
    assert!(store
        .get_block_history("never-seen", &HistoryQuery::all())
        .unwrap()
        .is_empty());
}

#[test]
fn test_undelete_restores_last_snapshot() {
    let store = store();
    let original = store.insert_block(&card("c1", "board1"), "user1").unwrap();
    store
        .patch_block("c1", &BlockPatch::title("patched"), "user1")
        .unwrap();
    store.delete_block("c1", "user2").unwrap();

    store.undelete_block("c1", "user3").unwrap();
    let restored = store.get_block("c1").unwrap().unwrap();
    assert_eq!(restored.title, "patched");
    assert_eq!(restored.delete_at, 0);
    assert_eq!(restored.modified_by, "user3");
    assert_eq!(restored.created_by, "user1");
    assert_eq!(restored.create_at, original.create_at);

    let newest = store.get_block_history_newest("c1").unwrap().unwrap();
    assert_eq!(newest, restored);
    assert_eq!(store.get_block_history("c1", &HistoryQuery::all()).unwrap().len(), 4);

    store.undelete_block("c1", "user3").unwrap();
    store.undelete_block("never-seen", "user3").unwrap();
    assert_eq!(store.get_block_history("c1", &HistoryQuery::all()).unwrap().len(), 4);
    assert_eq!(store.get_block("never-seen").unwrap(), None);
}

fn insert_chain(store: &SqlStore) {
    for (id, parent) in [
        ("parent", ""),
        ("child1", "parent"),
        ("child2", "parent"),
        ("grandchild1", "child1"),
        ("grandchild2", "child2"),
        ("greatgrandchild", "grandchild1"),
    ] {
        let block = Block::new(id, "board1", "parent")
            .with_parent(parent)
            .with_type("text");
        store.insert_block(&block, "user1").unwrap();
    }
    store
        .insert_block(&Block::new("stranger", "board2", "stranger").with_parent("parent"), "user1")
        .unwrap();
}

#[test]
fn test_subtree_from_root() {
    let store = store();
    insert_chain(&store);

    let children = store.get_subtree("board1", "parent", SubtreeDepth::Children).unwrap();
    assert_eq!(ids(&children), vec!["child1", "child2", "parent"]);

    let grandchildren = store
        .get_subtree("board1", "parent", SubtreeDepth::Grandchildren)
        .unwrap();
    assert_eq!(
        ids(&grandchildren),
        vec!["child1", "child2", "grandchild1", "grandchild2", "parent"]
    );
}

#[test]
fn test_subtree_from_child() {
    let store = store();
    insert_chain(&store);

    let subtree = store
        .get_subtree("board1", "child1", SubtreeDepth::Grandchildren)
        .unwrap();
    assert_eq!(ids(&subtree), vec!["child1", "grandchild1", "greatgrandchild"]);

    let subtree = store.get_subtree("board1", "child2", SubtreeDepth::Children).unwrap();
    assert_eq!(ids(&subtree), vec!["child2", "grandchild2"]);
}

#[test]
fn test_subtree_missing_anchor() {
    let store = store();
    insert_chain(&store);
    assert!(store
        .get_subtree("board1", "nope", SubtreeDepth::Grandchildren)
        .unwrap()
        .is_empty());
    assert!(store
        .get_subtree("board2", "parent", SubtreeDepth::Children)
        .unwrap()
        .is_empty());
}

#[test]
fn test_history_order_and_windows() {
    let store = store();
    store.insert_block(&card("c1", "board1"), "user1").unwrap();
    for title in ["t1", "t2", "t3"] {
        store.patch_block("c1", &BlockPatch::title(title), "user1").unwrap();
    }

    let all = store.get_block_history("c1", &HistoryQuery::all()).unwrap();
    assert_eq!(all.len(), 4);
    assert!(all.windows(2).all(|w| w[0].update_at < w[1].update_at));
    assert_eq!(all[3].title, "t3");

    let newest_two = store
        .get_block_history("c1", &HistoryQuery::all().newest_first().with_limit(2))
        .unwrap();
    assert_eq!(
        newest_two.iter().map(|b| b.title.as_str()).collect::<Vec<_>>(),
        vec!["t3", "t2"]
    );

    let window = store
        .get_block_history(
            "c1",
            &HistoryQuery::all()
                .after(all[0].update_at)
                .before(all[3].update_at),
        )
        .unwrap();
    assert_eq!(
        window.iter().map(|b| b.title.as_str()).collect::<Vec<_>>(),
        vec!["t1", "t2"]
    );
}

#[test]
fn test_history_descendants() {
    let store = store();
    insert_chain(&store);
    store.delete_block("greatgrandchild", "user2").unwrap();

    let history = store
        .get_block_history_descendants("parent", &HistoryQuery::all())
        .unwrap();
    assert_eq!(history.len(), 7);
    assert!(history.iter().all(|b| b.root_id == "parent"));
    assert!(history.last().unwrap().is_deleted());

    let limited = store
        .get_block_history_descendants("parent", &HistoryQuery::all().newest_first().with_limit(1))
        .unwrap();
    assert_eq!(limited[0].id, "greatgrandchild");
}

#[test]
fn test_file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig::sqlite(dir.path().join("blocks.db")).with_table_prefix("fb_");
    {
        let store = SqlStore::open(config.clone()).unwrap();
        store.insert_block(&card("c1", "board1"), "user1").unwrap();
        assert_eq!(store.tables().blocks(), "fb_blocks");
    }
    let store = SqlStore::open(config).unwrap();
    assert_eq!(store.get_block("c1").unwrap().unwrap().created_by, "user1");
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = StoreConfig::in_memory().with_table_prefix("bad-prefix");
    assert!(matches!(SqlStore::open(config), Err(StoreError::Config(_))));
}
