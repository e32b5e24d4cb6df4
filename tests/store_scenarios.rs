//! Change notification scenarios against the in-memory content source.

use std::sync::Arc;
use std::time::Duration;

use pubcache::application::repos::ContentSource;
use pubcache::cache::{CacheConfig, LeadershipToken, PublishedContentCache, XmlTreeStore};
use pubcache::domain::node::ROOT_ID;
use pubcache::domain::types::TreeKind;
use pubcache::infra::memory::MemorySource;
use pubcache_api_types::{ChangePayload, ContentTypeChangePayload};

fn seeded_source() -> Arc<MemorySource> {
    let source = Arc::new(MemorySource::new());
    source.add_content_type(1, "home");
    source.add_content_type(2, "page");
    source.upsert(10, ROOT_ID, 0, "home", "Home");
    source.upsert(11, 10, 0, "page", "About");
    source.upsert(12, 10, 1, "page", "Blog");
    source.upsert(13, 12, 0, "page", "First post");
    source
}

async fn open(source: &Arc<MemorySource>) -> Arc<XmlTreeStore> {
    let source: Arc<dyn ContentSource> = Arc::clone(source) as Arc<dyn ContentSource>;
    XmlTreeStore::open(
        TreeKind::Content,
        CacheConfig::default(),
        source,
        LeadershipToken::denied(),
    )
    .await
    .expect("store opens")
}

fn child_ids(store: &XmlTreeStore, id: i32) -> Vec<i32> {
    store.snapshot().children(id).to_vec()
}

#[tokio::test]
async fn empty_source_yields_empty_tree() {
    let source = Arc::new(MemorySource::new());
    let store = open(&source).await;

    let snapshot = store.snapshot();
    assert!(snapshot.is_empty());
    assert!(snapshot.root_children().is_empty());
    assert!(!PublishedContentCache::new(store).has_content(false));
}

#[tokio::test]
async fn cold_start_composes_the_published_tree() {
    let source = seeded_source();
    let store = open(&source).await;

    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), 4);
    assert_eq!(snapshot.root_children(), &[10]);
    assert_eq!(snapshot.children(10), &[11, 12]);
    assert_eq!(snapshot.get(13).expect("post").path, "-1,10,12,13");
    assert_eq!(snapshot.get(13).expect("post").level, 3);
    snapshot.check_invariants().expect("consistent tree");
}

#[tokio::test]
async fn refresh_inserts_a_new_top_level_node() {
    let source = Arc::new(MemorySource::new());
    source.add_content_type(1, "home");
    let store = open(&source).await;

    source.upsert(10, ROOT_ID, 0, "home", "Home");
    let outcome = store
        .notify(&[ChangePayload::refresh_node(10)])
        .await
        .expect("notify");

    assert!(outcome.published_changed);
    assert!(outcome.draft_changed);
    let snapshot = store.snapshot();
    let home = snapshot.get(10).expect("inserted");
    assert_eq!(home.path, "-1,10");
    assert_eq!(home.level, 1);
    assert_eq!(home.parent_id, ROOT_ID);
    assert_eq!(snapshot.root_children(), &[10]);
}

#[tokio::test]
async fn refresh_of_changed_content_patches_in_place() {
    let source = seeded_source();
    let store = open(&source).await;

    source.rename(11, "About us");
    store
        .notify(&[ChangePayload::refresh_node(11)])
        .await
        .expect("notify");

    let snapshot = store.snapshot();
    let about = snapshot.get(11).expect("about");
    assert_eq!(about.name, "About us");
    assert_eq!(about.path, "-1,10,11");
    assert_eq!(snapshot.children(10), &[11, 12]);
}

#[tokio::test]
async fn moving_a_node_carries_its_subtree() {
    let source = seeded_source();
    let store = open(&source).await;

    source.move_node(12, 11, 0);
    store
        .notify(&[ChangePayload::refresh_node(12)])
        .await
        .expect("notify");

    let snapshot = store.snapshot();
    assert_eq!(snapshot.children(10), &[11]);
    assert_eq!(snapshot.children(11), &[12]);
    assert_eq!(snapshot.get(12).expect("blog").path, "-1,10,11,12");
    let post = snapshot.get(13).expect("post");
    assert_eq!(post.path, "-1,10,11,12,13");
    assert_eq!(post.level, 4);
    snapshot.check_invariants().expect("consistent tree");
}

#[tokio::test]
async fn removing_an_absent_node_changes_nothing() {
    let source = seeded_source();
    let store = open(&source).await;
    let before = store.snapshot();

    let outcome = store
        .notify(&[ChangePayload::remove(99)])
        .await
        .expect("notify");

    assert!(!outcome.published_changed);
    assert!(Arc::ptr_eq(&before, &store.snapshot()));
}

#[tokio::test]
async fn removing_a_node_drops_its_descendants() {
    let source = seeded_source();
    let store = open(&source).await;

    source.remove(12);
    let outcome = store
        .notify(&[ChangePayload::remove(12)])
        .await
        .expect("notify");

    assert!(outcome.published_changed);
    let snapshot = store.snapshot();
    assert!(!snapshot.contains(12));
    assert!(!snapshot.contains(13));
    assert_eq!(snapshot.children(10), &[11]);
}

#[tokio::test]
async fn unpublished_node_is_removed_on_refresh() {
    let source = seeded_source();
    let store = open(&source).await;

    source.unpublish(11);
    store
        .notify(&[ChangePayload::refresh_node(11)])
        .await
        .expect("notify");

    assert!(!store.snapshot().contains(11));
}

#[tokio::test]
async fn refreshing_unchanged_content_keeps_the_published_snapshot() {
    let source = seeded_source();
    let store = open(&source).await;
    let before = store.snapshot();

    let outcome = store
        .notify(&[ChangePayload::refresh_node(11), ChangePayload::refresh_node(13)])
        .await
        .expect("notify");

    assert!(!outcome.published_changed);
    assert!(Arc::ptr_eq(&before, &store.snapshot()));
    assert_eq!(store.lock().commit_count(), 1);
}

#[tokio::test]
async fn siblings_stay_ordered_by_sort_order_then_id() {
    let source = seeded_source();
    let store = open(&source).await;

    source.upsert(14, 10, 1, "page", "Contact");
    source.upsert(15, 10, 0, "page", "Team");
    store
        .notify(&[ChangePayload::refresh_node(14), ChangePayload::refresh_node(15)])
        .await
        .expect("notify");
    assert_eq!(child_ids(&store, 10), vec![11, 15, 12, 14]);

    source.move_node(11, 10, 5);
    store
        .notify(&[ChangePayload::refresh_node(11)])
        .await
        .expect("notify");
    assert_eq!(child_ids(&store, 10), vec![15, 12, 14, 11]);
}

#[tokio::test]
async fn batch_commits_once() {
    let source = seeded_source();
    let store = open(&source).await;
    let commits = store.lock().commit_count();

    source.rename(11, "About us");
    source.rename(13, "Hello world");
    source.upsert(14, 10, 2, "page", "Contact");
    store
        .notify(&[
            ChangePayload::refresh_node(11),
            ChangePayload::refresh_node(13),
            ChangePayload::refresh_node(14),
        ])
        .await
        .expect("notify");

    assert_eq!(store.lock().commit_count(), commits + 1);
    assert_eq!(store.snapshot().len(), 5);
}

#[tokio::test]
async fn refresh_with_missing_parent_is_skipped() {
    let source = seeded_source();
    let store = open(&source).await;

    // Parent 20 exists in the source but was never published to the tree.
    source.upsert(20, ROOT_ID, 1, "page", "Hidden");
    source.upsert(21, 20, 0, "page", "Child");
    let outcome = store
        .notify(&[ChangePayload::refresh_node(21)])
        .await
        .expect("notify");

    assert!(!outcome.published_changed);
    assert!(!store.snapshot().contains(21));
}

#[tokio::test]
async fn refresh_below_a_node_removed_earlier_in_the_batch_is_skipped_alone() {
    let source = seeded_source();
    let store = open(&source).await;

    source.upsert(15, 11, 0, "page", "Team");
    source.rename(13, "Hello");
    let outcome = store
        .notify(&[
            ChangePayload::remove(11),
            ChangePayload::refresh_node(15),
            ChangePayload::refresh_node(13),
        ])
        .await
        .expect("the rest of the batch applies");

    assert!(outcome.published_changed);
    let snapshot = store.snapshot();
    assert!(!snapshot.contains(11));
    assert!(!snapshot.contains(15));
    assert_eq!(snapshot.get(13).expect("post").name, "Hello");
    assert_eq!(store.lock().commit_count(), 2);
    snapshot.check_invariants().expect("consistent tree");
}

#[tokio::test]
async fn branch_refresh_relocates_descendants_moved_without_notice() {
    let source = seeded_source();
    source.upsert(14, 11, 0, "page", "Team");
    let store = open(&source).await;
    assert_eq!(child_ids(&store, 11), vec![14]);

    // 14 moves below the blog; only the blog's branch is announced.
    source.move_node(14, 12, 1);
    store
        .notify(&[ChangePayload::refresh_branch(12)])
        .await
        .expect("notify");

    let snapshot = store.snapshot();
    assert!(snapshot.children(11).is_empty());
    assert_eq!(snapshot.children(12), &[13, 14]);
    assert_eq!(snapshot.get(14).expect("moved").path, "-1,10,12,14");
    assert_eq!(snapshot.len(), 5);
    snapshot.check_invariants().expect("consistent tree");
}

#[tokio::test]
async fn refresh_all_reloads_the_tree() {
    let source = seeded_source();
    let store = open(&source).await;
    let loads = source.tree_loads();

    source.rename(10, "Start");
    source.remove(12);
    let outcome = store
        .notify(&[ChangePayload::refresh_node(11), ChangePayload::refresh_all()])
        .await
        .expect("notify");

    assert!(outcome.published_changed);
    assert_eq!(source.tree_loads(), loads + 1);
    let snapshot = store.snapshot();
    assert_eq!(snapshot.get(10).expect("home").name, "Start");
    assert!(!snapshot.contains(12));
    assert_eq!(snapshot.len(), 2);
}

#[tokio::test]
async fn failing_source_leaves_the_snapshot_intact() {
    let source = seeded_source();
    let store = open(&source).await;
    let before = store.snapshot();

    source.rename(11, "About us");
    source.set_failing(true);
    let result = store.notify(&[ChangePayload::refresh_node(11)]).await;

    assert!(result.is_err());
    assert!(Arc::ptr_eq(&before, &store.snapshot()));
    assert_eq!(store.snapshot().get(11).expect("about").name, "About");

    source.set_failing(false);
    store
        .notify(&[ChangePayload::refresh_node(11)])
        .await
        .expect("notify after recovery");
    assert_eq!(store.snapshot().get(11).expect("about").name, "About us");
}

#[tokio::test]
async fn preview_overlays_draft_content_without_publishing() {
    let source = seeded_source();
    let store = open(&source).await;
    source.set_draft_name(13, "Draft title");

    let cache = PublishedContentCache::with_preview(Arc::clone(&store), 13, false)
        .await
        .expect("preview");

    let draft = cache.get_by_id(true, 13).expect("preview node");
    assert_eq!(draft.node.name, "Draft title");
    assert!(draft.node.is_draft);

    let published = cache.get_by_id(false, 13).expect("published node");
    assert_eq!(published.node.name, "First post");
    assert!(!published.node.is_draft);
    assert_eq!(store.snapshot().get(13).expect("post").name, "First post");
}

#[tokio::test]
async fn preview_shows_a_never_published_node() {
    let source = seeded_source();
    let store = open(&source).await;
    source.upsert(14, 12, 1, "page", "Second post");
    source.unpublish(14);

    let cache = PublishedContentCache::with_preview(Arc::clone(&store), 14, false)
        .await
        .expect("preview");

    assert!(cache.get_by_id(false, 14).is_none());
    let draft = cache.get_by_id(true, 14).expect("preview node");
    assert!(draft.node.is_draft);
    let siblings: Vec<i32> = cache.children(true, 12).iter().map(|c| c.id()).collect();
    assert_eq!(siblings, vec![13, 14]);
}

#[tokio::test]
async fn reading_api_walks_the_tree() {
    let source = seeded_source();
    let store = open(&source).await;
    let cache = PublishedContentCache::new(Arc::clone(&store));

    let roots: Vec<i32> = cache.get_at_root(false).iter().map(|c| c.id()).collect();
    assert_eq!(roots, vec![10]);
    let ancestors: Vec<i32> = cache.ancestors(false, 13).iter().map(|c| c.id()).collect();
    assert_eq!(ancestors, vec![12, 10]);
    let descendants: Vec<i32> = cache.descendants(false, 10).iter().map(|c| c.id()).collect();
    assert_eq!(descendants, vec![11, 12, 13]);

    let about = cache.get_by_id(false, 11).expect("about");
    assert_eq!(about.content_type.expect("known type").alias, "page");
}

#[tokio::test]
async fn content_type_refresh_rereads_nodes_of_that_type() {
    let source = seeded_source();
    let store = open(&source).await;

    source.set_type(11, "landing");
    source.add_content_type(3, "landing");
    let changed = store
        .notify_content_types(&[ContentTypeChangePayload::refresh_main(3)])
        .await
        .expect("content type refresh");

    assert!(changed);
    let snapshot = store.snapshot();
    assert_eq!(snapshot.get(11).expect("about").type_alias, "landing");
    assert!(store.content_type("landing").is_some());
}

#[tokio::test]
async fn unknown_content_type_schedules_a_repair() {
    let source = seeded_source();
    let store = open(&source).await;

    source.upsert(14, 10, 2, "gallery", "Photos");
    store
        .notify(&[ChangePayload::refresh_node(14)])
        .await
        .expect("notify");

    assert!(store.snapshot().contains(14));
    assert!(store.repair_pending());

    source.add_content_type(4, "gallery");
    store
        .notify_content_types(&[])
        .await
        .expect("content type refresh");
    assert!(!store.repair_pending());
    assert!(store.content_type("gallery").is_some());
}

#[tokio::test]
async fn content_type_refresh_during_a_repair_keeps_it_pending() {
    let source = seeded_source();
    let store = open(&source).await;

    source.upsert(14, 10, 2, "gallery", "Photos");
    store
        .notify(&[ChangePayload::refresh_node(14)])
        .await
        .expect("notify");
    assert!(store.repair_pending());

    // The repair parks on the writer lock held here.
    let writer = store.lock().write().await;
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }

    source.add_content_type(4, "gallery");
    store
        .notify_content_types(&[])
        .await
        .expect("content type refresh");
    assert!(store.repair_pending(), "a running repair stays flagged");

    drop(writer);
    tokio::time::timeout(Duration::from_secs(5), async {
        while store.repair_pending() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("repair finishes");
    assert!(store.content_type("gallery").is_some());
    assert_eq!(store.lock().commit_count(), 3);
}

#[tokio::test]
async fn rebuild_rejects_a_zero_group_size() {
    let source = seeded_source();
    let store = open(&source).await;

    assert!(store.rebuild(0, None).await.is_err());
    assert_eq!(store.rebuild(100, None).await.expect("rebuild"), 4);
    assert_eq!(source.rebuilds(), 1);
}

#[tokio::test]
async fn media_tree_is_loaded_separately() {
    let source = seeded_source();
    source.add_content_type_of(5, "image", TreeKind::Media);
    source.upsert_of(TreeKind::Media, 50, ROOT_ID, 0, "image", "Logo");
    let store = open(&source).await;

    assert!(!store.snapshot().contains(50));
    let media = store
        .load_uncached(TreeKind::Media)
        .await
        .expect("media tree");
    assert_eq!(media.root_children(), &[50]);
    assert_eq!(media.kind(), TreeKind::Media);
}
