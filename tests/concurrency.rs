//! Readers keep consistent snapshots while a writer commits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use pubcache::application::repos::ContentSource;
use pubcache::cache::{CacheConfig, LeadershipToken, PublishedContentCache, XmlTreeStore};
use pubcache::domain::node::ROOT_ID;
use pubcache::domain::types::TreeKind;
use pubcache::infra::memory::MemorySource;
use pubcache_api_types::ChangePayload;

const SECTIONS: i32 = 5;
const ROUNDS: i32 = 500;

fn seeded_source() -> Arc<MemorySource> {
    let source = Arc::new(MemorySource::new());
    source.add_content_type(1, "page");
    source.upsert(1, ROOT_ID, 0, "page", "Home");
    for section in 0..SECTIONS {
        let id = 100 + section;
        source.upsert(id, 1, section, "page", &format!("Section {section}"));
    }
    source
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_observe_a_half_applied_batch() {
    let source = seeded_source();
    let dyn_source: Arc<dyn ContentSource> = Arc::clone(&source) as Arc<dyn ContentSource>;
    let store = XmlTreeStore::open(
        TreeKind::Content,
        CacheConfig::default(),
        dyn_source,
        LeadershipToken::denied(),
    )
    .await
    .expect("store opens");

    let done = Arc::new(AtomicBool::new(false));
    let observed = Arc::new(AtomicU64::new(0));
    let mut readers = Vec::new();
    for _ in 0..4 {
        let store = Arc::clone(&store);
        let done = Arc::clone(&done);
        let observed = Arc::clone(&observed);
        readers.push(tokio::spawn(async move {
            loop {
                let cache = PublishedContentCache::new(Arc::clone(&store));
                let snapshot = store.snapshot();
                snapshot.check_invariants().expect("consistent snapshot");

                // Each batch adds a pair of children under one section; a
                // reader sees both or neither.
                for section in 0..SECTIONS {
                    let children = snapshot.children(100 + section);
                    assert_eq!(children.len() % 2, 0, "torn batch: {children:?}");
                }
                assert!(cache.get_by_id(false, 1).is_some());
                observed.fetch_add(1, Ordering::Relaxed);
                if done.load(Ordering::Acquire) {
                    break;
                }
                tokio::task::yield_now().await;
            }
        }));
    }

    for round in 0..ROUNDS {
        let parent = 100 + round % SECTIONS;
        let first = 1_000 + round * 2;
        let second = first + 1;
        source.upsert(first, parent, round, "page", &format!("Item {first}"));
        source.upsert(second, parent, round, "page", &format!("Item {second}"));
        store
            .notify(&[
                ChangePayload::refresh_node(first),
                ChangePayload::refresh_node(second),
            ])
            .await
            .expect("notify");
        if round % 10 == 0 {
            tokio::task::yield_now().await;
        }
    }
    done.store(true, Ordering::Release);

    for reader in readers {
        reader.await.expect("reader finished cleanly");
    }

    let snapshot = store.snapshot();
    snapshot.check_invariants().expect("consistent snapshot");
    assert_eq!(snapshot.len(), 1 + SECTIONS as usize + (ROUNDS as usize) * 2);
    assert!(observed.load(Ordering::Relaxed) > 0);
    assert_eq!(store.lock().commit_count(), 1 + ROUNDS as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_notifications_serialize_on_the_writer_lock() {
    let source = seeded_source();
    for section in 0..SECTIONS {
        source.upsert(200 + section, 100 + section, 0, "page", "Leaf");
    }
    let dyn_source: Arc<dyn ContentSource> = Arc::clone(&source) as Arc<dyn ContentSource>;
    let store = XmlTreeStore::open(
        TreeKind::Content,
        CacheConfig::default(),
        dyn_source,
        LeadershipToken::denied(),
    )
    .await
    .expect("store opens");

    // Every task renames and refreshes its own leaf; none of the edits may be lost.
    let mut writers = Vec::new();
    for section in 0..SECTIONS {
        let store = Arc::clone(&store);
        let source = Arc::clone(&source);
        writers.push(tokio::spawn(async move {
            let id = 200 + section;
            for round in 0..20 {
                source.rename(id, &format!("Leaf {section}-{round}"));
                store
                    .notify(&[ChangePayload::refresh_node(id)])
                    .await
                    .expect("notify");
            }
        }));
    }
    for writer in writers {
        writer.await.expect("writer finished cleanly");
    }

    let snapshot = store.snapshot();
    snapshot.check_invariants().expect("consistent snapshot");
    for section in 0..SECTIONS {
        assert_eq!(
            snapshot.get(200 + section).expect("leaf").name,
            format!("Leaf {section}-19")
        );
    }
}
