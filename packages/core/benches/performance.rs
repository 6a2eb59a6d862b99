//! Performance benchmarks for Canopy core operations
//!
//! Run with: `cargo bench -p canopy-core`
//!
//! These benchmarks measure the traversal-heavy paths:
//! - Descendant closure on deep chains (round trips scale with depth)
//! - Descendant closure on wide trees (single frontier batch)
//! - Root-first ancestor paths

use async_trait::async_trait;
use canopy_core::db::{DatabaseError, DatabaseService};
use canopy_core::tree::{DeletionHook, TreeStore};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;

struct NoopHook;

#[async_trait]
impl DeletionHook for NoopHook {
    async fn delete_owned(
        &self,
        _conn: &libsql::Connection,
        _ids: &[String],
    ) -> Result<(), DatabaseError> {
        Ok(())
    }
}

async fn setup_store() -> (Arc<TreeStore>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("bench.db");
    let db = Arc::new(DatabaseService::new(db_path).await.unwrap());
    let store = Arc::new(TreeStore::new(db, "content", Arc::new(NoopHook)));
    (store, temp_dir)
}

/// Chain of `depth` nodes: n0 -> n1 -> ... -> n(depth-1)
async fn build_chain(store: &TreeStore, depth: usize) {
    store.create_node("n0", None).await.unwrap();
    for i in 1..depth {
        let id = format!("n{}", i);
        let parent = format!("n{}", i - 1);
        store.create_node(&id, Some(&parent)).await.unwrap();
    }
}

/// Root with `width` direct children
async fn build_star(store: &TreeStore, width: usize) {
    store.create_node("root", None).await.unwrap();
    for i in 0..width {
        let id = format!("c{}", i);
        store.create_node(&id, Some("root")).await.unwrap();
    }
}

fn bench_descendant_closure_deep(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (store, _temp_dir) = rt.block_on(setup_store());
    rt.block_on(build_chain(&store, 200));

    c.bench_function("descendant_closure_depth_200", |b| {
        b.iter(|| {
            let ids = rt.block_on(store.get_descendant_ids("n0")).unwrap();
            assert_eq!(ids.len(), 200);
            black_box(ids)
        })
    });
}

fn bench_descendant_closure_wide(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (store, _temp_dir) = rt.block_on(setup_store());
    rt.block_on(build_star(&store, 500));

    c.bench_function("descendant_closure_width_500", |b| {
        b.iter(|| {
            let ids = rt.block_on(store.get_descendant_ids("root")).unwrap();
            assert_eq!(ids.len(), 501);
            black_box(ids)
        })
    });
}

fn bench_ancestor_path_deep(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (store, _temp_dir) = rt.block_on(setup_store());
    rt.block_on(build_chain(&store, 100));

    c.bench_function("ancestor_path_depth_100", |b| {
        b.iter(|| {
            let path = rt.block_on(store.get_ancestor_path("n99")).unwrap();
            assert_eq!(path.len(), 100);
            black_box(path)
        })
    });
}

criterion_group!(
    benches,
    bench_descendant_closure_deep,
    bench_descendant_closure_wide,
    bench_ancestor_path_deep
);
criterion_main!(benches);
