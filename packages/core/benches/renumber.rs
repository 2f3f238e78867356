//! Renumber and move benchmarks for Blockspace core
//!
//! Run with: `cargo bench -p blockspace-core`
//!
//! These benchmarks compare the two renumber backends:
//! - Squashing a gapped scope (`WindowRankRenumber` vs `PortableRenumber`)
//! - A front-of-scope move, which shifts and squashes the whole scope

use blockspace_core::behaviors::PluginTypeRegistry;
use blockspace_core::config::EngineConfig;
use blockspace_core::db::{
    DatabaseService, PortableRenumber, PositionAllocator, RenumberBackend, Renumberer,
    WindowRankRenumber,
};
use blockspace_core::models::{NewPlugin, Placement, Scope};
use blockspace_core::services::PluginTreeService;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::runtime::Runtime;

const SCOPE_SIZES: [usize; 3] = [100, 1_000, 5_000];

fn backends() -> Vec<Arc<dyn RenumberBackend>> {
    vec![Arc::new(WindowRankRenumber), Arc::new(PortableRenumber)]
}

/// Fill one scope with `size` root text plugins
async fn setup_scope(
    backend: Arc<dyn RenumberBackend>,
    size: usize,
) -> (PluginTreeService, Scope, Vec<String>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let db = DatabaseService::new(temp_dir.path().join("bench.db"))
        .await
        .unwrap();
    let service = PluginTreeService::with_renumberer(
        Arc::new(db),
        Arc::new(PluginTypeRegistry::with_builtin()),
        EngineConfig::default(),
        Renumberer::new(backend),
    );

    let container = service.create_container("content", None).await.unwrap();
    let scope = Scope::new(container.id, "en");
    let mut ids = Vec::with_capacity(size);
    for i in 0..size {
        let node = service
            .add(
                NewPlugin::new("text", json!({ "body": format!("Paragraph {}", i) })),
                Placement::append(scope.clone()),
            )
            .await
            .unwrap();
        ids.push(node.id);
    }

    (service, scope, ids, temp_dir)
}

/// Benchmark squashing a scope with a gap in the middle
fn bench_squash(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("squash_gapped_scope");

    for backend in backends() {
        for size in SCOPE_SIZES {
            let (service, scope, _ids, _temp) = rt.block_on(setup_scope(backend.clone(), size));
            let renumberer = Renumberer::new(backend.clone());
            let conn = rt.block_on(service.db().connect_with_timeout()).unwrap();

            group.bench_with_input(BenchmarkId::new(backend.name(), size), &size, |b, &size| {
                b.iter(|| {
                    rt.block_on(async {
                        PositionAllocator::shift(&conn, &scope, size as i64 / 2, 7)
                            .await
                            .unwrap();
                        black_box(renumberer.recalculate(&conn, &scope).await.unwrap());
                    })
                });
            });
        }
    }

    group.finish();
}

/// Benchmark moving the last plugin of a scope to the front
fn bench_move_to_front(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("move_to_front");
    group.sample_size(20);

    for backend in backends() {
        for size in SCOPE_SIZES {
            let (service, scope, ids, _temp) = rt.block_on(setup_scope(backend.clone(), size));
            let mut cursor = ids.len();

            group.bench_with_input(BenchmarkId::new(backend.name(), size), &size, |b, _| {
                b.iter(|| {
                    // Cycle through the ids so every iteration moves a plugin
                    // that is currently near the end
                    cursor = if cursor == 0 { ids.len() - 1 } else { cursor - 1 };
                    rt.block_on(async {
                        black_box(
                            service
                                .move_plugin(&ids[cursor], Placement::at(scope.clone(), 1))
                                .await
                                .unwrap(),
                        );
                    })
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_squash, bench_move_to_front);
criterion_main!(benches);
