use commander_core::config::StorageConfig;
use commander_core::storage::keys::entity_key;
use commander_core::storage::{InMemoryItemStore, ItemStore, KeyType, StorageDao, StorageItem, TagIndex};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::runtime::Runtime;

/// Every id carries `site=north`; every third also carries `kind=fw`
fn seeded_index(runtime: &Runtime, ids: usize, page_size: usize) -> TagIndex {
    let store = Arc::new(InMemoryItemStore::new());
    runtime.block_on(async {
        for i in 0..ids {
            let key = entity_key(KeyType::Command, &format!("{i:06}"));
            let mut tags = vec![("site", "north")];
            if i % 3 == 0 {
                tags.push(("kind", "fw"));
            }
            for (k, v) in tags {
                store
                    .put_item(
                        StorageItem::new(key.clone(), TagIndex::tag_hash(k, v))
                            .with_si1_sort(key.clone()),
                    )
                    .await
                    .expect("seed tag item");
            }
        }
    });
    let config = StorageConfig {
        tag_page_size: page_size,
        ..StorageConfig::default()
    };
    TagIndex::new(StorageDao::new(store, config), KeyType::Command)
}

fn benchmark_two_tag_intersection(c: &mut Criterion) {
    let runtime = Runtime::new().expect("tokio runtime");
    let tags = BTreeMap::from([
        ("site".to_string(), "north".to_string()),
        ("kind".to_string(), "fw".to_string()),
    ]);

    let mut group = c.benchmark_group("tag_intersection");
    for page_size in [10, 100] {
        let index = seeded_index(&runtime, 3_000, page_size);
        group.bench_with_input(BenchmarkId::from_parameter(page_size), &index, |b, index| {
            b.iter(|| {
                runtime
                    .block_on(index.list_ids(black_box(&tags), None, 50))
                    .expect("tag search")
            })
        });
    }
    group.finish();
}

criterion_group!(benches, benchmark_two_tag_intersection);
criterion_main!(benches);
