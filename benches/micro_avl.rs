//! Micro benchmarks for CAS index maintenance and scans.
#![forbid(unsafe_code)]
#![allow(missing_docs)]

use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput,
};
use palimpsest::{
    Atomic, CasFilter, CasFilterRange, ContentType, IndexDef, NodeKey, NodeReader, Path,
    PathFilter, QName, ResourceManager, ResourceOptions, Revision, SearchMode,
};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const INSERT_COUNT: u64 = 4_096;
const LOOKUP_SAMPLES: usize = 512;
const RANGE_WIDTH: i64 = 256;

struct Loaded {
    manager: ResourceManager,
    revision: Revision,
    index: u32,
    texts: Vec<NodeKey>,
}

impl Loaded {
    fn new(values: &[u64]) -> Self {
        let manager = ResourceManager::open(ResourceOptions::in_memory()).expect("open");
        let mut wtx = manager.begin_node_write().expect("writer");
        let def = wtx
            .create_index(IndexDef::cas(
                ContentType::Int,
                [Path::parse("//v").expect("path")],
            ))
            .expect("index");
        let list = wtx
            .insert_element_as_first_child(&QName::local("values"))
            .expect("insert");
        let mut texts = Vec::with_capacity(values.len());
        for value in values {
            wtx.move_to(list).expect("move");
            wtx.insert_element_as_first_child(&QName::local("v"))
                .expect("insert");
            texts.push(
                wtx.insert_text_as_first_child(value.to_string().as_bytes())
                    .expect("insert"),
            );
        }
        let revision = wtx.commit().expect("commit");
        Self {
            manager,
            revision,
            index: def.id(),
            texts,
        }
    }

    fn point_lookup(&self, rng: &mut ChaCha8Rng, samples: usize) -> usize {
        let reader = self.manager.begin_node_read(self.revision).expect("reader");
        let indexes = reader.indexes();
        let mut found = 0;
        for _ in 0..samples {
            let target = rng.gen_range(0..INSERT_COUNT) as i64;
            let filter = CasFilter::new(Atomic::Int(target), SearchMode::Equal, PathFilter::all());
            found += indexes
                .cas_index(self.index, filter)
                .expect("scan")
                .count();
        }
        found
    }

    fn range_scan(&self, start: i64) -> usize {
        let reader = self.manager.begin_node_read(self.revision).expect("reader");
        let range = CasFilterRange::new(
            Atomic::Int(start),
            Atomic::Int(start + RANGE_WIDTH),
            true,
            false,
            PathFilter::all(),
        );
        reader
            .indexes()
            .cas_index_range(self.index, range)
            .expect("scan")
            .count()
    }
}

fn micro_avl(c: &mut Criterion) {
    let mut group = c.benchmark_group("micro/avl");
    group.sample_size(20);

    let sequential: Vec<u64> = (0..INSERT_COUNT).collect();
    let mut random = sequential.clone();
    random.shuffle(&mut ChaCha8Rng::seed_from_u64(0xA71_5EED));

    group.throughput(Throughput::Elements(INSERT_COUNT));
    group.bench_function("sequential_insert", |b| {
        b.iter(|| black_box(Loaded::new(&sequential).revision));
    });
    group.bench_function("random_insert", |b| {
        b.iter(|| black_box(Loaded::new(&random).revision));
    });

    let loaded = Loaded::new(&random);
    let mut rng = ChaCha8Rng::seed_from_u64(0x10_0C_AB);
    group.throughput(Throughput::Elements(LOOKUP_SAMPLES as u64));
    group.bench_function(BenchmarkId::new("point_lookup", LOOKUP_SAMPLES), |b| {
        b.iter(|| black_box(loaded.point_lookup(&mut rng, LOOKUP_SAMPLES)));
    });

    group.throughput(Throughput::Elements(RANGE_WIDTH as u64));
    group.bench_function(BenchmarkId::new("range_scan", RANGE_WIDTH), |b| {
        b.iter(|| black_box(loaded.range_scan(INSERT_COUNT as i64 / 2)));
    });

    group.throughput(Throughput::Elements(1));
    group.bench_function("update_and_commit", |b| {
        b.iter_batched(
            || rng.gen_range(0..loaded.texts.len()),
            |slot| {
                let mut wtx = loaded.manager.begin_node_write().expect("writer");
                wtx.move_to(loaded.texts[slot]).expect("move");
                wtx.set_value(b"-1").expect("update");
                black_box(wtx.commit().expect("commit"))
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, micro_avl);
criterion_main!(benches);
