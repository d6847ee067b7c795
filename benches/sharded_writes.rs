use std::path::PathBuf;
use std::time::Duration;

use criterion::{
    criterion_group, criterion_main, measurement::WallTime, BatchSize, BenchmarkGroup, BenchmarkId,
    Criterion, SamplingMode, Throughput,
};
use shardlog::LoggerConfig;
use tokio::runtime::Runtime;

/// Hands out a fresh subdirectory per iteration so that successive runs
/// never reuse a log file; self-destructs on drop.
struct DataDir {
    index: usize,
    base: PathBuf,
}

struct PathGuard {
    inner: PathBuf,
}

impl DataDir {
    fn new(name: &str) -> Self {
        let mut base = std::env::temp_dir();
        base.push("shardlog-benches");
        base.push(name);
        std::fs::create_dir_all(&base).expect("could not create bench base dir");
        Self { index: 0, base }
    }

    fn next(&mut self) -> PathGuard {
        let mut dir = self.base.clone();
        dir.push(self.index.to_string());
        self.index += 1;
        std::fs::create_dir_all(&dir).expect("could not create bench iteration dir");
        PathGuard { inner: dir }
    }
}

impl Drop for DataDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.base);
    }
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.inner);
    }
}

/// Writes `message_count` fixed-size records through a logger and waits
/// for the final close-triggered flush to land on disk.
async fn write_and_close(logger: shardlog::Logger, payload: Vec<u8>, message_count: usize) {
    for _ in 0..message_count {
        logger.write(&payload);
    }
    logger.close().await.expect("close should succeed");
}

fn sharded_write_throughput(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let message_count: usize = 1_000;

    let mut group: BenchmarkGroup<WallTime> = c.benchmark_group("sharded-write-throughput");
    group.sampling_mode(SamplingMode::Auto);

    for &num_shards in &[1usize, 2, 4, 8] {
        for &payload_len in &[64usize, 512, 4096] {
            let mut data_dir = DataDir::new(&format!("shards-{num_shards}-len-{payload_len}"));
            group.throughput(Throughput::Elements(message_count as u64));
            group.bench_with_input(
                BenchmarkId::new(format!("num_shards={num_shards}"), payload_len),
                &payload_len,
                |b, &payload_len| {
                    b.to_async(&rt).iter_batched(
                        || {
                            let guard = data_dir.next();
                            let path = guard.inner.join("events.log");
                            let logger = LoggerConfig::builder(&path)
                                .num_shards(num_shards)
                                .buffer_size(4 * 1024 * 1024)
                                .flush_interval(Duration::from_millis(50))
                                .build()
                                .expect("bench logger config should be valid");
                            let payload = vec![0xABu8; payload_len];
                            (logger, payload, guard)
                        },
                        |(logger, payload, guard)| async move {
                            write_and_close(logger, payload, message_count).await;
                            drop(guard);
                        },
                        BatchSize::SmallInput,
                    )
                },
            );
        }
    }
}

criterion_group!(
    name = sharded_writes;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .sample_size(20);
    targets = sharded_write_throughput
);
criterion_main!(sharded_writes);
