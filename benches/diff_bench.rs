use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use diffcopy::{double_walk_diff, ChangeHandler, ChangeKind, CurrentPath, Stat};

struct CountingHandler(std::sync::atomic::AtomicUsize);

#[async_trait::async_trait]
impl ChangeHandler for CountingHandler {
    async fn handle_change(
        &self,
        _kind: ChangeKind,
        _path: &str,
        _stat: Option<&Stat>,
    ) -> diffcopy::Result<()> {
        self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Ok(())
    }
}

fn file(path: String, mtime_ns: i64) -> CurrentPath {
    CurrentPath::remote(Stat {
        path,
        mode: 0o100644,
        size: 64,
        mod_time_ns: mtime_ns,
        ..Default::default()
    })
}

/// Synthetic ordered streams: every other entry differs by mtime, plus a
/// tail of additions on the remote side.
fn make_streams(n: usize) -> (Vec<CurrentPath>, Vec<CurrentPath>) {
    let mut local = Vec::with_capacity(n);
    let mut remote = Vec::with_capacity(n + n / 4);
    for i in 0..n {
        let path = format!("dir{:03}/file{:06}", i / 256, i);
        local.push(file(path.clone(), 1_000_000_001));
        let mtime = if i % 2 == 0 { 1_000_000_001 } else { 2_000_000_001 };
        remote.push(file(path, mtime));
    }
    for i in 0..n / 4 {
        remote.push(file(format!("zz-new/file{:06}", i), 1));
    }
    (local, remote)
}

fn bench_double_walk(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .build()
        .unwrap();

    let mut group = c.benchmark_group("double_walk_diff");
    for n in [1_000usize, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, &n| {
            b.iter(|| {
                rt.block_on(async {
                    let (local, remote) = make_streams(n);
                    let (ltx, lrx) = mpsc::channel(128);
                    let (rtx, rrx) = mpsc::channel(128);
                    let feed = tokio::spawn(async move {
                        for p in local {
                            if ltx.send(p).await.is_err() {
                                return;
                            }
                        }
                    });
                    let feed2 = tokio::spawn(async move {
                        for p in remote {
                            if rtx.send(p).await.is_err() {
                                return;
                            }
                        }
                    });
                    let handler = CountingHandler(std::sync::atomic::AtomicUsize::new(0));
                    double_walk_diff(lrx, rrx, &handler, &CancellationToken::new())
                        .await
                        .unwrap();
                    feed.await.unwrap();
                    feed2.await.unwrap();
                });
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_double_walk);
criterion_main!(benches);
