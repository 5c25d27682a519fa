use core::hint::black_box;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use futures::future::BoxFuture;
use portable_atomic::{AtomicU64, Ordering};
use std::{sync::Arc, time::Instant};
use tokio::{net::UdpSocket, runtime::Builder};
use wharf::{
    DatagramConfig, DatagramHandler, DatagramRequest, DatagramServer, NetType, Pool, PoolConfig,
    PoolOptions,
};

const TOTAL_JOBS: usize = 4096;
const TOTAL_PACKETS: usize = 256;

/// Submits trivial jobs and waits until every one of them has run.
fn bench_pool_submit(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool/submit");
    group.throughput(Throughput::Elements(TOTAL_JOBS as u64));

    for max_workers in [1, 2, 4, 8, 16, 32, 64] {
        group.bench_function(format!("jobs/{TOTAL_JOBS}/workers/{max_workers}"), |b| {
            let rt = Builder::new_multi_thread().enable_all().build().unwrap();

            b.to_async(&rt).iter_custom(move |iters| async move {
                let pool = Pool::new("bench", PoolConfig::fixed(max_workers, max_workers)).unwrap();
                let done = Arc::new(AtomicU64::new(0));
                let start = Instant::now();

                for _ in 0..iters {
                    for n in 0..TOTAL_JOBS {
                        let done = Arc::clone(&done);
                        pool.submit(move |_: usize| async move {
                            black_box(n);
                            done.fetch_add(1, Ordering::Relaxed);
                        })
                        .await
                        .unwrap();
                    }
                }
                pool.shutdown().await;

                let elapsed = start.elapsed();
                assert_eq!(done.load(Ordering::Relaxed), iters * TOTAL_JOBS as u64);
                elapsed
            });
        });
    }

    group.finish();
}

struct Echo;

impl DatagramHandler for Echo {
    fn process(&self, request: DatagramRequest) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let response = request.reply(request.payload.clone());
            let _ = request.server.send(&response).await;
        })
    }
}

/// Sequential request/reply latency through a datagram server.
fn bench_datagram_echo(c: &mut Criterion) {
    let mut group = c.benchmark_group("datagram/echo");
    group.throughput(Throughput::Elements(TOTAL_PACKETS as u64));

    group.bench_function(format!("packets/{TOTAL_PACKETS}"), |b| {
        let rt = Builder::new_multi_thread().enable_all().build().unwrap();

        b.to_async(&rt).iter_custom(|iters| async move {
            let config = DatagramConfig::new(NetType::Udp4, "127.0.0.1:0")
                .with_handler(Arc::new(Echo))
                .with_pools(PoolOptions::fixed(2, 8, 0, 1));
            let server = DatagramServer::new("bench", config).unwrap();
            server.start().await.unwrap();
            let addr = server.local_addr().unwrap();
            let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            let mut buf = [0_u8; 64];

            let start = Instant::now();
            for _ in 0..iters {
                for _ in 0..TOTAL_PACKETS {
                    client.send_to(b"ping", addr).await.unwrap();
                    let (len, _) = client.recv_from(&mut buf).await.unwrap();
                    black_box(&buf[..len]);
                }
            }
            let elapsed = start.elapsed();

            server.stop().await.unwrap();
            elapsed
        });
    });

    group.finish();
}

criterion_group!(benches, bench_pool_submit, bench_datagram_echo);
criterion_main!(benches);
