use clique::{CliqueConfig, Communicator, DeviceId, Stream, TraceMask, TrackerPool};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Small groups so short buffers still exercise the vector path: with
/// 4 workers and 16-byte vectors an f32 group covers 16 elements.
pub fn small_config() -> CliqueConfig {
    CliqueConfig {
        workers_per_group: 4,
        compute_units: 2,
        spin_yield_interval: 16,
        trace: TraceMask::ALL,
        ..CliqueConfig::default()
    }
}

/// One participant of a clique: its communicator and its stream.
pub struct Peer {
    pub comm: Communicator,
    pub stream: Stream,
}

impl Peer {
    pub fn rank(&self) -> u32 {
        self.comm.rank()
    }

    pub fn device(&self) -> DeviceId {
        self.comm.device()
    }
}

/// Build a clique over devices `0..world_size` with `config`.
pub fn clique_with(world_size: u32, config: CliqueConfig) -> Vec<Arc<Peer>> {
    init_tracing();
    let devices: Vec<DeviceId> = (0..world_size).collect();
    let pool = TrackerPool::new(&devices, config).unwrap();
    pool.communicators()
        .unwrap()
        .into_iter()
        .map(|comm| {
            let stream = Stream::new(comm.device()).unwrap();
            Arc::new(Peer { comm, stream })
        })
        .collect()
}

pub fn clique(world_size: u32) -> Vec<Arc<Peer>> {
    clique_with(world_size, small_config())
}

/// Helper: run a collective across every peer concurrently and return the
/// per-peer results in rank order.
pub async fn run_on<F, Fut, R>(peers: &[Arc<Peer>], f: F) -> Vec<R>
where
    F: Fn(Arc<Peer>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = R> + Send + 'static,
    R: Send + 'static,
{
    let f = Arc::new(f);
    let mut handles = Vec::new();
    for p in peers {
        let p = Arc::clone(p);
        let f = Arc::clone(&f);
        handles.push(tokio::spawn(async move { f(p).await }));
    }
    let mut results = Vec::with_capacity(handles.len());
    for h in handles {
        results.push(h.await.unwrap());
    }
    results
}

/// Helper: build a clique of `world_size` and run a collective across it.
pub async fn run_collective<F, Fut, R>(world_size: u32, f: F) -> Vec<R>
where
    F: Fn(Arc<Peer>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = R> + Send + 'static,
    R: Send + 'static,
{
    let peers = clique(world_size);
    run_on(&peers, f).await
}

/// Route `tracing` output to the test harness; safe to call repeatedly.
/// `RUST_LOG` overrides the default `clique=debug` filter.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("clique=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
