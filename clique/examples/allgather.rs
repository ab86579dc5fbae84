//! Ring-allgather across 3 devices registered one at a time.
//!
//! Each device registers itself under its rank; the ring is wired when the
//! last one arrives. Afterwards every device holds all contributions in
//! rank order.
//!
//! ```bash
//! cargo run --example allgather
//! ```

use std::sync::Arc;

use clique::{CliqueConfig, DeviceBuffer, Stream, TrackerPool};

#[tokio::main]
async fn main() -> clique::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let world = 3u32;
    let count = 4usize;
    let pool = TrackerPool::with_group_size(world, CliqueConfig::from_env())?;

    let mut handles = Vec::new();
    for rank in 0..world {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            let device = 10 + rank;
            let comm = pool.add_device(device, rank, world)?;
            let stream = Stream::new(device)?;
            let contribution: Vec<u32> = (0..count as u32).map(|i| rank * 100 + i).collect();
            let src = DeviceBuffer::from_slice(device, &contribution)?;
            let dst = DeviceBuffer::<u32>::zeroed(device, world as usize * count)?;

            // Retry until the last device has registered.
            let handle = loop {
                match comm.all_gather(&stream, &src, &dst, count) {
                    Err(clique::CliqueError::RingIncomplete { .. }) => tokio::task::yield_now().await,
                    other => break other?,
                }
            };
            handle.wait().await?;
            clique::Result::Ok((rank, dst.to_vec()?))
        }));
    }

    for h in handles {
        let (rank, data) = h.await.expect("task panicked")?;
        println!("rank {rank}: {data:?}");
    }
    // Output:
    // rank 0: [0, 1, 2, 3, 100, 101, 102, 103, 200, 201, 202, 203]
    // ...

    Ok(())
}
