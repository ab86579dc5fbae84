//! Ring-allreduce across 4 devices.
//!
//! Each device starts with its own data. After allreduce(Sum), every device
//! holds the element-wise sum of all inputs in its own rank slice.
//!
//! ```bash
//! cargo run --example allreduce
//! CLIQUE_TRACE=7 RUST_LOG=clique=debug cargo run --example allreduce
//! ```

use clique::{CliqueConfig, DeviceBuffer, LaunchGroup, ReduceOp, Stream, TrackerPool};

#[tokio::main]
async fn main() -> clique::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let devices = [0u32, 1, 2, 3];
    let pool = TrackerPool::new(&devices, CliqueConfig::from_env())?;
    let comms = pool.communicators()?;
    let count = 8usize;

    // Device r contributes [r, r, ...].
    let mut streams = Vec::new();
    let mut dsts = Vec::new();
    let mut group = LaunchGroup::new();
    for comm in &comms {
        let stream = Stream::new(comm.device())?;
        let src = DeviceBuffer::from_slice(comm.device(), &vec![comm.rank() as f32; count])?;
        let dst = DeviceBuffer::<f32>::zeroed(comm.device(), devices.len() * count)?;
        group.push(comm.all_reduce(&stream, &src, &dst, count, ReduceOp::Sum)?);
        streams.push(stream);
        dsts.push(dst);
    }
    group.wait_all().await?;

    for (rank, dst) in dsts.iter().enumerate() {
        let data = dst.to_vec()?;
        println!("rank {rank}: {:?}", &data[rank * count..(rank + 1) * count]);
    }
    // Output (all ranks identical):
    // rank 0: [6.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0]
    // rank 1: [6.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0, 6.0]
    // ...

    pool.log_all();
    Ok(())
}
