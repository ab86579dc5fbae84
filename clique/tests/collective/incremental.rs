use std::sync::Arc;

use clique::{CliqueError, DeviceBuffer, Stream, TrackerPool};

use super::helpers::{Peer, run_on, small_config};

/// Follow `next` (or `prev`) from `start` until it returns; the step count.
fn cycle_len(pool: &TrackerPool, start: usize, forward: bool) -> usize {
    let ring = pool.ring().unwrap();
    let mut at = start;
    let mut steps = 0;
    loop {
        let links = ring[at].links().unwrap();
        at = if forward { links.next.index() } else { links.prev.index() };
        steps += 1;
        if at == start {
            return steps;
        }
        assert!(steps <= ring.len(), "ring does not close");
    }
}

#[test]
fn test_ring_cycles_for_any_device_order() {
    let orders: [&[u32]; 5] = [&[0], &[3, 1], &[9, 2, 5], &[4, 0, 7, 1, 6], &[12, 11, 10, 9, 8, 7, 6]];
    for devices in orders {
        let pool = TrackerPool::new(devices, small_config()).unwrap();
        let n = devices.len();
        for start in 0..n {
            assert_eq!(cycle_len(&pool, start, true), n);
            assert_eq!(cycle_len(&pool, start, false), n);
        }
        for (rank, &device) in devices.iter().enumerate() {
            let block = pool.get_pool_by_device_index(device).unwrap();
            assert_eq!(block.rank() as usize, rank);
            assert_eq!(block.device(), device);
        }
        assert!(pool.get_pool_by_device_index(100).is_none());
    }
}

#[test]
fn test_concurrent_registration_matches_direct_construction() {
    let devices = [40u32, 41, 42, 43, 44];
    let pool = TrackerPool::with_group_size(5, small_config()).unwrap();

    let threads: Vec<_> = [3usize, 0, 4, 2, 1]
        .into_iter()
        .map(|rank| {
            let pool = Arc::clone(&pool);
            let device = devices[rank];
            std::thread::spawn(move || pool.add_device(device, rank as u32, 5).unwrap())
        })
        .collect();
    let comms: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

    assert!(pool.is_complete());
    assert_eq!(pool.active_devices(), 5);
    assert_eq!(pool.device_ids().unwrap(), &devices);

    let direct = TrackerPool::new(&devices, small_config()).unwrap();
    let incremental: Vec<_> = pool.describe().iter().map(|s| (s.device, s.prev, s.next)).collect();
    let expected: Vec<_> = direct.describe().iter().map(|s| (s.device, s.prev, s.next)).collect();
    assert_eq!(incremental, expected);
    drop(comms);
    assert_eq!(pool.active_devices(), 0);
}

#[test]
fn test_registration_errors() {
    let pool = TrackerPool::with_group_size(2, small_config()).unwrap();
    let _c0 = pool.add_device(5, 0, 2).unwrap();
    assert!(matches!(
        pool.add_device(6, 0, 2),
        Err(CliqueError::DuplicateRank { rank: 0 })
    ));
    assert!(matches!(
        pool.add_device(5, 1, 2),
        Err(CliqueError::DuplicateDevice { device: 5 })
    ));
    assert!(matches!(
        pool.add_device(6, 2, 2),
        Err(CliqueError::InvalidRank { rank: 2, .. })
    ));
    assert!(matches!(
        pool.add_device(6, 1, 3),
        Err(CliqueError::GroupSizeMismatch {
            expected: 2,
            actual: 3
        })
    ));
    assert!(matches!(pool.ring(), Err(CliqueError::RingIncomplete { .. })));
    assert!(pool.add_device(6, 1, 2).is_ok());
    assert!(pool.is_complete());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_allgather_through_incrementally_built_ring() {
    let pool = TrackerPool::with_group_size(3, small_config()).unwrap();
    let mut peers: Vec<Arc<Peer>> = [2u32, 0, 1]
        .into_iter()
        .map(|rank| {
            let comm = pool.add_device(rank + 20, rank, 3).unwrap();
            let stream = Stream::new(comm.device()).unwrap();
            Arc::new(Peer { comm, stream })
        })
        .collect();
    peers.sort_by_key(|p| p.rank());

    let results = run_on(&peers, |peer| async move {
        let src = DeviceBuffer::from_slice(peer.device(), &[peer.device() as i32; 2]).unwrap();
        let dst = DeviceBuffer::<i32>::zeroed(peer.device(), 6).unwrap();
        peer.comm
            .all_gather(&peer.stream, &src, &dst, 2)
            .unwrap()
            .wait()
            .await
            .unwrap();
        dst.to_vec().unwrap()
    })
    .await;
    assert!(results.iter().all(|d| d == &[20, 20, 21, 21, 22, 22]));
}
