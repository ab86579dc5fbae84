use clique::{CliqueConfig, DeviceBuffer, LaunchGroup};

use super::helpers::{clique, clique_with, run_collective, run_on, small_config};

#[tokio::test(flavor = "multi_thread")]
async fn test_allgather_4_devices_i32() {
    let results = run_collective(4, |peer| async move {
        let r = peer.rank() as i32;
        let src = DeviceBuffer::from_slice(peer.device(), &[2 * r + 1, 2 * r + 2]).unwrap();
        let dst = DeviceBuffer::<i32>::zeroed(peer.device(), 8).unwrap();
        peer.comm
            .all_gather(&peer.stream, &src, &dst, 2)
            .unwrap()
            .wait()
            .await
            .unwrap();
        dst.to_vec().unwrap()
    })
    .await;

    for (rank, data) in results.iter().enumerate() {
        assert_eq!(data, &[1, 2, 3, 4, 5, 6, 7, 8], "rank {rank} allgather failed");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_allgather_single_device_is_a_copy() {
    let results = run_collective(1, |peer| async move {
        let src = DeviceBuffer::from_slice(peer.device(), &[4.5f64, -1.0, 9.25]).unwrap();
        let dst = DeviceBuffer::<f64>::zeroed(peer.device(), 3).unwrap();
        peer.comm
            .all_gather(&peer.stream, &src, &dst, 3)
            .unwrap()
            .wait()
            .await
            .unwrap();

        // The walk made zero hops, so nobody reported in.
        let slot = peer.comm.control_block().recv_slot();
        assert_eq!(slot.load().map(|p| p.epoch), Some(1));
        assert_eq!(slot.arrivals(), 0);
        dst.to_vec().unwrap()
    })
    .await;
    assert_eq!(results[0], vec![4.5, -1.0, 9.25]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_allgather_vector_boundaries() {
    // f32 groups hold 16 elements under the small config.
    let peers = clique(3);
    for count in [1usize, 15, 16, 17, 31, 32, 33, 100] {
        let results = run_on(&peers, move |peer| async move {
            let base = peer.rank() as f32 * 1000.0;
            let data: Vec<f32> = (0..count).map(|i| base + i as f32).collect();
            let src = DeviceBuffer::from_slice(peer.device(), &data).unwrap();
            let dst = DeviceBuffer::<f32>::zeroed(peer.device(), 3 * count).unwrap();
            peer.comm
                .all_gather(&peer.stream, &src, &dst, count)
                .unwrap()
                .wait()
                .await
                .unwrap();
            dst.to_vec().unwrap()
        })
        .await;

        let expected: Vec<f32> = (0..3)
            .flat_map(|r| (0..count).map(move |i| r as f32 * 1000.0 + i as f32))
            .collect();
        for (rank, data) in results.iter().enumerate() {
            assert_eq!(data, &expected, "rank {rank} count {count}");
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_allgather_default_geometry() {
    // 1024 workers x 4 f32 lanes: one full vector group plus a scalar tail.
    let config = CliqueConfig {
        compute_units: 2,
        ..CliqueConfig::default()
    };
    let peers = clique_with(2, config);
    let count = 5000;
    let results = run_on(&peers, move |peer| async move {
        let data: Vec<u32> = (0..count as u32).map(|i| i * 2 + peer.rank()).collect();
        let src = DeviceBuffer::from_slice(peer.device(), &data).unwrap();
        let dst = DeviceBuffer::<u32>::zeroed(peer.device(), 2 * count).unwrap();
        peer.comm
            .all_gather(&peer.stream, &src, &dst, count)
            .unwrap()
            .wait()
            .await
            .unwrap();
        dst.to_vec().unwrap()
    })
    .await;

    for data in &results {
        for r in 0..2u32 {
            let slice = &data[r as usize * count..(r as usize + 1) * count];
            assert!(slice.iter().enumerate().all(|(i, &v)| v == i as u32 * 2 + r));
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_allgather_repeated_launches_reuse_buffers() {
    let peers = clique(4);
    let bufs: Vec<_> = peers
        .iter()
        .map(|p| {
            (
                DeviceBuffer::<i64>::zeroed(p.device(), 5).unwrap(),
                DeviceBuffer::<i64>::zeroed(p.device(), 20).unwrap(),
            )
        })
        .collect();

    for round in 0..6i64 {
        let mut group = LaunchGroup::new();
        for (peer, (src, dst)) in peers.iter().zip(&bufs) {
            let r = peer.rank() as i64;
            src.copy_from_slice(&[round, r, round * r, -r, 100 + round])
                .unwrap();
            group.push(peer.comm.all_gather(&peer.stream, src, dst, 5).unwrap());
        }
        group.wait_all().await.unwrap();

        let expected: Vec<i64> = (0..4)
            .flat_map(|r| [round, r, round * r, -r, 100 + round])
            .collect();
        for (rank, (_, dst)) in bufs.iter().enumerate() {
            assert_eq!(dst.to_vec().unwrap(), expected, "rank {rank} round {round}");
        }
    }
    for peer in &peers {
        assert_eq!(peer.comm.control_block().launches(), 6);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_allgather_back_to_back_on_one_stream() {
    // Two launches queued before either completes, on distinct buffers.
    let peers = clique(3);
    let results = run_on(&peers, |peer| async move {
        let r = peer.rank() as u8;
        let a_src = DeviceBuffer::from_slice(peer.device(), &[r; 2]).unwrap();
        let b_src = DeviceBuffer::from_slice(peer.device(), &[r + 10; 2]).unwrap();
        let a_dst = DeviceBuffer::<u8>::zeroed(peer.device(), 6).unwrap();
        let b_dst = DeviceBuffer::<u8>::zeroed(peer.device(), 6).unwrap();
        let a = peer.comm.all_gather(&peer.stream, &a_src, &a_dst, 2).unwrap();
        let b = peer.comm.all_gather(&peer.stream, &b_src, &b_dst, 2).unwrap();
        let outcomes = futures::future::join_all([a.wait(), b.wait()]).await;
        assert!(outcomes.iter().all(Result::is_ok));
        (a_dst.to_vec().unwrap(), b_dst.to_vec().unwrap())
    })
    .await;

    for (a, b) in &results {
        assert_eq!(a, &[0, 0, 1, 1, 2, 2]);
        assert_eq!(b, &[10, 10, 11, 11, 12, 12]);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_allgather_zero_count_is_a_no_op() {
    let config = small_config();
    let peers = clique_with(2, config);
    let results = run_on(&peers, |peer| async move {
        let src = DeviceBuffer::<i8>::zeroed(peer.device(), 0).unwrap();
        let dst = DeviceBuffer::from_slice(peer.device(), &[7i8, 7]).unwrap();
        peer.comm
            .all_gather(&peer.stream, &src, &dst, 0)
            .unwrap()
            .wait()
            .await
            .unwrap();
        assert!(peer.comm.control_block().recv_slot().load().is_none());
        dst.to_vec().unwrap()
    })
    .await;
    assert!(results.iter().all(|d| d == &[7, 7]));
}
