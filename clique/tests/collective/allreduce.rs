use clique::{DeviceBuffer, Element, ReduceOp};

use super::helpers::{clique, run_collective, run_on};

/// Run an allreduce of `inputs[rank]` on every rank and return each rank's
/// full destination buffer.
async fn all_reduce_of<T: Element + PartialEq + std::fmt::Debug>(
    inputs: Vec<Vec<T>>,
    op: ReduceOp,
) -> Vec<Vec<T>> {
    let world = inputs.len() as u32;
    let count = inputs[0].len();
    let inputs = std::sync::Arc::new(inputs);
    run_collective(world, move |peer| {
        let inputs = std::sync::Arc::clone(&inputs);
        async move {
            let src = DeviceBuffer::from_slice(peer.device(), &inputs[peer.rank() as usize]).unwrap();
            let dst = DeviceBuffer::<T>::zeroed(peer.device(), world as usize * count).unwrap();
            peer.comm
                .all_reduce(&peer.stream, &src, &dst, count, op)
                .unwrap()
                .wait()
                .await
                .unwrap();
            dst.to_vec().unwrap()
        }
    })
    .await
}

#[tokio::test(flavor = "multi_thread")]
async fn test_allreduce_3_devices_sum() {
    let results = all_reduce_of(vec![vec![10i32], vec![20], vec![30]], ReduceOp::Sum).await;
    for (rank, data) in results.iter().enumerate() {
        assert_eq!(data[rank], 60, "rank {rank} allreduce failed");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_allreduce_keeps_gathered_slices() {
    let results = all_reduce_of(vec![vec![1u64, 2], vec![3, 4]], ReduceOp::Sum).await;
    assert_eq!(results[0], vec![4, 6, 3, 4]);
    assert_eq!(results[1], vec![1, 2, 4, 6]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_allreduce_ops() {
    let inputs = vec![vec![3i32, -2, 7], vec![5, 4, -1], vec![2, 6, 0], vec![-4, 1, 9]];
    let cases = [
        (ReduceOp::Sum, [6, 9, 15]),
        (ReduceOp::Prod, [-120, -48, 0]),
        (ReduceOp::Min, [-4, -2, -1]),
        (ReduceOp::Max, [5, 6, 9]),
    ];
    for (op, expected) in cases {
        let results = all_reduce_of(inputs.clone(), op).await;
        for (rank, data) in results.iter().enumerate() {
            assert_eq!(&data[rank * 3..rank * 3 + 3], &expected, "{op} at rank {rank}");
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_allreduce_element_types() {
    let results = all_reduce_of(vec![vec![200u8; 20], vec![100u8; 20]], ReduceOp::Sum).await;
    // u8 sums wrap.
    assert!(results[1][20..].iter().all(|&v| v == 44));

    let results = all_reduce_of(vec![vec![-3i8; 5], vec![2; 5], vec![1; 5]], ReduceOp::Max).await;
    assert!(results[2][10..].iter().all(|&v| v == 2));

    let results = all_reduce_of(vec![vec![1.5f64; 9], vec![-2.0; 9]], ReduceOp::Prod).await;
    assert!(results[0][..9].iter().all(|&v| v == -3.0));

    let results = all_reduce_of(vec![vec![u32::MAX; 3], vec![7; 3]], ReduceOp::Min).await;
    assert_eq!(&results[1][3..], &[7, 7, 7]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_allreduce_float_results_identical_on_every_rank() {
    // Values whose sum depends on association order.
    let base = [1.0e8f32, 1.0, -1.0e8, 0.1, 3.3e-3, 7.77];
    let inputs: Vec<Vec<f32>> = (0..6)
        .map(|r| (0..40).map(|i| base[(r + i) % base.len()] * (1.0 + i as f32 * 0.01)).collect())
        .collect();
    let mut expected = inputs[0].clone();
    for input in &inputs[1..] {
        for (acc, v) in expected.iter_mut().zip(input) {
            *acc += v;
        }
    }

    let results = all_reduce_of(inputs, ReduceOp::Sum).await;
    for (rank, data) in results.iter().enumerate() {
        let own = &data[rank * 40..(rank + 1) * 40];
        let bits: Vec<u32> = own.iter().map(|v| v.to_bits()).collect();
        let want: Vec<u32> = expected.iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits, want, "rank {rank} diverged");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_allreduce_after_allgather_on_same_communicators() {
    let peers = clique(3);
    let results = run_on(&peers, |peer| async move {
        let r = peer.rank() as i32;
        let src = DeviceBuffer::from_slice(peer.device(), &[r + 1; 17]).unwrap();
        let gathered = DeviceBuffer::<i32>::zeroed(peer.device(), 51).unwrap();
        let reduced = DeviceBuffer::<i32>::zeroed(peer.device(), 51).unwrap();
        let g = peer.comm.all_gather(&peer.stream, &src, &gathered, 17).unwrap();
        let a = peer.comm
            .all_reduce(&peer.stream, &src, &reduced, 17, ReduceOp::Sum)
            .unwrap();
        g.wait().await.unwrap();
        a.wait().await.unwrap();
        (gathered.to_vec().unwrap(), reduced.to_vec().unwrap())
    })
    .await;

    for (rank, (gathered, reduced)) in results.iter().enumerate() {
        assert_eq!(gathered[..17], [1; 17]);
        assert_eq!(gathered[34..], [3; 17]);
        assert!(reduced[rank * 17..(rank + 1) * 17].iter().all(|&v| v == 6));
    }
}
