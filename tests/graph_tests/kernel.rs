use crate::graph_tests::test_eq_f32;
use whisper_graph::backends::eval_backend::EvalBackend;
use whisper_graph::numeric_tensor::NumericTensor;
use whisper_graph::kernel::{
    BinaryOp, BinaryReduce, CopyReduce, KernelError, KernelGraph, Reducer, RowMaps, TargetCode,
};

/// Sources 0 and 1 feed destination 0, source 2 feeds destination 1,
/// destination 2 has no in-edges.
fn small_graph() -> KernelGraph {
    KernelGraph::new(vec![0, 1, 2], vec![0, 0, 1], 3, 3).unwrap()
}

fn column(values: Vec<f32>) -> NumericTensor {
    let rows = values.len();
    NumericTensor::from_vec_shape(values, &[rows, 1]).unwrap()
}

pub fn test_copy_reduce_mean_is_sum_over_clamped_degree(backend: &mut EvalBackend) {
    let graph = small_graph();
    let x = column(vec![1.0, 2.0, 4.0]);
    let maps = RowMaps::default();
    let (summed, _) =
        CopyReduce::forward(Reducer::Sum, &graph, TargetCode::Src, &x, 3, &maps, backend).unwrap();
    let (averaged, state) =
        CopyReduce::forward(Reducer::Mean, &graph, TargetCode::Src, &x, 3, &maps, backend).unwrap();
    test_eq_f32(&summed, &column(vec![3.0, 4.0, 0.0]));
    test_eq_f32(&averaged, &column(vec![1.5, 4.0, 0.0]));

    let grad = CopyReduce::backward(&state, &column(vec![1.0, 1.0, 1.0]), backend).unwrap();
    test_eq_f32(&grad, &column(vec![0.5, 0.5, 1.0]));
}

pub fn test_copy_reduce_max_routes_gradient_to_winner(backend: &mut EvalBackend) {
    let graph = small_graph();
    let x = column(vec![1.0, 2.0, 4.0]);
    let (out, state) = CopyReduce::forward(
        Reducer::Max,
        &graph,
        TargetCode::Src,
        &x,
        3,
        &RowMaps::default(),
        backend,
    )
    .unwrap();
    test_eq_f32(&out, &column(vec![2.0, 4.0, 0.0]));
    let grad = CopyReduce::backward(&state, &column(vec![1.0, 1.0, 1.0]), backend).unwrap();
    test_eq_f32(&grad, &column(vec![0.0, 1.0, 1.0]));
}

pub fn test_binary_reduce_mul_gradients(backend: &mut EvalBackend) {
    let graph = small_graph();
    let x = column(vec![1.0, 2.0, 4.0]);
    let w = column(vec![10.0, 20.0, 30.0]);
    let (out, state) = BinaryReduce::forward(
        Reducer::Sum,
        BinaryOp::Mul,
        &graph,
        TargetCode::Src,
        TargetCode::Edge,
        &x,
        &w,
        3,
        &RowMaps::default(),
        backend,
    )
    .unwrap();
    test_eq_f32(&out, &column(vec![50.0, 120.0, 0.0]));

    let ones = column(vec![1.0, 1.0, 1.0]);
    let (grad_x, grad_w) = BinaryReduce::backward(&state, &ones, [true, true], backend).unwrap();
    test_eq_f32(&grad_x.unwrap(), &column(vec![10.0, 20.0, 30.0]));
    test_eq_f32(&grad_w.unwrap(), &column(vec![1.0, 2.0, 4.0]));

    let (grad_x, grad_w) = BinaryReduce::backward(&state, &ones, [false, true], backend).unwrap();
    assert!(grad_x.is_none());
    assert!(grad_w.is_some());
    assert!(BinaryReduce::backward(&state, &column(vec![1.0]), [true, false], backend).is_err());
}

pub fn test_binary_reduce_dot_without_reduction(backend: &mut EvalBackend) {
    let graph = small_graph();
    let x = NumericTensor::from_vec_shape(vec![1f32, 0.0, 0.0, 1.0, 1.0, 1.0], &[3, 2]).unwrap();
    let (out, _) = BinaryReduce::forward(
        Reducer::None,
        BinaryOp::Dot,
        &graph,
        TargetCode::Src,
        TargetCode::Dst,
        &x,
        &x,
        3,
        &RowMaps::default(),
        backend,
    )
    .unwrap();
    // one row per edge: <x0, x0>, <x1, x0>, <x2, x1>
    test_eq_f32(&out, &NumericTensor::from_vec(vec![1f32, 0.0, 1.0]));
}

pub fn test_row_maps_skip_unmapped_rows(backend: &mut EvalBackend) {
    let graph = small_graph();
    // only sources 1 and 2 are present, stored compactly
    let x = column(vec![2.0, 4.0]);
    let maps = RowMaps {
        lhs: Some(RowMaps::compact(&[1, 2], 3).unwrap()),
        ..RowMaps::default()
    };
    let (out, _) =
        CopyReduce::forward(Reducer::Sum, &graph, TargetCode::Src, &x, 3, &maps, backend).unwrap();
    test_eq_f32(&out, &column(vec![2.0, 4.0, 0.0]));
}

pub fn test_row_map_rejects_ids_past_its_length(_backend: &mut EvalBackend) {
    let err = RowMaps::compact(&[0, 3], 3).unwrap_err();
    assert!(matches!(err, KernelError::MapIdOutOfRange { id: 3, len: 3 }));
    assert_eq!(RowMaps::compact(&[2, 0], 3).unwrap().as_slice(), &[1, -1, 0]);
}

pub fn test_integer_features_are_rejected(backend: &mut EvalBackend) {
    let graph = small_graph();
    let x = NumericTensor::from_vec_shape(vec![1i64, 2, 3], &[3, 1]).unwrap();
    assert!(
        CopyReduce::forward(Reducer::Sum, &graph, TargetCode::Src, &x, 3, &RowMaps::default(), backend)
            .is_err()
    );
    assert!(KernelGraph::new(vec![0, 1], vec![0], 2, 2).is_err());
}
