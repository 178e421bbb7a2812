use whisper_graph::backends::eval_backend::EvalBackend;
use whisper_graph::config::GraphConfig;
use whisper_graph::dtype::DType;
use whisper_graph::frame::FeatureMap;
use whisper_graph::heterograph::{DEFAULT_ETYPE, DEFAULT_NTYPE, HeteroGraph, HeteroGraphBuilder};
use whisper_graph::numeric_tensor::NumericTensor;

pub mod basics;
pub mod features;
pub mod hetero;
pub mod kernel;
pub mod message_passing;
pub mod scope;

fn test_eq(value: &NumericTensor, correct: &NumericTensor, atol: f64, rtol: f64) {
    assert_eq!(value.shape(), correct.shape());
    let value_vec = value.to_f64_vec();
    let correct_vec = correct.to_f64_vec();
    for i in 0..value_vec.len() {
        let a = value_vec[i];
        let b = correct_vec[i];
        let err = (a - b).abs();
        let limit = atol + rtol * (a.abs().max(b.abs()));
        assert!(err <= limit, "{a} != {b} at {i}: {err} > {limit}");
    }
}

fn test_eq_f32(value: &NumericTensor, correct: &NumericTensor) {
    assert_eq!(value.dtype(), DType::F32);
    assert_eq!(correct.dtype(), DType::F32);
    test_eq(value, correct, 1e-5, 1.3e-6);
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn config_for(backend: &EvalBackend) -> GraphConfig {
    GraphConfig {
        backend: *backend,
        ..GraphConfig::default()
    }
}

/// `rows x width` f32 tensor whose row `i` is filled with `f(i)`.
fn rows_f32(rows: usize, width: usize, f: impl Fn(usize) -> f32) -> NumericTensor {
    let data = (0..rows)
        .flat_map(|i| std::iter::repeat_n(f(i), width))
        .collect::<Vec<f32>>();
    NumericTensor::from_vec_shape(data, &[rows, width]).unwrap()
}

fn features(entries: &[(&str, NumericTensor)]) -> FeatureMap {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Ten nodes: 0 fans out to 1..=8, each of those feeds 9, and 9 points back at 0.
/// Edges are listed as (0,1), (1,9), (0,2), (2,9), ..., (0,8), (8,9), (9,0).
fn star_graph(backend: &EvalBackend) -> HeteroGraph {
    let mut src = vec![];
    let mut dst = vec![];
    for i in 1..=8 {
        src.extend([0, i]);
        dst.extend([i, 9]);
    }
    src.push(9);
    dst.push(0);
    HeteroGraphBuilder::new()
        .node_type(DEFAULT_NTYPE, 10)
        .relation((DEFAULT_NTYPE, DEFAULT_ETYPE, DEFAULT_NTYPE), src, dst)
        .config(config_for(backend))
        .build()
        .unwrap()
}

/// Three users and two games. Relations in order:
/// `(user, follows, user)`: 0->1, 1->2
/// `(user, follows, game)`: 0->0, 2->1
/// `(user, plays, game)`: 0->0, 1->0, 2->1
fn user_game_graph(backend: &EvalBackend) -> HeteroGraph {
    HeteroGraphBuilder::new()
        .node_type("user", 3)
        .node_type("game", 2)
        .relation(("user", "follows", "user"), vec![0, 1], vec![1, 2])
        .relation(("user", "follows", "game"), vec![0, 2], vec![0, 1])
        .relation(("user", "plays", "game"), vec![0, 1, 2], vec![0, 0, 1])
        .config(config_for(backend))
        .build()
        .unwrap()
}

/// Four nodes with two parallel 0->1 edges.
fn multigraph(backend: &EvalBackend) -> HeteroGraph {
    HeteroGraphBuilder::new()
        .node_type(DEFAULT_NTYPE, 4)
        .relation(
            (DEFAULT_NTYPE, DEFAULT_ETYPE, DEFAULT_NTYPE),
            vec![0, 0, 1, 2],
            vec![1, 1, 2, 3],
        )
        .config(config_for(backend))
        .build()
        .unwrap()
}
