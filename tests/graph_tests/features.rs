use crate::graph_tests::{config_for, features, rows_f32, star_graph, test_eq_f32};
use whisper_graph::backends::eval_backend::EvalBackend;
use whisper_graph::dtype::DType;
use whisper_graph::frame::{Scheme, constant_initializer, zero_initializer};
use whisper_graph::heterograph::{DEFAULT_ETYPE, DEFAULT_NTYPE, HeteroGraphBuilder};
use whisper_graph::numeric_tensor::NumericTensor;
use whisper_graph::selection::Selection;

pub fn test_node_features_round_trip(backend: &mut EvalBackend) {
    let g = star_graph(backend);
    g.set_ndata("h", rows_f32(10, 2, |i| i as f32), None).unwrap();
    assert!(g.has_ndata("h", None).unwrap());
    assert_eq!(
        g.node_attr_schemes(None).unwrap(),
        vec![(
            "h".to_string(),
            Scheme {
                shape: vec![2],
                dtype: DType::F32
            }
        )]
    );

    let picked = g.get_n_repr([3, 1], None).unwrap();
    test_eq_f32(
        &picked["h"],
        &NumericTensor::from_vec_shape(vec![3f32, 3.0, 1.0, 1.0], &[2, 2]).unwrap(),
    );

    g.set_n_repr(&features(&[("h", rows_f32(1, 2, |_| 100.0))]), [0], None)
        .unwrap();
    let h = g.ndata("h", None).unwrap().to_vec::<f32>().unwrap();
    assert_eq!(&h[..4], &[100.0, 100.0, 1.0, 1.0]);

    assert!(g.get_n_repr(Vec::<u64>::new(), None).unwrap().is_empty());
    let popped = g.pop_n_repr("h", None).unwrap();
    assert_eq!(popped.shape(), &[10, 2]);
    assert!(!g.has_ndata("h", None).unwrap());
    assert!(g.ndata("h", None).is_err());
}

pub fn test_set_n_repr_is_atomic(backend: &mut EvalBackend) {
    let g = star_graph(backend);
    let bad = features(&[("a", rows_f32(10, 1, |_| 1.0)), ("b", rows_f32(3, 1, |_| 1.0))]);
    let err = g.set_n_repr(&bad, Selection::All, None).unwrap_err();
    assert!(err.is_shape_mismatch(), "{err}");
    assert!(!g.has_ndata("a", None).unwrap());
    assert!(!g.has_ndata("b", None).unwrap());

    g.set_ndata("h", rows_f32(10, 2, |_| 1.0), None).unwrap();
    // rows must keep the column's row shape
    assert!(g.set_n_repr(&features(&[("h", rows_f32(1, 3, |_| 0.0))]), [0], None).is_err());
    assert!(g.set_ndata("h", NumericTensor::from_vec(vec![1f32; 9]), None).is_err());
    assert!(g.set_n_repr(&features(&[("h", rows_f32(1, 2, |_| 0.0))]), [10], None).is_err());
}

pub fn test_initializers_fill_unwritten_rows(backend: &mut EvalBackend) {
    let g = star_graph(backend);
    g.set_n_initializer(constant_initializer(5.0), None, None).unwrap();
    g.set_n_initializer(zero_initializer(), Some("y"), None).unwrap();

    g.set_n_repr(&features(&[("x", rows_f32(2, 1, |_| 1.0))]), [0, 1], None)
        .unwrap();
    g.set_n_repr(&features(&[("y", rows_f32(1, 1, |_| 7.0))]), [3], None)
        .unwrap();

    let x = g.ndata("x", None).unwrap().to_vec::<f32>().unwrap();
    assert_eq!(&x[..3], &[1.0, 1.0, 5.0]);
    assert!(x[2..].iter().all(|v| *v == 5.0));
    let y = g.ndata("y", None).unwrap().to_vec::<f32>().unwrap();
    assert_eq!(y, vec![0.0, 0.0, 0.0, 7.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
}

pub fn test_missing_initializer_without_zero_fill(backend: &mut EvalBackend) {
    let mut config = config_for(backend);
    config.zero_fill_missing_fields = false;
    let g = HeteroGraphBuilder::new()
        .node_type(DEFAULT_NTYPE, 3)
        .relation((DEFAULT_NTYPE, DEFAULT_ETYPE, DEFAULT_NTYPE), vec![0], vec![1])
        .config(config)
        .build()
        .unwrap();
    assert!(g.set_n_repr(&features(&[("z", rows_f32(1, 1, |_| 1.0))]), [0], None).is_err());
    g.set_n_repr(&features(&[("z", rows_f32(3, 1, |_| 1.0))]), Selection::All, None)
        .unwrap();
}

pub fn test_edge_features(backend: &mut EvalBackend) {
    let g = star_graph(backend);
    g.set_edata("w", rows_f32(17, 1, |e| e as f32), None).unwrap();
    let by_pair = g.get_e_repr((9u64, 0u64), None).unwrap();
    assert_eq!(by_pair["w"].to_vec::<f32>().unwrap(), vec![16.0]);
    let by_id = g.get_e_repr(vec![2, 0], None).unwrap();
    assert_eq!(by_id["w"].to_vec::<f32>().unwrap(), vec![2.0, 0.0]);

    g.set_e_repr(&features(&[("w", rows_f32(1, 1, |_| -1.0))]), (0u64, 1u64), None)
        .unwrap();
    assert_eq!(g.edata("w", None).unwrap().to_vec::<f32>().unwrap()[0], -1.0);
    assert!(g.get_e_repr(vec![17], None).is_err());

    let w = g.pop_e_repr("w", None).unwrap();
    assert_eq!(w.shape(), &[17, 1]);
    assert!(!g.has_edata("w", None).unwrap());
}
