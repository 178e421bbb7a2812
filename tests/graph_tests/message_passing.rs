use crate::graph_tests::{init_logger, rows_f32, star_graph, test_eq_f32};
use std::cell::RefCell;
use std::rc::Rc;
use whisper_graph::backends::eval_backend::EvalBackend;
use whisper_graph::backends::ndarray_backend::ReduceOp;
use whisper_graph::dtype::DType;
use whisper_graph::frame::FeatureMap;
use whisper_graph::function::{
    EdgeFn, MessageFunc, NodeFn, ReduceFunc, copy_src, mean, src_add_dst, src_mul_edge, sum,
};
use whisper_graph::heterograph::HeteroGraph;
use whisper_graph::numeric_tensor::NumericTensor;
use whisper_graph::scheduler::OpNameRecorder;
use whisper_graph::selection::{EdgeSelection, GroupBy, Selection};

fn copy_h() -> MessageFunc {
    copy_src("h", "m").into()
}

fn sum_h() -> ReduceFunc {
    sum("m", "h").into()
}

fn udf_copy_h() -> MessageFunc {
    MessageFunc::udf(|edges| Ok(FeatureMap::from([("m".to_string(), edges.src("h")?.clone())])))
}

fn udf_sum_h() -> ReduceFunc {
    ReduceFunc::udf(|nodes| {
        let summed = nodes.mailbox("m")?.reduce(ReduceOp::Sum, 1, nodes.backend())?;
        Ok(FeatureMap::from([("h".to_string(), summed)]))
    })
}

fn double_h() -> NodeFn {
    NodeFn::new(|nodes| {
        let doubled = nodes.data("h")?.scale(2.0, nodes.backend())?;
        Ok(FeatureMap::from([("h".to_string(), doubled)]))
    })
}

fn record(g: &mut HeteroGraph) -> Rc<RefCell<OpNameRecorder>> {
    let recorder = Rc::new(RefCell::new(OpNameRecorder::default()));
    g.set_program_observer(recorder.clone());
    recorder
}

fn h_of(g: &HeteroGraph) -> Vec<f32> {
    g.ndata("h", None).unwrap().to_vec::<f32>().unwrap()
}

pub fn test_update_all_builtin(backend: &mut EvalBackend) {
    init_logger();
    let mut g = star_graph(backend);
    let recorder = record(&mut g);
    g.set_ndata("h", rows_f32(10, 2, |i| i as f32), None).unwrap();
    g.update_all(&copy_h(), &sum_h(), None, None).unwrap();

    let mut expected = vec![0f32; 20];
    expected[0] = 9.0;
    expected[1] = 9.0;
    expected[18] = 36.0;
    expected[19] = 36.0;
    test_eq_f32(
        &g.ndata("h", None).unwrap(),
        &NumericTensor::from_vec_shape(expected, &[10, 2]).unwrap(),
    );
    let recorded = recorder.borrow();
    let names = &recorded.names;
    assert!(names.iter().any(|n| n == "KernelReduce(sum)"), "{names:?}");
    assert!(!names.iter().any(|n| n == "DegreeBucketReduce"), "{names:?}");
}

pub fn test_update_all_udf_matches_builtin(backend: &mut EvalBackend) {
    let builtin = star_graph(backend);
    let mut udf = star_graph(backend);
    let recorder = record(&mut udf);
    for g in [&builtin, &udf] {
        g.set_ndata("h", rows_f32(10, 3, |i| (i * i) as f32 - 2.5), None).unwrap();
    }
    builtin.update_all(&copy_h(), &sum_h(), None, None).unwrap();
    udf.update_all(&udf_copy_h(), &udf_sum_h(), None, None).unwrap();

    test_eq_f32(&udf.ndata("h", None).unwrap(), &builtin.ndata("h", None).unwrap());
    let recorded = recorder.borrow();
    let names = &recorded.names;
    assert!(names.iter().any(|n| n == "EdgeUdf"), "{names:?}");
    assert!(names.iter().any(|n| n == "DegreeBucketReduce"), "{names:?}");
}

pub fn test_recv_matches_pull(backend: &mut EvalBackend) {
    let staged = star_graph(backend);
    let pulled = star_graph(backend);
    for g in [&staged, &pulled] {
        g.set_ndata("h", rows_f32(10, 2, |i| i as f32 + 0.5), None).unwrap();
    }
    staged.send(EdgeSelection::All, &copy_h(), None).unwrap();
    staged.recv(Selection::All, &udf_sum_h(), None, None).unwrap();
    pulled.pull(Selection::All, &copy_h(), &udf_sum_h(), None, None).unwrap();
    test_eq_f32(&staged.ndata("h", None).unwrap(), &pulled.ndata("h", None).unwrap());
}

pub fn test_recv_fills_nodes_without_messages(backend: &mut EvalBackend) {
    let g = star_graph(backend);
    g.set_ndata("h", rows_f32(10, 1, |i| i as f32 + 1.0), None).unwrap();
    // edge 1 runs 1 -> 9
    g.send(vec![1], &copy_h(), None).unwrap();
    g.recv([0, 9], &sum_h(), Some(&double_h()), None).unwrap();
    assert_eq!(
        h_of(&g),
        vec![2.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 4.0]
    );

    // messages are consumed by the first recv
    g.recv([9], &sum_h(), None, None).unwrap();
    assert_eq!(h_of(&g)[9], 4.0);
}

pub fn test_resend_overwrites_pending_messages(backend: &mut EvalBackend) {
    let g = star_graph(backend);
    g.set_ndata("h", rows_f32(10, 1, |i| i as f32 + 1.0), None).unwrap();
    // edge 0 runs 0 -> 1, edge 1 runs 1 -> 9
    g.send(vec![0], &copy_h(), None).unwrap();
    g.set_ndata("h", rows_f32(10, 1, |i| 10.0 * (i as f32 + 1.0)), None).unwrap();
    g.send(vec![0, 1], &copy_h(), None).unwrap();
    g.recv([1, 9], &sum_h(), None, None).unwrap();
    let h = h_of(&g);
    assert_eq!(h[1], 10.0);
    assert_eq!(h[9], 20.0);
}

pub fn test_update_all_may_change_field_width(backend: &mut EvalBackend) {
    let g = star_graph(backend);
    g.set_ndata("h", rows_f32(10, 2, |i| i as f32), None).unwrap();
    let widen = NodeFn::new(|nodes| {
        let ones = NumericTensor::ones(&[nodes.len(), 1], DType::F32);
        let widened = NumericTensor::concat(&[nodes.data("h")?.clone(), ones], 1)?;
        Ok(FeatureMap::from([("h".to_string(), widened)]))
    });
    g.update_all(&copy_h(), &sum_h(), Some(&widen), None).unwrap();
    let h = g.ndata("h", None).unwrap();
    assert_eq!(h.shape(), &[10, 3]);
    let values = h.to_vec::<f32>().unwrap();
    assert_eq!(&values[0..3], &[9.0, 9.0, 1.0]);
    assert_eq!(&values[27..30], &[36.0, 36.0, 1.0]);

    // the reduce alone may rewrite the field with a new width too
    g.set_ndata("x", rows_f32(10, 4, |_| 1.0), None).unwrap();
    g.update_all(&copy_src("x", "m").into(), &sum_h(), None, None).unwrap();
    let h = g.ndata("h", None).unwrap();
    assert_eq!(h.shape(), &[10, 4]);
    assert_eq!(&h.to_vec::<f32>().unwrap()[36..40], &[8.0; 4]);
}

pub fn test_identity_apply_changes_nothing(backend: &mut EvalBackend) {
    let plain = star_graph(backend);
    let applied = star_graph(backend);
    for g in [&plain, &applied] {
        g.set_ndata("h", rows_f32(10, 2, |i| i as f32), None).unwrap();
    }
    let identity = NodeFn::new(|nodes| Ok(nodes.all_data().clone()));
    plain.update_all(&copy_h(), &sum_h(), None, None).unwrap();
    applied
        .update_all(&copy_h(), &sum_h(), Some(&identity), None)
        .unwrap();
    test_eq_f32(&applied.ndata("h", None).unwrap(), &plain.ndata("h", None).unwrap());
}

pub fn test_empty_selection_is_noop(backend: &mut EvalBackend) {
    let mut g = star_graph(backend);
    let recorder = record(&mut g);
    g.set_ndata("h", rows_f32(10, 2, |i| i as f32), None).unwrap();
    let before = g.ndata("h", None).unwrap();

    g.send(Vec::<u64>::new(), &copy_h(), None).unwrap();
    g.recv(Vec::<u64>::new(), &sum_h(), Some(&double_h()), None).unwrap();
    g.pull(Vec::<u64>::new(), &copy_h(), &sum_h(), None, None).unwrap();
    g.push(Vec::<u64>::new(), &copy_h(), &sum_h(), None, None).unwrap();
    g.send_and_recv(Vec::<u64>::new(), &copy_h(), &sum_h(), None, None)
        .unwrap();
    g.apply_nodes(&double_h(), Vec::<u64>::new(), None).unwrap();

    assert!(g.ndata("h", None).unwrap().ptr_eq(&before));
    assert!(recorder.borrow().names.is_empty());
}

pub fn test_send_and_recv_and_push(backend: &mut EvalBackend) {
    let g = star_graph(backend);
    g.set_ndata("h", rows_f32(10, 1, |i| i as f32 + 1.0), None).unwrap();
    // edges 0 and 2 run 0 -> 1 and 0 -> 2
    g.send_and_recv(vec![0, 2], &copy_h(), &sum_h(), None, None).unwrap();
    assert_eq!(h_of(&g)[..4], [1.0, 1.0, 1.0, 4.0]);

    g.push([9], &copy_h(), &sum_h(), None, None).unwrap();
    assert_eq!(h_of(&g)[0], 10.0);
    assert_eq!(h_of(&g)[9], 10.0);
}

pub fn test_mean_and_binary_messages(backend: &mut EvalBackend) {
    let g = star_graph(backend);
    g.set_ndata("h", rows_f32(10, 1, |i| i as f32), None).unwrap();
    g.set_edata("w", rows_f32(17, 1, |_| 2.0), None).unwrap();

    g.update_all(&copy_h(), &mean("m", "avg").into(), None, None).unwrap();
    let avg = g.ndata("avg", None).unwrap().to_vec::<f32>().unwrap();
    assert_eq!(avg[9], 4.5);
    assert_eq!(avg[0], 9.0);

    g.update_all(&src_mul_edge("h", "w", "m").into(), &sum("m", "weighted").into(), None, None)
        .unwrap();
    let weighted = g.ndata("weighted", None).unwrap().to_vec::<f32>().unwrap();
    assert_eq!(weighted[9], 72.0);
    assert_eq!(weighted[1], 0.0);
}

pub fn test_apply_nodes_and_edges(backend: &mut EvalBackend) {
    let g = star_graph(backend);
    g.set_ndata("h", rows_f32(10, 1, |i| i as f32), None).unwrap();
    g.apply_nodes(&double_h(), [1, 2], None).unwrap();
    assert_eq!(h_of(&g)[..4], [0.0, 2.0, 4.0, 3.0]);

    g.apply_edges(&src_add_dst("h", "h", "s").into(), EdgeSelection::All, None)
        .unwrap();
    let s = g.edata("s", None).unwrap().to_vec::<f32>().unwrap();
    // edge 1 runs 1 -> 9, edge 16 runs 9 -> 0
    assert_eq!(s[1], 11.0);
    assert_eq!(s[16], 9.0);
}

pub fn test_udf_row_count_is_checked(backend: &mut EvalBackend) {
    let g = star_graph(backend);
    g.set_ndata("h", rows_f32(10, 1, |i| i as f32), None).unwrap();
    let short = MessageFunc::udf(|_| Ok(FeatureMap::from([("m".to_string(), rows_f32(1, 1, |_| 0.0))])));
    let err = g.update_all(&short, &sum_h(), None, None).unwrap_err();
    assert!(err.is_shape_mismatch(), "{err}");
}

pub fn test_group_apply_edges(backend: &mut EvalBackend) {
    let g = star_graph(backend);
    g.set_edata("x", rows_f32(17, 1, |_| 1.0), None).unwrap();
    let normalize = EdgeFn::new(|edges| {
        let x = edges.data("x")?;
        let total = x.reduce(ReduceOp::Sum, 1, edges.backend())?.unsqueeze(1)?;
        Ok(FeatureMap::from([(
            "share".to_string(),
            NumericTensor::div(x, &total, edges.backend())?,
        )]))
    });
    g.group_apply_edges(GroupBy::Src, &normalize, None).unwrap();
    let share = g.edata("share", None).unwrap().to_vec::<f32>().unwrap();
    // edges out of 0 are the even ids below 16
    for e in (0..16).step_by(2) {
        assert_eq!(share[e], 0.125);
    }
    for e in (1..17).step_by(2) {
        assert_eq!(share[e], 1.0);
    }
    assert_eq!(share[16], 1.0);
}

pub fn test_filter_nodes_and_edges(backend: &mut EvalBackend) {
    let g = star_graph(backend);
    g.set_ndata("h", rows_f32(10, 1, |i| i as f32), None).unwrap();
    let large = g
        .filter_nodes(
            |nodes| {
                let mask: Vec<u8> = nodes.data("h")?.to_f64_vec().iter().map(|h| (*h > 4.0) as u8).collect();
                Ok(NumericTensor::from_vec(mask))
            },
            Selection::All,
            None,
        )
        .unwrap();
    assert_eq!(large, vec![5, 6, 7, 8, 9]);

    let subset = g
        .filter_nodes(
            |nodes| Ok(NumericTensor::from_vec(nodes.nodes().iter().map(|n| (n % 2) as u8).collect::<Vec<_>>())),
            [2, 3, 5],
            None,
        )
        .unwrap();
    assert_eq!(subset, vec![3, 5]);

    let err = g
        .filter_nodes(|_| Ok(NumericTensor::from_vec(vec![1u8; 3])), Selection::All, None)
        .unwrap_err();
    assert!(err.is_shape_mismatch(), "{err}");

    let from_hub = g
        .filter_edges(
            |edges| Ok(NumericTensor::from_vec(edges.edges().0.iter().map(|u| (*u == 0) as u8).collect::<Vec<_>>())),
            EdgeSelection::All,
            None,
        )
        .unwrap();
    assert_eq!(from_hub, vec![0, 2, 4, 6, 8, 10, 12, 14]);
}

pub fn test_prop_nodes_and_edges(backend: &mut EvalBackend) {
    let g = star_graph(backend);
    g.set_ndata("h", rows_f32(10, 1, |i| i as f32 + 1.0), None).unwrap();
    g.prop_nodes(vec![vec![1u64, 2], vec![9]], &copy_h(), &sum_h(), None, None)
        .unwrap();
    let h = h_of(&g);
    assert_eq!(h[1], 1.0);
    assert_eq!(h[2], 1.0);
    assert_eq!(h[9], 41.0);

    let g = star_graph(backend);
    g.set_ndata("h", rows_f32(10, 1, |i| i as f32 + 1.0), None).unwrap();
    // edge 0 runs 0 -> 1, edge 1 runs 1 -> 9: the second step sees the first
    g.prop_edges(vec![vec![0u64], vec![1]], &copy_h(), &sum_h(), None, None)
        .unwrap();
    let h = h_of(&g);
    assert_eq!(h[1], 1.0);
    assert_eq!(h[9], 1.0);
}

pub fn test_fused_matches_udf_on_random_graph(backend: &mut EvalBackend) {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use whisper_graph::heterograph::{DEFAULT_ETYPE, DEFAULT_NTYPE, HeteroGraphBuilder};

    let mut rng = StdRng::seed_from_u64(17);
    let (n, m) = (20u64, 60);
    let src: Vec<u64> = (0..m).map(|_| rng.gen_range(0..n)).collect();
    let dst: Vec<u64> = (0..m).map(|_| rng.gen_range(0..n)).collect();
    let h: Vec<f32> = (0..n * 4).map(|_| rng.r#gen::<f32>()).collect();
    let build = || {
        let g = HeteroGraphBuilder::new()
            .node_type(DEFAULT_NTYPE, n)
            .relation((DEFAULT_NTYPE, DEFAULT_ETYPE, DEFAULT_NTYPE), src.clone(), dst.clone())
            .config(crate::graph_tests::config_for(backend))
            .build()
            .unwrap();
        g.set_ndata("h", NumericTensor::from_vec_shape(h.clone(), &[n as usize, 4]).unwrap(), None)
            .unwrap();
        g
    };
    let fused = build();
    let unfused = build();
    fused.update_all(&copy_h(), &sum_h(), None, None).unwrap();
    unfused.update_all(&udf_copy_h(), &udf_sum_h(), None, None).unwrap();
    test_eq_f32(&unfused.ndata("h", None).unwrap(), &fused.ndata("h", None).unwrap());
}
