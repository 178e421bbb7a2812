use crate::graph_tests::{features, rows_f32, star_graph};
use whisper_graph::backends::eval_backend::EvalBackend;
use whisper_graph::function::{copy_src, sum};

pub fn test_local_var_isolates_field_changes(backend: &mut EvalBackend) {
    let g = star_graph(backend);
    g.set_ndata("h", rows_f32(10, 1, |i| i as f32), None).unwrap();
    g.set_edata("w", rows_f32(17, 1, |_| 1.0), None).unwrap();

    let local = g.local_var();
    assert!(local.ndata("h", None).unwrap().ptr_eq(&g.ndata("h", None).unwrap()));

    local.set_ndata("tmp", rows_f32(10, 1, |_| 0.0), None).unwrap();
    local.pop_e_repr("w", None).unwrap();
    local
        .update_all(&copy_src("h", "m").into(), &sum("m", "h").into(), None, None)
        .unwrap();

    assert!(!g.has_ndata("tmp", None).unwrap());
    assert!(g.has_edata("w", None).unwrap());
    assert_eq!(g.ndata("h", None).unwrap().to_vec::<f32>().unwrap()[9], 9.0);
    assert_eq!(local.ndata("h", None).unwrap().to_vec::<f32>().unwrap()[9], 36.0);
}

pub fn test_local_scope_row_updates_do_not_leak(backend: &mut EvalBackend) {
    let g = star_graph(backend);
    g.set_ndata("h", rows_f32(10, 1, |i| i as f32), None).unwrap();
    let before = g.ndata("h", None).unwrap();

    let seen = g.local_scope(|local| {
        local
            .set_n_repr(&features(&[("h", rows_f32(1, 1, |_| -1.0))]), [3], None)
            .unwrap();
        local.ndata("h", None).unwrap().to_vec::<f32>().unwrap()[3]
    });

    assert_eq!(seen, -1.0);
    assert!(g.ndata("h", None).unwrap().ptr_eq(&before));
    assert_eq!(g.ndata("h", None).unwrap().to_vec::<f32>().unwrap()[3], 3.0);
}
