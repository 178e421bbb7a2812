use crate::graph_tests::{multigraph, star_graph, test_eq_f32};
use whisper_graph::backends::eval_backend::EvalBackend;
use whisper_graph::error::GraphError;
use whisper_graph::heterograph::Edges;
use whisper_graph::numeric_tensor::NumericTensor;
use whisper_graph::selection::{parse_form, EdgeForm, EdgeOrder, IncidenceKind, Selection};

fn sorted(mut v: Vec<u64>) -> Vec<u64> {
    v.sort_unstable();
    v
}

pub fn test_structure_queries(backend: &mut EvalBackend) {
    let g = star_graph(backend);
    assert_eq!(g.number_of_nodes(None).unwrap(), 10);
    assert_eq!(g.number_of_edges(None).unwrap(), 17);
    assert!(!g.is_multigraph());
    assert!(g.has_node(9, None).unwrap());
    assert!(!g.has_node(10, None).unwrap());
    assert_eq!(g.has_nodes(&[0, 10, 3], None).unwrap(), vec![true, false, true]);

    assert!(g.has_edge_between(9, 0, None).unwrap());
    assert!(!g.has_edge_between(0, 9, None).unwrap());
    assert_eq!(sorted(g.predecessors(9, None).unwrap()), (1..=8).collect::<Vec<_>>());
    assert_eq!(sorted(g.successors(0, None).unwrap()), (1..=8).collect::<Vec<_>>());

    assert_eq!(g.in_degree(9, None).unwrap(), 8);
    assert_eq!(g.out_degree(0, None).unwrap(), 8);
    let mut expected = vec![1; 10];
    expected[9] = 8;
    assert_eq!(g.in_degrees(Selection::All, None).unwrap(), expected);
    assert_eq!(g.out_degrees([0, 9], None).unwrap(), vec![8, 1]);
}

pub fn test_edge_lookup(backend: &mut EvalBackend) {
    let g = star_graph(backend);
    assert_eq!(g.edge_id(0, 1, None).unwrap(), vec![0]);
    assert!(g.edge_id(0, 9, None).is_err());
    assert_eq!(
        g.find_edges(&[1, 16], None).unwrap(),
        (vec![1, 9], vec![9, 0])
    );
    assert!(g.find_edges(&[17], None).is_err());

    match g.in_edges(9, EdgeForm::Eid, None).unwrap() {
        Edges::Eid(eids) => assert_eq!(sorted(eids), vec![1, 3, 5, 7, 9, 11, 13, 15]),
        other => panic!("expected edge ids, got {other:?}"),
    }
    match g.out_edges(9, EdgeForm::Uv, None).unwrap() {
        Edges::Uv(u, v) => assert_eq!((u, v), (vec![9], vec![0])),
        other => panic!("expected endpoints, got {other:?}"),
    }
    match g.all_edges(EdgeForm::All, EdgeOrder::SrcDst, None).unwrap() {
        Edges::All(list) => {
            assert_eq!(list.eids.len(), 17);
            assert_eq!(&list.src[..8], &[0; 8]);
            assert_eq!(list.src[16], 9);
        }
        other => panic!("expected full edge list, got {other:?}"),
    }
}

pub fn test_edge_ids_on_multigraph(backend: &mut EvalBackend) {
    let g = multigraph(backend);
    assert!(g.is_multigraph());
    match g.edge_ids(&[0], &[1], false, None).unwrap() {
        Edges::All(list) => {
            assert_eq!(list.eids, vec![0, 1]);
            assert_eq!(list.src, vec![0, 0]);
            assert_eq!(list.dst, vec![1, 1]);
        }
        other => panic!("multigraph lookups list every parallel edge, got {other:?}"),
    }

    let simple = star_graph(backend);
    assert_eq!(
        simple.edge_ids(&[0, 0], &[1, 2], false, None).unwrap(),
        Edges::Eid(vec![0, 2])
    );
    // A length-one side is broadcast against the other.
    assert_eq!(
        simple.edge_ids(&[0], &[1, 2], false, None).unwrap(),
        Edges::Eid(vec![0, 2])
    );
    assert!(matches!(
        simple.edge_ids(&[0], &[1], true, None).unwrap(),
        Edges::All(_)
    ));
}

pub fn test_adjacency_and_incidence(backend: &mut EvalBackend) {
    let g = multigraph(backend);
    let adj = g.adjacency_matrix(false, None).unwrap();
    assert_eq!(adj.shape, (4, 4));
    assert_eq!(adj.nnz(), 4);
    // rows are destinations; parallel edges add up
    let dense = adj.to_dense().unwrap();
    let mut expected = vec![0f32; 16];
    expected[4] = 2.0;
    expected[2 * 4 + 1] = 1.0;
    expected[3 * 4 + 2] = 1.0;
    test_eq_f32(&dense, &NumericTensor::from_vec_shape(expected, &[4, 4]).unwrap());

    let transposed = g.adjacency_matrix(true, None).unwrap().to_dense().unwrap();
    assert_eq!(transposed.to_vec::<f32>().unwrap()[1], 2.0);

    let inc = g.incidence_matrix(IncidenceKind::In, None).unwrap();
    assert_eq!(inc.shape, (4, 4));
    assert_eq!(inc.rows, vec![1, 1, 2, 3]);
    assert_eq!(inc.cols, vec![0, 1, 2, 3]);

    let both = g.incidence_matrix(IncidenceKind::Both, None).unwrap().to_dense().unwrap();
    let both = both.to_vec::<f32>().unwrap();
    // edge 2 runs 1 -> 2
    assert_eq!(both[4 + 2], -1.0);
    assert_eq!(both[2 * 4 + 2], 1.0);
}

pub fn test_structure_is_immutable(backend: &mut EvalBackend) {
    let mut g = star_graph(backend);
    for err in [
        g.add_nodes(1, None).unwrap_err(),
        g.add_edge(0, 9, None).unwrap_err(),
        g.add_edges(&[0], &[9], None).unwrap_err(),
        g.remove_nodes(&[0], None).unwrap_err(),
        g.remove_edges(&[0], None).unwrap_err(),
    ] {
        assert!(matches!(err, GraphError::StructuralMutationUnsupported(_)));
    }
    assert_eq!(g.number_of_edges(None).unwrap(), 17);
}

pub fn test_form_arguments(backend: &mut EvalBackend) {
    let g = star_graph(backend);
    assert!(matches!(
        parse_form::<EdgeForm>("pairs"),
        Err(GraphError::InvalidFormArgument(_))
    ));
    assert!(g.in_degrees([42], None).is_err());
    let text = g.to_string();
    assert!(text.contains("num_nodes=10"), "{text}");
    assert!(text.contains("num_edges=17"), "{text}");
}
