use crate::graph_tests::{rows_f32, test_eq_f32, user_game_graph};
use whisper_graph::backends::eval_backend::EvalBackend;
use whisper_graph::error::GraphError;
use whisper_graph::frame::FeatureMap;
use whisper_graph::function::{copy_src, sum, NodeFn, ReduceFunc};
use whisper_graph::heterograph::{HeteroGraph, RecvFuncs, RelationFuncs};
use whisper_graph::merge::CrossReducer;
use whisper_graph::numeric_tensor::NumericTensor;
use whisper_graph::selection::{EdgeSelection, Selection};
use whisper_graph::type_resolver::{CanonicalEdgeType, EdgeTypeKey};

fn follows_game() -> EdgeTypeKey {
    ("user", "follows", "game").into()
}

fn follows_user() -> EdgeTypeKey {
    ("user", "follows", "user").into()
}

fn plays() -> EdgeTypeKey {
    "plays".into()
}

fn copy_sum() -> RelationFuncs {
    RelationFuncs::new(copy_src("h", "m"), sum("m", "h"))
}

/// Users carry `h = [1, 2, 3]`.
fn with_user_h(backend: &EvalBackend) -> HeteroGraph {
    let g = user_game_graph(backend);
    g.set_ndata("h", rows_f32(3, 1, |i| i as f32 + 1.0), Some("user")).unwrap();
    g
}

fn game_h(g: &HeteroGraph) -> NumericTensor {
    g.ndata("h", Some("game")).unwrap()
}

pub fn test_type_resolution(backend: &mut EvalBackend) {
    let g = user_game_graph(backend);
    assert_eq!(g.ntypes(), &["user".to_string(), "game".to_string()]);
    assert_eq!(g.etypes(), vec!["follows", "follows", "plays"]);

    let err = g.number_of_edges(Some("follows".into())).unwrap_err();
    assert!(err.is_ambiguous_type(), "{err}");
    assert!(g.number_of_edges(None).unwrap_err().is_ambiguous_type());
    assert!(g.number_of_nodes(None).unwrap_err().is_ambiguous_type());
    assert!(g.number_of_nodes(Some("dog")).unwrap_err().is_unknown_type());

    assert_eq!(g.number_of_edges(Some(plays())).unwrap(), 3);
    assert_eq!(g.number_of_edges(Some(follows_game())).unwrap(), 2);
    assert_eq!(
        g.to_canonical_etype(plays()).unwrap(),
        CanonicalEdgeType::new("user", "plays", "game")
    );
    assert!(g.to_string().contains("metagraph"));
}

pub fn test_multi_update_all_sum(backend: &mut EvalBackend) {
    let g = with_user_h(backend);
    g.multi_update_all(
        &[(follows_game(), copy_sum()), (plays(), copy_sum())],
        CrossReducer::Sum,
        None,
    )
    .unwrap();
    // game 0: follows 1, plays 1 + 2; game 1: follows 3, plays 3
    test_eq_f32(
        &game_h(&g),
        &NumericTensor::from_vec_shape(vec![4f32, 6.0], &[2, 1]).unwrap(),
    );
    // the users keep their own features
    assert_eq!(g.ndata("h", Some("user")).unwrap().to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);
}

pub fn test_multi_update_all_stack(backend: &mut EvalBackend) {
    let g = with_user_h(backend);
    g.multi_update_all(
        &[(follows_game(), copy_sum()), (plays(), copy_sum())],
        CrossReducer::Stack,
        None,
    )
    .unwrap();
    test_eq_f32(
        &game_h(&g),
        &NumericTensor::from_vec_shape(vec![1f32, 3.0, 3.0, 3.0], &[2, 2, 1]).unwrap(),
    );
}

pub fn test_multi_update_all_with_apply(backend: &mut EvalBackend) {
    let g = with_user_h(backend);
    let double = NodeFn::new(|nodes| {
        let doubled = nodes.data("h")?.scale(2.0, nodes.backend())?;
        Ok(FeatureMap::from([("h".to_string(), doubled)]))
    });
    g.multi_update_all(
        &[(follows_game(), copy_sum()), (plays(), copy_sum())],
        CrossReducer::Max,
        Some(&double),
    )
    .unwrap();
    assert_eq!(game_h(&g).to_vec::<f32>().unwrap(), vec![6.0, 6.0]);
}

pub fn test_multi_update_all_replaces_existing_field(backend: &mut EvalBackend) {
    let g = with_user_h(backend);
    g.set_ndata("h", rows_f32(2, 1, |i| 10.0 * (i as f32 + 1.0)), Some("game"))
        .unwrap();
    g.multi_update_all(
        &[(follows_game(), copy_sum()), (plays(), copy_sum())],
        CrossReducer::Stack,
        None,
    )
    .unwrap();
    test_eq_f32(
        &game_h(&g),
        &NumericTensor::from_vec_shape(vec![1f32, 3.0, 3.0, 3.0], &[2, 2, 1]).unwrap(),
    );

    // summing wider messages into the now stacked field replaces it again
    g.set_ndata("x", rows_f32(3, 2, |i| i as f32 + 1.0), Some("user")).unwrap();
    let copy_x = || RelationFuncs::new(copy_src("x", "m"), sum("m", "h"));
    g.multi_update_all(
        &[(follows_game(), copy_x()), (plays(), copy_x())],
        CrossReducer::Sum,
        None,
    )
    .unwrap();
    test_eq_f32(
        &game_h(&g),
        &NumericTensor::from_vec_shape(vec![4f32, 4.0, 6.0, 6.0], &[2, 2]).unwrap(),
    );
}

pub fn test_failed_multi_recv_keeps_pending_messages(backend: &mut EvalBackend) {
    let g = with_user_h(backend);
    g.send(EdgeSelection::All, &copy_src("h", "m").into(), Some(follows_game()))
        .unwrap();
    g.send(EdgeSelection::All, &copy_src("h", "m").into(), Some(plays()))
        .unwrap();
    let failing = ReduceFunc::udf(|_| Err(GraphError::UnknownField("missing".to_string())));
    let err = g
        .multi_recv(
            Selection::All,
            &[
                (follows_game(), RecvFuncs::new(sum("m", "h"))),
                (plays(), RecvFuncs::new(failing)),
            ],
            CrossReducer::Sum,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, GraphError::UnknownField(_)), "{err}");
    assert!(!g.has_ndata("h", Some("game")).unwrap());

    g.multi_recv(
        Selection::All,
        &[
            (follows_game(), RecvFuncs::new(sum("m", "h"))),
            (plays(), RecvFuncs::new(sum("m", "h"))),
        ],
        CrossReducer::Sum,
        None,
    )
    .unwrap();
    assert_eq!(game_h(&g).to_vec::<f32>().unwrap(), vec![4.0, 6.0]);
}

pub fn test_multi_relation_needs_common_destination(backend: &mut EvalBackend) {
    let g = with_user_h(backend);
    let err = g
        .multi_update_all(
            &[(follows_user(), copy_sum()), (plays(), copy_sum())],
            CrossReducer::Sum,
            None,
        )
        .unwrap_err();
    assert!(matches!(err, GraphError::AmbiguousDestination(_)), "{err}");
    assert!(g.multi_update_all(&[], CrossReducer::Sum, None).is_err());
    assert!(!g.has_ndata("h", Some("game")).unwrap());
}

pub fn test_multi_recv_pull_and_send_and_recv(backend: &mut EvalBackend) {
    let g = with_user_h(backend);
    g.send(EdgeSelection::All, &copy_src("h", "m").into(), Some(follows_game()))
        .unwrap();
    g.send(EdgeSelection::All, &copy_src("h", "m").into(), Some(plays()))
        .unwrap();
    g.multi_recv(
        Selection::All,
        &[
            (follows_game(), RecvFuncs::new(sum("m", "h"))),
            (plays(), RecvFuncs::new(sum("m", "h"))),
        ],
        CrossReducer::Sum,
        None,
    )
    .unwrap();
    assert_eq!(game_h(&g).to_vec::<f32>().unwrap(), vec![4.0, 6.0]);

    let g = with_user_h(backend);
    g.set_ndata("h", rows_f32(2, 1, |i| 10.0 * (i as f32 + 1.0)), Some("game"))
        .unwrap();
    g.multi_pull(
        [1],
        &[(follows_game(), copy_sum()), (plays(), copy_sum())],
        CrossReducer::Max,
        None,
    )
    .unwrap();
    assert_eq!(game_h(&g).to_vec::<f32>().unwrap(), vec![10.0, 3.0]);

    let g = with_user_h(backend);
    g.set_ndata("h", rows_f32(2, 1, |i| 10.0 * (i as f32 + 1.0)), Some("game"))
        .unwrap();
    g.multi_send_and_recv(
        &[
            (follows_game(), (EdgeSelection::Ids(vec![1]), copy_sum())),
            (plays(), (vec![2].into(), copy_sum())),
        ],
        CrossReducer::Sum,
        None,
    )
    .unwrap();
    assert_eq!(game_h(&g).to_vec::<f32>().unwrap(), vec![10.0, 6.0]);
}

pub fn test_relation_view_shares_frames(backend: &mut EvalBackend) {
    let g = with_user_h(backend);
    let view = g.relation(Some("user"), Some("plays"), Some("game")).unwrap();
    assert_eq!(view.ntypes(), &["user".to_string(), "game".to_string()]);
    assert_eq!(view.number_of_edges(None).unwrap(), 3);
    assert!(view.ndata("h", Some("user")).unwrap().ptr_eq(&g.ndata("h", Some("user")).unwrap()));

    view.set_ndata("z", rows_f32(2, 1, |_| 1.0), Some("game")).unwrap();
    assert!(g.has_ndata("z", Some("game")).unwrap());

    let err = g.relation(Some("game"), None, None).unwrap_err();
    assert!(err.is_unknown_type(), "{err}");
}

pub fn test_relation_flattens_several_matches(backend: &mut EvalBackend) {
    let g = with_user_h(backend);
    let flat = g.relation(Some("user"), Some("follows"), None).unwrap();
    assert_eq!(flat.ntypes(), &["user".to_string(), "game+user".to_string()]);
    assert_eq!(
        flat.canonical_etypes(),
        &[CanonicalEdgeType::new("user", "follows+follows", "game+user")]
    );
    assert_eq!(flat.number_of_edges(None).unwrap(), 4);
    // destinations lay out the users first, then the games
    assert!(flat.has_edge_between(2, 4, None).unwrap());

    assert_eq!(flat.edata("_TYPE", None).unwrap().to_vec::<i64>().unwrap(), vec![0, 0, 1, 1]);
    assert_eq!(flat.edata("_ID", None).unwrap().to_vec::<i64>().unwrap(), vec![0, 1, 0, 1]);
    assert_eq!(
        flat.ndata("_TYPE", Some("game+user")).unwrap().to_vec::<i64>().unwrap(),
        vec![0, 0, 0, 1, 1]
    );
    assert_eq!(
        flat.ndata("_ID", Some("game+user")).unwrap().to_vec::<i64>().unwrap(),
        vec![0, 1, 2, 0, 1]
    );
    // only fields every constituent has are carried over
    assert!(flat.has_ndata("h", Some("user")).unwrap());
    assert!(!flat.has_ndata("h", Some("game+user")).unwrap());
}

pub fn test_subgraphs_record_parent_ids(backend: &mut EvalBackend) {
    let g = with_user_h(backend);
    let sub = g.subgraph(&[("user", vec![0, 1])]).unwrap();
    assert_eq!(sub.number_of_nodes(Some("user")).unwrap(), 2);
    assert_eq!(sub.number_of_nodes(Some("game")).unwrap(), 0);
    assert_eq!(sub.number_of_edges(Some(follows_user())).unwrap(), 1);
    assert_eq!(sub.ndata("_ID", Some("user")).unwrap().to_vec::<i64>().unwrap(), vec![0, 1]);
    assert_eq!(sub.edata("_ID", Some(follows_user())).unwrap().to_vec::<i64>().unwrap(), vec![0]);
    assert_eq!(sub.ndata("h", Some("user")).unwrap().to_vec::<f32>().unwrap(), vec![1.0, 2.0]);

    // copies, not views
    sub.set_ndata("h", rows_f32(2, 1, |_| 0.0), Some("user")).unwrap();
    assert_eq!(g.ndata("h", Some("user")).unwrap().to_vec::<f32>().unwrap(), vec![1.0, 2.0, 3.0]);

    let esub = g.edge_subgraph(&[(plays(), vec![2])], false).unwrap();
    assert_eq!(esub.number_of_edges(Some(plays())).unwrap(), 1);
    assert_eq!(esub.number_of_edges(Some(follows_game())).unwrap(), 0);
    assert_eq!(esub.ndata("_ID", Some("user")).unwrap().to_vec::<i64>().unwrap(), vec![2]);
    assert_eq!(esub.ndata("_ID", Some("game")).unwrap().to_vec::<i64>().unwrap(), vec![1]);
    assert_eq!(esub.edata("_ID", Some(plays())).unwrap().to_vec::<i64>().unwrap(), vec![2]);

    let kept = g.edge_subgraph(&[(plays(), vec![2])], true).unwrap();
    assert_eq!(kept.number_of_nodes(Some("user")).unwrap(), 3);
}

pub fn test_type_subgraphs_share_frames(backend: &mut EvalBackend) {
    let g = with_user_h(backend);
    let users = g.node_type_subgraph(&["user"]).unwrap();
    assert_eq!(users.canonical_etypes(), &[CanonicalEdgeType::new("user", "follows", "user")]);
    users.set_ndata("y", rows_f32(3, 1, |_| 1.0), None).unwrap();
    assert!(g.has_ndata("y", Some("user")).unwrap());

    let played = g.edge_type_subgraph(&[plays()]).unwrap();
    assert_eq!(played.ntypes(), &["user".to_string(), "game".to_string()]);
    assert_eq!(played.number_of_edges(None).unwrap(), 3);
}

pub fn test_reverse(backend: &mut EvalBackend) {
    let g = with_user_h(backend);
    let r = g.reverse().unwrap();
    let played_by: EdgeTypeKey = ("game", "plays", "user").into();
    assert_eq!(r.number_of_edges(Some(played_by.clone())).unwrap(), 3);
    let mut users = r.successors(0, Some(played_by)).unwrap();
    users.sort_unstable();
    assert_eq!(users, vec![0, 1]);
    assert!(r.ndata("h", Some("user")).unwrap().ptr_eq(&g.ndata("h", Some("user")).unwrap()));
}
