use super::HeteroGraph;
use crate::error::GraphError;
use crate::graph_index::{GraphIndexError, SparseMatrix};
use crate::selection::{EdgeForm, EdgeOrder, IncidenceKind, Selection};
use crate::type_resolver::{EdgeTypeId, EdgeTypeKey};

/// Parallel endpoint and edge id arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeList {
    pub src: Vec<u64>,
    pub dst: Vec<u64>,
    pub eids: Vec<u64>,
}

impl EdgeList {
    pub fn into_form(self, form: EdgeForm) -> Edges {
        match form {
            EdgeForm::Uv => Edges::Uv(self.src, self.dst),
            EdgeForm::Eid => Edges::Eid(self.eids),
            EdgeForm::All => Edges::All(self),
        }
    }
}

/// Result of an edge query in the requested [`EdgeForm`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Edges {
    Uv(Vec<u64>, Vec<u64>),
    Eid(Vec<u64>),
    All(EdgeList),
}

impl Edges {
    pub fn eids(&self) -> Option<&[u64]> {
        match self {
            Edges::Uv(..) => None,
            Edges::Eid(e) => Some(e),
            Edges::All(list) => Some(&list.eids),
        }
    }
}

impl HeteroGraph {
    pub fn number_of_nodes(&self, ntype: Option<&str>) -> Result<u64, GraphError> {
        Ok(self.index.number_of_nodes(self.ntype_id(ntype)?))
    }

    pub fn number_of_edges(&self, etype: Option<EdgeTypeKey>) -> Result<u64, GraphError> {
        Ok(self.index.number_of_edges(self.etype_id(etype.as_ref())?))
    }

    /// True when any relation holds parallel edges.
    pub fn is_multigraph(&self) -> bool {
        self.types
            .edge_type_ids()
            .any(|e| self.index.relation(e).is_multigraph())
    }

    pub fn has_node(&self, id: u64, ntype: Option<&str>) -> Result<bool, GraphError> {
        Ok(id < self.number_of_nodes(ntype)?)
    }

    pub fn has_nodes(&self, ids: &[u64], ntype: Option<&str>) -> Result<Vec<bool>, GraphError> {
        let count = self.number_of_nodes(ntype)?;
        Ok(ids.iter().map(|&id| id < count).collect())
    }

    pub fn has_edge_between(&self, u: u64, v: u64, etype: Option<EdgeTypeKey>) -> Result<bool, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        Ok(self.index.relation(e).has_edge_between(u, v))
    }

    pub fn has_edges_between(
        &self,
        u: &[u64],
        v: &[u64],
        etype: Option<EdgeTypeKey>,
    ) -> Result<Vec<bool>, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let (u, v) = super::broadcast_pairs(u, v)?;
        let relation = self.index.relation(e);
        Ok(u.iter().zip(&v).map(|(&a, &b)| relation.has_edge_between(a, b)).collect())
    }

    pub fn predecessors(&self, v: u64, etype: Option<EdgeTypeKey>) -> Result<Vec<u64>, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        Ok(self.index.relation(e).predecessors(v)?)
    }

    pub fn successors(&self, u: u64, etype: Option<EdgeTypeKey>) -> Result<Vec<u64>, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        Ok(self.index.relation(e).successors(u)?)
    }

    /// Ids of the edges from `u` to `v`. Fails with `NoSuchEdge` when there is none.
    pub fn edge_id(&self, u: u64, v: u64, etype: Option<EdgeTypeKey>) -> Result<Vec<u64>, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let eids = self.index.relation(e).edge_ids_between(u, v)?;
        if eids.is_empty() {
            return Err(GraphIndexError::NoSuchEdge { src: u, dst: v }.into());
        }
        Ok(eids)
    }

    /// Edges between each pair. On a simple relation without `force_multi`
    /// the result is one edge id per pair; otherwise every parallel edge is
    /// listed with its endpoints.
    pub fn edge_ids(
        &self,
        u: &[u64],
        v: &[u64],
        force_multi: bool,
        etype: Option<EdgeTypeKey>,
    ) -> Result<Edges, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let (u, v) = super::broadcast_pairs(u, v)?;
        let relation = self.index.relation(e);
        let mut list = EdgeList::default();
        for (&a, &b) in u.iter().zip(&v) {
            let eids = relation.edge_ids_between(a, b)?;
            list.src.extend(std::iter::repeat_n(a, eids.len()));
            list.dst.extend(std::iter::repeat_n(b, eids.len()));
            list.eids.extend(eids);
        }
        if force_multi || relation.is_multigraph() {
            Ok(Edges::All(list))
        } else {
            Ok(Edges::Eid(list.eids))
        }
    }

    pub fn find_edges(&self, eids: &[u64], etype: Option<EdgeTypeKey>) -> Result<(Vec<u64>, Vec<u64>), GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        Ok(self.index.relation(e).find_edges(eids)?)
    }

    fn dst_ids(&self, e: EdgeTypeId, nodes: Selection) -> Result<Vec<u64>, GraphError> {
        Ok(nodes.resolve(self.index.relation(e).num_dst(), "destination node")?)
    }

    fn src_ids(&self, e: EdgeTypeId, nodes: Selection) -> Result<Vec<u64>, GraphError> {
        Ok(nodes.resolve(self.index.relation(e).num_src(), "source node")?)
    }

    pub fn in_edges(
        &self,
        nodes: impl Into<Selection>,
        form: EdgeForm,
        etype: Option<EdgeTypeKey>,
    ) -> Result<Edges, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let vs = self.dst_ids(e, nodes.into())?;
        let (src, dst, eids) = self.index.relation(e).in_edges(&vs)?;
        Ok(EdgeList { src, dst, eids }.into_form(form))
    }

    pub fn out_edges(
        &self,
        nodes: impl Into<Selection>,
        form: EdgeForm,
        etype: Option<EdgeTypeKey>,
    ) -> Result<Edges, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let us = self.src_ids(e, nodes.into())?;
        let (src, dst, eids) = self.index.relation(e).out_edges(&us)?;
        Ok(EdgeList { src, dst, eids }.into_form(form))
    }

    pub fn all_edges(
        &self,
        form: EdgeForm,
        order: EdgeOrder,
        etype: Option<EdgeTypeKey>,
    ) -> Result<Edges, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let (src, dst, eids) = self.index.relation(e).edges(order);
        Ok(EdgeList { src, dst, eids }.into_form(form))
    }

    pub fn in_degree(&self, v: u64, etype: Option<EdgeTypeKey>) -> Result<u64, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        Ok(self.index.relation(e).in_degrees(&[v])?[0])
    }

    pub fn in_degrees(&self, nodes: impl Into<Selection>, etype: Option<EdgeTypeKey>) -> Result<Vec<u64>, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let vs = self.dst_ids(e, nodes.into())?;
        Ok(self.index.relation(e).in_degrees(&vs)?)
    }

    pub fn out_degree(&self, u: u64, etype: Option<EdgeTypeKey>) -> Result<u64, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        Ok(self.index.relation(e).out_degrees(&[u])?[0])
    }

    pub fn out_degrees(&self, nodes: impl Into<Selection>, etype: Option<EdgeTypeKey>) -> Result<Vec<u64>, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let us = self.src_ids(e, nodes.into())?;
        Ok(self.index.relation(e).out_degrees(&us)?)
    }

    /// Rows are destinations and columns sources; `transpose` swaps them.
    pub fn adjacency_matrix(&self, transpose: bool, etype: Option<EdgeTypeKey>) -> Result<SparseMatrix, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let relation = self.index.relation(e);
        let (n_src, n_dst) = (relation.num_src() as usize, relation.num_dst() as usize);
        let (rows, cols, shape) = if transpose {
            (relation.src().to_vec(), relation.dst().to_vec(), (n_src, n_dst))
        } else {
            (relation.dst().to_vec(), relation.src().to_vec(), (n_dst, n_src))
        };
        Ok(SparseMatrix {
            shape,
            values: vec![1.0; rows.len()],
            rows,
            cols,
        })
    }

    /// Node-by-edge matrix. `Both` marks in-edges with 1 and out-edges with -1,
    /// skips self-loops, and needs a relation within one node type.
    pub fn incidence_matrix(&self, kind: IncidenceKind, etype: Option<EdgeTypeKey>) -> Result<SparseMatrix, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let relation = self.index.relation(e);
        let m = relation.num_edges() as usize;
        let eids: Vec<u64> = (0..m as u64).collect();
        let matrix = match kind {
            IncidenceKind::In => SparseMatrix {
                shape: (relation.num_dst() as usize, m),
                rows: relation.dst().to_vec(),
                cols: eids,
                values: vec![1.0; m],
            },
            IncidenceKind::Out => SparseMatrix {
                shape: (relation.num_src() as usize, m),
                rows: relation.src().to_vec(),
                cols: eids,
                values: vec![1.0; m],
            },
            IncidenceKind::Both => {
                let (s, d) = self.types.endpoints(e);
                if s != d {
                    return Err(GraphIndexError::IncidenceNeedsHomogeneous(kind.to_string()).into());
                }
                let mut matrix = SparseMatrix {
                    shape: (relation.num_src() as usize, m),
                    rows: vec![],
                    cols: vec![],
                    values: vec![],
                };
                for (eid, (&u, &v)) in relation.src().iter().zip(relation.dst()).enumerate() {
                    if u == v {
                        continue;
                    }
                    matrix.rows.extend([v, u]);
                    matrix.cols.extend([eid as u64, eid as u64]);
                    matrix.values.extend([1.0, -1.0]);
                }
                matrix
            }
        };
        Ok(matrix)
    }
}
