use super::{GraphIndexError, Metagraph, UnitGraph};
use crate::type_resolver::{EdgeTypeId, NodeTypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Structure of a typed graph: a metagraph plus one relation per edge type.
/// Relations are reference counted so derived graphs share them.
#[derive(Debug, Clone)]
pub struct HeteroGraphIndex {
    metagraph: Arc<Metagraph>,
    num_nodes: Vec<u64>,
    relations: Vec<Arc<UnitGraph>>,
}

/// A derived index plus, per type, the parent ids of the kept nodes and edges.
#[derive(Debug, Clone)]
pub struct SubgraphIndex {
    pub graph: HeteroGraphIndex,
    pub induced_nodes: Vec<Vec<u64>>,
    pub induced_edges: Vec<Vec<u64>>,
}

/// Several relations merged into one. Node and edge ids of the merged relation
/// map back to their parent type and parent id through the `induced_*` arrays.
#[derive(Debug, Clone)]
pub struct FlattenedIndex {
    pub graph: HeteroGraphIndex,
    pub src_types: Vec<NodeTypeId>,
    pub dst_types: Vec<NodeTypeId>,
    pub etypes: Vec<EdgeTypeId>,
    pub induced_srctype: Vec<u64>,
    pub induced_srcid: Vec<u64>,
    pub induced_dsttype: Vec<u64>,
    pub induced_dstid: Vec<u64>,
    pub induced_etype: Vec<u64>,
    pub induced_eid: Vec<u64>,
    /// True when the source and destination type sets coincide, in which case
    /// the merged graph has a single node type.
    pub shared_node_space: bool,
}

impl HeteroGraphIndex {
    pub fn new(
        metagraph: Metagraph,
        num_nodes: Vec<u64>,
        relations: Vec<Arc<UnitGraph>>,
    ) -> Result<Self, GraphIndexError> {
        for (i, rel) in relations.iter().enumerate() {
            let (s, d) = metagraph.find_edge(EdgeTypeId::new(i));
            if rel.num_src() != num_nodes[s.index()] {
                return Err(GraphIndexError::NodeCountMismatch {
                    side: "source",
                    expected: rel.num_src(),
                    got: num_nodes[s.index()],
                });
            }
            if rel.num_dst() != num_nodes[d.index()] {
                return Err(GraphIndexError::NodeCountMismatch {
                    side: "destination",
                    expected: rel.num_dst(),
                    got: num_nodes[d.index()],
                });
            }
        }
        Ok(Self {
            metagraph: Arc::new(metagraph),
            num_nodes,
            relations,
        })
    }

    /// Builds every relation from coordinate arrays.
    pub fn from_coo(
        num_nodes: Vec<u64>,
        endpoints: Vec<(NodeTypeId, NodeTypeId)>,
        coo: Vec<(Vec<u64>, Vec<u64>)>,
    ) -> Result<Self, GraphIndexError> {
        let relations = endpoints
            .iter()
            .zip(coo)
            .map(|((s, d), (src, dst))| {
                UnitGraph::new(num_nodes[s.index()], num_nodes[d.index()], src, dst).map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(
            Metagraph::new(num_nodes.len(), endpoints),
            num_nodes,
            relations,
        )
    }

    pub fn metagraph(&self) -> &Metagraph {
        &self.metagraph
    }

    pub fn num_ntypes(&self) -> usize {
        self.num_nodes.len()
    }

    pub fn num_etypes(&self) -> usize {
        self.relations.len()
    }

    pub fn number_of_nodes(&self, ntype: NodeTypeId) -> u64 {
        self.num_nodes[ntype.index()]
    }

    pub fn number_of_edges(&self, etype: EdgeTypeId) -> u64 {
        self.relations[etype.index()].num_edges()
    }

    pub fn relation(&self, etype: EdgeTypeId) -> &UnitGraph {
        &self.relations[etype.index()]
    }

    pub fn shared_relation(&self, etype: EdgeTypeId) -> Arc<UnitGraph> {
        self.relations[etype.index()].clone()
    }

    pub fn node_subgraph(&self, nodes: &[Vec<u64>]) -> Result<SubgraphIndex, GraphIndexError> {
        let mut relations = Vec::with_capacity(self.relations.len());
        let mut induced_edges = Vec::with_capacity(self.relations.len());
        for (i, rel) in self.relations.iter().enumerate() {
            let (s, d) = self.metagraph.find_edge(EdgeTypeId::new(i));
            let (sub, induced) = rel.node_subgraph(&nodes[s.index()], &nodes[d.index()])?;
            relations.push(Arc::new(sub));
            induced_edges.push(induced);
        }
        let graph = Self::new(
            (*self.metagraph).clone(),
            nodes.iter().map(|n| n.len() as u64).collect(),
            relations,
        )?;
        Ok(SubgraphIndex {
            graph,
            induced_nodes: nodes.to_vec(),
            induced_edges,
        })
    }

    /// With `preserve_nodes` every node survives; otherwise only nodes incident
    /// to a kept edge survive, in ascending id order.
    pub fn edge_subgraph(
        &self,
        edges: &[Vec<u64>],
        preserve_nodes: bool,
    ) -> Result<SubgraphIndex, GraphIndexError> {
        let induced_nodes: Vec<Vec<u64>> = if preserve_nodes {
            self.num_nodes.iter().map(|&n| (0..n).collect()).collect()
        } else {
            let mut kept: Vec<Vec<u64>> = vec![vec![]; self.num_nodes.len()];
            for (i, eids) in edges.iter().enumerate() {
                let (s, d) = self.metagraph.find_edge(EdgeTypeId::new(i));
                let (src, dst) = self.relations[i].find_edges(eids)?;
                kept[s.index()].extend(src);
                kept[d.index()].extend(dst);
            }
            for k in kept.iter_mut() {
                k.sort_unstable();
                k.dedup();
            }
            kept
        };
        let mut relations = Vec::with_capacity(self.relations.len());
        for (i, rel) in self.relations.iter().enumerate() {
            let (s, d) = self.metagraph.find_edge(EdgeTypeId::new(i));
            relations.push(Arc::new(rel.edge_subgraph(
                &edges[i],
                &induced_nodes[s.index()],
                &induced_nodes[d.index()],
            )?));
        }
        let graph = Self::new(
            (*self.metagraph).clone(),
            induced_nodes.iter().map(|n| n.len() as u64).collect(),
            relations,
        )?;
        Ok(SubgraphIndex {
            graph,
            induced_nodes,
            induced_edges: edges.to_vec(),
        })
    }

    /// Keeps the given types. Every kept edge type's endpoints must be among `ntypes`.
    pub fn type_subgraph(&self, ntypes: &[NodeTypeId], etypes: &[EdgeTypeId]) -> Self {
        let remap: HashMap<NodeTypeId, NodeTypeId> = ntypes
            .iter()
            .enumerate()
            .map(|(i, t)| (*t, NodeTypeId::new(i)))
            .collect();
        let edges = etypes
            .iter()
            .map(|e| {
                let (s, d) = self.metagraph.find_edge(*e);
                (remap[&s], remap[&d])
            })
            .collect();
        Self {
            metagraph: Arc::new(Metagraph::new(ntypes.len(), edges)),
            num_nodes: ntypes.iter().map(|t| self.num_nodes[t.index()]).collect(),
            relations: etypes
                .iter()
                .map(|e| self.relations[e.index()].clone())
                .collect(),
        }
    }

    pub fn flatten_relations(&self, etypes: &[EdgeTypeId]) -> Result<FlattenedIndex, GraphIndexError> {
        let mut src_types: Vec<NodeTypeId> =
            etypes.iter().map(|e| self.metagraph.find_edge(*e).0).collect();
        src_types.sort_unstable();
        src_types.dedup();
        let mut dst_types: Vec<NodeTypeId> =
            etypes.iter().map(|e| self.metagraph.find_edge(*e).1).collect();
        dst_types.sort_unstable();
        dst_types.dedup();
        let shared_node_space = src_types == dst_types;

        let lay_out = |types: &[NodeTypeId]| {
            let mut offsets = HashMap::new();
            let (mut tys, mut ids) = (vec![], vec![]);
            for t in types {
                offsets.insert(*t, ids.len() as u64);
                let n = self.num_nodes[t.index()];
                tys.extend(std::iter::repeat_n(t.index() as u64, n as usize));
                ids.extend(0..n);
            }
            (offsets, tys, ids)
        };
        let (src_offsets, induced_srctype, induced_srcid) = lay_out(&src_types);
        let (dst_offsets, induced_dsttype, induced_dstid) = lay_out(&dst_types);

        let (mut src, mut dst) = (vec![], vec![]);
        let (mut induced_etype, mut induced_eid) = (vec![], vec![]);
        for e in etypes {
            let (s, d) = self.metagraph.find_edge(*e);
            let rel = &self.relations[e.index()];
            src.extend(rel.src().iter().map(|u| u + src_offsets[&s]));
            dst.extend(rel.dst().iter().map(|v| v + dst_offsets[&d]));
            induced_etype.extend(std::iter::repeat_n(e.index() as u64, rel.num_edges() as usize));
            induced_eid.extend(0..rel.num_edges());
        }

        let num_src = induced_srcid.len() as u64;
        let num_dst = induced_dstid.len() as u64;
        let graph = if shared_node_space {
            Self::from_coo(
                vec![num_src],
                vec![(NodeTypeId::new(0), NodeTypeId::new(0))],
                vec![(src, dst)],
            )?
        } else {
            Self::from_coo(
                vec![num_src, num_dst],
                vec![(NodeTypeId::new(0), NodeTypeId::new(1))],
                vec![(src, dst)],
            )?
        };
        Ok(FlattenedIndex {
            graph,
            src_types,
            dst_types,
            etypes: etypes.to_vec(),
            induced_srctype,
            induced_srcid,
            induced_dsttype,
            induced_dstid,
            induced_etype,
            induced_eid,
            shared_node_space,
        })
    }

    pub fn reverse(&self) -> Self {
        let edges = self
            .metagraph
            .edges()
            .iter()
            .map(|(s, d)| (*d, *s))
            .collect();
        Self {
            metagraph: Arc::new(Metagraph::new(self.num_nodes.len(), edges)),
            num_nodes: self.num_nodes.clone(),
            relations: self
                .relations
                .iter()
                .map(|r| Arc::new(r.reverse()))
                .collect(),
        }
    }
}
