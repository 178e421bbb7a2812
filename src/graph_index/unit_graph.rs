use super::GraphIndexError;
use crate::selection::EdgeOrder;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Compressed adjacency keyed by one endpoint. Within a row, edges keep id order.
#[derive(Debug, Clone)]
struct Csr {
    indptr: Vec<usize>,
    neighbors: Vec<u64>,
    edge_ids: Vec<u64>,
}

impl Csr {
    fn build(num_rows: u64, keys: &[u64], values: &[u64]) -> Self {
        let mut indptr = vec![0usize; num_rows as usize + 1];
        for &k in keys {
            indptr[k as usize + 1] += 1;
        }
        for i in 0..num_rows as usize {
            indptr[i + 1] += indptr[i];
        }
        let mut cursor = indptr.clone();
        let mut neighbors = vec![0u64; keys.len()];
        let mut edge_ids = vec![0u64; keys.len()];
        for (eid, (&k, &v)) in keys.iter().zip(values).enumerate() {
            let slot = &mut cursor[k as usize];
            neighbors[*slot] = v;
            edge_ids[*slot] = eid as u64;
            *slot += 1;
        }
        Self {
            indptr,
            neighbors,
            edge_ids,
        }
    }

    fn row(&self, k: u64) -> (&[u64], &[u64]) {
        let (a, b) = (self.indptr[k as usize], self.indptr[k as usize + 1]);
        (&self.neighbors[a..b], &self.edge_ids[a..b])
    }

    fn degree(&self, k: u64) -> u64 {
        (self.indptr[k as usize + 1] - self.indptr[k as usize]) as u64
    }
}

/// Adjacency of a single relation in coordinate form.
#[derive(Debug, Clone)]
pub struct UnitGraph {
    num_src: u64,
    num_dst: u64,
    src: Vec<u64>,
    dst: Vec<u64>,
    out_csr: OnceLock<Csr>,
    in_csr: OnceLock<Csr>,
}

impl UnitGraph {
    pub fn new(
        num_src: u64,
        num_dst: u64,
        src: Vec<u64>,
        dst: Vec<u64>,
    ) -> Result<Self, GraphIndexError> {
        if src.len() != dst.len() {
            return Err(GraphIndexError::EndpointLengthMismatch {
                src: src.len(),
                dst: dst.len(),
            });
        }
        if let Some(&id) = src.iter().find(|&&u| u >= num_src) {
            return Err(GraphIndexError::InvalidId {
                kind: "source node",
                id,
                count: num_src,
            });
        }
        if let Some(&id) = dst.iter().find(|&&v| v >= num_dst) {
            return Err(GraphIndexError::InvalidId {
                kind: "destination node",
                id,
                count: num_dst,
            });
        }
        Ok(Self {
            num_src,
            num_dst,
            src,
            dst,
            out_csr: OnceLock::new(),
            in_csr: OnceLock::new(),
        })
    }

    pub fn num_src(&self) -> u64 {
        self.num_src
    }

    pub fn num_dst(&self) -> u64 {
        self.num_dst
    }

    pub fn num_edges(&self) -> u64 {
        self.src.len() as u64
    }

    pub fn src(&self) -> &[u64] {
        &self.src
    }

    pub fn dst(&self) -> &[u64] {
        &self.dst
    }

    fn out_csr(&self) -> &Csr {
        self.out_csr
            .get_or_init(|| Csr::build(self.num_src, &self.src, &self.dst))
    }

    fn in_csr(&self) -> &Csr {
        self.in_csr
            .get_or_init(|| Csr::build(self.num_dst, &self.dst, &self.src))
    }

    fn check_src(&self, u: u64) -> Result<(), GraphIndexError> {
        if u >= self.num_src {
            return Err(GraphIndexError::InvalidId {
                kind: "source node",
                id: u,
                count: self.num_src,
            });
        }
        Ok(())
    }

    fn check_dst(&self, v: u64) -> Result<(), GraphIndexError> {
        if v >= self.num_dst {
            return Err(GraphIndexError::InvalidId {
                kind: "destination node",
                id: v,
                count: self.num_dst,
            });
        }
        Ok(())
    }

    fn check_edge(&self, e: u64) -> Result<(), GraphIndexError> {
        if e >= self.num_edges() {
            return Err(GraphIndexError::InvalidId {
                kind: "edge",
                id: e,
                count: self.num_edges(),
            });
        }
        Ok(())
    }

    pub fn has_edge_between(&self, u: u64, v: u64) -> bool {
        u < self.num_src && v < self.num_dst && self.out_csr().row(u).0.contains(&v)
    }

    /// Sources of the in-edges of `v`, one entry per edge.
    pub fn predecessors(&self, v: u64) -> Result<Vec<u64>, GraphIndexError> {
        self.check_dst(v)?;
        Ok(self.in_csr().row(v).0.to_vec())
    }

    pub fn successors(&self, u: u64) -> Result<Vec<u64>, GraphIndexError> {
        self.check_src(u)?;
        Ok(self.out_csr().row(u).0.to_vec())
    }

    /// All parallel edges from `u` to `v`, in id order.
    pub fn edge_ids_between(&self, u: u64, v: u64) -> Result<Vec<u64>, GraphIndexError> {
        self.check_src(u)?;
        self.check_dst(v)?;
        let (neighbors, eids) = self.out_csr().row(u);
        Ok(neighbors
            .iter()
            .zip(eids)
            .filter(|(n, _)| **n == v)
            .map(|(_, e)| *e)
            .collect())
    }

    pub fn find_edges(&self, eids: &[u64]) -> Result<(Vec<u64>, Vec<u64>), GraphIndexError> {
        let mut src = Vec::with_capacity(eids.len());
        let mut dst = Vec::with_capacity(eids.len());
        for &e in eids {
            self.check_edge(e)?;
            src.push(self.src[e as usize]);
            dst.push(self.dst[e as usize]);
        }
        Ok((src, dst))
    }

    /// In-edges of each node in `vs`, grouped by node in the order given.
    pub fn in_edges(
        &self,
        vs: &[u64],
    ) -> Result<(Vec<u64>, Vec<u64>, Vec<u64>), GraphIndexError> {
        let csr = self.in_csr();
        let (mut src, mut dst, mut eid) = (vec![], vec![], vec![]);
        for &v in vs {
            self.check_dst(v)?;
            let (neighbors, eids) = csr.row(v);
            src.extend_from_slice(neighbors);
            dst.extend(std::iter::repeat_n(v, neighbors.len()));
            eid.extend_from_slice(eids);
        }
        Ok((src, dst, eid))
    }

    pub fn out_edges(
        &self,
        us: &[u64],
    ) -> Result<(Vec<u64>, Vec<u64>, Vec<u64>), GraphIndexError> {
        let csr = self.out_csr();
        let (mut src, mut dst, mut eid) = (vec![], vec![], vec![]);
        for &u in us {
            self.check_src(u)?;
            let (neighbors, eids) = csr.row(u);
            src.extend(std::iter::repeat_n(u, neighbors.len()));
            dst.extend_from_slice(neighbors);
            eid.extend_from_slice(eids);
        }
        Ok((src, dst, eid))
    }

    pub fn edges(&self, order: EdgeOrder) -> (Vec<u64>, Vec<u64>, Vec<u64>) {
        let mut eids: Vec<u64> = (0..self.num_edges()).collect();
        if order == EdgeOrder::SrcDst {
            eids.sort_by_key(|&e| (self.src[e as usize], self.dst[e as usize], e));
        }
        let src = eids.iter().map(|&e| self.src[e as usize]).collect();
        let dst = eids.iter().map(|&e| self.dst[e as usize]).collect();
        (src, dst, eids)
    }

    pub fn in_degrees(&self, vs: &[u64]) -> Result<Vec<u64>, GraphIndexError> {
        let csr = self.in_csr();
        vs.iter()
            .map(|&v| {
                self.check_dst(v)?;
                Ok(csr.degree(v))
            })
            .collect()
    }

    pub fn out_degrees(&self, us: &[u64]) -> Result<Vec<u64>, GraphIndexError> {
        let csr = self.out_csr();
        us.iter()
            .map(|&u| {
                self.check_src(u)?;
                Ok(csr.degree(u))
            })
            .collect()
    }

    pub fn is_multigraph(&self) -> bool {
        let mut pairs: Vec<(u64, u64)> = self.src.iter().copied().zip(self.dst.iter().copied()).collect();
        pairs.sort_unstable();
        pairs.windows(2).any(|w| w[0] == w[1])
    }

    /// Keeps edges whose endpoints both survive, renumbering nodes by their
    /// position in `src_nodes` / `dst_nodes`. Returns the parent edge ids.
    pub fn node_subgraph(
        &self,
        src_nodes: &[u64],
        dst_nodes: &[u64],
    ) -> Result<(UnitGraph, Vec<u64>), GraphIndexError> {
        let src_map = Self::position_map(src_nodes, self.num_src, "source node")?;
        let dst_map = Self::position_map(dst_nodes, self.num_dst, "destination node")?;
        let (mut src, mut dst, mut induced) = (vec![], vec![], vec![]);
        for (e, (u, v)) in self.src.iter().zip(&self.dst).enumerate() {
            if let (Some(&nu), Some(&nv)) = (src_map.get(u), dst_map.get(v)) {
                src.push(nu);
                dst.push(nv);
                induced.push(e as u64);
            }
        }
        let graph = UnitGraph::new(src_nodes.len() as u64, dst_nodes.len() as u64, src, dst)?;
        Ok((graph, induced))
    }

    /// Keeps the listed edges, remapping endpoints through the given node lists.
    pub fn edge_subgraph(
        &self,
        eids: &[u64],
        src_nodes: &[u64],
        dst_nodes: &[u64],
    ) -> Result<UnitGraph, GraphIndexError> {
        let src_map = Self::position_map(src_nodes, self.num_src, "source node")?;
        let dst_map = Self::position_map(dst_nodes, self.num_dst, "destination node")?;
        let (mut src, mut dst) = (vec![], vec![]);
        for &e in eids {
            self.check_edge(e)?;
            let (u, v) = (self.src[e as usize], self.dst[e as usize]);
            match (src_map.get(&u), dst_map.get(&v)) {
                (Some(&nu), Some(&nv)) => {
                    src.push(nu);
                    dst.push(nv);
                }
                _ => return Err(GraphIndexError::NoSuchEdge { src: u, dst: v }),
            }
        }
        UnitGraph::new(src_nodes.len() as u64, dst_nodes.len() as u64, src, dst)
    }

    fn position_map(
        nodes: &[u64],
        count: u64,
        kind: &'static str,
    ) -> Result<HashMap<u64, u64>, GraphIndexError> {
        let mut map = HashMap::with_capacity(nodes.len());
        for (i, &n) in nodes.iter().enumerate() {
            if n >= count {
                return Err(GraphIndexError::InvalidId { kind, id: n, count });
            }
            map.entry(n).or_insert(i as u64);
        }
        Ok(map)
    }

    pub fn reverse(&self) -> UnitGraph {
        UnitGraph {
            num_src: self.num_dst,
            num_dst: self.num_src,
            src: self.dst.clone(),
            dst: self.src.clone(),
            out_csr: self.in_csr.clone(),
            in_csr: self.out_csr.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> UnitGraph {
        // 0->1, 0->2, 1->3, 2->3, 0->1
        UnitGraph::new(4, 4, vec![0, 0, 1, 2, 0], vec![1, 2, 3, 3, 1]).unwrap()
    }

    #[test]
    fn adjacency_queries() {
        let g = diamond();
        assert_eq!(g.predecessors(3).unwrap(), vec![1, 2]);
        assert_eq!(g.successors(0).unwrap(), vec![1, 2, 1]);
        assert_eq!(g.edge_ids_between(0, 1).unwrap(), vec![0, 4]);
        assert_eq!(g.in_degrees(&[0, 1, 3]).unwrap(), vec![0, 2, 2]);
        assert!(g.is_multigraph());
        assert!(!g.has_edge_between(3, 0));
    }

    #[test]
    fn srcdst_order() {
        let g = diamond();
        let (src, dst, eid) = g.edges(EdgeOrder::SrcDst);
        assert_eq!(src, vec![0, 0, 0, 1, 2]);
        assert_eq!(dst, vec![1, 1, 2, 3, 3]);
        assert_eq!(eid, vec![0, 4, 1, 2, 3]);
    }

    #[test]
    fn node_subgraph_renumbers() {
        let g = diamond();
        let (sg, induced) = g.node_subgraph(&[0, 1, 3], &[0, 1, 3]).unwrap();
        assert_eq!(induced, vec![0, 2, 4]);
        assert_eq!(sg.src(), &[0, 1, 0]);
        assert_eq!(sg.dst(), &[1, 2, 1]);
    }

    #[test]
    fn rejects_out_of_range_endpoints() {
        assert!(matches!(
            UnitGraph::new(2, 2, vec![0], vec![2]),
            Err(GraphIndexError::InvalidId { id: 2, .. })
        ));
        assert!(matches!(
            UnitGraph::new(2, 2, vec![0, 1], vec![1]),
            Err(GraphIndexError::EndpointLengthMismatch { .. })
        ));
    }
}
