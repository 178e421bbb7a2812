//! Persisted graph format and the byte payloads exchanged with a distributed
//! key-value store. The transport itself lives outside this crate.

use crate::config::GraphConfig;
use crate::dtype::DType;
use crate::error::GraphError;
use crate::frame::FeatureMap;
use crate::heterograph::{HeteroGraph, HeteroGraphBuilder, EID, NID};
use crate::numeric_tensor::NumericTensor;
use crate::selection::{EdgeSelection, Selection};
use crate::type_resolver::{CanonicalEdgeType, EdgeTypeKey};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("invalid graph data: {0}")]
    InvalidGraph(String),
    #[error("tensor payload of {got} bytes does not match shape {shape:?} of dtype {dtype}")]
    PayloadSize {
        dtype: DType,
        shape: Vec<usize>,
        got: usize,
    },
}

/// A tensor as dtype, shape and little-endian element bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorData {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub bytes: Vec<u8>,
}

fn pod_bytes<T: bytemuck::Pod>(values: impl Iterator<Item = T>) -> Vec<u8> {
    let values: Vec<T> = values.collect();
    bytemuck::cast_slice(&values).to_vec()
}

fn read_pod<T: bytemuck::Pod>(bytes: &[u8]) -> Vec<T> {
    bytes
        .chunks_exact(size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect()
}

impl TensorData {
    pub fn from_tensor(tensor: &NumericTensor) -> Self {
        let bytes = match tensor {
            NumericTensor::F64(x) => pod_bytes(x.iter().copied()),
            NumericTensor::F32(x) => pod_bytes(x.iter().copied()),
            NumericTensor::I64(x) => pod_bytes(x.iter().copied()),
            NumericTensor::I32(x) => pod_bytes(x.iter().copied()),
            NumericTensor::U8(x) => x.iter().copied().collect(),
            NumericTensor::BOOL(x) => x.iter().map(|b| *b as u8).collect(),
        };
        Self {
            dtype: tensor.dtype(),
            shape: tensor.shape().to_vec(),
            bytes,
        }
    }

    pub fn to_tensor(&self) -> Result<NumericTensor, SerializationError> {
        let elements: usize = self.shape.iter().product();
        if self.bytes.len() != elements * self.dtype.size() {
            return Err(SerializationError::PayloadSize {
                dtype: self.dtype,
                shape: self.shape.clone(),
                got: self.bytes.len(),
            });
        }
        let shape = &self.shape;
        let tensor = match self.dtype {
            DType::F64 => NumericTensor::from_vec_shape(read_pod::<f64>(&self.bytes), shape),
            DType::F32 => NumericTensor::from_vec_shape(read_pod::<f32>(&self.bytes), shape),
            DType::I64 => NumericTensor::from_vec_shape(read_pod::<i64>(&self.bytes), shape),
            DType::I32 => NumericTensor::from_vec_shape(read_pod::<i32>(&self.bytes), shape),
            DType::U8 => NumericTensor::from_vec_shape(self.bytes.clone(), shape),
            DType::BOOL => {
                NumericTensor::from_vec_shape(self.bytes.iter().map(|b| *b != 0).collect::<Vec<_>>(), shape)
            }
        };
        tensor.map_err(|err| SerializationError::InvalidGraph(err.to_string()))
    }
}

fn encode_features(features: &FeatureMap) -> Vec<(String, TensorData)> {
    let mut encoded: Vec<_> = features
        .iter()
        .map(|(k, v)| (k.clone(), TensorData::from_tensor(v)))
        .collect();
    encoded.sort_by(|a, b| a.0.cmp(&b.0));
    encoded
}

fn decode_features(features: &[(String, TensorData)]) -> Result<FeatureMap, SerializationError> {
    features
        .iter()
        .map(|(k, v)| Ok((k.clone(), v.to_tensor()?)))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationData {
    pub etype: CanonicalEdgeType,
    pub src: Vec<u64>,
    pub dst: Vec<u64>,
}

/// Everything needed to rebuild a store: structure, features and config.
/// Initializers and pending messages are not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphData {
    pub node_types: Vec<(String, u64)>,
    pub relations: Vec<RelationData>,
    pub node_features: Vec<(String, Vec<(String, TensorData)>)>,
    pub edge_features: Vec<(CanonicalEdgeType, Vec<(String, TensorData)>)>,
    #[serde(default)]
    pub config: GraphConfig,
}

impl GraphData {
    pub fn from_graph(graph: &HeteroGraph) -> Result<Self, GraphError> {
        let types = graph.type_resolver();
        let mut data = GraphData {
            node_types: vec![],
            relations: vec![],
            node_features: vec![],
            edge_features: vec![],
            config: graph.config().clone(),
        };
        for t in types.node_type_ids() {
            let name = types.node_type_name(t).to_string();
            data.node_types.push((name.clone(), graph.index().number_of_nodes(t)));
            let features = graph.node_frame(t).borrow().select_rows(&Selection::All)?;
            data.node_features.push((name, encode_features(&features)));
        }
        for e in types.edge_type_ids() {
            let etype = types.canonical_etype(e).clone();
            let relation = graph.index().relation(e);
            data.relations.push(RelationData {
                etype: etype.clone(),
                src: relation.src().to_vec(),
                dst: relation.dst().to_vec(),
            });
            let features = graph.edge_frame(e).borrow().select_rows(&Selection::All)?;
            data.edge_features.push((etype, encode_features(&features)));
        }
        Ok(data)
    }

    fn validate(&self) -> Result<(), SerializationError> {
        let count = |name: &str| {
            self.node_types
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, c)| *c)
                .ok_or_else(|| SerializationError::InvalidGraph(format!("undeclared node type {name:?}")))
        };
        for relation in &self.relations {
            if relation.src.len() != relation.dst.len() {
                return Err(SerializationError::InvalidGraph(format!(
                    "{} has {} sources but {} destinations",
                    relation.etype,
                    relation.src.len(),
                    relation.dst.len()
                )));
            }
            for (ids, ntype) in [(&relation.src, &relation.etype.src_type), (&relation.dst, &relation.etype.dst_type)] {
                let n = count(ntype)?;
                if let Some(id) = ids.iter().find(|&&id| id >= n) {
                    return Err(SerializationError::InvalidGraph(format!(
                        "{} references node {id} of {ntype:?}, which has {n} nodes",
                        relation.etype
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn into_graph(self) -> Result<HeteroGraph, GraphError> {
        self.validate()?;
        let mut builder = HeteroGraphBuilder::new().config(self.config);
        for (name, count) in &self.node_types {
            builder = builder.node_type(name, *count);
        }
        for relation in self.relations {
            builder = builder.relation(relation.etype, relation.src, relation.dst);
        }
        let graph = builder.build()?;
        for (ntype, features) in &self.node_features {
            graph.set_n_repr(&decode_features(features)?, Selection::All, Some(ntype.as_str()))?;
        }
        for (etype, features) in &self.edge_features {
            graph.set_e_repr(
                &decode_features(features)?,
                EdgeSelection::All,
                Some(EdgeTypeKey::from(etype)),
            )?;
        }
        Ok(graph)
    }
}

pub fn save_graph(path: impl AsRef<Path>, graph: &HeteroGraph) -> Result<(), GraphError> {
    let data = GraphData::from_graph(graph)?;
    let file = std::fs::File::create(path.as_ref()).map_err(SerializationError::from)?;
    serde_json::to_writer(std::io::BufWriter::new(file), &data).map_err(SerializationError::from)?;
    log::debug!("saved graph to {}", path.as_ref().display());
    Ok(())
}

pub fn load_graph(path: impl AsRef<Path>) -> Result<HeteroGraph, GraphError> {
    let file = std::fs::File::open(path.as_ref()).map_err(SerializationError::from)?;
    let data: GraphData =
        serde_json::from_reader(std::io::BufReader::new(file)).map_err(SerializationError::from)?;
    data.into_graph()
}

/// One relation restricted to a set of edges, with the rows of the touched
/// nodes and edges. Local ids index the `*_parent_ids` arrays. When the
/// relation stays within one node type both sides share one node list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationSubgraph {
    pub etype: CanonicalEdgeType,
    pub src: Vec<u64>,
    pub dst: Vec<u64>,
    pub src_parent_ids: Vec<u64>,
    pub dst_parent_ids: Vec<u64>,
    pub edge_parent_ids: Vec<u64>,
    pub src_features: Vec<(String, TensorData)>,
    pub dst_features: Vec<(String, TensorData)>,
    pub edge_features: Vec<(String, TensorData)>,
}

fn relabel(ids: &[u64], nodes: &[u64]) -> Vec<u64> {
    // `nodes` is sorted and contains every id
    ids.iter()
        .map(|id| nodes.partition_point(|n| n < id) as u64)
        .collect()
}

impl RelationSubgraph {
    pub fn from_edges(graph: &HeteroGraph, eids: &[u64], etype: Option<EdgeTypeKey>) -> Result<Self, GraphError> {
        let e = graph.etype_id(etype.as_ref())?;
        let (s, d) = graph.type_resolver().endpoints(e);
        let (src, dst) = graph.index().relation(e).find_edges(eids)?;
        let sorted = |ids: &[u64]| {
            let mut ids = ids.to_vec();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        let (src_nodes, dst_nodes) = if s == d {
            let both = sorted(&[src.as_slice(), dst.as_slice()].concat());
            (both.clone(), both)
        } else {
            (sorted(&src), sorted(&dst))
        };
        let rows = |ids: &[u64]| Selection::Ids(ids.to_vec());
        let src_features = graph.node_frame(s).borrow().select_rows(&rows(&src_nodes))?;
        let dst_features = graph.node_frame(d).borrow().select_rows(&rows(&dst_nodes))?;
        let edge_features = graph.edge_frame(e).borrow().select_rows(&rows(eids))?;
        Ok(Self {
            etype: graph.type_resolver().canonical_etype(e).clone(),
            src: relabel(&src, &src_nodes),
            dst: relabel(&dst, &dst_nodes),
            src_parent_ids: src_nodes,
            dst_parent_ids: dst_nodes,
            edge_parent_ids: eids.to_vec(),
            src_features: encode_features(&src_features),
            dst_features: encode_features(&dst_features),
            edge_features: encode_features(&edge_features),
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerializationError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// A standalone store for the subgraph; `_ID` holds the parent ids.
    pub fn into_graph(self, config: GraphConfig) -> Result<HeteroGraph, GraphError> {
        let same_type = self.etype.src_type == self.etype.dst_type;
        let mut builder = HeteroGraphBuilder::new()
            .config(config)
            .node_type(&self.etype.src_type, self.src_parent_ids.len() as u64);
        if !same_type {
            builder = builder.node_type(&self.etype.dst_type, self.dst_parent_ids.len() as u64);
        }
        let graph = builder.relation(self.etype.clone(), self.src, self.dst).build()?;
        let id_column = |ids: &[u64]| NumericTensor::from_vec(ids.iter().map(|&i| i as i64).collect::<Vec<i64>>());

        let mut src_features = decode_features(&self.src_features)?;
        src_features.insert(NID.to_string(), id_column(&self.src_parent_ids));
        graph.set_n_repr(&src_features, Selection::All, Some(self.etype.src_type.as_str()))?;
        if !same_type {
            let mut dst_features = decode_features(&self.dst_features)?;
            dst_features.insert(NID.to_string(), id_column(&self.dst_parent_ids));
            graph.set_n_repr(&dst_features, Selection::All, Some(self.etype.dst_type.as_str()))?;
        }
        let mut edge_features = decode_features(&self.edge_features)?;
        edge_features.insert(EID.to_string(), id_column(&self.edge_parent_ids));
        graph.set_e_repr(&edge_features, EdgeSelection::All, None)?;
        Ok(graph)
    }
}

/// Envelope of the messages a key-value store exchanges with its workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KvMessage {
    Init {
        rank: u64,
        name: String,
        shape: Vec<usize>,
        dtype: DType,
    },
    Push {
        rank: u64,
        name: String,
        ids: Vec<u64>,
        data: TensorData,
    },
    Pull {
        rank: u64,
        name: String,
        ids: Vec<u64>,
    },
    /// Reply to a `Pull` carrying the requested rows.
    PullBack {
        rank: u64,
        name: String,
        ids: Vec<u64>,
        data: TensorData,
    },
    Barrier {
        rank: u64,
    },
    Final {
        rank: u64,
    },
}

impl KvMessage {
    pub fn rank(&self) -> u64 {
        match self {
            KvMessage::Init { rank, .. }
            | KvMessage::Push { rank, .. }
            | KvMessage::Pull { rank, .. }
            | KvMessage::PullBack { rank, .. }
            | KvMessage::Barrier { rank }
            | KvMessage::Final { rank } => *rank,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, SerializationError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SerializationError> {
        let message: KvMessage = serde_json::from_slice(bytes)?;
        if let KvMessage::Push { ids, data, .. } | KvMessage::PullBack { ids, data, .. } = &message {
            if data.shape.first().copied() != Some(ids.len()) {
                return Err(SerializationError::InvalidGraph(format!(
                    "payload of shape {:?} for {} ids",
                    data.shape,
                    ids.len()
                )));
            }
        }
        Ok(message)
    }
}
