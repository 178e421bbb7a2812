use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, Hash, Ord, PartialOrd, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeTypeId {
    inner: usize,
}

impl NodeTypeId {
    pub(crate) fn new(inner: usize) -> Self {
        Self { inner }
    }

    pub fn index(&self) -> usize {
        self.inner
    }
}

#[derive(Debug, Clone, Copy, Hash, Ord, PartialOrd, Eq, PartialEq, Serialize, Deserialize)]
pub struct EdgeTypeId {
    inner: usize,
}

impl EdgeTypeId {
    pub(crate) fn new(inner: usize) -> Self {
        Self { inner }
    }

    pub fn index(&self) -> usize {
        self.inner
    }
}

/// `(source node type, relation, destination node type)`.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct CanonicalEdgeType {
    pub src_type: String,
    pub relation: String,
    pub dst_type: String,
}

impl CanonicalEdgeType {
    pub fn new(src_type: &str, relation: &str, dst_type: &str) -> Self {
        Self {
            src_type: src_type.to_string(),
            relation: relation.to_string(),
            dst_type: dst_type.to_string(),
        }
    }
}

impl core::fmt::Display for CanonicalEdgeType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "({}, {}, {})", self.src_type, self.relation, self.dst_type)
    }
}

impl From<(&str, &str, &str)> for CanonicalEdgeType {
    fn from((s, r, d): (&str, &str, &str)) -> Self {
        Self::new(s, r, d)
    }
}

/// How a caller names an edge type: a bare relation name or a full triple.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum EdgeTypeKey {
    Name(String),
    Canonical(CanonicalEdgeType),
}

impl From<&str> for EdgeTypeKey {
    fn from(name: &str) -> Self {
        EdgeTypeKey::Name(name.to_string())
    }
}

impl From<String> for EdgeTypeKey {
    fn from(name: String) -> Self {
        EdgeTypeKey::Name(name)
    }
}

impl From<(&str, &str, &str)> for EdgeTypeKey {
    fn from(triple: (&str, &str, &str)) -> Self {
        EdgeTypeKey::Canonical(triple.into())
    }
}

impl From<CanonicalEdgeType> for EdgeTypeKey {
    fn from(c: CanonicalEdgeType) -> Self {
        EdgeTypeKey::Canonical(c)
    }
}

impl From<&CanonicalEdgeType> for EdgeTypeKey {
    fn from(c: &CanonicalEdgeType) -> Self {
        EdgeTypeKey::Canonical(c.clone())
    }
}

impl core::fmt::Display for EdgeTypeKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EdgeTypeKey::Name(n) => write!(f, "{n}"),
            EdgeTypeKey::Canonical(c) => write!(f, "{c}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
#[strum(serialize_all = "lowercase")]
pub enum TypeKind {
    Node,
    Edge,
}

#[derive(Debug, thiserror::Error)]
pub enum TypeResolverError {
    #[error("{kind} type must be specified when the graph has {count} {kind} types")]
    AmbiguousType { kind: TypeKind, count: usize },
    #[error("edge type {0:?} is ambiguous; use a (src, relation, dst) triple")]
    AmbiguousEdgeType(String),
    #[error("unknown {kind} type {name:?}")]
    UnknownType { kind: TypeKind, name: String },
    #[error("duplicate {kind} type {name:?}")]
    DuplicateType { kind: TypeKind, name: String },
}

/// Maps type names to dense ids. Built once per graph and shared by derived graphs.
#[derive(Debug, Clone)]
pub struct TypeResolver {
    ntypes: Vec<String>,
    ntype_ids: HashMap<String, NodeTypeId>,
    canonical_etypes: Vec<CanonicalEdgeType>,
    canonical_ids: HashMap<CanonicalEdgeType, EdgeTypeId>,
    // None marks a relation name shared by several canonical types
    bare_etypes: HashMap<String, Option<EdgeTypeId>>,
    endpoints: Vec<(NodeTypeId, NodeTypeId)>,
}

impl TypeResolver {
    pub fn new(
        ntypes: Vec<String>,
        canonical_etypes: Vec<CanonicalEdgeType>,
    ) -> Result<Self, TypeResolverError> {
        let mut ntype_ids = HashMap::new();
        for (i, name) in ntypes.iter().enumerate() {
            if ntype_ids.insert(name.clone(), NodeTypeId::new(i)).is_some() {
                return Err(TypeResolverError::DuplicateType {
                    kind: TypeKind::Node,
                    name: name.clone(),
                });
            }
        }
        let mut canonical_ids = HashMap::new();
        let mut bare_etypes: HashMap<String, Option<EdgeTypeId>> = HashMap::new();
        let mut endpoints = Vec::with_capacity(canonical_etypes.len());
        for (i, c) in canonical_etypes.iter().enumerate() {
            let id = EdgeTypeId::new(i);
            if canonical_ids.insert(c.clone(), id).is_some() {
                return Err(TypeResolverError::DuplicateType {
                    kind: TypeKind::Edge,
                    name: c.to_string(),
                });
            }
            bare_etypes
                .entry(c.relation.clone())
                .and_modify(|e| *e = None)
                .or_insert(Some(id));
            let lookup = |name: &String| {
                ntype_ids
                    .get(name)
                    .copied()
                    .ok_or_else(|| TypeResolverError::UnknownType {
                        kind: TypeKind::Node,
                        name: name.clone(),
                    })
            };
            endpoints.push((lookup(&c.src_type)?, lookup(&c.dst_type)?));
        }
        Ok(Self {
            ntypes,
            ntype_ids,
            canonical_etypes,
            canonical_ids,
            bare_etypes,
            endpoints,
        })
    }

    pub fn num_ntypes(&self) -> usize {
        self.ntypes.len()
    }

    pub fn num_etypes(&self) -> usize {
        self.canonical_etypes.len()
    }

    pub fn ntypes(&self) -> &[String] {
        &self.ntypes
    }

    /// Relation names in edge type id order. Names may repeat.
    pub fn etypes(&self) -> Vec<&str> {
        self.canonical_etypes
            .iter()
            .map(|c| c.relation.as_str())
            .collect()
    }

    pub fn canonical_etypes(&self) -> &[CanonicalEdgeType] {
        &self.canonical_etypes
    }

    pub fn node_type_name(&self, id: NodeTypeId) -> &str {
        &self.ntypes[id.index()]
    }

    /// Bare relation name of an edge type.
    pub fn edge_type_name(&self, id: EdgeTypeId) -> &str {
        &self.canonical_etypes[id.index()].relation
    }

    pub fn canonical_etype(&self, id: EdgeTypeId) -> &CanonicalEdgeType {
        &self.canonical_etypes[id.index()]
    }

    pub fn endpoints(&self, id: EdgeTypeId) -> (NodeTypeId, NodeTypeId) {
        self.endpoints[id.index()]
    }

    pub fn node_type_ids(&self) -> impl Iterator<Item = NodeTypeId> + '_ {
        (0..self.ntypes.len()).map(NodeTypeId::new)
    }

    pub fn edge_type_ids(&self) -> impl Iterator<Item = EdgeTypeId> + '_ {
        (0..self.canonical_etypes.len()).map(EdgeTypeId::new)
    }

    pub fn resolve_node_type(&self, name: Option<&str>) -> Result<NodeTypeId, TypeResolverError> {
        match name {
            None => {
                if self.ntypes.len() == 1 {
                    Ok(NodeTypeId::new(0))
                } else {
                    Err(TypeResolverError::AmbiguousType {
                        kind: TypeKind::Node,
                        count: self.ntypes.len(),
                    })
                }
            }
            Some(name) => {
                self.ntype_ids
                    .get(name)
                    .copied()
                    .ok_or_else(|| TypeResolverError::UnknownType {
                        kind: TypeKind::Node,
                        name: name.to_string(),
                    })
            }
        }
    }

    pub fn resolve_edge_type(
        &self,
        key: Option<&EdgeTypeKey>,
    ) -> Result<EdgeTypeId, TypeResolverError> {
        match key {
            None => {
                if self.canonical_etypes.len() == 1 {
                    Ok(EdgeTypeId::new(0))
                } else {
                    Err(TypeResolverError::AmbiguousType {
                        kind: TypeKind::Edge,
                        count: self.canonical_etypes.len(),
                    })
                }
            }
            Some(EdgeTypeKey::Name(name)) => match self.bare_etypes.get(name) {
                Some(Some(id)) => Ok(*id),
                Some(None) => Err(TypeResolverError::AmbiguousEdgeType(name.clone())),
                None => Err(TypeResolverError::UnknownType {
                    kind: TypeKind::Edge,
                    name: name.clone(),
                }),
            },
            Some(EdgeTypeKey::Canonical(c)) => {
                self.canonical_ids
                    .get(c)
                    .copied()
                    .ok_or_else(|| TypeResolverError::UnknownType {
                        kind: TypeKind::Edge,
                        name: c.to_string(),
                    })
            }
        }
    }

    pub fn to_canonical_etype(
        &self,
        key: &EdgeTypeKey,
    ) -> Result<&CanonicalEdgeType, TypeResolverError> {
        Ok(self.canonical_etype(self.resolve_edge_type(Some(key))?))
    }

    /// Edge types matching a `(src, relation, dst)` pattern; `None` matches anything.
    pub fn match_relations(
        &self,
        src_type: Option<&str>,
        relation: Option<&str>,
        dst_type: Option<&str>,
    ) -> Vec<EdgeTypeId> {
        let matches = |want: Option<&str>, have: &str| want.is_none_or(|w| w == have);
        self.canonical_etypes
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                matches(src_type, &c.src_type)
                    && matches(relation, &c.relation)
                    && matches(dst_type, &c.dst_type)
            })
            .map(|(i, _)| EdgeTypeId::new(i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> TypeResolver {
        TypeResolver::new(
            vec!["user".into(), "game".into()],
            vec![
                ("user", "follows", "user").into(),
                ("user", "follows", "game").into(),
                ("user", "plays", "game").into(),
            ],
        )
        .unwrap()
    }

    #[test]
    fn shared_relation_name_is_ambiguous() {
        let r = resolver();
        assert!(matches!(
            r.resolve_edge_type(Some(&"follows".into())),
            Err(TypeResolverError::AmbiguousEdgeType(_))
        ));
        let id = r
            .resolve_edge_type(Some(&("user", "follows", "game").into()))
            .unwrap();
        assert_eq!(id.index(), 1);
        assert_eq!(r.resolve_edge_type(Some(&"plays".into())).unwrap().index(), 2);
    }

    #[test]
    fn omitted_type_needs_a_single_candidate() {
        let r = resolver();
        assert!(matches!(
            r.resolve_node_type(None),
            Err(TypeResolverError::AmbiguousType { kind: TypeKind::Node, count: 2 })
        ));
        assert!(matches!(
            r.resolve_node_type(Some("item")),
            Err(TypeResolverError::UnknownType { .. })
        ));
    }

    #[test]
    fn wildcard_matching() {
        let r = resolver();
        assert_eq!(r.match_relations(Some("user"), None, Some("game")).len(), 2);
        assert_eq!(r.match_relations(None, Some("follows"), None).len(), 2);
        assert!(r.match_relations(Some("game"), None, None).is_empty());
    }
}
