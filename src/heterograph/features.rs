use super::HeteroGraph;
use crate::error::GraphError;
use crate::frame::{FeatureMap, Initializer, Scheme};
use crate::numeric_tensor::NumericTensor;
use crate::selection::{EdgeSelection, Selection};
use crate::type_resolver::{EdgeTypeId, EdgeTypeKey};

impl HeteroGraph {
    fn edge_rows(&self, e: EdgeTypeId, edges: EdgeSelection) -> Result<Selection, GraphError> {
        Ok(match edges {
            EdgeSelection::All => Selection::All,
            EdgeSelection::Ids(ids) => {
                Selection::Ids(Selection::Ids(ids).resolve(self.index.number_of_edges(e), "edge")?)
            }
            pairs => Selection::Ids(self.resolve_edges(e, &pairs)?.eids),
        })
    }

    /// Features of the selected nodes.
    pub fn get_n_repr(&self, nodes: impl Into<Selection>, ntype: Option<&str>) -> Result<FeatureMap, GraphError> {
        let t = self.ntype_id(ntype)?;
        let nodes = nodes.into();
        if let Selection::Ids(ids) = &nodes {
            nodes.resolve(self.index.number_of_nodes(t), "node")?;
            if ids.is_empty() {
                return Ok(FeatureMap::new());
            }
        }
        Ok(self.node_frame(t).borrow().select_rows(&nodes)?)
    }

    /// Writes every field of `features` to the selected nodes. Nothing is
    /// written if any field fails validation.
    pub fn set_n_repr(
        &self,
        features: &FeatureMap,
        nodes: impl Into<Selection>,
        ntype: Option<&str>,
    ) -> Result<(), GraphError> {
        let t = self.ntype_id(ntype)?;
        let nodes = nodes.into();
        nodes.resolve(self.index.number_of_nodes(t), "node")?;
        self.node_frame(t).borrow_mut().update(&nodes, features)?;
        Ok(())
    }

    pub fn pop_n_repr(&self, field: &str, ntype: Option<&str>) -> Result<NumericTensor, GraphError> {
        let t = self.ntype_id(ntype)?;
        Ok(self.node_frame(t).borrow_mut().pop(field)?)
    }

    pub fn get_e_repr(&self, edges: impl Into<EdgeSelection>, etype: Option<EdgeTypeKey>) -> Result<FeatureMap, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let rows = self.edge_rows(e, edges.into())?;
        if matches!(&rows, Selection::Ids(ids) if ids.is_empty()) {
            return Ok(FeatureMap::new());
        }
        Ok(self.edge_frame(e).borrow().select_rows(&rows)?)
    }

    pub fn set_e_repr(
        &self,
        features: &FeatureMap,
        edges: impl Into<EdgeSelection>,
        etype: Option<EdgeTypeKey>,
    ) -> Result<(), GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        let rows = self.edge_rows(e, edges.into())?;
        self.edge_frame(e).borrow_mut().update(&rows, features)?;
        Ok(())
    }

    pub fn pop_e_repr(&self, field: &str, etype: Option<EdgeTypeKey>) -> Result<NumericTensor, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        Ok(self.edge_frame(e).borrow_mut().pop(field)?)
    }

    /// Whole column of one node field.
    pub fn ndata(&self, field: &str, ntype: Option<&str>) -> Result<NumericTensor, GraphError> {
        let t = self.ntype_id(ntype)?;
        Ok(self.node_frame(t).borrow().get(field)?)
    }

    pub fn set_ndata(&self, field: &str, value: NumericTensor, ntype: Option<&str>) -> Result<(), GraphError> {
        let t = self.ntype_id(ntype)?;
        self.node_frame(t).borrow_mut().set(&Selection::All, field, &value)?;
        Ok(())
    }

    pub fn has_ndata(&self, field: &str, ntype: Option<&str>) -> Result<bool, GraphError> {
        let t = self.ntype_id(ntype)?;
        Ok(self.node_frame(t).borrow().contains(field))
    }

    pub fn edata(&self, field: &str, etype: Option<EdgeTypeKey>) -> Result<NumericTensor, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        Ok(self.edge_frame(e).borrow().get(field)?)
    }

    pub fn set_edata(&self, field: &str, value: NumericTensor, etype: Option<EdgeTypeKey>) -> Result<(), GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        self.edge_frame(e).borrow_mut().set(&Selection::All, field, &value)?;
        Ok(())
    }

    pub fn has_edata(&self, field: &str, etype: Option<EdgeTypeKey>) -> Result<bool, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        Ok(self.edge_frame(e).borrow().contains(field))
    }

    pub fn node_attr_schemes(&self, ntype: Option<&str>) -> Result<Vec<(String, Scheme)>, GraphError> {
        let t = self.ntype_id(ntype)?;
        Ok(self.node_frame(t).borrow().schemes())
    }

    pub fn edge_attr_schemes(&self, etype: Option<EdgeTypeKey>) -> Result<Vec<(String, Scheme)>, GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        Ok(self.edge_frame(e).borrow().schemes())
    }

    /// Registers an initializer for one field, or the default one when `field` is `None`.
    pub fn set_n_initializer(
        &self,
        initializer: Initializer,
        field: Option<&str>,
        ntype: Option<&str>,
    ) -> Result<(), GraphError> {
        let t = self.ntype_id(ntype)?;
        self.node_frame(t).borrow_mut().set_initializer(initializer, field);
        Ok(())
    }

    pub fn set_e_initializer(
        &self,
        initializer: Initializer,
        field: Option<&str>,
        etype: Option<EdgeTypeKey>,
    ) -> Result<(), GraphError> {
        let e = self.etype_id(etype.as_ref())?;
        self.edge_frame(e).borrow_mut().set_initializer(initializer, field);
        Ok(())
    }
}
