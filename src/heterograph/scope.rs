use super::HeteroGraph;
use std::cell::RefCell;
use std::rc::Rc;

fn detach<T: Clone>(shared: &[Rc<RefCell<T>>]) -> Vec<Rc<RefCell<T>>> {
    shared
        .iter()
        .map(|cell| Rc::new(RefCell::new(cell.borrow().clone())))
        .collect()
}

impl HeteroGraph {
    /// A store over the same structure whose frames are fresh tables pointing at
    /// the same column storage. Adding, replacing or popping a field on the
    /// result leaves `self` untouched; row updates rebuild the column, so they
    /// do not leak either.
    pub fn local_var(&self) -> HeteroGraph {
        HeteroGraph {
            index: self.index.clone(),
            types: self.types.clone(),
            node_frames: detach(&self.node_frames),
            edge_frames: detach(&self.edge_frames),
            msg_frames: detach(&self.msg_frames),
            msg_indicators: detach(&self.msg_indicators),
            config: self.config.clone(),
            observer: self.observer.clone(),
        }
    }

    /// Runs `f` on a [`local_var`](Self::local_var) view and drops the view afterwards.
    pub fn local_scope<R>(&self, f: impl FnOnce(&HeteroGraph) -> R) -> R {
        let scoped = self.local_var();
        log::trace!("entering local scope");
        f(&scoped)
    }
}
