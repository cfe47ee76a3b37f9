//! Entry points used by the database write path and query layer.
//!
//! Nodes take part by implementing [`TypeIndexed`]; the index never looks at
//! a node beyond the `(uuid, type id)` pair it reports.

use crate::error::Result;
use crate::graph::Graph;
use crate::list::IndexList;
use crate::type_index::{TypeIndex, TypeListSnapshot};
use crate::types::{NodeUuid, TypeId};

pub trait TypeIndexed {
    fn type_index_key(&self) -> (NodeUuid, TypeId);
}

impl TypeIndexed for (NodeUuid, TypeId) {
    fn type_index_key(&self) -> (NodeUuid, TypeId) {
        *self
    }
}

impl<T: TypeIndexed + ?Sized> TypeIndexed for &T {
    fn type_index_key(&self) -> (NodeUuid, TypeId) {
        (**self).type_index_key()
    }
}

/// Index a newly written node under its type.
pub fn add_to_type_index<N: TypeIndexed + ?Sized>(
    node: &N,
    graph: &Graph,
    unless_present: bool,
) -> Result<IndexList> {
    let (uuid, type_id) = node.type_index_key();
    graph.type_index().push(uuid, type_id, unless_present)
}

/// Drop a deleted node from its type's list.
pub fn remove_from_type_index<N: TypeIndexed + ?Sized>(node: &N, graph: &Graph) -> Result<IndexList> {
    let (uuid, type_id) = node.type_index_key();
    graph.type_index().remove(uuid, type_id)
}

/// Every node of `type_id`, newest first, copied out under the type's lock.
pub fn get_type_index_list(index: &TypeIndex, type_id: TypeId) -> Result<TypeListSnapshot> {
    index.snapshot(type_id)
}
