use std::collections::BTreeMap;

use crate::context::ObjectNode;

/// Most distinct objects one build attempt may hold.
pub const OBJECT_HEAP_LIMIT: usize = 128;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HeapError {
    #[error("object heap overflow")]
    Overflow,

    #[error("object {name} was not compiled")]
    Missing { name: String },

    #[error("object files exceed {limit} bytes")]
    Capacity { limit: usize },
}

/// Finished objects of the current build attempt, keyed by the filename the
/// parent referenced them with.
///
/// Pushing a name again replaces the earlier node, so a parent always merges
/// the copy compiled for it just before its own finishing pass.
#[derive(Debug)]
pub struct ObjectHeap {
    objects: BTreeMap<String, ObjectNode>,
    limit: usize,
}

impl Default for ObjectHeap {
    fn default() -> Self {
        Self::new(OBJECT_HEAP_LIMIT)
    }
}

impl ObjectHeap {
    pub fn new(limit: usize) -> Self {
        Self {
            objects: BTreeMap::new(),
            limit,
        }
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&ObjectNode> {
        self.objects.get(name)
    }

    pub fn push(&mut self, name: &str, node: ObjectNode) -> Result<(), HeapError> {
        if !self.objects.contains_key(name) && self.objects.len() >= self.limit {
            return Err(HeapError::Overflow);
        }
        self.objects.insert(name.to_owned(), node);
        Ok(())
    }

    /// Copies the nodes named by `names`, in order, checking that they fit
    /// behind `base_size` bytes of parent code within `limit`.
    pub fn merge(
        &self,
        names: &[String],
        base_size: usize,
        limit: usize,
    ) -> Result<Vec<ObjectNode>, HeapError> {
        let mut total = base_size;
        names
            .iter()
            .map(|name| {
                let node = self.objects.get(name).ok_or_else(|| HeapError::Missing {
                    name: name.clone(),
                })?;
                total += node.code_size();
                if total > limit {
                    return Err(HeapError::Capacity { limit });
                }
                Ok(node.clone())
            })
            .collect()
    }
}
