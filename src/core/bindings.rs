//! Resource binding table supplied by the draw path.
//!
//! The table maps (binding space, binding index) to the caller's opaque
//! handle plus the bound byte range. The backend only checks that indices it
//! references are present; the storage behind a handle is never inspected.

use hashbrown::HashMap;

use super::error::{BindingSpace, CompileError, CompileResult};

/// One bound resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceBinding {
    /// Opaque buffer/texture/sampler handle.
    pub handle: u64,
    pub size: u64,
    pub offset: u64,
}

/// Binding table for one stage.
#[derive(Debug, Clone, Default)]
pub struct BindingTable {
    entries: HashMap<(BindingSpace, u32), ResourceBinding>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, space: BindingSpace, index: u32, binding: ResourceBinding) -> &mut Self {
        if self.entries.insert((space, index), binding).is_some() {
            log::debug!("rebinding {} {}", space, index);
        }
        self
    }

    /// Bind indices `0..count` of a space with placeholder handles.
    pub fn bind_range(&mut self, space: BindingSpace, count: u32) -> &mut Self {
        for index in 0..count {
            self.bind(
                space,
                index,
                ResourceBinding {
                    handle: index as u64,
                    ..Default::default()
                },
            );
        }
        self
    }

    pub fn contains(&self, space: BindingSpace, index: u32) -> bool {
        self.entries.contains_key(&(space, index))
    }

    /// Look up a binding, failing with a binding error if it is absent.
    pub fn lookup(&self, space: BindingSpace, index: u32) -> CompileResult<&ResourceBinding> {
        self.entries.get(&(space, index)).ok_or_else(|| {
            let bound = self.indices(space);
            let reason = if bound.is_empty() {
                "no bindings of this kind supplied".to_string()
            } else {
                format!("not present in binding table (bound: {:?})", bound)
            };
            CompileError::binding(space, index, reason)
        })
    }

    /// Bound indices of a space in ascending order.
    pub fn indices(&self, space: BindingSpace) -> Vec<u32> {
        let mut indices: Vec<u32> = self
            .entries
            .keys()
            .filter(|(s, _)| *s == space)
            .map(|(_, i)| *i)
            .collect();
        indices.sort_unstable();
        indices
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_reports_missing_index() {
        let mut table = BindingTable::new();
        table.bind_range(BindingSpace::Texture, 4);
        assert!(table.lookup(BindingSpace::Texture, 3).is_ok());

        let err = table.lookup(BindingSpace::Texture, 5).unwrap_err();
        assert!(err.is_binding_error());
        assert!(err.to_string().contains("texture binding 5"));
        assert!(err.to_string().contains("[0, 1, 2, 3]"));

        let err = table.lookup(BindingSpace::Image, 0).unwrap_err();
        assert!(err.to_string().contains("no bindings"));
    }

    #[test]
    fn test_spaces_are_independent() {
        let mut table = BindingTable::new();
        table.bind(
            BindingSpace::UniformBuffer,
            1,
            ResourceBinding {
                handle: 0xfeed,
                size: 256,
                offset: 0,
            },
        );
        assert!(!table.contains(BindingSpace::StorageBuffer, 1));
        assert_eq!(
            table.lookup(BindingSpace::UniformBuffer, 1).unwrap().handle,
            0xfeed
        );
        assert_eq!(table.len(), 1);
    }
}
