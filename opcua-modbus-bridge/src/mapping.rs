//! Node identifier ↔ register offset mapping.
//!
//! The mapped range is the contiguous block of node identifiers
//! `[base, base + count)` in a single namespace. Offset `k` corresponds to
//! identifier `base + k` and to register `start_address + k`.

use crate::node::NodeId;

/// A node that lies outside the mapped range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("node {node} is outside the mapped range")]
pub struct OutOfRange {
    pub node: NodeId,
}

/// Translates node identifiers to register offsets and back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressMapper {
    base: NodeId,
    count: u16,
}

impl AddressMapper {
    /// Create a mapper for `count` nodes starting at `base`.
    pub fn new(base: NodeId, count: u16) -> Self {
        Self { base, count }
    }

    /// First mapped node.
    pub fn base(&self) -> NodeId {
        self.base
    }

    /// Number of mapped nodes (and registers).
    pub fn count(&self) -> u16 {
        self.count
    }

    /// Register offset of `node`, or [`OutOfRange`].
    pub fn to_register_offset(&self, node: &NodeId) -> Result<u16, OutOfRange> {
        if node.namespace != self.base.namespace {
            return Err(OutOfRange { node: *node });
        }

        let offset = i64::from(node.identifier) - i64::from(self.base.identifier);
        if (0..i64::from(self.count)).contains(&offset) {
            // Bounded by `count`, so it fits.
            Ok(offset as u16)
        } else {
            Err(OutOfRange { node: *node })
        }
    }

    /// Node mapped to `offset`, or `None` past the end of the range.
    pub fn to_node_id(&self, offset: u16) -> Option<NodeId> {
        if offset >= self.count {
            return None;
        }
        self.base
            .identifier
            .checked_add(u32::from(offset))
            .map(|identifier| NodeId::new(self.base.namespace, identifier))
    }

    /// Every mapped node, in offset order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.count).filter_map(|offset| self.to_node_id(offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference_mapper() -> AddressMapper {
        AddressMapper::new(NodeId::new(2, 2003), 4)
    }

    #[test]
    fn test_offsets_inside_range() {
        let mapper = reference_mapper();
        for identifier in 2003..2007u32 {
            let node = NodeId::new(2, identifier);
            let offset = mapper.to_register_offset(&node).unwrap();
            assert_eq!(u32::from(offset), identifier - 2003);
            assert_eq!(mapper.to_node_id(offset), Some(node));
        }
    }

    #[test]
    fn test_offsets_outside_range() {
        let mapper = reference_mapper();
        for identifier in [0, 2001, 2002, 2007, 2008, u32::MAX] {
            let node = NodeId::new(2, identifier);
            assert_eq!(mapper.to_register_offset(&node), Err(OutOfRange { node }));
        }
    }

    #[test]
    fn test_other_namespace_is_out_of_range() {
        let mapper = reference_mapper();
        assert!(mapper.to_register_offset(&NodeId::new(3, 2004)).is_err());
        assert!(mapper.to_register_offset(&NodeId::new(0, 2004)).is_err());
    }

    #[test]
    fn test_to_node_id_is_total_on_range_only() {
        let mapper = reference_mapper();
        assert_eq!(mapper.to_node_id(0), Some(NodeId::new(2, 2003)));
        assert_eq!(mapper.to_node_id(3), Some(NodeId::new(2, 2006)));
        assert_eq!(mapper.to_node_id(4), None);
    }

    #[test]
    fn test_node_ids_cover_the_range() {
        let nodes: Vec<NodeId> = reference_mapper().node_ids().collect();
        assert_eq!(
            nodes,
            vec![
                NodeId::new(2, 2003),
                NodeId::new(2, 2004),
                NodeId::new(2, 2005),
                NodeId::new(2, 2006),
            ]
        );
    }

    #[test]
    fn test_empty_mapping() {
        let mapper = AddressMapper::new(NodeId::new(2, 2003), 0);
        assert!(mapper.to_register_offset(&NodeId::new(2, 2003)).is_err());
        assert_eq!(mapper.node_ids().count(), 0);
    }
}
