// SPDX-FileCopyrightText: 2024 Rot127 <unisono@quyllur.org>
// SPDX-License-Identifier: LGPL-3.0-only

use std::collections::{BTreeMap, BTreeSet};

use bitflags::bitflags;

use crate::module::FunctionId;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Markers of a memory equivalence class.
    pub struct NodeFlags: u16 {
        /// Backed by a global symbol.
        const GLOBAL = 0x0001;
        /// Allocated on the heap.
        const HEAP = 0x0002;
        /// Allocated on the stack.
        const ALLOCA = 0x0004;
        /// Merged with something the analysis cannot describe.
        const UNKNOWN = 0x0008;
        /// The points-to facts of this object cannot be determined
        /// from the analyzed code alone.
        const INCOMPLETE = 0x0010;
        /// Reachable from outside the analyzed program.
        const EXTERNAL = 0x0020;
        /// Produced by an int-to-pointer cast.
        const INT_TO_PTR = 0x0040;
        /// Fed into a pointer-to-int cast.
        const PTR_TO_INT = 0x0080;
        /// Holds variadic call arguments.
        const VA_ARG = 0x0100;
    }
}

/// Stable index of a node slot inside one memory graph arena.
#[derive(Clone, Copy, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub struct NodeRef {
    idx: u32,
}

impl NodeRef {
    pub fn new(idx: usize) -> NodeRef {
        NodeRef { idx: idx as u32 }
    }

    pub fn index(&self) -> usize {
        self.idx as usize
    }

    /// Returns the same node in an arena that was appended
    /// at slot [base] of another arena.
    pub fn rebased(&self, base: usize) -> NodeRef {
        NodeRef::new(self.index() + base)
    }
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.idx)
    }
}

impl std::fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

/// A reference to a byte offset inside a memory object.
///
/// The handle does not own the node. It stays valid across merges:
/// resolving it through the owning graph follows the forwarding links of
/// merged away nodes and accumulates their offset adjustments.
#[derive(Clone, Copy, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub struct NodeHandle {
    node: NodeRef,
    offset: u64,
}

impl NodeHandle {
    pub fn new(node: NodeRef, offset: u64) -> NodeHandle {
        NodeHandle { node, offset }
    }

    pub fn node(&self) -> NodeRef {
        self.node
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn rebased(&self, base: usize) -> NodeHandle {
        NodeHandle {
            node: self.node.rebased(base),
            offset: self.offset,
        }
    }
}

impl std::fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}+{:#x})", self.node, self.offset)
    }
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

/// One equivalence class of abstract memory objects.
pub struct MemoryNode {
    /// Size of the object in bytes.
    size: u64,
    /// All field distinctions were given up. The only link lives at
    /// offset 0. Never cleared again.
    collapsed: bool,
    flags: NodeFlags,
    /// Outgoing pointer fields, ordered by byte offset.
    links: BTreeMap<u64, NodeHandle>,
    /// Functions this object may represent.
    functions: BTreeSet<FunctionId>,
}

impl MemoryNode {
    pub fn new(size: u64) -> MemoryNode {
        MemoryNode {
            size,
            collapsed: false,
            flags: NodeFlags::empty(),
            links: BTreeMap::new(),
            functions: BTreeSet::new(),
        }
    }

    pub fn with_flags(size: u64, flags: NodeFlags) -> MemoryNode {
        let mut node = MemoryNode::new(size);
        node.flags = flags;
        node
    }

    /// A node standing for a function symbol.
    pub fn for_function(f: FunctionId) -> MemoryNode {
        let mut node = MemoryNode::with_flags(0, NodeFlags::GLOBAL);
        node.functions.insert(f);
        node
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Extends the object to [bytes] if it is smaller.
    pub fn grow(&mut self, bytes: u64) {
        if self.size < bytes {
            self.size = bytes;
        }
    }

    pub fn is_collapsed(&self) -> bool {
        self.collapsed
    }

    pub fn set_collapsed(&mut self) {
        self.collapsed = true;
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    pub fn add_flags(&mut self, flags: NodeFlags) {
        self.flags |= flags;
    }

    pub fn remove_flags(&mut self, flags: NodeFlags) {
        self.flags &= !flags;
    }

    pub fn link_at(&self, offset: u64) -> Option<NodeHandle> {
        self.links.get(&offset).copied()
    }

    pub fn set_link(&mut self, offset: u64, target: NodeHandle) {
        self.links.insert(offset, target);
    }

    pub fn links(&self) -> std::collections::btree_map::Iter<'_, u64, NodeHandle> {
        self.links.iter()
    }

    pub fn take_links(&mut self) -> BTreeMap<u64, NodeHandle> {
        std::mem::take(&mut self.links)
    }

    pub fn has_links(&self) -> bool {
        !self.links.is_empty()
    }

    pub fn add_function(&mut self, f: FunctionId) {
        self.functions.insert(f);
    }

    pub fn extend_functions(&mut self, funcs: BTreeSet<FunctionId>) {
        self.functions.extend(funcs);
    }

    pub fn functions(&self) -> &BTreeSet<FunctionId> {
        &self.functions
    }

    pub fn take_functions(&mut self) -> BTreeSet<FunctionId> {
        std::mem::take(&mut self.functions)
    }

    pub(crate) fn rebase_links(&mut self, base: usize) {
        for (_, target) in self.links.iter_mut() {
            *target = target.rebased(base);
        }
    }
}
