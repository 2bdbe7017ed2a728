// SPDX-FileCopyrightText: 2024 Rot127 <unisono@quyllur.org>
// SPDX-License-Identifier: LGPL-3.0-only

use std::collections::{BTreeMap, BTreeSet};

use bitflags::bitflags;
use log::{debug, trace};

use crate::call_site::{CallSite, Callee};
use crate::module::{FunctionId, Linkage, ModuleInfo, ValueId};
use crate::node::{MemoryNode, NodeFlags, NodeHandle, NodeRef};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Options for [MemoryGraph::mark_incomplete_nodes].
    pub struct MarkOpts: u8 {
        /// Mark the formal arguments and return objects of every function
        /// the returns map still lists.
        const MARK_FORMAL_ARGS = 0x01;
        /// Do not mark global objects.
        const IGNORE_GLOBALS = 0x02;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Options for [MemoryGraph::remove_dead_nodes].
    pub struct CollectOpts: u8 {
        /// Treat every global object as a collection root, reachable
        /// or not.
        const KEEP_UNREACHABLE_GLOBALS = 0x01;
    }
}

/// One slot of the node arena.
enum Slot {
    /// The slot holds its own representative.
    Live(MemoryNode),
    /// The node was merged away. Byte b of it is byte b + offset of the
    /// replacement. Only ever read through handle resolution.
    Forwarded { to: NodeRef, offset: u64 },
    /// Collected by dead node removal.
    Freed,
}

/// The abstract memory graph of one analysis unit.
///
/// Owns an arena of memory nodes, the map from program values to their
/// nodes, the call sites of the unit and the per function return/vararg
/// objects. Merged away nodes stay behind as forwarding slots; every
/// access resolves through them and compresses the walked chain, so
/// resolution stays amortized near constant over the graph's lifetime.
pub struct MemoryGraph {
    slots: Vec<Slot>,
    /// Program value -> memory object.
    scalars: BTreeMap<ValueId, NodeHandle>,
    /// Call sites recorded when the unit was translated.
    fn_calls: Vec<CallSite>,
    /// Calls discovered or retained after construction.
    aux_fn_calls: Vec<CallSite>,
    /// Return value object per function.
    returns: BTreeMap<FunctionId, NodeHandle>,
    /// Vararg object per function.
    va_nodes: BTreeMap<FunctionId, NodeHandle>,
    /// Unifications performed on this graph so far.
    merges: usize,
}

impl MemoryGraph {
    pub fn new() -> MemoryGraph {
        MemoryGraph {
            slots: Vec::new(),
            scalars: BTreeMap::new(),
            fn_calls: Vec::new(),
            aux_fn_calls: Vec::new(),
            returns: BTreeMap::new(),
            va_nodes: BTreeMap::new(),
            merges: 0,
        }
    }

    pub fn add_node(&mut self, node: MemoryNode) -> NodeRef {
        let nref = NodeRef::new(self.slots.len());
        self.slots.push(Slot::Live(node));
        nref
    }

    /// Number of live nodes. Non increasing under merging.
    pub fn node_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| matches!(s, Slot::Live(_)))
            .count()
    }

    pub fn merge_count(&self) -> usize {
        self.merges
    }

    /// The live node behind [n]. [n] must be canonical.
    pub fn node(&self, n: NodeRef) -> &MemoryNode {
        match self.slots.get(n.index()) {
            Some(Slot::Live(node)) => node,
            Some(Slot::Forwarded { .. }) => {
                panic!("{} was read without resolving it first.", n)
            }
            _ => panic!("{} does not name a node of this graph.", n),
        }
    }

    fn live(&self, n: NodeRef) -> &MemoryNode {
        self.node(n)
    }

    fn live_mut(&mut self, n: NodeRef) -> &mut MemoryNode {
        match self.slots.get_mut(n.index()) {
            Some(Slot::Live(node)) => node,
            Some(Slot::Forwarded { .. }) => {
                panic!("{} was written without resolving it first.", n)
            }
            _ => panic!("{} does not name a node of this graph.", n),
        }
    }

    /// Walks the forwarding chain of [start]. Returns the canonical live
    /// node and the accumulated byte adjustment. Every walked slot is
    /// rewritten to point at the canonical node directly.
    fn canonicalize(&mut self, start: NodeRef) -> (NodeRef, u64) {
        let mut cur = start;
        let mut total: u64 = 0;
        let mut chain: Vec<(NodeRef, u64)> = Vec::new();
        loop {
            match &self.slots[cur.index()] {
                Slot::Live(_) => break,
                Slot::Forwarded { to, offset } => {
                    chain.push((cur, total));
                    total = total
                        .checked_add(*offset)
                        .expect("Forwarding offsets overflow");
                    cur = *to;
                }
                Slot::Freed => panic!(
                    "{} resolves into a freed slot. A referenced node was collected.",
                    start
                ),
            }
            assert!(
                chain.len() <= self.slots.len(),
                "Forwarding chain longer than the arena. The graph is corrupted."
            );
        }
        for (slot, prefix) in chain {
            self.slots[slot.index()] = Slot::Forwarded {
                to: cur,
                offset: total - prefix,
            };
        }
        (cur, total)
    }

    /// Resolves [h] to its canonical live node and final byte offset,
    /// compressing the forwarding chain it walks. Offsets into collapsed
    /// nodes land at 0.
    pub fn resolve(&mut self, h: NodeHandle) -> NodeHandle {
        let (canon, delta) = self.canonicalize(h.node());
        let offset = if self.live(canon).is_collapsed() {
            0
        } else {
            h.offset()
                .checked_add(delta)
                .expect("Resolved offset overflows")
        };
        NodeHandle::new(canon, offset)
    }

    /// Like [MemoryGraph::resolve], without compressing the chain.
    pub fn find(&self, h: NodeHandle) -> NodeHandle {
        let mut cur = h.node();
        let mut total = h.offset();
        let mut steps = 0usize;
        loop {
            match &self.slots[cur.index()] {
                Slot::Live(node) => {
                    return NodeHandle::new(cur, if node.is_collapsed() { 0 } else { total });
                }
                Slot::Forwarded { to, offset } => {
                    total = total
                        .checked_add(*offset)
                        .expect("Forwarding offsets overflow");
                    cur = *to;
                }
                Slot::Freed => panic!(
                    "{} resolves into a freed slot. A referenced node was collected.",
                    h
                ),
            }
            steps += 1;
            assert!(
                steps <= self.slots.len(),
                "Forwarding chain longer than the arena. The graph is corrupted."
            );
        }
    }

    pub fn flags_of(&self, h: NodeHandle) -> NodeFlags {
        self.node(self.find(h).node()).flags()
    }

    pub fn functions_of(&self, h: NodeHandle) -> &BTreeSet<FunctionId> {
        self.node(self.find(h).node()).functions()
    }

    /// Unifies the two memory objects the handles lead to. Total:
    /// layout conflicts collapse the surviving node instead of failing.
    pub fn merge(&mut self, a: NodeHandle, b: NodeHandle) {
        let ra = self.resolve(a);
        let rb = self.resolve(b);
        if ra.node() == rb.node() {
            if ra.offset() != rb.offset() {
                // The object aliases itself at two distinct offsets.
                // No consistent field layout is left.
                self.fold_node(ra.node());
            }
            return;
        }
        // The handle with the larger offset survives, which keeps the
        // forwarding shift non negative. Ties prefer the larger object,
        // then the older slot.
        let swap = if ra.offset() != rb.offset() {
            ra.offset() < rb.offset()
        } else {
            let size_a = self.live(ra.node()).size();
            let size_b = self.live(rb.node()).size();
            if size_a != size_b {
                size_a < size_b
            } else {
                rb.node() < ra.node()
            }
        };
        let (sh, dh) = if swap { (rb, ra) } else { (ra, rb) };
        let survivor = sh.node();
        let dying = dh.node();
        let shift = sh.offset() - dh.offset();
        trace!("Merge {} into {}, shift {:#x}.", dying, survivor, shift);
        self.merges += 1;

        let survivor_collapsed = self.live(survivor).is_collapsed();
        let mut dead = self.take_live(dying, survivor, shift);
        let flags = dead.flags();
        let funcs = dead.take_functions();
        {
            let snode = self.live_mut(survivor);
            snode.add_flags(flags);
            snode.extend_functions(funcs);
        }
        let dead_end = shift.checked_add(dead.size());
        if !survivor_collapsed {
            match dead_end {
                Some(end)
                    if !dead.is_collapsed()
                        && (shift == 0 || end <= self.live(survivor).size()) =>
                {
                    self.live_mut(survivor).grow(end);
                }
                // Collapsed content, or content sticking out past the
                // survivor, gives up the field layout.
                _ => self.fold_node(survivor),
            }
        }
        for (off, target) in dead.take_links() {
            // Stale offsets are harmless, resolution clamps them once the
            // survivor is collapsed.
            self.merge_link(survivor, off.saturating_add(shift), target);
        }
    }

    /// Detaches the live node [n] and leaves a forwarding slot behind.
    fn take_live(&mut self, n: NodeRef, to: NodeRef, offset: u64) -> MemoryNode {
        let slot = std::mem::replace(&mut self.slots[n.index()], Slot::Forwarded { to, offset });
        match slot {
            Slot::Live(node) => node,
            _ => panic!("Merged {}, which is not a live node.", n),
        }
    }

    /// Installs a link at offset [off] of [n], unifying with the link
    /// already stored there.
    fn merge_link(&mut self, n: NodeRef, off: u64, target: NodeHandle) {
        let at = self.resolve(NodeHandle::new(n, off));
        match self.live(at.node()).link_at(at.offset()) {
            Some(existing) => self.merge(existing, target),
            None => {
                let rt = self.resolve(target);
                self.live_mut(at.node()).set_link(at.offset(), rt);
            }
        }
    }

    /// Adds the points-to edge [from] -> [to], unifying with whatever the
    /// field already points at.
    pub fn add_link(&mut self, from: NodeHandle, to: NodeHandle) {
        let at = self.resolve(from);
        self.merge_link(at.node(), at.offset(), to);
    }

    /// Collapses the object into a single untyped field at offset 0 and
    /// unifies everything its fields pointed at. Irreversible: all later
    /// merges into this object happen at offset 0.
    pub fn fold_node(&mut self, n: NodeRef) {
        let at = self.resolve(NodeHandle::new(n, 0));
        if self.live(at.node()).is_collapsed() {
            return;
        }
        trace!("Fold {}.", at.node());
        self.live_mut(at.node()).set_collapsed();
        let links = self.live_mut(at.node()).take_links();
        let mut folded: Option<NodeHandle> = None;
        for (_, target) in links {
            match folded {
                Some(acc) => self.merge(acc, target),
                None => folded = Some(target),
            }
        }
        if let Some(acc) = folded {
            // The node itself can have been merged away while folding.
            self.merge_link(at.node(), 0, acc);
        }
    }

    /// Returns the link stored at the resolved offset of [h], or at 0 for
    /// collapsed nodes. A field without a link gets a fresh empty object.
    pub fn get_link(&mut self, h: NodeHandle) -> NodeHandle {
        let at = self.resolve(h);
        if let Some(existing) = self.live(at.node()).link_at(at.offset()) {
            return self.resolve(existing);
        }
        let target = NodeHandle::new(self.add_node(MemoryNode::new(0)), 0);
        self.live_mut(at.node()).set_link(at.offset(), target);
        target
    }

    /// Maps the program value [v] to [h]. A value mapped twice keeps one
    /// object: both handles are unified.
    pub fn set_scalar(&mut self, v: ValueId, h: NodeHandle) {
        match self.scalars.get(&v).copied() {
            Some(existing) => self.merge(existing, h),
            None => {
                self.scalars.insert(v, h);
            }
        }
    }

    pub fn scalar(&self, v: ValueId) -> Option<NodeHandle> {
        self.scalars.get(&v).copied()
    }

    pub fn scalars(&self) -> std::collections::btree_map::Iter<'_, ValueId, NodeHandle> {
        self.scalars.iter()
    }

    pub fn set_return(&mut self, f: FunctionId, h: NodeHandle) {
        match self.returns.get(&f).copied() {
            Some(existing) => self.merge(existing, h),
            None => {
                self.returns.insert(f, h);
            }
        }
    }

    pub fn return_for(&self, f: FunctionId) -> Option<NodeHandle> {
        self.returns.get(&f).copied()
    }

    pub fn set_va_node(&mut self, f: FunctionId, h: NodeHandle) {
        match self.va_nodes.get(&f).copied() {
            Some(existing) => self.merge(existing, h),
            None => {
                self.va_nodes.insert(f, h);
            }
        }
    }

    pub fn va_node_for(&self, f: FunctionId) -> Option<NodeHandle> {
        self.va_nodes.get(&f).copied()
    }

    /// Drops the return and vararg entries of every function [keep]
    /// rejects. Run after call resolution, so only the functions kept
    /// here get their formals marked incomplete again.
    pub fn retain_returns<F>(&mut self, keep: F)
    where
        F: Fn(&FunctionId) -> bool,
    {
        self.returns.retain(|f, _| keep(f));
        self.va_nodes.retain(|f, _| keep(f));
    }

    pub fn add_call(&mut self, cs: CallSite) {
        self.fn_calls.push(cs);
    }

    pub fn add_aux_call(&mut self, cs: CallSite) {
        self.aux_fn_calls.push(cs);
    }

    pub fn fn_calls(&self) -> &[CallSite] {
        &self.fn_calls
    }

    pub fn aux_fn_calls(&self) -> &[CallSite] {
        &self.aux_fn_calls
    }

    /// Moves every node, scalar entry, call site and return/vararg entry
    /// of [other] into this graph without cloning a single node. [other]
    /// is left empty. Keys both graphs know (a global referenced by many
    /// units, a re-spliced function) get their handles unified.
    pub fn splice_from(&mut self, other: &mut MemoryGraph) {
        let base = self.slots.len();
        debug!("Splice {} slots onto {}.", other.slots.len(), base);
        for mut slot in other.slots.drain(..) {
            match &mut slot {
                Slot::Live(node) => node.rebase_links(base),
                Slot::Forwarded { to, .. } => *to = to.rebased(base),
                Slot::Freed => {}
            }
            self.slots.push(slot);
        }
        for (vid, h) in std::mem::take(&mut other.scalars) {
            self.set_scalar(vid, h.rebased(base));
        }
        for (fid, h) in std::mem::take(&mut other.returns) {
            self.set_return(fid, h.rebased(base));
        }
        for (fid, h) in std::mem::take(&mut other.va_nodes) {
            self.set_va_node(fid, h.rebased(base));
        }
        for cs in other.fn_calls.drain(..) {
            let rebased = cs.rebased(base);
            self.fn_calls.push(rebased);
        }
        for cs in other.aux_fn_calls.drain(..) {
            let rebased = cs.rebased(base);
            self.aux_fn_calls.push(rebased);
        }
        self.merges += std::mem::take(&mut other.merges);
    }

    /// Binds a call site to one callee: the return object, the vararg
    /// object and each positional pointer argument are unified with the
    /// callee's counterparts.
    pub fn merge_in_graph(&mut self, cs: &CallSite, callee: FunctionId, module: &ModuleInfo) {
        let Some(info) = module.function(callee) else {
            panic!("{} is not a function of the module.", callee);
        };
        debug!("{} binds to '{}'.", cs, info.name);
        if let (Some(site_ret), Some(fn_ret)) = (cs.ret(), self.return_for(callee)) {
            self.merge(fn_ret, site_ret);
        }
        if let (Some(site_va), Some(fn_va)) = (cs.va(), self.va_node_for(callee)) {
            self.merge(fn_va, site_va);
        }
        for (idx, param) in info.ptr_params.iter().enumerate() {
            let Some(arg) = cs.ptr_arg(idx) else {
                break;
            };
            if let Some(formal) = self.scalar(*param) {
                self.merge(formal, arg);
            }
        }
    }

    /// Every handle stored in the scalar map, the call lists and the
    /// return/vararg maps.
    fn root_handles(&self) -> Vec<NodeHandle> {
        let mut roots: Vec<NodeHandle> = Vec::new();
        roots.extend(self.scalars.values().copied());
        roots.extend(self.returns.values().copied());
        roots.extend(self.va_nodes.values().copied());
        for cs in self.fn_calls.iter().chain(self.aux_fn_calls.iter()) {
            roots.extend(cs.node_handles());
        }
        roots
    }

    /// Every live global node, as offset 0 handles.
    fn global_handles(&self) -> Vec<NodeHandle> {
        let mut handles = Vec::new();
        for (idx, slot) in self.slots.iter().enumerate() {
            if let Slot::Live(node) = slot {
                if node.flags().contains(NodeFlags::GLOBAL) {
                    handles.push(NodeHandle::new(NodeRef::new(idx), 0));
                }
            }
        }
        handles
    }

    /// Marks [flags] on every object reachable from [work].
    fn flood_flags(&mut self, mut work: Vec<NodeHandle>, flags: NodeFlags) {
        let mut seen: BTreeSet<NodeRef> = BTreeSet::new();
        while let Some(h) = work.pop() {
            let at = self.resolve(h);
            if !seen.insert(at.node()) {
                continue;
            }
            let node = self.live_mut(at.node());
            node.add_flags(flags);
            work.extend(node.links().map(|(_, target)| *target));
        }
    }

    /// Flags every object whose points-to facts this graph alone cannot
    /// pin down as incomplete: formal arguments and return objects of the
    /// functions the returns map lists, everything passed through a call
    /// whose callee is not fully understood, and (unless ignored) global
    /// objects. Externally visible globals additionally become external,
    /// other modules hold references to them.
    ///
    /// Merging can fuse complete and incomplete objects, so this runs
    /// again after every resolution round, on top of
    /// [MemoryGraph::mask_incomplete_markers].
    pub fn mark_incomplete_nodes(&mut self, module: &ModuleInfo, opts: MarkOpts) {
        let mut work: Vec<NodeHandle> = Vec::new();
        if opts.contains(MarkOpts::MARK_FORMAL_ARGS) {
            for (fid, ret) in self.returns.iter() {
                work.push(*ret);
                if let Some(info) = module.function(*fid) {
                    for param in info.ptr_params.iter() {
                        if let Some(h) = self.scalars.get(param) {
                            work.push(*h);
                        }
                    }
                }
            }
            work.extend(self.va_nodes.values().copied());
        }
        // A callee nobody analyzed can rewrite everything passed to it.
        for cs in self.fn_calls.iter().chain(self.aux_fn_calls.iter()) {
            let opaque_callee = match cs.callee() {
                Callee::Direct(f) => module.function(f).map_or(true, |i| i.is_declaration),
                Callee::Indirect(h) => {
                    let at = self.find(h);
                    self.node(at.node())
                        .flags()
                        .intersects(NodeFlags::EXTERNAL | NodeFlags::UNKNOWN)
                }
                Callee::Null => false,
            };
            if opaque_callee {
                if let Some(r) = cs.ret() {
                    work.push(r);
                }
                if let Some(v) = cs.va() {
                    work.push(v);
                }
                work.extend_from_slice(cs.ptr_args());
            }
        }
        if !opts.contains(MarkOpts::IGNORE_GLOBALS) {
            work.extend(self.global_handles());
        }
        self.flood_flags(work, NodeFlags::INCOMPLETE);

        let mut external: Vec<NodeHandle> = Vec::new();
        for (vid, info) in module.globals() {
            if info.linkage == Linkage::External {
                if let Some(h) = self.scalars.get(vid) {
                    external.push(*h);
                }
            }
        }
        self.flood_flags(external, NodeFlags::INCOMPLETE | NodeFlags::EXTERNAL);
    }

    /// Clears the incomplete marker on every live node, so
    /// [MemoryGraph::mark_incomplete_nodes] can recompute it from scratch
    /// without stale markers of an earlier round surviving.
    pub fn mask_incomplete_markers(&mut self) {
        for slot in self.slots.iter_mut() {
            if let Slot::Live(node) = slot {
                node.remove_flags(NodeFlags::INCOMPLETE);
            }
        }
    }

    /// Frees live nodes nothing references: no link leads to them, no
    /// scalar/call/return entry names them, and they carry no flags or
    /// function set of their own. Cheap cleanup after splicing.
    pub fn remove_trivially_dead_nodes(&mut self) {
        let mut referenced: BTreeSet<NodeRef> = BTreeSet::new();
        for h in self.root_handles() {
            referenced.insert(h.node());
        }
        for slot in self.slots.iter() {
            match slot {
                Slot::Live(node) => {
                    referenced.extend(node.links().map(|(_, target)| target.node()));
                }
                Slot::Forwarded { to, .. } => {
                    referenced.insert(*to);
                }
                Slot::Freed => {}
            }
        }
        let mut dropped = 0usize;
        for idx in 0..self.slots.len() {
            if referenced.contains(&NodeRef::new(idx)) {
                continue;
            }
            if let Slot::Live(node) = &self.slots[idx] {
                if !node.has_links() && node.functions().is_empty() && node.flags().is_empty() {
                    self.slots[idx] = Slot::Freed;
                    dropped += 1;
                }
            }
        }
        if dropped > 0 {
            debug!("Dropped {} trivially dead nodes.", dropped);
        }
    }

    /// Full reachability collection. Roots are the stored handles of the
    /// scalar map, the call lists and the return/vararg maps, plus every
    /// global when [CollectOpts::KEEP_UNREACHABLE_GLOBALS] is set.
    /// Unreachable slots are freed, forwarding chains of kept nodes stay.
    pub fn remove_dead_nodes(&mut self, opts: CollectOpts) {
        let mut work = self.root_handles();
        if opts.contains(CollectOpts::KEEP_UNREACHABLE_GLOBALS) {
            work.extend(self.global_handles());
        }
        let mut reachable: BTreeSet<NodeRef> = BTreeSet::new();
        while let Some(h) = work.pop() {
            let at = self.resolve(h);
            if !reachable.insert(at.node()) {
                continue;
            }
            work.extend(self.live(at.node()).links().map(|(_, target)| *target));
        }
        let mut drop_list: Vec<usize> = Vec::new();
        for idx in 0..self.slots.len() {
            let nref = NodeRef::new(idx);
            if matches!(self.slots[idx], Slot::Live(_)) {
                if !reachable.contains(&nref) {
                    drop_list.push(idx);
                }
            } else if matches!(self.slots[idx], Slot::Forwarded { .. }) {
                let (canon, _) = self.canonicalize(nref);
                if !reachable.contains(&canon) {
                    drop_list.push(idx);
                }
            }
        }
        for idx in drop_list.iter() {
            self.slots[*idx] = Slot::Freed;
        }
        debug!(
            "Dead node removal dropped {} of {} slots.",
            drop_list.len(),
            self.slots.len()
        );
    }
}
