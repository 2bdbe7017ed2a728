// SPDX-FileCopyrightText: 2024 Rot127 <unisono@quyllur.org>
// SPDX-License-Identifier: LGPL-3.0-only

use std::collections::BTreeMap;

use crate::graph::MemoryGraph;

/// Identifier of a program value (an SSA register, a global symbol,
/// a formal parameter). Assigned module wide by the frontend.
#[derive(Clone, Copy, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub struct ValueId(pub u64);

impl std::fmt::Display for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl std::fmt::Debug for ValueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

/// Identifier of a function of the analyzed module.
#[derive(Clone, Copy, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub struct FunctionId(pub u32);

impl std::fmt::Display for FunctionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "f{}", self.0)
    }
}

impl std::fmt::Debug for FunctionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

/// Identifier of one call instruction.
#[derive(Clone, Copy, Hash, Eq, Ord, PartialEq, PartialOrd)]
pub struct CallSiteId(pub u64);

impl std::fmt::Display for CallSiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cs{}", self.0)
    }
}

impl std::fmt::Debug for CallSiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Linkage {
    /// Only callable from within the module.
    Internal,
    /// Visible to other modules.
    External,
}

/// What the frontend knows about one function.
#[derive(Clone, Debug)]
pub struct FunctionInfo {
    pub name: String,
    pub linkage: Linkage,
    /// Declaration without a body. A valid call target, but nothing of it
    /// can be inlined or merged into.
    pub is_declaration: bool,
    pub is_vararg: bool,
    pub returns_pointer: bool,
    /// Formal pointer parameters in positional order.
    pub ptr_params: Vec<ValueId>,
}

impl FunctionInfo {
    /// Checks if a call with [ptr_args] pointer arguments, which
    /// does (not) use the result as a pointer, can legally target
    /// this function.
    pub fn callable_with(&self, ptr_args: usize, wants_ptr_result: bool) -> bool {
        if wants_ptr_result && !self.returns_pointer {
            return false;
        }
        if self.is_vararg {
            self.ptr_params.len() <= ptr_args
        } else {
            self.ptr_params.len() == ptr_args
        }
    }
}

/// What the frontend knows about one global variable.
#[derive(Clone, Debug)]
pub struct GlobalInfo {
    pub name: String,
    pub linkage: Linkage,
}

/// The function and global tables of the analyzed module.
pub struct ModuleInfo {
    functions: BTreeMap<FunctionId, FunctionInfo>,
    globals: BTreeMap<ValueId, GlobalInfo>,
}

impl ModuleInfo {
    pub fn new() -> ModuleInfo {
        ModuleInfo {
            functions: BTreeMap::new(),
            globals: BTreeMap::new(),
        }
    }

    pub fn add_function(&mut self, id: FunctionId, info: FunctionInfo) {
        self.functions.insert(id, info);
    }

    pub fn add_global(&mut self, id: ValueId, info: GlobalInfo) {
        self.globals.insert(id, info);
    }

    pub fn function(&self, id: FunctionId) -> Option<&FunctionInfo> {
        self.functions.get(&id)
    }

    pub fn global(&self, id: ValueId) -> Option<&GlobalInfo> {
        self.globals.get(&id)
    }

    pub fn functions(
        &self,
    ) -> std::collections::btree_map::Iter<'_, FunctionId, FunctionInfo> {
        self.functions.iter()
    }

    pub fn globals(&self) -> std::collections::btree_map::Iter<'_, ValueId, GlobalInfo> {
        self.globals.iter()
    }

    /// Name of [id] for reports. Falls back to the id itself for
    /// functions the module table does not list.
    pub fn function_name(&self, id: FunctionId) -> String {
        match self.functions.get(&id) {
            Some(info) => info.name.clone(),
            None => format!("{}", id),
        }
    }
}

/// Supplier of the per-unit graphs the analysis inlines.
///
/// Each local graph is consumed exactly once per run. The returns map of a
/// local graph must carry an entry for its function (an empty node when the
/// function does not return a pointer), since the entries of this map decide
/// whose formal arguments are marked incomplete.
pub trait GraphSource {
    /// The graph holding the global memory objects. Inlined first.
    fn globals_graph(&mut self) -> MemoryGraph;

    /// The local graph of a defined function.
    fn local_graph(&mut self, f: FunctionId) -> MemoryGraph;
}
