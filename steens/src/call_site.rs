// SPDX-FileCopyrightText: 2024 Rot127 <unisono@quyllur.org>
// SPDX-License-Identifier: LGPL-3.0-only

use crate::module::{CallSiteId, FunctionId};
use crate::node::NodeHandle;

/// How a call site names its callee.
#[derive(Clone, Copy, Debug)]
pub enum Callee {
    /// Statically known function.
    Direct(FunctionId),
    /// Called through a pointer. The handle names the callee object.
    Indirect(NodeHandle),
    /// Provably a call through a null pointer. Directly callable,
    /// zero targets.
    Null,
}

/// The abstract signature of one call expression.
///
/// Created once per call instruction and never mutated afterwards. Only the
/// nodes its handles lead to are merged over the lifetime of the analysis.
#[derive(Clone)]
pub struct CallSite {
    site: CallSiteId,
    caller: FunctionId,
    callee: Callee,
    /// Absent if the result is unused or not a pointer.
    ret: Option<NodeHandle>,
    /// Absent if the call is not variadic.
    va: Option<NodeHandle>,
    /// Pointer arguments in positional order.
    ptr_args: Vec<NodeHandle>,
}

impl CallSite {
    pub fn new(
        site: CallSiteId,
        caller: FunctionId,
        callee: Callee,
        ret: Option<NodeHandle>,
        va: Option<NodeHandle>,
        ptr_args: Vec<NodeHandle>,
    ) -> CallSite {
        CallSite {
            site,
            caller,
            callee,
            ret,
            va,
            ptr_args,
        }
    }

    /// A call through a pointer known to be null.
    pub fn new_null(site: CallSiteId, caller: FunctionId) -> CallSite {
        CallSite::new(site, caller, Callee::Null, None, None, Vec::new())
    }

    pub fn site(&self) -> CallSiteId {
        self.site
    }

    pub fn caller(&self) -> FunctionId {
        self.caller
    }

    pub fn callee(&self) -> Callee {
        self.callee
    }

    pub fn is_direct(&self) -> bool {
        matches!(self.callee, Callee::Direct(_))
    }

    pub fn ret(&self) -> Option<NodeHandle> {
        self.ret
    }

    pub fn va(&self) -> Option<NodeHandle> {
        self.va
    }

    pub fn ptr_args(&self) -> &[NodeHandle] {
        &self.ptr_args
    }

    pub fn ptr_arg(&self, idx: usize) -> Option<NodeHandle> {
        self.ptr_args.get(idx).copied()
    }

    /// Every node handle this call keeps alive.
    pub fn node_handles(&self) -> Vec<NodeHandle> {
        let mut handles = Vec::with_capacity(self.ptr_args.len() + 3);
        if let Callee::Indirect(h) = self.callee {
            handles.push(h);
        }
        if let Some(r) = self.ret {
            handles.push(r);
        }
        if let Some(v) = self.va {
            handles.push(v);
        }
        handles.extend_from_slice(&self.ptr_args);
        handles
    }

    pub(crate) fn rebased(&self, base: usize) -> CallSite {
        CallSite {
            site: self.site,
            caller: self.caller,
            callee: match self.callee {
                Callee::Indirect(h) => Callee::Indirect(h.rebased(base)),
                other => other,
            },
            ret: self.ret.map(|h| h.rebased(base)),
            va: self.va.map(|h| h.rebased(base)),
            ptr_args: self.ptr_args.iter().map(|h| h.rebased(base)).collect(),
        }
    }
}

impl std::fmt::Display for CallSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.callee {
            Callee::Direct(callee) => write!(f, "{} in {}: {}", self.site, self.caller, callee),
            Callee::Indirect(h) => write!(f, "{} in {}: *{}", self.site, self.caller, h),
            Callee::Null => write!(f, "{} in {}: null", self.site, self.caller),
        }
    }
}
