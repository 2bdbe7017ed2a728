// SPDX-FileCopyrightText: 2024 Rot127 <unisono@quyllur.org>
// SPDX-License-Identifier: LGPL-3.0-only

use std::collections::BTreeMap;

use crate::call_site::{CallSite, Callee};
use crate::graph::MemoryGraph;
use crate::module::{
    CallSiteId, FunctionId, FunctionInfo, GlobalInfo, GraphSource, Linkage, ModuleInfo, ValueId,
};
use crate::node::{MemoryNode, NodeFlags, NodeHandle};

pub const MAIN: FunctionId = FunctionId(0);
pub const REGISTER_CB: FunctionId = FunctionId(1);
pub const TIMER_CB: FunctionId = FunctionId(2);
pub const READ_CONFIG: FunctionId = FunctionId(3);
pub const MUTUAL_A: FunctionId = FunctionId(4);
pub const MUTUAL_B: FunctionId = FunctionId(5);

pub const DISPATCH: ValueId = ValueId(1);
pub const REGISTER_CB_ARG: ValueId = ValueId(100);
pub const TIMER_CB_ARG: ValueId = ValueId(200);
pub const READ_CONFIG_ARG: ValueId = ValueId(300);

pub const CS_DISPATCH: CallSiteId = CallSiteId(1);
pub const CS_READ_CONFIG: CallSiteId = CallSiteId(2);
pub const CS_NULL: CallSiteId = CallSiteId(3);
pub const CS_MUTUAL_AB: CallSiteId = CallSiteId(4);
pub const CS_MUTUAL_BA: CallSiteId = CallSiteId(5);
pub const CS_MAIN_MUTUAL: CallSiteId = CallSiteId(6);
pub const CS_EMPTY_FPTR: CallSiteId = CallSiteId(7);
pub const CS_EXTERN_FPTR: CallSiteId = CallSiteId(8);
pub const CS_MUTUAL_FPTR: CallSiteId = CallSiteId(9);

/// Holds the unit graphs of a hand built program until the
/// analysis consumes them.
pub struct TestProgram {
    globals: MemoryGraph,
    locals: BTreeMap<FunctionId, MemoryGraph>,
}

impl GraphSource for TestProgram {
    fn globals_graph(&mut self) -> MemoryGraph {
        std::mem::replace(&mut self.globals, MemoryGraph::new())
    }

    fn local_graph(&mut self, f: FunctionId) -> MemoryGraph {
        self.locals
            .remove(&f)
            .unwrap_or_else(|| panic!("No local graph left for {}.", f))
    }
}

fn node(g: &mut MemoryGraph, size: u64, flags: NodeFlags) -> NodeHandle {
    NodeHandle::new(g.add_node(MemoryNode::with_flags(size, flags)), 0)
}

fn fn_obj(g: &mut MemoryGraph, f: FunctionId) -> NodeHandle {
    NodeHandle::new(g.add_node(MemoryNode::for_function(f)), 0)
}

fn defined(name: &str, linkage: Linkage, ptr_params: Vec<ValueId>) -> FunctionInfo {
    FunctionInfo {
        name: name.to_string(),
        linkage,
        is_declaration: false,
        is_vararg: false,
        returns_pointer: false,
        ptr_params,
    }
}

/// A program exercising callback dispatch through a global:
///
///   main stores &register_cb into the dispatch cell and calls through
///   it, passing &timer_cb. register_cb stores its argument into the
///   dispatch cell. So the dispatch call targets timer_cb as well, which
///   only becomes visible after the first resolution round merged the
///   argument. main additionally calls the declared read_config, a null
///   pointer, the pair of mutually recursive helpers, a pointer nothing
///   was ever assigned to, and a pointer loaded from outside.
pub fn callback_program() -> (ModuleInfo, TestProgram) {
    let mut module = ModuleInfo::new();
    module.add_function(
        MAIN,
        defined("main", Linkage::External, Vec::new()),
    );
    module.add_function(
        REGISTER_CB,
        defined("register_cb", Linkage::Internal, vec![REGISTER_CB_ARG]),
    );
    module.add_function(
        TIMER_CB,
        defined("timer_cb", Linkage::Internal, vec![TIMER_CB_ARG]),
    );
    module.add_function(
        READ_CONFIG,
        FunctionInfo {
            name: "read_config".to_string(),
            linkage: Linkage::External,
            is_declaration: true,
            is_vararg: false,
            returns_pointer: false,
            ptr_params: vec![READ_CONFIG_ARG],
        },
    );
    module.add_function(
        MUTUAL_A,
        defined("mutual_a", Linkage::Internal, Vec::new()),
    );
    module.add_function(
        MUTUAL_B,
        defined("mutual_b", Linkage::Internal, Vec::new()),
    );
    module.add_global(
        DISPATCH,
        GlobalInfo {
            name: "dispatch".to_string(),
            linkage: Linkage::Internal,
        },
    );

    let mut globals = MemoryGraph::new();
    let groot = node(&mut globals, 8, NodeFlags::GLOBAL);
    let _cell = globals.get_link(groot);
    globals.set_scalar(DISPATCH, groot);

    let mut main_g = MemoryGraph::new();
    let groot = node(&mut main_g, 8, NodeFlags::GLOBAL);
    let cell = main_g.get_link(groot);
    main_g.set_scalar(DISPATCH, groot);
    // *dispatch = &register_cb
    let register_obj = fn_obj(&mut main_g, REGISTER_CB);
    main_g.merge(cell, register_obj);
    // (*dispatch)(&timer_cb)
    let timer_obj = fn_obj(&mut main_g, TIMER_CB);
    main_g.add_call(CallSite::new(
        CS_DISPATCH,
        MAIN,
        Callee::Indirect(cell),
        None,
        None,
        vec![timer_obj],
    ));
    // read_config(&buf)
    let buf = node(&mut main_g, 16, NodeFlags::ALLOCA);
    main_g.add_call(CallSite::new(
        CS_READ_CONFIG,
        MAIN,
        Callee::Direct(READ_CONFIG),
        None,
        None,
        vec![buf],
    ));
    main_g.add_call(CallSite::new_null(CS_NULL, MAIN));
    main_g.add_call(CallSite::new(
        CS_MAIN_MUTUAL,
        MAIN,
        Callee::Direct(MUTUAL_A),
        None,
        None,
        Vec::new(),
    ));
    // A function pointer nothing was ever assigned to.
    let empty_fptr = node(&mut main_g, 8, NodeFlags::empty());
    main_g.add_call(CallSite::new(
        CS_EMPTY_FPTR,
        MAIN,
        Callee::Indirect(empty_fptr),
        None,
        None,
        Vec::new(),
    ));
    // A function pointer loaded from outside the module.
    let extern_fptr = node(&mut main_g, 8, NodeFlags::EXTERNAL);
    main_g.add_call(CallSite::new(
        CS_EXTERN_FPTR,
        MAIN,
        Callee::Indirect(extern_fptr),
        None,
        None,
        Vec::new(),
    ));
    let main_ret = node(&mut main_g, 0, NodeFlags::empty());
    main_g.set_return(MAIN, main_ret);

    let mut register_g = MemoryGraph::new();
    let groot = node(&mut register_g, 8, NodeFlags::GLOBAL);
    let cell = register_g.get_link(groot);
    register_g.set_scalar(DISPATCH, groot);
    let formal = node(&mut register_g, 8, NodeFlags::empty());
    register_g.set_scalar(REGISTER_CB_ARG, formal);
    // *dispatch = cb
    register_g.merge(cell, formal);
    let ret = node(&mut register_g, 0, NodeFlags::empty());
    register_g.set_return(REGISTER_CB, ret);

    let mut timer_g = MemoryGraph::new();
    let formal = node(&mut timer_g, 8, NodeFlags::empty());
    timer_g.set_scalar(TIMER_CB_ARG, formal);
    let ret = node(&mut timer_g, 0, NodeFlags::empty());
    timer_g.set_return(TIMER_CB, ret);

    let mut mutual_a_g = MemoryGraph::new();
    mutual_a_g.add_call(CallSite::new(
        CS_MUTUAL_AB,
        MUTUAL_A,
        Callee::Direct(MUTUAL_B),
        None,
        None,
        Vec::new(),
    ));
    let ret = node(&mut mutual_a_g, 0, NodeFlags::empty());
    mutual_a_g.set_return(MUTUAL_A, ret);

    let mut mutual_b_g = MemoryGraph::new();
    mutual_b_g.add_call(CallSite::new(
        CS_MUTUAL_BA,
        MUTUAL_B,
        Callee::Direct(MUTUAL_A),
        None,
        None,
        Vec::new(),
    ));
    // An indirect call into the recursion, through a known pointer.
    let mutual_fptr = fn_obj(&mut mutual_b_g, MUTUAL_A);
    mutual_b_g.add_call(CallSite::new(
        CS_MUTUAL_FPTR,
        MUTUAL_B,
        Callee::Indirect(mutual_fptr),
        None,
        None,
        Vec::new(),
    ));
    let ret = node(&mut mutual_b_g, 0, NodeFlags::empty());
    mutual_b_g.set_return(MUTUAL_B, ret);

    let mut locals = BTreeMap::new();
    locals.insert(MAIN, main_g);
    locals.insert(REGISTER_CB, register_g);
    locals.insert(TIMER_CB, timer_g);
    locals.insert(MUTUAL_A, mutual_a_g);
    locals.insert(MUTUAL_B, mutual_b_g);
    (module, TestProgram { globals, locals })
}
