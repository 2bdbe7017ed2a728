// SPDX-FileCopyrightText: 2024 Rot127 <unisono@quyllur.org>
// SPDX-License-Identifier: LGPL-3.0-only

use std::collections::BTreeSet;
use std::sync::Once;

use flexi_logger::Logger;
use log::{debug, info};

use crate::call_graph::CallGraph;
use crate::call_site::{CallSite, Callee};
use crate::graph::{CollectOpts, MarkOpts, MemoryGraph};
use crate::module::{FunctionId, GraphSource, Linkage, ModuleInfo};
use crate::state::{AnalysisConfig, AnalysisState};

static LOG_INIT: Once = Once::new();

/// Initializes logging for analysis runs. Called once by the host,
/// later calls are ignored. [spec] is a log specification string
/// like "info" or "steens=debug".
pub fn init_logging(spec: &str) {
    LOG_INIT.call_once(|| {
        Logger::try_with_str(spec)
            .expect("Logger init failed")
            .start()
            .expect("Logger start failed");
    });
}

/// The context insensitive whole program points-to analysis.
///
/// Inlines the local graph of every defined function into one shared
/// graph, without cloning, so all call instances of a function share a
/// single representation. Call sites are then resolved and their
/// arguments unified with the callee formals until the candidate callee
/// sets stop changing. Unification can reveal new callees, which is why
/// resolution has to iterate; every round only ever merges nodes, so the
/// round count is bounded by the initial node count.
pub struct Steensgaard {
    graph: MemoryGraph,
    call_graph: CallGraph,
    state: AnalysisState,
}

impl Steensgaard {
    /// Runs the analysis over [module], pulling the unit graphs
    /// from [source].
    pub fn run<S: GraphSource>(
        module: &ModuleInfo,
        source: &mut S,
        config: AnalysisConfig,
    ) -> Steensgaard {
        let mut graph = MemoryGraph::new();
        graph.splice_from(&mut source.globals_graph());
        for (fid, finfo) in module.functions() {
            if finfo.is_declaration {
                continue;
            }
            graph.splice_from(&mut source.local_graph(*fid));
        }
        graph.remove_trivially_dead_nodes();
        graph.mask_incomplete_markers();
        graph.mark_incomplete_nodes(module, MarkOpts::MARK_FORMAL_ARGS | MarkOpts::IGNORE_GLOBALS);
        info!(
            "Inlined {} unit graphs, {} nodes, {} call sites.",
            module.functions().filter(|(_, i)| !i.is_declaration).count(),
            graph.node_count(),
            graph.fn_calls().len()
        );

        let ceiling = config.max_rounds.unwrap_or(graph.node_count() + 1);
        let mut state = AnalysisState::new(ceiling);
        let mut call_graph = CallGraph::new();
        for (fid, _) in module.functions() {
            call_graph.add_function(*fid);
        }

        // A callee set can grow while argument merging is still running,
        // so sites are re-resolved until a whole round changes nothing.
        while Self::resolve_call_sites(&mut graph, &mut call_graph, module) {
            state.begin_round();
            debug!("Round {}: callee sets changed, merging.", state.rounds());
            let calls: Vec<CallSite> = graph.fn_calls().to_vec();
            for cs in calls.iter() {
                let Some(callees) = call_graph.callees(cs.site()) else {
                    continue;
                };
                for callee in callees.clone() {
                    if module.function(callee).map_or(true, |i| i.is_declaration) {
                        // Nothing of a declaration was inlined.
                        continue;
                    }
                    graph.merge_in_graph(cs, callee, module);
                }
            }
            // Merging can fuse complete objects with incomplete ones.
            // Recompute the markers from scratch, stale ones from the
            // state before this round must not survive.
            graph.mask_incomplete_markers();
            graph
                .mark_incomplete_nodes(module, MarkOpts::MARK_FORMAL_ARGS | MarkOpts::IGNORE_GLOBALS);
        }
        info!(
            "Fixpoint after {} rounds and {} merges.",
            state.rounds(),
            graph.merge_count()
        );

        // Only externally visible functions keep their return entries, so
        // the final marking leaves the formals of internal functions
        // complete.
        graph.retain_returns(|f| {
            module
                .function(*f)
                .map_or(false, |i| i.linkage == Linkage::External)
        });
        graph.mask_incomplete_markers();
        graph.mark_incomplete_nodes(module, MarkOpts::MARK_FORMAL_ARGS | MarkOpts::IGNORE_GLOBALS);
        graph.remove_dead_nodes(if config.keep_unreachable_globals {
            CollectOpts::KEEP_UNREACHABLE_GLOBALS
        } else {
            CollectOpts::empty()
        });

        for cs in graph.fn_calls() {
            if let Some(callees) = call_graph.callees(cs.site()) {
                for callee in callees.clone() {
                    call_graph.add_edge(cs.caller(), callee);
                }
            }
        }
        call_graph.compute_sccs();

        Steensgaard {
            graph,
            call_graph,
            state,
        }
    }

    /// Recomputes the candidate callee set of every call site. Returns
    /// true if any set differs from the previous round.
    fn resolve_call_sites(
        graph: &mut MemoryGraph,
        call_graph: &mut CallGraph,
        module: &ModuleInfo,
    ) -> bool {
        let mut changed = false;
        let calls: Vec<CallSite> = graph.fn_calls().to_vec();
        for cs in calls.iter() {
            let callees = Self::callees_of(graph, module, cs);
            changed |= call_graph.update_site(cs.site(), callees);
        }
        changed
    }

    /// Candidate callees of one site. Direct callees are their own
    /// singleton, declarations included; they stay valid targets even
    /// though nothing of them is merged. Indirect callees are the
    /// function set of the resolved callee object, filtered down to
    /// functions the site can legally call.
    fn callees_of(
        graph: &mut MemoryGraph,
        module: &ModuleInfo,
        cs: &CallSite,
    ) -> BTreeSet<FunctionId> {
        let mut callees = BTreeSet::new();
        match cs.callee() {
            Callee::Null => {}
            Callee::Direct(f) => {
                callees.insert(f);
            }
            Callee::Indirect(h) => {
                let at = graph.resolve(h);
                for f in graph.node(at.node()).functions() {
                    let callable = module
                        .function(*f)
                        .map_or(false, |i| i.callable_with(cs.ptr_args().len(), cs.ret().is_some()));
                    if callable {
                        callees.insert(*f);
                    }
                }
            }
        }
        callees
    }

    /// Re-resolves and re-applies every call site once. True if the
    /// terminal state is in fact a fixpoint: no callee set changes and
    /// no merge happens.
    pub fn is_stable(&mut self, module: &ModuleInfo) -> bool {
        let merges_before = self.graph.merge_count();
        let changed = Self::resolve_call_sites(&mut self.graph, &mut self.call_graph, module);
        let calls: Vec<CallSite> = self.graph.fn_calls().to_vec();
        for cs in calls.iter() {
            let Some(callees) = self.call_graph.callees(cs.site()) else {
                continue;
            };
            for callee in callees.clone() {
                if module.function(callee).map_or(true, |i| i.is_declaration) {
                    continue;
                }
                self.graph.merge_in_graph(cs, callee, module);
            }
        }
        !changed && self.graph.merge_count() == merges_before
    }

    /// The merged global memory graph.
    pub fn graph(&self) -> &MemoryGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut MemoryGraph {
        &mut self.graph
    }

    pub fn call_graph(&self) -> &CallGraph {
        &self.call_graph
    }

    pub fn rounds(&self) -> usize {
        self.state.rounds()
    }
}
