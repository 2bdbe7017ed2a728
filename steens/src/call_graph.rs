// SPDX-FileCopyrightText: 2024 Rot127 <unisono@quyllur.org>
// SPDX-License-Identifier: LGPL-3.0-only

use std::collections::{BTreeMap, BTreeSet};

use helper::set_map::SetMap;
use petgraph::algo::kosaraju_scc;
use petgraph::prelude::DiGraphMap;
use petgraph::Direction::Incoming;

use crate::module::{CallSiteId, FunctionId};

/// The caller -> callee graph derived from the resolved call sites.
///
/// Tracks, per call site, the candidate callee set of the latest
/// resolution round, and, once resolution converged, the function level
/// edge graph with its strongly connected components.
pub struct CallGraph {
    /// Candidate callees per call site.
    site_callees: SetMap<CallSiteId, FunctionId>,
    /// Function level edges. The weight counts the call sites
    /// inducing the edge.
    graph: DiGraphMap<FunctionId, usize>,
    /// SCC members, keyed by the SCC leader.
    sccs: BTreeMap<FunctionId, Vec<FunctionId>>,
    /// SCC leader per function.
    leaders: BTreeMap<FunctionId, FunctionId>,
}

impl CallGraph {
    pub fn new() -> CallGraph {
        CallGraph {
            site_callees: SetMap::new(),
            graph: DiGraphMap::new(),
            sccs: BTreeMap::new(),
            leaders: BTreeMap::new(),
        }
    }

    /// Makes [f] a node of the graph, so functions without any call
    /// edge still show up in the SCC partition.
    pub fn add_function(&mut self, f: FunctionId) {
        self.graph.add_node(f);
    }

    /// Records the candidate set of [site]. Returns true if it differs
    /// from the set of the previous round. A site never seen counts as
    /// the empty set.
    pub fn update_site(&mut self, site: CallSiteId, callees: BTreeSet<FunctionId>) -> bool {
        self.site_callees.swap_in(site, callees)
    }

    pub fn callees(&self, site: CallSiteId) -> Option<&BTreeSet<FunctionId>> {
        self.site_callees.get(&site)
    }

    pub fn sites(
        &self,
    ) -> std::collections::btree_map::Keys<'_, CallSiteId, BTreeSet<FunctionId>> {
        self.site_callees.keys()
    }

    pub fn add_edge(&mut self, caller: FunctionId, callee: FunctionId) {
        if let Some(weight) = self.graph.edge_weight_mut(caller, callee) {
            *weight += 1;
            return;
        }
        self.graph.add_edge(caller, callee, 1);
    }

    pub fn graph(&self) -> &DiGraphMap<FunctionId, usize> {
        &self.graph
    }

    /// Partitions the graph into strongly connected components and picks
    /// the smallest member of each as its leader.
    pub fn compute_sccs(&mut self) {
        self.sccs.clear();
        self.leaders.clear();
        for mut scc in kosaraju_scc(&self.graph) {
            scc.sort();
            let leader = *scc
                .first()
                .expect("kosaraju_scc returned an empty component.");
            for member in scc.iter() {
                self.leaders.insert(*member, leader);
            }
            self.sccs.insert(leader, scc);
        }
    }

    /// The SCC leader of [f]. A function outside the graph leads its
    /// own singleton.
    pub fn leader(&self, f: FunctionId) -> FunctionId {
        *self.leaders.get(&f).unwrap_or(&f)
    }

    /// All members of the SCC of [f], sorted.
    pub fn scc_members(&self, f: FunctionId) -> &[FunctionId] {
        match self.sccs.get(&self.leader(f)) {
            Some(members) => members,
            None => panic!("{} has no SCC. Were the SCCs computed?", f),
        }
    }

    /// Leaders of the SCCs no outside function calls into.
    pub fn roots(&self) -> Vec<FunctionId> {
        let mut roots = Vec::new();
        for (leader, members) in self.sccs.iter() {
            let called_from_outside = members.iter().any(|m| {
                self.graph
                    .neighbors_directed(*m, Incoming)
                    .any(|caller| self.leader(caller) != *leader)
            });
            if !called_from_outside {
                roots.push(*leader);
            }
        }
        roots
    }
}
