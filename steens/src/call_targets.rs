// SPDX-FileCopyrightText: 2024 Rot127 <unisono@quyllur.org>
// SPDX-License-Identifier: LGPL-3.0-only

use std::collections::BTreeSet;

use helper::vec_map::VecMap;

use crate::call_site::Callee;
use crate::module::{CallSiteId, ModuleInfo};
use crate::node::NodeFlags;
use crate::steens::Steensgaard;

/// Projection of a finished analysis into the artifact consumers care
/// about: for every call site, the candidate callee names and whether
/// those are provably all targets the site can have.
///
/// The table is deterministic. Sites iterate in call site id order,
/// names are sorted and deduplicated.
pub struct CallTargetFinder {
    /// Site -> ordered candidate callee names.
    ind_map: VecMap<CallSiteId, String>,
    complete: BTreeSet<CallSiteId>,
}

impl CallTargetFinder {
    pub fn find(analysis: &Steensgaard, module: &ModuleInfo) -> CallTargetFinder {
        let mut finder = CallTargetFinder {
            ind_map: VecMap::new(),
            complete: BTreeSet::new(),
        };
        for cs in analysis.graph().fn_calls() {
            let site = cs.site();
            finder.ind_map.ensure(site);
            let complete = match cs.callee() {
                Callee::Direct(f) => {
                    finder.ind_map.push(site, module.function_name(f));
                    true
                }
                // A null callee is directly callable with zero targets.
                Callee::Null => true,
                Callee::Indirect(h) => {
                    if let Some(callees) = analysis.call_graph().callees(site) {
                        for f in callees.iter() {
                            // Mutually recursive functions stand in for
                            // each other.
                            for member in analysis.call_graph().scc_members(*f) {
                                finder.ind_map.push(site, module.function_name(*member));
                            }
                        }
                    }
                    let flags = analysis.graph().flags_of(h);
                    !flags.intersects(
                        NodeFlags::INCOMPLETE | NodeFlags::EXTERNAL | NodeFlags::UNKNOWN,
                    )
                }
            };
            finder.ind_map.sort_dedup(&site);
            if complete {
                finder.complete.insert(site);
            }
        }
        finder
    }

    /// All recorded call sites, in id order.
    pub fn sites(&self) -> impl Iterator<Item = &CallSiteId> {
        self.ind_map.keys()
    }

    /// The ordered candidate callee names of [site].
    pub fn targets(&self, site: CallSiteId) -> &[String] {
        self.ind_map.get(&site).unwrap_or(&[])
    }

    /// True if the candidate list of [site] is provably exhaustive. An
    /// empty list of a site with a well understood callee object counts.
    pub fn is_complete(&self, site: CallSiteId) -> bool {
        self.complete.contains(&site)
    }
}
