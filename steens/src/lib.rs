// SPDX-FileCopyrightText: 2023 Rot127 <unisono@quyllur.org>
// SPDX-License-Identifier: LGPL-3.0-only

pub mod call_graph;
pub mod call_site;
pub mod call_targets;
pub mod graph;
pub mod module;
pub mod node;
pub mod state;
pub mod steens;
mod test_call_targets;
mod test_graph;
#[cfg(test)]
mod test_programs;
mod test_steens;
