// SPDX-FileCopyrightText: 2024 Rot127 <unisono@quyllur.org>
// SPDX-License-Identifier: LGPL-3.0-only

/// Per run configuration of the whole program analysis.
#[derive(Clone, Debug)]
pub struct AnalysisConfig {
    /// Ceiling on resolve/apply rounds. Derived from the initial live
    /// node count when unset. Merging is monotone, so the loop converges
    /// long before either bound; the ceiling only trips on a broken
    /// graph invariant.
    pub max_rounds: Option<usize>,
    /// Treat unreachable globals as collection roots in the final dead
    /// node removal.
    pub keep_unreachable_globals: bool,
}

impl Default for AnalysisConfig {
    fn default() -> AnalysisConfig {
        AnalysisConfig {
            max_rounds: None,
            keep_unreachable_globals: true,
        }
    }
}

/// Mutable state of one analysis run. Constructed fresh per run and
/// owned by the driver, nothing of it is ambient.
pub struct AnalysisState {
    rounds: usize,
    round_ceiling: usize,
}

impl AnalysisState {
    pub fn new(round_ceiling: usize) -> AnalysisState {
        AnalysisState {
            rounds: 0,
            round_ceiling,
        }
    }

    /// Accounts one resolve/apply round.
    pub fn begin_round(&mut self) {
        assert!(
            self.rounds < self.round_ceiling,
            "Round {} exceeded the ceiling of {}. Merging did not converge monotonically.",
            self.rounds + 1,
            self.round_ceiling
        );
        self.rounds += 1;
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }
}
