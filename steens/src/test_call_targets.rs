// SPDX-FileCopyrightText: 2024 Rot127 <unisono@quyllur.org>
// SPDX-License-Identifier: LGPL-3.0-only

#[cfg(test)]
mod tests {
    use crate::call_targets::CallTargetFinder;
    use crate::state::AnalysisConfig;
    use crate::steens::Steensgaard;
    use crate::test_programs::{
        callback_program, CS_DISPATCH, CS_EMPTY_FPTR, CS_EXTERN_FPTR, CS_MAIN_MUTUAL,
        CS_MUTUAL_AB, CS_MUTUAL_BA, CS_MUTUAL_FPTR, CS_NULL, CS_READ_CONFIG,
    };

    fn finder() -> CallTargetFinder {
        let (module, mut program) = callback_program();
        let analysis = Steensgaard::run(&module, &mut program, AnalysisConfig::default());
        CallTargetFinder::find(&analysis, &module)
    }

    #[test]
    fn test_table_is_site_ordered_and_covers_every_call() {
        let finder = finder();
        let sites: Vec<_> = finder.sites().copied().collect();
        let mut sorted = sites.clone();
        sorted.sort();
        assert_eq!(sites, sorted, "Sites must iterate in id order.");
        assert_eq!(
            sites,
            vec![
                CS_DISPATCH,
                CS_READ_CONFIG,
                CS_NULL,
                CS_MUTUAL_AB,
                CS_MUTUAL_BA,
                CS_MAIN_MUTUAL,
                CS_EMPTY_FPTR,
                CS_EXTERN_FPTR,
                CS_MUTUAL_FPTR,
            ],
            "Every recorded call must have a row."
        );
    }

    #[test]
    fn test_dispatch_targets_are_sorted_names() {
        let finder = finder();
        assert_eq!(
            finder.targets(CS_DISPATCH),
            &["register_cb".to_string(), "timer_cb".to_string()][..],
            "Indirect targets must list both callbacks, sorted."
        );
        assert!(
            finder.is_complete(CS_DISPATCH),
            "A resolved internal dispatch cell is complete."
        );
    }

    #[test]
    fn test_direct_declaration_call_is_complete() {
        let finder = finder();
        assert_eq!(
            finder.targets(CS_READ_CONFIG),
            &["read_config".to_string()][..],
            "The direct callee is the only target."
        );
        assert!(
            finder.is_complete(CS_READ_CONFIG),
            "Direct calls are always complete."
        );
    }

    #[test]
    fn test_null_call_is_complete_and_empty() {
        let finder = finder();
        assert!(
            finder.targets(CS_NULL).is_empty(),
            "A null call has no targets."
        );
        assert!(
            finder.is_complete(CS_NULL),
            "A null call is directly callable."
        );
    }

    #[test]
    fn test_clean_empty_callee_is_complete() {
        let finder = finder();
        assert!(
            finder.targets(CS_EMPTY_FPTR).is_empty(),
            "A pointer nothing was assigned to resolves to zero targets."
        );
        assert!(
            finder.is_complete(CS_EMPTY_FPTR),
            "Zero targets through a fully understood object count as complete."
        );
    }

    #[test]
    fn test_external_callee_is_incomplete() {
        let finder = finder();
        assert!(
            !finder.is_complete(CS_EXTERN_FPTR),
            "A pointer loaded from outside can have targets the module never saw."
        );
    }

    #[test]
    fn test_recursive_callees_expand_to_their_scc() {
        let finder = finder();
        assert_eq!(
            finder.targets(CS_MUTUAL_FPTR),
            &["mutual_a".to_string(), "mutual_b".to_string()][..],
            "Members of the callee's SCC stand in for each other."
        );
        assert_eq!(
            finder.targets(CS_MAIN_MUTUAL),
            &["mutual_a".to_string()][..],
            "Direct calls list the named callee only."
        );
    }
}
