//! Merging global and route policies into one ordered chain.

use crate::policy::Policy;
use indexmap::IndexMap;
use std::sync::Arc;

/// Merges `global` and `route` policies by name and sorts by priority.
///
/// A route policy with the same name as a global one replaces it (it does
/// not append). The sort is stable, so equal priorities keep merge order:
/// globals first, then route-only policies, with an override keeping the
/// global's slot. Inputs are not modified.
#[must_use]
pub fn build_policy_chain(global: &[Policy], route: &[Policy]) -> Vec<Policy> {
    let mut merged: IndexMap<Arc<str>, Policy> = IndexMap::with_capacity(global.len() + route.len());
    for policy in global.iter().chain(route) {
        merged.insert(Arc::clone(policy.name_arc()), policy.clone());
    }

    let mut chain: Vec<Policy> = merged.into_values().collect();
    chain.sort_by_key(Policy::priority);
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Next;
    use crate::context::RequestState;
    use crate::policy::{PolicyHandler, PolicyOutcome};
    use crate::types::{BoxFuture, Request};
    use proptest::prelude::*;

    struct Pass;

    impl PolicyHandler for Pass {
        fn handle<'a>(
            &'a self,
            state: &'a mut RequestState,
            request: Request,
            next: Next<'a>,
        ) -> BoxFuture<'a, PolicyOutcome> {
            Box::pin(next.run(state, request))
        }
    }

    fn policy(name: &str, priority: i32) -> Policy {
        Policy::new(name, priority, Pass)
    }

    fn names(chain: &[Policy]) -> Vec<&str> {
        chain.iter().map(Policy::name).collect()
    }

    #[test]
    fn test_empty_inputs() {
        assert!(build_policy_chain(&[], &[]).is_empty());
    }

    #[test]
    fn test_route_overrides_global_by_name() {
        let global = vec![policy("auth", 10), policy("log", 0)];
        let route = vec![policy("auth", 5)];

        let chain = build_policy_chain(&global, &route);

        assert_eq!(names(&chain), vec!["log", "auth"]);
        assert_eq!(chain[1].priority(), 5);
        assert_eq!(global.len(), 2);
        assert_eq!(global[0].priority(), 10);
    }

    #[test]
    fn test_disjoint_names_union_sorted() {
        let chain = build_policy_chain(
            &[policy("ratelimit", 20), policy("log", 0)],
            &[policy("auth", 10)],
        );
        assert_eq!(names(&chain), vec!["log", "auth", "ratelimit"]);
    }

    #[test]
    fn test_ties_keep_merge_order() {
        let chain = build_policy_chain(
            &[policy("g1", 1), policy("g2", 1)],
            &[policy("r1", 1), policy("g1", 1)],
        );
        assert_eq!(names(&chain), vec!["g1", "g2", "r1"]);
    }

    fn arb_policies() -> impl Strategy<Value = Vec<(String, i32)>> {
        prop::collection::vec(("[a-e]", -3i32..3), 0..12)
    }

    proptest! {
        #[test]
        fn prop_chain_is_sorted_unique_and_repeatable(
            global in arb_policies(),
            route in arb_policies(),
        ) {
            let global: Vec<_> = global.iter().map(|(n, p)| policy(n, *p)).collect();
            let route: Vec<_> = route.iter().map(|(n, p)| policy(n, *p)).collect();

            let first = build_policy_chain(&global, &route);
            let second = build_policy_chain(&global, &route);

            prop_assert_eq!(names(&first), names(&second));
            prop_assert!(first.windows(2).all(|w| w[0].priority() <= w[1].priority()));

            let mut seen = std::collections::HashSet::new();
            prop_assert!(first.iter().all(|p| seen.insert(p.name().to_string())));
        }

        #[test]
        fn prop_route_wins_on_name_collision(
            global in arb_policies(),
            route in arb_policies(),
        ) {
            let global: Vec<_> = global.iter().map(|(n, p)| policy(n, *p)).collect();
            let route: Vec<_> = route.iter().map(|(n, p)| policy(n, *p)).collect();

            let chain = build_policy_chain(&global, &route);

            for merged in &chain {
                let expected = route
                    .iter()
                    .rev()
                    .chain(global.iter().rev())
                    .find(|p| p.name() == merged.name())
                    .map(Policy::priority);
                prop_assert_eq!(Some(merged.priority()), expected);
            }
        }
    }
}
