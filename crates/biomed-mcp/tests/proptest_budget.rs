//! Property tests for budget tracker invariants.

use proptest::prelude::*;

use biomed_mcp::budget::{BudgetStatus, BudgetTracker, ResourceType};

fn resource() -> impl Strategy<Value = ResourceType> {
    prop_oneof![Just(ResourceType::Time), Just(ResourceType::Tokens), Just(ResourceType::Requests)]
}

proptest! {
    #[test]
    fn usage_never_exceeds_budget(
        budgets in (0u64..10_000, 0u64..10_000, 0u64..100),
        ops in prop::collection::vec((resource(), 0u64..5_000), 0..64),
    ) {
        let mut tracker = BudgetTracker::new(budgets.0, budgets.1, budgets.2);
        for (resource, amount) in ops {
            tracker.consume(resource, amount);
            let usage = tracker.usage();
            let limits = tracker.budgets();
            for r in ResourceType::ALL {
                prop_assert!(usage.get(r) <= limits.get(r));
                prop_assert_eq!(tracker.get_remaining().get(r), limits.get(r) - usage.get(r));
            }
        }
    }

    #[test]
    fn refused_consume_changes_nothing(
        budget in 1u64..1_000,
        ops in prop::collection::vec(0u64..500, 1..32),
    ) {
        let mut tracker = BudgetTracker::new(budget, budget, budget);
        for amount in ops {
            let before = tracker.usage();
            if !tracker.consume(ResourceType::Tokens, amount) {
                prop_assert_eq!(tracker.usage(), before);
                prop_assert_eq!(tracker.status(), BudgetStatus::TokenExceeded);
            }
        }
    }

    #[test]
    fn exceeded_is_permanent(
        budget in 1u64..1_000,
        later in prop::collection::vec(0u64..10, 1..16),
    ) {
        let mut tracker = BudgetTracker::new(budget, budget, budget);
        prop_assert!(!tracker.consume(ResourceType::Time, budget + 1));
        for amount in later {
            prop_assert!(!tracker.consume(ResourceType::Time, amount));
            prop_assert!(tracker.is_exceeded(ResourceType::Time));
        }
        prop_assert_eq!(tracker.usage().time, 0);
    }

    #[test]
    fn percentages_stay_in_unit_interval(
        budgets in (0u64..1_000, 0u64..1_000, 0u64..1_000),
        ops in prop::collection::vec((resource(), 0u64..400), 0..32),
    ) {
        let mut tracker = BudgetTracker::new(budgets.0, budgets.1, budgets.2);
        for (resource, amount) in ops {
            tracker.consume(resource, amount);
        }
        let pct = tracker.get_usage_percentages();
        for r in ResourceType::ALL {
            prop_assert!((0.0..=1.0).contains(&pct.get(r)));
        }
    }
}
