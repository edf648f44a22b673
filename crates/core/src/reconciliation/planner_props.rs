//! Property-based tests for match planning.

use std::collections::HashSet;

use chrono::{Duration, NaiveDate};
use clearbook_shared::config::ReconciliationConfig;
use clearbook_shared::types::{Currency, JournalEntryId};
use proptest::prelude::*;

use super::planner::{EntryCandidate, EventCandidate, MatchPlan, MatchPlanner};
use super::similarity::TokenJaccard;
use super::types::MatchConfidence;
use crate::exceptions::ExceptionTarget;
use crate::ledger::DateRange;

const DESCRIPTIONS: [&str; 4] = [
    "card charge acme",
    "acme card charge",
    "payout weekly",
    "refund order 77",
];

fn base() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
}

fn chunk() -> DateRange {
    DateRange::new(base(), base() + Duration::days(6)).unwrap()
}

/// (amount, day offset, description index)
fn item_strategy() -> impl Strategy<Value = (i64, i64, usize)> {
    (1i64..40i64, -4i64..11i64, 0usize..DESCRIPTIONS.len())
}

fn entries(shape: &[(i64, i64, usize)]) -> Vec<EntryCandidate> {
    shape.iter()
        .map(|&(amount, day, d)| EntryCandidate {
            entry_id: JournalEntryId::new(),
            currency: Some(Currency::Usd),
            amount: amount * 100,
            date: base() + Duration::days(day),
            description: DESCRIPTIONS[d].to_string(),
            source_event_id: None,
        })
        .collect()
}

fn events(shape: &[(i64, i64, usize)]) -> Vec<EventCandidate> {
    shape.iter()
        .enumerate()
        .map(|(i, &(amount, day, d))| EventCandidate {
            event_id: format!("evt_{i}"),
            currency: Some(Currency::Usd),
            amount: amount * 100,
            date: base() + Duration::days(day),
            description: DESCRIPTIONS[d].to_string(),
        })
        .collect()
}

fn run(config: &ReconciliationConfig, e: &[EntryCandidate], v: &[EventCandidate]) -> MatchPlan {
    MatchPlanner::new(config, &TokenJaccard).plan(chunk(), base(), e, v, &HashSet::new())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property 1: No item is matched twice.
    ///
    /// *For any* candidate sets, every entry and every event SHALL appear in
    /// at most one planned match.
    #[test]
    fn prop_matches_are_one_to_one(
        entry_shape in prop::collection::vec(item_strategy(), 0..10),
        event_shape in prop::collection::vec(item_strategy(), 0..10),
    ) {
        let config = ReconciliationConfig::default();
        let plan = run(&config, &entries(&entry_shape), &events(&event_shape));

        let mut seen_entries = HashSet::new();
        let mut seen_events = HashSet::new();
        for m in &plan.matches {
            prop_assert!(seen_entries.insert(m.entry_id));
            prop_assert!(seen_events.insert(m.event_id.clone()));
        }
    }

    /// Property 2: Exact matches respect the tolerances.
    ///
    /// *For any* candidate sets with reference linking off, every Exact match
    /// SHALL pair amounts within epsilon and dates within the tolerance.
    #[test]
    fn prop_exact_matches_within_tolerance(
        entry_shape in prop::collection::vec(item_strategy(), 0..10),
        event_shape in prop::collection::vec(item_strategy(), 0..10),
    ) {
        let config = ReconciliationConfig {
            link_by_reference: false,
            ..ReconciliationConfig::default()
        };
        let e = entries(&entry_shape);
        let v = events(&event_shape);
        let plan = run(&config, &e, &v);

        for m in plan.matches.iter().filter(|m| m.confidence == MatchConfidence::Exact) {
            let entry = e.iter().find(|x| x.entry_id == m.entry_id).unwrap();
            let event = v.iter().find(|x| x.event_id == m.event_id).unwrap();
            prop_assert!(entry.amount.abs_diff(event.amount) <= 1);
            prop_assert!((entry.date - event.date).num_days().abs() <= config.date_tolerance_days);
        }
    }

    /// Property 3: Every item dated in the chunk is accounted for.
    ///
    /// *For any* candidate sets, each entry and event inside the chunk SHALL
    /// end up in a match or as a target of an exception.
    #[test]
    fn prop_anchored_items_accounted_for(
        entry_shape in prop::collection::vec(item_strategy(), 0..10),
        event_shape in prop::collection::vec(item_strategy(), 0..10),
    ) {
        let config = ReconciliationConfig::default();
        let e = entries(&entry_shape);
        let v = events(&event_shape);
        let plan = run(&config, &e, &v);

        let mut covered: HashSet<ExceptionTarget> = plan
            .exceptions
            .iter()
            .flat_map(|x| x.targets.iter().cloned())
            .collect();
        for m in &plan.matches {
            covered.insert(ExceptionTarget::Entry(m.entry_id));
            covered.insert(ExceptionTarget::Event(m.event_id.clone()));
        }
        for entry in e.iter().filter(|x| chunk().contains(x.date)) {
            prop_assert!(covered.contains(&ExceptionTarget::Entry(entry.entry_id)));
        }
        for event in v.iter().filter(|x| chunk().contains(x.date)) {
            prop_assert!(covered.contains(&ExceptionTarget::Event(event.event_id.clone())));
        }
    }

    /// Property 4: Planning is deterministic.
    ///
    /// *For any* candidate sets, planning twice SHALL yield the same plan.
    #[test]
    fn prop_plan_is_deterministic(
        entry_shape in prop::collection::vec(item_strategy(), 0..10),
        event_shape in prop::collection::vec(item_strategy(), 0..10),
    ) {
        let config = ReconciliationConfig::default();
        let e = entries(&entry_shape);
        let v = events(&event_shape);
        prop_assert_eq!(run(&config, &e, &v), run(&config, &e, &v));
    }
}
