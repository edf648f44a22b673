//! Match planning for one reconciliation chunk.
//!
//! The planner is pure: given the candidates loaded around a chunk it decides
//! which pairs match and which items become exceptions. The reconciler
//! persists the plan.
//!
//! Candidates are loaded from the chunk widened by the larger date tolerance.
//! Items outside the chunk serve only as partners: a match needs at least one
//! side dated inside the chunk, an exception at least one such member.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::NaiveDate;
use clearbook_shared::config::ReconciliationConfig;
use clearbook_shared::types::{Currency, JournalEntryId};
use rust_decimal::Decimal;

use super::severity::classify;
use super::similarity::DescriptionSimilarity;
use super::types::MatchConfidence;
use crate::event::ExternalTransactionEvent;
use crate::exceptions::{ExceptionTarget, ExceptionType, ReconciliationException, Severity};
use crate::ledger::{DateRange, JournalEntry};

/// Matching view of a journal entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryCandidate {
    /// Entry id.
    pub entry_id: JournalEntryId,
    /// Currency, when all lines share one.
    pub currency: Option<Currency>,
    /// Amount compared against the feed.
    pub amount: i64,
    /// Accounting date.
    pub date: NaiveDate,
    /// Description.
    pub description: String,
    /// Event the entry was generated from.
    pub source_event_id: Option<String>,
}

impl EntryCandidate {
    /// Builds the candidate of an entry.
    #[must_use]
    pub fn from_entry(entry: &JournalEntry) -> Self {
        Self {
            entry_id: entry.id,
            currency: entry.currency(),
            amount: entry.match_amount(),
            date: entry.date,
            description: entry.description.clone(),
            source_event_id: entry.source_event_id.clone(),
        }
    }
}

/// Matching view of a feed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventCandidate {
    /// Event id.
    pub event_id: String,
    /// Currency; `None` for an unrecognised code, which never matches.
    pub currency: Option<Currency>,
    /// Amount.
    pub amount: i64,
    /// Accounting date.
    pub date: NaiveDate,
    /// Description.
    pub description: String,
}

impl EventCandidate {
    /// Builds the candidate of a feed event.
    #[must_use]
    pub fn from_event(event: &ExternalTransactionEvent) -> Self {
        Self {
            event_id: event.event_id.clone(),
            currency: event.currency().ok(),
            amount: event.amount,
            date: event.date(),
            description: event.description(),
        }
    }
}

/// A pair to record as matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMatch {
    /// Entry side.
    pub entry_id: JournalEntryId,
    /// Event side.
    pub event_id: String,
    /// Confidence.
    pub confidence: MatchConfidence,
    /// Similarity for fuzzy matches.
    pub score: Option<Decimal>,
}

/// An exception to raise or confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedException {
    /// Kind.
    pub exception_type: ExceptionType,
    /// Severity at planning time.
    pub severity: Severity,
    /// Sorted targets.
    pub targets: Vec<ExceptionTarget>,
    /// Largest absolute amount.
    pub amount: i64,
    /// Common currency.
    pub currency: Option<Currency>,
    /// Oldest date.
    pub item_date: NaiveDate,
    /// Detail text.
    pub detail: String,
}

impl PlannedException {
    /// Fingerprint the exception is stored under.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        ReconciliationException::fingerprint_of(self.exception_type, &self.targets)
    }
}

/// Plan for one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchPlan {
    /// Matches, in discovery order.
    pub matches: Vec<PlannedMatch>,
    /// Exceptions, in discovery order.
    pub exceptions: Vec<PlannedException>,
}

#[derive(Clone, Copy)]
enum Item<'a> {
    Entry(&'a EntryCandidate),
    Event(&'a EventCandidate),
}

impl Item<'_> {
    fn target(self) -> ExceptionTarget {
        match self {
            Self::Entry(e) => ExceptionTarget::Entry(e.entry_id),
            Self::Event(e) => ExceptionTarget::Event(e.event_id.clone()),
        }
    }

    const fn amount(self) -> i64 {
        match self {
            Self::Entry(e) => e.amount,
            Self::Event(e) => e.amount,
        }
    }

    const fn date(self) -> NaiveDate {
        match self {
            Self::Entry(e) => e.date,
            Self::Event(e) => e.date,
        }
    }

    const fn currency(self) -> Option<Currency> {
        match self {
            Self::Entry(e) => e.currency,
            Self::Event(e) => e.currency,
        }
    }
}

/// Disjoint sets over `0..n`.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[rb.max(ra)] = ra.min(rb);
        }
    }
}

/// Best fuzzy partners of one item.
struct Best {
    score: Decimal,
    partners: Vec<usize>,
}

fn offer(best: &mut BTreeMap<usize, Best>, item: usize, partner: usize, score: Decimal) {
    match best.get_mut(&item) {
        Some(b) if score > b.score => {
            b.score = score;
            b.partners = vec![partner];
        }
        Some(b) if score == b.score => b.partners.push(partner),
        Some(_) => {}
        None => {
            best.insert(
                item,
                Best {
                    score,
                    partners: vec![partner],
                },
            );
        }
    }
}

/// Decides matches and exceptions for a chunk.
pub struct MatchPlanner<'a> {
    config: &'a ReconciliationConfig,
    similarity: &'a dyn DescriptionSimilarity,
}

impl<'a> MatchPlanner<'a> {
    /// Creates a planner.
    pub fn new(config: &'a ReconciliationConfig, similarity: &'a dyn DescriptionSimilarity) -> Self {
        Self { config, similarity }
    }

    fn epsilon(&self) -> u64 {
        u64::try_from(self.config.amount_epsilon_minor).unwrap_or(0)
    }

    fn days_apart(a: NaiveDate, b: NaiveDate) -> u64 {
        (a - b).num_days().unsigned_abs()
    }

    fn same_currency(a: Option<Currency>, b: Option<Currency>) -> bool {
        a.is_some() && a == b
    }

    fn linked(&self, entry: &EntryCandidate, event: &EventCandidate) -> bool {
        self.config.link_by_reference
            && entry.source_event_id.as_deref() == Some(event.event_id.as_str())
            && Self::same_currency(entry.currency, event.currency)
            && entry.amount.abs_diff(event.amount) <= self.epsilon()
    }

    /// Amount and date within the exact tolerances; both bounds inclusive.
    #[must_use]
    pub fn is_exact(&self, entry: &EntryCandidate, event: &EventCandidate) -> bool {
        let tolerance = u64::try_from(self.config.date_tolerance_days).unwrap_or(0);
        Self::same_currency(entry.currency, event.currency)
            && entry.amount.abs_diff(event.amount) <= self.epsilon()
            && Self::days_apart(entry.date, event.date) <= tolerance
    }

    /// Similarity of a pair eligible for fuzzy matching, if it beats the threshold.
    #[must_use]
    pub fn fuzzy_score(&self, entry: &EntryCandidate, event: &EventCandidate) -> Option<Decimal> {
        let tolerance = u64::try_from(self.config.fuzzy_date_tolerance_days).unwrap_or(0);
        if !Self::same_currency(entry.currency, event.currency)
            || Self::days_apart(entry.date, event.date) > tolerance
        {
            return None;
        }
        let score = self.similarity.score(&entry.description, &event.description);
        (score > self.config.fuzzy_threshold).then_some(score)
    }

    /// Amounts differ by at most the fuzzy tolerance, in basis points of the larger.
    #[must_use]
    pub fn within_fuzzy_amount(&self, a: i64, b: i64) -> bool {
        let gap = i128::from(a.abs_diff(b));
        let larger = i128::from(a.unsigned_abs().max(b.unsigned_abs()));
        gap * 10_000 <= i128::from(self.config.fuzzy_amount_tolerance_bps) * larger
    }

    /// Confidence a single pair would be matched with, ignoring other candidates.
    #[must_use]
    pub fn evaluate(
        &self,
        entry: &EntryCandidate,
        event: &EventCandidate,
    ) -> Option<(MatchConfidence, Option<Decimal>)> {
        if self.linked(entry, event) || self.is_exact(entry, event) {
            return Some((MatchConfidence::Exact, None));
        }
        self.fuzzy_score(entry, event)
            .filter(|_| self.within_fuzzy_amount(entry.amount, event.amount))
            .map(|score| (MatchConfidence::Fuzzy, Some(score)))
    }

    /// Plans a chunk.
    ///
    /// `entries` must already exclude matched and non-reconcilable entries.
    /// `events` is the raw feed listing; repeated ids are reported as
    /// duplicates and matched ids are skipped.
    #[must_use]
    pub fn plan(
        &self,
        chunk: DateRange,
        today: NaiveDate,
        entries: &[EntryCandidate],
        events: &[EventCandidate],
        matched_events: &HashSet<String>,
    ) -> MatchPlan {
        let mut plan = MatchPlan::default();

        let mut occurrences: HashMap<&str, usize> = HashMap::new();
        let mut unique: Vec<&EventCandidate> = Vec::new();
        for event in events {
            let count = occurrences.entry(event.event_id.as_str()).or_insert(0);
            *count += 1;
            if *count == 1 {
                unique.push(event);
            }
        }
        for event in &unique {
            let count = occurrences.get(event.event_id.as_str()).copied().unwrap_or(0);
            if count > 1 && chunk.contains(event.date) {
                plan.exceptions.push(self.exception(
                    ExceptionType::Duplicate,
                    &[Item::Event(event)],
                    format!("event {} is listed {count} times in the feed", event.event_id),
                    today,
                ));
            }
        }

        let events: Vec<&EventCandidate> = unique
            .into_iter()
            .filter(|e| !matched_events.contains(&e.event_id))
            .collect();
        let entries: Vec<&EntryCandidate> = entries.iter().collect();
        let mut entry_done = vec![false; entries.len()];
        let mut event_done = vec![false; events.len()];

        self.link_pass(chunk, &entries, &events, &mut entry_done, &mut event_done, &mut plan);
        self.exact_pass(chunk, today, &entries, &events, &mut entry_done, &mut event_done, &mut plan);
        self.fuzzy_pass(chunk, today, &entries, &events, &mut entry_done, &mut event_done, &mut plan);

        for (entry, _) in entries.iter().zip(&entry_done).filter(|(_, done)| !**done) {
            if chunk.contains(entry.date) {
                plan.exceptions.push(self.exception(
                    ExceptionType::MissingEvent,
                    &[Item::Entry(entry)],
                    format!("entry {} has no matching feed event", entry.entry_id),
                    today,
                ));
            }
        }
        for (event, _) in events.iter().zip(&event_done).filter(|(_, done)| !**done) {
            if chunk.contains(event.date) {
                plan.exceptions.push(self.exception(
                    ExceptionType::MissingEntry,
                    &[Item::Event(event)],
                    format!("event {} has no matching journal entry", event.event_id),
                    today,
                ));
            }
        }

        plan
    }

    fn link_pass(
        &self,
        chunk: DateRange,
        entries: &[&EntryCandidate],
        events: &[&EventCandidate],
        entry_done: &mut [bool],
        event_done: &mut [bool],
        plan: &mut MatchPlan,
    ) {
        if !self.config.link_by_reference {
            return;
        }
        let index: HashMap<&str, usize> = events
            .iter()
            .enumerate()
            .map(|(j, e)| (e.event_id.as_str(), j))
            .collect();

        for (i, entry) in entries.iter().enumerate() {
            let Some(j) = entry
                .source_event_id
                .as_deref()
                .and_then(|id| index.get(id).copied())
            else {
                continue;
            };
            let event = events[j];
            if event_done[j] || !self.linked(entry, event) {
                continue;
            }
            entry_done[i] = true;
            event_done[j] = true;
            if chunk.contains(entry.date) || chunk.contains(event.date) {
                plan.matches.push(PlannedMatch {
                    entry_id: entry.entry_id,
                    event_id: event.event_id.clone(),
                    confidence: MatchConfidence::Exact,
                    score: None,
                });
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn exact_pass(
        &self,
        chunk: DateRange,
        today: NaiveDate,
        entries: &[&EntryCandidate],
        events: &[&EventCandidate],
        entry_done: &mut [bool],
        event_done: &mut [bool],
        plan: &mut MatchPlan,
    ) {
        let offset = entries.len();
        let mut sets = UnionFind::new(offset + events.len());
        let mut edges = Vec::new();
        for (i, entry) in entries.iter().enumerate().filter(|(i, _)| !entry_done[*i]) {
            for (j, event) in events.iter().enumerate().filter(|(j, _)| !event_done[*j]) {
                if self.is_exact(entry, event) {
                    edges.push((i, j));
                    sets.union(i, offset + j);
                }
            }
        }

        let mut components: BTreeMap<usize, (Vec<(usize, usize)>, Vec<usize>)> = BTreeMap::new();
        for &(i, j) in &edges {
            let root = sets.find(i);
            let component = components.entry(root).or_default();
            component.0.push((i, j));
            for node in [i, offset + j] {
                if !component.1.contains(&node) {
                    component.1.push(node);
                }
            }
        }

        for (component_edges, mut nodes) in components.into_values() {
            nodes.sort_unstable();
            let items: Vec<Item<'_>> = nodes
                .iter()
                .map(|&n| {
                    if n < offset {
                        Item::Entry(entries[n])
                    } else {
                        Item::Event(events[n - offset])
                    }
                })
                .collect();
            for &n in &nodes {
                if n < offset {
                    entry_done[n] = true;
                } else {
                    event_done[n - offset] = true;
                }
            }
            if !items.iter().any(|item| chunk.contains(item.date())) {
                continue;
            }

            if let [(i, j)] = component_edges.as_slice() {
                plan.matches.push(PlannedMatch {
                    entry_id: entries[*i].entry_id,
                    event_id: events[*j].event_id.clone(),
                    confidence: MatchConfidence::Exact,
                    score: None,
                });
            } else {
                plan.exceptions.push(self.ambiguous(&items, "amount and date", today));
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn fuzzy_pass(
        &self,
        chunk: DateRange,
        today: NaiveDate,
        entries: &[&EntryCandidate],
        events: &[&EventCandidate],
        entry_done: &mut [bool],
        event_done: &mut [bool],
        plan: &mut MatchPlan,
    ) {
        let mut entry_best: BTreeMap<usize, Best> = BTreeMap::new();
        let mut event_best: BTreeMap<usize, Best> = BTreeMap::new();
        for (i, entry) in entries.iter().enumerate().filter(|(i, _)| !entry_done[*i]) {
            for (j, event) in events.iter().enumerate().filter(|(j, _)| !event_done[*j]) {
                if let Some(score) = self.fuzzy_score(entry, event) {
                    offer(&mut entry_best, i, j, score);
                    offer(&mut event_best, j, i, score);
                }
            }
        }

        for (&i, best) in &entry_best {
            let [j] = best.partners.as_slice() else {
                continue;
            };
            let j = *j;
            let mutual = event_best
                .get(&j)
                .is_some_and(|b| b.partners.as_slice() == [i]);
            if !mutual {
                continue;
            }
            entry_done[i] = true;
            event_done[j] = true;
            let (entry, event) = (entries[i], events[j]);
            if !(chunk.contains(entry.date) || chunk.contains(event.date)) {
                continue;
            }
            if self.within_fuzzy_amount(entry.amount, event.amount) {
                plan.matches.push(PlannedMatch {
                    entry_id: entry.entry_id,
                    event_id: event.event_id.clone(),
                    confidence: MatchConfidence::Fuzzy,
                    score: Some(best.score),
                });
            } else {
                plan.exceptions.push(self.exception(
                    ExceptionType::AmountMismatch,
                    &[Item::Entry(entry), Item::Event(event)],
                    format!(
                        "descriptions match (score {}) but amounts {} and {} differ beyond tolerance",
                        best.score.normalize(),
                        entry.amount,
                        event.amount
                    ),
                    today,
                ));
            }
        }

        let offset = entries.len();
        let mut sets = UnionFind::new(offset + events.len());
        let mut tied = Vec::new();
        for (&i, best) in entry_best.iter().filter(|(_, b)| b.partners.len() > 1) {
            for &j in best.partners.iter().filter(|j| !event_done[**j]) {
                if !entry_done[i] {
                    sets.union(i, offset + j);
                    tied.extend([i, offset + j]);
                }
            }
        }
        for (&j, best) in event_best.iter().filter(|(_, b)| b.partners.len() > 1) {
            for &i in best.partners.iter().filter(|i| !entry_done[**i]) {
                if !event_done[j] {
                    sets.union(i, offset + j);
                    tied.extend([i, offset + j]);
                }
            }
        }
        tied.sort_unstable();
        tied.dedup();

        let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for node in tied {
            groups.entry(sets.find(node)).or_default().push(node);
        }
        for nodes in groups.into_values() {
            let items: Vec<Item<'_>> = nodes
                .iter()
                .map(|&n| {
                    if n < offset {
                        Item::Entry(entries[n])
                    } else {
                        Item::Event(events[n - offset])
                    }
                })
                .collect();
            for &n in &nodes {
                if n < offset {
                    entry_done[n] = true;
                } else {
                    event_done[n - offset] = true;
                }
            }
            if items.iter().any(|item| chunk.contains(item.date())) {
                plan.exceptions.push(self.ambiguous(&items, "description", today));
            }
        }
    }

    fn ambiguous(&self, items: &[Item<'_>], basis: &str, today: NaiveDate) -> PlannedException {
        let entries = items.iter().filter(|i| matches!(i, Item::Entry(_))).count();
        let events = items.len() - entries;
        self.exception(
            ExceptionType::AmbiguousMatch,
            items,
            format!("{entries} entries and {events} events match equally well by {basis}"),
            today,
        )
    }

    fn exception(
        &self,
        exception_type: ExceptionType,
        items: &[Item<'_>],
        detail: String,
        today: NaiveDate,
    ) -> PlannedException {
        let mut targets: Vec<ExceptionTarget> = items.iter().map(|i| i.target()).collect();
        targets.sort();
        let amount = items
            .iter()
            .map(|i| i.amount().saturating_abs())
            .max()
            .unwrap_or(0);
        let item_date = items.iter().map(|i| i.date()).min().unwrap_or(today);
        let currency = items.iter().find_map(|i| i.currency());
        PlannedException {
            exception_type,
            severity: classify(&self.config.severity, item_date, today, amount),
            targets,
            amount,
            currency,
            item_date,
            detail,
        }
    }
}
