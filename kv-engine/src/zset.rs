//! # Sorted-Set Engine
//!
//! A sorted set is a mapping from member to score with a derived order
//! (score ascending, member lex ascending as a tie-break). Listings
//! materialize a sorted `Vec` on demand rather than maintaining a
//! rank-indexed structure — the contracts below hold regardless of the
//! underlying representation.
//!
//! ## Design Principles
//! 1. **HashMap member → score**: matches the spec's own description of the
//!    representation; no skiplist is required.
//! 2. **Divide-and-conquer combine**: union/intersect reduce pairwise, the
//!    same rule used whether combining two sets or folding N of them.

use std::cmp::Ordering;

use ahash::RandomState;
use bytes::Bytes;
use hashbrown::HashMap;
use kv_common::{KvError, KvResult};

/// Member → score. Equal to `f64::NAN` never occurs: scores are always
/// finite or ±∞.
#[derive(Debug, Clone, Default)]
pub struct ZSet {
    members: HashMap<Bytes, f64, RandomState>,
}

fn cmp_scores(a: f64, b: f64) -> Ordering {
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

/// Ascending (score, member) ordering with lex tie-break, as the spec
/// requires for range listings, pop, and rank.
fn cmp_entries(a: &(Bytes, f64), b: &(Bytes, f64)) -> Ordering {
    cmp_scores(a.1, b.1).then_with(|| a.0.cmp(&b.0))
}

impl ZSet {
    pub fn new() -> Self {
        ZSet { members: HashMap::with_hasher(RandomState::new()) }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Builds a set directly from member/score pairs, used when restoring
    /// from a preamble or snapshot file.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Bytes, f64)>) -> Self {
        let mut members = HashMap::with_hasher(RandomState::new());
        for (member, score) in pairs {
            members.insert(member, score);
        }
        ZSet { members }
    }

    /// Iterates members in arbitrary (hash) order; callers that need sorted
    /// order should go through [`range`] instead.
    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, &f64)> {
        self.members.iter()
    }

    pub fn score(&self, member: &Bytes) -> Option<f64> {
        self.members.get(member).copied()
    }

    /// Ascending-ordered `(member, score)` pairs.
    fn sorted(&self) -> Vec<(Bytes, f64)> {
        let mut v: Vec<(Bytes, f64)> = self.members.iter().map(|(m, s)| (m.clone(), *s)).collect();
        v.sort_by(cmp_entries);
        v
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddPolicy {
    Any,
    Nx,
    Xx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    None,
    Gt,
    Lt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountMode {
    Added,
    Changed,
}

/// Outcome of [`add_or_update`]: a plain added/changed count, or — under
/// `Incr` — the resulting score of the single member touched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AddResult {
    Count(i64),
    NewScore(f64),
}

/// `ZADD`-family configuration, replacing the source's positional flag
/// parsing with a single enumerated record (see spec's design notes).
#[derive(Debug, Clone, Copy)]
pub struct AddOrUpdateConfig {
    pub policy: AddPolicy,
    pub comparison: Comparison,
    pub count_mode: CountMode,
    pub incr: bool,
}

impl Default for AddOrUpdateConfig {
    fn default() -> Self {
        AddOrUpdateConfig {
            policy: AddPolicy::Any,
            comparison: Comparison::None,
            count_mode: CountMode::Added,
            incr: false,
        }
    }
}

pub fn add_or_update(
    set: &mut ZSet,
    members: &[(Bytes, f64)],
    cfg: AddOrUpdateConfig,
) -> KvResult<AddResult> {
    if cfg.policy == AddPolicy::Nx && cfg.comparison != Comparison::None {
        return Err(KvError::Syntax("GT, LT, and/or NX options at the same time are not compatible".to_string()));
    }
    if cfg.incr && members.len() != 1 {
        return Err(KvError::Syntax("INCR option supports a single increment-element pair".to_string()));
    }

    if cfg.incr {
        let (member, delta) = &members[0];
        let existing = set.members.get(member).copied();
        if cfg.policy == AddPolicy::Xx && existing.is_none() {
            return Ok(AddResult::NewScore(f64::NAN));
        }
        if cfg.policy == AddPolicy::Nx && existing.is_some() {
            return Ok(AddResult::NewScore(f64::NAN));
        }
        let new_score = match existing {
            None => *delta,
            Some(old) => {
                if old.is_infinite() {
                    return Err(KvError::Range("cannot increment a member with a ±infinite score".to_string()));
                }
                let candidate = old + delta;
                match cfg.comparison {
                    Comparison::None => candidate,
                    Comparison::Gt => candidate.max(old),
                    Comparison::Lt => candidate.min(old),
                }
            }
        };
        if new_score.is_nan() {
            return Err(KvError::Range("cannot increment a member with a ±infinite score".to_string()));
        }
        set.members.insert(member.clone(), new_score);
        return Ok(AddResult::NewScore(new_score));
    }

    let mut added = 0i64;
    let mut changed = 0i64;
    for (member, score) in members {
        match set.members.get(member).copied() {
            Some(old) => {
                if cfg.policy == AddPolicy::Nx {
                    continue;
                }
                let new_score = match cfg.comparison {
                    Comparison::None => *score,
                    Comparison::Gt => old.max(*score),
                    Comparison::Lt => old.min(*score),
                };
                if new_score != old {
                    set.members.insert(member.clone(), new_score);
                    changed += 1;
                }
            }
            None => {
                if cfg.policy == AddPolicy::Xx {
                    continue;
                }
                set.members.insert(member.clone(), *score);
                added += 1;
            }
        }
    }

    Ok(AddResult::Count(match cfg.count_mode {
        CountMode::Added => added,
        CountMode::Changed => added + changed,
    }))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopPolicy {
    Min,
    Max,
}

/// Removes and returns up to `count` members, and leaves the receiver
/// holding the remainder.
pub fn pop(set: &mut ZSet, count: i64, policy: PopPolicy) -> KvResult<Vec<(Bytes, f64)>> {
    if count < 0 {
        return Err(KvError::Range("value is out of range, must be positive".to_string()));
    }
    if count == 0 {
        return Ok(Vec::new());
    }
    let mut sorted = set.sorted();
    if policy == PopPolicy::Max {
        sorted.reverse();
    }
    let n = (count as usize).min(sorted.len());
    let popped: Vec<(Bytes, f64)> = sorted.into_iter().take(n).collect();
    for (member, _) in &popped {
        set.members.remove(member);
    }
    Ok(popped)
}

/// Removes the named members, returning how many were actually present.
pub fn remove(set: &mut ZSet, members: &[Bytes]) -> usize {
    members.iter().filter(|m| set.members.remove(*m).is_some()).count()
}

/// Members present in `set` but not in any of `others`; scores preserved
/// from `set`.
pub fn subtract(set: &ZSet, others: &[&ZSet]) -> ZSet {
    let mut out = ZSet::new();
    for (member, score) in set.members.iter() {
        if !others.iter().any(|o| o.members.contains_key(member)) {
            out.members.insert(member.clone(), *score);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Sum,
    Min,
    Max,
}

fn combine_score(agg: Aggregate, a: f64, b: f64) -> f64 {
    match agg {
        Aggregate::Sum => a + b,
        Aggregate::Min => a.min(b),
        Aggregate::Max => a.max(b),
    }
}

fn weighted(set: &ZSet, weight: f64) -> ZSet {
    let mut out = ZSet::new();
    for (member, score) in set.members.iter() {
        out.members.insert(member.clone(), score * weight);
    }
    out
}

fn union_pair(agg: Aggregate, a: &ZSet, b: &ZSet) -> ZSet {
    let mut out = a.clone();
    for (member, score) in b.members.iter() {
        out.members
            .entry(member.clone())
            .and_modify(|existing| *existing = combine_score(agg, *existing, *score))
            .or_insert(*score);
    }
    out
}

fn intersect_pair(agg: Aggregate, a: &ZSet, b: &ZSet) -> ZSet {
    let mut out = ZSet::new();
    for (member, score) in a.members.iter() {
        if let Some(other_score) = b.members.get(member) {
            out.members.insert(member.clone(), combine_score(agg, *score, *other_score));
        }
    }
    out
}

/// Divide-and-conquer reduction: weights are folded in at the leaves, then
/// halves are combined pairwise until one set remains.
fn reduce(sets: &[ZSet], agg: Aggregate, pair_fn: fn(Aggregate, &ZSet, &ZSet) -> ZSet) -> ZSet {
    match sets.len() {
        0 => ZSet::new(),
        1 => sets[0].clone(),
        2 => pair_fn(agg, &sets[0], &sets[1]),
        n => {
            let mid = n / 2;
            let left = reduce(&sets[..mid], agg, pair_fn);
            let right = reduce(&sets[mid..], agg, pair_fn);
            pair_fn(agg, &left, &right)
        }
    }
}

pub fn union(agg: Aggregate, inputs: &[(&ZSet, f64)]) -> ZSet {
    let weighted_sets: Vec<ZSet> = inputs.iter().map(|(s, w)| weighted(s, *w)).collect();
    reduce(&weighted_sets, agg, union_pair)
}

/// Short-circuits to an empty set if any operand is empty.
pub fn intersect(agg: Aggregate, inputs: &[(&ZSet, f64)]) -> ZSet {
    if inputs.iter().any(|(s, _)| s.is_empty()) {
        return ZSet::new();
    }
    let weighted_sets: Vec<ZSet> = inputs.iter().map(|(s, w)| weighted(s, *w)).collect();
    reduce(&weighted_sets, agg, intersect_pair)
}

/// A score-range endpoint: inclusive or exclusive, or ±∞.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScoreBound {
    Inclusive(f64),
    Exclusive(f64),
    NegInfinity,
    PosInfinity,
}

impl ScoreBound {
    fn satisfies_lower(&self, score: f64) -> bool {
        match self {
            ScoreBound::Inclusive(b) => score >= *b,
            ScoreBound::Exclusive(b) => score > *b,
            ScoreBound::NegInfinity => true,
            ScoreBound::PosInfinity => false,
        }
    }

    fn satisfies_upper(&self, score: f64) -> bool {
        match self {
            ScoreBound::Inclusive(b) => score <= *b,
            ScoreBound::Exclusive(b) => score < *b,
            ScoreBound::NegInfinity => false,
            ScoreBound::PosInfinity => true,
        }
    }
}

/// A lex-range endpoint: `-`/`+` (open ended) or an inclusive/exclusive
/// member bound.
#[derive(Debug, Clone, PartialEq)]
pub enum LexBound {
    Inclusive(Bytes),
    Exclusive(Bytes),
    NegInfinity,
    PosInfinity,
}

impl LexBound {
    fn satisfies_lower(&self, member: &Bytes) -> bool {
        match self {
            LexBound::Inclusive(b) => member >= b,
            LexBound::Exclusive(b) => member > b,
            LexBound::NegInfinity => true,
            LexBound::PosInfinity => false,
        }
    }

    fn satisfies_upper(&self, member: &Bytes) -> bool {
        match self {
            LexBound::Inclusive(b) => member <= b,
            LexBound::Exclusive(b) => member < b,
            LexBound::NegInfinity => false,
            LexBound::PosInfinity => true,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RangeSelector {
    ByScore { min: ScoreBound, max: ScoreBound },
    ByLex { min: LexBound, max: LexBound },
}

#[derive(Debug, Clone, Copy)]
pub struct Limit {
    pub offset: usize,
    /// `None` means "all remaining" (the spec's `count < 0`).
    pub count: Option<usize>,
}

/// Covers ZRANGE/ZRANGEBYSCORE/ZRANGEBYLEX/ZREVRANGE-family queries.
///
/// `ByLex` requires every member in the set to share a score; if they don't,
/// the source returns empty and this preserves that behavior (spec's open
/// question: may be unintentional, kept as-is).
pub fn range(set: &ZSet, selector: &RangeSelector, reverse: bool, limit: Option<Limit>) -> Vec<(Bytes, f64)> {
    let mut sorted = set.sorted();

    let mut filtered: Vec<(Bytes, f64)> = match selector {
        RangeSelector::ByScore { min, max } => sorted
            .into_iter()
            .filter(|(_, score)| min.satisfies_lower(*score) && max.satisfies_upper(*score))
            .collect(),
        RangeSelector::ByLex { min, max } => {
            if !all_same_score(set) {
                return Vec::new();
            }
            sorted
                .drain(..)
                .filter(|(member, _)| min.satisfies_lower(member) && max.satisfies_upper(member))
                .collect()
        }
    };

    if reverse {
        filtered.reverse();
    }

    if let Some(limit) = limit {
        let end = match limit.count {
            Some(c) => (limit.offset + c).min(filtered.len()),
            None => filtered.len(),
        };
        let start = limit.offset.min(filtered.len());
        filtered = filtered[start..end.max(start)].to_vec();
    }

    filtered
}

fn all_same_score(set: &ZSet) -> bool {
    let mut scores = set.members.values();
    match scores.next() {
        None => true,
        Some(first) => scores.all(|s| s == first),
    }
}

/// 0-based position under ascending (or, reversed, descending) score order;
/// `None` if the member is absent.
pub fn rank(set: &ZSet, member: &Bytes, reverse: bool) -> Option<usize> {
    let mut sorted = set.sorted();
    if reverse {
        sorted.reverse();
    }
    sorted.iter().position(|(m, _)| m == member)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    fn build(pairs: &[(&str, f64)]) -> ZSet {
        let mut z = ZSet::new();
        let members: Vec<(Bytes, f64)> = pairs.iter().map(|(m, s)| (b(m), *s)).collect();
        add_or_update(&mut z, &members, AddOrUpdateConfig::default()).unwrap();
        z
    }

    #[test]
    fn scenario_zadd_then_xx_ch() {
        let mut z = build(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        let r = add_or_update(
            &mut z,
            &[(b("a"), 5.0), (b("b"), 2.0)],
            AddOrUpdateConfig { policy: AddPolicy::Xx, count_mode: CountMode::Changed, ..Default::default() },
        )
        .unwrap();
        assert_eq!(r, AddResult::Count(1));
        assert_eq!(z.score(&b("a")), Some(5.0));
        assert_eq!(z.score(&b("b")), Some(2.0));
    }

    #[test]
    fn scenario_incr_on_infinite_errors() {
        let mut z = ZSet::new();
        add_or_update(&mut z, &[(b("a"), f64::INFINITY)], AddOrUpdateConfig::default()).unwrap();
        let err = add_or_update(
            &mut z,
            &[(b("a"), 2.0)],
            AddOrUpdateConfig { incr: true, ..Default::default() },
        )
        .unwrap_err();
        assert!(matches!(err, KvError::Range(_)));
    }

    #[test]
    fn incr_on_absent_then_present() {
        let mut z = ZSet::new();
        let r1 = add_or_update(&mut z, &[(b("a"), 2.0)], AddOrUpdateConfig { incr: true, ..Default::default() }).unwrap();
        assert_eq!(r1, AddResult::NewScore(2.0));
        let r2 = add_or_update(&mut z, &[(b("a"), 5.0)], AddOrUpdateConfig { incr: true, ..Default::default() }).unwrap();
        assert_eq!(r2, AddResult::NewScore(7.0));
    }

    #[test]
    fn union_sum_covers_all_members_with_weighted_scores() {
        let a = build(&[("x", 1.0), ("y", 2.0)]);
        let c = build(&[("y", 3.0), ("z", 4.0)]);
        let u = union(Aggregate::Sum, &[(&a, 2.0), (&c, 1.0)]);
        assert_eq!(u.len(), 3);
        assert_eq!(u.score(&b("x")), Some(2.0));
        assert_eq!(u.score(&b("y")), Some(2.0 * 2.0 + 3.0));
        assert_eq!(u.score(&b("z")), Some(4.0));
    }

    #[test]
    fn intersect_short_circuits_on_empty_operand() {
        let a = build(&[("x", 1.0)]);
        let empty = ZSet::new();
        let r = intersect(Aggregate::Sum, &[(&a, 1.0), (&empty, 1.0)]);
        assert!(r.is_empty());
    }

    #[test]
    fn range_reverse_breaks_ties_by_reverse_lex() {
        let z = build(&[("a", 1.0), ("b", 1.0), ("c", 1.0)]);
        let r = range(&z, &RangeSelector::ByScore { min: ScoreBound::NegInfinity, max: ScoreBound::PosInfinity }, true, None);
        let members: Vec<Bytes> = r.into_iter().map(|(m, _)| m).collect();
        assert_eq!(members, vec![b("c"), b("b"), b("a")]);
    }

    #[test]
    fn range_by_lex_requires_uniform_score() {
        let z = build(&[("a", 1.0), ("b", 2.0)]);
        let r = range(&z, &RangeSelector::ByLex { min: LexBound::NegInfinity, max: LexBound::PosInfinity }, false, None);
        assert!(r.is_empty());
    }

    #[test]
    fn pop_min_and_max() {
        let mut z = build(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        let popped = pop(&mut z, 2, PopPolicy::Min).unwrap();
        assert_eq!(popped, vec![(b("a"), 1.0), (b("b"), 2.0)]);
        assert_eq!(z.len(), 1);
    }

    #[test]
    fn rank_returns_position_or_none() {
        let z = build(&[("a", 1.0), ("b", 2.0), ("c", 3.0)]);
        assert_eq!(rank(&z, &b("b"), false), Some(1));
        assert_eq!(rank(&z, &b("b"), true), Some(1));
        assert_eq!(rank(&z, &b("zzz"), false), None);
    }
}
