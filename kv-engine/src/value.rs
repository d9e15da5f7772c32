//! # Typed Values
//!
//! The payload stored behind every key. One variant per key, fixed from
//! creation to deletion (see [`Value::type_name`] for the error message
//! handlers use when a command expects a different variant).
//!
//! ## Design Principles
//! 1. **Tagged, not `dyn Any`**: a single sum type, matched exhaustively by
//!    every handler, instead of runtime type-assertion.
//! 2. **Binary-Safe**: all byte-strings are `Bytes`, shareable without copy.
//! 3. **In-Place Ops**: list/hash/set expose the small API surface handlers
//!    need directly on the variant, not through a generic map interface.

use std::collections::VecDeque;

use ahash::RandomState;
use bytes::Bytes;
use hashbrown::{HashMap, HashSet};
use kv_common::{KvError, KvResult};

use crate::zset::ZSet;

/// One of the five payload shapes a key can hold.
#[derive(Debug, Clone)]
pub enum Value {
    String(Bytes),
    List(VecDeque<Bytes>),
    Hash(HashMap<Bytes, Bytes, RandomState>),
    Set(HashSet<Bytes, RandomState>),
    SortedSet(ZSet),
}

impl Value {
    pub fn new_list() -> Self {
        Value::List(VecDeque::new())
    }

    pub fn new_hash() -> Self {
        Value::Hash(HashMap::with_hasher(RandomState::new()))
    }

    pub fn new_set() -> Self {
        Value::Set(HashSet::with_hasher(RandomState::new()))
    }

    pub fn new_sorted_set() -> Self {
        Value::SortedSet(ZSet::new())
    }

    /// Redis-style type name, used in `TYPE` replies and nowhere else —
    /// error messages use the fixed WRONGTYPE text instead.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::SortedSet(_) => "zset",
        }
    }

    pub fn as_string(&self) -> KvResult<&Bytes> {
        match self {
            Value::String(b) => Ok(b),
            _ => Err(KvError::WrongType),
        }
    }

    pub fn as_list(&self) -> KvResult<&VecDeque<Bytes>> {
        match self {
            Value::List(l) => Ok(l),
            _ => Err(KvError::WrongType),
        }
    }

    pub fn as_list_mut(&mut self) -> KvResult<&mut VecDeque<Bytes>> {
        match self {
            Value::List(l) => Ok(l),
            _ => Err(KvError::WrongType),
        }
    }

    pub fn as_hash(&self) -> KvResult<&HashMap<Bytes, Bytes, RandomState>> {
        match self {
            Value::Hash(h) => Ok(h),
            _ => Err(KvError::WrongType),
        }
    }

    pub fn as_hash_mut(&mut self) -> KvResult<&mut HashMap<Bytes, Bytes, RandomState>> {
        match self {
            Value::Hash(h) => Ok(h),
            _ => Err(KvError::WrongType),
        }
    }

    pub fn as_set(&self) -> KvResult<&HashSet<Bytes, RandomState>> {
        match self {
            Value::Set(s) => Ok(s),
            _ => Err(KvError::WrongType),
        }
    }

    pub fn as_set_mut(&mut self) -> KvResult<&mut HashSet<Bytes, RandomState>> {
        match self {
            Value::Set(s) => Ok(s),
            _ => Err(KvError::WrongType),
        }
    }

    pub fn as_zset(&self) -> KvResult<&ZSet> {
        match self {
            Value::SortedSet(z) => Ok(z),
            _ => Err(KvError::WrongType),
        }
    }

    pub fn as_zset_mut(&mut self) -> KvResult<&mut ZSet> {
        match self {
            Value::SortedSet(z) => Ok(z),
            _ => Err(KvError::WrongType),
        }
    }
}

/// Resolves a possibly-negative, 0-based index against a container length.
fn resolve_index(i: i64, len: usize) -> i64 {
    if i < 0 { i + len as i64 } else { i }
}

/// List operations, per-handler in-place API.
pub mod list {
    use super::*;

    pub fn len(l: &VecDeque<Bytes>) -> usize {
        l.len()
    }

    pub fn index_at(l: &VecDeque<Bytes>, i: i64) -> Option<&Bytes> {
        let idx = resolve_index(i, l.len());
        if idx < 0 {
            return None;
        }
        l.get(idx as usize)
    }

    /// `start` must land in `[0, len)`; `end` may be `-1` (tail) or `[0, len)`.
    /// When the resolved end precedes start, elements are returned reversed.
    pub fn range_from_to(l: &VecDeque<Bytes>, start: i64, end: i64) -> Vec<Bytes> {
        let len = l.len();
        if len == 0 {
            return Vec::new();
        }
        let s = resolve_index(start, len);
        let e = resolve_index(end, len);
        let s = s.clamp(0, len as i64 - 1) as usize;
        let e = e.clamp(0, len as i64 - 1) as usize;

        if s <= e {
            l.iter().skip(s).take(e - s + 1).cloned().collect()
        } else {
            l.iter().skip(e).take(s - e + 1).cloned().rev().collect()
        }
    }

    pub fn set_at(l: &mut VecDeque<Bytes>, i: i64, v: Bytes) -> KvResult<()> {
        let idx = resolve_index(i, l.len());
        if idx < 0 || idx as usize >= l.len() {
            return Err(KvError::Range("index out of range".to_string()));
        }
        l[idx as usize] = v;
        Ok(())
    }

    pub fn trim_inclusive(l: &mut VecDeque<Bytes>, start: i64, end: i64) {
        let len = l.len();
        if len == 0 {
            return;
        }
        let s = resolve_index(start, len).clamp(0, len as i64) as usize;
        let e = resolve_index(end, len).clamp(-1, len as i64 - 1);
        if e < s as i64 {
            l.clear();
            return;
        }
        let e = e as usize;
        l.truncate(e + 1);
        for _ in 0..s {
            l.pop_front();
        }
    }

    /// Removes up to `count` occurrences of `v` from the front (`count > 0`),
    /// from the back (`count < 0`), or all occurrences (`count == 0`).
    pub fn remove(l: &mut VecDeque<Bytes>, count: i64, v: &Bytes) -> usize {
        let mut removed = 0usize;
        if count == 0 {
            let before = l.len();
            l.retain(|item| item != v);
            return before - l.len();
        }
        if count > 0 {
            let mut limit = count as usize;
            let mut i = 0;
            while i < l.len() && limit > 0 {
                if &l[i] == v {
                    l.remove(i);
                    removed += 1;
                    limit -= 1;
                } else {
                    i += 1;
                }
            }
        } else {
            let mut limit = (-count) as usize;
            let mut i = l.len();
            while i > 0 && limit > 0 {
                i -= 1;
                if &l[i] == v {
                    l.remove(i);
                    removed += 1;
                    limit -= 1;
                }
            }
        }
        removed
    }

    pub fn push_front(l: &mut VecDeque<Bytes>, vs: impl IntoIterator<Item = Bytes>) {
        for v in vs {
            l.push_front(v);
        }
    }

    pub fn push_back(l: &mut VecDeque<Bytes>, vs: impl IntoIterator<Item = Bytes>) {
        for v in vs {
            l.push_back(v);
        }
    }

    pub fn pop_front(l: &mut VecDeque<Bytes>) -> Option<Bytes> {
        l.pop_front()
    }

    pub fn pop_back(l: &mut VecDeque<Bytes>) -> Option<Bytes> {
        l.pop_back()
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Side {
        Left,
        Right,
    }

    /// Moves one element between (possibly the same) list's ends.
    pub fn move_end(src: &mut VecDeque<Bytes>, dst: &mut VecDeque<Bytes>, from: Side, to: Side) -> Option<Bytes> {
        let v = match from {
            Side::Left => src.pop_front(),
            Side::Right => src.pop_back(),
        }?;
        match to {
            Side::Left => dst.push_front(v.clone()),
            Side::Right => dst.push_back(v.clone()),
        }
        Some(v)
    }
}

/// Hash operations.
pub mod hash {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::Rng;

    pub fn set(h: &mut HashMap<Bytes, Bytes, RandomState>, field: Bytes, value: Bytes) -> bool {
        h.insert(field, value).is_none()
    }

    pub fn set_if_absent(h: &mut HashMap<Bytes, Bytes, RandomState>, field: Bytes, value: Bytes) -> bool {
        if h.contains_key(&field) {
            false
        } else {
            h.insert(field, value);
            true
        }
    }

    pub fn get<'a>(h: &'a HashMap<Bytes, Bytes, RandomState>, field: &Bytes) -> Option<&'a Bytes> {
        h.get(field)
    }

    pub fn delete(h: &mut HashMap<Bytes, Bytes, RandomState>, fields: &[Bytes]) -> usize {
        fields.iter().filter(|f| h.remove(*f).is_some()).count()
    }

    pub fn incr_by(h: &mut HashMap<Bytes, Bytes, RandomState>, field: &Bytes, by: i64) -> KvResult<i64> {
        let current = match h.get(field) {
            Some(v) => parse_i64(v)?,
            None => 0,
        };
        let next = current
            .checked_add(by)
            .ok_or_else(|| KvError::Range("increment or decrement would overflow".to_string()))?;
        h.insert(field.clone(), Bytes::from(next.to_string()));
        Ok(next)
    }

    pub fn incr_by_float(h: &mut HashMap<Bytes, Bytes, RandomState>, field: &Bytes, by: f64) -> KvResult<f64> {
        let current = match h.get(field) {
            Some(v) => parse_f64(v)?,
            None => 0.0,
        };
        let next = current + by;
        if !next.is_finite() {
            return Err(KvError::Range("increment would produce NaN or Infinity".to_string()));
        }
        h.insert(field.clone(), Bytes::from(format_float(next)));
        Ok(next)
    }

    /// `count < 0` permits repeats (sampling with replacement); `count >= 0`
    /// returns up to `count` distinct fields.
    pub fn random_fields(
        h: &HashMap<Bytes, Bytes, RandomState>,
        count: i64,
        with_values: bool,
    ) -> Vec<(Bytes, Option<Bytes>)> {
        let fields: Vec<(&Bytes, &Bytes)> = h.iter().collect();
        if fields.is_empty() {
            return Vec::new();
        }
        let mut rng = rand::thread_rng();
        if count < 0 {
            let n = (-count) as usize;
            (0..n)
                .map(|_| {
                    let (f, v) = fields[rng.gen_range(0..fields.len())];
                    (f.clone(), with_values.then(|| v.clone()))
                })
                .collect()
        } else {
            let n = (count as usize).min(fields.len());
            let mut shuffled = fields.clone();
            shuffled.shuffle(&mut rng);
            shuffled[..n]
                .iter()
                .map(|(f, v)| ((*f).clone(), with_values.then(|| (*v).clone())))
                .collect()
        }
    }

    fn parse_i64(b: &Bytes) -> KvResult<i64> {
        std::str::from_utf8(b)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .ok_or_else(|| KvError::Range("hash value is not an integer".to_string()))
    }

    fn parse_f64(b: &Bytes) -> KvResult<f64> {
        std::str::from_utf8(b)
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| KvError::Range("hash value is not a float".to_string()))
    }

    pub fn format_float(v: f64) -> String {
        if v.fract() == 0.0 && v.abs() < 1e17 {
            format!("{}", v as i64)
        } else {
            let mut s = format!("{:.17}", v);
            while s.ends_with('0') {
                s.pop();
            }
            if s.ends_with('.') {
                s.pop();
            }
            s
        }
    }
}

/// Set operations.
pub mod set {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::Rng;

    pub fn add(s: &mut HashSet<Bytes, RandomState>, vs: impl IntoIterator<Item = Bytes>) -> usize {
        vs.into_iter().filter(|v| s.insert(v.clone())).count()
    }

    pub fn remove(s: &mut HashSet<Bytes, RandomState>, vs: &[Bytes]) -> usize {
        vs.iter().filter(|v| s.remove(*v)).count()
    }

    pub fn move_member(src: &mut HashSet<Bytes, RandomState>, dst: &mut HashSet<Bytes, RandomState>, v: &Bytes) -> bool {
        if src.remove(v) {
            dst.insert(v.clone());
            true
        } else {
            false
        }
    }

    /// `n < 0` allows repeats; `n >= 0` pops up to `n` distinct members.
    pub fn pop(s: &mut HashSet<Bytes, RandomState>, n: i64) -> Vec<Bytes> {
        if s.is_empty() || n == 0 {
            return Vec::new();
        }
        let count = if n < 0 { (-n) as usize } else { (n as usize).min(s.len()) };
        let members: Vec<Bytes> = s.iter().cloned().collect();
        let mut rng = rand::thread_rng();
        if n < 0 {
            (0..count).map(|_| members[rng.gen_range(0..members.len())].clone()).collect()
        } else {
            let mut shuffled = members;
            shuffled.shuffle(&mut rng);
            let picked: Vec<Bytes> = shuffled.into_iter().take(count).collect();
            for m in &picked {
                s.remove(m);
            }
            picked
        }
    }

    pub fn random(s: &HashSet<Bytes, RandomState>, n: i64) -> Vec<Bytes> {
        if s.is_empty() || n == 0 {
            return Vec::new();
        }
        let members: Vec<&Bytes> = s.iter().collect();
        let mut rng = rand::thread_rng();
        if n < 0 {
            let count = (-n) as usize;
            (0..count).map(|_| members[rng.gen_range(0..members.len())].clone()).collect()
        } else {
            let count = (n as usize).min(members.len());
            let mut shuffled = members;
            shuffled.shuffle(&mut rng);
            shuffled.into_iter().take(count).cloned().collect()
        }
    }

    pub fn union(sets: &[&HashSet<Bytes, RandomState>]) -> HashSet<Bytes, RandomState> {
        let mut out = HashSet::with_hasher(RandomState::new());
        for s in sets {
            out.extend(s.iter().cloned());
        }
        out
    }

    /// `limit == 0` means unbounded; short-circuits once the running result
    /// reaches `limit`.
    pub fn intersect(limit: usize, sets: &[&HashSet<Bytes, RandomState>]) -> HashSet<Bytes, RandomState> {
        let mut out = HashSet::with_hasher(RandomState::new());
        if sets.is_empty() {
            return out;
        }
        let smallest = sets.iter().min_by_key(|s| s.len()).unwrap();
        'outer: for member in smallest.iter() {
            if sets.iter().all(|s| s.contains(member)) {
                out.insert(member.clone());
                if limit != 0 && out.len() >= limit {
                    break 'outer;
                }
            }
        }
        out
    }

    pub fn difference(baseline: &HashSet<Bytes, RandomState>, others: &[&HashSet<Bytes, RandomState>]) -> HashSet<Bytes, RandomState> {
        baseline
            .iter()
            .filter(|m| !others.iter().any(|o| o.contains(*m)))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &str) -> Bytes {
        Bytes::from(s.to_string())
    }

    #[test]
    fn list_range_clips_and_reverses() {
        let mut l: VecDeque<Bytes> = vec![b("a"), b("b"), b("c"), b("d")].into();
        assert_eq!(list::range_from_to(&l, 0, -1), vec![b("a"), b("b"), b("c"), b("d")]);
        assert_eq!(list::range_from_to(&l, 1, 2), vec![b("b"), b("c")]);
        assert_eq!(list::range_from_to(&l, 2, 1), vec![b("c"), b("b")]);
        list::trim_inclusive(&mut l, 1, 2);
        assert_eq!(l, VecDeque::from(vec![b("b"), b("c")]));
    }

    #[test]
    fn list_remove_directions() {
        let mut l: VecDeque<Bytes> = vec![b("x"), b("y"), b("x"), b("y"), b("x")].into();
        assert_eq!(list::remove(&mut l, 2, &b("x")), 2);
        assert_eq!(l, VecDeque::from(vec![b("y"), b("y"), b("x")]));
    }

    #[test]
    fn hash_incr_by_tracks_integers() {
        let mut h: HashMap<Bytes, Bytes, RandomState> = HashMap::with_hasher(RandomState::new());
        assert_eq!(hash::incr_by(&mut h, &b("n"), 5).unwrap(), 5);
        assert_eq!(hash::incr_by(&mut h, &b("n"), -2).unwrap(), 3);
    }

    #[test]
    fn set_intersect_short_circuits_on_limit() {
        let a: HashSet<Bytes, RandomState> = [b("1"), b("2"), b("3")].into_iter().collect();
        let c: HashSet<Bytes, RandomState> = [b("1"), b("2"), b("3")].into_iter().collect();
        let result = set::intersect(1, &[&a, &c]);
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn set_difference_excludes_members_in_others() {
        let a: HashSet<Bytes, RandomState> = [b("1"), b("2")].into_iter().collect();
        let o: HashSet<Bytes, RandomState> = [b("1")].into_iter().collect();
        let result = set::difference(&a, &[&o]);
        assert_eq!(result, [b("2")].into_iter().collect());
    }
}
