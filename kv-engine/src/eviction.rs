//! # Eviction Policies
//!
//! When the configured memory ceiling is exceeded, the keyspace asks its
//! configured [`EvictionPolicy`] to name a candidate key to reclaim.
//! `NoEviction` is a true no-op: callers see [`kv_common::KvError::OutOfMemory`]
//! instead of a selected candidate.

use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    AllKeysLru,
    AllKeysLfu,
    AllKeysRandom,
    VolatileLru,
    VolatileLfu,
    VolatileRandom,
    VolatileTtl,
    NoEviction,
}

impl EvictionPolicy {
    /// Only volatile policies restrict candidates to keys carrying a TTL.
    pub fn volatile_only(self) -> bool {
        matches!(
            self,
            EvictionPolicy::VolatileLru
                | EvictionPolicy::VolatileLfu
                | EvictionPolicy::VolatileRandom
                | EvictionPolicy::VolatileTtl
        )
    }

    pub fn is_noeviction(self) -> bool {
        matches!(self, EvictionPolicy::NoEviction)
    }
}

/// Per-key metadata an eviction policy ranks candidates by, sampled from the
/// keyspace without holding any lock beyond the read needed to copy it out.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub key: Bytes,
    pub has_ttl: bool,
    pub last_access_nanos: u64,
    pub access_count: u32,
    pub expires_at_nanos: Option<u64>,
}

/// Picks the best candidate to evict from a sample, or `None` if the policy
/// rules out every sampled key (e.g. volatile policy, no key has a TTL).
pub fn select_candidate(policy: EvictionPolicy, candidates: &[EvictionCandidate]) -> Option<Bytes> {
    if policy.is_noeviction() {
        return None;
    }

    let pool: Vec<&EvictionCandidate> = if policy.volatile_only() {
        candidates.iter().filter(|c| c.has_ttl).collect()
    } else {
        candidates.iter().collect()
    };

    if pool.is_empty() {
        return None;
    }

    let chosen = match policy {
        EvictionPolicy::AllKeysLru | EvictionPolicy::VolatileLru => {
            pool.iter().min_by_key(|c| c.last_access_nanos)
        }
        EvictionPolicy::AllKeysLfu | EvictionPolicy::VolatileLfu => {
            pool.iter().min_by_key(|c| c.access_count)
        }
        EvictionPolicy::VolatileTtl => pool.iter().min_by_key(|c| c.expires_at_nanos.unwrap_or(u64::MAX)),
        EvictionPolicy::AllKeysRandom | EvictionPolicy::VolatileRandom => {
            use rand::Rng;
            let idx = rand::thread_rng().gen_range(0..pool.len());
            pool.get(idx)
        }
        EvictionPolicy::NoEviction => None,
    };

    chosen.map(|c| c.key.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(key: &str, has_ttl: bool, last_access: u64, count: u32) -> EvictionCandidate {
        EvictionCandidate {
            key: Bytes::from(key.to_string()),
            has_ttl,
            last_access_nanos: last_access,
            access_count: count,
            expires_at_nanos: has_ttl.then_some(last_access),
        }
    }

    #[test]
    fn noeviction_never_picks() {
        let pool = vec![candidate("a", false, 0, 0)];
        assert_eq!(select_candidate(EvictionPolicy::NoEviction, &pool), None);
    }

    #[test]
    fn lru_picks_oldest_access() {
        let pool = vec![candidate("a", false, 100, 0), candidate("b", false, 10, 0)];
        assert_eq!(select_candidate(EvictionPolicy::AllKeysLru, &pool), Some(Bytes::from("b")));
    }

    #[test]
    fn volatile_policy_ignores_keys_without_ttl() {
        let pool = vec![candidate("a", false, 0, 0), candidate("b", true, 50, 0)];
        assert_eq!(select_candidate(EvictionPolicy::VolatileLru, &pool), Some(Bytes::from("b")));
    }

    #[test]
    fn volatile_policy_with_no_ttl_keys_picks_nothing() {
        let pool = vec![candidate("a", false, 0, 0)];
        assert_eq!(select_candidate(EvictionPolicy::VolatileRandom, &pool), None);
    }
}
