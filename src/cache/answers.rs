//! The DNS answer cache.
//!
//! Forwarded answers are cached per `(record type, canonical name)` with a
//! per-entry TTL derived from the upstream answer, clamped to the
//! configured maximum. Moka provides the concurrent map and treats an
//! expired entry as a miss; invalidation happens when a host is
//! whitelisted so clients never see a stale blocked answer.

use std::fmt;
use std::time::{Duration, Instant};

use hickory_proto::op::ResponseCode;
use hickory_proto::rr::{Record, RecordType};
use moka::sync::Cache;
use moka::Expiry;

/// TTL applied to cached empty (negative) answers.
pub const NEGATIVE_TTL: Duration = Duration::from_secs(60);

/// Cache key: record type plus canonical query name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AnswerKey {
    pub rtype: RecordType,
    pub name: String,
}

impl AnswerKey {
    #[must_use]
    pub fn new(rtype: RecordType, name: impl Into<String>) -> Self {
        Self {
            rtype,
            name: name.into(),
        }
    }
}

impl fmt::Display for AnswerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.rtype, self.name)
    }
}

/// A cached upstream answer section.
#[derive(Debug, Clone)]
pub struct CachedAnswer {
    pub code: ResponseCode,
    pub answers: Vec<Record>,
    ttl: Duration,
}

struct PerEntryTtl;

impl Expiry<AnswerKey, CachedAnswer> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &AnswerKey,
        value: &CachedAnswer,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// The concurrent answer cache.
pub struct AnswerCache {
    inner: Cache<AnswerKey, CachedAnswer>,
    max_ttl: Duration,
}

impl AnswerCache {
    /// Create a cache whose entries never outlive `max_ttl`.
    #[must_use]
    pub fn new(max_ttl: Duration) -> Self {
        let inner = Cache::builder().expire_after(PerEntryTtl).build();
        Self { inner, max_ttl }
    }

    /// Look up an answer; expired entries are misses.
    #[must_use]
    pub fn get(&self, key: &AnswerKey) -> Option<CachedAnswer> {
        self.inner.get(key)
    }

    /// Store an answer with the given TTL, clamped to the cache maximum.
    pub fn put(&self, key: AnswerKey, code: ResponseCode, answers: Vec<Record>, ttl: Duration) {
        let ttl = ttl.min(self.max_ttl);
        self.inner.insert(key, CachedAnswer { code, answers, ttl });
    }

    /// Drop the given entries, typically `A` and `AAAA` for one host.
    pub fn remove<I>(&self, keys: I)
    where
        I: IntoIterator<Item = AnswerKey>,
    {
        for key in keys {
            self.inner.invalidate(&key);
        }
    }

    /// Approximate number of live entries.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Keys of the live entries, for dumps.
    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.iter().map(|(k, _)| k.to_string()).collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::str::FromStr;

    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, RData};

    fn a_record(name: &str, ttl: u32, addr: Ipv4Addr) -> Record {
        Record::from_rdata(Name::from_str(name).unwrap(), ttl, RData::A(A(addr)))
    }

    #[test]
    fn should_store_and_retrieve_answers() {
        let cache = AnswerCache::new(Duration::from_secs(300));
        let key = AnswerKey::new(RecordType::A, "wikipedia.org");
        let record = a_record("wikipedia.org.", 120, Ipv4Addr::new(198, 35, 26, 96));

        assert!(cache.get(&key).is_none());

        cache.put(
            key.clone(),
            ResponseCode::NoError,
            vec![record],
            Duration::from_secs(120),
        );

        let hit = cache.get(&key).unwrap();
        assert_eq!(hit.code, ResponseCode::NoError);
        assert_eq!(hit.answers.len(), 1);
    }

    #[test]
    fn should_key_by_record_type_and_name() {
        let cache = AnswerCache::new(Duration::from_secs(300));
        cache.put(
            AnswerKey::new(RecordType::A, "example.com"),
            ResponseCode::NoError,
            vec![],
            Duration::from_secs(60),
        );

        assert!(cache.get(&AnswerKey::new(RecordType::A, "example.com")).is_some());
        assert!(cache.get(&AnswerKey::new(RecordType::AAAA, "example.com")).is_none());
        assert!(cache.get(&AnswerKey::new(RecordType::A, "other.com")).is_none());
    }

    #[test]
    fn should_treat_expired_entries_as_misses() {
        let cache = AnswerCache::new(Duration::from_secs(300));
        let key = AnswerKey::new(RecordType::A, "example.com");
        cache.put(key.clone(), ResponseCode::NoError, vec![], Duration::from_millis(20));

        assert!(cache.get(&key).is_some());
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn should_remove_entries_on_invalidation() {
        let cache = AnswerCache::new(Duration::from_secs(300));
        let a = AnswerKey::new(RecordType::A, "tracker.example");
        let aaaa = AnswerKey::new(RecordType::AAAA, "tracker.example");
        cache.put(a.clone(), ResponseCode::NoError, vec![], Duration::from_secs(60));
        cache.put(aaaa.clone(), ResponseCode::NoError, vec![], Duration::from_secs(60));

        cache.remove([a.clone(), aaaa.clone()]);

        assert!(cache.get(&a).is_none());
        assert!(cache.get(&aaaa).is_none());
    }

    #[test]
    fn should_render_keys_as_type_and_name() {
        let key = AnswerKey::new(RecordType::AAAA, "tracker.example");
        assert_eq!(key.to_string(), "AAAA tracker.example");
    }
}
