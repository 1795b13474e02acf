//! The per-query decision pipeline.
//!
//! Every query runs the same sequence: drop non-queries, canonicalize,
//! honor overrides, spoof blocked names to the HTTP listener, then cache
//! or forward. Spoofed answers are synthesized from the Store on every
//! query and never cached.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::{A, AAAA};
use hickory_proto::rr::{RData, Record, RecordType};
use metrics::counter;
use tracing::{debug, instrument};

use crate::cache::{AnswerKey, CachedAnswer, NEGATIVE_TTL};
use crate::dns::Resolve;
use crate::metrics::{outcome, DNS_QUERIES, OUTCOME};
use crate::store::{canonical, Store};

/// Addresses a blocked query is answered with, derived from the HTTP
/// listener address.
#[derive(Debug, Clone, Copy)]
pub struct SpoofTarget {
    pub v4: Option<Ipv4Addr>,
    pub v6: Option<Ipv6Addr>,
}

impl SpoofTarget {
    /// Derive both address families from the listener address. A loopback
    /// listener in one family implies the loopback of the other.
    #[must_use]
    pub fn from_ip(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Self {
                v4: Some(v4),
                v6: v4.is_loopback().then_some(Ipv6Addr::LOCALHOST),
            },
            IpAddr::V6(v6) => Self {
                v4: v6.is_loopback().then_some(Ipv4Addr::LOCALHOST),
                v6: Some(v6),
            },
        }
    }
}

/// The query pipeline shared by the UDP and TCP listeners.
pub struct Pipeline<R: Resolve> {
    store: Arc<Store>,
    resolver: R,
    spoof: SpoofTarget,
    host_ttl: u32,
}

impl<R: Resolve> Pipeline<R> {
    /// Create a pipeline answering blocked names with `spoof` and a TTL of
    /// `host_ttl` seconds.
    pub fn new(store: Arc<Store>, resolver: R, spoof: SpoofTarget, host_ttl: u32) -> Self {
        Self {
            store,
            resolver,
            spoof,
            host_ttl,
        }
    }

    /// Answer one query. `None` means the packet is dropped.
    #[instrument(skip(self, query), fields(domain))]
    pub async fn answer(&self, query: Message) -> Option<Message> {
        if query.message_type() != MessageType::Query || query.op_code() != OpCode::Query {
            return None;
        }
        let question = query.queries().first()?.clone();
        let name = canonical(&question.name().to_utf8())?;
        let rtype = question.query_type();
        tracing::Span::current().record("domain", name.as_str());

        let overridden = self.store.overrides.is_allowed(&name);
        if !overridden && (self.store.hosts.contains(&name) || self.store.regexps.matches(&name)) {
            counter!(DNS_QUERIES, OUTCOME => outcome::BLOCKED).increment(1);
            return Some(self.spoofed(&query, &question));
        }

        let key = AnswerKey::new(rtype, name);
        if let Some(hit) = self.store.answers.get(&key) {
            counter!(DNS_QUERIES, OUTCOME => outcome::CACHE_HIT).increment(1);
            return Some(cached_response(&query, &hit));
        }

        match self.resolver.resolve(&query).await {
            Ok(mut response) => {
                counter!(DNS_QUERIES, OUTCOME => outcome::FORWARDED).increment(1);
                response.set_id(query.id());

                let ttl = response
                    .answers()
                    .iter()
                    .map(|record| u64::from(record.ttl()))
                    .min()
                    .map_or(NEGATIVE_TTL, Duration::from_secs);
                self.store.answers.put(
                    key,
                    response.response_code(),
                    response.answers().to_vec(),
                    ttl,
                );

                Some(response)
            }
            Err(err) => {
                counter!(DNS_QUERIES, OUTCOME => outcome::FAILED).increment(1);
                debug!(error = %err, "upstream resolution failed");
                Some(failure_response(&query))
            }
        }
    }

    /// Synthesize the answer for a blocked name.
    fn spoofed(&self, query: &Message, question: &Query) -> Message {
        let mut response = reply_to(query);
        let name = question.name().clone();

        match question.query_type() {
            RecordType::A => {
                if let Some(v4) = self.spoof.v4 {
                    response.add_answer(Record::from_rdata(
                        name,
                        self.host_ttl,
                        RData::A(A(v4)),
                    ));
                }
            }
            RecordType::AAAA => {
                if let Some(v6) = self.spoof.v6 {
                    response.add_answer(Record::from_rdata(
                        name,
                        self.host_ttl,
                        RData::AAAA(AAAA(v6)),
                    ));
                }
            }
            // Every other type gets an empty NOERROR answer.
            _ => {}
        }

        response
    }
}

/// A response skeleton echoing the query id and question section.
fn reply_to(query: &Message) -> Message {
    let mut response = Message::new();
    response
        .set_id(query.id())
        .set_message_type(MessageType::Response)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(query.recursion_desired())
        .set_recursion_available(true)
        .set_response_code(ResponseCode::NoError);
    for q in query.queries() {
        response.add_query(q.clone());
    }
    response
}

fn cached_response(query: &Message, hit: &CachedAnswer) -> Message {
    let mut response = reply_to(query);
    response.set_response_code(hit.code);
    for record in &hit.answers {
        response.add_answer(record.clone());
    }
    response
}

/// SERVFAIL for upstream timeouts and network errors.
fn failure_response(query: &Message) -> Message {
    let mut response = reply_to(query);
    response.set_response_code(ResponseCode::ServFail);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    use hickory_proto::rr::Name;

    use crate::dns::resolver::tests::MockUpstream;

    /// Address every scripted upstream answer points at.
    const UPSTREAM_ADDR: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 7);

    fn store() -> Arc<Store> {
        Arc::new(Store::new(Duration::from_secs(300)))
    }

    fn pipeline(store: Arc<Store>, upstream: MockUpstream) -> Pipeline<MockUpstream> {
        let spoof = SpoofTarget::from_ip("127.0.0.1".parse().unwrap());
        Pipeline::new(store, upstream, spoof, 86400)
    }

    fn query(domain: &str, rtype: RecordType) -> Message {
        let mut q = Query::new();
        q.set_name(Name::from_str(domain).unwrap());
        q.set_query_type(rtype);

        let mut message = Message::new();
        message.set_id(4321);
        message.add_query(q);
        message
    }

    fn a_addr(record: &Record) -> Ipv4Addr {
        match record.data() {
            Some(RData::A(A(addr))) => *addr,
            other => panic!("expected A record, got {other:?}"),
        }
    }

    fn aaaa_addr(record: &Record) -> Ipv6Addr {
        match record.data() {
            Some(RData::AAAA(AAAA(addr))) => *addr,
            other => panic!("expected AAAA record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn should_spoof_blocked_names_to_the_listener() {
        let store = store();
        store.hosts.add("tracker.example");
        let upstream = MockUpstream::new();
        let pipeline = pipeline(Arc::clone(&store), upstream.clone());

        let response = pipeline
            .answer(query("tracker.example", RecordType::A))
            .await
            .unwrap();

        assert_eq!(response.id(), 4321);
        assert_eq!(response.response_code(), ResponseCode::NoError);
        let answer = &response.answers()[0];
        assert_eq!(answer.ttl(), 86400);
        assert_eq!(a_addr(answer), Ipv4Addr::LOCALHOST);
        // Blocked names never reach the upstream.
        assert_eq!(upstream.forwarded(), 0);
    }

    #[tokio::test]
    async fn should_block_www_form_of_blocked_name() {
        let store = store();
        store.hosts.add("example.com");
        let pipeline = pipeline(store, MockUpstream::new());

        let response = pipeline
            .answer(query("www.example.com", RecordType::A))
            .await
            .unwrap();

        assert_eq!(response.answers().len(), 1);
        assert_eq!(a_addr(&response.answers()[0]), Ipv4Addr::LOCALHOST);
    }

    #[tokio::test]
    async fn should_forward_parent_of_blocked_subdomain() {
        let store = store();
        store.hosts.add("sub.example.com");
        let upstream = MockUpstream::new();
        let pipeline = pipeline(store, upstream.clone());

        pipeline.answer(query("example.com", RecordType::A)).await.unwrap();

        assert_eq!(upstream.forwarded(), 1);
    }

    #[tokio::test]
    async fn should_spoof_aaaa_with_loopback() {
        let store = store();
        store.hosts.add("tracker.example");
        let pipeline = pipeline(store, MockUpstream::new());

        let response = pipeline
            .answer(query("tracker.example", RecordType::AAAA))
            .await
            .unwrap();

        assert_eq!(aaaa_addr(&response.answers()[0]), Ipv6Addr::LOCALHOST);
    }

    #[tokio::test]
    async fn should_answer_other_types_with_empty_noerror() {
        let store = store();
        store.hosts.add("tracker.example");
        let pipeline = pipeline(store, MockUpstream::new());

        let response = pipeline
            .answer(query("tracker.example", RecordType::MX))
            .await
            .unwrap();

        assert_eq!(response.response_code(), ResponseCode::NoError);
        assert!(response.answers().is_empty());
    }

    #[tokio::test]
    async fn should_block_on_regexp_match() {
        let store = store();
        store.regexps.add("^ads[0-9]+\\.").unwrap();
        let upstream = MockUpstream::new();
        let pipeline = pipeline(store, upstream.clone());

        let response = pipeline
            .answer(query("ads42.example.com", RecordType::A))
            .await
            .unwrap();

        assert_eq!(response.answers().len(), 1);
        assert_eq!(upstream.forwarded(), 0);
    }

    #[tokio::test]
    async fn should_forward_when_override_is_active() {
        let store = store();
        store.hosts.add("tracker.example");
        store.overrides.allow("tracker.example", 60);
        let upstream = MockUpstream::new();
        upstream.answer_a("tracker.example", UPSTREAM_ADDR, 120);
        let pipeline = pipeline(store, upstream.clone());

        let response = pipeline
            .answer(query("tracker.example", RecordType::A))
            .await
            .unwrap();

        assert_eq!(upstream.forwarded(), 1);
        assert_eq!(a_addr(&response.answers()[0]), UPSTREAM_ADDR);
    }

    #[tokio::test]
    async fn should_block_again_after_override_expires() {
        let store = store();
        store.hosts.add("tracker.example");
        store.overrides.allow("tracker.example", 0);
        let upstream = MockUpstream::new();
        let pipeline = pipeline(store, upstream.clone());

        let response = pipeline
            .answer(query("tracker.example", RecordType::A))
            .await
            .unwrap();

        assert_eq!(upstream.forwarded(), 0);
        assert_eq!(a_addr(&response.answers()[0]), Ipv4Addr::LOCALHOST);
    }

    #[tokio::test]
    async fn should_cache_forwarded_answers() {
        let store = store();
        let upstream = MockUpstream::new();
        upstream.answer_a("wikipedia.org", UPSTREAM_ADDR, 120);
        let pipeline = pipeline(Arc::clone(&store), upstream.clone());

        pipeline.answer(query("wikipedia.org", RecordType::A)).await.unwrap();
        let second = pipeline
            .answer(query("wikipedia.org", RecordType::A))
            .await
            .unwrap();

        // Second answer came from the cache with the new transaction id.
        assert_eq!(upstream.forwarded(), 1);
        assert_eq!(second.id(), 4321);
        assert!(store
            .answers
            .get(&AnswerKey::new(RecordType::A, "wikipedia.org"))
            .is_some());
    }

    #[tokio::test]
    async fn should_not_cache_spoofed_answers() {
        let store = store();
        store.hosts.add("tracker.example");
        let pipeline = pipeline(Arc::clone(&store), MockUpstream::new());

        pipeline.answer(query("tracker.example", RecordType::A)).await.unwrap();

        assert!(store
            .answers
            .get(&AnswerKey::new(RecordType::A, "tracker.example"))
            .is_none());
    }

    #[tokio::test]
    async fn should_answer_servfail_on_upstream_failure() {
        let store = store();
        let upstream = MockUpstream::new();
        upstream.make_unreachable();
        let pipeline = pipeline(Arc::clone(&store), upstream);

        let response = pipeline
            .answer(query("example.com", RecordType::A))
            .await
            .unwrap();

        assert_eq!(response.response_code(), ResponseCode::ServFail);
        // Failures must not poison the cache.
        assert!(store
            .answers
            .get(&AnswerKey::new(RecordType::A, "example.com"))
            .is_none());
    }

    #[tokio::test]
    async fn should_drop_responses_and_empty_questions() {
        let pipeline = pipeline(store(), MockUpstream::new());

        let mut response_packet = query("example.com", RecordType::A);
        response_packet.set_message_type(MessageType::Response);
        assert!(pipeline.answer(response_packet).await.is_none());

        let empty = Message::new();
        assert!(pipeline.answer(empty).await.is_none());
    }
}
