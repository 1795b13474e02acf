//! Response caching with per-entry TTLs.

mod answers;

pub use answers::{AnswerCache, AnswerKey, CachedAnswer, NEGATIVE_TTL};
