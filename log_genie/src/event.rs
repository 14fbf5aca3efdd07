//! Synthetic log events.
//!
//! The [`Synthesizer`] produces the events log-genie emits. Roughly one in
//! twenty is an error event carrying a request id, an error code and a fake
//! stack trace. The rest are ordinary request events at a random severity.
//! Seeding the synthesizer makes the event stream reproducible, timestamps
//! aside.

use std::{
    net::Ipv4Addr,
    time::{SystemTime, UNIX_EPOCH},
};

use rand::{Rng, SeedableRng, rngs::StdRng};

use crate::telemetry::record::{Attributes, Severity, Value};

const WORDS: &[&str] = &[
    "request", "cache", "user", "session", "token", "upstream", "queue", "worker", "database",
    "replica", "shard", "payload", "timeout", "retry", "handler", "socket", "buffer", "index",
    "record", "stream", "batch", "checkout", "account", "profile", "invoice", "order", "cart",
    "search", "metrics", "config", "node", "cluster", "lease", "snapshot", "commit", "partition",
    "processed", "accepted", "rejected", "completed", "scheduled", "expired", "refreshed",
    "quickly", "slowly", "again", "after", "before", "during", "without", "with", "the", "a",
];

const LOREM: &[&str] = &[
    "lorem",
    "ipsum",
    "dolor",
    "sit",
    "amet",
    "consectetur",
    "adipiscing",
    "elit",
    "sed",
    "do",
    "eiusmod",
    "tempor",
    "incididunt",
    "labore",
    "magna",
    "aliqua",
];

const APP_NAMES: &[&str] = &[
    "Checkout",
    "Gatekeeper",
    "Ledger",
    "Pathfinder",
    "Quasar",
    "Redline",
    "Skylark",
    "Tundra",
    "Voyager",
    "Wavelength",
];

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS"];

const STATUS_CODES: &[u16] = &[
    200, 201, 202, 204, 301, 302, 304, 400, 401, 403, 404, 405, 409, 422, 429, 500, 502, 503, 504,
];

/// What kind of event was synthesized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A request event at a random severity.
    Ordinary,
    /// An error event, always at [`Severity::Error`].
    Error,
}

/// A synthesized log event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Kind of event
    pub kind: EventKind,
    /// Severity
    pub severity: Severity,
    /// The log message
    pub message: String,
    /// Event fields
    pub attributes: Attributes,
}

/// Source of random log events.
#[derive(Debug)]
pub struct Synthesizer {
    rng: StdRng,
}

impl Synthesizer {
    /// Create a new [`Synthesizer`], seeded if `seed` is given.
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        Self { rng }
    }

    /// Produce the next event.
    pub fn next_event(&mut self) -> Event {
        if self.rng.random_ratio(1, 20) {
            self.error_event()
        } else {
            self.ordinary_event()
        }
    }

    /// Produce an ordinary request event.
    pub fn ordinary_event(&mut self) -> Event {
        let severity = self.pick(&Severity::ALL);
        let words = self.rng.random_range(5..=15);
        let message = self.sentence(WORDS, words);

        let mut attributes = Attributes::new();
        attributes.insert("service".to_string(), Value::from(self.pick(APP_NAMES)));
        attributes.insert("user_id".to_string(), Value::from(self.uuid()));
        attributes.insert(
            "http_method".to_string(),
            Value::from(self.pick(HTTP_METHODS)),
        );
        attributes.insert(
            "status_code".to_string(),
            Value::from(self.pick(STATUS_CODES)),
        );
        attributes.insert(
            "latency_ms".to_string(),
            Value::from(self.rng.random_range(1_u32..=500)),
        );
        attributes.insert(
            "ip_address".to_string(),
            Value::display(&Ipv4Addr::from(self.rng.random::<u32>())),
        );
        attributes.insert("timestamp".to_string(), Value::from(unix_nanos()));

        Event {
            kind: EventKind::Ordinary,
            severity,
            message,
            attributes,
        }
    }

    /// Produce an error event.
    pub fn error_event(&mut self) -> Event {
        let words = self.rng.random_range(4..=8);
        let message = self.sentence(WORDS, words);

        let mut attributes = Attributes::new();
        attributes.insert("service".to_string(), Value::from(self.pick(APP_NAMES)));
        attributes.insert("request_id".to_string(), Value::from(self.uuid()));
        attributes.insert(
            "error_code".to_string(),
            Value::from(self.rng.random_range(400_u16..=599)),
        );
        attributes.insert(
            "stack_trace".to_string(),
            Value::from(self.sentence(LOREM, 5)),
        );
        attributes.insert("timestamp".to_string(), Value::from(unix_nanos()));

        Event {
            kind: EventKind::Error,
            severity: Severity::Error,
            message,
            attributes,
        }
    }

    fn pick<T: Copy>(&mut self, items: &[T]) -> T {
        items[self.rng.random_range(0..items.len())]
    }

    fn uuid(&mut self) -> String {
        uuid::Builder::from_random_bytes(self.rng.random())
            .into_uuid()
            .to_string()
    }

    fn sentence(&mut self, vocabulary: &[&str], words: usize) -> String {
        let mut sentence = String::new();
        for i in 0..words {
            let word = self.pick(vocabulary);
            if i == 0 {
                let mut chars = word.chars();
                if let Some(first) = chars.next() {
                    sentence.extend(first.to_uppercase());
                    sentence.push_str(chars.as_str());
                }
            } else {
                sentence.push(' ');
                sentence.push_str(word);
            }
        }
        sentence.push('.');
        sentence
    }
}

fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
}
