//! Fake values for generated rows.

use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const FIRST_NAMES: &[&str] = &[
    "Alice", "Bob", "Carol", "David", "Emma", "Frank", "Grace", "Henry", "Iris", "Jack", "Kate",
    "Leo", "Maya", "Noah", "Olivia", "Peter", "Quinn", "Rose", "Sam", "Tara",
];

const LAST_NAMES: &[&str] = &[
    "Smith", "Johnson", "Garcia", "Miller", "Davis", "Martinez", "Anderson", "Taylor", "Moore",
    "Lee", "White", "Harris", "Clark", "Lewis", "Walker", "Young", "King", "Hill",
];

const WORDS: &[&str] = &[
    "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit", "sed", "do",
    "eiusmod", "tempor", "incididunt", "labore", "dolore", "magna", "aliqua", "veniam", "quis",
];

/// Fragments that look like SQL syntax but belong inside a string literal.
const TRICKY: &[&str] = &[
    "semi;colon",
    "it's quoted",
    "say \"hi\"",
    "back\\slash",
    "-- not a comment",
    "/* not a comment */",
    "line one\nline two",
    "`tick`",
    "DROP TABLE users;",
    "ends with backslash\\",
    "ünïcödé ✓",
    "tab\there",
];

pub struct FakeData {
    rng: ChaCha8Rng,
}

impl FakeData {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn name(&mut self) -> String {
        let first = FIRST_NAMES.choose(&mut self.rng).copied().unwrap_or("Alice");
        let last = LAST_NAMES.choose(&mut self.rng).copied().unwrap_or("Smith");
        format!("{} {}", first, last)
    }

    pub fn email(&mut self, id: u64) -> String {
        let first = FIRST_NAMES.choose(&mut self.rng).copied().unwrap_or("alice");
        format!("{}.{}@example.com", first.to_lowercase(), id)
    }

    /// A short sentence, with a syntax-looking fragment mixed in roughly
    /// `tricky_ratio` of the time.
    pub fn note(&mut self, tricky_ratio: f64) -> String {
        let count = self.rng.random_range(3..9);
        let mut words: Vec<&str> = (0..count)
            .filter_map(|_| WORDS.choose(&mut self.rng).copied())
            .collect();
        if self.rng.random_bool(tricky_ratio.clamp(0.0, 1.0)) {
            let at = self.rng.random_range(0..=words.len());
            if let Some(fragment) = TRICKY.choose(&mut self.rng) {
                words.insert(at, fragment);
            }
        }
        words.join(" ")
    }

    /// Amount in cents.
    pub fn amount_cents(&mut self) -> u64 {
        self.rng.random_range(100..1_000_000)
    }

    pub fn date(&mut self) -> String {
        let year = self.rng.random_range(2015..2025);
        let month = self.rng.random_range(1..=12);
        let day = self.rng.random_range(1..=28);
        format!("{:04}-{:02}-{:02}", year, month, day)
    }

    pub fn maybe_null(&mut self, probability: f64) -> bool {
        self.rng.random_bool(probability.clamp(0.0, 1.0))
    }
}
