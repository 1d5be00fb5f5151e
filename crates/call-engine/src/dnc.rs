//! Do-not-call lookup

use std::collections::HashSet;
use std::fmt;

/// External do-not-call registry
pub trait DncRegistry: Send + Sync + fmt::Debug {
    fn is_blocked(&self, phone: &str) -> bool;
}

/// In-memory DNC list keyed by the digits of each number
///
/// `"+1 (555) 010-0100"` and `"15550100100"` are the same entry.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDncList {
    numbers: HashSet<String>,
}

impl InMemoryDncList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, phone: &str) {
        let digits = normalize(phone);
        if !digits.is_empty() {
            self.numbers.insert(digits);
        }
    }

    pub fn remove(&mut self, phone: &str) -> bool {
        self.numbers.remove(&normalize(phone))
    }

    pub fn len(&self) -> usize {
        self.numbers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<S> for InMemoryDncList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut list = Self::new();
        for phone in iter {
            list.add(phone.as_ref());
        }
        list
    }
}

impl DncRegistry for InMemoryDncList {
    fn is_blocked(&self, phone: &str) -> bool {
        let digits = normalize(phone);
        !digits.is_empty() && self.numbers.contains(&digits)
    }
}

fn normalize(phone: &str) -> String {
    phone.chars().filter(char::is_ascii_digit).collect()
}
