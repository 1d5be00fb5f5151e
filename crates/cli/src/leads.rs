//! Lead list import
//!
//! A lead list is CSV with a `name,phone,priority` header. Priority is
//! optional per row and defaults to medium.

use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use outdial_call_engine::prelude::{Lead, Priority};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct LeadRow {
    name: String,
    phone: String,
    #[serde(default)]
    priority: Option<Priority>,
}

pub fn read_leads(reader: impl Read) -> Result<Vec<Lead>> {
    let mut csv = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .comment(Some(b'#'))
        .from_reader(reader);

    let headers = csv.headers().context("lead list has no header row")?.clone();
    let mut leads = Vec::new();
    for record in csv.records() {
        let record = record.context("malformed lead list")?;
        let line = record.position().map_or(0, |p| p.line());
        let row: LeadRow = record
            .deserialize(Some(&headers))
            .with_context(|| format!("invalid lead on line {}", line))?;
        leads.push(Lead::new(row.name, row.phone, row.priority.unwrap_or(Priority::Medium)));
    }
    Ok(leads)
}

pub fn load_leads(path: &Path) -> Result<Vec<Lead>> {
    let file = std::fs::File::open(path).with_context(|| format!("cannot open lead list {}", path.display()))?;
    read_leads(file)
}

/// Numbered placeholder leads with a fixed priority mix
pub fn synthetic_leads(count: usize) -> Vec<Lead> {
    (0..count)
        .map(|i| {
            let priority = match i % 5 {
                0 => Priority::High,
                1 | 2 => Priority::Medium,
                _ => Priority::Low,
            };
            Lead::new(format!("Lead {:03}", i + 1), format!("+1 555 01{:02}", i % 100), priority)
        })
        .collect()
}

pub fn load_or_generate(path: Option<&Path>, synthetic: usize) -> Result<Vec<Lead>> {
    match path {
        Some(path) => load_leads(path),
        None => Ok(synthetic_leads(synthetic)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_leads_with_optional_priority() {
        let input = "name,phone,priority\n\
                     # imported from the spring campaign\n\
                     Ada Lovelace, +1 555 0100 ,high\n\
                     \"Hopper, Grace\",+1 555 0101\n";
        let leads = read_leads(input.as_bytes()).unwrap();
        assert_eq!(leads.len(), 2);
        assert_eq!(leads[0].phone, "+1 555 0100");
        assert_eq!(leads[0].priority, Priority::High);
        assert_eq!(leads[1].name, "Hopper, Grace");
        assert_eq!(leads[1].priority, Priority::Medium);
    }

    #[test]
    fn test_bad_priority_names_the_line() {
        let input = "name,phone,priority\nAda,+1 555 0100,urgent\n";
        let err = read_leads(input.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_synthetic_mix() {
        let leads = synthetic_leads(10);
        assert_eq!(leads.len(), 10);
        assert_eq!(leads.iter().filter(|l| l.priority == Priority::High).count(), 2);
    }
}
