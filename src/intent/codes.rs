//! Garment-order and job-order code extraction.
//!
//! Two shapes are recognized, case-insensitively:
//! - garment order (GO/SC): `S24M12345` (`s`, two digits, `m`, alphanumerics)
//! - job order (JO): `24M12345AB01` (two digits, `m`, five digits, two letters, two digits)
//!
//! Extraction is pure and never fails. Codes are upper-cased and collected
//! into an ordered set, so duplicates collapse and iteration order is stable.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Which code family an identifier belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeFamily {
    Garment,
    Job,
}

/// A normalized (upper-case) order identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Code {
    value: String,
    family: CodeFamily,
}

impl Code {
    pub fn garment(value: &str) -> Self {
        Self {
            value: value.trim().to_uppercase(),
            family: CodeFamily::Garment,
        }
    }

    pub fn job(value: &str) -> Self {
        Self {
            value: value.trim().to_uppercase(),
            family: CodeFamily::Job,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn family(&self) -> CodeFamily {
        self.family
    }

    /// The garment order this code belongs to. A job code maps to `S` plus
    /// its first eight characters.
    pub fn garment_order(&self) -> String {
        match self.family {
            CodeFamily::Garment => self.value.clone(),
            CodeFamily::Job => garment_of_job(&self.value).unwrap_or_else(|| self.value.clone()),
        }
    }

    /// The eight-character prefix shared by every job order of this code.
    pub fn job_prefix(&self) -> String {
        match self.family {
            CodeFamily::Garment => self.value.chars().skip(1).take(8).collect(),
            CodeFamily::Job => self.value.chars().take(8).collect(),
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Garment order for a job number (`24M12345AB01` → `S24M12345`).
pub fn garment_of_job(job: &str) -> Option<String> {
    let job = job.trim();
    let prefix: String = job.chars().take(8).collect();
    if prefix.chars().count() < 8 {
        return None;
    }
    Some(format!("S{}", prefix.to_uppercase()))
}

fn garment_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\bs\d{2}m[a-z0-9]+\b").expect("garment code regex is valid"))
}

fn job_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b\d{2}m\d{5}[a-z]{2}\d{2}\b").expect("job code regex is valid")
    })
}

/// Extract every recognizable code from free text.
pub fn extract(text: &str) -> BTreeSet<Code> {
    let mut codes = BTreeSet::new();
    for m in garment_pattern().find_iter(text) {
        codes.insert(Code::garment(m.as_str()));
    }
    for m in job_pattern().find_iter(text) {
        codes.insert(Code::job(m.as_str()));
    }
    codes
}

/// Distinct garment orders covered by `codes`.
pub fn garment_orders(codes: &BTreeSet<Code>) -> Vec<String> {
    codes
        .iter()
        .map(Code::garment_order)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Distinct job-order prefixes covered by `codes`.
pub fn job_prefixes(codes: &BTreeSet<Code>) -> Vec<String> {
    codes
        .iter()
        .map(Code::job_prefix)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Full job numbers present in `codes`.
pub fn job_numbers(codes: &BTreeSet<Code>) -> Vec<String> {
    codes
        .iter()
        .filter(|c| c.family == CodeFamily::Job)
        .map(|c| c.value.clone())
        .collect()
}

/// Render values as a SQL string list: `'A','B'`. Single quotes are doubled.
pub fn quote_list(values: &[String]) -> String {
    values
        .iter()
        .map(|v| format!("'{}'", v.replace('\'', "''")))
        .collect::<Vec<_>>()
        .join(",")
}
