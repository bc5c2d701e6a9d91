//! Per-field comparison policy.

use std::fmt;
use std::str::FromStr;

/// How a tracked field is compared between spec and remote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Compare {
    /// Not tracked; divergence never triggers an update.
    #[default]
    Ignore,
    Exact,
    /// Exact for non-string values.
    CaseInsensitive,
}

impl Compare {
    pub fn str_differs(self, desired: &str, observed: &str) -> bool {
        match self {
            Compare::Ignore => false,
            Compare::Exact => desired != observed,
            Compare::CaseInsensitive => !desired.eq_ignore_ascii_case(observed),
        }
    }

    pub fn differs<V: PartialEq + ?Sized>(self, desired: &V, observed: &V) -> bool {
        match self {
            Compare::Ignore => false,
            Compare::Exact | Compare::CaseInsensitive => desired != observed,
        }
    }
}

impl fmt::Display for Compare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Compare::Ignore => "ignore",
            Compare::Exact => "exact",
            Compare::CaseInsensitive => "case_insensitive",
        };
        f.write_str(s)
    }
}

impl FromStr for Compare {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "ignore" | "off" => Ok(Compare::Ignore),
            "exact" => Ok(Compare::Exact),
            "case_insensitive" | "ci" => Ok(Compare::CaseInsensitive),
            other => Err(format!("unknown comparison {:?}", other)),
        }
    }
}
