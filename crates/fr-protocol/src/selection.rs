//! Declarative index predicates for picking targets out of a roster.
//!
//! Accepted forms (an optional leading `index` keyword is ignored):
//! - `all` / `*`, `none`
//! - comparisons: `< k`, `<= k`, `> k`, `>= k`, `== k`, `!= k`
//! - ranges: `a..b`, `a..=b`, `a..`, `..b`, `..=b`
//! - explicit sets: `4`, `1,3,5`

use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Bound, RangeBounds};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Predicate over 1-based roster indices. Never looks at addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Selection {
    #[default]
    All,
    None,
    Range(Bound<u32>, Bound<u32>),
    Only(BTreeSet<u32>),
    Except(BTreeSet<u32>),
}

impl Selection {
    /// `index < k`
    pub fn below(k: u32) -> Self {
        Self::Range(Bound::Unbounded, Bound::Excluded(k))
    }

    /// `index >= k`
    pub fn from_index(k: u32) -> Self {
        Self::Range(Bound::Included(k), Bound::Unbounded)
    }

    pub fn only(indices: impl IntoIterator<Item = u32>) -> Self {
        Self::Only(indices.into_iter().collect())
    }

    pub fn matches(&self, index: u32) -> bool {
        match self {
            Self::All => true,
            Self::None => false,
            Self::Range(lo, hi) => (*lo, *hi).contains(&index),
            Self::Only(set) => set.contains(&index),
            Self::Except(set) => !set.contains(&index),
        }
    }
}

impl FromStr for Selection {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidSelection {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let mut text = input.trim();
        if let Some(rest) = text.strip_prefix("index") {
            text = rest.trim_start();
        }
        if text.is_empty() {
            return Err(invalid("empty predicate"));
        }

        match text {
            "all" | "*" => return Ok(Self::All),
            "none" => return Ok(Self::None),
            _ => {}
        }

        if let Some(rest) = text.strip_prefix("!=") {
            return parse_set(rest).map(Self::Except).map_err(|r| invalid(&r));
        }

        // Two-character operators first so `<=` is not read as `<`.
        const COMPARISONS: &[&str] = &["<=", ">=", "==", "<", ">"];
        for op in COMPARISONS {
            if let Some(rest) = text.strip_prefix(op) {
                let k = parse_index(rest).map_err(|r| invalid(&r))?;
                return Ok(match *op {
                    "<" => Self::Range(Bound::Unbounded, Bound::Excluded(k)),
                    "<=" => Self::Range(Bound::Unbounded, Bound::Included(k)),
                    ">=" => Self::Range(Bound::Included(k), Bound::Unbounded),
                    "==" => Self::only([k]),
                    _ => Self::Range(Bound::Excluded(k), Bound::Unbounded),
                });
            }
        }

        if let Some((lo, hi)) = text.split_once("..") {
            let lo = match lo.trim() {
                "" => Bound::Unbounded,
                s => Bound::Included(parse_index(s).map_err(|r| invalid(&r))?),
            };
            let hi = match hi.trim() {
                "" => Bound::Unbounded,
                s => match s.strip_prefix('=') {
                    Some(s) => Bound::Included(parse_index(s).map_err(|r| invalid(&r))?),
                    None => Bound::Excluded(parse_index(s).map_err(|r| invalid(&r))?),
                },
            };
            if matches!((lo, hi), (Bound::Unbounded, Bound::Unbounded)) {
                return Err(invalid("open range needs at least one bound, use `all`"));
            }
            return Ok(Self::Range(lo, hi));
        }

        parse_set(text).map(Self::Only).map_err(|r| invalid(&r))
    }
}

fn parse_set(s: &str) -> Result<BTreeSet<u32>, String> {
    s.split(',').map(parse_index).collect()
}

fn parse_index(s: &str) -> Result<u32, String> {
    let s = s.trim();
    s.parse::<u32>()
        .map_err(|_| format!("expected a roster index, found {s:?}"))
}

impl TryFrom<String> for Selection {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Selection> for String {
    fn from(selection: Selection) -> Self {
        selection.to_string()
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |set: &BTreeSet<u32>| {
            set.iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };
        match self {
            Self::All => write!(f, "all"),
            Self::None => write!(f, "none"),
            Self::Only(set) => write!(f, "{}", join(set)),
            Self::Except(set) => write!(f, "!= {}", join(set)),
            Self::Range(lo, hi) => {
                match lo {
                    Bound::Included(k) => write!(f, "{k}")?,
                    Bound::Excluded(k) => write!(f, "{}", k.saturating_add(1))?,
                    Bound::Unbounded => {}
                }
                write!(f, "..")?;
                match hi {
                    Bound::Included(k) => write!(f, "={k}"),
                    Bound::Excluded(k) => write!(f, "{k}"),
                    Bound::Unbounded => Ok(()),
                }
            }
        }
    }
}
