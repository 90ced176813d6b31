//! Location mirror projection.
//!
//! Resolves a location's free-text `state` to a canonical US state or
//! territory code. Resolution order:
//!
//! 1. exact code or name (ignoring case, whitespace and punctuation)
//! 2. canonical name contained in the text, longest name first
//! 3. derivation from the free-text `address`
//!
//! A location that resolves nowhere projects to `Invalid`, which deletes
//! its mirror.

use damper_core::{Document, Projection};
use serde_json::{Map, Value};

use super::{copy_allowed, Projector};

/// Location fields carried into the mirror alongside the resolved state.
pub const LOCATION_MIRROR_FIELDS: &[&str] = &["name", "city", "country"];

const STATES: &[(&str, &str)] = &[
    ("AL", "Alabama"),
    ("AK", "Alaska"),
    ("AZ", "Arizona"),
    ("AR", "Arkansas"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("IA", "Iowa"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("ME", "Maine"),
    ("MD", "Maryland"),
    ("MA", "Massachusetts"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MS", "Mississippi"),
    ("MO", "Missouri"),
    ("MT", "Montana"),
    ("NE", "Nebraska"),
    ("NV", "Nevada"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NY", "New York"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VT", "Vermont"),
    ("VA", "Virginia"),
    ("WA", "Washington"),
    ("WV", "West Virginia"),
    ("WI", "Wisconsin"),
    ("WY", "Wyoming"),
    ("DC", "District of Columbia"),
    ("PR", "Puerto Rico"),
    ("GU", "Guam"),
    ("VI", "U.S. Virgin Islands"),
    ("AS", "American Samoa"),
    ("MP", "Northern Mariana Islands"),
];

/// Which source field produced the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateSource {
    State,
    Address,
}

impl StateSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateSource::State => "state",
            StateSource::Address => "address",
        }
    }
}

/// A resolved state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateMatch {
    pub code: &'static str,
    pub name: &'static str,
    pub source: StateSource,
}

/// Lowercase, drop punctuation, collapse whitespace.
fn normalize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else if c.is_whitespace() {
                ' '
            } else {
                // "U.S." must normalize to "us", but "Winston-Salem" to two words.
                if c == '.' || c == '\'' {
                    '\0'
                } else {
                    ' '
                }
            }
        })
        .filter(|c| *c != '\0')
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn by_code(code: &str) -> Option<(&'static str, &'static str)> {
    STATES
        .iter()
        .find(|(c, _)| c.eq_ignore_ascii_case(code))
        .copied()
}

/// Exact code or name match.
fn direct_lookup(normalized: &str) -> Option<(&'static str, &'static str)> {
    if normalized.len() == 2 {
        if let Some(found) = by_code(normalized) {
            return Some(found);
        }
    }
    STATES
        .iter()
        .find(|(_, name)| normalize(name) == normalized)
        .copied()
}

/// Longest canonical name appearing as whole words in the text.
fn name_within(normalized: &str) -> Option<(&'static str, &'static str)> {
    let padded = format!(" {normalized} ");
    STATES
        .iter()
        .filter(|(_, name)| padded.contains(&format!(" {} ", normalize(name))))
        .max_by_key(|(_, name)| name.len())
        .copied()
}

/// Uppercase two-letter token that is a known code.
fn code_token(token: &str) -> Option<(&'static str, &'static str)> {
    let token = token.trim_matches(|c: char| !c.is_ascii_alphanumeric());
    if token.len() == 2 && token.chars().all(|c| c.is_ascii_uppercase()) {
        by_code(token)
    } else {
        None
    }
}

fn is_zip(token: &str) -> bool {
    let digits = token.split('-').next().unwrap_or_default();
    digits.len() == 5 && digits.chars().all(|c| c.is_ascii_digit())
}

fn from_address(address: &str) -> Option<(&'static str, &'static str)> {
    let tokens: Vec<&str> = address
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .collect();

    // "..., Springfield, IL 62701" or "..., Springfield, IL"
    if let Some(last) = tokens.last() {
        if is_zip(last) && tokens.len() >= 2 {
            if let Some(found) = code_token(tokens[tokens.len() - 2]) {
                return Some(found);
            }
        }
        if let Some(found) = code_token(last) {
            return Some(found);
        }
    }

    if let Some(found) = name_within(&normalize(address)) {
        return Some(found);
    }

    tokens.iter().rev().find_map(|t| code_token(t))
}

/// Resolve a state from the free-text `state` and `address` values.
pub fn resolve_state(state: Option<&str>, address: Option<&str>) -> Option<StateMatch> {
    let from_state = state.and_then(|raw| {
        let normalized = normalize(raw);
        if normalized.is_empty() {
            return None;
        }
        direct_lookup(&normalized).or_else(|| name_within(&normalized))
    });
    if let Some((code, name)) = from_state {
        return Some(StateMatch {
            code,
            name,
            source: StateSource::State,
        });
    }

    address
        .and_then(from_address)
        .map(|(code, name)| StateMatch {
            code,
            name,
            source: StateSource::Address,
        })
}

/// Projects a location onto its state mirror.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocationProjector;

impl Projector for LocationProjector {
    fn project(&self, source: &Document) -> Projection {
        let Some(state) = resolve_state(source.get_str("state"), source.get_str("address")) else {
            return Projection::invalid("state could not be resolved to a US state code");
        };

        let mut fields = Map::new();
        fields.insert("stateCode".to_string(), Value::from(state.code));
        fields.insert("stateName".to_string(), Value::from(state.name));
        fields.insert("resolvedFrom".to_string(), Value::from(state.source.as_str()));
        copy_allowed(source, LOCATION_MIRROR_FIELDS, &mut fields);
        Projection::derived(fields)
    }
}
