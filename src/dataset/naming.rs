//! Dataset path rules.
//!
//! Dataset paths end up as directory names on every platform a repository is
//! checked out on, so they are held to the strictest common rules.

use std::error::Error;
use std::fmt;

const RESERVED: [&str; 4] = ["CON", "PRN", "AUX", "NUL"];
const FORBIDDEN: &[char] = &[':', '<', '>', '"', '|', '?', '*', '\\'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamingError {
    Empty,
    EmptyComponent(String),
    ForbiddenChar { component: String, ch: char },
    LeadingDot(String),
    TrailingDotOrSpace(String),
    Reserved(String),
    /// Differs from an existing dataset path only by case.
    CaseCollision { new: String, existing: String },
}

impl fmt::Display for NamingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "dataset path is empty"),
            Self::EmptyComponent(path) => write!(f, "{path:?} contains an empty component"),
            Self::ForbiddenChar { component, ch } => {
                write!(f, "{component:?} contains the forbidden character {ch:?}")
            }
            Self::LeadingDot(c) => write!(f, "{c:?} starts with a dot"),
            Self::TrailingDotOrSpace(c) => write!(f, "{c:?} ends with a dot or space"),
            Self::Reserved(c) => write!(f, "{c:?} is a reserved name"),
            Self::CaseCollision { new, existing } => {
                write!(f, "{new:?} collides with existing dataset {existing:?}")
            }
        }
    }
}

impl Error for NamingError {}

fn is_reserved(component: &str) -> bool {
    let stem = component.split('.').next().unwrap_or(component);
    let stem = stem.to_ascii_uppercase();
    if RESERVED.contains(&stem.as_str()) {
        return true;
    }
    match stem.strip_prefix("COM").or_else(|| stem.strip_prefix("LPT")) {
        Some(n) => matches!(n, "1" | "2" | "3" | "4" | "5" | "6" | "7" | "8" | "9"),
        None => false,
    }
}

fn validate_component(component: &str) -> Result<(), NamingError> {
    if let Some(ch) = component
        .chars()
        .find(|c| c.is_ascii_control() || FORBIDDEN.contains(c))
    {
        return Err(NamingError::ForbiddenChar {
            component: component.to_owned(),
            ch,
        });
    }
    if component.starts_with('.') {
        return Err(NamingError::LeadingDot(component.to_owned()));
    }
    if component.ends_with('.') || component.ends_with(' ') {
        return Err(NamingError::TrailingDotOrSpace(component.to_owned()));
    }
    if is_reserved(component) {
        return Err(NamingError::Reserved(component.to_owned()));
    }
    Ok(())
}

/// Checks every `/`-separated component of a dataset path.
pub fn validate_dataset_path(path: &str) -> Result<(), NamingError> {
    if path.is_empty() {
        return Err(NamingError::Empty);
    }
    for component in path.split('/') {
        if component.is_empty() {
            return Err(NamingError::EmptyComponent(path.to_owned()));
        }
        validate_component(component)?;
    }
    Ok(())
}

/// Rejects `new` if it equals one of `existing` ignoring case but not
/// exactly.
pub fn check_no_case_collision<'a, I>(existing: I, new: &str) -> Result<(), NamingError>
where
    I: IntoIterator<Item = &'a str>,
{
    let folded = new.to_lowercase();
    for other in existing {
        if other != new && other.to_lowercase() == folded {
            return Err(NamingError::CaseCollision {
                new: new.to_owned(),
                existing: other.to_owned(),
            });
        }
    }
    Ok(())
}
