//! Annotation-based admission filter
//!
//! Lets several operator instances share a cluster: each one only converges
//! `Nginx` objects whose annotations match its filter. The filter uses label
//! selector syntax and is evaluated with `kube`'s [`Selector`].

use std::collections::{BTreeMap, BTreeSet};

use kube::core::{Expression, Selector, SelectorExt};

use crate::Error;

/// Parsed annotation selector; the empty filter admits everything
#[derive(Clone, Debug, Default)]
pub struct AnnotationFilter {
    raw: String,
    selector: Option<Selector>,
}

impl AnnotationFilter {
    /// Filter admitting every object
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Parse a selector such as `team=web,tier in (edge, internal),!legacy`
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Self::allow_all());
        }

        let expressions = split_terms(raw)?
            .into_iter()
            .map(parse_term)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            raw: raw.to_string(),
            selector: Some(expressions.into_iter().collect()),
        })
    }

    /// Whether an object with these annotations is admitted
    pub fn matches(&self, annotations: &BTreeMap<String, String>) -> bool {
        match &self.selector {
            Some(selector) => selector.matches(annotations),
            None => true,
        }
    }

    /// True for the empty filter
    pub fn is_empty(&self) -> bool {
        self.selector.is_none()
    }
}

impl std::fmt::Display for AnnotationFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Split on commas outside of parentheses
fn split_terms(raw: &str) -> Result<Vec<&str>, Error> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in raw.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1).ok_or_else(|| {
                    Error::validation(format!("unbalanced ')' in annotation filter {raw:?}"))
                })?
            }
            ',' if depth == 0 => {
                terms.push(raw[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(Error::validation(format!(
            "unbalanced '(' in annotation filter {raw:?}"
        )));
    }
    terms.push(raw[start..].trim());

    if terms.iter().any(|t| t.is_empty()) {
        return Err(Error::validation(format!(
            "empty term in annotation filter {raw:?}"
        )));
    }
    Ok(terms)
}

fn parse_term(term: &str) -> Result<Expression, Error> {
    if let Some(key) = term.strip_prefix('!') {
        return Ok(Expression::DoesNotExist(parse_key(key)?));
    }
    if let Some((key, values)) = term.split_once(" notin ") {
        return Ok(Expression::NotIn(parse_key(key)?, parse_set(values)?));
    }
    if let Some((key, values)) = term.split_once(" in ") {
        return Ok(Expression::In(parse_key(key)?, parse_set(values)?));
    }
    if let Some((key, value)) = term.split_once("!=") {
        return Ok(Expression::NotEqual(parse_key(key)?, value.trim().to_string()));
    }
    if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
        return Ok(Expression::Equal(parse_key(key)?, value.trim().to_string()));
    }
    Ok(Expression::Exists(parse_key(term)?))
}

fn parse_key(key: &str) -> Result<String, Error> {
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return Err(Error::validation(format!(
            "invalid annotation key {key:?} in filter"
        )));
    }
    Ok(key.to_string())
}

fn parse_set(values: &str) -> Result<BTreeSet<String>, Error> {
    let inner = values
        .trim()
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .ok_or_else(|| Error::validation(format!("expected (a, b) value set, got {values:?}")))?;
    Ok(inner
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect())
}
