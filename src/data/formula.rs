//! Model formulas (`~ treatment * time`) for the differential tests.

use crate::error::{EdaError, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// A term in a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Term {
    /// Main effect of a variable.
    Main(String),
    /// Interaction between two variables.
    Interaction(String, String),
}

impl Term {
    /// Get the variable names involved in this term.
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Term::Main(v) => vec![v.as_str()],
            Term::Interaction(v1, v2) => vec![v1.as_str(), v2.as_str()],
        }
    }

    /// Order-insensitive equality (`a:b` is the same term as `b:a`).
    fn same_as(&self, other: &Term) -> bool {
        match (self, other) {
            (Term::Main(a), Term::Main(b)) => a == b,
            (Term::Interaction(a1, a2), Term::Interaction(b1, b2)) => {
                (a1 == b1 && a2 == b2) || (a1 == b2 && a2 == b1)
            }
            _ => false,
        }
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Main(v) => write!(f, "{}", v),
            Term::Interaction(v1, v2) => write!(f, "{}:{}", v1, v2),
        }
    }
}

/// A parsed model formula.
///
/// Supported syntax:
/// - `~ 1` - intercept only (the usual reduced model)
/// - `~ treatment` - intercept + treatment
/// - `~ treatment + time` - additive model
/// - `~ treatment * time` - treatment + time + treatment:time
/// - `~ treatment + time + treatment:time` - same as above, spelled out
/// - `~ 0 + treatment` - no intercept
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Formula {
    /// Whether to include an intercept.
    pub intercept: bool,
    /// Terms in the formula (excluding intercept), deduplicated.
    pub terms: Vec<Term>,
    /// Original formula string.
    pub formula_str: String,
}

impl Formula {
    /// Parse a formula string.
    ///
    /// # Examples
    /// ```
    /// use amplicon_eda::data::Formula;
    /// let f = Formula::parse("~ treatment * time").unwrap();
    /// assert!(f.intercept);
    /// assert_eq!(f.terms.len(), 3);
    /// ```
    pub fn parse(formula: &str) -> Result<Self> {
        let formula_str = formula.trim().to_string();
        let rhs = formula_str
            .strip_prefix('~')
            .ok_or_else(|| EdaError::FormulaParse("Formula must start with '~'".to_string()))?
            .trim();
        if rhs.is_empty() {
            return Err(EdaError::FormulaParse(
                "Formula right-hand side is empty".to_string(),
            ));
        }

        let mut intercept = true;
        let mut terms: Vec<Term> = Vec::new();

        for piece in rhs.split('+').map(str::trim) {
            if piece.is_empty() {
                return Err(EdaError::FormulaParse(format!(
                    "Dangling '+' in formula '{}'",
                    formula_str
                )));
            }
            match piece {
                "1" => {}
                "0" | "-1" => intercept = false,
                _ if piece.contains('*') => {
                    let (v1, v2) = split_pair(piece, '*')?;
                    push_unique(&mut terms, Term::Main(v1.clone()));
                    push_unique(&mut terms, Term::Main(v2.clone()));
                    push_unique(&mut terms, Term::Interaction(v1, v2));
                }
                _ if piece.contains(':') => {
                    let (v1, v2) = split_pair(piece, ':')?;
                    push_unique(&mut terms, Term::Interaction(v1, v2));
                }
                _ => {
                    check_identifier(piece)?;
                    push_unique(&mut terms, Term::Main(piece.to_string()));
                }
            }
        }

        if terms.is_empty() && !intercept {
            return Err(EdaError::FormulaParse(
                "Formula must have at least one term".to_string(),
            ));
        }

        Ok(Self {
            intercept,
            terms,
            formula_str,
        })
    }

    /// Get all variable names used in the formula.
    pub fn variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = self
            .terms
            .iter()
            .flat_map(|t| t.variables())
            .collect();
        vars.sort();
        vars.dedup();
        vars
    }

    /// Check if a variable is used in the formula.
    pub fn uses_variable(&self, name: &str) -> bool {
        self.terms.iter().any(|t| t.variables().contains(&name))
    }

    /// Whether every term of `self` also appears in `other` (and `other`
    /// has at least one more term or an intercept `self` lacks).
    pub fn is_nested_in(&self, other: &Formula) -> bool {
        if self.intercept && !other.intercept {
            return false;
        }
        let all_present = self
            .terms
            .iter()
            .all(|t| other.terms.iter().any(|o| o.same_as(t)));
        let strictly_smaller =
            self.terms.len() < other.terms.len() || (!self.intercept && other.intercept);
        all_present && strictly_smaller
    }
}

impl FromStr for Formula {
    type Err = EdaError;

    fn from_str(s: &str) -> Result<Self> {
        Formula::parse(s)
    }
}

impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "~ ")?;
        let mut parts: Vec<String> = Vec::with_capacity(self.terms.len() + 1);
        if !self.intercept {
            parts.push("0".to_string());
        } else if self.terms.is_empty() {
            parts.push("1".to_string());
        }
        parts.extend(self.terms.iter().map(|t| t.to_string()));
        write!(f, "{}", parts.join(" + "))
    }
}

fn push_unique(terms: &mut Vec<Term>, term: Term) {
    if !terms.iter().any(|t| t.same_as(&term)) {
        terms.push(term);
    }
}

fn split_pair(piece: &str, sep: char) -> Result<(String, String)> {
    let parts: Vec<&str> = piece.split(sep).map(str::trim).collect();
    if parts.len() != 2 {
        return Err(EdaError::FormulaParse(format!(
            "Only two-way interactions are supported: '{}'",
            piece
        )));
    }
    check_identifier(parts[0])?;
    check_identifier(parts[1])?;
    if parts[0] == parts[1] {
        return Err(EdaError::FormulaParse(format!(
            "Variable interacts with itself: '{}'",
            piece
        )));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

fn check_identifier(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(EdaError::FormulaParse(format!(
            "Invalid variable name '{}'",
            name
        )))
    }
}
