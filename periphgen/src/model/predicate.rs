//! Visibility and applicability predicates over a settings record
//!
//! A predicate is a list of clauses separated by `;`, all of which must hold:
//!
//! * `key=A|B` --- the value of `key` is one of `A` or `B`
//! * `key!=A|B` --- the value of `key` is neither `A` nor `B` (or `key` is not set)
//! * `key` --- `key` is set and truthy
//! * `!key` --- `key` is unset or falsy

use std::{fmt, str};

use crate::{error::PredicateParseError, model::Settings};
use lazy_static::lazy_static;
use regex::Regex;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Clause {
    AnyOf { key: String, values: Vec<String> },
    NoneOf { key: String, values: Vec<String> },
    Truthy(String),
    Falsy(String),
}

impl Clause {
    fn key(&self) -> &str {
        match self {
            Self::AnyOf { key, .. }
            | Self::NoneOf { key, .. }
            | Self::Truthy(key)
            | Self::Falsy(key) => key,
        }
    }

    fn holds(&self, settings: &Settings) -> bool {
        let value = settings.get(self.key());
        match self {
            Self::AnyOf { values, .. } => {
                value.map_or(false, |v| values.contains(&v.key_string()))
            }
            Self::NoneOf { values, .. } => {
                value.map_or(true, |v| !values.contains(&v.key_string()))
            }
            Self::Truthy(_) => value.map_or(false, |v| v.is_truthy()),
            Self::Falsy(_) => value.map_or(true, |v| !v.is_truthy()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Predicate {
    src: String,
    clauses: Vec<Clause>,
}

impl Predicate {
    /// Evaluate against `settings`
    pub fn eval(&self, settings: &Settings) -> bool {
        self.clauses.iter().all(|c| c.holds(settings))
    }

    /// Setting keys this predicate reads
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.clauses.iter().map(Clause::key)
    }
}

impl str::FromStr for Predicate {
    type Err = PredicateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            static ref CLAUSE_RE: Regex = Regex::new(
                r"(?x)
                ^\s*
                (!)?                           # negation of a bare key (captured as #1)
                \s*
                ([A-Za-z_][A-Za-z0-9_]*)       # setting key (captured as #2)
                \s*
                (?:(!=|=)\s*(.*?))?            # operator and value list (captured as #3, #4)
                \s*$"
            )
            .unwrap();
        }

        let err = |clause: &str| PredicateParseError {
            src: s.to_owned(),
            clause: clause.to_owned(),
        };

        let clauses = s
            .split(';')
            .map(|clause| {
                let captures = CLAUSE_RE.captures(clause).ok_or_else(|| err(clause))?;
                let negated = captures.get(1).is_some();
                let key = captures[2].to_owned();
                match (negated, captures.get(3).map(|m| m.as_str())) {
                    (false, None) => Ok(Clause::Truthy(key)),
                    (true, None) => Ok(Clause::Falsy(key)),
                    (false, Some(op)) => {
                        let values = captures[4]
                            .split('|')
                            .map(|v| v.trim().to_owned())
                            .collect::<Vec<_>>();
                        if values.iter().any(String::is_empty) {
                            return Err(err(clause));
                        }
                        Ok(if op == "=" {
                            Clause::AnyOf { key, values }
                        } else {
                            Clause::NoneOf { key, values }
                        })
                    }
                    // `!key=value` is ambiguous, use `key!=value`
                    (true, Some(_)) => Err(err(clause)),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            src: s.to_owned(),
            clauses,
        })
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.src)
    }
}
