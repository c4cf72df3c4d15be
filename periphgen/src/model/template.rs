//! Code templates: lines of target source with `{{name}}` placeholders
//!
//! Templates are parsed once, when the schema is loaded, into a list of literal and parameter
//! segments. Rendering folds over the segments and fails on the first parameter that has no
//! value.

use std::{collections::BTreeMap, fmt, str};

use crate::{error::TemplateParseError, model::Predicate};
use lazy_static::lazy_static;
use regex::Regex;
use strum::{Display, EnumString};

/// Parameter values available to a template, by placeholder name
pub type Params = BTreeMap<String, String>;

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Template {
    src: String,
    segments: Vec<Segment>,
}

/// A placeholder had no value during rendering
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnboundParam(pub String);

impl Template {
    /// Names of all placeholders in order of appearance
    pub fn params(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|seg| match seg {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Literal(_) => None,
        })
    }

    /// Whether the template references the placeholder `name`
    pub fn references(&self, name: &str) -> bool {
        self.params().any(|p| p == name)
    }

    pub fn as_str(&self) -> &str {
        &self.src
    }

    /// Substitute all placeholders with values from `params`
    pub fn render(&self, params: &Params) -> Result<String, UnboundParam> {
        self.segments
            .iter()
            .try_fold(String::with_capacity(self.src.len()), |mut acc, seg| {
                match seg {
                    Segment::Literal(s) => acc.push_str(s),
                    Segment::Param(name) => acc.push_str(
                        params
                            .get(name)
                            .ok_or_else(|| UnboundParam(name.clone()))?,
                    ),
                }
                Ok(acc)
            })
    }
}

impl str::FromStr for Template {
    type Err = TemplateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            static ref PLACEHOLDER_RE: Regex = Regex::new(r"\{\{([^{}]*)\}\}").unwrap();
            static ref NAME_RE: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
        }

        let mut segments = vec![];
        let push_literal = |segments: &mut Vec<Segment>, lit: &str| {
            if lit.contains("{{") {
                return Err(TemplateParseError::Unterminated(s.to_owned()));
            }
            if !lit.is_empty() {
                segments.push(Segment::Literal(lit.to_owned()));
            }
            Ok(())
        };

        let mut last = 0;
        for captures in PLACEHOLDER_RE.captures_iter(s) {
            // Unwrap: group 0 always exists
            let whole = captures.get(0).unwrap();
            push_literal(&mut segments, &s[last..whole.start()])?;
            let name = captures[1].trim();
            if !NAME_RE.is_match(name) {
                return Err(TemplateParseError::InvalidPlaceholder {
                    src: s.to_owned(),
                    name: name.to_owned(),
                });
            }
            segments.push(Segment::Param(name.to_owned()));
            last = whole.end();
        }
        push_literal(&mut segments, &s[last..])?;

        Ok(Self {
            src: s.to_owned(),
            segments,
        })
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.src)
    }
}

/// Which settings a template set is rendered against
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum TemplateScope {
    /// Rendered once per configured pin, with pin symbols available
    Pin,
    /// Rendered once per peripheral
    Peripheral,
}

/// A group of template lines selected together by `key`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateSet {
    pub scope: TemplateScope,
    /// Selection key: a mode key, a signal name, an interrupt name or `init`
    pub key: String,
    /// The set is only emitted when this holds
    pub when: Option<Predicate>,
    /// Emit into this routine instead of the peripheral's own
    pub routine: Option<String>,
    pub includes: Vec<String>,
    pub lines: Vec<Template>,
}

impl TemplateSet {
    pub fn applies(&self, settings: &crate::model::Settings) -> bool {
        self.when.as_ref().map_or(true, |p| p.eval(settings))
    }

    /// Whether any line references the placeholder `name`
    pub fn references(&self, name: &str) -> bool {
        self.lines.iter().any(|line| line.references(name))
    }

    /// A human readable identifier for diagnostics, e.g., `pin:OC0A`
    pub fn label(&self) -> String {
        format!("{}:{}", self.scope, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> Template {
        s.parse().unwrap()
    }

    #[test]
    fn parses_literals_and_params() {
        let tpl = t("{{ddr_reg}} |= _BV({{ ddr_bit }});");
        assert_eq!(tpl.params().collect::<Vec<_>>(), ["ddr_reg", "ddr_bit"]);
        assert!(tpl.references("ddr_bit"));
        assert!(!tpl.references("port_bit"));
    }

    #[test]
    fn renders_by_substitution() {
        let tpl = t("{{ddr_reg}} |= _BV({{ddr_bit}});");
        let params: Params = [("ddr_reg", "DDRB"), ("ddr_bit", "DDB5")]
            .into_iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        assert_eq!(tpl.render(&params).unwrap(), "DDRB |= _BV(DDB5);");
    }

    #[test]
    fn missing_param_is_reported_not_swallowed() {
        let tpl = t("OCR0A = {{duty}};");
        assert_eq!(
            tpl.render(&Params::new()),
            Err(UnboundParam("duty".to_owned()))
        );
    }

    #[test]
    fn literal_only_template() {
        let tpl = t("TCCR0A = 0;");
        assert_eq!(tpl.params().count(), 0);
        assert_eq!(tpl.render(&Params::new()).unwrap(), "TCCR0A = 0;");
    }

    #[test]
    fn malformed_placeholders_are_rejected() {
        assert_eq!(
            "UBRR0L = {{ubrr;".parse::<Template>(),
            Err(TemplateParseError::Unterminated("UBRR0L = {{ubrr;".to_owned()))
        );
        assert!(matches!(
            "x = {{not a name}};".parse::<Template>(),
            Err(TemplateParseError::InvalidPlaceholder { .. })
        ));
        assert!(matches!(
            "x = {{}};".parse::<Template>(),
            Err(TemplateParseError::InvalidPlaceholder { .. })
        ));
    }
}
