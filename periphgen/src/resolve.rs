//! Translate symbolic settings into a template selection key and register-ready parameters

use crate::model::{ConfigField, FieldScope, ModeKey, SettingValue, Settings, ValueMaps};
use lazy_static::lazy_static;
use regex::Regex;

/// Derive a mode key from a raw value that has no explicit mapping
///
/// Lowercases the value and replaces every run of whitespace with one underscore, e.g.,
/// `Fast PWM` -> `fast_pwm`.
pub fn fallback_mode_key(raw: &str) -> String {
    lazy_static! {
        static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
    }
    WHITESPACE_RE
        .replace_all(raw.trim(), "_")
        .to_lowercase()
}

/// Resolve the template selection key for `settings`
///
/// Returns `None` if the peripheral declares no mode key or the mode field is absent or falsy.
/// An explicit mapping always takes precedence over [`fallback_mode_key`].
pub fn resolve_mode(settings: &Settings, mode_key: Option<&ModeKey>) -> Option<String> {
    let mode_key = mode_key?;
    let raw = settings.get(&mode_key.field)?;
    if !raw.is_truthy() {
        return None;
    }
    let raw = raw.key_string();
    Some(
        mode_key
            .mapping
            .get(&raw)
            .cloned()
            .unwrap_or_else(|| fallback_mode_key(&raw)),
    )
}

/// Replace every value that has a value map entry with its register-ready text
///
/// Lookup is by the value's canonical string, so `8` and `"8"` find the same entry. Fields
/// without a matching entry pass through unchanged. `settings` is not modified.
#[must_use]
pub fn apply_value_mapping(settings: &Settings, value_maps: &ValueMaps) -> Settings {
    settings
        .iter()
        .map(|(key, value)| {
            let mapped = value_maps
                .get(key)
                .and_then(|map| map.get(&value.key_string()))
                .map_or_else(|| value.clone(), |s| SettingValue::Text(s.clone()));
            (key, mapped)
        })
        .collect()
}

/// Complete `provided` with defaults and drop fields that are not visible
///
/// For [`FieldScope::Peripheral`] only peripheral-scope fields are defaulted. For
/// [`FieldScope::Pin`] fields of both scopes are, since a pin sees its peripheral's settings.
/// Visibility is evaluated against the defaulted record. Keys that match no field are kept.
#[must_use]
pub fn effective_settings(
    fields: &[ConfigField],
    scope: FieldScope,
    provided: &Settings,
) -> Settings {
    let in_scope = |f: &&ConfigField| scope == FieldScope::Pin || f.scope == FieldScope::Peripheral;

    let mut merged = provided.clone();
    for field in fields.iter().filter(in_scope) {
        if !merged.contains_key(&field.key) {
            merged.insert(&field.key, field.default.clone());
        }
    }

    let hidden = fields
        .iter()
        .filter(in_scope)
        .filter(|f| !f.is_visible(&merged))
        .map(|f| f.key.as_str())
        .collect::<Vec<_>>();
    let mut effective = merged.clone();
    for key in hidden {
        effective.remove(key);
    }
    effective
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldKind;

    fn mode_key(field: &str, mapping: &[(&str, &str)]) -> ModeKey {
        ModeKey {
            field: field.to_owned(),
            mapping: mapping
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
        }
    }

    #[test]
    fn fallback_lowercases_and_joins_whitespace() {
        assert_eq!(fallback_mode_key("Fast PWM"), "fast_pwm");
        assert_eq!(fallback_mode_key("Phase  correct\tPWM"), "phase_correct_pwm");
        assert_eq!(fallback_mode_key("CTC"), "ctc");
    }

    #[test]
    fn no_mode_without_key_or_value() {
        let settings = Settings::new().with("mode", "OUTPUT");
        assert_eq!(resolve_mode(&settings, None), None);
        let key = mode_key("role", &[]);
        assert_eq!(resolve_mode(&settings, Some(&key)), None);
        let settings = Settings::new().with("role", "");
        assert_eq!(resolve_mode(&settings, Some(&key)), None);
    }

    #[test]
    fn explicit_mapping_wins_over_fallback() {
        // `Master` would derive `master` by fallback, which is also mapped for another value
        let key = mode_key("role", &[("Master", "spi_master"), ("Controller", "master")]);
        let settings = Settings::new().with("role", "Master");
        assert_eq!(
            resolve_mode(&settings, Some(&key)).as_deref(),
            Some("spi_master")
        );
        let settings = Settings::new().with("role", "Slave");
        assert_eq!(resolve_mode(&settings, Some(&key)).as_deref(), Some("slave"));
    }

    #[test]
    fn value_mapping_replaces_by_canonical_string_without_mutation() {
        let maps: ValueMaps = [(
            "data_bits".to_owned(),
            [("8".to_owned(), "_BV(UCSZ01) | _BV(UCSZ00)".to_owned())]
                .into_iter()
                .collect(),
        )]
        .into_iter()
        .collect();
        let settings = Settings::new().with("data_bits", 8).with("baud", 9600);
        let before = settings.clone();

        let mapped = apply_value_mapping(&settings, &maps);
        assert_eq!(settings, before);
        assert_eq!(
            mapped.get("data_bits"),
            Some(&SettingValue::from("_BV(UCSZ01) | _BV(UCSZ00)"))
        );
        assert_eq!(mapped.get("baud"), Some(&SettingValue::from(9600)));
    }

    #[test]
    fn effective_settings_fill_defaults_and_hide_irrelevant_fields() {
        let fields = vec![
            ConfigField {
                key: "mode".to_owned(),
                display_name: "Mode".to_owned(),
                kind: FieldKind::Choice(vec!["INPUT".to_owned(), "OUTPUT".to_owned()]),
                scope: FieldScope::Pin,
                default: SettingValue::from("INPUT"),
                visible: None,
            },
            ConfigField {
                key: "level".to_owned(),
                display_name: "Initial level".to_owned(),
                kind: FieldKind::Choice(vec!["LOW".to_owned(), "HIGH".to_owned()]),
                scope: FieldScope::Pin,
                default: SettingValue::from("LOW"),
                visible: Some("mode=OUTPUT".parse().unwrap()),
            },
        ];

        let input = effective_settings(&fields, FieldScope::Pin, &Settings::new());
        assert_eq!(input, Settings::new().with("mode", "INPUT"));

        let provided = Settings::new().with("mode", "OUTPUT");
        let output = effective_settings(&fields, FieldScope::Pin, &provided);
        assert_eq!(output.get("level"), Some(&SettingValue::from("LOW")));

        // Pin fields are not defaulted at peripheral level
        let periph = effective_settings(&fields, FieldScope::Peripheral, &Settings::new());
        assert!(periph.is_empty());
    }
}
