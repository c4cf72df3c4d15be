//! Parse a peripheral schema from its XML representation

use std::{collections::BTreeMap, str::FromStr};

use crate::{
    error::{PositionalError, SchemaError},
    model::{
        ConfigField, ConflictRule, FieldKind, FieldScope, InterruptDescriptor, ModeKey,
        PeripheralDescriptor, PeripheralId, PeripheralKind, PinId, Predicate, RoutineParam,
        RoutineSpec, Schema, SettingValue, Template, TemplateScope, TemplateSet, ValueMaps,
    },
    resolve,
};
use itertools::Itertools;
use log::{debug, info};
use roxmltree::Document;

type Result<T> = std::result::Result<T, PositionalError<SchemaError>>;

struct XmlNode<'a, 'input>(pub roxmltree::Node<'a, 'input>);

trait IntoXmlNode<'a, 'input> {
    fn into_xml_node(self) -> XmlNode<'a, 'input>;
}

impl<'a, 'input> IntoXmlNode<'a, 'input> for roxmltree::Node<'a, 'input> {
    fn into_xml_node(self) -> XmlNode<'a, 'input> {
        XmlNode(self)
    }
}

impl<'a, 'input> XmlNode<'a, 'input> {
    fn tag(&self) -> &str {
        self.0.tag_name().name()
    }

    fn attr(&self, attr: &str) -> Result<&'a str> {
        self.maybe_attr(attr).ok_or_else(|| {
            err_with_pos(
                SchemaError::ExpectedAttribute {
                    elem: self.tag().to_owned(),
                    attr: attr.to_owned(),
                },
                self,
            )
        })
    }

    fn maybe_attr(&self, attr: &str) -> Option<&'a str> {
        self.0.attribute(attr)
    }

    /// Parse attribute `attr` with `FromStr`, reporting the attribute on failure
    fn parse_attr<T: FromStr>(&self, attr: &str) -> Result<T> {
        let value = self.attr(attr)?;
        value.parse().map_err(|_| self.invalid_attr(attr, value))
    }

    fn maybe_parse_attr<T: FromStr>(&self, attr: &str) -> Result<Option<T>> {
        self.maybe_attr(attr)
            .map(|value| value.parse().map_err(|_| self.invalid_attr(attr, value)))
            .transpose()
    }

    fn invalid_attr(&self, attr: &str, value: &str) -> PositionalError<SchemaError> {
        err_with_pos(
            SchemaError::InvalidAttribute {
                attr: attr.to_owned(),
                value: value.to_owned(),
            },
            self,
        )
    }

    /// Text content, empty if the element has none
    fn text(&self) -> &'a str {
        self.0.text().unwrap_or_default().trim()
    }

    fn children(&self) -> impl Iterator<Item = XmlNode<'a, 'input>> {
        self.0
            .children()
            .filter(roxmltree::Node::is_element)
            .map(IntoXmlNode::into_xml_node)
    }

    fn unexpected(&self, child: &XmlNode) -> PositionalError<SchemaError> {
        err_with_pos(
            SchemaError::UnexpectedElement {
                elem: child.tag().to_owned(),
                parent: self.tag().to_owned(),
            },
            child,
        )
    }
}

/// Add text position information to a [`SchemaError`] converting it into a [`PositionalError`]
fn err_with_pos(e: impl Into<SchemaError>, node: &XmlNode) -> PositionalError<SchemaError> {
    e.into()
        .with_byte_pos_range(node.0.range(), node.0.document())
}

/// Parse a whitespace separated pin list, e.g., `PB2 PB3`
fn parse_pins(node: &XmlNode, attr: &str) -> Result<Vec<PinId>> {
    node.attr(attr)?
        .split_whitespace()
        .map(|s| s.parse::<PinId>().map_err(|e| err_with_pos(e, node)))
        .collect()
}

fn parse_bool(node: &XmlNode, attr: &str, default: bool) -> Result<bool> {
    match node.maybe_attr(attr) {
        None => Ok(default),
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(other) => Err(node.invalid_attr(attr, other)),
    }
}

fn parse_predicate(node: &XmlNode, attr: &str) -> Result<Option<Predicate>> {
    node.maybe_attr(attr)
        .map(|src| src.parse::<Predicate>().map_err(|e| err_with_pos(e, node)))
        .transpose()
}

fn parse_template(node: &XmlNode) -> Result<Template> {
    node.text()
        .parse::<Template>()
        .map_err(|e| err_with_pos(e, node))
}

fn process_field(field_node: &XmlNode) -> Result<ConfigField> {
    let key = field_node.attr("key")?.to_owned();
    let kind = match field_node.attr("kind")? {
        "choice" => FieldKind::Choice(
            field_node
                .attr("values")?
                .split('|')
                .map(|v| v.trim().to_owned())
                .collect(),
        ),
        "int" => FieldKind::Int {
            min: field_node.parse_attr("min")?,
            max: field_node.parse_attr("max")?,
        },
        "flag" => FieldKind::Flag,
        other => return Err(field_node.invalid_attr("kind", other)),
    };
    let scope = field_node.parse_attr::<FieldScope>("scope")?;

    let default_text = field_node.attr("default")?;
    let default = match &kind {
        FieldKind::Choice(_) => Some(SettingValue::from(default_text)),
        FieldKind::Int { .. } => default_text.parse::<i64>().ok().map(SettingValue::from),
        FieldKind::Flag => default_text.parse::<bool>().ok().map(SettingValue::from),
    }
    .filter(|v| kind.admits(v))
    .ok_or_else(|| {
        err_with_pos(
            SchemaError::InvalidDefault {
                field: key.clone(),
                default: default_text.to_owned(),
            },
            field_node,
        )
    })?;

    Ok(ConfigField {
        display_name: field_node.maybe_attr("name").unwrap_or(&key).to_owned(),
        key,
        kind,
        scope,
        default,
        visible: parse_predicate(field_node, "visible")?,
    })
}

/// Parse `<map from=".." to=".."/>` children into a lookup table
fn process_mapping(node: &XmlNode) -> Result<BTreeMap<String, String>> {
    node.children()
        .map(|map_node| {
            if map_node.tag() != "map" {
                return Err(node.unexpected(&map_node));
            }
            Ok((
                map_node.attr("from")?.to_owned(),
                map_node.attr("to")?.to_owned(),
            ))
        })
        .collect()
}

fn process_routine(routine_node: &XmlNode) -> Result<RoutineSpec> {
    let params = routine_node
        .children()
        .map(|param_node| {
            if param_node.tag() != "param" {
                return Err(routine_node.unexpected(&param_node));
            }
            Ok(RoutineParam {
                name: param_node.attr("name")?.to_owned(),
                c_type: param_node.attr("type")?.to_owned(),
                field: param_node.attr("field")?.to_owned(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(RoutineSpec {
        name: routine_node.attr("name")?.to_owned(),
        params,
    })
}

fn process_templates(templates_node: &XmlNode) -> Result<TemplateSet> {
    let mut includes = vec![];
    let mut lines = vec![];
    for child in templates_node.children() {
        match child.tag() {
            "include" => includes.push(child.text().to_owned()),
            "line" => lines.push(parse_template(&child)?),
            _ => return Err(templates_node.unexpected(&child)),
        }
    }
    Ok(TemplateSet {
        scope: templates_node.parse_attr::<TemplateScope>("scope")?,
        key: templates_node.attr("key")?.to_owned(),
        when: parse_predicate(templates_node, "when")?,
        routine: templates_node.maybe_attr("routine").map(str::to_owned),
        includes,
        lines,
    })
}

fn process_interrupt(interrupt_node: &XmlNode) -> Result<InterruptDescriptor> {
    let name = interrupt_node.attr("name")?.to_owned();
    let mut description = String::new();
    let mut enable_lines = vec![];
    let mut handler_lines = vec![];
    for child in interrupt_node.children() {
        match child.tag() {
            "description" => description = child.text().to_owned(),
            "enable" => enable_lines.push(parse_template(&child)?),
            "handler" => handler_lines.push(parse_template(&child)?),
            _ => return Err(interrupt_node.unexpected(&child)),
        }
    }
    Ok(InterruptDescriptor {
        label: interrupt_node.maybe_attr("label").unwrap_or(&name).to_owned(),
        name,
        description,
        vector: interrupt_node.attr("vector")?.to_owned(),
        default_enabled: parse_bool(interrupt_node, "default", false)?,
        applies_to: parse_predicate(interrupt_node, "applies")?,
        signal: interrupt_node.maybe_attr("signal").map(str::to_owned),
        enable_lines,
        handler_lines,
    })
}

/// Verify that references within one peripheral resolve and that mode keys are unambiguous
fn check_peripheral(periph: &PeripheralDescriptor, periph_node: &XmlNode) -> Result<()> {
    let undeclared_field = |field: &str| {
        err_with_pos(
            SchemaError::UndeclaredField {
                peripheral: periph.id,
                field: field.to_owned(),
            },
            periph_node,
        )
    };
    let check_field = |field: &str| match periph.field(field) {
        Some(_) => Ok(()),
        None => Err(undeclared_field(field)),
    };

    if periph.kind == PeripheralKind::Global && !periph.pin_mapping.is_empty() {
        return Err(err_with_pos(
            SchemaError::GlobalWithPins(periph.id),
            periph_node,
        ));
    }
    if let Some(pin) = periph.declared_pins().duplicates().next() {
        return Err(err_with_pos(
            SchemaError::DuplicatePin {
                peripheral: periph.id,
                pin: pin.to_string(),
            },
            periph_node,
        ));
    }

    // Every predicate and table must talk about declared fields
    let predicate_keys = periph
        .fields
        .iter()
        .filter_map(|f| f.visible.as_ref())
        .chain(periph.templates.iter().filter_map(|t| t.when.as_ref()))
        .chain(periph.interrupts.iter().filter_map(|i| i.applies_to.as_ref()))
        .flat_map(Predicate::keys);
    for key in predicate_keys
        .chain(periph.value_maps.keys().map(String::as_str))
        .chain(periph.mode_key.iter().map(|m| m.field.as_str()))
        .chain(periph.routine.params.iter().map(|p| p.field.as_str()))
    {
        check_field(key)?;
    }

    for signal in periph.interrupts.iter().filter_map(|i| i.signal.as_deref()) {
        if periph.pins_of(signal).is_empty() {
            return Err(err_with_pos(
                SchemaError::UndeclaredSignal {
                    peripheral: periph.id,
                    signal: signal.to_owned(),
                },
                periph_node,
            ));
        }
    }

    // A value without an explicit mapping must not derive a key that another value maps to
    if let Some(mode_key) = &periph.mode_key {
        if let Some(FieldKind::Choice(values)) = periph.field(&mode_key.field).map(|f| &f.kind) {
            for value in values.iter().filter(|v| !mode_key.mapping.contains_key(*v)) {
                let key = resolve::fallback_mode_key(value);
                if let Some((mapped_from, _)) =
                    mode_key.mapping.iter().find(|(from, to)| **to == key && *from != value)
                {
                    return Err(err_with_pos(
                        SchemaError::ModeKeyCollision {
                            peripheral: periph.id,
                            value: value.clone(),
                            key,
                            mapped_from: mapped_from.clone(),
                        },
                        periph_node,
                    ));
                }
            }
        }
    }

    Ok(())
}

fn process_peripheral(periph_node: &XmlNode) -> Result<PeripheralDescriptor> {
    let id = PeripheralId::parse(periph_node.attr("id")?)
        .map_err(|e| err_with_pos(e, periph_node))?;
    let kind = periph_node.parse_attr::<PeripheralKind>("kind")?;

    let mut pin_mapping = vec![];
    let mut fields = vec![];
    let mut mode_key = None;
    let mut value_maps = ValueMaps::new();
    let mut routine = None;
    let mut interrupts = vec![];
    let mut templates = vec![];
    for child in periph_node.children() {
        match child.tag() {
            "signal" => pin_mapping.push((child.attr("name")?.to_owned(), parse_pins(&child, "pins")?)),
            "field" => fields.push(process_field(&child)?),
            "mode" => {
                mode_key = Some(ModeKey {
                    field: child.attr("field")?.to_owned(),
                    mapping: process_mapping(&child)?,
                });
            }
            "values" => {
                value_maps.insert(child.attr("field")?.to_owned(), process_mapping(&child)?);
            }
            "routine" => routine = Some(process_routine(&child)?),
            "interrupt" => interrupts.push(process_interrupt(&child)?),
            "templates" => templates.push(process_templates(&child)?),
            _ => return Err(periph_node.unexpected(&child)),
        }
    }

    let periph = PeripheralDescriptor {
        id,
        name: periph_node
            .maybe_attr("name")
            .map_or_else(|| id.to_string(), str::to_owned),
        kind,
        requires_all_pins: parse_bool(periph_node, "all-pins", false)?,
        pin_mapping,
        fields,
        mode_key,
        value_maps,
        routine: routine.unwrap_or_else(|| RoutineSpec::plain(&format!("{id}_init"))),
        interrupts,
        templates,
    };
    check_peripheral(&periph, periph_node)?;
    debug!(
        "Parsed peripheral {id}: {} pins, {} fields, {} template sets, {} interrupts",
        periph.declared_pins().count(),
        periph.fields.len(),
        periph.templates.len(),
        periph.interrupts.len()
    );
    Ok(periph)
}

fn process_conflicts(conflicts_node: &XmlNode) -> Result<Vec<ConflictRule>> {
    conflicts_node
        .children()
        .map(|rule_node| {
            if rule_node.tag() != "rule" {
                return Err(conflicts_node.unexpected(&rule_node));
            }
            let parse_id =
                |s: &str| PeripheralId::parse(s).map_err(|e| err_with_pos(e, &rule_node));
            Ok(ConflictRule {
                reserved_pins: parse_pins(&rule_node, "pins")?,
                trigger: parse_id(rule_node.attr("trigger")?)?,
                conflicting: rule_node
                    .maybe_attr("with")
                    .unwrap_or_default()
                    .split_whitespace()
                    .map(parse_id)
                    .collect::<Result<Vec<_>>>()?,
                message: rule_node.attr("message")?.to_owned(),
            })
        })
        .collect()
}

fn process_device(device_node: &XmlNode) -> Result<Schema> {
    let mut peripherals: Vec<PeripheralDescriptor> = vec![];
    let mut conflicts = vec![];
    for child in device_node.children() {
        match child.tag() {
            "peripheral" => {
                let periph = process_peripheral(&child)?;
                if peripherals.iter().any(|p| p.id == periph.id) {
                    return Err(err_with_pos(
                        SchemaError::DuplicatePeripheral(periph.id),
                        &child,
                    ));
                }
                peripherals.push(periph);
            }
            "conflicts" => conflicts.extend(process_conflicts(&child)?),
            _ => return Err(device_node.unexpected(&child)),
        }
    }
    Ok(Schema {
        device: device_node.attr("name")?.to_owned(),
        default_clock_hz: device_node.maybe_parse_attr("clock")?,
        peripherals,
        conflicts,
    })
}

/// Parse a peripheral schema from XML text
pub(crate) fn parse_schema(text: &str) -> Result<Schema> {
    let parsed = Document::parse(text)?;
    let root = parsed.root_element().into_xml_node();
    if root.tag() != "device" {
        return Err(err_with_pos(
            SchemaError::UnexpectedRoot(root.tag().to_owned()),
            &root,
        ));
    }
    let schema = process_device(&root)?;
    info!(
        "Found {} peripherals and {} conflict rules for {}",
        schema.peripherals.len(),
        schema.conflicts.len(),
        schema.device
    );
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn wrap(peripheral: &str) -> String {
        format!("<device name=\"test\">{peripheral}</device>")
    }

    #[test]
    fn parses_minimal_peripheral() {
        let schema = parse_schema(&wrap(indoc! {r#"
            <peripheral id="gpio" kind="pin-bound">
              <signal name="GPIO" pins="PB0 PB1"/>
              <field key="mode" kind="choice" scope="pin" default="INPUT" values="INPUT|OUTPUT"/>
              <templates scope="pin" key="output">
                <line>{{ddr_reg}} |= _BV({{ddr_bit}});</line>
              </templates>
            </peripheral>
        "#}))
        .unwrap();

        assert_eq!(schema.device(), "test");
        assert_eq!(schema.default_clock_hz(), None);
        let gpio = schema.peripheral(PeripheralId::Gpio).unwrap();
        assert_eq!(gpio.declared_pins().count(), 2);
        assert_eq!(gpio.routine.name, "gpio_init");
        assert_eq!(gpio.templates[0].lines[0].params().count(), 2);
    }

    #[test]
    fn unterminated_placeholder_is_a_load_error_with_position() {
        let err = parse_schema(&wrap(indoc! {r#"
            <peripheral id="gpio" kind="pin-bound">
              <templates scope="pin" key="output">
                <line>{{ddr_reg |= 1;</line>
              </templates>
            </peripheral>
        "#}))
        .unwrap_err();
        assert!(matches!(err.inner(), SchemaError::Template(_)));
        assert!(matches!(err.position(), crate::error::Position::Line { line: 3, .. }));
    }

    #[test]
    fn mode_key_fallback_collision_is_rejected() {
        // `Fast` falls back to `fast`, which is explicitly mapped from `Quick`
        let err = parse_schema(&wrap(indoc! {r#"
            <peripheral id="timer0" kind="pin-bound">
              <field key="mode" kind="choice" scope="peripheral" default="Fast" values="Fast|Quick"/>
              <mode field="mode"><map from="Quick" to="fast"/></mode>
            </peripheral>
        "#}))
        .unwrap_err();
        assert_eq!(
            err.inner(),
            &SchemaError::ModeKeyCollision {
                peripheral: PeripheralId::Timer0,
                value: "Fast".to_owned(),
                key: "fast".to_owned(),
                mapped_from: "Quick".to_owned(),
            }
        );
    }

    #[test]
    fn references_to_undeclared_fields_are_rejected() {
        let err = parse_schema(&wrap(indoc! {r#"
            <peripheral id="uart" kind="pin-bound">
              <routine name="uart_init"><param name="baud" type="uint32_t" field="baud"/></routine>
            </peripheral>
        "#}))
        .unwrap_err();
        assert!(matches!(err.inner(), SchemaError::UndeclaredField { .. }));
    }

    #[test]
    fn invalid_defaults_and_ids_are_rejected() {
        let err = parse_schema(&wrap(
            r#"<peripheral id="gpio" kind="pin-bound"><field key="level" kind="choice" scope="pin" default="MAYBE" values="LOW|HIGH"/></peripheral>"#,
        ))
        .unwrap_err();
        assert!(matches!(err.inner(), SchemaError::InvalidDefault { .. }));

        let err = parse_schema(&wrap(r#"<peripheral id="usb" kind="global"/>"#)).unwrap_err();
        assert!(matches!(err.inner(), SchemaError::UnknownPeripheral(_)));

        let err = parse_schema(&wrap(
            r#"<peripheral id="wdt" kind="global"><signal name="X" pins="PB0"/></peripheral>"#,
        ))
        .unwrap_err();
        assert_eq!(err.inner(), &SchemaError::GlobalWithPins(PeripheralId::Watchdog));

        let err = parse_schema(&wrap(
            r#"<peripheral id="gpio" kind="pin-bound"><signal name="X" pins="PB0 PA9"/></peripheral>"#,
        ))
        .unwrap_err();
        assert!(matches!(err.inner(), SchemaError::InvalidPin(_)));
    }

    #[test]
    fn wrong_root_and_malformed_xml_are_rejected() {
        let err = parse_schema("<svd/>").unwrap_err();
        assert_eq!(err.inner(), &SchemaError::UnexpectedRoot("svd".to_owned()));
        let err = parse_schema("<device").unwrap_err();
        assert!(matches!(err.inner(), SchemaError::Xml(_)));
    }
}
