//! Physical pins of the target and the register symbols derived from them

use std::{cmp, fmt, hash, str};

use lazy_static::lazy_static;
use regex::Regex;
use strum::{Display, EnumIter, EnumString};
use thiserror::Error;

/// I/O port of the target
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, EnumIter)]
pub enum Port {
    B,
    C,
    D,
}

impl Port {
    /// Number of the first `PCINTn` line of this port
    pub const fn pcint_base(self) -> u8 {
        match self {
            Self::B => 0,
            Self::C => 8,
            Self::D => 16,
        }
    }

    /// The pin-change interrupt group sharing one enable bit and one vector
    pub const fn group(self) -> PortGroup {
        match self {
            Self::B => PortGroup(0),
            Self::C => PortGroup(1),
            Self::D => PortGroup(2),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid pin identifier {0:?}, expected `P<port><bit>` with port B, C or D, e.g. `PB5`")]
pub struct InvalidPinError(pub String);

/// A physical pin, e.g., `PB5`
///
/// The identifier decomposes into a port letter and a bit index. Pins order by port first, then
/// by bit.
#[derive(Clone, Debug)]
pub struct PinId {
    name: String,
    port: Port,
    bit: u8,
}

impl PinId {
    pub fn port(&self) -> Port {
        self.port
    }

    pub fn bit(&self) -> u8 {
        self.bit
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Number of the `PCINTn` line wired to this pin
    pub fn pcint_number(&self) -> u8 {
        self.port.pcint_base() + self.bit
    }

    pub fn group(&self) -> PortGroup {
        self.port.group()
    }

    /// Register and bit symbols for this pin, as named by `<avr/io.h>`
    ///
    /// For `PB5` this yields e.g. `ddr_reg = DDRB`, `ddr_bit = DDB5`, `port_bit = PORTB5`.
    pub fn symbols(&self) -> Vec<(&'static str, String)> {
        let (p, b) = (self.port, self.bit);
        vec![
            ("pin", self.name.clone()),
            ("port", p.to_string()),
            ("bit", b.to_string()),
            ("ddr_reg", format!("DDR{p}")),
            ("port_reg", format!("PORT{p}")),
            ("pin_reg", format!("PIN{p}")),
            ("ddr_bit", format!("DD{p}{b}")),
            ("port_bit", format!("PORT{p}{b}")),
            ("pin_bit", format!("PIN{p}{b}")),
            ("pcint", format!("PCINT{}", self.pcint_number())),
        ]
    }
}

impl str::FromStr for PinId {
    type Err = InvalidPinError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        lazy_static! {
            static ref PIN_RE: Regex = Regex::new(r"^P([BCD])([0-7])$").unwrap();
        }
        let captures = PIN_RE
            .captures(s)
            .ok_or_else(|| InvalidPinError(s.to_owned()))?;
        // Unwrap: the regex admits only valid port letters and bit indices
        let port = captures[1].parse::<Port>().unwrap();
        let bit = captures[2].parse::<u8>().unwrap();
        Ok(Self {
            name: s.to_owned(),
            port,
            bit,
        })
    }
}

impl PartialEq for PinId {
    fn eq(&self, other: &Self) -> bool {
        (self.port, self.bit) == (other.port, other.bit)
    }
}

impl Eq for PinId {}

impl hash::Hash for PinId {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        (self.port, self.bit).hash(state);
    }
}

impl PartialOrd for PinId {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PinId {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        (self.port, self.bit).cmp(&(other.port, other.bit))
    }
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Hardware grouping of pins sharing one pin-change interrupt enable bit and vector
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PortGroup(u8);

impl PortGroup {
    pub const fn index(self) -> u8 {
        self.0
    }

    /// The port whose pins form this group
    pub const fn port(self) -> Port {
        match self.0 {
            0 => Port::B,
            1 => Port::C,
            _ => Port::D,
        }
    }

    /// Bit in `PCICR`, e.g., `PCIE0`
    pub fn enable_bit(self) -> String {
        format!("PCIE{}", self.0)
    }

    /// Mask register, e.g., `PCMSK0`
    pub fn mask_reg(self) -> String {
        format!("PCMSK{}", self.0)
    }

    /// Interrupt vector, e.g., `PCINT0_vect`
    pub fn vector(self) -> String {
        format!("PCINT{}_vect", self.0)
    }
}

impl fmt::Display for PortGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PCINT group {} (port {})", self.0, self.port())
    }
}

#[test]
fn pin_id_decomposes() {
    let pin: PinId = "PB5".parse().unwrap();
    assert_eq!(pin.port(), Port::B);
    assert_eq!(pin.bit(), 5);
    assert_eq!(pin.pcint_number(), 5);
    assert_eq!(pin.group(), PortGroup(0));

    let pin: PinId = "PD3".parse().unwrap();
    assert_eq!(pin.pcint_number(), 19);
    assert_eq!(pin.group().vector(), "PCINT2_vect");
    assert_eq!(pin.group().mask_reg(), "PCMSK2");

    assert!("PA0".parse::<PinId>().is_err());
    assert!("PB8".parse::<PinId>().is_err());
    assert!("pb5".parse::<PinId>().is_err());
    assert!("PB5 ".parse::<PinId>().is_err());
}

#[test]
fn pin_symbols_follow_avr_libc_naming() {
    let pin: PinId = "PC4".parse().unwrap();
    let symbols = pin.symbols();
    let get = |key: &str| {
        symbols
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
            .unwrap()
    };
    assert_eq!(get("ddr_reg"), "DDRC");
    assert_eq!(get("ddr_bit"), "DDC4");
    assert_eq!(get("port_bit"), "PORTC4");
    assert_eq!(get("pin_bit"), "PINC4");
    assert_eq!(get("pcint"), "PCINT12");
}

#[test]
fn pins_order_by_port_then_bit() {
    let mut pins: Vec<PinId> = ["PD0", "PB7", "PC1", "PB0"]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();
    pins.sort();
    let names: Vec<&str> = pins.iter().map(PinId::as_str).collect();
    assert_eq!(names, ["PB0", "PB7", "PC1", "PD0"]);
}
