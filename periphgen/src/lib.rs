//! periphgen --- Generate register-level C initialization code and interrupt handler stubs for
//! AVR-8 peripherals from a declarative peripheral schema and a configuration snapshot.
//!
//! ```no_run
//! use periphgen::{ConfigurationSnapshot, GenerateConfig, Schema};
//!
//! let schema = Schema::builtin()?;
//! let snapshot = ConfigurationSnapshot::from_json_str(
//!     r#"{ "gpio": { "pins": { "PB5": { "mode": "OUTPUT", "level": "HIGH" } } } }"#,
//! )?;
//! for diagnostic in periphgen::check(&schema, &snapshot) {
//!     eprintln!("{diagnostic}");
//! }
//! let artifact = periphgen::generate(&schema, &snapshot, &GenerateConfig::new())?;
//! print!("{}", artifact.implementation());
//! # Ok::<(), periphgen::ApiError>(())
//! ```

// Export full API at crate root
pub use api::*;

mod analysis;
mod api;
mod codegen;
mod error;
mod frontend;
mod model;
mod resolve;
mod util;
