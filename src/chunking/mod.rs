pub mod javascript;
pub mod languages;
pub mod python;
pub mod rust;
pub mod spans;
pub mod typescript;
pub mod types;

pub use languages::{Span, TSLanguageConfig, TSLanguageParsing};
