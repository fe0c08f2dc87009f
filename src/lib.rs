// menuscan - dish names from photographed and scanned menus
pub mod config;
pub mod menu_extraction;
pub mod types;

pub use config::MenuscanConfig;
pub use menu_extraction::{DocumentKind, ExtractionConfig, MenuExtractor, TesseractEngine};
pub use types::{ConfigError, ExtractionError, RecognitionError};
