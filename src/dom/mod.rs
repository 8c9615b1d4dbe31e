//! Addressable markup tree for content documents.
//!
//! - [`arena`]: index-linked node storage
//! - [`xml_builder`]: XHTML via quick-xml
//! - [`tree_sink`]: `text/html` via html5ever
//! - [`element_ref`]: CSS selector matching
//! - [`serialize`]: markup output

pub mod arena;
pub mod element_ref;
pub mod serialize;
pub mod tree_sink;
pub mod xml_builder;

pub use arena::{ArenaDom, ArenaNode, ArenaNodeData, ArenaNodeId, Attribute};
pub use element_ref::{ElementRef, MarkupSelectors, matches, parse_selector};
pub use serialize::{Flavor, serialize};
pub use tree_sink::{ArenaSink, parse_html};
pub use xml_builder::parse_xhtml;
