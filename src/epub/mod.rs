//! EPUB container model: package documents, container.xml, navigation,
//! extracted volumes and archive packaging.

pub mod archive;
pub mod container;
pub mod nav;
pub mod package;
pub mod volume;

pub use archive::{write_epub_file, write_epub_tree};
pub use container::{CONTAINER_XML, MIMETYPE, parse_container};
pub use nav::{NavItem, parse_nav, render_nav_document};
pub use package::{
    DcValue, ItemRef, Manifest, ManifestItem, MetaNode, Metadata, PackageDocument, Spine,
    parse_package,
};
pub use volume::Volume;
