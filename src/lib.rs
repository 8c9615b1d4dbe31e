//! # tomecat
//!
//! Merge several EPUB volumes into one omnibus book, and rewrite EPUB content
//! with scoped find/replace rules.
//!
//! ## Features
//!
//! - Merge N≥2 EPUBs: every volume's payload lands under
//!   `OEBPS/Volumes/vNNNN/`, manifest ids are namespaced per volume, and a
//!   fresh package and navigation document are synthesized
//! - Rewrite text in content documents, optionally scoped with CSS selectors
//!   such as `p.note` or `div.aside > p`
//! - Rewrite Dublin Core metadata text
//! - Atomic output: the destination only appears once the archive is complete
//!
//! ## Quick Start
//!
//! ```no_run
//! use tomecat::{MergeOptions, Merger, RewriteOptions, RewriteRule, RewriteScope, Rewriter};
//!
//! // Merge two volumes
//! let options = MergeOptions::new("omnibus.epub").with_title("The Complete Saga");
//! Merger::new(options).merge(&["vol1.epub", "vol2.epub"])?;
//!
//! // Fix a typo in every chapter of the result
//! let rule = RewriteRule::new("Chapter", "Section").with_selector("h1");
//! let stats = Rewriter::new(RewriteOptions::new(vec![rule]).with_scope(RewriteScope::Body))
//!     .rewrite("omnibus.epub")?;
//! println!("{} matches in {} files", stats.matches, stats.files_changed);
//! # Ok::<(), tomecat::Error>(())
//! ```
//!
//! ## Cancellation
//!
//! Both [`Merger`] and [`Rewriter`] accept a [`Cancellation`] token. Once it is
//! cancelled the run stops at the next check, removes its temporary
//! directories and returns [`Error::Cancelled`].

pub mod cancel;
pub mod dom;
pub mod epub;
pub mod error;
pub mod merge;
pub mod rewrite;
pub mod sources;
pub(crate) mod util;

pub use cancel::Cancellation;
pub use epub::{NavItem, PackageDocument, Volume};
pub use error::{Error, Result};
pub use merge::{MergeOptions, MergeSummary, Merger};
pub use rewrite::{
    FileRewrite, RewriteOptions, RewriteRule, RewriteScope, RewriteStats, Rewriter, compile_rules,
};
pub use sources::{expand_directories, expand_list_files};
pub use util::{join_href, normalize_epub_path};
