//! Scoped find/replace over the content or metadata of one EPUB.
//!
//! Rules are compiled once, then applied either to every XHTML/HTML content
//! document in the manifest ([`RewriteScope::Body`]) or to the Dublin Core
//! text fields of the package document ([`RewriteScope::Meta`]). The archive
//! is repackaged only when something changed and the run is not a dry run.

mod metadata;
mod rules;

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

pub use metadata::rewrite_metadata;
pub use rules::{CompiledRule, RewriteRule, compile_rules};

use crate::cancel::Cancellation;
use crate::dom::{ArenaDom, ArenaNodeId, Flavor, parse_html, parse_xhtml, serialize};
use crate::epub::{MIMETYPE, ManifestItem, Volume, write_epub_file};
use crate::error::{Error, Result};
use crate::util::{has_property, href_to_path, read_text_file};

/// Which part of the book the rules apply to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum, serde::Serialize))]
#[cfg_attr(feature = "cli", serde(rename_all = "lowercase"))]
pub enum RewriteScope {
    /// Text of the content documents.
    #[default]
    Body,
    /// Dublin Core text fields of the package document.
    Meta,
}

/// Options for a rewrite run.
#[derive(Debug, Clone, Default)]
pub struct RewriteOptions {
    pub scope: RewriteScope,
    pub rules: Vec<RewriteRule>,
    /// Count matches without writing anything.
    pub dry_run: bool,
    /// Defaults to rewriting the source in place.
    pub out_path: Option<PathBuf>,
}

impl RewriteOptions {
    pub fn new(rules: Vec<RewriteRule>) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }

    pub fn with_scope(mut self, scope: RewriteScope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_out_path(mut self, out_path: impl Into<PathBuf>) -> Self {
        self.out_path = Some(out_path.into());
        self
    }
}

/// Per-file result.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct FileRewrite {
    /// Path inside the archive.
    pub path: String,
    pub matches: usize,
    pub changed: bool,
}

/// What a rewrite run found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct RewriteStats {
    pub matches: usize,
    pub files_changed: usize,
    /// Files with at least one match, in manifest order.
    pub files: Vec<FileRewrite>,
    /// Archive written, if any.
    pub output: Option<PathBuf>,
}

impl RewriteStats {
    fn record(&mut self, path: String, matches: usize, changed: bool) {
        if matches == 0 {
            return;
        }
        self.matches += matches;
        if changed {
            self.files_changed += 1;
        }
        self.files.push(FileRewrite {
            path,
            matches,
            changed,
        });
    }
}

/// Markup after rule application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewrittenMarkup {
    pub matches: usize,
    /// Serialized document, present only when some text changed.
    pub output: Option<String>,
}

/// Applies rewrite rules to one EPUB.
///
/// # Example
///
/// ```no_run
/// use tomecat::{RewriteOptions, RewriteRule, Rewriter};
///
/// let options = RewriteOptions::new(vec![RewriteRule::new("Chapter", "Section")])
///     .with_dry_run(true);
/// let stats = Rewriter::new(options).rewrite("book.epub")?;
/// println!("{} matches", stats.matches);
/// # Ok::<(), tomecat::Error>(())
/// ```
pub struct Rewriter {
    options: RewriteOptions,
    cancel: Cancellation,
}

impl Rewriter {
    pub fn new(options: RewriteOptions) -> Self {
        Self {
            options,
            cancel: Cancellation::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: Cancellation) -> Self {
        self.cancel = cancel;
        self
    }

    /// Rewrite `source`, writing the result to the configured output path.
    pub fn rewrite(&self, source: impl AsRef<Path>) -> Result<RewriteStats> {
        let source = source.as_ref();
        if self.options.rules.is_empty() {
            return Err(Error::InvalidRule("no rules given".into()));
        }
        let rules = compile_rules(&self.options.rules)?;

        let volume = Volume::load(0, source, &self.cancel)?;
        let write = !self.options.dry_run;

        let mut stats = match self.options.scope {
            RewriteScope::Body => rewrite_body(&volume, &rules, write, &self.cancel),
            RewriteScope::Meta => rewrite_package(&volume, &rules, write),
        }
        .map_err(|e| e.for_source(source))?;

        let out = self.options.out_path.as_deref().unwrap_or(source);
        if write && (stats.files_changed > 0 || out != source) {
            let mimetype = volume.root().join("mimetype");
            if !mimetype.is_file() {
                fs::write(&mimetype, MIMETYPE)?;
            }
            self.cancel.check()?;
            write_epub_file(volume.root(), out, &self.cancel)?;
            stats.output = Some(out.to_path_buf());
        }

        tracing::info!(
            source = %source.display(),
            matches = stats.matches,
            files_changed = stats.files_changed,
            dry_run = self.options.dry_run,
            "rewrite finished"
        );
        Ok(stats)
    }
}

fn is_markup(item: &ManifestItem) -> Option<Flavor> {
    match item.media_type.trim().to_ascii_lowercase().as_str() {
        "application/xhtml+xml" => Some(Flavor::Xml),
        "text/html" => Some(Flavor::Html),
        _ => None,
    }
}

/// Archive-relative path of a manifest href.
fn archive_path(volume: &Volume, href: &str) -> String {
    match volume.package_rel.rsplit_once('/') {
        Some((dir, _)) => href_to_path(&format!("{dir}/{href}")),
        None => href_to_path(href),
    }
}

fn rewrite_body(
    volume: &Volume,
    rules: &[CompiledRule],
    write: bool,
    cancel: &Cancellation,
) -> Result<RewriteStats> {
    let mut stats = RewriteStats::default();

    for item in &volume.package.manifest.items {
        if has_property(&item.properties, "nav") {
            continue;
        }
        let Some(flavor) = is_markup(item) else {
            continue;
        };
        cancel.check()?;

        let path = volume.resolve_href(&item.href);
        let rel = archive_path(volume, &item.href);
        if !path.is_file() {
            tracing::warn!(href = %item.href, "manifest item missing from archive");
            continue;
        }

        let content = read_text_file(&path)?;
        let rewritten = rewrite_markup(&content, flavor, rules).map_err(|e| Error::Markup {
            path: rel.clone(),
            message: e.to_string(),
        })?;

        if write && let Some(output) = &rewritten.output {
            fs::write(&path, output)?;
        }
        tracing::debug!(path = %rel, matches = rewritten.matches, "rewrote content document");
        stats.record(rel, rewritten.matches, rewritten.output.is_some());
    }

    Ok(stats)
}

fn rewrite_package(volume: &Volume, rules: &[CompiledRule], write: bool) -> Result<RewriteStats> {
    let mut stats = RewriteStats::default();
    let path = volume.root().join(&volume.package_rel);
    let content = read_text_file(&path)?;

    let (output, matches) = rewrite_metadata(&content, rules)?;
    if write && let Some(output) = &output {
        fs::write(&path, output)?;
    }
    stats.record(volume.package_rel.clone(), matches, output.is_some());
    Ok(stats)
}

/// Apply `rules` to every text node of a content document.
///
/// Text inside `script` and `style` is never touched. A rule with selectors
/// only sees text that has a matching element among its ancestors.
pub fn rewrite_markup(content: &str, flavor: Flavor, rules: &[CompiledRule]) -> Result<RewrittenMarkup> {
    let mut dom = match flavor {
        Flavor::Xml => parse_xhtml(content)?,
        Flavor::Html => parse_html(content),
    };

    let (matches, changed) = rewrite_dom(&mut dom, rules);
    Ok(RewrittenMarkup {
        matches,
        output: changed.then(|| serialize(&dom, flavor)),
    })
}

fn rewrite_dom(dom: &mut ArenaDom, rules: &[CompiledRule]) -> (usize, bool) {
    let scopes: Vec<Option<HashSet<ArenaNodeId>>> = rules
        .iter()
        .map(|rule| rule.has_selectors().then(|| rule.matching_elements(dom)))
        .collect();

    let texts: Vec<ArenaNodeId> = dom
        .descendants(dom.document())
        .filter(|&id| dom.is_text(id) && !in_raw_text(dom, id))
        .collect();

    let mut total = 0;
    let mut changed = false;
    for id in texts {
        let Some(original) = dom.text_content(id) else {
            continue;
        };
        let mut text = original.to_string();
        let mut matches = 0;

        for (rule, scope) in rules.iter().zip(&scopes) {
            if let Some(scope) = scope
                && !dom.ancestors(id).any(|a| scope.contains(&a))
            {
                continue;
            }
            if let Some((out, n)) = rule.apply(&text) {
                text = out;
                matches += n;
            }
        }

        if matches > 0 {
            total += matches;
            if dom.text_content(id) != Some(text.as_str()) {
                changed = true;
                dom.set_text(id, text);
            }
        }
    }

    (total, changed)
}

fn in_raw_text(dom: &ArenaDom, id: ArenaNodeId) -> bool {
    dom.ancestors(id).any(|a| {
        dom.element_name(a)
            .is_some_and(|name| matches!(name.as_ref(), "script" | "style"))
    })
}
