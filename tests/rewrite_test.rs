//! End-to-end rewrite tests over fixture EPUBs.

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tomecat::{
    Cancellation, Error, RewriteOptions, RewriteRule, RewriteScope, Rewriter, Volume,
};

use common::{EpubBuilder, read_entry};

const BODY: &str = r#"<p class="keep">Chapter text</p>
<p class="change">Chapter text</p>
<script type="text/javascript">var Chapter = 1;</script>"#;

fn book(dir: &Path, title: &str) -> PathBuf {
    let path = dir.join("book.epub");
    EpubBuilder::new(title)
        .creator("Foo Writer")
        .chapter("c1", "Opening", BODY)
        .write(&path);
    path
}

fn chapter(path: &Path) -> String {
    read_entry(path, "OEBPS/Text/c1.xhtml")
}

// ============================================================================
// Body scope
// ============================================================================

#[test]
fn test_body_rewrite_in_place() {
    let dir = TempDir::new().unwrap();
    let input = book(dir.path(), "Old Title");

    let stats = Rewriter::new(RewriteOptions::new(vec![RewriteRule::new("Chapter", "Section")]))
        .rewrite(&input)
        .expect("rewrite failed");
    assert_eq!(stats.matches, 2);
    assert_eq!(stats.files_changed, 1);
    assert_eq!(stats.files[0].path, "OEBPS/Text/c1.xhtml");
    assert_eq!(stats.output.as_deref(), Some(input.as_path()));

    let text = chapter(&input);
    assert!(text.contains(r#"<p class="keep">Section text</p>"#));
    assert!(text.contains(r#"<p class="change">Section text</p>"#));
    assert!(text.contains("var Chapter = 1;"));
    assert!(text.contains(r#"<link rel="stylesheet" href="../Styles/style.css"/>"#));

    // Still a loadable book with the same package.
    let volume = Volume::load(0, &input, &Cancellation::new()).unwrap();
    assert_eq!(volume.display_name, "Old Title");
    assert_eq!(volume.nav.len(), 1);
}

#[test]
fn test_body_rewrite_with_selector() {
    let dir = TempDir::new().unwrap();
    let input = book(dir.path(), "Old Title");

    let rule = RewriteRule::new("Chapter", "Section").with_selector("p.change");
    let stats = Rewriter::new(RewriteOptions::new(vec![rule]))
        .rewrite(&input)
        .unwrap();
    assert_eq!(stats.matches, 1);

    let text = chapter(&input);
    assert!(text.contains(r#"<p class="keep">Chapter text</p>"#));
    assert!(text.contains(r#"<p class="change">Section text</p>"#));
}

#[test]
fn test_body_rewrite_skips_nav_document() {
    let dir = TempDir::new().unwrap();
    let input = book(dir.path(), "Old Title");

    Rewriter::new(RewriteOptions::new(vec![RewriteRule::new("Opening", "Prologue")]))
        .rewrite(&input)
        .unwrap();

    assert!(chapter(&input).contains("<h1>Prologue</h1>"));
    assert!(read_entry(&input, "OEBPS/nav.xhtml").contains(">Opening</a>"));
}

#[test]
fn test_dry_run_reports_without_writing() {
    let dir = TempDir::new().unwrap();
    let input = book(dir.path(), "Old Title");
    let before = fs::read(&input).unwrap();
    let rules = vec![RewriteRule::new("Chapter", "Section")];

    let dry = Rewriter::new(RewriteOptions::new(rules.clone()).with_dry_run(true))
        .rewrite(&input)
        .unwrap();
    assert_eq!(fs::read(&input).unwrap(), before);
    assert!(dry.output.is_none());

    let copy = dir.path().join("copy.epub");
    fs::copy(&input, &copy).unwrap();
    let real = Rewriter::new(RewriteOptions::new(rules)).rewrite(&copy).unwrap();
    assert_eq!(dry.matches, real.matches);
    assert_eq!(dry.files_changed, real.files_changed);
    assert_eq!(dry.files, real.files);
}

#[test]
fn test_output_path_leaves_source() {
    let dir = TempDir::new().unwrap();
    let input = book(dir.path(), "Old Title");
    let before = fs::read(&input).unwrap();
    let out = dir.path().join("out/fixed.epub");

    let options = RewriteOptions::new(vec![RewriteRule::new("Chapter", "Section")])
        .with_out_path(&out);
    let stats = Rewriter::new(options).rewrite(&input).unwrap();

    assert_eq!(stats.output.as_deref(), Some(out.as_path()));
    assert_eq!(fs::read(&input).unwrap(), before);
    assert!(chapter(&out).contains("Section text"));
}

#[test]
fn test_no_match_leaves_source_untouched() {
    let dir = TempDir::new().unwrap();
    let input = book(dir.path(), "Old Title");
    let before = fs::read(&input).unwrap();

    let stats = Rewriter::new(RewriteOptions::new(vec![RewriteRule::new("absent", "x")]))
        .rewrite(&input)
        .unwrap();
    assert_eq!(stats.matches, 0);
    assert!(stats.files.is_empty());
    assert!(stats.output.is_none());
    assert_eq!(fs::read(&input).unwrap(), before);
}

// ============================================================================
// Meta scope
// ============================================================================

#[test]
fn test_meta_rewrite() {
    let dir = TempDir::new().unwrap();
    let input = book(dir.path(), "Foo Title");

    let options = RewriteOptions::new(vec![RewriteRule::new("Foo", "Bar")])
        .with_scope(RewriteScope::Meta);
    let stats = Rewriter::new(options).rewrite(&input).unwrap();
    assert_eq!(stats.matches, 2);
    assert_eq!(stats.files_changed, 1);
    assert_eq!(stats.files[0].path, "OEBPS/content.opf");

    let volume = Volume::load(0, &input, &Cancellation::new()).unwrap();
    let meta = &volume.package.metadata;
    assert_eq!(meta.first_title(), Some("Bar Title"));
    assert_eq!(meta.creators[0].value, "Bar Writer");
    // Identifiers are not text fields.
    assert_eq!(volume.package.unique_identifier_value(), Some("urn:test:Foo Title"));
    // Content documents are left alone.
    assert!(chapter(&input).contains("Chapter text"));
}

#[test]
fn test_meta_rewrite_ignores_selector_rules() {
    let dir = TempDir::new().unwrap();
    let input = book(dir.path(), "Foo Title");
    let before = fs::read(&input).unwrap();

    let rule = RewriteRule::new("Foo", "Bar").with_selector("p.note");
    let options = RewriteOptions::new(vec![rule]).with_scope(RewriteScope::Meta);
    let stats = Rewriter::new(options).rewrite(&input).unwrap();

    assert_eq!(stats.matches, 0);
    assert_eq!(stats.files_changed, 0);
    assert_eq!(fs::read(&input).unwrap(), before);

    let volume = Volume::load(0, &input, &Cancellation::new()).unwrap();
    assert_eq!(volume.package.metadata.first_title(), Some("Foo Title"));
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_invalid_rules_rejected_before_work() {
    let missing = Path::new("/no/such/book.epub");

    let err = Rewriter::new(RewriteOptions::new(vec![RewriteRule::new("", "x")]))
        .rewrite(missing)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRule(_)));

    let rule = RewriteRule::new("a", "b").with_selector("div >");
    let err = Rewriter::new(RewriteOptions::new(vec![rule]))
        .rewrite(missing)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRule(_)));

    let err = Rewriter::new(RewriteOptions::new(Vec::new()))
        .rewrite(missing)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRule(_)));
}

#[test]
fn test_malformed_content_fails() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("broken.epub");
    EpubBuilder::new("Broken")
        .chapter("c1", "Bad", "<p>Chapter <b>unclosed</p>")
        .write(&input);
    let before = fs::read(&input).unwrap();

    let err = Rewriter::new(RewriteOptions::new(vec![RewriteRule::new("Chapter", "x")]))
        .rewrite(&input)
        .unwrap_err();
    match err {
        Error::Volume { source, .. } => match *source {
            Error::Markup { path, .. } => assert_eq!(path, "OEBPS/Text/c1.xhtml"),
            other => panic!("unexpected error {other:?}"),
        },
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(fs::read(&input).unwrap(), before);
}
