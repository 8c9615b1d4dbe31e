//! Find/replace rules and their compiled form.

use std::collections::HashSet;

use memchr::memmem;
use selectors::parser::Selector;

use crate::dom::{ArenaDom, ArenaNodeId, MarkupSelectors, matches, parse_selector};
use crate::error::{Error, Result};

/// A literal find/replace rule, optionally limited to elements matching one
/// of `selectors`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize, serde::Deserialize))]
pub struct RewriteRule {
    pub find: String,
    #[cfg_attr(feature = "cli", serde(default))]
    pub replace: String,
    #[cfg_attr(feature = "cli", serde(default, skip_serializing_if = "Vec::is_empty"))]
    pub selectors: Vec<String>,
}

impl RewriteRule {
    pub fn new(find: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            find: find.into(),
            replace: replace.into(),
            selectors: Vec::new(),
        }
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selectors.push(selector.into());
        self
    }
}

/// A validated rule, ready to apply to any number of documents.
pub struct CompiledRule {
    finder: memmem::Finder<'static>,
    replace: String,
    selectors: Vec<Selector<MarkupSelectors>>,
}

impl CompiledRule {
    pub fn find(&self) -> &[u8] {
        self.finder.needle()
    }

    pub fn has_selectors(&self) -> bool {
        !self.selectors.is_empty()
    }

    /// Replace every non-overlapping occurrence, left to right.
    ///
    /// Returns the new text and the match count, or `None` if nothing matched.
    pub fn apply(&self, text: &str) -> Option<(String, usize)> {
        let haystack = text.as_bytes();
        let needle_len = self.finder.needle().len();

        let mut out = String::with_capacity(text.len());
        let mut pos = 0;
        let mut count = 0;
        while let Some(rel) = self.finder.find(&haystack[pos..]) {
            let start = pos + rel;
            // Needle and haystack are both UTF-8, so match edges are char boundaries.
            out.push_str(&text[pos..start]);
            out.push_str(&self.replace);
            pos = start + needle_len;
            count += 1;
        }

        if count == 0 {
            return None;
        }
        out.push_str(&text[pos..]);
        Some((out, count))
    }

    /// Elements of `dom` matched by at least one selector.
    pub(crate) fn matching_elements(&self, dom: &ArenaDom) -> HashSet<ArenaNodeId> {
        dom.descendants(dom.document())
            .filter(|&id| dom.is_element(id))
            .filter(|&id| self.selectors.iter().any(|s| matches(dom, id, s)))
            .collect()
    }
}

impl std::fmt::Debug for CompiledRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledRule")
            .field("find", &String::from_utf8_lossy(self.find()))
            .field("replace", &self.replace)
            .field("selectors", &self.selectors.len())
            .finish()
    }
}

/// Validate and compile `rules` in order.
pub fn compile_rules(rules: &[RewriteRule]) -> Result<Vec<CompiledRule>> {
    rules
        .iter()
        .enumerate()
        .map(|(i, rule)| {
            if rule.find.is_empty() {
                return Err(Error::InvalidRule(format!("rule {}: empty find pattern", i + 1)));
            }

            let selectors = rule
                .selectors
                .iter()
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| {
                    parse_selector(s).map_err(|e| {
                        Error::InvalidRule(format!("rule {}: selector {s:?}: {e}", i + 1))
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            Ok(CompiledRule {
                finder: memmem::Finder::new(rule.find.as_bytes()).into_owned(),
                replace: rule.replace.clone(),
                selectors,
            })
        })
        .collect()
}
