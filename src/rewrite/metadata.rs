//! Rule application to Dublin Core text in a package document.
//!
//! The OPF is streamed event by event; only the text of the fields below is
//! touched, everything else is written back as read.

use quick_xml::Reader;
use quick_xml::Writer;
use quick_xml::events::{BytesText, Event};

use super::rules::CompiledRule;
use crate::error::Result;
use crate::util::{local_name, resolve_entity};

const DC_TEXT_FIELDS: &[&[u8]] = &[
    b"title",
    b"creator",
    b"contributor",
    b"publisher",
    b"description",
    b"subject",
];

/// A Dublin Core element being buffered until its end tag.
struct Field {
    events: Vec<Event<'static>>,
    text: String,
}

/// Apply selector-less `rules` to the package metadata in `content`.
///
/// Returns the rewritten document when any field changed, plus the total
/// match count.
pub fn rewrite_metadata(content: &str, rules: &[CompiledRule]) -> Result<(Option<String>, usize)> {
    let rules: Vec<&CompiledRule> = rules.iter().filter(|r| !r.has_selectors()).collect();
    if rules.is_empty() {
        return Ok((None, 0));
    }

    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(content.len()));

    let mut in_metadata = false;
    let mut field: Option<Field> = None;
    let mut total = 0;
    let mut changed = false;

    loop {
        let event = reader.read_event()?;
        if let Event::Eof = event {
            break;
        }

        if field.is_some() {
            let step = match &event {
                Event::Text(e) => Step::Buffer(String::from_utf8_lossy(e).into_owned()),
                Event::CData(e) => Step::Buffer(String::from_utf8_lossy(e).into_owned()),
                Event::GeneralRef(e) => match resolve_entity(&String::from_utf8_lossy(e)) {
                    Some(resolved) => Step::Buffer(resolved),
                    None => Step::Abandon,
                },
                Event::End(_) => Step::Close,
                _ => Step::Abandon,
            };

            match step {
                Step::Buffer(text) => {
                    if let Some(open) = field.as_mut() {
                        open.text.push_str(&text);
                        open.events.push(event.into_owned());
                    }
                }
                Step::Close => {
                    if let Some(done) = field.take() {
                        let (text, matches) = apply_rules(&rules, &done.text);
                        total += matches;
                        if matches > 0 && text != done.text {
                            changed = true;
                            writer.write_event(Event::Text(BytesText::new(&text)))?;
                        } else {
                            flush(&mut writer, done)?;
                        }
                    }
                    writer.write_event(event)?;
                }
                Step::Abandon => {
                    // Nested markup or an unknown entity: write the field back untouched.
                    if let Some(open) = field.take() {
                        flush(&mut writer, open)?;
                    }
                    writer.write_event(event)?;
                }
            }
            continue;
        }

        match &event {
            Event::Start(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());
                if local == b"metadata" {
                    in_metadata = true;
                } else if in_metadata && DC_TEXT_FIELDS.contains(&local) {
                    writer.write_event(event.borrow())?;
                    field = Some(Field {
                        events: Vec::new(),
                        text: String::new(),
                    });
                    continue;
                }
            }
            Event::End(e) => {
                if local_name(e.name().as_ref()) == b"metadata" {
                    in_metadata = false;
                }
            }
            _ => {}
        }
        writer.write_event(event)?;
    }

    if !changed {
        return Ok((None, total));
    }
    let out = String::from_utf8(writer.into_inner())?;
    Ok((Some(out), total))
}

enum Step {
    Buffer(String),
    Close,
    Abandon,
}

fn apply_rules(rules: &[&CompiledRule], text: &str) -> (String, usize) {
    let mut text = text.to_string();
    let mut matches = 0;
    for rule in rules {
        if let Some((out, n)) = rule.apply(&text) {
            text = out;
            matches += n;
        }
    }
    (text, matches)
}

fn flush(writer: &mut Writer<Vec<u8>>, field: Field) -> Result<()> {
    for event in field.events {
        writer.write_event(event)?;
    }
    Ok(())
}
