//! LDX XML injection.
//!
//! An LDX file is arbitrary XML produced by external logging tooling. The
//! injector guarantees the output contains exactly one `<detail>` element
//! (created under the document root when absent) holding one
//! `<entry id="FIELD_ID">VALUE</entry>` per injected field. Existing
//! children of `<detail>` are preserved; an existing entry with a matching
//! id has its value replaced rather than duplicated. Everything else in
//! the document passes through untouched.

use std::collections::BTreeMap;
use std::io::Cursor;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

/// One value to place into the `<detail>` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionEntry {
    pub field_id: String,
    pub value: String,
}

/// Injection failure; the watcher logs it and retries the file later.
#[derive(Debug, thiserror::Error)]
pub enum LdxError {
    #[error("xml error: {0}")]
    Xml(String),
    #[error("document has no root element")]
    NoRoot,
}

impl From<quick_xml::Error> for LdxError {
    fn from(e: quick_xml::Error) -> Self {
        Self::Xml(e.to_string())
    }
}

/// Rewrites `input`, injecting `entries` into its `<detail>` element.
///
/// # Errors
///
/// Returns [`LdxError`] when the document cannot be parsed or has no root
/// element to attach a `<detail>` block to.
pub fn inject_entries(input: &[u8], entries: &[InjectionEntry]) -> Result<Vec<u8>, LdxError> {
    let mut reader = Reader::from_reader(input);
    reader.trim_text(false);

    let mut events: Vec<Event<'static>> = Vec::new();
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Eof) => break,
            Ok(ev) => events.push(ev.into_owned()),
            Err(e) => return Err(e.into()),
        }
        buf.clear();
    }

    let mut pending: BTreeMap<&str, &str> = entries
        .iter()
        .map(|e| (e.field_id.as_str(), e.value.as_str()))
        .collect();

    let mut writer = Writer::new(Cursor::new(Vec::new()));

    match find_detail(&events) {
        Some(DetailLocation::Element(start_idx)) => {
            write_with_detail_at(&mut writer, &events, start_idx, &mut pending)?;
        }
        Some(DetailLocation::Empty(idx)) => {
            // <detail/> expands to an open element holding the entries.
            for (i, ev) in events.iter().enumerate() {
                if i == idx {
                    let Event::Empty(e) = ev else { unreachable!() };
                    writer.write_event(Event::Start(e.clone()))?;
                    write_entries(&mut writer, &pending)?;
                    writer.write_event(Event::End(BytesEnd::new(
                        String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                    )))?;
                } else {
                    writer.write_event(ev.clone())?;
                }
            }
        }
        None => {
            write_with_new_detail(&mut writer, &events, &pending)?;
        }
    }

    Ok(writer.into_inner().into_inner())
}

enum DetailLocation {
    /// Index of the `<detail>` start event.
    Element(usize),
    /// Index of a self-closing `<detail/>`.
    Empty(usize),
}

fn find_detail(events: &[Event<'_>]) -> Option<DetailLocation> {
    for (i, ev) in events.iter().enumerate() {
        match ev {
            Event::Start(e) if e.name().as_ref() == b"detail" => {
                return Some(DetailLocation::Element(i));
            }
            Event::Empty(e) if e.name().as_ref() == b"detail" => {
                return Some(DetailLocation::Empty(i));
            }
            _ => {}
        }
    }
    None
}

/// Copies the document, rewriting the `<detail>` element found at
/// `start_idx`: matching existing entries get their text replaced,
/// remaining pending entries are appended before `</detail>`.
fn write_with_detail_at(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    events: &[Event<'static>],
    start_idx: usize,
    pending: &mut BTreeMap<&str, &str>,
) -> Result<(), LdxError> {
    let mut i = 0;
    while i < events.len() {
        if i != start_idx {
            writer.write_event(events[i].clone())?;
            i += 1;
            continue;
        }

        // Inside <detail>: walk to its matching end, handling entries.
        writer.write_event(events[i].clone())?;
        i += 1;
        let mut depth = 0usize;
        while i < events.len() {
            match &events[i] {
                Event::End(_) if depth == 0 => break,
                Event::Start(e) if depth == 0 && e.name().as_ref() == b"entry" => {
                    if let Some(value) = matching_value(e, pending)? {
                        // Replace the element's content wholesale.
                        writer.write_event(events[i].clone())?;
                        writer.write_event(Event::Text(BytesText::new(&value)))?;
                        let mut inner_depth = 0usize;
                        i += 1;
                        while i < events.len() {
                            match &events[i] {
                                Event::Start(_) => inner_depth += 1,
                                Event::End(_) if inner_depth == 0 => {
                                    writer.write_event(events[i].clone())?;
                                    break;
                                }
                                Event::End(_) => inner_depth -= 1,
                                _ => {}
                            }
                            i += 1;
                        }
                    } else {
                        writer.write_event(events[i].clone())?;
                        depth += 1;
                    }
                }
                Event::Empty(e) if depth == 0 && e.name().as_ref() == b"entry" => {
                    if let Some(value) = matching_value(e, pending)? {
                        writer.write_event(Event::Start(e.clone()))?;
                        writer.write_event(Event::Text(BytesText::new(&value)))?;
                        writer.write_event(Event::End(BytesEnd::new("entry")))?;
                    } else {
                        writer.write_event(events[i].clone())?;
                    }
                }
                Event::Start(_) => {
                    writer.write_event(events[i].clone())?;
                    depth += 1;
                }
                Event::End(_) => {
                    writer.write_event(events[i].clone())?;
                    depth = depth.saturating_sub(1);
                }
                ev => writer.write_event(ev.clone())?,
            }
            i += 1;
        }

        // Append whatever was not already present, then close.
        write_entries(writer, pending)?;
        pending.clear();
    }
    Ok(())
}

/// Copies the document, creating `<detail>` as the last child of the root
/// element.
fn write_with_new_detail(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    events: &[Event<'static>],
    pending: &BTreeMap<&str, &str>,
) -> Result<(), LdxError> {
    // The root's end tag is the last End event; a self-closing root is the
    // last Empty event at depth zero.
    let mut root_end: Option<usize> = None;
    let mut depth = 0usize;
    let mut empty_root: Option<usize> = None;
    for (i, ev) in events.iter().enumerate() {
        match ev {
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    root_end = Some(i);
                }
            }
            Event::Empty(_) if depth == 0 => empty_root = Some(i),
            _ => {}
        }
    }

    if let Some(end_idx) = root_end {
        for (i, ev) in events.iter().enumerate() {
            if i == end_idx {
                write_detail_block(writer, pending)?;
            }
            writer.write_event(ev.clone())?;
        }
        return Ok(());
    }

    if let Some(idx) = empty_root {
        for (i, ev) in events.iter().enumerate() {
            if i == idx {
                let Event::Empty(e) = ev else { unreachable!() };
                writer.write_event(Event::Start(e.clone()))?;
                write_detail_block(writer, pending)?;
                writer.write_event(Event::End(BytesEnd::new(
                    String::from_utf8_lossy(e.name().as_ref()).into_owned(),
                )))?;
            } else {
                writer.write_event(ev.clone())?;
            }
        }
        return Ok(());
    }

    Err(LdxError::NoRoot)
}

fn write_detail_block(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    entries: &BTreeMap<&str, &str>,
) -> Result<(), LdxError> {
    writer.write_event(Event::Start(BytesStart::new("detail")))?;
    write_entries(writer, entries)?;
    writer.write_event(Event::End(BytesEnd::new("detail")))?;
    Ok(())
}

fn write_entries(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    entries: &BTreeMap<&str, &str>,
) -> Result<(), LdxError> {
    for (field_id, value) in entries {
        let mut start = BytesStart::new("entry");
        start.push_attribute(("id", *field_id));
        writer.write_event(Event::Start(start))?;
        writer.write_event(Event::Text(BytesText::new(value)))?;
        writer.write_event(Event::End(BytesEnd::new("entry")))?;
    }
    Ok(())
}

/// If this `<entry>` names a pending field id, removes and returns its
/// value.
fn matching_value(
    e: &BytesStart<'_>,
    pending: &mut BTreeMap<&str, &str>,
) -> Result<Option<String>, LdxError> {
    let id = e
        .try_get_attribute("id")
        .map_err(|err| LdxError::Xml(err.to_string()))?;
    let Some(id) = id else {
        return Ok(None);
    };
    let id = id
        .unescape_value()
        .map_err(|err| LdxError::Xml(err.to_string()))?;
    Ok(pending.remove(id.as_ref()).map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, &str)]) -> Vec<InjectionEntry> {
        pairs
            .iter()
            .map(|(id, value)| InjectionEntry {
                field_id: (*id).to_string(),
                value: (*value).to_string(),
            })
            .collect()
    }

    fn inject(input: &str, pairs: &[(&str, &str)]) -> String {
        let out = inject_entries(input.as_bytes(), &entries(pairs)).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_creates_detail_under_root() {
        let out = inject("<root></root>", &[("sampling_rate", "100")]);
        assert_eq!(
            out,
            "<root><detail><entry id=\"sampling_rate\">100</entry></detail></root>"
        );
    }

    #[test]
    fn test_self_closing_root() {
        let out = inject("<root/>", &[("sampling_rate", "100")]);
        assert_eq!(
            out,
            "<root><detail><entry id=\"sampling_rate\">100</entry></detail></root>"
        );
    }

    #[test]
    fn test_existing_detail_keeps_children() {
        let out = inject(
            "<log><detail><note>run 4</note></detail></log>",
            &[("tire_pressure", "1.8")],
        );
        assert_eq!(
            out,
            "<log><detail><note>run 4</note><entry id=\"tire_pressure\">1.8</entry></detail></log>"
        );
    }

    #[test]
    fn test_self_closing_detail() {
        let out = inject("<log><detail/></log>", &[("a", "1")]);
        assert_eq!(out, "<log><detail><entry id=\"a\">1</entry></detail></log>");
    }

    #[test]
    fn test_existing_entry_is_replaced_not_duplicated() {
        let out = inject(
            "<log><detail><entry id=\"a\">old</entry></detail></log>",
            &[("a", "new"), ("b", "2")],
        );
        assert_eq!(
            out,
            "<log><detail><entry id=\"a\">new</entry><entry id=\"b\">2</entry></detail></log>"
        );
    }

    #[test]
    fn test_only_first_detail_is_used() {
        let out = inject(
            "<log><detail></detail><detail></detail></log>",
            &[("a", "1")],
        );
        assert_eq!(
            out,
            "<log><detail><entry id=\"a\">1</entry></detail><detail></detail></log>"
        );
    }

    #[test]
    fn test_surrounding_content_passes_through() {
        let input = "<?xml version=\"1.0\"?><log><meta kind=\"session\">x</meta></log>";
        let out = inject(input, &[("a", "1")]);
        assert!(out.starts_with("<?xml version=\"1.0\"?>"));
        assert!(out.contains("<meta kind=\"session\">x</meta>"));
        assert!(out.contains("<detail><entry id=\"a\">1</entry></detail>"));
    }

    #[test]
    fn test_value_escaping() {
        let out = inject("<root></root>", &[("note", "a<b & c")]);
        assert!(out.contains("a&lt;b &amp; c"));
    }

    #[test]
    fn test_mismatched_tags_are_an_error() {
        assert!(inject_entries(b"<root></mismatch>", &entries(&[("a", "1")])).is_err());
    }
}
