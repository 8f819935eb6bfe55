//! FictionBook 2 documents, plain or extracted from a `.fb2.zip`.
//!
//! The document is parsed once: `<description>` yields metadata, the main
//! `<body>`'s top-level `<section>`s become the reading order and their
//! titles the TOC, secondary bodies (notes, comments) become non-linear
//! sections, and the `<binary>` referenced by `<coverpage>` becomes the cover.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::book::{Blob, Book, Metadata, Section, TocEntry};
use crate::dispatch::{BookParser, ParserInput, wrong_input};
use crate::error::{Error, Result};
use crate::util::{attr_value, decode_xml, detect_image_type, local_name, resolve_entity};

#[derive(Debug, Clone, Copy, Default)]
pub struct Fb2Parser;

impl BookParser for Fb2Parser {
    fn parse(&self, input: ParserInput) -> Result<Box<dyn Book>> {
        match input {
            ParserInput::Xml(bytes) => Ok(Box::new(Fb2Book::parse(&bytes)?)),
            other => Err(wrong_input("FictionBook", &other)),
        }
    }
}

pub struct Fb2Book {
    metadata: Metadata,
    toc: Vec<TocEntry>,
    sections: Vec<Section>,
    cover: Option<Blob>,
}

/// Elements whose text is collected; starting one resets the text buffer.
const TEXT_ELEMENTS: &[&[u8]] = &[
    b"book-title",
    b"first-name",
    b"middle-name",
    b"last-name",
    b"nickname",
    b"genre",
    b"lang",
    b"date",
    b"id",
    b"publisher",
    b"year",
    b"p",
    b"binary",
];

/// A TOC node under construction for an open `<section>`.
struct TocFrame {
    title: String,
    href: String,
    children: Vec<TocEntry>,
}

/// An open `<section>` or `<body>` whose size is being measured.
struct OpenPart {
    id: String,
    start: u64,
    linear: bool,
}

#[derive(Default)]
struct Person {
    names: Vec<String>,
    nickname: Option<String>,
}

impl Person {
    fn display_name(self) -> Option<String> {
        if self.names.is_empty() {
            self.nickname
        } else {
            Some(self.names.join(" "))
        }
    }
}

fn ends_with(path: &[Vec<u8>], suffix: &[&[u8]]) -> bool {
    path.len() >= suffix.len()
        && path[path.len() - suffix.len()..]
            .iter()
            .zip(suffix)
            .all(|(a, b)| a.as_slice() == *b)
}

fn within(path: &[Vec<u8>], name: &[u8]) -> bool {
    path.iter().any(|p| p.as_slice() == name)
}

impl Fb2Book {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let content = decode_xml(bytes);
        let mut reader = Reader::from_str(&content);

        let mut metadata = Metadata::default();
        let mut sections = Vec::new();
        let mut toc: Vec<TocEntry> = Vec::new();
        let mut cover_id: Option<String> = None;
        let mut cover: Option<Blob> = None;
        let mut saw_root = false;

        let mut path: Vec<Vec<u8>> = Vec::new();
        let mut text = String::new();
        let mut paragraphs: Vec<String> = Vec::new();
        let mut person: Option<Person> = None;

        let mut body_count = 0usize;
        let mut in_main_body = false;
        let mut main_sections = 0usize;
        let mut body_part: Option<OpenPart> = None;
        let mut top_section: Option<OpenPart> = None;
        let mut toc_stack: Vec<TocFrame> = Vec::new();
        let mut binary_mime: Option<Option<String>> = None;

        loop {
            let event = reader.read_event()?;
            let position = reader.buffer_position() as u64;
            match event {
                Event::Start(e) => {
                    let local = local_name(e.name().as_ref()).to_vec();
                    if TEXT_ELEMENTS.contains(&local.as_slice()) {
                        text.clear();
                    }

                    match local.as_slice() {
                        b"FictionBook" => saw_root = true,
                        b"author" | b"translator" if within(&path, b"title-info") => {
                            person = Some(Person::default());
                        }
                        b"annotation" if ends_with(&path, &[b"title-info"]) => paragraphs.clear(),
                        b"date" if ends_with(&path, &[b"title-info"]) => {
                            metadata.published = attr_value(&e, b"value");
                        }
                        b"date" if ends_with(&path, &[b"document-info"]) => {
                            metadata.modified = attr_value(&e, b"value");
                        }
                        b"body" if path.len() == 1 => {
                            body_count += 1;
                            let name = attr_value(&e, b"name");
                            in_main_body = body_count == 1 && name.is_none();
                            body_part = Some(OpenPart {
                                id: name.unwrap_or_else(|| format!("body-{body_count}")),
                                start: position,
                                linear: in_main_body,
                            });
                        }
                        b"section" if in_main_body => {
                            let id = attr_value(&e, b"id");
                            let href = if ends_with(&path, &[b"body"]) {
                                main_sections += 1;
                                let id = id.unwrap_or_else(|| format!("section-{main_sections}"));
                                top_section = Some(OpenPart {
                                    id: id.clone(),
                                    start: position,
                                    linear: true,
                                });
                                id
                            } else {
                                let top = top_section.as_ref().map(|s| s.id.as_str()).unwrap_or("");
                                match id {
                                    Some(id) => format!("{top}#{id}"),
                                    None => top.to_string(),
                                }
                            };
                            toc_stack.push(TocFrame {
                                title: String::new(),
                                href,
                                children: Vec::new(),
                            });
                        }
                        b"binary" => {
                            binary_mime = (cover_id.is_some() && attr_value(&e, b"id") == cover_id)
                                .then(|| attr_value(&e, b"content-type"));
                        }
                        _ => {}
                    }
                    path.push(local);
                }
                Event::Empty(e) => {
                    if local_name(e.name().as_ref()) == b"image"
                        && ends_with(&path, &[b"coverpage"])
                        && cover_id.is_none()
                    {
                        cover_id = attr_value(&e, b"href")
                            .map(|href| href.trim_start_matches('#').to_string());
                    }
                }
                Event::Text(e) => {
                    let in_binary = ends_with(&path, &[b"binary"]);
                    if !in_binary || binary_mime.is_some() {
                        text.push_str(&String::from_utf8_lossy(e.as_ref()));
                    }
                }
                Event::CData(e) => text.push_str(&String::from_utf8_lossy(e.as_ref())),
                Event::GeneralRef(e) => text.push_str(&resolve_entity(e.as_ref())),
                Event::End(_) => {
                    let value = text.trim().to_string();
                    let Some(local) = path.last().cloned() else {
                        continue;
                    };

                    match local.as_slice() {
                        b"book-title" if within(&path, b"title-info") => {
                            metadata.title = Some(value);
                        }
                        b"first-name" | b"middle-name" | b"last-name" => {
                            if let Some(person) = person.as_mut()
                                && !value.is_empty()
                            {
                                person.names.push(value);
                            }
                        }
                        b"nickname" => {
                            if let Some(person) = person.as_mut()
                                && !value.is_empty()
                            {
                                person.nickname = Some(value);
                            }
                        }
                        b"author" | b"translator" if person.is_some() => {
                            let is_author = local.as_slice() == b"author";
                            if let Some(name) = person.take().and_then(Person::display_name) {
                                if is_author {
                                    metadata.author.push(name);
                                } else {
                                    metadata.contributor.push(name);
                                }
                            }
                        }
                        b"genre" if within(&path, b"title-info") && !value.is_empty() => {
                            metadata.subject.push(value);
                        }
                        b"lang" if within(&path, b"title-info") && !value.is_empty() => {
                            metadata.language = Some(value);
                        }
                        b"date" if within(&path, b"title-info") => {
                            if metadata.published.is_none() && !value.is_empty() {
                                metadata.published = Some(value);
                            }
                        }
                        b"date" if within(&path, b"document-info") => {
                            if metadata.modified.is_none() && !value.is_empty() {
                                metadata.modified = Some(value);
                            }
                        }
                        b"id" if within(&path, b"document-info") && !value.is_empty() => {
                            metadata.identifier = Some(value);
                        }
                        b"publisher" if within(&path, b"publish-info") && !value.is_empty() => {
                            metadata.publisher = Some(value);
                        }
                        b"year" if within(&path, b"publish-info") => {
                            if metadata.published.is_none() && !value.is_empty() {
                                metadata.published = Some(value);
                            }
                        }
                        b"p" if ends_with(&path, &[b"annotation", b"p"])
                            && within(&path, b"title-info") =>
                        {
                            if !value.is_empty() {
                                paragraphs.push(value);
                            }
                        }
                        b"annotation" if within(&path, b"title-info") => {
                            if !paragraphs.is_empty() {
                                metadata.description = Some(paragraphs.join("\n"));
                            }
                        }
                        b"p" if ends_with(&path, &[b"section", b"title", b"p"]) => {
                            if let Some(frame) = toc_stack.last_mut()
                                && !value.is_empty()
                            {
                                if !frame.title.is_empty() {
                                    frame.title.push(' ');
                                }
                                frame.title.push_str(&value);
                            }
                        }
                        b"section" if in_main_body => {
                            if let Some(frame) = toc_stack.pop() {
                                let parent = match toc_stack.last_mut() {
                                    Some(parent) => &mut parent.children,
                                    None => &mut toc,
                                };
                                if frame.title.is_empty() {
                                    parent.extend(frame.children);
                                } else {
                                    let mut entry = TocEntry::new(frame.title, frame.href);
                                    entry.children = frame.children;
                                    parent.push(entry);
                                }
                            }
                            if ends_with(&path, &[b"body", b"section"])
                                && let Some(part) = top_section.take()
                            {
                                sections.push(Section::new(part.id, position - part.start));
                            }
                        }
                        b"body" if path.len() == 2 => {
                            if let Some(part) = body_part.take() {
                                let size = position - part.start;
                                if !part.linear {
                                    sections.push(Section::new(part.id, size).non_linear());
                                } else if main_sections == 0 {
                                    sections.push(Section::new(part.id, size));
                                }
                            }
                            in_main_body = false;
                        }
                        b"binary" => {
                            if let Some(mime) = binary_mime.take() {
                                cover = decode_binary(&value, mime);
                            }
                        }
                        _ => {}
                    }

                    if TEXT_ELEMENTS.contains(&local.as_slice()) {
                        text.clear();
                    }
                    path.pop();
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if !saw_root {
            return Err(Error::Parse("not a FictionBook document".into()));
        }
        if sections.is_empty() {
            return Err(Error::Parse("FictionBook has no <body>".into()));
        }

        log::debug!(
            "FictionBook {:?}: {} sections, cover {}",
            metadata.title,
            sections.len(),
            if cover.is_some() { "present" } else { "absent" }
        );
        Ok(Self {
            metadata,
            toc,
            sections,
            cover,
        })
    }
}

fn decode_binary(payload: &str, mime: Option<String>) -> Option<Blob> {
    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    match STANDARD.decode(compact) {
        Ok(data) => {
            let mime = mime.or_else(|| detect_image_type(&data).map(str::to_string));
            Some(Blob { data, mime })
        }
        Err(e) => {
            log::warn!("ignoring undecodable FictionBook cover: {e}");
            None
        }
    }
}

impl Book for Fb2Book {
    fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    fn toc(&self) -> &[TocEntry] {
        &self.toc
    }

    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn cover(&self) -> Result<Option<Blob>> {
        Ok(self.cover.clone())
    }
}
