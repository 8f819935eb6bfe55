//! EPUB parsing utilities (container.xml, OPF, NCX, nav). Pure, no IO.

use std::collections::HashMap;

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::book::{Metadata, TocEntry};
use crate::error::{Error, Result};
use crate::util::{attr_value, local_name, resolve_entity};

/// Parsed OPF package data.
#[derive(Debug, Default)]
pub struct OpfData {
    pub metadata: Metadata,
    /// Maps manifest id -> item
    pub manifest: HashMap<String, ManifestItem>,
    pub spine: Vec<SpineRef>,
    /// Manifest id of the NCX (`<spine toc="...">`).
    pub ncx_id: Option<String>,
    /// Manifest id of the cover image.
    pub cover_id: Option<String>,
    /// Manifest id of the EPUB 3 navigation document.
    pub nav_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ManifestItem {
    pub href: String,
    pub media_type: String,
    pub properties: Option<String>,
}

impl ManifestItem {
    fn has_property(&self, name: &str) -> bool {
        self.properties
            .as_ref()
            .is_some_and(|props| props.split_ascii_whitespace().any(|p| p == name))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpineRef {
    pub idref: String,
    pub linear: bool,
}

/// Parse META-INF/container.xml to find the OPF path.
pub fn parse_container_xml(content: &str) -> Result<String> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event()? {
            Event::Empty(e) | Event::Start(e) if local_name(e.name().as_ref()) == b"rootfile" => {
                if let Some(path) = attr_value(&e, b"full-path") {
                    return Ok(path);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Err(Error::Parse("No rootfile found in container.xml".into()))
}

/// Metadata element whose text is being collected.
enum Capture {
    Dc { element: String, id: Option<String> },
    Meta { property: String, refines: Option<String> },
}

/// Parse the OPF package document.
pub fn parse_opf(content: &str) -> Result<OpfData> {
    let mut reader = Reader::from_str(content);

    let mut opf = OpfData::default();
    let mut unique_id: Option<String> = None;
    let mut identifiers: Vec<(Option<String>, String)> = Vec::new();
    let mut titles: Vec<(Option<String>, String)> = Vec::new();
    let mut title_types: HashMap<String, String> = HashMap::new();
    let mut epub2_cover_id: Option<String> = None;

    let mut in_metadata = false;
    let mut capture: Option<Capture> = None;
    let mut buf_text = String::new();

    loop {
        let event = reader.read_event()?;
        let is_start = matches!(event, Event::Start(_));
        match event {
            Event::Start(e) | Event::Empty(e) => {
                let name = e.name();
                let local = local_name(name.as_ref());

                match local {
                    b"package" => unique_id = attr_value(&e, b"unique-identifier"),
                    b"metadata" => in_metadata = is_start,
                    b"item" => {
                        if let (Some(id), Some(href)) = (attr_value(&e, b"id"), attr_value(&e, b"href")) {
                            let item = ManifestItem {
                                href,
                                media_type: attr_value(&e, b"media-type").unwrap_or_default(),
                                properties: attr_value(&e, b"properties"),
                            };
                            opf.manifest.insert(id, item);
                        }
                    }
                    b"itemref" => {
                        if let Some(idref) = attr_value(&e, b"idref") {
                            let linear = attr_value(&e, b"linear").is_none_or(|v| v.trim() != "no");
                            opf.spine.push(SpineRef { idref, linear });
                        }
                    }
                    b"spine" => opf.ncx_id = attr_value(&e, b"toc"),
                    b"meta" if in_metadata => {
                        // EPUB 2: <meta name="cover" content="cover-image-id"/>
                        if attr_value(&e, b"name").as_deref() == Some("cover") {
                            epub2_cover_id = attr_value(&e, b"content");
                        }
                        if is_start && let Some(property) = attr_value(&e, b"property") {
                            capture = Some(Capture::Meta {
                                property,
                                refines: attr_value(&e, b"refines"),
                            });
                            buf_text.clear();
                        }
                    }
                    b"title" | b"creator" | b"contributor" | b"language" | b"identifier"
                    | b"publisher" | b"description" | b"subject" | b"date" | b"rights"
                        if in_metadata && is_start =>
                    {
                        capture = Some(Capture::Dc {
                            element: String::from_utf8_lossy(local).into_owned(),
                            id: attr_value(&e, b"id"),
                        });
                        buf_text.clear();
                    }
                    _ => {}
                }
            }
            Event::Text(e) => {
                if capture.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::CData(e) => {
                if capture.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::GeneralRef(e) => {
                if capture.is_some() {
                    buf_text.push_str(&resolve_entity(e.as_ref()));
                }
            }
            Event::End(e) => {
                if local_name(e.name().as_ref()) == b"metadata" {
                    in_metadata = false;
                }

                let Some(done) = capture.take() else {
                    continue;
                };
                let text = buf_text.trim().to_string();
                buf_text.clear();
                if text.is_empty() {
                    continue;
                }

                let metadata = &mut opf.metadata;
                match done {
                    Capture::Dc { element, id } => match element.as_str() {
                        "title" => titles.push((id, text)),
                        "creator" => metadata.author.push(text),
                        "contributor" => metadata.contributor.push(text),
                        "language" => {
                            metadata.language.get_or_insert(text);
                        }
                        "identifier" => identifiers.push((id, text)),
                        "publisher" => metadata.publisher = Some(text),
                        "description" => metadata.description = Some(text),
                        "subject" => metadata.subject.push(text),
                        "date" => {
                            metadata.published.get_or_insert(text);
                        }
                        "rights" => metadata.rights = Some(text),
                        _ => {}
                    },
                    Capture::Meta { property, refines } => match property.as_str() {
                        "dcterms:modified" => metadata.modified = Some(text),
                        "title-type" => {
                            if let Some(target) = refines {
                                title_types.insert(target.trim_start_matches('#').to_string(), text);
                            }
                        }
                        _ => {}
                    },
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let title_type = |id: &Option<String>| id.as_ref().and_then(|id| title_types.get(id)).map(String::as_str);
    let main = titles
        .iter()
        .position(|(id, _)| title_type(id) == Some("main"))
        .unwrap_or(0);
    opf.metadata.title = titles.get(main).map(|(_, t)| t.clone());
    opf.metadata.subtitle = titles
        .iter()
        .enumerate()
        .find(|(i, (id, _))| *i != main && title_type(id).is_none_or(|t| t == "subtitle"))
        .map(|(_, (_, t))| t.clone());

    opf.metadata.identifier = identifiers
        .iter()
        .find(|(id, _)| id.is_some() && *id == unique_id)
        .or_else(|| identifiers.first())
        .map(|(_, value)| value.clone());

    // Cover: EPUB 3 "cover-image" property takes priority over EPUB 2 meta
    opf.cover_id = opf
        .manifest
        .iter()
        .find(|(_, item)| item.has_property("cover-image"))
        .map(|(id, _)| id.clone())
        .or_else(|| epub2_cover_id.filter(|id| opf.manifest.contains_key(id)));

    opf.nav_id = opf
        .manifest
        .iter()
        .find(|(_, item)| item.has_property("nav"))
        .map(|(id, _)| id.clone());

    Ok(opf)
}

/// Parse an NCX document into a TOC. Hrefs are returned as written.
pub fn parse_ncx(content: &str) -> Result<Vec<TocEntry>> {
    let mut reader = Reader::from_str(content);

    // One frame per open navPoint; the bottom frame collects top-level entries
    struct NavPointState {
        children: Vec<TocEntry>,
        text: String,
        src: Option<String>,
    }

    let mut stack = vec![NavPointState {
        children: Vec::new(),
        text: String::new(),
        src: None,
    }];
    let mut in_text = false;

    loop {
        match reader.read_event()? {
            Event::Start(e) => match local_name(e.name().as_ref()) {
                b"navPoint" => stack.push(NavPointState {
                    children: Vec::new(),
                    text: String::new(),
                    src: None,
                }),
                b"text" => in_text = true,
                b"content" => {
                    if let Some(state) = stack.last_mut() {
                        state.src = attr_value(&e, b"src");
                    }
                }
                _ => {}
            },
            Event::Empty(e) => {
                if local_name(e.name().as_ref()) == b"content"
                    && let Some(state) = stack.last_mut()
                {
                    state.src = attr_value(&e, b"src");
                }
            }
            Event::Text(e) => {
                if in_text && let Some(state) = stack.last_mut() {
                    state.text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::GeneralRef(e) => {
                if in_text && let Some(state) = stack.last_mut() {
                    state.text.push_str(&resolve_entity(e.as_ref()));
                }
            }
            Event::End(e) => match local_name(e.name().as_ref()) {
                b"text" => in_text = false,
                b"navPoint" if stack.len() > 1 => {
                    if let Some(state) = stack.pop()
                        && let Some(src) = state.src
                        && let Some(parent) = stack.last_mut()
                    {
                        let mut entry = TocEntry::new(state.text.trim(), src);
                        entry.children = state.children;
                        parent.children.push(entry);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(stack.swap_remove(0).children)
}

/// Parse the `toc` nav of an EPUB 3 navigation document.
pub fn parse_nav(content: &str) -> Result<Vec<TocEntry>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().check_end_names = false;

    struct Item {
        title: String,
        href: Option<String>,
        children: Vec<TocEntry>,
    }

    let mut roots: Vec<TocEntry> = Vec::new();
    let mut stack: Vec<Item> = Vec::new();
    let mut nav_depth = 0usize;
    let mut in_toc = false;
    let mut label_depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"nav" => {
                        nav_depth += 1;
                        if !in_toc
                            && attr_value(&e, b"type")
                                .is_some_and(|t| t.split_ascii_whitespace().any(|t| t == "toc"))
                        {
                            in_toc = true;
                            nav_depth = 1;
                        }
                    }
                    b"li" if in_toc => stack.push(Item {
                        title: String::new(),
                        href: None,
                        children: Vec::new(),
                    }),
                    b"a" | b"span" if in_toc => {
                        label_depth += 1;
                        if let Some(item) = stack.last_mut()
                            && item.href.is_none()
                        {
                            item.href = attr_value(&e, b"href");
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(e) => {
                if label_depth > 0 && let Some(item) = stack.last_mut() {
                    item.title.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Event::GeneralRef(e) => {
                if label_depth > 0 && let Some(item) = stack.last_mut() {
                    item.title.push_str(&resolve_entity(e.as_ref()));
                }
            }
            Event::End(e) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"nav" if in_toc => {
                        nav_depth -= 1;
                        if nav_depth == 0 {
                            in_toc = false;
                        }
                    }
                    b"a" | b"span" if label_depth > 0 => label_depth -= 1,
                    b"li" if in_toc => {
                        if let Some(item) = stack.pop() {
                            let entry = TocEntry {
                                title: item.title.trim().to_string(),
                                href: item.href.unwrap_or_default(),
                                children: item.children,
                            };
                            match stack.last_mut() {
                                Some(parent) => parent.children.push(entry),
                                None => roots.push(entry),
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(roots)
}
