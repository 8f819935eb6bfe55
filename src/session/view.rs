//! The rendering surface a session drives, and an in-memory implementation.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::annotations::Annotation;
use crate::book::Book;
use crate::error::{Error, Result};

/// A reading position reported by the view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Opaque, format-defined locator.
    pub cfi: String,
    /// Position within the whole book, 0.0 to 1.0.
    pub fraction: f64,
    /// Section (spine) index.
    pub index: usize,
}

/// Events a view queues for the session, delivered in order by
/// [`ReadingSession::pump`](super::ReadingSession::pump).
#[derive(Debug, Clone, PartialEq)]
pub enum ViewEvent {
    /// Section `index` was loaded for display.
    Load { index: usize },
    /// The visible position changed.
    Relocate(Location),
    /// An overlay for section `index` was created and needs its annotations.
    CreateOverlay { index: usize },
    /// An annotation added to an overlay needs its styling.
    DrawAnnotation { value: String },
    /// The user activated an annotation.
    ShowAnnotation { value: String },
}

/// Attribute and style sink of a view.
pub trait Renderer {
    fn set_attribute(&mut self, name: &str, value: &str);
    fn set_styles(&mut self, styles: &[String]);
}

/// A paginating view over an open book.
pub trait View {
    fn open(&mut self, book: Arc<dyn Book>) -> Result<()>;

    /// Detach the current book, if any.
    fn close(&mut self) {}

    fn next(&mut self) -> Result<()>;
    fn prev(&mut self) -> Result<()>;
    fn go_left(&mut self) -> Result<()>;
    fn go_right(&mut self) -> Result<()>;
    fn go_to(&mut self, locator: &str) -> Result<()>;
    fn go_to_fraction(&mut self, fraction: f64) -> Result<()>;

    /// The renderer, once a book is open.
    fn renderer(&mut self) -> Option<&mut dyn Renderer>;

    fn add_annotation(&mut self, annotation: &Annotation);
    fn draw_highlight(&mut self, value: &str, color: &str);

    /// Drain queued events, oldest first.
    fn take_events(&mut self) -> Vec<ViewEvent>;
}

/// Records what it was told to apply.
#[derive(Debug, Default)]
pub struct HeadlessRenderer {
    pub attributes: BTreeMap<String, String>,
    pub styles: Vec<String>,
}

impl Renderer for HeadlessRenderer {
    fn set_attribute(&mut self, name: &str, value: &str) {
        self.attributes.insert(name.to_string(), value.to_string());
    }

    fn set_styles(&mut self, styles: &[String]) {
        self.styles = styles.to_vec();
    }
}

/// A view without a display: sections are cut into fixed-size pages, and
/// navigation emits the same events a rendering view would.
pub struct HeadlessView {
    page_size: u64,
    book: Option<Arc<dyn Book>>,
    position: Option<(usize, usize)>,
    loaded: Vec<bool>,
    events: Vec<ViewEvent>,
    renderer: HeadlessRenderer,
    /// `(value, color)` of every highlight drawn.
    pub highlights: Vec<(String, String)>,
}

impl Default for HeadlessView {
    fn default() -> Self {
        Self::new(2048)
    }
}

impl HeadlessView {
    /// A view whose pages hold `page_size` bytes of section content.
    pub fn new(page_size: u64) -> Self {
        Self {
            page_size: page_size.max(1),
            book: None,
            position: None,
            loaded: Vec::new(),
            events: Vec::new(),
            renderer: HeadlessRenderer::default(),
            highlights: Vec::new(),
        }
    }

    pub fn rendered(&self) -> &HeadlessRenderer {
        &self.renderer
    }

    /// Current `(section, page)`.
    pub fn position(&self) -> Option<(usize, usize)> {
        self.position
    }

    /// Simulate the user tapping a drawn annotation.
    pub fn activate(&mut self, value: &str) {
        self.events.push(ViewEvent::ShowAnnotation {
            value: value.to_string(),
        });
    }

    fn book(&self) -> Result<&Arc<dyn Book>> {
        self.book.as_ref().ok_or(Error::NotReady)
    }

    fn pages(&self, book: &dyn Book, index: usize) -> usize {
        let size = book.sections().get(index).map(|s| s.size).unwrap_or(0);
        size.div_ceil(self.page_size).max(1) as usize
    }

    fn show(&mut self, index: usize, page: usize) -> Result<()> {
        let book = self.book()?.clone();
        let sections = book.sections();
        if index >= sections.len() {
            return Err(Error::NotFound(format!("section {index}")));
        }

        if !self.loaded[index] {
            self.loaded[index] = true;
            self.events.push(ViewEvent::Load { index });
            self.events.push(ViewEvent::CreateOverlay { index });
        }
        self.position = Some((index, page));

        let total: u64 = sections.iter().map(|s| s.size).sum();
        let before: u64 = sections[..index].iter().map(|s| s.size).sum::<u64>()
            + (page as u64 * self.page_size).min(sections[index].size);
        let fraction = if total == 0 {
            0.0
        } else {
            before as f64 / total as f64
        };
        self.events.push(ViewEvent::Relocate(Location {
            cfi: format!("epubcfi(/6/{}!/4/{})", (index + 1) * 2, (page + 1) * 2),
            fraction,
            index,
        }));
        Ok(())
    }

    /// Section index for a locator: one of our CFIs, or a section id with an
    /// optional fragment.
    fn resolve(&self, book: &dyn Book, locator: &str) -> Option<(usize, usize)> {
        if let Some(path) = locator.strip_prefix("epubcfi(/6/") {
            let (spine, rest) = path.split_once('!')?;
            let index = spine.parse::<usize>().ok()?.checked_div(2)?.checked_sub(1)?;
            let page = rest
                .trim_end_matches(')')
                .strip_prefix("/4/")
                .and_then(|p| p.parse::<usize>().ok())
                .map(|p| (p / 2).saturating_sub(1))
                .unwrap_or(0);
            return Some((index, page.min(self.pages(book, index) - 1)));
        }
        let id = locator.split_once('#').map(|(id, _)| id).unwrap_or(locator);
        book.sections()
            .iter()
            .position(|s| s.id == id)
            .map(|index| (index, 0))
    }
}

impl View for HeadlessView {
    fn open(&mut self, book: Arc<dyn Book>) -> Result<()> {
        self.close();
        self.loaded = vec![false; book.sections().len()];
        self.book = Some(book);
        Ok(())
    }

    fn close(&mut self) {
        self.book = None;
        self.position = None;
        self.loaded.clear();
        self.events.clear();
        self.highlights.clear();
    }

    fn next(&mut self) -> Result<()> {
        let book = self.book()?.clone();
        let last = book.sections().len().saturating_sub(1);
        match self.position {
            None => self.show(0, 0),
            Some((index, page)) if page + 1 < self.pages(book.as_ref(), index) => {
                self.show(index, page + 1)
            }
            Some((index, _)) if index < last => self.show(index + 1, 0),
            Some(_) => Ok(()),
        }
    }

    fn prev(&mut self) -> Result<()> {
        let book = self.book()?.clone();
        match self.position {
            Some((index, page)) if page > 0 => self.show(index, page - 1),
            Some((index, _)) if index > 0 => {
                let page = self.pages(book.as_ref(), index - 1) - 1;
                self.show(index - 1, page)
            }
            _ => Ok(()),
        }
    }

    fn go_left(&mut self) -> Result<()> {
        self.prev()
    }

    fn go_right(&mut self) -> Result<()> {
        self.next()
    }

    fn go_to(&mut self, locator: &str) -> Result<()> {
        let book = self.book()?.clone();
        let (index, page) = self
            .resolve(book.as_ref(), locator)
            .ok_or_else(|| Error::NotFound(locator.to_string()))?;
        self.show(index, page)
    }

    fn go_to_fraction(&mut self, fraction: f64) -> Result<()> {
        let book = self.book()?.clone();
        let sections = book.sections();
        let total: u64 = sections.iter().map(|s| s.size).sum();
        let target = (fraction.clamp(0.0, 1.0) * total as f64) as u64;

        let mut start = 0u64;
        for (index, section) in sections.iter().enumerate() {
            if target < start + section.size || index + 1 == sections.len() {
                let page = ((target.saturating_sub(start)) / self.page_size) as usize;
                let page = page.min(self.pages(book.as_ref(), index) - 1);
                return self.show(index, page);
            }
            start += section.size;
        }
        Ok(())
    }

    fn renderer(&mut self) -> Option<&mut dyn Renderer> {
        if self.book.is_some() {
            Some(&mut self.renderer)
        } else {
            None
        }
    }

    fn add_annotation(&mut self, annotation: &Annotation) {
        self.events.push(ViewEvent::DrawAnnotation {
            value: annotation.value.clone(),
        });
    }

    fn draw_highlight(&mut self, value: &str, color: &str) {
        self.highlights.push((value.to_string(), color.to_string()));
    }

    fn take_events(&mut self) -> Vec<ViewEvent> {
        std::mem::take(&mut self.events)
    }
}
