//! The reading session: one open book, the view showing it, and the host
//! it reports to.
//!
//! All work happens on the caller's thread. The view queues its events and
//! the owner delivers them, in order, with [`ReadingSession::pump`].

mod bridge;
pub mod progress;
mod view;

use std::sync::Arc;

use serde::Serialize;

use crate::annotations::AnnotationIndex;
use crate::appearance::{
    Appearance, LayoutConfig, LayoutPatch, StyleConfig, StylePatch, chrome_colors,
    renderer_attributes, stylesheets,
};
use crate::book::{Book, Metadata, TocEntry};
use crate::dispatch::BookDispatcher;
use crate::error::{Error, ErrorKind, Result};
use crate::source::Source;

pub use bridge::{HostBridge, Notification, RecordingBridge};
pub use view::{HeadlessRenderer, HeadlessView, Location, Renderer, View, ViewEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    Opening,
    Ready,
}

#[derive(Serialize)]
struct BookLoaded<'a> {
    #[serde(flatten)]
    metadata: &'a Metadata,
    toc: &'a [TocEntry],
}

#[derive(Serialize)]
struct LoadFailure {
    kind: ErrorKind,
    message: String,
}

/// Owns at most one open book at a time.
pub struct ReadingSession<V: View, H: HostBridge> {
    dispatcher: BookDispatcher,
    view: V,
    bridge: H,
    state: SessionState,
    book: Option<Arc<dyn Book>>,
    style: StyleConfig,
    layout: LayoutConfig,
    last_location: Option<Location>,
    loaded: bool,
    annotations: AnnotationIndex,
}

impl<V: View, H: HostBridge> ReadingSession<V, H> {
    pub fn new(view: V, bridge: H) -> Self {
        Self::with_dispatcher(BookDispatcher::new(), view, bridge)
    }

    pub fn with_dispatcher(dispatcher: BookDispatcher, view: V, bridge: H) -> Self {
        Self {
            dispatcher,
            view,
            bridge,
            state: SessionState::Empty,
            book: None,
            style: StyleConfig::default(),
            layout: LayoutConfig::default(),
            last_location: None,
            loaded: false,
            annotations: AnnotationIndex::default(),
        }
    }

    /// Start from the given configuration instead of the defaults.
    pub fn with_config(mut self, style: StyleConfig, layout: LayoutConfig) -> Self {
        self.style = style;
        self.layout = layout;
        self
    }

    /// Open a book, replacing the current one.
    ///
    /// On failure the session is left empty and the host receives exactly
    /// one load-failure notification.
    pub fn open(&mut self, source: &Source) -> Result<()> {
        if self.state == SessionState::Opening {
            return Err(Error::SessionBusy);
        }
        self.close();
        self.state = SessionState::Opening;

        match self.load(source) {
            Ok(()) => {
                self.state = SessionState::Ready;
                log::info!("opened {}", source.name());
                Ok(())
            }
            Err(err) => {
                log::warn!("failed to open {}: {err}", source.name());
                self.close();
                let failure = LoadFailure {
                    kind: err.kind(),
                    message: err.to_string(),
                };
                match serde_json::to_string(&failure) {
                    Ok(json) => self.bridge.on_book_load_failed(&json),
                    Err(e) => log::error!("cannot report load failure: {e}"),
                }
                Err(err)
            }
        }
    }

    fn load(&mut self, source: &Source) -> Result<()> {
        let book: Arc<dyn Book> = Arc::from(self.dispatcher.open(source)?);
        self.view.open(book.clone())?;
        self.book = Some(book.clone());
        self.apply_appearance();
        self.view.next()?;

        match AnnotationIndex::from_book(book.as_ref()) {
            Ok(index) => self.annotations = index,
            Err(err) => log::warn!("ignoring embedded bookmarks: {err}"),
        }
        Ok(())
    }

    /// Drop the current book. Queued view events are discarded.
    pub fn close(&mut self) {
        self.view.close();
        self.view.take_events();
        self.book = None;
        self.last_location = None;
        self.loaded = false;
        self.annotations = AnnotationIndex::default();
        self.state = SessionState::Empty;
    }

    /// Deliver every queued view event, including those raised while
    /// handling. Returns how many were handled.
    pub fn pump(&mut self) -> Result<usize> {
        let mut handled = 0;
        loop {
            let events = self.view.take_events();
            if events.is_empty() {
                return Ok(handled);
            }
            for event in events {
                self.handle_event(event)?;
                handled += 1;
            }
        }
    }

    pub fn handle_event(&mut self, event: ViewEvent) -> Result<()> {
        if self.state != SessionState::Ready {
            log::debug!("no book ready, dropping {event:?}");
            return Ok(());
        }
        match event {
            ViewEvent::Load { index } => {
                if self.loaded {
                    log::trace!("section {index} loaded");
                    return Ok(());
                }
                let Some(book) = &self.book else {
                    return Ok(());
                };
                let json = serde_json::to_string(&BookLoaded {
                    metadata: book.metadata(),
                    toc: book.toc(),
                })?;
                self.loaded = true;
                self.bridge.on_book_loaded(&json);
            }
            ViewEvent::Relocate(location) => self.relocate(location)?,
            ViewEvent::CreateOverlay { index } => {
                for annotation in self.annotations.for_section(index) {
                    self.view.add_annotation(annotation);
                }
            }
            ViewEvent::DrawAnnotation { value } => {
                if let Some(color) = self.annotations.color(&value) {
                    self.view.draw_highlight(&value, color);
                }
            }
            ViewEvent::ShowAnnotation { value } => {
                if let Some(note) = self.annotations.note(&value) {
                    self.bridge.show_note(note);
                }
            }
        }
        Ok(())
    }

    /// Report a new position unless it repeats the last one.
    pub fn relocate(&mut self, location: Location) -> Result<()> {
        if !self.loaded {
            log::debug!("relocate before book ready: {}", location.cfi);
            return Ok(());
        }
        if let Some(last) = &self.last_location
            && last.cfi == location.cfi
            && last.fraction == location.fraction
        {
            return Ok(());
        }
        let json = serde_json::to_string(&location)?;
        self.last_location = Some(location);
        self.bridge.on_relocated(&json);
        Ok(())
    }

    /// Merge partial configuration and push the result to the view and host.
    pub fn set_appearance(&mut self, style: StylePatch, layout: LayoutPatch) {
        self.style.apply(style);
        self.layout.apply(layout);
        self.apply_appearance();
    }

    pub fn set_appearance_flat(&mut self, appearance: Appearance) {
        let (style, layout) = appearance.into_patches();
        self.set_appearance(style, layout);
    }

    pub fn appearance(&self) -> Appearance {
        Appearance::from_config(&self.style, &self.layout)
    }

    fn apply_appearance(&mut self) {
        if let Some(renderer) = self.view.renderer() {
            for (name, value) in renderer_attributes(&self.layout) {
                renderer.set_attribute(name, &value);
            }
            renderer.set_styles(&stylesheets(&self.style));
        }
        self.bridge.on_chrome_colors(&chrome_colors(&self.style));
    }

    fn require_book(&self) -> Result<&Arc<dyn Book>> {
        self.book.as_ref().ok_or(Error::NotReady)
    }

    pub fn next(&mut self) -> Result<()> {
        self.require_book()?;
        self.view.next()
    }

    pub fn prev(&mut self) -> Result<()> {
        self.require_book()?;
        self.view.prev()
    }

    pub fn go_left(&mut self) -> Result<()> {
        self.require_book()?;
        self.view.go_left()
    }

    pub fn go_right(&mut self) -> Result<()> {
        self.require_book()?;
        self.view.go_right()
    }

    pub fn go_to(&mut self, locator: &str) -> Result<()> {
        self.require_book()?;
        self.view.go_to(locator)
    }

    pub fn go_to_fraction(&mut self, fraction: f64) -> Result<()> {
        self.require_book()?;
        self.view.go_to_fraction(fraction)
    }

    /// Boundary fractions of the open book's linear sections.
    pub fn toc_fractions(&self) -> Result<Vec<f64>> {
        Ok(progress::toc_fractions(self.require_book()?.sections()))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn book(&self) -> Option<&Arc<dyn Book>> {
        self.book.as_ref()
    }

    pub fn style(&self) -> &StyleConfig {
        &self.style
    }

    pub fn layout(&self) -> &LayoutConfig {
        &self.layout
    }

    pub fn last_location(&self) -> Option<&Location> {
        self.last_location.as_ref()
    }

    pub fn annotations(&self) -> &AnnotationIndex {
        &self.annotations
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    pub fn bridge(&self) -> &H {
        &self.bridge
    }

    pub fn bridge_mut(&mut self) -> &mut H {
        &mut self.bridge
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn epub_with_highlight() -> Vec<u8> {
        use base64::Engine;
        let bookmarks = r#"[{"type":"highlight","spine_index":0,"start_cfi":"/2/4/1:0","end_cfi":"/2/4/1:5","style":{"kind":"color","which":"blue"},"notes":"a note","uuid":"u1"}]"#;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bookmarks);

        let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        let files = [
            ("mimetype", "application/epub+zip".to_string()),
            (
                "META-INF/container.xml",
                r#"<container><rootfiles><rootfile full-path="OEBPS/content.opf"/></rootfiles></container>"#.to_string(),
            ),
            (
                "OEBPS/content.opf",
                r#"<package><metadata xmlns:dc="http://purl.org/dc/elements/1.1/"><dc:title>Marked</dc:title></metadata>
                <manifest><item id="c1" href="c1.xhtml" media-type="application/xhtml+xml"/><item id="c2" href="c2.xhtml" media-type="application/xhtml+xml"/></manifest>
                <spine><itemref idref="c1"/><itemref idref="c2"/></spine></package>"#.to_string(),
            ),
            ("OEBPS/c1.xhtml", "<html><body><p>first</p></body></html>".to_string()),
            ("OEBPS/c2.xhtml", "<html><body><p>second</p></body></html>".to_string()),
            (
                "META-INF/calibre_bookmarks.txt",
                format!("encoding=json+base64:\n{encoded}"),
            ),
        ];
        for (name, content) in files {
            zip.start_file(name, options).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap().into_inner()
    }

    fn session() -> ReadingSession<HeadlessView, RecordingBridge> {
        ReadingSession::new(HeadlessView::new(16), RecordingBridge::new())
    }

    fn loaded(notifications: &[Notification]) -> usize {
        notifications
            .iter()
            .filter(|n| matches!(n, Notification::BookLoaded(_)))
            .count()
    }

    #[test]
    fn test_open_reports_book_once() {
        let mut session = session();
        session
            .open(&Source::from_bytes("marked.epub", epub_with_highlight()))
            .unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        session.pump().unwrap();
        session.next().unwrap();
        session.next().unwrap();
        session.pump().unwrap();

        let notifications = session.bridge_mut().take();
        assert_eq!(loaded(&notifications), 1);
        let Some(Notification::BookLoaded(json)) = notifications
            .iter()
            .find(|n| matches!(n, Notification::BookLoaded(_)))
        else {
            unreachable!()
        };
        let json: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(json["title"], "Marked");
        assert!(json["toc"].is_array());
    }

    #[test]
    fn test_overlay_draws_imported_highlight() {
        let mut session = session();
        session
            .open(&Source::from_bytes("marked.epub", epub_with_highlight()))
            .unwrap();
        session.pump().unwrap();

        let value = "epubcfi(/6/2!/4,/1:0,/1:5)";
        assert_eq!(
            session.view().highlights,
            [(value.to_string(), "blue".to_string())]
        );

        session.view_mut().activate(value);
        session.pump().unwrap();
        assert!(
            session
                .bridge()
                .notifications
                .contains(&Notification::Note("a note".into()))
        );
    }

    #[test]
    fn test_relocate_is_deduplicated() {
        let mut session = session();
        session
            .open(&Source::from_bytes("marked.epub", epub_with_highlight()))
            .unwrap();
        session.pump().unwrap();
        session.bridge_mut().take();

        let location = Location {
            cfi: "epubcfi(/6/4!/4/2)".into(),
            fraction: 0.5,
            index: 1,
        };
        session.relocate(location.clone()).unwrap();
        session.relocate(location.clone()).unwrap();
        session
            .relocate(Location {
                fraction: 0.6,
                ..location
            })
            .unwrap();

        let relocated = session
            .bridge()
            .notifications
            .iter()
            .filter(|n| matches!(n, Notification::Relocated(_)))
            .count();
        assert_eq!(relocated, 2);
    }

    #[test]
    fn test_relocate_before_load_is_ignored() {
        let mut session = session();
        session
            .relocate(Location {
                cfi: "epubcfi(/6/2!/4/2)".into(),
                fraction: 0.0,
                index: 0,
            })
            .unwrap();
        assert!(session.bridge().notifications.is_empty());
        assert!(session.last_location().is_none());
    }

    #[test]
    fn test_failed_open_notifies_once() {
        let mut session = session();
        let err = session
            .open(&Source::from_bytes("x.txt", b"plain text".to_vec()))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
        assert_eq!(session.state(), SessionState::Empty);
        assert!(session.book().is_none());

        let notifications = session.bridge_mut().take();
        assert_eq!(notifications.len(), 1);
        let Notification::BookLoadFailed(json) = &notifications[0] else {
            panic!("expected a failure notification, got {notifications:?}");
        };
        let json: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(json["kind"], "UnsupportedFormat");
    }

    #[test]
    fn test_open_while_opening_is_rejected() {
        let mut session = session();
        session.state = SessionState::Opening;
        let err = session
            .open(&Source::from_bytes("marked.epub", epub_with_highlight()))
            .unwrap_err();
        assert!(matches!(err, Error::SessionBusy));
        assert!(session.bridge().notifications.is_empty());
    }

    #[test]
    fn test_navigation_requires_book() {
        let mut session = session();
        assert!(matches!(session.next(), Err(Error::NotReady)));
        assert!(matches!(session.go_to("c1"), Err(Error::NotReady)));
        assert!(matches!(session.toc_fractions(), Err(Error::NotReady)));
    }

    #[test]
    fn test_appearance_reaches_renderer() {
        let mut session = session();
        session
            .open(&Source::from_bytes("marked.epub", epub_with_highlight()))
            .unwrap();
        session.set_appearance_flat(Appearance {
            max_column_count: Some(1),
            use_dark: Some(true),
            ..Default::default()
        });

        let rendered = session.view().rendered();
        assert_eq!(rendered.attributes["max-column-count"], "1");
        assert_eq!(rendered.attributes["flow"], "paginated");
        assert_eq!(rendered.styles.len(), 2);
        assert!(rendered.styles[0].contains("#e0e0e0"));

        let appearance = session.appearance();
        assert_eq!(appearance.use_dark, Some(true));
        assert_eq!(appearance.line_height, Some(1.4));
        assert!(matches!(
            session.bridge().notifications.last(),
            Some(Notification::ChromeColors(colors)) if colors.dark
        ));
    }
}
