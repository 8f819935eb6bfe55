//! lectern - inspect e-books and drive a headless reading session

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde::Serialize;

use lectern::appearance::ChromeColors;
use lectern::session::{HeadlessView, ReadingSession, progress};
use lectern::{Annotation, AnnotationIndex, Appearance, BookDispatcher, HostBridge, Source, TocEntry};

#[derive(Parser)]
#[command(name = "lectern")]
#[command(version, about = "Open e-books and drive a reading session", long_about = None)]
#[command(after_help = "EXAMPLES:
    lectern info book.epub                 Show what the book contains
    lectern info book.fb2.zip --json       Same, as JSON
    lectern read book.mobi --pages 10      Turn ten pages, printing notifications")]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show classification, metadata and structure
    Info {
        /// Input file or unpacked EPUB directory
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Print a single JSON document
        #[arg(long)]
        json: bool,
    },
    /// Open the book in a headless session and turn pages
    Read {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Pages to turn after opening
        #[arg(short, long, default_value_t = 5)]
        pages: usize,

        /// JSON appearance record to apply before reading
        #[arg(short, long, value_name = "FILE")]
        appearance: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = match cli.command {
        Command::Info { input, json } => show_info(&input, json),
        Command::Read {
            input,
            pages,
            appearance,
        } => read(&input, pages, appearance.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[derive(Serialize)]
struct Info<'a> {
    classification: String,
    metadata: &'a lectern::Metadata,
    sections: usize,
    toc: &'a [TocEntry],
    toc_fractions: Vec<f64>,
    highlights: Vec<&'a Annotation>,
    fonts: usize,
    cover: Option<String>,
}

fn show_info(path: &std::path::Path, json: bool) -> Result<(), String> {
    let source = Source::open(path).map_err(|e| e.to_string())?;
    let classification = source.classification().map_err(|e| e.to_string())?;
    let book = BookDispatcher::new()
        .open(&source)
        .map_err(|e| e.to_string())?;
    let annotations = AnnotationIndex::from_book(book.as_ref()).unwrap_or_else(|e| {
        log::warn!("ignoring embedded bookmarks: {e}");
        AnnotationIndex::default()
    });
    let fonts = book.embedded_fonts().map(|f| f.len()).unwrap_or(0);
    let cover = book
        .cover()
        .ok()
        .flatten()
        .map(|blob| blob.mime.unwrap_or_else(|| "unknown".into()));

    let info = Info {
        classification: classification.to_string(),
        metadata: book.metadata(),
        sections: book.sections().len(),
        toc: book.toc(),
        toc_fractions: progress::toc_fractions(book.sections()),
        highlights: annotations.iter().collect(),
        fonts,
        cover,
    };

    if json {
        let out = serde_json::to_string_pretty(&info).map_err(|e| e.to_string())?;
        println!("{out}");
        return Ok(());
    }

    let meta = info.metadata;
    println!("File: {}", path.display());
    println!("Format: {}", info.classification);
    if let Some(title) = &meta.title {
        println!("Title: {title}");
    }
    if !meta.author.is_empty() {
        println!("Authors: {}", meta.author.join(", "));
    }
    if let Some(language) = &meta.language {
        println!("Language: {language}");
    }
    if let Some(publisher) = &meta.publisher {
        println!("Publisher: {publisher}");
    }
    if let Some(desc) = &meta.description {
        let desc = desc.trim();
        match desc.char_indices().nth(200) {
            Some((end, _)) => println!("Description: {}...", &desc[..end]),
            None => println!("Description: {desc}"),
        }
    }
    if let Some(cover) = &info.cover {
        println!("Cover: {cover}");
    }
    println!("Sections: {}", info.sections);
    println!("TOC entries: {}", info.toc.len());
    print_toc(info.toc, 1);
    if !info.toc_fractions.is_empty() {
        let fractions: Vec<String> = info
            .toc_fractions
            .iter()
            .map(|f| format!("{:.3}", f))
            .collect();
        println!("Section boundaries: {}", fractions.join(" "));
    }
    println!("Highlights: {}", info.highlights.len());
    println!("Embedded fonts: {}", info.fonts);

    Ok(())
}

fn print_toc(entries: &[TocEntry], depth: usize) {
    for entry in entries {
        println!("{}{} ({})", "  ".repeat(depth), entry.title, entry.href);
        print_toc(&entry.children, depth + 1);
    }
}

/// Prints each notification as one JSON line.
struct StdoutBridge;

impl StdoutBridge {
    fn emit(event: &str, payload: &str) {
        println!(r#"{{"event":"{event}","payload":{payload}}}"#);
    }
}

impl HostBridge for StdoutBridge {
    fn on_book_loaded(&mut self, json: &str) {
        Self::emit("bookLoaded", json);
    }

    fn on_book_load_failed(&mut self, json: &str) {
        Self::emit("bookLoadFailed", json);
    }

    fn on_relocated(&mut self, json: &str) {
        Self::emit("relocated", json);
    }

    fn show_note(&mut self, note: &str) {
        if let Ok(json) = serde_json::to_string(note) {
            Self::emit("note", &json);
        }
    }

    fn on_chrome_colors(&mut self, colors: &ChromeColors) {
        if let Ok(json) = serde_json::to_string(colors) {
            Self::emit("chromeColors", &json);
        }
    }
}

fn read(
    path: &std::path::Path,
    pages: usize,
    appearance: Option<&std::path::Path>,
) -> Result<(), String> {
    let mut session = ReadingSession::new(HeadlessView::default(), StdoutBridge);

    if let Some(file) = appearance {
        let text = std::fs::read_to_string(file).map_err(|e| e.to_string())?;
        let appearance: Appearance = serde_json::from_str(&text).map_err(|e| e.to_string())?;
        session.set_appearance_flat(appearance);
    }

    let source = Source::open(path).map_err(|e| e.to_string())?;
    session.open(&source).map_err(|e| e.to_string())?;
    session.pump().map_err(|e| e.to_string())?;

    for _ in 0..pages {
        session.next().map_err(|e| e.to_string())?;
        session.pump().map_err(|e| e.to_string())?;
    }
    Ok(())
}
