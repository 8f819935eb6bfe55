//! End-to-end dispatch: raw sources in, books out, through the bundled parsers.

use std::io::Write;

use lectern::{BookDispatcher, Classification, Error, Source};
use tempfile::TempDir;

const CONTAINER: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles><rootfile full-path="content.opf" media-type="application/oebps-package+xml"/></rootfiles>
</container>"#;

const OPF: &str = r#"<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Unpacked</dc:title>
    <dc:identifier id="uid">urn:uuid:42</dc:identifier>
    <dc:language>en</dc:language>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ch1" href="text/ch1.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch2" href="text/ch2.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine><itemref idref="nav" linear="no"/><itemref idref="ch1"/><itemref idref="ch2"/></spine>
</package>"#;

const NAV: &str = r#"<html xmlns:epub="http://www.idpf.org/2007/ops"><body>
<nav epub:type="toc"><ol>
  <li><a href="text/ch1.xhtml">One</a></li>
  <li><a href="text/ch2.xhtml#end">Two</a></li>
</ol></nav></body></html>"#;

const FB2: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<FictionBook xmlns="http://www.gribuser.ru/xml/fictionbook/2.0">
  <description><title-info>
    <author><first-name>Mikhail</first-name><last-name>Bulgakov</last-name></author>
    <book-title>The Master and Margarita</book-title>
  </title-info></description>
  <body><section><title><p>Part One</p></title><p>Never talk to strangers.</p></section></body>
</FictionBook>"#;

fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in files {
        zip.start_file(*name, options).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

const EPUB_FILES: &[(&str, &[u8])] = &[
    ("mimetype", b"application/epub+zip"),
    ("META-INF/container.xml", CONTAINER.as_bytes()),
    ("content.opf", OPF.as_bytes()),
    ("nav.xhtml", NAV.as_bytes()),
    ("text/ch1.xhtml", b"<html><body><p>one</p></body></html>"),
    ("text/ch2.xhtml", b"<html><body><p>two, longer</p></body></html>"),
];

fn unpack(files: &[(&str, &[u8])]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (name, data) in files {
        let path = dir.path().join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, data).unwrap();
    }
    dir
}

#[test]
fn test_directory_epub_uses_directory_storage() {
    let dir = unpack(EPUB_FILES);

    let source = Source::open(dir.path()).unwrap();
    assert_eq!(source.classification().unwrap(), Classification::Directory);

    let book = BookDispatcher::new().open(&source).unwrap();
    assert_eq!(book.metadata().title.as_deref(), Some("Unpacked"));
    assert_eq!(book.metadata().identifier.as_deref(), Some("urn:uuid:42"));

    let sections: Vec<_> = book
        .sections()
        .iter()
        .map(|s| (s.id.as_str(), s.linear))
        .collect();
    assert_eq!(
        sections,
        [("nav.xhtml", false), ("text/ch1.xhtml", true), ("text/ch2.xhtml", true)]
    );
    assert_eq!(book.sections()[1].size, 36);

    let hrefs: Vec<_> = book.toc().iter().map(|e| e.href.as_str()).collect();
    assert_eq!(hrefs, ["text/ch1.xhtml", "text/ch2.xhtml#end"]);
}

#[test]
fn test_zipped_and_unpacked_epub_agree() {
    let dir = unpack(EPUB_FILES);
    let dispatcher = BookDispatcher::new();
    let unpacked = dispatcher.open(&Source::open(dir.path()).unwrap()).unwrap();
    let zipped = dispatcher
        .open(&Source::from_bytes("book.epub", zip_bytes(EPUB_FILES)))
        .unwrap();

    assert_eq!(unpacked.metadata(), zipped.metadata());
    assert_eq!(unpacked.toc(), zipped.toc());
    assert_eq!(unpacked.sections(), zipped.sections());
}

#[test]
fn test_zipped_fb2_reads_named_entry() {
    let zip = zip_bytes(&[
        ("cover.jpg", b"\xff\xd8\xff not xml"),
        ("book.fb2", FB2.as_bytes()),
    ]);
    let source = Source::from_bytes("book.fb2.zip", zip);
    assert_eq!(source.classification().unwrap(), Classification::CompressedXml);

    let book = BookDispatcher::new().open(&source).unwrap();
    assert_eq!(
        book.metadata().title.as_deref(),
        Some("The Master and Margarita")
    );
    assert_eq!(book.metadata().author, ["Mikhail Bulgakov"]);
    assert_eq!(book.toc()[0].title, "Part One");
}

#[test]
fn test_plain_fb2() {
    let source = Source::from_bytes("master.fb2", FB2.as_bytes().to_vec());
    let book = BookDispatcher::new().open(&source).unwrap();
    assert_eq!(book.sections().len(), 1);
}

#[test]
fn test_comic_book_archive() {
    let zip = zip_bytes(&[
        ("02.png", b"\x89PNG page two"),
        ("01.png", b"\x89PNG page one"),
        ("__MACOSX/._01.png", b"junk"),
        ("notes.txt", b"not a page"),
    ]);
    let source = Source::from_bytes("Watchmen 01.cbz", zip);
    assert_eq!(source.classification().unwrap(), Classification::ImageArchive);

    let book = BookDispatcher::new().open(&source).unwrap();
    assert_eq!(book.metadata().title.as_deref(), Some("Watchmen 01"));
    let pages: Vec<_> = book.sections().iter().map(|s| s.id.as_str()).collect();
    assert_eq!(pages, ["01.png", "02.png"]);
    assert_eq!(book.cover().unwrap().unwrap().data, b"\x89PNG page one");
}

#[test]
fn test_unknown_source_is_unsupported() {
    let source = Source::from_bytes("x.txt", b"0123456789".to_vec());
    assert!(matches!(
        BookDispatcher::new().open(&source),
        Err(Error::UnsupportedFormat(_))
    ));
}

#[test]
fn test_zero_byte_source_is_not_found() {
    let source = Source::from_bytes("empty.epub", Vec::new());
    assert!(matches!(
        BookDispatcher::new().open(&source),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn test_corrupt_archive_is_a_parse_error() {
    let mut bytes = b"PK\x03\x04".to_vec();
    bytes.extend_from_slice(&[0u8; 60]);
    let source = Source::from_bytes("broken.epub", bytes);
    assert!(matches!(
        BookDispatcher::new().open(&source),
        Err(Error::Parse(_) | Error::Transport(_))
    ));
}
