use std::borrow::Cow;
use std::sync::{Arc, OnceLock};

use memchr::memmem;
use quick_xml::events::BytesStart;

use super::headers::{Compression, MobiHeader, NULL_INDEX, PDB_HEADER_LEN, PdbHeader, strip_trailing_data};
use super::palmdoc;
use crate::book::{Blob, Book, Metadata, Section, TocEntry};
use crate::dispatch::{BookParser, Inflate, ParserInput, wrong_input};
use crate::error::{Error, Result};
use crate::io::ByteSource;
use crate::util::detect_image_type;

const PAGEBREAK: &[u8] = b"<mbp:pagebreak";

/// Bytes of a font record's payload covered by its XOR key.
const FONT_XOR_LEN: usize = 1040;

/// Parser for MOBI (`BOOKMOBI`) and PalmDOC (`TEXtREAd`) databases.
#[derive(Debug, Clone, Copy, Default)]
pub struct MobiParser;

impl BookParser for MobiParser {
    fn parse(&self, input: ParserInput) -> Result<Box<dyn Book>> {
        match input {
            ParserInput::Binary { source, inflate } => Ok(Box::new(MobiBook::open(source, inflate)?)),
            other => Err(wrong_input("MOBI", &other)),
        }
    }
}

/// A MOBI book. Text records are decompressed once at open; images and
/// fonts are read from the source on demand.
pub struct MobiBook {
    source: Arc<dyn ByteSource>,
    pdb: PdbHeader,
    inflate: Inflate,
    metadata: Metadata,
    toc: Vec<TocEntry>,
    sections: Vec<Section>,
    first_resource: usize,
    cover_record: Option<usize>,
    cover: OnceLock<Option<Blob>>,
}

impl MobiBook {
    pub fn open(source: Arc<dyn ByteSource>, inflate: Inflate) -> Result<Self> {
        let prefix = source.read_prefix(PDB_HEADER_LEN)?;
        let record_count = PdbHeader::record_count(&prefix)?;
        let table = source.read_prefix(PDB_HEADER_LEN + record_count * 8)?;
        let pdb = PdbHeader::parse(&table)?;

        let record0 = read_record(source.as_ref(), &pdb, 0)?;
        let header = MobiHeader::parse(&record0)?;
        if header.encryption != 0 {
            return Err(Error::Parse("encrypted MOBI files are not supported".into()));
        }
        match header.compression {
            Compression::None | Compression::PalmDoc => {}
            Compression::Huffman => {
                return Err(Error::Parse("HUFF/CDIC compressed MOBI files are not supported".into()));
            }
            Compression::Unknown(n) => {
                return Err(Error::Parse(format!("unknown MOBI compression {n}")));
            }
        }
        let exth = header.exth(&record0);

        let mut text = Vec::new();
        let last_text = (header.text_record_count as usize).min(pdb.record_offsets.len() - 1);
        for index in 1..=last_text {
            let record = read_record(source.as_ref(), &pdb, index)?;
            let record = strip_trailing_data(&record, header.extra_data_flags);
            match header.compression {
                Compression::PalmDoc => text.extend_from_slice(&palmdoc::decompress(record)),
                _ => text.extend_from_slice(record),
            }
        }

        let (sections, starts) = split_sections(&text);
        let decode = |bytes: &[u8]| header.encoding.decode(bytes);
        let mut toc = toc_page_entries(&text, &sections, &starts, &decode);
        if toc.is_empty() {
            toc = guide_entries(&text, &sections, &starts, &decode);
        }

        let mut metadata = Metadata::default();
        let title = exth
            .as_ref()
            .and_then(|exth| exth.title.clone())
            .filter(|t| !t.is_empty())
            .or_else(|| Some(header.title.clone()).filter(|t| !t.is_empty()))
            .unwrap_or_else(|| pdb.name.replace('_', " "));
        metadata.title = Some(title.clone());
        if let Some(exth) = &exth {
            metadata.author = exth.authors.clone();
            metadata.contributor = exth.contributors.clone();
            metadata.publisher = exth.publisher.clone();
            metadata.description = exth.description.clone();
            metadata.identifier = exth.isbn.clone().or_else(|| exth.asin.clone());
            metadata.subject = exth.subjects.clone();
            metadata.published = exth.pub_date.clone();
            metadata.rights = exth.rights.clone();
            metadata.language = exth.language.clone();
        }

        if toc.is_empty()
            && let Some(first) = sections.first()
        {
            toc.push(TocEntry::new(title, first.id.as_str()));
        }

        let first_resource = if header.first_image_index == NULL_INDEX {
            last_text + 1
        } else {
            header.first_image_index as usize
        };
        let cover_record = exth
            .as_ref()
            .and_then(|exth| exth.cover_offset)
            .map(|offset| first_resource + offset as usize)
            .filter(|&index| index < pdb.record_offsets.len());

        log::debug!(
            "MOBI v{} {:?}: {} text bytes in {} sections",
            header.mobi_version,
            metadata.title,
            text.len(),
            sections.len()
        );

        Ok(Self {
            source,
            pdb,
            inflate,
            metadata,
            toc,
            sections,
            first_resource,
            cover_record,
            cover: OnceLock::new(),
        })
    }

    fn record(&self, index: usize) -> Result<Vec<u8>> {
        read_record(self.source.as_ref(), &self.pdb, index)
    }
}

fn read_record(source: &dyn ByteSource, pdb: &PdbHeader, index: usize) -> Result<Vec<u8>> {
    let (start, end) = pdb.record_range(index, source.len())?;
    Ok(source.read_at(start, (end - start) as usize)?)
}

/// Split decompressed text at page breaks. Returns the sections and the
/// text offset where each starts.
fn split_sections(text: &[u8]) -> (Vec<Section>, Vec<usize>) {
    let mut bounds: Vec<usize> = vec![0];
    bounds.extend(memmem::find_iter(text, PAGEBREAK).filter(|&pos| pos > 0));
    bounds.push(text.len());
    bounds.dedup();

    let mut sections = Vec::new();
    let mut starts = Vec::new();
    for window in bounds.windows(2) {
        let (start, end) = (window[0], window[1]);
        if text[start..end].iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        sections.push(Section::new(format!("part{:04}", sections.len()), (end - start) as u64));
        starts.push(start);
    }
    (sections, starts)
}

/// `part#####filepos<n>` for a text offset.
fn filepos_href(sections: &[Section], starts: &[usize], pos: usize) -> Option<String> {
    let index = starts.partition_point(|&start| start <= pos).checked_sub(1)?;
    Some(format!("{}#filepos{pos}", sections[index].id))
}

/// `(attributes, element end)` of each `<name ...>` tag in `text`.
fn tags<'a>(text: &'a [u8], name: &'a [u8]) -> impl Iterator<Item = (BytesStart<'static>, usize)> + 'a {
    let mut needle = b"<".to_vec();
    needle.extend_from_slice(name);
    memmem::find_iter(text, &needle)
        .map(|pos| pos + 1)
        .collect::<Vec<_>>()
        .into_iter()
        .filter_map(move |start| {
            let after = text.get(start + name.len())?;
            if !after.is_ascii_whitespace() {
                return None;
            }
            let end = start + memchr::memchr(b'>', &text[start..])?;
            let content = String::from_utf8_lossy(&text[start..end]);
            let content = content.trim_end_matches('/').trim_end().to_string();
            Some((BytesStart::from_content(content, name.len()), end + 1))
        })
}

fn html_attr(element: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    element
        .html_attributes()
        .flatten()
        .find(|attr| attr.key.as_ref().eq_ignore_ascii_case(key))
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}

fn filepos_attr(element: &BytesStart<'_>) -> Option<usize> {
    html_attr(element, b"filepos")?.trim().parse().ok()
}

/// Text of markup with tags removed, entities unescaped and whitespace
/// collapsed.
fn plain_text(markup: &[u8], decode: &dyn Fn(&[u8]) -> String) -> String {
    let mut bytes = Vec::with_capacity(markup.len());
    let mut in_tag = false;
    for &b in markup {
        match b {
            b'<' => in_tag = true,
            b'>' => in_tag = false,
            _ if !in_tag => bytes.push(b),
            _ => {}
        }
    }
    let text = decode(&bytes);
    let unescaped = quick_xml::escape::unescape(&text).unwrap_or(Cow::Borrowed(&text)).into_owned();
    unescaped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Entries linked from the page the guide's `toc` reference points to.
fn toc_page_entries(
    text: &[u8],
    sections: &[Section],
    starts: &[usize],
    decode: &dyn Fn(&[u8]) -> String,
) -> Vec<TocEntry> {
    let Some(toc_pos) = tags(text, b"reference")
        .find(|(e, _)| html_attr(e, b"type").is_some_and(|t| t.eq_ignore_ascii_case("toc")))
        .and_then(|(e, _)| filepos_attr(&e))
        .filter(|&pos| pos < text.len())
    else {
        return Vec::new();
    };

    let page_end = memmem::find(&text[toc_pos + 1..], PAGEBREAK)
        .map(|offset| toc_pos + 1 + offset)
        .unwrap_or(text.len());
    let page = &text[toc_pos..page_end];

    tags(page, b"a")
        .filter_map(|(e, content_start)| {
            let target = filepos_attr(&e)?;
            let content_end = content_start + memmem::find(&page[content_start..], b"</a>")?;
            let title = plain_text(&page[content_start..content_end], decode);
            if title.is_empty() {
                return None;
            }
            Some(TocEntry::new(title, filepos_href(sections, starts, target)?))
        })
        .collect()
}

/// Titled guide references, when no TOC page exists.
fn guide_entries(
    text: &[u8],
    sections: &[Section],
    starts: &[usize],
    decode: &dyn Fn(&[u8]) -> String,
) -> Vec<TocEntry> {
    tags(text, b"reference")
        .filter_map(|(e, _)| {
            let title = plain_text(html_attr(&e, b"title")?.as_bytes(), decode);
            let href = filepos_href(sections, starts, filepos_attr(&e)?)?;
            (!title.is_empty()).then(|| TocEntry::new(title, href))
        })
        .collect()
}

/// Decode a `FONT` record: optional XOR obfuscation over the start of the
/// payload, then optional zlib compression.
fn decode_font(record: &[u8], inflate: &Inflate) -> Result<Blob> {
    if record.len() < 24 || &record[..4] != b"FONT" {
        return Err(Error::Parse("not a FONT record".into()));
    }
    let field = |at: usize| u32::from_be_bytes([record[at], record[at + 1], record[at + 2], record[at + 3]]) as usize;
    let (size, flags, data_start, key_len, key_start) = (field(4), field(8), field(12), field(16), field(20));

    let mut data = record
        .get(data_start..)
        .ok_or_else(|| Error::Parse("FONT payload offset out of range".into()))?
        .to_vec();

    if flags & 0b10 != 0 && key_len > 0 {
        let key = record
            .get(key_start..key_start + key_len)
            .ok_or_else(|| Error::Parse("FONT key out of range".into()))?;
        for (i, byte) in data.iter_mut().take(FONT_XOR_LEN).enumerate() {
            *byte ^= key[i % key_len];
        }
    }

    if flags & 0b1 != 0 {
        data = inflate(&data).map_err(|e| Error::Parse(format!("FONT record: {e}")))?;
    }
    if data.len() != size {
        log::warn!("FONT record declared {size} bytes but decoded to {}", data.len());
    }

    let mime = detect_font_type(&data);
    Ok(Blob::new(data, mime))
}

fn detect_font_type(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0x00, 0x01, 0x00, 0x00]) || data.starts_with(b"true") {
        Some("font/ttf")
    } else if data.starts_with(b"OTTO") {
        Some("font/otf")
    } else if data.starts_with(b"wOFF") {
        Some("font/woff")
    } else if data.starts_with(b"wOF2") {
        Some("font/woff2")
    } else {
        None
    }
}

impl Book for MobiBook {
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
        if let Some(cover) = self.cover.get() {
            return Ok(cover.clone());
        }
        let cover = match self.cover_record {
            Some(index) => {
                let data = self.record(index)?;
                let mime = detect_image_type(&data);
                Some(Blob::new(data, mime))
            }
            None => None,
        };
        Ok(self.cover.get_or_init(|| cover).clone())
    }

    fn embedded_fonts(&self) -> Result<Vec<Blob>> {
        let file_len = self.source.len();
        let mut fonts = Vec::new();
        for index in self.first_resource..self.pdb.record_offsets.len() {
            let (start, end) = self.pdb.record_range(index, file_len)?;
            if end - start < 4 || self.source.read_at(start, 4)? != b"FONT" {
                continue;
            }
            match decode_font(&self.record(index)?, &self.inflate) {
                Ok(font) => fonts.push(font),
                Err(e) => log::warn!("skipping font in record {index}: {e}"),
            }
        }
        Ok(fonts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::zlib_inflate;
    use crate::io::MemorySource;
    use std::io::Write;

    /// Assemble a BOOKMOBI database from text and resource records.
    fn mobi_file(
        compression: u16,
        encryption: u16,
        text: &[&[u8]],
        exth: &[(u32, Vec<u8>)],
        resources: &[Vec<u8>],
    ) -> Vec<u8> {
        let mut record0 = vec![0u8; 16 + 0xE8];
        record0[0..2].copy_from_slice(&compression.to_be_bytes());
        record0[8..10].copy_from_slice(&(text.len() as u16).to_be_bytes());
        record0[10..12].copy_from_slice(&4096u16.to_be_bytes());
        record0[12..14].copy_from_slice(&encryption.to_be_bytes());
        record0[16..20].copy_from_slice(b"MOBI");
        record0[20..24].copy_from_slice(&0xE8u32.to_be_bytes());
        record0[28..32].copy_from_slice(&65001u32.to_be_bytes());
        record0[0x6C..0x70].copy_from_slice(&(1 + text.len() as u32).to_be_bytes());
        record0[0x80..0x84].copy_from_slice(&0x40u32.to_be_bytes());

        let mut block = Vec::new();
        for (kind, content) in exth {
            block.extend_from_slice(&kind.to_be_bytes());
            block.extend_from_slice(&((8 + content.len()) as u32).to_be_bytes());
            block.extend_from_slice(content);
        }
        record0.extend_from_slice(b"EXTH");
        record0.extend_from_slice(&((12 + block.len()) as u32).to_be_bytes());
        record0.extend_from_slice(&(exth.len() as u32).to_be_bytes());
        record0.extend_from_slice(&block);

        let title = b"Header Title";
        let title_offset = record0.len() as u32;
        record0.extend_from_slice(title);
        record0[0x54..0x58].copy_from_slice(&title_offset.to_be_bytes());
        record0[0x58..0x5C].copy_from_slice(&(title.len() as u32).to_be_bytes());

        let mut records = vec![record0];
        records.extend(text.iter().map(|t| t.to_vec()));
        records.extend(resources.iter().cloned());

        let mut file = vec![0u8; PDB_HEADER_LEN];
        file[..9].copy_from_slice(b"Some_Book");
        file[60..68].copy_from_slice(b"BOOKMOBI");
        file[76..78].copy_from_slice(&(records.len() as u16).to_be_bytes());
        let mut offset = PDB_HEADER_LEN + records.len() * 8 + 2;
        for record in &records {
            file.extend_from_slice(&(offset as u32).to_be_bytes());
            file.extend_from_slice(&[0; 4]);
            offset += record.len();
        }
        file.extend_from_slice(&[0, 0]);
        for record in &records {
            file.extend_from_slice(record);
        }
        file
    }

    fn open(file: Vec<u8>) -> Result<MobiBook> {
        MobiBook::open(Arc::new(MemorySource::new(file)), zlib_inflate())
    }

    fn toc_text() -> String {
        let template = concat!(
            "<html><head><guide><reference type=\"toc\" title=\"Contents\" filepos=TTTTTTTTTT /></guide></head><body>",
            "<mbp:pagebreak/><div><a filepos=AAAAAAAAAA>Chapter One</a><br/><a filepos=BBBBBBBBBB><b>Chapter</b> Two</a></div>",
            "<mbp:pagebreak/><h1>One</h1><p>It begins.</p>",
            "<mbp:pagebreak/><h1>Two</h1><p>It ends.</p></body></html>"
        );
        let toc = template.find("<div>").unwrap();
        let one = template.find("<mbp:pagebreak/><h1>One").unwrap();
        let two = template.find("<mbp:pagebreak/><h1>Two").unwrap();
        template
            .replace("TTTTTTTTTT", &format!("{toc:010}"))
            .replace("AAAAAAAAAA", &format!("{one:010}"))
            .replace("BBBBBBBBBB", &format!("{two:010}"))
    }

    #[test]
    fn test_sections_split_on_pagebreaks() {
        let text = toc_text();
        let (head, tail) = text.as_bytes().split_at(100);
        let book = open(mobi_file(1, 0, &[head, tail], &[], &[])).unwrap();
        let ids: Vec<_> = book.sections().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["part0000", "part0001", "part0002", "part0003"]);
        let total: u64 = book.sections().iter().map(|s| s.size).sum();
        assert_eq!(total, text.len() as u64);
    }

    #[test]
    fn test_toc_from_toc_page() {
        let text = toc_text();
        let one = text.find("<mbp:pagebreak/><h1>One").unwrap();
        let book = open(mobi_file(2, 0, &[text.as_bytes()], &[], &[])).unwrap();
        let toc = book.toc();
        assert_eq!(toc.len(), 2);
        assert_eq!(toc[0].title, "Chapter One");
        assert_eq!(toc[0].href, format!("part0002#filepos{one}"));
        assert_eq!(toc[1].title, "Chapter Two");
        assert!(toc[1].href.starts_with("part0003#"));
    }

    #[test]
    fn test_metadata_prefers_exth() {
        let exth = vec![
            (100, b"Mary Shelley".to_vec()),
            (104, b"978-1".to_vec()),
            (503, b"Frankenstein".to_vec()),
            (524, b"en".to_vec()),
        ];
        let book = open(mobi_file(1, 0, &[b"<p>It was a dreary night</p>"], &exth, &[])).unwrap();
        let metadata = book.metadata();
        assert_eq!(metadata.title.as_deref(), Some("Frankenstein"));
        assert_eq!(metadata.author, ["Mary Shelley"]);
        assert_eq!(metadata.identifier.as_deref(), Some("978-1"));
        assert_eq!(metadata.language.as_deref(), Some("en"));
        assert_eq!(book.toc()[0].title, "Frankenstein");
        assert_eq!(book.toc()[0].href, "part0000");
    }

    #[test]
    fn test_title_falls_back_to_header() {
        let book = open(mobi_file(1, 0, &[b"<p>x</p>"], &[], &[])).unwrap();
        assert_eq!(book.metadata().title.as_deref(), Some("Header Title"));
    }

    #[test]
    fn test_cover_from_exth_offset() {
        let png = b"\x89PNG\r\n\x1a\nfake".to_vec();
        let exth = vec![(201, 1u32.to_be_bytes().to_vec())];
        let resources = vec![b"\xFF\xD8\xFFjpeg".to_vec(), png.clone()];
        let book = open(mobi_file(1, 0, &[b"<p>x</p>"], &exth, &resources)).unwrap();
        let cover = book.cover().unwrap().unwrap();
        assert_eq!(cover.data, png);
        assert_eq!(cover.mime.as_deref(), Some("image/png"));
    }

    #[test]
    fn test_unsupported_variants_fail_to_parse() {
        assert!(matches!(
            open(mobi_file(0x4448, 0, &[b"x"], &[], &[])),
            Err(Error::Parse(_))
        ));
        assert!(matches!(
            open(mobi_file(1, 2, &[b"x"], &[], &[])),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_embedded_font_is_deobfuscated_and_inflated() {
        let font = b"OTTO\x00\x0a font table data".to_vec();
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&font).unwrap();
        let compressed = encoder.finish().unwrap();

        let key = [0x5A, 0xA5, 0x3C, 0xC3];
        let obfuscated: Vec<u8> = compressed
            .iter()
            .enumerate()
            .map(|(i, b)| if i < FONT_XOR_LEN { b ^ key[i % key.len()] } else { *b })
            .collect();

        let mut record = b"FONT".to_vec();
        for value in [font.len() as u32, 0b11, 28, key.len() as u32, 24] {
            record.extend_from_slice(&value.to_be_bytes());
        }
        record.extend_from_slice(&key);
        record.extend_from_slice(&obfuscated);

        let book = open(mobi_file(1, 0, &[b"<p>x</p>"], &[], &[record])).unwrap();
        let fonts = book.embedded_fonts().unwrap();
        assert_eq!(fonts.len(), 1);
        assert_eq!(fonts[0].data, font);
        assert_eq!(fonts[0].mime.as_deref(), Some("font/otf"));
    }

    #[test]
    fn test_dispatches_binary_input_only() {
        assert!(matches!(
            MobiParser.parse(ParserInput::Xml(Vec::new())),
            Err(Error::UnsupportedFormat(_))
        ));
    }
}
