//! Small helpers shared by the format parsers.

use std::borrow::Cow;

/// Decode bytes to a string, handling various encodings.
///
/// 1. A declared non-UTF-8 encoding (from `<?xml encoding="..."?>`)
/// 2. UTF-8 (a BOM is handled by encoding_rs)
/// 3. Windows-1252 when UTF-8 is malformed, common in old ebooks
pub fn decode_text<'a>(bytes: &'a [u8], hint_encoding: Option<&str>) -> Cow<'a, str> {
    if let Some(name) = hint_encoding
        && let Some(encoding) = encoding_rs::Encoding::for_label(name.as_bytes())
        && encoding != encoding_rs::UTF_8
    {
        let (result, _, _) = encoding.decode(bytes);
        return result;
    }

    let (result, _encoding, malformed) = encoding_rs::UTF_8.decode(bytes);
    if !malformed {
        return result;
    }

    let (result, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    result
}

/// Decode an XML document, honouring its declared encoding.
pub fn decode_xml(bytes: &[u8]) -> Cow<'_, str> {
    decode_text(bytes, extract_xml_encoding(bytes))
}

/// Extract encoding from the XML declaration in the first ~100 bytes.
pub fn extract_xml_encoding(bytes: &[u8]) -> Option<&str> {
    let prefix = &bytes[..bytes.len().min(100)];

    let xml_start = memchr::memmem::find(prefix, b"<?xml")?;
    let after_xml = &prefix[xml_start..];

    let enc_pos = after_xml
        .windows(9)
        .position(|w| w.eq_ignore_ascii_case(b"encoding="))?;
    let after_enc = &after_xml[enc_pos + 9..];

    let quote = *after_enc.first()?;
    if quote != b'"' && quote != b'\'' {
        return None;
    }

    let value_end = memchr::memchr(quote, &after_enc[1..])? + 1;
    std::str::from_utf8(&after_enc[1..value_end]).ok()
}

/// Strip UTF-8 BOM if present.
pub fn strip_bom(data: &[u8]) -> &[u8] {
    data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data)
}

/// Extract local name from a potentially namespaced XML name.
pub fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

/// Value of an attribute matched by local name, with entities unescaped.
pub fn attr_value(element: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| local_name(attr.key.as_ref()) == key)
        .map(|attr| {
            let raw = String::from_utf8_lossy(&attr.value).into_owned();
            match quick_xml::escape::unescape(&raw) {
                Ok(unescaped) => unescaped.into_owned(),
                Err(_) => raw,
            }
        })
}

/// Resolve an XML entity reference (`&apos;` etc.) to its text.
pub fn resolve_entity(entity: &[u8]) -> Cow<'static, str> {
    match entity {
        b"apos" => Cow::Borrowed("'"),
        b"quot" => Cow::Borrowed("\""),
        b"lt" => Cow::Borrowed("<"),
        b"gt" => Cow::Borrowed(">"),
        b"amp" => Cow::Borrowed("&"),
        b"nbsp" => Cow::Borrowed("\u{a0}"),
        other => {
            let s = std::str::from_utf8(other).unwrap_or("");
            let code = if let Some(hex) = s.strip_prefix("#x").or_else(|| s.strip_prefix("#X")) {
                u32::from_str_radix(hex, 16).ok()
            } else if let Some(dec) = s.strip_prefix('#') {
                dec.parse().ok()
            } else {
                None
            };
            code.and_then(char::from_u32)
                .map(|c| Cow::Owned(c.to_string()))
                .unwrap_or(Cow::Borrowed(""))
        }
    }
}

/// ASCII case-insensitive suffix test, for declared file names.
pub fn ends_with_ignore_case(name: &str, suffix: &str) -> bool {
    name.len() >= suffix.len()
        && name.as_bytes()[name.len() - suffix.len()..].eq_ignore_ascii_case(suffix.as_bytes())
}

/// File name without directories and without its last extension.
pub fn file_stem(name: &str) -> &str {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match base.rfind('.') {
        Some(0) | None => base,
        Some(dot) => &base[..dot],
    }
}

/// Guess a MIME type from a path's extension.
pub fn mime_from_path(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "xhtml" | "xht" => "application/xhtml+xml",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "xml" | "opf" => "application/xml",
        "ncx" => "application/x-dtbncx+xml",
        "fb2" => "application/x-fictionbook+xml",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "bmp" => "image/bmp",
        "jxl" => "image/jxl",
        "avif" => "image/avif",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "txt" => "text/plain",
        _ => return None,
    };
    Some(mime)
}

/// Detect image type from magic bytes.
pub fn detect_image_type(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if data.starts_with(b"\x89PNG") {
        Some("image/png")
    } else if data.starts_with(b"GIF8") {
        Some("image/gif")
    } else if data.starts_with(b"BM") {
        Some("image/bmp")
    } else if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_text_utf8() {
        assert_eq!(decode_text("Привет".as_bytes(), None), "Привет");
    }

    #[test]
    fn test_decode_text_windows_1251_hint() {
        // "Мир" in windows-1251
        let bytes = [0xCC, 0xE8, 0xF0];
        assert_eq!(decode_text(&bytes, Some("windows-1251")), "Мир");
    }

    #[test]
    fn test_decode_text_falls_back_to_cp1252() {
        let bytes = [b'c', b'a', b'f', 0xE9];
        assert_eq!(decode_text(&bytes, None), "café");
    }

    #[test]
    fn test_extract_xml_encoding() {
        let xml = br#"<?xml version="1.0" encoding='windows-1251'?><a/>"#;
        assert_eq!(extract_xml_encoding(xml), Some("windows-1251"));
        assert_eq!(extract_xml_encoding(b"<a/>"), None);
    }

    #[test]
    fn test_local_name() {
        assert_eq!(local_name(b"dc:title"), b"title");
        assert_eq!(local_name(b"title"), b"title");
        assert_eq!(local_name(b"opf:meta"), b"meta");
    }

    #[test]
    fn test_attr_value_unescapes() {
        let element = quick_xml::events::BytesStart::from_content(
            r##"a xlink:href="#cover" title="Tom &amp; Jerry""##,
            1,
        );
        assert_eq!(attr_value(&element, b"href").as_deref(), Some("#cover"));
        assert_eq!(attr_value(&element, b"title").as_deref(), Some("Tom & Jerry"));
        assert_eq!(attr_value(&element, b"missing"), None);
    }

    #[test]
    fn test_resolve_entity() {
        assert_eq!(resolve_entity(b"apos"), "'");
        assert_eq!(resolve_entity(b"#x41"), "A");
        assert_eq!(resolve_entity(b"#66"), "B");
        assert_eq!(resolve_entity(b"bogus"), "");
    }

    #[test]
    fn test_ends_with_ignore_case() {
        assert!(ends_with_ignore_case("Book.FB2.zip", ".fb2.zip"));
        assert!(!ends_with_ignore_case("zip", ".fb2.zip"));
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("comics/Issue 01.cbz"), "Issue 01");
        assert_eq!(file_stem(".hidden"), ".hidden");
        assert_eq!(file_stem("plain"), "plain");
    }

    #[test]
    fn test_mime_from_path() {
        assert_eq!(mime_from_path("OEBPS/images/Cover.JPG"), Some("image/jpeg"));
        assert_eq!(mime_from_path("README"), None);
    }

    #[test]
    fn test_detect_image_type() {
        assert_eq!(detect_image_type(b"\x89PNG\r\n"), Some("image/png"));
        assert_eq!(detect_image_type(b"nope"), None);
    }
}
