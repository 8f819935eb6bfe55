//! PDB, MOBI and EXTH header parsing. Pure functions over byte slices.

use crate::error::{Error, Result};

pub const NULL_INDEX: u32 = 0xFFFFFFFF;

/// Length of the fixed PDB header preceding the record table.
pub const PDB_HEADER_LEN: usize = 78;

fn be_u16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn be_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Palm database header: name plus the record offset table.
#[derive(Debug)]
pub struct PdbHeader {
    pub name: String,
    pub record_offsets: Vec<u32>,
}

impl PdbHeader {
    /// Number of records declared in a PDB header prefix.
    pub fn record_count(prefix: &[u8]) -> Result<usize> {
        if prefix.len() < PDB_HEADER_LEN {
            return Err(Error::Parse("PDB header too short".into()));
        }
        Ok(be_u16(prefix, 76) as usize)
    }

    /// Parse the header and its record table (`78 + 8 * n` bytes).
    pub fn parse(data: &[u8]) -> Result<Self> {
        let num_records = Self::record_count(data)?;

        // Bytes 60-67: type/creator
        let ident = &data[60..68];
        if ident != b"BOOKMOBI" && ident != b"TEXtREAd" {
            return Err(Error::Parse(format!(
                "unknown PDB type {:?}",
                String::from_utf8_lossy(ident)
            )));
        }

        if data.len() < PDB_HEADER_LEN + num_records * 8 {
            return Err(Error::Parse("PDB record table truncated".into()));
        }

        let name_end = data[..32].iter().position(|&b| b == 0).unwrap_or(32);
        let record_offsets = (0..num_records)
            .map(|i| be_u32(data, PDB_HEADER_LEN + i * 8))
            .collect();

        Ok(Self {
            name: String::from_utf8_lossy(&data[..name_end]).into_owned(),
            record_offsets,
        })
    }

    /// Byte range of record `index` within a file of `file_len` bytes.
    pub fn record_range(&self, index: usize, file_len: u64) -> Result<(u64, u64)> {
        let start = *self
            .record_offsets
            .get(index)
            .ok_or_else(|| Error::Parse(format!("record {index} out of bounds")))?
            as u64;
        let end = self
            .record_offsets
            .get(index + 1)
            .map(|&offset| offset as u64)
            .unwrap_or(file_len);
        if end < start || end > file_len {
            return Err(Error::Parse(format!("record {index} has an invalid range")));
        }
        Ok((start, end))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    PalmDoc,
    Huffman,
    Unknown(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Cp1252,
    Utf8,
    Unknown(u32),
}

impl Encoding {
    /// encoding_rs label for text decoding.
    pub fn label(self) -> &'static str {
        match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Cp1252 | Encoding::Unknown(_) => "windows-1252",
        }
    }

    pub fn decode(self, bytes: &[u8]) -> String {
        crate::util::decode_text(bytes, Some(self.label())).into_owned()
    }
}

/// Record 0: the PalmDOC header, followed for MOBI files by the MOBI header.
#[derive(Debug, Clone)]
pub struct MobiHeader {
    pub compression: Compression,
    pub text_record_count: u16,
    pub encryption: u16,
    pub encoding: Encoding,
    pub mobi_version: u32,
    pub first_image_index: u32,
    pub title: String,
    pub exth_flags: u32,
    pub extra_data_flags: u16,
    pub header_length: u32,
}

impl MobiHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 16 {
            return Err(Error::Parse("MOBI header too short".into()));
        }

        let compression = match be_u16(data, 0) {
            1 => Compression::None,
            2 => Compression::PalmDoc,
            0x4448 => Compression::Huffman, // "DH"
            n => Compression::Unknown(n),
        };
        let text_record_count = be_u16(data, 8);
        let encryption = be_u16(data, 12);

        let mut header = Self {
            compression,
            text_record_count,
            encryption,
            encoding: Encoding::Cp1252,
            mobi_version: 1,
            first_image_index: NULL_INDEX,
            title: String::new(),
            exth_flags: 0,
            extra_data_flags: 0,
            header_length: 0,
        };

        // Plain PalmDOC (TEXtREAd) stops here
        if data.len() < 0x20 || &data[16..20] != b"MOBI" {
            return Ok(header);
        }

        header.header_length = be_u32(data, 20);
        header.encoding = match be_u32(data, 28) {
            1252 => Encoding::Cp1252,
            65001 => Encoding::Utf8,
            n => Encoding::Unknown(n),
        };

        if data.len() >= 0x5C {
            let title_offset = be_u32(data, 0x54) as usize;
            let title_length = be_u32(data, 0x58) as usize;
            if let Some(title) = data.get(title_offset..title_offset.saturating_add(title_length)) {
                header.title = header.encoding.decode(title);
            }
        }
        if data.len() >= 0x6C {
            header.mobi_version = be_u32(data, 0x68);
        }
        if data.len() >= 0x70 {
            header.first_image_index = be_u32(data, 0x6C);
        }
        if data.len() >= 0x84 {
            header.exth_flags = be_u32(data, 0x80);
        }
        if data.len() >= 0xF4 && header.header_length >= 0xE4 {
            header.extra_data_flags = be_u16(data, 0xF2);
        }

        Ok(header)
    }

    pub fn has_exth(&self) -> bool {
        self.exth_flags & 0x40 != 0
    }

    /// EXTH block following the MOBI header in record 0, if flagged.
    pub fn exth(&self, record0: &[u8]) -> Option<ExthHeader> {
        if !self.has_exth() || self.header_length == 0 {
            return None;
        }
        let start = 16 + self.header_length as usize;
        let data = record0.get(start..)?;
        match ExthHeader::parse(data, self.encoding) {
            Ok(exth) => Some(exth),
            Err(e) => {
                log::warn!("ignoring malformed EXTH header: {e}");
                None
            }
        }
    }
}

/// Extended metadata records.
#[derive(Debug, Default)]
pub struct ExthHeader {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub contributors: Vec<String>,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub isbn: Option<String>,
    pub asin: Option<String>,
    pub subjects: Vec<String>,
    pub pub_date: Option<String>,
    pub rights: Option<String>,
    pub cover_offset: Option<u32>,
    pub language: Option<String>,
}

impl ExthHeader {
    pub fn parse(data: &[u8], encoding: Encoding) -> Result<Self> {
        if data.len() < 12 || &data[0..4] != b"EXTH" {
            return Err(Error::Parse("invalid EXTH signature".into()));
        }

        let record_count = be_u32(data, 8);
        let mut exth = ExthHeader::default();
        let mut pos = 12;

        let text = |bytes: &[u8]| encoding.decode(bytes).trim().to_string();
        let index = |bytes: &[u8]| {
            (bytes.len() >= 4)
                .then(|| be_u32(bytes, 0))
                .filter(|&value| value != NULL_INDEX)
        };

        for _ in 0..record_count {
            if pos + 8 > data.len() {
                break;
            }
            let record_type = be_u32(data, pos);
            let record_len = be_u32(data, pos + 4) as usize;
            if record_len < 8 || pos + record_len > data.len() {
                break;
            }
            let content = &data[pos + 8..pos + record_len];

            match record_type {
                100 => exth.authors.push(text(content)),
                101 => exth.publisher = Some(text(content)),
                103 => exth.description = Some(text(content)),
                104 => exth.isbn = Some(text(content)),
                105 => exth.subjects.extend(
                    text(content)
                        .split(';')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string),
                ),
                106 => exth.pub_date = Some(text(content)),
                108 => exth.contributors.push(text(content)),
                109 => exth.rights = Some(text(content)),
                113 => exth.asin = Some(text(content)),
                201 => exth.cover_offset = index(content),
                503 => exth.title = Some(text(content)),
                524 => exth.language = Some(text(content)),
                _ => {}
            }

            pos += record_len;
        }

        Ok(exth)
    }
}

/// Strip trailing multibyte extra data from a text record.
///
/// Bits 1-15 of `flags` each announce one trailing entry whose size is a
/// backward variable-width integer; bit 0 announces multibyte overlap bytes,
/// removed last.
pub fn strip_trailing_data(record: &[u8], flags: u16) -> &[u8] {
    if flags == 0 || record.is_empty() {
        return record;
    }

    let mut end = record.len();

    let mut shifted_flags = flags >> 1;
    while shifted_flags != 0 {
        if shifted_flags & 1 != 0 {
            if end == 0 {
                break;
            }
            // High bit set marks the last byte of the backward VWI
            let mut size = 0usize;
            let mut shift = 0;
            let mut pos = end;
            while pos > 0 {
                pos -= 1;
                let byte = record[pos];
                size |= ((byte & 0x7F) as usize) << shift;
                shift += 7;
                if byte & 0x80 != 0 || shift >= 28 {
                    break;
                }
            }
            if size > 0 && size <= end {
                end -= size;
            }
        }
        shifted_flags >>= 1;
    }

    if flags & 1 != 0 && end > 0 {
        let overlap = (record[end - 1] & 3) as usize + 1;
        if overlap <= end {
            end -= overlap;
        }
    }

    &record[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pdb(ident: &[u8; 8], offsets: &[u32]) -> Vec<u8> {
        let mut data = vec![0u8; PDB_HEADER_LEN];
        data[..4].copy_from_slice(b"Book");
        data[60..68].copy_from_slice(ident);
        data[76..78].copy_from_slice(&(offsets.len() as u16).to_be_bytes());
        for offset in offsets {
            data.extend_from_slice(&offset.to_be_bytes());
            data.extend_from_slice(&[0; 4]);
        }
        data
    }

    #[test]
    fn test_pdb_header() {
        let header = PdbHeader::parse(&pdb(b"BOOKMOBI", &[100, 200])).unwrap();
        assert_eq!(header.name, "Book");
        assert_eq!(header.record_offsets, [100, 200]);
        assert_eq!(header.record_range(0, 300).unwrap(), (100, 200));
        assert_eq!(header.record_range(1, 300).unwrap(), (200, 300));
        assert!(header.record_range(2, 300).is_err());
    }

    #[test]
    fn test_pdb_header_rejects_unknown_type() {
        assert!(PdbHeader::parse(&pdb(b"DATAPLKR", &[])).is_err());
    }

    #[test]
    fn test_palmdoc_only_header() {
        let mut record0 = vec![0u8; 16];
        record0[0..2].copy_from_slice(&2u16.to_be_bytes());
        record0[8..10].copy_from_slice(&3u16.to_be_bytes());
        let header = MobiHeader::parse(&record0).unwrap();
        assert_eq!(header.compression, Compression::PalmDoc);
        assert_eq!(header.text_record_count, 3);
        assert_eq!(header.first_image_index, NULL_INDEX);
        assert!(!header.has_exth());
    }

    #[test]
    fn test_exth_records() {
        let mut data = b"EXTH".to_vec();
        let records: &[(u32, &[u8])] = &[
            (100, b"Ursula K. Le Guin"),
            (105, b"Fantasy; Classics;"),
            (201, &[0, 0, 0, 2]),
            (503, b"A Wizard of Earthsea"),
        ];
        let body_len: usize = records.iter().map(|(_, c)| 8 + c.len()).sum();
        data.extend_from_slice(&((12 + body_len) as u32).to_be_bytes());
        data.extend_from_slice(&(records.len() as u32).to_be_bytes());
        for (kind, content) in records {
            data.extend_from_slice(&kind.to_be_bytes());
            data.extend_from_slice(&((8 + content.len()) as u32).to_be_bytes());
            data.extend_from_slice(content);
        }

        let exth = ExthHeader::parse(&data, Encoding::Utf8).unwrap();
        assert_eq!(exth.authors, ["Ursula K. Le Guin"]);
        assert_eq!(exth.subjects, ["Fantasy", "Classics"]);
        assert_eq!(exth.cover_offset, Some(2));
        assert_eq!(exth.title.as_deref(), Some("A Wizard of Earthsea"));
    }

    #[test]
    fn test_strip_trailing_data() {
        // One trailing entry of size 3 (VWI 0x83), then one overlap byte
        let record = [b'a', b'b', b'c', 0x01, b'x', b'y', 0x83];
        assert_eq!(strip_trailing_data(&record, 0b11), b"ab");
        assert_eq!(strip_trailing_data(&record, 0), &record);
    }
}
