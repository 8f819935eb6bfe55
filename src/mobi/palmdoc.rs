/// PalmDOC LZ77 decompression.
///
/// - `0x01..=0x08`: copy the next n bytes literally
/// - `0x00`, `0x09..=0x7F`: literal byte
/// - `0x80..=0xBF`: with the next byte, a back-reference; distance is
///   `(pair & 0x3FFF) >> 3`, length `(pair & 7) + 3`
/// - `0xC0..=0xFF`: a space followed by `byte ^ 0x80`
pub fn decompress(input: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(input.len() * 2);
    let mut i = 0;

    while i < input.len() {
        let c = input[i];
        i += 1;

        match c {
            0x01..=0x08 => {
                let end = (i + c as usize).min(input.len());
                output.extend_from_slice(&input[i..end]);
                i = end;
            }
            0x00 | 0x09..=0x7F => output.push(c),
            0xC0..=0xFF => {
                output.push(b' ');
                output.push(c ^ 0x80);
            }
            _ => {
                let Some(&next) = input.get(i) else {
                    break;
                };
                i += 1;

                let pair = u16::from_be_bytes([c, next]);
                let distance = ((pair & 0x3FFF) >> 3) as usize;
                let length = ((pair & 7) + 3) as usize;

                // Overlapping copies repeat bytes appended in this loop
                if distance > 0 && distance <= output.len() {
                    for _ in 0..length {
                        output.push(output[output.len() - distance]);
                    }
                }
            }
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decompress_literal() {
        assert_eq!(decompress(b"Hello"), b"Hello");
    }

    #[test]
    fn test_decompress_space_ascii() {
        assert_eq!(decompress(&[b'a', 0xE2]), b"a b");
    }

    #[test]
    fn test_decompress_literal_run() {
        assert_eq!(decompress(&[0x03, 0xFF, 0x80, 0x01, b'!']), [0xFF, 0x80, 0x01, b'!']);
    }

    #[test]
    fn test_decompress_back_reference() {
        // "abc" then copy distance 3, length 6 -> "abcabcabc"
        let pair: u16 = 0x8000 | (3 << 3) | (6 - 3);
        let [hi, lo] = pair.to_be_bytes();
        assert_eq!(decompress(&[b'a', b'b', b'c', hi, lo]), b"abcabcabc");
    }

    #[test]
    fn test_truncated_back_reference_is_dropped() {
        assert_eq!(decompress(&[b'x', 0x80]), b"x");
    }
}
