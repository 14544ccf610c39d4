//! Character encodings for string fields.
//!
//! Decoding and encoding are strict: malformed input or characters the
//! encoding cannot represent are errors, never replacement characters.

use std::fmt;

use encoding_rs::{Encoding as RsEncoding, UTF_16BE, UTF_16LE, UTF_8};

use crate::error::{MarshalError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// 7-bit ASCII.
    Ascii,
    /// ISO-8859-1, every byte maps to the code point of the same value.
    Latin1,
    Utf8,
    Utf16Le,
    Utf16Be,
    Utf32Le,
    Utf32Be,
    /// Any single- or multi-byte legacy code page known to `encoding_rs`
    /// (windows-1252, Shift_JIS, GBK, ...).
    CodePage(&'static RsEncoding),
}

impl TextEncoding {
    /// Maps an `encoding_rs` encoding onto the variant with the right code
    /// unit width.
    pub fn from_encoding_rs(encoding: &'static RsEncoding) -> Self {
        if encoding == UTF_8 {
            TextEncoding::Utf8
        } else if encoding == UTF_16LE {
            TextEncoding::Utf16Le
        } else if encoding == UTF_16BE {
            TextEncoding::Utf16Be
        } else {
            TextEncoding::CodePage(encoding)
        }
    }

    /// Looks an encoding up by its WHATWG label (`"shift_jis"`, `"utf-16le"`, ...).
    pub fn for_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "ascii" | "us-ascii" => Some(TextEncoding::Ascii),
            "latin1" | "iso-8859-1" => Some(TextEncoding::Latin1),
            "utf-32le" | "utf-32" => Some(TextEncoding::Utf32Le),
            "utf-32be" => Some(TextEncoding::Utf32Be),
            other => RsEncoding::for_label(other.as_bytes()).map(Self::from_encoding_rs),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TextEncoding::Ascii => "ASCII",
            TextEncoding::Latin1 => "ISO-8859-1",
            TextEncoding::Utf8 => "UTF-8",
            TextEncoding::Utf16Le => "UTF-16LE",
            TextEncoding::Utf16Be => "UTF-16BE",
            TextEncoding::Utf32Le => "UTF-32LE",
            TextEncoding::Utf32Be => "UTF-32BE",
            TextEncoding::CodePage(encoding) => encoding.name(),
        }
    }

    /// Width in bytes of one code unit, which is also the terminator width.
    pub fn unit_width(&self) -> usize {
        match self {
            TextEncoding::Utf16Le | TextEncoding::Utf16Be => 2,
            TextEncoding::Utf32Le | TextEncoding::Utf32Be => 4,
            _ => 1,
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        let name = self.name();
        let width = self.unit_width();
        if bytes.len() % width != 0 {
            return Err(MarshalError::encoding(
                name,
                format!("{} bytes is not a whole number of {width}-byte units", bytes.len()),
            ));
        }
        match self {
            TextEncoding::Ascii => match bytes.iter().position(|b| !b.is_ascii()) {
                Some(i) => Err(MarshalError::encoding(
                    name,
                    format!("byte {:#04x} at {i} is not ASCII", bytes[i]),
                )),
                None => Ok(bytes.iter().map(|&b| b as char).collect()),
            },
            TextEncoding::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
            TextEncoding::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|e| MarshalError::encoding(name, e.to_string())),
            TextEncoding::Utf16Le | TextEncoding::Utf16Be => {
                let big = *self == TextEncoding::Utf16Be;
                let units = bytes.chunks_exact(2).map(|c| {
                    let pair = [c[0], c[1]];
                    if big {
                        u16::from_be_bytes(pair)
                    } else {
                        u16::from_le_bytes(pair)
                    }
                });
                char::decode_utf16(units)
                    .collect::<std::result::Result<String, _>>()
                    .map_err(|e| MarshalError::encoding(name, e.to_string()))
            }
            TextEncoding::Utf32Le | TextEncoding::Utf32Be => {
                let big = *self == TextEncoding::Utf32Be;
                bytes
                    .chunks_exact(4)
                    .map(|c| {
                        let quad = [c[0], c[1], c[2], c[3]];
                        let unit = if big {
                            u32::from_be_bytes(quad)
                        } else {
                            u32::from_le_bytes(quad)
                        };
                        char::from_u32(unit).ok_or_else(|| {
                            MarshalError::encoding(name, format!("{unit:#x} is not a scalar value"))
                        })
                    })
                    .collect()
            }
            TextEncoding::CodePage(encoding) => encoding
                .decode_without_bom_handling_and_without_replacement(bytes)
                .map(|text| text.into_owned())
                .ok_or_else(|| MarshalError::encoding(name, "malformed byte sequence")),
        }
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u8>> {
        let name = self.name();
        match self {
            TextEncoding::Ascii => match text.chars().find(|c| !c.is_ascii()) {
                Some(c) => Err(MarshalError::encoding(name, format!("{c:?} is not ASCII"))),
                None => Ok(text.as_bytes().to_vec()),
            },
            TextEncoding::Latin1 => text
                .chars()
                .map(|c| {
                    u8::try_from(u32::from(c)).map_err(|_| {
                        MarshalError::encoding(name, format!("{c:?} is outside Latin-1"))
                    })
                })
                .collect(),
            TextEncoding::Utf8 => Ok(text.as_bytes().to_vec()),
            TextEncoding::Utf16Le => Ok(text.encode_utf16().flat_map(u16::to_le_bytes).collect()),
            TextEncoding::Utf16Be => Ok(text.encode_utf16().flat_map(u16::to_be_bytes).collect()),
            TextEncoding::Utf32Le => Ok(text
                .chars()
                .flat_map(|c| u32::from(c).to_le_bytes())
                .collect()),
            TextEncoding::Utf32Be => Ok(text
                .chars()
                .flat_map(|c| u32::from(c).to_be_bytes())
                .collect()),
            TextEncoding::CodePage(encoding) => {
                let (bytes, used, had_errors) = encoding.encode(text);
                if had_errors || used != *encoding {
                    return Err(MarshalError::encoding(
                        name,
                        format!("{text:?} is not representable"),
                    ));
                }
                Ok(bytes.into_owned())
            }
        }
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{SHIFT_JIS, WINDOWS_1252};

    #[test]
    fn unit_widths() {
        assert_eq!(TextEncoding::Utf8.unit_width(), 1);
        assert_eq!(TextEncoding::Utf16Be.unit_width(), 2);
        assert_eq!(TextEncoding::Utf32Le.unit_width(), 4);
        assert_eq!(TextEncoding::from_encoding_rs(UTF_16LE), TextEncoding::Utf16Le);
        assert_eq!(
            TextEncoding::for_label("shift_jis"),
            Some(TextEncoding::CodePage(SHIFT_JIS))
        );
    }

    #[test]
    fn utf16_and_utf32() {
        let le = TextEncoding::Utf16Le.encode("A\u{1F600}").unwrap();
        assert_eq!(le, [0x41, 0x00, 0x3D, 0xD8, 0x00, 0xDE]);
        assert_eq!(TextEncoding::Utf16Le.decode(&le).unwrap(), "A\u{1F600}");

        let be = TextEncoding::Utf32Be.encode("hi").unwrap();
        assert_eq!(be, [0, 0, 0, b'h', 0, 0, 0, b'i']);
        assert_eq!(TextEncoding::Utf32Be.decode(&be).unwrap(), "hi");

        // lone surrogate
        assert!(TextEncoding::Utf16Le.decode(&[0x00, 0xD8]).is_err());
        assert!(TextEncoding::Utf16Le.decode(&[0x41]).is_err());
    }

    #[test]
    fn legacy_code_pages_are_strict() {
        let sjis = TextEncoding::CodePage(SHIFT_JIS);
        let bytes = sjis.encode("テスト").unwrap();
        assert_eq!(bytes, [0x83, 0x65, 0x83, 0x58, 0x83, 0x67]);
        assert_eq!(sjis.decode(&bytes).unwrap(), "テスト");
        assert!(sjis.decode(&[0x83]).is_err());

        let cp1252 = TextEncoding::CodePage(WINDOWS_1252);
        assert_eq!(cp1252.encode("caf\u{e9}").unwrap(), b"caf\xe9");
        assert!(cp1252.encode("\u{3042}").is_err());
    }

    #[test]
    fn ascii_and_latin1() {
        assert!(TextEncoding::Ascii.decode(&[0x80]).is_err());
        assert!(TextEncoding::Ascii.encode("\u{e9}").is_err());
        assert_eq!(TextEncoding::Latin1.decode(&[0xE9]).unwrap(), "\u{e9}");
        assert_eq!(TextEncoding::Latin1.encode("\u{e9}").unwrap(), [0xE9]);
        assert!(TextEncoding::Latin1.encode("\u{100}").is_err());
    }
}
