//! Text decoding with fallbacks for files that are not UTF-8.
//!
//! Order: byte-order mark, BOM-less UTF-16 (detected from the zero-byte
//! pattern), strict UTF-8, then Windows-1251. Windows-1251 maps every byte, so
//! decoding never fails; undefined bytes become U+FFFD.

/// Decoded text and the encoding that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    pub encoding: &'static str,
}

pub fn decode_text(bytes: &[u8]) -> Decoded {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return Decoded {
            text: String::from_utf8_lossy(rest).into_owned(),
            encoding: "utf-8-sig",
        };
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return Decoded {
            text: decode_utf16(rest, true, true).unwrap_or_default(),
            encoding: "utf-16-le",
        };
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return Decoded {
            text: decode_utf16(rest, false, true).unwrap_or_default(),
            encoding: "utf-16-be",
        };
    }

    if let Some(little_endian) = looks_like_utf16(bytes) {
        if let Some(text) = decode_utf16(bytes, little_endian, false) {
            return Decoded {
                text,
                encoding: if little_endian { "utf-16-le" } else { "utf-16-be" },
            };
        }
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return Decoded {
            text: text.to_string(),
            encoding: "utf-8",
        };
    }

    Decoded {
        text: bytes.iter().map(|&b| cp1251_char(b)).collect(),
        encoding: "cp1251",
    }
}

/// `Some(true)` for little-endian, `Some(false)` for big-endian
fn looks_like_utf16(bytes: &[u8]) -> Option<bool> {
    if bytes.len() < 4 || bytes.len() % 2 != 0 {
        return None;
    }
    let pairs = bytes.len() / 2;
    let odd_zeros = bytes.iter().skip(1).step_by(2).filter(|&&b| b == 0).count();
    let even_zeros = bytes.iter().step_by(2).filter(|&&b| b == 0).count();

    if odd_zeros * 10 >= pairs * 4 && even_zeros * 10 < pairs {
        Some(true)
    } else if even_zeros * 10 >= pairs * 4 && odd_zeros * 10 < pairs {
        Some(false)
    } else {
        None
    }
}

fn decode_utf16(bytes: &[u8], little_endian: bool, lossy: bool) -> Option<String> {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| {
            if little_endian {
                u16::from_le_bytes([pair[0], pair[1]])
            } else {
                u16::from_be_bytes([pair[0], pair[1]])
            }
        })
        .collect();
    if lossy {
        Some(String::from_utf16_lossy(&units))
    } else {
        String::from_utf16(&units).ok()
    }
}

const CP1251_HIGH: [char; 64] = [
    '\u{0402}', '\u{0403}', '\u{201A}', '\u{0453}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{20AC}', '\u{2030}', '\u{0409}', '\u{2039}', '\u{040A}', '\u{040C}', '\u{040B}', '\u{040F}',
    '\u{0452}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{FFFD}', '\u{2122}', '\u{0459}', '\u{203A}', '\u{045A}', '\u{045C}', '\u{045B}', '\u{045F}',
    '\u{00A0}', '\u{040E}', '\u{045E}', '\u{0408}', '\u{00A4}', '\u{0490}', '\u{00A6}', '\u{00A7}',
    '\u{0401}', '\u{00A9}', '\u{0404}', '\u{00AB}', '\u{00AC}', '\u{00AD}', '\u{00AE}', '\u{0407}',
    '\u{00B0}', '\u{00B1}', '\u{0406}', '\u{0456}', '\u{0491}', '\u{00B5}', '\u{00B6}', '\u{00B7}',
    '\u{0451}', '\u{2116}', '\u{0454}', '\u{00BB}', '\u{0458}', '\u{0405}', '\u{0455}', '\u{0457}',
];

fn cp1251_char(byte: u8) -> char {
    match byte {
        0x00..=0x7F => byte as char,
        0x80..=0xBF => CP1251_HIGH[(byte - 0x80) as usize],
        // А..я are contiguous
        _ => char::from_u32(0x0410 + (byte - 0xC0) as u32).unwrap_or('\u{FFFD}'),
    }
}
