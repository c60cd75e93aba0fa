//! Standard Times fonts: WinAnsi encoding and glyph metrics.
//!
//! The three faces are PDF base-14 fonts, so nothing is embedded. Text is
//! encoded to WinAnsi bytes once and both measurement and drawing work on
//! those bytes, which keeps widths used for layout identical to what viewers
//! render.

use thesiskit_shared::FontWeight;
use unicode_normalization::UnicodeNormalization;

/// A font face of the Times family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Face {
    Regular,
    Bold,
    Italic,
}

impl Face {
    pub const ALL: [Face; 3] = [Face::Regular, Face::Bold, Face::Italic];

    pub fn from_weight(weight: FontWeight) -> Self {
        match weight {
            FontWeight::Regular => Self::Regular,
            FontWeight::Bold => Self::Bold,
            FontWeight::Italic => Self::Italic,
        }
    }

    /// Resource name used in page content streams.
    pub fn resource_name(self) -> &'static [u8] {
        match self {
            Self::Regular => b"F1",
            Self::Bold => b"F2",
            Self::Italic => b"F3",
        }
    }

    /// PostScript name of the base-14 font.
    pub fn base_font(self) -> &'static [u8] {
        match self {
            Self::Regular => b"Times-Roman",
            Self::Bold => b"Times-Bold",
            Self::Italic => b"Times-Italic",
        }
    }

    fn ascii_widths(self) -> &'static [u16; 95] {
        match self {
            Self::Regular => &TIMES_ROMAN,
            Self::Bold => &TIMES_BOLD,
            Self::Italic => &TIMES_ITALIC,
        }
    }
}

// Advance widths (1/1000 em) for codes 32..=126.
#[rustfmt::skip]
const TIMES_ROMAN: [u16; 95] = [
    250, 333, 408, 500, 500, 833, 778, 180, 333, 333, 500, 564, 250, 333, 250, 278,
    500, 500, 500, 500, 500, 500, 500, 500, 500, 500, 278, 278, 564, 564, 564, 444,
    921, 722, 667, 667, 722, 611, 556, 722, 722, 333, 389, 722, 611, 889, 722, 722,
    556, 722, 667, 556, 611, 722, 722, 944, 722, 722, 611, 333, 278, 333, 469, 500,
    333, 444, 500, 444, 500, 444, 333, 500, 500, 278, 278, 500, 278, 778, 500, 500,
    500, 500, 333, 389, 278, 500, 500, 722, 500, 500, 444, 480, 200, 480, 541,
];

#[rustfmt::skip]
const TIMES_BOLD: [u16; 95] = [
    250, 333, 555, 500, 500, 1000, 833, 278, 333, 333, 500, 570, 250, 333, 250, 278,
    500, 500, 500, 500, 500, 500, 500, 500, 500, 500, 333, 333, 570, 570, 570, 500,
    930, 722, 667, 722, 722, 667, 611, 778, 778, 389, 500, 778, 667, 944, 722, 778,
    611, 778, 722, 556, 667, 722, 722, 1000, 722, 722, 667, 333, 278, 333, 581, 500,
    333, 500, 556, 444, 556, 444, 333, 500, 556, 278, 333, 556, 278, 833, 556, 500,
    556, 556, 444, 389, 333, 556, 500, 722, 500, 500, 444, 394, 220, 394, 520,
];

#[rustfmt::skip]
const TIMES_ITALIC: [u16; 95] = [
    250, 333, 420, 500, 500, 833, 778, 214, 333, 333, 500, 675, 250, 333, 250, 278,
    500, 500, 500, 500, 500, 500, 500, 500, 500, 500, 333, 333, 675, 675, 675, 500,
    920, 611, 611, 667, 722, 611, 611, 722, 722, 333, 444, 667, 556, 833, 667, 722,
    611, 722, 611, 500, 556, 722, 611, 833, 611, 556, 556, 389, 278, 389, 422, 500,
    333, 500, 500, 444, 500, 444, 278, 500, 500, 278, 278, 444, 278, 722, 500, 500,
    500, 500, 389, 389, 278, 500, 444, 667, 444, 444, 389, 400, 275, 400, 541,
];

// WinAnsi codes 0x80..=0x9F that differ from Latin-1.
const WIN_ANSI_SPECIALS: [(char, u8); 27] = [
    ('€', 0x80),
    ('‚', 0x82),
    ('ƒ', 0x83),
    ('„', 0x84),
    ('…', 0x85),
    ('†', 0x86),
    ('‡', 0x87),
    ('ˆ', 0x88),
    ('‰', 0x89),
    ('Š', 0x8A),
    ('‹', 0x8B),
    ('Œ', 0x8C),
    ('Ž', 0x8E),
    ('\u{2018}', 0x91),
    ('\u{2019}', 0x92),
    ('\u{201C}', 0x93),
    ('\u{201D}', 0x94),
    ('•', 0x95),
    ('–', 0x96),
    ('—', 0x97),
    ('˜', 0x98),
    ('™', 0x99),
    ('š', 0x9A),
    ('›', 0x9B),
    ('œ', 0x9C),
    ('ž', 0x9E),
    ('Ÿ', 0x9F),
];

// Widths of non-letter glyphs above 0x7F (Times-Roman values, shared by all faces).
const SYMBOL_WIDTHS: [(char, u16); 50] = [
    ('€', 500),
    ('‚', 333),
    ('ƒ', 500),
    ('„', 444),
    ('…', 1000),
    ('†', 500),
    ('‡', 500),
    ('ˆ', 333),
    ('‰', 1000),
    ('‹', 333),
    ('Œ', 889),
    ('\u{2018}', 333),
    ('\u{2019}', 333),
    ('\u{201C}', 444),
    ('\u{201D}', 444),
    ('•', 350),
    ('–', 500),
    ('—', 1000),
    ('˜', 333),
    ('™', 980),
    ('›', 333),
    ('œ', 722),
    ('\u{A0}', 250),
    ('¡', 333),
    ('¦', 200),
    ('©', 760),
    ('ª', 276),
    ('¬', 564),
    ('\u{AD}', 333),
    ('®', 760),
    ('°', 400),
    ('±', 564),
    ('²', 300),
    ('³', 300),
    ('¶', 453),
    ('·', 250),
    ('¹', 300),
    ('º', 310),
    ('¼', 750),
    ('½', 750),
    ('¾', 750),
    ('¿', 444),
    ('Æ', 889),
    ('×', 564),
    ('Ø', 722),
    ('Þ', 556),
    ('æ', 667),
    ('÷', 564),
    ('ø', 500),
    ('þ', 500),
];

const FALLBACK_WIDTH: u16 = 500;

/// Encode `text` as WinAnsi bytes.
///
/// Control whitespace becomes a space. Characters outside WinAnsi are folded
/// to their base letter when one exists (`ł` stays `?`, `ő` becomes `o`).
pub fn encode(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| {
            if ch.is_control() {
                return b' ';
            }
            win_ansi_byte(ch)
                .or_else(|| ascii_base(ch).map(|base| base as u8))
                .unwrap_or(b'?')
        })
        .collect()
}

/// Width in points of already encoded bytes.
pub fn width(face: Face, encoded: &[u8], size: f32) -> f32 {
    let units: u32 = encoded
        .iter()
        .map(|&b| u32::from(byte_width(face, b)))
        .sum();
    units as f32 / 1000.0 * size
}

/// Width in points of `text` once encoded.
pub fn text_width(face: Face, text: &str, size: f32) -> f32 {
    width(face, &encode(text), size)
}

fn win_ansi_byte(ch: char) -> Option<u8> {
    match ch {
        ' '..='~' => Some(ch as u8),
        '\u{A0}'..='\u{FF}' => Some(ch as u32 as u8),
        _ => WIN_ANSI_SPECIALS
            .iter()
            .find(|(c, _)| *c == ch)
            .map(|(_, b)| *b),
    }
}

fn decode_byte(b: u8) -> Option<char> {
    match b {
        0x20..=0x7E | 0xA0..=0xFF => Some(char::from(b)),
        _ => WIN_ANSI_SPECIALS
            .iter()
            .find(|(_, code)| *code == b)
            .map(|(c, _)| *c),
    }
}

/// ASCII letter a character decomposes to, if any.
fn ascii_base(ch: char) -> Option<char> {
    std::iter::once(ch)
        .nfd()
        .next()
        .filter(|base| base.is_ascii_alphanumeric())
}

fn byte_width(face: Face, b: u8) -> u16 {
    if (0x20..=0x7E).contains(&b) {
        return face.ascii_widths()[usize::from(b - 0x20)];
    }
    let Some(ch) = decode_byte(b) else {
        return FALLBACK_WIDTH;
    };
    if let Some(base) = ascii_base(ch) {
        return face.ascii_widths()[base as usize - 0x20];
    }
    SYMBOL_WIDTHS
        .iter()
        .find(|(c, _)| *c == ch)
        .map_or(FALLBACK_WIDTH, |(_, w)| *w)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_latin1_and_specials() {
        assert_eq!(encode("Introdução"), b"Introdu\xE7\xE3o".to_vec());
        assert_eq!(encode("a – b"), vec![b'a', b' ', 0x96, b' ', b'b']);
        assert_eq!(encode("€5"), vec![0x80, b'5']);
    }

    #[test]
    fn folds_or_replaces_unsupported_characters() {
        assert_eq!(encode("Erdős"), b"Erdos".to_vec());
        assert_eq!(encode("Łódź"), b"?\xF3dz".to_vec());
        assert_eq!(encode("\u{4E2D}"), b"?".to_vec());
        assert_eq!(encode("a\tb\n"), b"a b ".to_vec());
    }

    #[test]
    fn widths_follow_metrics() {
        assert!((text_width(Face::Regular, "a", 1000.0) - 444.0).abs() < 1e-3);
        assert!((text_width(Face::Bold, "W", 10.0) - 10.0).abs() < 1e-3);
        // Accented letters measure like their base letter.
        assert_eq!(
            text_width(Face::Italic, "é", 12.0),
            text_width(Face::Italic, "e", 12.0)
        );
        assert!(text_width(Face::Regular, "mmm", 12.0) > text_width(Face::Regular, "iii", 12.0));
    }

    #[test]
    fn faces_have_distinct_resources() {
        let names: Vec<_> = Face::ALL.iter().map(|f| f.resource_name()).collect();
        assert_eq!(names, vec![&b"F1"[..], &b"F2"[..], &b"F3"[..]]);
    }
}
