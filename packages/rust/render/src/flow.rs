//! Vertical flow of lines and boxes onto fixed-size pages.
//!
//! Both passes place content through a [`Flow`]: the layout pass for the
//! document body and the finalize pass for cover and contents.

use thesiskit_shared::{Alignment, AssetRef, LayoutConfig, SizeClass};

use crate::document::{DrawOp, TextRun};
use crate::fonts::{self, Face};

/// Horizontal offset of one indentation step, in points.
pub(crate) const INDENT_STEP: f32 = 18.0;

/// Point size of a size class.
pub(crate) fn font_size(config: &LayoutConfig, class: SizeClass) -> f32 {
    let base = config.base_font_size;
    match class {
        SizeClass::Title => base * 1.5,
        SizeClass::Chapter => base * 1.25,
        SizeClass::Section => base * 1.1,
        SizeClass::Subsection | SizeClass::Body => base,
        SizeClass::Caption => base * 0.85,
    }
}

pub(crate) fn line_height(config: &LayoutConfig, size: f32) -> f32 {
    size * config.line_spacing
}

/// One broken line of text.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Line {
    pub text: String,
    pub width: f32,
    pub spaces: usize,
    /// Last line before a hard break or the end of the text.
    pub last: bool,
}

/// Greedy line breaking on ASCII whitespace. Explicit newlines are hard
/// breaks; words wider than `max_width` are split between characters.
pub(crate) fn wrap(text: &str, face: Face, size: f32, max_width: f32) -> Vec<Line> {
    let mut lines = Vec::new();
    for segment in text.split('\n') {
        let start = lines.len();
        let mut current: Vec<String> = Vec::new();
        for word in segment.split_ascii_whitespace() {
            let candidate = if current.is_empty() {
                word.to_string()
            } else {
                format!("{} {word}", current.join(" "))
            };
            if fonts::text_width(face, &candidate, size) <= max_width {
                current.push(word.to_string());
                continue;
            }
            if !current.is_empty() {
                lines.push(make_line(&current, face, size));
                current.clear();
            }
            let mut pieces = split_long_word(word, face, size, max_width);
            let tail = pieces.pop().unwrap_or_default();
            for piece in pieces {
                lines.push(make_line(&[piece], face, size));
            }
            current.push(tail);
        }
        if !current.is_empty() {
            lines.push(make_line(&current, face, size));
        }
        if let Some(line) = lines[start..].last_mut() {
            line.last = true;
        }
    }
    lines
}

fn make_line(words: &[String], face: Face, size: f32) -> Line {
    let text = words.join(" ");
    Line {
        width: fonts::text_width(face, &text, size),
        spaces: words.len().saturating_sub(1),
        text,
        last: false,
    }
}

fn split_long_word(word: &str, face: Face, size: f32, max_width: f32) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut piece = String::new();
    for ch in word.chars() {
        piece.push(ch);
        if piece.chars().count() > 1 && fonts::text_width(face, &piece, size) > max_width {
            piece.pop();
            pieces.push(std::mem::take(&mut piece));
            piece.push(ch);
        }
    }
    pieces.push(piece);
    pieces
}

/// Shorten `text` with a trailing ellipsis until it fits `max_width`.
pub(crate) fn fit(text: &str, face: Face, size: f32, max_width: f32) -> String {
    if fonts::text_width(face, text, size) <= max_width {
        return text.to_string();
    }
    let mut chars: Vec<char> = text.chars().collect();
    while !chars.is_empty() {
        chars.pop();
        let candidate = format!("{}...", chars.iter().collect::<String>().trim_end());
        if fonts::text_width(face, &candidate, size) <= max_width {
            return candidate;
        }
    }
    String::new()
}

/// A cursor over a growing list of pages.
pub(crate) struct Flow<'a> {
    config: &'a LayoutConfig,
    pages: Vec<Vec<DrawOp>>,
    used: f32,
}

impl<'a> Flow<'a> {
    pub fn new(config: &'a LayoutConfig) -> Self {
        Self {
            config,
            pages: vec![Vec::new()],
            used: 0.0,
        }
    }

    pub fn config(&self) -> &LayoutConfig {
        self.config
    }

    pub fn page_index(&self) -> usize {
        self.pages.len() - 1
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Nothing has been placed on the current page yet.
    pub fn is_fresh(&self) -> bool {
        self.used <= f32::EPSILON
    }

    pub fn remaining(&self) -> f32 {
        self.config.content_height() - self.used
    }

    pub fn break_page(&mut self) {
        self.pages.push(Vec::new());
        self.used = 0.0;
    }

    /// Start a new page unless `height` still fits on the current one.
    pub fn ensure(&mut self, height: f32) {
        if height > self.remaining() + 0.01 && !self.is_fresh() {
            self.break_page();
        }
    }

    /// Vertical space, dropped at the top of a page.
    pub fn gap(&mut self, height: f32) {
        if !self.is_fresh() {
            self.used = (self.used + height).min(self.config.content_height());
        }
    }

    /// Vertical space, kept at the top of a page.
    pub fn skip(&mut self, height: f32) {
        self.used = (self.used + height).min(self.config.content_height());
    }

    fn top(&self) -> f32 {
        self.config.page_height - self.config.margin_top
    }

    /// Y coordinate of the next free line on the current page.
    pub fn cursor_y(&self) -> f32 {
        self.top() - self.used
    }

    /// Reserve one line of `size` text and return (page index, baseline y).
    pub fn reserve_line(&mut self, size: f32) -> (usize, f32) {
        let height = line_height(self.config, size);
        self.ensure(height);
        let baseline = self.top() - self.used - (height - size) / 2.0 - size * 0.8;
        self.used += height;
        (self.page_index(), baseline)
    }

    /// Place a broken line with the given alignment and indentation.
    pub fn push_line(&mut self, line: &Line, face: Face, size: f32, indent: u8, align: Alignment) {
        let left = self.config.margin_left + f32::from(indent) * INDENT_STEP;
        let avail = self.config.content_width() - f32::from(indent) * INDENT_STEP;
        let (page, y) = self.reserve_line(size);

        let (x, word_spacing) = match align {
            Alignment::Left => (left, 0.0),
            Alignment::Center => (left + ((avail - line.width) / 2.0).max(0.0), 0.0),
            Alignment::Justify if !line.last && line.spaces > 0 && line.width < avail => {
                (left, (avail - line.width) / line.spaces as f32)
            }
            Alignment::Justify => (left, 0.0),
        };

        self.push_op_on(
            page,
            DrawOp::Text(TextRun {
                x,
                y,
                face,
                size,
                text: line.text.clone(),
                word_spacing,
            }),
        );
    }

    /// Wrap `text` and place every line.
    pub fn push_text(&mut self, text: &str, face: Face, size: f32, indent: u8, align: Alignment) {
        let avail = self.config.content_width() - f32::from(indent) * INDENT_STEP;
        for line in wrap(text, face, size, avail) {
            self.push_line(&line, face, size, indent, align);
        }
    }

    /// Place a `width` x `height` image centered horizontally.
    pub fn push_image(&mut self, asset: AssetRef, block: Option<usize>, width: f32, height: f32) {
        self.ensure(height);
        let x = self.config.margin_left + (self.config.content_width() - width).max(0.0) / 2.0;
        let y = self.top() - self.used - height;
        self.used += height;
        let page = self.page_index();
        self.push_op_on(
            page,
            DrawOp::Image {
                asset,
                block,
                x,
                y,
                width,
                height,
            },
        );
    }

    pub fn push_op_on(&mut self, page: usize, op: DrawOp) {
        if let Some(ops) = self.pages.get_mut(page) {
            ops.push(op);
        }
    }

    pub fn into_pages(self) -> Vec<Vec<DrawOp>> {
        self.pages
    }
}
