//! Paragraph chunker for plain-text documents
//!
//! Form feeds start a new page, blank lines separate paragraphs and lines
//! starting with `#` name the section of the paragraphs that follow.
//! Paragraphs are packed into chunks up to a soft character limit; a
//! paragraph longer than the limit is split at sentence or word boundaries.

use kgflow_core::Chunk;

const PAGE_BREAK: char = '\u{000C}';

enum Block {
    Heading(String),
    Paragraph(String),
}

/// Chunk `text` into chunks of at most `max_chunk_chars` characters
pub fn chunk_text(source_id: &str, text: &str, max_chunk_chars: usize) -> Vec<Chunk> {
    let max = max_chunk_chars.max(1);
    let mut builder = ChunkBuilder::new(source_id, max);
    let mut section: Option<String> = None;

    for (page_index, page) in text.split(PAGE_BREAK).enumerate() {
        let page_number = page_index as u32 + 1;

        for block in blocks(page) {
            match block {
                Block::Heading(title) => {
                    section = (!title.is_empty()).then_some(title);
                }
                Block::Paragraph(paragraph) => {
                    for piece in split_long(&paragraph, max) {
                        builder.push(piece, page_number, &section);
                    }
                }
            }
        }
    }

    builder.finish()
}

fn blocks(page: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut lines: Vec<&str> = Vec::new();

    for line in page.lines() {
        let trimmed = line.trim();
        let heading = trimmed.starts_with('#');

        if trimmed.is_empty() || heading {
            if !lines.is_empty() {
                blocks.push(Block::Paragraph(lines.join(" ")));
                lines.clear();
            }
            if heading {
                blocks.push(Block::Heading(trimmed.trim_start_matches('#').trim().to_string()));
            }
        } else {
            lines.push(trimmed);
        }
    }

    if !lines.is_empty() {
        blocks.push(Block::Paragraph(lines.join(" ")));
    }
    blocks
}

/// Split a paragraph into pieces of at most `max` characters, preferring
/// sentence ends, then whitespace
fn split_long(paragraph: &str, max: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = paragraph;

    while rest.chars().count() > max {
        let limit = rest
            .char_indices()
            .nth(max)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..limit];
        let cut = window
            .rfind(". ")
            .map(|i| i + 1)
            .or_else(|| window.rfind(char::is_whitespace))
            .filter(|&i| i > 0)
            .unwrap_or(limit);

        pieces.push(rest[..cut].trim_end());
        rest = rest[cut..].trim_start();
    }

    if !rest.is_empty() {
        pieces.push(rest);
    }
    pieces
}

struct ChunkBuilder<'a> {
    source_id: &'a str,
    max: usize,
    chunks: Vec<Chunk>,
    text: String,
    chars: usize,
    first_page: u32,
    last_page: u32,
    section: Option<String>,
}

impl<'a> ChunkBuilder<'a> {
    fn new(source_id: &'a str, max: usize) -> Self {
        Self {
            source_id,
            max,
            chunks: Vec::new(),
            text: String::new(),
            chars: 0,
            first_page: 1,
            last_page: 1,
            section: None,
        }
    }

    fn push(&mut self, piece: &str, page: u32, section: &Option<String>) {
        let piece_chars = piece.chars().count();
        // a new section always starts a new chunk
        if !self.text.is_empty()
            && (self.section != *section || self.chars + 2 + piece_chars > self.max)
        {
            self.flush();
        }

        if self.text.is_empty() {
            self.first_page = page;
            self.section = section.clone();
        } else {
            self.text.push_str("\n\n");
            self.chars += 2;
        }
        self.text.push_str(piece);
        self.chars += piece_chars;
        self.last_page = page;
    }

    fn flush(&mut self) {
        if self.text.is_empty() {
            return;
        }

        let index = self.chunks.len() as u32;
        let mut chunk = Chunk::new(self.source_id, index, std::mem::take(&mut self.text))
            .with_pages(self.first_page, self.last_page);
        if let Some(section) = &self.section {
            chunk = chunk.with_section(section.clone());
        }
        self.chunks.push(chunk);
        self.chars = 0;
    }

    fn finish(mut self) -> Vec<Chunk> {
        self.flush();
        self.chunks
    }
}
