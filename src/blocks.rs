//! Markdown block extraction: splits a body into headings and the
//! paragraph/code/list blocks beneath them, for the `block` table and
//! fragment-addressed wikilinks (`[[entry#heading]]`, `[[entry^block-id]]`).
//!
//! Per SPEC_FULL.md §10, this is a hand-rolled CommonMark-ish line scanner
//! rather than a `pulldown-cmark` AST: the extraction needed is shallow
//! (heading boundaries, paragraph/code/list block boundaries, ancestor
//! heading path) and the original Python implementation is itself
//! line/regex-based, not a full parser.

use once_cell::sync::Lazy;
use regex::Regex;

/// A block recognized within a body, in document order.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockData {
    pub position: usize,
    pub block_type: BlockType,
    /// Nearest enclosing ATX heading text, if any.
    pub heading: Option<String>,
    pub content: String,
    /// Explicit `^block-id` anchor trailing the block's last line, if any.
    pub block_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Heading,
    Paragraph,
    Code,
    List,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Heading => "heading",
            BlockType::Paragraph => "paragraph",
            BlockType::Code => "code",
            BlockType::List => "list",
        }
    }
}

static ATX_HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.*)$").unwrap());
static LIST_ITEM: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([-*+]|\d+\.)\s+").unwrap());
static BLOCK_ID_ANCHOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s\^([a-zA-Z0-9_-]+)\s*$").unwrap());
static FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```").unwrap());

/// Extracts one block per heading and per paragraph/code/list chunk, in
/// order, each stamped with the nearest enclosing heading's text.
pub fn extract_blocks(body: &str) -> Vec<BlockData> {
    let mut blocks = Vec::new();
    let mut current_heading: Option<String> = None;
    let mut position = 0usize;

    let mut lines = body.lines().peekable();
    let mut pending: Vec<&str> = Vec::new();
    let mut pending_type: Option<BlockType> = None;

    macro_rules! flush {
        () => {
            if let Some(block_type) = pending_type.take() {
                if !pending.is_empty() {
                    let mut content = pending.join("\n");
                    let block_id = BLOCK_ID_ANCHOR.captures(&content).map(|c| c[1].to_string());
                    if block_id.is_some() {
                        content = BLOCK_ID_ANCHOR.replace(&content, "").trim_end().to_string();
                    }
                    blocks.push(BlockData {
                        position,
                        block_type,
                        heading: current_heading.clone(),
                        content,
                        block_id,
                    });
                    position += 1;
                }
                pending.clear();
            }
        };
    }

    let mut in_fence = false;
    while let Some(line) = lines.next() {
        if FENCE.is_match(line.trim_start()) {
            if in_fence {
                pending.push(line);
                flush!();
                in_fence = false;
            } else {
                flush!();
                pending_type = Some(BlockType::Code);
                pending.push(line);
                in_fence = true;
            }
            continue;
        }
        if in_fence {
            pending.push(line);
            continue;
        }

        if line.trim().is_empty() {
            flush!();
            continue;
        }

        if let Some(caps) = ATX_HEADING.captures(line) {
            flush!();
            let text = caps[2].trim().to_string();
            blocks.push(BlockData {
                position,
                block_type: BlockType::Heading,
                heading: current_heading.clone(),
                content: text.clone(),
                block_id: None,
            });
            position += 1;
            current_heading = Some(text);
            continue;
        }

        let line_type = if LIST_ITEM.is_match(line) { BlockType::List } else { BlockType::Paragraph };
        match pending_type {
            Some(t) if t == line_type => pending.push(line),
            Some(_) => {
                flush!();
                pending_type = Some(line_type);
                pending.push(line);
            }
            None => {
                pending_type = Some(line_type);
                pending.push(line);
            }
        }
    }
    flush!();

    blocks
}
