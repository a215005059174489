//! Markdown tokenizer.
//!
//! Wraps `pulldown-cmark` and flattens its event stream into the small set of
//! [`Token`]s the tree builder understands. Inline text is buffered per block
//! and scanned for the custom link syntax:
//!
//! ```text
//! [[type:value]]
//! [[type:value|alias]]
//! [[type:value|alias]] (HH:MM dd-mm-yyyy)
//! ```
//!
//! Text inside code spans and code blocks never produces links.

use chrono::{NaiveDate, NaiveTime};
use pulldown_cmark::{Event, Options, Parser, Tag};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use super::tree::{Link, NodeKind};

static LINK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\[\[([^\[\]:|]+):([^\[\]|]+?)(?:\|([^\[\]]+?))?\]\](?:[ \t]*\((\d{1,2}:\d{2})[ \t]+(\d{1,2}-\d{1,2}-\d{4})\))?",
    )
    .expect("link pattern is a valid regex")
});

/// One occurrence of `[[key:value|alias]] (time date)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkToken {
    pub key: String,
    pub value: String,
    pub alias: Option<String>,
    pub time: Option<NaiveTime>,
    pub date: Option<NaiveDate>,
}

impl LinkToken {
    pub fn to_link(&self) -> Link {
        Link {
            key: self.key.clone(),
            value: self.value.clone(),
            alias: self.alias.clone(),
        }
    }
}

/// Opening of a block; headings carry their level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockToken {
    pub kind: NodeKind,
    pub level: Option<u8>,
}

impl BlockToken {
    fn block(kind: NodeKind) -> Self {
        Self { kind, level: None }
    }

    fn heading(level: u8) -> Self {
        Self {
            kind: NodeKind::Heading,
            level: Some(level),
        }
    }
}

/// Flattened document token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Open(BlockToken),
    /// Closes the most recently opened block
    Close,
    Link(LinkToken),
    /// Destination of an image or hyperlink (attachment candidates)
    File(String),
    /// Plain inline text of the enclosing block
    Text(String),
}

/// What a pulldown-cmark `Start` tag opened
enum Frame {
    Block,
    CodeBlock,
    Inline,
}

/// Markdown → [`Token`] stream
#[derive(Debug, Clone)]
pub struct Tokenizer {
    options: Options,
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_FOOTNOTES);
        Self { options }
    }

    pub fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut frames: Vec<Frame> = Vec::new();
        let mut buffer = String::new();
        let mut code_depth = 0usize;

        for event in Parser::new_ext(text, self.options) {
            match event {
                Event::Start(tag) => {
                    let frame = match classify(tag) {
                        Start::Block(block) => {
                            flush(&mut tokens, &mut buffer);
                            tokens.push(Token::Open(block));
                            Frame::Block
                        }
                        Start::Code => {
                            flush(&mut tokens, &mut buffer);
                            tokens.push(Token::Open(BlockToken::block(NodeKind::Block)));
                            code_depth += 1;
                            Frame::CodeBlock
                        }
                        Start::Inline(destination) => {
                            if let Some(url) = destination {
                                tokens.push(Token::File(url));
                            }
                            Frame::Inline
                        }
                    };
                    frames.push(frame);
                }
                Event::End(_) => match frames.pop() {
                    Some(Frame::Block) => {
                        flush(&mut tokens, &mut buffer);
                        tokens.push(Token::Close);
                    }
                    Some(Frame::CodeBlock) => {
                        buffer.clear();
                        code_depth = code_depth.saturating_sub(1);
                        tokens.push(Token::Close);
                    }
                    Some(Frame::Inline) | None => {}
                },
                Event::Text(text) => {
                    if code_depth == 0 {
                        buffer.push_str(&text);
                    }
                }
                Event::SoftBreak | Event::HardBreak => buffer.push('\n'),
                Event::Code(_) | Event::Html(_) | Event::InlineHtml(_) | Event::Rule => {
                    flush(&mut tokens, &mut buffer)
                }
                _ => {}
            }
        }
        flush(&mut tokens, &mut buffer);
        tokens
    }
}

/// How a pulldown-cmark `Start` tag maps onto tokens
enum Start {
    Block(BlockToken),
    Code,
    /// Inline markup; links and images carry their destination
    Inline(Option<String>),
}

fn classify(tag: Tag<'_>) -> Start {
    let kind = match tag {
        Tag::Heading { level, .. } => return Start::Block(BlockToken::heading(level as u8)),
        Tag::CodeBlock(_) => return Start::Code,
        Tag::Image { dest_url, .. } | Tag::Link { dest_url, .. } => {
            let url = dest_url.trim();
            return Start::Inline((!url.is_empty()).then(|| url.to_string()));
        }
        Tag::Emphasis | Tag::Strong | Tag::Strikethrough => return Start::Inline(None),
        Tag::Paragraph => NodeKind::Paragraph,
        Tag::BlockQuote(..) => NodeKind::Blockquote,
        Tag::HtmlBlock | Tag::FootnoteDefinition(_) => NodeKind::Block,
        Tag::List(_) => NodeKind::List,
        Tag::Item => NodeKind::ListItem,
        Tag::Table(_) => NodeKind::Table,
        Tag::TableHead | Tag::TableRow => NodeKind::TableRow,
        Tag::TableCell => NodeKind::TableCell,
        _ => NodeKind::Other,
    };
    Start::Block(BlockToken::block(kind))
}

/// Emit the buffered text and every link found in it
fn flush(tokens: &mut Vec<Token>, buffer: &mut String) {
    if buffer.is_empty() {
        return;
    }
    let text = std::mem::take(buffer);
    let links = scan_links(&text);
    if !text.trim().is_empty() {
        tokens.push(Token::Text(text));
    }
    tokens.extend(links.into_iter().map(Token::Link));
}

/// Find every `[[key:value|alias]] (time date)` occurrence in a text run
pub fn scan_links(text: &str) -> Vec<LinkToken> {
    LINK_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let key = caps.get(1)?.as_str().trim();
            let value = caps.get(2)?.as_str().trim();
            if key.is_empty() || value.is_empty() {
                return None;
            }
            let alias = caps
                .get(3)
                .map(|m| m.as_str().trim().to_string())
                .filter(|a| !a.is_empty());
            let time = caps
                .get(4)
                .and_then(|m| NaiveTime::parse_from_str(m.as_str(), "%H:%M").ok());
            let date = caps
                .get(5)
                .and_then(|m| NaiveDate::parse_from_str(m.as_str(), "%d-%m-%Y").ok());
            Some(LinkToken {
                key: key.to_lowercase(),
                value: value.to_string(),
                alias,
                time,
                date,
            })
        })
        .collect()
}

/// Replace every link occurrence with its alias (or value when unaliased)
pub fn strip_links(text: &str) -> String {
    LINK_PATTERN
        .replace_all(text, |caps: &regex::Captures<'_>| {
            caps.get(3)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links(tokens: &[Token]) -> Vec<&LinkToken> {
        tokens
            .iter()
            .filter_map(|t| match t {
                Token::Link(l) => Some(l),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_scan_plain_and_aliased_links() {
        let found = scan_links("see [[ip:1.1.1.1]] and [[domain:a.com|the domain]]");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].key, "ip");
        assert_eq!(found[0].value, "1.1.1.1");
        assert_eq!(found[0].alias, None);
        assert_eq!(found[1].alias.as_deref(), Some("the domain"));
    }

    #[test]
    fn test_scan_link_with_timestamp() {
        let found = scan_links("[[actor:apt28|Fancy Bear]] (14:30 02-03-2024) was seen");
        assert_eq!(found.len(), 1);
        let link = &found[0];
        assert_eq!(link.time, NaiveTime::from_hms_opt(14, 30, 0));
        assert_eq!(link.date, NaiveDate::from_ymd_opt(2024, 3, 2));
    }

    #[test]
    fn test_scan_value_may_contain_colons() {
        let found = scan_links("[[url:https://example.com/x]]");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].key, "url");
        assert_eq!(found[0].value, "https://example.com/x");
    }

    #[test]
    fn test_scan_rejects_malformed() {
        assert!(scan_links("[[novalue]] [[:empty]] [ip:1.1.1.1]").is_empty());
    }

    #[test]
    fn test_tokenize_heading_and_paragraph() {
        let tokens = Tokenizer::new().tokenize("# H1\n[[ip:1.1.1.1]] [[domain:a.com]]");
        assert_eq!(
            tokens[0],
            Token::Open(BlockToken {
                kind: NodeKind::Heading,
                level: Some(1)
            })
        );
        assert!(tokens.contains(&Token::Open(BlockToken {
            kind: NodeKind::Paragraph,
            level: None
        })));
        let found = links(&tokens);
        assert_eq!(found.len(), 2);

        let opens = tokens.iter().filter(|t| matches!(t, Token::Open(_))).count();
        let closes = tokens.iter().filter(|t| matches!(t, Token::Close)).count();
        assert_eq!(opens, closes);
    }

    #[test]
    fn test_tokenize_ignores_code() {
        let text = "`[[ip:1.1.1.1]]`\n\n```\n[[ip:2.2.2.2]]\n```\n\n[[ip:3.3.3.3]]";
        let tokens = Tokenizer::new().tokenize(text);
        let found = links(&tokens);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].value, "3.3.3.3");
    }

    #[test]
    fn test_tokenize_links_inside_emphasis() {
        let tokens = Tokenizer::new().tokenize("*[[ip:1.1.1.1]]* and **[[ip:2.2.2.2]]**");
        assert_eq!(links(&tokens).len(), 2);
    }

    #[test]
    fn test_tokenize_file_references() {
        let tokens = Tokenizer::new().tokenize("![shot](files/screenshot.png) [doc](files/report.pdf)");
        let files: Vec<_> = tokens
            .iter()
            .filter_map(|t| match t {
                Token::File(url) => Some(url.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(files, vec!["files/screenshot.png", "files/report.pdf"]);
    }

    #[test]
    fn test_tokenize_table_cells() {
        let text = "| a | b |\n|---|---|\n| [[ip:1.1.1.1]] | [[ip:2.2.2.2]] |";
        let tokens = Tokenizer::new().tokenize(text);
        let cells = tokens
            .iter()
            .filter(|t| {
                matches!(
                    t,
                    Token::Open(BlockToken {
                        kind: NodeKind::TableCell,
                        ..
                    })
                )
            })
            .count();
        assert_eq!(cells, 4);
        assert_eq!(links(&tokens).len(), 2);
    }

    #[test]
    fn test_key_is_lowercased() {
        let found = scan_links("[[IP:1.1.1.1]]");
        assert_eq!(found[0].key, "ip");
    }

    #[test]
    fn test_strip_links_prefers_alias() {
        let text = "[[actor:apt28|Fancy Bear]] (14:30 02-03-2024) used [[ip:1.1.1.1]]";
        assert_eq!(strip_links(text), "Fancy Bear used 1.1.1.1");
    }
}
