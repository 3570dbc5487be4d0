//! Markdown bridge.
//!
//! `parse` turns markdown text into a document tree using comrak's
//! CommonMark parser; `serialize` writes a tree back out as markdown.
//! Trees produced by `parse` survive a `serialize` → `parse` cycle.

use comrak::nodes::{AstNode, ListType, NodeValue};
use comrak::{parse_document, Arena, Options};
use serde_json::{json, Value};

use crate::error::ServiceError;
use crate::tree::{self, Mark, Node};

/// Which node set the parsed tree is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Schema {
    /// Full rich-text node set.
    #[default]
    Rich,
    /// Source view: one plain paragraph per line.
    Plain,
}

impl Schema {
    pub fn for_markdown_mode(markdown_mode: bool) -> Self {
        if markdown_mode {
            Schema::Plain
        } else {
            Schema::Rich
        }
    }
}

// ─── Parsing ────────────────────────────────────────────────────────

fn options() -> Options<'static> {
    let mut options = Options::default();
    options.extension.strikethrough = true;
    options
}

/// Parse markdown text into a `doc` node.
///
/// Fails with `InvalidFile` when the text is not a document at all
/// (binary content).
pub fn parse(text: &str, schema: Schema) -> Result<Node, ServiceError> {
    if text.contains('\0') {
        return Err(ServiceError::InvalidFile(json!({
            "reason": "binary content",
            "length": text.len(),
        })));
    }

    if schema == Schema::Plain {
        let body = text.strip_suffix('\n').unwrap_or(text);
        return Ok(Node::from_lines(body.split('\n')));
    }

    let arena = Arena::new();
    let root = parse_document(&arena, text, &options());
    let content: Vec<Node> = root.children().filter_map(convert_block).collect();
    if content.is_empty() {
        return Ok(Node::empty_doc());
    }
    Ok(Node::doc(content).normalized())
}

fn convert_blocks<'a>(node: &'a AstNode<'a>) -> Vec<Node> {
    node.children().filter_map(convert_block).collect()
}

fn convert_block<'a>(node: &'a AstNode<'a>) -> Option<Node> {
    let value = node.data.borrow().value.clone();
    let block = match value {
        NodeValue::Paragraph => Node::paragraph(convert_inlines(node)),
        NodeValue::Heading(ref heading) => Node::heading(heading.level, convert_inlines(node)),
        NodeValue::BlockQuote => Node::new(tree::BLOCKQUOTE).with_content(convert_blocks(node)),
        NodeValue::List(ref list) => {
            let kind = match list.list_type {
                ListType::Bullet => tree::BULLET_LIST,
                ListType::Ordered => tree::ORDERED_LIST,
            };
            let mut out = Node::new(kind).with_attr("tight", Value::Bool(list.tight));
            if list.list_type == ListType::Ordered {
                out = out.with_attr("order", Value::from(list.start as u64));
            }
            out.with_content(convert_blocks(node))
        }
        NodeValue::Item(_) => {
            let mut content = convert_blocks(node);
            if content.is_empty() {
                content.push(Node::paragraph(Vec::new()));
            }
            Node::new(tree::LIST_ITEM).with_content(content)
        }
        NodeValue::CodeBlock(ref code) => {
            let lang = code.info.split_whitespace().next().unwrap_or("").to_string();
            let body = code.literal.strip_suffix('\n').unwrap_or(&code.literal);
            let content = if body.is_empty() {
                Vec::new()
            } else {
                vec![Node::text(body)]
            };
            Node::new(tree::CODE_BLOCK)
                .with_attr("params", Value::String(lang))
                .with_content(content)
        }
        NodeValue::ThematicBreak => Node::new(tree::HORIZONTAL_RULE),
        NodeValue::HtmlBlock(ref html) => {
            let body = html.literal.trim_end_matches('\n');
            Node::paragraph(vec![Node::text(body)])
        }
        other => {
            log::debug!("Skipping unsupported markdown block {:?}", other);
            return None;
        }
    };
    Some(block)
}

fn convert_inlines<'a>(node: &'a AstNode<'a>) -> Vec<Node> {
    let mut out = Vec::new();
    for child in node.children() {
        collect_inline(child, &[], &mut out);
    }
    out
}

fn collect_inline<'a>(node: &'a AstNode<'a>, marks: &[Mark], out: &mut Vec<Node>) {
    let value = node.data.borrow().value.clone();
    match value {
        NodeValue::Text(ref text) => out.push(Node::marked_text(text.to_string(), marks.to_vec())),
        NodeValue::SoftBreak => out.push(Node::marked_text("\n", marks.to_vec())),
        NodeValue::LineBreak => out.push(Node::new(tree::HARD_BREAK)),
        NodeValue::Code(ref code) => {
            let marks = with_mark(marks, Mark::new(tree::MARK_CODE));
            out.push(Node::marked_text(code.literal.to_string(), marks));
        }
        NodeValue::HtmlInline(ref html) => {
            out.push(Node::marked_text(html.to_string(), marks.to_vec()))
        }
        NodeValue::Emph => descend(node, &with_mark(marks, Mark::new(tree::MARK_EM)), out),
        NodeValue::Strong => descend(node, &with_mark(marks, Mark::new(tree::MARK_STRONG)), out),
        NodeValue::Strikethrough => descend(
            node,
            &with_mark(marks, Mark::new(tree::MARK_STRIKETHROUGH)),
            out,
        ),
        NodeValue::Link(ref link) => {
            let title = Some(link.title.to_string()).filter(|t| !t.is_empty());
            let mark = Mark::link(link.url.to_string(), title);
            descend(node, &with_mark(marks, mark), out)
        }
        NodeValue::Image(ref link) => {
            let mut alt = Vec::new();
            for child in node.children() {
                collect_inline(child, &[], &mut alt);
            }
            let alt: String = alt.iter().map(Node::text_content).collect();
            let title = Some(link.title.to_string())
                .filter(|t| !t.is_empty())
                .map_or(Value::Null, Value::String);
            out.push(
                Node::new(tree::IMAGE)
                    .with_attr("src", Value::String(link.url.to_string()))
                    .with_attr("alt", Value::String(alt))
                    .with_attr("title", title),
            );
        }
        _ => descend(node, marks, out),
    }
}

fn descend<'a>(node: &'a AstNode<'a>, marks: &[Mark], out: &mut Vec<Node>) {
    for child in node.children() {
        collect_inline(child, marks, out);
    }
}

fn mark_rank(mark: &Mark) -> u8 {
    match mark.kind.as_str() {
        tree::MARK_EM => 0,
        tree::MARK_STRONG => 1,
        tree::MARK_STRIKETHROUGH => 2,
        tree::MARK_LINK => 3,
        tree::MARK_CODE => 4,
        _ => 5,
    }
}

fn with_mark(marks: &[Mark], mark: Mark) -> Vec<Mark> {
    let mut next = marks.to_vec();
    if !next.iter().any(|m| m.kind == mark.kind) {
        next.push(mark);
        next.sort_by_key(mark_rank);
    }
    next
}

// ─── Serialization ──────────────────────────────────────────────────

/// Serialize a `doc` node as markdown ending in exactly one newline.
pub fn serialize(doc: &Node) -> String {
    let body = serialize_blocks(&doc.content, "\n\n");
    let mut out = body.trim_end_matches('\n').to_string();
    out.push('\n');
    out
}

/// Text content of each top-level node, in order.
pub fn plain_lines(doc: &Node) -> Vec<String> {
    doc.content.iter().map(Node::text_content).collect()
}

fn serialize_blocks(blocks: &[Node], separator: &str) -> String {
    blocks
        .iter()
        .map(serialize_block)
        .filter(|block| !block.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

fn serialize_block(node: &Node) -> String {
    match node.kind.as_str() {
        tree::PARAGRAPH => serialize_inlines(&node.content),
        tree::HEADING => {
            let level = node.attr_u64("level").unwrap_or(1).clamp(1, 6) as usize;
            let text = serialize_inlines(&node.content);
            if text.is_empty() {
                String::new()
            } else {
                format!("{} {}", "#".repeat(level), text)
            }
        }
        tree::BLOCKQUOTE => {
            let inner = serialize_blocks(&node.content, "\n\n");
            prefix_lines(&inner, "> ", "> ")
        }
        tree::BULLET_LIST => serialize_list(node, |_| "* ".to_string()),
        tree::ORDERED_LIST => {
            let start = node.attr_u64("order").unwrap_or(1);
            serialize_list(node, |i| format!("{}. ", start + i as u64))
        }
        tree::LIST_ITEM => serialize_blocks(&node.content, "\n\n"),
        tree::CODE_BLOCK => {
            let lang = node.attr_str("params").unwrap_or("");
            let body = node.text_content();
            let mut fence = "```".to_string();
            while body.contains(fence.as_str()) {
                fence.push('`');
            }
            format!("{fence}{lang}\n{body}\n{fence}")
        }
        tree::HORIZONTAL_RULE => "---".to_string(),
        // Inline content at block level: wrap as a paragraph.
        _ => serialize_inlines(std::slice::from_ref(node)),
    }
}

fn serialize_list(node: &Node, marker: impl Fn(usize) -> String) -> String {
    let tight = node.attr_bool("tight").unwrap_or(true);
    let item_sep = if tight { "\n" } else { "\n\n" };
    node.content
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let marker = marker(i);
            let indent = " ".repeat(marker.len());
            let body = serialize_blocks(&item.content, item_sep);
            prefix_lines(&body, &marker, &indent)
        })
        .collect::<Vec<_>>()
        .join(item_sep)
}

/// Prefix the first line with `first` and the others with `rest`;
/// blank lines keep only the trimmed prefix.
fn prefix_lines(text: &str, first: &str, rest: &str) -> String {
    text.split('\n')
        .enumerate()
        .map(|(i, line)| {
            let prefix = if i == 0 { first } else { rest };
            if line.is_empty() {
                prefix.trim_end().to_string()
            } else {
                format!("{prefix}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn open_mark(mark: &Mark) -> String {
    match mark.kind.as_str() {
        tree::MARK_EM => "*".into(),
        tree::MARK_STRONG => "**".into(),
        tree::MARK_STRIKETHROUGH => "~~".into(),
        tree::MARK_CODE => "`".into(),
        tree::MARK_LINK => "[".into(),
        _ => String::new(),
    }
}

fn close_mark(mark: &Mark) -> String {
    match mark.kind.as_str() {
        tree::MARK_LINK => {
            let href = mark.attrs.get("href").and_then(Value::as_str).unwrap_or("");
            match mark.attrs.get("title").and_then(Value::as_str) {
                Some(title) => format!("]({} \"{}\")", href, title.replace('"', "\\\"")),
                None => format!("]({href})"),
            }
        }
        _ => open_mark(mark),
    }
}

fn close_marks(out: &mut String, marks: &[Mark]) {
    // Trailing spaces belong outside the closing delimiters.
    let trimmed_len = out.trim_end_matches([' ', '\t']).len();
    let trailing = out.split_off(trimmed_len);
    for mark in marks.iter().rev() {
        out.push_str(&close_mark(mark));
    }
    out.push_str(&trailing);
}

fn serialize_inlines(nodes: &[Node]) -> String {
    let mut out = String::new();
    // Marks currently open, outermost first.
    let mut active: Vec<Mark> = Vec::new();

    for node in nodes {
        let mut marks = node.marks.clone();
        marks.sort_by_key(mark_rank);
        let mut keep = active.iter().take_while(|m| marks.contains(m)).count();
        let kept_code = active[..keep].iter().any(|m| m.kind == tree::MARK_CODE);
        if kept_code && marks.len() > keep {
            // nothing may open inside a code span
            keep = 0;
        }
        close_marks(&mut out, &active[keep..]);
        active.truncate(keep);
        let opening: Vec<Mark> = marks
            .iter()
            .filter(|m| !active.contains(m))
            .cloned()
            .collect();

        let text = match node.kind.as_str() {
            tree::TEXT => node.text.clone().unwrap_or_default(),
            tree::HARD_BREAK => {
                out.push_str("\\\n");
                continue;
            }
            tree::IMAGE => {
                let alt = escape_inline(node.attr_str("alt").unwrap_or(""), false);
                let src = node.attr_str("src").unwrap_or("");
                match node.attr_str("title") {
                    Some(title) => out.push_str(&format!("![{alt}]({src} \"{title}\")")),
                    None => out.push_str(&format!("![{alt}]({src})")),
                }
                continue;
            }
            _ => node.text_content(),
        };

        let body = if opening.is_empty() {
            text.as_str()
        } else {
            // Leading spaces belong outside the opening delimiters.
            let body = text.trim_start_matches([' ', '\t']);
            out.push_str(&text[..text.len() - body.len()]);
            for mark in &opening {
                out.push_str(&open_mark(mark));
            }
            body
        };
        active.extend(opening);

        if active.iter().any(|m| m.kind == tree::MARK_CODE) {
            out.push_str(body);
        } else {
            let at_line_start = out.is_empty() || out.ends_with('\n');
            out.push_str(&escape_inline(body, at_line_start));
        }
    }
    close_marks(&mut out, &active);
    out
}

/// Escape markdown metacharacters in plain text.
fn escape_inline(text: &str, at_line_start: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let mut escaped = String::with_capacity(line.len());
        for ch in line.chars() {
            if matches!(ch, '\\' | '`' | '*' | '_' | '~' | '[' | ']' | '<' | '&') {
                escaped.push('\\');
            }
            escaped.push(ch);
        }
        if i > 0 || at_line_start {
            escaped = escape_line_start(escaped);
        }
        out.push_str(&escaped);
    }
    out
}

fn escape_line_start(line: String) -> String {
    let trimmed = line.trim_start();
    let indent = &line[..line.len() - trimmed.len()];
    if trimmed.starts_with('#') || trimmed.starts_with('>') {
        return format!("{indent}\\{trimmed}");
    }
    if (trimmed.starts_with("- ") || trimmed.starts_with("+ ")) || trimmed == "-" || trimmed == "+" {
        return format!("{indent}\\{trimmed}");
    }
    if trimmed.chars().all(|c| c == '-' || c == '=') && !trimmed.is_empty() {
        return format!("{indent}\\{trimmed}");
    }
    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        let rest = &trimmed[digits..];
        if rest.starts_with('.') || rest.starts_with(')') {
            return format!("{indent}{}\\{}", &trimmed[..digits], rest);
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(text: &str) -> String {
        serialize(&parse(text, Schema::Rich).unwrap())
    }

    #[test]
    fn test_paragraphs_round_trip() {
        let text = "First paragraph.\n\nSecond one.\n";
        assert_eq!(round_trip(text), text);
        assert_eq!(round_trip("No newline"), "No newline\n");
        assert_eq!(round_trip("Many newlines\n\n\n"), "Many newlines\n");
    }

    #[test]
    fn test_parse_structure() {
        let doc = parse("# Title\n\nSome *em* and **strong**.\n", Schema::Rich).unwrap();
        assert_eq!(doc.kind, tree::DOC);
        assert_eq!(doc.content[0].kind, tree::HEADING);
        assert_eq!(doc.content[0].attr_u64("level"), Some(1));
        let para = &doc.content[1];
        assert_eq!(para.kind, tree::PARAGRAPH);
        assert!(para
            .content
            .iter()
            .any(|n| n.marks.iter().any(|m| m.kind == tree::MARK_EM)));
        assert!(para
            .content
            .iter()
            .any(|n| n.marks.iter().any(|m| m.kind == tree::MARK_STRONG)));
    }

    #[test]
    fn test_rich_round_trip() {
        let text = "## Notes\n\n* one\n* two\n\n1. first\n2. second\n\n> quoted\n\n```rust\nfn main() {}\n```\n\n---\n\nA [link](https://example.com) and `code` and ~~gone~~.\n";
        assert_eq!(round_trip(text), text);
    }

    #[test]
    fn test_parse_serialize_is_stable() {
        let text = "Mixed **bold *nested* text** here\n\n- a\n- b\n";
        let once = parse(text, Schema::Rich).unwrap();
        let twice = parse(&serialize(&once), Schema::Rich).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_escaping_survives() {
        let doc = Node::doc(vec![
            Node::paragraph(vec![Node::text("# not a heading")]),
            Node::paragraph(vec![Node::text("1. not a list, *not em*")]),
        ]);
        let back = parse(&serialize(&doc), Schema::Rich).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_marks_whitespace_moves_outside() {
        let doc = Node::doc(vec![Node::paragraph(vec![
            Node::text("a"),
            Node::marked_text(" bold ", vec![Mark::new(tree::MARK_STRONG)]),
            Node::text("b"),
        ])]);
        assert_eq!(serialize(&doc), "a **bold** b\n");
    }

    #[test]
    fn test_empty_input_gives_empty_doc() {
        let doc = parse("", Schema::Rich).unwrap();
        assert!(doc.is_empty_doc());
        assert_eq!(serialize(&doc), "\n");
    }

    #[test]
    fn test_binary_content_is_invalid_file() {
        let err = parse("abc\0def", Schema::Rich).unwrap_err();
        assert_eq!(err.id(), "invalid_file");
    }

    #[test]
    fn test_plain_schema_one_paragraph_per_line() {
        let doc = parse("# a\n\nb\n", Schema::Plain).unwrap();
        assert_eq!(plain_lines(&doc), vec!["# a", "", "b"]);
    }

    #[test]
    fn test_soft_break_kept_as_newline() {
        let doc = parse("line one\nline two\n", Schema::Rich).unwrap();
        assert_eq!(doc.content.len(), 1);
        assert_eq!(doc.content[0].text_content(), "line one\nline two");
        assert_eq!(serialize(&doc), "line one\nline two\n");
    }
}
