use crate::font::FontRegistry;
use crate::types::Px;
use kuchiki::traits::TendrilSink;
use kuchiki::{NodeData, NodeRef};
use std::sync::Arc;

/// Height oracle for the paginator: the measured height of a markup fragment
/// laid out at the given content width. Pagination, page assembly and the
/// default rasterizer all consume the same function, so "fits" means the same
/// thing everywhere.
pub trait Measurer {
    fn fragment_height(&self, markup: &str, width: Px) -> Px;
}

/// Deterministic measurement from font metrics and a fixed per-tag box model.
/// Replaces the render-then-read-height oracle of a live layout engine.
pub struct MetricsMeasurer {
    fonts: Arc<FontRegistry>,
}

impl MetricsMeasurer {
    pub fn new(fonts: Arc<FontRegistry>) -> Self {
        Self { fonts }
    }
}

impl Measurer for MetricsMeasurer {
    fn fragment_height(&self, markup: &str, width: Px) -> Px {
        if markup.trim().is_empty() {
            return Px::ZERO;
        }
        let document = kuchiki::parse_html().one(markup);
        let root = document
            .select_first("body")
            .map(|body| body.as_node().clone())
            .unwrap_or_else(|_| document.clone());
        children_height(&self.fonts, &root, width)
    }
}

pub(crate) const BODY_FONT: f32 = 16.0;
const PRE_FONT: f32 = 14.0;
pub(crate) const TABLE_FONT: f32 = 15.0;

const PARAGRAPH_PAD: f32 = 12.0;
const HEADING_PAD: f32 = 16.0;
const CONTAINER_PAD: f32 = 8.0;
const QUOTE_PAD: f32 = 16.0;
const LIST_PAD: f32 = 12.0;
const LIST_ITEM_GAP: f32 = 4.0;
pub(crate) const LIST_INDENT: f32 = 28.0;
pub(crate) const QUOTE_INDENT: f32 = 32.0;
const RULE_HEIGHT: f32 = 20.0;
pub(crate) const CELL_PAD: f32 = 8.0;
pub(crate) const TABLE_BORDER: f32 = 1.0;
const DEFAULT_IMAGE_HEIGHT: f32 = 180.0;

/// Vertical padding charged to a block, shared by measurement and painting.
pub(crate) fn block_pad(tag: Option<&str>) -> Px {
    let pad = match tag {
        Some("hr") | Some("img") | Some("table") => 0.0,
        Some("h1" | "h2" | "h3" | "h4" | "h5" | "h6") | Some("pre") => HEADING_PAD,
        Some("blockquote") => QUOTE_PAD,
        Some("ul") | Some("ol") => LIST_PAD,
        Some("li") => LIST_ITEM_GAP,
        Some("div") => CONTAINER_PAD,
        Some("figure") => PARAGRAPH_PAD,
        _ => PARAGRAPH_PAD,
    };
    Px::from_f32(pad)
}

pub(crate) fn font_size_for_tag(tag: Option<&str>) -> Px {
    let size = match tag {
        Some("h1") => 32.0,
        Some("h2") => 26.0,
        Some("h3") => 22.0,
        Some("h4") => 19.0,
        Some("h5") => 17.0,
        Some("h6") => 15.0,
        Some("pre") => PRE_FONT,
        _ => BODY_FONT,
    };
    Px::from_f32(size)
}

#[derive(Debug, Clone)]
pub(crate) struct TextLine {
    pub(crate) text: String,
    pub(crate) width: Px,
}

/// Greedy word wrap against measured advance widths. Words are never broken:
/// a word wider than the line becomes an overfull single-word line.
pub(crate) fn wrap_text(
    fonts: &FontRegistry,
    font_size: Px,
    width: Px,
    text: &str,
) -> Vec<TextLine> {
    let space = fonts.measure_text_width(font_size, " ");
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_width = Px::ZERO;

    for word in text.split_whitespace() {
        let word_width = fonts.measure_text_width(font_size, word);
        if current.is_empty() {
            current.push_str(word);
            current_width = word_width;
            continue;
        }
        let grown = current_width + space + word_width;
        if grown > width {
            lines.push(TextLine {
                text: std::mem::take(&mut current),
                width: current_width,
            });
            current.push_str(word);
            current_width = word_width;
        } else {
            current.push(' ');
            current.push_str(word);
            current_width = grown;
        }
    }
    if !current.is_empty() {
        lines.push(TextLine {
            text: current,
            width: current_width,
        });
    }
    lines
}

fn element_tag(node: &NodeRef) -> Option<String> {
    node.as_element()
        .map(|el| el.name.local.as_ref().to_ascii_lowercase())
}

fn is_block_level(node: &NodeRef) -> bool {
    matches!(
        element_tag(node).as_deref(),
        Some(
            "h1" | "h2"
                | "h3"
                | "h4"
                | "h5"
                | "h6"
                | "p"
                | "div"
                | "ul"
                | "ol"
                | "li"
                | "table"
                | "blockquote"
                | "pre"
                | "hr"
                | "figure"
        )
    )
}

/// Height of a node's children laid out as a vertical flow: block children
/// stack, runs of inline content between them measure as wrapped text.
pub(crate) fn children_height(fonts: &FontRegistry, node: &NodeRef, width: Px) -> Px {
    let mut total = Px::ZERO;
    let mut run_text = String::new();

    let mut flush = |run_text: &mut String, total: &mut Px| {
        if run_text.trim().is_empty() {
            run_text.clear();
            return;
        }
        let size = Px::from_f32(BODY_FONT);
        let lines = wrap_text(fonts, size, width, run_text);
        *total += fonts.line_height(size) * (lines.len() as i32);
        run_text.clear();
    };

    for child in node.children() {
        match child.data() {
            NodeData::Element(_) if is_block_level(&child) => {
                flush(&mut run_text, &mut total);
                total += block_height(fonts, &child, width);
            }
            NodeData::Element(_) => {
                if element_tag(&child).as_deref() == Some("img") {
                    flush(&mut run_text, &mut total);
                    total += image_height(&child);
                } else if element_tag(&child).as_deref() == Some("br") {
                    run_text.push('\n');
                } else {
                    run_text.push_str(&child.text_contents());
                    run_text.push(' ');
                    for desc in child.descendants() {
                        if element_tag(&desc).as_deref() == Some("img") {
                            total += image_height(&desc);
                        }
                    }
                }
            }
            NodeData::Text(text) => {
                run_text.push_str(&text.borrow());
            }
            _ => {}
        }
    }
    flush(&mut run_text, &mut total);
    total
}

/// Measured height of one block element at the given width, padding included.
/// A block whose computed height collapses to zero despite carrying text is
/// assigned one body line so pagination always advances.
pub(crate) fn block_height(fonts: &FontRegistry, node: &NodeRef, width: Px) -> Px {
    let tag = element_tag(node);
    let height = match tag.as_deref() {
        Some("hr") => Px::from_f32(RULE_HEIGHT),
        Some("img") => image_height(node),
        Some("table") => table_height(fonts, node, width),
        Some("ul") | Some("ol") => list_height(fonts, node, width),
        Some("blockquote") => {
            let inner = (width - Px::from_f32(QUOTE_INDENT)).max(Px::from_f32(1.0));
            children_height(fonts, node, inner) + Px::from_f32(QUOTE_PAD)
        }
        Some("pre") => {
            let size = Px::from_f32(PRE_FONT);
            let line_count = node.text_contents().lines().count().max(1);
            fonts.line_height(size) * (line_count as i32) + Px::from_f32(HEADING_PAD)
        }
        Some("figure") => children_height(fonts, node, width) + Px::from_f32(PARAGRAPH_PAD),
        Some(heading @ ("h1" | "h2" | "h3" | "h4" | "h5" | "h6")) => {
            let size = font_size_for_tag(Some(heading));
            let lines = wrap_text(fonts, size, width, &node.text_contents());
            fonts.line_height(size) * (lines.len().max(1) as i32) + Px::from_f32(HEADING_PAD)
        }
        Some("li") => {
            let inner = (width - Px::from_f32(LIST_INDENT)).max(Px::from_f32(1.0));
            item_body_height(fonts, node, inner) + Px::from_f32(LIST_ITEM_GAP)
        }
        Some("div") => children_height(fonts, node, width) + Px::from_f32(CONTAINER_PAD),
        _ => children_height(fonts, node, width) + Px::from_f32(PARAGRAPH_PAD),
    };

    if height <= Px::ZERO && !node.text_contents().trim().is_empty() {
        return fonts.line_height(Px::from_f32(BODY_FONT));
    }
    height
}

fn item_body_height(fonts: &FontRegistry, node: &NodeRef, width: Px) -> Px {
    let has_block_child = node.children().any(|child| is_block_level(&child));
    if has_block_child {
        children_height(fonts, node, width)
    } else {
        let size = Px::from_f32(BODY_FONT);
        let lines = wrap_text(fonts, size, width, &node.text_contents());
        fonts.line_height(size) * (lines.len().max(1) as i32)
    }
}

fn list_height(fonts: &FontRegistry, node: &NodeRef, width: Px) -> Px {
    let mut total = Px::from_f32(LIST_PAD);
    for child in node.children() {
        if element_tag(&child).as_deref() == Some("li") {
            total += block_height(fonts, &child, width);
        }
    }
    total
}

fn table_height(fonts: &FontRegistry, node: &NodeRef, width: Px) -> Px {
    let rows: Vec<NodeRef> = node
        .descendants()
        .filter(|desc| element_tag(desc).as_deref() == Some("tr"))
        .collect();
    if rows.is_empty() {
        return Px::from_f32(RULE_HEIGHT);
    }

    let column_count = rows
        .iter()
        .map(|row| {
            row.children()
                .filter(|cell| {
                    matches!(element_tag(cell).as_deref(), Some("td") | Some("th"))
                })
                .count()
        })
        .max()
        .unwrap_or(1)
        .max(1);

    let border = Px::from_f32(TABLE_BORDER);
    let cell_width = ((width - border * (column_count as i32 + 1))
        .mul_ratio(1, column_count as i32))
    .max(Px::from_f32(1.0))
        - Px::from_f32(CELL_PAD * 2.0);
    let cell_width = cell_width.max(Px::from_f32(1.0));
    let size = Px::from_f32(TABLE_FONT);
    let line_height = fonts.line_height(size);

    let mut total = border;
    for row in &rows {
        let mut row_lines = 1usize;
        for cell in row.children() {
            if !matches!(element_tag(&cell).as_deref(), Some("td") | Some("th")) {
                continue;
            }
            let lines = wrap_text(fonts, size, cell_width, &cell.text_contents()).len();
            row_lines = row_lines.max(lines.max(1));
        }
        total += line_height * (row_lines as i32) + Px::from_f32(CELL_PAD * 2.0) + border;
    }
    total
}

pub(crate) fn image_height(node: &NodeRef) -> Px {
    let attr = |name: &str| -> Option<f32> {
        node.as_element().and_then(|el| {
            el.attributes
                .borrow()
                .get(name)
                .and_then(|value| value.trim().parse::<f32>().ok())
        })
    };
    if let Some(height) = attr("height") {
        return Px::from_f32(height.max(1.0));
    }
    if let Some(width) = attr("width") {
        return Px::from_f32((width * 0.75).max(1.0));
    }
    Px::from_f32(DEFAULT_IMAGE_HEIGHT)
}
