use kuchiki::traits::TendrilSink;
use kuchiki::{NodeData, NodeRef};

/// Marker class on paired question/answer containers. Content carrying this
/// class is kept whole: never merged with siblings, never split internally.
pub const QA_PAIR_CLASS: &str = "qa-pair";

/// Markup emitted for an entirely empty content string; guarantees the
/// paginator always has at least one unit to place.
pub const EMPTY_PLACEHOLDER_HTML: &str = "<p class=\"empty-note\">No content available.</p>";

/// Wrapper class for synthetic blocks bundling a run of inline siblings.
pub const INLINE_RUN_CLASS: &str = "inline-run";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Heading(u8),
    Paragraph,
    Container,
    List,
    ListItem,
    Table,
    Blockquote,
    Preformatted,
    Rule,
    Figure,
    /// Synthetic wrapper around a maximal run of inline siblings.
    InlineRun,
    /// Atomic paired question/answer container.
    QaPair,
}

/// One ordered element of the content flow: a recognized block element kept
/// intact, or a synthetic wrapper around coalesced inline content. The
/// serialized markup of all units, concatenated in order, reproduces the
/// input's text order.
#[derive(Debug, Clone)]
pub struct FlowUnit {
    kind: BlockKind,
    markup: String,
    text: String,
    atomic: bool,
}

impl FlowUnit {
    pub fn kind(&self) -> BlockKind {
        self.kind
    }

    /// Serialized outer markup of this unit.
    pub fn markup(&self) -> &str {
        &self.markup
    }

    /// Concatenated text content, whitespace as parsed.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_heading(&self) -> bool {
        matches!(self.kind, BlockKind::Heading(_))
    }

    /// Atomic units are moved whole to the next page instead of being split.
    pub fn is_atomic(&self) -> bool {
        self.atomic
    }

    fn from_block_node(node: &NodeRef, kind: BlockKind) -> FlowUnit {
        let atomic = match kind {
            BlockKind::Table | BlockKind::Figure | BlockKind::QaPair => true,
            _ => has_replaced_descendant(node),
        };
        FlowUnit {
            kind,
            markup: node.to_string(),
            text: node.text_contents(),
            atomic,
        }
    }

    fn from_inline_run(buffer: &[NodeRef]) -> Option<FlowUnit> {
        let renderable = buffer.iter().any(|node| {
            !node.text_contents().trim().is_empty() || has_replaced_descendant(node)
        });
        if !renderable {
            return None;
        }
        let mut inner = String::new();
        let mut text = String::new();
        for node in buffer {
            inner.push_str(&node.to_string());
            text.push_str(&node.text_contents());
        }
        let atomic = buffer.iter().any(has_replaced_descendant);
        Some(FlowUnit {
            kind: BlockKind::InlineRun,
            markup: format!("<div class=\"{}\">{}</div>", INLINE_RUN_CLASS, inner),
            text,
            atomic,
        })
    }
}

/// Walk the raw content HTML and produce the ordered flow-unit sequence.
///
/// Content containing `qa-pair` containers takes the atomic path: every
/// direct child of the root becomes one unit, with no inline coalescing and
/// no wrapper unwrapping. Otherwise sectioning wrappers are unwrapped and
/// inline runs between recognized block elements are bundled into synthetic
/// wrapper blocks. Empty content yields exactly one placeholder unit.
pub fn classify_content(html: &str) -> Vec<FlowUnit> {
    let document = kuchiki::parse_html().one(html);
    let root = content_root(&document);

    let mut units = if subtree_contains_qa_pair(&root) {
        collect_atomic_children(&root)
    } else {
        let children = unwrap_sectioning(root.children().collect());
        normalize_flow(&children)
    };

    if units.is_empty() {
        units.push(placeholder_unit());
    }
    units
}

fn placeholder_unit() -> FlowUnit {
    let document = kuchiki::parse_html().one(EMPTY_PLACEHOLDER_HTML);
    let root = content_root(&document);
    let node = root
        .children()
        .find(|child| child.as_element().is_some())
        .unwrap_or(root);
    FlowUnit {
        kind: BlockKind::Paragraph,
        markup: node.to_string(),
        text: node.text_contents(),
        atomic: false,
    }
}

fn content_root(document: &NodeRef) -> NodeRef {
    document
        .select_first("body")
        .map(|body| body.as_node().clone())
        .unwrap_or_else(|_| document.clone())
}

fn element_tag(node: &NodeRef) -> Option<String> {
    node.as_element()
        .map(|el| el.name.local.as_ref().to_ascii_lowercase())
}

fn block_kind(tag: &str) -> Option<BlockKind> {
    match tag {
        "h1" => Some(BlockKind::Heading(1)),
        "h2" => Some(BlockKind::Heading(2)),
        "h3" => Some(BlockKind::Heading(3)),
        "h4" => Some(BlockKind::Heading(4)),
        "h5" => Some(BlockKind::Heading(5)),
        "h6" => Some(BlockKind::Heading(6)),
        "p" => Some(BlockKind::Paragraph),
        "div" => Some(BlockKind::Container),
        "ul" | "ol" => Some(BlockKind::List),
        "li" => Some(BlockKind::ListItem),
        "table" => Some(BlockKind::Table),
        "blockquote" => Some(BlockKind::Blockquote),
        "pre" => Some(BlockKind::Preformatted),
        "hr" => Some(BlockKind::Rule),
        "figure" => Some(BlockKind::Figure),
        _ => None,
    }
}

fn is_sectioning_tag(tag: &str) -> bool {
    matches!(tag, "section" | "article" | "main")
}

pub(crate) fn has_class(node: &NodeRef, class: &str) -> bool {
    let Some(element) = node.as_element() else {
        return false;
    };
    let attrs = element.attributes.borrow();
    attrs
        .get("class")
        .map(|value| value.split_ascii_whitespace().any(|c| c == class))
        .unwrap_or(false)
}

fn subtree_contains_qa_pair(root: &NodeRef) -> bool {
    root.descendants().any(|node| has_class(&node, QA_PAIR_CLASS))
}

/// Atomic mode: one unit per direct child, paired containers kept whole.
fn collect_atomic_children(root: &NodeRef) -> Vec<FlowUnit> {
    let mut units = Vec::new();
    for child in root.children() {
        match child.data() {
            NodeData::Element(_) => {
                let kind = if has_class(&child, QA_PAIR_CLASS) {
                    BlockKind::QaPair
                } else {
                    element_tag(&child)
                        .as_deref()
                        .and_then(block_kind)
                        .unwrap_or(BlockKind::InlineRun)
                };
                if kind == BlockKind::InlineRun {
                    if let Some(unit) = FlowUnit::from_inline_run(&[child.clone()]) {
                        units.push(unit);
                    }
                } else {
                    units.push(FlowUnit::from_block_node(&child, kind));
                }
            }
            NodeData::Text(_) => {
                if let Some(unit) = FlowUnit::from_inline_run(&[child.clone()]) {
                    units.push(unit);
                }
            }
            _ => {}
        }
    }
    units
}

/// Promote the children of pure sectioning wrappers to the root's child list.
fn unwrap_sectioning(children: Vec<NodeRef>) -> Vec<NodeRef> {
    let mut out = Vec::new();
    for child in children {
        match element_tag(&child) {
            Some(tag) if is_sectioning_tag(&tag) => {
                out.extend(unwrap_sectioning(child.children().collect()));
            }
            _ => out.push(child),
        }
    }
    out
}

/// The normalization walk: block-level nodes pass through intact, everything
/// between them accumulates into an inline-run buffer flushed at each block
/// boundary and at the end of the walk.
fn normalize_flow(children: &[NodeRef]) -> Vec<FlowUnit> {
    let mut units = Vec::new();
    let mut buffer: Vec<NodeRef> = Vec::new();

    for child in children {
        match child.data() {
            NodeData::Element(_) => {
                let kind = element_tag(child).as_deref().and_then(block_kind);
                match kind {
                    Some(kind) => {
                        flush_inline_run(&mut buffer, &mut units);
                        units.push(FlowUnit::from_block_node(child, kind));
                    }
                    None => buffer.push(child.clone()),
                }
            }
            NodeData::Text(_) => buffer.push(child.clone()),
            _ => {}
        }
    }
    flush_inline_run(&mut buffer, &mut units);
    units
}

fn flush_inline_run(buffer: &mut Vec<NodeRef>, units: &mut Vec<FlowUnit>) {
    if buffer.is_empty() {
        return;
    }
    if let Some(unit) = FlowUnit::from_inline_run(buffer) {
        units.push(unit);
    }
    buffer.clear();
}

fn is_replaced_tag(node: &NodeRef) -> bool {
    matches!(element_tag(node).as_deref(), Some("img") | Some("table"))
}

fn has_replaced_descendant(node: &NodeRef) -> bool {
    is_replaced_tag(node) || node.descendants().any(|desc| is_replaced_tag(&desc))
}

/// Parse a single unit's serialized markup back into its root element node.
pub(crate) fn parse_fragment_root(markup: &str) -> Option<NodeRef> {
    let document = kuchiki::parse_html().one(markup);
    let root = content_root(&document);
    root.children().find(|child| child.as_element().is_some())
}

/// Minimal text escaping for re-serializing split text nodes.
pub(crate) fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}
