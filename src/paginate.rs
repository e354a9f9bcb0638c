use crate::html::{FlowUnit, escape_text, parse_fragment_root};
use crate::measure::Measurer;
use crate::types::{PageGeometry, Px};
use kuchiki::{NodeData, NodeRef};
use log::debug;

/// Height credited to a unit that measures zero despite carrying text, so the
/// placement loop always advances.
const ZERO_HEIGHT_FALLBACK: f32 = 20.0;

/// The fixed space/threshold set governing one pagination run.
#[derive(Debug, Clone, Copy)]
pub struct PageBudget {
    /// Maximum content height per page.
    pub height: Px,
    /// Content width every fragment is measured against.
    pub width: Px,
    /// Minimum trailing space required to start a heading.
    pub heading_threshold: Px,
    /// Spacing between consecutive units on a page; never forces a break.
    pub block_gap: Px,
    /// Below this much remaining space, units move whole instead of splitting.
    pub min_split_space: Px,
}

impl PageBudget {
    pub fn from_geometry(geometry: &PageGeometry) -> Self {
        Self {
            height: geometry.content_height(),
            width: geometry.content_width(),
            heading_threshold: geometry.heading_threshold,
            block_gap: geometry.block_gap,
            min_split_space: geometry.min_split_space,
        }
    }
}

/// The single mutable accumulator for the page under construction. Owned by
/// the pagination loop; sealed pages are plain strings and immutable.
struct PageDraft {
    fragments: Vec<String>,
    used: Px,
}

impl PageDraft {
    fn new() -> Self {
        Self {
            fragments: Vec::new(),
            used: Px::ZERO,
        }
    }

    fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    fn remaining(&self, budget: &PageBudget) -> Px {
        (budget.height - self.used).max(Px::ZERO)
    }

    /// Append a fragment. The inter-block gap ahead of it is counted only
    /// when it also fits; a unit that fits without the gap is placed gapless
    /// rather than pushed to the next page.
    fn push(&mut self, markup: String, height: Px, budget: &PageBudget) {
        let gap = if self.is_empty() {
            Px::ZERO
        } else {
            budget.block_gap
        };
        if self.used + gap + height <= budget.height {
            self.used = self.used + gap + height;
        } else {
            self.used += height;
        }
        self.fragments.push(markup);
    }

    fn take_html(&mut self) -> String {
        self.used = Px::ZERO;
        let html = self.fragments.join("\n");
        self.fragments.clear();
        html
    }
}

/// Lay the flow-unit sequence out into page-content fragments, each fitting
/// the budget (the sole exception: a page whose only content is one atomic
/// unit taller than a full page). Always returns at least one page.
pub fn paginate(units: &[FlowUnit], budget: &PageBudget, measurer: &dyn Measurer) -> Vec<String> {
    let mut pages: Vec<String> = Vec::new();
    let mut draft = PageDraft::new();

    for unit in units {
        place_unit(unit, budget, measurer, &mut pages, &mut draft);
    }

    if !draft.is_empty() || pages.is_empty() {
        seal(&mut pages, &mut draft);
    }
    pages
}

fn seal(pages: &mut Vec<String>, draft: &mut PageDraft) {
    debug!("sealing page {} ({} fragments)", pages.len() + 1, draft.fragments.len());
    pages.push(draft.take_html());
}

fn place_unit(
    unit: &FlowUnit,
    budget: &PageBudget,
    measurer: &dyn Measurer,
    pages: &mut Vec<String>,
    draft: &mut PageDraft,
) {
    // Heading-orphan rule: a heading never opens at the bottom sliver of a page.
    if unit.is_heading()
        && !draft.is_empty()
        && draft.remaining(budget) < budget.heading_threshold
    {
        debug!("heading-orphan break before {:?}", unit.kind());
        seal(pages, draft);
    }

    let mut current = unit.markup().to_string();
    let splittable = !unit.is_atomic();

    loop {
        let height = measured_height(&current, budget, measurer);
        let remaining = draft.remaining(budget);

        if height <= remaining {
            draft.push(current, height, budget);
            return;
        }

        if !splittable || remaining < budget.min_split_space {
            if !draft.is_empty() {
                seal(pages, draft);
                continue;
            }
            // Fresh page and still overfull. Atomic units are allowed to
            // overflow their own page rather than be dropped; a splittable
            // unit falls through to the split below.
            if !splittable {
                debug!("atomic unit overflows its own page");
                draft.push(current, height, budget);
                return;
            }
        }

        match split_markup(&current, remaining, budget, measurer) {
            Some((part1, part2)) => {
                let made_progress = part1.is_some();
                if let Some(fits) = part1 {
                    let fits_height = measured_height(&fits, budget, measurer);
                    draft.push(fits, fits_height, budget);
                }
                if !made_progress && draft.is_empty() {
                    // Nothing consumed on a full-height page: the first child
                    // alone exceeds the budget and cannot be split further.
                    // Place the unit whole to guarantee forward progress.
                    draft.push(current, height, budget);
                    return;
                }
                seal(pages, draft);
                if part2.is_empty() {
                    return;
                }
                current = part2;
            }
            None => {
                if !draft.is_empty() {
                    seal(pages, draft);
                    continue;
                }
                draft.push(current, height, budget);
                return;
            }
        }
    }
}

fn measured_height(markup: &str, budget: &PageBudget, measurer: &dyn Measurer) -> Px {
    let height = measurer.fragment_height(markup, budget.width);
    if height > Px::ZERO {
        return height;
    }
    let has_text = parse_fragment_root(markup)
        .map(|root| !root.text_contents().trim().is_empty())
        .unwrap_or(false);
    if has_text {
        Px::from_f32(ZERO_HEIGHT_FALLBACK)
    } else {
        Px::ZERO
    }
}

/// Divide one oversized unit at the last point that still fits `avail`.
///
/// Whole child nodes accumulate into the fitting part first; the child that
/// overflows is split word-by-word when it is a text node, and moved whole to
/// the remainder when it is an element. Returns `(fits, remainder)`; `fits`
/// is `None` when not even the first word fits.
fn split_markup(
    markup: &str,
    avail: Px,
    budget: &PageBudget,
    measurer: &dyn Measurer,
) -> Option<(Option<String>, String)> {
    let root = parse_fragment_root(markup)?;
    let (open, close) = shell_tags(&root)?;
    let children: Vec<NodeRef> = root.children().collect();
    if children.is_empty() {
        return None;
    }

    let mut taken: Vec<String> = Vec::new();
    let mut index = 0usize;
    while index < children.len() {
        let child_markup = children[index].to_string();
        let candidate = format!("{open}{}{}{close}", taken.join(""), child_markup);
        if measurer.fragment_height(&candidate, budget.width) <= avail {
            taken.push(child_markup);
            index += 1;
        } else {
            break;
        }
    }

    if index >= children.len() {
        // Every child fit individually even though the whole did not; treat
        // as unsplittable and let the caller move the unit.
        return None;
    }

    let boundary = &children[index];
    let mut remainder_children: Vec<String> = Vec::new();

    if let NodeData::Text(text) = boundary.data() {
        let text = text.borrow().clone();
        let leading_space = text.starts_with(char::is_whitespace) && !taken.is_empty();
        let words: Vec<&str> = text.split_whitespace().collect();

        let mut fit_count = 0usize;
        for count in 1..=words.len() {
            let prefix = words[..count].join(" ");
            let mut piece = String::new();
            if leading_space {
                piece.push(' ');
            }
            piece.push_str(&escape_text(&prefix));
            let candidate = format!("{open}{}{}{close}", taken.join(""), piece);
            if measurer.fragment_height(&candidate, budget.width) <= avail {
                fit_count = count;
            } else {
                break;
            }
        }

        if fit_count > 0 {
            let mut piece = String::new();
            if leading_space {
                piece.push(' ');
            }
            piece.push_str(&escape_text(&words[..fit_count].join(" ")));
            taken.push(piece);
            debug!("split text node after {} of {} words", fit_count, words.len());
        }
        let rest = words[fit_count..].join(" ");
        if !rest.is_empty() {
            remainder_children.push(escape_text(&rest));
        }
    } else {
        remainder_children.push(boundary.to_string());
    }

    for child in &children[index + 1..] {
        remainder_children.push(child.to_string());
    }

    let part1 = if taken.is_empty() {
        None
    } else {
        Some(format!("{open}{}{close}", taken.join("")))
    };
    let part2 = if remainder_children.is_empty() {
        String::new()
    } else {
        format!("{open}{}{close}", remainder_children.join(""))
    };
    Some((part1, part2))
}

/// Reconstruct the opening and closing tags of a unit's root element so both
/// halves of a split keep its tag and attributes.
fn shell_tags(root: &NodeRef) -> Option<(String, String)> {
    let element = root.as_element()?;
    let tag = element.name.local.as_ref().to_string();
    let mut open = String::new();
    open.push('<');
    open.push_str(&tag);
    for (name, attr) in element.attributes.borrow().map.iter() {
        open.push(' ');
        open.push_str(name.local.as_ref());
        open.push_str("=\"");
        open.push_str(&escape_attr(&attr.value));
        open.push('"');
    }
    open.push('>');
    Some((open, format!("</{}>", tag)))
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::FontRegistry;
    use crate::html::classify_content;
    use crate::measure::MetricsMeasurer;
    use kuchiki::traits::TendrilSink;
    use std::sync::Arc;

    fn measurer() -> MetricsMeasurer {
        MetricsMeasurer::new(Arc::new(FontRegistry::new()))
    }

    fn default_budget() -> PageBudget {
        PageBudget::from_geometry(&PageGeometry::a4())
    }

    fn page_text(page_html: &str) -> String {
        let document = kuchiki::parse_html().one(page_html);
        document.text_contents()
    }

    fn squash(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn run(html: &str) -> Vec<String> {
        let units = classify_content(html);
        paginate(&units, &default_budget(), &measurer())
    }

    // Fallback metrics make the numbers exact: 16px body font, 9.6px/char,
    // 19.2px lines, 714px content width, 903px budget. "alpha" rows fit 12
    // words per line and 46 lines per paragraph page.
    #[test]
    fn long_paragraph_splits_at_word_boundaries_into_four_pages() {
        let words: Vec<String> = (0..2000).map(|_| "alpha".to_string()).collect();
        let html = format!("<p>{}</p>", words.join(" "));
        let pages = run(&html);
        assert_eq!(pages.len(), 4);

        let mut total_words = 0usize;
        for page in &pages {
            let text = page_text(page);
            for word in text.split_whitespace() {
                assert_eq!(word, "alpha", "split must never land inside a word");
                total_words += 1;
            }
        }
        assert_eq!(total_words, 2000);
    }

    #[test]
    fn pagination_preserves_text_order_and_loses_nothing() {
        let words: Vec<String> = (0..1500).map(|i| format!("w{}", i)).collect();
        let html = format!(
            "<h2>Heading</h2><p>{}</p><ul><li>one</li><li>two</li></ul>",
            words.join(" ")
        );
        let units = classify_content(&html);
        let input_text: String = units.iter().map(|u| u.text()).collect::<Vec<_>>().join(" ");
        let pages = run(&html);
        assert!(pages.len() > 1);

        let output_text = pages.iter().map(|p| page_text(p)).collect::<Vec<_>>().join(" ");
        assert_eq!(squash(&output_text), squash(&input_text));
    }

    #[test]
    fn every_page_fits_the_budget() {
        let words: Vec<String> = (0..1200).map(|i| format!("word{}", i)).collect();
        let html = format!(
            "<h1>Title</h1><p>{}</p><blockquote>quote text</blockquote>",
            words.join(" ")
        );
        let budget = default_budget();
        let m = measurer();
        let units = classify_content(&html);
        let pages = paginate(&units, &budget, &m);
        for page in &pages {
            let height = m.fragment_height(page, budget.width);
            assert!(
                height <= budget.height + Px::from_f32(0.5),
                "page height {} exceeds budget {}",
                height.to_f32(),
                budget.height.to_f32()
            );
        }
    }

    #[test]
    fn heading_near_page_bottom_opens_the_next_page() {
        // 552 "alpha" words fill 46 lines = 895.2px, leaving less than the
        // 120px heading threshold.
        let filler: Vec<String> = (0..552).map(|_| "alpha".to_string()).collect();
        let html = format!(
            "<p>{}</p><h2>Section Two</h2><p>after</p>",
            filler.join(" ")
        );
        let pages = run(&html);
        assert_eq!(pages.len(), 2);
        assert!(
            pages[1].trim_start().starts_with("<h2"),
            "heading must open page 2, got: {}",
            &pages[1][..pages[1].len().min(60)]
        );
        assert!(!page_text(&pages[0]).contains("Section Two"));
    }

    #[test]
    fn heading_at_document_start_does_not_force_a_blank_page() {
        let pages = run("<h1>Only Title</h1><p>body</p>");
        assert_eq!(pages.len(), 1);
    }

    #[test]
    fn oversized_table_occupies_its_own_page_unsplit() {
        let rows: String = (0..40)
            .map(|i| format!("<tr><td>cell {}</td></tr>", i))
            .collect();
        let html = format!("<p>before</p><table>{}</table><p>after</p>", rows);
        let budget = default_budget();
        let m = measurer();
        let units = classify_content(&html);

        let table_height = m.fragment_height(units[1].markup(), budget.width);
        assert!(table_height > budget.height, "table must exceed the budget");

        let pages = paginate(&units, &budget, &m);
        assert_eq!(pages.len(), 3);
        assert!(pages[1].contains("<table"));
        assert!(!pages[1].contains("before"));
        assert!(!pages[1].contains("after"));
        // The table page is the one allowed to exceed the budget.
        assert!(m.fragment_height(&pages[1], budget.width) > budget.height);
    }

    #[test]
    fn qa_pairs_move_whole_to_the_next_page() {
        let long_answer: Vec<String> = (0..500).map(|_| "ans".to_string()).collect();
        let html = format!(
            "<div class=\"qa-pair\"><p>Q1</p><p>{a}</p></div>\
             <div class=\"qa-pair\"><p>Q2</p><p>{a}</p></div>",
            a = long_answer.join(" ")
        );
        let pages = run(&html);
        assert_eq!(pages.len(), 2);
        for page in &pages {
            let text = page_text(page);
            let q1 = text.contains("Q1");
            let q2 = text.contains("Q2");
            assert!(q1 ^ q2, "each pair must land whole on exactly one page");
        }
    }

    #[test]
    fn empty_content_yields_exactly_one_placeholder_page() {
        let pages = run("");
        assert_eq!(pages.len(), 1);
        assert!(page_text(&pages[0]).contains("No content available"));
    }

    #[test]
    fn page_count_and_split_points_are_deterministic() {
        let words: Vec<String> = (0..1800).map(|i| format!("tok{}", i)).collect();
        let html = format!("<p>{}</p>", words.join(" "));
        let first = run(&html);
        let second = run(&html);
        assert_eq!(first, second);
    }

    #[test]
    fn split_keeps_the_root_tag_and_attributes_on_both_halves() {
        let words: Vec<String> = (0..1200).map(|_| "alpha".to_string()).collect();
        let html = format!("<p class=\"note\">{}</p>", words.join(" "));
        let pages = run(&html);
        assert!(pages.len() >= 2);
        for page in &pages {
            assert!(page.contains("class=\"note\""));
        }
    }

    #[test]
    fn element_boundary_child_moves_whole_to_the_remainder() {
        // A run of text that exactly fills 46 lines, then a span; the span
        // overflows and must move whole, not be torn apart.
        let words: Vec<String> = (0..552).map(|_| "alpha".to_string()).collect();
        let html = format!(
            "<div>{} <span>tail run of inline text</span></div>",
            words.join(" ")
        );
        let pages = run(&html);
        assert_eq!(pages.len(), 2);
        let second = page_text(&pages[1]);
        assert_eq!(squash(&second), "tail run of inline text");
    }

    #[test]
    fn inter_block_gap_never_triggers_a_break() {
        // Two blocks that fit exactly back to back without the gap.
        let budget = PageBudget {
            height: Px::from_f32(62.4),
            width: Px::from_i32(700),
            heading_threshold: Px::from_i32(10),
            block_gap: Px::from_i32(10),
            min_split_space: Px::from_i32(10),
        };
        let m = measurer();
        // Each paragraph: 19.2 line + 12 pad = 31.2; two = 62.4 exactly.
        let units = classify_content("<p>a</p><p>b</p>");
        let pages = paginate(&units, &budget, &m);
        assert_eq!(pages.len(), 1);
    }
}
