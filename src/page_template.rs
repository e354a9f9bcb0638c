use crate::assets::EmbeddedImage;
use crate::export::HierarchyInfo;
use crate::types::PageGeometry;

/// Fixed tagline printed in every page footer.
pub const FOOTER_TAGLINE: &str = "Generated by the learning portal";

/// Wraps page-content fragments with the fixed page chrome: logo header with
/// right-aligned hierarchy text, a content band sized exactly to the
/// pagination budget, and a footer with the tagline and page counter. Pure:
/// the same pages and metadata always assemble to the same markup.
pub struct PageShell {
    geometry: PageGeometry,
    logo_uri: Option<String>,
    context_line: String,
    title_line: String,
}

impl PageShell {
    pub fn new(
        geometry: &PageGeometry,
        hierarchy: &HierarchyInfo,
        logo: Option<&EmbeddedImage>,
    ) -> Self {
        let context_line = [&hierarchy.level_one, &hierarchy.level_two]
            .iter()
            .filter_map(|level| level.as_deref())
            .filter(|name| !name.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" \u{2022} ");
        let title_line = hierarchy
            .document_name
            .as_deref()
            .unwrap_or("Untitled document")
            .to_string();
        Self {
            geometry: geometry.clone(),
            logo_uri: logo.map(EmbeddedImage::data_uri),
            context_line,
            title_line,
        }
    }

    /// Build the full page subtree for one content fragment.
    pub fn assemble(&self, page_content: &str, page_number: usize, page_total: usize) -> String {
        let geom = &self.geometry;
        let logo = match &self.logo_uri {
            Some(uri) => format!(
                "<img class=\"page-logo\" src=\"{}\" height=\"{}\">",
                uri,
                (geom.header_height.to_f32() - 20.0).max(16.0) as i32
            ),
            None => String::new(),
        };
        format!(
            concat!(
                "<div class=\"page\" style=\"width:{w}px;height:{h}px;padding:{m}px\">",
                "<div class=\"page-header\" style=\"height:{hh}px\">",
                "{logo}",
                "<div class=\"page-meta\">{context}<br>{title}</div>",
                "</div>",
                "<div class=\"page-body\" style=\"width:{cw}px;height:{ch}px\">{content}</div>",
                "<div class=\"page-footer\" style=\"height:{fh}px\">",
                "<span class=\"page-tagline\">{tagline}</span>",
                "<span class=\"page-count\">page {n} of {total}</span>",
                "</div>",
                "</div>"
            ),
            w = geom.page.width.to_f32() as i32,
            h = geom.page.height.to_f32() as i32,
            m = geom.margin.to_f32() as i32,
            hh = geom.header_height.to_f32() as i32,
            logo = logo,
            context = escape_html(&self.context_line),
            title = escape_html(&self.title_line),
            cw = geom.content_width().to_f32() as i32,
            ch = geom.content_height().to_f32() as i32,
            content = page_content,
            fh = geom.footer_height.to_f32() as i32,
            tagline = FOOTER_TAGLINE,
            n = page_number,
            total = page_total,
        )
    }

    /// Assemble every paginated fragment with its final `page N of TOTAL`.
    pub fn assemble_all(&self, pages: &[String]) -> Vec<String> {
        let total = pages.len();
        pages
            .iter()
            .enumerate()
            .map(|(index, content)| self.assemble(content, index + 1, total))
            .collect()
    }
}

fn escape_html(text: &str) -> String {
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

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> HierarchyInfo {
        HierarchyInfo {
            level_one: Some("Grade 8".to_string()),
            level_two: Some("Physics".to_string()),
            document_name: Some("Optics Notes".to_string()),
        }
    }

    #[test]
    fn assembles_header_body_and_footer() {
        let shell = PageShell::new(&PageGeometry::a4(), &hierarchy(), None);
        let page = shell.assemble("<p>body</p>", 2, 5);
        assert!(page.contains("Grade 8 \u{2022} Physics"));
        assert!(page.contains("Optics Notes"));
        assert!(page.contains("<p>body</p>"));
        assert!(page.contains("page 2 of 5"));
        assert!(page.contains(FOOTER_TAGLINE));
    }

    #[test]
    fn body_band_matches_the_pagination_budget() {
        let geom = PageGeometry::a4();
        let shell = PageShell::new(&geom, &hierarchy(), None);
        let page = shell.assemble("", 1, 1);
        let expected = format!(
            "class=\"page-body\" style=\"width:{}px;height:{}px\"",
            geom.content_width().to_f32() as i32,
            geom.content_height().to_f32() as i32
        );
        assert!(page.contains(&expected), "missing body band in {}", page);
    }

    #[test]
    fn missing_logo_degrades_to_text_only_header() {
        let shell = PageShell::new(&PageGeometry::a4(), &hierarchy(), None);
        let page = shell.assemble("", 1, 1);
        assert!(!page.contains("page-logo"));
        assert!(page.contains("page-meta"));
    }

    #[test]
    fn absent_hierarchy_levels_are_skipped() {
        let shell = PageShell::new(
            &PageGeometry::a4(),
            &HierarchyInfo {
                level_one: None,
                level_two: Some("Physics".to_string()),
                document_name: None,
            },
            None,
        );
        let page = shell.assemble("", 1, 1);
        assert!(page.contains("Physics<br>Untitled document"));
    }

    #[test]
    fn page_totals_use_the_final_count() {
        let shell = PageShell::new(&PageGeometry::a4(), &hierarchy(), None);
        let pages = shell.assemble_all(&["<p>a</p>".to_string(), "<p>b</p>".to_string()]);
        assert_eq!(pages.len(), 2);
        assert!(pages[0].contains("page 1 of 2"));
        assert!(pages[1].contains("page 2 of 2"));
    }

    #[test]
    fn hierarchy_text_is_escaped() {
        let shell = PageShell::new(
            &PageGeometry::a4(),
            &HierarchyInfo {
                level_one: Some("A <b>& B".to_string()),
                level_two: None,
                document_name: None,
            },
            None,
        );
        let page = shell.assemble("", 1, 1);
        assert!(page.contains("A &lt;b&gt;&amp; B"));
    }
}
