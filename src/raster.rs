use crate::assets::parse_data_uri_bytes;
use crate::error::ExportError;
use crate::font::FontRegistry;
use crate::measure;
use crate::types::{PageGeometry, Px};
use kuchiki::traits::TendrilSink;
use kuchiki::{NodeData, NodeRef};
use log::warn;
use std::sync::Arc;
use tiny_skia::{
    FillRule, FilterQuality, IntSize, Paint, PathBuilder, Pixmap, PixmapPaint, Rect, Stroke,
    Transform,
};
use ttf_parser::{Face, OutlineBuilder};

/// One rendered page: straight (non-premultiplied) RGBA pixels.
#[derive(Debug)]
pub struct PageBitmap {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Turns one assembled page subtree into a bitmap. Injected into the
/// exporter so deployments can substitute their own raster engine.
pub trait Rasterizer {
    fn render_page(
        &self,
        page_html: &str,
        geometry: &PageGeometry,
    ) -> Result<PageBitmap, ExportError>;
}

/// Default rasterizer: lays the page out with the same metrics the paginator
/// measured with and paints it supersampled. Text is filled from glyph
/// outlines of the registered face; with no face registered each text line
/// degrades to a redacted bar so the pipeline stays runnable end to end.
pub struct GlyphRasterizer {
    fonts: Arc<FontRegistry>,
}

impl GlyphRasterizer {
    pub fn new(fonts: Arc<FontRegistry>) -> Self {
        Self { fonts }
    }
}

impl Rasterizer for GlyphRasterizer {
    fn render_page(
        &self,
        page_html: &str,
        geometry: &PageGeometry,
    ) -> Result<PageBitmap, ExportError> {
        let scale = geometry.supersample;
        let width_px = (geometry.page.width.to_f32() * scale).round() as u32;
        let height_px = (geometry.page.height.to_f32() * scale).round() as u32;
        let mut pixmap = Pixmap::new(width_px, height_px).ok_or_else(|| {
            ExportError::Raster(format!(
                "invalid raster size {}x{} at scale {}",
                width_px, height_px, scale
            ))
        })?;
        pixmap.fill(tiny_skia::Color::from_rgba8(255, 255, 255, 255));

        let face_storage = self.fonts.primary().map(|font| font.data.clone());
        let face = face_storage
            .as_deref()
            .and_then(|data| Face::parse(data, 0).ok());

        let mut painter = Painter {
            pixmap: &mut pixmap,
            fonts: &self.fonts,
            face,
            scale,
        };

        let document = kuchiki::parse_html().one(page_html);
        let geom = geometry;
        let margin = geom.margin.to_f32();

        if let Ok(header) = document.select_first(".page-header") {
            painter.paint_header(header.as_node(), geom);
        }
        if let Ok(body) = document.select_first(".page-body") {
            let top = margin + geom.header_height.to_f32();
            painter.paint_flow(
                body.as_node(),
                Px::from_f32(margin),
                Px::from_f32(top),
                geom.content_width(),
                Some(geom.block_gap),
            );
        }
        if let Ok(footer) = document.select_first(".page-footer") {
            painter.paint_footer(footer.as_node(), geom);
        }

        Ok(PageBitmap {
            width: width_px,
            height: height_px,
            pixels: demultiply(pixmap),
        })
    }
}

fn demultiply(pixmap: Pixmap) -> Vec<u8> {
    let mut data = pixmap.take();
    for px in data.chunks_exact_mut(4) {
        let a = px[3] as u32;
        if a > 0 && a < 255 {
            px[0] = ((px[0] as u32 * 255) / a).min(255) as u8;
            px[1] = ((px[1] as u32 * 255) / a).min(255) as u8;
            px[2] = ((px[2] as u32 * 255) / a).min(255) as u8;
        }
    }
    data
}

struct Painter<'a> {
    pixmap: &'a mut Pixmap,
    fonts: &'a FontRegistry,
    face: Option<Face<'a>>,
    scale: f32,
}

const TEXT_GRAY: u8 = 20;
const RULE_GRAY: u8 = 170;
const BAR_GRAY: u8 = 150;
const META_FONT: f32 = 14.0;
const FOOTER_FONT: f32 = 12.0;

impl Painter<'_> {
    fn solid(&self, gray: u8) -> Paint<'static> {
        let mut paint = Paint::default();
        paint.set_color_rgba8(gray, gray, gray, 255);
        paint.anti_alias = true;
        paint
    }

    fn fill_rect(&mut self, x: f32, y: f32, w: f32, h: f32, gray: u8) {
        let s = self.scale;
        if let Some(rect) = Rect::from_xywh(x * s, y * s, (w * s).max(0.1), (h * s).max(0.1)) {
            let paint = self.solid(gray);
            self.pixmap
                .fill_rect(rect, &paint, Transform::identity(), None);
        }
    }

    fn stroke_line(&mut self, x0: f32, y0: f32, x1: f32, y1: f32, width: f32, gray: u8) {
        let s = self.scale;
        let mut pb = PathBuilder::new();
        pb.move_to(x0 * s, y0 * s);
        pb.line_to(x1 * s, y1 * s);
        if let Some(path) = pb.finish() {
            let paint = self.solid(gray);
            let stroke = Stroke {
                width: width * s,
                ..Stroke::default()
            };
            self.pixmap
                .stroke_path(&path, &paint, &stroke, Transform::identity(), None);
        }
    }

    /// Draw one already-wrapped line. Returns nothing; advance is the
    /// caller's line height.
    fn draw_line(&mut self, text: &str, x: f32, y_top: f32, font_size: Px) {
        let size = font_size.to_f32();
        let baseline = y_top + size * 0.8;
        if self.face.is_none() {
            let width = self.fonts.measure_text_width(font_size, text).to_f32();
            if width > 0.0 {
                self.fill_rect(x, y_top + size * 0.25, width, size * 0.5, BAR_GRAY);
            }
            return;
        }
        let Some(face) = self.face.as_ref() else {
            return;
        };
        let units = face.units_per_em().max(1) as f32;
        let glyph_scale = size / units;
        let mut pen = x;
        let mut glyph_paths: Vec<(tiny_skia::Path, Transform)> = Vec::new();
        for ch in text.chars() {
            let Some(gid) = face.glyph_index(ch) else {
                pen += size * 0.5;
                continue;
            };
            let mut sink = GlyphSink {
                builder: PathBuilder::new(),
            };
            if face.outline_glyph(gid, &mut sink).is_some() {
                if let Some(path) = sink.builder.finish() {
                    let transform = Transform::from_row(
                        glyph_scale * self.scale,
                        0.0,
                        0.0,
                        -glyph_scale * self.scale,
                        pen * self.scale,
                        baseline * self.scale,
                    );
                    glyph_paths.push((path, transform));
                }
            }
            let advance = face.glyph_hor_advance(gid).unwrap_or(0) as f32;
            pen += advance * glyph_scale;
        }
        let paint = self.solid(TEXT_GRAY);
        for (path, transform) in glyph_paths {
            self.pixmap
                .fill_path(&path, &paint, FillRule::Winding, transform, None);
        }
    }

    fn draw_wrapped(&mut self, text: &str, x: Px, y: Px, width: Px, font_size: Px) -> Px {
        let lines = measure::wrap_text(self.fonts, font_size, width, text);
        let line_height = self.fonts.line_height(font_size);
        let mut cursor = y;
        for line in &lines {
            self.draw_line(&line.text, x.to_f32(), cursor.to_f32(), font_size);
            cursor += line_height;
        }
        cursor
    }

    fn paint_header(&mut self, header: &NodeRef, geom: &PageGeometry) {
        let margin = geom.margin.to_f32();
        let header_h = geom.header_height.to_f32();
        let right = geom.page.width.to_f32() - margin;

        if let Ok(img) = header.select_first("img") {
            let attrs = img.attributes.borrow();
            if let Some(src) = attrs.get("src") {
                let target_h = header_h - 20.0;
                self.draw_image_src(src, margin, margin + 10.0, target_h * 2.0, target_h);
            }
        }

        if let Ok(meta) = header.select_first(".page-meta") {
            let size = Px::from_f32(META_FONT);
            let line_height = self.fonts.line_height(size).to_f32();
            let mut y = margin + 14.0;
            for line in meta_lines(meta.as_node()) {
                let width = self.fonts.measure_text_width(size, &line).to_f32();
                self.draw_line(&line, right - width, y, size);
                y += line_height;
            }
        }

        let rule_y = margin + header_h - 6.0;
        self.stroke_line(margin, rule_y, right, rule_y, 1.0, RULE_GRAY);
    }

    fn paint_footer(&mut self, footer: &NodeRef, geom: &PageGeometry) {
        let margin = geom.margin.to_f32();
        let right = geom.page.width.to_f32() - margin;
        let top = geom.page.height.to_f32() - margin - geom.footer_height.to_f32();
        self.stroke_line(margin, top + 4.0, right, top + 4.0, 1.0, RULE_GRAY);

        let size = Px::from_f32(FOOTER_FONT);
        let text_y = top + 14.0;
        if let Ok(tagline) = footer.select_first(".page-tagline") {
            self.draw_line(&tagline.text_contents(), margin, text_y, size);
        }
        if let Ok(count) = footer.select_first(".page-count") {
            let text = count.text_contents();
            let width = self.fonts.measure_text_width(size, &text).to_f32();
            self.draw_line(&text, right - width, text_y, size);
        }
    }

    /// Paint a vertical flow of blocks and inline runs, mirroring the
    /// measurement walk so painted positions match measured heights.
    fn paint_flow(
        &mut self,
        node: &NodeRef,
        x: Px,
        y: Px,
        width: Px,
        gap: Option<Px>,
    ) -> Px {
        let mut cursor = y;
        let mut run_text = String::new();

        for child in node.children() {
            match child.data() {
                NodeData::Element(_) if is_block_level(&child) => {
                    self.flush_run(&mut run_text, &mut cursor, x, width);
                    let height = self.paint_block(&child, x, cursor, width);
                    cursor += height;
                    if let Some(gap) = gap {
                        cursor += gap;
                    }
                }
                NodeData::Element(_) => {
                    if element_tag(&child).as_deref() == Some("img") {
                        self.flush_run(&mut run_text, &mut cursor, x, width);
                        let height = measure::image_height(&child);
                        self.draw_image_node(&child, x, cursor, width, height);
                        cursor += height;
                    } else {
                        run_text.push_str(&child.text_contents());
                        run_text.push(' ');
                    }
                }
                NodeData::Text(text) => {
                    run_text.push_str(&text.borrow());
                }
                _ => {}
            }
        }
        self.flush_run(&mut run_text, &mut cursor, x, width);
        cursor
    }

    fn flush_run(&mut self, run_text: &mut String, cursor: &mut Px, x: Px, width: Px) {
        if !run_text.trim().is_empty() {
            let body_size = Px::from_f32(measure::BODY_FONT);
            *cursor = self.draw_wrapped(run_text, x, *cursor, width, body_size);
        }
        run_text.clear();
    }

    /// Paint one block and return exactly the height the measurer charges it.
    fn paint_block(&mut self, node: &NodeRef, x: Px, y: Px, width: Px) -> Px {
        let tag = element_tag(node);
        let height = measure::block_height(self.fonts, node, width);
        let pad_top = measure::block_pad(tag.as_deref()).mul_ratio(1, 2);
        let inner_y = y + pad_top;

        match tag.as_deref() {
            Some("hr") => {
                let mid = y.to_f32() + height.to_f32() / 2.0;
                self.stroke_line(x.to_f32(), mid, (x + width).to_f32(), mid, 1.0, RULE_GRAY);
            }
            Some("img") => {
                self.draw_image_node(node, x, y, width, height);
            }
            Some("table") => {
                self.paint_table(node, x, y, width);
            }
            Some("ul") | Some("ol") => {
                let indent = Px::from_f32(measure::LIST_INDENT);
                let mut item_y = inner_y;
                for item in node.children() {
                    if element_tag(&item).as_deref() != Some("li") {
                        continue;
                    }
                    let item_height = measure::block_height(self.fonts, &item, width);
                    self.draw_line(
                        "\u{2022}",
                        (x + indent.mul_ratio(1, 3)).to_f32(),
                        item_y.to_f32(),
                        Px::from_f32(measure::BODY_FONT),
                    );
                    self.paint_flow(&item, x + indent, item_y, width - indent, None);
                    item_y += item_height;
                }
            }
            Some("blockquote") => {
                let indent = Px::from_f32(measure::QUOTE_INDENT);
                self.fill_rect(
                    x.to_f32() + 4.0,
                    inner_y.to_f32(),
                    3.0,
                    (height - pad_top * 2).max(Px::ZERO).to_f32(),
                    RULE_GRAY,
                );
                self.paint_flow(node, x + indent, inner_y, width - indent, None);
            }
            Some("pre") => {
                let size = measure::font_size_for_tag(Some("pre"));
                let line_height = self.fonts.line_height(size);
                let mut line_y = inner_y;
                for line in node.text_contents().lines() {
                    self.draw_line(line, x.to_f32(), line_y.to_f32(), size);
                    line_y += line_height;
                }
            }
            Some(heading @ ("h1" | "h2" | "h3" | "h4" | "h5" | "h6")) => {
                let size = measure::font_size_for_tag(Some(heading));
                self.draw_wrapped(&node.text_contents(), x, inner_y, width, size);
            }
            _ => {
                self.paint_flow(node, x, inner_y, width, None);
            }
        }
        height
    }

    fn paint_table(&mut self, node: &NodeRef, x: Px, y: Px, width: Px) {
        let rows: Vec<NodeRef> = node
            .descendants()
            .filter(|desc| element_tag(desc).as_deref() == Some("tr"))
            .collect();
        if rows.is_empty() {
            return;
        }
        let column_count = rows
            .iter()
            .map(|row| row.children().filter(is_cell).count())
            .max()
            .unwrap_or(1)
            .max(1);

        let size = Px::from_f32(measure::TABLE_FONT);
        let line_height = self.fonts.line_height(size);
        let border = Px::from_f32(measure::TABLE_BORDER);
        let cell_pad = Px::from_f32(measure::CELL_PAD);
        let column_width = (width - border * (column_count as i32 + 1))
            .mul_ratio(1, column_count as i32)
            .max(Px::from_f32(1.0));
        let text_width = (column_width - cell_pad * 2).max(Px::from_f32(1.0));

        let left = x.to_f32();
        let right = (x + width).to_f32();
        let mut row_y = y + border;
        self.stroke_line(left, y.to_f32(), right, y.to_f32(), 1.0, RULE_GRAY);

        for row in &rows {
            let mut row_lines = 1usize;
            for cell in row.children().filter(is_cell) {
                let lines =
                    measure::wrap_text(self.fonts, size, text_width, &cell.text_contents()).len();
                row_lines = row_lines.max(lines.max(1));
            }
            let row_height = line_height * (row_lines as i32) + cell_pad * 2;

            let mut cell_x = x + border;
            for cell in row.children().filter(is_cell) {
                self.draw_wrapped(
                    &cell.text_contents(),
                    cell_x + cell_pad,
                    row_y + cell_pad,
                    text_width,
                    size,
                );
                cell_x += column_width + border;
            }
            row_y += row_height + border;
            self.stroke_line(left, row_y.to_f32(), right, row_y.to_f32(), 1.0, RULE_GRAY);
        }

        let mut grid_x = x;
        for _ in 0..=column_count {
            self.stroke_line(
                grid_x.to_f32(),
                y.to_f32(),
                grid_x.to_f32(),
                row_y.to_f32(),
                1.0,
                RULE_GRAY,
            );
            grid_x += column_width + border;
        }
    }

    fn draw_image_node(&mut self, node: &NodeRef, x: Px, y: Px, max_width: Px, height: Px) {
        let src = node
            .as_element()
            .and_then(|el| el.attributes.borrow().get("src").map(|s| s.to_string()));
        match src {
            Some(src) => self.draw_image_src(
                &src,
                x.to_f32(),
                y.to_f32(),
                max_width.to_f32(),
                height.to_f32(),
            ),
            None => self.fill_rect(
                x.to_f32(),
                y.to_f32(),
                max_width.to_f32().min(height.to_f32() * 1.5),
                height.to_f32(),
                RULE_GRAY,
            ),
        }
    }

    fn draw_image_src(&mut self, src: &str, x: f32, y: f32, max_width: f32, height: f32) {
        let Some(decoded) = parse_data_uri_bytes(src)
            .and_then(|bytes| image::load_from_memory(&bytes).ok())
        else {
            if !src.starts_with("data:") {
                warn!("image source is not embedded, drawing placeholder: {}", src);
            } else {
                warn!("undecodable embedded image, drawing placeholder");
            }
            self.fill_rect(x, y, max_width.min(height * 1.5), height, RULE_GRAY);
            return;
        };
        let rgba = decoded.to_rgba8();
        let (img_w, img_h) = rgba.dimensions();
        if img_w == 0 || img_h == 0 {
            return;
        }
        let mut data = rgba.into_raw();
        for px in data.chunks_exact_mut(4) {
            let a = px[3] as u32;
            px[0] = (px[0] as u32 * a / 255) as u8;
            px[1] = (px[1] as u32 * a / 255) as u8;
            px[2] = (px[2] as u32 * a / 255) as u8;
        }
        let Some(source) = IntSize::from_wh(img_w, img_h)
            .and_then(|size| Pixmap::from_vec(data, size))
        else {
            return;
        };

        let aspect = img_w as f32 / img_h as f32;
        let target_h = height;
        let target_w = (target_h * aspect).min(max_width);
        let transform = Transform::from_row(
            target_w * self.scale / img_w as f32,
            0.0,
            0.0,
            target_h * self.scale / img_h as f32,
            x * self.scale,
            y * self.scale,
        );
        let paint = PixmapPaint {
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        };
        self.pixmap
            .draw_pixmap(0, 0, source.as_ref(), &paint, transform, None);
    }
}

/// Adapts ttf-parser glyph outlines onto a tiny-skia path.
struct GlyphSink {
    builder: PathBuilder,
}

impl OutlineBuilder for GlyphSink {
    fn move_to(&mut self, x: f32, y: f32) {
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

fn is_cell(node: &NodeRef) -> bool {
    matches!(element_tag(node).as_deref(), Some("td") | Some("th"))
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

/// Text lines of the header meta block, split on `<br>`.
fn meta_lines(meta: &NodeRef) -> Vec<String> {
    let mut lines = vec![String::new()];
    for child in meta.children() {
        if element_tag(&child).as_deref() == Some("br") {
            lines.push(String::new());
        } else {
            let last = lines.last_mut().expect("line buffer");
            last.push_str(child.text_contents().trim());
        }
    }
    lines.retain(|line| !line.is_empty());
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::load_image_bytes;
    use crate::export::HierarchyInfo;
    use crate::page_template::PageShell;

    fn rasterizer() -> GlyphRasterizer {
        GlyphRasterizer::new(Arc::new(FontRegistry::new()))
    }

    fn shell(logo: Option<&crate::assets::EmbeddedImage>) -> PageShell {
        PageShell::new(
            &PageGeometry::a4(),
            &HierarchyInfo {
                level_one: Some("Grade 8".to_string()),
                level_two: Some("Physics".to_string()),
                document_name: Some("Optics".to_string()),
            },
            logo,
        )
    }

    fn ink_in_band(bitmap: &PageBitmap, y0: f32, y1: f32) -> usize {
        let mut count = 0usize;
        let row_start = (y0 as u32).min(bitmap.height - 1);
        let row_end = (y1 as u32).min(bitmap.height);
        for row in row_start..row_end {
            for col in 0..bitmap.width {
                let idx = ((row * bitmap.width + col) * 4) as usize;
                if bitmap.pixels[idx] < 250 {
                    count += 1;
                }
            }
        }
        count
    }

    #[test]
    fn bitmap_matches_supersampled_page_footprint() {
        let geom = PageGeometry::a4();
        let page = shell(None).assemble("<p>hello world</p>", 1, 1);
        let bitmap = rasterizer().render_page(&page, &geom).expect("render");
        assert_eq!(bitmap.width, 1588);
        assert_eq!(bitmap.height, 2246);
        assert_eq!(bitmap.pixels.len(), (1588 * 2246 * 4) as usize);
    }

    #[test]
    fn corners_stay_paper_white() {
        let geom = PageGeometry::a4();
        let page = shell(None).assemble("<p>x</p>", 1, 1);
        let bitmap = rasterizer().render_page(&page, &geom).expect("render");
        assert_eq!(&bitmap.pixels[..4], &[255, 255, 255, 255]);
    }

    #[test]
    fn body_content_leaves_ink_in_the_body_band() {
        let geom = PageGeometry::a4();
        let page = shell(None).assemble("<p>some visible paragraph text</p>", 1, 1);
        let bitmap = rasterizer().render_page(&page, &geom).expect("render");
        let scale = geom.supersample;
        let body_top = (geom.margin + geom.header_height).to_f32() * scale;
        let ink = ink_in_band(&bitmap, body_top, body_top + 40.0 * scale);
        assert!(ink > 0, "expected painted content in the body band");
    }

    #[test]
    fn header_rule_and_footer_counter_are_painted() {
        let geom = PageGeometry::a4();
        let page = shell(None).assemble("<p>x</p>", 3, 9);
        let bitmap = rasterizer().render_page(&page, &geom).expect("render");
        let scale = geom.supersample;
        let header_band = ink_in_band(&bitmap, 0.0, (geom.margin + geom.header_height).to_f32() * scale);
        assert!(header_band > 0);
        let footer_top = (geom.page.height.to_f32() - geom.margin.to_f32() - geom.footer_height.to_f32()) * scale;
        let footer_band = ink_in_band(&bitmap, footer_top, bitmap.height as f32);
        assert!(footer_band > 0);
    }

    #[test]
    fn embedded_logo_is_painted_into_the_header() {
        let mut png = Vec::new();
        let img = image::RgbaImage::from_pixel(8, 8, image::Rgba([200, 30, 30, 255]));
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .expect("encode");
        let logo = load_image_bytes(png).expect("logo");

        let geom = PageGeometry::a4();
        let page = shell(Some(&logo)).assemble("<p>x</p>", 1, 1);
        let bitmap = rasterizer().render_page(&page, &geom).expect("render");

        // Look for a reddish pixel near the header origin.
        let scale = geom.supersample;
        let y = ((geom.margin.to_f32() + 20.0) * scale) as u32;
        let mut found = false;
        for col in 0..(200.0 * scale) as u32 {
            let idx = ((y * bitmap.width + col) * 4) as usize;
            let (r, g) = (bitmap.pixels[idx], bitmap.pixels[idx + 1]);
            if r > 150 && g < 100 {
                found = true;
                break;
            }
        }
        assert!(found, "expected logo pixels in the header band");
    }

    #[test]
    fn degenerate_supersample_is_a_raster_error() {
        let mut geom = PageGeometry::a4();
        geom.supersample = 0.0;
        let page = shell(None).assemble("<p>x</p>", 1, 1);
        let err = rasterizer().render_page(&page, &geom).unwrap_err();
        assert!(matches!(err, ExportError::Raster(_)));
    }

    #[test]
    fn rendering_is_deterministic() {
        let geom = PageGeometry::a4();
        let page = shell(None).assemble("<h2>t</h2><p>body text</p><hr>", 1, 2);
        let r = rasterizer();
        let first = r.render_page(&page, &geom).expect("render");
        let second = r.render_page(&page, &geom).expect("render");
        assert_eq!(first.pixels, second.pixels);
    }
}
