use crate::assets::{EmbeddedImage, load_image, load_image_bytes};
use crate::error::ExportError;
use crate::font::FontRegistry;
use crate::html::classify_content;
use crate::measure::{Measurer, MetricsMeasurer};
use crate::page_template::PageShell;
use crate::paginate::{PageBudget, paginate};
use crate::pdf::PdfWriter;
use crate::raster::{GlyphRasterizer, Rasterizer};
use crate::types::PageGeometry;
use log::{debug, warn};
use std::path::PathBuf;
use std::sync::Arc;

/// Hierarchy metadata supplied by the content layer: the top two grouping
/// levels plus the document (lesson) name. All optional; absent levels are
/// simply omitted from the page header.
#[derive(Debug, Clone, Default)]
pub struct HierarchyInfo {
    pub level_one: Option<String>,
    pub level_two: Option<String>,
    pub document_name: Option<String>,
}

/// How the finished binary leaves the engine.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// Return the bytes to the caller for a direct download.
    Download,
    /// Hand the bytes to the external delivery collaborator.
    Email { address: String },
}

/// External email-delivery collaborator.
pub trait DeliverySink {
    fn deliver(&self, address: &str, document: &ExportDocument) -> Result<(), ExportError>;
}

/// The finished artifact: opaque PDF bytes plus the page count.
#[derive(Debug, Clone)]
pub struct ExportDocument {
    bytes: Vec<u8>,
    page_count: usize,
}

impl ExportDocument {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }
}

/// Source of the header logo asset.
enum LogoSource {
    None,
    Path(PathBuf),
    Bytes(Vec<u8>),
}

/// The export engine. Holds only immutable configuration, so one instance
/// can serve any number of sequential or concurrent export calls; every
/// per-run accumulator lives inside `export`.
pub struct Exporter {
    geometry: PageGeometry,
    measurer: Box<dyn Measurer>,
    rasterizer: Box<dyn Rasterizer>,
    logo: LogoSource,
}

impl Exporter {
    /// Build an exporter with the default metrics measurer and glyph
    /// rasterizer sharing the given font registry.
    pub fn new(fonts: FontRegistry) -> Self {
        let fonts = Arc::new(fonts);
        Self {
            geometry: PageGeometry::a4(),
            measurer: Box::new(MetricsMeasurer::new(fonts.clone())),
            rasterizer: Box::new(GlyphRasterizer::new(fonts)),
            logo: LogoSource::None,
        }
    }

    pub fn with_geometry(mut self, geometry: PageGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_logo_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.logo = LogoSource::Path(path.into());
        self
    }

    pub fn with_logo_bytes(mut self, bytes: Vec<u8>) -> Self {
        self.logo = LogoSource::Bytes(bytes);
        self
    }

    /// Substitute the height oracle used for pagination.
    pub fn with_measurer(mut self, measurer: Box<dyn Measurer>) -> Self {
        self.measurer = measurer;
        self
    }

    /// Substitute the page raster engine.
    pub fn with_rasterizer(mut self, rasterizer: Box<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    /// Run the full pipeline: classify, paginate, assemble, rasterize each
    /// page and bind the PDF. `progress` is invoked with a status line after
    /// each completed stage and rendered page.
    pub fn export(
        &self,
        hierarchy: &HierarchyInfo,
        content_html: &str,
        progress: &mut dyn FnMut(&str),
    ) -> Result<ExportDocument, ExportError> {
        progress("Preparing document");
        let logo = self.load_logo();

        let units = classify_content(content_html);
        debug!("classified content into {} flow units", units.len());

        let budget = PageBudget::from_geometry(&self.geometry);
        let pages = paginate(&units, &budget, self.measurer.as_ref());
        progress(&format!("Laid out {} pages", pages.len()));

        let shell = PageShell::new(&self.geometry, hierarchy, logo.as_ref());
        let assembled = shell.assemble_all(&pages);

        let mut writer = PdfWriter::new(
            self.geometry.paper_width_pt,
            self.geometry.paper_height_pt,
            hierarchy.document_name.as_deref(),
        );
        let total = assembled.len();
        for (index, page) in assembled.iter().enumerate() {
            let bitmap = self.rasterizer.render_page(page, &self.geometry)?;
            writer.append_page(&bitmap)?;
            progress(&format!("Rendered page {} of {}", index + 1, total));
        }

        let bytes = writer.finish()?;
        progress("Export complete");
        Ok(ExportDocument {
            bytes,
            page_count: total,
        })
    }

    /// Export and route the result: `Download` returns the document,
    /// `Email` hands it to the delivery collaborator and returns `None`.
    pub fn export_and_deliver(
        &self,
        hierarchy: &HierarchyInfo,
        content_html: &str,
        delivery: &Delivery,
        sink: &dyn DeliverySink,
        progress: &mut dyn FnMut(&str),
    ) -> Result<Option<ExportDocument>, ExportError> {
        let document = self.export(hierarchy, content_html, progress)?;
        match delivery {
            Delivery::Download => Ok(Some(document)),
            Delivery::Email { address } => {
                progress(&format!("Sending document to {}", address));
                sink.deliver(address, &document)?;
                Ok(None)
            }
        }
    }

    /// Header-asset failures are recoverable: the header renders without a
    /// logo and the export continues.
    fn load_logo(&self) -> Option<EmbeddedImage> {
        let loaded = match &self.logo {
            LogoSource::None => return None,
            LogoSource::Path(path) => load_image(path),
            LogoSource::Bytes(bytes) => load_image_bytes(bytes.clone()),
        };
        match loaded {
            Ok(image) => Some(image),
            Err(err) => {
                warn!("header logo unavailable, continuing without it: {}", err);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{PageBitmap, Rasterizer};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct CountingRasterizer {
        rendered: Rc<RefCell<Vec<String>>>,
    }

    impl Rasterizer for CountingRasterizer {
        fn render_page(
            &self,
            page_html: &str,
            _geometry: &PageGeometry,
        ) -> Result<PageBitmap, ExportError> {
            self.rendered.borrow_mut().push(page_html.to_string());
            Ok(PageBitmap {
                width: 4,
                height: 4,
                pixels: vec![255; 4 * 4 * 4],
            })
        }
    }

    struct FailingRasterizer;

    impl Rasterizer for FailingRasterizer {
        fn render_page(
            &self,
            _page_html: &str,
            _geometry: &PageGeometry,
        ) -> Result<PageBitmap, ExportError> {
            Err(ExportError::Raster("boom".to_string()))
        }
    }

    struct RecordingSink {
        sent: RefCell<Vec<String>>,
    }

    impl DeliverySink for RecordingSink {
        fn deliver(&self, address: &str, _document: &ExportDocument) -> Result<(), ExportError> {
            self.sent.borrow_mut().push(address.to_string());
            Ok(())
        }
    }

    fn hierarchy() -> HierarchyInfo {
        HierarchyInfo {
            level_one: Some("Grade 8".to_string()),
            level_two: Some("Physics".to_string()),
            document_name: Some("Optics Notes".to_string()),
        }
    }

    #[test]
    fn end_to_end_export_produces_a_parseable_pdf() {
        let exporter = Exporter::new(FontRegistry::new());
        let words: Vec<String> = (0..1200).map(|i| format!("w{}", i)).collect();
        let html = format!("<h1>Optics</h1><p>{}</p>", words.join(" "));
        let mut progress = Vec::new();
        let document = exporter
            .export(&hierarchy(), &html, &mut |status| {
                progress.push(status.to_string())
            })
            .expect("export");

        assert!(document.page_count() >= 2);
        let parsed = lopdf::Document::load_mem(document.bytes()).expect("parse pdf");
        assert_eq!(parsed.get_pages().len(), document.page_count());
        assert!(progress.iter().any(|s| s.starts_with("Rendered page 1 of")));
        assert_eq!(progress.last().map(String::as_str), Some("Export complete"));
    }

    #[test]
    fn every_page_shell_reaches_the_rasterizer_in_order() {
        let rendered = Rc::new(RefCell::new(Vec::new()));
        let rasterizer = CountingRasterizer {
            rendered: rendered.clone(),
        };
        let exporter =
            Exporter::new(FontRegistry::new()).with_rasterizer(Box::new(rasterizer));
        let words: Vec<String> = (0..1200).map(|_| "alpha".to_string()).collect();
        let html = format!("<p>{}</p>", words.join(" "));
        let document = exporter
            .export(&hierarchy(), &html, &mut |_| {})
            .expect("export");

        let pages = rendered.borrow().clone();
        assert_eq!(pages.len(), document.page_count());
        for (index, page) in pages.iter().enumerate() {
            assert!(page.contains(&format!("page {} of {}", index + 1, pages.len())));
        }
    }

    #[test]
    fn empty_content_exports_one_placeholder_page() {
        let exporter = Exporter::new(FontRegistry::new());
        let document = exporter
            .export(&hierarchy(), "", &mut |_| {})
            .expect("export");
        assert_eq!(document.page_count(), 1);
    }

    #[test]
    fn missing_logo_degrades_instead_of_failing() {
        let exporter = Exporter::new(FontRegistry::new())
            .with_logo_path("/nonexistent/logo.png");
        let document = exporter
            .export(&hierarchy(), "<p>body</p>", &mut |_| {})
            .expect("export must survive a missing logo");
        assert_eq!(document.page_count(), 1);
    }

    #[test]
    fn rasterization_failure_aborts_the_export() {
        let exporter =
            Exporter::new(FontRegistry::new()).with_rasterizer(Box::new(FailingRasterizer));
        let err = exporter
            .export(&hierarchy(), "<p>body</p>", &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, ExportError::Raster(_)));
    }

    #[test]
    fn download_returns_the_document_and_email_routes_to_the_sink() {
        let exporter = Exporter::new(FontRegistry::new());
        let sink = RecordingSink {
            sent: RefCell::new(Vec::new()),
        };

        let downloaded = exporter
            .export_and_deliver(
                &hierarchy(),
                "<p>x</p>",
                &Delivery::Download,
                &sink,
                &mut |_| {},
            )
            .expect("export");
        assert!(downloaded.is_some());
        assert!(sink.sent.borrow().is_empty());

        let mailed = exporter
            .export_and_deliver(
                &hierarchy(),
                "<p>x</p>",
                &Delivery::Email {
                    address: "teacher@example.org".to_string(),
                },
                &sink,
                &mut |_| {},
            )
            .expect("export");
        assert!(mailed.is_none());
        assert_eq!(sink.sent.borrow().as_slice(), ["teacher@example.org"]);
    }
}
