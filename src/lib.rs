mod assets;
mod error;
mod export;
mod font;
mod html;
mod measure;
mod page_template;
mod paginate;
mod pdf;
mod raster;
mod types;

pub use assets::{EmbeddedImage, load_image, load_image_bytes};
pub use error::ExportError;
pub use export::{Delivery, DeliverySink, ExportDocument, Exporter, HierarchyInfo};
pub use font::FontRegistry;
pub use html::{
    BlockKind, EMPTY_PLACEHOLDER_HTML, FlowUnit, INLINE_RUN_CLASS, QA_PAIR_CLASS,
    classify_content,
};
pub use measure::{Measurer, MetricsMeasurer};
pub use page_template::{FOOTER_TAGLINE, PageShell};
pub use paginate::{PageBudget, paginate};
pub use pdf::PdfWriter;
pub use raster::{GlyphRasterizer, PageBitmap, Rasterizer};
pub use types::{PageGeometry, Px, Size};
