use crate::error::ExportError;
use crate::raster::PageBitmap;
use image::ImageEncoder;
use lopdf::{
    Dictionary as LoDictionary, Document as LoDocument, Object as LoObject, ObjectId,
    Stream as LoStream, dictionary,
};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

const JPEG_QUALITY: u8 = 85;

/// Accumulates rendered page bitmaps into a PDF document: one full-page
/// DCTDecode image XObject per page, drawn to the paper's physical point
/// size. Identical bitmaps share one XObject, keyed by content hash.
pub struct PdfWriter {
    doc: LoDocument,
    pages_id: ObjectId,
    page_ids: Vec<ObjectId>,
    images: HashMap<String, ObjectId>,
    paper_width_pt: f32,
    paper_height_pt: f32,
    title: Option<String>,
}

impl PdfWriter {
    pub fn new(paper_width_pt: f32, paper_height_pt: f32, title: Option<&str>) -> Self {
        let mut doc = LoDocument::with_version("1.7");
        let pages_id = doc.new_object_id();
        Self {
            doc,
            pages_id,
            page_ids: Vec::new(),
            images: HashMap::new(),
            paper_width_pt,
            paper_height_pt,
            title: title.map(str::to_string),
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Append one page backed by the given bitmap.
    pub fn append_page(&mut self, bitmap: &PageBitmap) -> Result<(), ExportError> {
        if bitmap.width == 0 || bitmap.height == 0 {
            return Err(ExportError::Pdf("empty page bitmap".to_string()));
        }
        let image_id = self.image_xobject(bitmap)?;

        let resources_id = self.doc.add_object(dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        });
        let content = format!(
            "q\n{:.2} 0 0 {:.2} 0 0 cm\n/Im0 Do\nQ\n",
            self.paper_width_pt, self.paper_height_pt
        )
        .into_bytes();
        let content_id = self
            .doc
            .add_object(LoStream::new(LoDictionary::new(), content));
        let page_id = self.doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => self.pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![
                0.into(),
                0.into(),
                self.paper_width_pt.into(),
                self.paper_height_pt.into(),
            ],
        });
        self.page_ids.push(page_id);
        Ok(())
    }

    /// JPEG-encode the bitmap and register it as an image XObject, reusing
    /// any previously registered object with the same encoded bytes.
    fn image_xobject(&mut self, bitmap: &PageBitmap) -> Result<ObjectId, ExportError> {
        let mut rgb = Vec::with_capacity((bitmap.width * bitmap.height * 3) as usize);
        for px in bitmap.pixels.chunks_exact(4) {
            rgb.extend_from_slice(&px[..3]);
        }
        let mut jpeg = Vec::new();
        let encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY);
        encoder
            .write_image(
                &rgb,
                bitmap.width,
                bitmap.height,
                image::ExtendedColorType::Rgb8,
            )
            .map_err(|err| ExportError::Pdf(format!("jpeg encode: {}", err)))?;

        let digest = Sha256::digest(&jpeg);
        let key = format!("{:x}", digest);
        if let Some(id) = self.images.get(&key) {
            return Ok(*id);
        }

        let dict = dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => bitmap.width as i64,
            "Height" => bitmap.height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
            "Filter" => "DCTDecode",
        };
        let mut stream = LoStream::new(dict, jpeg);
        stream.allows_compression = false;
        let id = self.doc.add_object(stream);
        self.images.insert(key, id);
        Ok(id)
    }

    /// Close the document and return the serialized PDF bytes.
    pub fn finish(mut self) -> Result<Vec<u8>, ExportError> {
        if self.page_ids.is_empty() {
            return Err(ExportError::Pdf("document has no pages".to_string()));
        }
        let kids: Vec<LoObject> = self.page_ids.iter().map(|id| (*id).into()).collect();
        let count = self.page_ids.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        };
        self.doc
            .objects
            .insert(self.pages_id, LoObject::Dictionary(pages));
        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let mut info = LoDictionary::new();
        info.set("Producer", LoObject::string_literal("docpress"));
        if let Some(title) = &self.title {
            info.set("Title", LoObject::string_literal(title.as_str()));
        }
        let info_id = self.doc.add_object(info);
        self.doc.trailer.set("Info", info_id);

        let mut bytes = Vec::new();
        self.doc
            .save_to(&mut bytes)
            .map_err(|err| ExportError::Pdf(format!("serialize: {}", err)))?;
        Ok(bytes)
    }
}
