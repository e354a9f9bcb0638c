use crate::error::ExportError;
use base64::Engine;
use std::path::Path;

/// A self-contained embeddable image: decoded dimensions plus the original
/// encoded bytes, renderable as a `data:` URI for inline markup.
#[derive(Debug, Clone)]
pub struct EmbeddedImage {
    pub mime: &'static str,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl EmbeddedImage {
    pub fn data_uri(&self) -> String {
        let payload = base64::engine::general_purpose::STANDARD.encode(&self.data);
        format!("data:{};base64,{}", self.mime, payload)
    }

    pub fn bytes_len(&self) -> usize {
        self.data.len()
    }
}

/// Load an image asset from disk.
pub fn load_image(path: impl AsRef<Path>) -> Result<EmbeddedImage, ExportError> {
    let path = path.as_ref();
    let data = std::fs::read(path)
        .map_err(|err| ExportError::Asset(format!("read {}: {}", path.display(), err)))?;
    load_image_bytes(data)
}

/// Wrap already-fetched image bytes, probing format and pixel dimensions.
pub fn load_image_bytes(data: Vec<u8>) -> Result<EmbeddedImage, ExportError> {
    let format = image::guess_format(&data)
        .map_err(|err| ExportError::Asset(format!("unrecognized image format: {}", err)))?;
    let mime = match format {
        image::ImageFormat::Png => "image/png",
        image::ImageFormat::Jpeg => "image/jpeg",
        other => {
            return Err(ExportError::Asset(format!(
                "unsupported image format {:?}",
                other
            )));
        }
    };
    let decoded = image::load_from_memory_with_format(&data, format)
        .map_err(|err| ExportError::Asset(format!("decode image: {}", err)))?;
    Ok(EmbeddedImage {
        mime,
        width: decoded.width(),
        height: decoded.height(),
        data,
    })
}

/// Decode a `data:` URI produced by `EmbeddedImage::data_uri` (or authored
/// directly in content markup) back into raw bytes.
pub fn parse_data_uri_bytes(uri: &str) -> Option<Vec<u8>> {
    let rest = uri.strip_prefix("data:")?;
    let (_, payload) = rest.split_once(";base64,")?;
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1x1 opaque PNG.
    fn tiny_png() -> Vec<u8> {
        let mut out = Vec::new();
        let img = image::RgbaImage::from_pixel(1, 1, image::Rgba([10, 20, 30, 255]));
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut out), image::ImageFormat::Png)
            .expect("encode png");
        out
    }

    #[test]
    fn probes_png_dimensions_and_mime() {
        let asset = load_image_bytes(tiny_png()).expect("load");
        assert_eq!(asset.mime, "image/png");
        assert_eq!((asset.width, asset.height), (1, 1));
    }

    #[test]
    fn data_uri_round_trips() {
        let asset = load_image_bytes(tiny_png()).expect("load");
        let uri = asset.data_uri();
        assert!(uri.starts_with("data:image/png;base64,"));
        let bytes = parse_data_uri_bytes(&uri).expect("decode");
        assert_eq!(bytes, asset.data);
    }

    #[test]
    fn garbage_bytes_are_rejected() {
        let err = load_image_bytes(vec![0, 1, 2, 3]).unwrap_err();
        assert!(matches!(err, ExportError::Asset(_)));
    }
}
