use crate::error::ExportError;
use crate::types::Px;

const FIRST_CHAR: u8 = 32;
const LAST_CHAR: u8 = 255;

/// Per-face metrics scaled to a 1000-unit em, precomputed for the Latin-1
/// range so measurement never re-parses the face.
#[derive(Debug, Clone)]
pub(crate) struct FaceMetrics {
    widths: Vec<u16>,
    missing_width: u16,
    ascent: i16,
    descent: i16,
    line_gap: i16,
}

impl FaceMetrics {
    fn from_face(face: &ttf_parser::Face<'_>) -> Self {
        let units_per_em = face.units_per_em().max(1);
        let scale = |value: i32| -> i32 {
            let units = units_per_em as i64;
            (((value as i64) * 1000 + units / 2) / units) as i32
        };

        let mut widths = Vec::with_capacity((LAST_CHAR - FIRST_CHAR + 1) as usize);
        for code in FIRST_CHAR..=LAST_CHAR {
            let ch = code as char;
            let advance = face
                .glyph_index(ch)
                .and_then(|gid| face.glyph_hor_advance(gid))
                .map(|adv| scale(adv as i32))
                .unwrap_or(0);
            widths.push(advance.clamp(0, u16::MAX as i32) as u16);
        }
        let missing_width = widths.first().copied().filter(|w| *w > 0).unwrap_or(500);

        Self {
            widths,
            missing_width,
            ascent: scale(face.ascender() as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            descent: scale(face.descender() as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            line_gap: scale(face.line_gap() as i32).clamp(i16::MIN as i32, i16::MAX as i32) as i16,
        }
    }

    fn advance_for_char(&self, ch: char) -> u16 {
        let code = ch as u32;
        if code < FIRST_CHAR as u32 || code > LAST_CHAR as u32 {
            return self.missing_width;
        }
        let idx = (code - FIRST_CHAR as u32) as usize;
        self.widths.get(idx).copied().unwrap_or(self.missing_width)
    }

    fn measure_text_width(&self, font_size: Px, text: &str) -> Px {
        let mut total_units: i32 = 0;
        for ch in text.chars() {
            total_units = total_units.saturating_add(self.advance_for_char(ch) as i32);
        }
        if total_units <= 0 {
            return Px::ZERO;
        }
        font_size.mul_ratio(total_units, 1000)
    }

    fn line_height(&self, font_size: Px) -> Px {
        let height_1000 = self.ascent as i32 - self.descent as i32 + self.line_gap as i32;
        if height_1000 <= 0 {
            return font_size.mul_ratio(6, 5);
        }
        font_size.mul_ratio(height_1000, 1000)
    }
}

#[derive(Debug)]
pub(crate) struct RegisteredFont {
    pub(crate) name: String,
    pub(crate) data: Vec<u8>,
    pub(crate) metrics: FaceMetrics,
}

/// Holds the faces available to measurement and rasterization. With no face
/// registered, measurement degrades to fixed-ratio metrics (0.6 em advance per
/// character) so pagination is always defined; rasterizing text without a face
/// is an error at the raster layer.
#[derive(Debug, Default)]
pub struct FontRegistry {
    fonts: Vec<RegisteredFont>,
}

impl FontRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, data: Vec<u8>) -> Result<(), ExportError> {
        let name = name.into();
        let face = ttf_parser::Face::parse(&data, 0)
            .map_err(|err| ExportError::Asset(format!("parse font {}: {}", name, err)))?;
        let metrics = FaceMetrics::from_face(&face);
        self.fonts.push(RegisteredFont {
            name,
            data,
            metrics,
        });
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.fonts.is_empty()
    }

    pub fn face_names(&self) -> impl Iterator<Item = &str> {
        self.fonts.iter().map(|font| font.name.as_str())
    }

    pub(crate) fn primary(&self) -> Option<&RegisteredFont> {
        self.fonts.first()
    }

    pub fn measure_text_width(&self, font_size: Px, text: &str) -> Px {
        if let Some(font) = self.primary() {
            return font.metrics.measure_text_width(font_size, text);
        }
        let char_width = (font_size * 0.6).max(Px::from_f32(1.0));
        char_width * (text.chars().count() as i32)
    }

    pub fn line_height(&self, font_size: Px) -> Px {
        if let Some(font) = self.primary() {
            return font.metrics.line_height(font_size);
        }
        font_size.mul_ratio(6, 5)
    }
}
