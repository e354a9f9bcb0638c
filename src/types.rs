use fixed::types::I32F32;

/// A layout pixel. Stored as fixed-point so that repeated accumulation of
/// block heights is exact and page breaks are reproducible across runs.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Px(I32F32);

impl Px {
    pub const ZERO: Px = Px(I32F32::from_bits(0));

    pub fn from_f32(value: f32) -> Px {
        if !value.is_finite() {
            return Px::ZERO;
        }
        let milli = (value as f64 * 1000.0).round();
        let milli = milli.clamp(i64::MIN as f64, i64::MAX as f64) as i64;
        Px::from_milli_i64(milli)
    }

    pub fn from_i32(value: i32) -> Px {
        Px::from_milli_i64((value as i64) * 1000)
    }

    pub fn to_f32(self) -> f32 {
        self.0.to_num()
    }

    pub fn to_milli_i64(self) -> i64 {
        let bits = self.0.to_bits() as i128;
        let denom = 1i128 << 32;
        let scaled = bits * 1000;
        let adj = if scaled >= 0 { denom / 2 } else { -denom / 2 };
        let milli = (scaled + adj) / denom;
        milli.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn max(self, other: Px) -> Px {
        if self >= other { self } else { other }
    }

    pub fn min(self, other: Px) -> Px {
        if self <= other { self } else { other }
    }

    pub fn mul_ratio(self, num: i32, denom: i32) -> Px {
        if denom == 0 {
            return Px::ZERO;
        }
        let milli = self.to_milli_i64() as i128;
        let value = div_round_i128(milli.saturating_mul(num as i128), denom as i128);
        Px::from_milli_i128(value)
    }

    pub fn from_milli_i64(milli: i64) -> Px {
        Px::from_milli_i128(milli as i128)
    }

    fn from_milli_i128(milli: i128) -> Px {
        let denom = 1i128 << 32;
        let adj = if milli >= 0 { 500 } else { -500 };
        let bits = (milli * denom + adj) / 1000;
        let bits = bits.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        Px(I32F32::from_bits(bits))
    }
}

impl std::ops::Add for Px {
    type Output = Px;
    fn add(self, rhs: Px) -> Px {
        Px::from_milli_i128(self.to_milli_i64() as i128 + rhs.to_milli_i64() as i128)
    }
}

impl std::ops::AddAssign for Px {
    fn add_assign(&mut self, rhs: Px) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub for Px {
    type Output = Px;
    fn sub(self, rhs: Px) -> Px {
        Px::from_milli_i128(self.to_milli_i64() as i128 - rhs.to_milli_i64() as i128)
    }
}

impl std::ops::Mul<i32> for Px {
    type Output = Px;
    fn mul(self, rhs: i32) -> Px {
        let milli = self.to_milli_i64() as i128;
        Px::from_milli_i128(milli.saturating_mul(rhs as i128))
    }
}

impl std::ops::Mul<f32> for Px {
    type Output = Px;
    fn mul(self, rhs: f32) -> Px {
        if !rhs.is_finite() {
            return Px::ZERO;
        }
        Px::from_f32(self.to_f32() * rhs)
    }
}

impl std::iter::Sum for Px {
    fn sum<I: Iterator<Item = Px>>(iter: I) -> Px {
        iter.fold(Px::ZERO, |acc, v| acc + v)
    }
}

fn div_round_i128(num: i128, den: i128) -> i128 {
    if den == 0 {
        return 0;
    }
    let den_abs = den.abs();
    if num >= 0 {
        (num + (den_abs / 2)) / den
    } else {
        -(((-num) + (den_abs / 2)) / den)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: Px,
    pub height: Px,
}

/// Fixed page geometry for an export run. Layout distances are CSS-pixel sized
/// (A4 at 96 dpi); the paper size is expressed in PDF points.
#[derive(Debug, Clone)]
pub struct PageGeometry {
    /// Full page footprint in layout pixels.
    pub page: Size,
    /// Outer margin on every edge.
    pub margin: Px,
    /// Header band height, inside the margins.
    pub header_height: Px,
    /// Footer band height, inside the margins.
    pub footer_height: Px,
    /// Minimum trailing space required to start a heading on the current page.
    pub heading_threshold: Px,
    /// Vertical gap injected between consecutive units on a page.
    pub block_gap: Px,
    /// Below this much remaining space a unit is moved whole instead of split.
    pub min_split_space: Px,
    /// Raster scale applied on top of the layout-pixel footprint.
    pub supersample: f32,
    /// Physical paper size in PDF points.
    pub paper_width_pt: f32,
    pub paper_height_pt: f32,
}

impl PageGeometry {
    /// A4 portrait at 96 dpi layout pixels, 210x297mm paper.
    pub fn a4() -> Self {
        Self {
            page: Size {
                width: Px::from_i32(794),
                height: Px::from_i32(1123),
            },
            margin: Px::from_i32(40),
            header_height: Px::from_i32(90),
            footer_height: Px::from_i32(50),
            heading_threshold: Px::from_i32(120),
            block_gap: Px::from_i32(10),
            min_split_space: Px::from_i32(60),
            supersample: 2.0,
            paper_width_pt: 595.28,
            paper_height_pt: 841.89,
        }
    }

    /// Width available to flowing content.
    pub fn content_width(&self) -> Px {
        (self.page.width - self.margin * 2).max(Px::ZERO)
    }

    /// Height available to flowing content; this is the pagination budget.
    pub fn content_height(&self) -> Px {
        (self.page.height - self.margin * 2 - self.header_height - self.footer_height)
            .max(Px::ZERO)
    }
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self::a4()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn px_round_trips_through_milli() {
        let v = Px::from_f32(12.345);
        assert_eq!(v.to_milli_i64(), 12345);
        assert_eq!(Px::from_milli_i64(12345), v);
    }

    #[test]
    fn px_accumulation_is_exact() {
        let step = Px::from_f32(0.1);
        let total: Px = std::iter::repeat(step).take(1000).sum();
        assert_eq!(total.to_milli_i64(), 100_000);
    }

    #[test]
    fn a4_content_band_excludes_chrome() {
        let geom = PageGeometry::a4();
        assert_eq!(geom.content_width(), Px::from_i32(714));
        assert_eq!(geom.content_height(), Px::from_i32(903));
    }
}
