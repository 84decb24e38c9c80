use glam::Vec4;

/// Converts HSV (hue in degrees, saturation and value in `[0, 1]`) to an
/// opaque RGBA colour. Hue wraps around, saturation and value are clamped.
pub fn hsv_to_rgba(hue: f32, saturation: f32, value: f32) -> Vec4 {
    let hue = if hue.is_finite() { hue.rem_euclid(360.0) } else { 0.0 };
    let saturation = saturation.clamp(0.0, 1.0);
    let value = value.clamp(0.0, 1.0);

    let chroma = value * saturation;
    let sector = hue / 60.0;
    let x = chroma * (1.0 - ((sector % 2.0) - 1.0).abs());
    let (r, g, b) = match sector as u32 {
        0 => (chroma, x, 0.0),
        1 => (x, chroma, 0.0),
        2 => (0.0, chroma, x),
        3 => (0.0, x, chroma),
        4 => (x, 0.0, chroma),
        _ => (chroma, 0.0, x),
    };
    let m = value - chroma;
    Vec4::new(r + m, g + m, b + m, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_rgba(actual: Vec4, expected: [f32; 4]) {
        let expected = Vec4::from_array(expected);
        assert!(
            (actual - expected).abs().max_element() < 1e-6,
            "{actual:?} != {expected:?}"
        );
    }

    #[test]
    fn primary_hues() {
        assert_rgba(hsv_to_rgba(0.0, 1.0, 1.0), [1.0, 0.0, 0.0, 1.0]);
        assert_rgba(hsv_to_rgba(120.0, 1.0, 1.0), [0.0, 1.0, 0.0, 1.0]);
        assert_rgba(hsv_to_rgba(240.0, 1.0, 1.0), [0.0, 0.0, 1.0, 1.0]);
        assert_rgba(hsv_to_rgba(60.0, 1.0, 1.0), [1.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn zero_saturation_is_grey() {
        assert_rgba(hsv_to_rgba(123.0, 0.0, 0.5), [0.5, 0.5, 0.5, 1.0]);
        assert_rgba(hsv_to_rgba(0.0, 1.0, 0.0), [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn hue_wraps() {
        assert_rgba(hsv_to_rgba(360.0, 1.0, 1.0), hsv_to_rgba(0.0, 1.0, 1.0).to_array());
        assert_rgba(hsv_to_rgba(-120.0, 1.0, 1.0), [0.0, 0.0, 1.0, 1.0]);
        assert_rgba(hsv_to_rgba(f32::NAN, 1.0, 1.0), [1.0, 0.0, 0.0, 1.0]);
    }
}
