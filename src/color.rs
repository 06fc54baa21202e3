use serde::{Deserialize, Serialize};

/// Number of bars after which the flame graph palette repeats.
pub const PALETTE_PERIOD: usize = 10;

/// Hue step between two consecutive palette entries, in degrees.
const HUE_STEP: f64 = 360.0 / PALETTE_PERIOD as f64;

/// 8-bit RGBA color, independent of any drawing backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const BLACK: Color = Color::from_rgb(0, 0, 0);
    pub const WHITE: Color = Color::from_rgb(255, 255, 255);

    pub const fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn from_argb(a: u8, r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a }
    }
}

/// Six-sector HSV to RGB conversion.
///
/// `hue` is in degrees, `saturation` and `value` in `0.0..=1.0`. Channels are
/// truncated to bytes and the result is fully opaque.
pub fn hsv_to_rgb(hue: f64, saturation: f64, value: f64) -> Color {
    let sector = hue / 60.0;
    let hi = (sector.floor() as i64).rem_euclid(6);
    let f = sector - sector.floor();

    let value = value * 255.0;
    let v = value as u8;
    let p = (value * (1.0 - saturation)) as u8;
    let q = (value * (1.0 - f * saturation)) as u8;
    let t = (value * (1.0 - (1.0 - f) * saturation)) as u8;

    match hi {
        0 => Color::from_argb(255, v, t, p),
        1 => Color::from_argb(255, q, v, p),
        2 => Color::from_argb(255, p, v, t),
        3 => Color::from_argb(255, p, q, v),
        4 => Color::from_argb(255, t, p, v),
        _ => Color::from_argb(255, v, p, q),
    }
}

/// Color of the `index`-th visited flame bar.
///
/// Index 0 is pure red; every other index rotates the hue by 36 degrees per
/// step and wraps every [`PALETTE_PERIOD`] bars.
pub fn node_color(index: usize) -> Color {
    if index == 0 {
        return hsv_to_rgb(0.0, 1.0, 1.0);
    }

    let hue = (index % PALETTE_PERIOD) as f64 * HUE_STEP;
    hsv_to_rgb(hue, 1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_bar_is_red() {
        assert_eq!(node_color(0), Color::from_rgb(255, 0, 0));
    }

    #[test]
    fn test_palette_wraps_every_ten() {
        assert_eq!(node_color(10), node_color(0));
        for i in 1..40 {
            assert_eq!(node_color(i), node_color(i + PALETTE_PERIOD), "index {}", i);
        }
    }

    #[test]
    fn test_hue_rotation() {
        // 36 degrees: sector 0, green channel ramps up
        assert_eq!(node_color(1), Color::from_rgb(255, 153, 0));
        // 180 degrees: cyan
        assert_eq!(node_color(5), Color::from_rgb(0, 255, 255));
        // neighbouring entries are distinct
        for i in 0..PALETTE_PERIOD - 1 {
            assert_ne!(node_color(i), node_color(i + 1));
        }
    }

    #[test]
    fn test_hsv_sectors() {
        assert_eq!(hsv_to_rgb(120.0, 1.0, 1.0), Color::from_rgb(0, 255, 0));
        assert_eq!(hsv_to_rgb(240.0, 1.0, 1.0), Color::from_rgb(0, 0, 255));
        assert_eq!(hsv_to_rgb(360.0, 1.0, 1.0), Color::from_rgb(255, 0, 0));
        // zero saturation is grey at the requested value
        assert_eq!(hsv_to_rgb(200.0, 0.0, 1.0), Color::WHITE);
        assert_eq!(hsv_to_rgb(0.0, 1.0, 0.0), Color::BLACK);
    }

    #[test]
    fn test_always_opaque() {
        for i in 0..25 {
            assert_eq!(node_color(i).a, 255);
        }
    }
}
