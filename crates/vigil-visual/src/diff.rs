//! Perceptual pixel diff
//!
//! Per-pixel colour distance in YIQ space, as popularised by pixelmatch.
//! Pixels are alpha-blended onto white before comparison. The rendered diff
//! paints differing pixels red over a faded grayscale copy of the baseline.

use image::{Rgba, RgbaImage};

/// Squared YIQ distance between black and white
const MAX_YIQ_DELTA: f64 = 35215.0;

/// Opacity of the baseline underlay in the rendered diff
const UNDERLAY_ALPHA: f64 = 0.1;

const DIFF_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);

/// Outcome of comparing two equally sized images
#[derive(Debug, Clone)]
pub struct PixelDiff {
    pub differing: u64,
    pub total: u64,
    pub image: RgbaImage,
}

impl PixelDiff {
    /// Share of differing pixels on a 0-100 scale
    pub fn percentage(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.differing as f64 / self.total as f64 * 100.0
    }
}

/// Compare two images of identical dimensions.
///
/// Returns `None` when the dimensions differ.
pub fn diff_images(baseline: &RgbaImage, current: &RgbaImage, threshold: f64) -> Option<PixelDiff> {
    if baseline.dimensions() != current.dimensions() {
        return None;
    }

    let (width, height) = baseline.dimensions();
    let max_delta = MAX_YIQ_DELTA * threshold * threshold;
    let mut output = RgbaImage::new(width, height);
    let mut differing = 0u64;

    for (x, y, base_px) in baseline.enumerate_pixels() {
        let cur_px = current.get_pixel(x, y);

        let out = if base_px == cur_px || color_delta(base_px, cur_px) <= max_delta {
            faded_gray(base_px)
        } else {
            differing += 1;
            DIFF_COLOR
        };
        output.put_pixel(x, y, out);
    }

    Some(PixelDiff {
        differing,
        total: u64::from(width) * u64::from(height),
        image: output,
    })
}

/// Squared YIQ distance between two pixels
fn color_delta(a: &Rgba<u8>, b: &Rgba<u8>) -> f64 {
    let (r1, g1, b1) = blend_on_white(a);
    let (r2, g2, b2) = blend_on_white(b);

    let y = rgb_to_y(r1, g1, b1) - rgb_to_y(r2, g2, b2);
    let i = rgb_to_i(r1, g1, b1) - rgb_to_i(r2, g2, b2);
    let q = rgb_to_q(r1, g1, b1) - rgb_to_q(r2, g2, b2);

    0.5053 * y * y + 0.299 * i * i + 0.1957 * q * q
}

fn blend_on_white(px: &Rgba<u8>) -> (f64, f64, f64) {
    let [r, g, b, a] = px.0;
    let alpha = f64::from(a) / 255.0;
    let blend = |c: u8| 255.0 + (f64::from(c) - 255.0) * alpha;
    (blend(r), blend(g), blend(b))
}

fn rgb_to_y(r: f64, g: f64, b: f64) -> f64 {
    r * 0.298_895_31 + g * 0.586_622_47 + b * 0.114_482_23
}

fn rgb_to_i(r: f64, g: f64, b: f64) -> f64 {
    r * 0.595_977_99 - g * 0.274_176_10 - b * 0.321_801_89
}

fn rgb_to_q(r: f64, g: f64, b: f64) -> f64 {
    r * 0.211_470_17 - g * 0.522_617_11 + b * 0.311_146_94
}

fn faded_gray(px: &Rgba<u8>) -> Rgba<u8> {
    let (r, g, b) = blend_on_white(px);
    let y = rgb_to_y(r, g, b);
    let v = (255.0 + (y - 255.0) * UNDERLAY_ALPHA).round().clamp(0.0, 255.0) as u8;
    Rgba([v, v, v, 255])
}
