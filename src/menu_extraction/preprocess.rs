// Preprocessing variants tuned for menu text visibility
//
// Every function here is pure: a page goes in, a new page comes out.
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use imageproc::contrast::{otsu_level, threshold, ThresholdType};
use imageproc::filter::{filter3x3, gaussian_blur_f32, median_filter};

use super::rasterizer::RasterImage;

/// Neighbourhood for the adaptive threshold (odd).
pub const ADAPTIVE_BLOCK_SIZE: u32 = 11;
/// Subtracted from the local weighted mean.
pub const ADAPTIVE_OFFSET: f32 = 2.0;
pub const CLAHE_TILES: u32 = 8;
pub const CLAHE_CLIP_LIMIT: f32 = 2.0;
pub const SHARPEN_KERNEL: [i32; 9] = [-1, -1, -1, -1, 9, -1, -1, -1, -1];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RotationAngle {
    Deg90,
    Deg180,
    Deg270,
}

impl RotationAngle {
    pub fn degrees(self) -> u32 {
        match self {
            RotationAngle::Deg90 => 90,
            RotationAngle::Deg180 => 180,
            RotationAngle::Deg270 => 270,
        }
    }

    // Exact (cos, sin) so quarter turns carry no float drift.
    fn cos_sin(self) -> (f32, f32) {
        match self {
            RotationAngle::Deg90 => (0.0, 1.0),
            RotationAngle::Deg180 => (-1.0, 0.0),
            RotationAngle::Deg270 => (0.0, -1.0),
        }
    }
}

/// Grayscale, adaptive threshold, speckle removal.
pub fn standard(page: &RasterImage) -> RasterImage {
    if page.is_empty() {
        return page.clone();
    }
    let gray = page.as_dynamic().to_luma8();
    let binary = adaptive_threshold(&gray, ADAPTIVE_BLOCK_SIZE, ADAPTIVE_OFFSET);
    let cleaned = median_filter(&binary, 1, 1);
    page.derive(DynamicImage::ImageLuma8(cleaned))
}

/// Grayscale, CLAHE, sharpen, Otsu binarization.
pub fn enhanced_contrast(page: &RasterImage) -> RasterImage {
    if page.is_empty() {
        return page.clone();
    }
    let gray = page.as_dynamic().to_luma8();
    let equalized = clahe(&gray, CLAHE_TILES, CLAHE_CLIP_LIMIT);
    let sharpened = sharpen(&equalized);
    let level = otsu_level(&sharpened);
    let binary = binarize(&sharpened, level);
    page.derive(DynamicImage::ImageLuma8(binary))
}

/// Rotate the colour page about its center, then grayscale + adaptive threshold.
pub fn rotated(page: &RasterImage, angle: RotationAngle) -> RasterImage {
    if page.is_empty() {
        return page.clone();
    }
    let rgb = page.as_dynamic().to_rgb8();
    let turned = rotate_about_center(&rgb, angle);
    let gray = DynamicImage::ImageRgb8(turned).to_luma8();
    let binary = adaptive_threshold(&gray, ADAPTIVE_BLOCK_SIZE, ADAPTIVE_OFFSET);
    page.derive(DynamicImage::ImageLuma8(binary))
}

/// Gaussian-weighted local mean threshold: a pixel is white when it is
/// brighter than `mean - offset` of its neighbourhood.
pub fn adaptive_threshold(gray: &GrayImage, block_size: u32, offset: f32) -> GrayImage {
    if gray.width() == 0 || gray.height() == 0 {
        return gray.clone();
    }
    let sigma = 0.3 * ((block_size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let mean = gaussian_blur_f32(gray, sigma.max(0.1));
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let value = gray.get_pixel(x, y)[0] as f32;
        let local = mean.get_pixel(x, y)[0] as f32;
        if value > local - offset {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// White above `level`, black at or below.
pub fn binarize(gray: &GrayImage, level: u8) -> GrayImage {
    threshold(gray, level, ThresholdType::Binary)
}

/// 3x3 sharpening; imageproc replicates edges and clamps to `u8`.
pub fn sharpen(gray: &GrayImage) -> GrayImage {
    if gray.width() == 0 || gray.height() == 0 {
        return gray.clone();
    }
    filter3x3::<_, i32, u8>(gray, &SHARPEN_KERNEL)
}

/// Contrast-limited adaptive histogram equalization over a `tiles x tiles`
/// grid, bilinearly blending neighbouring tile mappings.
pub fn clahe(gray: &GrayImage, tiles: u32, clip_limit: f32) -> GrayImage {
    let (w, h) = gray.dimensions();
    if w == 0 || h == 0 || tiles == 0 {
        return gray.clone();
    }
    let tile_w = w.div_ceil(tiles.min(w));
    let tile_h = h.div_ceil(tiles.min(h));
    let nx = w.div_ceil(tile_w);
    let ny = h.div_ceil(tile_h);

    let mut luts = Vec::with_capacity((nx * ny) as usize);
    for ty in 0..ny {
        for tx in 0..nx {
            let (x_start, y_start) = (tx * tile_w, ty * tile_h);
            let x_end = (x_start + tile_w).min(w);
            let y_end = (y_start + tile_h).min(h);
            let mut hist = [0u32; 256];
            for y in y_start..y_end {
                for x in x_start..x_end {
                    hist[gray.get_pixel(x, y)[0] as usize] += 1;
                }
            }
            let area = (x_end - x_start) * (y_end - y_start);
            luts.push(clipped_lut(&mut hist, area, clip_limit));
        }
    }

    GrayImage::from_fn(w, h, |x, y| {
        let (x0, x1, wx) = blend_axis(x, tile_w, nx);
        let (y0, y1, wy) = blend_axis(y, tile_h, ny);
        let v = gray.get_pixel(x, y)[0] as usize;
        let lut = |tx: u32, ty: u32| luts[(ty * nx + tx) as usize][v] as f32;
        let top = lut(x0, y0) * (1.0 - wx) + lut(x1, y0) * wx;
        let bottom = lut(x0, y1) * (1.0 - wx) + lut(x1, y1) * wx;
        Luma([(top * (1.0 - wy) + bottom * wy).round().clamp(0.0, 255.0) as u8])
    })
}

fn clipped_lut(hist: &mut [u32; 256], area: u32, clip_limit: f32) -> [u8; 256] {
    let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > limit {
            excess += *bin - limit;
            *bin = limit;
        }
    }
    let bonus = excess / 256;
    let residual = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += bonus;
        if i < residual {
            *bin += 1;
        }
    }

    let scale = 255.0 / area as f32;
    let mut lut = [0u8; 256];
    let mut cdf = 0u32;
    for (i, count) in hist.iter().enumerate() {
        cdf += count;
        lut[i] = (cdf as f32 * scale).round().min(255.0) as u8;
    }
    lut
}

// Lower tile, upper tile and weight of the upper tile for one axis.
fn blend_axis(pos: u32, tile: u32, count: u32) -> (u32, u32, f32) {
    let f = (pos as f32 + 0.5) / tile as f32 - 0.5;
    if f <= 0.0 {
        return (0, 0, 0.0);
    }
    let lo = (f.floor() as u32).min(count - 1);
    let hi = (lo + 1).min(count - 1);
    (lo, hi, (f - lo as f32).clamp(0.0, 1.0))
}

/// Counter-clockwise rotation on the same canvas. Bicubic sampling, border
/// pixels replicated where the source falls outside the frame.
pub fn rotate_about_center(image: &RgbImage, angle: RotationAngle) -> RgbImage {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return image.clone();
    }
    let (cos, sin) = angle.cos_sin();
    let cx = (w as f32 - 1.0) / 2.0;
    let cy = (h as f32 - 1.0) / 2.0;
    RgbImage::from_fn(w, h, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let sx = cos * dx - sin * dy + cx;
        let sy = sin * dx + cos * dy + cy;
        sample_bicubic(image, sx, sy)
    })
}

fn sample_bicubic(image: &RgbImage, sx: f32, sy: f32) -> Rgb<u8> {
    let (w, h) = image.dimensions();
    let x0 = sx.floor();
    let y0 = sy.floor();
    let wx = cubic_weights(sx - x0);
    let wy = cubic_weights(sy - y0);
    let mut acc = [0f32; 3];
    for (j, weight_y) in wy.iter().enumerate() {
        let py = clamp_coord(y0 as i64 - 1 + j as i64, h);
        for (i, weight_x) in wx.iter().enumerate() {
            let px = clamp_coord(x0 as i64 - 1 + i as i64, w);
            let pixel = image.get_pixel(px, py);
            for c in 0..3 {
                acc[c] += weight_x * weight_y * pixel[c] as f32;
            }
        }
    }
    Rgb(acc.map(|v| v.round().clamp(0.0, 255.0) as u8))
}

// Catmull-Rom style kernel with a = -0.75.
fn cubic_weights(t: f32) -> [f32; 4] {
    const A: f32 = -0.75;
    let w0 = ((A * (t + 1.0) - 5.0 * A) * (t + 1.0) + 8.0 * A) * (t + 1.0) - 4.0 * A;
    let w1 = ((A + 2.0) * t - (A + 3.0)) * t * t + 1.0;
    let w2 = ((A + 2.0) * (1.0 - t) - (A + 3.0)) * (1.0 - t) * (1.0 - t) + 1.0;
    [w0, w1, w2, 1.0 - w0 - w1 - w2]
}

fn clamp_coord(v: i64, len: u32) -> u32 {
    v.clamp(0, len as i64 - 1) as u32
}
