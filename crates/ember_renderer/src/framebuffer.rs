//! Output pixel storage.
//!
//! The framebuffer accumulates linear RGB in float precision and converts
//! to gamma-corrected bytes on export. A byte-backed store exists for
//! preview consumers that want the 8-bit form directly. Resizes allocate a
//! new buffer and bump a generation counter so readers holding a stale
//! size can tell.

use std::path::Path;

use ember_core::Color;

/// Channels per pixel. Alpha is carried so exports map straight to RGBA.
const STRIDE: usize = 4;

#[derive(Debug, Clone)]
pub enum PixelStore {
    Float(Vec<f32>),
    Byte(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct Framebuffer {
    width: u32,
    height: u32,
    generation: u64,
    pixels: PixelStore,
}

impl Framebuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Framebuffer {
            width,
            height,
            generation: 0,
            pixels: PixelStore::Float(vec![0.0; (width * height) as usize * STRIDE]),
        }
    }

    pub fn new_byte(width: u32, height: u32) -> Self {
        Framebuffer {
            width,
            height,
            generation: 0,
            pixels: PixelStore::Byte(vec![0; (width * height) as usize * STRIDE]),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bumped on every resize; readers compare it to detect a stale view.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Reallocate for a new resolution. Contents are discarded.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.generation += 1;
        let len = (width * height) as usize * STRIDE;
        self.pixels = match self.pixels {
            PixelStore::Float(_) => PixelStore::Float(vec![0.0; len]),
            PixelStore::Byte(_) => PixelStore::Byte(vec![0; len]),
        };
    }

    pub fn clear(&mut self) {
        match &mut self.pixels {
            PixelStore::Float(buf) => buf.fill(0.0),
            PixelStore::Byte(buf) => buf.fill(0),
        }
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y * self.width + x) as usize * STRIDE
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        if x >= self.width || y >= self.height {
            return;
        }
        let o = self.offset(x, y);
        match &mut self.pixels {
            PixelStore::Float(buf) => {
                buf[o] = color.x;
                buf[o + 1] = color.y;
                buf[o + 2] = color.z;
                buf[o + 3] = 1.0;
            }
            PixelStore::Byte(buf) => {
                buf[o] = quantize(color.x);
                buf[o + 1] = quantize(color.y);
                buf[o + 2] = quantize(color.z);
                buf[o + 3] = 255;
            }
        }
    }

    pub fn get_pixel(&self, x: u32, y: u32) -> Color {
        if x >= self.width || y >= self.height {
            return Color::ZERO;
        }
        let o = self.offset(x, y);
        match &self.pixels {
            PixelStore::Float(buf) => Color::new(buf[o], buf[o + 1], buf[o + 2]),
            PixelStore::Byte(buf) => Color::new(
                buf[o] as f32 / 255.0,
                buf[o + 1] as f32 / 255.0,
                buf[o + 2] as f32 / 255.0,
            ),
        }
    }

    /// Fold one pass's result for a pixel into the running average.
    /// `pass` is 1-based: pass 1 overwrites, later passes blend.
    pub fn accumulate(&mut self, x: u32, y: u32, color: Color, pass: u32) {
        if pass <= 1 {
            self.set_pixel(x, y, color);
            return;
        }
        let n = pass as f32;
        let prev = self.get_pixel(x, y);
        self.set_pixel(x, y, prev * ((n - 1.0) / n) + color / n);
    }

    /// Copy a finished tile's pixels in one call, so workers hold the
    /// framebuffer lock for a single blit rather than per pixel.
    pub fn blit(&mut self, x: u32, y: u32, w: u32, h: u32, pixels: &[Color]) {
        for ty in 0..h {
            for tx in 0..w {
                self.set_pixel(x + tx, y + ty, pixels[(ty * w + tx) as usize]);
            }
        }
    }

    /// Gamma-corrected 8-bit RGBA of the whole frame.
    pub fn to_rgba8(&self) -> Vec<u8> {
        match &self.pixels {
            PixelStore::Byte(buf) => buf.clone(),
            PixelStore::Float(buf) => buf
                .chunks_exact(STRIDE)
                .flat_map(|px| {
                    [
                        quantize(px[0]),
                        quantize(px[1]),
                        quantize(px[2]),
                        (px[3].clamp(0.0, 1.0) * 255.0) as u8,
                    ]
                })
                .collect(),
        }
    }

    /// Write the frame as a PNG.
    pub fn save_png(&self, path: &Path) -> Result<(), image::ImageError> {
        let data = self.to_rgba8();
        image::save_buffer(
            path,
            &data,
            self.width,
            self.height,
            image::ColorType::Rgba8,
        )
    }
}

/// Linear float channel to gamma-2 byte.
fn quantize(channel: f32) -> u8 {
    let gamma = channel.max(0.0).sqrt();
    (gamma.clamp(0.0, 0.999) * 256.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut fb = Framebuffer::new(4, 4);
        fb.set_pixel(1, 2, Color::new(0.25, 0.5, 0.75));
        let c = fb.get_pixel(1, 2);
        assert!((c.x - 0.25).abs() < 1e-6);
        assert!((c.z - 0.75).abs() < 1e-6);
        // Out of range is silently dropped and reads back black.
        fb.set_pixel(9, 9, Color::ONE);
        assert_eq!(fb.get_pixel(9, 9), Color::ZERO);
    }

    #[test]
    fn test_accumulate_running_average() {
        let mut fb = Framebuffer::new(1, 1);
        fb.accumulate(0, 0, Color::splat(1.0), 1);
        fb.accumulate(0, 0, Color::splat(0.0), 2);
        let c = fb.get_pixel(0, 0);
        assert!((c.x - 0.5).abs() < 1e-5);
        fb.accumulate(0, 0, Color::splat(0.5), 3);
        assert!((fb.get_pixel(0, 0).x - 0.5).abs() < 1e-5);
    }

    #[test]
    fn test_resize_bumps_generation_and_clears() {
        let mut fb = Framebuffer::new(2, 2);
        fb.set_pixel(0, 0, Color::ONE);
        assert_eq!(fb.generation(), 0);
        fb.resize(3, 3);
        assert_eq!(fb.generation(), 1);
        assert_eq!((fb.width(), fb.height()), (3, 3));
        assert_eq!(fb.get_pixel(0, 0), Color::ZERO);
    }

    #[test]
    fn test_blit_places_tile() {
        let mut fb = Framebuffer::new(4, 4);
        let tile = vec![Color::splat(1.0); 4];
        fb.blit(2, 2, 2, 2, &tile);
        assert!(fb.get_pixel(2, 2).x > 0.9);
        assert!(fb.get_pixel(3, 3).x > 0.9);
        assert_eq!(fb.get_pixel(1, 1), Color::ZERO);
    }

    #[test]
    fn test_gamma_export() {
        let mut fb = Framebuffer::new(1, 1);
        fb.set_pixel(0, 0, Color::splat(0.25));
        let rgba = fb.to_rgba8();
        // sqrt(0.25) = 0.5 -> 128.
        assert_eq!(rgba[0], 128);
        assert_eq!(rgba[3], 255);
    }

    #[test]
    fn test_byte_store_round_trip() {
        let mut fb = Framebuffer::new_byte(2, 1);
        fb.set_pixel(0, 0, Color::new(1.0, 0.0, 0.0));
        let c = fb.get_pixel(0, 0);
        assert!(c.x > 0.95);
        assert!(c.y < 0.05);
    }
}
