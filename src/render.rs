//! Image to character-grid rendering.
//!
//! Each output cell is one glyph chosen by luminance from [`GLYPH_RAMP`],
//! optionally tinted with the cell's average color. Output depends only on the
//! input bytes and the [`RenderOptions`], which keeps cached renderings valid
//! for as long as the source object is unchanged.

use crate::errors::RenderError;
use image::imageops::FilterType;
use std::fmt::Write;

/// Darkest to brightest.
pub const GLYPH_RAMP: &[u8] = b" .,:;i1tfLCG08@";

/// Turns raw image bytes into styled text.
pub trait Rendering: Send + Sync + 'static {
    fn render(&self, image: &[u8]) -> Result<String, RenderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One `<span>` per cell; meant to sit inside a `<pre>` block.
    Html,
    /// 24-bit SGR escapes for terminals.
    Ansi,
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderOptions {
    /// Columns in the output grid.
    pub width: u32,
    /// Rows in the output grid. `None` derives it from the image aspect ratio.
    pub height: Option<u32>,
    /// Glyph width divided by glyph height, used only when `height` is `None`.
    pub char_aspect: f32,
    pub colored: bool,
    pub format: OutputFormat,
}

impl RenderOptions {
    /// Fixed configuration for the web feed.
    pub const FEED: Self = Self {
        width: 55,
        height: Some(20),
        char_aspect: 0.5,
        colored: true,
        format: OutputFormat::Html,
    };

    pub const TERMINAL: Self = Self {
        width: 80,
        height: None,
        char_aspect: 0.5,
        colored: true,
        format: OutputFormat::Ansi,
    };

    fn grid(&self, image_width: u32, image_height: u32) -> Result<(u32, u32), RenderError> {
        let rows = match self.height {
            Some(rows) => rows,
            None if image_width == 0 => 0,
            None => {
                let ratio = image_height as f32 / image_width as f32;
                (ratio * self.width as f32 * self.char_aspect).round().max(1.0) as u32
            }
        };
        if self.width == 0 || rows == 0 {
            return Err(RenderError::InvalidDimensions {
                width: self.width,
                height: rows,
            });
        }
        Ok((self.width, rows))
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self::FEED
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AsciiRenderer {
    options: RenderOptions,
}

impl AsciiRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }
}

fn glyph(r: u8, g: u8, b: u8) -> char {
    let luma = 0.2126 * f32::from(r) + 0.7152 * f32::from(g) + 0.0722 * f32::from(b);
    let last = (GLYPH_RAMP.len() - 1) as f32;
    let index = ((luma / 255.0) * last).round().clamp(0.0, last) as usize;
    GLYPH_RAMP[index] as char
}

fn push_html_escaped(out: &mut String, c: char) {
    match c {
        '&' => out.push_str("&amp;"),
        '<' => out.push_str("&lt;"),
        '>' => out.push_str("&gt;"),
        '"' => out.push_str("&quot;"),
        _ => out.push(c),
    }
}

impl Rendering for AsciiRenderer {
    fn render(&self, image: &[u8]) -> Result<String, RenderError> {
        let decoded = image::load_from_memory(image)?;
        let (cols, rows) = self.options.grid(decoded.width(), decoded.height())?;
        let cells = decoded.resize_exact(cols, rows, FilterType::Triangle).to_rgba8();

        let opts = &self.options;
        let mut out = String::with_capacity((cols as usize + 1) * rows as usize);
        for (y, row) in cells.rows().enumerate() {
            if y > 0 {
                out.push('\n');
            }
            for pixel in row {
                let [r, g, b, a] = pixel.0;
                // Transparent areas render as background.
                let [r, g, b] = [r, g, b].map(|c| ((u16::from(c) * u16::from(a)) / 255) as u8);
                let c = glyph(r, g, b);

                // Writing into a String cannot fail.
                match (opts.format, opts.colored) {
                    (OutputFormat::Html, true) => {
                        let _ = write!(out, "<span style=\"color:#{:02x}{:02x}{:02x}\">", r, g, b);
                        push_html_escaped(&mut out, c);
                        out.push_str("</span>");
                    }
                    (OutputFormat::Html, false) => push_html_escaped(&mut out, c),
                    (OutputFormat::Ansi, true) => {
                        let _ = write!(out, "\x1b[38;2;{};{};{}m{}", r, g, b, c);
                    }
                    (OutputFormat::Ansi, false) | (OutputFormat::Plain, _) => out.push(c),
                }
            }
            if opts.format == OutputFormat::Ansi && opts.colored {
                out.push_str("\x1b[0m");
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn gradient_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 90])
        });
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn plain(width: u32, height: Option<u32>) -> AsciiRenderer {
        AsciiRenderer::new(RenderOptions {
            width,
            height,
            char_aspect: 0.5,
            colored: false,
            format: OutputFormat::Plain,
        })
    }

    #[test]
    fn rendering_is_deterministic() {
        let png = gradient_png(120, 80);
        let renderer = AsciiRenderer::default();
        let first = renderer.render(&png).unwrap();
        let second = renderer.render(&png).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn feed_grid_has_fixed_dimensions() {
        let text = plain(55, Some(20)).render(&gradient_png(300, 40)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 20);
        assert!(lines.iter().all(|l| l.chars().count() == 55));
    }

    #[test]
    fn auto_height_compensates_for_glyph_aspect() {
        // 100x100 at 40 columns with 0.5 aspect -> 20 rows.
        let text = plain(40, None).render(&gradient_png(100, 100)).unwrap();
        assert_eq!(text.lines().count(), 20);
    }

    #[test]
    fn black_and_white_map_to_ramp_ends() {
        assert_eq!(glyph(0, 0, 0), ' ');
        assert_eq!(glyph(255, 255, 255), '@');
    }

    #[test]
    fn html_output_is_colored_spans() {
        let text = AsciiRenderer::new(RenderOptions::FEED)
            .render(&gradient_png(64, 64))
            .unwrap();
        assert!(text.starts_with("<span style=\"color:#"));
        assert_eq!(text.matches("<span").count(), 55 * 20);
    }

    #[test]
    fn default_renderer_draws_the_feed_grid() {
        let png = gradient_png(64, 64);
        let text = AsciiRenderer::default().render(&png).unwrap();
        assert_eq!(text, AsciiRenderer::new(RenderOptions::FEED).render(&png).unwrap());
        assert_eq!(text.lines().count(), 20);
    }

    #[test]
    fn ansi_rows_end_with_reset() {
        let text = AsciiRenderer::new(RenderOptions::TERMINAL)
            .render(&gradient_png(32, 32))
            .unwrap();
        assert!(text.lines().all(|l| l.ends_with("\x1b[0m")));
        assert!(text.contains("\x1b[38;2;"));
    }

    #[test]
    fn corrupt_bytes_are_a_decode_error() {
        let err = AsciiRenderer::default().render(b"definitely not a png").unwrap_err();
        assert!(matches!(err, RenderError::Decode(_)));
    }

    #[test]
    fn zero_width_is_rejected() {
        let err = plain(0, Some(10)).render(&gradient_png(8, 8)).unwrap_err();
        assert!(matches!(err, RenderError::InvalidDimensions { width: 0, .. }));
    }
}
