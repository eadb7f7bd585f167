//! Bitmap sprite fonts.
//!
//! A [`SpriteFont`] is a texture atlas plus per-character metrics. It does no
//! rasterization; [`SpriteBatch::draw_string`](crate::SpriteBatch::draw_string)
//! draws one sprite per visible glyph using the placements computed here.

use ahash::HashMap;
use petal_core::geometry::Rect;
use petal_core::math::Vec2;

use crate::error::{RenderError, RenderResult};
use crate::texture::Texture2D;

/// Metrics of one character in the atlas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Glyph {
    /// Source rectangle in the atlas texture.
    pub bounds: Rect<i32>,
    /// Offset of the drawn pixels inside the character cell.
    pub cropping: Vec2,
    /// Space before the glyph. May be negative for kerned pairs.
    pub left_side_bearing: f32,
    /// Advance taken by the glyph itself.
    pub width: f32,
    pub right_side_bearing: f32,
}

impl Glyph {
    pub fn new(bounds: Rect<i32>, cropping: Vec2, left_side_bearing: f32, width: f32, right_side_bearing: f32) -> Self {
        Self {
            bounds,
            cropping,
            left_side_bearing,
            width,
            right_side_bearing,
        }
    }

    /// A glyph whose advance equals its atlas width, with no bearings.
    pub fn simple(bounds: Rect<i32>) -> Self {
        Self::new(bounds, Vec2::ZERO, 0.0, bounds.width as f32, 0.0)
    }
}

/// Where one glyph lands relative to the start of the string.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlyphPlacement {
    pub character: char,
    pub source: Rect<i32>,
    /// Top-left of the glyph, in unscaled text space.
    pub position: Vec2,
}

/// A texture atlas and the glyph table describing it.
#[derive(Debug)]
pub struct SpriteFont {
    texture: Texture2D,
    glyphs: HashMap<char, Glyph>,
    line_spacing: f32,
    spacing: f32,
    default_char: Option<char>,
}

impl SpriteFont {
    pub fn new(texture: Texture2D, glyphs: impl IntoIterator<Item = (char, Glyph)>, line_spacing: f32) -> Self {
        Self {
            texture,
            glyphs: glyphs.into_iter().collect(),
            line_spacing,
            spacing: 0.0,
            default_char: None,
        }
    }

    pub fn texture(&self) -> &Texture2D {
        &self.texture
    }

    pub fn texture_mut(&mut self) -> &mut Texture2D {
        &mut self.texture
    }

    /// Vertical distance between baselines of consecutive lines.
    pub fn line_spacing(&self) -> f32 {
        self.line_spacing
    }

    pub fn set_line_spacing(&mut self, line_spacing: f32) {
        self.line_spacing = line_spacing;
    }

    /// Extra horizontal space between adjacent glyphs on a line.
    pub fn spacing(&self) -> f32 {
        self.spacing
    }

    pub fn set_spacing(&mut self, spacing: f32) {
        self.spacing = spacing;
    }

    /// Character drawn in place of characters missing from the table.
    pub fn default_char(&self) -> Option<char> {
        self.default_char
    }

    /// Set the substitute for missing characters. It must itself be present.
    pub fn set_default_char(&mut self, default_char: Option<char>) -> RenderResult<()> {
        if let Some(c) = default_char
            && !self.glyphs.contains_key(&c)
        {
            return Err(RenderError::InvalidArgument(format!(
                "default character {c:?} is not in the font"
            )));
        }
        self.default_char = default_char;
        Ok(())
    }

    pub fn glyph(&self, c: char) -> Option<&Glyph> {
        self.glyphs.get(&c)
    }

    pub fn characters(&self) -> impl Iterator<Item = char> + '_ {
        self.glyphs.keys().copied()
    }

    fn resolve(&self, c: char) -> RenderResult<&Glyph> {
        self.glyphs
            .get(&c)
            .or_else(|| self.default_char.and_then(|d| self.glyphs.get(&d)))
            .ok_or_else(|| RenderError::InvalidArgument(format!("character {c:?} is not in the font")))
    }

    /// Lay `text` out into `out` (cleared first) and return its size.
    ///
    /// `\n` starts a new line and `\r` is ignored. Fails without writing any
    /// placement if a character is missing and there is no default.
    pub fn layout_into(&self, text: &str, out: &mut Vec<GlyphPlacement>) -> RenderResult<Vec2> {
        out.clear();
        let mut size = Vec2::ZERO;
        let mut cursor = Vec2::ZERO;
        let mut first_glyph_of_line = true;
        let mut has_line = false;

        for c in text.chars() {
            match c {
                '\r' => continue,
                '\n' => {
                    cursor.x = 0.0;
                    cursor.y += self.line_spacing;
                    first_glyph_of_line = true;
                    has_line = true;
                    continue;
                }
                _ => {}
            }

            let glyph = match self.resolve(c) {
                Ok(glyph) => glyph,
                Err(err) => {
                    out.clear();
                    return Err(err);
                }
            };

            // The first glyph of a line never hangs left of the line start.
            if first_glyph_of_line {
                cursor.x = glyph.left_side_bearing.max(0.0);
                first_glyph_of_line = false;
            } else {
                cursor.x += self.spacing + glyph.left_side_bearing;
            }

            out.push(GlyphPlacement {
                character: c,
                source: glyph.bounds,
                position: cursor + glyph.cropping,
            });

            cursor.x += glyph.width + glyph.right_side_bearing;
            size.x = size.x.max(cursor.x);
            has_line = true;
        }

        if has_line {
            size.y = cursor.y + self.line_spacing;
        }
        Ok(size)
    }

    /// Size of `text` when drawn at scale 1.
    pub fn measure_string(&self, text: &str) -> RenderResult<Vec2> {
        let mut scratch = Vec::new();
        self.layout_into(text, &mut scratch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel::SurfaceFormat;
    use petal_test_utils::MockRenderContext;
    use std::sync::Arc;

    fn font() -> SpriteFont {
        let texture = Texture2D::new(Arc::new(MockRenderContext::new()), 64, 16, false, SurfaceFormat::Color).unwrap();
        SpriteFont::new(
            texture,
            [
                ('A', Glyph::simple(Rect::new(0, 0, 8, 10))),
                ('B', Glyph::new(Rect::new(8, 0, 6, 10), Vec2::new(0.0, 2.0), 1.0, 6.0, 1.0)),
                ('?', Glyph::simple(Rect::new(14, 0, 5, 10))),
            ],
            12.0,
        )
    }

    fn layout(font: &SpriteFont, text: &str) -> (Vec<GlyphPlacement>, Vec2) {
        let mut out = Vec::new();
        let size = font.layout_into(text, &mut out).unwrap();
        (out, size)
    }

    #[test]
    fn test_advances_along_a_line() {
        let mut font = font();
        font.set_spacing(2.0);
        let (placements, size) = layout(&font, "AB");

        assert_eq!(placements[0].position, Vec2::ZERO);
        // 8 (A) + 2 spacing + 1 left bearing, then B's cropping.
        assert_eq!(placements[1].position, Vec2::new(11.0, 2.0));
        assert_eq!(size, Vec2::new(18.0, 12.0));
    }

    #[test]
    fn test_first_glyph_ignores_negative_bearing() {
        let mut font = font();
        font.glyphs.insert('C', Glyph::new(Rect::new(0, 10, 4, 4), Vec2::ZERO, -3.0, 4.0, 0.0));
        let (placements, _) = layout(&font, "C");
        assert_eq!(placements[0].position.x, 0.0);
    }

    #[test]
    fn test_newlines_and_carriage_returns() {
        let font = font();
        let (placements, size) = layout(&font, "A\r\nAA\n");

        let positions: Vec<Vec2> = placements.iter().map(|p| p.position).collect();
        assert_eq!(
            positions,
            vec![Vec2::new(0.0, 0.0), Vec2::new(0.0, 12.0), Vec2::new(8.0, 12.0)]
        );
        assert_eq!(size, Vec2::new(16.0, 36.0));
    }

    #[test]
    fn test_missing_character() {
        let mut font = font();
        let mut out = vec![];
        assert!(matches!(
            font.layout_into("AZ", &mut out),
            Err(RenderError::InvalidArgument(_))
        ));
        assert!(out.is_empty());

        font.set_default_char(Some('?')).unwrap();
        let (placements, _) = layout(&font, "AZ");
        assert_eq!(placements[1].character, 'Z');
        assert_eq!(placements[1].source, Rect::new(14, 0, 5, 10));
    }

    #[test]
    fn test_default_char_must_exist() {
        let mut font = font();
        assert!(font.set_default_char(Some('#')).is_err());
        assert_eq!(font.default_char(), None);
    }

    #[test]
    fn test_measure_empty_string() {
        assert_eq!(font().measure_string("").unwrap(), Vec2::ZERO);
    }
}
