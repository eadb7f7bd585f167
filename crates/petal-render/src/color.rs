/// An RGBA color with one byte per channel.
///
/// ```
/// use petal_render::Color;
///
/// let orange = Color::from_hex(0xFF8800);
/// let translucent = Color::new(255, 255, 255, 128);
/// assert_eq!(orange.to_packed_u32(), 0xFF8800FF);
/// ```
///
/// The struct is `#[repr(C)]` and implements `bytemuck::Pod`; its memory
/// layout is the `[r, g, b, a]` byte order used by `SurfaceFormat::Color`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const GREEN: Color = Color::rgb(0, 255, 0);
    pub const BLUE: Color = Color::rgb(0, 0, 255);
    pub const YELLOW: Color = Color::rgb(255, 255, 0);
    pub const CORNFLOWER_BLUE: Color = Color::rgb(100, 149, 237);
    pub const TRANSPARENT: Color = Color::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Create a color with full opacity.
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    /// Create a color from a 24-bit RGB hex value (e.g. `0xFF8800`).
    pub const fn from_hex(hex: u32) -> Self {
        Self::rgb((hex >> 16) as u8, (hex >> 8) as u8, hex as u8)
    }

    /// Create a color from a packed `0xRRGGBBAA` value.
    pub const fn from_packed_u32(packed: u32) -> Self {
        Self::new((packed >> 24) as u8, (packed >> 16) as u8, (packed >> 8) as u8, packed as u8)
    }

    /// Pack as `R << 24 | G << 16 | B << 8 | A`.
    pub const fn to_packed_u32(self) -> u32 {
        (self.r as u32) << 24 | (self.g as u32) << 16 | (self.b as u32) << 8 | self.a as u32
    }

    /// Channels normalized to `0.0..=1.0`.
    pub fn to_array_f32(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a].map(|c| c as f32 / 255.0)
    }

    pub const fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Convert to the equivalent `wgpu::Color` (f64 components).
    pub fn to_wgpu(self) -> wgpu::Color {
        let [r, g, b, a] = self.to_array_f32();
        wgpu::Color {
            r: r as f64,
            g: g as f64,
            b: b as f64,
            a: a as f64,
        }
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl From<[u8; 4]> for Color {
    fn from([r, g, b, a]: [u8; 4]) -> Self {
        Self { r, g, b, a }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packed_u32_order() {
        let color = Color::new(0x11, 0x22, 0x33, 0x44);
        assert_eq!(color.to_packed_u32(), 0x11223344);
        assert_eq!(Color::from_packed_u32(0x11223344), color);
    }

    #[test]
    fn test_from_hex_is_opaque() {
        assert_eq!(Color::from_hex(0x6495ED), Color::CORNFLOWER_BLUE);
    }

    #[test]
    fn test_normalized() {
        assert_eq!(Color::new(255, 0, 0, 255).to_array_f32(), [1.0, 0.0, 0.0, 1.0]);
    }
}
