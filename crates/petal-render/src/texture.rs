//! 2D texture surfaces.
//!
//! A [`Texture2D`] pairs a GPU texture handle with the CPU-side logic for
//! moving texels in and out of it. Surfaces come in two kinds:
//!
//! - **Source images** keep a shadow copy of their texels, so a lost GPU
//!   texture can be recreated with its content and readback never touches
//!   the GPU.
//! - **Render targets** are written by the GPU. Their rows are stored
//!   bottom-up, which shows up in three places: `set_data` flips rows before
//!   upload, `get_data` mirrors the whole image, and texture coordinates
//!   invert `v`.
//!
//! GPU allocation is deferred until the texture is first applied or drawn.

use std::cell::Cell;
#[cfg(feature = "image")]
use std::path::Path;
use std::sync::Arc;

use petal_core::config::TextureConfig;
use petal_core::geometry::Rect;
use petal_core::math::Vec2;
use petal_core::profiling::profile_function;
use petal_test_utils::{FramebufferId, FramebufferStatus, RenderContext, RenderbufferId, TextureDesc, TextureId};
use tracing::{debug, warn};

use crate::color::Color;
use crate::error::{RenderError, RenderResult};
use crate::pixel::{SurfaceFormat, decode_pixels, downsample, encode_pixels, flip_rows};
use crate::sampler::SamplerState;

/// Lifecycle of the GPU texture behind a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureHandle {
    /// No GPU texture yet, or the previous one was lost.
    #[default]
    Unallocated,
    Allocated(TextureId),
    /// Released by its owner. Drawing or transferring fails.
    Disposed,
}

impl TextureHandle {
    pub fn id(self) -> Option<TextureId> {
        match self {
            TextureHandle::Allocated(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_disposed(self) -> bool {
        self == TextureHandle::Disposed
    }

    /// Record a freshly created GPU texture.
    fn allocate(&mut self, id: TextureId) {
        *self = TextureHandle::Allocated(id);
    }

    /// Forget the current GPU texture, returning it so the caller can release it.
    fn invalidate(&mut self) -> Option<TextureId> {
        let previous = self.id();
        if !self.is_disposed() {
            *self = TextureHandle::Unallocated;
        }
        previous
    }
}

#[derive(Debug)]
enum Backing {
    RenderTarget,
    SourceImage { shadow: Vec<u8> },
}

/// A 2D texture that sprites can be drawn from, or drawn into.
///
/// # Example
///
/// ```rust
/// # #[cfg(feature = "mock")]
/// # {
/// use std::sync::Arc;
/// use petal_render::{Color, SurfaceFormat, Texture2D};
/// use petal_test_utils::MockRenderContext;
///
/// let ctx = Arc::new(MockRenderContext::new());
/// let mut texture = Texture2D::new(ctx, 2, 2, false, SurfaceFormat::Color).unwrap();
/// texture.set_data(&[Color::RED; 4]).unwrap();
///
/// let mut pixels = [Color::TRANSPARENT; 4];
/// texture.get_data(None, &mut pixels).unwrap();
/// assert_eq!(pixels, [Color::RED; 4]);
/// # }
/// ```
pub struct Texture2D {
    ctx: Arc<dyn RenderContext>,
    /// Interior mutability lets draws recreate a lost texture through `&self`.
    handle: Cell<TextureHandle>,
    width: u32,
    height: u32,
    format: SurfaceFormat,
    mip_levels: u32,
    backing: Backing,
    sampler: SamplerState,
    name: String,
}

fn mip_level_count(width: u32, height: u32, mipmap: bool) -> u32 {
    if mipmap {
        32 - width.max(height).max(1).leading_zeros()
    } else {
        1
    }
}

impl Texture2D {
    /// Create a blank source-image texture using the default [`TextureConfig`].
    pub fn new(
        ctx: Arc<dyn RenderContext>,
        width: u32,
        height: u32,
        mipmap: bool,
        format: SurfaceFormat,
    ) -> RenderResult<Self> {
        Self::with_config(ctx, width, height, mipmap, format, &TextureConfig::default())
    }

    /// Create a blank source-image texture.
    ///
    /// With `config.power_of_two` each dimension is rounded up to a power of
    /// two; [`width`](Self::width) and [`height`](Self::height) report the
    /// rounded size.
    pub fn with_config(
        ctx: Arc<dyn RenderContext>,
        width: u32,
        height: u32,
        mipmap: bool,
        format: SurfaceFormat,
        config: &TextureConfig,
    ) -> RenderResult<Self> {
        check_size(width, height)?;
        let (width, height) = (config.allocation_size(width), config.allocation_size(height));
        let shadow = vec![0; format.image_len(width, height)?];
        Ok(Self::build(
            ctx,
            width,
            height,
            format,
            mip_level_count(width, height, mipmap),
            Backing::SourceImage { shadow },
        ))
    }

    /// Create a texture the GPU can draw into.
    ///
    /// Render targets have no shadow copy; recreating a lost one clears it.
    pub fn render_target(
        ctx: Arc<dyn RenderContext>,
        width: u32,
        height: u32,
        format: SurfaceFormat,
    ) -> RenderResult<Self> {
        check_size(width, height)?;
        format.image_len(width, height)?;
        Ok(Self::build(ctx, width, height, format, 1, Backing::RenderTarget))
    }

    /// Create a source-image texture from tightly packed RGBA8 rows.
    pub fn from_rgba(ctx: Arc<dyn RenderContext>, width: u32, height: u32, pixels: &[u8]) -> RenderResult<Self> {
        check_size(width, height)?;
        let expected = SurfaceFormat::Color.image_len(width, height)?;
        if pixels.len() != expected {
            return Err(RenderError::InvalidArgument(format!(
                "{}x{} RGBA image needs {} bytes, got {}",
                width,
                height,
                expected,
                pixels.len()
            )));
        }
        Ok(Self::build(
            ctx,
            width,
            height,
            SurfaceFormat::Color,
            1,
            Backing::SourceImage {
                shadow: pixels.to_vec(),
            },
        ))
    }

    /// Load a PNG or JPEG file. The texture is named after the file stem.
    #[cfg(feature = "image")]
    pub fn from_file(ctx: Arc<dyn RenderContext>, path: impl AsRef<Path>) -> RenderResult<Self> {
        let path = path.as_ref();
        let (width, height, pixels) = load_rgba(path)?;
        let mut texture = Self::from_rgba(ctx, width, height, &pixels)?;
        if let Some(stem) = path.file_stem() {
            texture.name = stem.to_string_lossy().into_owned();
        }
        debug!(texture = %texture.name, "Loaded {}x{} image from {}", width, height, path.display());
        Ok(texture)
    }

    /// Replace the image with the content of `path` and recreate the GPU texture.
    #[cfg(feature = "image")]
    pub fn reload_from_file(&mut self, path: impl AsRef<Path>) -> RenderResult<()> {
        self.ensure_not_disposed()?;
        if self.is_render_target() {
            return Err(RenderError::InvalidOperation(
                "render targets cannot be reloaded from a file".to_string(),
            ));
        }
        let (width, height, pixels) = load_rgba(path.as_ref())?;

        self.release();
        self.width = width;
        self.height = height;
        self.format = SurfaceFormat::Color;
        if self.mip_levels > 1 {
            self.mip_levels = mip_level_count(width, height, true);
        }
        self.backing = Backing::SourceImage { shadow: pixels };
        self.retry_create().map(|_| ())
    }

    fn build(
        ctx: Arc<dyn RenderContext>,
        width: u32,
        height: u32,
        format: SurfaceFormat,
        mip_levels: u32,
        backing: Backing,
    ) -> Self {
        Self {
            ctx,
            handle: Cell::new(TextureHandle::Unallocated),
            width,
            height,
            format,
            mip_levels,
            backing,
            sampler: SamplerState::default(),
            name: String::from("texture"),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bounds(&self) -> Rect<i32> {
        Rect::new(0, 0, self.width as i32, self.height as i32)
    }

    pub fn format(&self) -> SurfaceFormat {
        self.format
    }

    pub fn level_count(&self) -> u32 {
        self.mip_levels
    }

    pub fn is_mipmapped(&self) -> bool {
        self.mip_levels > 1
    }

    pub fn is_render_target(&self) -> bool {
        matches!(self.backing, Backing::RenderTarget)
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle.get()
    }

    pub fn is_disposed(&self) -> bool {
        self.handle.get().is_disposed()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn sampler(&self) -> SamplerState {
        self.sampler
    }

    /// Sampler used by [`apply`](Self::apply) and by recreation uploads.
    pub fn set_sampler(&mut self, sampler: SamplerState) {
        self.sampler = sampler;
    }

    fn disposed_error(&self) -> RenderError {
        RenderError::InvalidArgument(format!("texture '{}' has been disposed", self.name))
    }

    fn ensure_not_disposed(&self) -> RenderResult<()> {
        if self.is_disposed() {
            return Err(self.disposed_error());
        }
        Ok(())
    }

    /// Whether a live GPU texture currently backs this surface.
    pub fn is_resident(&self) -> bool {
        self.handle.get().id().is_some_and(|id| self.ctx.is_texture_alive(id))
    }

    fn allocate(&self) -> RenderResult<TextureId> {
        profile_function!();
        let desc = TextureDesc {
            width: self.width,
            height: self.height,
            format: self.format.texture_format()?,
            mip_level_count: self.mip_levels,
            render_target: self.is_render_target(),
        };
        let id = self.ctx.create_texture(&desc)?;

        let mut handle = self.handle.get();
        handle.allocate(id);
        self.handle.set(handle);
        debug!(texture = %self.name, %id, "Allocated {}x{} {:?} texture", self.width, self.height, self.format);

        if let Backing::SourceImage { shadow } = &self.backing {
            self.upload(id, shadow)?;
        }
        Ok(id)
    }

    /// Bind, set sampling and replace every mip level with `bytes`.
    fn upload(&self, id: TextureId, bytes: &[u8]) -> RenderResult<()> {
        self.ctx.bind_texture(id)?;
        self.ctx
            .set_texture_sampling(id, &self.sampler.to_params(self.is_mipmapped())?)?;
        self.ctx.upload_texture(id, 0, bytes)?;

        if self.is_mipmapped() {
            let bpp = self.format.bytes_per_pixel().ok_or(RenderError::UnsupportedFormat(self.format))?;
            let (mut level, mut width, mut height) = (bytes.to_vec(), self.width, self.height);
            for mip in 1..self.mip_levels {
                (level, width, height) = downsample(&level, width, height, bpp);
                self.ctx.upload_texture(id, mip, &level)?;
            }
        }
        Ok(())
    }

    /// Allocate a GPU texture if there is none or the current one was lost.
    ///
    /// Source images re-upload their shadow copy; render targets come back
    /// cleared. This is a single attempt: a failure is returned, not retried.
    pub fn retry_create(&self) -> RenderResult<TextureId> {
        match self.handle.get() {
            TextureHandle::Disposed => Err(self.disposed_error()),
            TextureHandle::Allocated(id) if self.ctx.is_texture_alive(id) => Ok(id),
            TextureHandle::Allocated(id) => {
                warn!(texture = %self.name, %id, "GPU texture was lost, recreating");
                let mut handle = self.handle.get();
                handle.invalidate();
                self.handle.set(handle);
                self.allocate()
            }
            TextureHandle::Unallocated => self.allocate(),
        }
    }

    /// Drop the current GPU texture, live or not, and allocate a new one.
    pub fn force_retry_create(&self) -> RenderResult<TextureId> {
        self.ensure_not_disposed()?;
        self.release();
        self.allocate()
    }

    fn release(&self) {
        let mut handle = self.handle.get();
        if let Some(id) = handle.invalidate() {
            self.ctx.delete_texture(id);
        }
        self.handle.set(handle);
    }

    /// Release the GPU texture. Any later draw or transfer fails.
    pub fn dispose(&mut self) {
        self.release();
        self.handle.set(TextureHandle::Disposed);
        if let Backing::SourceImage { shadow } = &mut self.backing {
            *shadow = Vec::new();
        }
        debug!(texture = %self.name, "Disposed texture");
    }

    /// Upload a complete image of packed texels, in GPU row order.
    ///
    /// The sampler is validated first, so an unsupported sampler fails before
    /// anything reaches the GPU.
    pub fn apply(&mut self, bytes: &[u8]) -> RenderResult<()> {
        profile_function!();
        self.ensure_not_disposed()?;
        self.sampler.validate()?;
        let expected = self.format.image_len(self.width, self.height)?;
        if bytes.len() != expected {
            return Err(RenderError::InvalidArgument(format!(
                "{}x{} {:?} texture needs {} bytes, got {}",
                self.width,
                self.height,
                self.format,
                expected,
                bytes.len()
            )));
        }

        if let Backing::SourceImage { shadow } = &mut self.backing {
            shadow.copy_from_slice(bytes);
            if !self.is_resident() {
                // Allocation uploads the shadow we just updated.
                self.retry_create()?;
                return Ok(());
            }
        }
        let id = self.retry_create()?;
        self.upload(id, bytes)
    }

    /// Replace the texels from the start of the image with `data`.
    pub fn set_data(&mut self, data: &[Color]) -> RenderResult<()> {
        self.set_data_range(data, 0, data.len())
    }

    /// Write `data[start..start + count]` to texels `0..count` in row-major order.
    ///
    /// Texels past `count` keep their content. Render targets flip the image
    /// vertically before upload.
    pub fn set_data_range(&mut self, data: &[Color], start: usize, count: usize) -> RenderResult<()> {
        let end = start
            .checked_add(count)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                RenderError::InvalidArgument(format!(
                    "range {}..{}+{} is outside the {} element slice",
                    start,
                    start,
                    count,
                    data.len()
                ))
            })?;
        let texels = self.width as usize * self.height as usize;
        if count > texels {
            return Err(RenderError::InvalidArgument(format!(
                "{} texels do not fit a {}x{} texture",
                count, self.width, self.height
            )));
        }
        self.ensure_not_disposed()?;

        let encoded = encode_pixels(&data[start..end], self.format)?;
        let mut image = if count == texels {
            encoded
        } else {
            let mut image = self.upright_image()?;
            image[..encoded.len()].copy_from_slice(&encoded);
            image
        };

        if self.is_render_target() {
            let bpp = image.len() / texels.max(1);
            flip_rows(&mut image, self.width, self.height, bpp);
        }
        self.apply(&image)
    }

    /// Current content with rows in top-down order.
    fn upright_image(&self) -> RenderResult<Vec<u8>> {
        match &self.backing {
            Backing::SourceImage { shadow } => Ok(shadow.clone()),
            Backing::RenderTarget if self.is_resident() => {
                let id = self.retry_create()?;
                let mut image = self.ctx.read_texture(id)?;
                let bpp = image.len() / (self.width as usize * self.height as usize).max(1);
                flip_rows(&mut image, self.width, self.height, bpp);
                Ok(image)
            }
            Backing::RenderTarget => Ok(vec![0; self.format.image_len(self.width, self.height)?]),
        }
    }

    /// Read the texels inside `rect` (whole texture if `None`) into `out`.
    ///
    /// Returns the number of texels written. Render targets come back
    /// mirrored on both axes: logical texel `i` is native texel
    /// `width * height - 1 - i`.
    pub fn get_data(&self, rect: Option<Rect<i32>>, out: &mut [Color]) -> RenderResult<usize> {
        self.get_data_range(rect, out, 0, out.len())
    }

    /// Read the texels inside `rect` into `out[start..start + count]`.
    ///
    /// `count` must hold the whole rectangle. Elements of `out` outside the
    /// rectangle's texels are left untouched.
    pub fn get_data_range(
        &self,
        rect: Option<Rect<i32>>,
        out: &mut [Color],
        start: usize,
        count: usize,
    ) -> RenderResult<usize> {
        profile_function!();
        let end = start
            .checked_add(count)
            .filter(|&end| end <= out.len())
            .ok_or_else(|| {
                RenderError::InvalidArgument(format!(
                    "range {}..{}+{} is outside the {} element slice",
                    start,
                    start,
                    count,
                    out.len()
                ))
            })?;
        self.ensure_not_disposed()?;
        let rect = rect.unwrap_or_else(|| self.bounds());
        if !rect.fits_within(self.width as i32, self.height as i32) {
            return Err(RenderError::InvalidArgument(format!(
                "rectangle {:?} is outside the {}x{} texture",
                rect, self.width, self.height
            )));
        }
        let texels = rect.width as usize * rect.height as usize;
        if count < texels {
            return Err(RenderError::InvalidArgument(format!(
                "{} texels requested into a buffer of {}",
                texels, count
            )));
        }
        if texels == 0 {
            return Ok(0);
        }
        let out = &mut out[start..end];

        let pixels = match &self.backing {
            Backing::SourceImage { shadow } => decode_pixels(shadow, self.format)?,
            Backing::RenderTarget => {
                let native = self.read_render_target()?;
                let mut pixels = decode_pixels(&native, self.format)?;
                pixels.reverse();
                pixels
            }
        };

        let (x, width) = (rect.x as usize, rect.width as usize);
        for (row, y) in (rect.y..rect.bottom()).enumerate() {
            let src = y as usize * self.width as usize + x;
            out[row * width..(row + 1) * width].copy_from_slice(&pixels[src..src + width]);
        }
        Ok(texels)
    }

    /// Like [`get_data`](Self::get_data), packing each texel as `0xRRGGBBAA`.
    pub fn get_data_u32(&self, rect: Option<Rect<i32>>, out: &mut [u32]) -> RenderResult<usize> {
        let mut colors = vec![Color::TRANSPARENT; out.len()];
        let count = self.get_data(rect, &mut colors)?;
        for (packed, color) in out.iter_mut().zip(&colors[..count]) {
            *packed = color.to_packed_u32();
        }
        Ok(count)
    }

    fn read_render_target(&self) -> RenderResult<Vec<u8>> {
        let id = self.retry_create()?;
        let offscreen = OffscreenTarget::acquire(self.ctx.as_ref(), id, self.width, self.height)?;
        offscreen.read_pixels()
    }

    /// Texture coordinates of the top-left and bottom-right corners of `source`.
    pub fn tex_coords(&self, source: Rect<f32>) -> (Vec2, Vec2) {
        let (width, height) = (self.width as f32, self.height as f32);
        let tl = Vec2::new(source.x / width, source.y / height);
        let br = Vec2::new(source.right() / width, source.bottom() / height);
        if self.is_render_target() {
            (Vec2::new(tl.x, 1.0 - tl.y), Vec2::new(br.x, 1.0 - br.y))
        } else {
            (tl, br)
        }
    }
}

impl Drop for Texture2D {
    fn drop(&mut self) {
        if let Some(id) = self.handle.get().id() {
            self.ctx.delete_texture(id);
        }
    }
}

impl std::fmt::Debug for Texture2D {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture2D")
            .field("name", &self.name)
            .field("handle", &self.handle.get())
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("mip_levels", &self.mip_levels)
            .field("render_target", &self.is_render_target())
            .finish()
    }
}

fn check_size(width: u32, height: u32) -> RenderResult<()> {
    if width == 0 || height == 0 {
        return Err(RenderError::InvalidArgument(format!(
            "texture size {}x{} must be non-zero",
            width, height
        )));
    }
    Ok(())
}

#[cfg(feature = "image")]
fn load_rgba(path: &Path) -> RenderResult<(u32, u32, Vec<u8>)> {
    let image = image::open(path)
        .map_err(|err| RenderError::ContentLoad {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?
        .to_rgba8();
    let (width, height) = image.dimensions();
    Ok((width, height, image.into_raw()))
}

/// Framebuffer and depth renderbuffer borrowed for one readback.
///
/// Dropping it releases both and rebinds the default framebuffer, whichever
/// way the readback ends.
struct OffscreenTarget<'a> {
    ctx: &'a dyn RenderContext,
    framebuffer: FramebufferId,
    depth: Option<RenderbufferId>,
}

impl<'a> OffscreenTarget<'a> {
    fn acquire(ctx: &'a dyn RenderContext, texture: TextureId, width: u32, height: u32) -> RenderResult<Self> {
        let mut target = Self {
            ctx,
            framebuffer: ctx.create_framebuffer()?,
            depth: None,
        };
        let depth = ctx.create_depth_renderbuffer(width, height)?;
        target.depth = Some(depth);
        ctx.attach_color(target.framebuffer, texture)?;
        ctx.attach_depth(target.framebuffer, depth)?;

        match ctx.framebuffer_status(target.framebuffer) {
            FramebufferStatus::Complete => Ok(target),
            status => {
                warn!(framebuffer = %target.framebuffer, ?status, "Offscreen framebuffer is incomplete");
                Err(RenderError::FramebufferError(status))
            }
        }
    }

    fn read_pixels(&self) -> RenderResult<Vec<u8>> {
        Ok(self.ctx.read_pixels(self.framebuffer)?)
    }
}

impl Drop for OffscreenTarget<'_> {
    fn drop(&mut self) {
        if let Some(depth) = self.depth.take() {
            self.ctx.delete_renderbuffer(depth);
        }
        self.ctx.delete_framebuffer(self.framebuffer);
        self.ctx.bind_default_framebuffer();
    }
}
