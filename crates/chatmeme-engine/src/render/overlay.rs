use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use ab_glyph::{FontVec, PxScale};
use anyhow::{bail, Context, Result};
use chatmeme_contracts::config::OverlayConfig;
use chatmeme_contracts::{MemeCaption, RenderedMeme};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::{draw_text_mut, text_size};
use reqwest::blocking::Client as HttpClient;

use crate::error::StageError;
use crate::http::ensure_success;

const OUTLINE: Rgba<u8> = Rgba([0, 0, 0, 255]);
const FILL: Rgba<u8> = Rgba([255, 255, 255, 255]);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextBox {
    pub width: u32,
    pub height: u32,
}

pub trait CaptionFont {
    fn measure(&self, text: &str) -> TextBox;
    fn draw(&self, canvas: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>, text: &str);
}

pub trait FontLoader {
    fn load(&self) -> Result<Box<dyn CaptionFont>>;
}

pub trait ImageDownloader {
    fn download(&self, url: &str) -> Result<Vec<u8>>;
}

/// Blocking "show this file to the user" action.
pub trait Viewer {
    fn show(&self, path: &Path) -> Result<()>;
}

pub struct TrueTypeFont {
    font: FontVec,
    scale: PxScale,
}

impl TrueTypeFont {
    pub fn load(path: &Path, size: f32) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("failed reading font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .with_context(|| format!("invalid font file {}", path.display()))?;
        Ok(Self {
            font,
            scale: PxScale::from(size),
        })
    }
}

impl CaptionFont for TrueTypeFont {
    fn measure(&self, text: &str) -> TextBox {
        let (width, height) = text_size(self.scale, &self.font, text);
        TextBox { width, height }
    }

    fn draw(&self, canvas: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>, text: &str) {
        draw_text_mut(canvas, color, x, y, self.scale, &self.font, text);
    }
}

#[derive(Debug, Clone)]
pub struct TrueTypeFontLoader {
    pub path: PathBuf,
    pub size: f32,
}

impl FontLoader for TrueTypeFontLoader {
    fn load(&self) -> Result<Box<dyn CaptionFont>> {
        Ok(Box::new(TrueTypeFont::load(&self.path, self.size)?))
    }
}

pub struct HttpImageDownloader {
    http: HttpClient,
}

impl HttpImageDownloader {
    pub fn new() -> Self {
        Self::with_client(HttpClient::new())
    }

    pub fn with_client(http: HttpClient) -> Self {
        Self { http }
    }
}

impl Default for HttpImageDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageDownloader for HttpImageDownloader {
    fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .with_context(|| format!("image download failed ({url})"))?;
        let response = ensure_success("image host", response)?;
        let bytes = response
            .bytes()
            .with_context(|| format!("image body read failed ({url})"))?;
        Ok(bytes.to_vec())
    }
}

/// Opens the file with the platform's default viewer and waits for it.
pub struct SystemViewer;

impl Viewer for SystemViewer {
    fn show(&self, path: &Path) -> Result<()> {
        let mut command = if cfg!(target_os = "macos") {
            let mut command = Command::new("open");
            command.arg("-W");
            command
        } else if cfg!(target_os = "windows") {
            let mut command = Command::new("cmd");
            command.args(["/C", "start", "/WAIT", ""]);
            command
        } else {
            Command::new("xdg-open")
        };
        let status = command
            .arg(path)
            .status()
            .with_context(|| format!("failed launching viewer for {}", path.display()))?;
        if !status.success() {
            bail!("viewer exited with {status} for {}", path.display());
        }
        Ok(())
    }
}

pub struct NoViewer;

impl Viewer for NoViewer {
    fn show(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverlayLayout {
    pub bottom_margin: u32,
    pub outline_offset: i32,
}

impl Default for OverlayLayout {
    fn default() -> Self {
        Self {
            bottom_margin: 100,
            outline_offset: 2,
        }
    }
}

/// Horizontally centred, `bottom_margin` pixels above the bottom edge.
/// Division floors, so captions wider than the image start left of zero.
pub fn caption_origin(width: u32, height: u32, text: TextBox, layout: OverlayLayout) -> (i32, i32) {
    let x = (i64::from(width) - i64::from(text.width)).div_euclid(2);
    let y = i64::from(height) - i64::from(layout.bottom_margin);
    (clamp_i32(x), clamp_i32(y))
}

fn clamp_i32(value: i64) -> i32 {
    value.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
}

/// Draws two outline copies then the fill copy on top. Returns the origin.
pub fn burn_caption(
    canvas: &mut RgbaImage,
    caption: &str,
    font: &dyn CaptionFont,
    layout: OverlayLayout,
) -> (i32, i32) {
    let text = font.measure(caption);
    let (x, y) = caption_origin(canvas.width(), canvas.height(), text, layout);
    let offset = layout.outline_offset;
    font.draw(canvas, x - offset, y - offset, OUTLINE, caption);
    font.draw(canvas, x + offset, y + offset, OUTLINE, caption);
    font.draw(canvas, x, y, FILL, caption);
    (x, y)
}

pub struct OverlayRenderer {
    downloader: Box<dyn ImageDownloader>,
    fonts: Box<dyn FontLoader>,
    viewer: Box<dyn Viewer>,
    layout: OverlayLayout,
    output_path: PathBuf,
}

impl OverlayRenderer {
    pub fn new(
        downloader: Box<dyn ImageDownloader>,
        fonts: Box<dyn FontLoader>,
        viewer: Box<dyn Viewer>,
        layout: OverlayLayout,
        output_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            downloader,
            fonts,
            viewer,
            layout,
            output_path: output_path.into(),
        }
    }

    pub fn from_config(config: &OverlayConfig, viewer: Box<dyn Viewer>) -> Self {
        Self::new(
            Box::new(HttpImageDownloader::new()),
            Box::new(TrueTypeFontLoader {
                path: config.font_path.clone(),
                size: config.font_size,
            }),
            viewer,
            OverlayLayout {
                bottom_margin: config.bottom_margin,
                outline_offset: config.outline_offset,
            },
            config.output_path.clone(),
        )
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Downloads, captions and saves the image, then shows it. A failing
    /// viewer is only logged; every earlier failure is returned.
    pub fn render(&self, image_url: &str, caption: &MemeCaption) -> Result<RenderedMeme> {
        let bytes = self.downloader.download(image_url)?;
        let decoded = image::load_from_memory(&bytes)
            .map_err(anyhow::Error::from)
            .map_err(|err| err.context(StageError::Render("decode source image".to_string())))?;
        let font = self
            .fonts
            .load()
            .map_err(|err| err.context(StageError::Render("load caption font".to_string())))?;

        let mut canvas = decoded.to_rgba8();
        let (x, y) = burn_caption(&mut canvas, caption.as_str(), font.as_ref(), self.layout);
        log::debug!(
            "caption drawn at ({x}, {y}) on {}x{} image",
            canvas.width(),
            canvas.height()
        );

        save_canvas(&canvas, &self.output_path)
            .map_err(|err| err.context(StageError::Render("save meme".to_string())))?;
        if let Err(err) = self.viewer.show(&self.output_path) {
            log::warn!("could not display {}: {err:#}", self.output_path.display());
        }
        Ok(RenderedMeme::Local {
            path: self.output_path.clone(),
            image: canvas,
        })
    }
}

fn save_canvas(canvas: &RgbaImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    // JPEG has no alpha channel.
    let result = match ImageFormat::from_path(path) {
        Ok(ImageFormat::Jpeg) => DynamicImage::ImageRgba8(canvas.clone()).to_rgb8().save(path),
        _ => canvas.save(path),
    };
    result.with_context(|| format!("failed to save {}", path.display()))
}
