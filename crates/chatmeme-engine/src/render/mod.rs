pub mod overlay;
pub mod remote;

pub use overlay::{
    burn_caption, caption_origin, CaptionFont, FontLoader, HttpImageDownloader, ImageDownloader,
    NoViewer, OverlayLayout, OverlayRenderer, SystemViewer, TextBox, TrueTypeFont,
    TrueTypeFontLoader, Viewer,
};
pub use remote::{ImgflipCaptioner, RemoteCaptioner};
