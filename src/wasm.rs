#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

#[cfg(target_arch = "wasm32")]
use crate::{
    bitmap::MonoBitmap,
    frame::{decode_frame, encode_frame, Frame},
};

/// Frame and image codecs for a browser host that drives its own audio graph
/// and modem engine.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub struct SonicLinkWasm;

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
impl SonicLinkWasm {
    #[wasm_bindgen(constructor)]
    pub fn new() -> Self {
        console_error_panic_hook::set_once();
        Self
    }

    #[wasm_bindgen]
    pub fn encode_text(&self, text: &str) -> String {
        encode_frame(&Frame::text(text))
    }

    /// Threshold an RGBA canvas buffer into an `IMG:` frame.
    #[wasm_bindgen]
    pub fn encode_rgba(&self, width: u32, height: u32, rgba: Vec<u8>) -> Result<String, JsValue> {
        let source = image::RgbaImage::from_raw(width, height, rgba)
            .ok_or_else(|| JsValue::from_str("RGBA buffer does not match dimensions"))?;
        let bitmap = MonoBitmap::from_image(&image::DynamicImage::ImageRgba8(source));
        Ok(encode_frame(&Frame::Image(bitmap)))
    }

    /// Frame kind of a received wire string: "text", "image", "raw" or "corrupt".
    #[wasm_bindgen]
    pub fn frame_kind(&self, wire: &str) -> String {
        decode_frame(wire).kind().to_string()
    }

    /// Text content of a text or raw frame.
    #[wasm_bindgen]
    pub fn frame_text(&self, wire: &str) -> Option<String> {
        match decode_frame(wire) {
            Frame::Text(text) | Frame::Raw(text) => Some(text),
            _ => None,
        }
    }

    /// 64×64 RGBA pixels ready for `ImageData`, or `None` for non-image or
    /// corrupt frames.
    #[wasm_bindgen]
    pub fn frame_rgba(&self, wire: &str) -> Option<Vec<u8>> {
        match decode_frame(wire) {
            Frame::Image(bitmap) => Some(bitmap.to_rgba_image().into_raw()),
            _ => None,
        }
    }
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub fn init() {
    console_error_panic_hook::set_once();
}
