//! Painting messages over the emulator's canvas.
use std::fmt::{self, Display, Formatter};

use wasm_bindgen::{JsCast, JsValue};
use web_sys::{CanvasRenderingContext2d, HtmlCanvasElement};

const FONT_HEIGHT_PX: u32 = 16;

#[derive(Debug)]
pub(crate) struct PaintError {
    msg: String,
}

impl Display for PaintError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.msg)
    }
}

impl std::error::Error for PaintError {}

impl From<String> for PaintError {
    fn from(msg: String) -> PaintError {
        PaintError { msg }
    }
}

fn context_of(canvas: &HtmlCanvasElement) -> Result<CanvasRenderingContext2d, PaintError> {
    match canvas.get_context("2d") {
        Ok(Some(context)) => context
            .dyn_into::<CanvasRenderingContext2d>()
            .map_err(|_| PaintError::from("canvas 2d context has an unexpected type".to_string())),
        Ok(None) => Err("canvas has no 2d context".to_string().into()),
        Err(e) => Err(format!("get_context failed: {e:?}").into()),
    }
}

/// Blanks the canvas and writes `message` in the middle of it.
pub(crate) fn draw_error_message(
    canvas: &HtmlCanvasElement,
    message: &str,
) -> Result<(), PaintError> {
    let context = context_of(canvas)?;
    let width = f64::from(canvas.width());
    let height = f64::from(canvas.height());

    context.set_fill_style(&JsValue::from_str("black"));
    context.fill_rect(0.0, 0.0, width, height);

    context.set_font(&format!("{FONT_HEIGHT_PX}px monospace"));
    context.set_text_baseline("middle");
    context.set_fill_style(&JsValue::from_str("white"));
    let metrics = context
        .measure_text(message)
        .map_err(|e| format!("measure_text failed: {e:?}"))?;
    let x = ((width - metrics.width()) / 2.0).max(0.0);
    context
        .fill_text(message, x, height / 2.0)
        .map_err(|e| format!("fill_text failed: {e:?}").into())
}
