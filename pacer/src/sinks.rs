//! Where pictures and sound go.
use std::time::Duration;

/// Something which can display the virtual machine's screen.
pub trait RenderSink {
    /// Draws one frame from the virtual machine's display memory.
    fn render(&mut self, display_memory: &[u8], video_mode: u8, now: Duration);

    fn set_charset(&mut self, width: u32, height: u32, glyphs: &[u8]);

    fn set_palette(&mut self, colours: &[u32]);

    /// Replaces the screen with a message explaining why emulation
    /// can't continue.
    fn show_error(&mut self, message: &str);
}

pub trait AudioSink {
    fn speaker_on(&mut self, frequency: f64);
    fn speaker_off(&mut self);
}

/// An [`AudioSink`] for hosts without sound.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mute;

impl AudioSink for Mute {
    fn speaker_on(&mut self, _frequency: f64) {}
    fn speaker_off(&mut self) {}
}
