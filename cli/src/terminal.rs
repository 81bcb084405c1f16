//! Shows the synthetic machine's text screen on the terminal.
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::time::Duration;

use pacer::RenderSink;
use termcolor::{self, Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use tracing::{event, Level};

use super::synthetic::COLUMNS;

pub fn get_colour_choice() -> termcolor::ColorChoice {
    if atty::is(atty::Stream::Stdout) {
        ColorChoice::Auto
    } else {
        ColorChoice::Never
    }
}

/// Maps the low three bits of a text-mode colour to the terminal's
/// colour of the same name.
fn cga_colour(bits: u8) -> Color {
    match bits & 0x07 {
        0 => Color::Black,
        1 => Color::Blue,
        2 => Color::Green,
        3 => Color::Cyan,
        4 => Color::Red,
        5 => Color::Magenta,
        6 => Color::Yellow,
        _ => Color::White,
    }
}

fn attribute_colours(attribute: u8) -> ColorSpec {
    let mut spec = ColorSpec::new();
    spec.set_fg(Some(cga_colour(attribute)))
        .set_intense(attribute & 0x08 != 0)
        .set_bg(Some(cga_colour(attribute >> 4)));
    spec
}

#[derive(Debug, Default)]
struct Latest {
    cells: Vec<u8>,
    video_mode: u8,
    drawn_at: Duration,
    frames: u64,
    error: Option<String>,
}

/// A render sink which keeps the most recent frame so that it can be
/// printed later.  Clones share the frame.
#[derive(Debug, Clone, Default)]
pub struct TerminalScreen(Rc<RefCell<Latest>>);

impl TerminalScreen {
    pub fn new() -> TerminalScreen {
        TerminalScreen::default()
    }

    pub fn frames(&self) -> u64 {
        self.0.borrow().frames
    }

    pub fn print(&self) -> Result<(), std::io::Error> {
        let latest = self.0.borrow();
        let mut out = StandardStream::stdout(get_colour_choice());
        writeln!(
            out,
            "screen (mode {}) as drawn at {:.3?}:",
            latest.video_mode, latest.drawn_at
        )?;
        let mut current: Option<u8> = None;
        for row in latest.cells.chunks(COLUMNS * 2) {
            for cell in row.chunks_exact(2) {
                let (ch, attribute) = (cell[0], cell[1]);
                if current != Some(attribute) {
                    out.set_color(&attribute_colours(attribute))?;
                    current = Some(attribute);
                }
                let shown = if ch.is_ascii_graphic() { char::from(ch) } else { ' ' };
                write!(out, "{shown}")?;
            }
            out.reset()?;
            current = None;
            writeln!(out)?;
        }
        if let Some(message) = latest.error.as_deref() {
            out.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true))?;
            writeln!(out, "{message}")?;
            out.reset()?;
        }
        out.flush()
    }
}

impl RenderSink for TerminalScreen {
    fn render(&mut self, display_memory: &[u8], video_mode: u8, now: Duration) {
        let mut latest = self.0.borrow_mut();
        latest.cells.clear();
        latest.cells.extend_from_slice(display_memory);
        latest.video_mode = video_mode;
        latest.drawn_at = now;
        latest.frames += 1;
    }

    fn set_charset(&mut self, width: u32, height: u32, _glyphs: &[u8]) {
        event!(
            Level::DEBUG,
            "ignoring {width}x{height} charset, the terminal has its own"
        );
    }

    fn set_palette(&mut self, colours: &[u32]) {
        event!(
            Level::DEBUG,
            "ignoring {} colour palette, the terminal has its own",
            colours.len()
        );
    }

    fn show_error(&mut self, message: &str) {
        self.0.borrow_mut().error = Some(message.to_string());
    }
}

#[test]
fn keeps_only_the_latest_frame() {
    let screen = TerminalScreen::new();
    let mut sink = screen.clone();
    sink.render(b"A\x07", 3, Duration::from_millis(16));
    sink.render(b"B\x1f", 3, Duration::from_millis(33));
    assert_eq!(screen.frames(), 2);
    assert_eq!(screen.0.borrow().cells, b"B\x1f".to_vec());
}

#[test]
fn attribute_picks_foreground_and_background() {
    let spec = attribute_colours(0x1e);
    assert_eq!(spec.fg(), Some(&Color::Yellow));
    assert_eq!(spec.bg(), Some(&Color::Blue));
    assert!(spec.intense());
}
