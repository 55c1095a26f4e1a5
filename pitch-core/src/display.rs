//! # Display Module
//!
//! Output sinks for detection results: a fixed-geometry character display
//! and an optional addressable LED strip used as a frequency level bar.
//! Sinks are best-effort; their errors are reported to the caller, which
//! logs them and keeps going.

use std::io::Write;

use crate::NoteResult;
use crate::config::StripConfig;
use crate::error::RenderError;

/// Placeholder shown when no note could be resolved.
pub const NO_NOTE: &str = "--";

/// A character display of `rows` x `cols` cells.
pub trait DisplaySink {
    fn clear(&mut self) -> Result<(), RenderError>;

    /// Writes `text`, already padded to `width` columns, on row `row`.
    fn write_line(&mut self, row: usize, text: &str, width: usize) -> Result<(), RenderError>;
}

/// 8-bit RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb { r: 0, g: 0, b: 0 };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

/// A strip of addressable pixels. Writes are buffered until `flush`.
pub trait IlluminationSink {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn set_pixel(&mut self, index: usize, color: Rgb) -> Result<(), RenderError>;

    fn flush(&mut self) -> Result<(), RenderError>;

    /// Turns every pixel off and pushes the change out.
    fn reset(&mut self) -> Result<(), RenderError> {
        for index in 0..self.len() {
            self.set_pixel(index, Rgb::OFF)?;
        }
        self.flush()
    }
}

impl<S: IlluminationSink + ?Sized> IlluminationSink for Box<S> {
    fn len(&self) -> usize {
        (**self).len()
    }

    fn set_pixel(&mut self, index: usize, color: Rgb) -> Result<(), RenderError> {
        (**self).set_pixel(index, color)
    }

    fn flush(&mut self) -> Result<(), RenderError> {
        (**self).flush()
    }
}

/// Pads `text` with spaces to exactly `width` characters, truncating if
/// longer.
pub fn fit_to_width(text: &str, width: usize) -> String {
    let truncated: String = text.chars().take(width).collect();
    format!("{:<width$}", truncated, width = width)
}

/// The two display lines for a result: note name (or placeholder) and the
/// detected frequency.
pub fn format_lines(result: &NoteResult, width: usize) -> [String; 2] {
    let note = result.note_name.as_deref().unwrap_or(NO_NOTE);
    [
        fit_to_width(note, width),
        fit_to_width(&format!("{:5.1} Hz", result.frequency_hz), width),
    ]
}

/// Clears `display` and writes the lines of `result`.
pub fn show_result<D: DisplaySink + ?Sized>(
    display: &mut D,
    result: &NoteResult,
    width: usize,
) -> Result<(), RenderError> {
    display.clear()?;
    for (row, line) in format_lines(result, width).iter().enumerate() {
        display.write_line(row, line, width)?;
    }
    Ok(())
}

/// Converts HSV (all components in `[0, 1]`) to 8-bit RGB.
pub fn hsv_to_rgb(h: f64, s: f64, v: f64) -> Rgb {
    let to_u8 = |x: f64| (x * 255.0) as u8;
    if s == 0.0 {
        return Rgb::new(to_u8(v), to_u8(v), to_u8(v));
    }
    let sector = (h * 6.0).floor();
    let f = h * 6.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));
    let (r, g, b) = match (sector as i64).rem_euclid(6) {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    Rgb::new(to_u8(r), to_u8(g), to_u8(b))
}

/// Fraction of the strip to light for `frequency_hz`, in `[0, 1]`.
pub fn level_fraction(frequency_hz: f64, ceiling_hz: f64) -> f64 {
    if frequency_hz.is_nan() {
        return 0.0;
    }
    frequency_hz.clamp(0.0, ceiling_hz) / ceiling_hz
}

/// Colors of a level bar: the first `fraction * pixels` pixels carry a
/// rainbow hue gradient across the strip, the rest are off.
pub fn level_bar(frequency_hz: f64, strip: &StripConfig) -> Vec<Rgb> {
    let lit = (level_fraction(frequency_hz, strip.ceiling_hz) * strip.pixels as f64) as usize;
    (0..strip.pixels)
        .map(|i| {
            if i < lit {
                hsv_to_rgb(i as f64 / strip.pixels as f64, 1.0, 1.0)
            } else {
                Rgb::OFF
            }
        })
        .collect()
}

/// Writes the level bar for `frequency_hz` and flushes it.
pub fn show_level<S: IlluminationSink + ?Sized>(
    sink: &mut S,
    frequency_hz: f64,
    strip: &StripConfig,
) -> Result<(), RenderError> {
    for (index, color) in level_bar(frequency_hz, strip).into_iter().enumerate() {
        sink.set_pixel(index, color)?;
    }
    sink.flush()
}

/// Owns an illumination sink and switches it off when dropped, on every
/// exit path.
pub struct IlluminationGuard<S: IlluminationSink> {
    sink: S,
}

impl<S: IlluminationSink> IlluminationGuard<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

impl<S: IlluminationSink> Drop for IlluminationGuard<S> {
    fn drop(&mut self) {
        match self.sink.reset() {
            Ok(()) => tracing::debug!("Illumination reset to off"),
            Err(e) => tracing::error!("Failed to reset illumination: {}", e),
        }
    }
}

/// Renders display rows as plain text lines on a writer (usually stdout).
pub struct TerminalDisplay<W: Write> {
    out: W,
    rows: usize,
    cols: usize,
}

impl<W: Write> TerminalDisplay<W> {
    pub fn new(out: W, rows: usize, cols: usize) -> Self {
        Self { out, rows, cols }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> DisplaySink for TerminalDisplay<W> {
    fn clear(&mut self) -> Result<(), RenderError> {
        writeln!(self.out, "+{}+", "-".repeat(self.cols))?;
        Ok(())
    }

    fn write_line(&mut self, row: usize, text: &str, width: usize) -> Result<(), RenderError> {
        if row >= self.rows {
            return Err(RenderError::RowOutOfRange { row, rows: self.rows });
        }
        writeln!(self.out, "|{}|", fit_to_width(text, width))?;
        self.out.flush()?;
        Ok(())
    }
}

/// Draws a strip as a row of 24-bit ANSI colored blocks, one per pixel.
pub struct TerminalStrip<W: Write> {
    out: W,
    pixels: Vec<Rgb>,
}

impl<W: Write> TerminalStrip<W> {
    pub fn new(out: W, len: usize) -> Self {
        Self {
            out,
            pixels: vec![Rgb::OFF; len],
        }
    }
}

impl<W: Write> IlluminationSink for TerminalStrip<W> {
    fn len(&self) -> usize {
        self.pixels.len()
    }

    fn set_pixel(&mut self, index: usize, color: Rgb) -> Result<(), RenderError> {
        let len = self.pixels.len();
        let pixel = self
            .pixels
            .get_mut(index)
            .ok_or(RenderError::PixelOutOfRange { index, len })?;
        *pixel = color;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), RenderError> {
        let mut line = String::with_capacity(self.pixels.len() * 20);
        for p in &self.pixels {
            line.push_str(&format!("\x1b[38;2;{};{};{}m\u{2588}", p.r, p.g, p.b));
        }
        line.push_str("\x1b[0m");
        writeln!(self.out, "{}", line)?;
        self.out.flush()?;
        Ok(())
    }
}
