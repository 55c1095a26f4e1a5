//! # Musical Tuning Module
//!
//! Maps a detected frequency onto the nearest equal-tempered note, or onto
//! "no note" when the frequency is not close enough to one or lies outside
//! the tracked instrument range.
//!
//! ## Conventions
//! - A4 = MIDI 69 = 440 Hz
//! - MIDI 0 is C-1; names cycle `C, C#, D, D#, E, F, F#, G, G#, A, A#, B`
//! - The fractional MIDI number is rounded half to even, so a frequency
//!   exactly between two semitones resolves to the even-numbered note

use once_cell::sync::Lazy;

use crate::NoteResult;
use crate::config::QuantizerConfig;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Reference pitch for MIDI note 69.
pub const A4_HZ: f64 = 440.0;

/// A single musical note with its MIDI number, name and tempered frequency.
#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub midi: u8,
    /// Note name with octave (e.g., "A4", "C#3")
    pub name: String,
    /// Equal-tempered frequency in Hz
    pub frequency: f64,
}

/// The 128 MIDI notes, computed once on first use.
static NOTES: Lazy<Vec<Note>> = Lazy::new(|| {
    (0u8..=127)
        .map(|midi| Note {
            midi,
            name: format_note_name(midi as i32),
            frequency: A4_HZ * 2.0_f64.powf((midi as f64 - 69.0) / 12.0),
        })
        .collect()
});

/// Name of MIDI note `midi` with its octave, e.g. `69` -> `"A4"`.
///
/// Defined for every integer, not just the 0-127 MIDI range: `128` is
/// `"G#9"` and `-1` is `"B-2"`.
pub fn format_note_name(midi: i32) -> String {
    let name = NOTE_NAMES[midi.rem_euclid(12) as usize];
    let octave = midi.div_euclid(12) - 1;
    format!("{}{}", name, octave)
}

/// Looks up a note by MIDI number (0-127).
pub fn note_by_midi(midi: i32) -> Option<&'static Note> {
    usize::try_from(midi).ok().and_then(|i| NOTES.get(i))
}

/// Fractional equal-tempered MIDI number of `frequency_hz`.
pub fn midi_note_number(frequency_hz: f64) -> f64 {
    69.0 + 12.0 * (frequency_hz / A4_HZ).log2()
}

/// Frequency-to-note quantizer. Pure and stateless.
#[derive(Debug, Clone, Copy)]
pub struct NoteQuantizer {
    config: QuantizerConfig,
}

impl Default for NoteQuantizer {
    fn default() -> Self {
        Self::new(QuantizerConfig::default())
    }
}

impl NoteQuantizer {
    pub fn new(config: QuantizerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &QuantizerConfig {
        &self.config
    }

    /// Name of the note `frequency_hz` resolves to, if any.
    pub fn note_name(&self, frequency_hz: f64) -> Option<String> {
        if frequency_hz.is_nan() || frequency_hz <= 0.0 {
            return None;
        }
        self.resolve(midi_note_number(frequency_hz), frequency_hz)
            .map(format_note_name)
    }

    /// Decides on a note given the fractional MIDI number `m` of
    /// `frequency_hz`.
    ///
    /// The distance check is inclusive: a frequency exactly
    /// `semitone_tolerance` away still resolves.
    ///
    /// # Returns
    /// * `Some(midi)` - The nearest MIDI note number, which may lie outside
    ///   0-127 when the accepted band does
    /// * `None` - Too far from any note, or outside the accepted band
    pub fn resolve(&self, m: f64, frequency_hz: f64) -> Option<i32> {
        let m_round = m.round_ties_even();
        let in_band = (self.config.min_hz..=self.config.max_hz).contains(&frequency_hz);
        if (m - m_round).abs() <= self.config.semitone_tolerance && in_band {
            Some(m_round as i32)
        } else {
            None
        }
    }

    /// Maps a detected frequency onto a displayable result.
    ///
    /// # Arguments
    /// * `frequency_hz` - Peak frequency from the spectral analyzer
    ///
    /// # Returns
    /// A [`NoteResult`] that always carries `frequency_hz`, with the note
    /// name set only when the frequency is positive, inside the accepted
    /// band and within tolerance of a tempered note.
    pub fn quantize(&self, frequency_hz: f64) -> NoteResult {
        NoteResult {
            note_name: self.note_name(frequency_hz),
            frequency_hz,
        }
    }
}

/// Quantizes with the default tolerance (0.5 semitone) and band
/// (100-440 Hz).
pub fn freq_to_note(frequency_hz: f64) -> Option<String> {
    NoteQuantizer::default().note_name(frequency_hz)
}
