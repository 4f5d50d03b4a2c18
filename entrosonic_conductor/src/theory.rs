// Music theory for the conductor: notes, keys, chords, and key modulation.
//
// The performance stays in one major or minor key at a time. A key yields a
// seven-note diatonic set, the diatonic set yields a 28-chord vocabulary
// (single notes, fifths, triads, sevenths on every degree), and keys are
// linked in a circle-of-fifths graph that the melodic planner walks when the
// entropy signal jumps.
//
// Notes are pitch classes ordered on a chromatic cycle starting at A, the
// same order the sample library uses in its chord tokens. Each pitch class
// maps to a low MIDI onset (A = 33) from which octave copies are derived by
// `quantize_pitches`.
//
// Used by melodic.rs (key walk), samples.rs (chord tokens in filenames) and
// driver.rs (cloud and bass pitch selection).

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the twelve pitch classes, in chromatic-cycle order from A.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Note {
    A,
    #[serde(rename = "A#")]
    ASharp,
    B,
    C,
    #[serde(rename = "C#")]
    CSharp,
    D,
    #[serde(rename = "D#")]
    DSharp,
    E,
    F,
    #[serde(rename = "F#")]
    FSharp,
    G,
    #[serde(rename = "G#")]
    GSharp,
}

impl Note {
    /// The chromatic cycle. Index arithmetic mod 12 walks semitones.
    pub const CHROMATIC: [Note; 12] = [
        Note::A,
        Note::ASharp,
        Note::B,
        Note::C,
        Note::CSharp,
        Note::D,
        Note::DSharp,
        Note::E,
        Note::F,
        Note::FSharp,
        Note::G,
        Note::GSharp,
    ];

    /// Position on the chromatic cycle (A = 0).
    pub fn index(self) -> usize {
        self as usize
    }

    /// The note `semitones` above this one, wrapping around the cycle.
    pub fn transpose(self, semitones: usize) -> Note {
        Note::CHROMATIC[(self.index() + semitones) % 12]
    }

    /// Lowest MIDI pitch of this pitch class used as the quantization
    /// reference (A1 = 33 through G#2 = 44).
    pub fn midi_onset(self) -> u8 {
        33 + self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Note::A => "A",
            Note::ASharp => "A#",
            Note::B => "B",
            Note::C => "C",
            Note::CSharp => "C#",
            Note::D => "D",
            Note::DSharp => "D#",
            Note::E => "E",
            Note::F => "F",
            Note::FSharp => "F#",
            Note::G => "G",
            Note::GSharp => "G#",
        }
    }

    /// Parse a note name such as `"C"` or `"F#"`.
    pub fn from_name(name: &str) -> Option<Note> {
        Note::CHROMATIC.iter().copied().find(|n| n.name() == name)
    }
}

impl fmt::Display for Note {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Split a compact chord token like `"CEG"` or `"A#DF"` into notes. A `#`
/// attaches to the letter before it. Returns `None` on any unknown symbol.
pub fn parse_note_run(token: &str) -> Option<Vec<Note>> {
    let mut notes = Vec::new();
    let mut chars = token.chars().peekable();
    while let Some(letter) = chars.next() {
        let mut name = String::from(letter);
        if chars.peek() == Some(&'#') {
            chars.next();
            name.push('#');
        }
        notes.push(Note::from_name(&name)?);
    }
    if notes.is_empty() { None } else { Some(notes) }
}

/// Major or minor tonality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Major,
    Minor,
}

impl Mode {
    /// Semitone steps above the root for diatonic degrees 2 through 7.
    pub fn steps(self) -> [usize; 6] {
        match self {
            Mode::Major => [2, 4, 5, 7, 9, 11],
            Mode::Minor => [2, 3, 5, 7, 8, 10],
        }
    }
}

/// A key: root pitch class plus mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    pub root: Note,
    pub mode: Mode,
}

impl Key {
    pub fn new(root: Note, mode: Mode) -> Self {
        Key { root, mode }
    }

    /// Every key on the circle of fifths: twelve major then twelve minor.
    pub fn all() -> Vec<Key> {
        [Mode::Major, Mode::Minor]
            .into_iter()
            .flat_map(|mode| Note::CHROMATIC.into_iter().map(move |root| Key::new(root, mode)))
            .collect()
    }

    /// Circle-of-fifths neighbors: the same-mode keys a fourth and a fifth
    /// above, and the relative key of the other mode.
    ///
    /// C major → F major, G major, A minor.
    /// A minor → D minor, E minor, C major.
    pub fn neighbors(self) -> [Key; 3] {
        let relative = match self.mode {
            Mode::Major => Key::new(self.root.transpose(9), Mode::Minor),
            Mode::Minor => Key::new(self.root.transpose(3), Mode::Major),
        };
        [
            Key::new(self.root.transpose(5), self.mode),
            Key::new(self.root.transpose(7), self.mode),
            relative,
        ]
    }

    /// The seven diatonic notes, root first.
    pub fn diatonic_notes(self) -> Vec<Note> {
        let mut notes = Vec::with_capacity(7);
        notes.push(self.root);
        notes.extend(self.mode.steps().iter().map(|&s| self.root.transpose(s)));
        notes
    }

    /// The chord vocabulary of this key (28 chords).
    pub fn chords(self) -> Vec<Chord> {
        chord_vocabulary(&self.diatonic_notes())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.mode {
            Mode::Major => "major",
            Mode::Minor => "minor",
        };
        write!(f, "{} {}", self.root, mode)
    }
}

/// An ordered set of notes drawn from a key's diatonic set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chord(pub Vec<Note>);

impl Chord {
    pub fn notes(&self) -> &[Note] {
        &self.0
    }
}

impl fmt::Display for Chord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for note in &self.0 {
            f.write_str(note.name())?;
        }
        Ok(())
    }
}

/// Build the chord vocabulary for a note set: on every degree i, the single
/// note, the fifth {i, i+4}, the triad {i, i+2, i+4} and the seventh
/// {i, i+2, i+4, i+6}, indices taken mod the set size.
pub fn chord_vocabulary(notes: &[Note]) -> Vec<Chord> {
    let n = notes.len();
    let mut chords = Vec::with_capacity(n * 4);
    for i in 0..n {
        let at = |offset: usize| notes[(i + offset) % n];
        chords.push(Chord(vec![at(0)]));
        chords.push(Chord(vec![at(0), at(4)]));
        chords.push(Chord(vec![at(0), at(2), at(4)]));
        chords.push(Chord(vec![at(0), at(2), at(4), at(6)]));
    }
    chords
}

/// All MIDI pitches in `[low, high)` that belong to one of `notes`, grouped
/// per note in the given order.
pub fn quantize_pitches(notes: &[Note], low: i32, high: i32) -> Vec<u8> {
    let mut pitches = Vec::new();
    for note in notes {
        let onset = note.midi_onset() as i32;
        pitches.extend(
            (low.max(0)..high.min(128))
                .filter(|p| (p - onset).rem_euclid(12) == 0)
                .map(|p| p as u8),
        );
    }
    pitches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_major_diatonic() {
        let notes = Key::new(Note::C, Mode::Major).diatonic_notes();
        assert_eq!(
            notes,
            vec![Note::C, Note::D, Note::E, Note::F, Note::G, Note::A, Note::B]
        );
    }

    #[test]
    fn test_a_minor_diatonic() {
        let notes = Key::new(Note::A, Mode::Minor).diatonic_notes();
        assert_eq!(
            notes,
            vec![Note::A, Note::B, Note::C, Note::D, Note::E, Note::F, Note::G]
        );
    }

    #[test]
    fn test_vocabulary_has_28_chords_for_every_key() {
        for key in Key::all() {
            assert_eq!(key.chords().len(), 28, "{key}");
        }
    }

    #[test]
    fn test_vocabulary_shapes() {
        let chords = Key::new(Note::C, Mode::Major).chords();
        assert_eq!(chords[0], Chord(vec![Note::C]));
        assert_eq!(chords[1], Chord(vec![Note::C, Note::G]));
        assert_eq!(chords[2], Chord(vec![Note::C, Note::E, Note::G]));
        assert_eq!(chords[3], Chord(vec![Note::C, Note::E, Note::G, Note::B]));
        // Degree 7 wraps: B D F A
        assert_eq!(chords[27], Chord(vec![Note::B, Note::D, Note::F, Note::A]));
    }

    #[test]
    fn test_circle_neighbors() {
        let c = Key::new(Note::C, Mode::Major);
        assert_eq!(
            c.neighbors(),
            [
                Key::new(Note::F, Mode::Major),
                Key::new(Note::G, Mode::Major),
                Key::new(Note::A, Mode::Minor),
            ]
        );
        let a = Key::new(Note::A, Mode::Minor);
        assert_eq!(
            a.neighbors(),
            [
                Key::new(Note::D, Mode::Minor),
                Key::new(Note::E, Mode::Minor),
                Key::new(Note::C, Mode::Major),
            ]
        );
    }

    #[test]
    fn test_neighbors_never_self_and_stay_on_circle() {
        let all = Key::all();
        assert_eq!(all.len(), 24);
        for key in &all {
            for n in key.neighbors() {
                assert_ne!(n, *key);
                assert!(all.contains(&n));
            }
        }
    }

    #[test]
    fn test_parse_note_run() {
        assert_eq!(parse_note_run("CEG"), Some(vec![Note::C, Note::E, Note::G]));
        assert_eq!(
            parse_note_run("A#DF"),
            Some(vec![Note::ASharp, Note::D, Note::F])
        );
        assert_eq!(parse_note_run("CXG"), None);
        assert_eq!(parse_note_run(""), None);
    }

    #[test]
    fn test_quantize_pitches() {
        // C onsets at 36: 48 and 60 fall in [40, 62).
        assert_eq!(quantize_pitches(&[Note::C], 40, 62), vec![48, 60]);
        // Upper bound is exclusive.
        assert_eq!(quantize_pitches(&[Note::C], 48, 60), vec![48]);
        // Grouped per note, in chord order.
        assert_eq!(quantize_pitches(&[Note::E, Note::C], 48, 64), vec![52, 48, 60]);
    }

    #[test]
    fn test_key_serde_names() {
        let key = Key::new(Note::FSharp, Mode::Minor);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, r##"{"root":"F#","mode":"minor"}"##);
        let back: Key = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
