// Sample catalog and the rotation policy's key checks.
//
// Sample filenames carry the chord they were recorded on as their
// second-to-last `-` field (`rain-loop-CEG-01.wav` is a C-E-G sample). A
// sample is usable under a key when that chord is exactly one of the key's
// chords.
//
// `SampleCatalog` abstracts where the files live: `DirCatalog` lists one
// directory per pool on disk, `MemoryCatalog` holds fixed name lists for
// tests and dry runs. The driver only ever asks for candidates under the
// current vocabulary and picks among those that are not in an instrument's
// recent history, so a search always terminates.

use crate::error::{ConductorError, Result};
use crate::granular::SamplePool;
use crate::instrument::SampleHistory;
use crate::theory::{Chord, parse_note_run};
use rand::Rng;
use rand::seq::IndexedRandom;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Chord token of a sample filename: its second-to-last `-` field.
pub fn chord_token(name: &str) -> Option<&str> {
    let mut fields = name.rsplit('-');
    fields.next()?;
    fields.next()
}

/// The chord a sample was recorded on, if its name encodes one.
pub fn sample_chord(name: &str) -> Option<Chord> {
    chord_token(name).and_then(parse_note_run).map(Chord)
}

/// Whether `sample` is still playable under `vocabulary`. No sample, or one
/// whose name carries no readable chord, is never in key.
pub fn check_still_in_key(sample: Option<&str>, vocabulary: &[Chord]) -> bool {
    sample
        .and_then(sample_chord)
        .is_some_and(|chord| vocabulary.contains(&chord))
}

/// Source of sample files, one collection per pool.
pub trait SampleCatalog {
    /// Every `.wav` file name in `pool`, sorted.
    fn names(&self, pool: SamplePool) -> Result<Vec<String>>;

    /// Full path of `name` inside `pool`.
    fn path(&self, pool: SamplePool, name: &str) -> PathBuf;

    /// Files of `pool` whose chord belongs to `vocabulary`.
    fn candidates(&self, pool: SamplePool, vocabulary: &[Chord]) -> Result<Vec<String>> {
        Ok(self
            .names(pool)?
            .into_iter()
            .filter(|name| check_still_in_key(Some(name), vocabulary))
            .collect())
    }
}

/// Uniform pick among the in-key candidates not in `history`. `None` means
/// the pool is exhausted for this key.
pub fn pick_replacement(
    catalog: &impl SampleCatalog,
    pool: SamplePool,
    vocabulary: &[Chord],
    history: &SampleHistory,
    rng: &mut impl Rng,
) -> Result<Option<String>> {
    let fresh: Vec<String> = catalog
        .candidates(pool, vocabulary)?
        .into_iter()
        .filter(|name| !history.contains(name))
        .collect();
    Ok(fresh.choose(rng).cloned())
}

fn is_wav(name: &str) -> bool {
    Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
}

// ---------------------------------------------------------------------------
// Directory-backed catalog
// ---------------------------------------------------------------------------

/// One directory per pool on the local filesystem.
#[derive(Debug, Clone)]
pub struct DirCatalog {
    dirs: BTreeMap<SamplePool, PathBuf>,
}

impl DirCatalog {
    pub fn new(melodic: PathBuf, vocal: PathBuf, percussive: PathBuf, aggressive: PathBuf) -> Self {
        let dirs = SamplePool::ALL
            .into_iter()
            .zip([melodic, vocal, percussive, aggressive])
            .collect();
        DirCatalog { dirs }
    }

    pub fn dir(&self, pool: SamplePool) -> &Path {
        self.dirs.get(&pool).map_or(Path::new("."), PathBuf::as_path)
    }
}

impl SampleCatalog for DirCatalog {
    fn names(&self, pool: SamplePool) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(self.dir(pool)).map_err(ConductorError::Catalog)? {
            let entry = entry.map_err(ConductorError::Catalog)?;
            match entry.file_name().to_str() {
                Some(name) if is_wav(name) => names.push(name.to_string()),
                _ => {}
            }
        }
        // read_dir order is platform dependent; seeded picks need a fixed one.
        names.sort();
        Ok(names)
    }

    fn path(&self, pool: SamplePool, name: &str) -> PathBuf {
        self.dir(pool).join(name)
    }
}

// ---------------------------------------------------------------------------
// In-memory catalog
// ---------------------------------------------------------------------------

/// Fixed name lists, addressed under a virtual `samples/<pool>/` root.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    pools: BTreeMap<SamplePool, Vec<String>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `names` to `pool`. Non-`.wav` names are ignored, as on disk.
    pub fn with_pool<I, S>(mut self, pool: SamplePool, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list = self.pools.entry(pool).or_default();
        list.extend(names.into_iter().map(Into::into).filter(|n| is_wav(n)));
        list.sort();
        list.dedup();
        self
    }
}

impl SampleCatalog for MemoryCatalog {
    fn names(&self, pool: SamplePool) -> Result<Vec<String>> {
        Ok(self.pools.get(&pool).cloned().unwrap_or_default())
    }

    fn path(&self, pool: SamplePool, name: &str) -> PathBuf {
        PathBuf::from("samples").join(pool.to_string()).join(name)
    }
}
