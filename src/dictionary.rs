use crate::config::DICTIONARY_VERSION;
use crate::models::TermCount;
use anyhow::{bail, Context, Result};
use bincode::Options;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Index that terms are written into.
///
/// A handle is used from a single thread. `close` releases it and is called
/// exactly once, by [`DictionaryScope`].
pub trait Dictionary<T> {
    fn add_term(&mut self, term: T) -> Result<()>;

    fn optimize(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

/// Owns an open dictionary and closes it on every exit path.
///
/// `finish` closes explicitly and surfaces the error; otherwise the handle is
/// closed on drop and a failure is only logged.
pub struct DictionaryScope<T, D: Dictionary<T>> {
    dictionary: Option<D>,
    _term: PhantomData<fn(T)>,
}

impl<T, D: Dictionary<T>> DictionaryScope<T, D> {
    pub fn new(dictionary: D) -> Self {
        Self {
            dictionary: Some(dictionary),
            _term: PhantomData,
        }
    }

    pub fn finish(mut self) -> Result<()> {
        match self.dictionary.take() {
            Some(mut dictionary) => dictionary.close().context("Failed to close dictionary"),
            None => Ok(()),
        }
    }
}

impl<T, D: Dictionary<T>> Deref for DictionaryScope<T, D> {
    type Target = D;

    fn deref(&self) -> &D {
        self.dictionary
            .as_ref()
            .unwrap_or_else(|| unreachable!("dictionary is only taken by finish"))
    }
}

impl<T, D: Dictionary<T>> DerefMut for DictionaryScope<T, D> {
    fn deref_mut(&mut self) -> &mut D {
        self.dictionary
            .as_mut()
            .unwrap_or_else(|| unreachable!("dictionary is only taken by finish"))
    }
}

impl<T, D: Dictionary<T>> Drop for DictionaryScope<T, D> {
    fn drop(&mut self) {
        if let Some(mut dictionary) = self.dictionary.take() {
            if let Err(e) = dictionary.close() {
                warn!(error = %e, "Failed to close dictionary during unwind");
            }
        }
    }
}

#[derive(Serialize, Deserialize)]
struct DictionaryFile {
    version: u32,
    optimized: bool,
    terms: Vec<(String, u64)>,
}

/// File-backed term -> count dictionary.
///
/// Counts live in memory while the handle is open and are written atomically
/// (temp file + rename) on close. `optimize` prunes rare terms and exports a
/// ranked `terms.csv` next to the dictionary file.
pub struct TermDictionary {
    dir: PathBuf,
    counts: FxHashMap<String, u64>,
    min_count: u64,
    optimized: bool,
    dirty: bool,
}

impl TermDictionary {
    pub fn dictionary_path(dir: &Path) -> PathBuf {
        dir.join("dictionary.bin")
    }

    pub fn export_path(dir: &Path) -> PathBuf {
        dir.join("terms.csv")
    }

    /// Opens the dictionary in `dir`, loading any previously saved terms.
    pub fn open(dir: &Path, min_count: u64) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create dictionary directory: {:?}", dir))?;

        let path = Self::dictionary_path(dir);
        let (counts, optimized) = if path.exists() {
            let file = load_file(&path)?;
            (file.terms.into_iter().collect(), file.optimized)
        } else {
            (FxHashMap::default(), false)
        };

        debug!(path = ?path, terms = counts.len(), "Dictionary opened");

        Ok(Self {
            dir: dir.to_path_buf(),
            counts,
            min_count: min_count.max(1),
            optimized,
            dirty: false,
        })
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn count(&self, term: &str) -> u64 {
        self.counts.get(term).copied().unwrap_or(0)
    }

    pub fn is_optimized(&self) -> bool {
        self.optimized
    }

    /// Terms ordered by descending count, ties broken alphabetically.
    pub fn ranked(&self) -> Vec<TermCount> {
        let mut terms: Vec<TermCount> = self
            .counts
            .iter()
            .map(|(term, &count)| TermCount {
                term: term.clone(),
                count,
            })
            .collect();
        terms.sort_unstable_by(|a, b| b.count.cmp(&a.count).then_with(|| a.term.cmp(&b.term)));
        terms
    }

    pub fn top(&self, n: usize) -> Vec<TermCount> {
        let mut ranked = self.ranked();
        ranked.truncate(n);
        ranked
    }

    fn save(&self) -> Result<()> {
        let path = Self::dictionary_path(&self.dir);
        let file = DictionaryFile {
            version: DICTIONARY_VERSION,
            optimized: self.optimized,
            terms: self
                .ranked()
                .into_iter()
                .map(|tc| (tc.term, tc.count))
                .collect(),
        };

        let tmp_path = path.with_extension("bin.tmp");
        let out = File::create(&tmp_path)
            .with_context(|| format!("Failed to create temp dictionary file: {:?}", tmp_path))?;
        let writer = BufWriter::new(out);

        bincode::DefaultOptions::new()
            .serialize_into(writer, &file)
            .context("Failed to serialize dictionary")?;

        fs::rename(&tmp_path, &path)
            .with_context(|| format!("Failed to rename temp dictionary file to: {:?}", path))?;

        debug!(path = ?path, terms = file.terms.len(), "Dictionary saved");
        Ok(())
    }

    fn export_csv(&self) -> Result<usize> {
        let path = Self::export_path(&self.dir);
        let mut writer = csv::Writer::from_writer(BufWriter::with_capacity(
            128 * 1024,
            File::create(&path).with_context(|| format!("Failed to create: {:?}", path))?,
        ));
        let ranked = self.ranked();
        if ranked.is_empty() {
            writer.write_record(["term", "count"])?;
        }
        for term in &ranked {
            writer.serialize(term)?;
        }
        writer.flush()?;
        Ok(ranked.len())
    }
}

fn load_file(path: &Path) -> Result<DictionaryFile> {
    let file_size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let file = File::open(path).with_context(|| format!("Failed to open dictionary: {:?}", path))?;
    let reader = BufReader::with_capacity(256 * 1024, file);

    let options = bincode::options().with_limit(file_size.saturating_add(1024));
    let file: DictionaryFile = options
        .deserialize_from(reader)
        .with_context(|| format!("Dictionary file is corrupt: {:?}", path))?;

    if file.version != DICTIONARY_VERSION {
        bail!(
            "Dictionary version mismatch in {:?}: found {}, expected {}",
            path,
            file.version,
            DICTIONARY_VERSION
        );
    }
    Ok(file)
}

impl Dictionary<String> for TermDictionary {
    fn add_term(&mut self, term: String) -> Result<()> {
        if term.trim().is_empty() {
            bail!("Refusing to insert an empty term");
        }
        *self.counts.entry(term).or_insert(0) += 1;
        self.optimized = false;
        self.dirty = true;
        Ok(())
    }

    fn optimize(&mut self) -> Result<()> {
        let before = self.counts.len();
        let min_count = self.min_count;
        self.counts.retain(|_, count| *count >= min_count);
        self.counts.shrink_to_fit();
        let exported = self.export_csv()?;
        self.optimized = true;
        self.dirty = true;

        info!(
            before,
            after = exported,
            min_count,
            "Dictionary optimized"
        );
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.dirty {
            self.save()?;
            self.dirty = false;
        }
        Ok(())
    }
}
