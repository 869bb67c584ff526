//! Ready-to-iterate datasets over one or many record files.
//!
//! [`RecordDataset`] is a single file (or shard of one) plus a decoder, an
//! optional per-record transform and an optional shuffle buffer. Every call to
//! [`iter`](RecordDataset::iter) starts a fresh pass, which is what lets the
//! sampler restart it in infinite mode.
//!
//! [`MultiRecordDataset`] builds one `RecordDataset` per named split from a
//! [`MultiSourceConfig`] and mixes them with a [`MultiSourceSampler`].
//!
//! ```no_run
//! use tfrecord_loader::dataset::{ExampleDecoder, RecordDataset};
//! use tfrecord_loader::reader::ReaderOptions;
//! use tfrecord_loader::record::{FeatureType, Schema};
//! # fn main() -> tfrecord_loader::Result<()> {
//! let schema = Schema::new()
//!     .field("image", FeatureType::Bytes)
//!     .field("label", FeatureType::Int);
//! let dataset = RecordDataset::new(
//!     ReaderOptions::new("train.tfrecord").index("train.idx"),
//!     ExampleDecoder::new(schema),
//! )?
//! .shuffle_queue_size(256)
//! .seed(42);
//! for example in dataset.iter()? {
//!     let example = example?;
//!     // ...
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::index::{Index, IndexFormat, Shard};
use crate::io::compression::Compression;
use crate::reader::{ReaderOptions, RecordReader};
use crate::record::{Example, Schema, SequenceExample};
use crate::sampler::{MultiSourceSampler, RecordIter, RecordSource, SamplingMode, WeightedSource};
use crate::shuffle::ShuffleExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

/// Turns a raw frame payload into a record.
pub trait RecordDecoder {
    type Record;

    /// # Errors
    /// Returns a decode error when the payload does not fit the decoder.
    fn decode(&self, payload: &[u8]) -> Result<Self::Record>;
}

/// Passes payloads through untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawDecoder;

impl RecordDecoder for RawDecoder {
    type Record = Vec<u8>;

    fn decode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        Ok(payload.to_vec())
    }
}

/// Decodes [`Example`]s through a schema.
#[derive(Clone, Debug, Default)]
pub struct ExampleDecoder {
    pub schema: Schema,
}

impl ExampleDecoder {
    #[must_use]
    pub const fn new(schema: Schema) -> Self {
        Self { schema }
    }
}

impl RecordDecoder for ExampleDecoder {
    type Record = Example;

    fn decode(&self, payload: &[u8]) -> Result<Example> {
        Example::decode(payload, &self.schema)
    }
}

/// Decodes [`SequenceExample`]s through a context and a sequence schema.
#[derive(Clone, Debug, Default)]
pub struct SequenceDecoder {
    pub context: Schema,
    pub sequence: Schema,
}

impl SequenceDecoder {
    #[must_use]
    pub const fn new(context: Schema, sequence: Schema) -> Self {
        Self { context, sequence }
    }
}

impl RecordDecoder for SequenceDecoder {
    type Record = SequenceExample;

    fn decode(&self, payload: &[u8]) -> Result<SequenceExample> {
        SequenceExample::decode(payload, &self.context, &self.sequence)
    }
}

/// Per-record mapping applied after decoding.
pub type Transform<R> = Arc<dyn Fn(R) -> R + Send + Sync>;

/// One record file as a restartable stream of decoded records.
pub struct RecordDataset<D: RecordDecoder> {
    options: ReaderOptions,
    index: Option<Arc<Index>>,
    decoder: Arc<D>,
    transform: Option<Transform<D::Record>>,
    shuffle_queue_size: Option<usize>,
    seed: Option<u64>,
    passes: Arc<AtomicU64>,
}

impl<D: RecordDecoder> Clone for RecordDataset<D> {
    fn clone(&self) -> Self {
        Self {
            options: self.options.clone(),
            index: self.index.clone(),
            decoder: Arc::clone(&self.decoder),
            transform: self.transform.clone(),
            shuffle_queue_size: self.shuffle_queue_size,
            seed: self.seed,
            passes: Arc::clone(&self.passes),
        }
    }
}

impl<D> RecordDataset<D>
where
    D: RecordDecoder + 'static,
    D::Record: 'static,
{
    /// Load the index (if any) once; the record file is only opened per pass.
    ///
    /// # Errors
    /// See [`ReaderOptions::load_index`].
    pub fn new(options: ReaderOptions, decoder: D) -> Result<Self> {
        let index = options.load_index()?;
        Ok(Self {
            seed: options.seed,
            options,
            index,
            decoder: Arc::new(decoder),
            transform: None,
            shuffle_queue_size: None,
            passes: Arc::new(AtomicU64::new(0)),
        })
    }

    #[must_use]
    pub fn transform(mut self, f: impl Fn(D::Record) -> D::Record + Send + Sync + 'static) -> Self {
        self.transform = Some(Arc::new(f));
        self
    }

    /// Shuffle each pass through a buffer of `size` records.
    #[must_use]
    pub const fn shuffle_queue_size(mut self, size: usize) -> Self {
        self.shuffle_queue_size = Some(size);
        self
    }

    /// Seed for shuffling and random start. Pass `n` uses `seed + n`.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.options.data_path
    }

    /// Records per pass for this shard, when an index is available.
    #[must_use]
    pub fn num_records(&self) -> Option<usize> {
        let shard = self.options.shard.unwrap_or_else(Shard::whole);
        self.index
            .as_ref()
            .map(|idx| shard.assigned(idx.len()).count())
    }

    /// Start a new pass.
    ///
    /// # Errors
    /// [`Error::Configuration`] for a zero shuffle queue size. Read and decode
    /// errors surface from the returned iterator.
    pub fn iter(&self) -> Result<RecordIter<D::Record>> {
        let pass = self.passes.fetch_add(1, Ordering::Relaxed);
        let seed = self.seed.map(|s| s.wrapping_add(pass));
        let mut options = self.options.clone();
        options.seed = seed;
        debug!(path = %options.data_path.display(), pass, "starting dataset pass");

        let reader = RecordReader::with_index(options, self.index.clone())?;
        let decoder = Arc::clone(&self.decoder);
        let transform = self.transform.clone();
        let records = reader.map(move |payload| -> Result<D::Record> {
            let record = decoder.decode(&payload?)?;
            Ok(match &transform {
                Some(f) => f(record),
                None => record,
            })
        });

        match self.shuffle_queue_size {
            Some(size) => Ok(Box::new(records.try_shuffled(size, seed)?)),
            None => Ok(Box::new(records)),
        }
    }
}

impl<D> RecordSource<D::Record> for RecordDataset<D>
where
    D: RecordDecoder + 'static,
    D::Record: 'static,
{
    fn open(&self) -> Result<RecordIter<D::Record>> {
        self.iter()
    }
}

const fn default_infinite() -> bool {
    true
}

const fn default_compression() -> Compression {
    Compression::Auto
}

/// Declarative description of a weighted multi-split dataset.
///
/// ```json
/// {
///   "data_pattern": "data/{}.tfrecord",
///   "index_pattern": "data/{}.idx",
///   "splits": {"train": 0.8, "extra": 0.2},
///   "infinite": false,
///   "shuffle_queue_size": 1024
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MultiSourceConfig {
    /// Record file path; `{}` is replaced by the split name.
    pub data_pattern: String,
    #[serde(default)]
    pub index_pattern: Option<String>,
    /// Split name to sampling weight.
    pub splits: BTreeMap<String, f64>,
    #[serde(default = "default_infinite")]
    pub infinite: bool,
    #[serde(default)]
    pub shuffle_queue_size: Option<usize>,
    #[serde(default = "default_compression")]
    pub compression: Compression,
    #[serde(default)]
    pub index_format: IndexFormat,
    #[serde(default)]
    pub shard: Option<Shard>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub random_start: bool,
}

impl MultiSourceConfig {
    /// A config with defaults for everything but the patterns and splits.
    pub fn new(data_pattern: impl Into<String>, splits: BTreeMap<String, f64>) -> Self {
        Self {
            data_pattern: data_pattern.into(),
            index_pattern: None,
            splits,
            infinite: default_infinite(),
            shuffle_queue_size: None,
            compression: default_compression(),
            index_format: IndexFormat::default(),
            shard: None,
            seed: None,
            random_start: false,
        }
    }

    /// # Errors
    /// [`Error::Configuration`] for invalid JSON or an invalid config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid dataset config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    /// [`Error::Io`] if the file cannot be read, otherwise as
    /// [`from_json_str`](Self::from_json_str).
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json_str(&json)
    }

    /// # Errors
    /// [`Error::Configuration`] for empty splits, a negative or non-finite weight,
    /// weights that are all zero, a pattern without `{}` shared by several
    /// splits, a zero shuffle queue size, or a bad shard.
    pub fn validate(&self) -> Result<()> {
        if self.splits.is_empty() {
            return Err(Error::config("dataset config has no splits"));
        }
        for (name, &weight) in &self.splits {
            if !weight.is_finite() || weight < 0.0 {
                return Err(Error::config(format!(
                    "split '{name}' has invalid weight {weight}"
                )));
            }
        }
        if self.splits.values().all(|&w| w == 0.0) {
            return Err(Error::config("every split has zero weight"));
        }
        let patterns = std::iter::once(("data_pattern", Some(&self.data_pattern)))
            .chain(std::iter::once(("index_pattern", self.index_pattern.as_ref())));
        for (what, pattern) in patterns {
            if let Some(pattern) = pattern {
                if self.splits.len() > 1 && !pattern.contains("{}") {
                    return Err(Error::config(format!(
                        "{what} '{pattern}' has no '{{}}' placeholder but there are {} splits",
                        self.splits.len()
                    )));
                }
            }
        }
        if self.shuffle_queue_size == Some(0) {
            return Err(Error::config("shuffle_queue_size must be at least 1"));
        }
        if let Some(shard) = &self.shard {
            shard.validate()?;
        }
        Ok(())
    }

    #[must_use]
    pub const fn mode(&self) -> SamplingMode {
        SamplingMode::from_infinite(self.infinite)
    }

    #[must_use]
    pub fn data_path(&self, split: &str) -> PathBuf {
        PathBuf::from(self.data_pattern.replace("{}", split))
    }

    #[must_use]
    pub fn index_path(&self, split: &str) -> Option<PathBuf> {
        self.index_pattern
            .as_ref()
            .map(|p| PathBuf::from(p.replace("{}", split)))
    }

    /// Reader options for one split.
    #[must_use]
    pub fn reader_options(&self, split: &str) -> ReaderOptions {
        let mut options = ReaderOptions::new(self.data_path(split))
            .index_format(self.index_format)
            .compression(self.compression)
            .random_start(self.random_start);
        options.index_path = self.index_path(split);
        options.shard = self.shard;
        options.seed = self.seed;
        options
    }
}

/// Weighted mixture of per-split [`RecordDataset`]s.
pub struct MultiRecordDataset<D: RecordDecoder> {
    config: MultiSourceConfig,
    splits: Vec<(String, f64, RecordDataset<D>)>,
}

impl<D> MultiRecordDataset<D>
where
    D: RecordDecoder + Clone + 'static,
    D::Record: 'static,
{
    /// Validate `config` and prepare one dataset per split with a positive
    /// weight. Zero-weight splits are never opened and their indexes are not
    /// loaded.
    ///
    /// # Errors
    /// Any configuration or index error of the config or one of its splits.
    pub fn new(config: MultiSourceConfig, decoder: D) -> Result<Self> {
        config.validate()?;
        let mut splits = Vec::with_capacity(config.splits.len());
        for (offset, (name, &weight)) in (0u64..).zip(&config.splits) {
            if weight == 0.0 {
                debug!(split = %name, "skipping zero-weight split");
                continue;
            }
            let mut dataset = RecordDataset::new(config.reader_options(name), decoder.clone())?;
            if let Some(size) = config.shuffle_queue_size {
                dataset = dataset.shuffle_queue_size(size);
            }
            if let Some(seed) = config.seed {
                // Distinct streams per split under one configured seed.
                dataset = dataset.seed(seed.wrapping_add(offset.wrapping_mul(0x9E37_79B9)));
            }
            splits.push((name.clone(), weight, dataset));
        }
        info!(
            splits = splits.len(),
            mode = ?config.mode(),
            "prepared multi-source dataset"
        );
        Ok(Self { config, splits })
    }

    /// Apply `f` to every record of every split.
    #[must_use]
    pub fn transform(mut self, f: impl Fn(D::Record) -> D::Record + Send + Sync + 'static) -> Self {
        let f: Transform<D::Record> = Arc::new(f);
        for (_, _, dataset) in &mut self.splits {
            dataset.transform = Some(Arc::clone(&f));
        }
        self
    }

    #[must_use]
    pub const fn config(&self) -> &MultiSourceConfig {
        &self.config
    }

    /// The dataset behind one split, if it has a positive weight.
    #[must_use]
    pub fn split(&self, name: &str) -> Option<&RecordDataset<D>> {
        self.splits
            .iter()
            .find(|(n, _, _)| n == name)
            .map(|(_, _, dataset)| dataset)
    }

    /// Start sampling across all splits.
    ///
    /// # Errors
    /// [`Error::Configuration`] for invalid weights.
    pub fn iter(&self) -> Result<MultiSourceSampler<D::Record>> {
        let sources: Vec<WeightedSource<D::Record>> = self
            .splits
            .iter()
            .map(|(name, weight, dataset)| {
                let source: Box<dyn RecordSource<D::Record>> = Box::new(dataset.clone());
                (name.clone(), *weight, source)
            })
            .collect();
        MultiSourceSampler::new(sources, self.config.mode(), self.config.seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_and_paths() {
        let config = MultiSourceConfig::from_json_str(
            r#"{"data_pattern": "d/{}.tfrecord", "index_pattern": "d/{}.idx",
                "splits": {"a": 0.8, "b": 0.2}}"#,
        )
        .unwrap();
        assert!(config.infinite);
        assert_eq!(config.mode(), SamplingMode::Infinite);
        assert_eq!(config.compression, Compression::Auto);
        assert_eq!(config.data_path("a"), PathBuf::from("d/a.tfrecord"));
        assert_eq!(config.index_path("b"), Some(PathBuf::from("d/b.idx")));
    }

    #[test]
    fn pattern_without_placeholder_needs_a_single_split() {
        let bad = r#"{"data_pattern": "d/all.tfrecord", "splits": {"a": 1.0, "b": 1.0}}"#;
        assert!(matches!(
            MultiSourceConfig::from_json_str(bad),
            Err(Error::Configuration(_))
        ));
        let ok = r#"{"data_pattern": "d/all.tfrecord", "splits": {"a": 1.0}}"#;
        assert!(MultiSourceConfig::from_json_str(ok).is_ok());
    }

    #[test]
    fn split_weights_are_checked_on_load() {
        for splits in [
            r#"{"a": 0.0, "b": 0.0}"#,
            r#"{"a": 1.0, "b": -0.5}"#,
        ] {
            let json = format!(r#"{{"data_pattern": "d/{{}}.tfrecord", "splits": {splits}}}"#);
            assert!(
                matches!(MultiSourceConfig::from_json_str(&json), Err(Error::Configuration(_))),
                "{splits}"
            );
        }

        let mut splits = BTreeMap::new();
        splits.insert("a".to_string(), f64::NAN);
        let config = MultiSourceConfig::new("d/{}.tfrecord", splits);
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn zero_weight_splits_are_not_opened() {
        let fixture = crate::testing::RecordFixture::new().unwrap();
        fixture.write_payloads("live", [b"x".as_slice()]).unwrap();
        // "off" has neither a record file nor an index on disk.
        let mut splits = BTreeMap::new();
        splits.insert("live".to_string(), 1.0);
        splits.insert("off".to_string(), 0.0);
        let mut config = MultiSourceConfig::new(
            fixture.dir().join("{}.tfrecord").to_string_lossy().into_owned(),
            splits,
        );
        config.index_pattern = Some(fixture.dir().join("{}.idx").to_string_lossy().into_owned());
        config.infinite = false;

        let dataset = MultiRecordDataset::new(config, RawDecoder).unwrap();
        assert!(dataset.split("live").is_some());
        assert!(dataset.split("off").is_none());
        let got: Vec<Vec<u8>> = dataset.iter().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(got, vec![b"x".to_vec()]);
    }

    #[test]
    fn invalid_json_and_zero_queue_are_config_errors() {
        assert!(matches!(
            MultiSourceConfig::from_json_str("{"),
            Err(Error::Configuration(_))
        ));
        let zero = r#"{"data_pattern": "{}", "splits": {"a": 1.0}, "shuffle_queue_size": 0}"#;
        assert!(MultiSourceConfig::from_json_str(zero).is_err());
    }

    #[test]
    fn raw_decoder_copies_payload() {
        assert_eq!(RawDecoder.decode(b"xyz").unwrap(), b"xyz".to_vec());
    }
}
