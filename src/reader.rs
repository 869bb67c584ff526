//! Lazily-opened iterator over the raw payloads of one record file.
//!
//! [`RecordReader`] composes the frame codec with optional decompression,
//! an optional index, and an optional [`Shard`]:
//!
//! | index | compressed | behaviour |
//! |-------|------------|-----------|
//! | no    | either     | every frame, front to back |
//! | yes   | no         | seeks to each selected entry |
//! | yes   | yes        | streams and keeps the selected frame numbers |
//!
//! The file is opened on the first call to `next()` and closed when the
//! reader is exhausted, fails, or is dropped.
//!
//! # Multi-worker reads
//!
//! Asking for more than one worker without an index is rejected with
//! [`Error::MissingIndex`] at construction: without entry boundaries every
//! worker would read the whole file and records would be duplicated.
//!
//! ```no_run
//! use tfrecord_loader::index::Shard;
//! use tfrecord_loader::reader::{ReaderOptions, RecordReader};
//! # fn main() -> tfrecord_loader::Result<()> {
//! let opts = ReaderOptions::new("train.tfrecord")
//!     .index("train.tfrecord.idx")
//!     .shard(Shard::new(1, 4)?);
//! for payload in RecordReader::new(opts)? {
//!     let payload = payload?;
//!     // ...
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::{Error, Result};
use crate::frame::FrameReader;
use crate::index::{Index, IndexFormat, Shard};
use crate::io::compression::{detect, open_reader, Compression};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Where and how to read one record file.
#[derive(Clone, Debug)]
pub struct ReaderOptions {
    pub data_path: PathBuf,
    pub index_path: Option<PathBuf>,
    pub index_format: IndexFormat,
    pub shard: Option<Shard>,
    pub compression: Compression,
    /// With an index, start at a uniformly random entry and wrap around.
    pub random_start: bool,
    pub seed: Option<u64>,
}

impl ReaderOptions {
    pub fn new(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            index_path: None,
            index_format: IndexFormat::Binary,
            shard: None,
            compression: Compression::Auto,
            random_start: false,
            seed: None,
        }
    }

    #[must_use]
    pub fn index(mut self, path: impl Into<PathBuf>) -> Self {
        self.index_path = Some(path.into());
        self
    }

    #[must_use]
    pub const fn index_format(mut self, format: IndexFormat) -> Self {
        self.index_format = format;
        self
    }

    #[must_use]
    pub const fn shard(mut self, shard: Shard) -> Self {
        self.shard = Some(shard);
        self
    }

    #[must_use]
    pub const fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub const fn random_start(mut self, enabled: bool) -> Self {
        self.random_start = enabled;
        self
    }

    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check the options and load the index they name, if any.
    ///
    /// # Errors
    /// [`Error::Configuration`] for an invalid shard, [`Error::MissingIndex`]
    /// for a multi-worker shard without an index, or any error loading the
    /// index.
    pub fn load_index(&self) -> Result<Option<Arc<Index>>> {
        if let Some(shard) = &self.shard {
            shard.validate()?;
        }
        match &self.index_path {
            Some(path) => Ok(Some(Arc::new(Index::load(path, self.index_format)?))),
            None => {
                let workers = self.shard.map_or(1, |s| s.count);
                if workers > 1 {
                    return Err(Error::MissingIndex {
                        path: self.data_path.clone(),
                        workers,
                    });
                }
                Ok(None)
            }
        }
    }
}

enum Frames {
    File(FrameReader<BufReader<File>>),
    Stream {
        frames: FrameReader<Box<dyn Read>>,
        /// Number of the next frame the stream will produce.
        ordinal: usize,
    },
}

/// Iterator of raw frame payloads from one file.
///
/// Yields `Err` at most once; afterwards the iterator is exhausted.
pub struct RecordReader {
    options: ReaderOptions,
    index: Option<Arc<Index>>,
    /// Entry numbers still to read, in order. `None` reads every frame.
    plan: Option<VecDeque<usize>>,
    frames: Option<Frames>,
    done: bool,
}

impl RecordReader {
    /// Validate `options`, load the index, and prepare to read.
    ///
    /// Nothing is read from the record file until the first `next()`.
    ///
    /// # Errors
    /// See [`ReaderOptions::load_index`].
    pub fn new(options: ReaderOptions) -> Result<Self> {
        let index = options.load_index()?;
        Self::with_index(options, index)
    }

    /// Like [`new`](Self::new) with an index that is already in memory.
    ///
    /// # Errors
    /// [`Error::Configuration`] for an invalid shard, or
    /// [`Error::MissingIndex`] when a multi-worker shard has no index.
    pub fn with_index(options: ReaderOptions, index: Option<Arc<Index>>) -> Result<Self> {
        let shard = options.shard.unwrap_or_else(Shard::whole);
        shard.validate()?;
        if index.is_none() && shard.count > 1 {
            return Err(Error::MissingIndex {
                path: options.data_path.clone(),
                workers: shard.count,
            });
        }

        let plan = index.as_ref().map(|idx| {
            let mut order: VecDeque<usize> = shard.assigned(idx.len()).collect();
            if options.random_start && !order.is_empty() {
                let mut rng = match options.seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_entropy(),
                };
                order.rotate_left(rng.gen_range(0..order.len()));
            }
            order
        });
        if options.random_start && index.is_none() {
            debug!(path = %options.data_path.display(), "random start ignored without an index");
        }

        Ok(Self {
            options,
            index,
            plan,
            frames: None,
            done: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.options.data_path
    }

    /// Frames left to read, when known from the index.
    #[must_use]
    pub fn remaining(&self) -> Option<usize> {
        if self.done {
            return Some(0);
        }
        self.plan.as_ref().map(VecDeque::len)
    }

    fn open(&self) -> Result<Frames> {
        let path = &self.options.data_path;
        let compression = detect(path, self.options.compression)?;
        debug!(path = %path.display(), ?compression, "opening record file");
        if compression.is_compressed() {
            Ok(Frames::Stream {
                frames: FrameReader::new(open_reader(path, compression)?),
                ordinal: 0,
            })
        } else {
            let file = File::open(path).map_err(|e| Error::io(path, e))?;
            Ok(Frames::File(FrameReader::new(BufReader::new(file))))
        }
    }

    fn frames(&mut self) -> Result<&mut Frames> {
        let frames = match self.frames.take() {
            Some(f) => f,
            None => self.open()?,
        };
        Ok(self.frames.insert(frames))
    }

    fn read_sequential(&mut self) -> Result<Option<Vec<u8>>> {
        match self.frames()? {
            Frames::File(frames) => frames.read_frame(),
            Frames::Stream { frames, ordinal } => {
                let payload = frames.read_frame()?;
                *ordinal += 1;
                Ok(payload)
            }
        }
    }

    fn read_entry(&mut self, target: usize) -> Result<Vec<u8>> {
        let entry = self
            .index
            .as_ref()
            .and_then(|idx| idx.get(target))
            .ok_or_else(|| Error::malformed_index(format!("entry {target} out of range")))?;
        let path = self.options.data_path.clone();
        let past_end = || {
            Error::malformed_index(format!(
                "entry {target} at byte {} lies past the end of {}",
                entry.offset,
                path.display()
            ))
        };

        // A compressed stream can only move forward; start over to go back.
        if matches!(self.frames, Some(Frames::Stream { ordinal, .. }) if target < ordinal) {
            self.frames = None;
        }

        let (payload, length) = match self.frames()? {
            Frames::File(frames) => {
                if frames.offset() != entry.offset {
                    frames
                        .get_mut()
                        .seek(SeekFrom::Start(entry.offset))
                        .map_err(|e| Error::io(&path, e))?;
                    frames.reset_position(entry.offset);
                }
                frames.read_frame_with_len()?.ok_or_else(past_end)?
            }
            Frames::Stream { frames, ordinal } => {
                while *ordinal < target {
                    frames.read_frame()?.ok_or_else(past_end)?;
                    *ordinal += 1;
                }
                let frame = frames.read_frame_with_len()?.ok_or_else(past_end)?;
                *ordinal += 1;
                frame
            }
        };
        if length != entry.length {
            return Err(Error::malformed_index(format!(
                "entry {target} records {} bytes but the frame at byte {} in {} is {length}",
                entry.length,
                entry.offset,
                path.display()
            )));
        }
        Ok(payload)
    }

    fn advance(&mut self) -> Result<Option<Vec<u8>>> {
        let target = match &mut self.plan {
            None => return self.read_sequential(),
            Some(plan) => match plan.pop_front() {
                Some(target) => target,
                None => return Ok(None),
            },
        };
        self.read_entry(target).map(Some)
    }

    fn close(&mut self) {
        self.done = true;
        self.frames = None;
    }
}

impl Iterator for RecordReader {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(payload)) => Some(Ok(payload)),
            Ok(None) => {
                self.close();
                None
            }
            Err(e) => {
                self.close();
                Some(Err(e))
            }
        }
    }
}
