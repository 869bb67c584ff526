//! # tfrecord-loader
//!
//! Reading and writing **TFRecord** files for training pipelines: checksummed
//! framing, the `Example` / `SequenceExample` protobuf records, frame indexes
//! for random access and sharding, bounded-memory shuffling, and weighted
//! sampling across several files.
//!
//! ## Key Features
//!
//! - **Frame codec** - length-prefixed frames with masked CRC32C on both the
//!   length and the payload; corruption is reported with the frame's offset
//! - **Record codec** - encode and decode `Example` and `SequenceExample`
//!   through a [`Schema`](record::Schema) that projects and type-checks fields
//! - **Indexes** - build, save and load `(offset, length)` indexes in binary or
//!   text form, and split them between workers
//! - **Shuffling** - fixed-capacity reservoir shuffle over any iterator
//! - **Sampling** - mix several datasets by weight, finitely or forever
//! - **Gzip** - transparent whole-stream compression (feature `compression-gzip`)
//!
//! ## Quick Start
//!
//! ```
//! use tfrecord_loader::dataset::{ExampleDecoder, RecordDataset};
//! use tfrecord_loader::index::Index;
//! use tfrecord_loader::io::compression::Compression;
//! use tfrecord_loader::reader::ReaderOptions;
//! use tfrecord_loader::record::{Example, FeatureType, Schema};
//! use tfrecord_loader::writer::RecordWriter;
//!
//! # fn main() -> tfrecord_loader::Result<()> {
//! # let dir = tempfile::tempdir()?;
//! # let data = dir.path().join("train.tfrecord");
//! # let index = dir.path().join("train.idx");
//! // Write a file and its index in one pass
//! let mut writer = RecordWriter::create(&data, Compression::None)?;
//! for label in 0..10 {
//!     writer.write_example(&Example::builder().int64("label", [label]).build())?;
//! }
//! let (_, built) = writer.finish()?;
//! built.save(&index, Default::default())?;
//!
//! // Read it back, shuffled, with a typed schema
//! let schema = Schema::new().field("label", FeatureType::Int);
//! let dataset = RecordDataset::new(
//!     ReaderOptions::new(&data).index(&index),
//!     ExampleDecoder::new(schema),
//! )?
//! .shuffle_queue_size(4);
//! let examples = dataset.iter()?.collect::<tfrecord_loader::Result<Vec<Example>>>()?;
//! assert_eq!(examples.len(), 10);
//! # assert_eq!(Index::load(&index, Default::default())?.len(), 10);
//! # Ok(())
//! # }
//! ```
//!
//! ## Layers
//!
//! | module | role |
//! |--------|------|
//! | [`frame`] | bytes ⇄ payloads |
//! | [`record`] | payloads ⇄ `Example` / `SequenceExample` |
//! | [`index`] | frame offsets, persisted, plus [`Shard`](index::Shard) |
//! | [`reader`] / [`writer`] | one file, lazily opened |
//! | [`shuffle`] | approximate shuffling in bounded memory |
//! | [`sampler`] | weighted mixture of restartable sources |
//! | [`dataset`] | decoder + transform + shuffle per file, and multi-split configs |
//!
//! ## Feature Flags
//!
//! - `compression-gzip` (default) - gzip record files via `flate2`
//! - `parallel-io` (default) - index directories in parallel in `tfrecord2idx`
//!
//! ## Logging
//!
//! The library logs through `tracing` (file opens and source removal at
//! `debug`, an underfilled shuffle buffer at `warn`) and installs no
//! subscriber. The `tfrecord2idx` binary logs to stderr, filtered by
//! `RUST_LOG`.

pub mod dataset;
pub mod error;
pub mod frame;
pub mod index;
pub mod io;
pub mod reader;
pub mod record;
pub mod sampler;
pub mod shuffle;
pub mod testing;
pub mod writer;

pub use error::{Error, FrameSegment, Result};
