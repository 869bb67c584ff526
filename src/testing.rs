//! Testing utilities for record pipelines.
//!
//! - **Fixtures**: write record files (and their indexes) into a temporary
//!   directory that is removed on drop.
//! - **Assertions**: compare streams whose order is randomized, and check
//!   empirical proportions of a sampled stream.
//!
//! # Quick Start
//!
//! ```
//! use tfrecord_loader::dataset::{ExampleDecoder, RecordDataset};
//! use tfrecord_loader::reader::ReaderOptions;
//! use tfrecord_loader::testing::*;
//!
//! # fn main() -> tfrecord_loader::Result<()> {
//! let fixture = RecordFixture::new()?;
//! let files = fixture.write_examples("train", &numbered_examples(0..50))?;
//!
//! let dataset = RecordDataset::new(
//!     ReaderOptions::new(&files.data).index(&files.index),
//!     ExampleDecoder::default(),
//! )?
//! .shuffle_queue_size(8)
//! .seed(1);
//! let ids: Vec<i64> = dataset
//!     .iter()?
//!     .map(|e| e.map(|e| example_id(&e).unwrap_or(-1)))
//!     .collect::<tfrecord_loader::Result<_>>()?;
//! assert_same_multiset(&ids, &(0..50).collect::<Vec<_>>());
//! # Ok(())
//! # }
//! ```

pub mod assertions;
pub mod fixtures;

pub use assertions::*;
pub use fixtures::*;
