//! Weighted interleaving of several restartable record streams.
//!
//! Every pull draws one source at random, with probability proportional to
//! its weight among the sources still eligible, and takes that source's next
//! record. What happens when a source runs dry depends on [`SamplingMode`]:
//!
//! - `Infinite`: the source is reopened and keeps its weight, so the mixture
//!   proportions hold forever.
//! - `Finite`: the source is dropped and the rest are renormalized; the
//!   stream ends once every source is spent, having emitted each record of
//!   each positive-weight source exactly once.
//!
//! A source that produces nothing right after being opened is dropped in
//! either mode, since reopening it would spin forever.

use crate::error::{Error, Result};
use rand::SeedableRng;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A boxed, fallible record stream.
pub type RecordIter<T> = Box<dyn Iterator<Item = Result<T>>>;

/// Something that can be read from the start, any number of times.
pub trait RecordSource<T> {
    /// Start a fresh pass over the source.
    ///
    /// # Errors
    /// Implementation specific; typically configuration or I/O errors.
    fn open(&self) -> Result<RecordIter<T>>;
}

impl<T, F> RecordSource<T> for F
where
    F: Fn() -> Result<RecordIter<T>>,
{
    fn open(&self) -> Result<RecordIter<T>> {
        self()
    }
}

impl<T: Clone + 'static> RecordSource<T> for Vec<T> {
    fn open(&self) -> Result<RecordIter<T>> {
        Ok(Box::new(self.clone().into_iter().map(Ok)))
    }
}

/// What to do with a source once it is exhausted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingMode {
    #[default]
    Infinite,
    Finite,
}

impl SamplingMode {
    #[must_use]
    pub const fn from_infinite(infinite: bool) -> Self {
        if infinite { Self::Infinite } else { Self::Finite }
    }
}

/// `(name, weight, source)` as accepted by [`MultiSourceSampler::new`].
pub type WeightedSource<T> = (String, f64, Box<dyn RecordSource<T>>);

struct Slot<T> {
    name: String,
    weight: f64,
    source: Box<dyn RecordSource<T>>,
    iter: Option<RecordIter<T>>,
    /// Nothing has been pulled since the last open.
    fresh: bool,
    removed: bool,
}

impl<T> Slot<T> {
    fn eligible(&self) -> bool {
        !self.removed && self.weight > 0.0
    }
}

/// Weighted mixture over [`RecordSource`]s. See the module docs.
pub struct MultiSourceSampler<T> {
    slots: Vec<Slot<T>>,
    mode: SamplingMode,
    rng: StdRng,
    /// Eligible slot numbers and the distribution over them.
    dist: Option<(Vec<usize>, WeightedIndex<f64>)>,
    done: bool,
}

impl<T> MultiSourceSampler<T> {
    /// # Errors
    /// [`Error::Configuration`] when there are no sources, a name repeats, a
    /// weight is negative or not finite, or every weight is zero.
    pub fn new(sources: Vec<WeightedSource<T>>, mode: SamplingMode, seed: Option<u64>) -> Result<Self> {
        if sources.is_empty() {
            return Err(Error::config("sampler needs at least one source"));
        }
        let mut slots: Vec<Slot<T>> = Vec::with_capacity(sources.len());
        for (name, weight, source) in sources {
            if !weight.is_finite() || weight < 0.0 {
                return Err(Error::config(format!(
                    "weight for source '{name}' must be finite and non-negative, got {weight}"
                )));
            }
            if slots.iter().any(|s| s.name == name) {
                return Err(Error::config(format!("duplicate source name '{name}'")));
            }
            slots.push(Slot {
                name,
                weight,
                source,
                iter: None,
                fresh: false,
                removed: false,
            });
        }
        if slots.iter().all(|s| s.weight == 0.0) {
            return Err(Error::config("at least one source weight must be positive"));
        }

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            slots,
            mode,
            rng,
            dist: None,
            done: false,
        })
    }

    #[must_use]
    pub const fn mode(&self) -> SamplingMode {
        self.mode
    }

    /// Current selection probability of each source, by name.
    ///
    /// Zero-weight and removed sources report 0.0.
    #[must_use]
    pub fn probabilities(&self) -> Vec<(String, f64)> {
        let total: f64 = self
            .slots
            .iter()
            .filter(|s| s.eligible())
            .map(|s| s.weight)
            .sum();
        self.slots
            .iter()
            .map(|s| {
                let p = if s.eligible() && total > 0.0 {
                    s.weight / total
                } else {
                    0.0
                };
                (s.name.clone(), p)
            })
            .collect()
    }

    fn choose(&mut self) -> Result<Option<usize>> {
        if self.dist.is_none() {
            let eligible: Vec<usize> = (0..self.slots.len())
                .filter(|&i| self.slots[i].eligible())
                .collect();
            if eligible.is_empty() {
                return Ok(None);
            }
            let weights = eligible.iter().map(|&i| self.slots[i].weight);
            let dist = WeightedIndex::new(weights).map_err(|e| Error::config(e.to_string()))?;
            self.dist = Some((eligible, dist));
        }
        Ok(self
            .dist
            .as_ref()
            .map(|(eligible, dist)| eligible[dist.sample(&mut self.rng)]))
    }

    fn remove(&mut self, i: usize) {
        let slot = &mut self.slots[i];
        slot.removed = true;
        slot.iter = None;
        self.dist = None;
        debug!(source = %slot.name, "removing exhausted source");
    }

    /// Next record from slot `i`, or `None` if the slot was removed.
    fn pull_from(&mut self, i: usize) -> Result<Option<T>> {
        loop {
            let slot = &mut self.slots[i];
            let iter = match slot.iter.take() {
                Some(iter) => iter,
                None => {
                    debug!(source = %slot.name, "opening source");
                    slot.fresh = true;
                    slot.source.open()?
                }
            };
            let iter = slot.iter.insert(iter);
            match iter.next() {
                Some(Ok(record)) => {
                    slot.fresh = false;
                    return Ok(Some(record));
                }
                Some(Err(e)) => return Err(e),
                None => {
                    if slot.fresh || self.mode == SamplingMode::Finite {
                        self.remove(i);
                        return Ok(None);
                    }
                    slot.iter = None;
                }
            }
        }
    }

    fn advance(&mut self) -> Result<Option<T>> {
        while let Some(i) = self.choose()? {
            if let Some(record) = self.pull_from(i)? {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }
}

impl<T> Iterator for MultiSourceSampler<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.advance() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
