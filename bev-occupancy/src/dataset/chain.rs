use crate::dataset::store::{SampleRecord, SampleStore};
use crate::error::IndexError;
use hashbrown::HashSet;
use std::iter::FusedIterator;

/// Lazily follows the `next` relation of a scene, starting at its first
/// sample. A revisited token or a walk longer than the store has samples is
/// reported once as an error, after which the iterator is exhausted.
pub struct SampleChain<'a, S: SampleStore + ?Sized> {
    store: &'a S,
    pending: Option<&'a str>,
    visited: HashSet<&'a str>,
    max_steps: usize,
    failed: bool,
}

impl<'a, S: SampleStore + ?Sized> SampleChain<'a, S> {
    pub fn new(store: &'a S, first_sample_token: &'a str) -> Self {
        SampleChain {
            store,
            pending: Some(first_sample_token),
            visited: HashSet::new(),
            max_steps: store.sample_count(),
            failed: false,
        }
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    fn step(&mut self, token: &'a str) -> Result<&'a SampleRecord, IndexError> {
        let sample = self
            .store
            .sample(token)
            .ok_or_else(|| IndexError::UnknownSample(token.to_string()))?;
        if !self.visited.insert(token) {
            return Err(IndexError::Cycle(token.to_string()));
        }
        if self.visited.len() > self.max_steps {
            return Err(IndexError::ChainTooLong(self.max_steps));
        }
        self.pending = sample.next.as_deref();

        Ok(sample)
    }
}

impl<'a, S: SampleStore + ?Sized> Iterator for SampleChain<'a, S> {
    type Item = Result<&'a SampleRecord, IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let token = self.pending.take()?;

        let result = self.step(token);
        self.failed = result.is_err();
        Some(result)
    }
}

impl<S: SampleStore + ?Sized> FusedIterator for SampleChain<'_, S> {}
