use crate::dataset::chain::SampleChain;
use crate::dataset::store::{DataToken, SampleRecord, SampleStore};
use crate::error::IndexError;
use log::{debug, info};
use std::ops::Index;

/// Ordered data tokens of one sensor channel, scene by scene in temporal
/// order. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetIndex {
    tokens: Vec<DataToken>,
}

fn channel_token(sample: &SampleRecord, channel: &str) -> Result<DataToken, IndexError> {
    sample
        .data
        .get(channel)
        .cloned()
        .ok_or_else(|| IndexError::MissingChannel {
            sample: sample.token.clone(),
            channel: channel.to_string(),
        })
}

impl DatasetIndex {
    /// Indexes scenes `start..end` of the store. An empty range gives an empty
    /// index; any unresolvable or cyclic chain aborts the whole build.
    pub fn build<S: SampleStore + ?Sized>(
        store: &S,
        start: usize,
        end: usize,
        channel: &str,
    ) -> Result<Self, IndexError> {
        let scenes = store.scenes();
        if start > end || end > scenes.len() {
            return Err(IndexError::SceneRange {
                start,
                end,
                scenes: scenes.len(),
            });
        }

        let mut tokens = Vec::new();
        for scene in &scenes[start..end] {
            let before = tokens.len();
            for sample in SampleChain::new(store, &scene.first_sample_token) {
                tokens.push(channel_token(sample?, channel)?);
            }
            debug!(
                "Scene {} contributed {} samples",
                scene.name,
                tokens.len() - before
            );
        }
        info!(
            "Indexed {} {} samples from scenes {}..{}",
            tokens.len(),
            channel,
            start,
            end
        );

        Ok(DatasetIndex { tokens })
    }

    /// Indexes an explicit list of sample tokens, e.g. a split file.
    pub fn from_sample_tokens<S, I>(store: &S, sample_tokens: I, channel: &str) -> Result<Self, IndexError>
    where
        S: SampleStore + ?Sized,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let tokens = sample_tokens
            .into_iter()
            .map(|token| {
                let token = token.as_ref();
                let sample = store
                    .sample(token)
                    .ok_or_else(|| IndexError::UnknownSample(token.to_string()))?;
                channel_token(sample, channel)
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!("Indexed {} {} samples from a token list", tokens.len(), channel);

        Ok(DatasetIndex { tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.tokens.get(index).map(String::as_str)
    }

    pub fn tokens(&self) -> &[DataToken] {
        &self.tokens
    }
}

impl Index<usize> for DatasetIndex {
    type Output = str;

    fn index(&self, index: usize) -> &Self::Output {
        &self.tokens[index]
    }
}
