use thiserror::Error;

/// Failures while walking sample chains or resolving tokens. Fatal for index
/// construction: no partial index is ever returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("scene range {start}..{end} is invalid for a dataset with {scenes} scenes")]
    SceneRange {
        start: usize,
        end: usize,
        scenes: usize,
    },
    #[error("sample token `{0}` does not resolve in the dataset")]
    UnknownSample(String),
    #[error("sample `{sample}` has no data for channel `{channel}`")]
    MissingChannel { sample: String, channel: String },
    #[error("sample chain visits `{0}` twice")]
    Cycle(String),
    #[error("sample chain is longer than {0} steps")]
    ChainTooLong(usize),
    #[error("sample data token `{0}` does not resolve in the dataset")]
    UnknownSampleData(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("{planes} planes cannot be packed into a {bits}-bit word")]
    PlaneCount { planes: usize, bits: u32 },
    #[error(
        "packed raster has {channels} channel(s) of {bits} bits, \
         one channel of at least {required} bits is required"
    )]
    ChannelDepth {
        channels: u8,
        bits: u32,
        required: usize,
    },
    #[error("plane shape {found:?} does not match {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{what}: expected shape {expected:?}, found {found:?}")]
pub struct ShapeError {
    pub what: &'static str,
    pub expected: Vec<usize>,
    pub found: Vec<usize>,
}

impl ShapeError {
    pub fn new(what: &'static str, expected: &[usize], found: &[usize]) -> Self {
        ShapeError {
            what,
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }

    pub(crate) fn check(what: &'static str, expected: &[usize], found: &[usize]) -> Result<(), Self> {
        if expected == found {
            Ok(())
        } else {
            Err(Self::new(what, expected, found))
        }
    }
}
