//! Packed occupancy labels.
//!
//! Every pixel of a label raster is an unsigned integer whose bits are
//! independent boolean planes. With `P` total planes, plane `i` lives in bit
//! `P - 1 - i`, so the first class is the most significant used bit. The last
//! plane (bit 0) flags cells outside the observed sensor range; it is exposed
//! inverted, as a [`ValidityMask`] that is `true` for observed cells.

use crate::error::CodecError;
use bitvec::prelude::*;
use log::debug;
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis, Zip};
use num::{PrimInt, Unsigned};
use rayon::prelude::*;
use std::marker::PhantomData;

/// Per-cell observation flags, row-major over `(height, width)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidityMask {
    height: usize,
    width: usize,
    bits: BitVec,
}

impl ValidityMask {
    pub fn new(height: usize, width: usize, bits: BitVec) -> Result<Self, CodecError> {
        if bits.len() != height * width {
            return Err(CodecError::ShapeMismatch {
                expected: vec![height * width],
                found: vec![bits.len()],
            });
        }
        Ok(ValidityMask {
            height,
            width,
            bits,
        })
    }

    pub fn all_valid(height: usize, width: usize) -> Self {
        ValidityMask {
            height,
            width,
            bits: bitvec![1; height * width],
        }
    }

    pub fn from_plane(plane: ArrayView2<bool>) -> Self {
        let (height, width) = plane.dim();
        ValidityMask {
            height,
            width,
            bits: plane.iter().copied().collect(),
        }
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// `(height, width)`.
    pub fn dim(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn get(&self, y: usize, x: usize) -> bool {
        self.bits[y * self.width + x]
    }

    pub fn count_valid(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn to_plane(&self) -> Array2<bool> {
        Array2::from_shape_fn(self.dim(), |(y, x)| self.get(y, x))
    }

    /// Signed plane for the evaluator: `1` keeps a cell, `-1` ignores it.
    pub fn to_ignore_plane(&self) -> Array2<i8> {
        Array2::from_shape_fn(self.dim(), |(y, x)| if self.get(y, x) { 1 } else { -1 })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelPlanes {
    /// `(classes, height, width)`.
    pub classes: Array3<bool>,
    pub validity: ValidityMask,
}

/// Packs `total_planes` boolean planes into one word of type `T` per pixel.
#[derive(Debug, Clone, Copy)]
pub struct OccupancyCodec<T = u16> {
    total_planes: usize,
    _storage: PhantomData<T>,
}

impl<T> OccupancyCodec<T>
where
    T: PrimInt + Unsigned + Send + Sync,
{
    pub fn storage_bits() -> u32 {
        T::zero().count_zeros()
    }

    /// `total_planes` counts the class planes plus the validity plane.
    pub fn new(total_planes: usize) -> Result<Self, CodecError> {
        let bits = Self::storage_bits();
        if total_planes == 0 || total_planes > bits as usize {
            return Err(CodecError::PlaneCount {
                planes: total_planes,
                bits,
            });
        }

        Ok(OccupancyCodec {
            total_planes,
            _storage: PhantomData,
        })
    }

    pub fn for_classes(num_classes: usize) -> Result<Self, CodecError> {
        Self::new(num_classes + 1)
    }

    pub fn total_planes(&self) -> usize {
        self.total_planes
    }

    pub fn num_classes(&self) -> usize {
        self.total_planes - 1
    }

    /// Rejects rasters that cannot hold every plane.
    pub fn check_depth(&self, channels: u8, bits: u32) -> Result<(), CodecError> {
        if channels != 1 || (bits as usize) < self.total_planes {
            return Err(CodecError::ChannelDepth {
                channels,
                bits,
                required: self.total_planes,
            });
        }
        Ok(())
    }

    fn plane_bit(&self, plane: usize) -> T {
        T::one() << (self.total_planes - 1 - plane)
    }

    /// Bits above the highest plane are ignored. Class bits of unobserved
    /// cells are decoded verbatim.
    pub fn decode(&self, packed: ArrayView2<T>) -> LabelPlanes {
        let (height, width) = packed.dim();
        let mut classes = Array3::<bool>::from_elem((self.num_classes(), height, width), false);

        classes
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(plane, mut out)| {
                let bit = self.plane_bit(plane);
                Zip::from(&mut out)
                    .and(&packed)
                    .for_each(|flag, &word| *flag = (word & bit) != T::zero());
            });

        let bits = packed
            .iter()
            .map(|&word| (word & T::one()) == T::zero())
            .collect::<BitVec>();
        debug!(
            "Decoded {}x{} raster into {} class planes",
            height,
            width,
            self.num_classes()
        );

        LabelPlanes {
            classes,
            validity: ValidityMask {
                height,
                width,
                bits,
            },
        }
    }

    pub fn encode(
        &self,
        classes: ArrayView3<bool>,
        validity: &ValidityMask,
    ) -> Result<Array2<T>, CodecError> {
        let (planes, height, width) = classes.dim();
        let expected = [self.num_classes(), validity.height, validity.width];
        if [planes, height, width] != expected {
            return Err(CodecError::ShapeMismatch {
                expected: expected.to_vec(),
                found: vec![planes, height, width],
            });
        }

        let mut packed = Array2::<T>::zeros((height, width));
        Zip::indexed(&mut packed).par_for_each(|(y, x), word| {
            let mut value = T::zero();
            for plane in 0..planes {
                if classes[[plane, y, x]] {
                    value = value | self.plane_bit(plane);
                }
            }
            if !validity.get(y, x) {
                value = value | T::one();
            }
            *word = value;
        });

        Ok(packed)
    }
}
