//! Typed byte buffers and the element-wise reductions applied to them.
//!
//! Buffers carry raw native-endian bytes plus a [`DataType`], which is what
//! goes over the fabric. Reductions decode element by element, so buffers
//! need no particular alignment.

use serde::{Deserialize, Serialize};

use crate::error::{CollectiveError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    U8,
    I32,
    I64,
    F32,
    F64,
}

impl DataType {
    pub fn size(self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::I32 | DataType::F32 => 4,
            DataType::I64 | DataType::F64 => 8,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReduceOp {
    Sum,
    Min,
    Max,
    Prod,
}

/// A scalar type that can live in a [`Buffer`].
pub trait Element: Copy + Send + Sync + 'static {
    const DTYPE: DataType;

    fn read(bytes: &[u8]) -> Self;
    fn write(self, out: &mut [u8]);
    fn combine(a: Self, b: Self, op: ReduceOp) -> Self;
}

macro_rules! impl_int_element {
    ($t:ty, $dtype:expr) => {
        impl Element for $t {
            const DTYPE: DataType = $dtype;

            fn read(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_ne_bytes(raw)
            }

            fn write(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_ne_bytes());
            }

            fn combine(a: Self, b: Self, op: ReduceOp) -> Self {
                match op {
                    ReduceOp::Sum => a.wrapping_add(b),
                    ReduceOp::Prod => a.wrapping_mul(b),
                    ReduceOp::Min => a.min(b),
                    ReduceOp::Max => a.max(b),
                }
            }
        }
    };
}

macro_rules! impl_float_element {
    ($t:ty, $dtype:expr) => {
        impl Element for $t {
            const DTYPE: DataType = $dtype;

            fn read(bytes: &[u8]) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$t>()];
                raw.copy_from_slice(bytes);
                <$t>::from_ne_bytes(raw)
            }

            fn write(self, out: &mut [u8]) {
                out.copy_from_slice(&self.to_ne_bytes());
            }

            fn combine(a: Self, b: Self, op: ReduceOp) -> Self {
                match op {
                    ReduceOp::Sum => a + b,
                    ReduceOp::Prod => a * b,
                    ReduceOp::Min => a.min(b),
                    ReduceOp::Max => a.max(b),
                }
            }
        }
    };
}

impl_int_element!(u8, DataType::U8);
impl_int_element!(i32, DataType::I32);
impl_int_element!(i64, DataType::I64);
impl_float_element!(f32, DataType::F32);
impl_float_element!(f64, DataType::F64);

macro_rules! with_element {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            DataType::U8 => {
                type $t = u8;
                $body
            }
            DataType::I32 => {
                type $t = i32;
                $body
            }
            DataType::I64 => {
                type $t = i64;
                $body
            }
            DataType::F32 => {
                type $t = f32;
                $body
            }
            DataType::F64 => {
                type $t = f64;
                $body
            }
        }
    };
}

fn fold_into<T: Element>(dst: &mut [u8], src: &[u8], op: ReduceOp) {
    let size = std::mem::size_of::<T>();
    for (d, s) in dst.chunks_exact_mut(size).zip(src.chunks_exact(size)) {
        T::combine(T::read(d), T::read(s), op).write(d);
    }
}

fn combine_into<T: Element>(dst: &mut [u8], a: &[u8], b: &[u8], op: ReduceOp) {
    let size = std::mem::size_of::<T>();
    for ((d, x), y) in dst
        .chunks_exact_mut(size)
        .zip(a.chunks_exact(size))
        .zip(b.chunks_exact(size))
    {
        T::combine(T::read(x), T::read(y), op).write(d);
    }
}

/// An owned typed buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Buffer {
    data: Vec<u8>,
    dtype: DataType,
}

impl Buffer {
    pub fn zeros(count: usize, dtype: DataType) -> Self {
        Self {
            data: vec![0u8; count * dtype.size()],
            dtype,
        }
    }

    pub fn from_slice<T: Element>(values: &[T]) -> Self {
        let size = std::mem::size_of::<T>();
        let mut data = vec![0u8; values.len() * size];
        for (v, out) in values.iter().zip(data.chunks_exact_mut(size)) {
            v.write(out);
        }
        Self {
            data,
            dtype: T::DTYPE,
        }
    }

    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.view().to_vec()
    }

    pub fn count(&self) -> usize {
        self.data.len() / self.dtype.size()
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn view(&self) -> BufferView<'_> {
        BufferView {
            data: &self.data,
            dtype: self.dtype,
        }
    }

    pub fn view_mut(&mut self) -> BufferViewMut<'_> {
        BufferViewMut {
            data: &mut self.data,
            dtype: self.dtype,
        }
    }
}

/// A borrowed, read-only typed region.
#[derive(Clone, Copy, Debug)]
pub struct BufferView<'a> {
    data: &'a [u8],
    dtype: DataType,
}

impl<'a> BufferView<'a> {
    /// Wraps raw bytes, e.g. a message payload, checking they hold whole elements.
    pub fn from_bytes(data: &'a [u8], dtype: DataType) -> Result<Self> {
        if data.len() % dtype.size() != 0 {
            return Err(CollectiveError::BufferMismatch(format!(
                "{} bytes is not a whole number of {:?} elements",
                data.len(),
                dtype
            )));
        }
        Ok(Self { data, dtype })
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn count(&self) -> usize {
        self.data.len() / self.dtype.size()
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Splits at element index `mid`.
    pub fn split_at(self, mid: usize) -> (Self, Self) {
        let (a, b) = self.data.split_at(mid * self.dtype.size());
        (
            Self {
                data: a,
                dtype: self.dtype,
            },
            Self {
                data: b,
                dtype: self.dtype,
            },
        )
    }

    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        if T::DTYPE != self.dtype {
            return Err(CollectiveError::BufferMismatch(format!(
                "cannot read {:?} buffer as {:?}",
                self.dtype,
                T::DTYPE
            )));
        }
        Ok(self
            .data
            .chunks_exact(self.dtype.size())
            .map(T::read)
            .collect())
    }
}

/// A borrowed, writable typed region.
#[derive(Debug)]
pub struct BufferViewMut<'a> {
    data: &'a mut [u8],
    dtype: DataType,
}

impl<'a> BufferViewMut<'a> {
    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn count(&self) -> usize {
        self.data.len() / self.dtype.size()
    }

    pub fn as_view(&self) -> BufferView<'_> {
        BufferView {
            data: self.data,
            dtype: self.dtype,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        self.data
    }

    /// Splits at element index `mid` into two disjoint writable regions.
    pub fn split_at(self, mid: usize) -> (Self, Self) {
        let dtype = self.dtype;
        let (a, b) = self.data.split_at_mut(mid * dtype.size());
        (Self { data: a, dtype }, Self { data: b, dtype })
    }

    fn check(&self, other: &BufferView<'_>) -> Result<()> {
        if other.dtype != self.dtype || other.data.len() != self.data.len() {
            return Err(CollectiveError::BufferMismatch(format!(
                "expected {} x {:?}, got {} x {:?}",
                self.count(),
                self.dtype,
                other.count(),
                other.dtype
            )));
        }
        Ok(())
    }

    pub fn copy_from(&mut self, src: BufferView<'_>) -> Result<()> {
        self.check(&src)?;
        self.data.copy_from_slice(src.data);
        Ok(())
    }

    /// `self = self op src`
    pub fn transform(&mut self, src: BufferView<'_>, op: ReduceOp) -> Result<()> {
        self.check(&src)?;
        with_element!(self.dtype, T => fold_into::<T>(self.data, src.data, op));
        Ok(())
    }

    /// `self = a op b`
    pub fn transform2(&mut self, a: BufferView<'_>, b: BufferView<'_>, op: ReduceOp) -> Result<()> {
        self.check(&a)?;
        self.check(&b)?;
        with_element!(self.dtype, T => combine_into::<T>(self.data, a.data, b.data, op));
        Ok(())
    }
}
