//! Element types and the element-wise reduction used by AllReduce.

use crate::types::{DataType, ReduceOp};

mod private {
    pub trait Sealed {}
}

/// A value that can live in a [`DeviceBuffer`](crate::memory::DeviceBuffer)
/// and be combined by a [`ReduceOp`].
///
/// Sealed: implemented for `f32`, `f64`, `i8`, `i32`, `i64`, `u8`, `u32`, `u64`.
pub trait Element: private::Sealed + Copy + Send + Sync + Default + 'static {
    const DATA_TYPE: DataType;

    fn reduce(a: Self, b: Self, op: ReduceOp) -> Self;
}

macro_rules! impl_element {
    (int: $($ty:ty => $dt:ident),*) => {
        $(
            impl private::Sealed for $ty {}
            impl Element for $ty {
                const DATA_TYPE: DataType = DataType::$dt;

                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a.wrapping_add(b),
                        ReduceOp::Prod => a.wrapping_mul(b),
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
    (float: $($ty:ty => $dt:ident),*) => {
        $(
            impl private::Sealed for $ty {}
            impl Element for $ty {
                const DATA_TYPE: DataType = DataType::$dt;

                #[inline]
                fn reduce(a: Self, b: Self, op: ReduceOp) -> Self {
                    match op {
                        ReduceOp::Sum => a + b,
                        ReduceOp::Prod => a * b,
                        ReduceOp::Min => a.min(b),
                        ReduceOp::Max => a.max(b),
                    }
                }
            }
        )*
    };
}

impl_element!(int: i8 => I8, i32 => I32, i64 => I64, u8 => U8, u32 => U32, u64 => U64);
impl_element!(float: f32 => F32, f64 => F64);

/// Fold `count` elements of every rank slice of `slices` in rank order.
///
/// `slices` holds `ranks` contiguous slices of `count` elements; the result
/// for element `i` is `op(...op(op(s0[i], s1[i]), s2[i])..., s{n-1}[i])`.
/// Folding in a fixed order keeps floating-point results bit-identical on
/// every device regardless of where each device sits in the ring.
pub(crate) fn fold_rank_slices<T: Element>(
    slices: &[T],
    ranks: usize,
    count: usize,
    op: ReduceOp,
    out: &mut [T],
) {
    debug_assert!(slices.len() >= ranks * count);
    debug_assert!(out.len() >= count);
    for (i, dst) in out.iter_mut().take(count).enumerate() {
        let mut acc = slices[i];
        for r in 1..ranks {
            acc = T::reduce(acc, slices[r * count + i], op);
        }
        *dst = acc;
    }
}
