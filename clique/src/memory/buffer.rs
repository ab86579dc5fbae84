//! Device buffers shared between the host and every device of a clique.
//!
//! A `DeviceBuffer` is a fixed-length array of cells that peers write into
//! at disjoint, rank-indexed slices while a collective is in flight. The
//! buffer tracks in-flight launches so host-side reads and writes can never
//! race with device-side access.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{CliqueError, Result};
use crate::reduce::Element;
use crate::types::DeviceId;

/// Set while the host holds exclusive access to the cells.
const HOST_ACCESS: usize = 1 << (usize::BITS - 1);
/// Set while a launch writes the buffer (it is a collective's destination).
const DEVICE_WRITER: usize = 1 << (usize::BITS - 2);
/// Launches reading the buffer live in the remaining low bits.
const READERS: usize = !(HOST_ACCESS | DEVICE_WRITER);

struct BufferInner<T> {
    device: DeviceId,
    cells: Box<[UnsafeCell<T>]>,
    /// `HOST_ACCESS` | `DEVICE_WRITER` | reader count.
    state: AtomicUsize,
}

// SAFETY: concurrent access to `cells` is mediated by `state`: the host only
// touches cells while it holds `HOST_ACCESS` with no launch in flight, at most
// one launch writes at a time and never alongside readers, and the devices of
// that launch write disjoint slices assigned by rank and worker index.
unsafe impl<T: Send> Sync for BufferInner<T> {}

/// A device-resident array of `T`, cheap to clone (clones share storage).
pub struct DeviceBuffer<T: Element> {
    inner: Arc<BufferInner<T>>,
}

impl<T: Element> Clone for DeviceBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Element> std::fmt::Debug for DeviceBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("device", &self.inner.device)
            .field("dtype", &T::DATA_TYPE)
            .field("len", &self.len())
            .field("addr", &format_args!("0x{:x}", self.addr()))
            .finish()
    }
}

impl<T: Element> DeviceBuffer<T> {
    /// Allocate `len` default-initialized (zero) elements on `device`.
    pub fn zeroed(device: DeviceId, len: usize) -> Result<Self> {
        let mut cells = Vec::new();
        cells
            .try_reserve_exact(len)
            .map_err(|source| CliqueError::Alloc {
                what: "device buffer",
                source,
            })?;
        cells.extend((0..len).map(|_| UnsafeCell::new(T::default())));
        Ok(Self::from_cells(device, cells))
    }

    /// Allocate a buffer on `device` holding a copy of `data`.
    pub fn from_slice(device: DeviceId, data: &[T]) -> Result<Self> {
        let mut cells = Vec::new();
        cells
            .try_reserve_exact(data.len())
            .map_err(|source| CliqueError::Alloc {
                what: "device buffer",
                source,
            })?;
        cells.extend(data.iter().map(|&v| UnsafeCell::new(v)));
        Ok(Self::from_cells(device, cells))
    }

    fn from_cells(device: DeviceId, cells: Vec<UnsafeCell<T>>) -> Self {
        Self {
            inner: Arc::new(BufferInner {
                device,
                cells: cells.into_boxed_slice(),
                state: AtomicUsize::new(0),
            }),
        }
    }

    /// Device the buffer lives on.
    pub fn device(&self) -> DeviceId {
        self.inner.device
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.inner.cells.len()
    }

    /// Returns true if the buffer holds no elements.
    pub fn is_empty(&self) -> bool {
        self.inner.cells.is_empty()
    }

    /// Number of launches currently using this buffer.
    pub fn in_flight(&self) -> usize {
        in_flight(self.inner.state.load(Ordering::Acquire))
    }

    /// Base address of the storage; the value published in control blocks.
    pub fn addr(&self) -> usize {
        self.as_mut_ptr() as usize
    }

    /// True if both handles share the same storage.
    pub fn same_storage(&self, other: &DeviceBuffer<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Copy the buffer's contents to the host.
    ///
    /// Fails with `BufferInUse` while a launch that touches this buffer is
    /// still in flight; synchronize the stream first.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        let _host = self.host_access()?;
        let ptr = self.as_mut_ptr();
        // SAFETY: exclusive host access, `len()` cells are initialized.
        Ok((0..self.len()).map(|i| unsafe { ptr.add(i).read() }).collect())
    }

    /// Overwrite the start of the buffer from a host slice.
    pub fn copy_from_slice(&self, data: &[T]) -> Result<()> {
        if data.len() > self.len() {
            return Err(CliqueError::BufferSizeMismatch {
                expected: data.len(),
                actual: self.len(),
            });
        }
        let _host = self.host_access()?;
        let ptr = self.as_mut_ptr();
        for (i, &v) in data.iter().enumerate() {
            // SAFETY: exclusive host access, `i < len()`.
            unsafe { ptr.add(i).write(v) };
        }
        Ok(())
    }

    /// Fill every element with `value`.
    pub fn fill(&self, value: T) -> Result<()> {
        let _host = self.host_access()?;
        let ptr = self.as_mut_ptr();
        for i in 0..self.len() {
            // SAFETY: exclusive host access, `i < len()`.
            unsafe { ptr.add(i).write(value) };
        }
        Ok(())
    }

    /// Mark the buffer as read by a launch until the returned guard drops.
    ///
    /// Any number of launches may read a buffer; none may while it is
    /// another launch's destination.
    pub(crate) fn begin_read(&self) -> Result<LaunchGuard<T>> {
        let state = &self.inner.state;
        let mut cur = state.load(Ordering::Acquire);
        loop {
            if cur & DEVICE_WRITER != 0 {
                return Err(self.in_use(cur));
            }
            if cur & HOST_ACCESS != 0 {
                std::hint::spin_loop();
                cur = state.load(Ordering::Acquire);
                continue;
            }
            match state.compare_exchange_weak(cur, cur + 1, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    return Ok(LaunchGuard {
                        buffer: self.clone(),
                        access: Access::Read,
                    });
                }
                Err(actual) => cur = actual,
            }
        }
    }

    /// Mark the buffer as the destination of a launch until the guard drops.
    ///
    /// Fails if any other launch still uses the buffer.
    pub(crate) fn begin_write(&self) -> Result<LaunchGuard<T>> {
        let state = &self.inner.state;
        loop {
            match state.compare_exchange_weak(0, DEVICE_WRITER, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => {
                    return Ok(LaunchGuard {
                        buffer: self.clone(),
                        access: Access::Write,
                    });
                }
                Err(actual) if in_flight(actual) != 0 => return Err(self.in_use(actual)),
                Err(_) => std::hint::spin_loop(),
            }
        }
    }

    fn host_access(&self) -> Result<HostAccess<'_, T>> {
        let state = &self.inner.state;
        loop {
            match state.compare_exchange_weak(0, HOST_ACCESS, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return Ok(HostAccess { buffer: self }),
                Err(actual) if in_flight(actual) != 0 => return Err(self.in_use(actual)),
                // Another host thread holds access, or a spurious failure.
                Err(_) => std::hint::spin_loop(),
            }
        }
    }

    fn in_use(&self, state: usize) -> CliqueError {
        CliqueError::BufferInUse {
            device: self.device(),
            in_flight: in_flight(state),
        }
    }

    pub(crate) fn as_mut_ptr(&self) -> *mut T {
        UnsafeCell::raw_get(self.inner.cells.as_ptr())
    }
}

struct HostAccess<'a, T: Element> {
    buffer: &'a DeviceBuffer<T>,
}

impl<T: Element> Drop for HostAccess<'_, T> {
    fn drop(&mut self) {
        self.buffer
            .inner
            .state
            .fetch_and(!HOST_ACCESS, Ordering::Release);
    }
}

fn in_flight(state: usize) -> usize {
    (state & READERS) + usize::from(state & DEVICE_WRITER != 0)
}

enum Access {
    Read,
    Write,
}

/// Keeps a buffer alive and host-inaccessible for the duration of a launch.
pub(crate) struct LaunchGuard<T: Element> {
    buffer: DeviceBuffer<T>,
    access: Access,
}

impl<T: Element> LaunchGuard<T> {
    pub(crate) fn buffer(&self) -> &DeviceBuffer<T> {
        &self.buffer
    }
}

impl<T: Element> Drop for LaunchGuard<T> {
    fn drop(&mut self) {
        let state = &self.buffer.inner.state;
        match self.access {
            Access::Read => state.fetch_sub(1, Ordering::AcqRel),
            Access::Write => state.fetch_and(!DEVICE_WRITER, Ordering::AcqRel),
        };
    }
}
