//! Persistent addresses, typed pointers and fixed-size value encoding.
//!
//! A persistent region is addressed by byte offsets rather than by process
//! addresses, so everything stored in it stays valid when the region is
//! mapped again after a restart. Values cross the region boundary through
//! the [`Persist`] trait, which gives every supported shape a fixed size and
//! a little-endian byte layout.

use std::fmt;
use std::marker::PhantomData;

/// A byte offset into a persistent region.
///
/// Offset 0 is never handed out by the heap and serves as the null pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PAddr(pub u64);

impl PAddr {
    /// The null address.
    pub const NULL: PAddr = PAddr(0);

    /// Creates an address from a raw offset.
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// Returns the raw offset.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns true for the null address.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the address `bytes` past this one.
    #[must_use]
    pub const fn add(self, bytes: u64) -> Self {
        Self(self.0 + bytes)
    }
}

impl fmt::Display for PAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A value with a fixed-size byte representation in persistent memory.
///
/// This is the closed set of shapes the engine can log by type: scalars,
/// pointers, fixed arrays of those, and slice headers. Anything else is
/// logged as a raw byte range.
pub trait Persist: Copy {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Writes the encoding into the first `SIZE` bytes of `out`.
    ///
    /// # Panics
    ///
    /// Panics if `out` is shorter than `SIZE`.
    fn encode(&self, out: &mut [u8]);

    /// Reads a value from the first `SIZE` bytes of `bytes`.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is shorter than `SIZE`.
    fn decode(bytes: &[u8]) -> Self;

    /// Returns the encoding as an owned buffer.
    fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::SIZE];
        self.encode(&mut out);
        out
    }
}

macro_rules! impl_persist_le {
    ($($t:ty),* $(,)?) => {
        $(
            impl Persist for $t {
                const SIZE: usize = std::mem::size_of::<$t>();

                fn encode(&self, out: &mut [u8]) {
                    out[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }

                fn decode(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(&bytes[..Self::SIZE]);
                    <$t>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_persist_le!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128, f32, f64);

impl Persist for bool {
    const SIZE: usize = 1;

    fn encode(&self, out: &mut [u8]) {
        out[0] = u8::from(*self);
    }

    fn decode(bytes: &[u8]) -> Self {
        bytes[0] != 0
    }
}

// usize is stored as a u64 so layouts do not depend on the host word size.
impl Persist for usize {
    const SIZE: usize = 8;

    fn encode(&self, out: &mut [u8]) {
        (*self as u64).encode(out);
    }

    fn decode(bytes: &[u8]) -> Self {
        u64::decode(bytes) as usize
    }
}

impl Persist for PAddr {
    const SIZE: usize = 8;

    fn encode(&self, out: &mut [u8]) {
        self.0.encode(out);
    }

    fn decode(bytes: &[u8]) -> Self {
        PAddr(u64::decode(bytes))
    }
}

impl<T: Persist, const N: usize> Persist for [T; N] {
    const SIZE: usize = T::SIZE * N;

    fn encode(&self, out: &mut [u8]) {
        for (i, item) in self.iter().enumerate() {
            item.encode(&mut out[i * T::SIZE..]);
        }
    }

    fn decode(bytes: &[u8]) -> Self {
        std::array::from_fn(|i| T::decode(&bytes[i * T::SIZE..]))
    }
}

/// A typed pointer to a `T` stored in a persistent region.
pub struct PPtr<T> {
    addr: PAddr,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PPtr<T> {
    /// Creates a typed pointer at `addr`.
    #[must_use]
    pub const fn new(addr: PAddr) -> Self {
        Self {
            addr,
            _marker: PhantomData,
        }
    }

    /// Returns the null pointer.
    #[must_use]
    pub const fn null() -> Self {
        Self::new(PAddr::NULL)
    }

    /// Returns the untyped address.
    #[must_use]
    pub const fn addr(self) -> PAddr {
        self.addr
    }

    /// Returns true if this pointer is null.
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.addr.is_null()
    }

    /// Reinterprets the pointer as pointing to a `U`.
    #[must_use]
    pub const fn cast<U>(self) -> PPtr<U> {
        PPtr::new(self.addr)
    }

    /// Returns a pointer to a field of type `U` located `offset` bytes into `T`.
    #[must_use]
    pub const fn field<U>(self, offset: u64) -> PPtr<U> {
        PPtr::new(self.addr.add(offset))
    }
}

impl<T> Clone for PPtr<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PPtr<T> {}

impl<T> PartialEq for PPtr<T> {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl<T> Eq for PPtr<T> {}

impl<T> fmt::Debug for PPtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PPtr({})", self.addr)
    }
}

impl<T> From<PPtr<T>> for PAddr {
    fn from(ptr: PPtr<T>) -> Self {
        ptr.addr
    }
}

impl<T> Persist for PPtr<T> {
    const SIZE: usize = 8;

    fn encode(&self, out: &mut [u8]) {
        self.addr.encode(out);
    }

    fn decode(bytes: &[u8]) -> Self {
        PPtr::new(PAddr::decode(bytes))
    }
}

/// Bytes spanned by `count` elements of `size` bytes each.
///
/// Counts come from the region, so they are untrusted.
#[must_use]
pub fn span(count: u64, size: usize) -> Option<usize> {
    usize::try_from(count).ok()?.checked_mul(size)
}

fn element_at<T>(data: PAddr, len: u64, index: u64) -> Option<PPtr<T>>
where
    T: Persist,
{
    if index >= len {
        return None;
    }
    let offset = index.checked_mul(T::SIZE as u64)?;
    data.as_u64().checked_add(offset).map(|addr| PPtr::new(PAddr::new(addr)))
}

/// A growable-array header stored in persistent memory.
///
/// The header is the `{data, len, cap}` triple; the elements live in a
/// separate persistent allocation at `data`. Both halves can change inside
/// one transaction, which is why the engine logs them as a pair.
pub struct PVec<T> {
    data: PAddr,
    len: u64,
    cap: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Persist> PVec<T> {
    /// Creates a header over `cap` slots at `data`, of which `len` are in use.
    #[must_use]
    pub const fn new(data: PAddr, len: u64, cap: u64) -> Self {
        Self {
            data,
            len,
            cap,
            _marker: PhantomData,
        }
    }

    /// Returns an empty header with no backing array.
    #[must_use]
    pub const fn empty() -> Self {
        Self::new(PAddr::NULL, 0, 0)
    }

    /// Address of the backing array.
    #[must_use]
    pub const fn data(&self) -> PAddr {
        self.data
    }

    /// Number of elements in use.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if no elements are in use.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots in the backing array.
    #[must_use]
    pub const fn cap(&self) -> u64 {
        self.cap
    }

    /// Bytes covered by the in-use elements.
    ///
    /// Returns `None` if the length read back from the region does not fit
    /// in the address space.
    #[must_use]
    pub fn byte_len(&self) -> Option<usize> {
        span(self.len, T::SIZE)
    }

    /// Pointer to element `index`, or `None` past the end.
    #[must_use]
    pub fn element(&self, index: u64) -> Option<PPtr<T>> {
        element_at(self.data, self.len, index)
    }

    /// Returns a header with a different length over the same array.
    #[must_use]
    pub const fn with_len(&self, len: u64) -> Self {
        Self::new(self.data, len, self.cap)
    }

    /// Returns the in-use elements as a bare slice view.
    #[must_use]
    pub const fn as_slice(&self) -> PSlice<T> {
        PSlice::new(self.data, self.len)
    }
}

impl<T> Clone for PVec<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PVec<T> {}

impl<T> PartialEq for PVec<T> {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data && self.len == other.len && self.cap == other.cap
    }
}

impl<T> Eq for PVec<T> {}

impl<T> fmt::Debug for PVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PVec")
            .field("data", &self.data)
            .field("len", &self.len)
            .field("cap", &self.cap)
            .finish()
    }
}

impl<T> Persist for PVec<T> {
    const SIZE: usize = 24;

    fn encode(&self, out: &mut [u8]) {
        self.data.encode(&mut out[0..8]);
        self.len.encode(&mut out[8..16]);
        self.cap.encode(&mut out[16..24]);
    }

    fn decode(bytes: &[u8]) -> Self {
        Self {
            data: PAddr::decode(&bytes[0..8]),
            len: u64::decode(&bytes[8..16]),
            cap: u64::decode(&bytes[16..24]),
            _marker: PhantomData,
        }
    }
}

/// A bare view of `len` contiguous `T`s in persistent memory.
pub struct PSlice<T> {
    data: PAddr,
    len: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Persist> PSlice<T> {
    /// Creates a view of `len` elements at `data`.
    #[must_use]
    pub const fn new(data: PAddr, len: u64) -> Self {
        Self {
            data,
            len,
            _marker: PhantomData,
        }
    }

    /// Address of the first element.
    #[must_use]
    pub const fn data(&self) -> PAddr {
        self.data
    }

    /// Number of elements.
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Returns true for an empty view.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes covered by the view, or `None` on overflow.
    #[must_use]
    pub fn byte_len(&self) -> Option<usize> {
        span(self.len, T::SIZE)
    }

    /// Pointer to element `index`, or `None` past the end.
    #[must_use]
    pub fn element(&self, index: u64) -> Option<PPtr<T>> {
        element_at(self.data, self.len, index)
    }
}

impl<T> Clone for PSlice<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PSlice<T> {}

impl<T> fmt::Debug for PSlice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PSlice")
            .field("data", &self.data)
            .field("len", &self.len)
            .finish()
    }
}
