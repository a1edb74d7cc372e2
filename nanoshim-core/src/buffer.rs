//! Message buffers.
//!
//! A [`MessageBuffer`] is one message: a contiguous, reference-counted
//! payload (`Bytes`) whose ownership moves exactly once into or out of the
//! transport. It is deliberately not `Clone`; the only copies made are at
//! the host boundary, where payloads move between a [`HostBuffer`] and the
//! transport.

use bytes::{Bytes, BytesMut};
use std::ops::Deref;

use crate::error::{NanoshimError, Result};

/// One message owned either by the application or by the transport.
#[derive(Debug, PartialEq, Eq)]
pub struct MessageBuffer {
    payload: Bytes,
}

impl MessageBuffer {
    /// Wrap an existing payload without copying.
    #[must_use]
    pub const fn from_bytes(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Wrap a static payload without copying.
    #[must_use]
    pub const fn from_static(payload: &'static [u8]) -> Self {
        Self {
            payload: Bytes::from_static(payload),
        }
    }

    /// Allocate a buffer of exactly `src.len()` bytes and copy `src` into it.
    ///
    /// # Errors
    ///
    /// Returns [`NanoshimError::ResourceExhausted`] if the allocation fails.
    pub fn try_copy_from_slice(src: &[u8]) -> Result<Self> {
        let mut data = Vec::new();
        data.try_reserve_exact(src.len())
            .map_err(|_| NanoshimError::ResourceExhausted {
                requested: src.len(),
            })?;
        data.extend_from_slice(src);
        Ok(Self {
            payload: Bytes::from(data),
        })
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.payload
    }

    /// Give up the buffer and return the underlying payload.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        self.payload
    }

    /// Resize `dst` to exactly this message's length and copy the payload in.
    ///
    /// Returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Propagates the host buffer's resize failure; `dst` is untouched in
    /// that case.
    pub fn copy_into<H: HostBuffer + ?Sized>(&self, dst: &mut H) -> Result<usize> {
        let len = self.payload.len();
        dst.resize(len)?;
        dst.as_bytes_mut()[..len].copy_from_slice(&self.payload);
        Ok(len)
    }
}

impl Deref for MessageBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.payload
    }
}

impl AsRef<[u8]> for MessageBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.payload
    }
}

impl From<Bytes> for MessageBuffer {
    fn from(payload: Bytes) -> Self {
        Self { payload }
    }
}

impl From<Vec<u8>> for MessageBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self {
            payload: Bytes::from(data),
        }
    }
}

impl From<BytesMut> for MessageBuffer {
    fn from(data: BytesMut) -> Self {
        Self {
            payload: data.freeze(),
        }
    }
}

impl From<MessageBuffer> for Bytes {
    fn from(msg: MessageBuffer) -> Self {
        msg.payload
    }
}

/// A host-owned, length-prefixed byte buffer with a resizable backing store.
///
/// Receives write into one of these; sends read from one.
pub trait HostBuffer {
    /// Current length in bytes.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current contents.
    fn as_bytes(&self) -> &[u8];

    /// Mutable view of the current contents.
    fn as_bytes_mut(&mut self) -> &mut [u8];

    /// Set the length to exactly `len`, growing or shrinking the store.
    ///
    /// # Errors
    ///
    /// [`NanoshimError::ResourceExhausted`] if the store cannot grow.
    fn resize(&mut self, len: usize) -> Result<()>;
}

impl HostBuffer for Vec<u8> {
    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn as_bytes(&self) -> &[u8] {
        self
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        self
    }

    fn resize(&mut self, len: usize) -> Result<()> {
        if len > Vec::len(self) {
            self.try_reserve_exact(len - Vec::len(self))
                .map_err(|_| NanoshimError::ResourceExhausted { requested: len })?;
        }
        Vec::resize(self, len, 0);
        Ok(())
    }
}

impl HostBuffer for BytesMut {
    fn len(&self) -> usize {
        BytesMut::len(self)
    }

    fn as_bytes(&self) -> &[u8] {
        self
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        self
    }

    fn resize(&mut self, len: usize) -> Result<()> {
        BytesMut::resize(self, len, 0);
        Ok(())
    }
}
