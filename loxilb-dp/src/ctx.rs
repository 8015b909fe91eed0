use std::mem;
use thiserror::Error;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Bytes reserved in front of the frame for pushed headers
pub const HEADROOM: usize = 128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PktError {
    #[error("header of {len} bytes at offset {off} is out of bounds")]
    OutOfBounds { off: usize, len: usize },
    #[error("no room to add {0} bytes")]
    NoRoom(usize),
}

/// Egress port selected before the frame reached the pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PortHint {
    /// Send out of the port as is, bypassing the lookups
    Rewire(u16),
    /// Forward out of the port after the egress processing
    Redirect(u16),
}

/// A frame being processed along with its receive metadata.
/// Offsets passed to the accessors are relative to the frame start.
pub struct PktCtx {
    buf: Vec<u8>,
    head: usize,
    /// Ingress interface index
    pub ifindex: u32,
    /// Mirror id of a cloned packet, 0 for regular traffic
    pub mirr: u16,
    pub hint: Option<PortHint>,
    /// Interface a mirrored copy of the frame must be sent to
    pub mirr_clone: Option<u32>,
}

impl PktCtx {
    pub fn new(ifindex: u32, frame: &[u8]) -> Self {
        let mut buf = vec![0_u8; HEADROOM + frame.len()];
        buf[HEADROOM..].copy_from_slice(frame);
        Self {
            buf,
            head: HEADROOM,
            ifindex,
            mirr: 0,
            hint: None,
            mirr_clone: None,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.buf[self.head..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        let head = self.head;
        &mut self.buf[head..]
    }

    /// Checks that `len` bytes can be read at `off`
    #[inline(always)]
    pub fn check(&self, off: usize, len: usize) -> Result<(), PktError> {
        if off + len > self.len() {
            return Err(PktError::OutOfBounds { off, len });
        }
        Ok(())
    }

    /// Returns a view of the header at `off` or an error if the header
    /// does not fit entirely in the frame.
    pub fn hdr<T>(&self, off: usize) -> Result<&T, PktError>
    where
        T: FromBytes + KnownLayout + Immutable,
    {
        let len = mem::size_of::<T>();
        self.check(off, len)?;
        T::ref_from_prefix(&self.data()[off..])
            .map(|(hdr, _)| hdr)
            .map_err(|_| PktError::OutOfBounds { off, len })
    }

    pub fn hdr_mut<T>(&mut self, off: usize) -> Result<&mut T, PktError>
    where
        T: FromBytes + IntoBytes + KnownLayout,
    {
        let len = mem::size_of::<T>();
        self.check(off, len)?;
        T::mut_from_prefix(&mut self.data_mut()[off..])
            .map(|(hdr, _)| hdr)
            .map_err(|_| PktError::OutOfBounds { off, len })
    }

    /// Reads a copy of the header at `off`
    pub fn read<T>(&self, off: usize) -> Result<T, PktError>
    where
        T: FromBytes,
    {
        let len = mem::size_of::<T>();
        self.check(off, len)?;
        T::read_from_prefix(&self.data()[off..])
            .map(|(hdr, _)| hdr)
            .map_err(|_| PktError::OutOfBounds { off, len })
    }

    pub fn write<T>(&mut self, off: usize, hdr: &T) -> Result<(), PktError>
    where
        T: IntoBytes + Immutable,
    {
        let len = mem::size_of::<T>();
        self.check(off, len)?;
        self.data_mut()[off..off + len].copy_from_slice(hdr.as_bytes());
        Ok(())
    }

    /// Moves the frame start, negative values grow the frame
    pub fn adjust_head(&mut self, delta: isize) -> Result<(), PktError> {
        if delta < 0 {
            let grow = delta.unsigned_abs();
            if grow > self.head {
                return Err(PktError::NoRoom(grow));
            }
            self.head -= grow;
            self.buf[self.head..self.head + grow].fill(0);
        } else {
            let shrink = delta as usize;
            if shrink > self.len() {
                return Err(PktError::OutOfBounds { off: 0, len: shrink });
            }
            self.head += shrink;
        }
        Ok(())
    }

    /// Inserts `len` zeroed bytes at `at`, the bytes before `at` move towards
    /// the head.
    pub fn add_room(&mut self, at: usize, len: usize) -> Result<(), PktError> {
        self.check(at, 0)?;
        self.adjust_head(-(len as isize))?;
        let head = self.head;
        self.buf.copy_within(head + len..head + len + at, head);
        self.buf[head + at..head + at + len].fill(0);
        Ok(())
    }

    /// Removes `len` bytes at `at`, the bytes before `at` move towards the tail
    pub fn delete_room(&mut self, at: usize, len: usize) -> Result<(), PktError> {
        self.check(at, len)?;
        let head = self.head;
        self.buf.copy_within(head..head + at, head + len);
        self.head += len;
        Ok(())
    }
}
