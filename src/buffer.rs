//! Bounds-checked helpers on top of [`bytes::Buf`]

use bytes::{Buf, BufMut};
use font_types::Tag;

use crate::error::Woff2Error;

pub(crate) trait BufExt: Buf {
    /// Read a 4-byte table tag.
    fn try_get_tag(&mut self) -> Result<Tag, Woff2Error> {
        let mut raw = [0u8; 4];
        if self.remaining() < 4 {
            return Err(Woff2Error::Format("unexpected end of data"));
        }
        self.copy_to_slice(&mut raw);
        Ok(Tag::new(&raw))
    }

    /// Copy exactly `n` bytes from this buffer into `dst`.
    fn try_read_bytes_into(
        &mut self,
        n: usize,
        dst: &mut impl BufMut,
    ) -> Result<(), Woff2Error> {
        if self.remaining() < n {
            return Err(Woff2Error::Format("unexpected end of data"));
        }
        let mut left = n;
        while left > 0 {
            let chunk = self.chunk();
            let take = chunk.len().min(left);
            dst.put_slice(&chunk[..take]);
            self.advance(take);
            left -= take;
        }
        Ok(())
    }
}

impl<B: Buf + ?Sized> BufExt for B {}

/// Round a value up to the nearest multiple of 4. Values that would
/// overflow when rounded are left unchanged.
macro_rules! round4 {
    ($value:expr) => {
        match $value.checked_add(3) {
            Some(value_plus_3) => value_plus_3 & !3,
            None => $value,
        }
    };
}
pub(crate) use round4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_read_advances() {
        let mut input: &[u8] = b"glyfrest";
        assert_eq!(input.try_get_tag().unwrap(), Tag::new(b"glyf"));
        assert_eq!(input, b"rest");
    }

    #[test]
    fn short_tag_read_fails() {
        let mut input: &[u8] = b"gl";
        assert!(input.try_get_tag().is_err());
    }

    #[test]
    fn read_bytes_into_checks_bounds() {
        let mut input: &[u8] = &[1, 2, 3];
        let mut out: Vec<u8> = Vec::new();
        assert!(input.try_read_bytes_into(4, &mut out).is_err());
        assert!(input.try_read_bytes_into(2, &mut out).is_ok());
        assert_eq!(out, [1, 2]);
        assert_eq!(input, [3]);
    }

    #[test]
    fn round4_rounds_up() {
        assert_eq!(round4!(0usize), 0);
        assert_eq!(round4!(1usize), 4);
        assert_eq!(round4!(4usize), 4);
        assert_eq!(round4!(7usize), 8);
        assert_eq!(round4!(usize::MAX), usize::MAX);
    }
}
