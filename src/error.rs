use font_types::Tag;
use thiserror::Error;

/// Errors produced while encoding or decoding a WOFF2 font.
///
/// All errors are fatal to the operation that produced them; no partial
/// output is ever returned.
#[derive(Debug, Error)]
pub enum Woff2Error {
    /// The input violates the WOFF2 or sfnt binary format.
    #[error("malformed font data: {0}")]
    Format(&'static str),
    /// The input is well-formed but internally inconsistent.
    #[error("inconsistent font data: {0}")]
    Consistency(String),
    /// A table transform was requested for a tag that has none.
    #[error("transform for table '{0}' is unknown")]
    UnsupportedTransform(Tag),
    /// Brotli support is missing or the codec itself failed.
    #[error("brotli unavailable: {0}")]
    Environment(String),
}

impl From<bytes::TryGetError> for Woff2Error {
    fn from(_: bytes::TryGetError) -> Self {
        Self::Format("unexpected end of data")
    }
}

macro_rules! bail {
    ($msg:literal) => {
        return Err($crate::error::Woff2Error::Format($msg))
    };
}
pub(crate) use bail;

macro_rules! bail_if {
    ($cond:expr, $msg:literal) => {
        if $cond {
            return Err($crate::error::Woff2Error::Format($msg));
        }
    };
}
pub(crate) use bail_if;

/// Like [`bail_if!`] but produces the [`Woff2Error::Consistency`] kind,
/// formatting the offending values into the diagnostic.
macro_rules! inconsistent_if {
    ($cond:expr, $($msg:tt)*) => {
        if $cond {
            return Err($crate::error::Woff2Error::Consistency(format!($($msg)*)));
        }
    };
}
pub(crate) use inconsistent_if;

pub(crate) fn usize_will_overflow(a: usize, b: usize) -> bool {
    a.checked_add(b).is_none()
}

pub(crate) fn u32_will_overflow(a: u32, b: u32) -> bool {
    a.checked_add(b).is_none()
}
