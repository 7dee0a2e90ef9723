//! Pure-Rust WOFF2 font encoding and decoding
//!
//! A bidirectional codec between raw sfnt (TrueType/OpenType) fonts and
//! their WOFF2 packaging, including the lossless `glyf`/`loca` table
//! transform and Brotli compression of the table payload.
//!
//! Reading:
//!
//! ```no_run
//! let woff2 = std::fs::read("font.woff2")?;
//! let font = woffle::read(&woff2)?;
//! std::fs::write("font.ttf", font.to_sfnt()?)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Writing:
//!
//! ```no_run
//! let ttf = std::fs::read("font.ttf")?;
//! let font = woffle::Font::from_sfnt(&ttf)?;
//! let woff2 = woffle::write(&font, woffle::FlavorData::default())?;
//! std::fs::write("font.woff2", woff2)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Note that packing a TrueType font is lossless but not byte-neutral:
//! the encoder recompiles `glyf` and `loca` with aligned glyph offsets,
//! sets bit 11 of `head.flags` and recomputes `checkSumAdjustment`, and
//! any `DSIG` table is dropped.

pub mod directory;
pub mod error;
pub mod font;
pub mod glyf;
pub mod table_tags;

mod buffer;
mod checksum;
mod compress;
mod read;
mod transform;
mod variable_length;
mod write;

pub use error::Woff2Error;
pub use font::{FlavorData, Font};
pub use font_types::Tag;
pub use read::Woff2Font;
pub use write::{Woff2Writer, write};

/// Read a WOFF2 file into a fully materialized [`Font`].
///
/// Use [`Woff2Font::read`] instead to materialize tables lazily or to
/// get at the WOFF2 flavor data.
pub fn read(data: &[u8]) -> Result<Font, Woff2Error> {
    Woff2Font::read(data)?.into_font()
}
