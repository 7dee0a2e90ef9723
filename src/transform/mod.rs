//! The WOFF2 table transforms.
//!
//! Only `glyf` and `loca` have a defined transform: `glyf` becomes the
//! seven-stream representation and `loca` becomes the empty payload,
//! reconstructed from `glyf`. Requesting a transform for any other tag
//! is an error.

pub(crate) mod glyf_decoder;
pub(crate) mod glyf_encoder;

use font_types::Tag;

use crate::error::Woff2Error;
use crate::glyf::Glyph;
use crate::table_tags::{GLYF, LOCA};

/// Produce the transformed payload of table `tag` on the write path.
pub(crate) fn transform_table(
    tag: Tag,
    glyphs: &[Glyph],
    index_format: u16,
) -> Result<Vec<u8>, Woff2Error> {
    if tag == GLYF {
        glyf_encoder::transform_glyf(glyphs, index_format)
    } else if tag == LOCA {
        // The whole loca table is reconstructed from glyf.
        Ok(Vec::new())
    } else {
        Err(Woff2Error::UnsupportedTransform(tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_glyf_and_loca_have_transforms() {
        let result = transform_table(Tag::new(b"cmap"), &[], 0);
        assert!(matches!(result, Err(Woff2Error::UnsupportedTransform(tag)) if tag == Tag::new(b"cmap")));
    }

    #[test]
    fn loca_transforms_to_the_empty_payload() {
        assert!(transform_table(LOCA, &[], 0).unwrap().is_empty());
    }
}
