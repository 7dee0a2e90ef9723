//! The in-memory sfnt font container

use bytes::{Buf, BufMut};
use font_types::Tag;

use crate::buffer::{BufExt, round4};
use crate::checksum::{
    CHECKSUM_MAGIC, HEAD_CHECKSUM_ADJUSTMENT_OFFSET, compute_checksum, compute_head_checksum,
    search_range_fields,
};
use crate::error::{Woff2Error, bail_if};
use crate::table_tags::{HEAD, MAXP};

pub const SFNT_VERSION_TRUETYPE: Tag = Tag::new(&[0x00, 0x01, 0x00, 0x00]);
pub const SFNT_VERSION_APPLE: Tag = Tag::new(b"true");
pub const SFNT_VERSION_CFF: Tag = Tag::new(b"OTTO");

pub(crate) const SFNT_HEADER_SIZE: usize = 12;
pub(crate) const SFNT_ENTRY_SIZE: usize = 16;

// Field offsets within the raw 'head' table
const HEAD_FONT_REVISION_OFFSET: usize = 4;
const HEAD_FLAGS_OFFSET: usize = 16;
const HEAD_INDEX_TO_LOC_FORMAT_OFFSET: usize = 50;

/// Bit 11 of `head.flags`: "font data is lossless as a result of a
/// transforming compressor".
pub(crate) const HEAD_TRANSFORM_FLAG: u16 = 1 << 11;

// Field offsets within the raw 'maxp' table
const MAXP_NUM_GLYPHS_OFFSET: usize = 4;

/// Version and metadata carried by the WOFF2 wrapper around the sfnt
/// payload. Metadata and private data are opaque byte blobs; metadata
/// is held uncompressed on both sides of the codec.
#[derive(Debug, Clone, Default)]
pub struct FlavorData {
    /// Major version of the WOFF2 file. When unset (together with
    /// `minor_version`), the writer falls back to `head.fontRevision`.
    pub major_version: Option<u16>,
    /// Minor version of the WOFF2 file.
    pub minor_version: Option<u16>,
    /// XML metadata, uncompressed.
    pub meta_data: Option<Vec<u8>>,
    /// Private data block.
    pub priv_data: Option<Vec<u8>>,
}

/// An sfnt font: a flavor tag plus raw tables in insertion order.
#[derive(Debug, Clone)]
pub struct Font {
    sfnt_version: Tag,
    tables: Vec<(Tag, Vec<u8>)>,
    glyph_order: Option<Vec<String>>,
}

impl Font {
    pub fn new(sfnt_version: Tag) -> Self {
        Self {
            sfnt_version,
            tables: Vec::new(),
            glyph_order: None,
        }
    }

    pub fn sfnt_version(&self) -> Tag {
        self.sfnt_version
    }

    /// Whether the font carries TrueType outlines (as opposed to CFF).
    pub fn is_truetype(&self) -> bool {
        self.sfnt_version == SFNT_VERSION_TRUETYPE || self.sfnt_version == SFNT_VERSION_APPLE
    }

    /// Insert a raw table, replacing any previous table with this tag.
    pub fn set_table(&mut self, tag: Tag, data: Vec<u8>) {
        match self.tables.iter_mut().find(|(existing, _)| *existing == tag) {
            Some((_, existing_data)) => *existing_data = data,
            None => self.tables.push((tag, data)),
        }
    }

    pub fn table(&self, tag: Tag) -> Option<&[u8]> {
        self.tables
            .iter()
            .find(|(existing, _)| *existing == tag)
            .map(|(_, data)| data.as_slice())
    }

    pub fn has_table(&self, tag: Tag) -> bool {
        self.table(tag).is_some()
    }

    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    /// Table tags in insertion order.
    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.tables.iter().map(|(tag, _)| *tag)
    }

    pub(crate) fn tables(&self) -> &[(Tag, Vec<u8>)] {
        &self.tables
    }

    pub fn set_glyph_order(&mut self, order: Vec<String>) {
        self.glyph_order = Some(order);
    }

    pub(crate) fn glyph_order_unchecked(&self) -> Option<&[String]> {
        self.glyph_order.as_deref()
    }

    /// The font's glyph names. When no order has been assigned, the
    /// standard fallback naming is generated from `maxp.numGlyphs`:
    /// `.notdef`, `glyph00001`, `glyph00002`, …
    pub fn glyph_order(&self) -> Result<Vec<String>, Woff2Error> {
        if let Some(order) = &self.glyph_order {
            return Ok(order.clone());
        }
        let maxp = self
            .table(MAXP)
            .ok_or_else(|| Woff2Error::Consistency("missing required table 'maxp'".into()))?;
        let num_glyphs = maxp_num_glyphs(maxp)?;
        let mut order = Vec::with_capacity(usize::from(num_glyphs));
        if num_glyphs > 0 {
            order.push(".notdef".to_string());
            order.extend((1..num_glyphs).map(|i| format!("glyph{i:05}")));
        }
        Ok(order)
    }

    /// Parse an sfnt (TTF/OTF) file. Tables keep the order in which the
    /// directory declares them.
    pub fn from_sfnt(data: &[u8]) -> Result<Self, Woff2Error> {
        let mut input = data;
        let sfnt_version = input.try_get_tag()?;
        bail_if!(
            sfnt_version != SFNT_VERSION_TRUETYPE
                && sfnt_version != SFNT_VERSION_APPLE
                && sfnt_version != SFNT_VERSION_CFF,
            "not a TrueType or OpenType font (bad sfntVersion)"
        );
        let num_tables = input.try_get_u16()?;
        let _search_range = input.try_get_u16()?;
        let _entry_selector = input.try_get_u16()?;
        let _range_shift = input.try_get_u16()?;

        let mut font = Self::new(sfnt_version);
        for _ in 0..num_tables {
            let tag = input.try_get_tag()?;
            let _checksum = input.try_get_u32()?;
            let offset = input.try_get_u32()? as usize;
            let length = input.try_get_u32()? as usize;
            let end = offset
                .checked_add(length)
                .filter(|&end| end <= data.len())
                .ok_or(Woff2Error::Format("table record lies outside the file"))?;
            font.set_table(tag, data[offset..end].to_vec());
        }
        Ok(font)
    }

    /// Serialize as an sfnt file: directory sorted by tag, tables
    /// padded to 4 bytes, checksums recomputed and `checkSumAdjustment`
    /// patched so the whole file sums to 0xB1B0AFBA.
    pub fn to_sfnt(&self) -> Result<Vec<u8>, Woff2Error> {
        bail_if!(self.tables.is_empty(), "font has no tables");
        let num_tables = self.tables.len() as u16;

        let mut sorted: Vec<&(Tag, Vec<u8>)> = self.tables.iter().collect();
        sorted.sort_by_key(|(tag, _)| *tag);

        let mut buffer = Vec::new();
        buffer.put_slice(&self.sfnt_version.to_be_bytes());
        buffer.put_u16(num_tables);
        let (search_range, entry_selector, range_shift) = search_range_fields(num_tables);
        buffer.put_u16(search_range);
        buffer.put_u16(entry_selector);
        buffer.put_u16(range_shift);

        let mut offset = SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * sorted.len();
        let mut head_offset: Option<usize> = None;
        for (tag, data) in &sorted {
            let checksum = if *tag == HEAD {
                head_offset = Some(offset);
                compute_head_checksum(data)?
            } else {
                compute_checksum(data)
            };
            buffer.put_slice(&tag.to_be_bytes());
            buffer.put_u32(checksum);
            buffer.put_u32(offset as u32);
            buffer.put_u32(data.len() as u32);
            offset += round4!(data.len());
        }
        for (_, data) in &sorted {
            buffer.put_slice(data);
            buffer.resize(round4!(buffer.len()), 0);
        }

        if let Some(head_offset) = head_offset {
            let adjustment_offset = head_offset + HEAD_CHECKSUM_ADJUSTMENT_OFFSET;
            buffer[adjustment_offset..adjustment_offset + 4].fill(0);
            let adjustment = CHECKSUM_MAGIC.wrapping_sub(compute_checksum(&buffer));
            buffer[adjustment_offset..adjustment_offset + 4]
                .copy_from_slice(&adjustment.to_be_bytes());
        }

        Ok(buffer)
    }
}

pub(crate) fn head_index_to_loc_format(head: &[u8]) -> Result<u16, Woff2Error> {
    read_u16_field(head, HEAD_INDEX_TO_LOC_FORMAT_OFFSET, "'head' table is too short")
}

pub(crate) fn head_set_index_to_loc_format(
    head: &mut [u8],
    index_format: u16,
) -> Result<(), Woff2Error> {
    bail_if!(
        head.len() < HEAD_INDEX_TO_LOC_FORMAT_OFFSET + 2,
        "'head' table is too short"
    );
    head[HEAD_INDEX_TO_LOC_FORMAT_OFFSET..HEAD_INDEX_TO_LOC_FORMAT_OFFSET + 2]
        .copy_from_slice(&index_format.to_be_bytes());
    Ok(())
}

/// Set bit 11 of `head.flags`: the font has been through a lossless
/// modifying transform.
pub(crate) fn head_set_transform_flag(head: &mut [u8]) -> Result<(), Woff2Error> {
    let flags = read_u16_field(head, HEAD_FLAGS_OFFSET, "'head' table is too short")?;
    head[HEAD_FLAGS_OFFSET..HEAD_FLAGS_OFFSET + 2]
        .copy_from_slice(&(flags | HEAD_TRANSFORM_FLAG).to_be_bytes());
    Ok(())
}

/// `head.fontRevision` split into its two u16 halves, the fallback for
/// the WOFF2 major/minor version fields.
pub(crate) fn head_font_revision(head: &[u8]) -> Result<(u16, u16), Woff2Error> {
    let major = read_u16_field(head, HEAD_FONT_REVISION_OFFSET, "'head' table is too short")?;
    let minor = read_u16_field(
        head,
        HEAD_FONT_REVISION_OFFSET + 2,
        "'head' table is too short",
    )?;
    Ok((major, minor))
}

pub(crate) fn maxp_num_glyphs(maxp: &[u8]) -> Result<u16, Woff2Error> {
    read_u16_field(maxp, MAXP_NUM_GLYPHS_OFFSET, "'maxp' table is too short")
}

fn read_u16_field(data: &[u8], offset: usize, msg: &'static str) -> Result<u16, Woff2Error> {
    let bytes: [u8; 2] = data
        .get(offset..offset + 2)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(Woff2Error::Format(msg))?;
    Ok(u16::from_be_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_head() -> Vec<u8> {
        let mut head = vec![0u8; 54];
        head[0..4].copy_from_slice(&0x0001_0000u32.to_be_bytes()); // version
        head[4..8].copy_from_slice(&0x0002_8000u32.to_be_bytes()); // fontRevision 2.5
        head[12..16].copy_from_slice(&0x5f0f_3cf5u32.to_be_bytes()); // magic
        head
    }

    #[test]
    fn head_field_access() {
        let mut head = minimal_head();
        assert_eq!(head_font_revision(&head).unwrap(), (2, 0x8000));
        assert_eq!(head_index_to_loc_format(&head).unwrap(), 0);

        head_set_index_to_loc_format(&mut head, 1).unwrap();
        assert_eq!(head_index_to_loc_format(&head).unwrap(), 1);

        head_set_transform_flag(&mut head).unwrap();
        let flags = u16::from_be_bytes([head[16], head[17]]);
        assert_ne!(flags & HEAD_TRANSFORM_FLAG, 0);
    }

    #[test]
    fn short_head_is_rejected() {
        assert!(head_index_to_loc_format(&[0u8; 10]).is_err());
        assert!(head_font_revision(&[0u8; 7]).is_err());
    }

    #[test]
    fn glyph_order_fallback_naming() {
        let mut font = Font::new(SFNT_VERSION_TRUETYPE);
        let mut maxp = vec![0u8; 6];
        maxp[4..6].copy_from_slice(&3u16.to_be_bytes());
        font.set_table(MAXP, maxp);

        let order = font.glyph_order().unwrap();
        assert_eq!(order, [".notdef", "glyph00001", "glyph00002"]);

        font.set_glyph_order(vec!["a".into()]);
        assert_eq!(font.glyph_order().unwrap(), ["a"]);
    }

    #[test]
    fn sfnt_round_trips_and_checksums() {
        let mut font = Font::new(SFNT_VERSION_TRUETYPE);
        font.set_table(HEAD, minimal_head());
        font.set_table(Tag::new(b"cmap"), vec![1, 2, 3, 4, 5]);
        font.set_table(MAXP, {
            let mut maxp = vec![0u8; 6];
            maxp[4..6].copy_from_slice(&1u16.to_be_bytes());
            maxp
        });

        let sfnt = font.to_sfnt().unwrap();
        // the whole file must checksum to the magic constant
        assert_eq!(compute_checksum(&sfnt), CHECKSUM_MAGIC);

        let reparsed = Font::from_sfnt(&sfnt).unwrap();
        assert_eq!(reparsed.num_tables(), 3);
        assert_eq!(reparsed.table(Tag::new(b"cmap")).unwrap(), [1, 2, 3, 4, 5]);
        // directory comes back sorted
        let tags: Vec<Tag> = reparsed.tags().collect();
        let mut sorted = tags.clone();
        sorted.sort();
        assert_eq!(tags, sorted);
    }

    #[test]
    fn table_replacement_keeps_position() {
        let mut font = Font::new(SFNT_VERSION_CFF);
        font.set_table(Tag::new(b"CFF "), vec![1]);
        font.set_table(Tag::new(b"name"), vec![2]);
        font.set_table(Tag::new(b"CFF "), vec![3]);
        assert_eq!(font.num_tables(), 2);
        assert_eq!(font.tags().next().unwrap(), Tag::new(b"CFF "));
        assert_eq!(font.table(Tag::new(b"CFF ")).unwrap(), [3]);
    }
}
