//! The WOFF2 file header and table directory

use std::collections::HashSet;
use std::ops::{Deref, DerefMut};

use bytes::{Buf, BufMut};
use font_types::Tag;

use crate::buffer::BufExt;
use crate::error::{Woff2Error, bail, bail_if, u32_will_overflow};
use crate::table_tags::{KNOWN_TABLE_TAGS, LOCA, UNKNOWN_TAG_INDEX, is_transformed_tag, known_tag_index};
use crate::variable_length::{BufVariableExt, put_base_128};

pub const WOFF2_SIGNATURE: Tag = Tag::new(b"wOF2");

/// Size of the fixed WOFF2 header in bytes.
pub(crate) const WOFF2_HEADER_SIZE: usize = 48;

/// The fixed-size WOFF2 file header.
///
/// <https://www.w3.org/TR/WOFF2/#woff20Header>
#[derive(Debug, Clone)]
pub struct Woff2Header {
    /// The "sfnt version" of the packaged font.
    pub flavor: Tag,
    /// Total size of the WOFF2 file.
    pub length: u32,
    /// Number of entries in the table directory.
    pub num_tables: u16,
    /// Reserved; set to 0.
    pub reserved: u16,
    /// Total size needed for the uncompressed font data, including the
    /// sfnt header, directory, and tables (including padding).
    pub total_sfnt_size: u32,
    /// Total length of the compressed data block.
    pub total_compressed_size: u32,
    /// Major version of the WOFF2 file.
    pub major_version: u16,
    /// Minor version of the WOFF2 file.
    pub minor_version: u16,
    /// Offset to the metadata block, from the beginning of the file.
    pub meta_offset: u32,
    /// Length of the compressed metadata block.
    pub meta_length: u32,
    /// Uncompressed size of the metadata block.
    pub meta_orig_length: u32,
    /// Offset to the private data block, from the beginning of the file.
    pub priv_offset: u32,
    /// Length of the private data block.
    pub priv_length: u32,
}

impl Woff2Header {
    /// Parse and validate a WOFF2 header. `input` must start at the
    /// beginning of the file so that the `length` field can be checked
    /// against the actual file size.
    pub fn parse(input: &mut impl Buf) -> Result<Self, Woff2Error> {
        let input_len = input.remaining() as u32;

        let signature = input.try_get_tag()?;
        bail_if!(signature != WOFF2_SIGNATURE, "not a WOFF2 font (bad signature)");

        let header = Self {
            flavor: input.try_get_tag()?,
            length: input.try_get_u32()?,
            num_tables: input.try_get_u16()?,
            reserved: input.try_get_u16()?,
            total_sfnt_size: input.try_get_u32()?,
            total_compressed_size: input.try_get_u32()?,
            major_version: input.try_get_u16()?,
            minor_version: input.try_get_u16()?,
            meta_offset: input.try_get_u32()?,
            meta_length: input.try_get_u32()?,
            meta_orig_length: input.try_get_u32()?,
            priv_offset: input.try_get_u32()?,
            priv_length: input.try_get_u32()?,
        };

        bail_if!(
            header.length != input_len,
            "reported 'length' doesn't match the actual file size"
        );
        bail_if!(header.num_tables == 0, "font has no tables");
        bail_if!(header.reserved != 0, "the 'reserved' field must be 0");
        if header.meta_offset != 0 {
            bail_if!(
                header.meta_offset >= input_len
                    || input_len - header.meta_offset < header.meta_length,
                "metadata block lies outside the file"
            );
        }
        if header.priv_offset != 0 {
            bail_if!(
                header.priv_offset >= input_len
                    || input_len - header.priv_offset < header.priv_length,
                "private data block lies outside the file"
            );
        }

        Ok(header)
    }

    pub(crate) fn pack(&self, dst: &mut impl BufMut) {
        dst.put_slice(&WOFF2_SIGNATURE.to_be_bytes());
        dst.put_slice(&self.flavor.to_be_bytes());
        dst.put_u32(self.length);
        dst.put_u16(self.num_tables);
        dst.put_u16(self.reserved);
        dst.put_u32(self.total_sfnt_size);
        dst.put_u32(self.total_compressed_size);
        dst.put_u16(self.major_version);
        dst.put_u16(self.minor_version);
        dst.put_u32(self.meta_offset);
        dst.put_u32(self.meta_length);
        dst.put_u32(self.meta_orig_length);
        dst.put_u32(self.priv_offset);
        dst.put_u32(self.priv_length);
    }
}

/// The variable-length WOFF2 table directory.
pub struct Woff2TableDirectory {
    pub tables: Vec<Woff2TableDirectoryEntry>,
    /// Expected size of the Brotli-decompressed table payload: the sum
    /// of every entry's payload occupancy.
    pub uncompressed_size: u32,
}

impl Deref for Woff2TableDirectory {
    type Target = Vec<Woff2TableDirectoryEntry>;
    fn deref(&self) -> &Self::Target {
        &self.tables
    }
}
impl DerefMut for Woff2TableDirectory {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.tables
    }
}

impl Woff2TableDirectory {
    /// Parse `num_tables` directory entries.
    ///
    /// Tables are stored directly after each other in the decompressed
    /// data block, in directory order, so each entry's offset is the
    /// running sum of the payload lengths before it.
    pub fn parse(input: &mut impl Buf, num_tables: usize) -> Result<Self, Woff2Error> {
        let mut offset: u32 = 0;
        let mut seen = HashSet::with_capacity(num_tables);
        let mut tables = Vec::with_capacity(num_tables);
        for _ in 0..num_tables {
            let mut table = Woff2TableDirectoryEntry::parse(input)?;
            table.offset = offset;

            bail_if!(
                !seen.insert(table.tag),
                "directory lists the same table twice"
            );
            let payload_length = table.payload_length();
            bail_if!(
                u32_will_overflow(offset, payload_length),
                "table payload offsets overflow"
            );
            offset += payload_length;

            tables.push(table);
        }

        Ok(Self {
            tables,
            uncompressed_size: offset,
        })
    }
}

/// One entry of the WOFF2 table directory.
///
/// <https://www.w3.org/TR/WOFF2/#table_dir_format>
#[derive(Debug, Clone)]
pub struct Woff2TableDirectoryEntry {
    pub tag: Tag,
    /// Length of the table after reconstruction.
    pub orig_length: u32,
    /// Length of the transformed table in the decompressed data block.
    /// Present exactly for the `glyf` and `loca` tables.
    pub transform_length: Option<u32>,
    /// Offset of the table within the decompressed data block. Derived
    /// while parsing the directory, never serialized.
    pub offset: u32,
}

impl Woff2TableDirectoryEntry {
    pub fn parse(input: &mut impl Buf) -> Result<Self, Woff2Error> {
        let flags = input.try_get_u8()?;
        // Bits 6-7 are the transform version. Version 0 is the only one
        // defined for glyf/loca, and the null transform for the rest.
        bail_if!(flags & 0xc0 != 0, "transform version bits 6-7 must be 0");

        let tag = if flags & UNKNOWN_TAG_INDEX == UNKNOWN_TAG_INDEX {
            input.try_get_tag()?
        } else {
            KNOWN_TABLE_TAGS[usize::from(flags & UNKNOWN_TAG_INDEX)]
        };

        let orig_length = input.try_get_variable_128_u32()?;
        let transform_length = if is_transformed_tag(tag) {
            Some(input.try_get_variable_128_u32()?)
        } else {
            None
        };
        if tag == LOCA && transform_length != Some(0) {
            bail!("the transformLength of the 'loca' table must be 0");
        }

        Ok(Self {
            tag,
            orig_length,
            transform_length,
            offset: 0, // set by Woff2TableDirectory::parse
        })
    }

    pub(crate) fn pack(&self, dst: &mut impl BufMut) {
        let index = known_tag_index(self.tag);
        dst.put_u8(index);
        if index == UNKNOWN_TAG_INDEX {
            dst.put_slice(&self.tag.to_be_bytes());
        }
        put_base_128(dst, self.orig_length);
        if let Some(transform_length) = self.transform_length {
            put_base_128(dst, transform_length);
        }
    }

    /// Number of bytes the table occupies in the decompressed data
    /// block: the transform length where a transform applies, the
    /// original length otherwise.
    pub fn payload_length(&self) -> u32 {
        self.transform_length.unwrap_or(self.orig_length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table_tags::GLYF;

    fn parse_entry(bytes: &[u8]) -> Result<Woff2TableDirectoryEntry, Woff2Error> {
        let mut input = bytes;
        Woff2TableDirectoryEntry::parse(&mut input)
    }

    #[test]
    fn known_tag_entry_round_trips() {
        let entry = Woff2TableDirectoryEntry {
            tag: Tag::new(b"cmap"),
            orig_length: 100,
            transform_length: None,
            offset: 0,
        };
        let mut packed = Vec::new();
        entry.pack(&mut packed);
        assert_eq!(packed, [0x00, 100]);

        let parsed = parse_entry(&packed).unwrap();
        assert_eq!(parsed.tag, entry.tag);
        assert_eq!(parsed.orig_length, 100);
        assert_eq!(parsed.transform_length, None);

        let entry = Woff2TableDirectoryEntry {
            orig_length: 200,
            ..entry
        };
        packed.clear();
        entry.pack(&mut packed);
        assert_eq!(packed, [0x00, 0x81, 0x48]);
        assert_eq!(parse_entry(&packed).unwrap().orig_length, 200);
    }

    #[test]
    fn unknown_tag_uses_escape() {
        let entry = Woff2TableDirectoryEntry {
            tag: Tag::new(b"MYTB"),
            orig_length: 5,
            transform_length: None,
            offset: 0,
        };
        let mut packed = Vec::new();
        entry.pack(&mut packed);
        assert_eq!(packed[0] & 0x3f, 0x3f);
        assert_eq!(&packed[1..5], b"MYTB");

        let parsed = parse_entry(&packed).unwrap();
        assert_eq!(parsed.tag, Tag::new(b"MYTB"));
    }

    #[test]
    fn glyf_entry_carries_transform_length() {
        let entry = Woff2TableDirectoryEntry {
            tag: GLYF,
            orig_length: 1000,
            transform_length: Some(700),
            offset: 0,
        };
        let mut packed = Vec::new();
        entry.pack(&mut packed);

        let parsed = parse_entry(&packed).unwrap();
        assert_eq!(parsed.orig_length, 1000);
        assert_eq!(parsed.transform_length, Some(700));
        assert_eq!(parsed.payload_length(), 700);
    }

    #[test]
    fn nonzero_loca_transform_length_is_rejected() {
        // flags = 11 (loca), origLength = 100, transformLength = 4
        assert!(parse_entry(&[11, 100, 4]).is_err());
        // transformLength = 0 is the only valid value
        let parsed = parse_entry(&[11, 100, 0]).unwrap();
        assert_eq!(parsed.payload_length(), 0);
    }

    #[test]
    fn reserved_flag_bits_are_rejected() {
        assert!(parse_entry(&[0x40, 100]).is_err());
        assert!(parse_entry(&[0x80, 100]).is_err());
    }

    #[test]
    fn directory_derives_running_offsets() {
        let mut packed = Vec::new();
        Woff2TableDirectoryEntry {
            tag: Tag::new(b"cmap"),
            orig_length: 10,
            transform_length: None,
            offset: 0,
        }
        .pack(&mut packed);
        Woff2TableDirectoryEntry {
            tag: GLYF,
            orig_length: 1000,
            transform_length: Some(100),
            offset: 0,
        }
        .pack(&mut packed);
        Woff2TableDirectoryEntry {
            tag: Tag::new(b"name"),
            orig_length: 7,
            transform_length: None,
            offset: 0,
        }
        .pack(&mut packed);

        let mut input = packed.as_slice();
        let directory = Woff2TableDirectory::parse(&mut input, 3).unwrap();
        assert_eq!(directory[0].offset, 0);
        assert_eq!(directory[1].offset, 10);
        assert_eq!(directory[2].offset, 110);
        assert_eq!(directory.uncompressed_size, 117);
        assert!(input.is_empty());
    }
}
