//! The WOFF2 write driver

use bytes::BufMut;
use font_types::Tag;

use crate::buffer::round4;
use crate::checksum::{
    CHECKSUM_MAGIC, HEAD_CHECKSUM_ADJUSTMENT_OFFSET, compute_checksum, compute_head_checksum,
    search_range_fields,
};
use crate::compress::{self, CompressionMode};
use crate::directory::{WOFF2_HEADER_SIZE, Woff2Header, Woff2TableDirectoryEntry};
use crate::error::{Woff2Error, bail, bail_if};
use crate::font::{
    FlavorData, Font, SFNT_ENTRY_SIZE, SFNT_HEADER_SIZE, SFNT_VERSION_APPLE, SFNT_VERSION_CFF,
    SFNT_VERSION_TRUETYPE, head_font_revision, head_set_index_to_loc_format,
    head_set_transform_flag, head_index_to_loc_format, maxp_num_glyphs,
};
use crate::glyf::{Glyph, choose_index_format, compile_glyf, compile_loca, parse_glyf, parse_loca};
use crate::table_tags::{DSIG, GLYF, HEAD, LOCA, MAXP};
use crate::transform::transform_table;

/// Glyph records are padded to this size during normalization. The
/// WOFF2 spec no longer requires aligned glyph offsets, but the legacy
/// OpenType sanitizers still shipped in browsers reject unpadded glyf
/// tables, so both the writer and the reconstruction side keep them
/// aligned.
const GLYPH_PADDING: usize = 4;

/// Packs raw sfnt tables into a WOFF2 file.
///
/// Tables are pushed one at a time with [`set_table`](Self::set_table)
/// and serialized by [`finish`](Self::finish).
pub struct Woff2Writer {
    sfnt_version: Tag,
    flavor_data: FlavorData,
    tables: Vec<(Tag, Vec<u8>)>,
}

impl Woff2Writer {
    pub fn new(sfnt_version: Tag) -> Self {
        Self {
            sfnt_version,
            flavor_data: FlavorData::default(),
            tables: Vec::new(),
        }
    }

    pub fn set_flavor_data(&mut self, flavor_data: FlavorData) {
        self.flavor_data = flavor_data;
    }

    /// Associate a new table with raw data.
    ///
    /// `DSIG` is silently discarded: the encoding process invalidates
    /// any digital signature. Re-setting an existing tag is an error.
    pub fn set_table(&mut self, tag: Tag, data: Vec<u8>) -> Result<(), Woff2Error> {
        if tag == DSIG {
            log::debug!("dropping 'DSIG' table: the transform invalidates signatures");
            return Ok(());
        }
        if self.tables.iter().any(|(existing, _)| *existing == tag) {
            return Err(Woff2Error::Consistency(format!(
                "cannot rewrite '{tag}' table"
            )));
        }
        self.tables.push((tag, data));
        Ok(())
    }

    /// Serialize the WOFF2 file.
    pub fn finish(mut self) -> Result<Vec<u8>, Woff2Error> {
        bail_if!(self.tables.is_empty(), "font has no tables");
        bail_if!(self.tables.len() > usize::from(u16::MAX), "font has too many tables");

        let is_truetype = if self.sfnt_version == SFNT_VERSION_TRUETYPE
            || self.sfnt_version == SFNT_VERSION_APPLE
        {
            true
        } else if self.sfnt_version == SFNT_VERSION_CFF {
            false
        } else {
            bail!("not a TrueType or OpenType font (bad sfntVersion)");
        };

        // Normalize glyf/loca, keeping the parsed glyphs for the
        // transform pass, and mark the head table as transformed.
        let glyphs = if is_truetype {
            Some(self.normalize_glyf_and_loca()?)
        } else if self.table(GLYF).is_some() {
            // CFF flavor with TrueType outlines present; transform the
            // glyphs as stored.
            Some(self.parse_glyphs()?)
        } else {
            None
        };
        head_set_transform_flag(self.require_table_mut(HEAD)?)?;

        // The directory and the data block must share one order, and
        // the legacy sanitizers require that order to be alphabetical.
        self.tables.sort_by_key(|(tag, _)| *tag);

        // Reconstructed-sfnt checksums, lengths and offsets, for the
        // checkSumAdjustment calculation.
        let num_tables = self.tables.len() as u16;
        let mut orig_offset = SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * self.tables.len();
        let mut sfnt_records = Vec::with_capacity(self.tables.len());
        for (tag, data) in &self.tables {
            let checksum = if *tag == HEAD {
                compute_head_checksum(data)?
            } else {
                compute_checksum(data)
            };
            sfnt_records.push(SfntRecord {
                tag: *tag,
                checksum,
                orig_offset: orig_offset as u32,
                orig_length: data.len() as u32,
            });
            orig_offset += round4!(data.len());
        }
        let total_sfnt_size = orig_offset as u32;

        // Transform pass: build the uncompressed data block and the
        // matching directory entries in the same (sorted) order.
        let mut transform_buffer: Vec<u8> = Vec::new();
        let mut entries: Vec<Woff2TableDirectoryEntry> = Vec::with_capacity(self.tables.len());
        let mut head_payload_offset: Option<usize> = None;
        for (tag, data) in &self.tables {
            let offset = transform_buffer.len();
            let transform_length = if *tag == GLYF || *tag == LOCA {
                let (glyphs, index_format) = glyphs
                    .as_ref()
                    .ok_or_else(|| Woff2Error::Consistency(format!(
                        "font has a '{tag}' table but no TrueType outlines"
                    )))?;
                let payload = transform_table(*tag, glyphs, *index_format)?;
                transform_buffer.extend_from_slice(&payload);
                Some(payload.len() as u32)
            } else {
                if *tag == HEAD {
                    head_payload_offset = Some(offset);
                }
                transform_buffer.extend_from_slice(data);
                None
            };
            entries.push(Woff2TableDirectoryEntry {
                tag: *tag,
                orig_length: data.len() as u32,
                transform_length,
                offset: offset as u32,
            });
        }

        // checkSumAdjustment over the reconstructed sfnt layout,
        // patched into the head payload inside the data block.
        let head_payload_offset = head_payload_offset
            .ok_or_else(|| Woff2Error::Consistency("missing required table 'head'".into()))?;
        let adjustment = master_checksum_adjustment(self.sfnt_version, &sfnt_records);
        let patch_at = head_payload_offset + HEAD_CHECKSUM_ADJUSTMENT_OFFSET;
        transform_buffer[patch_at..patch_at + 4].copy_from_slice(&adjustment.to_be_bytes());

        let compressed = compress::compress(&transform_buffer, CompressionMode::Font)?;
        log::debug!(
            "writing WOFF2: {num_tables} tables, {} bytes of table payload, {} compressed",
            transform_buffer.len(),
            compressed.len()
        );

        let mut entry_bytes: Vec<u8> = Vec::new();
        for entry in &entries {
            entry.pack(&mut entry_bytes);
        }

        // File layout: header ++ directory ++ compressed data (padded),
        // then metadata (padded when private data follows), then
        // private data.
        let directory_size = WOFF2_HEADER_SIZE + entry_bytes.len();
        let mut length = round4!(directory_size + compressed.len());

        let mut meta_offset = 0u32;
        let mut meta_length = 0u32;
        let mut meta_orig_length = 0u32;
        let compressed_meta = match &self.flavor_data.meta_data {
            Some(meta) if !meta.is_empty() => {
                let compressed_meta = compress::compress(meta, CompressionMode::Text)?;
                meta_offset = length as u32;
                meta_length = compressed_meta.len() as u32;
                meta_orig_length = meta.len() as u32;
                length += compressed_meta.len();
                Some(compressed_meta)
            }
            _ => None,
        };

        let mut priv_offset = 0u32;
        let mut priv_length = 0u32;
        if let Some(priv_data) = &self.flavor_data.priv_data {
            if !priv_data.is_empty() {
                length = round4!(length);
                priv_offset = length as u32;
                priv_length = priv_data.len() as u32;
                length += priv_data.len();
            }
        }

        let (major_version, minor_version) = self.version()?;
        let header = Woff2Header {
            flavor: self.sfnt_version,
            length: length as u32,
            num_tables,
            reserved: 0,
            total_sfnt_size,
            total_compressed_size: compressed.len() as u32,
            major_version,
            minor_version,
            meta_offset,
            meta_length,
            meta_orig_length,
            priv_offset,
            priv_length,
        };

        let mut out: Vec<u8> = Vec::with_capacity(length);
        header.pack(&mut out);
        out.extend_from_slice(&entry_bytes);
        out.extend_from_slice(&compressed);
        out.resize(round4!(out.len()), 0);
        if let Some(compressed_meta) = compressed_meta {
            out.extend_from_slice(&compressed_meta);
            if priv_length != 0 {
                out.resize(round4!(out.len()), 0);
            }
        }
        if let Some(priv_data) = &self.flavor_data.priv_data {
            if !priv_data.is_empty() {
                debug_assert_eq!(out.len(), priv_offset as usize);
                out.extend_from_slice(priv_data);
            }
        }
        debug_assert_eq!(out.len(), length);

        Ok(out)
    }

    /// Recompile glyf and loca with aligned glyph offsets and update
    /// `head.indexToLocFormat` to the most compact format. Returns the
    /// parsed glyphs and the chosen format for the transform pass.
    fn normalize_glyf_and_loca(&mut self) -> Result<(Vec<Glyph>, u16), Woff2Error> {
        let (glyphs, _) = self.parse_glyphs()?;

        let (glyf_data, locations) = compile_glyf(&glyphs, GLYPH_PADDING)?;
        let index_format = choose_index_format(&locations);
        let mut loca_data = Vec::new();
        compile_loca(&locations, index_format, &mut loca_data)?;

        *self.require_table_mut(GLYF)? = glyf_data;
        *self.require_table_mut(LOCA)? = loca_data;
        head_set_index_to_loc_format(self.require_table_mut(HEAD)?, index_format)?;

        Ok((glyphs, index_format))
    }

    /// Parse the stored glyf table using loca, head and maxp.
    fn parse_glyphs(&self) -> Result<(Vec<Glyph>, u16), Woff2Error> {
        let head = self.require_table(HEAD)?;
        let maxp = self.require_table(MAXP)?;
        let loca = self.require_table(LOCA)?;
        let glyf = self.require_table(GLYF)?;

        let num_glyphs = maxp_num_glyphs(maxp)?;
        let index_format = head_index_to_loc_format(head)?;
        let locations = parse_loca(loca, index_format, num_glyphs)?;
        let glyphs = parse_glyf(glyf, &locations)?;
        Ok((glyphs, index_format))
    }

    /// The header version pair: explicit flavor data, or
    /// `head.fontRevision` when the caller supplied none.
    fn version(&self) -> Result<(u16, u16), Woff2Error> {
        match (self.flavor_data.major_version, self.flavor_data.minor_version) {
            (Some(major), Some(minor)) => Ok((major, minor)),
            _ => head_font_revision(self.require_table(HEAD)?),
        }
    }

    fn table(&self, tag: Tag) -> Option<&[u8]> {
        self.tables
            .iter()
            .find(|(existing, _)| *existing == tag)
            .map(|(_, data)| data.as_slice())
    }

    fn require_table(&self, tag: Tag) -> Result<&[u8], Woff2Error> {
        self.table(tag)
            .ok_or_else(|| Woff2Error::Consistency(format!("missing required table '{tag}'")))
    }

    fn require_table_mut(&mut self, tag: Tag) -> Result<&mut Vec<u8>, Woff2Error> {
        self.tables
            .iter_mut()
            .find(|(existing, _)| *existing == tag)
            .map(|(_, data)| data)
            .ok_or_else(|| Woff2Error::Consistency(format!("missing required table '{tag}'")))
    }
}

struct SfntRecord {
    tag: Tag,
    checksum: u32,
    orig_offset: u32,
    orig_length: u32,
}

/// `checkSumAdjustment` for the reconstructed sfnt: the magic constant
/// minus the checksums of every table and of the synthetic sfnt
/// directory the reader would rebuild.
fn master_checksum_adjustment(sfnt_version: Tag, records: &[SfntRecord]) -> u32 {
    let mut directory: Vec<u8> = Vec::with_capacity(SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * records.len());
    directory.put_slice(&sfnt_version.to_be_bytes());
    directory.put_u16(records.len() as u16);
    let (search_range, entry_selector, range_shift) = search_range_fields(records.len() as u16);
    directory.put_u16(search_range);
    directory.put_u16(entry_selector);
    directory.put_u16(range_shift);
    for record in records {
        directory.put_slice(&record.tag.to_be_bytes());
        directory.put_u32(record.checksum);
        directory.put_u32(record.orig_offset);
        directory.put_u32(record.orig_length);
    }

    let mut total = compute_checksum(&directory);
    for record in records {
        total = total.wrapping_add(record.checksum);
    }
    CHECKSUM_MAGIC.wrapping_sub(total)
}

/// Pack `font` into a WOFF2 file.
pub fn write(font: &Font, flavor_data: FlavorData) -> Result<Vec<u8>, Woff2Error> {
    if let (Some(order), Some(maxp)) = (font.glyph_order_unchecked(), font.table(MAXP)) {
        let num_glyphs = usize::from(maxp_num_glyphs(maxp)?);
        if order.len() != num_glyphs {
            return Err(Woff2Error::Consistency(format!(
                "incorrect glyphOrder: expected {num_glyphs} glyphs, found {}",
                order.len()
            )));
        }
    }

    let mut writer = Woff2Writer::new(font.sfnt_version());
    writer.set_flavor_data(flavor_data);
    for (tag, data) in font.tables() {
        writer.set_table(*tag, data.clone())?;
    }
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsig_is_dropped_silently() {
        let mut writer = Woff2Writer::new(SFNT_VERSION_TRUETYPE);
        writer.set_table(DSIG, vec![1, 2, 3]).unwrap();
        assert!(writer.tables.is_empty());
    }

    #[test]
    fn duplicate_tables_are_rejected() {
        let mut writer = Woff2Writer::new(SFNT_VERSION_TRUETYPE);
        writer.set_table(HEAD, vec![0; 54]).unwrap();
        assert!(writer.set_table(HEAD, vec![0; 54]).is_err());
    }

    #[test]
    fn unknown_flavor_is_rejected() {
        let mut writer = Woff2Writer::new(Tag::new(b"junk"));
        writer.set_table(Tag::new(b"name"), vec![0; 8]).unwrap();
        assert!(writer.finish().is_err());
    }

    #[test]
    fn missing_head_is_rejected() {
        let mut writer = Woff2Writer::new(SFNT_VERSION_CFF);
        writer.set_table(Tag::new(b"CFF "), vec![0; 8]).unwrap();
        assert!(writer.finish().is_err());
    }
}
