//! The WOFF2 read driver

use bytes::Buf;
use font_types::Tag;

use crate::compress;
use crate::directory::{Woff2Header, Woff2TableDirectory};
use crate::error::{Woff2Error, bail_if};
use crate::font::{FlavorData, Font};
use crate::table_tags::{GLYF, LOCA};
use crate::transform::glyf_decoder::reconstruct_glyf;

/// Per-table payload state. States only move forward: a table starts
/// out unread and becomes raw bytes on first access.
enum TableData {
    Unread { offset: u32, length: u32 },
    Raw(Vec<u8>),
}

struct TableEntry {
    tag: Tag,
    orig_length: u32,
    transform_length: Option<u32>,
    data: TableData,
}

/// A parsed WOFF2 file whose tables materialize lazily.
///
/// Non-transformed tables are sliced out of the decompressed payload on
/// first access; `glyf` and `loca` are reconstructed together, whichever
/// of the two is requested first.
pub struct Woff2Font {
    flavor: Tag,
    flavor_data: FlavorData,
    entries: Vec<TableEntry>,
    transform_buffer: Vec<u8>,
}

impl Woff2Font {
    /// Parse a WOFF2 file and decompress its table payload.
    pub fn read(data: &[u8]) -> Result<Self, Woff2Error> {
        let mut input = data;
        let header = Woff2Header::parse(&mut input)?;
        let directory = Woff2TableDirectory::parse(&mut input, usize::from(header.num_tables))?;

        log::debug!(
            "reading WOFF2: {} tables, {} bytes compressed, {} bytes of table payload",
            header.num_tables,
            header.total_compressed_size,
            directory.uncompressed_size
        );

        bail_if!(
            input.remaining() < header.total_compressed_size as usize,
            "compressed font data is truncated"
        );
        let compressed = &input[..header.total_compressed_size as usize];
        let transform_buffer =
            compress::decompress(compressed, directory.uncompressed_size as usize)?;

        let flavor_data = read_flavor_data(&header, data)?;

        let entries = directory
            .tables
            .into_iter()
            .map(|entry| TableEntry {
                tag: entry.tag,
                orig_length: entry.orig_length,
                transform_length: entry.transform_length,
                data: TableData::Unread {
                    offset: entry.offset,
                    length: entry.payload_length(),
                },
            })
            .collect();

        Ok(Self {
            flavor: header.flavor,
            flavor_data,
            entries,
            transform_buffer,
        })
    }

    /// The sfnt version of the packaged font.
    pub fn sfnt_version(&self) -> Tag {
        self.flavor
    }

    pub fn flavor_data(&self) -> &FlavorData {
        &self.flavor_data
    }

    pub fn num_tables(&self) -> usize {
        self.entries.len()
    }

    /// Table tags in directory order.
    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.entries.iter().map(|entry| entry.tag)
    }

    /// The raw (reconstructed) bytes of table `tag`, materializing it
    /// on first access.
    pub fn table_data(&mut self, tag: Tag) -> Result<&[u8], Woff2Error> {
        let index = self
            .entry_index(tag)
            .ok_or_else(|| Woff2Error::Consistency(format!("font has no '{tag}' table")))?;
        self.materialize(index)?;
        match &self.entries[index].data {
            TableData::Raw(bytes) => Ok(bytes),
            TableData::Unread { .. } => unreachable!("entry was just materialized"),
        }
    }

    /// Materialize every table and convert into a plain [`Font`],
    /// keeping the directory order.
    pub fn into_font(mut self) -> Result<Font, Woff2Error> {
        for index in 0..self.entries.len() {
            self.materialize(index)?;
        }
        let mut font = Font::new(self.flavor);
        for entry in self.entries {
            match entry.data {
                TableData::Raw(bytes) => font.set_table(entry.tag, bytes),
                TableData::Unread { .. } => unreachable!("all entries were materialized"),
            }
        }
        Ok(font)
    }

    fn entry_index(&self, tag: Tag) -> Option<usize> {
        self.entries.iter().position(|entry| entry.tag == tag)
    }

    fn materialize(&mut self, index: usize) -> Result<(), Woff2Error> {
        let entry = &self.entries[index];
        let TableData::Unread { offset, length } = entry.data else {
            return Ok(());
        };

        if entry.transform_length.is_some() {
            // Only glyf and loca carry a transform; the directory
            // parser enforces this already.
            if entry.tag != GLYF && entry.tag != LOCA {
                return Err(Woff2Error::UnsupportedTransform(entry.tag));
            }
            self.reconstruct_glyf_and_loca()
        } else {
            let bytes = self.payload_slice(offset, length)?.to_vec();
            self.entries[index].data = TableData::Raw(bytes);
            Ok(())
        }
    }

    /// Reconstruct `glyf` and, when present, the `loca` that is derived
    /// from it.
    fn reconstruct_glyf_and_loca(&mut self) -> Result<(), Woff2Error> {
        let glyf_index = self.entry_index(GLYF).ok_or_else(|| {
            Woff2Error::Consistency("font has a 'loca' table but no 'glyf' table".into())
        })?;
        let TableData::Unread { offset, length } = self.entries[glyf_index].data else {
            return Ok(());
        };

        let payload = self.payload_slice(offset, length)?;
        let reconstructed = reconstruct_glyf(payload)?;
        log::trace!(
            "reconstructed 'glyf': {} glyphs, {} bytes",
            reconstructed.num_glyphs,
            reconstructed.glyf_table.len()
        );

        if let Some(loca_index) = self.entry_index(LOCA) {
            let expected = self.entries[loca_index].orig_length as usize;
            if reconstructed.loca_table.len() != expected {
                return Err(Woff2Error::Consistency(format!(
                    "reconstructed 'loca' table doesn't match original size: \
                     expected {expected}, found {}",
                    reconstructed.loca_table.len()
                )));
            }
            self.entries[loca_index].data = TableData::Raw(reconstructed.loca_table);
        }
        self.entries[glyf_index].data = TableData::Raw(reconstructed.glyf_table);
        Ok(())
    }

    fn payload_slice(&self, offset: u32, length: u32) -> Result<&[u8], Woff2Error> {
        let start = offset as usize;
        let end = start + length as usize;
        self.transform_buffer
            .get(start..end)
            .ok_or(Woff2Error::Format("table payload overruns the data block"))
    }
}

fn read_flavor_data(header: &Woff2Header, file: &[u8]) -> Result<FlavorData, Woff2Error> {
    let mut flavor_data = FlavorData {
        major_version: Some(header.major_version),
        minor_version: Some(header.minor_version),
        meta_data: None,
        priv_data: None,
    };

    if header.meta_offset != 0 && header.meta_length != 0 {
        let start = header.meta_offset as usize;
        let end = start + header.meta_length as usize;
        // Range-checked during header parsing
        let compressed = &file[start..end];
        let meta = compress::decompress(compressed, header.meta_orig_length as usize)?;
        flavor_data.meta_data = Some(meta);
    }
    if header.priv_offset != 0 && header.priv_length != 0 {
        let start = header.priv_offset as usize;
        let end = start + header.priv_length as usize;
        flavor_data.priv_data = Some(file[start..end].to_vec());
    }

    Ok(flavor_data)
}
