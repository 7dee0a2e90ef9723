//! Decoding of the transformed `glyf` table
//!
//! <https://www.w3.org/TR/WOFF2/#glyf_table_format>

use arrayvec::ArrayVec;
use bytes::{Buf, BufMut};

use crate::buffer::{BufExt, round4};
use crate::error::{Woff2Error, bail_if, inconsistent_if, u32_will_overflow, usize_will_overflow};
use crate::glyf::{
    BBox, FLAG_ARG_1_AND_2_ARE_WORDS, FLAG_MORE_COMPONENTS, FLAG_WE_HAVE_A_SCALE,
    FLAG_WE_HAVE_A_TWO_BY_TWO, FLAG_WE_HAVE_AN_X_AND_Y_SCALE, FLAG_WE_HAVE_INSTRUCTIONS, Point,
    compile_loca, write_glyph_points,
};
use crate::variable_length::BufVariableExt;

const NUM_SUB_STREAMS: usize = 7;
/// Fixed transformed-glyf header: version, numGlyphs, indexFormat and
/// one u32 size per sub-stream.
pub(crate) const TRANSFORMED_GLYF_HEADER_SIZE: usize = 4 + 2 + 2 + NUM_SUB_STREAMS * 4;

// 98% of Google Fonts have no glyph above 5k bytes. Largest glyph ever observed was 72k bytes
const DEFAULT_GLYPH_BUF_SIZE: usize = 5120;

/// The tables recovered from one transformed-`glyf` payload.
pub(crate) struct GlyfAndLoca {
    pub num_glyphs: u16,
    /// loca index format, as dictated by the transformed glyf header.
    pub index_format: u16,
    /// Reconstructed OpenType "glyf" table.
    pub glyf_table: Vec<u8>,
    /// Reconstructed OpenType "loca" table.
    pub loca_table: Vec<u8>,
}

/// Decode a WOFF2 transformed glyf table, reconstructing both `glyf`
/// and its `loca` companion.
pub(crate) fn reconstruct_glyf(data: &[u8]) -> Result<GlyfAndLoca, Woff2Error> {
    GlyfDecoder::new(data)?.reconstruct()
}

struct GlyfDecoder<'a> {
    n_contour_stream: &'a [u8],
    n_points_stream: &'a [u8],
    flag_stream: &'a [u8],
    glyph_stream: &'a [u8],
    composite_stream: &'a [u8],
    bbox_bitmap: &'a [u8],
    bbox_stream: &'a [u8],
    instruction_stream: &'a [u8],
    glyph_buf: Vec<u8>,

    num_glyphs: u16,
    index_format: u16,
}

impl GlyfDecoder<'_> {
    fn new(data: &[u8]) -> Result<GlyfDecoder<'_>, Woff2Error> {
        let mut input = data;
        let _version: u32 = input.try_get_u32()?;
        let num_glyphs = input.try_get_u16()?;
        let index_format = input.try_get_u16()?;

        let mut offset: usize = TRANSFORMED_GLYF_HEADER_SIZE;
        bail_if!(offset > data.len(), "transformed 'glyf' table is too short");

        // Invariant from here on: data.len() >= offset
        let mut substreams: ArrayVec<&[u8], NUM_SUB_STREAMS> = ArrayVec::new();
        for _ in 0..NUM_SUB_STREAMS {
            let substream_size = input.try_get_u32()? as usize;
            bail_if!(
                substream_size > data.len() - offset,
                "transformed 'glyf' sub-stream overruns the table"
            );
            substreams.push(&data[offset..offset + substream_size]);
            offset += substream_size;
        }
        inconsistent_if!(
            offset != data.len(),
            "incorrect size of transformed 'glyf' table: expected {offset}, received {} bytes",
            data.len()
        );

        let bitmap_length = ((num_glyphs as usize + 31) >> 5) << 2;
        bail_if!(
            bitmap_length > substreams[5].len(),
            "bounding-box bitmap overruns its stream"
        );

        let n_contour_stream = substreams[0];
        bail_if!(
            n_contour_stream.len() != num_glyphs as usize * 2,
            "nContour stream size disagrees with numGlyphs"
        );

        let (bbox_bitmap, bbox_stream) = substreams[5].split_at(bitmap_length);

        Ok(GlyfDecoder {
            n_contour_stream,
            n_points_stream: substreams[1],
            flag_stream: substreams[2],
            glyph_stream: substreams[3],
            composite_stream: substreams[4],
            bbox_bitmap,
            bbox_stream,
            instruction_stream: substreams[6],
            glyph_buf: Vec::with_capacity(DEFAULT_GLYPH_BUF_SIZE),
            num_glyphs,
            index_format,
        })
    }

    fn reconstruct(mut self) -> Result<GlyfAndLoca, Woff2Error> {
        let mut glyf_table: Vec<u8> = Vec::with_capacity(self.num_glyphs as usize * 12);
        let mut loca_values: Vec<u32> = Vec::with_capacity(self.num_glyphs as usize + 1);

        for i in 0..self.num_glyphs as usize {
            loca_values.push(glyf_table.len() as u32);

            let n_contours: i16 = self.n_contour_stream.try_get_i16()?;
            let glyph_has_bbox = (self.bbox_bitmap[i >> 3] & (0x80 >> (i & 7))) != 0;

            self.glyph_buf.clear();
            if n_contours < 0 {
                // composite glyphs must have an explicit bbox
                inconsistent_if!(!glyph_has_bbox, "no bbox values for composite glyph {i}");
                self.parse_composite_glyph(n_contours)?;
            } else if n_contours > 0 {
                self.parse_simple_glyph(n_contours as usize, glyph_has_bbox)?;
            } else {
                // n_contours == 0; empty glyph. Must NOT have a bbox.
                inconsistent_if!(glyph_has_bbox, "empty glyph {i} has a bbox");
            }

            glyf_table.extend_from_slice(&self.glyph_buf);
            glyf_table.resize(round4!(glyf_table.len()), 0);
        }

        // loca[n] equals the length of the glyph data ('glyf') table
        loca_values.push(glyf_table.len() as u32);

        let mut loca_table = Vec::with_capacity(loca_values.len() * 4);
        compile_loca(&loca_values, self.index_format, &mut loca_table)?;

        Ok(GlyfAndLoca {
            num_glyphs: self.num_glyphs,
            index_format: self.index_format,
            glyf_table,
            loca_table,
        })
    }

    /// Decode one composite glyph into `self.glyph_buf`.
    fn parse_composite_glyph(&mut self, n_contours: i16) -> Result<(), Woff2Error> {
        // Walk a copy of the composite stream to size the component
        // list, then rewind and copy the counted bytes verbatim.
        let mut ro_composite_stream = self.composite_stream;
        let (composite_size, have_instructions) =
            compute_size_of_composite(&mut ro_composite_stream)?;

        let instruction_size: u16 = if have_instructions {
            self.glyph_stream.try_get_variable_255_u16()?
        } else {
            0
        };

        let size_needed = 12 + composite_size + instruction_size as usize;
        self.glyph_buf.reserve(size_needed);

        self.glyph_buf.put_i16(n_contours);
        self.bbox_stream
            .try_read_bytes_into(8, &mut self.glyph_buf)?;
        self.composite_stream
            .try_read_bytes_into(composite_size, &mut self.glyph_buf)?;

        if have_instructions {
            self.glyph_buf.put_u16(instruction_size);
            self.instruction_stream
                .try_read_bytes_into(instruction_size as usize, &mut self.glyph_buf)?;
        }

        Ok(())
    }

    /// Decode one simple glyph into `self.glyph_buf`.
    fn parse_simple_glyph(
        &mut self,
        n_contours: usize,
        glyph_has_bbox: bool,
    ) -> Result<(), Woff2Error> {
        let mut n_points_vec: Vec<u16> = Vec::with_capacity(n_contours);
        let mut total_n_points: u32 = 0;
        for _ in 0..n_contours {
            let n_points_contour = self.n_points_stream.try_get_variable_255_u16()?;
            n_points_vec.push(n_points_contour);
            bail_if!(
                u32_will_overflow(total_n_points, n_points_contour as u32),
                "contour point count overflows"
            );
            total_n_points += n_points_contour as u32;
        }
        let flag_size = total_n_points as usize;
        bail_if!(
            flag_size > self.flag_stream.len(),
            "not enough flag-stream data"
        );

        let mut points = Vec::with_capacity(flag_size);
        let triplet_bytes_consumed =
            decode_triplets(&self.flag_stream[..flag_size], self.glyph_stream, &mut points)?;
        self.flag_stream.advance(flag_size);
        self.glyph_stream.advance(triplet_bytes_consumed);

        let instruction_size = self.glyph_stream.try_get_variable_255_u16()?;

        let size_needed = 12 + 2 * n_contours + 5 * flag_size + instruction_size as usize;
        self.glyph_buf.reserve(size_needed);

        self.glyph_buf.put_i16(n_contours as i16);

        if glyph_has_bbox {
            self.bbox_stream
                .try_read_bytes_into(8, &mut self.glyph_buf)?;
        } else {
            BBox::of_points(&points).pack(&mut self.glyph_buf);
        }

        let mut end_point: i32 = -1;
        for contour in n_points_vec {
            end_point += i32::from(contour);
            bail_if!(end_point >= 65536, "glyph has more than 65536 points");
            self.glyph_buf.put_u16(end_point as u16);
        }

        self.glyph_buf.put_u16(instruction_size);
        self.instruction_stream
            .try_read_bytes_into(instruction_size as usize, &mut self.glyph_buf)?;

        write_glyph_points(&points, &mut self.glyph_buf)?;

        Ok(())
    }
}

/// Walk the component records of one composite glyph, returning their
/// total size and whether any component carries instructions.
fn compute_size_of_composite(
    composite_stream: &mut impl Buf,
) -> Result<(usize, bool), Woff2Error> {
    let mut bytes_read: usize = 0;
    let mut we_have_instructions = false;
    let mut flags: u16 = FLAG_MORE_COMPONENTS;
    while flags & FLAG_MORE_COMPONENTS != 0 {
        flags = composite_stream.try_get_u16()?;
        we_have_instructions |= flags & FLAG_WE_HAVE_INSTRUCTIONS != 0;
        let mut arg_size: usize = 2; // glyph index
        if flags & FLAG_ARG_1_AND_2_ARE_WORDS != 0 {
            arg_size += 4;
        } else {
            arg_size += 2;
        }
        if flags & FLAG_WE_HAVE_A_SCALE != 0 {
            arg_size += 2;
        } else if flags & FLAG_WE_HAVE_AN_X_AND_Y_SCALE != 0 {
            arg_size += 4;
        } else if flags & FLAG_WE_HAVE_A_TWO_BY_TWO != 0 {
            arg_size += 8;
        }
        bail_if!(
            composite_stream.remaining() < arg_size,
            "composite stream is truncated"
        );
        composite_stream.advance(arg_size);

        // 2 bytes for the flags + arg_size
        bytes_read += 2 + arg_size;
    }

    Ok((bytes_read, we_have_instructions))
}

/// Decode one triplet-encoded point per flag byte, accumulating
/// absolute coordinates into `result`. Returns the number of triplet
/// bytes consumed.
fn decode_triplets(
    flags_in: &[u8],
    triplets: &[u8],
    result: &mut Vec<Point>,
) -> Result<usize, Woff2Error> {
    #[inline(always)]
    fn with_sign(flag: i32, baseval: i32) -> i32 {
        // Precondition: 0 <= baseval < 65536 (to avoid integer overflow)
        if flag & 1 != 0 { baseval } else { -baseval }
    }

    #[inline(always)]
    fn safe_add(a: i32, b: i32) -> Result<i32, Woff2Error> {
        a.checked_add(b)
            .ok_or(Woff2Error::Format("glyph coordinate overflows"))
    }

    let mut x: i32 = 0;
    let mut y: i32 = 0;
    let mut triplet_index: usize = 0;

    for &flag in flags_in {
        let on_curve = flag >> 7 == 0;
        let flag = i32::from(flag & 0x7f);

        let n_data_bytes: usize = if flag < 84 {
            1
        } else if flag < 120 {
            2
        } else if flag < 124 {
            3
        } else {
            4
        };
        bail_if!(
            usize_will_overflow(triplet_index, n_data_bytes)
                || triplet_index + n_data_bytes > triplets.len(),
            "not enough glyph-stream data for triplets"
        );

        let b = |i: usize| i32::from(triplets[triplet_index + i]);

        let dx: i32;
        let dy: i32;
        if flag < 10 {
            dx = 0;
            dy = with_sign(flag, ((flag & 14) << 7) + b(0));
        } else if flag < 20 {
            dx = with_sign(flag, (((flag - 10) & 14) << 7) + b(0));
            dy = 0;
        } else if flag < 84 {
            let b0 = flag - 20;
            let b1 = b(0);
            dx = with_sign(flag, 1 + (b0 & 0x30) + (b1 >> 4));
            dy = with_sign(flag >> 1, 1 + ((b0 & 0x0c) << 2) + (b1 & 0x0f));
        } else if flag < 120 {
            let b0 = flag - 84;
            dx = with_sign(flag, 1 + ((b0 / 12) << 8) + b(0));
            dy = with_sign(flag >> 1, 1 + (((b0 % 12) >> 2) << 8) + b(1));
        } else if flag < 124 {
            let b1 = b(1);
            dx = with_sign(flag, (b(0) << 4) + (b1 >> 4));
            dy = with_sign(flag >> 1, ((b1 & 0x0f) << 8) + b(2));
        } else {
            dx = with_sign(flag, (b(0) << 8) + b(1));
            dy = with_sign(flag >> 1, (b(2) << 8) + b(3));
        }
        triplet_index += n_data_bytes;
        x = safe_add(x, dx)?;
        y = safe_add(y, dy)?;

        result.push(Point { x, y, on_curve });
    }

    Ok(triplet_index)
}
