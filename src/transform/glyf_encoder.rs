//! Encoding of the `glyf` table into its WOFF2 transformed form
//!
//! <https://www.w3.org/TR/WOFF2/#glyf_table_format>

use bytes::BufMut;

use crate::error::{Woff2Error, bail, bail_if, inconsistent_if};
use crate::glyf::{BBox, Glyph, GlyphComponent, GlyphShape, Point};
use crate::variable_length::put_255_u16;

/// Encode glyphs into the seven-stream transformed `glyf` payload.
///
/// `index_format` is `head.indexToLocFormat` of the normalized font and
/// is recorded in the transformed header so that `loca` can be
/// reconstructed in the same format.
pub(crate) fn transform_glyf(glyphs: &[Glyph], index_format: u16) -> Result<Vec<u8>, Woff2Error> {
    bail_if!(glyphs.len() > usize::from(u16::MAX), "font has more than 65535 glyphs");
    let num_glyphs = glyphs.len() as u16;

    let mut encoder = GlyfEncoder::new(num_glyphs);
    for (glyph_id, glyph) in glyphs.iter().enumerate() {
        encoder.encode_glyph(glyph_id, glyph)?;
    }
    Ok(encoder.finish(num_glyphs, index_format))
}

struct GlyfEncoder {
    n_contour_stream: Vec<u8>,
    n_points_stream: Vec<u8>,
    flag_stream: Vec<u8>,
    glyph_stream: Vec<u8>,
    composite_stream: Vec<u8>,
    bbox_bitmap: Vec<u8>,
    bbox_stream: Vec<u8>,
    instruction_stream: Vec<u8>,
}

impl GlyfEncoder {
    fn new(num_glyphs: u16) -> Self {
        let bitmap_size = ((num_glyphs as usize + 31) >> 5) << 2;
        Self {
            n_contour_stream: Vec::with_capacity(num_glyphs as usize * 2),
            n_points_stream: Vec::new(),
            flag_stream: Vec::new(),
            glyph_stream: Vec::new(),
            composite_stream: Vec::new(),
            bbox_bitmap: vec![0; bitmap_size],
            bbox_stream: Vec::new(),
            instruction_stream: Vec::new(),
        }
    }

    fn encode_glyph(&mut self, glyph_id: usize, glyph: &Glyph) -> Result<(), Woff2Error> {
        self.n_contour_stream.put_i16(glyph.number_of_contours);
        match &glyph.shape {
            GlyphShape::Empty => Ok(()),
            GlyphShape::Composite {
                components,
                instructions,
            } => {
                self.encode_components(components, instructions.as_deref())?;
                // composites always store their bbox explicitly
                self.put_bbox(glyph_id, glyph.bbox);
                Ok(())
            }
            GlyphShape::Simple {
                end_pts_of_contours,
                points,
                instructions,
            } => {
                self.encode_coordinates(end_pts_of_contours, points)?;
                self.encode_instructions(instructions)?;
                // explicit bbox only when it differs from the computed one
                if BBox::of_points(points) != glyph.bbox {
                    self.put_bbox(glyph_id, glyph.bbox);
                }
                Ok(())
            }
        }
    }

    fn encode_components(
        &mut self,
        components: &[GlyphComponent],
        instructions: Option<&[u8]>,
    ) -> Result<(), Woff2Error> {
        inconsistent_if!(components.is_empty(), "composite glyph has no components");
        let last = components.len() - 1;
        for (i, component) in components.iter().enumerate() {
            let have_instructions = i == last && instructions.is_some();
            component.pack(i != last, have_instructions, &mut self.composite_stream);
        }
        if let Some(instructions) = instructions {
            self.encode_instructions(instructions)?;
        }
        Ok(())
    }

    fn encode_coordinates(
        &mut self,
        end_pts_of_contours: &[u16],
        points: &[Point],
    ) -> Result<(), Woff2Error> {
        let mut last_end_point: i32 = -1;
        for &end_point in end_pts_of_contours {
            let points_of_contour = i32::from(end_point) - last_end_point;
            inconsistent_if!(
                !(0..=0xffff).contains(&points_of_contour),
                "contour point count {points_of_contour} is not representable"
            );
            put_255_u16(&mut self.n_points_stream, points_of_contour as u16);
            last_end_point = i32::from(end_point);
        }
        inconsistent_if!(
            last_end_point + 1 != points.len() as i32,
            "glyph has {} points but endPtsOfContours ends at {last_end_point}",
            points.len()
        );

        let mut last_x: i32 = 0;
        let mut last_y: i32 = 0;
        for point in points {
            self.encode_triplet(point.x - last_x, point.y - last_y, point.on_curve)?;
            last_x = point.x;
            last_y = point.y;
        }
        Ok(())
    }

    fn encode_instructions(&mut self, instructions: &[u8]) -> Result<(), Woff2Error> {
        inconsistent_if!(
            instructions.len() > usize::from(u16::MAX),
            "glyph instructions exceed 65535 bytes: {}",
            instructions.len()
        );
        put_255_u16(&mut self.glyph_stream, instructions.len() as u16);
        self.instruction_stream.extend_from_slice(instructions);
        Ok(())
    }

    fn put_bbox(&mut self, glyph_id: usize, bbox: BBox) {
        self.bbox_bitmap[glyph_id >> 3] |= 0x80 >> (glyph_id & 7);
        bbox.pack(&mut self.bbox_stream);
    }

    /// Append the flag byte and 0-4 triplet bytes for one relative
    /// point, choosing the smallest encoding class that fits.
    fn encode_triplet(&mut self, x: i32, y: i32, on_curve: bool) -> Result<(), Woff2Error> {
        let abs_x = x.unsigned_abs() as i32;
        let abs_y = y.unsigned_abs() as i32;
        let on_curve_bit: i32 = if on_curve { 0 } else { 128 };
        let x_sign_bit: i32 = if x < 0 { 0 } else { 1 };
        let y_sign_bit: i32 = if y < 0 { 0 } else { 1 };
        let xy_sign_bits = x_sign_bit + 2 * y_sign_bit;

        let flags = &mut self.flag_stream;
        let triplets = &mut self.glyph_stream;
        if x == 0 && abs_y < 1280 {
            flags.put_u8((on_curve_bit + ((abs_y & 0xf00) >> 7) + y_sign_bit) as u8);
            triplets.put_u8((abs_y & 0xff) as u8);
        } else if y == 0 && abs_x < 1280 {
            flags.put_u8((on_curve_bit + 10 + ((abs_x & 0xf00) >> 7) + x_sign_bit) as u8);
            triplets.put_u8((abs_x & 0xff) as u8);
        } else if abs_x < 65 && abs_y < 65 {
            flags.put_u8(
                (on_curve_bit
                    + 20
                    + ((abs_x - 1) & 0x30)
                    + (((abs_y - 1) & 0x30) >> 2)
                    + xy_sign_bits) as u8,
            );
            triplets.put_u8(((((abs_x - 1) & 0xf) << 4) | ((abs_y - 1) & 0xf)) as u8);
        } else if abs_x < 769 && abs_y < 769 {
            flags.put_u8(
                (on_curve_bit
                    + 84
                    + 12 * (((abs_x - 1) & 0x300) >> 8)
                    + (((abs_y - 1) & 0x300) >> 6)
                    + xy_sign_bits) as u8,
            );
            triplets.put_u8(((abs_x - 1) & 0xff) as u8);
            triplets.put_u8(((abs_y - 1) & 0xff) as u8);
        } else if abs_x < 4096 && abs_y < 4096 {
            flags.put_u8((on_curve_bit + 120 + xy_sign_bits) as u8);
            triplets.put_u8((abs_x >> 4) as u8);
            triplets.put_u8((((abs_x & 0xf) << 4) | (abs_y >> 8)) as u8);
            triplets.put_u8((abs_y & 0xff) as u8);
        } else if abs_x < 65536 && abs_y < 65536 {
            flags.put_u8((on_curve_bit + 124 + xy_sign_bits) as u8);
            triplets.put_u8((abs_x >> 8) as u8);
            triplets.put_u8((abs_x & 0xff) as u8);
            triplets.put_u8((abs_y >> 8) as u8);
            triplets.put_u8((abs_y & 0xff) as u8);
        } else {
            bail!("glyph coordinate delta exceeds 65535");
        }
        Ok(())
    }

    fn finish(self, num_glyphs: u16, index_format: u16) -> Vec<u8> {
        let bbox_stream_size = self.bbox_bitmap.len() + self.bbox_stream.len();
        let total = super::glyf_decoder::TRANSFORMED_GLYF_HEADER_SIZE
            + self.n_contour_stream.len()
            + self.n_points_stream.len()
            + self.flag_stream.len()
            + self.glyph_stream.len()
            + self.composite_stream.len()
            + bbox_stream_size
            + self.instruction_stream.len();

        let mut data = Vec::with_capacity(total);
        data.put_u32(0); // version
        data.put_u16(num_glyphs);
        data.put_u16(index_format);
        data.put_u32(self.n_contour_stream.len() as u32);
        data.put_u32(self.n_points_stream.len() as u32);
        data.put_u32(self.flag_stream.len() as u32);
        data.put_u32(self.glyph_stream.len() as u32);
        data.put_u32(self.composite_stream.len() as u32);
        data.put_u32(bbox_stream_size as u32);
        data.put_u32(self.instruction_stream.len() as u32);
        data.extend_from_slice(&self.n_contour_stream);
        data.extend_from_slice(&self.n_points_stream);
        data.extend_from_slice(&self.flag_stream);
        data.extend_from_slice(&self.glyph_stream);
        data.extend_from_slice(&self.composite_stream);
        data.extend_from_slice(&self.bbox_bitmap);
        data.extend_from_slice(&self.bbox_stream);
        data.extend_from_slice(&self.instruction_stream);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glyf::{compile_glyf, parse_glyf};
    use crate::transform::glyf_decoder::reconstruct_glyf;

    fn triangle(bbox: BBox) -> Glyph {
        Glyph::simple(
            bbox,
            vec![2],
            vec![
                Point {
                    x: 0,
                    y: 0,
                    on_curve: true,
                },
                Point {
                    x: 10,
                    y: 0,
                    on_curve: true,
                },
                Point {
                    x: 5,
                    y: 10,
                    on_curve: true,
                },
            ],
            Vec::new(),
        )
    }

    fn matching_bbox() -> BBox {
        BBox {
            x_min: 0,
            y_min: 0,
            x_max: 10,
            y_max: 10,
        }
    }

    #[test]
    fn empty_font_produces_bare_header() {
        let data = transform_glyf(&[], 0).unwrap();
        assert_eq!(data.len(), super::super::glyf_decoder::TRANSFORMED_GLYF_HEADER_SIZE);
        // version, numGlyphs, indexFormat and all stream sizes are zero
        assert!(data.iter().all(|&byte| byte == 0));
    }

    #[test]
    fn triangle_streams_match_the_triplet_table() {
        // Relative deltas (0,0), (+10,0), (-5,+10) hit encoding rows
        // 1, 2 and 3 in turn.
        let data = transform_glyf(&[triangle(matching_bbox())], 0).unwrap();

        let header = super::super::glyf_decoder::TRANSFORMED_GLYF_HEADER_SIZE;
        let n_contour = &data[header..header + 2];
        assert_eq!(n_contour, [0x00, 0x01]);
        let n_points = &data[header + 2..header + 3];
        assert_eq!(n_points, [0x03]);
        let flags = &data[header + 3..header + 6];
        assert_eq!(flags, [0x01, 0x0b, 0x16]);
        // triplet bytes then the 255UInt16 instruction length 0
        let glyph_stream = &data[header + 6..header + 10];
        assert_eq!(glyph_stream, [0x00, 0x0a, 0x49, 0x00]);
        // bbox matches the computed one, so only the empty bitmap remains
        let bitmap = &data[header + 10..header + 14];
        assert_eq!(bitmap, [0x00, 0x00, 0x00, 0x00]);
        assert_eq!(data.len(), header + 14);
    }

    #[test]
    fn triangle_round_trips_through_the_decoder() {
        let glyphs = vec![Glyph::empty(), triangle(matching_bbox())];
        let data = transform_glyf(&glyphs, 0).unwrap();
        let reconstructed = reconstruct_glyf(&data).unwrap();
        assert_eq!(reconstructed.num_glyphs, 2);

        let (expected_glyf, expected_locations) = compile_glyf(&glyphs, 4).unwrap();
        assert_eq!(reconstructed.glyf_table, expected_glyf);
        let reparsed = parse_glyf(&reconstructed.glyf_table, &expected_locations).unwrap();
        assert_eq!(reparsed, glyphs);
    }

    #[test]
    fn mismatched_bbox_is_stored_explicitly() {
        // stored bbox is wider than the computed one and must survive
        let bbox = BBox {
            x_min: -1,
            y_min: 0,
            x_max: 10,
            y_max: 10,
        };
        let data = transform_glyf(&[triangle(bbox)], 0).unwrap();
        let reconstructed = reconstruct_glyf(&data).unwrap();
        let glyphs = parse_glyf(
            &reconstructed.glyf_table,
            &[0, reconstructed.glyf_table.len() as u32],
        )
        .unwrap();
        assert_eq!(glyphs[0].bbox, bbox);
    }

    #[test]
    fn composite_with_instructions_round_trips() {
        let component_a = GlyphComponent::new(
            crate::glyf::FLAG_ARG_1_AND_2_ARE_WORDS,
            1,
            &[0x00, 0x0a, 0x00, 0x14],
        )
        .unwrap();
        let component_b = GlyphComponent::new(0, 2, &[0x05, 0x07]).unwrap();
        let composite = Glyph::composite(
            BBox {
                x_min: 0,
                y_min: 0,
                x_max: 30,
                y_max: 30,
            },
            vec![component_a, component_b],
            Some(vec![0xb1, 0x01]),
        );
        let glyphs = vec![Glyph::empty(), triangle(matching_bbox()), composite];

        let transformed = transform_glyf(&glyphs, 1).unwrap();
        let reconstructed = reconstruct_glyf(&transformed).unwrap();
        assert_eq!(reconstructed.index_format, 1);

        let (expected_glyf, expected_locations) = compile_glyf(&glyphs, 4).unwrap();
        assert_eq!(reconstructed.glyf_table, expected_glyf);

        let mut expected_loca = Vec::new();
        crate::glyf::compile_loca(&expected_locations, 1, &mut expected_loca).unwrap();
        assert_eq!(reconstructed.loca_table, expected_loca);

        // Positional component flags (MORE_COMPONENTS) are recomputed on
        // compile, so compare the parsed shape rather than the structs.
        let reparsed = parse_glyf(&reconstructed.glyf_table, &expected_locations).unwrap();
        assert_eq!(reparsed[0], glyphs[0]);
        assert_eq!(reparsed[1], glyphs[1]);
        match &reparsed[2].shape {
            GlyphShape::Composite {
                components,
                instructions,
            } => {
                assert_eq!(components.len(), 2);
                assert_eq!(components[0].glyph_index, 1);
                assert_eq!(components[1].glyph_index, 2);
                assert_eq!(instructions.as_deref(), Some(&[0xb1, 0x01][..]));
            }
            shape => panic!("expected a composite glyph, got {shape:?}"),
        }
        assert_eq!(reparsed[2].bbox, glyphs[2].bbox);
    }

    #[test]
    fn oversized_delta_is_rejected() {
        let points = vec![
            Point {
                x: 0,
                y: 0,
                on_curve: true,
            },
            Point {
                x: 70000,
                y: 0,
                on_curve: true,
            },
        ];
        let glyph = Glyph::simple(BBox::of_points(&points), vec![1], points, Vec::new());
        assert!(transform_glyf(&[glyph], 0).is_err());
    }
}
