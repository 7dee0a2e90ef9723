/* Copyright 2014 Google Inc. All Rights Reserved.

   Distributed under MIT license.
   See file LICENSE for detail or copy at https://opensource.org/licenses/MIT
*/

//! Font table tags

use font_types::Tag;

pub const GLYF: Tag = Tag::new(b"glyf");
pub const LOCA: Tag = Tag::new(b"loca");
pub const HEAD: Tag = Tag::new(b"head");
pub const MAXP: Tag = Tag::new(b"maxp");
pub const DSIG: Tag = Tag::new(b"DSIG");

/// Flags value signalling that an explicit 4-byte tag follows the flags
/// byte in a table directory entry.
pub const UNKNOWN_TAG_INDEX: u8 = 0x3f;

/// The "known tags" table from the WOFF2 specification. A directory
/// entry whose low six flag bits are an index into this table encodes
/// its tag in a single byte. Encoder and decoder must agree on the
/// order, so don't reorder.
pub static KNOWN_TABLE_TAGS: [Tag; 63] = [
    Tag::new(b"cmap"), // 0
    Tag::new(b"head"), // 1
    Tag::new(b"hhea"), // 2
    Tag::new(b"hmtx"), // 3
    Tag::new(b"maxp"), // 4
    Tag::new(b"name"), // 5
    Tag::new(b"OS/2"), // 6
    Tag::new(b"post"), // 7
    Tag::new(b"cvt "), // 8
    Tag::new(b"fpgm"), // 9
    Tag::new(b"glyf"), // 10
    Tag::new(b"loca"), // 11
    Tag::new(b"prep"), // 12
    Tag::new(b"CFF "), // 13
    Tag::new(b"VORG"), // 14
    Tag::new(b"EBDT"), // 15
    Tag::new(b"EBLC"), // 16
    Tag::new(b"gasp"), // 17
    Tag::new(b"hdmx"), // 18
    Tag::new(b"kern"), // 19
    Tag::new(b"LTSH"), // 20
    Tag::new(b"PCLT"), // 21
    Tag::new(b"VDMX"), // 22
    Tag::new(b"vhea"), // 23
    Tag::new(b"vmtx"), // 24
    Tag::new(b"BASE"), // 25
    Tag::new(b"GDEF"), // 26
    Tag::new(b"GPOS"), // 27
    Tag::new(b"GSUB"), // 28
    Tag::new(b"EBSC"), // 29
    Tag::new(b"JSTF"), // 30
    Tag::new(b"MATH"), // 31
    Tag::new(b"CBDT"), // 32
    Tag::new(b"CBLC"), // 33
    Tag::new(b"COLR"), // 34
    Tag::new(b"CPAL"), // 35
    Tag::new(b"SVG "), // 36
    Tag::new(b"sbix"), // 37
    Tag::new(b"acnt"), // 38
    Tag::new(b"avar"), // 39
    Tag::new(b"bdat"), // 40
    Tag::new(b"bloc"), // 41
    Tag::new(b"bsln"), // 42
    Tag::new(b"cvar"), // 43
    Tag::new(b"fdsc"), // 44
    Tag::new(b"feat"), // 45
    Tag::new(b"fmtx"), // 46
    Tag::new(b"fvar"), // 47
    Tag::new(b"gvar"), // 48
    Tag::new(b"hsty"), // 49
    Tag::new(b"just"), // 50
    Tag::new(b"lcar"), // 51
    Tag::new(b"mort"), // 52
    Tag::new(b"morx"), // 53
    Tag::new(b"opbd"), // 54
    Tag::new(b"prop"), // 55
    Tag::new(b"trak"), // 56
    Tag::new(b"Zapf"), // 57
    Tag::new(b"Silf"), // 58
    Tag::new(b"Glat"), // 59
    Tag::new(b"Gloc"), // 60
    Tag::new(b"Feat"), // 61
    Tag::new(b"Sill"), // 62
];

/// Index of `tag` in the known-tags table, or [`UNKNOWN_TAG_INDEX`] if
/// the tag is not one of the 63 known ones.
pub fn known_tag_index(tag: Tag) -> u8 {
    KNOWN_TABLE_TAGS
        .iter()
        .position(|&known| known == tag)
        .map_or(UNKNOWN_TAG_INDEX, |index| index as u8)
}

/// Whether `tag` names one of the two tables with a defined transform.
pub(crate) fn is_transformed_tag(tag: Tag) -> bool {
    tag == GLYF || tag == LOCA
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_tags_index_round_trips() {
        for (index, &tag) in KNOWN_TABLE_TAGS.iter().enumerate() {
            assert_eq!(known_tag_index(tag), index as u8);
        }
    }

    #[test]
    fn unknown_tag_escapes() {
        assert_eq!(known_tag_index(Tag::new(b"ZZZZ")), UNKNOWN_TAG_INDEX);
        assert_eq!(known_tag_index(DSIG), UNKNOWN_TAG_INDEX);
    }

    #[test]
    fn glyf_and_loca_are_adjacent() {
        assert_eq!(known_tag_index(GLYF), 10);
        assert_eq!(known_tag_index(LOCA), 11);
    }
}
