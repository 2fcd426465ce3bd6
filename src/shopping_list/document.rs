//! PDF 1.4 writer for the shopping list export.
//!
//! Text is set in an embedded TrueType font through a Type0 font with
//! Identity-H encoding: every character is written as its glyph id, so any
//! script the font covers (Latin, Cyrillic, Greek with the bundled DejaVu
//! Sans) comes out as written. A ToUnicode map keeps the text copyable.
//! Content streams stay uncompressed; only the font program is deflated.

use std::{collections::BTreeMap, fmt::Write as _, io::Write};

use flate2::{write::ZlibEncoder, Compression};
use ttf_parser::{Face, GlyphId};

use crate::{
    constants::{
        FIRST_LINE_Y, FONT_SIZE, LINES_PER_PAGE, LINE_STEP, LINE_X, PAGE_HEIGHT, PAGE_WIDTH,
        SHOPPING_LIST_TITLE, TITLE_X, TITLE_Y,
    },
    error::Error,
};

use super::aggregate::ShoppingList;

/// DejaVu Sans, used unless a deployment configures its own font.
pub const BUNDLED_FONT: &[u8] = include_bytes!("../../assets/fonts/DejaVuSans.ttf");

const FONT_NAME: &str = "ShoppingListFont";
const FIRST_PAGE_OBJECT: usize = 8;
const BFCHAR_BLOCK: usize = 100;

/// `"{index}. {name} – {amount} {unit}"`, numbered from 1.
pub fn format_lines(list: &ShoppingList) -> Vec<String> {
    list.items()
        .iter()
        .enumerate()
        .map(|(i, item)| {
            format!(
                "{}. {} \u{2013} {} {}",
                i + 1,
                item.name,
                item.amount,
                item.measurement_unit
            )
        })
        .collect()
}

/// Fails when `font` is not a TrueType/OpenType font.
pub fn check_font(font: &[u8]) -> Result<(), Error> {
    GlyphEncoder::new(font).map(|_| ())
}

pub fn render(list: &ShoppingList, font: &[u8]) -> Result<Vec<u8>, Error> {
    let mut encoder = GlyphEncoder::new(font)?;
    let lines = format_lines(list);

    let mut pages: Vec<Vec<u8>> = lines
        .chunks(LINES_PER_PAGE)
        .enumerate()
        .map(|(i, chunk)| {
            page_content(&mut encoder, (i == 0).then_some(SHOPPING_LIST_TITLE), chunk)
        })
        .collect();
    if pages.is_empty() {
        pages.push(page_content(&mut encoder, Some(SHOPPING_LIST_TITLE), &[]));
    }

    log::debug!(
        "Rendering shopping list with {} items on {} pages",
        list.len(),
        pages.len()
    );

    write_document(&pages, &encoder, font)
}

/// Maps text to glyph ids and remembers which glyphs were used.
struct GlyphEncoder<'a> {
    face: Face<'a>,
    used: BTreeMap<u16, char>,
}

impl<'a> GlyphEncoder<'a> {
    fn new(font: &'a [u8]) -> Result<Self, Error> {
        let face = Face::parse(font, 0)
            .map_err(|e| Error::Internal(format!("Could not load shopping list font: {e}")))?;

        Ok(Self {
            face,
            used: BTreeMap::new(),
        })
    }

    /// Hex glyph string; characters missing from the font become `?`.
    fn encode(&mut self, text: &str) -> String {
        let mut hex = String::with_capacity(text.len() * 4);
        for c in text.chars() {
            let (glyph, c) = match self.face.glyph_index(c) {
                Some(glyph) => (glyph, c),
                None => (self.face.glyph_index('?').unwrap_or(GlyphId(0)), '?'),
            };
            self.used.entry(glyph.0).or_insert(c);
            let _ = write!(hex, "{:04X}", glyph.0);
        }
        hex
    }

    /// Font units to the 1000-unit glyph space of PDF.
    fn scale(&self, value: i16) -> i32 {
        (f32::from(value) * 1000.0 / f32::from(self.face.units_per_em())).round() as i32
    }

    fn width(&self, glyph: u16) -> i32 {
        self.face
            .glyph_hor_advance(GlyphId(glyph))
            .map(|w| (f32::from(w) * 1000.0 / f32::from(self.face.units_per_em())).round() as i32)
            .unwrap_or(0)
    }

    fn widths(&self) -> String {
        self.used
            .keys()
            .map(|glyph| format!("{glyph} [{}]", self.width(*glyph)))
            .collect::<Vec<String>>()
            .join(" ")
    }

    fn descriptor(&self) -> String {
        let bbox = self.face.global_bounding_box();
        let ascent = self.scale(self.face.ascender());
        format!(
            "<< /Type /FontDescriptor /FontName /{FONT_NAME} /Flags 32 \
             /FontBBox [{} {} {} {}] /ItalicAngle 0 /Ascent {ascent} /Descent {} \
             /CapHeight {} /StemV 80 /FontFile2 6 0 R >>",
            self.scale(bbox.x_min),
            self.scale(bbox.y_min),
            self.scale(bbox.x_max),
            self.scale(bbox.y_max),
            self.scale(self.face.descender()),
            self.face
                .capital_height()
                .map(|h| self.scale(h))
                .unwrap_or(ascent),
        )
    }

    fn to_unicode(&self) -> Vec<u8> {
        let mut cmap = String::from(
            "/CIDInit /ProcSet findresource begin\n12 dict begin\nbegincmap\n\
             /CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n\
             /CMapName /Adobe-Identity-UCS def\n/CMapType 2 def\n\
             1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n",
        );

        let entries: Vec<(&u16, &char)> = self.used.iter().collect();
        for block in entries.chunks(BFCHAR_BLOCK) {
            let _ = writeln!(cmap, "{} beginbfchar", block.len());
            for (glyph, c) in block {
                let mut units = [0u16; 2];
                let utf16: String = c
                    .encode_utf16(&mut units)
                    .iter()
                    .map(|u| format!("{u:04X}"))
                    .collect();
                let _ = writeln!(cmap, "<{glyph:04X}> <{utf16}>");
            }
            cmap.push_str("endbfchar\n");
        }

        cmap.push_str(
            "endcmap\nCMapName currentdict /CMapResource defineresource pop\nend\nend",
        );
        cmap.into_bytes()
    }
}

fn page_content(encoder: &mut GlyphEncoder, title: Option<&str>, lines: &[String]) -> Vec<u8> {
    let mut content = vec![];
    if let Some(title) = title {
        text_op(&mut content, TITLE_X, TITLE_Y, &encoder.encode(title));
    }
    for (i, line) in lines.iter().enumerate() {
        let y = FIRST_LINE_Y - LINE_STEP * i as i32;
        text_op(&mut content, LINE_X, y, &encoder.encode(line));
    }
    content
}

fn text_op(out: &mut Vec<u8>, x: i32, y: i32, glyphs: &str) {
    let _ = write!(out, "BT\n/F1 {FONT_SIZE} Tf\n{x} {y} Td\n<{glyphs}> Tj\nET\n");
}

fn deflate(data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::Internal(format!("Could not compress font: {e}")))?;
    encoder
        .finish()
        .map_err(|e| Error::Internal(format!("Could not compress font: {e}")))
}

fn stream(extra: &str, data: &[u8]) -> Vec<u8> {
    let mut out = format!("<< /Length {}{extra} >>\nstream\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\nendstream");
    out
}

fn write_document(
    pages: &[Vec<u8>],
    encoder: &GlyphEncoder,
    font: &[u8],
) -> Result<Vec<u8>, Error> {
    // 1 catalog, 2 page tree, 3-7 font objects, then a (page, content) pair per page
    let object_count = FIRST_PAGE_OBJECT - 1 + pages.len() * 2;
    let mut out: Vec<u8> = b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec();
    let mut offsets: Vec<usize> = Vec::with_capacity(object_count);

    let page_ids: Vec<usize> = (0..pages.len())
        .map(|i| FIRST_PAGE_OBJECT + i * 2)
        .collect();
    let kids = page_ids
        .iter()
        .map(|id| format!("{id} 0 R"))
        .collect::<Vec<String>>()
        .join(" ");

    let mut object = |out: &mut Vec<u8>, body: &[u8]| {
        offsets.push(out.len());
        let id = offsets.len();
        let _ = writeln!(out, "{id} 0 obj");
        out.extend_from_slice(body);
        out.extend_from_slice(b"\nendobj\n");
    };

    object(&mut out, b"<< /Type /Catalog /Pages 2 0 R >>");
    object(
        &mut out,
        format!("<< /Type /Pages /Kids [{kids}] /Count {} >>", pages.len()).as_bytes(),
    );
    object(
        &mut out,
        format!(
            "<< /Type /Font /Subtype /Type0 /BaseFont /{FONT_NAME} /Encoding /Identity-H \
             /DescendantFonts [4 0 R] /ToUnicode 7 0 R >>"
        )
        .as_bytes(),
    );
    object(
        &mut out,
        format!(
            "<< /Type /Font /Subtype /CIDFontType2 /BaseFont /{FONT_NAME} \
             /CIDSystemInfo << /Registry (Adobe) /Ordering (Identity) /Supplement 0 >> \
             /FontDescriptor 5 0 R /CIDToGIDMap /Identity /DW 1000 /W [{}] >>",
            encoder.widths()
        )
        .as_bytes(),
    );
    object(&mut out, encoder.descriptor().as_bytes());
    object(
        &mut out,
        &stream(
            &format!(" /Length1 {} /Filter /FlateDecode", font.len()),
            &deflate(font)?,
        ),
    );
    object(&mut out, &stream("", &encoder.to_unicode()));

    for (content, page_id) in pages.iter().zip(&page_ids) {
        object(
            &mut out,
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
                 /Resources << /Font << /F1 3 0 R >> >> /Contents {} 0 R >>",
                page_id + 1
            )
            .as_bytes(),
        );
        object(&mut out, &stream("", content));
    }

    let xref_offset = out.len();
    let _ = write!(out, "xref\n0 {}\n0000000000 65535 f \n", object_count + 1);
    for offset in &offsets {
        let _ = write!(out, "{offset:010} 00000 n \n");
    }
    let _ = write!(
        out,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
        object_count + 1
    );

    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use claims::assert_err;

    use crate::{schema::CartLine, shopping_list::aggregate::aggregate};

    use super::*;

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    fn list_of(n: usize) -> ShoppingList {
        aggregate((0..n).map(|i| CartLine::new(&format!("Item {i}"), "g", 1)))
    }

    fn pdf(list: &ShoppingList) -> Vec<u8> {
        render(list, BUNDLED_FONT).unwrap()
    }

    /// Every shown string, decoded back to text through the ToUnicode map.
    fn shown_text(pdf: &[u8]) -> Vec<String> {
        let text = String::from_utf8_lossy(pdf);

        let mut glyphs: HashMap<String, String> = HashMap::new();
        let mut in_block = false;
        for line in text.lines() {
            if line.ends_with(" beginbfchar") {
                in_block = true;
            } else if line == "endbfchar" {
                in_block = false;
            } else if in_block {
                let (glyph, unicode) = line.split_once(' ').unwrap();
                let unicode = unicode.trim_matches(|c| c == '<' || c == '>');
                let units: Vec<u16> = (0..unicode.len())
                    .step_by(4)
                    .map(|i| u16::from_str_radix(&unicode[i..i + 4], 16).unwrap())
                    .collect();
                glyphs.insert(
                    glyph.trim_matches(|c| c == '<' || c == '>').to_string(),
                    String::from_utf16(&units).unwrap(),
                );
            }
        }

        text.lines()
            .filter_map(|l| l.strip_prefix('<')?.strip_suffix("> Tj"))
            .filter(|hex| hex.len() % 4 == 0 && hex.chars().all(|c| c.is_ascii_hexdigit()))
            .map(|hex| {
                (0..hex.len())
                    .step_by(4)
                    .map(|i| glyphs[&hex[i..i + 4]].clone())
                    .collect()
            })
            .collect()
    }

    #[test]
    fn lines_are_numbered_from_one() {
        let list = aggregate(vec![
            CartLine::new("Salt", "g", 10),
            CartLine::new("Egg", "pc", 2),
            CartLine::new("Salt", "g", 5),
        ]);

        assert_eq!(
            format_lines(&list),
            vec!["1. Salt \u{2013} 15 g", "2. Egg \u{2013} 2 pc"]
        );
    }

    #[test]
    fn empty_list_renders_only_the_header() {
        let pdf = pdf(&ShoppingList::default());

        assert!(pdf.starts_with(b"%PDF-1.4"));
        assert!(pdf.ends_with(b"%%EOF\n"));
        assert!(contains(&pdf, b"/Count 1 "));
        assert_eq!(shown_text(&pdf), vec!["Shopping list"]);
    }

    #[test]
    fn cyrillic_names_survive_rendering() {
        let list = aggregate(vec![
            CartLine::new("Соль", "г", 10),
            CartLine::new("Молоко", "мл", 200),
            CartLine::new("Соль", "г", 5),
        ]);
        let pdf = pdf(&list);

        assert_eq!(
            shown_text(&pdf),
            vec![
                "Shopping list",
                "1. Соль \u{2013} 15 г",
                "2. Молоко \u{2013} 200 мл"
            ]
        );
        assert!(contains(&pdf, b"/Encoding /Identity-H"));
        assert!(contains(&pdf, b"/FontFile2 6 0 R"));
    }

    #[test]
    fn glyphs_missing_from_the_font_become_question_marks() {
        let list = aggregate(vec![CartLine::new("米", "g", 1)]);
        assert_eq!(shown_text(&pdf(&list))[1], "1. ? \u{2013} 1 g");
    }

    #[test]
    fn first_item_sits_below_the_header() {
        let pdf = pdf(&aggregate(vec![CartLine::new("Salt", "g", 15)]));
        assert!(contains(&pdf, b"100 750 Td\n<"));
        assert!(contains(&pdf, b"80 700 Td\n<"));
    }

    #[test]
    fn twenty_six_lines_fit_on_one_page() {
        let pdf = pdf(&list_of(LINES_PER_PAGE));
        assert!(contains(&pdf, b"/Count 1 "));
        assert!(contains(&pdf, b"80 75 Td"));
    }

    #[test]
    fn overflow_starts_a_new_page() {
        let pdf = pdf(&list_of(LINES_PER_PAGE + 1));
        let shown = shown_text(&pdf);

        assert!(contains(&pdf, b"/Count 2 "));
        assert!(contains(&pdf, b"/Kids [8 0 R 10 0 R]"));
        assert_eq!(shown.iter().filter(|l| *l == "Shopping list").count(), 1);
        assert_eq!(shown.last().unwrap(), "27. Item 26 \u{2013} 1 g");
    }

    #[test]
    fn xref_offsets_point_at_objects() {
        let pdf = pdf(&list_of(3));
        let xref = pdf.windows(6).rposition(|w| w == b"\nxref\n").unwrap() + 1;
        let entries: Vec<usize> = String::from_utf8_lossy(&pdf[xref..])
            .lines()
            .skip(3)
            .take_while(|l| l.ends_with(" n "))
            .map(|l| l[..10].parse().unwrap())
            .collect();

        assert_eq!(entries.len(), 9);
        for (i, offset) in entries.iter().enumerate() {
            assert!(pdf[*offset..].starts_with(format!("{} 0 obj", i + 1).as_bytes()));
        }
    }

    #[test]
    fn garbage_font_is_rejected() {
        assert_err!(check_font(b"not a font"));
        assert_err!(render(&list_of(1), b"not a font"));
    }
}
