use crate::canvas::{Canvas, TextEncoder};
use crate::context::TemplateContext;
use crate::error::DocGenError;
use crate::font::{LoadedFont, ResolvedFont};
use lopdf::{Document as LoDocument, Object as LoObject, Stream as LoStream, dictionary};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_FIELD_SIZE: f32 = 10.0;
pub const DEFAULT_GRID_STEP: f32 = 50.0;
const GRID_GRAY: f32 = 0.8;
const GRID_LINE_WIDTH: f32 = 0.25;
const GRID_LABEL_SIZE: f32 = 6.0;
pub(crate) const OVERLAY_FONT_RESOURCE: &str = "DGF1";

fn default_field_size() -> f32 {
    DEFAULT_FIELD_SIZE
}

fn default_grid_step() -> f32 {
    DEFAULT_GRID_STEP
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PdfFieldMapping {
    #[serde(default)]
    pub pages: Vec<PageMapping>,
    #[serde(default)]
    pub debug_names: bool,
    #[serde(default)]
    pub grid: Option<GridSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageMapping {
    #[serde(default)]
    pub width: Option<f32>,
    #[serde(default)]
    pub height: Option<f32>,
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub name: String,
    pub x: f32,
    pub y: f32,
    #[serde(default = "default_field_size")]
    pub size: f32,
    #[serde(default)]
    pub max_width: Option<f32>,
    #[serde(default)]
    pub leading: Option<f32>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_grid_step")]
    pub step: f32,
}

impl PdfFieldMapping {
    pub fn from_json_str(raw: &str) -> Result<Self, DocGenError> {
        serde_json::from_str(raw)
            .map_err(|err| DocGenError::InvalidConfiguration(format!("pdf field mapping: {err}")))
    }

    pub fn grid_step(&self) -> Option<f32> {
        self.grid.as_ref().filter(|g| g.enabled).map(GridSpec::effective_step)
    }
}

impl FieldMapping {
    pub fn new(name: impl Into<String>, x: f32, y: f32) -> Self {
        Self {
            name: name.into(),
            x,
            y,
            size: DEFAULT_FIELD_SIZE,
            max_width: None,
            leading: None,
            label: None,
        }
    }

    pub fn effective_leading(&self) -> f32 {
        self.leading.unwrap_or((self.size * 1.2).max(2.0))
    }
}

impl GridSpec {
    pub fn effective_step(&self) -> f32 {
        if self.step.is_finite() && self.step > 0.0 {
            self.step
        } else {
            DEFAULT_GRID_STEP
        }
    }
}

// Greedy word wrap; a word wider than `max_width` stays alone on its line.
pub fn wrap_lines(text: &str, max_width: Option<f32>, font: &ResolvedFont, size: f32) -> Vec<String> {
    let Some(max_width) = max_width.filter(|w| w.is_finite() && *w > 0.0) else {
        return vec![text.to_string()];
    };
    let mut lines = Vec::new();
    let mut line = String::new();
    for word in text.split_whitespace() {
        let candidate = if line.is_empty() {
            word.to_string()
        } else {
            format!("{line} {word}")
        };
        if font.text_width(&candidate, size) <= max_width {
            line = candidate;
        } else {
            if !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            line = word.to_string();
        }
    }
    if !line.is_empty() {
        lines.push(line);
    }
    lines
}

pub struct OverlayPage {
    pub page_index: usize,
    pub canvas: Canvas,
    pub fields_drawn: usize,
}

pub fn build_overlay_canvas(
    page_index: usize,
    page: &PageMapping,
    width: f32,
    height: f32,
    mapping: &PdfFieldMapping,
    values: &TemplateContext,
    font: &ResolvedFont,
) -> OverlayPage {
    let mut canvas = Canvas::new(width, height);
    if let Some(step) = mapping.grid_step() {
        draw_grid(&mut canvas, step);
    }

    let mut fields_drawn = 0;
    for field in &page.fields {
        let text = if mapping.debug_names {
            field.label.as_deref().unwrap_or(field.name.as_str())
        } else {
            match values.non_blank(&field.name) {
                Some(value) => value,
                None => continue,
            }
        };
        let leading = field.effective_leading();
        canvas.set_font_size(field.size);
        for (idx, line) in wrap_lines(text, field.max_width, font, field.size)
            .iter()
            .enumerate()
        {
            canvas.draw_string(field.x, field.y - idx as f32 * leading, line);
        }
        fields_drawn += 1;
    }

    OverlayPage {
        page_index,
        canvas,
        fields_drawn,
    }
}

fn draw_grid(canvas: &mut Canvas, step: f32) {
    let (width, height) = (canvas.width(), canvas.height());
    canvas.save_state();
    canvas.set_stroke_gray(GRID_GRAY);
    canvas.set_fill_gray(GRID_GRAY);
    canvas.set_line_width(GRID_LINE_WIDTH);
    canvas.set_font_size(GRID_LABEL_SIZE);
    let mut x = 0.0;
    while x <= width {
        canvas.line(x, 0.0, x, height);
        canvas.draw_string(x + 2.0, 2.0, &format!("{}", x.trunc() as i64));
        x += step;
    }
    let mut y = 0.0;
    while y <= height {
        canvas.line(0.0, y, width, y);
        canvas.draw_string(2.0, y + 2.0, &format!("{}", y.trunc() as i64));
        y += step;
    }
    canvas.restore_state();
}

pub struct OverlayPageSpec<'a> {
    pub page_index: usize,
    pub mapping: &'a PageMapping,
    pub width: f32,
    pub height: f32,
}

pub struct OverlayDocument {
    pub document: LoDocument,
    pub page_indices: Vec<usize>,
    pub fields_drawn: usize,
}

pub fn build_overlay_document(
    specs: &[OverlayPageSpec<'_>],
    mapping: &PdfFieldMapping,
    values: &TemplateContext,
    font: &ResolvedFont,
) -> OverlayDocument {
    let pages: Vec<OverlayPage> = specs
        .par_iter()
        .map(|spec| {
            build_overlay_canvas(
                spec.page_index,
                spec.mapping,
                spec.width,
                spec.height,
                mapping,
                values,
                font,
            )
        })
        .filter(|page| !page.canvas.is_blank())
        .collect();

    let mut doc = LoDocument::with_version("1.5");
    let pages_id = doc.new_object_id();
    let (encoder, font_id): (Box<dyn TextEncoder>, lopdf::ObjectId) = match font {
        ResolvedFont::Loaded(loaded) => {
            let runs: Vec<&str> = pages.iter().flat_map(|p| p.canvas.text_runs()).collect();
            let font_id = add_type0_font(&mut doc, loaded, &runs);
            (Box::new(CidEncoder { font: loaded.clone() }), font_id)
        }
        ResolvedFont::BasicFallback => {
            let font_id = doc.add_object(dictionary! {
                "Type" => "Font",
                "Subtype" => "Type1",
                "BaseFont" => "Helvetica",
                "Encoding" => "WinAnsiEncoding",
            });
            (Box::new(WinAnsiEncoder), font_id)
        }
    };

    let mut kids = Vec::with_capacity(pages.len());
    let mut page_indices = Vec::with_capacity(pages.len());
    let mut fields_drawn = 0;
    for page in &pages {
        let content = page.canvas.to_content(encoder.as_ref());
        let content_id = doc.add_object(LoStream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "Font" => dictionary! { OVERLAY_FONT_RESOURCE => font_id },
            },
            "MediaBox" => vec![
                0.into(),
                0.into(),
                LoObject::Real(page.canvas.width() as _),
                LoObject::Real(page.canvas.height() as _),
            ],
        });
        kids.push(page_id.into());
        page_indices.push(page.page_index);
        fields_drawn += page.fields_drawn;
    }
    doc.objects.insert(
        pages_id,
        LoObject::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_indices.len() as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    OverlayDocument {
        document: doc,
        page_indices,
        fields_drawn,
    }
}

struct WinAnsiEncoder;

impl TextEncoder for WinAnsiEncoder {
    fn font_resource(&self) -> &str {
        OVERLAY_FONT_RESOURCE
    }

    fn encode(&self, text: &str) -> String {
        format!("({})", encode_winansi_pdf_string(text))
    }
}

struct CidEncoder {
    font: LoadedFont,
}

impl TextEncoder for CidEncoder {
    fn font_resource(&self) -> &str {
        OVERLAY_FONT_RESOURCE
    }

    fn encode(&self, text: &str) -> String {
        let mut out = String::from("<");
        for glyph in self.font.shape(text) {
            out.push_str(&format!("{:04X}", glyph.gid));
        }
        out.push('>');
        out
    }
}

fn add_type0_font(doc: &mut LoDocument, font: &LoadedFont, runs: &[&str]) -> lopdf::ObjectId {
    let mut widths: BTreeMap<u16, u16> = BTreeMap::new();
    let mut unicode: BTreeMap<u16, String> = BTreeMap::new();
    for run in runs {
        for glyph in font.shape(run) {
            widths.entry(glyph.gid).or_insert_with(|| font.advance_1000(glyph.gid));
        }
        for ch in run.chars() {
            let gid = font.glyph_id(ch);
            if gid != 0 {
                unicode.entry(gid).or_insert_with(|| ch.to_string());
            }
        }
    }

    let metrics = font.metrics_1000();
    let file_id = doc.add_object(LoStream::new(
        dictionary! { "Length1" => font.data().len() as i64 },
        font.data().to_vec(),
    ));
    let descriptor_id = doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => LoObject::Name(font.name.as_bytes().to_vec()),
        "Flags" => 32,
        "FontBBox" => vec![
            (metrics.bbox.0 as i64).into(),
            (metrics.bbox.1 as i64).into(),
            (metrics.bbox.2 as i64).into(),
            (metrics.bbox.3 as i64).into(),
        ],
        "ItalicAngle" => 0,
        "Ascent" => metrics.ascent as i64,
        "Descent" => metrics.descent as i64,
        "CapHeight" => metrics.ascent as i64,
        "StemV" => 80,
        "FontFile2" => file_id,
    });

    let mut w_array: Vec<LoObject> = Vec::with_capacity(widths.len() * 2);
    for (gid, width) in &widths {
        w_array.push((*gid as i64).into());
        w_array.push(LoObject::Array(vec![(*width as i64).into()]));
    }
    let cid_font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "CIDFontType2",
        "BaseFont" => LoObject::Name(font.name.as_bytes().to_vec()),
        "CIDSystemInfo" => dictionary! {
            "Registry" => LoObject::string_literal("Adobe"),
            "Ordering" => LoObject::string_literal("Identity"),
            "Supplement" => 0,
        },
        "FontDescriptor" => descriptor_id,
        "W" => w_array,
        "CIDToGIDMap" => "Identity",
    });
    let to_unicode_id = doc.add_object(LoStream::new(
        dictionary! {},
        to_unicode_cmap(&unicode).into_bytes(),
    ));
    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => LoObject::Name(font.name.as_bytes().to_vec()),
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![cid_font_id.into()],
        "ToUnicode" => to_unicode_id,
    })
}

fn to_unicode_cmap(glyph_map: &BTreeMap<u16, String>) -> String {
    let entries: Vec<(u16, &String)> = glyph_map.iter().map(|(g, s)| (*g, s)).collect();

    let mut out = String::new();
    out.push_str("/CIDInit /ProcSet findresource begin\n");
    out.push_str("12 dict begin\n");
    out.push_str("begincmap\n");
    out.push_str("/CIDSystemInfo << /Registry (Adobe) /Ordering (Identity) /Supplement 0 >> def\n");
    out.push_str("/CMapName /Adobe-Identity-UCS def\n");
    out.push_str("/CMapType 2 def\n");
    out.push_str("1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n");

    for chunk in entries.chunks(100) {
        out.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for (gid, s) in chunk {
            let mut uni = String::new();
            for ch in s.chars() {
                let code = ch as u32;
                if code <= 0xFFFF {
                    uni.push_str(&format!("{:04X}", code));
                } else {
                    let code = code - 0x1_0000;
                    let high = 0xD800 | (code >> 10);
                    let low = 0xDC00 | (code & 0x3FF);
                    uni.push_str(&format!("{:04X}{:04X}", high, low));
                }
            }
            out.push_str(&format!("<{:04X}> <{}>\n", gid, uni));
        }
        out.push_str("endbfchar\n");
    }

    out.push_str("endcmap\n");
    out.push_str("CMapName currentdict /CMap defineresource pop\n");
    out.push_str("end\nend\n");
    out
}

fn encode_winansi_pdf_string(input: &str) -> String {
    let mut out = String::new();
    for ch in input.chars() {
        let byte = match ch {
            '\u{0000}'..='\u{007F}' => ch as u8,
            '\u{00A0}'..='\u{00FF}' => ch as u8,
            '\u{20AC}' => 0x80,
            '\u{201A}' => 0x82,
            '\u{0192}' => 0x83,
            '\u{201E}' => 0x84,
            '\u{2026}' => 0x85,
            '\u{2020}' => 0x86,
            '\u{2021}' => 0x87,
            '\u{02C6}' => 0x88,
            '\u{2030}' => 0x89,
            '\u{0160}' => 0x8A,
            '\u{2039}' => 0x8B,
            '\u{0152}' => 0x8C,
            '\u{017D}' => 0x8E,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{02DC}' => 0x98,
            '\u{2122}' => 0x99,
            '\u{0161}' => 0x9A,
            '\u{203A}' => 0x9B,
            '\u{0153}' => 0x9C,
            '\u{017E}' => 0x9E,
            '\u{0178}' => 0x9F,
            _ => b'?',
        };

        match byte {
            b'\\' => out.push_str("\\\\"),
            b'(' => out.push_str("\\("),
            b')' => out.push_str("\\)"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b if b < 0x20 || b >= 0x7f => out.push_str(&format!("\\{:03o}", b)),
            b => out.push(b as char),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::content::Content;

    fn text_ops(doc: &LoDocument) -> Vec<(f32, f32, Vec<u8>)> {
        let mut out = Vec::new();
        for page_id in doc.get_pages().values() {
            let content = Content::decode(&doc.get_page_content(*page_id).expect("content"))
                .expect("decode");
            let mut pos = (0.0, 0.0);
            for op in content.operations {
                match op.operator.as_str() {
                    "Td" => {
                        let x = op.operands[0].as_float().expect("x");
                        let y = op.operands[1].as_float().expect("y");
                        pos = (x, y);
                    }
                    "Tj" => {
                        let bytes = op.operands[0].as_str().expect("string").to_vec();
                        out.push((pos.0, pos.1, bytes));
                    }
                    _ => {}
                }
            }
        }
        out
    }

    fn page(fields: Vec<FieldMapping>) -> PageMapping {
        PageMapping {
            width: None,
            height: None,
            fields,
        }
    }

    #[test]
    fn mapping_json_applies_defaults() {
        let mapping = PdfFieldMapping::from_json_str(
            r#"{"pages":[{"fields":[{"name":"project_name","x":72,"y":700}]}],"grid":{"enabled":true,"step":0}}"#,
        )
        .expect("parse");
        let field = &mapping.pages[0].fields[0];
        assert_eq!(field.size, 10.0);
        assert!((field.effective_leading() - 12.0).abs() < 1e-6);
        assert!(!mapping.debug_names);
        assert_eq!(mapping.grid_step(), Some(50.0));
    }

    #[test]
    fn malformed_mapping_is_invalid_configuration() {
        let err = PdfFieldMapping::from_json_str("{\"pages\": 3}").expect_err("must fail");
        assert!(matches!(err, DocGenError::InvalidConfiguration(_)));
    }

    #[test]
    fn tiny_sizes_keep_minimum_leading() {
        let mut field = FieldMapping::new("x", 0.0, 0.0);
        field.size = 1.0;
        assert_eq!(field.effective_leading(), 2.0);
        field.leading = Some(30.0);
        assert_eq!(field.effective_leading(), 30.0);
    }

    #[test]
    fn wrap_packs_words_greedily() {
        let font = ResolvedFont::BasicFallback;
        // each word is 10 * 556 / 1000 * 20 = 111.2pt wide
        let word = "aaaaaaaaaa";
        let text = format!("{word} {word} {word}");
        let lines = wrap_lines(&text, Some(200.0), &font, 20.0);
        assert_eq!(lines, vec![word, word, word]);

        let lines = wrap_lines("a b c", Some(200.0), &font, 20.0);
        assert_eq!(lines, vec!["a b c"]);
    }

    #[test]
    fn overlong_word_sits_alone() {
        let font = ResolvedFont::BasicFallback;
        let lines = wrap_lines("x Supercalifragilistic y", Some(40.0), &font, 10.0);
        assert_eq!(lines, vec!["x", "Supercalifragilistic", "y"]);
        assert!(wrap_lines("   ", Some(40.0), &font, 10.0).is_empty());
        assert_eq!(wrap_lines("keep  as is", None, &font, 10.0), vec!["keep  as is"]);
    }

    #[test]
    fn non_positive_max_width_disables_wrapping() {
        let font = ResolvedFont::BasicFallback;
        for width in [0.0, -5.0, f32::NAN] {
            assert_eq!(
                wrap_lines("one two three", Some(width), &font, 10.0),
                vec!["one two three"]
            );
        }
    }

    #[test]
    fn three_wrapped_lines_step_down_by_leading() {
        let mut field = FieldMapping::new("notes", 72.0, 500.0);
        field.size = 20.0;
        field.max_width = Some(200.0);
        let mapping = PdfFieldMapping {
            pages: vec![page(vec![field])],
            ..PdfFieldMapping::default()
        };
        let values = TemplateContext::new().with("notes", "aaaaaaaaaa aaaaaaaaaa aaaaaaaaaa");
        let specs = [OverlayPageSpec {
            page_index: 0,
            mapping: &mapping.pages[0],
            width: 612.0,
            height: 792.0,
        }];
        let overlay =
            build_overlay_document(&specs, &mapping, &values, &ResolvedFont::BasicFallback);
        assert_eq!(overlay.page_indices, vec![0]);
        let ops = text_ops(&overlay.document);
        assert_eq!(ops.len(), 3);
        assert_eq!((ops[0].0, ops[0].1), (72.0, 500.0));
        assert_eq!((ops[1].0, ops[1].1), (72.0, 476.0));
        assert_eq!((ops[2].0, ops[2].1), (72.0, 452.0));
        assert_eq!(ops[0].2, b"aaaaaaaaaa".to_vec());
    }

    #[test]
    fn absent_values_are_skipped_and_blank_pages_dropped() {
        let mapping = PdfFieldMapping {
            pages: vec![
                page(vec![FieldMapping::new("missing", 10.0, 10.0)]),
                page(vec![FieldMapping::new("present", 10.0, 10.0)]),
            ],
            ..PdfFieldMapping::default()
        };
        let values = TemplateContext::new().with("present", "Stroy (Ltd)");
        let specs: Vec<OverlayPageSpec<'_>> = mapping
            .pages
            .iter()
            .enumerate()
            .map(|(page_index, m)| OverlayPageSpec {
                page_index,
                mapping: m,
                width: 612.0,
                height: 792.0,
            })
            .collect();
        let overlay =
            build_overlay_document(&specs, &mapping, &values, &ResolvedFont::BasicFallback);
        assert_eq!(overlay.page_indices, vec![1]);
        assert_eq!(overlay.fields_drawn, 1);
        let ops = text_ops(&overlay.document);
        assert_eq!(ops[0].2, b"Stroy (Ltd)".to_vec());
    }

    #[test]
    fn debug_names_draw_labels_without_values() {
        let mut labelled = FieldMapping::new("act_number", 10.0, 700.0);
        labelled.label = Some("No.".to_string());
        let mapping = PdfFieldMapping {
            pages: vec![page(vec![labelled, FieldMapping::new("act_date", 10.0, 680.0)])],
            debug_names: true,
            grid: None,
        };
        let overlay = build_overlay_canvas(
            0,
            &mapping.pages[0],
            612.0,
            792.0,
            &mapping,
            &TemplateContext::new(),
            &ResolvedFont::BasicFallback,
        );
        let runs: Vec<&str> = overlay.canvas.text_runs().collect();
        assert_eq!(runs, vec!["No.", "act_date"]);
    }

    #[test]
    fn grid_lines_precede_field_text() {
        let mapping = PdfFieldMapping {
            pages: vec![page(vec![FieldMapping::new("a", 5.0, 5.0)])],
            debug_names: false,
            grid: Some(GridSpec {
                enabled: true,
                step: 100.0,
            }),
        };
        let overlay = build_overlay_canvas(
            0,
            &mapping.pages[0],
            300.0,
            200.0,
            &mapping,
            &TemplateContext::new().with("a", "value"),
            &ResolvedFont::BasicFallback,
        );
        let runs: Vec<&str> = overlay.canvas.text_runs().collect();
        // x labels 0..300, y labels 0..200, then the field
        assert_eq!(runs, vec!["0", "100", "200", "300", "0", "100", "200", "value"]);
    }

    #[test]
    fn grid_labels_truncate_fractional_coordinates() {
        let mapping = PdfFieldMapping {
            pages: vec![page(Vec::new())],
            debug_names: false,
            grid: Some(GridSpec {
                enabled: true,
                step: 40.6,
            }),
        };
        let overlay = build_overlay_canvas(
            0,
            &mapping.pages[0],
            100.0,
            50.0,
            &mapping,
            &TemplateContext::new(),
            &ResolvedFont::BasicFallback,
        );
        let runs: Vec<&str> = overlay.canvas.text_runs().collect();
        assert_eq!(runs, vec!["0", "40", "81", "0", "40"]);
    }

    #[test]
    fn winansi_escapes_delimiters_and_replaces_unmapped() {
        assert_eq!(encode_winansi_pdf_string("a(b)\\"), "a\\(b\\)\\\\");
        assert_eq!(encode_winansi_pdf_string("é"), "\\351");
        assert_eq!(encode_winansi_pdf_string("Ж"), "?");
    }

    #[test]
    fn to_unicode_cmap_handles_surrogates() {
        let mut map = BTreeMap::new();
        map.insert(3u16, "A".to_string());
        map.insert(4u16, "\u{1F600}".to_string());
        let cmap = to_unicode_cmap(&map);
        assert!(cmap.contains("<0003> <0041>"));
        assert!(cmap.contains("<0004> <D83DDE00>"));
    }
}
