use crate::docx::EmbeddedImage;
use crate::error::DocGenError;
use crate::font::ResolvedFont;
use image::ImageEncoder;
use image::codecs::png::PngEncoder;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tiny_skia::{Color, FillRule, Paint, Path, PathBuilder, Pixmap, Rect, Stroke, Transform};
use ttf_parser::{GlyphId, OutlineBuilder};

pub const STAMP_WIDTH: u32 = 600;
pub const STAMP_HEIGHT: u32 = 200;
pub const STAMP_FONT_SIZE: f32 = 32.0;
pub const STAMP_DISPLAY_WIDTH_IN: f32 = 2.5;
pub const SIGNATURE_HEADING: &str = "Signatures";

const NAME_AT: (f32, f32) = (50.0, 100.0);
const ROLE_AT: (f32, f32) = (50.0, 150.0);
const DATE_AT: (f32, f32) = (450.0, 150.0);
const RULE_Y: f32 = 140.0;
const RULE_X: (f32, f32) = (50.0, 550.0);
const RULE_WIDTH: f32 = 2.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signer {
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub date: Option<String>,
}

impl Signer {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            date: None,
        }
    }

    pub fn dated(mut self, date: impl Into<String>) -> Self {
        self.date = Some(date.into());
        self
    }
}

pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

#[derive(Debug, Clone)]
pub struct StampRenderer {
    font: ResolvedFont,
    font_size: f32,
}

impl StampRenderer {
    pub fn new(font: ResolvedFont) -> Self {
        Self {
            font,
            font_size: STAMP_FONT_SIZE,
        }
    }

    pub fn font(&self) -> &ResolvedFont {
        &self.font
    }

    pub fn render(&self, signer: &Signer) -> Result<EmbeddedImage, DocGenError> {
        let mut pixmap = Pixmap::new(STAMP_WIDTH, STAMP_HEIGHT).ok_or_else(|| {
            DocGenError::StampRenderFailure("could not allocate stamp canvas".to_string())
        })?;
        pixmap.fill(Color::WHITE);

        let mut ink = Paint::default();
        ink.set_color_rgba8(0, 0, 0, 255);
        ink.anti_alias = true;

        let date = signer.date.clone().unwrap_or_else(today);
        self.draw_text(&mut pixmap, &ink, &signer.name, NAME_AT)?;

        let mut rule = PathBuilder::new();
        rule.move_to(RULE_X.0, RULE_Y);
        rule.line_to(RULE_X.1, RULE_Y);
        let rule = rule.finish().ok_or_else(|| {
            DocGenError::StampRenderFailure("could not build signature rule".to_string())
        })?;
        let stroke = Stroke {
            width: RULE_WIDTH,
            ..Stroke::default()
        };
        pixmap.stroke_path(&rule, &ink, &stroke, Transform::identity(), None);

        self.draw_text(&mut pixmap, &ink, &signer.role, ROLE_AT)?;
        self.draw_text(&mut pixmap, &ink, &date, DATE_AT)?;

        let png = encode_rgb_png(&pixmap)?;
        Ok(EmbeddedImage {
            png,
            width_px: STAMP_WIDTH,
            height_px: STAMP_HEIGHT,
        })
    }

    pub fn render_all(&self, signers: &[Signer]) -> Result<Vec<EmbeddedImage>, DocGenError> {
        signers.par_iter().map(|signer| self.render(signer)).collect()
    }

    fn draw_text(
        &self,
        pixmap: &mut Pixmap,
        paint: &Paint<'_>,
        text: &str,
        top_left: (f32, f32),
    ) -> Result<(), DocGenError> {
        if text.trim().is_empty() {
            return Ok(());
        }
        match &self.font {
            ResolvedFont::Loaded(font) => {
                let Some(face) = font.face() else {
                    return Err(DocGenError::StampRenderFailure(format!(
                        "font {} could not be parsed",
                        font.path.display()
                    )));
                };
                let scale = self.font_size / font.units_per_em() as f32;
                let baseline = top_left.1 + self.font.ascent(self.font_size);
                let mut pen_x = top_left.0;
                for ch in text.chars() {
                    let gid = face.glyph_index(ch).unwrap_or(GlyphId(0));
                    let mut builder = GlyphPathBuilder::new(pen_x, baseline, scale);
                    if face.outline_glyph(gid, &mut builder).is_some() {
                        if let Some(path) = builder.finish() {
                            pixmap.fill_path(
                                &path,
                                paint,
                                FillRule::Winding,
                                Transform::identity(),
                                None,
                            );
                        }
                    }
                    let advance = face.glyph_hor_advance(gid).unwrap_or(0) as f32;
                    pen_x += advance * scale;
                }
            }
            ResolvedFont::BasicFallback => {
                draw_basic_text(pixmap, paint, text, top_left, self.font_size)
            }
        }
        Ok(())
    }
}

fn encode_rgb_png(pixmap: &Pixmap) -> Result<Vec<u8>, DocGenError> {
    // Opaque canvas, so premultiplied RGBA equals straight RGB.
    let rgb: Vec<u8> = pixmap
        .data()
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();
    let mut out = Vec::new();
    PngEncoder::new(&mut out)
        .write_image(
            &rgb,
            pixmap.width(),
            pixmap.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| DocGenError::StampRenderFailure(format!("png encode failed: {e}")))?;
    Ok(out)
}

// Maps font units (y up) onto pixmap space (y down) around a pen origin.
struct GlyphPathBuilder {
    builder: PathBuilder,
    origin_x: f32,
    origin_y: f32,
    scale: f32,
}

impl GlyphPathBuilder {
    fn new(origin_x: f32, origin_y: f32, scale: f32) -> Self {
        Self {
            builder: PathBuilder::new(),
            origin_x,
            origin_y,
            scale,
        }
    }

    fn finish(self) -> Option<Path> {
        self.builder.finish()
    }

    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.origin_y - y * self.scale)
    }
}

impl OutlineBuilder for GlyphPathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.move_to(x, y);
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.builder.line_to(x, y);
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        self.builder.quad_to(x1, y1, x, y);
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.builder.cubic_to(x1, y1, x2, y2, x, y);
    }

    fn close(&mut self) {
        self.builder.close();
    }
}

// 3x5 cell glyphs, one row per byte, high bit of the low three is the left column.
fn basic_glyph(ch: char) -> Option<[u8; 5]> {
    let rows = match ch.to_ascii_uppercase() {
        ' ' => return None,
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'A' => [0b010, 0b101, 0b111, 0b101, 0b101],
        'B' => [0b110, 0b101, 0b110, 0b101, 0b110],
        'C' => [0b011, 0b100, 0b100, 0b100, 0b011],
        'D' => [0b110, 0b101, 0b101, 0b101, 0b110],
        'E' => [0b111, 0b100, 0b110, 0b100, 0b111],
        'F' => [0b111, 0b100, 0b110, 0b100, 0b100],
        'G' => [0b011, 0b100, 0b101, 0b101, 0b011],
        'H' => [0b101, 0b101, 0b111, 0b101, 0b101],
        'I' => [0b111, 0b010, 0b010, 0b010, 0b111],
        'J' => [0b001, 0b001, 0b001, 0b101, 0b010],
        'K' => [0b101, 0b101, 0b110, 0b101, 0b101],
        'L' => [0b100, 0b100, 0b100, 0b100, 0b111],
        'M' => [0b101, 0b111, 0b111, 0b101, 0b101],
        'N' => [0b110, 0b101, 0b101, 0b101, 0b101],
        'O' => [0b010, 0b101, 0b101, 0b101, 0b010],
        'P' => [0b110, 0b101, 0b110, 0b100, 0b100],
        'Q' => [0b010, 0b101, 0b101, 0b011, 0b001],
        'R' => [0b110, 0b101, 0b110, 0b101, 0b101],
        'S' => [0b011, 0b100, 0b010, 0b001, 0b110],
        'T' => [0b111, 0b010, 0b010, 0b010, 0b010],
        'U' => [0b101, 0b101, 0b101, 0b101, 0b111],
        'V' => [0b101, 0b101, 0b101, 0b101, 0b010],
        'W' => [0b101, 0b101, 0b111, 0b111, 0b101],
        'X' => [0b101, 0b101, 0b010, 0b101, 0b101],
        'Y' => [0b101, 0b101, 0b010, 0b010, 0b010],
        'Z' => [0b111, 0b001, 0b010, 0b100, 0b111],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        ',' => [0b000, 0b000, 0b000, 0b010, 0b100],
        ':' => [0b000, 0b010, 0b000, 0b010, 0b000],
        '/' => [0b001, 0b001, 0b010, 0b100, 0b100],
        '(' => [0b001, 0b010, 0b010, 0b010, 0b001],
        ')' => [0b100, 0b010, 0b010, 0b010, 0b100],
        '\'' => [0b010, 0b010, 0b000, 0b000, 0b000],
        '&' => [0b010, 0b101, 0b010, 0b101, 0b011],
        _ => [0b111, 0b111, 0b111, 0b111, 0b111],
    };
    Some(rows)
}

fn draw_basic_text(
    pixmap: &mut Pixmap,
    paint: &Paint<'_>,
    text: &str,
    top_left: (f32, f32),
    size: f32,
) {
    let cell = (size / 7.0).max(1.0);
    let mut pen_x = top_left.0;
    for ch in text.chars() {
        if let Some(rows) = basic_glyph(ch) {
            for (row, bits) in rows.iter().enumerate() {
                for col in 0..3u8 {
                    if bits & (0b100 >> col) == 0 {
                        continue;
                    }
                    let x = pen_x + col as f32 * cell;
                    let y = top_left.1 + row as f32 * cell;
                    if let Some(rect) = Rect::from_xywh(x, y, cell, cell) {
                        pixmap.fill_rect(rect, paint, Transform::identity(), None);
                    }
                }
            }
        }
        pen_x += cell * 4.0;
    }
}
