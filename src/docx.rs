use crate::error::DocGenError;
use crate::tokens::TextBlocks;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read, Write};
use std::ops::Range;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const W_NS: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
const DOCUMENT_PART: &str = "word/document.xml";
const DOCUMENT_RELS_PART: &str = "word/_rels/document.xml.rels";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const IMAGE_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
const EMU_PER_INCH: u64 = 914_400;
const MAX_PART_PREALLOC: u64 = 16 * 1024 * 1024;

#[derive(Debug, Clone)]
struct RunSlot {
    range: Range<usize>,
    qname: String,
    text: String,
}

#[derive(Debug, Clone, Default)]
struct Block {
    runs: Vec<RunSlot>,
}

impl Block {
    fn text(&self) -> String {
        self.runs.iter().map(|run| run.text.as_str()).collect()
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddedImage {
    pub png: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
}

// A DOCX package opened for placeholder substitution.
// The main document part is kept as source text; paragraph edits and appended body
// content are spliced in when the package is serialized.
#[derive(Debug, Clone)]
pub struct DocxPackage {
    parts: Vec<(String, Vec<u8>)>,
    document_xml: String,
    blocks: Vec<Block>,
    edits: BTreeMap<usize, String>,
    insert_at: usize,
    appended: String,
    next_image: usize,
}

impl DocxPackage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DocGenError> {
        let mut archive = ZipArchive::new(Cursor::new(bytes))?;
        let mut parts = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let mut file = archive.by_index(index)?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().to_string();
            let mut data = Vec::with_capacity(file.size().min(MAX_PART_PREALLOC) as usize);
            file.read_to_end(&mut data)?;
            parts.push((name, data));
        }

        let Some((_, raw)) = parts.iter().find(|(name, _)| name == DOCUMENT_PART) else {
            return Err(DocGenError::InvalidTemplate(format!(
                "package has no {DOCUMENT_PART}"
            )));
        };
        let document_xml = String::from_utf8(raw.clone()).map_err(|_| {
            DocGenError::InvalidTemplate(format!("{DOCUMENT_PART} is not valid UTF-8"))
        })?;
        let (blocks, insert_at) = scan_document(&document_xml)?;

        Ok(Self {
            parts,
            document_xml,
            blocks,
            edits: BTreeMap::new(),
            insert_at,
            appended: String::new(),
            next_image: 1,
        })
    }

    pub fn paragraph_texts(&self) -> Vec<String> {
        (0..self.blocks.len()).map(|i| self.block_text(i)).collect()
    }

    pub fn append_heading(&mut self, text: &str) {
        self.appended.push_str(&format!(
            "<w:p xmlns:w=\"{W_NS}\"><w:pPr><w:pStyle w:val=\"Heading1\"/></w:pPr>{}</w:p>",
            text_runs(text)
        ));
    }

    pub fn append_paragraph(&mut self, text: &str) {
        self.appended
            .push_str(&format!("<w:p xmlns:w=\"{W_NS}\">{}</w:p>", text_runs(text)));
    }

    pub fn append_image_row(&mut self, images: &[EmbeddedImage], width_in: f32) {
        if images.is_empty() {
            return;
        }
        let mut existing_ids = self.relationship_ids();
        let mut cells = String::new();
        let mut grid = String::new();
        for image in images {
            let n = self.next_image;
            self.next_image += 1;
            let media_name = format!("media/docgen_stamp_{n}.png");
            self.set_part(&format!("word/{media_name}"), image.png.clone());

            let mut rel_n = n;
            let mut rel_id = format!("rIdDocGen{rel_n}");
            while existing_ids.contains(&rel_id) {
                rel_n += 1;
                rel_id = format!("rIdDocGen{rel_n}");
            }
            existing_ids.insert(rel_id.clone());
            self.add_relationship(&rel_id, IMAGE_REL_TYPE, &media_name);

            let cx = (width_in.max(0.1) as f64 * EMU_PER_INCH as f64).round() as u64;
            let cy = if image.width_px == 0 {
                cx
            } else {
                cx * image.height_px as u64 / image.width_px as u64
            };
            grid.push_str("<w:gridCol/>");
            cells.push_str(&format!(
                "<w:tc><w:tcPr><w:tcW w:w=\"0\" w:type=\"auto\"/></w:tcPr><w:p>{}</w:p></w:tc>",
                drawing_run(&rel_id, 32_000 + n, cx, cy)
            ));
        }
        self.appended.push_str(&format!(
            "<w:tbl xmlns:w=\"{W_NS}\"><w:tblPr><w:tblW w:w=\"0\" w:type=\"auto\"/></w:tblPr><w:tblGrid>{grid}</w:tblGrid><w:tr>{cells}</w:tr></w:tbl><w:p xmlns:w=\"{W_NS}\"/>"
        ));
        self.ensure_png_content_type();
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, DocGenError> {
        let document = self.render_document_xml();
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        for (name, data) in &self.parts {
            writer.start_file(name.as_str(), options)?;
            if name == DOCUMENT_PART {
                writer.write_all(document.as_bytes())?;
            } else {
                writer.write_all(data)?;
            }
        }
        Ok(writer.finish()?.into_inner())
    }

    fn render_document_xml(&self) -> String {
        let mut splices: Vec<(Range<usize>, String)> = Vec::new();
        for (index, text) in &self.edits {
            let Some(block) = self.blocks.get(*index) else {
                continue;
            };
            for (run_idx, run) in block.runs.iter().enumerate() {
                let body = if run_idx == 0 { escape_xml(text) } else { String::new() };
                splices.push((
                    run.range.clone(),
                    format!(
                        "<{q} xml:space=\"preserve\">{body}</{q}>",
                        q = run.qname
                    ),
                ));
            }
        }
        if !self.appended.is_empty() {
            splices.push((self.insert_at..self.insert_at, self.appended.clone()));
        }
        splices.sort_by(|a, b| b.0.start.cmp(&a.0.start));

        let mut out = self.document_xml.clone();
        for (range, replacement) in splices {
            out.replace_range(range, &replacement);
        }
        out
    }

    fn part(&self, name: &str) -> Option<&[u8]> {
        self.parts
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.as_slice())
    }

    fn set_part(&mut self, name: &str, data: Vec<u8>) {
        match self.parts.iter_mut().find(|(n, _)| n == name) {
            Some(slot) => slot.1 = data,
            None => self.parts.push((name.to_string(), data)),
        }
    }

    fn relationship_ids(&self) -> BTreeSet<String> {
        let Some(raw) = self.part(DOCUMENT_RELS_PART) else {
            return BTreeSet::new();
        };
        let Ok(text) = std::str::from_utf8(raw) else {
            return BTreeSet::new();
        };
        let Ok(doc) = roxmltree::Document::parse(text) else {
            return BTreeSet::new();
        };
        doc.descendants()
            .filter(|n| n.has_tag_name("Relationship"))
            .filter_map(|n| n.attribute("Id").map(str::to_string))
            .collect()
    }

    fn add_relationship(&mut self, id: &str, rel_type: &str, target: &str) {
        let entry = format!("<Relationship Id=\"{id}\" Type=\"{rel_type}\" Target=\"{target}\"/>");
        let current = self
            .part(DOCUMENT_RELS_PART)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .map(str::to_string);
        let updated = match current {
            Some(text) => match text.rfind("</Relationships>") {
                Some(pos) => {
                    let mut text = text;
                    text.insert_str(pos, &entry);
                    text
                }
                None => text,
            },
            None => format!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<Relationships xmlns=\"http://schemas.openxmlformats.org/package/2006/relationships\">{entry}</Relationships>"
            ),
        };
        self.set_part(DOCUMENT_RELS_PART, updated.into_bytes());
    }

    fn ensure_png_content_type(&mut self) {
        let Some(text) = self
            .part(CONTENT_TYPES_PART)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .map(str::to_string)
        else {
            return;
        };
        if text.to_ascii_lowercase().contains("extension=\"png\"") {
            return;
        }
        let Some(pos) = text.rfind("</Types>") else {
            return;
        };
        let mut text = text;
        text.insert_str(pos, "<Default Extension=\"png\" ContentType=\"image/png\"/>");
        self.set_part(CONTENT_TYPES_PART, text.into_bytes());
    }
}

impl TextBlocks for DocxPackage {
    fn block_count(&self) -> usize {
        self.blocks.len()
    }

    fn block_text(&self, index: usize) -> String {
        if let Some(text) = self.edits.get(&index) {
            return text.clone();
        }
        self.blocks.get(index).map(Block::text).unwrap_or_default()
    }

    fn set_block_text(&mut self, index: usize, text: String) {
        let Some(block) = self.blocks.get(index) else {
            return;
        };
        if block.runs.is_empty() {
            return;
        }
        self.edits.insert(index, text);
    }
}

fn is_w(node: &roxmltree::Node<'_, '_>, name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == name
        && node.tag_name().namespace() == Some(W_NS)
}

fn scan_document(xml: &str) -> Result<(Vec<Block>, usize), DocGenError> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|err| DocGenError::InvalidTemplate(format!("{DOCUMENT_PART}: {err}")))?;

    let mut blocks = Vec::new();
    for paragraph in doc.descendants().filter(|n| is_w(n, "p")) {
        let mut block = Block::default();
        for t in paragraph.descendants().filter(|n| is_w(n, "t")) {
            let owner = t.ancestors().skip(1).find(|n| is_w(n, "p"));
            if owner.map(|n| n.id()) != Some(paragraph.id()) {
                continue;
            }
            let range = t.range();
            let raw = &xml[range.clone()];
            let qname = raw
                .trim_start_matches('<')
                .split(|c: char| c.is_whitespace() || c == '>' || c == '/')
                .next()
                .unwrap_or("w:t")
                .to_string();
            let text: String = t
                .descendants()
                .filter(|n| n.is_text())
                .filter_map(|n| n.text())
                .collect();
            block.runs.push(RunSlot { range, qname, text });
        }
        blocks.push(block);
    }

    let Some(body) = doc.descendants().find(|n| is_w(n, "body")) else {
        return Err(DocGenError::InvalidTemplate(
            "document has no w:body".to_string(),
        ));
    };
    let insert_at = match body.children().filter(|n| n.is_element()).last() {
        Some(last) if is_w(&last, "sectPr") => last.range().start,
        _ => {
            let body_src = &xml[body.range()];
            match body_src.rfind("</") {
                Some(pos) => body.range().start + pos,
                // self-closing <w:body/>; cannot append inside it
                None => {
                    return Err(DocGenError::InvalidTemplate(
                        "document body is empty".to_string(),
                    ));
                }
            }
        }
    };

    Ok((blocks, insert_at))
}

fn escape_xml(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

fn text_runs(text: &str) -> String {
    let mut out = String::from("<w:r>");
    for (idx, line) in text.lines().enumerate() {
        if idx > 0 {
            out.push_str("<w:br/>");
        }
        out.push_str(&format!(
            "<w:t xml:space=\"preserve\">{}</w:t>",
            escape_xml(line)
        ));
    }
    out.push_str("</w:r>");
    out
}

fn drawing_run(rel_id: &str, doc_pr_id: usize, cx: u64, cy: u64) -> String {
    format!(
        concat!(
            "<w:r><w:drawing>",
            "<wp:inline xmlns:wp=\"http://schemas.openxmlformats.org/drawingml/2006/wordprocessingDrawing\" distT=\"0\" distB=\"0\" distL=\"0\" distR=\"0\">",
            "<wp:extent cx=\"{cx}\" cy=\"{cy}\"/>",
            "<wp:docPr id=\"{id}\" name=\"Signature {id}\"/>",
            "<a:graphic xmlns:a=\"http://schemas.openxmlformats.org/drawingml/2006/main\">",
            "<a:graphicData uri=\"http://schemas.openxmlformats.org/drawingml/2006/picture\">",
            "<pic:pic xmlns:pic=\"http://schemas.openxmlformats.org/drawingml/2006/picture\">",
            "<pic:nvPicPr><pic:cNvPr id=\"{id}\" name=\"stamp{id}.png\"/><pic:cNvPicPr/></pic:nvPicPr>",
            "<pic:blipFill><a:blip xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\" r:embed=\"{rel}\"/>",
            "<a:stretch><a:fillRect/></a:stretch></pic:blipFill>",
            "<pic:spPr><a:xfrm><a:off x=\"0\" y=\"0\"/><a:ext cx=\"{cx}\" cy=\"{cy}\"/></a:xfrm>",
            "<a:prstGeom prst=\"rect\"><a:avLst/></a:prstGeom></pic:spPr>",
            "</pic:pic></a:graphicData></a:graphic></wp:inline></w:drawing></w:r>"
        ),
        cx = cx,
        cy = cy,
        id = doc_pr_id,
        rel = rel_id
    )
}
