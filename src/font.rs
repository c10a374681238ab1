use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};
use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use ttf_parser::GlyphId;

// Helvetica advance widths (1/1000 em) for codes 32..=126.
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // 32..47
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 48..63
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // 64..79
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 80..95
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // 96..111
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 112..126
];
const HELVETICA_DEFAULT_WIDTH: u16 = 556;
const HELVETICA_ASCENT: i16 = 718;

static FONT_CACHE: OnceLock<Mutex<HashMap<PathBuf, Option<Arc<Vec<u8>>>>>> = OnceLock::new();

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontCandidate {
    File(PathBuf),
    Dir(PathBuf),
}

#[derive(Debug, Clone)]
pub struct LoadedFont {
    pub name: String,
    pub path: PathBuf,
    data: Arc<Vec<u8>>,
    units_per_em: u16,
    ascent: i16,
    descent: i16,
    bbox: (i16, i16, i16, i16),
}

#[derive(Debug, Clone)]
pub enum ResolvedFont {
    Loaded(LoadedFont),
    BasicFallback,
}

impl LoadedFont {
    fn from_bytes(path: &Path, data: Arc<Vec<u8>>) -> Option<Self> {
        let face = ttf_parser::Face::parse(&data, 0).ok()?;
        let bbox = face.global_bounding_box();
        Some(Self {
            name: postscript_name(&face, path),
            path: path.to_path_buf(),
            units_per_em: face.units_per_em().max(1),
            ascent: face.ascender(),
            descent: face.descender(),
            bbox: (bbox.x_min, bbox.y_min, bbox.x_max, bbox.y_max),
            data,
        })
    }

    #[cfg(test)]
    pub(crate) fn unparsed_for_tests(name: &str, data: Vec<u8>) -> Self {
        Self {
            name: name.to_string(),
            path: PathBuf::from(name),
            data: Arc::new(data),
            units_per_em: 1000,
            ascent: 800,
            descent: -200,
            bbox: (0, -200, 1000, 800),
        }
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_slice()
    }

    pub fn face(&self) -> Option<ttf_parser::Face<'_>> {
        ttf_parser::Face::parse(self.data.as_slice(), 0).ok()
    }

    pub fn units_per_em(&self) -> u16 {
        self.units_per_em
    }

    pub fn glyph_id(&self, ch: char) -> u16 {
        self.face()
            .and_then(|face| face.glyph_index(ch))
            .map(|gid| gid.0)
            .unwrap_or(0)
    }

    // Advance of `gid` in 1/1000 em.
    pub fn advance_1000(&self, gid: u16) -> u16 {
        let Some(face) = self.face() else {
            return 0;
        };
        let advance = face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0) as i64;
        let units = self.units_per_em as i64;
        let scaled = (advance * 1000 + units / 2) / units;
        scaled.clamp(0, u16::MAX as i64) as u16
    }

    // Shapes `text` into glyph ids with advances in 1/1000 em.
    pub fn shape(&self, text: &str) -> Vec<ShapedGlyph> {
        let Some(face) = HbFace::from_slice(self.data.as_slice(), 0) else {
            return Vec::new();
        };
        let units = face.units_per_em().max(1) as i64;
        let mut buffer = UnicodeBuffer::new();
        buffer.set_direction(detect_direction(text));
        buffer.push_str(text);
        let output = rustybuzz::shape(&face, &[], buffer);
        output
            .glyph_infos()
            .iter()
            .zip(output.glyph_positions())
            .map(|(info, pos)| {
                let advance = ((pos.x_advance as i64) * 1000 + units / 2) / units;
                ShapedGlyph {
                    gid: info.glyph_id.min(u16::MAX as u32) as u16,
                    advance_1000: advance.clamp(0, u16::MAX as i64) as u16,
                }
            })
            .collect()
    }

    pub fn metrics_1000(&self) -> FontMetrics1000 {
        let scale = |v: i16| -> i16 {
            let scaled = (v as i32 * 1000) / self.units_per_em as i32;
            scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
        };
        FontMetrics1000 {
            ascent: scale(self.ascent),
            descent: scale(self.descent),
            bbox: (
                scale(self.bbox.0),
                scale(self.bbox.1),
                scale(self.bbox.2),
                scale(self.bbox.3),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapedGlyph {
    pub gid: u16,
    pub advance_1000: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FontMetrics1000 {
    pub ascent: i16,
    pub descent: i16,
    pub bbox: (i16, i16, i16, i16),
}

impl ResolvedFont {
    pub fn is_fallback(&self) -> bool {
        matches!(self, ResolvedFont::BasicFallback)
    }

    pub fn display_name(&self) -> &str {
        match self {
            ResolvedFont::Loaded(font) => &font.name,
            ResolvedFont::BasicFallback => "Helvetica",
        }
    }

    pub fn text_width(&self, text: &str, size: f32) -> f32 {
        let units: u32 = match self {
            ResolvedFont::Loaded(font) => font
                .shape(text)
                .iter()
                .map(|glyph| glyph.advance_1000 as u32)
                .sum(),
            ResolvedFont::BasicFallback => helvetica_width_1000(text),
        };
        units as f32 * size / 1000.0
    }

    pub fn ascent(&self, size: f32) -> f32 {
        match self {
            ResolvedFont::Loaded(font) => font.ascent as f32 * size / font.units_per_em as f32,
            ResolvedFont::BasicFallback => HELVETICA_ASCENT as f32 * size / 1000.0,
        }
    }
}

fn detect_direction(text: &str) -> HbDirection {
    for ch in text.chars() {
        let code = ch as u32;
        let rtl = matches!(
            code,
            0x0590..=0x08FF | 0xFB1D..=0xFDFF | 0xFE70..=0xFEFF | 0x1EE00..=0x1EEFF
        );
        if rtl {
            return HbDirection::RightToLeft;
        }
    }
    HbDirection::LeftToRight
}

pub(crate) fn helvetica_width_1000(text: &str) -> u32 {
    text.chars()
        .map(|ch| {
            let code = ch as u32;
            if (32..=126).contains(&code) {
                HELVETICA_WIDTHS[(code - 32) as usize] as u32
            } else {
                HELVETICA_DEFAULT_WIDTH as u32
            }
        })
        .sum()
}

#[derive(Debug, Clone, Default)]
pub struct FontResolver {
    candidates: Vec<FontCandidate>,
}

impl FontResolver {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.candidates.push(FontCandidate::File(path.into()));
        self
    }

    pub fn with_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.candidates.push(FontCandidate::Dir(path.into()));
        self
    }

    pub fn extend(mut self, candidates: impl IntoIterator<Item = FontCandidate>) -> Self {
        self.candidates.extend(candidates);
        self
    }

    pub fn candidates(&self) -> &[FontCandidate] {
        &self.candidates
    }

    pub fn unicode_defaults(configured: &[FontCandidate]) -> Self {
        let cwd = std::env::current_dir().unwrap_or_default();
        let windir = std::env::var("WINDIR").unwrap_or_else(|_| r"C:\Windows".to_string());
        let mut resolver = FontResolver::empty().extend(configured.iter().cloned());
        resolver = resolver.extend(env_font_dirs().into_iter().map(FontCandidate::Dir));
        resolver
            .with_file(cwd.join("backend").join("media").join("fonts").join("DejaVuSans.ttf"))
            .with_file(cwd.join("media").join("fonts").join("DejaVuSans.ttf"))
            .with_file(cwd.join("DejaVuSans.ttf"))
            .with_file(PathBuf::from(windir).join("Fonts").join("arialuni.ttf"))
            .with_file("/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf")
            .with_file("/usr/local/share/fonts/DejaVuSans.ttf")
    }

    pub fn stamp_defaults(configured: &[FontCandidate], preferred: &str) -> Self {
        let mut resolver = FontResolver::empty().extend(configured.iter().cloned());
        let mut dirs = vec![std::env::current_dir().unwrap_or_default()];
        dirs.extend(env_font_dirs());
        dirs.extend(system_font_dirs());
        let generic = [
            preferred,
            "DejaVuSans.ttf",
            "truetype/dejavu/DejaVuSans.ttf",
            "LiberationSans-Regular.ttf",
            "truetype/liberation/LiberationSans-Regular.ttf",
            "NotoSans-Regular.ttf",
            "Arial.ttf",
            "Helvetica.ttc",
        ];
        for name in generic {
            if name.is_empty() {
                continue;
            }
            for dir in &dirs {
                resolver = resolver.with_file(dir.join(name));
            }
        }
        resolver
    }

    pub fn resolve(&self) -> ResolvedFont {
        for candidate in &self.candidates {
            match candidate {
                FontCandidate::File(path) => {
                    if let Some(font) = load_cached(path) {
                        return ResolvedFont::Loaded(font);
                    }
                }
                FontCandidate::Dir(dir) => {
                    let Ok(entries) = fs::read_dir(dir) else {
                        continue;
                    };
                    let mut files: Vec<PathBuf> = entries
                        .flatten()
                        .map(|e| e.path())
                        .filter(|p| is_supported_font_path(p))
                        .collect();
                    files.sort();
                    for path in files {
                        if let Some(font) = load_cached(&path) {
                            return ResolvedFont::Loaded(font);
                        }
                    }
                }
            }
        }
        ResolvedFont::BasicFallback
    }
}

pub fn is_supported_font_path(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| matches!(e.to_ascii_lowercase().as_str(), "ttf" | "otf"))
            .unwrap_or(false)
}

fn load_cached(path: &Path) -> Option<LoadedFont> {
    let cache = FONT_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    if let Ok(guard) = cache.lock() {
        if let Some(entry) = guard.get(path) {
            let data = entry.clone()?;
            return LoadedFont::from_bytes(path, data);
        }
    }
    let loaded = fs::read(path)
        .ok()
        .filter(|bytes| ttf_parser::Face::parse(bytes, 0).is_ok())
        .map(Arc::new);
    if let Ok(mut guard) = cache.lock() {
        guard.insert(path.to_path_buf(), loaded.clone());
    }
    LoadedFont::from_bytes(path, loaded?)
}

fn env_font_dirs() -> Vec<PathBuf> {
    let Ok(extra) = std::env::var("DOCGEN_FONT_DIR") else {
        return Vec::new();
    };
    std::env::split_paths(&extra)
        .filter(|p| !p.as_os_str().is_empty())
        .collect()
}

fn system_font_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    #[cfg(target_os = "windows")]
    {
        dirs.push(PathBuf::from(r"C:\Windows\Fonts"));
        if let Ok(windir) = std::env::var("WINDIR") {
            dirs.push(PathBuf::from(windir).join("Fonts"));
        }
    }

    #[cfg(target_os = "linux")]
    {
        dirs.push(PathBuf::from("/usr/share/fonts"));
        dirs.push(PathBuf::from("/usr/local/share/fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join(".fonts"));
        }
    }

    #[cfg(target_os = "macos")]
    {
        dirs.push(PathBuf::from("/System/Library/Fonts"));
        dirs.push(PathBuf::from("/Library/Fonts"));
        if let Ok(home) = std::env::var("HOME") {
            dirs.push(PathBuf::from(home).join("Library/Fonts"));
        }
    }

    dirs
}

fn postscript_name(face: &ttf_parser::Face<'_>, path: &Path) -> String {
    use ttf_parser::name::name_id;

    let mut post = None;
    let mut family = None;
    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        match entry.name_id {
            name_id::POST_SCRIPT_NAME if post.is_none() => post = Some(name),
            name_id::FAMILY if family.is_none() => family = Some(name),
            _ => {}
        }
    }
    let raw = post
        .or(family)
        .or_else(|| {
            path.file_stem()
                .and_then(|v| v.to_str())
                .map(|v| v.to_string())
        })
        .unwrap_or_else(|| "EmbeddedFont".to_string());
    let sanitized: String = raw
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if sanitized.is_empty() {
        "EmbeddedFont".to_string()
    } else {
        sanitized
    }
}
