#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SaveState,
    RestoreState,
    SetFillGray(f32),
    SetStrokeGray(f32),
    SetLineWidth(f32),
    SetFontSize(f32),
    Line { x1: f32, y1: f32, x2: f32, y2: f32 },
    DrawString { x: f32, y: f32, text: String },
}

pub trait TextEncoder {
    fn font_resource(&self) -> &str;
    fn encode(&self, text: &str) -> String;
}

#[derive(Debug, Clone)]
struct GraphicsState {
    fill_gray: f32,
    stroke_gray: f32,
    line_width: f32,
    font_size: f32,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            fill_gray: 0.0,
            stroke_gray: 0.0,
            line_width: 1.0,
            font_size: 12.0,
        }
    }
}

pub struct Canvas {
    width: f32,
    height: f32,
    commands: Vec<Command>,
    state_stack: Vec<GraphicsState>,
    current_state: GraphicsState,
}

impl Canvas {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            commands: Vec::new(),
            state_stack: Vec::new(),
            current_state: GraphicsState::default(),
        }
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn save_state(&mut self) {
        self.state_stack.push(self.current_state.clone());
        self.commands.push(Command::SaveState);
    }

    pub fn restore_state(&mut self) {
        if let Some(state) = self.state_stack.pop() {
            self.current_state = state;
            self.commands.push(Command::RestoreState);
        }
    }

    pub fn set_fill_gray(&mut self, gray: f32) {
        let gray = gray.clamp(0.0, 1.0);
        if self.current_state.fill_gray == gray {
            return;
        }
        self.current_state.fill_gray = gray;
        self.commands.push(Command::SetFillGray(gray));
    }

    pub fn set_stroke_gray(&mut self, gray: f32) {
        let gray = gray.clamp(0.0, 1.0);
        if self.current_state.stroke_gray == gray {
            return;
        }
        self.current_state.stroke_gray = gray;
        self.commands.push(Command::SetStrokeGray(gray));
    }

    pub fn set_line_width(&mut self, width: f32) {
        let width = width.max(0.0);
        if self.current_state.line_width == width {
            return;
        }
        self.current_state.line_width = width;
        self.commands.push(Command::SetLineWidth(width));
    }

    pub fn set_font_size(&mut self, size: f32) {
        let size = size.max(0.0);
        if self.current_state.font_size == size {
            return;
        }
        self.current_state.font_size = size;
        self.commands.push(Command::SetFontSize(size));
    }

    pub fn line(&mut self, x1: f32, y1: f32, x2: f32, y2: f32) {
        self.commands.push(Command::Line { x1, y1, x2, y2 });
    }

    pub fn draw_string(&mut self, x: f32, y: f32, text: &str) {
        if text.is_empty() {
            return;
        }
        self.commands.push(Command::DrawString {
            x,
            y,
            text: text.to_string(),
        });
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_blank(&self) -> bool {
        !self
            .commands
            .iter()
            .any(|c| matches!(c, Command::Line { .. } | Command::DrawString { .. }))
    }

    pub fn text_runs(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().filter_map(|c| match c {
            Command::DrawString { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }

    pub fn to_content(&self, encoder: &dyn TextEncoder) -> String {
        let mut out = String::new();
        let mut font_size = GraphicsState::default().font_size;
        let mut sizes = Vec::new();
        for command in &self.commands {
            match command {
                Command::SaveState => {
                    sizes.push(font_size);
                    out.push_str("q\n");
                }
                Command::RestoreState => {
                    if let Some(size) = sizes.pop() {
                        font_size = size;
                    }
                    out.push_str("Q\n");
                }
                Command::SetFillGray(gray) => {
                    out.push_str(&format!("{} g\n", fmt_num(*gray)));
                }
                Command::SetStrokeGray(gray) => {
                    out.push_str(&format!("{} G\n", fmt_num(*gray)));
                }
                Command::SetLineWidth(width) => {
                    out.push_str(&format!("{} w\n", fmt_num(*width)));
                }
                Command::SetFontSize(size) => font_size = *size,
                Command::Line { x1, y1, x2, y2 } => {
                    out.push_str(&format!(
                        "{} {} m {} {} l S\n",
                        fmt_num(*x1),
                        fmt_num(*y1),
                        fmt_num(*x2),
                        fmt_num(*y2)
                    ));
                }
                Command::DrawString { x, y, text } => {
                    out.push_str(&format!(
                        "BT /{} {} Tf {} {} Td {} Tj ET\n",
                        encoder.font_resource(),
                        fmt_num(font_size),
                        fmt_num(*x),
                        fmt_num(*y),
                        encoder.encode(text)
                    ));
                }
            }
        }
        out
    }
}

pub(crate) fn format_milli(milli: i64) -> String {
    if milli == 0 {
        return "0".to_string();
    }
    let sign = if milli < 0 { "-" } else { "" };
    let abs = milli.abs();
    let int_part = abs / 1000;
    let frac_part = abs % 1000;
    if frac_part == 0 {
        format!("{}{}", sign, int_part)
    } else {
        let mut s = format!("{}{}.{:03}", sign, int_part, frac_part);
        while s.ends_with('0') {
            s.pop();
        }
        s
    }
}

pub(crate) fn fmt_num(value: f32) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    format_milli((value as f64 * 1000.0).round() as i64)
}
