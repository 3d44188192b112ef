//! Terminal colouring for labels and status output.

use std::collections::HashMap;

use colored::Colorize;

/// Terminal colours used by the fleet's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    /// Purple used for branch names.
    Purple,
}

impl From<Color> for colored::Color {
    fn from(color: Color) -> Self {
        match color {
            Color::Red => colored::Color::Red,
            Color::Green => colored::Color::Green,
            Color::Yellow => colored::Color::Yellow,
            Color::Blue => colored::Color::Blue,
            Color::Magenta => colored::Color::Magenta,
            Color::Cyan => colored::Color::Cyan,
            Color::Purple => colored::Color::TrueColor {
                r: 215,
                g: 95,
                b: 215,
            },
        }
    }
}

/// Label colours, in rotation order.
const LABEL_PALETTE: [Color; 5] = [
    Color::Red,
    Color::Green,
    Color::Blue,
    Color::Cyan,
    Color::Magenta,
];

/// Colours text, or passes it through when disabled.
///
/// An enabled painter still defers to `colored`'s global switch, which the
/// binary sets from the same terminal check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Painter {
    enabled: bool,
}

impl Painter {
    pub fn new(enabled: bool) -> Self {
        Painter { enabled }
    }

    pub fn plain() -> Self {
        Painter { enabled: false }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn paint(&self, text: &str, color: Color) -> String {
        if self.enabled {
            text.color(colored::Color::from(color)).to_string()
        } else {
            text.to_string()
        }
    }
}

/// Assigns each label a stable colour.
///
/// A label keeps the colour it was first given. New labels take the next
/// palette colour, skipping the one handed out most recently so that
/// consecutive output from different labels is distinguishable.
#[derive(Debug, Clone)]
pub struct ColorAllocator {
    painter: Painter,
    assigned: HashMap<String, usize>,
    next: usize,
    last: Option<usize>,
}

impl ColorAllocator {
    pub fn new(painter: Painter) -> Self {
        ColorAllocator {
            painter,
            assigned: HashMap::new(),
            next: 0,
            last: None,
        }
    }

    /// The colour for `label`, allocating one on first use.
    pub fn color_for(&mut self, label: &str) -> Color {
        let index = match self.assigned.get(label) {
            Some(index) => *index,
            None => {
                let mut index = self.next;
                if self.last == Some(index) {
                    index = (index + 1) % LABEL_PALETTE.len();
                }
                self.next = (index + 1) % LABEL_PALETTE.len();
                self.assigned.insert(label.to_string(), index);
                index
            }
        };
        self.last = Some(index);
        LABEL_PALETTE[index]
    }

    /// `label` painted in its colour.
    pub fn paint(&mut self, label: &str) -> String {
        let color = self.color_for(label);
        self.painter.paint(label, color)
    }
}
