use regex::Regex;
use std::sync::OnceLock;

/// Cascade rank of a declaration group. Field order is the comparison order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Specificity {
    pub important: bool,
    pub ids: u32,
    pub classes: u32,
    pub elements: u32,
    pub sheet: u32,
    pub rule: u32,
}

fn element_pattern() -> &'static Regex {
    static ELEMENT_START: OnceLock<Regex> = OnceLock::new();
    ELEMENT_START.get_or_init(|| Regex::new(r"(^|\s)\w").expect("element regex compiles"))
}

impl Specificity {
    /// Counting heuristic: `#` marks, `.` marks and word characters that open a compound.
    pub fn from_selector(selector: &str, important: bool, sheet: u32, rule: u32) -> Self {
        Self {
            important,
            ids: count_u32(selector.matches('#').count()),
            classes: count_u32(selector.matches('.').count()),
            elements: count_u32(element_pattern().find_iter(selector).count()),
            sheet,
            rule,
        }
    }

    /// Rank of a declaration from the element's own `style` attribute.
    pub fn inline(important: bool) -> Self {
        Self {
            important,
            ids: u32::MAX,
            classes: u32::MAX,
            elements: u32::MAX,
            sheet: u32::MAX,
            rule: u32::MAX,
        }
    }

    pub fn is_inline(&self) -> bool {
        self.ids == u32::MAX && self.rule == u32::MAX
    }
}

fn count_u32(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}
