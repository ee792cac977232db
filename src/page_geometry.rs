//! Named paper sizes and the aspect ratios used to shape images for print.

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageSize {
    pub label: &'static str,
    pub width_mm: f64,
    pub height_mm: f64,
}

impl PageSize {
    /// Width over height. Only the ratio matters, never the absolute units.
    pub fn aspect_ratio(&self) -> f64 {
        self.width_mm / self.height_mm
    }
}

pub const A4: PageSize = PageSize {
    label: "A4",
    width_mm: 210.0,
    height_mm: 297.0,
};

pub const DEFAULT_PAGE_SIZE: PageSize = A4;

pub const PAGE_SIZES: &[PageSize] = &[
    PageSize {
        label: "A3",
        width_mm: 297.0,
        height_mm: 420.0,
    },
    A4,
    PageSize {
        label: "A5",
        width_mm: 148.0,
        height_mm: 210.0,
    },
    PageSize {
        label: "Letter",
        width_mm: 215.9,
        height_mm: 279.4,
    },
    PageSize {
        label: "Legal",
        width_mm: 215.9,
        height_mm: 355.6,
    },
];

/// Outcome of resolving a page label. `fell_back` is set when the label was
/// unknown and [`DEFAULT_PAGE_SIZE`] was substituted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageLookup {
    pub size: PageSize,
    pub fell_back: bool,
}

pub fn find_page_size(label: &str) -> Option<PageSize> {
    let label = label.trim();
    PAGE_SIZES
        .iter()
        .find(|size| size.label.eq_ignore_ascii_case(label))
        .copied()
}

pub fn resolve_page_size(label: &str) -> PageLookup {
    match find_page_size(label) {
        Some(size) => PageLookup {
            size,
            fell_back: false,
        },
        None => {
            warn!(
                page_size = label,
                fallback = DEFAULT_PAGE_SIZE.label,
                "Unknown page size, using default"
            );
            PageLookup {
                size: DEFAULT_PAGE_SIZE,
                fell_back: true,
            }
        }
    }
}

pub fn target_aspect_ratio(label: &str) -> f64 {
    resolve_page_size(label).size.aspect_ratio()
}
