//! Render ordering policy
//!
//! Pages near the focus page are rendered first. The order is built from three
//! tiers, concatenated, each tier internally ordered by its listed offsets:
//!
//! 1. [`PriorityTier::Immediate`]: offsets `0, +1` from focus
//! 2. [`PriorityTier::Near`]: offsets `-3, -2, -1, +2, +3`
//! 3. [`PriorityTier::Remainder`]: every other page in ascending order
//!
//! Out-of-range indices and duplicates are dropped, as are pages the caller
//! asks to skip (already rendered or already in flight).

/// Priority tier of a page relative to the focus page
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PriorityTier {
    /// Focus page and the one after it
    Immediate = 0,

    /// Pages within three of the focus
    Near = 1,

    /// Everything else
    Remainder = 2,
}

impl PriorityTier {
    /// Offsets from focus, in the order they are emitted.
    ///
    /// The remainder tier has no offsets; it covers every page not already
    /// emitted.
    pub fn offsets(self) -> &'static [i64] {
        match self {
            PriorityTier::Immediate => &[0, 1],
            PriorityTier::Near => &[-3, -2, -1, 2, 3],
            PriorityTier::Remainder => &[],
        }
    }

    /// Tier `page` falls into when `focus` is the current page
    pub fn of(focus: u32, page: u32) -> Self {
        let offset = i64::from(page) - i64::from(focus);
        if PriorityTier::Immediate.offsets().contains(&offset) {
            PriorityTier::Immediate
        } else if PriorityTier::Near.offsets().contains(&offset) {
            PriorityTier::Near
        } else {
            PriorityTier::Remainder
        }
    }
}

/// Ordered list of pages to render around `focus`, highest priority first.
///
/// A focus beyond the last page is treated as the last page. Returns an empty
/// list when `total_pages` is zero.
///
/// ```
/// use podium_scheduler::priority_order;
///
/// let order = priority_order(10, 20, |_| false);
/// assert_eq!(&order[..7], &[10, 11, 7, 8, 9, 12, 13]);
/// ```
pub fn priority_order<F>(focus: u32, total_pages: u32, skip: F) -> Vec<u32>
where
    F: Fn(u32) -> bool,
{
    if total_pages == 0 {
        return Vec::new();
    }

    let focus = i64::from(focus.min(total_pages - 1));
    let mut emitted = vec![false; total_pages as usize];
    let mut order = Vec::with_capacity(total_pages as usize);

    for tier in [PriorityTier::Immediate, PriorityTier::Near] {
        for offset in tier.offsets() {
            let index = focus + offset;
            if index < 0 || index >= i64::from(total_pages) {
                continue;
            }
            let page = index as u32;
            if emitted[page as usize] {
                continue;
            }
            emitted[page as usize] = true;
            if !skip(page) {
                order.push(page);
            }
        }
    }

    order.extend((0..total_pages).filter(|&page| !emitted[page as usize] && !skip(page)));
    order
}

/// Every page in ascending order, minus the skipped ones
pub fn ascending_order<F>(total_pages: u32, skip: F) -> Vec<u32>
where
    F: Fn(u32) -> bool,
{
    (0..total_pages).filter(|&page| !skip(page)).collect()
}
