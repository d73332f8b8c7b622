use serde::Serialize;

pub const DEFAULT_PER_PAGE: usize = 10;
pub const MAX_PER_PAGE: usize = 100;

/// One page of a result list plus the numbers needed to render pager links
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// 1-based page number, always within `1..=total_pages`
    pub number: usize,
    pub per_page: usize,
    pub total_items: usize,
    pub total_pages: usize,
}

impl<T> Page<T> {
    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    pub fn has_next(&self) -> bool {
        self.number < self.total_pages
    }

    pub fn previous(&self) -> Option<usize> {
        self.has_previous().then(|| self.number - 1)
    }

    pub fn next(&self) -> Option<usize> {
        self.has_next().then(|| self.number + 1)
    }

    /// 1-based index of the first item on this page, 0 for an empty list
    pub fn first_item(&self) -> usize {
        if self.items.is_empty() {
            0
        } else {
            (self.number - 1) * self.per_page + 1
        }
    }

    /// 1-based index of the last item on this page, 0 for an empty list
    pub fn last_item(&self) -> usize {
        if self.items.is_empty() {
            0
        } else {
            self.first_item() + self.items.len() - 1
        }
    }

    /// Transform the items while keeping the page arithmetic
    pub fn map<U, F>(self, f: F) -> Page<U>
    where
        F: FnMut(T) -> U,
    {
        Page {
            items: self.items.into_iter().map(f).collect(),
            number: self.number,
            per_page: self.per_page,
            total_items: self.total_items,
            total_pages: self.total_pages,
        }
    }
}

/// Normalise a requested page size
pub fn clamp_per_page(per_page: usize) -> usize {
    if per_page == 0 {
        DEFAULT_PER_PAGE
    } else {
        per_page.min(MAX_PER_PAGE)
    }
}

/// Cut `items` into pages and return the requested one
///
/// Out-of-range page numbers are clamped rather than rejected: page 0 is
/// treated as the first page and anything past the end as the last. An
/// empty list still has one (empty) page.
///
/// # Examples
/// ```
/// use rabindra::pagination::paginate;
///
/// let numbers: Vec<u32> = (1..=25).collect();
/// let page = paginate(&numbers, 3, 10);
/// assert_eq!(page.items, vec![21, 22, 23, 24, 25]);
/// assert_eq!(page.total_pages, 3);
/// assert!(!page.has_next());
/// ```
pub fn paginate<T: Clone>(items: &[T], page: usize, per_page: usize) -> Page<T> {
    let per_page = clamp_per_page(per_page);
    let total_items = items.len();
    let total_pages = total_items.div_ceil(per_page).max(1);
    let number = page.clamp(1, total_pages);

    let start = (number - 1) * per_page;
    let end = (start + per_page).min(total_items);
    let items = if start < end {
        items[start..end].to_vec()
    } else {
        Vec::new()
    };

    Page {
        items,
        number,
        per_page,
        total_items,
        total_pages,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_page() {
        let items: Vec<usize> = (0..23).collect();
        let page = paginate(&items, 1, 10);
        assert_eq!(page.items.len(), 10);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.first_item(), 1);
        assert_eq!(page.last_item(), 10);
        assert_eq!(page.previous(), None);
        assert_eq!(page.next(), Some(2));
    }

    #[test]
    fn last_partial_page() {
        let items: Vec<usize> = (0..23).collect();
        let page = paginate(&items, 3, 10);
        assert_eq!(page.items, vec![20, 21, 22]);
        assert_eq!(page.first_item(), 21);
        assert_eq!(page.last_item(), 23);
        assert_eq!(page.previous(), Some(2));
        assert_eq!(page.next(), None);
    }

    #[test]
    fn out_of_range_pages_are_clamped() {
        let items: Vec<usize> = (0..23).collect();
        assert_eq!(paginate(&items, 0, 10).number, 1);
        assert_eq!(paginate(&items, 99, 10).number, 3);
    }

    #[test]
    fn empty_list_has_one_empty_page() {
        let items: Vec<usize> = Vec::new();
        let page = paginate(&items, 4, 10);
        assert_eq!(page.number, 1);
        assert_eq!(page.total_pages, 1);
        assert!(page.items.is_empty());
        assert_eq!(page.first_item(), 0);
        assert_eq!(page.last_item(), 0);
    }

    #[test]
    fn page_size_is_normalised() {
        let items: Vec<usize> = (0..500).collect();
        assert_eq!(paginate(&items, 1, 0).per_page, DEFAULT_PER_PAGE);
        assert_eq!(paginate(&items, 1, 1000).per_page, MAX_PER_PAGE);
    }

    #[test]
    fn exact_multiple_has_no_trailing_page() {
        let items: Vec<usize> = (0..20).collect();
        assert_eq!(paginate(&items, 1, 10).total_pages, 2);
    }
}
