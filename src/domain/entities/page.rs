/// One page of a paginated listing
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Zero-based page index, clamped into range
    pub page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

impl<T: Clone> Page<T> {
    /// Cut `page` out of `items`. An empty listing still has one (empty) page.
    pub fn slice(items: &[T], page: usize, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let total_items = items.len();
        let total_pages = total_items.div_ceil(page_size).max(1);
        let page = page.min(total_pages - 1);
        let start = page * page_size;
        let end = (start + page_size).min(total_items);

        Self {
            items: items.get(start..end).map(|s| s.to_vec()).unwrap_or_default(),
            page,
            total_pages,
            total_items,
        }
    }
}

impl<T> Page<T> {
    pub fn has_previous(&self) -> bool {
        self.page > 0
    }

    pub fn has_next(&self) -> bool {
        self.page + 1 < self.total_pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slices_and_clamps() {
        let items: Vec<u32> = (0..12).collect();

        let first = Page::slice(&items, 0, 5);
        assert_eq!(first.items, vec![0, 1, 2, 3, 4]);
        assert_eq!(first.total_pages, 3);
        assert!(!first.has_previous());
        assert!(first.has_next());

        let last = Page::slice(&items, 9, 5);
        assert_eq!(last.page, 2);
        assert_eq!(last.items, vec![10, 11]);
        assert!(!last.has_next());
    }

    #[test]
    fn empty_listing_has_one_page() {
        let page = Page::<u32>::slice(&[], 3, 5);
        assert_eq!(page.page, 0);
        assert_eq!(page.total_pages, 1);
        assert!(page.items.is_empty());
    }
}
