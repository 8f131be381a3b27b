/// Fixed feed page size.
pub const POSTS_PER_PAGE: u64 = 10;

/// Splits a listing of `count` items into fixed-size pages.
///
/// Lookups never fail: a missing or malformed page number resolves to the
/// first page and any integer outside the valid range resolves to the last.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paginator {
    count: u64,
    per_page: u64,
}

impl Paginator {
    pub fn new(count: u64, per_page: u64) -> Self {
        Self {
            count,
            per_page: per_page.max(1),
        }
    }

    /// Paginator using [`POSTS_PER_PAGE`].
    pub fn for_feed(count: u64) -> Self {
        Self::new(count, POSTS_PER_PAGE)
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Total number of pages; an empty listing still has one (empty) page.
    pub fn num_pages(&self) -> u64 {
        self.count.div_ceil(self.per_page).max(1)
    }

    /// Resolves the raw `page` query value to a concrete page window.
    pub fn get_page(&self, raw: Option<&str>) -> PageWindow {
        let last = self.num_pages();
        let number = match raw.map(str::trim) {
            None | Some("") => 1,
            Some(value) => match value.parse::<i64>() {
                // any integer outside 1..=last is an empty page, served as the last one
                Ok(n) if n < 1 => last,
                Ok(n) => (n as u64).min(last),
                Err(_) if is_integer_literal(value) => last,
                Err(_) => 1,
            },
        };

        PageWindow {
            number,
            num_pages: last,
            count: self.count,
            offset: (number - 1) * self.per_page,
            limit: self.per_page,
        }
    }
}

fn is_integer_literal(value: &str) -> bool {
    let digits = value
        .strip_prefix('-')
        .or_else(|| value.strip_prefix('+'))
        .unwrap_or(value);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// The slice of a listing a page covers, before items are loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub number: u64,
    pub num_pages: u64,
    pub count: u64,
    pub offset: u64,
    pub limit: u64,
}

impl PageWindow {
    pub fn with_items<T>(self, items: Vec<T>) -> Page<T> {
        Page {
            items,
            number: self.number,
            num_pages: self.num_pages,
            count: self.count,
        }
    }
}

/// One loaded page of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub number: u64,
    pub num_pages: u64,
    pub count: u64,
}

impl<T> Page<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn has_previous(&self) -> bool {
        self.number > 1
    }

    pub fn has_next(&self) -> bool {
        self.number < self.num_pages
    }

    pub fn has_other_pages(&self) -> bool {
        self.has_previous() || self.has_next()
    }

    pub fn previous_page_number(&self) -> u64 {
        self.number.saturating_sub(1).max(1)
    }

    pub fn next_page_number(&self) -> u64 {
        (self.number + 1).min(self.num_pages)
    }

    /// Page numbers to render in pagination controls.
    pub fn page_range(&self) -> Vec<u64> {
        (1..=self.num_pages).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thirteen_posts_split_ten_and_three() {
        let paginator = Paginator::for_feed(13);
        assert_eq!(paginator.num_pages(), 2);

        let first = paginator.get_page(None);
        assert_eq!((first.number, first.offset, first.limit), (1, 0, 10));

        let second = paginator.get_page(Some("2"));
        assert_eq!((second.number, second.offset), (2, 10));
        let loaded = second.with_items(vec![(); 3]);
        assert_eq!(loaded.len(), 3);
        assert!(loaded.has_previous());
        assert!(!loaded.has_next());
    }

    #[test]
    fn out_of_range_pages_clamp() {
        let paginator = Paginator::for_feed(25);
        assert_eq!(paginator.get_page(Some("99")).number, 3);
        assert_eq!(paginator.get_page(Some("0")).number, 3);
        assert_eq!(paginator.get_page(Some("-4")).number, 3);
        assert_eq!(
            paginator.get_page(Some("99999999999999999999999")).number,
            3
        );
        assert_eq!(
            paginator.get_page(Some("-99999999999999999999999")).number,
            3
        );
    }

    #[test]
    fn malformed_page_resolves_to_first() {
        let paginator = Paginator::for_feed(25);
        assert_eq!(paginator.get_page(Some("abc")).number, 1);
        assert_eq!(paginator.get_page(Some("2.5")).number, 1);
        assert_eq!(paginator.get_page(Some("")).number, 1);
        assert_eq!(paginator.get_page(Some(" 2 ")).number, 2);
    }

    #[test]
    fn empty_listing_has_single_empty_page() {
        let paginator = Paginator::for_feed(0);
        assert_eq!(paginator.num_pages(), 1);
        let page = paginator.get_page(Some("5")).with_items(Vec::<u8>::new());
        assert_eq!(page.number, 1);
        assert!(page.is_empty());
        assert!(!page.has_other_pages());
    }

    #[test]
    fn exact_multiple_does_not_add_page() {
        let paginator = Paginator::for_feed(20);
        assert_eq!(paginator.num_pages(), 2);
        let page = paginator.get_page(Some("2")).with_items(vec![0; 10]);
        assert_eq!(page.previous_page_number(), 1);
        assert_eq!(page.next_page_number(), 2);
        assert_eq!(page.page_range(), vec![1, 2]);
    }
}
