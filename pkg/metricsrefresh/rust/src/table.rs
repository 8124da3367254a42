// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Client-side sorting and pagination for report tables.
//!
//! One [`TableSpec`] per table declares its columns (accessor + default
//! direction) and the tie-breakers used when the active column compares
//! equal. Missing values always sort last, in both directions.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use log::debug;
use serde::{Deserialize, Serialize};

/// Up to this many pages, the page window lists every page.
pub const MAX_UNWINDOWED_PAGES: usize = 7;
/// Pages shown on each side of the current one in a windowed list.
const WINDOW_RADIUS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn flipped(self) -> Self {
        match self {
            SortDir::Asc => SortDir::Desc,
            SortDir::Desc => SortDir::Asc,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortState {
    pub by: String,
    pub dir: SortDir,
}

impl SortState {
    pub fn new(by: impl Into<String>, dir: SortDir) -> Self {
        Self { by: by.into(), dir }
    }
}

/// Value a column exposes for sorting.
#[derive(Debug, Clone, PartialEq)]
pub enum SortValue {
    Null,
    Number(f64),
    Text(String),
}

impl SortValue {
    /// `None` for missing values: nulls, non-finite numbers and blank text.
    fn present(&self) -> Option<&SortValue> {
        match self {
            SortValue::Null => None,
            SortValue::Number(n) if !n.is_finite() => None,
            SortValue::Text(t) if t.trim().is_empty() => None,
            other => Some(other),
        }
    }
}

impl From<f64> for SortValue {
    fn from(n: f64) -> Self {
        SortValue::Number(n)
    }
}

impl From<Option<f64>> for SortValue {
    fn from(n: Option<f64>) -> Self {
        n.map_or(SortValue::Null, SortValue::Number)
    }
}

impl From<&str> for SortValue {
    fn from(s: &str) -> Self {
        SortValue::Text(s.to_string())
    }
}

impl From<Option<&str>> for SortValue {
    fn from(s: Option<&str>) -> Self {
        s.map_or(SortValue::Null, SortValue::from)
    }
}

impl From<String> for SortValue {
    fn from(s: String) -> Self {
        SortValue::Text(s)
    }
}

type Accessor<R> = Box<dyn Fn(&R) -> SortValue + Send + Sync>;

pub struct Column<R> {
    key: String,
    default_dir: SortDir,
    accessor: Accessor<R>,
}

impl<R> Column<R> {
    pub fn new(
        key: impl Into<String>,
        default_dir: SortDir,
        accessor: impl Fn(&R) -> SortValue + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            default_dir,
            accessor: Box::new(accessor),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn default_dir(&self) -> SortDir {
        self.default_dir
    }
}

pub struct TableSpec<R> {
    columns: Vec<Column<R>>,
    tie_breakers: Vec<(String, SortDir)>,
}

impl<R> Default for TableSpec<R> {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            tie_breakers: Vec::new(),
        }
    }
}

impl<R> TableSpec<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, column: Column<R>) -> Self {
        self.columns.push(column);
        self
    }

    /// Appends a secondary key, consulted in declaration order when the
    /// active column ties.
    pub fn tie_break(mut self, key: impl Into<String>, dir: SortDir) -> Self {
        self.tie_breakers.push((key.into(), dir));
        self
    }

    pub fn find_column(&self, key: &str) -> Option<&Column<R>> {
        self.columns.iter().find(|c| c.key == key)
    }

    /// First declared column in its default direction.
    pub fn default_sort(&self) -> Option<SortState> {
        self.columns
            .first()
            .map(|c| SortState::new(c.key.clone(), c.default_dir))
    }

    /// Stable sort of `rows` by `state`. An unknown column leaves the rows
    /// untouched and returns `false`.
    pub fn sort(&self, rows: &mut [R], state: &SortState) -> bool {
        let Some(primary) = self.find_column(&state.by) else {
            debug!("ignoring sort by unknown column {:?}", state.by);
            return false;
        };
        let secondary: Vec<(&Column<R>, SortDir)> = self
            .tie_breakers
            .iter()
            .filter_map(|(key, dir)| self.find_column(key).map(|c| (c, *dir)))
            .collect();

        rows.sort_by(|a, b| {
            compare_column(primary, state.dir, a, b).then_with(|| {
                secondary
                    .iter()
                    .map(|(col, dir)| compare_column(col, *dir, a, b))
                    .find(|o| o.is_ne())
                    .unwrap_or(Ordering::Equal)
            })
        });
        true
    }
}

fn compare_column<R>(column: &Column<R>, dir: SortDir, a: &R, b: &R) -> Ordering {
    let va = (column.accessor)(a);
    let vb = (column.accessor)(b);
    compare_values(&va, &vb, dir)
}

/// Nulls last regardless of `dir`; numbers before text; text compared
/// case-insensitively.
fn compare_values(a: &SortValue, b: &SortValue, dir: SortDir) -> Ordering {
    let base = match (a.present(), b.present()) {
        (None, None) => return Ordering::Equal,
        (None, Some(_)) => return Ordering::Greater,
        (Some(_), None) => return Ordering::Less,
        (Some(SortValue::Number(x)), Some(SortValue::Number(y))) => x.total_cmp(y),
        (Some(SortValue::Text(x)), Some(SortValue::Text(y))) => {
            x.to_lowercase().cmp(&y.to_lowercase())
        }
        (Some(SortValue::Number(_)), Some(_)) => Ordering::Less,
        (Some(_), Some(SortValue::Number(_))) => Ordering::Greater,
        (Some(_), Some(_)) => Ordering::Equal,
    };
    match dir {
        SortDir::Asc => base,
        SortDir::Desc => base.reverse(),
    }
}

/// `page` is 1-based and always within `[1, total_pages()]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageState {
    pub page: usize,
    pub page_size: usize,
    pub total_count: usize,
}

impl PageState {
    pub fn new(page_size: usize, total_count: usize) -> Self {
        Self {
            page: 1,
            page_size: page_size.max(1),
            total_count,
        }
    }

    pub fn total_pages(&self) -> usize {
        page_count(self.total_count, self.page_size)
    }

    pub fn go_to(&mut self, requested: i64) {
        self.page = clamp_page(requested, self.total_pages());
    }

    /// Updates the row count (e.g. after a refresh) and re-clamps the page.
    pub fn set_total(&mut self, total_count: usize) {
        self.total_count = total_count;
        self.page = self.page.clamp(1, self.total_pages());
    }

    pub fn window(&self) -> Vec<PageItem> {
        build_page_window(self.page, self.total_pages())
    }
}

pub fn page_count(total_count: usize, page_size: usize) -> usize {
    total_count.div_ceil(page_size.max(1)).max(1)
}

/// `min(max(1, requested), max(1, total_pages))`.
pub fn clamp_page(requested: i64, total_pages: usize) -> usize {
    let requested = usize::try_from(requested.max(1)).unwrap_or(usize::MAX);
    requested.min(total_pages.max(1))
}

/// Rows on the current page. Out-of-range pages are clamped first.
pub fn paginate<'a, R>(rows: &'a [R], state: &PageState) -> &'a [R] {
    let page_size = state.page_size.max(1);
    let page = state.page.clamp(1, page_count(rows.len(), page_size));
    let start = (page - 1).saturating_mul(page_size);
    let end = start.saturating_add(page_size).min(rows.len());
    rows.get(start..end).unwrap_or(&[])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type", content = "page")]
pub enum PageItem {
    Page(usize),
    Ellipsis,
}

/// Page buttons for the pager. Every page when there are at most
/// [`MAX_UNWINDOWED_PAGES`]; otherwise first, last, the current page with
/// its neighbours, and an ellipsis for each gap.
pub fn build_page_window(current: usize, total_pages: usize) -> Vec<PageItem> {
    let total = total_pages.max(1);
    let current = current.clamp(1, total);
    if total <= MAX_UNWINDOWED_PAGES {
        return (1..=total).map(PageItem::Page).collect();
    }

    let mut pages = BTreeSet::from([1, total]);
    let low = current.saturating_sub(WINDOW_RADIUS).max(1);
    let high = current.saturating_add(WINDOW_RADIUS).min(total);
    pages.extend(low..=high);

    let mut items = Vec::with_capacity(pages.len() * 2);
    let mut previous: Option<usize> = None;
    for page in pages {
        if let Some(prev) = previous
            && page > prev + 1
        {
            items.push(PageItem::Ellipsis);
        }
        items.push(PageItem::Page(page));
        previous = Some(page);
    }
    items
}

/// Sort and page state of one table, driven by header clicks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableState {
    pub sort: SortState,
    pub page: PageState,
}

impl TableState {
    pub fn new(sort: SortState, page_size: usize) -> Self {
        Self {
            sort,
            page: PageState::new(page_size, 0),
        }
    }

    /// Header click: the active column flips direction; another column
    /// becomes active in its default direction and the page resets to 1.
    /// Clicks on unknown columns are ignored. Returns whether anything
    /// changed.
    pub fn click_header<R>(&mut self, column: &str, spec: &TableSpec<R>) -> bool {
        let Some(col) = spec.find_column(column) else {
            debug!("ignoring click on unknown column {column:?}");
            return false;
        };
        if self.sort.by == col.key {
            self.sort.dir = self.sort.dir.flipped();
        } else {
            self.sort = SortState::new(col.key.clone(), col.default_dir);
            self.page.page = 1;
        }
        true
    }

    /// Sorts `rows`, records the row count and returns the visible page.
    pub fn apply<'a, R>(&mut self, spec: &TableSpec<R>, rows: &'a mut [R]) -> &'a [R] {
        spec.sort(rows, &self.sort);
        self.page.set_total(rows.len());
        paginate(rows, &self.page)
    }
}
