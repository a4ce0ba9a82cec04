//! Item listing: search, filters, sorting and pagination.
//!
//! Stores that cannot push these down (the in-memory store) use [`ItemQuery::run`]
//! over a snapshot; the Postgres store translates the same query to SQL.

use core::cmp::Ordering;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use stockwatch_core::{DomainError, DomainResult};

use crate::item::{Item, StockStatus};

pub const DEFAULT_LIMIT: u32 = 50;
pub const MAX_LIMIT: u32 = 500;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortField {
    Name,
    Category,
    StockLevel,
    ReorderPoint,
}

impl SortField {
    pub fn column(self) -> &'static str {
        match self {
            SortField::Name => "name",
            SortField::Category => "category",
            SortField::StockLevel => "stock_level",
            SortField::ReorderPoint => "reorder_point",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Sort order for listings, parsed from `field:order` (e.g. `stockLevel:desc`).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSort {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for ItemSort {
    fn default() -> Self {
        Self {
            field: SortField::Name,
            direction: SortDirection::Asc,
        }
    }
}

impl ItemSort {
    pub fn compare(&self, a: &Item, b: &Item) -> Ordering {
        let ord = match self.field {
            SortField::Name => a.name.cmp(&b.name),
            SortField::Category => a.category.cmp(&b.category),
            SortField::StockLevel => a.stock_level.cmp(&b.stock_level),
            SortField::ReorderPoint => a.reorder_point.cmp(&b.reorder_point),
        };
        // Ties broken by id so pages are stable.
        let ord = ord.then_with(|| a.id.cmp(&b.id));
        match self.direction {
            SortDirection::Asc => ord,
            SortDirection::Desc => ord.reverse(),
        }
    }
}

impl FromStr for ItemSort {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (field, order) = s.split_once(':').unwrap_or((s, "asc"));
        let field = match field {
            "name" => SortField::Name,
            "category" => SortField::Category,
            "stockLevel" => SortField::StockLevel,
            "reorderPoint" => SortField::ReorderPoint,
            other => {
                return Err(DomainError::validation(format!(
                    "unsupported sort field '{other}'"
                )));
            }
        };
        let direction = if order == "desc" {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        Ok(Self { field, direction })
    }
}

/// Listing request. `page` is 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemQuery {
    pub search: Option<String>,
    pub category: Option<String>,
    pub stock_status: Option<StockStatus>,
    pub page: u32,
    pub limit: u32,
    pub sort: ItemSort,
}

impl Default for ItemQuery {
    fn default() -> Self {
        Self {
            search: None,
            category: None,
            stock_status: None,
            page: 1,
            limit: DEFAULT_LIMIT,
            sort: ItemSort::default(),
        }
    }
}

impl ItemQuery {
    pub fn with_search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_stock_status(mut self, status: StockStatus) -> Self {
        self.stock_status = Some(status);
        self
    }

    pub fn with_page(mut self, page: u32, limit: u32) -> Self {
        self.page = page;
        self.limit = limit;
        self
    }

    pub fn with_sort(mut self, sort: ItemSort) -> Self {
        self.sort = sort;
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.page == 0 {
            return Err(DomainError::validation("page must be >= 1"));
        }
        if self.limit == 0 || self.limit > MAX_LIMIT {
            return Err(DomainError::validation(format!(
                "limit must be between 1 and {MAX_LIMIT}"
            )));
        }
        Ok(())
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    /// Filter predicate (search is a case-insensitive substring match on name).
    pub fn matches(&self, item: &Item) -> bool {
        if let Some(term) = &self.search {
            if !item.name.to_lowercase().contains(&term.to_lowercase()) {
                return false;
            }
        }
        if let Some(category) = &self.category {
            if &item.category != category {
                return false;
            }
        }
        if let Some(status) = self.stock_status {
            if !status.matches(item) {
                return false;
            }
        }
        true
    }

    /// Filter, sort and paginate an in-memory snapshot.
    pub fn run(&self, items: impl IntoIterator<Item = Item>) -> DomainResult<Page<Item>> {
        self.validate()?;

        let mut matched: Vec<Item> = items.into_iter().filter(|i| self.matches(i)).collect();
        matched.sort_by(|a, b| self.sort.compare(a, b));

        let total = matched.len() as u64;
        let items = matched
            .into_iter()
            .skip(usize::try_from(self.offset()).unwrap_or(usize::MAX))
            .take(self.limit as usize)
            .collect();

        Ok(Page {
            total,
            page: self.page,
            limit: self.limit,
            items,
        })
    }
}

/// One page of results plus the total match count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub items: Vec<T>,
}
