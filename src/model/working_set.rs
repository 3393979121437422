//! The collection a bulk operation acts on, before chunking.

use async_trait::async_trait;
use std::collections::HashSet;

use super::Identified;
use crate::error::{Error, Result};

/// A larger, already-filtered, already-sorted collection that can be paged.
#[async_trait]
pub trait FilteredView<T>: Send + Sync {
    /// Fetch up to `limit` items starting at `offset`. A short page means
    /// the view is exhausted.
    async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Vec<T>>;
}

/// A view over items already in memory.
#[derive(Debug, Clone)]
pub struct VecView<T> {
    items: Vec<T>,
}

impl<T> VecView<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl<T: Clone + Send + Sync> FilteredView<T> for VecView<T> {
    async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Vec<T>> {
        Ok(self.items.iter().skip(offset).take(limit).cloned().collect())
    }
}

/// What a bulk run targets: an explicit selection, or the first `count`
/// items of a filtered view.
pub struct WorkingSet<T> {
    source: Source<T>,
}

enum Source<T> {
    Selected(Vec<T>),
    Counted {
        view: Box<dyn FilteredView<T>>,
        count: usize,
    },
}

impl<T: Identified> WorkingSet<T> {
    /// Explicit selection. Repeated identifiers keep their first position.
    pub fn selected(items: impl IntoIterator<Item = T>) -> Self {
        let mut seen = HashSet::new();
        let items = items
            .into_iter()
            .filter(|item| seen.insert(item.id()))
            .collect();
        Self {
            source: Source::Selected(items),
        }
    }

    /// The first `count` items of `view`.
    pub fn counted(view: impl FilteredView<T> + 'static, count: usize) -> Self {
        Self {
            source: Source::Counted {
                view: Box::new(view),
                count,
            },
        }
    }

    /// Short label for logs and audit context.
    pub fn mode(&self) -> &'static str {
        match self.source {
            Source::Selected(_) => "selected",
            Source::Counted { .. } => "counted",
        }
    }

    /// Materialize into a concrete ordered list.
    ///
    /// Counted mode pages through the view `page_size` items at a time and
    /// never holds more than `count` items. Asking for more than the view has
    /// clamps to what exists.
    pub async fn resolve(self, page_size: usize) -> Result<Vec<T>> {
        match self.source {
            Source::Selected(items) => Ok(items),
            Source::Counted { view, count } => {
                if page_size == 0 {
                    return Err(Error::InvalidChunkSize(page_size));
                }
                let mut out = Vec::with_capacity(count.min(page_size));
                let mut offset = 0;
                while out.len() < count {
                    let limit = page_size.min(count - out.len());
                    let page = view.fetch_page(offset, limit).await?;
                    let fetched = page.len();
                    out.extend(page.into_iter().take(limit));
                    if fetched < limit {
                        break;
                    }
                    offset += fetched;
                }
                Ok(out)
            }
        }
    }
}
