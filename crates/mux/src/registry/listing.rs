// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lazy listing over [`Registry::list_page`].
//!
//! Each page is fetched only when the consumer reaches it, and every fetch
//! reads live registry state. Dropping the stream and calling [`list`] again
//! restarts from the first name.

use std::sync::Arc;

use futures_util::stream::{self, Stream, StreamExt};

use super::{BoidRecord, ListFilter, Registry};
use crate::error::MuxError;

/// Default page size for [`list`].
pub const DEFAULT_PAGE: usize = 64;

enum Cursor {
    Start,
    After(String),
    Done,
}

/// Stream every record matching `filter`, in name order.
pub fn list(
    registry: Arc<dyn Registry>,
    filter: ListFilter,
    page_size: usize,
) -> impl Stream<Item = Result<BoidRecord, MuxError>> {
    let page_size = page_size.max(1);
    let pages = stream::unfold(Cursor::Start, move |cursor| {
        let registry = Arc::clone(&registry);
        let filter = filter.clone();
        async move {
            let after = match cursor {
                Cursor::Start => None,
                Cursor::After(name) => Some(name),
                Cursor::Done => return None,
            };
            match registry.list_page(&filter, after.as_deref(), page_size).await {
                Ok(page) => {
                    let next = match page.next {
                        Some(name) => Cursor::After(name),
                        None => Cursor::Done,
                    };
                    Some((Ok(page.records), next))
                }
                Err(e) => Some((Err(e), Cursor::Done)),
            }
        }
    });

    pages.flat_map(|page| match page {
        Ok(records) => stream::iter(records.into_iter().map(Ok)).left_stream(),
        Err(e) => stream::iter(vec![Err(e)]).right_stream(),
    })
}

#[cfg(test)]
#[path = "listing_tests.rs"]
mod tests;
