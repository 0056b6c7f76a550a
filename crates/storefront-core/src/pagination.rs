use tracing::debug;

use crate::{
    error::{EngineError, ErrorCategory},
    protocol::{ClientRequest, ProductDetail, ProductSummary, ProductsPage, SearchResults, SortMode},
    types::CatalogView,
};

/// Catalog page position. `total_count` only ever comes from a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageState {
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub sort: SortMode,
}

impl PageState {
    pub fn total_pages(&self) -> u32 {
        if self.page_size == 0 {
            return 0;
        }
        let pages = self.total_count.div_ceil(u64::from(self.page_size));
        u32::try_from(pages).unwrap_or(u32::MAX)
    }
}

/// Catalog browser: server-side paging, keyword search and the product
/// detail panel. While a search is active the listing shows its matches and
/// stale page responses are dropped.
#[derive(Debug, Clone)]
pub struct PageController {
    state: PageState,
    products: Vec<ProductSummary>,
    query: Option<String>,
    detail: Option<ProductSummary>,
    detail_pending: Option<i64>,
}

impl PageController {
    pub fn new(page_size: u32) -> Self {
        Self {
            state: PageState {
                page: 1,
                page_size: page_size.max(1),
                total_count: 0,
                sort: SortMode::Default,
            },
            products: Vec::new(),
            query: None,
            detail: None,
            detail_pending: None,
        }
    }

    pub fn state(&self) -> PageState {
        self.state
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Request `page`. The upper bound is only known after the response.
    pub fn jump_to(&mut self, page: u32) -> ClientRequest {
        self.leave_search();
        self.state.page = page.max(1);
        self.reload()
    }

    /// Change the sort order; returns `None` when it is unchanged.
    pub fn set_sort(&mut self, sort: SortMode) -> Option<ClientRequest> {
        let was_searching = self.leave_search();
        if sort == self.state.sort && !was_searching {
            return None;
        }
        self.state.sort = sort;
        self.state.page = 1;
        Some(self.reload())
    }

    pub fn set_page_size(&mut self, size: u32) -> Result<Option<ClientRequest>, EngineError> {
        if size == 0 {
            return Err(EngineError::validation("invalid_page_size", "每页数量必须大于 0"));
        }
        let was_searching = self.leave_search();
        if size == self.state.page_size && !was_searching {
            return Ok(None);
        }
        self.state.page_size = size;
        self.state.page = 1;
        Ok(Some(self.reload()))
    }

    /// Start a keyword search from the first page.
    pub fn search(&mut self, keyword: &str) -> Result<ClientRequest, EngineError> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Err(EngineError::validation("empty_keyword", "请输入搜索关键词"));
        }
        self.query = Some(keyword.to_owned());
        self.state.page = 1;
        Ok(self.reload())
    }

    /// Return to paged browsing; `None` when no search was active.
    pub fn clear_search(&mut self) -> Option<ClientRequest> {
        if !self.leave_search() {
            return None;
        }
        self.state.page = 1;
        Some(self.reload())
    }

    /// Fetch the current listing again.
    pub fn reload(&self) -> ClientRequest {
        match &self.query {
            Some(keyword) => ClientRequest::Search {
                keyword: keyword.clone(),
            },
            None => ClientRequest::GetProducts {
                page: self.state.page,
                size: self.state.page_size,
                sort: self.state.sort,
            },
        }
    }

    /// Apply a page and clamp the page number against the reported total.
    ///
    /// Returns a follow-up request when clamping moved the page.
    pub fn on_response(&mut self, response: ProductsPage) -> Option<ClientRequest> {
        if self.query.is_some() {
            debug!("page response while searching; dropped");
            return None;
        }
        self.state.total_count = response.total;
        self.products = response.products;

        let last = self.state.total_pages().max(1);
        let clamped = self.state.page.clamp(1, last);
        if clamped == self.state.page {
            return None;
        }
        debug!(
            requested = self.state.page,
            clamped, "page beyond catalog end; re-requesting"
        );
        self.state.page = clamped;
        Some(self.reload())
    }

    pub fn on_search_results(&mut self, response: SearchResults) {
        if self.query.is_none() {
            debug!("search results after leaving search; dropped");
            return;
        }
        self.state.page = 1;
        self.state.total_count = response.results.len() as u64;
        self.products = response.results;
    }

    /// Open the detail panel for `product_id` once the server answers.
    pub fn request_detail(&mut self, product_id: i64) -> ClientRequest {
        self.detail_pending = Some(product_id);
        ClientRequest::GetProductDetail { product_id }
    }

    /// Apply a `product_detail` reply.
    ///
    /// Unrequested replies are ignored. The server substitutes another
    /// product for unknown ids, so a mismatched id is reported as missing.
    pub fn on_detail(&mut self, response: ProductDetail) -> Result<(), EngineError> {
        let Some(requested) = self.detail_pending.take() else {
            debug!("unrequested product detail dropped");
            return Ok(());
        };
        match response.product {
            Some(product) if product.product_id == requested => {
                self.detail = Some(product);
                Ok(())
            }
            _ => Err(EngineError::new(
                ErrorCategory::Server,
                "PRODUCT_NOT_FOUND",
                "商品不存在或已下架",
            )),
        }
    }

    pub fn close_detail(&mut self) {
        self.detail_pending = None;
        self.detail = None;
    }

    pub fn view(&self) -> CatalogView {
        CatalogView {
            query: self.query.clone(),
            detail: self.detail.clone(),
            products: self.products.clone(),
            page: self.state.page,
            page_size: self.state.page_size,
            total_count: self.state.total_count,
            total_pages: self.state.total_pages(),
            sort: self.state.sort,
        }
    }

    fn leave_search(&mut self) -> bool {
        self.query.take().is_some()
    }
}
