//! Venue symbol <-> trading pair map owned by one connector.
//!
//! Populated lazily on first use. Concurrent first callers share one fetch;
//! a failed fetch leaves the cell empty so the next caller retries.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::info;

use crate::application::throttle::RestGateway;
use crate::domain::id::TradingPair;
use crate::error::Result;
use crate::port::outbound::ExchangeAdapter;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SymbolTable {
    to_pair: HashMap<String, TradingPair>,
    to_symbol: HashMap<TradingPair, String>,
}

impl SymbolTable {
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = (String, TradingPair)>) -> Self {
        let mut table = Self::default();
        for (symbol, pair) in entries {
            table.to_symbol.insert(pair.clone(), symbol.clone());
            table.to_pair.insert(symbol, pair);
        }
        table
    }

    #[must_use]
    pub fn pair(&self, symbol: &str) -> Option<&TradingPair> {
        self.to_pair.get(symbol)
    }

    #[must_use]
    pub fn symbol(&self, pair: &TradingPair) -> Option<&str> {
        self.to_symbol.get(pair).map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.to_pair.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_pair.is_empty()
    }
}

pub struct SymbolMap {
    adapter: Arc<dyn ExchangeAdapter>,
    gateway: RestGateway,
    table: OnceCell<SymbolTable>,
}

impl SymbolMap {
    pub fn new(adapter: Arc<dyn ExchangeAdapter>, gateway: RestGateway) -> Self {
        Self {
            adapter,
            gateway,
            table: OnceCell::new(),
        }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.table.initialized()
    }

    /// The table, fetching it on first use.
    ///
    /// Without a symbol request the table is empty and lookups fall back to
    /// identity.
    ///
    /// # Errors
    ///
    /// Returns the fetch or parse error; the next call retries.
    pub async fn table(&self) -> Result<&SymbolTable> {
        self.table.get_or_try_init(|| self.fetch()).await
    }

    /// Venue symbol to trading pair.
    ///
    /// # Errors
    ///
    /// See [`SymbolMap::table`].
    pub async fn pair_for(&self, symbol: &str) -> Result<Option<TradingPair>> {
        let table = self.table().await?;
        if table.is_empty() {
            return Ok(Some(TradingPair::from(symbol)));
        }
        Ok(table.pair(symbol).cloned())
    }

    /// Trading pair to venue symbol.
    ///
    /// # Errors
    ///
    /// See [`SymbolMap::table`].
    pub async fn symbol_for(&self, pair: &TradingPair) -> Result<Option<String>> {
        let table = self.table().await?;
        if table.is_empty() {
            return Ok(Some(pair.as_str().to_owned()));
        }
        Ok(table.symbol(pair).map(str::to_owned))
    }

    async fn fetch(&self) -> Result<SymbolTable> {
        let Some(request) = self.adapter.symbol_map_request() else {
            return Ok(SymbolTable::default());
        };
        let response = self.gateway.execute(request).await?;
        let table = SymbolTable::from_entries(self.adapter.parse_symbol_map(&response)?);
        info!(venue = self.adapter.name(), symbols = table.len(), "symbol map loaded");
        Ok(table)
    }
}

impl std::fmt::Debug for SymbolMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolMap")
            .field("venue", &self.adapter.name())
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
