//! Crash-recovery journal of in-flight orders.
//!
//! The journal is a JSON array of [`InFlightOrder`] records. Saves write a
//! sibling temp file and rename it over the journal, so a crash mid-write
//! leaves the previous journal intact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::application::order::OrderTracker;
use crate::domain::order::InFlightOrder;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct OrderJournal {
    path: PathBuf,
}

impl OrderJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the journal with `orders`.
    ///
    /// # Errors
    ///
    /// Returns an IO or serialization error; the previous journal is kept.
    pub fn save(&self, orders: &[InFlightOrder]) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.temp_path();
        {
            let mut file = fs::File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, orders)?;
            file.flush()?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), orders = orders.len(), "order journal saved");
        Ok(())
    }

    /// Read the journal. A missing file is an empty journal.
    ///
    /// # Errors
    ///
    /// Returns an IO error or a JSON error for a corrupt journal.
    pub fn load(&self) -> Result<Vec<InFlightOrder>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Save every order the tracker still has in flight.
    ///
    /// # Errors
    ///
    /// See [`OrderJournal::save`].
    pub fn checkpoint(&self, tracker: &OrderTracker) -> Result<usize> {
        let orders = tracker.snapshot_orders();
        self.save(&orders)?;
        Ok(orders.len())
    }

    /// Load the journal into the tracker. Returns how many orders were
    /// restored.
    ///
    /// # Errors
    ///
    /// See [`OrderJournal::load`].
    pub fn recover(&self, tracker: &OrderTracker) -> Result<usize> {
        let restored = tracker.restore(self.load()?);
        info!(path = %self.path.display(), restored, "orders recovered from journal");
        Ok(restored)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::id::{ClientOrderId, TradingPair};
    use crate::domain::order::OrderSide;
    use rust_decimal_macros::dec;

    fn order(id: &str) -> InFlightOrder {
        InFlightOrder::limit(
            ClientOrderId::from(id),
            TradingPair::from("BTC-USDT"),
            OrderSide::Buy,
            dec!(100),
            dec!(10),
        )
        .unwrap()
    }

    #[test]
    fn test_missing_journal_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let journal = OrderJournal::new(dir.path().join("orders.json"));
        assert!(journal.load().unwrap().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let journal = OrderJournal::new(dir.path().join("nested").join("orders.json"));
        journal.save(&[order("a"), order("b")]).unwrap();

        let loaded = journal.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].client_order_id(), &ClientOrderId::from("a"));
        assert!(!dir.path().join("nested").join("orders.json.tmp").exists());
    }

    #[test]
    fn test_corrupt_journal_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("orders.json");
        fs::write(&path, "{not json").unwrap();
        assert!(OrderJournal::new(path).load().is_err());
    }
}
