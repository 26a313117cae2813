//! Wide-to-long reshaping of date-blocked snapshot tables.
//!
//! A normalized wide table looks like
//!
//! ```text
//! ItemCode | W01 | W02 | Date | W01.1 | W02.1 | Date.1 | ...
//! ```
//!
//! where every date-marker column closes a block of warehouse columns, and the
//! marker's first data row holds the date the whole block was counted on.
//! Reshaping stacks each block into `(ItemCode, WhsCode, OnHand, RecordDate)`
//! rows, leaving quantities and dates as text for the structural cleaner.

use crate::error::{ReconError, Result};
use crate::types::{ITEM_CODE, ON_HAND, RECORD_DATE, WHS_CODE};
use crate::utils::str_values;
use polars::prelude::*;
use serde::Serialize;
use tracing::{debug, info};

/// One block of warehouse columns closed by a date-marker column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateBlock {
    /// Header of the date-marker column.
    pub marker: String,
    /// Position of the marker in the wide table.
    pub marker_index: usize,
    /// Date text read from the marker's first data row.
    pub date: Option<String>,
    /// Warehouse headers in the block, in table order.
    pub warehouse_columns: Vec<String>,
}

impl DateBlock {
    pub fn is_empty(&self) -> bool {
        self.warehouse_columns.is_empty()
    }
}

/// Result of reshaping one wide table.
#[derive(Debug, Clone)]
pub struct ReshapeOutput {
    /// Long table of text columns `ItemCode, WhsCode, OnHand, RecordDate`.
    pub table: DataFrame,
    /// Every block found, including empty ones.
    pub blocks: Vec<DateBlock>,
    /// Item rows in the wide table.
    pub items: usize,
}

/// Converts wide date-blocked tables into long rows.
#[derive(Debug, Clone)]
pub struct Reshaper {
    date_token: String,
    separator: String,
}

impl Default for Reshaper {
    fn default() -> Self {
        Self::new("Date", ".")
    }
}

impl Reshaper {
    pub fn new(date_token: impl Into<String>, separator: impl Into<String>) -> Self {
        Self {
            date_token: date_token.into(),
            separator: separator.into(),
        }
    }

    /// Short warehouse name: the header up to the first separator.
    pub fn warehouse_name<'a>(&self, header: &'a str) -> &'a str {
        header
            .split(self.separator.as_str())
            .next()
            .unwrap_or(header)
    }

    /// Locate the date-marker columns and the warehouse run each one closes.
    ///
    /// Column 0 is the item identifier and never belongs to a block. Columns
    /// after the last marker belong to no block and are ignored.
    pub fn detect_blocks(&self, wide: &DataFrame) -> Result<Vec<DateBlock>> {
        if wide.height() == 0 {
            return Err(ReconError::EmptyInput("wide table has no data rows".to_string()));
        }
        if wide.width() < 2 {
            return Err(ReconError::EmptyInput(
                "wide table has no columns besides the item id".to_string(),
            ));
        }

        let headers: Vec<String> = wide
            .get_column_names()
            .iter()
            .map(|s| s.to_string())
            .collect();

        let mut blocks = Vec::new();
        let mut start = 1;
        for (idx, header) in headers.iter().enumerate().skip(1) {
            if !header.contains(self.date_token.as_str()) {
                continue;
            }
            let date = str_values(wide, header)?
                .into_iter()
                .next()
                .flatten()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());

            blocks.push(DateBlock {
                marker: header.clone(),
                marker_index: idx,
                date,
                warehouse_columns: headers[start..idx].to_vec(),
            });
            start = idx + 1;
        }

        if blocks.is_empty() {
            return Err(ReconError::NoDateColumns {
                token: self.date_token.clone(),
            });
        }

        if let Some(block) = blocks.iter().find(|b| !b.is_empty() && b.date.is_none()) {
            return Err(ReconError::MissingBlockDate {
                column: block.marker.clone(),
            });
        }

        Ok(blocks)
    }

    /// Stack every block of `wide` into long rows.
    ///
    /// Rows are emitted block by block, then item by item, then warehouse by
    /// warehouse. That order is the tie-break order for later deduplication.
    pub fn reshape(&self, wide: &DataFrame) -> Result<ReshapeOutput> {
        let blocks = self.detect_blocks(wide)?;
        let item_header = wide.get_column_names()[0].to_string();
        let items = str_values(wide, &item_header)?;

        let capacity: usize = blocks
            .iter()
            .map(|b| b.warehouse_columns.len() * items.len())
            .sum();
        let mut item_out: Vec<Option<String>> = Vec::with_capacity(capacity);
        let mut whs_out: Vec<String> = Vec::with_capacity(capacity);
        let mut qty_out: Vec<Option<String>> = Vec::with_capacity(capacity);
        let mut date_out: Vec<Option<String>> = Vec::with_capacity(capacity);

        for block in &blocks {
            if block.is_empty() {
                debug!("Block '{}' has no warehouse columns, skipping", block.marker);
                continue;
            }

            let columns = block
                .warehouse_columns
                .iter()
                .map(|header| -> Result<(&str, Vec<Option<String>>)> {
                    Ok((self.warehouse_name(header), str_values(wide, header)?))
                })
                .collect::<Result<Vec<_>>>()?;

            for (row, item) in items.iter().enumerate() {
                for (warehouse, values) in &columns {
                    item_out.push(item.clone());
                    whs_out.push(warehouse.to_string());
                    qty_out.push(values[row].clone());
                    date_out.push(block.date.clone());
                }
            }
        }

        let table = DataFrame::new(vec![
            Column::new(ITEM_CODE.into(), item_out),
            Column::new(WHS_CODE.into(), whs_out),
            Column::new(ON_HAND.into(), qty_out),
            Column::new(RECORD_DATE.into(), date_out),
        ])?;

        info!(
            "Reshaped {} items across {} blocks into {} rows",
            items.len(),
            blocks.len(),
            table.height()
        );

        Ok(ReshapeOutput {
            table,
            blocks,
            items: items.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn wide() -> DataFrame {
        df!(
            "ItemCode" => ["A", "B"],
            "W01" => [Some("10"), Some("DC")],
            "W02" => [Some("5"), None],
            "Date" => [Some("2024-Jan-02"), None],
            "W01.1" => [Some("11"), Some("3")],
            "W02.1" => [Some("6"), Some("4")],
            "Date.1" => [Some("2024-Jan-03"), Some("2024-Jan-03")]
        )
        .unwrap()
    }

    #[test]
    fn test_warehouse_name_strips_suffix() {
        let reshaper = Reshaper::default();
        assert_eq!(reshaper.warehouse_name("W01.1"), "W01");
        assert_eq!(reshaper.warehouse_name("W01"), "W01");
    }

    #[test]
    fn test_detect_blocks() {
        let blocks = Reshaper::default().detect_blocks(&wide()).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].warehouse_columns, vec!["W01", "W02"]);
        assert_eq!(blocks[0].date.as_deref(), Some("2024-Jan-02"));
        assert_eq!(blocks[1].marker, "Date.1");
        assert_eq!(blocks[1].marker_index, 6);
        assert_eq!(blocks[1].warehouse_columns, vec!["W01.1", "W02.1"]);
    }

    #[test]
    fn test_reshape_row_count_and_order() {
        let out = Reshaper::default().reshape(&wide()).unwrap();
        // 2 items x 2 warehouses x 2 blocks
        assert_eq!(out.table.height(), 8);
        assert_eq!(out.items, 2);

        let whs = str_values(&out.table, WHS_CODE).unwrap();
        let qty = str_values(&out.table, ON_HAND).unwrap();
        let items = str_values(&out.table, ITEM_CODE).unwrap();
        assert_eq!(items[0].as_deref(), Some("A"));
        assert_eq!(whs[0].as_deref(), Some("W01"));
        assert_eq!(whs[1].as_deref(), Some("W02"));
        assert_eq!(items[2].as_deref(), Some("B"));
        assert_eq!(qty[2].as_deref(), Some("DC"));
        assert_eq!(qty[3], None);
        assert_eq!(whs[4].as_deref(), Some("W01"));
        assert_eq!(qty[4].as_deref(), Some("11"));

        // The block date is broadcast from the first data row only
        let dates = str_values(&out.table, RECORD_DATE).unwrap();
        assert!(dates[..4].iter().all(|d| d.as_deref() == Some("2024-Jan-02")));
        assert!(dates[4..].iter().all(|d| d.as_deref() == Some("2024-Jan-03")));
    }

    #[test]
    fn test_adjacent_markers_contribute_nothing() {
        let df = df!(
            "ItemCode" => ["A"],
            "W01" => ["1"],
            "Date" => ["2024-Jan-02"],
            "Date.1" => [None::<&str>],
            "W01.1" => ["2"],
            "Date.2" => ["2024-Jan-04"]
        )
        .unwrap();

        let out = Reshaper::default().reshape(&df).unwrap();
        assert_eq!(out.blocks.len(), 3);
        assert!(out.blocks[1].is_empty());
        assert_eq!(out.table.height(), 2);
    }

    #[test]
    fn test_trailing_columns_are_ignored() {
        let df = df!(
            "ItemCode" => ["A"],
            "W01" => ["1"],
            "Date" => ["2024-Jan-02"],
            "Notes" => ["x"]
        )
        .unwrap();
        let out = Reshaper::default().reshape(&df).unwrap();
        assert_eq!(out.table.height(), 1);
    }

    #[test]
    fn test_no_date_columns_is_structural() {
        let df = df!("ItemCode" => ["A"], "W01" => ["1"]).unwrap();
        let err = Reshaper::default().reshape(&df).unwrap_err();
        assert!(matches!(err, ReconError::NoDateColumns { .. }));
        assert!(err.is_structural());
    }

    #[test]
    fn test_missing_block_date_is_structural() {
        let df = df!(
            "ItemCode" => ["A", "B"],
            "W01" => ["1", "2"],
            "Date" => [None, Some("2024-Jan-02")]
        )
        .unwrap();
        let err = Reshaper::default().reshape(&df).unwrap_err();
        match err {
            ReconError::MissingBlockDate { column } => assert_eq!(column, "Date"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_empty_table_is_structural() {
        let df = df!("ItemCode" => Vec::<&str>::new(), "Date" => Vec::<&str>::new()).unwrap();
        let err = Reshaper::default().reshape(&df).unwrap_err();
        assert!(matches!(err, ReconError::EmptyInput(_)));
    }

    #[test]
    fn test_custom_token_and_separator() {
        let df = df!(
            "Item" => ["A"],
            "W01" => ["1"],
            "Stamp" => ["2024-01-02"],
            "W01_1" => ["2"],
            "Stamp_1" => ["2024-01-03"]
        )
        .unwrap();
        let out = Reshaper::new("Stamp", "_").reshape(&df).unwrap();
        let whs = str_values(&out.table, WHS_CODE).unwrap();
        assert_eq!(whs, vec![Some("W01".to_string()), Some("W01".to_string())]);
    }
}
