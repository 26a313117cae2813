//! Relational sink for curated stock history.
//!
//! Rows are appended to a PostgreSQL table inside a single transaction, so a
//! load either lands completely or not at all.

use crate::config::SinkConfig;
use crate::error::{ReconError, Result};
use crate::types::{CURATED_COLUMNS, StockRecord};
use crate::utils::is_valid_table_name;
use postgres::{Client, NoTls};
use tracing::{debug, info};

/// SQL types for the curated columns, in curated order.
const COLUMN_TYPES: [&str; 10] = [
    "TEXT NOT NULL",
    "TEXT NOT NULL",
    "DOUBLE PRECISION",
    "DOUBLE PRECISION NOT NULL",
    "DOUBLE PRECISION NOT NULL",
    "DOUBLE PRECISION NOT NULL",
    "CHAR(1) NOT NULL",
    "DATE NOT NULL",
    "BOOLEAN NOT NULL",
    "DOUBLE PRECISION",
];

/// `CREATE TABLE IF NOT EXISTS` statement for the curated layout.
pub fn create_table_sql(table: &str) -> String {
    let columns: Vec<String> = CURATED_COLUMNS
        .iter()
        .zip(COLUMN_TYPES)
        .map(|(name, ty)| format!("\"{name}\" {ty}"))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {table} ({})",
        columns.join(", ")
    )
}

/// Parameterized `INSERT` statement for one curated row.
pub fn insert_sql(table: &str) -> String {
    let names: Vec<String> = CURATED_COLUMNS.iter().map(|n| format!("\"{n}\"")).collect();
    let params: Vec<String> = (1..=CURATED_COLUMNS.len()).map(|i| format!("${i}")).collect();
    format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        names.join(", "),
        params.join(", ")
    )
}

/// PostgreSQL sink holding one open connection.
pub struct PostgresSink {
    client: Client,
    table: String,
}

impl std::fmt::Debug for PostgresSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresSink")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl PostgresSink {
    /// Connect using the given configuration.
    pub fn connect(config: &SinkConfig) -> Result<Self> {
        if !is_valid_table_name(&config.table) {
            return Err(ReconError::InvalidConfig(format!(
                "'{}' is not a valid table name",
                config.table
            )));
        }

        let mut pg: postgres::Config = config.url.parse()?;
        pg.user(&config.user).password(&config.password);
        let client = pg.connect(NoTls)?;
        info!("Connected to sink, target table {}", config.table);

        Ok(Self {
            client,
            table: config.table.clone(),
        })
    }

    /// Create the target table when it does not exist yet.
    pub fn ensure_table(&mut self) -> Result<()> {
        self.client.batch_execute(&create_table_sql(&self.table))?;
        Ok(())
    }

    /// Append records in one transaction. Returns the number of rows written.
    pub fn append(&mut self, records: &[StockRecord]) -> Result<u64> {
        let mut tx = self.client.transaction()?;
        let stmt = tx.prepare(&insert_sql(&self.table))?;

        let mut written = 0;
        for record in records {
            let valid_for = record.valid_for.as_str();
            written += tx.execute(
                &stmt,
                &[
                    &record.item_code,
                    &record.warehouse_code,
                    &record.on_hand,
                    &record.is_committed,
                    &record.on_order,
                    &record.avg_price,
                    &valid_for,
                    &record.record_date,
                    &record.outlier_flag,
                    &record.on_hand_raw,
                ],
            )?;
        }

        tx.commit()?;
        debug!("Committed {} rows", written);
        info!("Appended {} rows to {}", written, self.table);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_table_sql() {
        let sql = create_table_sql("stock_history");
        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS stock_history ("));
        assert!(sql.contains("\"ItemCode\" TEXT NOT NULL"));
        assert!(sql.contains("\"RecordDate\" DATE NOT NULL"));
        assert!(sql.contains("\"OnHand_raw\" DOUBLE PRECISION)"));
    }

    #[test]
    fn test_insert_sql_binds_every_column() {
        let sql = insert_sql("dbo.stock");
        assert!(sql.starts_with("INSERT INTO dbo.stock (\"ItemCode\", \"WhsCode\""));
        assert!(sql.ends_with("$9, $10)"));
    }

    #[test]
    fn test_connect_rejects_bad_table() {
        let config = SinkConfig {
            url: "postgres://localhost/stock".to_string(),
            user: "etl".to_string(),
            password: "secret".to_string(),
            table: "x; DROP TABLE y".to_string(),
        };
        let err = PostgresSink::connect(&config).unwrap_err();
        assert!(err.is_configuration());
    }
}
