//! SQLite Warehouse
//!
//! Origin reader and append-only report sink over a single SQLite database.
//!
//! Origin tables come in two shapes:
//!
//! ```sql
//! -- long: one row per (metric, day)
//! CREATE TABLE metrics (metric_name TEXT, date TEXT, value REAL);
//!
//! -- wide: one row per sanitization run, one column per metric
//! CREATE TABLE metrics (finished_at TEXT, total_search_terms_analyzed REAL, ...);
//! ```
//!
//! Dates are read from the first ten characters (`YYYY-MM-DD`) of the date
//! column, so plain dates and ISO timestamps both work. Rows are read in raw
//! timestamp order; when one day holds several runs the last one wins.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OpenFlags};
use tracing::{debug, info};

use super::{
    normalize_observations, quote_identifier, MetricSource, ReportSink, SinkError, SourceError,
};
use crate::models::MetricObservation;
use crate::validation::{ReportRecord, REPORT_COLUMNS};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Shape of the origin table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginLayout {
    /// Columns `metric_name`, `date`, `value`
    Long,
    /// A date column plus one numeric column per metric
    Wide { date_column: String },
}

impl Default for OriginLayout {
    fn default() -> Self {
        OriginLayout::Long
    }
}

pub struct SqliteWarehouse {
    conn: Arc<Mutex<Connection>>,
    layout: OriginLayout,
}

impl SqliteWarehouse {
    /// Open an existing warehouse database. A missing file is a connection failure.
    pub fn open<P: AsRef<Path>>(path: P, layout: OriginLayout) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags).map_err(|e| {
            SourceError::Connection(format!("failed to open {}: {}", path.display(), e))
        })?;

        info!("Opened warehouse at {}", path.display());
        Ok(Self::from_connection(conn, layout))
    }

    /// Create an in-memory warehouse (for testing).
    pub fn in_memory(layout: OriginLayout) -> Result<Self, SourceError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| SourceError::Connection(e.to_string()))?;
        Ok(Self::from_connection(conn, layout))
    }

    pub fn from_connection(conn: Connection, layout: OriginLayout) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            layout,
        }
    }

    pub fn layout(&self) -> &OriginLayout {
        &self.layout
    }

    /// Run raw SQL against the warehouse (fixtures and maintenance).
    pub fn execute_batch(&self, sql: &str) -> rusqlite::Result<()> {
        self.conn.lock().execute_batch(sql)
    }

    fn read_long(
        &self,
        origin: &str,
        metrics: &BTreeSet<String>,
        start: &str,
        end: &str,
    ) -> Result<Vec<MetricObservation>, SourceError> {
        let placeholders: Vec<String> = (0..metrics.len()).map(|i| format!("?{}", i + 3)).collect();
        let sql = format!(
            "SELECT metric_name, substr(date, 1, 10) AS day, value FROM {} \
             WHERE substr(date, 1, 10) BETWEEN ?1 AND ?2 \
               AND value IS NOT NULL \
               AND metric_name IN ({}) \
             ORDER BY metric_name, day, date",
            quote_identifier(origin),
            placeholders.join(", ")
        );

        let mut bind: Vec<&str> = vec![start, end];
        bind.extend(metrics.iter().map(|m| m.as_str()));

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| SourceError::Query(format!("{}: {}", origin, e)))?;

        let raw = stmt
            .query_map(params_from_iter(bind.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })
            .map_err(|e| SourceError::Query(format!("{}: {}", origin, e)))?;

        let mut observations = Vec::new();
        for item in raw {
            let (metric_name, day, value) =
                item.map_err(|e| SourceError::Malformed(format!("{}: {}", origin, e)))?;
            observations.push(MetricObservation {
                metric_name,
                date: parse_day(&day)?,
                value,
            });
        }

        Ok(observations)
    }

    fn read_wide(
        &self,
        origin: &str,
        date_column: &str,
        metrics: &BTreeSet<String>,
        start: &str,
        end: &str,
    ) -> Result<Vec<MetricObservation>, SourceError> {
        let columns: Vec<&String> = metrics.iter().collect();
        let date_expr = format!("substr({}, 1, 10)", quote_identifier(date_column));
        let sql = format!(
            "SELECT {date_expr} AS day, {} FROM {} \
             WHERE {date_expr} BETWEEN ?1 AND ?2 \
             ORDER BY {}",
            columns
                .iter()
                .map(|c| quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", "),
            quote_identifier(origin),
            quote_identifier(date_column),
        );

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| SourceError::Query(format!("{}: {}", origin, e)))?;

        let mut rows = stmt
            .query(params![start, end])
            .map_err(|e| SourceError::Query(format!("{}: {}", origin, e)))?;

        let mut observations = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| SourceError::Query(format!("{}: {}", origin, e)))?
        {
            let day: String = row
                .get(0)
                .map_err(|e| SourceError::Malformed(format!("{}: {}", origin, e)))?;
            let date = parse_day(&day)?;

            for (i, metric) in columns.iter().enumerate() {
                let value: Option<f64> = row
                    .get(i + 1)
                    .map_err(|e| SourceError::Malformed(format!("{}.{}: {}", origin, metric, e)))?;
                if let Some(value) = value {
                    observations.push(MetricObservation::new(metric.as_str(), date, value));
                }
            }
        }

        Ok(observations)
    }

    /// Read back every record appended to `destination`, oldest first.
    pub fn read_report(&self, destination: &str) -> Result<Vec<ReportRecord>, SinkError> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            REPORT_COLUMNS.join(", "),
            quote_identifier(destination)
        );

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&sql)
            .map_err(|e| SinkError::Connection(format!("{}: {}", destination, e)))?;

        let records = stmt
            .query_map([], |row| {
                Ok(ReportRecord {
                    run_id: row.get(0)?,
                    evaluation_date: row.get(1)?,
                    metric_name: row.get(2)?,
                    outcome: row.get(3)?,
                    passed: row.get(4)?,
                    current_value: row.get(5)?,
                    baseline_mean: row.get(6)?,
                    baseline_std_dev: row.get(7)?,
                    deviation: row.get(8)?,
                    tolerance_kind: row.get(9)?,
                    tolerance_threshold: row.get(10)?,
                    sample_count: row.get(11)?,
                    window_start: row.get(12)?,
                    window_end: row.get(13)?,
                    recorded_at: row.get(14)?,
                })
            })
            .and_then(|mapped| mapped.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| SinkError::Connection(format!("{}: {}", destination, e)))?;

        Ok(records)
    }

    fn ensure_report_table(conn: &Connection, destination: &str) -> rusqlite::Result<()> {
        conn.execute_batch(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                run_id TEXT NOT NULL,
                evaluation_date TEXT NOT NULL,
                metric_name TEXT NOT NULL,
                outcome TEXT NOT NULL,
                passed INTEGER NOT NULL,
                current_value REAL,
                baseline_mean REAL,
                baseline_std_dev REAL,
                deviation REAL,
                tolerance_kind TEXT NOT NULL,
                tolerance_threshold REAL NOT NULL,
                sample_count INTEGER NOT NULL,
                window_start TEXT NOT NULL,
                window_end TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS {index}
                ON {table}(evaluation_date DESC, metric_name);
            "#,
            table = quote_identifier(destination),
            index = quote_identifier(&format!("idx_{}_evaluation", destination)),
        ))
    }
}

impl MetricSource for SqliteWarehouse {
    fn read_observations(
        &self,
        origin: &str,
        metrics: &BTreeSet<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<MetricObservation>, SourceError> {
        if metrics.is_empty() || start_date > end_date {
            return Ok(Vec::new());
        }

        let start = start_date.format(DATE_FORMAT).to_string();
        let end = end_date.format(DATE_FORMAT).to_string();

        let raw = match &self.layout {
            OriginLayout::Long => self.read_long(origin, metrics, &start, &end)?,
            OriginLayout::Wide { date_column } => {
                self.read_wide(origin, date_column, metrics, &start, &end)?
            }
        };

        debug!(
            origin = origin,
            rows = raw.len(),
            start = %start,
            end = %end,
            "read origin observations"
        );

        Ok(normalize_observations(raw))
    }
}

impl ReportSink for SqliteWarehouse {
    fn append_report(&self, destination: &str, records: &[ReportRecord]) -> Result<usize, SinkError> {
        let mut conn = self.conn.lock();

        Self::ensure_report_table(&conn, destination)
            .map_err(|e| SinkError::Connection(format!("{}: {}", destination, e)))?;

        // Single transaction: either every row lands or none do
        let tx = conn
            .transaction()
            .map_err(|e| SinkError::Append(e.to_string()))?;
        {
            let placeholders: Vec<String> =
                (1..=REPORT_COLUMNS.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                quote_identifier(destination),
                REPORT_COLUMNS.join(", "),
                placeholders.join(", ")
            );
            let mut stmt = tx
                .prepare_cached(&sql)
                .map_err(|e| SinkError::Append(e.to_string()))?;

            for record in records {
                stmt.execute(params![
                    &record.run_id,
                    &record.evaluation_date,
                    &record.metric_name,
                    &record.outcome,
                    record.passed,
                    record.current_value,
                    record.baseline_mean,
                    record.baseline_std_dev,
                    record.deviation,
                    &record.tolerance_kind,
                    record.tolerance_threshold,
                    record.sample_count,
                    &record.window_start,
                    &record.window_end,
                    &record.recorded_at,
                ])
                .map_err(|e| {
                    SinkError::Append(format!("{} ({}): {}", destination, record.metric_name, e))
                })?;
            }
        }
        tx.commit().map_err(|e| SinkError::Append(e.to_string()))?;

        info!("Appended {} report rows to {}", records.len(), destination);
        Ok(records.len())
    }
}

fn parse_day(raw: &str) -> Result<NaiveDate, SourceError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| SourceError::Malformed(format!("bad date '{}': {}", raw, e)))
}
