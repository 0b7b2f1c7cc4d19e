//! Event recording for market sessions.
//!
//! A `tracing` subscriber turns every event into one row of a table named by
//! the event's target. Columns appear the first time a field is seen and are
//! padded with defaults so that all columns of a table stay the same length.
//!
//! ```ignore
//! // in the market:
//! tracing::info!(target: "clearing", step, quantity, price);
//!
//! // in a test:
//! let mut rec = instrument::SessionRecorder::new("data", "pac_day");
//! // ... run a session ...
//! let clearing = &rec.get()["clearing"];
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Record};
use tracing::{Event, Id, Level, Metadata, Subscriber};

// === COLUMNS ===

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    U64(Vec<u64>),
    I64(Vec<i64>),
    F64(Vec<f64>),
    Bool(Vec<bool>),
    Str(Vec<String>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            Self::U64(v) => v.len(),
            Self::I64(v) => v.len(),
            Self::F64(v) => v.len(),
            Self::Bool(v) => v.len(),
            Self::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pad_to(&mut self, rows: usize) {
        let missing = rows.saturating_sub(self.len());
        if missing == 0 {
            return;
        }
        match self {
            Self::U64(v) => v.extend(std::iter::repeat_n(0, missing)),
            Self::I64(v) => v.extend(std::iter::repeat_n(0, missing)),
            Self::F64(v) => v.extend(std::iter::repeat_n(0.0, missing)),
            Self::Bool(v) => v.extend(std::iter::repeat_n(false, missing)),
            Self::Str(v) => v.extend(std::iter::repeat_n(String::new(), missing)),
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            Self::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<&[u64]> {
        match self {
            Self::U64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&[String]> {
        match self {
            Self::Str(v) => Some(v),
            _ => None,
        }
    }
}

// === TABLES ===

/// Rows of one event target, stored column by column.
#[derive(Debug, Clone, Default)]
pub struct DynamicTable {
    pub columns: HashMap<String, ColumnData>,
    pub row_count: usize,
}

impl DynamicTable {
    fn align(&mut self) {
        let rows = self.row_count;
        for column in self.columns.values_mut() {
            column.pad_to(rows);
        }
    }

    /// Column for `field` in the row being written, created pre-padded if new.
    fn column(&mut self, field: &str, empty: fn(usize) -> ColumnData) -> &mut ColumnData {
        let rows = self.row_count;
        self.columns
            .entry(field.to_string())
            .or_insert_with(|| empty(rows))
    }

    pub fn f64s(&self, field: &str) -> Option<&[f64]> {
        self.columns.get(field).and_then(ColumnData::as_f64)
    }

    pub fn u64s(&self, field: &str) -> Option<&[u64]> {
        self.columns.get(field).and_then(ColumnData::as_u64)
    }

    pub fn strs(&self, field: &str) -> Option<&[String]> {
        self.columns.get(field).and_then(ColumnData::as_str)
    }
}

/// Tables keyed by event target (`submissions`, `clearing`, `trade`, ...).
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    pub tables: HashMap<String, DynamicTable>,
}

impl Recorder {
    pub fn table(&self, target: &str) -> Option<&DynamicTable> {
        self.tables.get(target)
    }

    pub fn rows(&self, target: &str) -> usize {
        self.table(target).map_or(0, |t| t.row_count)
    }
}

thread_local! {
    static RECORDER: RefCell<Recorder> = RefCell::default();
}

// === SUBSCRIBER ===

struct RowVisitor<'a> {
    table: &'a mut DynamicTable,
}

impl RowVisitor<'_> {
    /// Append `value`; a column already holding another type keeps its padding.
    fn push<T>(
        &mut self,
        field: &Field,
        value: T,
        empty: fn(usize) -> ColumnData,
        slot: fn(&mut ColumnData) -> Option<&mut Vec<T>>,
    ) {
        if let Some(values) = slot(self.table.column(field.name(), empty)) {
            values.push(value);
        }
    }
}

impl Visit for RowVisitor<'_> {
    fn record_u64(&mut self, field: &Field, value: u64) {
        self.push(
            field,
            value,
            |n| ColumnData::U64(vec![0; n]),
            |c| match c {
                ColumnData::U64(v) => Some(v),
                _ => None,
            },
        );
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.push(
            field,
            value,
            |n| ColumnData::I64(vec![0; n]),
            |c| match c {
                ColumnData::I64(v) => Some(v),
                _ => None,
            },
        );
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.push(
            field,
            value,
            |n| ColumnData::F64(vec![0.0; n]),
            |c| match c {
                ColumnData::F64(v) => Some(v),
                _ => None,
            },
        );
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.push(
            field,
            value,
            |n| ColumnData::Bool(vec![false; n]),
            |c| match c {
                ColumnData::Bool(v) => Some(v),
                _ => None,
            },
        );
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.push(
            field,
            value.to_string(),
            |n| ColumnData::Str(vec![String::new(); n]),
            |c| match c {
                ColumnData::Str(v) => Some(v),
                _ => None,
            },
        );
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.record_str(field, &format!("{value:?}"));
    }
}

/// Collects INFO and WARN events into the thread-local [`Recorder`].
pub struct MarketSubscriber;

impl Subscriber for MarketSubscriber {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.is_event() && *metadata.level() <= Level::INFO
    }

    fn new_span(&self, _span: &Attributes<'_>) -> Id {
        Id::from_u64(1)
    }

    fn record(&self, _span: &Id, _values: &Record<'_>) {}

    fn record_follows_from(&self, _span: &Id, _follows: &Id) {}

    fn event(&self, event: &Event<'_>) {
        let target = event.metadata().target();
        RECORDER.with(|r| {
            let mut recorder = r.borrow_mut();
            let table = recorder.tables.entry(target.to_string()).or_default();
            table.align();
            event.record(&mut RowVisitor { table: &mut *table });
            table.row_count += 1;
            table.align();
        });
    }

    fn enter(&self, _span: &Id) {}

    fn exit(&self, _span: &Id) {}
}

/// Install [`MarketSubscriber`] as the global default. Later calls are ignored.
pub fn install_subscriber() {
    let _ = tracing::subscriber::set_global_default(MarketSubscriber);
}

/// Take everything recorded on this thread.
pub fn drain() -> Recorder {
    RECORDER.with(|r| std::mem::take(&mut *r.borrow_mut()))
}

pub fn clear() {
    RECORDER.with(|r| *r.borrow_mut() = Recorder::default());
}

// === POLARS EXPORT ===

use polars::prelude::*;

impl DynamicTable {
    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let mut names: Vec<&String> = self.columns.keys().collect();
        names.sort();

        let columns = names
            .into_iter()
            .map(|name| match &self.columns[name] {
                ColumnData::U64(v) => Column::new(name.into(), v),
                ColumnData::I64(v) => Column::new(name.into(), v),
                ColumnData::F64(v) => Column::new(name.into(), v),
                ColumnData::Bool(v) => Column::new(name.into(), v),
                ColumnData::Str(v) => Column::new(name.into(), v),
            })
            .collect();
        DataFrame::new(columns)
    }
}

impl Recorder {
    /// One DataFrame per table; tables that fail to convert are skipped.
    pub fn to_dataframes(&self) -> HashMap<String, DataFrame> {
        self.tables
            .iter()
            .filter_map(|(name, table)| Some((name.clone(), table.to_dataframe().ok()?)))
            .collect()
    }
}

pub fn drain_to_dataframes() -> HashMap<String, DataFrame> {
    drain().to_dataframes()
}

fn io_error(err: std::io::Error) -> PolarsError {
    PolarsError::IO {
        error: err.into(),
        msg: None,
    }
}

/// Write every DataFrame to `{dir}/{table}.parquet`.
pub fn save_parquet(dfs: &mut HashMap<String, DataFrame>, dir: &Path) -> PolarsResult<()> {
    std::fs::create_dir_all(dir).map_err(io_error)?;
    for (name, df) in dfs.iter_mut() {
        let file = std::fs::File::create(dir.join(format!("{name}.parquet"))).map_err(io_error)?;
        ParquetWriter::new(file).finish(df)?;
    }
    Ok(())
}

// === SESSION RECORDER ===

fn run_dir_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(60)
        .collect();
    if cleaned.is_empty() {
        "session".to_string()
    } else {
        cleaned
    }
}

/// Records one market session and exports it when dropped.
///
/// Creation clears this thread's recorder and installs the subscriber. On drop
/// every table is written to `{parent}/{run}/{table}.parquet`.
pub struct SessionRecorder {
    run_dir: PathBuf,
    dfs: Option<HashMap<String, DataFrame>>,
}

impl SessionRecorder {
    pub fn new(parent: impl Into<PathBuf>, run: &str) -> Self {
        clear();
        install_subscriber();
        Self {
            run_dir: parent.into().join(run_dir_name(run)),
            dfs: None,
        }
    }

    /// DataFrames recorded so far. The first call drains the thread's recorder.
    pub fn get(&mut self) -> &HashMap<String, DataFrame> {
        self.dfs.get_or_insert_with(drain_to_dataframes)
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }
}

impl Drop for SessionRecorder {
    fn drop(&mut self) {
        let mut dfs = self.dfs.take().unwrap_or_else(drain_to_dataframes);
        if dfs.is_empty() {
            return;
        }
        match save_parquet(&mut dfs, &self.run_dir) {
            Ok(()) => eprintln!(
                "SessionRecorder: wrote {} tables to {}",
                dfs.len(),
                self.run_dir.display()
            ),
            Err(e) => eprintln!(
                "SessionRecorder: failed to write {}: {e}",
                self.run_dir.display()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::subscriber::with_default;

    #[test]
    fn events_become_aligned_rows() {
        clear();
        with_default(MarketSubscriber, || {
            tracing::info!(target: "clearing", step = 0u64, quantity = 15.0, rule = "pac");
            tracing::info!(target: "clearing", step = 1u64, quantity = 4.0);
            tracing::warn!(target: "no_trade", step = 2u64, reason = "no_bids");
            tracing::debug!(target: "clearing", step = 3u64);
        });

        let recorder = drain();
        assert_eq!(recorder.rows("clearing"), 2);
        assert_eq!(recorder.rows("no_trade"), 1);

        let clearing = recorder.table("clearing").unwrap();
        assert_eq!(clearing.u64s("step"), Some(&[0, 1][..]));
        assert_eq!(clearing.f64s("quantity"), Some(&[15.0, 4.0][..]));
        let rules = clearing.strs("rule").unwrap();
        assert_eq!(rules, &["pac".to_string(), String::new()]);
    }

    #[test]
    fn late_columns_are_front_padded() {
        clear();
        with_default(MarketSubscriber, || {
            tracing::info!(target: "trade", step = 0u64);
            tracing::info!(target: "trade", step = 1u64, residual = 0.5);
        });

        let recorder = drain();
        let trade = recorder.table("trade").unwrap();
        assert_eq!(trade.f64s("residual"), Some(&[0.0, 0.5][..]));
        assert!(trade.columns.values().all(|c| c.len() == 2));
    }

    #[test]
    fn tables_convert_to_dataframes() {
        clear();
        with_default(MarketSubscriber, || {
            tracing::info!(target: "submissions", step = 0u64, demand = 15.0, supply = 18.0);
        });

        let dfs = drain_to_dataframes();
        let df = &dfs["submissions"];
        assert_eq!(df.height(), 1);
        assert_eq!(df.width(), 3);
    }

    #[test]
    fn run_names_are_path_safe() {
        assert_eq!(run_dir_name("pac day/1"), "pac_day_1");
        assert_eq!(run_dir_name(""), "session");
    }
}
