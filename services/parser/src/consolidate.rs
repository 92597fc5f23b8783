//! Consolidation of raw disclosure extracts into quarterly expense sums.
//!
//! Each relevant file is read in fixed-size row increments, filtered to
//! event/claims categories and folded into a ledger keyed by
//! (registry id, year, quarter). The fold is a plain sum, so the result does
//! not depend on file or increment order.
//!
//! Row-level problems never abort a file: non-numeric balances count as zero,
//! negative balances are clamped to zero, undated rows are dropped. Each case
//! is counted in [`ConsolidationStats`].

use anyhow::{Context, Result};
use calamine::{open_workbook, DataRef, DataType, Reader, Xlsx};
use chrono::{Datelike, NaiveDate};
use csv::ByteRecord;
use encoding_rs::{Encoding, UTF_8};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Chain, Cursor, Read};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Config;

/// Raw column names in the regulator's accounting extracts.
pub const REGISTRY_ID_COLUMN: &str = "REG_ANS";
pub const DESCRIPTION_COLUMN: &str = "DESCRICAO";
pub const BALANCE_COLUMN: &str = "VL_SALDO_FINAL";
pub const DATE_COLUMN: &str = "DATA";

/// Category descriptions that mark event/claims expenses.
const EXPENSE_CATEGORIES: &[&str] = &["EVENTOS", "SINISTROS"];

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// One raw row, every field still text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawExpenseRow {
    pub registry_id: String,
    pub description: String,
    pub balance: String,
    pub date: String,
}

/// Summed expense for one entity in one reporting period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedExpenseRecord {
    pub registry_id: String,
    pub year: i32,
    pub quarter: u8,
    pub expense_value: f64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ConsolidationStats {
    pub files_processed: usize,
    pub files_skipped: usize,
    pub rows_scanned: u64,
    pub rows_matched: u64,
    pub balances_non_numeric: u64,
    pub balances_clamped: u64,
    pub rows_undated: u64,
    pub records: usize,
}

impl ConsolidationStats {
    fn add_rows(&mut self, other: &ConsolidationStats) {
        self.rows_scanned += other.rows_scanned;
        self.rows_matched += other.rows_matched;
        self.balances_non_numeric += other.balances_non_numeric;
        self.balances_clamped += other.balances_clamped;
        self.rows_undated += other.rows_undated;
    }
}

// =============================================================================
// Field normalisation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceOutcome {
    Valid,
    NonNumeric,
    Clamped,
}

/// Parse a decimal-comma balance. Anything unparseable becomes 0, anything
/// negative becomes 0; the result is never negative.
pub fn normalize_balance(raw: &str) -> (f64, BalanceOutcome) {
    let cleaned = raw.trim().replace(',', ".");
    match cleaned.parse::<f64>() {
        Ok(v) if !v.is_finite() => (0.0, BalanceOutcome::NonNumeric),
        Ok(v) if v < 0.0 => (0.0, BalanceOutcome::Clamped),
        Ok(v) if v == 0.0 => (0.0, BalanceOutcome::Valid),
        Ok(v) => (v, BalanceOutcome::Valid),
        Err(_) => (0.0, BalanceOutcome::NonNumeric),
    }
}

pub fn quarter_of_month(month: u32) -> u8 {
    ((month - 1) / 3 + 1) as u8
}

/// (year, quarter) of a row date, or `None` when the date is unparseable.
///
/// Accepts `YYYY-MM-DD` (optionally followed by a time) and `DD/MM/YYYY`.
pub fn derive_period(raw: &str) -> Option<(i32, u8)> {
    let raw = raw.trim();
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%d/%m/%Y"))
        .ok()
        .or_else(|| {
            raw.get(..10)
                .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
        })?;
    Some((date.year(), quarter_of_month(date.month())))
}

pub fn is_expense_category(description: &str) -> bool {
    let upper = description.to_uppercase();
    EXPENSE_CATEGORIES.iter().any(|c| upper.contains(c))
}

// =============================================================================
// Ledger
// =============================================================================

/// Running (registry id, year, quarter) -> sum.
#[derive(Debug, Default)]
pub struct ExpenseLedger {
    sums: BTreeMap<(String, i32, u8), f64>,
}

impl ExpenseLedger {
    /// Fold one increment of raw rows into the ledger.
    pub fn absorb(&mut self, chunk: &[RawExpenseRow], stats: &mut ConsolidationStats) {
        for row in chunk {
            stats.rows_scanned += 1;
            if !is_expense_category(&row.description) {
                continue;
            }
            stats.rows_matched += 1;

            let (value, outcome) = normalize_balance(&row.balance);
            match outcome {
                BalanceOutcome::Valid => {}
                BalanceOutcome::NonNumeric => stats.balances_non_numeric += 1,
                BalanceOutcome::Clamped => stats.balances_clamped += 1,
            }

            let Some((year, quarter)) = derive_period(&row.date) else {
                stats.rows_undated += 1;
                continue;
            };

            *self
                .sums
                .entry((row.registry_id.clone(), year, quarter))
                .or_insert(0.0) += value;
        }
    }

    pub fn merge(&mut self, other: ExpenseLedger) {
        for (key, value) in other.sums {
            *self.sums.entry(key).or_insert(0.0) += value;
        }
    }

    pub fn len(&self) -> usize {
        self.sums.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sums.is_empty()
    }

    /// Records sorted by (registry id, year, quarter).
    pub fn into_records(self) -> Vec<ConsolidatedExpenseRecord> {
        self.sums
            .into_iter()
            .map(|((registry_id, year, quarter), expense_value)| ConsolidatedExpenseRecord {
                registry_id,
                year,
                quarter,
                expense_value,
            })
            .collect()
    }
}

// =============================================================================
// Readers
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    registry_id: usize,
    description: usize,
    balance: usize,
    date: usize,
}

/// Index of a header, ignoring surrounding whitespace and case.
fn find_column(headers: &[String], name: &str) -> Option<usize> {
    headers
        .iter()
        .position(|h| h.trim().eq_ignore_ascii_case(name))
}

impl ColumnMap {
    fn from_headers(headers: &[String]) -> Result<Self> {
        let find = |name: &str| {
            find_column(headers, name)
                .with_context(|| format!("Missing column '{}'. Headers: {:?}", name, headers))
        };
        Ok(Self {
            registry_id: find(REGISTRY_ID_COLUMN)?,
            description: find(DESCRIPTION_COLUMN)?,
            balance: find(BALANCE_COLUMN)?,
            date: find(DATE_COLUMN)?,
        })
    }

    fn row<F: Fn(usize) -> String>(&self, field: F) -> RawExpenseRow {
        RawExpenseRow {
            registry_id: field(self.registry_id).trim().to_string(),
            description: field(self.description),
            balance: field(self.balance),
            date: field(self.date).trim().to_string(),
        }
    }
}

/// Split off a leading UTF-8 byte order mark. Returns whether one was found
/// and the source with any non-BOM prefix bytes restored.
fn sniff_bom<R: Read>(mut source: R) -> Result<(bool, Chain<Cursor<Vec<u8>>, R>)> {
    let mut head = Vec::with_capacity(UTF8_BOM.len());
    (&mut source)
        .take(UTF8_BOM.len() as u64)
        .read_to_end(&mut head)
        .context("Failed to read file head")?;
    let has_bom = head == UTF8_BOM;
    if has_bom {
        head.clear();
    }
    Ok((has_bom, Cursor::new(head).chain(source)))
}

/// Streams a delimited file as increments of at most `chunk_rows` rows.
pub struct DelimitedChunks<R: Read> {
    reader: csv::Reader<Chain<Cursor<Vec<u8>>, R>>,
    columns: ColumnMap,
    encoding: &'static Encoding,
    chunk_rows: usize,
    record: ByteRecord,
    done: bool,
}

impl<R: Read> DelimitedChunks<R> {
    /// A UTF-8 byte order mark overrides the declared encoding.
    pub fn new(
        source: R,
        encoding: &'static Encoding,
        delimiter: u8,
        chunk_rows: usize,
    ) -> Result<Self> {
        let (has_bom, source) = sniff_bom(source)?;
        let encoding = if has_bom { UTF_8 } else { encoding };

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(source);

        let headers: Vec<String> = reader
            .byte_headers()
            .context("Failed to read header row")?
            .iter()
            .map(|field| {
                encoding
                    .decode_without_bom_handling(field)
                    .0
                    .trim()
                    .to_string()
            })
            .collect();
        let columns = ColumnMap::from_headers(&headers)?;

        Ok(Self {
            reader,
            columns,
            encoding,
            chunk_rows: chunk_rows.max(1),
            record: ByteRecord::new(),
            done: false,
        })
    }
}

impl<R: Read> Iterator for DelimitedChunks<R> {
    type Item = Result<Vec<RawExpenseRow>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut chunk = Vec::with_capacity(self.chunk_rows.min(8192));
        while chunk.len() < self.chunk_rows {
            match self.reader.read_byte_record(&mut self.record) {
                Ok(true) => {
                    let record = &self.record;
                    let encoding = self.encoding;
                    chunk.push(self.columns.row(|idx| {
                        record
                            .get(idx)
                            .map(|b| encoding.decode_without_bom_handling(b).0.into_owned())
                            .unwrap_or_default()
                    }));
                }
                Ok(false) => {
                    self.done = true;
                    break;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(anyhow::Error::new(e).context("Failed to read CSV record")));
                }
            }
        }

        if chunk.is_empty() {
            None
        } else {
            Some(Ok(chunk))
        }
    }
}

fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("xlsx"))
        .unwrap_or(false)
}

fn cell_text(cell: &DataRef<'_>) -> String {
    match cell {
        DataRef::String(s) => s.clone(),
        DataRef::SharedString(s) => s.to_string(),
        DataRef::Empty => String::new(),
        _ if cell.is_datetime() || cell.is_datetime_iso() => cell
            .as_date()
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        _ => cell.as_string().unwrap_or_default(),
    }
}

/// Groups a row-major cell stream into rows. Cells the sheet omits are empty.
#[derive(Debug, Default)]
struct RowAssembler {
    current: Option<u32>,
    cells: Vec<String>,
}

impl RowAssembler {
    /// Returns the previous row once a cell from a later row arrives.
    fn push(&mut self, row: u32, col: u32, text: String) -> Option<Vec<String>> {
        let finished = match self.current {
            Some(r) if r != row => Some(std::mem::take(&mut self.cells)),
            _ => None,
        };
        self.current = Some(row);
        let col = col as usize;
        if self.cells.len() <= col {
            self.cells.resize(col + 1, String::new());
        }
        self.cells[col] = text;
        finished
    }

    fn finish(self) -> Option<Vec<String>> {
        self.current.map(|_| self.cells)
    }
}

/// First row is the header; later rows are folded into the ledger every
/// `chunk_rows` rows.
struct WorkbookSink {
    columns: Option<ColumnMap>,
    chunk: Vec<RawExpenseRow>,
    chunk_rows: usize,
}

impl WorkbookSink {
    fn new(chunk_rows: usize) -> Self {
        let chunk_rows = chunk_rows.max(1);
        Self {
            columns: None,
            chunk: Vec::with_capacity(chunk_rows.min(8192)),
            chunk_rows,
        }
    }

    fn accept(
        &mut self,
        cells: Vec<String>,
        ledger: &mut ExpenseLedger,
        stats: &mut ConsolidationStats,
    ) -> Result<()> {
        match self.columns {
            None => {
                let headers: Vec<String> = cells.iter().map(|c| c.trim().to_string()).collect();
                self.columns = Some(ColumnMap::from_headers(&headers)?);
            }
            Some(columns) => {
                self.chunk
                    .push(columns.row(|idx| cells.get(idx).cloned().unwrap_or_default()));
                if self.chunk.len() >= self.chunk_rows {
                    ledger.absorb(&self.chunk, stats);
                    self.chunk.clear();
                }
            }
        }
        Ok(())
    }

    fn finish(mut self, ledger: &mut ExpenseLedger, stats: &mut ConsolidationStats) -> Result<()> {
        if self.columns.is_none() {
            anyhow::bail!("Sheet has no header row");
        }
        if !self.chunk.is_empty() {
            ledger.absorb(&self.chunk, stats);
            self.chunk.clear();
        }
        Ok(())
    }
}

/// Stream the first sheet of a workbook cell by cell, so at most one
/// increment of rows is held at a time.
fn consolidate_workbook(
    path: &Path,
    chunk_rows: usize,
    ledger: &mut ExpenseLedger,
    stats: &mut ConsolidationStats,
) -> Result<()> {
    let mut workbook: Xlsx<_> = open_workbook(path).context("Failed to open workbook")?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .context("Workbook has no sheets")?;
    let mut cells = workbook
        .worksheet_cells_reader(&sheet_name)
        .with_context(|| format!("Failed to read sheet '{}'", sheet_name))?;

    let mut assembler = RowAssembler::default();
    let mut sink = WorkbookSink::new(chunk_rows);
    while let Some(cell) = cells
        .next_cell()
        .with_context(|| format!("Failed to read a cell of sheet '{}'", sheet_name))?
    {
        let (row, col) = cell.get_position();
        if let Some(done) = assembler.push(row, col, cell_text(cell.get_value())) {
            sink.accept(done, ledger, stats)?;
        }
    }
    if let Some(last) = assembler.finish() {
        sink.accept(last, ledger, stats)?;
    }
    sink.finish(ledger, stats)
}

// =============================================================================
// Driver
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub processed: bool,
    pub rows_scanned: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Consolidate a single file into its own ledger.
pub fn consolidate_file(path: &Path, config: &Config) -> Result<(ExpenseLedger, ConsolidationStats)> {
    let mut ledger = ExpenseLedger::default();
    let mut stats = ConsolidationStats::default();

    if is_workbook(path) {
        consolidate_workbook(path, config.chunk_rows, &mut ledger, &mut stats)?;
    } else {
        let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let chunks =
            DelimitedChunks::new(file, config.source_encoding, config.delimiter, config.chunk_rows)?;
        for chunk in chunks {
            ledger.absorb(&chunk?, &mut stats);
        }
    }

    Ok((ledger, stats))
}

/// Consolidate every relevant file. A file that cannot be read (missing
/// columns, I/O error) is skipped as a whole and reported.
pub fn consolidate(
    paths: &[PathBuf],
    config: &Config,
) -> (Vec<ConsolidatedExpenseRecord>, ConsolidationStats, Vec<FileOutcome>) {
    let mut ledger = ExpenseLedger::default();
    let mut stats = ConsolidationStats::default();
    let mut outcomes = Vec::with_capacity(paths.len());

    for path in paths {
        info!(file = %path.display(), "consolidating");
        match consolidate_file(path, config) {
            Ok((file_ledger, file_stats)) => {
                info!(
                    file = %path.display(),
                    rows = file_stats.rows_scanned,
                    matched = file_stats.rows_matched,
                    "file consolidated"
                );
                ledger.merge(file_ledger);
                stats.add_rows(&file_stats);
                stats.files_processed += 1;
                outcomes.push(FileOutcome {
                    path: path.clone(),
                    processed: true,
                    rows_scanned: file_stats.rows_scanned,
                    error: None,
                });
            }
            Err(e) => {
                let error = format!("{:#}", e);
                warn!(file = %path.display(), error = %error, "file skipped");
                stats.files_skipped += 1;
                outcomes.push(FileOutcome {
                    path: path.clone(),
                    processed: false,
                    rows_scanned: 0,
                    error: Some(error),
                });
            }
        }
    }

    if ledger.is_empty() {
        warn!(files = paths.len(), "no expense rows survived consolidation");
    }
    stats.records = ledger.len();
    (ledger.into_records(), stats, outcomes)
}
