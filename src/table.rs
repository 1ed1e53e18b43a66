//! Row/column tables and the one primitive every evidence kind shares:
//! applying a [`QuestionIntent`] to a table.

use std::io::Cursor;
use std::sync::LazyLock;

use calamine::{Data, Reader};
use regex::Regex;
use tracing::debug;

use crate::error::ComputeError;
use crate::eyes::re;
use crate::types::{Action, Answer, QuestionIntent};

/// Columns tried, in order, when the requested column is not in the table.
const COLUMN_CANDIDATES: [&str; 5] = ["value", "amount", "price", "score", "count"];

/// Columns tried by the last-chance `sum` fallback.
const SUM_FALLBACK_CANDIDATES: [&str; 4] = ["value", "amount", "price", "score"];

const SNIFF_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];
const SNIFF_LINES: usize = 10;

static TEXT_CELL_SPLIT: LazyLock<Regex> = LazyLock::new(|| re(r"\t+|\s{2,}"));

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Number(f64),
    Text(String),
    Empty,
}

impl Cell {
    pub fn parse(raw: &str) -> Self {
        let s = raw.trim();
        if s.is_empty() {
            return Cell::Empty;
        }
        match s.parse::<f64>() {
            Ok(n) if n.is_finite() => Cell::Number(n),
            _ => Cell::Text(s.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Cell::Number(n) => n.to_string(),
            Cell::Text(s) => s.clone(),
            Cell::Empty => String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Build from a header row and string records. Short rows are padded with
    /// empty cells; long rows are cut to the header width.
    pub fn from_records(header: Vec<String>, records: Vec<Vec<String>>) -> Self {
        let width = header.len();
        let columns = header
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let name = name.trim().to_string();
                if name.is_empty() {
                    format!("Unnamed: {i}")
                } else {
                    name
                }
            })
            .collect();
        let rows = records
            .into_iter()
            .map(|record| {
                let mut row: Vec<Cell> = record.iter().take(width).map(|s| Cell::parse(s)).collect();
                row.resize(width, Cell::Empty);
                row
            })
            .collect();
        Self { columns, rows }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Case-insensitive column lookup.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let wanted = name.trim().to_lowercase();
        self.columns.iter().position(|c| c.trim().to_lowercase() == wanted)
    }

    /// Numeric cells of a column; anything that is not a number is dropped.
    pub fn numeric_values(&self, idx: usize) -> Vec<f64> {
        self.rows
            .iter()
            .filter_map(|row| row.get(idx).and_then(Cell::as_number))
            .collect()
    }

    /// A column is numeric when it holds at least one number and every
    /// non-empty cell is a number.
    pub fn is_numeric_column(&self, idx: usize) -> bool {
        let mut seen_number = false;
        for row in &self.rows {
            match row.get(idx) {
                Some(Cell::Number(_)) => seen_number = true,
                Some(Cell::Text(_)) => return false,
                _ => {}
            }
        }
        seen_number
    }

    pub fn first_numeric_column(&self) -> Option<usize> {
        (0..self.columns.len()).find(|&i| self.is_numeric_column(i))
    }

    fn first_candidate(&self, candidates: &[&str]) -> Option<usize> {
        candidates.iter().find_map(|c| self.column_index(c))
    }

    fn resolve_column(&self, intent: &QuestionIntent) -> Option<usize> {
        match intent.column.as_deref() {
            Some(name) => self
                .column_index(name)
                .or_else(|| self.first_candidate(&COLUMN_CANDIDATES)),
            None => self.first_numeric_column(),
        }
    }

    fn filtered_values(&self, idx: usize, cutoff: Option<f64>) -> Vec<f64> {
        let values = self.numeric_values(idx);
        match cutoff {
            Some(c) => values.into_iter().filter(|v| *v > c).collect(),
            None => values,
        }
    }

    /// Apply an intent to this table.
    ///
    /// `count` counts rows (or rows above the cutoff when a column resolves);
    /// the aggregates reduce the resolved column after the `value > cutoff`
    /// filter. Anything unresolved ends in the row count.
    pub fn apply_intent(&self, intent: &QuestionIntent) -> Answer {
        let column = self.resolve_column(intent);
        debug!(
            column = column.map(|i| self.columns[i].as_str()),
            rows = self.rows.len(),
            "resolved table column"
        );

        if intent.action == Action::Count {
            if let (Some(cutoff), Some(idx)) = (intent.cutoff, column) {
                let above = self.numeric_values(idx).into_iter().filter(|v| *v > cutoff).count();
                return Answer::Integer(above as i64);
            }
            return Answer::Integer(self.rows.len() as i64);
        }

        if let Some(idx) = column {
            if let Some(v) = reduce(intent.action, &self.filtered_values(idx, intent.cutoff)) {
                return Answer::Number(v);
            }
        }

        if intent.action == Action::Sum {
            if let Some(idx) = self.first_candidate(&SUM_FALLBACK_CANDIDATES) {
                return Answer::Number(self.filtered_values(idx, intent.cutoff).iter().sum());
            }
        }

        Answer::Integer(self.rows.len() as i64)
    }

    /// Find the first whitespace-aligned table in extracted text: a header line
    /// of two or more cells followed by at least one line of the same width.
    pub fn from_text(text: &str) -> Option<Self> {
        let lines: Vec<Vec<String>> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(split_text_cells)
            .collect();

        for (i, header) in lines.iter().enumerate() {
            if header.len() < 2 {
                continue;
            }
            let records: Vec<Vec<String>> = lines[i + 1..]
                .iter()
                .take_while(|cells| cells.len() == header.len())
                .cloned()
                .collect();
            if !records.is_empty() {
                return Some(Self::from_records(header.clone(), records));
            }
        }
        None
    }
}

fn split_text_cells(line: &str) -> Vec<String> {
    TEXT_CELL_SPLIT
        .split(line)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
        .collect()
}

fn reduce(action: Action, values: &[f64]) -> Option<f64> {
    match action {
        Action::Sum => Some(values.iter().sum()),
        Action::Mean if !values.is_empty() => Some(values.iter().sum::<f64>() / values.len() as f64),
        Action::Max => values.iter().copied().reduce(f64::max),
        Action::Min => values.iter().copied().reduce(f64::min),
        _ => None,
    }
}

/// Parse CSV bytes. A strict comma-separated read is tried first; on failure
/// the delimiter is sniffed and ragged rows are tolerated.
pub fn parse_csv(bytes: &[u8]) -> Result<Table, ComputeError> {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim_start_matches('\u{feff}');

    match read_csv(text, b',', false) {
        Ok(table) => Ok(table),
        Err(strict_err) => {
            let delimiter = sniff_delimiter(text);
            debug!(
                error = %strict_err,
                delimiter = %(delimiter as char).escape_default(),
                "strict CSV parse failed, retrying relaxed"
            );
            read_csv(text, delimiter, true)
        }
    }
}

fn read_csv(text: &str, delimiter: u8, relaxed: bool) -> Result<Table, ComputeError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(relaxed)
        .has_headers(true)
        .from_reader(text.as_bytes());

    let header: Vec<String> = reader
        .headers()
        .map_err(|e| ComputeError::Csv(e.to_string()))?
        .iter()
        .map(str::to_string)
        .collect();
    if header.is_empty() || header.iter().all(|h| h.trim().is_empty()) {
        return Err(ComputeError::EmptyTable);
    }

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ComputeError::Csv(e.to_string()))?;
        records.push(record.iter().map(str::to_string).collect());
    }
    Ok(Table::from_records(header, records))
}

/// Pick the candidate delimiter that appears the same non-zero number of
/// times on the most leading lines.
fn sniff_delimiter(text: &str) -> u8 {
    let lines: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .take(SNIFF_LINES)
        .collect();
    let Some(first) = lines.first() else {
        return b',';
    };

    let mut best = (b',', 0usize);
    for &delim in &SNIFF_DELIMITERS {
        let expected = first.bytes().filter(|b| *b == delim).count();
        if expected == 0 {
            continue;
        }
        let consistent = lines
            .iter()
            .take_while(|l| l.bytes().filter(|b| *b == delim).count() == expected)
            .count();
        if consistent > best.1 {
            best = (delim, consistent);
        }
    }
    best.0
}

/// Parse the first worksheet of an xlsx/xls workbook; row one is the header.
pub fn parse_spreadsheet(bytes: &[u8]) -> Result<Table, ComputeError> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ComputeError::Excel(e.to_string()))?;

    let range = workbook
        .worksheet_range_at(0)
        .ok_or(ComputeError::EmptyTable)?
        .map_err(|e| ComputeError::Excel(e.to_string()))?;

    let mut rows = range.rows();
    let header: Vec<String> = rows
        .next()
        .ok_or(ComputeError::EmptyTable)?
        .iter()
        .map(|d| match d {
            Data::Empty => String::new(),
            other => other.to_string(),
        })
        .collect();
    let width = header.len();

    let mut table = Table::from_records(header, Vec::new());
    for row in rows {
        let mut cells: Vec<Cell> = row.iter().take(width).map(spreadsheet_cell).collect();
        cells.resize(width, Cell::Empty);
        table.rows.push(cells);
    }
    Ok(table)
}

fn spreadsheet_cell(data: &Data) -> Cell {
    match data {
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) if f.is_finite() => Cell::Number(*f),
        Data::String(s) => Cell::parse(s),
        Data::Empty => Cell::Empty,
        other => Cell::Text(other.to_string()),
    }
}
