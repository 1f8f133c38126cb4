use csv::{ReaderBuilder, WriterBuilder};
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ScorerError, ScorerResult};
use crate::scoring::KeywordRecord;

/// Column holding the text to score
pub const KEYWORD_COLUMN: &str = "keywords";

/// Column appended to the output
pub const SCORE_COLUMN: &str = "score";

/// Default output file name
pub const OUTPUT_FILENAME: &str = "scored_keywords.csv";

/// MIME type of the output
pub const CONTENT_TYPE: &str = "text/csv";

/// An uploaded table, kept as raw strings so every column round-trips
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    keyword_column: usize,
}

impl KeywordTable {
    /// Read a CSV file and validate it
    pub fn from_path<P: AsRef<Path>>(path: P) -> ScorerResult<Self> {
        let path = path.as_ref();
        debug!("Reading keyword table: {}", path.display());
        let file = std::fs::File::open(path)?;
        let table = Self::from_reader(file)?;
        info!(
            "Loaded {} rows with {} columns from {}",
            table.len(),
            table.headers.len(),
            path.display()
        );
        Ok(table)
    }

    /// Parse CSV from any reader.
    ///
    /// Requires a header row with a `keywords` column and at least one data
    /// row. Short rows are padded with empty cells; rows wider than the
    /// header are rejected.
    pub fn from_reader<R: Read>(reader: R) -> ScorerResult<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        if headers.is_empty() || headers.iter().all(|h| h.trim().is_empty()) {
            return Err(ScorerError::EmptyTable);
        }

        let keyword_column = headers
            .iter()
            .position(|h| h.trim_start_matches('\u{feff}').trim() == KEYWORD_COLUMN)
            .ok_or_else(|| ScorerError::MissingColumn {
                column: KEYWORD_COLUMN.to_string(),
            })?;

        let mut rows = Vec::new();
        for (i, record) in reader.records().enumerate() {
            let record = record?;
            if record.len() > headers.len() {
                return Err(ScorerError::MalformedRow {
                    row: i + 1,
                    expected: headers.len(),
                    found: record.len(),
                });
            }
            let mut row: Vec<String> = record.iter().map(str::to_string).collect();
            row.resize(headers.len(), String::new());
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(ScorerError::EmptyTable);
        }

        Ok(Self {
            headers,
            rows,
            keyword_column,
        })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First `n` rows for display
    pub fn preview(&self, n: usize) -> &[Vec<String>] {
        &self.rows[..n.min(self.rows.len())]
    }

    /// Keyword cell of every row, tagged with its row position
    pub fn records(&self) -> Vec<KeywordRecord> {
        self.rows
            .iter()
            .enumerate()
            .map(|(index, row)| KeywordRecord::new(index, row[self.keyword_column].clone()))
            .collect()
    }

    /// Copy of the table with a `score` column appended
    pub fn with_scores(&self, scores: &[u8]) -> ScorerResult<Self> {
        if scores.len() != self.rows.len() {
            return Err(ScorerError::ScoreLengthMismatch {
                expected: self.rows.len(),
                actual: scores.len(),
            });
        }

        let mut headers = self.headers.clone();
        headers.push(SCORE_COLUMN.to_string());

        let rows = self
            .rows
            .iter()
            .zip(scores)
            .map(|(row, score)| {
                let mut row = row.clone();
                row.push(score.to_string());
                row
            })
            .collect();

        Ok(Self {
            headers,
            rows,
            keyword_column: self.keyword_column,
        })
    }

    /// Serialize as CSV into any writer
    pub fn write_csv<W: Write>(&self, writer: W) -> ScorerResult<()> {
        let mut writer = WriterBuilder::new().has_headers(true).from_writer(writer);

        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Serialize as a CSV string
    pub fn to_csv_string(&self) -> ScorerResult<String> {
        let mut buffer = Vec::new();
        self.write_csv(&mut buffer)?;
        String::from_utf8(buffer).map_err(|e| ScorerError::internal(format!("CSV output is not UTF-8: {}", e)))
    }

    /// Write to `path`, creating parent directories; returns the file size
    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> ScorerResult<u64> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::File::create(path)?;
        self.write_csv(std::io::BufWriter::new(file))?;

        let file_size = std::fs::metadata(path)?.len();
        info!("CSV export completed: {} rows, {} bytes to {}", self.len(), file_size, path.display());
        Ok(file_size)
    }
}
