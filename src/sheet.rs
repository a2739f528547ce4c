use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::info;

pub const ADS_SHEET: &str = "Ads";
pub const GUIDELINES_SHEET: &str = "Guidelines";
pub const IMAGE_GUIDELINES_SHEET: &str = "Image Guidelines";
pub const VALIDATION_SHEET: &str = "Validation";
pub const IMAGE_VALIDATION_SHEET: &str = "Image Validation";

pub const HEADER_ROWS: usize = 1;

/// Sheets every store starts with, with their header row.
pub const DEFAULT_SHEETS: &[(&str, &[&str])] = &[
    (ADS_SHEET, &["Ad IDs", "Ad Text"]),
    (GUIDELINES_SHEET, &["Guideline ID", "Guideline"]),
    (IMAGE_GUIDELINES_SHEET, &["Guideline ID", "Guideline"]),
    (
        VALIDATION_SHEET,
        &["Ad IDs", "Ad Text", "Guideline ID", "Is Valid", "Reasoning", "Suggestion"],
    ),
    (
        IMAGE_VALIDATION_SHEET,
        &["Image URL", "Preview", "Guideline ID", "Is Valid", "Reasoning", "Suggestion"],
    ),
];

/// A single scalar cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
}

pub type Row = Vec<Cell>;

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Bool(true) => f.write_str("TRUE"),
            Cell::Bool(false) => f.write_str("FALSE"),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Cell::Number(n) => write!(f, "{}", n),
            Cell::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

impl From<bool> for Cell {
    fn from(b: bool) -> Self {
        Cell::Bool(b)
    }
}

impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        Cell::Number(n)
    }
}

/// A row counts as empty when all of its cells render to nothing.
pub fn is_non_empty_row(row: &[Cell]) -> bool {
    row.iter().any(|c| !c.to_string().is_empty())
}

/// Cell `index` as text, blank when the row is shorter.
pub fn cell_text(row: &[Cell], index: usize) -> String {
    row.get(index).map(ToString::to_string).unwrap_or_default()
}

/// Row-oriented sheet storage. Row numbers start at 1.
pub trait TableStore {
    /// Every stored row of a sheet, in row order.
    fn rows(&self, sheet: &str) -> Result<Vec<Row>>;

    /// Removes every row below the header block.
    fn truncate(&self, sheet: &str, header_rows: usize) -> Result<()>;

    /// Appends after the last row and returns the new row number.
    fn append_row(&self, sheet: &str, row: &[Cell]) -> Result<usize>;

    /// Replaces the body with `rows`, leaving the header block alone.
    fn write_rows(&self, sheet: &str, rows: &[Row], header_rows: usize) -> Result<()>;

    fn set_row_height(&self, sheet: &str, row_num: usize, height: u32) -> Result<()>;

    fn last_row(&self, sheet: &str) -> Result<usize>;

    /// Makes everything written so far visible to other readers.
    fn flush(&self) -> Result<()>;

    /// Non-empty rows with the first `skip_header_rows` of them dropped.
    fn read_rows(&self, sheet: &str, skip_header_rows: usize) -> Result<Vec<Row>> {
        Ok(self
            .rows(sheet)?
            .into_iter()
            .filter(|r| is_non_empty_row(r))
            .skip(skip_header_rows)
            .collect())
    }
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let store = Self { conn };
        store.init_schema()?;

        // Every sheet keeps its header row; reads skip it.
        let seeded = init_sheets(&store)?;
        if !seeded.is_empty() {
            info!(sheets = ?seeded, db = %path.display(), "Seeded sheet headers");
        }
        Ok(store)
    }

    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sheet_rows (
                sheet      TEXT NOT NULL,
                row_num    INTEGER NOT NULL,
                cells      TEXT NOT NULL,
                height     INTEGER,
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (sheet, row_num)
            );
            ",
        )?;
        Ok(())
    }

    /// Sheet names with their row counts.
    pub fn sheets(&self) -> Result<Vec<(String, usize)>> {
        let mut stmt = self.conn.prepare(
            "SELECT sheet, COUNT(*) FROM sheet_rows GROUP BY sheet ORDER BY sheet",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get::<_, i64>(1)? as usize)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    #[cfg(test)]
    pub fn row_height(&self, sheet: &str, row_num: usize) -> Result<Option<u32>> {
        use rusqlite::OptionalExtension;

        let height = self
            .conn
            .query_row(
                "SELECT height FROM sheet_rows WHERE sheet = ?1 AND row_num = ?2",
                rusqlite::params![sheet, row_num as i64],
                |row| row.get::<_, Option<u32>>(0),
            )
            .optional()?;
        Ok(height.flatten())
    }
}

fn encode(row: &[Cell]) -> Result<String> {
    Ok(serde_json::to_string(row)?)
}

impl TableStore for SqliteStore {
    fn rows(&self, sheet: &str) -> Result<Vec<Row>> {
        let mut stmt = self
            .conn
            .prepare("SELECT cells FROM sheet_rows WHERE sheet = ?1 ORDER BY row_num")?;
        let raw = stmt
            .query_map([sheet], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        raw.iter()
            .map(|cells| {
                serde_json::from_str(cells)
                    .with_context(|| format!("Corrupt row in sheet '{}': {}", sheet, cells))
            })
            .collect()
    }

    fn truncate(&self, sheet: &str, header_rows: usize) -> Result<()> {
        self.conn.execute(
            "DELETE FROM sheet_rows WHERE sheet = ?1 AND row_num > ?2",
            rusqlite::params![sheet, header_rows as i64],
        )?;
        Ok(())
    }

    fn append_row(&self, sheet: &str, row: &[Cell]) -> Result<usize> {
        let row_num = self.last_row(sheet)? + 1;
        self.conn.execute(
            "INSERT INTO sheet_rows (sheet, row_num, cells) VALUES (?1, ?2, ?3)",
            rusqlite::params![sheet, row_num as i64, encode(row)?],
        )?;
        Ok(row_num)
    }

    fn write_rows(&self, sheet: &str, rows: &[Row], header_rows: usize) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM sheet_rows WHERE sheet = ?1 AND row_num > ?2",
            rusqlite::params![sheet, header_rows as i64],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO sheet_rows (sheet, row_num, cells) VALUES (?1, ?2, ?3)",
            )?;
            for (i, row) in rows.iter().enumerate() {
                let row_num = (header_rows + 1 + i) as i64;
                stmt.execute(rusqlite::params![sheet, row_num, encode(row)?])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn set_row_height(&self, sheet: &str, row_num: usize, height: u32) -> Result<()> {
        self.conn.execute(
            "UPDATE sheet_rows SET height = ?3, updated_at = datetime('now')
             WHERE sheet = ?1 AND row_num = ?2",
            rusqlite::params![sheet, row_num as i64, height],
        )?;
        Ok(())
    }

    fn last_row(&self, sheet: &str) -> Result<usize> {
        let last: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(row_num), 0) FROM sheet_rows WHERE sheet = ?1",
            [sheet],
            |row| row.get(0),
        )?;
        Ok(last as usize)
    }

    fn flush(&self) -> Result<()> {
        self.conn
            .query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))?;
        Ok(())
    }
}

/// Seed header rows into sheets that are still empty. Returns the seeded names.
pub fn init_sheets(store: &impl TableStore) -> Result<Vec<&'static str>> {
    let mut seeded = Vec::new();
    for (name, headers) in DEFAULT_SHEETS {
        if store.last_row(name)? == 0 {
            let row: Row = headers.iter().map(|h| Cell::from(*h)).collect();
            store.append_row(name, &row)?;
            seeded.push(*name);
        }
    }
    Ok(seeded)
}

/// Replace the body of `sheet` with rows read from a JSON array of arrays.
pub fn import_json(store: &impl TableStore, sheet: &str, path: &Path) -> Result<usize> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let rows: Vec<Row> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a JSON array of rows", path.display()))?;
    store.write_rows(sheet, &rows, HEADER_ROWS)?;
    Ok(rows.len())
}
