use crate::error::WorkbookError;
use crate::models::LabeledQuestion;
use calamine::{open_workbook, Data, Reader, Xlsx};
use rust_xlsxwriter::Workbook;
use std::fs;
use std::path::{Path, PathBuf};

pub const ID_COLUMN: &str = "ID";
pub const QUESTION_COLUMN: &str = "question";
pub const GROUND_TRUTH_COLUMN: &str = "ground_truth_human_generated";

/// The first worksheet of a workbook, split into its header row and data rows.
#[derive(Debug, Clone)]
pub struct Sheet {
    path: PathBuf,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Data>>,
}

impl Sheet {
    pub fn column(&self, name: &str) -> Result<usize, WorkbookError> {
        self.headers
            .iter()
            .position(|header| header.trim() == name)
            .ok_or_else(|| WorkbookError::MissingColumn {
                path: self.path.clone(),
                column: name.to_string(),
            })
    }
}

pub fn read_sheet(path: &Path) -> Result<Sheet, WorkbookError> {
    let mut workbook: Xlsx<_> = open_workbook(path)?;
    let name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| WorkbookError::NoWorksheet(path.to_path_buf()))?;
    let range = workbook.worksheet_range(&name)?;

    let mut rows = range.rows();
    let headers = rows
        .next()
        .map(|header| header.iter().map(cell_display).collect())
        .unwrap_or_default();

    Ok(Sheet {
        path: path.to_path_buf(),
        headers,
        rows: rows.map(|row| row.to_vec()).collect(),
    })
}

/// Text content of a cell, or `None` for anything that is not a string.
pub fn cell_text(cell: Option<&Data>) -> Option<String> {
    match cell {
        Some(Data::String(value)) => Some(value.clone()),
        _ => None,
    }
}

/// Any cell rendered as text; integral floats lose their fraction.
pub fn cell_display(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(value) => value.clone(),
        Data::Float(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
            format!("{}", *value as i64)
        }
        other => other.to_string(),
    }
}

pub fn cell_number(cell: Option<&Data>) -> Option<f64> {
    match cell {
        Some(Data::Float(value)) => Some(*value),
        Some(Data::Int(value)) => Some(*value as f64),
        Some(Data::String(value)) => value.trim().parse().ok(),
        _ => None,
    }
}

/// Reads the labeled question set from the first worksheet of `path`.
pub fn read_questions(path: &Path) -> Result<Vec<LabeledQuestion>, WorkbookError> {
    let sheet = read_sheet(path)?;
    let id_column = sheet.column(ID_COLUMN)?;
    let question_column = sheet.column(QUESTION_COLUMN)?;
    let truth_column = sheet.column(GROUND_TRUTH_COLUMN)?;

    Ok(sheet
        .rows
        .iter()
        .map(|row| LabeledQuestion {
            id: row.get(id_column).map(cell_display).unwrap_or_default(),
            question: cell_text(row.get(question_column)),
            ground_truth: cell_text(row.get(truth_column)),
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

/// Writes a single-sheet workbook, creating the parent directory if needed.
pub fn write_table(path: &Path, headers: &[String], rows: &[Vec<Cell>]) -> Result<(), WorkbookError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();

    for (column, header) in headers.iter().enumerate() {
        worksheet.write_string(0, column as u16, header.as_str())?;
    }

    for (row_index, row) in rows.iter().enumerate() {
        let row_number = (row_index + 1) as u32;
        for (column, cell) in row.iter().enumerate() {
            match cell {
                Cell::Text(value) => {
                    worksheet.write_string(row_number, column as u16, value.as_str())?;
                }
                Cell::Number(value) => {
                    worksheet.write_number(row_number, column as u16, *value)?;
                }
            }
        }
    }

    workbook.save(path)?;
    Ok(())
}
