//! Dataset sources.

use crate::ProspectRow;
use aquisicao_core::{AquisicaoResult, DatasetError};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Loaded prospect rows, in source order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProspectTable {
    rows: Vec<ProspectRow>,
}

impl ProspectTable {
    pub fn new(rows: Vec<ProspectRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[ProspectRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl From<Vec<ProspectRow>> for ProspectTable {
    fn from(rows: Vec<ProspectRow>) -> Self {
        Self::new(rows)
    }
}

/// Source of the prospect dataset.
pub trait ProspectRepository: Send + Sync {
    fn load(&self) -> AquisicaoResult<ProspectTable>;
}

/// Fixed table held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProspects {
    table: ProspectTable,
}

impl InMemoryProspects {
    pub fn new(rows: Vec<ProspectRow>) -> Self {
        Self {
            table: ProspectTable::new(rows),
        }
    }
}

impl ProspectRepository for InMemoryProspects {
    fn load(&self) -> AquisicaoResult<ProspectTable> {
        Ok(self.table.clone())
    }
}

/// Dataset file: a JSON array (`.json`), one object per line (`.jsonl`), or
/// a CSV export with a header row (`.csv`).
#[derive(Debug, Clone)]
pub struct FileRepository {
    path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Array,
    Lines,
    Csv,
}

impl FileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn format(&self) -> AquisicaoResult<Format> {
        let extension = self
            .path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match extension.as_str() {
            "json" => Ok(Format::Array),
            "jsonl" | "ndjson" => Ok(Format::Lines),
            "csv" => Ok(Format::Csv),
            _ => Err(DatasetError::UnsupportedFormat { extension }.into()),
        }
    }

    fn io_error(&self, err: std::io::Error) -> DatasetError {
        if err.kind() == std::io::ErrorKind::NotFound {
            DatasetError::NotFound {
                path: self.path.display().to_string(),
            }
        } else {
            DatasetError::Io {
                path: self.path.display().to_string(),
                reason: err.to_string(),
            }
        }
    }
}

impl ProspectRepository for FileRepository {
    fn load(&self) -> AquisicaoResult<ProspectTable> {
        let format = self.format()?;
        let content = std::fs::read_to_string(&self.path).map_err(|e| self.io_error(e))?;

        let rows = match format {
            Format::Array => serde_json::from_str::<Vec<ProspectRow>>(&content).map_err(|e| {
                DatasetError::Parse {
                    line: e.line(),
                    reason: e.to_string(),
                }
            })?,
            Format::Lines => parse_lines(&content)?,
            Format::Csv => parse_csv(&content)?,
        };

        tracing::debug!(path = %self.path.display(), rows = rows.len(), "dataset loaded");
        Ok(ProspectTable::new(rows))
    }
}

fn parse_lines(content: &str) -> AquisicaoResult<Vec<ProspectRow>> {
    let mut rows = Vec::new();
    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row = serde_json::from_str(line).map_err(|e| DatasetError::Parse {
            line: index + 1,
            reason: e.to_string(),
        })?;
        rows.push(row);
    }
    Ok(rows)
}

/// Empty cells become nulls; everything else stays text for the row's
/// lenient deserializers.
fn parse_csv(content: &str) -> AquisicaoResult<Vec<ProspectRow>> {
    let mut reader = csv::Reader::from_reader(content.as_bytes());
    let headers = reader.headers().map_err(csv_error)?.clone();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(csv_error)?;
        let line = record.position().map_or(0, |p| p.line() as usize);
        let object: Map<String, Value> = headers
            .iter()
            .zip(record.iter())
            .map(|(column, cell)| {
                let cell = cell.trim();
                let value = if cell.is_empty() {
                    Value::Null
                } else {
                    Value::String(cell.to_string())
                };
                (column.trim().to_string(), value)
            })
            .collect();
        let row = serde_json::from_value(Value::Object(object)).map_err(|e| {
            DatasetError::Parse {
                line,
                reason: e.to_string(),
            }
        })?;
        rows.push(row);
    }
    Ok(rows)
}

fn csv_error(err: csv::Error) -> DatasetError {
    DatasetError::Parse {
        line: err.position().map_or(0, |p| p.line() as usize),
        reason: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aquisicao_core::AquisicaoError;
    use std::io::Write;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_loads_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "prospects.json",
            r#"[{"cnpj_cpf": "111", "unidade_federal": "SP"}, {"cnpj_cpf": "222"}]"#,
        );
        let table = FileRepository::new(path).load().unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0].unidade_federal.as_deref(), Some("SP"));
    }

    #[test]
    fn test_loads_json_lines_skipping_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "prospects.jsonl",
            "{\"cnpj_cpf\": \"111\"}\n\n{\"cnpj_cpf\": \"222\"}\n",
        );
        let table = FileRepository::new(path).load().unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_bad_line_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "prospects.jsonl", "{\"cnpj_cpf\": \"1\"}\n{oops}\n");
        let err = FileRepository::new(path).load().unwrap_err();
        assert!(matches!(
            err,
            AquisicaoError::Dataset(DatasetError::Parse { line: 2, .. })
        ));
    }

    #[test]
    fn test_loads_csv_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            &dir,
            "prospects.csv",
            "cnpj_cpf,unidade_federal,fl_pep,mes_ref,lat,nomecli\n\
             12345678000199,SP,0,2024-03-01,-23.55,Padaria Central\n\
             98765432000111,RJ,,,,\n",
        );
        let table = FileRepository::new(path).load().unwrap();
        assert_eq!(table.len(), 2);

        let first = &table.rows()[0];
        assert_eq!(first.cnpj_cpf.as_deref(), Some("12345678000199"));
        assert_eq!(first.fl_pep, Some(false));
        assert_eq!(first.mes_ref, chrono::NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(first.lat, Some(-23.55));
        assert_eq!(first.extra["nomecli"], "Padaria Central");

        let second = &table.rows()[1];
        assert_eq!(second.fl_pep, None);
        assert_eq!(second.mes_ref, None);
        assert_eq!(second.lat, None);
    }

    #[test]
    fn test_bad_csv_cell_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "prospects.csv", "cnpj_cpf,fl_pep\n111,0\n222,7\n");
        let err = FileRepository::new(path).load().unwrap_err();
        assert!(matches!(
            err,
            AquisicaoError::Dataset(DatasetError::Parse { line: 3, .. })
        ));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileRepository::new(dir.path().join("absent.json"))
            .load()
            .unwrap_err();
        assert!(matches!(
            err,
            AquisicaoError::Dataset(DatasetError::NotFound { .. })
        ));
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "prospects.parquet", "");
        let err = FileRepository::new(path).load().unwrap_err();
        assert!(matches!(
            err,
            AquisicaoError::Dataset(DatasetError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_in_memory_returns_rows() {
        let repo = InMemoryProspects::new(vec![ProspectRow::default()]);
        assert_eq!(repo.load().unwrap().len(), 1);
    }
}
