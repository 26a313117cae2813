//! File-backed storage for wide inputs and curated tables.
//!
//! Curated tables are always written to a temporary sibling first and then
//! renamed into place, so a reader never sees a half-written file.

use crate::config::PERIOD_OUTPUT_PREFIX;
use crate::error::{ReconError, Result, ResultExt};
use once_cell::sync::Lazy;
use polars::prelude::*;
use regex::Regex;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

static PERIOD_INPUT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})\.csv$").expect("period input pattern is valid"));

/// Read a wide CSV export with every cell as text.
///
/// The header row is read as data (row 0) so repeated headers survive
/// untouched for the row normalizer.
pub fn read_wide_csv(path: &Path) -> Result<DataFrame> {
    if !path.exists() {
        return Err(ReconError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} does not exist", path.display()),
        )));
    }

    let df = CsvReadOptions::default()
        .with_has_header(false)
        .with_infer_schema_length(Some(0))
        .with_parse_options(CsvParseOptions::default().with_quote_char(Some(b'"')))
        .try_into_reader_with_file_path(Some(path.to_path_buf()))
        .context(format!("Opening {}", path.display()))?
        .finish()
        .context(format!("Parsing {}", path.display()))?;

    debug!(
        "Read {} raw rows x {} columns from {}",
        df.height(),
        df.width(),
        path.display()
    );
    Ok(df)
}

/// Read a Parquet table.
pub fn read_parquet(path: &Path) -> Result<DataFrame> {
    let file = File::open(path).context(format!("Opening {}", path.display()))?;
    let df = ParquetReader::new(file)
        .finish()
        .context(format!("Reading {}", path.display()))?;
    Ok(df)
}

/// Write a Parquet table through a temporary sibling and an atomic rename.
pub fn write_parquet_atomic(df: &mut DataFrame, path: &Path) -> Result<()> {
    let tmp = temp_sibling(path);
    ensure_parent(path)?;

    let written = (|| -> Result<()> {
        let file = File::create(&tmp).context(format!("Creating {}", tmp.display()))?;
        ParquetWriter::new(file)
            .finish(df)
            .context(format!("Writing {}", tmp.display()))?;
        fs::rename(&tmp, path).context(format!("Renaming into {}", path.display()))?;
        Ok(())
    })();

    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written?;

    info!("Wrote {} rows to {}", df.height(), path.display());
    Ok(())
}

/// Write a CSV export through a temporary sibling and an atomic rename.
pub fn write_csv(df: &mut DataFrame, path: &Path) -> Result<()> {
    let tmp = temp_sibling(path);
    ensure_parent(path)?;

    let written = (|| -> Result<()> {
        let mut file = File::create(&tmp).context(format!("Creating {}", tmp.display()))?;
        CsvWriter::new(&mut file)
            .include_header(true)
            .with_separator(b',')
            .finish(df)
            .context(format!("Writing {}", tmp.display()))?;
        fs::rename(&tmp, path).context(format!("Renaming into {}", path.display()))?;
        Ok(())
    })();

    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written?;

    info!("Wrote {} rows to {}", df.height(), path.display());
    Ok(())
}

/// Write a string (e.g. a JSON report) atomically.
pub fn write_text_atomic(contents: &str, path: &Path) -> Result<()> {
    let tmp = temp_sibling(path);
    ensure_parent(path)?;
    fs::write(&tmp, contents).context(format!("Writing {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(ReconError::Io(e).with_context(format!("Renaming into {}", path.display())));
    }
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).context(format!("Creating {}", parent.display()))?;
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// Period label for a `yyyy.csv` input file name.
pub fn period_from_path(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    PERIOD_INPUT_RE
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Find `yyyy.csv` inputs in a directory, sorted by period.
pub fn discover_period_inputs(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut inputs = Vec::new();
    for entry in fs::read_dir(dir).context(format!("Listing {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(period) = period_from_path(&path) {
            inputs.push((period, path));
        }
    }
    inputs.sort();
    debug!("Discovered {} period inputs in {}", inputs.len(), dir.display());
    Ok(inputs)
}

/// Find curated per-period outputs (`cleaned_stock_<period>.parquet`), sorted by name.
pub fn list_period_outputs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut outputs: Vec<PathBuf> = fs::read_dir(dir)
        .context(format!("Listing {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(PERIOD_OUTPUT_PREFIX) && n.ends_with(".parquet"))
        })
        .collect();
    outputs.sort();
    Ok(outputs)
}
