use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{Array, AsArray, Float32Array, Float64Array, LargeListArray, ListArray};
use arrow::datatypes::DataType;
use ndarray::{Array2, ArrayD, Axis, IxDyn};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::filter::exclude_copes;
use super::mask::VoxelMask;
use super::model::{MetadataValue, Mvp, SpatialHeader};
use super::tstat::beta_to_tstat;
use crate::config::MvpConfig;

/// Column holding the condition name of each trial.
pub const COPE_COLUMN: &str = "cope";
/// Column holding the voxel values (betas) of each trial.
pub const PATTERN_COLUMN: &str = "x";
/// Optional column holding the variance of each voxel value.
pub const VARIANCE_COLUMN: &str = "var";

// ---------------------------------------------------------------------------
// PatternTable – raw rows handed to the container
// ---------------------------------------------------------------------------

/// Trials read from disk, before exclusion and masking.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternTable {
    pub labels: Vec<String>,
    pub patterns: Vec<Vec<f64>>,
    pub variances: Option<Vec<Vec<f64>>>,
}

impl PatternTable {
    /// Number of trials.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of values per trial, checking every row agrees.
    pub fn width(&self) -> Result<usize> {
        let width = self.patterns.first().map(Vec::len).unwrap_or(0);
        for (row, p) in self.patterns.iter().enumerate() {
            if p.len() != width {
                bail!("Row {row}: {} values, expected {width}", p.len());
            }
        }
        if let Some(vars) = &self.variances {
            for (row, v) in vars.iter().enumerate() {
                if v.len() != width {
                    bail!("Row {row}: x has {width} values but var has {}", v.len());
                }
            }
        }
        Ok(width)
    }

    fn push(&mut self, label: String, pattern: Vec<f64>, variance: Option<Vec<f64>>) {
        self.labels.push(label);
        self.patterns.push(pattern);
        if let Some(v) = variance {
            self.variances.get_or_insert_with(Vec::new).push(v);
        }
    }
}

fn rows_to_array(rows: &[Vec<f64>], width: usize) -> Result<Array2<f64>> {
    let flat: Vec<f64> = rows.iter().flatten().copied().collect();
    Array2::from_shape_vec((rows.len(), width), flat).context("building pattern matrix")
}

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load a pattern table from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – `cope` string column, `x` (and optional `var`) list columns
/// * `.json`    – `[{ "cope": "face", "x": [...], "var": [...] }, ...]`
/// * `.csv`     – columns `cope`, `x` (and optional `var`) with
///   semicolon-separated floats
pub fn load_patterns(path: &Path) -> Result<PatternTable> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let table = match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported file extension: .{other}"),
    }
    .with_context(|| format!("loading patterns from {}", path.display()))?;

    if table.variances.as_ref().is_some_and(|v| v.len() != table.len()) {
        bail!("{}: 'var' must be given for every row or none", path.display());
    }
    table.width()?;
    Ok(table)
}

/// A mask plus the spatial metadata of the volume it lives in.
#[derive(Debug, Clone)]
pub struct MaskVolume {
    pub mask: VoxelMask,
    pub header: SpatialHeader,
    pub affine: Array2<f64>,
}

#[derive(Deserialize)]
struct MaskFile {
    shape: Vec<usize>,
    data: Vec<f64>,
    #[serde(default)]
    header: serde_json::Map<String, JsonValue>,
    affine: Option<Vec<Vec<f64>>>,
}

/// Load a mask volume from JSON and binarize it at `threshold`.
///
/// ```json
/// { "shape": [91, 109, 91], "data": [0.0, 0.3, ...],
///   "header": { "descrip": "V1" }, "affine": [[-2, 0, 0, 90], ...] }
/// ```
///
/// `data` is the volume flattened in row-major order.
pub fn load_mask(path: &Path, threshold: f64) -> Result<MaskVolume> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading mask {}", path.display()))?;
    let file: MaskFile = serde_json::from_str(&text).context("parsing mask JSON")?;

    let volume = ArrayD::from_shape_vec(IxDyn(&file.shape), file.data)
        .with_context(|| format!("mask data does not fill shape {:?}", file.shape))?;
    let mask = VoxelMask::from_volume(&volume, threshold);

    let affine = match file.affine {
        Some(rows) => {
            if rows.len() != 4 || rows.iter().any(|r| r.len() != 4) {
                bail!("mask affine must be 4x4");
            }
            rows_to_array(&rows, 4)?
        }
        None => Array2::eye(4),
    };

    let header = file
        .header
        .iter()
        .map(|(k, v)| (k.clone(), json_to_metadata(v)))
        .collect();

    log::info!(
        "Loaded mask {} with {} of {} voxels above {threshold}",
        path.display(),
        mask.count_true(),
        mask.index().len()
    );
    Ok(MaskVolume {
        mask,
        header,
        affine,
    })
}

/// Fill a fresh container from a pattern table and optional mask.
///
/// Excluded conditions are dropped, betas converted to t-values when the
/// config asks for it and variances are present, and full-volume rows are
/// reduced to the mask's voxels. Label metadata is derived last.
///
/// A container that already holds labels, patterns or a mask is refused
/// untouched; everything is checked before the first field is set.
pub fn populate(mvp: &mut Mvp, table: PatternTable, mask: Option<MaskVolume>) -> Result<()> {
    if mvp.x().is_some() || mvp.cope_labels().is_some() || mvp.mask().is_some() {
        bail!(
            "container for {}/{} is already populated",
            mvp.sub_name(),
            mvp.run_name()
        );
    }
    let table = exclude_copes(table, &mvp.config().remove_cope);
    if table.is_empty() {
        bail!("no trials left after excluding {:?}", mvp.config().remove_cope);
    }
    let width = table.width()?;

    let mut x = rows_to_array(&table.patterns, width)?;
    match &table.variances {
        Some(vars) if mvp.config().beta2tstat => {
            let var = rows_to_array(vars, width)?;
            x = beta_to_tstat(&x, &var);
        }
        None if mvp.config().beta2tstat => {
            log::debug!("beta2tstat requested but no variances present; keeping betas");
        }
        _ => {}
    }

    let MaskVolume {
        mask,
        header,
        affine,
    } = match mask {
        Some(m) => m,
        None => MaskVolume {
            mask: VoxelMask::whole_brain(vec![width]),
            header: BTreeMap::new(),
            affine: Array2::eye(4),
        },
    };

    let n_active = mask.count_true();
    let n_voxels = mask.index().len();
    if width != n_active {
        if width == n_voxels {
            x = x.select(Axis(1), &mask.active_positions());
        } else {
            bail!(
                "patterns have {width} values per trial; mask has {n_active} active of {n_voxels} voxels"
            );
        }
    }

    let n_trials = table.len();
    mvp.set_cope_labels(table.labels)?;
    mvp.set_mask(mask)?;
    mvp.set_x(x)?;
    mvp.set_spatial(header, affine);
    mvp.update_metadata()?;
    mvp.validate()?;

    log::info!(
        "Loaded {n_trials} trials x {n_active} voxels for {}/{} ({})",
        mvp.sub_name(),
        mvp.run_name(),
        mvp.mask_name()
    );
    Ok(())
}

/// Build and populate a container for `directory` in one go.
///
/// The mask is read from `config.mask_path` when set.
pub fn load_mvp(directory: &Path, patterns: &Path, config: MvpConfig) -> Result<Mvp> {
    config.validate()?;
    let mask = config
        .mask_path
        .as_deref()
        .map(|p| load_mask(p, config.mask_threshold))
        .transpose()?;
    let table = load_patterns(patterns)?;

    let mut mvp = Mvp::new(directory, config);
    populate(&mut mvp, table, mask)?;
    Ok(mvp)
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented, `df.to_json(orient='records')`):
///
/// ```json
/// [
///   { "cope": "face",  "x": [0.12, -0.4, ...], "var": [0.9, 1.1, ...] },
///   { "cope": "house", "x": [0.31,  0.2, ...], "var": [1.0, 0.8, ...] }
/// ]
/// ```
fn load_json(path: &Path) -> Result<PatternTable> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root.as_array().context("Expected top-level JSON array")?;

    let mut table = PatternTable::default();

    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;

        let label = match obj.get(COPE_COLUMN) {
            Some(JsonValue::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => bail!("Row {i}: missing '{COPE_COLUMN}'"),
        };
        let x = json_array_to_f64(obj.get(PATTERN_COLUMN), i, PATTERN_COLUMN)?;
        let var = match obj.get(VARIANCE_COLUMN) {
            Some(v) => Some(json_array_to_f64(Some(v), i, VARIANCE_COLUMN)?),
            None => None,
        };

        table.push(label, x, var);
    }

    Ok(table)
}

fn json_array_to_f64(val: Option<&JsonValue>, row: usize, col: &str) -> Result<Vec<f64>> {
    let arr = val
        .and_then(|v| v.as_array())
        .with_context(|| format!("Row {row}: missing or invalid '{col}' array"))?;

    arr.iter()
        .enumerate()
        .map(|(j, v)| {
            v.as_f64()
                .with_context(|| format!("Row {row}, {col}[{j}]: not a number"))
        })
        .collect()
}

fn json_to_metadata(val: &JsonValue) -> MetadataValue {
    match val {
        JsonValue::String(s) => MetadataValue::String(s.clone()),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                MetadataValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                MetadataValue::Float(f)
            } else {
                MetadataValue::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => MetadataValue::Bool(*b),
        JsonValue::Array(items) => MetadataValue::List(items.iter().map(json_to_metadata).collect()),
        JsonValue::Null => MetadataValue::Null,
        other => MetadataValue::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout:  header row with column names.
/// `x` and `var` columns contain semicolon-separated floats:
///   `face,"0.12;0.14;0.11","1.0;0.9;1.2"`
fn load_csv(path: &Path) -> Result<PatternTable> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let cope_idx = headers
        .iter()
        .position(|h| h == COPE_COLUMN)
        .context("CSV missing 'cope' column")?;
    let x_idx = headers
        .iter()
        .position(|h| h == PATTERN_COLUMN)
        .context("CSV missing 'x' column")?;
    let var_idx = headers.iter().position(|h| h == VARIANCE_COLUMN);

    let mut table = PatternTable::default();

    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;

        let label = record.get(cope_idx).unwrap_or("").to_string();
        let x = parse_semicolon_floats(record.get(x_idx).unwrap_or(""), row_no, PATTERN_COLUMN)?;
        let var = var_idx
            .map(|idx| parse_semicolon_floats(record.get(idx).unwrap_or(""), row_no, VARIANCE_COLUMN))
            .transpose()?;

        table.push(label, x, var);
    }

    Ok(table)
}

fn parse_semicolon_floats(s: &str, row: usize, col: &str) -> Result<Vec<f64>> {
    s.split(';')
        .enumerate()
        .map(|(j, tok)| {
            tok.trim()
                .parse::<f64>()
                .with_context(|| format!("Row {row}, {col}[{j}]: '{tok}' is not a number"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file containing one trial per row.
///
/// Expected schema:
/// - `cope`: Utf8 or LargeUtf8 – condition name
/// - `x`: List<Float64> or LargeList<Float64> – voxel values
/// - `var` (optional): same type as `x` – voxel variances
///
/// Works with files written by both **Pandas** (`df.to_parquet()`) and
/// **Polars** (`df.write_parquet()`).
fn load_parquet(path: &Path) -> Result<PatternTable> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut table = PatternTable::default();
    let mut offset = 0;

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();
        let n_rows = batch.num_rows();

        let cope_idx = schema
            .index_of(COPE_COLUMN)
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'cope' column"))?;
        let x_idx = schema
            .index_of(PATTERN_COLUMN)
            .map_err(|_| anyhow::anyhow!("Parquet file missing 'x' column"))?;
        let var_idx = schema.index_of(VARIANCE_COLUMN).ok();

        let cope_col = batch.column(cope_idx);
        let x_col = batch.column(x_idx);

        for row in 0..n_rows {
            let global = offset + row;
            let label = extract_string(cope_col, row)
                .with_context(|| format!("Row {global}: failed to read 'cope'"))?;
            let x = extract_f64_list(x_col, row)
                .with_context(|| format!("Row {global}: failed to read 'x'"))?;
            let var = var_idx
                .map(|idx| {
                    extract_f64_list(batch.column(idx), row)
                        .with_context(|| format!("Row {global}: failed to read 'var'"))
                })
                .transpose()?;

            table.push(label, x, var);
        }
        offset += n_rows;
    }

    Ok(table)
}

// -- Parquet / Arrow helpers --

fn extract_string(col: &Arc<dyn Array>, row: usize) -> Result<String> {
    if col.is_null(row) {
        bail!("null condition name");
    }
    match col.data_type() {
        DataType::Utf8 => Ok(col.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => Ok(col.as_string::<i64>().value(row).to_string()),
        other => bail!("Expected Utf8 column, got {other:?}"),
    }
}

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

    let values_array = match col.data_type() {
        DataType::List(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<ListArray>()
                .context("expected ListArray")?;
            list_arr.value(row)
        }
        DataType::LargeList(_) => {
            let list_arr = col
                .as_any()
                .downcast_ref::<LargeListArray>()
                .context("expected LargeListArray")?;
            list_arr.value(row)
        }
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    // The inner array can be Float64 or Float32
    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.iter().map(|v| v.unwrap_or(f32::NAN) as f64).collect())
    } else {
        bail!(
            "List inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(labels: &[&str], patterns: Vec<Vec<f64>>) -> PatternTable {
        PatternTable {
            labels: labels.iter().map(|s| s.to_string()).collect(),
            patterns,
            variances: None,
        }
    }

    #[test]
    fn width_rejects_ragged_rows() {
        let t = table(&["a", "b"], vec![vec![1.0, 2.0], vec![1.0]]);
        assert!(t.width().is_err());
    }

    #[test]
    fn populate_without_mask_uses_whole_brain() {
        let mut mvp = Mvp::new("/d/sub01/run_1.feat", MvpConfig::default());
        let t = table(&["b", "a", "b"], vec![vec![1.0, 2.0]; 3]);
        populate(&mut mvp, t, None).unwrap();

        assert_eq!(mvp.mask().unwrap().shape(), &[2]);
        assert_eq!(mvp.x().unwrap().dim(), (3, 2));
        assert_eq!(mvp.y().unwrap(), &[1, 0, 1]);
        assert_eq!(mvp.affine().unwrap(), &Array2::<f64>::eye(4));
    }

    #[test]
    fn populate_selects_mask_columns_from_full_volume_rows() {
        let mut mvp = Mvp::new("/d/sub01/run_1.feat", MvpConfig::default());
        let mask = MaskVolume {
            mask: VoxelMask::new(ndarray::array![false, true, true, false], vec![2, 2]).unwrap(),
            header: SpatialHeader::new(),
            affine: Array2::eye(4),
        };
        let t = table(&["a", "b"], vec![vec![1.0, 2.0, 3.0, 4.0], vec![5.0, 6.0, 7.0, 8.0]]);
        populate(&mut mvp, t, Some(mask)).unwrap();
        assert_eq!(mvp.x().unwrap(), &ndarray::array![[2.0, 3.0], [6.0, 7.0]]);
    }

    #[test]
    fn populate_rejects_width_matching_nothing() {
        let mut mvp = Mvp::new("/d/sub01/run_1.feat", MvpConfig::default());
        let mask = MaskVolume {
            mask: VoxelMask::whole_brain(vec![2, 2]),
            header: SpatialHeader::new(),
            affine: Array2::eye(4),
        };
        let t = table(&["a"], vec![vec![1.0, 2.0, 3.0]]);
        assert!(populate(&mut mvp, t, Some(mask)).is_err());
    }

    #[test]
    fn populate_converts_betas_when_variances_present() {
        let mut mvp = Mvp::new("/d/sub01/run_1.feat", MvpConfig::default());
        let mut t = table(&["a"], vec![vec![4.0, -6.0]]);
        t.variances = Some(vec![vec![4.0, 9.0]]);
        populate(&mut mvp, t, None).unwrap();
        assert_eq!(mvp.x().unwrap(), &ndarray::array![[2.0, -2.0]]);
    }

    #[test]
    fn populate_keeps_betas_when_disabled() {
        let cfg = MvpConfig {
            beta2tstat: false,
            ..MvpConfig::default()
        };
        let mut mvp = Mvp::new("/d/sub01/run_1.feat", cfg);
        let mut t = table(&["a"], vec![vec![4.0, -6.0]]);
        t.variances = Some(vec![vec![4.0, 9.0]]);
        populate(&mut mvp, t, None).unwrap();
        assert_eq!(mvp.x().unwrap(), &ndarray::array![[4.0, -6.0]]);
    }

    #[test]
    fn populate_fails_when_everything_is_excluded() {
        let cfg = MvpConfig {
            remove_cope: vec!["nuis".to_string()],
            ..MvpConfig::default()
        };
        let mut mvp = Mvp::new("/d/sub01/run_1.feat", cfg);
        let t = table(&["nuis_1", "nuis_2"], vec![vec![1.0], vec![2.0]]);
        assert!(populate(&mut mvp, t, None).is_err());
        assert!(mvp.x().is_none());
    }

    #[test]
    fn populate_refuses_a_populated_container() {
        let mut mvp = Mvp::new("/d/sub01/run_1.feat", MvpConfig::default());
        populate(&mut mvp, table(&["a", "b"], vec![vec![1.0, 2.0]; 2]), None).unwrap();
        let before = mvp.metadata().cloned();

        let err = populate(&mut mvp, table(&["c"], vec![vec![1.0, 2.0, 3.0]]), None).unwrap_err();
        assert!(err.to_string().contains("already populated"));
        assert_eq!(mvp.cope_labels().unwrap(), &["a", "b"]);
        assert_eq!(mvp.x().unwrap().dim(), (2, 2));
        assert_eq!(mvp.mask().unwrap().count_true(), 2);
        assert_eq!(mvp.metadata().cloned(), before);
    }

    #[test]
    fn header_json_becomes_metadata() {
        let v: JsonValue = serde_json::json!({ "dim": [91, 109], "descrip": "V1" });
        let obj = v.as_object().unwrap();
        assert_eq!(
            json_to_metadata(&obj["dim"]),
            MetadataValue::List(vec![MetadataValue::Integer(91), MetadataValue::Integer(109)])
        );
        assert_eq!(
            json_to_metadata(&obj["descrip"]),
            MetadataValue::String("V1".into())
        );
    }

    #[test]
    fn unsupported_extension_is_an_error() {
        let err = load_patterns(Path::new("/tmp/patterns.nii")).unwrap_err();
        assert!(err.to_string().contains(".nii"));
    }
}
