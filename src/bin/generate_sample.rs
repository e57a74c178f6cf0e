//! Write a synthetic run for trying out `rusty-mvp`:
//! `sample_patterns.parquet` (full-volume trial patterns with variances) and
//! `sample_mask.json` (a probabilistic blob mask over the same volume).

use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Builder, ListArray, ListBuilder, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

const SHAPE: [usize; 3] = [6, 6, 4];
const TRIALS_PER_COPE: usize = 8;

/// Row-major flat position → (i, j, k).
fn coords(flat: usize) -> (f64, f64, f64) {
    let k = flat % SHAPE[2];
    let j = (flat / SHAPE[2]) % SHAPE[1];
    let i = flat / (SHAPE[1] * SHAPE[2]);
    (i as f64, j as f64, k as f64)
}

/// Mask probability: falls off with distance from `centre`.
fn blob(flat: usize, centre: (f64, f64, f64), radius: f64) -> f64 {
    let (i, j, k) = coords(flat);
    let d2 = (i - centre.0).powi(2) + (j - centre.1).powi(2) + (k - centre.2).powi(2);
    (1.0 - d2 / radius.powi(2)).max(0.0)
}

fn list_array(rows: &[Vec<f64>]) -> ListArray {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in rows {
        let values = builder.values();
        for &v in row {
            values.append_value(v);
        }
        builder.append(true);
    }
    builder.finish()
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let mut rng = SimpleRng::new(42);

    let n_voxels: usize = SHAPE.iter().product();

    // Each condition activates its own blob on top of a shared baseline.
    let copes: Vec<(&str, (f64, f64, f64), f64)> = vec![
        ("face", (1.5, 2.0, 1.5), 1.2),
        ("house", (4.0, 3.5, 2.0), 0.9),
        ("body", (2.5, 4.5, 1.0), 0.7),
        ("nuisance_motion", (3.0, 3.0, 2.0), 0.1),
    ];

    let mut all_cope: Vec<String> = Vec::new();
    let mut all_x: Vec<Vec<f64>> = Vec::new();
    let mut all_var: Vec<Vec<f64>> = Vec::new();

    for _ in 0..TRIALS_PER_COPE {
        for &(name, centre, amplitude) in &copes {
            let noise = 0.2 + 0.1 * rng.next_f64();
            let x: Vec<f64> = (0..n_voxels)
                .map(|v| amplitude * blob(v, centre, 2.5) + rng.gauss(0.0, noise))
                .collect();
            let var: Vec<f64> = (0..n_voxels)
                .map(|_| noise.powi(2) * (0.8 + 0.4 * rng.next_f64()))
                .collect();

            all_cope.push(name.to_string());
            all_x.push(x);
            all_var.push(var);
        }
    }

    let item = Arc::new(Field::new("item", DataType::Float64, true));
    let schema = Arc::new(Schema::new(vec![
        Field::new("cope", DataType::Utf8, false),
        Field::new("x", DataType::List(item.clone()), false),
        Field::new("var", DataType::List(item), false),
    ]));

    let cope_array = StringArray::from(all_cope.iter().map(|s| s.as_str()).collect::<Vec<_>>());
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(cope_array),
            Arc::new(list_array(&all_x)),
            Arc::new(list_array(&all_var)),
        ],
    )
    .context("creating record batch")?;

    // Write Parquet
    let patterns_path = "sample_patterns.parquet";
    let file = std::fs::File::create(patterns_path).context("creating pattern file")?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating writer")?;
    writer.write(&batch).context("writing batch")?;
    writer.close().context("closing writer")?;

    // Mask: union of a wide blob around the centre of the volume
    let mask_path = "sample_mask.json";
    let data: Vec<f64> = (0..n_voxels).map(|v| blob(v, (2.5, 2.5, 1.5), 3.0)).collect();
    let mask = serde_json::json!({
        "shape": SHAPE,
        "data": data,
        "header": { "descrip": "synthetic blob", "dim": SHAPE, "pixdim": [2.0, 2.0, 2.0] },
        "affine": [
            [-2.0, 0.0, 0.0, 6.0],
            [0.0, 2.0, 0.0, -6.0],
            [0.0, 0.0, 2.0, -4.0],
            [0.0, 0.0, 0.0, 1.0]
        ],
    });
    std::fs::write(mask_path, serde_json::to_string(&mask)?).context("writing mask file")?;

    println!(
        "Wrote {} trials ({n_voxels} voxels each) to {patterns_path} and a {:?} mask to {mask_path}",
        all_cope.len(),
        SHAPE
    );
    Ok(())
}
