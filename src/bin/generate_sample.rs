//! Writes a synthetic field trial: a multispectral parquet file plus the
//! matching hand-recorded yield sheet.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use clap::Parser;
use parquet::arrow::ArrowWriter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use agrospec::config::{DATE_FORMAT, IDENTITY_COLUMNS, MEASUREMENT_COLUMNS};

const BANDS: [&str; 5] = ["blue", "green", "red", "red_edge", "nir"];

/// Mean reflectance per band for each variety.
const VARIETIES: [(&str, [f64; 5]); 3] = [
    ("Agria", [0.04, 0.09, 0.05, 0.22, 0.48]),
    ("Desiree", [0.05, 0.11, 0.06, 0.25, 0.42]),
    ("Carrera", [0.04, 0.12, 0.04, 0.28, 0.53]),
];

/// Treatment name and its multiplicative effect on NIR.
const TREATMENTS: [(&str, f64); 2] = [("control", 1.0), ("drought", 0.82)];

#[derive(Parser, Debug)]
#[command(about = "Generate a synthetic multispectral field trial")]
struct Args {
    /// Directory receiving `sample_data.parquet` and `yield.csv`
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Plants per variety and block
    #[arg(long, default_value_t = 6)]
    plants: i64,
}

/// Box-Muller transform for normal distribution
fn gauss(rng: &mut StdRng, mean: f64, std_dev: f64) -> f64 {
    let u1 = rng.random::<f64>().max(1e-15);
    let u2 = rng.random::<f64>();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std_dev * z
}

#[derive(Default)]
struct Columns {
    dates: Vec<String>,
    treatments: Vec<String>,
    blocks: Vec<i64>,
    plants: Vec<i64>,
    varieties: Vec<String>,
    bands: [Vec<f64>; 5],
    yields: Vec<f64>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let mut rng = StdRng::seed_from_u64(args.seed);

    let dates = [(2023, 6, 1), (2023, 6, 15), (2023, 7, 1)]
        .into_iter()
        .map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).context("invalid calendar date"))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let mut cols = Columns::default();
    let mut plant_id = 0;

    for block in 1..=3 {
        for (treatment, nir_effect) in TREATMENTS {
            for (variety, means) in VARIETIES {
                for _ in 0..args.plants {
                    plant_id += 1;
                    let vigour = gauss(&mut rng, 1.0, 0.08);
                    for date in &dates {
                        cols.dates.push(date.format(DATE_FORMAT).to_string());
                        cols.treatments.push(treatment.to_string());
                        cols.blocks.push(block);
                        cols.plants.push(plant_id);
                        cols.varieties.push(variety.to_string());
                        for (b, mean) in means.iter().enumerate() {
                            let effect = if BANDS[b] == "nir" { nir_effect } else { 1.0 };
                            let value = gauss(&mut rng, mean * effect * vigour, 0.01).clamp(0.0, 1.0);
                            cols.bands[b].push(value);
                        }
                        cols.yields.push(gauss(&mut rng, 4.5 * vigour * nir_effect, 0.3).max(0.0));
                    }
                }
            }
        }
    }

    std::fs::create_dir_all(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    let parquet_path = args.output.join("sample_data.parquet");
    write_parquet(&cols, &parquet_path)?;
    let csv_path = args.output.join("yield.csv");
    write_measurements(&cols, &csv_path)?;

    println!(
        "Wrote {} rows ({} bands each) to {} and {}",
        cols.dates.len(),
        BANDS.len(),
        parquet_path.display(),
        csv_path.display()
    );
    Ok(())
}

fn write_parquet(cols: &Columns, path: &std::path::Path) -> anyhow::Result<()> {
    let strings = |v: &[String]| -> ArrayRef {
        Arc::new(StringArray::from(v.iter().map(String::as_str).collect::<Vec<_>>()))
    };

    let mut fields = vec![
        Field::new(IDENTITY_COLUMNS[0], DataType::Utf8, false),
        Field::new(IDENTITY_COLUMNS[1], DataType::Utf8, false),
        Field::new(IDENTITY_COLUMNS[2], DataType::Int64, false),
        Field::new(IDENTITY_COLUMNS[3], DataType::Int64, false),
        Field::new(IDENTITY_COLUMNS[4], DataType::Utf8, false),
    ];
    let mut arrays: Vec<ArrayRef> = vec![
        strings(&cols.dates),
        strings(&cols.treatments),
        Arc::new(Int64Array::from(cols.blocks.clone())),
        Arc::new(Int64Array::from(cols.plants.clone())),
        strings(&cols.varieties),
    ];
    for (name, values) in BANDS.iter().zip(&cols.bands) {
        fields.push(Field::new(*name, DataType::Float64, false));
        arrays.push(Arc::new(Float64Array::from(values.clone())));
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), arrays).context("building record batch")?;
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing record batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

/// Yield sheet in the field crew's layout: local headers and `dd.mm.yyyy` dates.
fn write_measurements(cols: &Columns, path: &std::path::Path) -> anyhow::Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut header: Vec<&str> = MEASUREMENT_COLUMNS.to_vec();
    header.push("yield");
    writer.write_record(&header)?;

    for row in 0..cols.dates.len() {
        let date = NaiveDate::parse_from_str(&cols.dates[row], DATE_FORMAT)?;
        writer.write_record([
            date.format("%d.%m.%Y").to_string(),
            cols.treatments[row].clone(),
            cols.blocks[row].to_string(),
            cols.plants[row].to_string(),
            cols.varieties[row].clone(),
            format!("{:.3}", cols.yields[row]),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
