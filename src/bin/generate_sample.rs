use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use clap::{Parser, ValueEnum};
use parquet::arrow::ArrowWriter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Write a synthetic molecular-descriptor dataset with a binary toxicity label.
#[derive(Parser, Debug)]
struct Args {
    /// Output file
    #[arg(long, default_value = "sample_trainingset.csv")]
    output: PathBuf,

    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,

    #[arg(long, default_value_t = 500)]
    rows: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Share of descriptor cells left empty
    #[arg(long, default_value_t = 0.02)]
    missing_rate: f64,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Csv,
    Parquet,
}

const FRAGMENTS: &[&str] = &[
    "C", "CC", "CCO", "c1ccccc1", "N", "O", "C(=O)O", "Cl", "Br", "C#N", "S", "C(F)(F)F", "OC",
];
const RING_TYPES: &[&str] = &["aromatic", "aliphatic", "none"];

struct Molecule {
    smiles: String,
    mol_wt: Option<f64>,
    log_p: Option<f64>,
    tpsa: Option<f64>,
    h_donors: i64,
    h_acceptors: i64,
    ring_type: &'static str,
    label: i64,
}

/// Box-Muller transform for normal distribution
fn gauss(rng: &mut StdRng, mean: f64, std_dev: f64) -> f64 {
    let u1: f64 = rng.random::<f64>().max(1e-15);
    let u2: f64 = rng.random();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std_dev * z
}

fn maybe_missing(rng: &mut StdRng, rate: f64, value: f64) -> Option<f64> {
    if rng.random::<f64>() < rate {
        None
    } else {
        Some((value * 1000.0).round() / 1000.0)
    }
}

fn generate(rng: &mut StdRng, missing_rate: f64) -> Molecule {
    let n_fragments = rng.random_range(2..7);
    let smiles: String = (0..n_fragments)
        .map(|_| FRAGMENTS[rng.random_range(0..FRAGMENTS.len())])
        .collect();

    let ring_type = RING_TYPES[rng.random_range(0..RING_TYPES.len())];
    let mol_wt = gauss(rng, 320.0, 90.0).max(16.0);
    let log_p = gauss(rng, 2.5, 1.6);
    let tpsa = gauss(rng, 75.0, 30.0).max(0.0);
    let h_donors = rng.random_range(0..6);
    let h_acceptors = rng.random_range(0..11);

    // Lipophilic, low-polarity aromatics lean toxic.
    let aromatic = if ring_type == "aromatic" { 0.8 } else { 0.0 };
    let score = 0.9 * (log_p - 2.5) - 0.03 * (tpsa - 75.0) + aromatic + gauss(rng, 0.0, 0.7);
    let label = i64::from(score > 0.4);

    Molecule {
        smiles,
        mol_wt: maybe_missing(rng, missing_rate, mol_wt),
        log_p: maybe_missing(rng, missing_rate, log_p),
        tpsa: maybe_missing(rng, missing_rate, tpsa),
        h_donors,
        h_acceptors,
        ring_type,
        label,
    }
}

const COLUMNS: [&str; 8] = [
    "SMILES",
    "MolWt",
    "LogP",
    "TPSA",
    "NumHDonors",
    "NumHAcceptors",
    "RingType",
    "Label",
];

fn write_csv(path: &Path, molecules: &[Molecule]) -> Result<()> {
    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    writer.write_record(COLUMNS)?;
    let opt = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
    for m in molecules {
        writer.write_record([
            m.smiles.clone(),
            opt(m.mol_wt),
            opt(m.log_p),
            opt(m.tpsa),
            m.h_donors.to_string(),
            m.h_acceptors.to_string(),
            m.ring_type.to_string(),
            m.label.to_string(),
        ])?;
    }
    writer.flush().context("flushing csv")?;
    Ok(())
}

fn write_parquet(path: &Path, molecules: &[Molecule]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new(COLUMNS[0], DataType::Utf8, false),
        Field::new(COLUMNS[1], DataType::Float64, true),
        Field::new(COLUMNS[2], DataType::Float64, true),
        Field::new(COLUMNS[3], DataType::Float64, true),
        Field::new(COLUMNS[4], DataType::Int64, false),
        Field::new(COLUMNS[5], DataType::Int64, false),
        Field::new(COLUMNS[6], DataType::Utf8, false),
        Field::new(COLUMNS[7], DataType::Int64, false),
    ]));

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(molecules.iter().map(|m| m.smiles.as_str()))),
        Arc::new(Float64Array::from_iter(molecules.iter().map(|m| m.mol_wt))),
        Arc::new(Float64Array::from_iter(molecules.iter().map(|m| m.log_p))),
        Arc::new(Float64Array::from_iter(molecules.iter().map(|m| m.tpsa))),
        Arc::new(Int64Array::from_iter_values(molecules.iter().map(|m| m.h_donors))),
        Arc::new(Int64Array::from_iter_values(molecules.iter().map(|m| m.h_acceptors))),
        Arc::new(StringArray::from_iter_values(molecules.iter().map(|m| m.ring_type))),
        Arc::new(Int64Array::from_iter_values(molecules.iter().map(|m| m.label))),
    ];
    let batch = RecordBatch::try_new(schema.clone(), columns).context("building record batch")?;

    let file = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut rng = StdRng::seed_from_u64(args.seed);
    let molecules: Vec<Molecule> = (0..args.rows)
        .map(|_| generate(&mut rng, args.missing_rate))
        .collect();
    let toxic = molecules.iter().filter(|m| m.label == 1).count();

    match args.format {
        OutputFormat::Csv => write_csv(&args.output, &molecules)?,
        OutputFormat::Parquet => write_parquet(&args.output, &molecules)?,
    }

    log::info!(
        "wrote {} molecules ({toxic} labeled toxic) to {}",
        molecules.len(),
        args.output.display()
    );
    Ok(())
}
