use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use specmatch_library::{
    FilterState, ParamValue, SpectralLibrary, SpectrumContainer, StorageOptions,
    WavelengthLimits,
};

#[derive(Parser)]
#[command(name = "specmatch-library")]
#[command(about = "Inspect and rewrite stellar spectral libraries", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct LibraryFiles {
    /// Parameter table (Parquet)
    params: PathBuf,

    /// Spectrum container (Parquet)
    spectra: PathBuf,

    /// Only load wavelengths strictly between LO and HI
    #[arg(long, num_args = 2, value_names = ["LO", "HI"])]
    wavlim: Option<Vec<f64>>,
}

impl LibraryFiles {
    fn load(&self) -> Result<SpectralLibrary> {
        let limits = match self.wavlim.as_deref() {
            None => None,
            Some([lo, hi]) => Some(WavelengthLimits::new(*lo, *hi)),
            Some(other) => bail!("--wavlim takes two values, got {}", other.len()),
        };
        SpectralLibrary::load(&self.params, &self.spectra, limits).with_context(|| {
            format!(
                "loading library from {} and {}",
                self.params.display(),
                self.spectra.display()
            )
        })
    }
}

#[derive(Subcommand)]
enum Command {
    /// Print the header, entry count and wavelength range
    Info {
        #[command(flatten)]
        files: LibraryFiles,
    },
    /// Print the parameters and flux summary of one entry
    Show {
        #[command(flatten)]
        files: LibraryFiles,

        /// Library index
        index: usize,
    },
    /// List library indices whose parameters match every COL=VALUE
    Query {
        #[command(flatten)]
        files: LibraryFiles,

        /// Column/value constraint, may be repeated
        #[arg(long = "where", value_name = "COL=VALUE", required = true)]
        constraints: Vec<String>,
    },
    /// Rewrite a library, optionally cut to a wavelength window
    Convert {
        #[command(flatten)]
        files: LibraryFiles,

        /// Output parameter table
        out_params: PathBuf,

        /// Output spectrum container
        out_spectra: PathBuf,

        /// Storage options as JSON
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Command::Info { files } => {
            let lib = files.load()?;
            print!("{lib}");
            println!("entries: {}", lib.length());
            let wav = lib.wav().to_vec();
            match (wav.first(), wav.last()) {
                (Some(first), Some(last)) => {
                    println!("wavelengths: {} samples, {first} – {last}", wav.len())
                }
                _ => println!("wavelengths: none"),
            }
        }
        Command::Show { files, index } => {
            let lib = files.load()?;
            let entry = lib.get(index)?;
            for (name, value) in &entry.params.fields {
                println!("{name}: {value}");
            }
            let flux = entry.flux();
            println!(
                "flux: {} samples, mean {:.4}",
                flux.len(),
                flux.mean().unwrap_or(f64::NAN)
            );
        }
        Command::Query { files, constraints } => {
            let lib = files.load()?;
            let filters = parse_constraints(&constraints)?;
            for index in lib.select(&filters) {
                println!("{index}");
            }
        }
        Command::Convert {
            files,
            out_params,
            out_spectra,
            config,
        } => {
            let lib = files.load()?;
            let options = match config {
                Some(path) => StorageOptions::from_json_file(&path)
                    .with_context(|| format!("reading storage options from {}", path.display()))?,
                None => StorageOptions::default(),
            };
            lib.save_with(&options, &out_params, &out_spectra)
                .context("saving converted library")?;
            log::info!(
                "Wrote {} spectra to {} and {}",
                lib.length(),
                out_params.display(),
                out_spectra.display()
            );
        }
    }
    Ok(())
}

/// Turn `COL=VALUE` strings into a filter. Numbers also match numeric
/// cells (whole numbers both integer and float ones); repeated columns
/// select several values.
fn parse_constraints(constraints: &[String]) -> Result<FilterState> {
    let mut filters = FilterState::new();
    for c in constraints {
        let Some((column, raw)) = c.split_once('=') else {
            bail!("constraint '{c}' is not of the form COL=VALUE");
        };
        let selected = filters.entry(column.to_string()).or_default();
        if let Ok(i) = raw.parse::<i64>() {
            selected.insert(ParamValue::Integer(i));
            selected.insert(ParamValue::Float(i as f64));
        } else if let Ok(f) = raw.parse::<f64>() {
            selected.insert(ParamValue::Float(f));
        }
        selected.insert(ParamValue::String(raw.to_string()));
    }
    Ok(filters)
}
