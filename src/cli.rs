//! Command-line interface and cross-file orchestration.

use crate::convert::{self, FileOutcome, FilePosition, RunState};
use crate::error::Error;
use crate::fits::{self, FitsTable};
use crate::format::{OutputFormat, Settings};
use clap::Parser;
use log::{debug, warn};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Convert FITS binary tables to delimited text, IPAC tables or SQL
/// database loads.
#[derive(Parser, Debug)]
#[command(name = "fits2db", version)]
pub struct Args {
    /// Bundle N input files per SQL statement
    #[arg(short = 'b', long, value_name = "N", default_value_t = 1)]
    pub bundle: usize,

    /// Process N table rows at a time
    #[arg(short = 'c', long, value_name = "N", default_value_t = 10000)]
    pub chunk: usize,

    /// Process the table in FITS extension number N
    #[arg(short = 'e', long, value_name = "N")]
    pub extnum: Option<usize>,

    /// Process the table in the FITS extension named NAME
    #[arg(short = 'E', long, value_name = "NAME")]
    pub extname: Option<String>,

    /// Input file (alternative to positional arguments)
    #[arg(short = 'i', long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Output file, or '-' for standard output
    #[arg(short = 'o', long, value_name = "FILE")]
    pub output: Option<String>,

    /// Select rows based on EXPR (passed through as a filename modifier)
    #[arg(short = 's', long, value_name = "EXPR")]
    pub select: Option<String>,

    /// Name of the database table
    #[arg(short = 't', long, value_name = "NAME")]
    pub table: Option<String>,

    /// Create a database of the given name (MySQL)
    #[arg(long, value_name = "NAME")]
    pub dbname: Option<String>,

    /// Concatenate all input files to one output
    #[arg(short = 'C', long)]
    pub concat: bool,

    /// Suppress the column header row
    #[arg(short = 'H', long)]
    pub noheader: bool,

    /// Don't strip strings of leading/trailing whitespace
    #[arg(short = 'N', long)]
    pub nostrip: bool,

    /// Don't quote strings in text formats
    #[arg(short = 'Q', long)]
    pub noquote: bool,

    /// Use single quotes for strings
    #[arg(short = 'S', long)]
    pub singlequote: bool,

    /// Quote strings, doubling embedded quote characters
    #[arg(long)]
    pub escape: bool,

    /// Explode array columns into separate scalar columns
    #[arg(short = 'X', long)]
    pub explode: bool,

    /// Output Postgres binary COPY (forces --bundle=1)
    #[arg(short = 'B', long)]
    pub binary: bool,

    /// Emit one self-contained INSERT statement per row (MySQL/SQLite)
    #[arg(long)]
    pub single: bool,

    /// Output a space-separated value table
    #[arg(long)]
    pub asv: bool,

    /// Output a bar-separated value table
    #[arg(long)]
    pub bsv: bool,

    /// Output a comma-separated value table
    #[arg(long)]
    pub csv: bool,

    /// Output a tab-separated value table
    #[arg(long)]
    pub tsv: bool,

    /// Output an IPAC formatted table
    #[arg(long)]
    pub ipac: bool,

    /// Output SQL for the given dialect: postgres, mysql or sqlite
    #[arg(long, value_name = "DIALECT")]
    pub sql: Option<String>,

    /// Create the database table from the input table structure
    #[arg(long)]
    pub create: bool,

    /// Drop any existing table first (implies --create)
    #[arg(long)]
    pub drop: bool,

    /// Truncate the table before loading
    #[arg(long)]
    pub truncate: bool,

    /// Emit DDL only, no table load commands
    #[arg(short = 'Z', long)]
    pub noload: bool,

    /// Create the table WITH OIDS (Postgres only)
    #[arg(short = 'O', long)]
    pub oids: bool,

    /// Add a constant integer column of the given name
    #[arg(long, value_name = "COL")]
    pub add: Option<String>,

    /// Add a sequential-id integer column of the given name
    #[arg(long, value_name = "COL")]
    pub sid: Option<String>,

    /// Add a random-id real column of the given name (0.0 -> 100.0)
    #[arg(long, value_name = "COL")]
    pub rid: Option<String>,

    /// Verbose diagnostics
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Input FITS files
    #[arg(value_name = "FILE")]
    pub files: Vec<PathBuf>,
}

/// Runs a full conversion described by the parsed arguments.
///
/// Configuration errors are returned; per-file problems (unreadable or
/// non-FITS inputs, schema mismatches under concatenation, mid-read
/// failures) are logged and the remaining files are still attempted.
pub fn run(args: Args) -> Result<(), Error> {
    let mut settings = build_settings(&args)?;

    let mut files = args.files.clone();
    if files.is_empty() {
        files.extend(args.input.clone());
    }
    if files.is_empty() {
        return Err(Error::NoInputFiles);
    }

    settings.table_name = match &args.table {
        Some(name) => name.clone(),
        None => table_name_from(&files[0]),
    };

    let nfiles = files.len();
    let mut state = RunState::new();
    let mut bundle_index = 0_usize;

    for (i, file) in files.iter().enumerate() {
        if !file.exists() {
            warn!("Cannot access file '{}'", file.display());
            continue;
        }
        if !(fits::is_fits_file(file) || fits::is_gzip_file(file)) {
            warn!("Skipping non-FITS file '{}'", file.display());
            continue;
        }

        let spec = input_spec(file, &args);
        debug!("processing '{spec}'");
        let mut table = match FitsTable::open(&spec) {
            Ok(table) => table,
            Err(err) => {
                warn!("Skipping '{}': {err}", file.display());
                continue;
            }
        };

        let (out_path, append) = output_target(&args, &settings, i, nfiles, file);
        let mut out = open_output(&out_path, append)?;

        let pos = FilePosition {
            file_index: i,
            nfiles,
            bundle_index,
        };
        match convert::convert_file(&mut table, &mut *out, &out_path, &settings, &pos, &mut state) {
            Ok(FileOutcome::Written) => {
                bundle_index = (bundle_index + 1) % settings.bundle_size;
            }
            Ok(FileOutcome::Skipped) => {}
            Err(err) => warn!("failed to convert '{}': {err}", file.display()),
        }
    }

    Ok(())
}

/// Builds the immutable run settings from the command line.
fn build_settings(args: &Args) -> Result<Settings, Error> {
    if args.extnum.is_some() && args.extname.is_some() {
        return Err(Error::ExtensionSelectConflict);
    }

    let mut settings = Settings::default();
    settings.bundle_size = args.bundle.max(1);
    settings.chunk_rows = args.chunk.max(1);

    if args.asv {
        settings.delimiter = b' ';
    }
    if args.bsv {
        settings.delimiter = b'|';
    }
    if args.csv {
        settings.delimiter = b',';
    }
    if args.tsv {
        settings.delimiter = b'\t';
    }
    if args.ipac {
        settings.format = OutputFormat::Ipac;
        settings.delimiter = b'|';
    }
    if let Some(dialect) = &args.sql {
        match dialect.as_str() {
            "postgres" => {
                settings.format = OutputFormat::Postgres;
                settings.delimiter = b'\t';
                settings.quote = false;
            }
            "mysql" => {
                settings.format = OutputFormat::MySql;
                settings.delimiter = b',';
                settings.quote = true;
                settings.quote_char = b'"';
            }
            "sqlite" => {
                settings.format = OutputFormat::Sqlite;
            }
            other => return Err(Error::UnknownDialect(other.to_owned())),
        }
    }

    if args.noheader {
        settings.header = false;
    }
    if args.nostrip {
        settings.strip = false;
    }
    if args.noquote {
        settings.quote = false;
    }
    if args.singlequote {
        settings.quote_char = b'\'';
    }
    settings.escape = args.escape;
    settings.explode = args.explode;
    settings.concat = args.concat;
    // Only the INSERT-script framers consult `single`; COPY and the text
    // formats ignore it.
    settings.single = args.single;
    settings.create = args.create || args.drop;
    settings.drop = args.drop;
    settings.truncate = args.truncate;
    settings.oids = args.oids;
    settings.load = !args.noload;
    settings.db_name = args.dbname.clone();
    settings.add_col = args.add.clone();
    settings.sid_col = args.sid.clone();
    settings.rid_col = args.rid.clone();

    settings.binary = args.binary;
    if settings.binary {
        if settings.format != OutputFormat::Postgres {
            return Err(Error::BinaryRequiresPostgres);
        }
        settings.bundle_size = 1;
    }

    Ok(settings)
}

/// Appends the extension and row-selection filename modifiers to the path.
fn input_spec(file: &Path, args: &Args) -> String {
    let mut spec = file.display().to_string();
    if let Some(n) = args.extnum {
        spec.push_str(&format!("[{n}]"));
    }
    if let Some(name) = &args.extname {
        spec.push_str(&format!("[{name}]"));
    }
    if let Some(expr) = &args.select {
        spec.push_str(&format!("[{expr}]"));
    }
    spec
}

/// Derives the output path and append mode for the i-th input file.
///
/// Single-file and concatenated runs write to `--output` (or stdout);
/// multi-file runs derive one output per input, either `BASE<i>.<ext>`
/// from `--output` or the input name with its extension replaced.
fn output_target(
    args: &Args,
    settings: &Settings,
    index: usize,
    nfiles: usize,
    input: &Path,
) -> (PathBuf, bool) {
    if nfiles == 1 || settings.concat {
        let path = match &args.output {
            Some(name) if name != "-" => PathBuf::from(name),
            _ => PathBuf::from("-"),
        };
        (path, settings.concat && index > 0)
    } else {
        let ext = settings.format.extension(settings.delimiter);
        let path = match &args.output {
            Some(base) => {
                let digits = nfiles.to_string().len();
                PathBuf::from(format!("{base}{index:0digits$}.{ext}"))
            }
            None => input.with_extension(ext),
        };
        (path, false)
    }
}

fn open_output(path: &Path, append: bool) -> Result<Box<dyn Write>, Error> {
    if path == Path::new("-") {
        return Ok(Box::new(io::stdout()));
    }
    let file = if append {
        std::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
    } else {
        File::create(path)
    }
    .map_err(Error::io("open output", path))?;
    Ok(Box::new(file))
}

/// Derives a table name from an input file name: the stem up to the first
/// dot, with dashes mapped to underscores.
fn table_name_from(path: &Path) -> String {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .split('.')
        .next()
        .unwrap_or_default()
        .replace('-', "_");
    if name.is_empty() {
        "tab".to_owned()
    } else {
        name
    }
}
