//! Streaming conversion of one table: the row driver walks chunked row
//! reads through a [`Framer`], which brackets the value stream with the
//! format's prologue, bundle openers and closers.

use crate::encode;
use crate::error::Error;
use crate::fits::FitsTable;
use crate::format::{self, Framer, Settings};
use crate::schema::{self, Col};
use log::{debug, error, warn};
use rand::rngs::ThreadRng;
use std::io::Write;
use std::path::Path;

/// Position of the current file within the run.
pub struct FilePosition {
    /// 0-based index of this file among the inputs.
    pub file_index: usize,
    /// Total number of input files.
    pub nfiles: usize,
    /// 0-based index of this file within its bundle.
    pub bundle_index: usize,
}

/// State carried across the files of one invocation.
pub struct RunState {
    /// Input column vector recorded for the running concatenation.
    pub schema: Option<Vec<Col>>,
    /// Monotonic serial-id counter; never reset between files.
    pub serial: u32,
    /// Generator for the random-id column.
    pub rng: ThreadRng,
    /// Rows written into the currently open SQL statement.
    pub rows_in_statement: u64,
    /// Set when start-of-file validation had to turn binary mode off; the
    /// whole remaining run stays in text mode.
    pub binary_disabled: bool,
}

impl RunState {
    /// A fresh per-invocation state.
    pub fn new() -> Self {
        Self {
            schema: None,
            serial: 0,
            rng: rand::thread_rng(),
            rows_in_statement: 0,
            binary_disabled: false,
        }
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a file contributed output to the stream.
#[derive(Debug, PartialEq, Eq)]
pub enum FileOutcome {
    /// The file was transcoded (possibly partially, on a read error).
    Written,
    /// The file was skipped and produced no output.
    Skipped,
}

/// Transcodes one open table onto `out`.
///
/// Follows the orchestration rules: the prologue runs for the first file or
/// whenever output is not concatenated, bundle openers at the start of a
/// bundle, and closers at bundle end or at the last concatenated file.
/// A mid-stream read error aborts the file but still honors the closers so
/// no statement is left unterminated.
pub fn convert_file(
    table: &mut FitsTable,
    out: &mut dyn Write,
    out_path: &Path,
    settings: &Settings,
    pos: &FilePosition,
    state: &mut RunState,
) -> Result<FileOutcome, Error> {
    let first_of_output = pos.file_index == 0 || !settings.concat;

    let input_cols = schema::introspect(table, settings)?;
    if !first_of_output {
        if let Some(prev) = &state.schema {
            if !schema::columns_match(prev, &input_cols) {
                warn!("Skipping unmatching table '{}'", table.path().display());
                return Ok(FileOutcome::Skipped);
            }
        }
    }
    // Subsequent reads use this file's descriptors (string widths may
    // legitimately differ under concatenation).
    state.schema = Some(input_cols.clone());

    let mut settings = settings.clone();
    if state.binary_disabled {
        settings.binary = false;
    }

    if first_of_output
        && settings.format.is_sql()
        && settings.binary
        && input_cols.iter().any(Col::is_array)
    {
        warn!("binary mode not supported for array columns, disabling");
        settings.binary = false;
        state.binary_disabled = true;
    }

    let framer = format::framer(settings.format, settings.binary);
    let output_cols = schema::plan_output(&input_cols, &settings);
    let mut buf: Vec<u8> = Vec::new();

    if first_of_output {
        framer.prologue(&mut buf, &output_cols, &settings);
    }

    if !settings.load {
        flush(out, &mut buf, out_path)?;
        return Ok(FileOutcome::Written);
    }

    if pos.bundle_index == 0 {
        framer.bundle_open(&mut buf, &output_cols, &settings);
        state.rows_in_statement = 0;
    }
    flush(out, &mut buf, out_path)?;

    let nrows = table.num_rows();
    let row_bytes = table.row_bytes();
    let chunk = table.optimal_chunk_rows().min(settings.chunk_rows).max(1);
    debug!(
        "converting {} rows of {} bytes in chunks of {}",
        nrows, row_bytes, chunk
    );

    let mut inbuf = vec![0_u8; chunk * row_bytes];
    buf.reserve(chunk * row_bytes * 8);

    let mut row = 0_u64;
    while row < nrows {
        let n = chunk.min((nrows - row) as usize);
        if let Err(err) = table.read_rows(row, n, &mut inbuf) {
            // Abort this file but fall through so the bundle closers run.
            error!("{err}");
            break;
        }

        for r in 0..n {
            let raw = &inbuf[r * row_bytes..(r + 1) * row_bytes];
            write_row(raw, &input_cols, &output_cols, framer, &settings, state, &mut buf);
        }
        flush(out, &mut buf, out_path)?;
        row += n as u64;
    }

    let close_bundle = pos.bundle_index + 1 == settings.bundle_size
        || (settings.concat && pos.file_index + 1 == pos.nfiles);
    if close_bundle {
        framer.bundle_close(&mut buf, &settings);
        state.rows_in_statement = 0;
    }
    flush(out, &mut buf, out_path)?;

    Ok(FileOutcome::Written)
}

/// Emits one row: the framer's row framing around the input columns and
/// the trailing synthetic columns.
fn write_row(
    raw: &[u8],
    input_cols: &[Col],
    output_cols: &[Col],
    framer: &dyn Framer,
    settings: &Settings,
    state: &mut RunState,
    out: &mut Vec<u8>,
) {
    framer.row_begin(out, output_cols, settings, state.rows_in_statement == 0);

    let mut cursor = raw;
    for (k, col) in input_cols.iter().enumerate() {
        if k > 0 {
            framer.value_separator(out, settings);
        }
        cursor = framer.value(cursor, col, settings, out);
    }

    if settings.add_col.is_some() {
        framer.value_separator(out, settings);
        encode::encode_add(out, settings);
    }
    if settings.sid_col.is_some() {
        framer.value_separator(out, settings);
        encode::encode_serial(out, settings, &mut state.serial);
    }
    if settings.rid_col.is_some() {
        framer.value_separator(out, settings);
        encode::encode_random(out, settings, &mut state.rng);
    }

    framer.row_end(out, settings);
    state.rows_in_statement += 1;
}

fn flush(out: &mut dyn Write, buf: &mut Vec<u8>, path: &Path) -> Result<(), Error> {
    out.write_all(buf).map_err(Error::io("write output", path))?;
    out.flush().map_err(Error::io("write output", path))?;
    buf.clear();
    Ok(())
}
