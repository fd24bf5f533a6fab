//! Output formats, the run settings record, and the per-format framers.
//!
//! Each output format is one concrete [`Framer`] implementation. The
//! framing methods (`prologue`, `bundle_open`, `row_begin`, `row_end`,
//! `bundle_close`) bracket the value stream, `value` encodes one column
//! under the format's dialect, and `type_label` names column types for
//! headers and DDL. The row driver holds a `&dyn Framer` and never needs
//! to know which format is active.

use crate::encode::{self, TextStyle};
use crate::schema::{self, Col};
use std::io::Write;

/// Signature opening a Postgres binary `COPY` stream: `PGCOPY\n\xFF\r\n\0`.
pub const PGCOPY_SIGNATURE: [u8; 11] = *b"PGCOPY\n\xff\r\n\0";

/// End-of-stream marker of a Postgres binary `COPY`: a big-endian `-1`.
pub const PGCOPY_TRAILER: [u8; 2] = (-1_i16).to_be_bytes();

/// The tabular output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Single-character-separated text (ASV/BSV/CSV/TSV).
    Delimited,
    /// IPAC fixed-width columnar text.
    Ipac,
    /// Postgres SQL script (`COPY ... from stdin`), text or binary.
    Postgres,
    /// MySQL SQL script (multi-row `INSERT`).
    MySql,
    /// SQLite SQL script (multi-row `INSERT`).
    Sqlite,
}

impl OutputFormat {
    /// Whether this format produces an SQL script with bundle framing.
    pub fn is_sql(self) -> bool {
        matches!(self, Self::Postgres | Self::MySql | Self::Sqlite)
    }

    /// File extension used when deriving output names.
    pub fn extension(self, delimiter: u8) -> &'static str {
        match self {
            Self::Delimited => match delimiter {
                b' ' => "asv",
                b'|' => "bsv",
                b'\t' => "tsv",
                _ => "csv",
            },
            Self::Ipac => "ipac",
            Self::Postgres | Self::MySql | Self::Sqlite => "sql",
        }
    }
}

/// Run configuration, fixed once the command line is parsed. The one
/// exception is `binary`, which start-of-file validation may clear when the
/// table carries array columns.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Active output format.
    pub format: OutputFormat,
    /// Postgres binary `COPY` output.
    pub binary: bool,
    /// Value separator for text output.
    pub delimiter: u8,
    /// Quote character for strings and delimited array wrapping.
    pub quote_char: u8,
    /// Emit the delimited header row.
    pub header: bool,
    /// Strip leading/trailing spaces from string values.
    pub strip: bool,
    /// Enclose string values in the quote character.
    pub quote: bool,
    /// Quote strings and double embedded quote characters.
    pub escape: bool,
    /// Rewrite array columns into per-element scalar columns.
    pub explode: bool,
    /// Append all inputs to one output.
    pub concat: bool,
    /// One self-contained `INSERT` statement per row (MySQL/SQLite).
    pub single: bool,
    /// Input files sharing one SQL statement.
    pub bundle_size: usize,
    /// Requested rows per I/O chunk.
    pub chunk_rows: usize,
    /// Emit `DROP TABLE` before `CREATE`.
    pub drop: bool,
    /// Emit `CREATE TABLE`.
    pub create: bool,
    /// Emit `TRUNCATE TABLE`.
    pub truncate: bool,
    /// Create the Postgres table `WITH OIDS`.
    pub oids: bool,
    /// Emit row data (cleared by `--noload`).
    pub load: bool,
    /// Target table name.
    pub table_name: String,
    /// Database to create and use (MySQL).
    pub db_name: Option<String>,
    /// Name of the constant add-column.
    pub add_col: Option<String>,
    /// Name of the monotonic serial-id column.
    pub sid_col: Option<String>,
    /// Name of the uniform random-id column.
    pub rid_col: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            format: OutputFormat::Delimited,
            binary: false,
            delimiter: b',',
            quote_char: b'"',
            header: true,
            strip: true,
            quote: true,
            escape: false,
            explode: false,
            concat: false,
            single: false,
            bundle_size: 1,
            chunk_rows: 10000,
            drop: false,
            create: false,
            truncate: false,
            oids: false,
            load: true,
            table_name: "tab".to_owned(),
            db_name: None,
            add_col: None,
            sid_col: None,
            rid_col: None,
        }
    }
}

/// Wrapper of the output stream which frames rows and serializes values
/// according to the rules of one output format.
pub trait Framer {
    /// Writes the format prologue: header rows or the DDL preamble.
    fn prologue(&self, out: &mut Vec<u8>, cols: &[Col], settings: &Settings);

    /// Type label of a column under this format.
    fn type_label(&self, col: &Col, settings: &Settings) -> String;

    /// Opens a bundle of row payloads (the `COPY`/`INSERT` statement head).
    fn bundle_open(&self, _out: &mut Vec<u8>, _cols: &[Col], _settings: &Settings) {}

    /// Writes the framing before a row's values.
    fn row_begin(
        &self,
        _out: &mut Vec<u8>,
        _cols: &[Col],
        _settings: &Settings,
        _first_in_statement: bool,
    ) {
    }

    /// Encodes one column value, returning the advanced row cursor.
    fn value<'a>(
        &self,
        data: &'a [u8],
        col: &Col,
        settings: &Settings,
        out: &mut Vec<u8>,
    ) -> &'a [u8];

    /// Writes the separator between two values of a row.
    fn value_separator(&self, out: &mut Vec<u8>, settings: &Settings) {
        out.push(settings.delimiter);
    }

    /// Writes the framing after a row's values.
    fn row_end(&self, _out: &mut Vec<u8>, _settings: &Settings) {}

    /// Closes a bundle: `\.`, the binary end-of-stream marker, or the
    /// terminating `;` of an `INSERT`.
    fn bundle_close(&self, _out: &mut Vec<u8>, _settings: &Settings) {}
}

/// Selects the framer for the given format; binary Postgres is its own
/// implementation.
pub fn framer(format: OutputFormat, binary: bool) -> &'static dyn Framer {
    match (format, binary) {
        (OutputFormat::Delimited, _) => &DelimitedText,
        (OutputFormat::Ipac, _) => &IpacTable,
        (OutputFormat::Postgres, false) => &PostgresText,
        (OutputFormat::Postgres, true) => &PostgresBinary,
        (OutputFormat::MySql, _) => &MySqlScript,
        (OutputFormat::Sqlite, _) => &SqliteScript,
    }
}

/// Delimited text: optional comma-joined header, newline-terminated rows.
pub struct DelimitedText;

const DELIMITED_STYLE: TextStyle = TextStyle {
    pad: false,
    nan: None,
    infinity: None,
    quoted_array_wrap: true,
};

impl Framer for DelimitedText {
    fn prologue(&self, out: &mut Vec<u8>, cols: &[Col], settings: &Settings) {
        if settings.header {
            // Always a comma, independent of the value delimiter.
            push_name_list(out, cols);
            out.push(b'\n');
        }
    }

    fn type_label(&self, _col: &Col, _settings: &Settings) -> String {
        String::new()
    }

    fn value<'a>(
        &self,
        data: &'a [u8],
        col: &Col,
        settings: &Settings,
        out: &mut Vec<u8>,
    ) -> &'a [u8] {
        encode::text_value(data, col, settings, &DELIMITED_STYLE, out)
    }

    fn row_end(&self, out: &mut Vec<u8>, _settings: &Settings) {
        out.push(b'\n');
    }
}

/// IPAC columnar text: `|`-bracketed banner rows, values padded to each
/// column's display width.
pub struct IpacTable;

const IPAC_STYLE: TextStyle = TextStyle {
    pad: true,
    nan: None,
    infinity: None,
    quoted_array_wrap: false,
};

impl Framer for IpacTable {
    fn prologue(&self, out: &mut Vec<u8>, cols: &[Col], _settings: &Settings) {
        // Names stay comma-separated inside the brackets; the type banner
        // is bar-separated.
        out.push(b'|');
        for (k, col) in cols.iter().enumerate() {
            if k > 0 {
                out.push(b',');
            }
            let _ = write!(out, "{:<width$}", col.name, width = col.dispwidth);
        }
        out.extend_from_slice(b"|\n");

        out.push(b'|');
        for col in cols {
            let _ = write!(out, "{:<width$}|", col.coltype, width = col.dispwidth);
        }
        out.push(b'\n');
    }

    fn type_label(&self, col: &Col, _settings: &Settings) -> String {
        schema::ipac_type(col).to_owned()
    }

    fn row_begin(
        &self,
        out: &mut Vec<u8>,
        _cols: &[Col],
        _settings: &Settings,
        _first_in_statement: bool,
    ) {
        out.push(b'|');
    }

    fn value<'a>(
        &self,
        data: &'a [u8],
        col: &Col,
        settings: &Settings,
        out: &mut Vec<u8>,
    ) -> &'a [u8] {
        encode::text_value(data, col, settings, &IPAC_STYLE, out)
    }

    fn row_end(&self, out: &mut Vec<u8>, _settings: &Settings) {
        out.extend_from_slice(b"|\n");
    }
}

/// Postgres text `COPY`: DDL preamble, `COPY ... from stdin;`, tab-ish
/// rows, `\.` terminator.
pub struct PostgresText;

const POSTGRES_STYLE: TextStyle = TextStyle {
    pad: false,
    nan: Some("NaN"),
    infinity: Some(("Infinity", "-Infinity")),
    quoted_array_wrap: false,
};

impl Framer for PostgresText {
    fn prologue(&self, out: &mut Vec<u8>, cols: &[Col], settings: &Settings) {
        push_ddl(out, cols, settings, settings.oids);
    }

    fn type_label(&self, col: &Col, settings: &Settings) -> String {
        schema::sql_type(col, settings.explode)
    }

    fn bundle_open(&self, out: &mut Vec<u8>, cols: &[Col], settings: &Settings) {
        let _ = write!(out, "COPY {} (", settings.table_name);
        push_name_list(out, cols);
        out.extend_from_slice(b"\n) from stdin;\n");
    }

    fn value<'a>(
        &self,
        data: &'a [u8],
        col: &Col,
        settings: &Settings,
        out: &mut Vec<u8>,
    ) -> &'a [u8] {
        encode::text_value(data, col, settings, &POSTGRES_STYLE, out)
    }

    fn row_end(&self, out: &mut Vec<u8>, _settings: &Settings) {
        out.push(b'\n');
    }

    fn bundle_close(&self, out: &mut Vec<u8>, _settings: &Settings) {
        out.extend_from_slice(b"\\.\n");
    }
}

/// Postgres binary `COPY`: signature and zeroed header, a 16-bit field
/// count per row, length-prefixed big-endian fields, `-1` trailer.
pub struct PostgresBinary;

impl Framer for PostgresBinary {
    fn prologue(&self, out: &mut Vec<u8>, cols: &[Col], settings: &Settings) {
        push_ddl(out, cols, settings, settings.oids);
    }

    fn type_label(&self, col: &Col, settings: &Settings) -> String {
        schema::sql_type(col, settings.explode)
    }

    fn bundle_open(&self, out: &mut Vec<u8>, _cols: &[Col], settings: &Settings) {
        let _ = write!(out, "COPY {} FROM stdin WITH BINARY;\n", settings.table_name);
        out.extend_from_slice(&PGCOPY_SIGNATURE);
        out.extend_from_slice(&0_u32.to_be_bytes()); // flags
        out.extend_from_slice(&0_u32.to_be_bytes()); // header-extension length
    }

    fn row_begin(
        &self,
        out: &mut Vec<u8>,
        cols: &[Col],
        _settings: &Settings,
        _first_in_statement: bool,
    ) {
        out.extend_from_slice(&(cols.len() as i16).to_be_bytes());
    }

    fn value<'a>(
        &self,
        data: &'a [u8],
        col: &Col,
        settings: &Settings,
        out: &mut Vec<u8>,
    ) -> &'a [u8] {
        encode::binary_value(data, col, settings, out)
    }

    fn value_separator(&self, _out: &mut Vec<u8>, _settings: &Settings) {
        // Length-prefixed fields abut.
    }

    fn bundle_close(&self, out: &mut Vec<u8>, _settings: &Settings) {
        out.extend_from_slice(&PGCOPY_TRAILER);
    }
}

const INSERT_STYLE: TextStyle = TextStyle {
    pad: false,
    nan: Some("'NaN'"),
    infinity: Some(("'Infinity'", "'-Infinity'")),
    quoted_array_wrap: false,
};

/// MySQL script: multi-row `INSERT ... VALUES` statements, with an
/// optional `CREATE DATABASE`/`USE` preamble.
pub struct MySqlScript;

impl Framer for MySqlScript {
    fn prologue(&self, out: &mut Vec<u8>, cols: &[Col], settings: &Settings) {
        if settings.create {
            if let Some(db) = &settings.db_name {
                let _ = write!(out, "CREATE DATABASE IF NOT EXISTS {db};\nUSE {db};\n");
            }
        }
        push_ddl(out, cols, settings, false);
    }

    fn type_label(&self, col: &Col, settings: &Settings) -> String {
        schema::sql_type(col, settings.explode)
    }

    fn bundle_open(&self, out: &mut Vec<u8>, cols: &[Col], settings: &Settings) {
        push_insert_open(out, cols, settings);
    }

    fn row_begin(
        &self,
        out: &mut Vec<u8>,
        cols: &[Col],
        settings: &Settings,
        first_in_statement: bool,
    ) {
        push_insert_row_begin(out, cols, settings, first_in_statement);
    }

    fn value<'a>(
        &self,
        data: &'a [u8],
        col: &Col,
        settings: &Settings,
        out: &mut Vec<u8>,
    ) -> &'a [u8] {
        encode::text_value(data, col, settings, &INSERT_STYLE, out)
    }

    fn row_end(&self, out: &mut Vec<u8>, settings: &Settings) {
        push_insert_row_end(out, settings);
    }

    fn bundle_close(&self, out: &mut Vec<u8>, settings: &Settings) {
        push_insert_close(out, settings);
    }
}

/// SQLite script: multi-row `INSERT ... VALUES` statements.
pub struct SqliteScript;

impl Framer for SqliteScript {
    fn prologue(&self, out: &mut Vec<u8>, cols: &[Col], settings: &Settings) {
        push_ddl(out, cols, settings, false);
    }

    fn type_label(&self, col: &Col, settings: &Settings) -> String {
        schema::sql_type(col, settings.explode)
    }

    fn bundle_open(&self, out: &mut Vec<u8>, cols: &[Col], settings: &Settings) {
        push_insert_open(out, cols, settings);
    }

    fn row_begin(
        &self,
        out: &mut Vec<u8>,
        cols: &[Col],
        settings: &Settings,
        first_in_statement: bool,
    ) {
        push_insert_row_begin(out, cols, settings, first_in_statement);
    }

    fn value<'a>(
        &self,
        data: &'a [u8],
        col: &Col,
        settings: &Settings,
        out: &mut Vec<u8>,
    ) -> &'a [u8] {
        encode::text_value(data, col, settings, &INSERT_STYLE, out)
    }

    fn row_end(&self, out: &mut Vec<u8>, settings: &Settings) {
        push_insert_row_end(out, settings);
    }

    fn bundle_close(&self, out: &mut Vec<u8>, settings: &Settings) {
        push_insert_close(out, settings);
    }
}

fn push_name_list(out: &mut Vec<u8>, cols: &[Col]) {
    for (k, col) in cols.iter().enumerate() {
        if k > 0 {
            out.push(b',');
        }
        out.extend_from_slice(col.name.as_bytes());
    }
}

/// DDL preamble shared by the SQL framers: optional `DROP`, `CREATE TABLE`
/// with one `name<TAB>type` line per column, optional `TRUNCATE`.
fn push_ddl(out: &mut Vec<u8>, cols: &[Col], settings: &Settings, with_oids: bool) {
    let table = &settings.table_name;

    if settings.create {
        if settings.drop {
            let _ = write!(out, "DROP TABLE IF EXISTS {table} CASCADE;\n");
        }
        let _ = write!(out, "CREATE TABLE IF NOT EXISTS {table} (\n");
        for (k, col) in cols.iter().enumerate() {
            if k > 0 {
                out.extend_from_slice(b",\n");
            }
            let _ = write!(out, "    {}\t{}", col.name, col.coltype);
        }
        if with_oids {
            out.extend_from_slice(b"\n) WITH OIDS;\n\n");
        } else {
            out.extend_from_slice(b"\n);\n\n");
        }
    }

    if settings.truncate {
        let _ = write!(out, "TRUNCATE TABLE {table};\n");
    }
}

fn push_insert_open(out: &mut Vec<u8>, cols: &[Col], settings: &Settings) {
    if settings.single {
        return;
    }
    let _ = write!(out, "INSERT INTO {} (", settings.table_name);
    push_name_list(out, cols);
    out.extend_from_slice(b"\n) VALUES\n");
}

fn push_insert_row_begin(
    out: &mut Vec<u8>,
    cols: &[Col],
    settings: &Settings,
    first_in_statement: bool,
) {
    if settings.single {
        let _ = write!(out, "INSERT INTO {} (", settings.table_name);
        push_name_list(out, cols);
        out.extend_from_slice(b") VALUES ");
    } else if !first_in_statement {
        out.push(b',');
    }
    out.push(b'(');
}

fn push_insert_row_end(out: &mut Vec<u8>, settings: &Settings) {
    out.push(b')');
    if settings.single {
        out.extend_from_slice(b";\n");
    }
}

fn push_insert_close(out: &mut Vec<u8>, settings: &Settings) {
    if !settings.single {
        out.extend_from_slice(b";\n");
    }
}
