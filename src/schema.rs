//! Table schemas: column descriptors, introspection of the input table,
//! output-column planning (array explosion, synthetic columns) and the
//! per-format type labels.

use crate::error::Error;
use crate::fits::FitsTable;
use crate::format::Settings;
use log::{debug, warn};

/// Longest column name carried through to the output.
const MAX_COLNAME: usize = 31;

/// Element type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColType {
    /// Fixed-width character data (`A`).
    String,
    /// One-byte logical (`L`).
    Logical,
    /// Unsigned byte (`B`).
    Byte,
    /// Signed byte (`B` with `TZERO = -128`).
    SByte,
    /// Signed 16-bit integer (`I`).
    Short,
    /// Unsigned 16-bit integer (`I` with `TZERO = 32768`).
    UShort,
    /// Signed 32-bit integer (`J`).
    Int,
    /// Unsigned 32-bit integer (`J` with `TZERO = 2^31`).
    UInt,
    /// Signed 64-bit integer (`K`).
    LongLong,
    /// Single-precision float (`E`).
    Float,
    /// Double-precision float (`D`).
    Double,
    /// Bit field (`X`) -- recognized but not convertible.
    Bit,
    /// Single-precision complex (`C`) -- recognized but not convertible.
    Complex,
    /// Double-precision complex (`M`) -- recognized but not convertible.
    DblComplex,
}

impl ColType {
    /// Whether the value encoders can produce output for this type.
    pub fn is_supported(self) -> bool {
        !matches!(self, Self::Bit | Self::Complex | Self::DblComplex)
    }

    fn from_code(code: char, tzero: Option<f64>) -> Self {
        match code {
            'A' => Self::String,
            'L' => Self::Logical,
            'B' if tzero == Some(-128.0) => Self::SByte,
            'B' => Self::Byte,
            'I' if tzero == Some(32768.0) => Self::UShort,
            'I' => Self::Short,
            'J' if tzero == Some(2_147_483_648.0) => Self::UInt,
            'J' => Self::Int,
            'K' => Self::LongLong,
            'E' => Self::Float,
            'D' => Self::Double,
            'X' => Self::Bit,
            'C' => Self::Complex,
            _ => Self::DblComplex,
        }
    }
}

/// Descriptor of one column, either introspected from the input table or
/// planned for the output.
#[derive(Debug, Clone, PartialEq)]
pub struct Col {
    /// 1-based column number.
    pub colnum: usize,
    /// Display width for padded (IPAC) output.
    pub dispwidth: usize,
    /// Element type.
    pub ty: ColType,
    /// Bytes per element.
    pub width: usize,
    /// Element count (character count for string columns).
    pub repeat: usize,
    /// Array dimensionality, 1 or 2.
    pub ndim: usize,
    /// Rows of a 2-D array; 1 otherwise.
    pub nrows: usize,
    /// Columns of a 2-D array; `repeat` for 1-D.
    pub ncols: usize,
    /// Column name.
    pub name: String,
    /// Type label under the active output format.
    pub coltype: String,
}

impl Col {
    /// Bytes this column occupies in one table row.
    pub fn data_span(&self) -> usize {
        if self.ty == ColType::Bit {
            self.repeat.div_ceil(8)
        } else {
            self.width * self.repeat
        }
    }

    /// True for non-string columns holding more than one element.
    pub fn is_array(&self) -> bool {
        self.repeat > 1 && self.ty != ColType::String
    }
}

/// Reads the input column vector from an open table (§ schema introspector).
///
/// Missing optional keywords (`TTYPE`, `TDIM`, `TZERO`, `TDISP`) fall back
/// to defaults; a missing or unreadable `TFORM` is a reader error surfaced
/// to the caller.
pub fn introspect(table: &FitsTable, settings: &Settings) -> Result<Vec<Col>, Error> {
    let mut cols = Vec::with_capacity(table.num_cols());

    for i in 1..=table.num_cols() {
        let form = table.col_form(i)?;
        let ty = ColType::from_code(form.code, table.col_zero(i));

        let mut name = table.col_name(i).unwrap_or_default().to_owned();
        name.truncate(MAX_COLNAME);

        let mut dispwidth = table.col_display_width(i, form);
        if ty == ColType::String && settings.quote {
            dispwidth += 2;
        }

        let (mut ndim, mut nrows, mut ncols) = (1, 1, form.repeat);
        if form.repeat > 1 && ty != ColType::String && settings.explode {
            if let Some((rows, columns)) = table.col_dim(i).and_then(parse_shape) {
                (ndim, nrows, ncols) = (2, rows, columns);
            }
        }

        cols.push(Col {
            colnum: i,
            dispwidth,
            ty,
            width: form.elem_bytes(),
            repeat: form.repeat,
            ndim,
            nrows,
            ncols,
            name,
            coltype: String::new(),
        });
    }

    debug!("input columns: {}", cols.len());
    Ok(cols)
}

/// Derives the output column vector from the input vector and settings
/// (§ output-schema planner): optional array explosion, then the synthetic
/// add / serial-id / random-id columns in that order.
pub fn plan_output(input: &[Col], settings: &Settings) -> Vec<Col> {
    let framer = crate::format::framer(settings.format, settings.binary);
    let mut out = Vec::with_capacity(input.len());

    for icol in input {
        let label = framer.type_label(icol, settings);
        if settings.explode && icol.is_array() {
            if icol.ndim > 1 {
                for i in 1..=icol.nrows {
                    for j in 1..=icol.ncols {
                        out.push(exploded_element(icol, format!("{}_{i}_{j}", icol.name), label.clone(), out.len()));
                    }
                }
            } else {
                for k in 1..=icol.repeat {
                    out.push(exploded_element(icol, format!("{}_{k}", icol.name), label.clone(), out.len()));
                }
            }
        } else {
            let mut ocol = icol.clone();
            ocol.colnum = out.len() + 1;
            ocol.coltype = label;
            out.push(ocol);
        }
    }

    if let Some(name) = &settings.add_col {
        out.push(synthetic(name, ColType::Int, "integer", out.len() + 1));
    }
    if let Some(name) = &settings.sid_col {
        // A plain integer rather than `serial`, so bulk loads can run in
        // parallel; the sequence can be attached after ingest.
        out.push(synthetic(name, ColType::Int, "integer", out.len() + 1));
    }
    if let Some(name) = &settings.rid_col {
        out.push(synthetic(name, ColType::Float, "real", out.len() + 1));
    }

    debug!("output columns: {}", out.len());
    out
}

fn exploded_element(icol: &Col, name: String, coltype: String, planned: usize) -> Col {
    Col {
        colnum: planned + 1,
        dispwidth: icol.dispwidth,
        ty: icol.ty,
        width: icol.width,
        repeat: 1,
        ndim: 1,
        nrows: 1,
        ncols: 1,
        name,
        coltype,
    }
}

fn synthetic(name: &str, ty: ColType, label: &str, colnum: usize) -> Col {
    Col {
        colnum,
        dispwidth: 0,
        ty,
        width: 4,
        repeat: 1,
        ndim: 1,
        nrows: 1,
        ncols: 1,
        name: name.to_owned(),
        coltype: label.to_owned(),
    }
}

/// SQL type label; packed array columns get Postgres array notation.
pub fn sql_type(col: &Col, explode: bool) -> String {
    let base = match col.ty {
        ColType::String => {
            if col.repeat > 1 {
                "text"
            } else {
                "char"
            }
        }
        ColType::Logical
        | ColType::Byte
        | ColType::SByte
        | ColType::Short
        | ColType::UShort => "smallint",
        ColType::Int | ColType::UInt => "integer",
        ColType::LongLong => "bigint",
        ColType::Float => "real",
        ColType::Double => "double precision",
        ColType::Bit | ColType::Complex | ColType::DblComplex => {
            warn!("unsupported column type {:?} for '{}'", col.ty, col.name);
            " "
        }
    };

    if !explode && col.is_array() {
        format!("{base}[{}]", col.repeat)
    } else {
        base.to_owned()
    }
}

/// Columnar-text (IPAC) type label.
pub fn ipac_type(col: &Col) -> &'static str {
    match col.ty {
        ColType::String => "char",
        ColType::Logical
        | ColType::Byte
        | ColType::SByte
        | ColType::Short
        | ColType::UShort
        | ColType::Int
        | ColType::UInt
        | ColType::LongLong => "int",
        ColType::Float => "real",
        ColType::Double => "double",
        ColType::Bit | ColType::Complex | ColType::DblComplex => " ",
    }
}

/// Compares a freshly introspected column vector against the one recorded
/// for the running concatenation (§ schema-equality check). String columns
/// may differ in declared length.
pub fn columns_match(prev: &[Col], fresh: &[Col]) -> bool {
    prev.len() == fresh.len()
        && prev.iter().zip(fresh).all(|(a, b)| {
            a.name == b.name
                && a.ty == b.ty
                && a.ndim == b.ndim
                && a.nrows == b.nrows
                && (a.ty == ColType::String || (a.ncols == b.ncols && a.repeat == b.repeat))
        })
}

/// Parses a `TDIMn` shape string of the form `(rows,cols)`. Anything else
/// (including 1-D shapes) falls back to the flat default.
fn parse_shape(dim: &str) -> Option<(usize, usize)> {
    let inner = dim.trim().strip_prefix('(')?.strip_suffix(')')?;
    let (rows, cols) = inner.split_once(',')?;
    Some((rows.trim().parse().ok()?, cols.trim().parse().ok()?))
}
