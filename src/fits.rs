//! Reader for FITS binary table extensions.
//!
//! This module provides exactly the surface the converter needs from the
//! source format: header keyword lookup, per-column metadata, raw row-byte
//! reads and an optimal chunk-size advice. Plain and gzip-compressed files
//! are handled; the selected HDU must be a `BINTABLE` extension.
//!
//! A FITS file is a sequence of HDUs, each a header of 2880-byte blocks
//! (36 cards of 80 ASCII characters, terminated by `END`) followed by a
//! data area padded to the next 2880-byte boundary. Binary tables store
//! one fixed-width record per row, all multi-byte values big-endian.

use crate::error::Error;
use flate2::read::GzDecoder;
use log::debug;
use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Size of a FITS header or data block.
const BLOCK: usize = 2880;
/// Size of one header card.
const CARD: usize = 80;
/// Upper bound on header blocks per HDU, as a guard against corrupt files.
const MAX_HEADER_BLOCKS: usize = 5000;
/// Target byte volume of one chunked read.
const CHUNK_TARGET_BYTES: usize = 1 << 20;

/// Which HDU of the file holds the table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExtSelect {
    /// The first extension (HDU 1), the default.
    #[default]
    First,
    /// An explicit HDU number; 0 is the primary array.
    Number(usize),
    /// The extension whose `EXTNAME` matches (case-insensitive).
    Name(String),
}

/// A parsed `TFORMn` value: element count and type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TForm {
    /// Element count (character count for `A` columns).
    pub repeat: usize,
    /// Single-letter FITS type code (`A L X B I J K E D C M`).
    pub code: char,
}

impl TForm {
    /// Bytes per element of this type code.
    pub fn elem_bytes(self) -> usize {
        match self.code {
            'A' | 'L' | 'B' | 'X' => 1,
            'I' => 2,
            'J' | 'E' => 4,
            'K' | 'D' | 'C' => 8,
            'M' => 16,
            _ => 0,
        }
    }

    /// Total bytes this column occupies in a row. Bit columns are packed
    /// eight to a byte.
    pub fn span(self) -> usize {
        if self.code == 'X' {
            self.repeat.div_ceil(8)
        } else {
            self.repeat * self.elem_bytes()
        }
    }
}

#[derive(Debug)]
enum Source {
    File(File),
    Mem(Cursor<Vec<u8>>),
}

impl Source {
    fn seek_to(&mut self, pos: u64, path: &Path) -> Result<(), Error> {
        let res = match self {
            Self::File(f) => f.seek(SeekFrom::Start(pos)).map(drop),
            Self::Mem(c) => c.seek(SeekFrom::Start(pos)).map(drop),
        };
        res.map_err(Error::io("seek in", path))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        match self {
            Self::File(f) => f.read_exact(buf),
            Self::Mem(c) => c.read_exact(buf),
        }
    }
}

/// Parsed header of one HDU: keyword cards in file order.
#[derive(Debug, Default)]
struct Header {
    cards: Vec<(String, String)>,
}

impl Header {
    fn get(&self, key: &str) -> Option<&str> {
        self.cards
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key)?.parse().ok()
    }
}

/// An open FITS binary table.
#[derive(Debug)]
pub struct FitsTable {
    src: Source,
    path: PathBuf,
    header: Header,
    data_offset: u64,
    row_bytes: usize,
    num_rows: u64,
    num_cols: usize,
}

impl FitsTable {
    /// Opens the table named by `spec`, which is a file path optionally
    /// followed by one `[...]` modifier selecting an extension by number
    /// (`[2]`, 0 being the primary array) or by `EXTNAME` (`[sci]`).
    pub fn open(spec: &str) -> Result<Self, Error> {
        let (path, select) = parse_spec(spec)?;

        let mut file = File::open(&path).map_err(Error::io("open input", &path))?;
        let mut magic = [0_u8; 2];
        file.read_exact(&mut magic)
            .map_err(Error::io("read input", &path))?;
        file.seek(SeekFrom::Start(0))
            .map_err(Error::io("seek in", &path))?;

        let mut src = if magic == [0x1f, 0x8b] {
            let mut data = Vec::new();
            GzDecoder::new(file)
                .read_to_end(&mut data)
                .map_err(Error::io("decompress", &path))?;
            Source::Mem(Cursor::new(data))
        } else {
            Source::File(file)
        };

        let mut first_card = [0_u8; CARD];
        src.read_exact(&mut first_card)
            .map_err(Error::io("read input", &path))?;
        if !first_card.starts_with(b"SIMPLE") {
            return Err(Error::NotFits { path });
        }

        Self::scan(src, path, &select)
    }

    /// Walks the HDU chain until the selected extension is found.
    fn scan(mut src: Source, path: PathBuf, select: &ExtSelect) -> Result<Self, Error> {
        let mut offset = 0_u64;
        let mut index = 0_usize;

        loop {
            src.seek_to(offset, &path)?;
            let (header, header_len) = match read_header(&mut src, &path) {
                Ok(parsed) => parsed,
                Err(Error::Io { source, .. })
                    if source.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    // Ran off the end of the file without a match.
                    return Err(match select {
                        ExtSelect::Name(name) => Error::ExtensionNotFound {
                            name: name.clone(),
                            path,
                        },
                        _ => Error::NotATable { path },
                    });
                }
                Err(other) => return Err(other),
            };

            let data_offset = offset + header_len;
            let data_len = padded_data_len(&header);

            let selected = match select {
                ExtSelect::Number(n) => index == *n,
                ExtSelect::Name(name) => header
                    .get("EXTNAME")
                    .is_some_and(|v| v.trim().eq_ignore_ascii_case(name)),
                ExtSelect::First => index == 1,
            };

            if selected {
                let is_bintable = header
                    .get("XTENSION")
                    .is_some_and(|x| x.trim().eq_ignore_ascii_case("BINTABLE"));
                if !is_bintable {
                    return Err(Error::NotATable { path });
                }

                let row_bytes = require_i64(&header, "NAXIS1", &path)? as usize;
                let num_rows = require_i64(&header, "NAXIS2", &path)? as u64;
                let num_cols = require_i64(&header, "TFIELDS", &path)? as usize;
                debug!(
                    "opened {}: {} cols, {} rows of {} bytes",
                    path.display(),
                    num_cols,
                    num_rows,
                    row_bytes
                );
                return Ok(Self {
                    src,
                    path,
                    header,
                    data_offset,
                    row_bytes,
                    num_rows,
                    num_cols,
                });
            }

            offset = data_offset + data_len;
            index += 1;
        }
    }

    /// Path of the underlying file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of table columns (`TFIELDS`).
    pub fn num_cols(&self) -> usize {
        self.num_cols
    }

    /// Number of table rows (`NAXIS2`).
    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    /// Width of one row in bytes (`NAXIS1`).
    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    /// Advised number of rows per chunked read, targeting roughly one
    /// megabyte of I/O.
    pub fn optimal_chunk_rows(&self) -> usize {
        (CHUNK_TARGET_BYTES / self.row_bytes.max(1)).max(1)
    }

    /// Looks up a string-valued keyword in the table header.
    pub fn key_str(&self, key: &str) -> Option<&str> {
        self.header.get(key)
    }

    /// Name of the 1-based column `i`, from `TTYPEn`.
    pub fn col_name(&self, i: usize) -> Option<&str> {
        self.header.get(&format!("TTYPE{i}"))
    }

    /// Parsed format of the 1-based column `i`, from `TFORMn`.
    pub fn col_form(&self, i: usize) -> Result<TForm, Error> {
        let key = format!("TFORM{i}");
        let raw = self.header.get(&key).ok_or_else(|| Error::MissingKeyword {
            key,
            path: self.path.clone(),
        })?;
        parse_tform(raw).ok_or_else(|| Error::UnsupportedColumn {
            tform: raw.to_owned(),
            col: i,
            path: self.path.clone(),
        })
    }

    /// `TZEROn` for the 1-based column `i`, used to detect the unsigned
    /// and signed-byte type variants.
    pub fn col_zero(&self, i: usize) -> Option<f64> {
        self.header.get(&format!("TZERO{i}"))?.trim().parse().ok()
    }

    /// Raw `TDIMn` shape string for the 1-based column `i`.
    pub fn col_dim(&self, i: usize) -> Option<&str> {
        self.header.get(&format!("TDIM{i}"))
    }

    /// Display width of the 1-based column `i`: parsed from `TDISPn` when
    /// present, otherwise a per-type default.
    pub fn col_display_width(&self, i: usize, form: TForm) -> usize {
        if let Some(disp) = self.header.get(&format!("TDISP{i}")) {
            if let Some(width) = parse_tdisp_width(disp) {
                return width;
            }
        }
        match form.code {
            'A' | 'X' => form.repeat,
            'L' => 1,
            'B' => 4,
            'I' => 6,
            'J' => 11,
            'K' => 20,
            'E' => 15,
            'D' => 23,
            _ => 0,
        }
    }

    /// Reads `n` rows starting at the 0-based row `first_row` into the
    /// front of `buf`, which must hold at least `n * row_bytes` bytes.
    pub fn read_rows(&mut self, first_row: u64, n: usize, buf: &mut [u8]) -> Result<(), Error> {
        let last = first_row + n as u64;
        if last > self.num_rows {
            return Err(Error::RowRange {
                first: first_row,
                last,
                rows: self.num_rows,
                path: self.path.clone(),
            });
        }
        let nbytes = n * self.row_bytes;
        self.src
            .seek_to(self.data_offset + first_row * self.row_bytes as u64, &self.path)?;
        self.src
            .read_exact(&mut buf[..nbytes])
            .map_err(Error::io("read table rows", &self.path))
    }
}

/// Splits an input specification into its path and extension selector.
fn parse_spec(spec: &str) -> Result<(PathBuf, ExtSelect), Error> {
    let Some(pos) = spec.find('[') else {
        return Ok((PathBuf::from(spec), ExtSelect::First));
    };
    let (path, modifier) = spec.split_at(pos);
    let inner = modifier
        .strip_prefix('[')
        .and_then(|m| m.strip_suffix(']'))
        .filter(|m| !m.contains(['[', ']']))
        .ok_or_else(|| Error::BadModifier {
            spec: spec.to_owned(),
        })?;
    let select = match inner.parse::<usize>() {
        Ok(n) => ExtSelect::Number(n),
        Err(_) => ExtSelect::Name(inner.to_owned()),
    };
    Ok((PathBuf::from(path), select))
}

/// True if the file starts with the FITS `SIMPLE` signature.
pub fn is_fits_file(path: &Path) -> bool {
    let mut magic = [0_u8; 6];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .is_ok()
        && &magic == b"SIMPLE"
}

/// True if the file starts with the gzip magic bytes `1F 8B`.
pub fn is_gzip_file(path: &Path) -> bool {
    let mut magic = [0_u8; 2];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .is_ok()
        && magic == [0x1f, 0x8b]
}

/// Reads header blocks until the `END` card; returns the parsed header and
/// the number of bytes consumed.
fn read_header(src: &mut Source, path: &Path) -> Result<(Header, u64), Error> {
    let mut header = Header::default();
    let mut block = [0_u8; BLOCK];

    for blocks_read in 1..=MAX_HEADER_BLOCKS {
        src.read_exact(&mut block)
            .map_err(Error::io("read header", path))?;

        for card in block.chunks_exact(CARD) {
            let key = trimmed_ascii(&card[..8]);
            if key == "END" {
                return Ok((header, (blocks_read * BLOCK) as u64));
            }
            if key.is_empty() || card.len() < 10 || &card[8..10] != b"= " {
                // COMMENT, HISTORY and blank cards carry no value.
                continue;
            }
            let value = parse_card_value(&card[10..]);
            header.cards.push((key, value));
        }
    }

    Err(Error::BadHeader {
        path: path.to_owned(),
        detail: "no END card found".to_owned(),
    })
}

/// Extracts the value portion of a card: a quoted string (with `''`
/// escapes) or a bare token up to the `/` comment separator.
fn parse_card_value(raw: &[u8]) -> String {
    let text: String = raw.iter().map(|&b| b as char).collect();
    let trimmed = text.trim_start();
    if let Some(quoted) = trimmed.strip_prefix('\'') {
        let mut value = String::new();
        let mut chars = quoted.chars();
        while let Some(ch) = chars.next() {
            if ch == '\'' {
                if chars.next() == Some('\'') {
                    value.push('\'');
                } else {
                    break;
                }
            } else {
                value.push(ch);
            }
        }
        value.trim_end().to_owned()
    } else {
        trimmed
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_owned()
    }
}

fn trimmed_ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| b as char)
        .collect::<String>()
        .trim()
        .to_owned()
}

fn require_i64(header: &Header, key: &str, path: &Path) -> Result<i64, Error> {
    header.get_i64(key).ok_or_else(|| Error::MissingKeyword {
        key: key.to_owned(),
        path: path.to_owned(),
    })
}

/// Data area length of the HDU described by `header`, padded to the block
/// boundary.
fn padded_data_len(header: &Header) -> u64 {
    let bitpix_bytes = header.get_i64("BITPIX").unwrap_or(8).unsigned_abs() / 8;
    let naxis = header.get_i64("NAXIS").unwrap_or(0);
    let mut product = u64::from(naxis > 0);
    for i in 1..=naxis {
        product *= header.get_i64(&format!("NAXIS{i}")).unwrap_or(0).max(0) as u64;
    }
    let pcount = header.get_i64("PCOUNT").unwrap_or(0).max(0) as u64;
    let gcount = header.get_i64("GCOUNT").unwrap_or(1).max(1) as u64;
    let len = bitpix_bytes * gcount * (pcount + product);
    len.div_ceil(BLOCK as u64) * BLOCK as u64
}

/// Parses a `TFORMn` value of the form `rT` (repeat count then type code).
/// Returns `None` for variable-length (`P`/`Q`) and unknown codes.
fn parse_tform(raw: &str) -> Option<TForm> {
    let raw = raw.trim();
    let split = raw.find(|c: char| !c.is_ascii_digit())?;
    let repeat = if split == 0 {
        1
    } else {
        raw[..split].parse().ok()?
    };
    let code = raw[split..].chars().next()?.to_ascii_uppercase();
    if matches!(code, 'A' | 'L' | 'X' | 'B' | 'I' | 'J' | 'K' | 'E' | 'D' | 'C' | 'M') {
        Some(TForm { repeat, code })
    } else {
        None
    }
}

/// Width field of a `TDISPn` value such as `I6`, `F8.3` or `A10`.
fn parse_tdisp_width(disp: &str) -> Option<usize> {
    let digits: String = disp
        .trim()
        .chars()
        .skip_while(|c| c.is_ascii_alphabetic())
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}
