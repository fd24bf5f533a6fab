//! Shared value-encoding machinery behind the per-format framers.
//!
//! The framers' `value` methods call into these routines, which consume one
//! column's bytes from the row cursor and append the encoded value to the
//! output buffer, returning the advanced cursor. Dispatch over the element
//! type is the closed sum in [`push_text_token`]; per-format dialect
//! differences arrive through a [`TextStyle`]. Source data is big-endian;
//! text formatting decodes to native values, binary output copies the
//! big-endian payload behind a 4-byte big-endian length prefix.

use crate::format::Settings;
use crate::schema::{Col, ColType};
use log::error;
use rand::Rng;
use std::io::Write;

/// Scale applied to the uniform random-id column: values lie in [0, 100).
const RANDOM_SCALE: f32 = 100.0;

/// Dialect knobs a framer feeds into the text token machinery.
pub struct TextStyle {
    /// Pad integer and float tokens to the column display width.
    pub pad: bool,
    /// Spelling for NaN; `None` renders the decimal form.
    pub nan: Option<&'static str>,
    /// Spellings for positive and negative infinity; `None` renders the
    /// decimal form.
    pub infinity: Option<(&'static str, &'static str)>,
    /// Wrap packed arrays in `quote_char(...)` instead of `{...}`.
    pub quoted_array_wrap: bool,
}

/// Encodes one column as text tokens, consuming exactly [`Col::data_span`]
/// bytes and returning the rest of the row. Packed arrays are wrapped and
/// their elements delimiter-separated in row-major order.
pub fn text_value<'a>(
    data: &'a [u8],
    col: &Col,
    settings: &Settings,
    style: &TextStyle,
    out: &mut Vec<u8>,
) -> &'a [u8] {
    let (cell, rest) = data.split_at(col.data_span());

    if !col.ty.is_supported() {
        // Keep the cursor aligned for the remaining columns; the cell
        // itself produces no output.
        error!("unsupported column type {:?} in column '{}'", col.ty, col.name);
        return rest;
    }

    if col.ty == ColType::String {
        push_string(cell, settings, out);
        return rest;
    }

    let wrapped = !settings.explode && col.repeat > 1;
    if wrapped {
        if style.quoted_array_wrap {
            out.push(settings.quote_char);
            out.push(b'(');
        } else {
            out.push(b'{');
        }
    }
    for (k, elem) in cell.chunks_exact(col.width).enumerate() {
        if k > 0 {
            out.push(settings.delimiter);
        }
        push_text_token(elem, col, style, out);
    }
    if wrapped {
        if style.quoted_array_wrap {
            out.push(b')');
            out.push(settings.quote_char);
        } else {
            out.push(b'}');
        }
    }
    rest
}

/// Encodes one column as binary `COPY` fields: one length-prefixed field
/// per element when exploding, otherwise a single field covering the whole
/// array. Strings copy verbatim at their declared length; logical and byte
/// elements widen to the 2-byte `smallint` wire form; everything else is
/// already big-endian and copies verbatim.
pub fn binary_value<'a>(
    data: &'a [u8],
    col: &Col,
    settings: &Settings,
    out: &mut Vec<u8>,
) -> &'a [u8] {
    let (cell, rest) = data.split_at(col.data_span());

    if !col.ty.is_supported() {
        error!("unsupported column type {:?} in column '{}'", col.ty, col.name);
        return rest;
    }

    if col.ty == ColType::String {
        push_field_len(out, col.repeat);
        out.extend_from_slice(cell);
        return rest;
    }

    let wire_width = match col.ty {
        ColType::Logical | ColType::Byte | ColType::SByte => 2,
        _ => col.width,
    };

    if settings.explode {
        for elem in cell.chunks_exact(col.width) {
            push_field_len(out, wire_width);
            push_binary_payload(elem, col.ty, out);
        }
    } else {
        push_field_len(out, col.repeat * wire_width);
        for elem in cell.chunks_exact(col.width) {
            push_binary_payload(elem, col.ty, out);
        }
    }
    rest
}

/// Text string cells: NUL-truncated, optionally stripped, then escaped,
/// quoted or raw.
fn push_string(cell: &[u8], settings: &Settings, out: &mut Vec<u8>) {
    let end = memchr::memchr(0, cell).unwrap_or(cell.len());
    let mut text = &cell[..end];
    if settings.strip {
        text = trim_spaces(text);
    }

    if settings.escape {
        out.push(settings.quote_char);
        for &b in text {
            out.push(b);
            if b == settings.quote_char {
                out.push(settings.quote_char);
            }
        }
        out.push(settings.quote_char);
    } else if settings.quote {
        out.push(settings.quote_char);
        out.extend_from_slice(text);
        out.push(settings.quote_char);
    } else {
        out.extend_from_slice(text);
    }
}

fn push_text_token(elem: &[u8], col: &Col, style: &TextStyle, out: &mut Vec<u8>) {
    match col.ty {
        ColType::Logical => {
            let v = i64::from(elem[0].eq_ignore_ascii_case(&b't'));
            push_int_token(out, v, col, style);
        }
        ColType::Byte => push_int_token(out, i64::from(elem[0]), col, style),
        ColType::SByte => push_int_token(out, i64::from(elem[0] as i8), col, style),
        ColType::Short => {
            push_int_token(out, i64::from(i16::from_be_bytes([elem[0], elem[1]])), col, style);
        }
        ColType::UShort => {
            push_int_token(out, i64::from(u16::from_be_bytes([elem[0], elem[1]])), col, style);
        }
        ColType::Int => {
            let v = i32::from_be_bytes([elem[0], elem[1], elem[2], elem[3]]);
            push_int_token(out, i64::from(v), col, style);
        }
        ColType::UInt => {
            let v = u32::from_be_bytes([elem[0], elem[1], elem[2], elem[3]]);
            push_int_token(out, i64::from(v), col, style);
        }
        ColType::LongLong => {
            let mut raw = [0_u8; 8];
            raw.copy_from_slice(elem);
            push_int_token(out, i64::from_be_bytes(raw), col, style);
        }
        ColType::Float => {
            let v = f32::from_be_bytes([elem[0], elem[1], elem[2], elem[3]]);
            push_float_token(out, f64::from(v), 6, col, style);
        }
        ColType::Double => {
            let mut raw = [0_u8; 8];
            raw.copy_from_slice(elem);
            push_float_token(out, f64::from_be_bytes(raw), 16, col, style);
        }
        ColType::String | ColType::Bit | ColType::Complex | ColType::DblComplex => {}
    }
}

fn push_int_token(out: &mut Vec<u8>, v: i64, col: &Col, style: &TextStyle) {
    if style.pad {
        let _ = write!(out, "{v:>width$}", width = col.dispwidth);
    } else {
        let _ = write!(out, "{v}");
    }
}

/// Floating-point text tokens: the style supplies the NaN and signed
/// Infinity spellings (or asks for the decimal rendering); finite values
/// use fixed-precision decimal, padded to the display width when the style
/// pads.
fn push_float_token(out: &mut Vec<u8>, v: f64, precision: usize, col: &Col, style: &TextStyle) {
    if v.is_nan() {
        match style.nan {
            Some(token) => out.extend_from_slice(token.as_bytes()),
            None => {
                let _ = write!(out, "{v:.precision$}");
            }
        }
    } else if v.is_infinite() {
        match style.infinity {
            Some((positive, negative)) => {
                let token = if v.is_sign_negative() { negative } else { positive };
                out.extend_from_slice(token.as_bytes());
            }
            None => {
                let _ = write!(out, "{v:.precision$}");
            }
        }
    } else if style.pad {
        let _ = write!(out, "{v:>width$.6}", width = col.dispwidth);
    } else {
        let _ = write!(out, "{v:.precision$}");
    }
}

fn push_binary_payload(elem: &[u8], ty: ColType, out: &mut Vec<u8>) {
    match ty {
        ColType::Logical => {
            let v: i16 = i16::from(elem[0].eq_ignore_ascii_case(&b't'));
            out.extend_from_slice(&v.to_be_bytes());
        }
        ColType::Byte => out.extend_from_slice(&i16::from(elem[0]).to_be_bytes()),
        ColType::SByte => out.extend_from_slice(&i16::from(elem[0] as i8).to_be_bytes()),
        _ => out.extend_from_slice(elem),
    }
}

/// Emits the constant add-column value.
pub fn encode_add(out: &mut Vec<u8>, settings: &Settings) {
    if settings.binary {
        push_field_len(out, 4);
        out.extend_from_slice(&1_u32.to_be_bytes());
    } else {
        out.push(b'1');
    }
}

/// Emits the next serial-id value and advances the counter.
pub fn encode_serial(out: &mut Vec<u8>, settings: &Settings, serial: &mut u32) {
    let v = *serial;
    *serial += 1;
    if settings.binary {
        push_field_len(out, 4);
        out.extend_from_slice(&v.to_be_bytes());
    } else {
        let _ = write!(out, "{v}");
    }
}

/// Emits a uniform random-id value in [0, 100).
pub fn encode_random(out: &mut Vec<u8>, settings: &Settings, rng: &mut impl Rng) {
    let v: f32 = rng.gen_range(0.0..RANDOM_SCALE);
    if settings.binary {
        push_field_len(out, 4);
        out.extend_from_slice(&v.to_be_bytes());
    } else {
        let _ = write!(out, "{v:.6}");
    }
}

fn push_field_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u32).to_be_bytes());
}

fn trim_spaces(mut bytes: &[u8]) -> &[u8] {
    while let [b' ', rest @ ..] = bytes {
        bytes = rest;
    }
    while let [rest @ .., b' '] = bytes {
        bytes = rest;
    }
    bytes
}
