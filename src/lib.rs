//! The reusable library powering `fits2db`.
//!
//! The conversion pipeline introspects a FITS binary table, plans the
//! output columns, then streams row chunks through per-type value encoders
//! into one of the tabular output encodings: delimited text, IPAC columnar
//! text, SQL load scripts or the Postgres binary `COPY` stream.

pub mod cli;
pub mod convert;
pub mod encode;
pub mod error;
pub mod fits;
pub mod format;
pub mod schema;
