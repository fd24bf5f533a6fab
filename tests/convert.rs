//! End-to-end conversion tests against synthesized FITS binary tables.

use anyhow::Error;
use clap::Parser;
use fits2db::cli::{run, Args};
use std::fs::{read, write};
use std::path::{Path, PathBuf};
use tempfile::tempdir;

const BLOCK: usize = 2880;
const CARD: usize = 80;

fn card(key: &str, value: &str) -> Vec<u8> {
    let mut text = format!("{key:<8}= {value}");
    assert!(text.len() <= CARD, "card too long: {text}");
    text.push_str(&" ".repeat(CARD - text.len()));
    text.into_bytes()
}

fn pad_block(mut bytes: Vec<u8>, fill: u8) -> Vec<u8> {
    let len = bytes.len().div_ceil(BLOCK) * BLOCK;
    bytes.resize(len, fill);
    bytes
}

/// Builds a complete FITS file: empty primary HDU, then one BINTABLE
/// extension with the given columns, extra cards and row data.
fn fits_table(
    cols: &[(&str, &str)],
    extra_cards: &[(&str, &str)],
    nrows: usize,
    data: &[u8],
) -> Vec<u8> {
    assert!(nrows > 0 && data.len() % nrows == 0);
    let naxis1 = data.len() / nrows;

    let mut primary = Vec::new();
    primary.extend(card("SIMPLE", "T"));
    primary.extend(card("BITPIX", "8"));
    primary.extend(card("NAXIS", "0"));
    primary.extend(card("END", ""));
    let mut file = pad_block(primary, b' ');

    let mut ext = Vec::new();
    ext.extend(card("XTENSION", "'BINTABLE'"));
    ext.extend(card("BITPIX", "8"));
    ext.extend(card("NAXIS", "2"));
    ext.extend(card("NAXIS1", &naxis1.to_string()));
    ext.extend(card("NAXIS2", &nrows.to_string()));
    ext.extend(card("PCOUNT", "0"));
    ext.extend(card("GCOUNT", "1"));
    ext.extend(card("TFIELDS", &cols.len().to_string()));
    for (i, (name, form)) in cols.iter().enumerate() {
        ext.extend(card(&format!("TTYPE{}", i + 1), &format!("'{name}'")));
        ext.extend(card(&format!("TFORM{}", i + 1), &format!("'{form}'")));
    }
    for (key, value) in extra_cards {
        ext.extend(card(key, value));
    }
    ext.extend(card("END", ""));
    file.extend(pad_block(ext, b' '));

    file.extend(pad_block(data.to_vec(), 0));
    file
}

fn int_rows(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    write(&path, bytes).unwrap();
    path
}

fn fits2db(args: &[&str]) -> Result<(), fits2db::error::Error> {
    let mut argv = vec!["fits2db"];
    argv.extend_from_slice(args);
    run(Args::parse_from(argv))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

#[test]
fn csv_without_header_is_bare_rows() -> Result<(), Error> {
    let dir = tempdir()?;
    let input = write_file(
        dir.path(),
        "t.fits",
        &fits_table(&[("COL", "J")], &[], 3, &int_rows(&[1, 2, 3])),
    );
    let out = dir.path().join("t.csv");

    fits2db(&["--csv", "--noheader", "-o", path_str(&out), path_str(&input)])?;
    assert_eq!(read(&out)?, b"1\n2\n3\n");
    Ok(())
}

#[test]
fn csv_header_row_and_values() -> Result<(), Error> {
    let dir = tempdir()?;
    let input = write_file(
        dir.path(),
        "t.fits",
        &fits_table(&[("A", "J"), ("B", "J")], &[], 1, &int_rows(&[5, 6])),
    );
    let out = dir.path().join("t.csv");

    fits2db(&["--csv", "-o", path_str(&out), path_str(&input)])?;
    assert_eq!(read(&out)?, b"A,B\n5,6\n");
    Ok(())
}

#[test]
fn tsv_header_stays_comma_separated() -> Result<(), Error> {
    let dir = tempdir()?;
    let input = write_file(
        dir.path(),
        "t.fits",
        &fits_table(&[("A", "J"), ("B", "J")], &[], 1, &int_rows(&[5, 6])),
    );
    let out = dir.path().join("t.tsv");

    fits2db(&["--tsv", "-o", path_str(&out), path_str(&input)])?;
    assert_eq!(read(&out)?, b"A,B\n5\t6\n");
    Ok(())
}

#[test]
fn postgres_create_and_copy() -> Result<(), Error> {
    let dir = tempdir()?;
    let input = write_file(
        dir.path(),
        "t.fits",
        &fits_table(&[("COL", "J")], &[], 3, &int_rows(&[1, 2, 3])),
    );
    let out = dir.path().join("t.sql");

    fits2db(&[
        "--sql=postgres",
        "--create",
        "-t",
        "foo",
        "-o",
        path_str(&out),
        path_str(&input),
    ])?;

    let expected = "CREATE TABLE IF NOT EXISTS foo (\n    COL\tinteger\n);\n\n\
                    COPY foo (COL\n) from stdin;\n\
                    1\n2\n3\n\
                    \\.\n";
    assert_eq!(String::from_utf8(read(&out)?)?, expected);
    Ok(())
}

#[test]
fn mysql_insert_with_nan() -> Result<(), Error> {
    let dir = tempdir()?;
    let mut data = Vec::new();
    data.extend_from_slice(&1.5_f32.to_be_bytes());
    data.extend_from_slice(&f32::NAN.to_be_bytes());
    let input = write_file(
        dir.path(),
        "t.fits",
        &fits_table(&[("COL", "E")], &[], 2, &data),
    );
    let out = dir.path().join("t.sql");

    fits2db(&[
        "--sql=mysql",
        "--create",
        "-t",
        "t",
        "-o",
        path_str(&out),
        path_str(&input),
    ])?;

    let expected = "CREATE TABLE IF NOT EXISTS t (\n    COL\treal\n);\n\n\
                    INSERT INTO t (COL\n) VALUES\n\
                    (1.500000),('NaN');\n";
    assert_eq!(String::from_utf8(read(&out)?)?, expected);
    Ok(())
}

#[test]
fn packed_double_array_in_csv() -> Result<(), Error> {
    let dir = tempdir()?;
    let data: Vec<u8> = [0.0_f64, 1.0, 2.0]
        .iter()
        .flat_map(|v| v.to_be_bytes())
        .collect();
    let input = write_file(
        dir.path(),
        "t.fits",
        &fits_table(&[("COL", "3D")], &[], 1, &data),
    );
    let out = dir.path().join("t.csv");

    fits2db(&["--csv", "--noheader", "-o", path_str(&out), path_str(&input)])?;
    assert_eq!(
        String::from_utf8(read(&out)?)?,
        "\"(0.0000000000000000,1.0000000000000000,2.0000000000000000)\"\n"
    );
    Ok(())
}

#[test]
fn exploded_double_array_in_csv() -> Result<(), Error> {
    let dir = tempdir()?;
    let data: Vec<u8> = [0.0_f64, 1.0, 2.0]
        .iter()
        .flat_map(|v| v.to_be_bytes())
        .collect();
    let input = write_file(
        dir.path(),
        "t.fits",
        &fits_table(&[("COL", "3D")], &[], 1, &data),
    );
    let out = dir.path().join("t.csv");

    fits2db(&[
        "--csv",
        "--explode",
        "--noheader",
        "-o",
        path_str(&out),
        path_str(&input),
    ])?;
    assert_eq!(
        String::from_utf8(read(&out)?)?,
        "0.0000000000000000,1.0000000000000000,2.0000000000000000\n"
    );
    Ok(())
}

#[test]
fn explode_names_2d_arrays_row_major() -> Result<(), Error> {
    let dir = tempdir()?;
    let data: Vec<u8> = (1..=6)
        .flat_map(|v| (v as f32).to_be_bytes())
        .collect();
    let input = write_file(
        dir.path(),
        "t.fits",
        &fits_table(&[("M", "6E")], &[("TDIM1", "'(2,3)'")], 1, &data),
    );
    let out = dir.path().join("t.csv");

    fits2db(&["--csv", "--explode", "-o", path_str(&out), path_str(&input)])?;
    let text = String::from_utf8(read(&out)?)?;
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("M_1_1,M_1_2,M_1_3,M_2_1,M_2_2,M_2_3")
    );
    assert_eq!(
        lines.next(),
        Some("1.000000,2.000000,3.000000,4.000000,5.000000,6.000000")
    );
    Ok(())
}

#[test]
fn binary_copy_frame_layout() -> Result<(), Error> {
    let dir = tempdir()?;
    let input = write_file(
        dir.path(),
        "t.fits",
        &fits_table(&[("COL", "J")], &[], 2, &int_rows(&[1, 2])),
    );
    let out = dir.path().join("t.sql");

    fits2db(&[
        "--sql=postgres",
        "--binary",
        "-t",
        "t",
        "-o",
        path_str(&out),
        path_str(&input),
    ])?;

    let mut expected: Vec<u8> = b"COPY t FROM stdin WITH BINARY;\n".to_vec();
    expected.extend_from_slice(b"PGCOPY\n\xff\r\n\0");
    expected.extend_from_slice(&[0; 8]); // flags + header-extension length
    for v in [1_i32, 2] {
        expected.extend_from_slice(&1_i16.to_be_bytes()); // field count
        expected.extend_from_slice(&4_u32.to_be_bytes());
        expected.extend_from_slice(&v.to_be_bytes());
    }
    expected.extend_from_slice(&[0xff, 0xff]);
    assert_eq!(read(&out)?, expected);
    Ok(())
}

#[test]
fn binary_mode_degrades_for_array_columns() -> Result<(), Error> {
    let dir = tempdir()?;
    let data: Vec<u8> = [0.0_f64, 1.0, 2.0]
        .iter()
        .flat_map(|v| v.to_be_bytes())
        .collect();
    let input = write_file(
        dir.path(),
        "t.fits",
        &fits_table(&[("COL", "3D")], &[], 1, &data),
    );
    let out = dir.path().join("t.sql");

    fits2db(&[
        "--sql=postgres",
        "--binary",
        "-t",
        "t",
        "-o",
        path_str(&out),
        path_str(&input),
    ])?;

    // The whole stream falls back to the text COPY form.
    let expected = "COPY t (COL\n) from stdin;\n\
                    {0.0000000000000000\t1.0000000000000000\t2.0000000000000000}\n\
                    \\.\n";
    assert_eq!(String::from_utf8(read(&out)?)?, expected);
    Ok(())
}

#[test]
fn concat_skips_mismatched_schemas() -> Result<(), Error> {
    let dir = tempdir()?;
    let a = write_file(
        dir.path(),
        "a.fits",
        &fits_table(&[("COL", "J")], &[], 2, &int_rows(&[1, 2])),
    );
    let bad_rows: Vec<u8> = [9.0_f32, 9.0].iter().flat_map(|v| v.to_be_bytes()).collect();
    let b = write_file(
        dir.path(),
        "b.fits",
        &fits_table(&[("COL", "E")], &[], 2, &bad_rows),
    );
    let c = write_file(
        dir.path(),
        "c.fits",
        &fits_table(&[("COL", "J")], &[], 2, &int_rows(&[3, 4])),
    );
    let out = dir.path().join("all.csv");

    fits2db(&[
        "--csv",
        "--concat",
        "-o",
        path_str(&out),
        path_str(&a),
        path_str(&b),
        path_str(&c),
    ])?;

    assert_eq!(String::from_utf8(read(&out)?)?, "COL\n1\n2\n3\n4\n");
    Ok(())
}

#[test]
fn serial_ids_are_contiguous_across_files() -> Result<(), Error> {
    let dir = tempdir()?;
    let a = write_file(
        dir.path(),
        "a.fits",
        &fits_table(&[("COL", "J")], &[], 2, &int_rows(&[7, 8])),
    );
    let b = write_file(
        dir.path(),
        "b.fits",
        &fits_table(&[("COL", "J")], &[], 2, &int_rows(&[9, 10])),
    );
    let out = dir.path().join("all.csv");

    fits2db(&[
        "--csv",
        "--concat",
        "--sid=id",
        "-o",
        path_str(&out),
        path_str(&a),
        path_str(&b),
    ])?;

    assert_eq!(
        String::from_utf8(read(&out)?)?,
        "COL,id\n7,0\n8,1\n9,2\n10,3\n"
    );
    Ok(())
}

#[test]
fn synthetic_columns_in_order_inside_tuples() -> Result<(), Error> {
    let dir = tempdir()?;
    let input = write_file(
        dir.path(),
        "t.fits",
        &fits_table(&[("COL", "J")], &[], 1, &int_rows(&[5])),
    );
    let out = dir.path().join("t.sql");

    fits2db(&[
        "--sql=sqlite",
        "--add=flag",
        "--sid=id",
        "-t",
        "t",
        "-o",
        path_str(&out),
        path_str(&input),
    ])?;

    assert_eq!(
        String::from_utf8(read(&out)?)?,
        "INSERT INTO t (COL,flag,id\n) VALUES\n(5,1,0);\n"
    );
    Ok(())
}

#[test]
fn random_ids_stay_in_range() -> Result<(), Error> {
    let dir = tempdir()?;
    let input = write_file(
        dir.path(),
        "t.fits",
        &fits_table(&[("COL", "J")], &[], 4, &int_rows(&[1, 2, 3, 4])),
    );
    let out = dir.path().join("t.csv");

    fits2db(&[
        "--csv",
        "--noheader",
        "--rid=r",
        "-o",
        path_str(&out),
        path_str(&input),
    ])?;

    for line in String::from_utf8(read(&out)?)?.lines() {
        let (_, rid) = line.split_once(',').unwrap();
        let v: f32 = rid.parse()?;
        assert!((0.0..100.0).contains(&v), "rid {v} out of range");
    }
    Ok(())
}

#[test]
fn mysql_tuples_join_across_bundled_files() -> Result<(), Error> {
    let dir = tempdir()?;
    let a = write_file(
        dir.path(),
        "a.fits",
        &fits_table(&[("COL", "J")], &[], 2, &int_rows(&[1, 2])),
    );
    let b = write_file(
        dir.path(),
        "b.fits",
        &fits_table(&[("COL", "J")], &[], 2, &int_rows(&[3, 4])),
    );
    let out = dir.path().join("all.sql");

    fits2db(&[
        "--sql=mysql",
        "--concat",
        "--bundle=2",
        "-t",
        "t",
        "-o",
        path_str(&out),
        path_str(&a),
        path_str(&b),
    ])?;

    assert_eq!(
        String::from_utf8(read(&out)?)?,
        "INSERT INTO t (COL\n) VALUES\n(1),(2),(3),(4);\n"
    );
    Ok(())
}

#[test]
fn single_row_inserts_are_self_contained() -> Result<(), Error> {
    let dir = tempdir()?;
    let input = write_file(
        dir.path(),
        "t.fits",
        &fits_table(&[("COL", "J")], &[], 2, &int_rows(&[1, 2])),
    );
    let out = dir.path().join("t.sql");

    fits2db(&[
        "--sql=sqlite",
        "--single",
        "-t",
        "t",
        "-o",
        path_str(&out),
        path_str(&input),
    ])?;

    assert_eq!(
        String::from_utf8(read(&out)?)?,
        "INSERT INTO t (COL) VALUES (1);\nINSERT INTO t (COL) VALUES (2);\n"
    );
    Ok(())
}

#[test]
fn noload_emits_ddl_only() -> Result<(), Error> {
    let dir = tempdir()?;
    let input = write_file(
        dir.path(),
        "t.fits",
        &fits_table(&[("COL", "J")], &[], 2, &int_rows(&[1, 2])),
    );
    let out = dir.path().join("t.sql");

    fits2db(&[
        "--sql=postgres",
        "--create",
        "--noload",
        "-t",
        "t",
        "-o",
        path_str(&out),
        path_str(&input),
    ])?;

    assert_eq!(
        String::from_utf8(read(&out)?)?,
        "CREATE TABLE IF NOT EXISTS t (\n    COL\tinteger\n);\n\n"
    );
    Ok(())
}

#[test]
fn ipac_banner_and_padded_values() -> Result<(), Error> {
    let dir = tempdir()?;
    let input = write_file(
        dir.path(),
        "t.fits",
        &fits_table(&[("RA", "J"), ("DEC", "J")], &[], 1, &int_rows(&[7, -3])),
    );
    let out = dir.path().join("t.ipac");

    fits2db(&["--ipac", "-o", path_str(&out), path_str(&input)])?;

    // Default J display width is 11; names comma-separated, types and
    // values bar-separated.
    let expected = "|RA         ,DEC        |\n\
                    |int        |int        |\n\
                    |          7|         -3|\n";
    assert_eq!(String::from_utf8(read(&out)?)?, expected);
    Ok(())
}

#[test]
fn strings_logicals_and_unsigned_variants() -> Result<(), Error> {
    let dir = tempdir()?;
    let mut data = Vec::new();
    data.extend_from_slice(b" ab ");
    data.push(b'T');
    data.extend_from_slice(&0x8001_u16.to_be_bytes());
    data.extend_from_slice(b"c  d");
    data.push(b'F');
    data.extend_from_slice(&0x0002_u16.to_be_bytes());
    let input = write_file(
        dir.path(),
        "t.fits",
        &fits_table(
            &[("NAME", "4A"), ("OK", "L"), ("N", "I")],
            &[("TZERO3", "32768")],
            2,
            &data,
        ),
    );
    let out = dir.path().join("t.csv");

    fits2db(&["--csv", "--noheader", "-o", path_str(&out), path_str(&input)])?;
    assert_eq!(
        String::from_utf8(read(&out)?)?,
        "\"ab\",1,32769\n\"c  d\",0,2\n"
    );
    Ok(())
}

#[test]
fn gzipped_input_is_transparent() -> Result<(), Error> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write as _;

    let dir = tempdir()?;
    let raw = fits_table(&[("COL", "J")], &[], 3, &int_rows(&[1, 2, 3]));
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw)?;
    let input = write_file(dir.path(), "t.fits.gz", &encoder.finish()?);
    let out = dir.path().join("t.csv");

    fits2db(&["--csv", "--noheader", "-o", path_str(&out), path_str(&input)])?;
    assert_eq!(read(&out)?, b"1\n2\n3\n");
    Ok(())
}

#[test]
fn extension_selection_by_name() -> Result<(), Error> {
    let dir = tempdir()?;
    let bytes = fits_table(
        &[("COL", "J")],
        &[("EXTNAME", "'SCI'")],
        2,
        &int_rows(&[1, 2]),
    );
    let input = write_file(dir.path(), "t.fits", &bytes);
    let out = dir.path().join("t.csv");

    fits2db(&[
        "--csv",
        "--noheader",
        "--extname=sci",
        "-o",
        path_str(&out),
        path_str(&input),
    ])?;
    assert_eq!(read(&out)?, b"1\n2\n");
    Ok(())
}

#[test]
fn non_fits_inputs_are_skipped_without_failing() -> Result<(), Error> {
    let dir = tempdir()?;
    let junk = write_file(dir.path(), "junk.fits", b"this is not a table");
    let good = write_file(
        dir.path(),
        "good.fits",
        &fits_table(&[("COL", "J")], &[], 1, &int_rows(&[5])),
    );
    let out = dir.path().join("out.csv");

    fits2db(&[
        "--csv",
        "--noheader",
        "--concat",
        "-o",
        path_str(&out),
        path_str(&junk),
        path_str(&good),
    ])?;
    assert_eq!(read(&out)?, b"5\n");
    Ok(())
}

#[test]
fn multi_file_runs_derive_one_output_per_input() -> Result<(), Error> {
    let dir = tempdir()?;
    let a = write_file(
        dir.path(),
        "a.fits",
        &fits_table(&[("COL", "J")], &[], 1, &int_rows(&[1])),
    );
    let b = write_file(
        dir.path(),
        "b.fits",
        &fits_table(&[("COL", "J")], &[], 1, &int_rows(&[2])),
    );

    fits2db(&["--csv", "--noheader", path_str(&a), path_str(&b)])?;
    assert_eq!(read(dir.path().join("a.csv"))?, b"1\n");
    assert_eq!(read(dir.path().join("b.csv"))?, b"2\n");
    Ok(())
}

#[test]
fn conflicting_extension_selectors_fail() {
    let dir = tempdir().unwrap();
    let input = write_file(
        dir.path(),
        "t.fits",
        &fits_table(&[("COL", "J")], &[], 1, &int_rows(&[1])),
    );
    let err = fits2db(&["--extnum=1", "--extname=sci", path_str(&input)]).unwrap_err();
    assert!(matches!(
        err,
        fits2db::error::Error::ExtensionSelectConflict
    ));
}
