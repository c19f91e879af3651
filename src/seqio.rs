//src/seqio.rs

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::{GraftError, Result};
use crate::types::{MateRole, Read};

/// Opens a file, transparently decompressing `.gz`.
fn open_maybe_gz(path: &Path) -> Result<Box<dyn BufRead>> {
    let f = File::open(path)?;
    let is_gz = path
        .extension()
        .map(|ext| ext == "gz")
        .unwrap_or(false);

    Ok(if is_gz {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    })
}

fn split_header(header: &str) -> (String, String) {
    let header = header.trim_end();
    let id = header.split_whitespace().next().unwrap_or("").to_string();
    (id, header.to_string())
}

/// Reads every FASTA or FASTQ record in `path` (optionally gzipped). The
/// format is chosen from the first non-blank character.
pub fn read_sequences<P: AsRef<Path>>(path: P, role: MateRole) -> Result<Vec<Read>> {
    let mut reader = open_maybe_gz(path.as_ref())?;
    let mut line = String::new();

    // Skip leading blank lines to find the format marker
    let mut line_no = 0;
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Ok(Vec::new());
        }
        line_no += 1;
        if !line.trim().is_empty() {
            break;
        }
    }

    match line.as_bytes()[0] {
        b'>' => read_fasta_records(reader, line, line_no, role),
        b'@' => read_fastq_records(reader, line, line_no, role),
        _ => Err(GraftError::parse(
            "sequence",
            line_no,
            "expected a FASTA ('>') or FASTQ ('@') header",
        )),
    }
}

fn read_fasta_records(
    mut reader: Box<dyn BufRead>,
    first: String,
    mut line_no: usize,
    role: MateRole,
) -> Result<Vec<Read>> {
    let mut sequences = Vec::new();
    let mut current: Option<(String, String)> = Some(split_header(&first[1..]));
    let mut seq = Vec::new();
    let mut line = String::new();

    loop {
        line.clear();
        let eof = reader.read_line(&mut line)? == 0;
        line_no += 1;
        if eof || line.starts_with('>') {
            if let Some((id, header_line)) = current.take() {
                sequences.push(Read {
                    id,
                    header_line,
                    seq: std::mem::take(&mut seq),
                    quals: None,
                    role,
                });
            }
            if eof {
                break;
            }
            current = Some(split_header(&line[1..]));
        } else {
            seq.extend(line.trim().bytes());
        }
    }
    log::debug!("Read {} FASTA records over {} lines", sequences.len(), line_no);
    Ok(sequences)
}

fn read_fastq_records(
    mut reader: Box<dyn BufRead>,
    first: String,
    mut line_no: usize,
    role: MateRole,
) -> Result<Vec<Read>> {
    let mut sequences = Vec::new();
    let mut header = first;
    let mut line = String::new();

    loop {
        // 1) header, already in `header`
        if !header.starts_with('@') {
            return Err(GraftError::parse("FASTQ", line_no, "expected '@' header"));
        }
        let (id, header_line) = split_header(&header[1..]);

        // 2) sequence
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(GraftError::parse("FASTQ", line_no, "truncated record"));
        }
        line_no += 1;
        let seq = line.trim_end().as_bytes().to_vec();

        // 3) plus line
        line.clear();
        if reader.read_line(&mut line)? == 0 || !line.starts_with('+') {
            return Err(GraftError::parse("FASTQ", line_no + 1, "expected '+' separator"));
        }
        line_no += 1;

        // 4) quality
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            return Err(GraftError::parse("FASTQ", line_no, "missing quality line"));
        }
        line_no += 1;
        let quals = line.trim_end().as_bytes().to_vec();
        if quals.len() != seq.len() {
            return Err(GraftError::parse(
                "FASTQ",
                line_no,
                "quality length differs from sequence length",
            ));
        }

        sequences.push(Read {
            id,
            header_line,
            seq,
            quals: Some(quals),
            role,
        });

        // next header, skipping blank lines
        loop {
            header.clear();
            if reader.read_line(&mut header)? == 0 {
                return Ok(sequences);
            }
            line_no += 1;
            if !header.trim().is_empty() {
                break;
            }
        }
    }
}

/// Splits an interleaved read set into forward (odd) and reverse (even)
/// mates.
pub fn split_interleaved(reads: Vec<Read>) -> Result<(Vec<Read>, Vec<Read>)> {
    if reads.len() % 2 != 0 {
        return Err(GraftError::Config(format!(
            "interleaved input holds an odd number of reads ({})",
            reads.len()
        )));
    }
    let mut forward = Vec::with_capacity(reads.len() / 2);
    let mut reverse = Vec::with_capacity(reads.len() / 2);
    for (i, mut read) in reads.into_iter().enumerate() {
        if i % 2 == 0 {
            read.role = MateRole::Forward;
            forward.push(read);
        } else {
            read.role = MateRole::Reverse;
            reverse.push(read);
        }
    }
    Ok((forward, reverse))
}

/// Sample name for an input file: the file name without `.gz` and without
/// its last extension.
pub fn sample_name<P: AsRef<Path>>(path: P) -> String {
    let file_name = path
        .as_ref()
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = file_name.strip_suffix(".gz").unwrap_or(&file_name);
    match stem.rfind('.') {
        Some(idx) if idx > 0 => stem[..idx].to_string(),
        _ => stem.to_string(),
    }
}

/// Writes `(header, sequence)` records as FASTA, one sequence line each.
pub fn write_fasta<P, I, H, S>(path: P, records: I) -> Result<usize>
where
    P: AsRef<Path>,
    I: IntoIterator<Item = (H, S)>,
    H: AsRef<str>,
    S: AsRef<[u8]>,
{
    let mut out = BufWriter::new(File::create(path)?);
    let mut written = 0;
    for (header, seq) in records {
        writeln!(out, ">{}", header.as_ref())?;
        out.write_all(seq.as_ref())?;
        out.write_all(b"\n")?;
        written += 1;
    }
    out.flush()?;
    Ok(written)
}
