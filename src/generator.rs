//! Input generators.
//!
//! Each generator produces the local partition of the global input as a
//! `(chars, strings, lcps)` container. The random generator draws a shared
//! seed so all ranks walk the same global string sequence and each keeps
//! only its own share; the file-based generators either broadcast-then-split
//! or read per-rank slices of a shared file.

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::comm::{broadcast_u64, Communicator};
use crate::container::{ContainerBuilder, Str, StringContainer, StringLcpContainer};
use crate::error::{Error, Result};

/// Which input to produce for the local partition.
#[derive(Debug, Clone)]
pub enum InputSpec {
    /// Synthetic strings with a controlled distinct/total ratio.
    Random {
        num_strings: usize,
        len: usize,
        dn_ratio: f64,
    },
    /// Root reads a text file, lines are dealt round-robin.
    File { path: PathBuf },
    /// Every rank reads its own byte slice of the file.
    FileSegment { path: PathBuf, bytes_per_rank: usize },
    /// Every `step`-th suffix of the shared text.
    Suffix { path: PathBuf, step: usize },
    /// Sliding-window substrings of the shared text.
    Window {
        path: PathBuf,
        window_len: usize,
        step: usize,
    },
    /// Suffixes at difference-cover-sampled positions.
    DifferenceCover { path: PathBuf, modulus: usize },
}

impl InputSpec {
    pub fn name(&self) -> &'static str {
        match self {
            InputSpec::Random { .. } => "random",
            InputSpec::File { .. } => "file",
            InputSpec::FileSegment { .. } => "file-segment",
            InputSpec::Suffix { .. } => "suffix",
            InputSpec::Window { .. } => "window",
            InputSpec::DifferenceCover { .. } => "difference-cover",
        }
    }

    pub fn generate<C: Communicator>(&self, comm: &C) -> Result<StringLcpContainer<Str>> {
        let container = match self {
            InputSpec::Random {
                num_strings,
                len,
                dn_ratio,
            } => random_dn_ratio(*num_strings, *len, *dn_ratio, comm),
            InputSpec::File { path } => file_lines(path, comm)?,
            InputSpec::FileSegment {
                path,
                bytes_per_rank,
            } => file_segment(path, *bytes_per_rank, comm)?,
            InputSpec::Suffix { path, step } => suffixes(path, *step, comm)?,
            InputSpec::Window {
                path,
                window_len,
                step,
            } => windows(path, *window_len, *step, comm)?,
            InputSpec::DifferenceCover { path, modulus } => {
                difference_cover(path, *modulus, comm)?
            }
        };
        Ok(StringLcpContainer::new(container))
    }
}

const ALPHABET_FIRST: u8 = b'A';
const ALPHABET_SIZE: usize = 26;

/// The D/N-ratio generator: a block of `k` characters encodes the global
/// string number in base 26 (padded with 'A'), the rest of the string is one
/// repeated random character. `k` grows with the desired distinct/total
/// ratio, which moves the distinguishing depth of the input.
fn random_dn_ratio<C: Communicator>(
    num_strings: usize,
    desired_len: usize,
    dn_ratio: f64,
    comm: &C,
) -> StringContainer {
    let digits_needed = if num_strings <= 1 {
        1.0
    } else {
        (num_strings as f64).ln() / (ALPHABET_SIZE as f64).ln()
    }
    .ceil() as usize;
    let k = ((desired_len as f64 * dn_ratio) as usize).max(digits_needed);
    let len = desired_len.max(k);

    // All ranks consume the generator identically and keep their share.
    let seed = broadcast_u64(rand::thread_rng().gen(), comm);
    let mut rng = StdRng::seed_from_u64(seed);
    let random_char = ALPHABET_FIRST + rng.gen_range(0..ALPHABET_SIZE as u8);

    let mut builder = ContainerBuilder::with_capacity(
        (len + 1) * num_strings / comm.size() + len + 1,
        num_strings / comm.size() + 1,
    );
    let mut string = vec![0u8; len];
    for i in 0..num_strings {
        let pe = rng.gen_range(0..comm.size());
        if pe != comm.rank() {
            continue;
        }
        string[..k].fill(ALPHABET_FIRST);
        let mut index = i;
        for j in 0..k {
            if index == 0 {
                break;
            }
            string[k - 1 - j] = ALPHABET_FIRST + (index % ALPHABET_SIZE) as u8;
            index /= ALPHABET_SIZE;
        }
        string[k..].fill(random_char);
        builder.push(&string);
    }

    let mut container = builder.finish();
    let mut local_rng = StdRng::seed_from_u64(seed ^ comm.rank() as u64);
    container.descs_mut().shuffle(&mut local_rng);
    container.make_contiguous();
    container
}

fn read_text(path: &Path) -> Result<Vec<u8>> {
    let raw = fs::read(path)?;
    // Concatenate lines, dropping the newlines.
    Ok(raw.into_iter().filter(|&b| b != b'\n' && b != 0).collect())
}

fn file_lines<C: Communicator>(path: &Path, comm: &C) -> Result<StringContainer> {
    // Broadcast-then-split: only the root touches the file.
    let bytes = if comm.is_root() {
        fs::read(path)?
    } else {
        Vec::new()
    };
    let shared = comm.allgatherv(&bytes);

    let mut builder = ContainerBuilder::new();
    for (i, line) in shared.split(|&b| b == b'\n').enumerate() {
        if line.is_empty() {
            continue;
        }
        if i % comm.size() == comm.rank() {
            builder.push(line);
        }
    }
    Ok(builder.finish())
}

fn file_segment<C: Communicator>(
    path: &Path,
    bytes_per_rank: usize,
    comm: &C,
) -> Result<StringContainer> {
    if bytes_per_rank == 0 {
        return Err(Error::config("file segment size must be positive"));
    }
    let raw = fs::read(path)?;
    let begin = (comm.rank() * bytes_per_rank).min(raw.len());
    let end = ((comm.rank() + 1) * bytes_per_rank).min(raw.len());

    // Shift the slice to line boundaries: skip the line the predecessor
    // already owns, keep reading past `end` until the last line closes.
    let start = if begin == 0 {
        0
    } else {
        match raw[begin..].iter().position(|&b| b == b'\n') {
            Some(p) => begin + p + 1,
            None => raw.len(),
        }
    };
    let stop = match raw[end..].iter().position(|&b| b == b'\n') {
        Some(p) => end + p + 1,
        None => raw.len(),
    };

    let mut builder = ContainerBuilder::new();
    if start < stop {
        for line in raw[start..stop].split(|&b| b == b'\n') {
            if !line.is_empty() {
                builder.push(line);
            }
        }
    }
    Ok(builder.finish())
}

/// Suffix descriptors share the text arena; only the final terminator is
/// stored once.
fn suffixes<C: Communicator>(path: &Path, step: usize, comm: &C) -> Result<StringContainer> {
    if step == 0 {
        return Err(Error::config("suffix step must be positive"));
    }
    let mut text = read_text(path)?;
    let text_len = text.len();
    text.push(0);

    let mut descs = Vec::new();
    for (i, pos) in (0..text_len).step_by(step).enumerate() {
        if i % comm.size() == comm.rank() {
            descs.push(Str {
                offset: pos,
                len: text_len - pos,
            });
        }
    }
    Ok(StringContainer::from_parts(text, descs))
}

fn windows<C: Communicator>(
    path: &Path,
    window_len: usize,
    step: usize,
    comm: &C,
) -> Result<StringContainer> {
    if step == 0 || window_len == 0 {
        return Err(Error::config("window length and step must be positive"));
    }
    let text = read_text(path)?;

    let mut builder = ContainerBuilder::new();
    let mut i = 0;
    let mut start = 0;
    while start + window_len <= text.len() {
        if i % comm.size() == comm.rank() {
            builder.push(&text[start..start + window_len]);
        }
        i += 1;
        start += step;
    }
    Ok(builder.finish())
}

/// Minimal difference covers for the supported moduli.
fn cover_for(modulus: usize) -> Result<&'static [usize]> {
    Ok(match modulus {
        3 => &[0, 1],
        7 => &[0, 1, 3],
        13 => &[0, 1, 3, 9],
        21 => &[0, 1, 6, 8, 18],
        31 => &[0, 1, 3, 8, 12, 18],
        32 => &[0, 1, 2, 3, 4, 8, 12, 16, 20, 24, 28],
        64 => &[0, 1, 2, 3, 4, 5, 6, 7, 8, 16, 24, 32, 40, 48, 56],
        _ => {
            return Err(Error::config(format!(
                "no difference cover for modulus {modulus}"
            )))
        }
    })
}

fn difference_cover<C: Communicator>(
    path: &Path,
    modulus: usize,
    comm: &C,
) -> Result<StringContainer> {
    let cover = cover_for(modulus)?;
    let mut text = read_text(path)?;
    let text_len = text.len();
    text.push(0);

    let mut descs = Vec::new();
    let mut i = 0;
    for pos in 0..text_len {
        if cover.contains(&(pos % modulus)) {
            if i % comm.size() == comm.rank() {
                descs.push(Str {
                    offset: pos,
                    len: text_len - pos,
                });
            }
            i += 1;
        }
    }
    Ok(StringContainer::from_parts(text, descs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::ReduceOp;
    use crate::local_comm::run_cluster;
    use std::io::Write;

    fn temp_file(name: &str, content: &[u8]) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("diststringsort-{}-{}", std::process::id(), name));
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(content).unwrap();
        path
    }

    #[test]
    fn test_random_dn_ratio_global_count_and_length() {
        let results = run_cluster(4, |comm| {
            let spec = InputSpec::Random {
                num_strings: 200,
                len: 20,
                dn_ratio: 0.5,
            };
            let container = spec.generate(&comm).unwrap();
            let total = comm.allreduce_u64(container.len() as u64, ReduceOp::Sum);
            (total, container.descs().iter().map(|d| d.len).max())
        });
        for (total, max_len) in results {
            assert_eq!(total, 200);
            assert_eq!(max_len, Some(20));
        }
    }

    #[test]
    fn test_random_dn_ratio_is_distinct_enough() {
        // With ratio 1.0 the whole string participates in the number block,
        // so all strings are globally distinct.
        let results = run_cluster(2, |comm| {
            let spec = InputSpec::Random {
                num_strings: 100,
                len: 10,
                dn_ratio: 1.0,
            };
            let container = spec.generate(&comm).unwrap();
            (0..container.len())
                .map(|i| container.bytes(i).to_vec())
                .collect::<Vec<_>>()
        });
        let mut all: Vec<Vec<u8>> = results.into_iter().flatten().collect();
        let before = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), before);
        assert_eq!(before, 100);
    }

    #[test]
    fn test_file_lines_round_robin() {
        let path = temp_file("lines", b"alpha\nbravo\ncharlie\ndelta\n");
        let results = run_cluster(2, |comm| {
            let container = file_lines(&path, &comm).unwrap();
            (0..container.len())
                .map(|i| container.bytes(i).to_vec())
                .collect::<Vec<_>>()
        });
        assert_eq!(results[0], vec![b"alpha".to_vec(), b"charlie".to_vec()]);
        assert_eq!(results[1], vec![b"bravo".to_vec(), b"delta".to_vec()]);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_file_segment_covers_all_lines_once() {
        let content = b"one\ntwo\nthree\nfour\nfive\nsix\n";
        let path = temp_file("segment", content);
        let results = run_cluster(3, |comm| {
            let container = file_segment(&path, content.len() / 3, &comm).unwrap();
            (0..container.len())
                .map(|i| container.bytes(i).to_vec())
                .collect::<Vec<_>>()
        });
        let mut all: Vec<Vec<u8>> = results.into_iter().flatten().collect();
        all.sort();
        let mut expected: Vec<Vec<u8>> = content
            .split(|&b| b == b'\n')
            .filter(|l| !l.is_empty())
            .map(|l| l.to_vec())
            .collect();
        expected.sort();
        assert_eq!(all, expected);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_suffixes_share_the_arena() {
        let path = temp_file("suffix", b"abcd");
        let results = run_cluster(2, |comm| {
            let container = suffixes(&path, 1, &comm).unwrap();
            assert!(container.is_consistent());
            // One terminator for all suffixes.
            assert_eq!(container.char_size(), 5);
            (0..container.len())
                .map(|i| container.bytes(i).to_vec())
                .collect::<Vec<_>>()
        });
        assert_eq!(results[0], vec![b"abcd".to_vec(), b"cd".to_vec()]);
        assert_eq!(results[1], vec![b"bcd".to_vec(), b"d".to_vec()]);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_windows() {
        let path = temp_file("window", b"abcdef");
        let results = run_cluster(2, |comm| {
            let container = windows(&path, 3, 1, &comm).unwrap();
            (0..container.len())
                .map(|i| container.bytes(i).to_vec())
                .collect::<Vec<_>>()
        });
        assert_eq!(results[0], vec![b"abc".to_vec(), b"cde".to_vec()]);
        assert_eq!(results[1], vec![b"bcd".to_vec(), b"def".to_vec()]);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_difference_cover_positions() {
        let path = temp_file("dc", b"abcdefg");
        let results = run_cluster(1, |comm| {
            let container = difference_cover(&path, 3, &comm).unwrap();
            container.descs().iter().map(|d| d.offset).collect::<Vec<_>>()
        });
        // Positions p with p mod 3 in {0, 1}.
        assert_eq!(results[0], vec![0, 1, 3, 4, 6]);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn test_unknown_modulus_is_a_config_error() {
        assert!(cover_for(5).is_err());
        assert!(cover_for(13).is_ok());
    }
}
