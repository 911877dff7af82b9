//! Tolerant version comparison exposed to scripts.
//!
//! Well-formed semantic versions compare with full semver precedence.
//! Anything else falls back to segment-wise comparison: versions split into
//! digit and letter runs, digit runs compare numerically, letter runs
//! lexically, and a numeric segment outranks an alphabetic one. Extra
//! trailing segments make a version newer.

use std::cmp::Ordering;

pub fn newer(a: &str, b: &str) -> bool {
    compare(a, b) == Ordering::Greater
}

pub fn older(a: &str, b: &str) -> bool {
    compare(a, b) == Ordering::Less
}

pub fn equal(a: &str, b: &str) -> bool {
    compare(a, b) == Ordering::Equal
}

pub fn compare(a: &str, b: &str) -> Ordering {
    let a = a.trim().trim_start_matches(['v', 'V']);
    let b = b.trim().trim_start_matches(['v', 'V']);

    if let (Ok(va), Ok(vb)) = (semver::Version::parse(a), semver::Version::parse(b)) {
        return va.cmp(&vb);
    }
    segment_compare(a, b)
}

#[derive(Debug, PartialEq, Eq)]
enum Segment<'a> {
    Number(u64),
    Word(&'a str),
}

fn segments(version: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut rest = version;
    while !rest.is_empty() {
        let Some(start) = rest.find(|c: char| c.is_ascii_alphanumeric()) else {
            break;
        };
        rest = &rest[start..];
        let numeric = rest.starts_with(|c: char| c.is_ascii_digit());
        let end = rest
            .find(|c: char| c.is_ascii_digit() != numeric || !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        let (run, tail) = rest.split_at(end);
        out.push(if numeric {
            // Overlong digit runs saturate rather than fail.
            Segment::Number(run.parse().unwrap_or(u64::MAX))
        } else {
            Segment::Word(run)
        });
        rest = tail;
    }
    out
}

fn segment_compare(a: &str, b: &str) -> Ordering {
    let sa = segments(a);
    let sb = segments(b);
    for pair in sa.iter().zip(sb.iter()) {
        let ord = match pair {
            (Segment::Number(x), Segment::Number(y)) => x.cmp(y),
            (Segment::Word(x), Segment::Word(y)) => x.cmp(y),
            (Segment::Number(_), Segment::Word(_)) => Ordering::Greater,
            (Segment::Word(_), Segment::Number(_)) => Ordering::Less,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    sa.len().cmp(&sb.len())
}
