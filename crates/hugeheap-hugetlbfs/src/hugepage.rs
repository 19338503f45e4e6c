use lazy_static::lazy_static;
use serde::Serialize;
use std::fs::File;
use std::io::Read;

use hugeheap_core::util::Size;
// https://www.kernel.org/doc/Documentation/vm/hugetlbpage.txt
//
// The output of "cat /proc/meminfo" will include lines like:
// ...
// HugePages_Total: uuu
// HugePages_Free:  vvv
// HugePages_Rsvd:  www
// HugePages_Surp:  xxx
// Hugepagesize:    yyy kB
// Hugetlb:         zzz kB

// constant.
const MEMINFO_PATH: &str = "/proc/meminfo";
const TOKEN: &str = "Hugepagesize:";

lazy_static! {
    /// Default hugepage size of the system, read once from `/proc/meminfo`.
    pub static ref HUGEPAGE_SIZE: Option<Size> = {
        let buf = read_meminfo().unwrap_or_default();
        parse_hugepage_size(&buf)
    };
}

fn read_meminfo() -> std::io::Result<String> {
    let mut s = String::new();
    File::open(MEMINFO_PATH)?.read_to_string(&mut s)?;
    Ok(s)
}

/// Finds the value of `token` in meminfo-formatted text, honoring a `kB` unit.
fn meminfo_value(s: &str, token: &str) -> Option<usize> {
    let line = s.lines().find(|line| line.starts_with(token))?;
    let mut parts = line.strip_prefix(token)?.split_whitespace();
    let value = parts.next()?.parse::<usize>().ok()?;
    let unit = match parts.next() {
        Some("kB") => 1024,
        _ => 1,
    };
    value.checked_mul(unit)
}

fn parse_hugepage_size(s: &str) -> Option<Size> {
    meminfo_value(s, TOKEN)
        .filter(|size| *size > 0)
        .map(Size::from_bytes)
}

/// Snapshot of the system hugepage pool counters.
///
/// `reserved` pages are promised to mappings but not yet faulted in, so the
/// pages really available to new mappings are `free - reserved`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HugepagePool {
    /// `HugePages_Total`
    pub total: usize,
    /// `HugePages_Free`
    pub free: usize,
    /// `HugePages_Rsvd`
    pub reserved: usize,
    /// `HugePages_Surp`
    pub surplus: usize,
}

impl HugepagePool {
    /// Reads the current counters from `/proc/meminfo`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if `/proc/meminfo` cannot be read.
    pub fn read() -> std::io::Result<Self> {
        Ok(Self::parse(&read_meminfo()?))
    }

    /// Parses the counters from meminfo-formatted text. Missing counters are zero.
    pub fn parse(s: &str) -> Self {
        let value = |token| meminfo_value(s, token).unwrap_or(0);
        HugepagePool {
            total: value("HugePages_Total:"),
            free: value("HugePages_Free:"),
            reserved: value("HugePages_Rsvd:"),
            surplus: value("HugePages_Surp:"),
        }
    }

    /// Pages that neither back a mapping nor are promised to one.
    pub fn available(&self) -> usize {
        self.free.saturating_sub(self.reserved)
    }
}
