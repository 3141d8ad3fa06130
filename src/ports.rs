use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Default server-list port followed by the next four that hosts commonly use
/// for additional instances.
pub const DEFAULT_PORTS: [u16; 5] = [25565, 25566, 25567, 25568, 25569];

/// Parse a port list into deduplicated ports (1..=65535), first appearance wins.
///
/// Entries are separated by newlines or commas and may be:
/// - a single port: `25565`
/// - an inclusive range: `25565-25570`
///
/// Everything after `#` on a line is a comment.
pub fn parse_ports_str(s: &str) -> Result<Vec<u16>> {
    let mut out: Vec<u16> = Vec::new();
    let mut seen = HashSet::new();

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
        for item in line.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            if let Some((a, b)) = item.split_once('-') {
                let start = parse_port_str(a.trim())
                    .with_context(|| format!("line {line_no}: invalid start in range: {a}"))?;
                let end = parse_port_str(b.trim())
                    .with_context(|| format!("line {line_no}: invalid end in range: {b}"))?;
                if start > end {
                    bail!("line {line_no}: invalid range {start}-{end} (start > end)");
                }
                for p in start..=end {
                    if seen.insert(p) {
                        out.push(p);
                    }
                }
                continue;
            }

            let p = parse_port_str(item)
                .with_context(|| format!("line {line_no}: invalid port value: {item}"))?;
            if seen.insert(p) {
                out.push(p);
            }
        }
    }

    Ok(out)
}

pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<Vec<u16>> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read ports file: {}", path.as_ref().display()))?;
    parse_ports_str(&content)
}

pub fn default_ports() -> Vec<u16> {
    DEFAULT_PORTS.to_vec()
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > 65535 {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}
