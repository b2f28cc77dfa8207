// Attribute-list scanner for tag lines (`#TAG:NAME=VALUE,NAME="VALUE",...`).

use std::ops::Range;

/// One `NAME=VALUE` pair, addressed by byte ranges into the scanned line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: Range<usize>,
    /// Value span, quotes excluded.
    pub value: Range<usize>,
    pub quoted: bool,
}

/// Scan the attribute list of a tag line.
///
/// Quoted values may contain commas; a quoted value runs to the next `"`.
/// An unterminated quote swallows the rest of the line. Pairs without `=`
/// are skipped.
pub fn scan(line: &str) -> Vec<Attribute> {
    let Some(colon) = line.find(':') else {
        return Vec::new();
    };
    let bytes = line.as_bytes();
    let mut attributes = Vec::new();
    let mut pos = colon + 1;

    while pos < bytes.len() {
        while pos < bytes.len() && (bytes[pos] == b',' || bytes[pos] == b' ') {
            pos += 1;
        }
        let name_start = pos;
        while pos < bytes.len() && bytes[pos] != b'=' && bytes[pos] != b',' {
            pos += 1;
        }
        if pos >= bytes.len() || bytes[pos] == b',' {
            continue;
        }
        let name = name_start..pos;
        pos += 1;

        if pos < bytes.len() && bytes[pos] == b'"' {
            let value_start = pos + 1;
            let value_end = line[value_start..]
                .find('"')
                .map_or(bytes.len(), |i| value_start + i);
            attributes.push(Attribute {
                name,
                value: value_start..value_end,
                quoted: true,
            });
            pos = (value_end + 1).min(bytes.len());
        } else {
            let value_start = pos;
            while pos < bytes.len() && bytes[pos] != b',' {
                pos += 1;
            }
            attributes.push(Attribute {
                name,
                value: value_start..pos,
                quoted: false,
            });
        }
    }

    attributes
}

/// Span of the value of attribute `name` in `line`.
pub fn find(line: &str, name: &str) -> Option<Attribute> {
    scan(line)
        .into_iter()
        .find(|attr| line[attr.name.clone()].trim() == name)
}
