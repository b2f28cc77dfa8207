use super::attributes;
use super::{
    KEY_TAG, KeyScope, LineEnding, Manifest, ManifestLine, SESSION_KEY_TAG, STREAM_INF_TAG,
};

/// Scan playlist text into typed lines. Never fails: anything unrecognized
/// is kept verbatim.
pub fn parse_manifest(text: &str) -> Manifest {
    let line_ending = if text.contains("\r\n") {
        LineEnding::CrLf
    } else {
        LineEnding::Lf
    };
    let trailing_newline = text.ends_with('\n');

    let body = text.strip_suffix('\n').unwrap_or(text);
    let body = body.strip_suffix('\r').unwrap_or(body);
    let lines = if text.is_empty() {
        Vec::new()
    } else {
        body.split('\n')
            .map(|line| classify(line.strip_suffix('\r').unwrap_or(line)))
            .collect()
    };

    Manifest {
        lines,
        line_ending,
        trailing_newline,
    }
}

fn classify(line: &str) -> ManifestLine {
    let raw = line.to_string();

    if line.trim().is_empty() {
        return ManifestLine::Blank(raw);
    }

    if !line.starts_with('#') {
        let uri = line.trim().to_string();
        return ManifestLine::SegmentReference { raw, uri };
    }

    if line.starts_with(STREAM_INF_TAG) {
        let bandwidth = attributes::find(line, "BANDWIDTH")
            .and_then(|attr| line[attr.value].trim().parse::<u64>().ok());
        return ManifestLine::VariantStream { raw, bandwidth };
    }

    let scope = if line.starts_with(SESSION_KEY_TAG) {
        Some(KeyScope::Session)
    } else if line.starts_with(KEY_TAG) {
        Some(KeyScope::Segment)
    } else {
        None
    };
    if let Some(scope) = scope {
        return match attributes::find(line, "URI") {
            Some(attr) if attr.quoted && !attr.value.is_empty() => ManifestLine::KeyReference {
                uri: line[attr.value.clone()].to_string(),
                uri_span: attr.value,
                raw,
                scope,
            },
            _ => ManifestLine::Other(raw),
        };
    }

    if line.starts_with("#EXT") {
        ManifestLine::Other(raw)
    } else {
        ManifestLine::Comment(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MEDIA: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:4
# generated by packager
#EXT-X-KEY:METHOD=AES-128,URI=\"https://keys.example.com/k1.key\"
#EXTINF:4.0,
seg0.ts
#EXT-X-SESSION-KEY:METHOD=AES-128,URI=\"k2.key\"
#EXTINF:4.0,
  seg1.ts
#EXT-X-ENDLIST
";

    #[test]
    fn classifies_every_line_in_order() {
        let manifest = parse_manifest(MEDIA);
        assert_eq!(manifest.lines.len(), 11);
        assert!(matches!(manifest.lines[0], ManifestLine::Other(_)));
        assert!(matches!(manifest.lines[3], ManifestLine::Comment(_)));
        assert!(matches!(
            &manifest.lines[4],
            ManifestLine::KeyReference { uri, scope: KeyScope::Segment, .. }
                if uri == "https://keys.example.com/k1.key"
        ));
        assert!(matches!(
            &manifest.lines[7],
            ManifestLine::KeyReference { uri, scope: KeyScope::Session, .. } if uri == "k2.key"
        ));
        assert!(matches!(
            &manifest.lines[9],
            ManifestLine::SegmentReference { raw, uri } if raw == "  seg1.ts" && uri == "seg1.ts"
        ));
        assert_eq!(manifest.key_count(), 2);
        assert_eq!(manifest.segment_count(), 2);
        assert!(manifest.trailing_newline);
    }

    #[test]
    fn key_without_uri_is_kept_verbatim() {
        let manifest = parse_manifest("#EXT-X-KEY:METHOD=NONE\n");
        assert_eq!(
            manifest.lines,
            vec![ManifestLine::Other("#EXT-X-KEY:METHOD=NONE".to_string())]
        );
    }

    #[test]
    fn malformed_tags_pass_through() {
        let manifest = parse_manifest("#EXT-X-STREAM-INF:BANDWIDTH=lots\n#EXT-X-WHATEVER\n");
        assert_eq!(
            manifest.lines[0],
            ManifestLine::VariantStream {
                raw: "#EXT-X-STREAM-INF:BANDWIDTH=lots".to_string(),
                bandwidth: None
            }
        );
        assert_eq!(
            manifest.lines[1],
            ManifestLine::Other("#EXT-X-WHATEVER".to_string())
        );
    }

    #[test]
    fn tag_match_is_case_sensitive() {
        let manifest = parse_manifest("#ext-x-key:URI=\"a.key\"\n");
        assert!(matches!(manifest.lines[0], ManifestLine::Comment(_)));
    }

    #[test]
    fn empty_text() {
        let manifest = parse_manifest("");
        assert!(manifest.lines.is_empty());
        assert_eq!(manifest.render(), "");
    }
}
