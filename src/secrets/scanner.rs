//! Line-oriented credential scanning.
//!
//! Positions are tracked as line number plus in-line byte offset. Each raw
//! regex hit is widened outward until a quote, space, `=` or line boundary,
//! so a token a narrow pattern only partially matched is still recovered
//! whole. Overlapping hits on the same line are deduplicated, keeping the
//! earliest (and widest) span.

use super::signatures::SignatureSet;
use std::ops::Range;

/// A credential found in scanned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretMatch {
    /// Service the credential belongs to.
    pub service: String,
    /// Credential type within the service.
    pub kind: String,
    /// The literal (widened) credential value.
    pub value: String,
    /// 1-based line number.
    pub line: usize,
    /// Byte offset of the match start within its line.
    pub start: usize,
    /// Byte offset of the match end within its line.
    pub end: usize,
}

/// Scan `text` for credentials.
pub fn scan(text: &str, signatures: &SignatureSet) -> Vec<SecretMatch> {
    scan_ranges(text, signatures)
        .into_iter()
        .map(|(m, _)| m)
        .collect()
}

/// Scan `text`, also returning each match's absolute byte range within the
/// whole text (used by the redactor for back-to-front replacement).
pub(crate) fn scan_ranges(
    text: &str,
    signatures: &SignatureSet,
) -> Vec<(SecretMatch, Range<usize>)> {
    let mut hits: Vec<(SecretMatch, Range<usize>)> = Vec::new();

    let mut line_base = 0usize;
    for (idx, line) in text.split('\n').enumerate() {
        let mut line_hits: Vec<(SecretMatch, Range<usize>)> = Vec::new();

        for sig in signatures.iter() {
            for m in sig.regex.find_iter(line) {
                let (start, end) = widen(line, m.start(), m.end());
                line_hits.push((
                    SecretMatch {
                        service: sig.service.clone(),
                        kind: sig.name.clone(),
                        value: line[start..end].to_string(),
                        line: idx + 1,
                        start,
                        end,
                    },
                    line_base + start..line_base + end,
                ));
            }
        }

        // Earliest span wins; later hits overlapping a kept span are dropped.
        line_hits.sort_by_key(|(m, _)| (m.start, m.end));
        let mut kept_end = 0usize;
        let mut first = true;
        for (m, range) in line_hits {
            if first || m.start >= kept_end {
                kept_end = m.end;
                first = false;
                hits.push((m, range));
            }
        }

        line_base += line.len() + 1;
    }

    hits
}

/// Widen a span outward to the nearest quote/space/`=`/line boundary.
fn widen(line: &str, mut start: usize, mut end: usize) -> (usize, usize) {
    let bytes = line.as_bytes();
    while start > 0 && !is_boundary(bytes[start - 1]) {
        start -= 1;
    }
    while end < bytes.len() && !is_boundary(bytes[end]) {
        end += 1;
    }
    (start, end)
}

/// Token boundary characters; all ASCII, so widening never splits a
/// multi-byte character.
fn is_boundary(byte: u8) -> bool {
    matches!(byte, b'"' | b'\'' | b'`' | b' ' | b'\t' | b'=' | b'\r' | b',')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn github_set() -> SignatureSet {
        SignatureSet::builtin()
    }

    #[test]
    fn test_scan_finds_token_with_position() {
        let token = format!("ghp_{}", "a".repeat(36));
        let text = format!("line one\ntoken = \"{token}\"\nline three");

        let matches = scan(&text, &github_set());
        assert_eq!(matches.len(), 1);

        let m = &matches[0];
        assert_eq!(m.service, "github");
        assert_eq!(m.kind, "personal-access-token");
        assert_eq!(m.value, token);
        assert_eq!(m.line, 2);
        assert_eq!(m.start, 9);
        assert_eq!(m.end, 9 + token.len());
    }

    #[test]
    fn test_widening_recovers_full_token() {
        // A signature that under-matches: only the prefix of the credential.
        let set = SignatureSet::from_toml_str(r#"acme = [ { "token" = 'acme_[0-9]{4}' } ]"#)
            .unwrap();

        let text = "key=acme_1234SUFFIXTAIL more";
        let matches = scan(text, &set);
        assert_eq!(matches.len(), 1);
        // Widened right up to the space, left up to the '='.
        assert_eq!(matches[0].value, "acme_1234SUFFIXTAIL");
    }

    #[test]
    fn test_overlapping_matches_deduped() {
        let set = SignatureSet::from_toml_str(
            r#"acme = [ { "long" = 'acme_[0-9]{6}' }, { "short" = 'acme_[0-9]{4}' } ]"#,
        )
        .unwrap();

        let matches = scan("token acme_123456 end", &set);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].value, "acme_123456");
    }

    #[test]
    fn test_multiple_lines_multiple_matches() {
        let t1 = format!("ghp_{}", "b".repeat(36));
        let t2 = format!("ghs_{}", "c".repeat(36));
        let text = format!("a {t1}\nb {t2}");

        let matches = scan(&text, &github_set());
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].line, 1);
        assert_eq!(matches[1].line, 2);
        assert_eq!(matches[1].kind, "server-to-server-token");
    }

    #[test]
    fn test_absolute_ranges_index_into_text() {
        let token = format!("ghp_{}", "d".repeat(36));
        let text = format!("first\nsecond {token}");

        let ranges = scan_ranges(&text, &github_set());
        assert_eq!(ranges.len(), 1);
        let (m, range) = &ranges[0];
        assert_eq!(&text[range.clone()], m.value);
    }

    #[test]
    fn test_clean_text_yields_nothing() {
        let matches = scan("nothing secret here\njust code", &github_set());
        assert!(matches.is_empty());
    }
}
