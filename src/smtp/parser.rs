//! Parsing of DATA payloads into [`Email`] records
//!
//! Only the header block in front of the first empty line (and the header
//! blocks of MIME parts) is ever interpreted as headers. Everything else is
//! body text, whatever it looks like.

use crate::smtp::email::Email;

/// Nested multiparts deeper than this are treated as opaque leaves
const MAX_MIME_DEPTH: usize = 8;

/// A single unfolded header line
#[derive(Debug, Clone, PartialEq)]
struct Header {
    /// `None` for lines that carry no `Name:` prefix
    name: Option<String>,
    /// Text after the colon, untrimmed
    value: String,
    /// The line as received, continuation lines appended
    raw: String,
}

impl Header {
    fn is(&self, name: &str) -> bool {
        self.name
            .as_deref()
            .is_some_and(|n| n.eq_ignore_ascii_case(name))
    }

    fn trimmed_value(&self) -> &str {
        self.value.trim()
    }
}

/// A MIME leaf part: its media type and body lines
struct Leaf<'a> {
    media_type: String,
    body: &'a [String],
}

/// Split a DATA payload at its first empty line
///
/// Returns the header block and the body. A payload without an empty line
/// consists of headers only.
pub fn split_payload(lines: &[String]) -> (&[String], &[String]) {
    match lines.iter().position(|line| line.is_empty()) {
        Some(blank) => (&lines[..blank], &lines[blank + 1..]),
        None => (lines, &[]),
    }
}

/// Parse a complete DATA payload (already dot-unstuffed, without line endings)
pub fn parse_message(lines: &[String]) -> Email {
    let (header_block, body) = split_payload(lines);
    parse(header_block, body)
}

/// Build an [`Email`] from a header block and the body lines that follow it
pub fn parse(header_block: &[String], body: &[String]) -> Email {
    let top = parse_headers(header_block);

    let subject = top
        .iter()
        .find(|h| h.is("Subject"))
        .map(|h| h.trimmed_value().to_string())
        .unwrap_or_default();
    let from = addresses(&top, "From");
    let to = addresses(&top, "To");
    let mut headers: Vec<String> = top.iter().map(|h| h.raw.clone()).collect();

    let body_lines = match multipart_boundary(&top) {
        Some(boundary) => {
            let mut leaves = Vec::new();
            collect_parts(body, &boundary, &mut headers, &mut leaves, 1);
            select_text(&leaves).unwrap_or(body)
        }
        None => body,
    };

    Email::new(
        normalize_body(body_lines),
        subject,
        from,
        to,
        headers,
    )
}

/// Parse header lines, unfolding continuation lines into their header
fn parse_headers(lines: &[String]) -> Vec<Header> {
    let mut headers: Vec<Header> = Vec::new();

    for line in lines {
        let is_continuation = line.starts_with(' ') || line.starts_with('\t');
        if is_continuation {
            if let Some(last) = headers.last_mut() {
                last.value.push_str(line);
                last.raw.push_str(line);
                continue;
            }
        }

        // Whitespace between the name and the colon is tolerated
        let header = match line.split_once(':') {
            Some((name, value))
                if !name.trim_end().is_empty()
                    && !name.trim_end().contains(char::is_whitespace) =>
            {
                Header {
                    name: Some(name.trim_end().to_string()),
                    value: value.to_string(),
                    raw: line.clone(),
                }
            }
            _ => Header {
                name: None,
                value: line.clone(),
                raw: line.clone(),
            },
        };
        headers.push(header);
    }

    headers
}

/// Collect the comma-separated address tokens of every header named `name`
fn addresses(headers: &[Header], name: &str) -> Vec<String> {
    headers
        .iter()
        .filter(|h| h.is(name))
        .flat_map(|h| h.value.split(','))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect()
}

/// Lowercased media type of the first Content-Type header
fn media_type(headers: &[Header]) -> Option<String> {
    headers.iter().find(|h| h.is("Content-Type")).map(|h| {
        h.value
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    })
}

/// Boundary of a `multipart/*` Content-Type, if the headers declare one
fn multipart_boundary(headers: &[Header]) -> Option<String> {
    let content_type = headers.iter().find(|h| h.is("Content-Type"))?;
    if !media_type(headers)?.starts_with("multipart/") {
        return None;
    }

    content_type.value.split(';').skip(1).find_map(|param| {
        let (key, value) = param.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("boundary")
            .then(|| value.trim().trim_matches('"').to_string())
            .filter(|b| !b.is_empty())
    })
}

/// Split a multipart body into its parts
///
/// The preamble and the epilogue are discarded. An unterminated last part
/// runs to the end of the body.
fn split_multipart<'a>(lines: &'a [String], boundary: &str) -> Vec<&'a [String]> {
    let delimiter = format!("--{boundary}");
    let close = format!("--{boundary}--");

    let mut parts = Vec::new();
    let mut start = None;
    for (i, line) in lines.iter().enumerate() {
        let line = line.trim_end();
        if line == close {
            if let Some(s) = start.take() {
                parts.push(&lines[s..i]);
            }
            return parts;
        }
        if line == delimiter {
            if let Some(s) = start {
                parts.push(&lines[s..i]);
            }
            start = Some(i + 1);
        }
    }

    if let Some(s) = start {
        parts.push(&lines[s..]);
    }
    parts
}

/// Walk the MIME tree, gathering part headers and leaf bodies
fn collect_parts<'a>(
    body: &'a [String],
    boundary: &str,
    headers: &mut Vec<String>,
    leaves: &mut Vec<Leaf<'a>>,
    depth: usize,
) {
    for part in split_multipart(body, boundary) {
        let (header_block, part_body) = split_payload(part);
        let part_headers = parse_headers(header_block);
        headers.extend(part_headers.iter().map(|h| h.raw.clone()));

        match multipart_boundary(&part_headers) {
            Some(nested) if depth < MAX_MIME_DEPTH => {
                collect_parts(part_body, &nested, headers, leaves, depth + 1);
            }
            _ => leaves.push(Leaf {
                media_type: media_type(&part_headers).unwrap_or_else(|| "text/plain".to_string()),
                body: part_body,
            }),
        }
    }
}

/// Pick the body of the most relevant text part
fn select_text<'a>(leaves: &[Leaf<'a>]) -> Option<&'a [String]> {
    leaves
        .iter()
        .find(|leaf| leaf.media_type == "text/plain")
        .or_else(|| leaves.iter().find(|leaf| leaf.media_type.starts_with("text/")))
        .or_else(|| leaves.first())
        .map(|leaf| leaf.body)
}

/// Drop the transport's trailing blank line and collapse blank-only bodies
fn normalize_body(lines: &[String]) -> Vec<String> {
    let lines = match lines.split_last() {
        Some((last, rest)) if last.trim().is_empty() => rest,
        _ => lines,
    };

    if lines.iter().all(|line| line.trim().is_empty()) {
        Vec::new()
    } else {
        lines.to_vec()
    }
}
