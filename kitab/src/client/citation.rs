//! `[label](source:N)` citation markup.

use std::sync::OnceLock;

use regex::Regex;

fn citation_regex() -> &'static Regex {
    static CITATION: OnceLock<Regex> = OnceLock::new();
    CITATION.get_or_init(|| {
        Regex::new(r"\[([^\]]+)\]\(source:(\d+)\)").expect("citation pattern is valid")
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    /// A citation link; `index` is the 0-based source position.
    Citation { label: &'a str, index: usize },
}

/// Split answer text into plain runs and citation links, in order.
pub fn segments(text: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut last = 0;

    for caps in citation_regex().captures_iter(text) {
        let (Some(whole), Some(label), Some(index)) = (caps.get(0), caps.get(1), caps.get(2))
        else {
            continue;
        };

        if whole.start() > last {
            out.push(Segment::Text(&text[last..whole.start()]));
        }

        match index.as_str().parse::<usize>() {
            Ok(index) => out.push(Segment::Citation {
                label: label.as_str(),
                index,
            }),
            Err(_) => out.push(Segment::Text(whole.as_str())),
        }
        last = whole.end();
    }

    if last < text.len() {
        out.push(Segment::Text(&text[last..]));
    }

    out
}

/// Rewrite citations as `label[N+1]`, the 1-based markers the terminal
/// client uses for source shortcuts.
pub fn numbered_markers(text: &str) -> String {
    segments(text)
        .into_iter()
        .map(|segment| match segment {
            Segment::Text(text) => text.to_string(),
            Segment::Citation { label, index } => format!("{label}[{}]", index + 1),
        })
        .collect()
}
