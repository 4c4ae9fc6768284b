//! Line diffs between the local and upstream responses.

use std::fmt;

use similar::{DiffTag, TextDiff};

use crate::wire::{MsgBody, MsgHeader};

/// Unified diffs of headers and bodies. Empty strings mean "no difference".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseDiff {
    pub header: String,
    pub body: String,
}

impl ResponseDiff {
    pub fn compute(
        res_header: &MsgHeader,
        res_body: Option<&MsgBody>,
        proxy_header: &MsgHeader,
        proxy_body: Option<&MsgBody>,
    ) -> Self {
        let render = |body: Option<&MsgBody>| body.map(MsgBody::string_indent).unwrap_or_default();

        Self {
            header: unified(
                &res_header.to_string(),
                &proxy_header.to_string(),
                "res header",
                "proxy header",
            ),
            body: unified(&render(res_body), &render(proxy_body), "res body", "proxy body"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.body.is_empty()
    }
}

impl fmt::Display for ResponseDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Header diff:\n{}\nBody diff:\n{}", self.header, self.body)
    }
}

fn unified(old: &str, new: &str, old_label: &str, new_label: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    if diff.ops().iter().all(|op| op.tag() == DiffTag::Equal) {
        return String::new();
    }

    diff.unified_diff()
        .context_radius(1)
        .header(old_label, new_label)
        .to_string()
}
