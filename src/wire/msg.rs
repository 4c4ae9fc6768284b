//! OP_MSG body.

use bson::Document;

use super::{document_string, read_cstring, read_document, take, write_document, WireError};

/// `checksumPresent` flag bit.
const CHECKSUM_PRESENT: u32 = 1;

/// One OP_MSG section.
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    /// Kind 0: a single command document.
    Body(Document),
    /// Kind 1: an identified document sequence.
    Sequence {
        identifier: String,
        documents: Vec<Document>,
    },
}

/// OP_MSG: flag bits, sections and an optional checksum.
#[derive(Debug, Clone, PartialEq)]
pub struct OpMsg {
    pub flag_bits: u32,
    pub sections: Vec<Section>,
    /// CRC-32C checksum bytes, kept verbatim.
    pub checksum: Option<[u8; 4]>,
}

impl OpMsg {
    /// Message with a single kind-0 section.
    pub fn from_document(doc: Document) -> Self {
        Self {
            flag_bits: 0,
            sections: vec![Section::Body(doc)],
            checksum: None,
        }
    }

    /// Returns the kind-0 document.
    pub fn section0(&self) -> Result<&Document, WireError> {
        let mut bodies = self.sections.iter().filter_map(|s| match s {
            Section::Body(doc) => Some(doc),
            Section::Sequence { .. } => None,
        });

        match (bodies.next(), bodies.next()) {
            (Some(doc), None) => Ok(doc),
            (None, _) => Err(WireError::Malformed(
                "OP_MSG has no kind 0 section".to_string(),
            )),
            (Some(_), Some(_)) => Err(WireError::Malformed(
                "OP_MSG has more than one kind 0 section".to_string(),
            )),
        }
    }

    pub fn section0_mut(&mut self) -> Option<&mut Document> {
        self.sections.iter_mut().find_map(|s| match s {
            Section::Body(doc) => Some(doc),
            Section::Sequence { .. } => None,
        })
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let (flags, mut rest) = take::<4>(buf)?;
        let flag_bits = u32::from_le_bytes(flags);

        let mut checksum = None;
        if flag_bits & CHECKSUM_PRESENT != 0 {
            if rest.len() < 4 {
                return Err(WireError::Malformed("OP_MSG checksum missing".to_string()));
            }
            let (sections, tail) = rest.split_at(rest.len() - 4);
            checksum = Some([tail[0], tail[1], tail[2], tail[3]]);
            rest = sections;
        }

        let mut sections = Vec::new();
        while !rest.is_empty() {
            let kind = rest[0];
            rest = &rest[1..];

            match kind {
                0 => {
                    let (doc, tail) = read_document(rest)?;
                    sections.push(Section::Body(doc));
                    rest = tail;
                }
                1 => {
                    let (size, _) = take::<4>(rest)?;
                    let size = i32::from_le_bytes(size);
                    if size < 4 || size as usize > rest.len() {
                        return Err(WireError::Malformed(format!(
                            "invalid document sequence size {}",
                            size
                        )));
                    }
                    let (seq, tail) = rest.split_at(size as usize);
                    let (identifier, mut docs_buf) = read_cstring(&seq[4..])?;

                    let mut documents = Vec::new();
                    while !docs_buf.is_empty() {
                        let (doc, t) = read_document(docs_buf)?;
                        documents.push(doc);
                        docs_buf = t;
                    }

                    sections.push(Section::Sequence { identifier, documents });
                    rest = tail;
                }
                other => {
                    return Err(WireError::Malformed(format!(
                        "unknown OP_MSG section kind {}",
                        other
                    )));
                }
            }
        }

        Ok(Self {
            flag_bits,
            sections,
            checksum,
        })
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) -> Result<(), WireError> {
        let mut flag_bits = self.flag_bits & !CHECKSUM_PRESENT;
        if self.checksum.is_some() {
            flag_bits |= CHECKSUM_PRESENT;
        }
        out.extend_from_slice(&flag_bits.to_le_bytes());

        for section in &self.sections {
            match section {
                Section::Body(doc) => {
                    out.push(0);
                    write_document(doc, out)?;
                }
                Section::Sequence { identifier, documents } => {
                    out.push(1);
                    let start = out.len();
                    out.extend_from_slice(&[0; 4]);
                    out.extend_from_slice(identifier.as_bytes());
                    out.push(0);
                    for doc in documents {
                        write_document(doc, out)?;
                    }
                    let size = (out.len() - start) as i32;
                    out[start..start + 4].copy_from_slice(&size.to_le_bytes());
                }
            }
        }

        if let Some(checksum) = self.checksum {
            out.extend_from_slice(&checksum);
        }

        Ok(())
    }

    pub(crate) fn string_indent(&self) -> String {
        let mut s = format!("FlagBits: {}\n", self.flag_bits);
        for section in &self.sections {
            match section {
                Section::Body(doc) => {
                    s.push_str("Section 0:\n");
                    s.push_str(&document_string(doc));
                    s.push('\n');
                }
                Section::Sequence { identifier, documents } => {
                    s.push_str(&format!("Section 1 ({}):\n", identifier));
                    for doc in documents {
                        s.push_str(&document_string(doc));
                        s.push('\n');
                    }
                }
            }
        }
        if let Some(checksum) = self.checksum {
            s.push_str(&format!("Checksum: {}\n", u32::from_le_bytes(checksum)));
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_decode_sections() {
        let msg = OpMsg {
            flag_bits: 0,
            sections: vec![
                Section::Body(doc! { "insert": "users", "$db": "test" }),
                Section::Sequence {
                    identifier: "documents".to_string(),
                    documents: vec![doc! { "_id": 1 }, doc! { "_id": 2 }],
                },
            ],
            checksum: None,
        };

        let mut buf = Vec::new();
        msg.encode(&mut buf).unwrap();
        let decoded = OpMsg::decode(&buf).unwrap();

        assert_eq!(decoded, msg);
        assert_eq!(decoded.section0().unwrap().get_str("insert").unwrap(), "users");
    }

    #[test]
    fn test_section0_missing() {
        let msg = OpMsg {
            flag_bits: 0,
            sections: vec![],
            checksum: None,
        };
        assert!(msg.section0().is_err());
    }

    #[test]
    fn test_unknown_section_kind_is_malformed() {
        let buf = [0, 0, 0, 0, 7, 1, 2, 3];
        assert!(matches!(OpMsg::decode(&buf), Err(WireError::Malformed(_))));
    }
}
