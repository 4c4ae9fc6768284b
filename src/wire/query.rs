//! Legacy OP_QUERY and OP_REPLY bodies.

use bson::Document;

use super::{document_string, read_cstring, read_document, read_documents, take, write_document, WireError};

/// OP_QUERY request body.
#[derive(Debug, Clone, PartialEq)]
pub struct OpQuery {
    pub flags: i32,
    pub full_collection_name: String,
    pub number_to_skip: i32,
    pub number_to_return: i32,
    pub query: Document,
    pub return_fields_selector: Option<Document>,
}

impl OpQuery {
    /// The query document; for commands this is the command document.
    pub fn query(&self) -> &Document {
        &self.query
    }

    /// Database part of the `<db>.<collection>` namespace.
    pub fn database(&self) -> &str {
        self.full_collection_name
            .split_once('.')
            .map(|(db, _)| db)
            .unwrap_or(&self.full_collection_name)
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let (flags, rest) = take::<4>(buf)?;
        let (full_collection_name, rest) = read_cstring(rest)?;
        let (skip, rest) = take::<4>(rest)?;
        let (ret, rest) = take::<4>(rest)?;
        let (query, rest) = read_document(rest)?;

        let return_fields_selector = if rest.is_empty() {
            None
        } else {
            let (doc, tail) = read_document(rest)?;
            if !tail.is_empty() {
                return Err(WireError::Malformed(format!(
                    "{} trailing bytes after OP_QUERY",
                    tail.len()
                )));
            }
            Some(doc)
        };

        Ok(Self {
            flags: i32::from_le_bytes(flags),
            full_collection_name,
            number_to_skip: i32::from_le_bytes(skip),
            number_to_return: i32::from_le_bytes(ret),
            query,
            return_fields_selector,
        })
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) -> Result<(), WireError> {
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(self.full_collection_name.as_bytes());
        out.push(0);
        out.extend_from_slice(&self.number_to_skip.to_le_bytes());
        out.extend_from_slice(&self.number_to_return.to_le_bytes());
        write_document(&self.query, out)?;
        if let Some(selector) = &self.return_fields_selector {
            write_document(selector, out)?;
        }
        Ok(())
    }

    pub(crate) fn string_indent(&self) -> String {
        let mut s = format!(
            "Flags: {}\nFullCollectionName: {}\nNumberToSkip: {}\nNumberToReturn: {}\nQuery:\n{}\n",
            self.flags,
            self.full_collection_name,
            self.number_to_skip,
            self.number_to_return,
            document_string(&self.query),
        );
        if let Some(selector) = &self.return_fields_selector {
            s.push_str("ReturnFieldsSelector:\n");
            s.push_str(&document_string(selector));
            s.push('\n');
        }
        s
    }
}

/// OP_REPLY response body.
#[derive(Debug, Clone, PartialEq)]
pub struct OpReply {
    pub response_flags: i32,
    pub cursor_id: i64,
    pub starting_from: i32,
    pub documents: Vec<Document>,
}

impl OpReply {
    /// Reply carrying a single document.
    pub fn from_document(doc: Document) -> Self {
        Self {
            response_flags: 0,
            cursor_id: 0,
            starting_from: 0,
            documents: vec![doc],
        }
    }

    pub fn document(&self) -> Option<&Document> {
        self.documents.first()
    }

    pub(crate) fn decode(buf: &[u8]) -> Result<Self, WireError> {
        let (flags, rest) = take::<4>(buf)?;
        let (cursor, rest) = take::<8>(rest)?;
        let (from, rest) = take::<4>(rest)?;
        let (returned, rest) = take::<4>(rest)?;
        let documents = read_documents(rest)?;

        let returned = i32::from_le_bytes(returned);
        if returned as usize != documents.len() {
            return Err(WireError::Malformed(format!(
                "OP_REPLY declares {} documents, has {}",
                returned,
                documents.len()
            )));
        }

        Ok(Self {
            response_flags: i32::from_le_bytes(flags),
            cursor_id: i64::from_le_bytes(cursor),
            starting_from: i32::from_le_bytes(from),
            documents,
        })
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) -> Result<(), WireError> {
        out.extend_from_slice(&self.response_flags.to_le_bytes());
        out.extend_from_slice(&self.cursor_id.to_le_bytes());
        out.extend_from_slice(&self.starting_from.to_le_bytes());
        out.extend_from_slice(&(self.documents.len() as i32).to_le_bytes());
        for doc in &self.documents {
            write_document(doc, out)?;
        }
        Ok(())
    }

    pub(crate) fn string_indent(&self) -> String {
        let mut s = format!(
            "ResponseFlags: {}\nCursorID: {}\nStartingFrom: {}\nNumberReturned: {}\n",
            self.response_flags,
            self.cursor_id,
            self.starting_from,
            self.documents.len(),
        );
        for doc in &self.documents {
            s.push_str(&document_string(doc));
            s.push('\n');
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_query_database_from_namespace() {
        let q = OpQuery {
            flags: 0,
            full_collection_name: "admin.$cmd".to_string(),
            number_to_skip: 0,
            number_to_return: -1,
            query: doc! { "isMaster": 1 },
            return_fields_selector: None,
        };
        assert_eq!(q.database(), "admin");

        let mut buf = Vec::new();
        q.encode(&mut buf).unwrap();
        assert_eq!(OpQuery::decode(&buf).unwrap(), q);
    }

    #[test]
    fn test_reply_document_count_must_match() {
        let reply = OpReply::from_document(doc! { "ok": 1.0 });
        let mut buf = Vec::new();
        reply.encode(&mut buf).unwrap();
        // bump numberReturned
        buf[16] = 2;
        assert!(OpReply::decode(&buf).is_err());
    }
}
