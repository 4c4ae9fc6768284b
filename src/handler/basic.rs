//! Built-in command handler.
//!
//! Serves the handshake and diagnostic commands every driver sends on connect,
//! plus a small in-memory user catalog. It is not a query engine.

use std::sync::Arc;

use bson::{doc, Bson, Document};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::BoxFuture;

use super::protoerr::required_str;
use super::{ErrorCode, Handler, HandlerError, Request, Response};
use crate::context::Context;
use crate::wire::{command_name, MAX_MSG_LEN};

const MAX_BSON_OBJECT_SIZE: i32 = 16 * 1024 * 1024;
const MAX_WRITE_BATCH_SIZE: i32 = 100_000;
const MAX_WIRE_VERSION: i32 = 21;

/// Users keyed by (database, user name).
#[derive(Debug, Default)]
pub struct UserCatalog {
    users: DashMap<(String, String), Vec<Bson>>,
}

impl UserCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a user; returns false if it already exists.
    pub fn create(&self, db: &str, user: &str, roles: Vec<Bson>) -> bool {
        match self.users.entry((db.to_string(), user.to_string())) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(roles);
                true
            }
        }
    }

    /// User documents for `db`, optionally filtered by name, sorted by name.
    pub fn info(&self, db: &str, user: Option<&str>) -> Vec<Document> {
        let mut users: Vec<Document> = self
            .users
            .iter()
            .filter(|e| e.key().0 == db && user.map_or(true, |u| e.key().1 == u))
            .map(|e| {
                let (db, name) = e.key();
                doc! {
                    "_id": format!("{}.{}", db, name),
                    "user": name.as_str(),
                    "db": db.as_str(),
                    "roles": e.value().clone(),
                }
            })
            .collect();
        users.sort_by(|a, b| a.get_str("user").ok().cmp(&b.get_str("user").ok()));
        users
    }

    /// Removes every user of `db` and returns how many were removed.
    pub fn drop_all(&self, db: &str) -> i32 {
        let before = self.users.len();
        self.users.retain(|(user_db, _), _| user_db != db);
        (before - self.users.len()) as i32
    }
}

/// Handler for the built-in command set.
#[derive(Debug, Clone, Default)]
pub struct BasicHandler {
    users: Arc<UserCatalog>,
}

impl BasicHandler {
    /// Creates a handler serving users from `users`.
    pub fn new(users: Arc<UserCatalog>) -> Self {
        Self { users }
    }

    fn dispatch(&self, req: &Request) -> Result<Response, HandlerError> {
        let doc = req.document()?;
        let command = command_name(doc).unwrap_or_default().to_string();

        // Every command must name its database.
        req.database()?;

        let reply = match command.as_str() {
            "ping" => doc! { "ok": 1.0 },
            "hello" => self.hello(doc, "isWritablePrimary"),
            "isMaster" | "ismaster" => self.hello(doc, "ismaster"),
            "buildInfo" | "buildinfo" => doc! {
                "version": env!("CARGO_PKG_VERSION"),
                "gitVersion": "",
                "bits": 64,
                "maxBsonObjectSize": MAX_BSON_OBJECT_SIZE,
                "ok": 1.0,
            },
            "createUser" => self.create_user(req, doc)?,
            "usersInfo" => self.users_info(req, doc)?,
            "dropAllUsersFromDatabase" => self.drop_all_users(req)?,
            _ => {
                return Err(HandlerError::command(
                    ErrorCode::CommandNotFound,
                    format!("no such command: '{}'", command),
                    command.clone(),
                ))
            }
        };

        Response::from_document(req, reply)
    }

    fn hello(&self, _doc: &Document, primary_field: &str) -> Document {
        let mut reply = Document::new();
        reply.insert(primary_field, true);
        reply.insert("maxBsonObjectSize", MAX_BSON_OBJECT_SIZE);
        reply.insert("maxMessageSizeBytes", MAX_MSG_LEN as i32);
        reply.insert("maxWriteBatchSize", MAX_WRITE_BATCH_SIZE);
        reply.insert("localTime", bson::DateTime::now());
        reply.insert("minWireVersion", 0);
        reply.insert("maxWireVersion", MAX_WIRE_VERSION);
        reply.insert("readOnly", false);
        reply.insert("ok", 1.0);
        reply
    }

    fn create_user(&self, req: &Request, doc: &Document) -> Result<Document, HandlerError> {
        let db = req.database()?;
        let user = required_str(doc, "createUser")?;
        let roles = match doc.get("roles") {
            Some(Bson::Array(roles)) => roles.clone(),
            _ => Vec::new(),
        };

        if !self.users.create(&db, user, roles) {
            return Err(HandlerError::command(
                ErrorCode::Location51003,
                format!("User \"{}@{}\" already exists", user, db),
                "createUser",
            ));
        }

        Ok(doc! { "ok": 1.0 })
    }

    fn users_info(&self, req: &Request, doc: &Document) -> Result<Document, HandlerError> {
        let db = req.database()?;
        let filter = match doc.get("usersInfo") {
            Some(Bson::String(name)) => Some(name.as_str()),
            _ => None,
        };

        let users: Vec<Bson> = self
            .users
            .info(&db, filter)
            .into_iter()
            .map(Bson::Document)
            .collect();

        Ok(doc! { "users": users, "ok": 1.0 })
    }

    fn drop_all_users(&self, req: &Request) -> Result<Document, HandlerError> {
        let db = req.database()?;
        let n = self.users.drop_all(&db);
        Ok(doc! { "n": n, "ok": 1.0 })
    }
}

impl Handler for BasicHandler {
    fn handle<'a>(&'a self, ctx: &'a Context, req: Request) -> BoxFuture<'a, Result<Response, HandlerError>> {
        Box::pin(async move {
            if let Some(info) = ctx.conn_info() {
                tracing::trace!(connection_id = %info.id, "Handling command locally");
            }
            self.dispatch(&req)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{MsgBody, MsgHeader, OpCode, OpMsg, OpQuery};

    fn msg(doc: Document) -> Request {
        Request::new(MsgHeader::new(OpCode::Msg), MsgBody::Msg(OpMsg::from_document(doc)))
    }

    fn reply_doc(resp: Response) -> Document {
        match resp.into_parts().1 {
            MsgBody::Msg(m) => m.section0().unwrap().clone(),
            MsgBody::Reply(r) => r.document().unwrap().clone(),
            other => panic!("unexpected body {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ping() {
        let h = BasicHandler::default();
        let ctx = Context::background();
        let resp = h.handle(&ctx, msg(doc! { "ping": 1, "$db": "admin" })).await.unwrap();
        assert_eq!(reply_doc(resp).get_f64("ok").unwrap(), 1.0);
    }

    #[tokio::test]
    async fn test_query_is_master_replies_with_op_reply() {
        let h = BasicHandler::default();
        let ctx = Context::background();
        let query = OpQuery {
            flags: 0,
            full_collection_name: "admin.$cmd".into(),
            number_to_skip: 0,
            number_to_return: -1,
            query: doc! { "isMaster": 1 },
            return_fields_selector: None,
        };
        let req = Request::new(MsgHeader::new(OpCode::Query), MsgBody::Query(query));

        let resp = h.handle(&ctx, req).await.unwrap();
        assert_eq!(resp.header().op_code, OpCode::Reply);
        assert!(reply_doc(resp).get_bool("ismaster").unwrap());
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let h = BasicHandler::default();
        let ctx = Context::background();
        let err = h.handle(&ctx, msg(doc! { "frobnicate": 1, "$db": "test" })).await.unwrap_err();
        match err {
            HandlerError::Command { code, argument, .. } => {
                assert_eq!(code, ErrorCode::CommandNotFound);
                assert_eq!(argument, "frobnicate");
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_drop_all_users_from_database() {
        let users = Arc::new(UserCatalog::new());
        let h = BasicHandler::new(users.clone());
        let ctx = Context::background();

        for (db, user) in [("app", "alice"), ("app", "bob"), ("other", "carol")] {
            h.handle(&ctx, msg(doc! { "createUser": user, "roles": [], "$db": db }))
                .await
                .unwrap();
        }

        let resp = h
            .handle(&ctx, msg(doc! { "dropAllUsersFromDatabase": 1, "$db": "app" }))
            .await
            .unwrap();
        assert_eq!(reply_doc(resp).get_i32("n").unwrap(), 2);

        assert!(users.info("app", None).is_empty());
        assert_eq!(users.info("other", None).len(), 1);

        let resp = h
            .handle(&ctx, msg(doc! { "dropAllUsersFromDatabase": 1, "$db": "app" }))
            .await
            .unwrap();
        assert_eq!(reply_doc(resp).get_i32("n").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_create_user_twice() {
        let h = BasicHandler::default();
        let ctx = Context::background();
        let req = doc! { "createUser": "alice", "$db": "app" };

        h.handle(&ctx, msg(req.clone())).await.unwrap();
        let err = h.handle(&ctx, msg(req)).await.unwrap_err();
        assert!(matches!(err, HandlerError::Command { code: ErrorCode::Location51003, .. }));
    }

    #[tokio::test]
    async fn test_missing_db() {
        let h = BasicHandler::default();
        let ctx = Context::background();
        let err = h
            .handle(&ctx, msg(doc! { "dropAllUsersFromDatabase": 1 }))
            .await
            .unwrap_err();
        assert!(matches!(err, HandlerError::Command { code: ErrorCode::BadValue, .. }));

        for command in ["ping", "hello", "isMaster", "buildInfo"] {
            let mut body = Document::new();
            body.insert(command, 1);
            let err = h.handle(&ctx, msg(body)).await.unwrap_err();
            assert!(
                matches!(err, HandlerError::Command { code: ErrorCode::BadValue, .. }),
                "{} without $db: {:?}",
                command,
                err
            );
        }
    }

    #[tokio::test]
    async fn test_concurrent_create_user_admits_one() {
        let users = Arc::new(UserCatalog::new());
        let mut tasks = Vec::new();
        for i in 0..16 {
            let users = users.clone();
            tasks.push(tokio::spawn(async move {
                users.create("test", "alice", vec![Bson::Int32(i)])
            }));
        }

        let mut created = 0;
        for task in tasks {
            if task.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(users.info("test", Some("alice")).len(), 1);
    }
}
