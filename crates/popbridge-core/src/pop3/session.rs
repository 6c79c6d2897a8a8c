//! POP3 Session management
//!
//! One session per connection. The session owns its state and, once
//! authenticated, its message store; nothing is shared with other
//! sessions.

use super::command::{Pop3Command, Pop3Parser};
use super::response::{Pop3Response, Response};
use crate::auth::CredentialVerifier;
use popbridge_common::{Error, Exclusions, MessageNumber};
use popbridge_storage::MessageStore;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// POP3 session state
#[derive(Debug)]
pub enum SessionState<S> {
    /// Not authenticated yet; `identity` is the name given with USER
    Authorization { identity: Option<String> },
    /// Authenticated; `marked` holds the numbers flagged by DELE
    Transaction { store: S, marked: Exclusions },
    /// QUIT processed, the connection is closing
    Update,
}

/// Outcome of one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub response: Response,
    /// Close the connection once the response is written
    pub quit: bool,
}

impl Reply {
    fn close(response: Response) -> Self {
        Self {
            response,
            quit: true,
        }
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Self {
            response,
            quit: false,
        }
    }
}

/// POP3 Session
pub struct Pop3Session<V: CredentialVerifier> {
    id: Uuid,
    verifier: Arc<V>,
    state: SessionState<V::Store>,
}

impl<V: CredentialVerifier> Pop3Session<V> {
    /// Create a new session
    pub fn new(verifier: Arc<V>) -> Self {
        Self {
            id: Uuid::new_v4(),
            verifier,
            state: SessionState::Authorization { identity: None },
        }
    }

    /// Session ID
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> &SessionState<V::Store> {
        &self.state
    }

    /// Check if in authorization state
    pub fn is_authorization(&self) -> bool {
        matches!(self.state, SessionState::Authorization { .. })
    }

    /// Check if in transaction state
    pub fn is_transaction(&self) -> bool {
        matches!(self.state, SessionState::Transaction { .. })
    }

    /// Parse and handle one command line
    pub async fn handle_line(&mut self, line: &str) -> Reply {
        let command = Pop3Parser::parse(line);
        debug!(command = %command, "POP3 command");
        self.handle(command).await
    }

    /// Handle a parsed command
    pub async fn handle(&mut self, command: Pop3Command) -> Reply {
        match self.state {
            SessionState::Authorization { .. } => self.authorization(command).await,
            SessionState::Transaction { .. } => self.transaction(command).await,
            SessionState::Update => Reply::close(Pop3Response::err("session is closing")),
        }
    }

    async fn authorization(&mut self, command: Pop3Command) -> Reply {
        let SessionState::Authorization { identity } = &mut self.state else {
            return Reply::close(Pop3Response::err("session is closing"));
        };

        match command {
            Pop3Command::User { username } => {
                *identity = Some(username);
                Pop3Response::ok_simple().into()
            }

            Pop3Command::Pass { password } => {
                let Some(user) = identity.clone() else {
                    return Pop3Response::err("USER first").into();
                };

                match self.verifier.verify(&user, &password).await {
                    Ok(store) => {
                        info!(user = %user, "POP3 user authenticated");
                        self.state = SessionState::Transaction {
                            store,
                            marked: Exclusions::new(),
                        };
                        Pop3Response::ok("maildrop ready").into()
                    }
                    Err(e) => {
                        // the identity stays declared so PASS can be retried
                        info!(user = %user, error = %e, "POP3 authentication failed");
                        Pop3Response::err("authentication failed").into()
                    }
                }
            }

            Pop3Command::Capa => Pop3Response::capabilities().into(),

            Pop3Command::Invalid { reason, .. } => Pop3Response::err(reason).into(),

            Pop3Command::Unknown { command } => {
                Pop3Response::err(&format!("Unknown command: {}", command)).into()
            }

            _ => Pop3Response::err("Not authenticated").into(),
        }
    }

    async fn transaction(&mut self, command: Pop3Command) -> Reply {
        if command == Pop3Command::Quit {
            return self.commit().await;
        }

        let SessionState::Transaction { store, marked } = &mut self.state else {
            return Reply::close(Pop3Response::err("session is closing"));
        };

        let response = match command {
            Pop3Command::Stat => match store.list(marked).await {
                Ok(snapshot) => {
                    Pop3Response::stat(snapshot.len(), snapshot.values().map(|m| m.size).sum())
                }
                Err(e) => store_failure(None, e),
            },

            Pop3Command::List { msg: None } => match store.list(marked).await {
                Ok(snapshot) => Pop3Response::scan_listing(
                    snapshot.into_iter().map(|(number, message)| (number, message.size)),
                ),
                Err(e) => store_failure(None, e),
            },

            Pop3Command::List { msg: Some(number) } => match store.get(number, marked).await {
                Ok(message) => Pop3Response::scan_single(number, message.size),
                Err(e) => store_failure(Some(number), e),
            },

            Pop3Command::Uidl { msg: None } => match store.list(marked).await {
                Ok(snapshot) => Pop3Response::scan_listing(
                    snapshot.into_iter().map(|(number, message)| (number, message.id)),
                ),
                Err(e) => store_failure(None, e),
            },

            Pop3Command::Uidl { msg: Some(number) } => match store.get(number, marked).await {
                Ok(message) => Pop3Response::scan_single(number, message.id),
                Err(e) => store_failure(Some(number), e),
            },

            Pop3Command::Top { msg, lines } => match store.payload(msg, marked).await {
                Ok(payload) => Pop3Response::top(payload.top(lines)),
                Err(e) => store_failure(Some(msg), e),
            },

            Pop3Command::Retr { msg } => match store.payload(msg, marked).await {
                Ok(payload) => Pop3Response::retr(payload.len() as u64, payload.lines()),
                Err(e) => store_failure(Some(msg), e),
            },

            Pop3Command::Dele { msg } => match store.get(msg, marked).await {
                Ok(_) => {
                    marked.insert(msg);
                    Pop3Response::ok_simple()
                }
                Err(e) => store_failure(Some(msg), e),
            },

            Pop3Command::Noop => Pop3Response::ok_simple(),

            Pop3Command::Rset => {
                marked.clear();
                Pop3Response::ok_simple()
            }

            Pop3Command::Capa => Pop3Response::capabilities(),

            Pop3Command::User { .. } | Pop3Command::Pass { .. } => {
                Pop3Response::err("Already authenticated")
            }

            Pop3Command::Invalid { reason, .. } => Pop3Response::err(reason),

            Pop3Command::Unknown { command } => {
                Pop3Response::err(&format!("Unknown command: {}", command))
            }

            Pop3Command::Quit => Pop3Response::err("session is closing"),
        };

        response.into()
    }

    /// Enter UPDATE and apply the pending deletions, once
    async fn commit(&mut self) -> Reply {
        let state = std::mem::replace(&mut self.state, SessionState::Update);
        let SessionState::Transaction { mut store, marked } = state else {
            return Reply::close(Pop3Response::err("session is closing"));
        };

        for number in &marked {
            if let Err(e) = store.delete(*number).await {
                warn!(message = number, error = %e, "Failed to delete message at commit");
                return Reply::close(Pop3Response::err("some deleted messages not removed"));
            }
        }

        info!(deleted = marked.len(), "POP3 session committed");
        Reply::close(Pop3Response::ok("Goodbye"))
    }
}

/// Map a store error to a reply; backend failures are logged
fn store_failure(number: Option<MessageNumber>, error: Error) -> Response {
    match (number, &error) {
        (Some(number), e) if e.is_not_found() => Pop3Response::no_such_message(number),
        _ => {
            warn!(error = %error, code = error.code(), "Message store failure");
            Pop3Response::err("unable to access mailbox")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use popbridge_storage::{MemoryMailbox, MemoryStore, Payload, Snapshot};
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Memory store that records deletes and can be told to fail them
    struct RecordingStore {
        inner: MemoryStore,
        deletes: Arc<Mutex<Vec<MessageNumber>>>,
        fail_deletes: bool,
    }

    #[async_trait]
    impl MessageStore for RecordingStore {
        async fn list(&mut self, excluded: &Exclusions) -> popbridge_common::Result<Snapshot> {
            self.inner.list(excluded).await
        }

        async fn payload(
            &mut self,
            number: MessageNumber,
            excluded: &Exclusions,
        ) -> popbridge_common::Result<Payload> {
            self.inner.payload(number, excluded).await
        }

        async fn delete(&mut self, number: MessageNumber) -> popbridge_common::Result<()> {
            self.deletes.lock().unwrap().push(number);
            if self.fail_deletes {
                return Err(Error::Storage("bucket unavailable".to_string()));
            }
            self.inner.delete(number).await
        }
    }

    struct TestVerifier {
        mailbox: MemoryMailbox,
        deletes: Arc<Mutex<Vec<MessageNumber>>>,
        fail_deletes: bool,
    }

    #[async_trait]
    impl CredentialVerifier for TestVerifier {
        type Store = RecordingStore;

        async fn verify(&self, identity: &str, secret: &str) -> popbridge_common::Result<RecordingStore> {
            if identity != "user" || secret != "password" {
                return Err(Error::Auth("bad credentials".to_string()));
            }
            Ok(RecordingStore {
                inner: MemoryStore::new(self.mailbox.clone()),
                deletes: self.deletes.clone(),
                fail_deletes: self.fail_deletes,
            })
        }
    }

    struct Fixture {
        session: Pop3Session<TestVerifier>,
        mailbox: MemoryMailbox,
        deletes: Arc<Mutex<Vec<MessageNumber>>>,
    }

    fn fixture(messages: &[(&str, &'static str)], fail_deletes: bool) -> Fixture {
        let mailbox = MemoryMailbox::new();
        for (id, payload) in messages {
            mailbox.insert_with_id(*id, *payload);
        }
        let deletes = Arc::new(Mutex::new(Vec::new()));
        let verifier = TestVerifier {
            mailbox: mailbox.clone(),
            deletes: deletes.clone(),
            fail_deletes,
        };
        Fixture {
            session: Pop3Session::new(Arc::new(verifier)),
            mailbox,
            deletes,
        }
    }

    async fn login(session: &mut Pop3Session<TestVerifier>) {
        assert!(session.handle_line("USER user").await.response.is_ok());
        assert!(session.handle_line("PASS password").await.response.is_ok());
        assert!(session.is_transaction());
    }

    async fn status(session: &mut Pop3Session<TestVerifier>, line: &str) -> String {
        session.handle_line(line).await.response.status().to_string()
    }

    fn content(reply: Reply) -> Vec<String> {
        match reply.response {
            Response::Multi { lines, .. } => lines
                .iter()
                .map(|l| String::from_utf8(l.to_vec()).unwrap())
                .collect(),
            other => panic!("Expected multi-line response, got {:?}", other),
        }
    }

    const FIRST: &str = "Subject: first\r\n\r\nline 1\r\n.\r\nline 3\r\n";
    const SECOND: &str = "Subject: second\r\n\r\nbody\r\n";

    #[tokio::test]
    async fn test_session_new() {
        let fx = fixture(&[], false);
        assert!(fx.session.is_authorization());
        assert!(!fx.session.is_transaction());
    }

    #[tokio::test]
    async fn test_transaction_commands_need_authentication() {
        let mut fx = fixture(&[("a", FIRST)], false);
        for line in ["STAT", "LIST", "UIDL 1", "RETR 1", "TOP 1 0", "DELE 1", "NOOP", "RSET", "QUIT"] {
            let reply = fx.session.handle_line(line).await;
            assert!(!reply.response.is_ok(), "{} accepted before PASS", line);
            assert!(!reply.quit);
        }
        assert!(fx.session.is_authorization());
        assert!(fx.session.handle_line("CAPA").await.response.is_ok());
    }

    #[tokio::test]
    async fn test_pass_requires_user() {
        let mut fx = fixture(&[], false);
        assert_eq!(status(&mut fx.session, "PASS password").await, "-ERR USER first");
        assert!(fx.session.is_authorization());
    }

    #[tokio::test]
    async fn test_identity_survives_failed_pass() {
        let mut fx = fixture(&[], false);
        assert_eq!(status(&mut fx.session, "USER user").await, "+OK");
        assert!(status(&mut fx.session, "PASS wrongpass").await.starts_with("-ERR"));
        assert!(matches!(
            fx.session.state(),
            SessionState::Authorization { identity: Some(identity) } if identity == "user"
        ));
        assert_eq!(status(&mut fx.session, "PASS password").await, "+OK maildrop ready");
        assert!(fx.session.is_transaction());
    }

    #[tokio::test]
    async fn test_empty_mailbox_session() {
        let mut fx = fixture(&[], false);
        login(&mut fx.session).await;
        assert_eq!(status(&mut fx.session, "STAT").await, "+OK 0 0");
        assert!(content(fx.session.handle_line("LIST").await).is_empty());

        let reply = fx.session.handle_line("QUIT").await;
        assert_eq!(reply, Reply::close(Pop3Response::ok("Goodbye")));
        assert!(matches!(fx.session.state(), SessionState::Update));
    }

    #[tokio::test]
    async fn test_stat_list_uidl() {
        let mut fx = fixture(&[("a", FIRST), ("b", SECOND)], false);
        login(&mut fx.session).await;

        let total = FIRST.len() + SECOND.len();
        assert_eq!(status(&mut fx.session, "STAT").await, format!("+OK 2 {}", total));
        assert_eq!(
            content(fx.session.handle_line("LIST").await),
            vec![format!("1 {}", FIRST.len()), format!("2 {}", SECOND.len())]
        );
        assert_eq!(
            content(fx.session.handle_line("UIDL").await),
            vec!["1 a".to_string(), "2 b".to_string()]
        );
        assert_eq!(status(&mut fx.session, "UIDL 2").await, "+OK 2 b");
        assert_eq!(
            status(&mut fx.session, "LIST 1").await,
            format!("+OK 1 {}", FIRST.len())
        );
        assert_eq!(status(&mut fx.session, "LIST 3").await, "-ERR no such message 3");
        assert!(status(&mut fx.session, "LIST x").await.starts_with("-ERR"));
    }

    #[tokio::test]
    async fn test_retr_reproduces_payload() {
        let mut fx = fixture(&[("a", FIRST)], false);
        login(&mut fx.session).await;

        let reply = fx.session.handle_line("RETR 1").await;
        assert_eq!(
            reply.response,
            Response::Multi {
                status: format!("+OK {} octets", FIRST.len()),
                lines: ["Subject: first", "", "line 1", ".", "line 3"]
                    .into_iter()
                    .map(Bytes::from)
                    .collect(),
            }
        );
        assert!(status(&mut fx.session, "RETR 2").await.starts_with("-ERR"));
    }

    #[tokio::test]
    async fn test_top() {
        let mut fx = fixture(&[("a", FIRST)], false);
        login(&mut fx.session).await;

        assert_eq!(
            content(fx.session.handle_line("TOP 1 0").await),
            vec!["Subject: first", ""]
        );
        assert_eq!(
            content(fx.session.handle_line("TOP 1 1").await),
            vec!["Subject: first", "", "line 1"]
        );
        assert_eq!(
            content(fx.session.handle_line("TOP 1 1000000").await),
            vec!["Subject: first", "", "line 1", ".", "line 3"]
        );
        assert!(status(&mut fx.session, "TOP 1").await.starts_with("-ERR"));
    }

    #[tokio::test]
    async fn test_dele_hides_and_rset_restores() {
        let mut fx = fixture(&[("a", FIRST), ("b", SECOND)], false);
        login(&mut fx.session).await;

        let before = content(fx.session.handle_line("LIST").await);
        assert_eq!(status(&mut fx.session, "DELE 1").await, "+OK");
        assert_eq!(
            status(&mut fx.session, "STAT").await,
            format!("+OK 1 {}", SECOND.len())
        );
        assert_eq!(content(fx.session.handle_line("UIDL").await), vec!["2 b"]);
        assert!(status(&mut fx.session, "RETR 1").await.starts_with("-ERR"));

        assert_eq!(status(&mut fx.session, "RSET").await, "+OK");
        assert_eq!(content(fx.session.handle_line("LIST").await), before);
        assert_eq!(status(&mut fx.session, "UIDL 1").await, "+OK 1 a");
    }

    #[tokio::test]
    async fn test_double_dele_applies_once() {
        let mut fx = fixture(&[("a", FIRST)], false);
        login(&mut fx.session).await;

        assert_eq!(status(&mut fx.session, "DELE 1").await, "+OK");
        assert!(status(&mut fx.session, "DELE 1").await.starts_with("-ERR"));
        assert!(fx.deletes.lock().unwrap().is_empty());

        let reply = fx.session.handle_line("QUIT").await;
        assert!(reply.quit);
        assert!(reply.response.is_ok());
        assert_eq!(*fx.deletes.lock().unwrap(), vec![1]);
        assert!(!fx.mailbox.contains("a"));
    }

    #[tokio::test]
    async fn test_deletes_wait_for_quit() {
        let mut fx = fixture(&[("a", FIRST), ("b", SECOND)], false);
        login(&mut fx.session).await;

        fx.session.handle_line("DELE 2").await;
        fx.session.handle_line("DELE 1").await;
        assert_eq!(fx.mailbox.len(), 2);

        fx.session.handle_line("QUIT").await;
        assert_eq!(*fx.deletes.lock().unwrap(), vec![1, 2]);
        assert!(fx.mailbox.is_empty());
    }

    #[tokio::test]
    async fn test_commit_failure_still_quits() {
        let mut fx = fixture(&[("a", FIRST), ("b", SECOND)], true);
        login(&mut fx.session).await;

        fx.session.handle_line("DELE 1").await;
        fx.session.handle_line("DELE 2").await;
        let reply = fx.session.handle_line("QUIT").await;
        assert!(reply.quit);
        assert!(!reply.response.is_ok());
        // stops at the first failure
        assert_eq!(*fx.deletes.lock().unwrap(), vec![1]);
        assert!(matches!(fx.session.state(), SessionState::Update));
    }

    #[tokio::test]
    async fn test_noop_capa_and_unknown() {
        let mut fx = fixture(&[], false);
        login(&mut fx.session).await;

        assert_eq!(status(&mut fx.session, "NOOP").await, "+OK");
        assert!(fx.session.handle_line("CAPA").await.response.is_ok());
        assert_eq!(
            status(&mut fx.session, "STLS").await,
            "-ERR Unknown command: STLS"
        );
        assert!(status(&mut fx.session, "USER other").await.starts_with("-ERR"));
        assert!(fx.session.is_transaction());
    }

    #[tokio::test]
    async fn test_backend_failure_keeps_session() {
        struct BrokenStore;

        #[async_trait]
        impl MessageStore for BrokenStore {
            async fn list(&mut self, _: &Exclusions) -> popbridge_common::Result<Snapshot> {
                Err(Error::Storage("listing failed".to_string()))
            }
            async fn payload(
                &mut self,
                _: MessageNumber,
                _: &Exclusions,
            ) -> popbridge_common::Result<Payload> {
                Err(Error::Storage("fetch failed".to_string()))
            }
            async fn delete(&mut self, _: MessageNumber) -> popbridge_common::Result<()> {
                Ok(())
            }
        }

        struct BrokenVerifier;

        #[async_trait]
        impl CredentialVerifier for BrokenVerifier {
            type Store = BrokenStore;
            async fn verify(&self, _: &str, _: &str) -> popbridge_common::Result<BrokenStore> {
                Ok(BrokenStore)
            }
        }

        let mut session = Pop3Session::new(Arc::new(BrokenVerifier));
        session.handle_line("USER any").await;
        session.handle_line("PASS any").await;

        for line in ["STAT", "LIST", "UIDL 1", "RETR 1"] {
            let reply = session.handle_line(line).await;
            assert_eq!(reply, Reply::from(Pop3Response::err("unable to access mailbox")));
        }
        assert!(session.is_transaction());
    }
}
