//! Request dispatch — maps client requests onto sessions and services.

use std::sync::Arc;

use collab_protocol::{ClientRequest, CoreError, Envelope, ServerReply};
use collab_services::AppContext;
use collab_session::auth::{resolve_login, signup, LoginRequest};
use collab_session::{ParticipantConnection, Session, SessionRegistry};
use tracing::debug;

/// The default role of a freshly created session.
const DEFAULT_ROLE: &str = "myRole";

/// Handle one client request. `None` means the request has no direct reply
/// (the resulting session broadcast, if any, already informed the client).
pub async fn dispatch(
    request: ClientRequest,
    conn: &Arc<ParticipantConnection>,
    app: &AppContext,
) -> Option<ServerReply> {
    match request {
        ClientRequest::Join { name, role } => match join(&name, role, conn, app) {
            Ok(()) => None,
            Err(error) => Some(ServerReply::Error { error }),
        },
        ClientRequest::Leave => {
            conn.leave(&app.registry);
            None
        }
        ClientRequest::Login { username, hash, remember, token } => {
            let request = LoginRequest {
                username,
                hash,
                cookie_username: token.as_deref().and_then(|t| app.tokens.lookup(t)),
            };
            let result = resolve_login(&request, &*app.users)
                .and_then(|username| conn.login(&username, &app.registry).map(|()| username));
            match result {
                Ok(username) => {
                    let token = remember.then(|| app.tokens.issue(&username));
                    Some(ServerReply::LoggedIn { username, token })
                }
                Err(error) => Some(ServerReply::Error { error }),
            }
        }
        ClientRequest::SignUp { username, email, hash } => {
            let result = signup(&username, &email, hash.as_deref(), &*app.users)
                .and_then(|()| conn.login(&username, &app.registry));
            match result {
                Ok(()) => Some(ServerReply::LoggedIn { username, token: None }),
                Err(error) => Some(ServerReply::Error { error }),
            }
        }
        ClientRequest::Rename { name } => match require_session(conn, &app.registry) {
            Ok(session) if !session.is_editable_for(&conn.identity()) => {
                Some(ServerReply::Error {
                    error: CoreError::unauthorized("Not allowed to rename this project"),
                })
            }
            Ok(session) => Some(ServerReply::Renamed { name: session.rename(&name) }),
            Err(error) => Some(ServerReply::Error { error }),
        },
        ClientRequest::Message { dst_id, msg_type, content } => {
            match require_session(conn, &app.registry) {
                Ok(session) => {
                    session.send_to_everyone(Envelope::Message { dst_id, msg_type, content });
                    None
                }
                Err(error) => Some(ServerReply::Error { error }),
            }
        }
        ClientRequest::Invoke { id, service, action, args } => {
            match app.broker.invoke(&service, &action, conn, args).await {
                Ok(Some(result)) => Some(ServerReply::InvokeReply {
                    id,
                    result: Some(result),
                    error: None,
                }),
                // result discarded: the session closed mid-invocation
                Ok(None) => None,
                Err(error) => Some(ServerReply::InvokeReply {
                    id,
                    result: None,
                    error: Some(error),
                }),
            }
        }
        ClientRequest::TraceStart => match require_session(conn, &app.registry) {
            Ok(session) => Some(ServerReply::TraceStarted {
                start_time: session.start_trace(conn.id()),
            }),
            Err(error) => Some(ServerReply::Error { error }),
        },
        ClientRequest::TraceEnd => match require_session(conn, &app.registry) {
            Ok(session) => Some(ServerReply::TraceMessages {
                messages: session.stop_trace(conn.id()).unwrap_or_default(),
            }),
            Err(error) => Some(ServerReply::Error { error }),
        },
    }
}

fn require_session(
    conn: &ParticipantConnection,
    registry: &SessionRegistry,
) -> Result<Arc<Session>, CoreError> {
    registry.session_for(conn).ok_or_else(CoreError::no_session)
}

/// Join (creating if needed) the session named `name` under the caller's
/// identity, then occupy `role` (created on demand) or the first free role.
fn join(
    name: &str,
    role: Option<String>,
    conn: &Arc<ParticipantConnection>,
    app: &AppContext,
) -> Result<(), CoreError> {
    let identity = conn.identity();
    let key = SessionRegistry::session_key(&identity, name);
    let session = match app.registry.lookup(&key) {
        Some(session) if !session.is_defunct() => session,
        _ => {
            debug!(%identity, %name, "creating session on first join");
            let project = app.projects.create(&identity, name);
            let session = app.registry.create(conn, name, project, false)?;
            session.create_role(DEFAULT_ROLE)?;
            session
        }
    };

    let role = match role {
        Some(role) => {
            if !session.has_role(&role) {
                session.create_role(&role)?;
            }
            role
        }
        None => match session.unoccupied_role() {
            Some(role) => role,
            // every role is occupied: grow the session by one
            None => {
                let mut n = session.role_names().len() + 1;
                let mut candidate = format!("role{n}");
                while session.has_role(&candidate) {
                    n += 1;
                    candidate = format!("role{n}");
                }
                session.create_role(&candidate)?;
                candidate
            }
        },
    };

    session.add(&app.registry, conn, &role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use collab_session::{ClientChannel, UserRecord};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<Envelope>>,
    }

    impl ClientChannel for Recorder {
        fn send(&self, envelope: &Envelope) {
            self.sent.lock().push(envelope.clone());
        }
    }

    fn fixture() -> Arc<AppContext> {
        AppContext::new(Duration::from_secs(60))
    }

    fn conn(id: &str) -> (Arc<ParticipantConnection>, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        (ParticipantConnection::with_id(id, recorder.clone()), recorder)
    }

    #[tokio::test]
    async fn join_creates_the_session_and_places_the_caller() {
        let app = fixture();
        let (c1, r1) = conn("c1");

        let reply = dispatch(
            ClientRequest::Join { name: "myproj".into(), role: None },
            &c1,
            &app,
        )
        .await;
        assert!(reply.is_none());
        assert_eq!(c1.role().as_deref(), Some("myRole"));

        let occupants = match r1.sent.lock().last().cloned() {
            Some(Envelope::RoomRoles { occupants }) => occupants,
            other => panic!("expected a roles snapshot, got {other:?}"),
        };
        assert_eq!(occupants["myRole"], vec!["c1".to_string()]);
    }

    #[tokio::test]
    async fn join_with_role_creates_it_on_demand() {
        let app = fixture();
        let (c1, _) = conn("c1");

        dispatch(
            ClientRequest::Join { name: "myproj".into(), role: Some("left".into()) },
            &c1,
            &app,
        )
        .await;
        assert_eq!(c1.role().as_deref(), Some("left"));

        let session = app.registry.lookup("c1/myproj").unwrap();
        assert!(session.has_role("myRole"));
        assert!(session.has_role("left"));
    }

    #[tokio::test]
    async fn second_join_reuses_the_live_session() {
        let app = fixture();
        let (c1, _) = conn("c1");

        dispatch(ClientRequest::Join { name: "myproj".into(), role: None }, &c1, &app).await;
        let first = app.registry.lookup("c1/myproj").unwrap();
        dispatch(ClientRequest::Join { name: "myproj".into(), role: None }, &c1, &app).await;

        assert!(Arc::ptr_eq(&first, &app.registry.lookup("c1/myproj").unwrap()));
        assert_eq!(app.registry.len(), 1);
    }

    #[tokio::test]
    async fn login_reports_the_username_and_transfers_ownership() {
        let app = fixture();
        app.users.save(&UserRecord {
            username: "alice".into(),
            email: None,
            hash: Some("pw".into()),
        });
        // alice already owns a project with the same name
        app.projects.create("alice", "myproj");

        let (c1, _) = conn("c1");
        dispatch(ClientRequest::Join { name: "myproj".into(), role: None }, &c1, &app).await;

        let reply = dispatch(
            ClientRequest::Login {
                username: Some("alice".into()),
                hash: Some("pw".into()),
                remember: false,
                token: None,
            },
            &c1,
            &app,
        )
        .await;
        assert_eq!(
            reply,
            Some(ServerReply::LoggedIn { username: "alice".into(), token: None })
        );

        let session = app.registry.lookup("c1/myproj").unwrap();
        assert_eq!(session.owner(), "alice");
        assert_eq!(session.name(), "myproj(2)");
    }

    #[tokio::test]
    async fn bad_credentials_fail_without_touching_the_connection() {
        let app = fixture();
        let (c1, _) = conn("c1");

        let reply = dispatch(
            ClientRequest::Login {
                username: Some("ghost".into()),
                hash: None,
                remember: false,
                token: None,
            },
            &c1,
            &app,
        )
        .await;
        match reply {
            Some(ServerReply::Error { error }) => {
                assert_eq!(error.kind, collab_protocol::ErrorKind::NotFound)
            }
            other => panic!("expected an error reply, got {other:?}"),
        }
        assert!(c1.username().is_none());
    }

    #[tokio::test]
    async fn remembered_token_logs_in_without_credentials() {
        let app = fixture();
        app.users.save(&UserRecord {
            username: "alice".into(),
            email: None,
            hash: Some("pw".into()),
        });

        let (c1, _) = conn("c1");
        let reply = dispatch(
            ClientRequest::Login {
                username: Some("alice".into()),
                hash: Some("pw".into()),
                remember: true,
                token: None,
            },
            &c1,
            &app,
        )
        .await;
        let token = match reply {
            Some(ServerReply::LoggedIn { token: Some(token), .. }) => token,
            other => panic!("expected a remember token, got {other:?}"),
        };

        // a fresh connection presents the token instead of credentials
        let (c2, _) = conn("c2");
        let reply = dispatch(
            ClientRequest::Login { username: None, hash: None, remember: false, token: Some(token) },
            &c2,
            &app,
        )
        .await;
        assert_eq!(
            reply,
            Some(ServerReply::LoggedIn { username: "alice".into(), token: None })
        );
    }

    #[tokio::test]
    async fn sign_up_creates_the_account_and_logs_in() {
        let app = fixture();
        let (c1, _) = conn("c1");

        let reply = dispatch(
            ClientRequest::SignUp {
                username: "bob".into(),
                email: "bob@example.com".into(),
                hash: Some("pw".into()),
            },
            &c1,
            &app,
        )
        .await;
        assert_eq!(
            reply,
            Some(ServerReply::LoggedIn { username: "bob".into(), token: None })
        );
        assert!(app.users.get("bob").is_some());
        assert_eq!(c1.identity(), "bob");

        // taken usernames are rejected
        let reply = dispatch(
            ClientRequest::SignUp { username: "bob".into(), email: "x@y.z".into(), hash: None },
            &c1,
            &app,
        )
        .await;
        match reply {
            Some(ServerReply::Error { error }) => {
                assert_eq!(error.kind, collab_protocol::ErrorKind::Conflict)
            }
            other => panic!("expected an error reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn rename_is_restricted_to_editors() {
        let app = fixture();
        let (c1, _) = conn("c1");
        let (c2, _) = conn("c2");
        dispatch(ClientRequest::Join { name: "myproj".into(), role: None }, &c1, &app).await;

        let session = app.registry.lookup("c1/myproj").unwrap();
        session.create_role("right").unwrap();
        session.add(&app.registry, &c2, "right").unwrap();

        // an occupant who is neither owner nor collaborator may not rename
        match dispatch(ClientRequest::Rename { name: "better".into() }, &c2, &app).await {
            Some(ServerReply::Error { error }) => {
                assert_eq!(error.kind, collab_protocol::ErrorKind::Unauthorized)
            }
            other => panic!("expected an error reply, got {other:?}"),
        }
        assert_eq!(session.name(), "myproj");

        let reply = dispatch(ClientRequest::Rename { name: "better".into() }, &c1, &app).await;
        assert_eq!(reply, Some(ServerReply::Renamed { name: "better".into() }));
        assert_eq!(session.name(), "better");
    }

    #[tokio::test]
    async fn messages_reach_every_occupant() {
        let app = fixture();
        let (c1, r1) = conn("c1");
        let (c2, r2) = conn("c2");

        dispatch(ClientRequest::Join { name: "myproj".into(), role: None }, &c1, &app).await;
        let session = app.registry.lookup("c1/myproj").unwrap();
        session.create_role("right").unwrap();
        session.add(&app.registry, &c2, "right").unwrap();

        dispatch(
            ClientRequest::Message {
                dst_id: None,
                msg_type: "chat".into(),
                content: json!({"text": "hi"}),
            },
            &c1,
            &app,
        )
        .await;

        for recorder in [&r1, &r2] {
            let delivered = recorder.sent.lock().iter().any(|e| {
                matches!(e, Envelope::Message { msg_type, .. } if msg_type == "chat")
            });
            assert!(delivered);
        }
    }

    #[tokio::test]
    async fn invoke_routes_through_the_broker() {
        let app = fixture();
        let (c1, _) = conn("c1");
        dispatch(ClientRequest::Join { name: "myproj".into(), role: None }, &c1, &app).await;

        let reply = dispatch(
            ClientRequest::Invoke {
                id: 1,
                service: "public-roles".into(),
                action: "getPublicRoleId".into(),
                args: vec![],
            },
            &c1,
            &app,
        )
        .await;
        assert_eq!(
            reply,
            Some(ServerReply::InvokeReply {
                id: 1,
                result: Some(json!("myRole@myproj@c1")),
                error: None,
            })
        );
    }

    #[tokio::test]
    async fn invoke_errors_come_back_on_the_same_id() {
        let app = fixture();
        let (c1, _) = conn("c1");

        let reply = dispatch(
            ClientRequest::Invoke {
                id: 9,
                service: "nope".into(),
                action: "x".into(),
                args: vec![],
            },
            &c1,
            &app,
        )
        .await;
        match reply {
            Some(ServerReply::InvokeReply { id: 9, result: None, error: Some(error) }) => {
                assert_eq!(error.kind, collab_protocol::ErrorKind::NotFound)
            }
            other => panic!("expected an invoke error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn trace_requests_need_a_session() {
        let app = fixture();
        let (c1, _) = conn("c1");

        match dispatch(ClientRequest::TraceStart, &c1, &app).await {
            Some(ServerReply::Error { error }) => {
                assert_eq!(error.kind, collab_protocol::ErrorKind::Unauthorized)
            }
            other => panic!("expected an error reply, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn trace_window_captures_messages_between_start_and_end() {
        let app = fixture();
        let (c1, _) = conn("c1");
        dispatch(ClientRequest::Join { name: "myproj".into(), role: None }, &c1, &app).await;

        let started = dispatch(ClientRequest::TraceStart, &c1, &app).await;
        assert!(matches!(started, Some(ServerReply::TraceStarted { .. })));

        // land strictly inside the window
        tokio::time::sleep(Duration::from_millis(2)).await;
        dispatch(
            ClientRequest::Message { dst_id: None, msg_type: "ping".into(), content: json!({}) },
            &c1,
            &app,
        )
        .await;
        tokio::time::sleep(Duration::from_millis(2)).await;

        match dispatch(ClientRequest::TraceEnd, &c1, &app).await {
            Some(ServerReply::TraceMessages { messages }) => {
                assert_eq!(messages.len(), 1);
                assert!(matches!(
                    &messages[0].message,
                    Envelope::Message { msg_type, .. } if msg_type == "ping"
                ));
            }
            other => panic!("expected trace messages, got {other:?}"),
        }

        // second end without a start is a silent no-op
        match dispatch(ClientRequest::TraceEnd, &c1, &app).await {
            Some(ServerReply::TraceMessages { messages }) => assert!(messages.is_empty()),
            other => panic!("expected empty trace, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn leave_detaches_from_the_session() {
        let app = fixture();
        let (c1, _) = conn("c1");
        dispatch(ClientRequest::Join { name: "myproj".into(), role: None }, &c1, &app).await;
        assert!(c1.placement().is_some());

        dispatch(ClientRequest::Leave, &c1, &app).await;
        assert!(c1.placement().is_none());
    }
}
