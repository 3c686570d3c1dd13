//! Session driver and trust negotiation
//!
//! Connects through a `SessionConnector`, runs the fingerprint handshake
//! when the host is unknown, then hands the adapter to the orchestrator.
//! Every path ends with exactly one close reason on the client channel.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::orchestrator::Orchestrator;
use super::protocol::{ServerMessage, parse_fingerprint_reply};
use crate::classify::{MessageCode, classify};
use crate::error::BridgeError;
use crate::ports::{Connection, MessageSink, MessageSource, SessionConnector};

/// Send a classified error, then close with its code.
async fn fail(sink: &dyn MessageSink, err: &BridgeError) -> MessageCode {
    let classified = classify(err);
    let code = classified.code;
    error!(code = %code, details = %classified.details, "Session failed");
    if let Err(e) = sink.send(&ServerMessage::from(classified)).await {
        warn!(error = %e, "Failed to send error message");
    }
    sink.close(code).await;
    code
}

async fn close(sink: &dyn MessageSink, code: MessageCode) -> MessageCode {
    sink.close(code).await;
    code
}

/// Serve one client session end to end and return the close reason used.
pub async fn serve<C: SessionConnector>(
    connector: &C,
    mut source: Box<dyn MessageSource>,
    sink: Arc<dyn MessageSink>,
) -> MessageCode {
    let adapter = match connector.connect().await {
        Ok(Connection::Established(adapter)) => adapter,
        Ok(Connection::FingerprintRequired(fingerprint)) => {
            info!(
                host = %fingerprint.host,
                fingerprint = %fingerprint.fingerprint,
                "Host fingerprint confirmation needed"
            );
            let prompt = ServerMessage::FingerprintConfirm {
                host: fingerprint.host.clone(),
                fingerprint: fingerprint.fingerprint.clone(),
            };
            if let Err(e) = sink.send(&prompt).await {
                error!(error = %e, "Failed to send fingerprint confirmation");
                return close(sink.as_ref(), MessageCode::FailedToSendFingerprintMsg).await;
            }

            let reply = match source.recv().await {
                Ok(Some(reply)) => reply,
                Ok(None) => {
                    error!("Client went away before confirming the fingerprint");
                    return close(sink.as_ref(), MessageCode::FailedToReadFingerprint).await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to read fingerprint confirmation");
                    return close(sink.as_ref(), MessageCode::FailedToReadFingerprint).await;
                }
            };

            let accepted = match parse_fingerprint_reply(&reply) {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "Failed to parse fingerprint confirmation");
                    return close(sink.as_ref(), MessageCode::FailedToParseFingerprint).await;
                }
            };
            if !accepted {
                info!(host = %fingerprint.host, "Client rejected host fingerprint");
                return close(sink.as_ref(), MessageCode::UserRejectedFingerprint).await;
            }

            info!(host = %fingerprint.host, "Client accepted host fingerprint");
            if let Err(e) = connector.add_fingerprint(&fingerprint).await {
                error!(error = %e, "Failed to add host fingerprint");
                let classified = classify(&e);
                let _ = sink.send(&ServerMessage::from(classified)).await;
                return close(sink.as_ref(), MessageCode::FailedToAddFingerprint).await;
            }

            match connector.connect().await {
                Ok(Connection::Established(adapter)) => adapter,
                Ok(Connection::FingerprintRequired(again)) => {
                    let err = BridgeError::KnownHosts {
                        reason: format!(
                            "{} is still unknown after adding its fingerprint",
                            again.host
                        ),
                    };
                    return fail(sink.as_ref(), &err).await;
                }
                Err(e) => return fail(sink.as_ref(), &e).await,
            }
        }
        Err(e) => return fail(sink.as_ref(), &e).await,
    };

    if let Err(e) = sink.send(&ServerMessage::Connected).await {
        warn!(error = %e, "Failed to send connected message");
    }

    let orchestrator = Orchestrator::new();
    let closer = Arc::clone(&sink);
    orchestrator
        .run(Arc::new(adapter), source, sink, move || async move {
            closer.close(MessageCode::SessionEnded).await;
        })
        .await;
    MessageCode::SessionEnded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::channel::mock::{RecordingSink, ScriptedSource};
    use crate::ports::connector::mock::MockConnector;
    use std::time::Duration;

    async fn drive(connector: &MockConnector, replies: &[&str]) -> (MessageCode, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let code = tokio::time::timeout(
            Duration::from_secs(5),
            serve(
                connector,
                Box::new(ScriptedSource::new(replies)),
                Arc::clone(&sink) as Arc<dyn MessageSink>,
            ),
        )
        .await
        .expect("session did not finish");
        (code, sink)
    }

    fn is_prompt(message: &ServerMessage) -> bool {
        matches!(message, ServerMessage::FingerprintConfirm { host, .. } if host == "10.0.0.5:22")
    }

    // ============== Known Host ==============

    #[tokio::test]
    async fn test_known_host_runs_session() {
        let connector = MockConnector::new(true);
        let (code, sink) = drive(&connector, &[]).await;

        assert_eq!(code, MessageCode::SessionEnded);
        assert_eq!(
            sink.sent(),
            vec![ServerMessage::Connected, ServerMessage::data("welcome\r\n")]
        );
        assert_eq!(sink.close_reason(), Some(MessageCode::SessionEnded));
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_connect_error_is_classified() {
        let connector = MockConnector::new(true);
        *connector.connect_error.lock().unwrap() = Some(BridgeError::SshConnection {
            host: "10.0.0.5:22".to_string(),
            reason: "Connection refused (os error 111)".to_string(),
        });

        let (code, sink) = drive(&connector, &[]).await;

        assert_eq!(code, MessageCode::ConnectionRefused);
        assert!(matches!(
            &sink.sent()[..],
            [ServerMessage::Error { code: MessageCode::ConnectionRefused, .. }]
        ));
        assert_eq!(sink.close_reason(), Some(MessageCode::ConnectionRefused));
    }

    // ============== Fingerprint Handshake ==============

    #[tokio::test]
    async fn test_accepted_fingerprint_reconnects() {
        let connector = MockConnector::new(false);
        let (code, sink) =
            drive(&connector, &[r#"{"type":"fingerprint-confirm","accept":true}"#]).await;

        assert_eq!(code, MessageCode::SessionEnded);
        let sent = sink.sent();
        assert!(is_prompt(&sent[0]));
        assert_eq!(sent[1], ServerMessage::Connected);
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(connector.added.lock().unwrap().len(), 1);
        assert_eq!(sink.close_reason(), Some(MessageCode::SessionEnded));
    }

    #[tokio::test]
    async fn test_rejected_fingerprint_closes() {
        let connector = MockConnector::new(false);
        let (code, sink) =
            drive(&connector, &[r#"{"type":"fingerprint-confirm","accept":false}"#]).await;

        assert_eq!(code, MessageCode::UserRejectedFingerprint);
        assert_eq!(sink.sent().len(), 1);
        assert!(connector.added.lock().unwrap().is_empty());
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_malformed_reply_closes() {
        let connector = MockConnector::new(false);
        let (code, _sink) = drive(&connector, &["{not json"]).await;
        assert_eq!(code, MessageCode::FailedToParseFingerprint);
    }

    #[tokio::test]
    async fn test_missing_reply_closes() {
        let connector = MockConnector::new(false);
        let (code, sink) = drive(&connector, &[]).await;
        assert_eq!(code, MessageCode::FailedToReadFingerprint);
        assert_eq!(sink.close_reason(), Some(MessageCode::FailedToReadFingerprint));
    }

    #[tokio::test]
    async fn test_unsendable_prompt_closes() {
        let connector = MockConnector::new(false);
        let sink = Arc::new(RecordingSink::failing());
        let code = serve(
            &connector,
            Box::new(ScriptedSource::new(&[])),
            Arc::clone(&sink) as Arc<dyn MessageSink>,
        )
        .await;
        assert_eq!(code, MessageCode::FailedToSendFingerprintMsg);
        assert_eq!(sink.close_reason(), Some(MessageCode::FailedToSendFingerprintMsg));
    }

    #[tokio::test]
    async fn test_add_failure_sends_error_then_closes() {
        let connector = MockConnector::new(false);
        *connector.add_error.lock().unwrap() = Some(BridgeError::FingerprintMismatch {
            host: "10.0.0.5:22".to_string(),
            expected: "SHA256:a".to_string(),
            actual: "SHA256:b".to_string(),
        });

        let (code, sink) =
            drive(&connector, &[r#"{"type":"fingerprint-confirm","accept":true}"#]).await;

        assert_eq!(code, MessageCode::FailedToAddFingerprint);
        let sent = sink.sent();
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[1], ServerMessage::Error { .. }));
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_fail_sends_error_then_closes() {
        let sink = RecordingSink::new();
        let err = BridgeError::SshTimeout {
            host: "10.0.0.5:22".to_string(),
            seconds: 10,
        };

        let code = fail(&sink, &err).await;

        assert_eq!(code, MessageCode::ConnectionTimeout);
        assert!(matches!(
            &sink.sent()[..],
            [ServerMessage::Error { code: MessageCode::ConnectionTimeout, details, .. }]
                if details.contains("timed out after 10s")
        ));
        assert_eq!(sink.close_reason(), Some(MessageCode::ConnectionTimeout));
    }
}
