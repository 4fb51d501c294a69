//! Effect executor, the only place that touches I/O.
//!
//! Takes a list of RuntimeEffect and executes them concretely:
//! - Broadcast / SendTo / Reply -> transport
//! - SendTcp -> per-peer outbound queue, never awaited here
//! - UiLine / DropUi -> attached UI session channels
//! - Prompt -> prompt worker task, answer comes back on `answers_tx`
//! - Notify / Transcript -> collaborators
//! - Emit -> event_tx.send()

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::prompt::{spawn_prompt, PromptAnswer};

use super::effect::RuntimeEffect;
use super::outbound::{Delivery, Outbound, SendOrigin};
use super::transport::Transport;
use super::{Collaborators, ProtocolEvent, UiSessionId};

/// Everything the executor needs besides the effects themselves.
pub(super) struct ExecContext<'a, T: Transport> {
    pub outbound: &'a mut Outbound<T>,
    pub ui: &'a mut HashMap<UiSessionId, mpsc::Sender<String>>,
    pub collaborators: &'a Collaborators,
    pub answers_tx: &'a mpsc::Sender<PromptAnswer>,
    pub event_tx: &'a mpsc::Sender<ProtocolEvent>,
    pub prompt_timeout: Duration,
}

/// Execute a list of effects. TCP sends are queued with `origin`; for
/// [`SendOrigin::Reply`] their outcomes are returned to wait on.
pub(super) async fn execute_effects<T: Transport>(
    effects: Vec<RuntimeEffect>,
    ctx: &mut ExecContext<'_, T>,
    origin: SendOrigin,
) -> Vec<Delivery> {
    let mut deliveries = Vec::new();

    for effect in effects {
        match effect {
            RuntimeEffect::Broadcast(envelope) => {
                if let Err(e) = ctx.outbound.transport().broadcast(&envelope.encode()).await {
                    warn!("broadcast {} failed: {e}", envelope.kind());
                }
            }
            RuntimeEffect::SendTo { addr, envelope } => {
                if let Err(e) = ctx.outbound.transport().send_udp(addr, &envelope.encode()).await {
                    debug!("udp {} to {addr} failed: {e}", envelope.kind());
                }
            }
            RuntimeEffect::SendTcp {
                addr,
                role,
                envelope,
            } => {
                deliveries.extend(ctx.outbound.enqueue(addr, role, &envelope, origin));
            }
            RuntimeEffect::Reply { conn, envelope } => {
                if let Err(e) = ctx.outbound.transport().reply(conn, &envelope.encode()).await {
                    warn!("reply {} on {conn} failed: {e}", envelope.kind());
                }
            }
            RuntimeEffect::UiLine { session, line } => {
                let closed = match ctx.ui.get(&session) {
                    // try_send: a stalled terminal must not block the loop
                    Some(tx) => match tx.try_send(line) {
                        Ok(()) => false,
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            debug!("ui {session} is full, line dropped");
                            false
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => true,
                    },
                    None => {
                        debug!("ui {session} is gone, line dropped");
                        false
                    }
                };
                if closed {
                    ctx.ui.remove(&session);
                }
            }
            RuntimeEffect::DropUi(session) => {
                ctx.ui.remove(&session);
            }
            RuntimeEffect::Notify { title, text } => {
                ctx.collaborators.notifier.notify(&title, &text);
            }
            RuntimeEffect::Prompt { id, title, text } => {
                spawn_prompt(
                    Arc::clone(&ctx.collaborators.prompter),
                    ctx.prompt_timeout,
                    id,
                    title,
                    text,
                    ctx.answers_tx.clone(),
                );
            }
            RuntimeEffect::Transcript { chat_id, line } => {
                if let Some(transcript) = &ctx.collaborators.transcript {
                    if let Err(e) = transcript.append(&chat_id, &line) {
                        warn!("transcript for {chat_id}: {e}");
                    }
                }
            }
            RuntimeEffect::Emit(event) => {
                // try_send even for chat openings: large buffer + fast consumer
                let _ = ctx.event_tx.try_send(event);
            }
        }
    }

    deliveries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Body, Envelope, Origin};
    use crate::runtime::outbound::FailedSend;
    use crate::runtime::transport::mock::{MockTransport, Sent};
    use gwc_transport::PortRole;

    fn envelope() -> Envelope {
        let origin = Origin {
            uid: "me".into(),
            nick: "ana".into(),
            ip: "10.0.0.1".into(),
            status_msg: None,
            port_priv: 44494,
            port_group: 44496,
        };
        Envelope::new(origin, "ALL", Body::ChatReq {})
    }

    struct Harness {
        transport: MockTransport,
        outbound: Outbound<MockTransport>,
        failures_rx: mpsc::UnboundedReceiver<FailedSend>,
        ui: HashMap<UiSessionId, mpsc::Sender<String>>,
        collaborators: Collaborators,
        answers_tx: mpsc::Sender<PromptAnswer>,
        event_tx: mpsc::Sender<ProtocolEvent>,
    }

    impl Harness {
        fn new() -> Self {
            let transport = MockTransport::new();
            let (failures_tx, failures_rx) = mpsc::unbounded_channel();
            let (answers_tx, _) = mpsc::channel(4);
            let (event_tx, _) = mpsc::channel(4);
            Self {
                outbound: Outbound::new(transport.clone(), failures_tx),
                transport,
                failures_rx,
                ui: HashMap::new(),
                collaborators: Collaborators::default(),
                answers_tx,
                event_tx,
            }
        }

        async fn run(&mut self, effects: Vec<RuntimeEffect>, origin: SendOrigin) -> Vec<Delivery> {
            let mut ctx = ExecContext {
                outbound: &mut self.outbound,
                ui: &mut self.ui,
                collaborators: &self.collaborators,
                answers_tx: &self.answers_tx,
                event_tx: &self.event_tx,
                prompt_timeout: Duration::from_secs(1),
            };
            execute_effects(effects, &mut ctx, origin).await
        }
    }

    fn send_tcp(addr: &str) -> RuntimeEffect {
        RuntimeEffect::SendTcp {
            addr: addr.parse().unwrap(),
            role: PortRole::Private,
            envelope: envelope(),
        }
    }

    #[tokio::test]
    async fn tcp_failure_is_reported() {
        let mut h = Harness::new();
        h.transport.set_fail_tcp(true);

        let deliveries = h.run(vec![send_tcp("10.0.0.9:44494")], SendOrigin::Log).await;
        assert!(deliveries.is_empty());

        let failed = h.failures_rx.recv().await.unwrap();
        assert_eq!(failed.failure.notice(), "[X] unreachable: 10.0.0.9");
        assert_eq!(failed.origin, SendOrigin::Log);
        assert!(h.transport.sent().is_empty());
    }

    #[tokio::test]
    async fn sends_are_framed_envelopes() {
        let mut h = Harness::new();
        let addr = "10.0.0.9:44494".parse().unwrap();

        let deliveries = h
            .run(vec![RuntimeEffect::Broadcast(envelope()), send_tcp("10.0.0.9:44494")], SendOrigin::Reply)
            .await;
        assert_eq!(deliveries.len(), 1);
        for delivery in deliveries {
            assert_eq!(delivery.await.unwrap(), Ok(()));
        }

        let sent = h.transport.sent();
        assert_eq!(sent.len(), 2);
        let Sent::Tcp(to, PortRole::Private, frame) = &sent[1] else {
            panic!("expected a tcp send, got: {sent:?}");
        };
        assert_eq!(*to, addr);
        assert_eq!(Envelope::decode(frame).unwrap().kind(), crate::types::Kind::ChatReq);
    }

    #[tokio::test]
    async fn slow_send_does_not_hold_the_next_batch() {
        let mut h = Harness::new();
        h.transport.set_tcp_delay(Duration::from_millis(400));
        let (tx, mut rx) = mpsc::channel(8);
        h.ui.insert(UiSessionId(1), tx);

        let started = tokio::time::Instant::now();
        let pending = h.run(vec![send_tcp("10.0.0.9:44494")], SendOrigin::Reply).await;
        h.run(
            vec![RuntimeEffect::UiLine {
                session: UiSessionId(1),
                line: "[SYSTEM] Members of 'Sala':".into(),
            }],
            SendOrigin::Ui(UiSessionId(1)),
        )
        .await;

        // the second batch is served while the first send still waits
        assert_eq!(rx.try_recv().as_deref(), Ok("[SYSTEM] Members of 'Sala':"));
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(h.transport.sent().is_empty());

        for delivery in pending {
            assert_eq!(delivery.await.unwrap(), Ok(()));
        }
        assert_eq!(h.transport.sent().len(), 1);
    }

    #[tokio::test]
    async fn ui_lines_reach_session_and_drop_closes() {
        let mut h = Harness::new();
        let (tx, mut rx) = mpsc::channel(8);
        h.ui.insert(UiSessionId(1), tx);

        h.run(
            vec![
                RuntimeEffect::UiLine {
                    session: UiSessionId(1),
                    line: "(bob): hola".into(),
                },
                RuntimeEffect::DropUi(UiSessionId(1)),
            ],
            SendOrigin::Log,
        )
        .await;

        assert_eq!(rx.recv().await.as_deref(), Some("(bob): hola"));
        assert_eq!(rx.recv().await, None);
        assert!(h.ui.is_empty());
    }
}
