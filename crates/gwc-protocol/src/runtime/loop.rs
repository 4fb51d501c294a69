/// The protocol runtime event loop.
///
/// A single async task that owns the `RuntimeState` and multiplexes over
/// transport events, application commands, prompt answers, failed sends
/// and timers. All protocol decisions are made by the state; this file only
/// feeds it and hands the resulting effects to the executor.
use std::collections::HashMap;

use gwc_transport::{LanNode, TransportEvent};
use tokio::sync::{mpsc, oneshot};

use crate::prompt::PromptAnswer;
use crate::types::now_secs;

use super::effect::RuntimeEffect;
use super::executor::{execute_effects, ExecContext};
use super::outbound::{Delivery, FailedSend, Outbound, SendOrigin};
use super::state::RuntimeState;
use super::{Collaborators, ProtocolEvent, RuntimeCommand, UiSessionId};

/// Main event loop. Owns all protocol state.
pub(super) async fn runtime_loop(
    mut node: LanNode,
    mut state: RuntimeState,
    collaborators: Collaborators,
    mut cmd_rx: mpsc::Receiver<RuntimeCommand>,
    event_tx: mpsc::Sender<ProtocolEvent>,
) {
    let config = state.config.clone();
    let (answers_tx, mut answers_rx) = mpsc::channel::<PromptAnswer>(16);
    let (failures_tx, mut failures_rx) = mpsc::unbounded_channel::<FailedSend>();
    let mut outbound = Outbound::new(node.sender(), failures_tx);
    let mut ui: HashMap<UiSessionId, mpsc::Sender<String>> = HashMap::new();

    // ── Timers ──────────────────────────────────────────────────────
    let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
    let mut sweep = tokio::time::interval(config.sweep_interval);

    // Skip the immediate first tick on all intervals
    heartbeat.tick().await;
    sweep.tick().await;

    tracing::info!(
        "runtime started: {} ({}) at {}",
        state.identity().nick,
        state.identity().uid,
        state.identity().ip
    );

    macro_rules! run {
        ($effects:expr, $origin:expr) => {{
            let mut ctx = ExecContext {
                outbound: &mut outbound,
                ui: &mut ui,
                collaborators: &collaborators,
                answers_tx: &answers_tx,
                event_tx: &event_tx,
                prompt_timeout: config.prompt_timeout,
            };
            execute_effects($effects, &mut ctx, $origin).await
        }};
    }

    loop {
        tokio::select! {
            // ── 1. Incoming data from transport ─────────────────
            result = node.recv() => {
                let event = match result {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!("transport stopped: {e}");
                        break;
                    }
                };
                let effects = match event {
                    TransportEvent::Datagram { from, data } => {
                        state.handle_datagram(from, &data, now_secs())
                    }
                    TransportEvent::Frame { conn, from, role, data } => {
                        tracing::trace!("{} bytes on {conn} from {from}", data.len());
                        state.handle_frame(conn, role, &data, now_secs())
                    }
                    TransportEvent::Closed { conn, .. } => state.handle_closed(conn),
                };
                run!(effects, SendOrigin::Log);
            }

            // ── 2. Commands from the control channel ────────────
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    tracing::info!("all runtime handles dropped, stopping");
                    break;
                };
                match cmd {
                    RuntimeCommand::Execute { line, reply } => {
                        let (text, effects) = state.execute(&line, now_secs());
                        let deliveries = run!(effects, SendOrigin::Reply);
                        answer_when_sent(text, deliveries, reply);
                        if state.is_stopping() {
                            break;
                        }
                    }
                    RuntimeCommand::AttachUi { kind, chat_id, lines, reply } => {
                        let (session, effects) = state.attach_ui(kind, &chat_id);
                        ui.insert(session, lines);
                        run!(effects, SendOrigin::Log);
                        let _ = reply.send(session);
                    }
                    RuntimeCommand::UiInput { session, line } => {
                        let effects = state.handle_ui_input(session, &line, now_secs());
                        run!(effects, SendOrigin::Ui(session));
                    }
                    RuntimeCommand::UiDetached { session } => {
                        let effects = state.detach_ui(session);
                        run!(effects, SendOrigin::Log);
                    }
                    RuntimeCommand::Shutdown => {
                        tracing::info!("shutdown requested");
                        break;
                    }
                }
            }

            // ── 3. Prompt answers ───────────────────────────────
            Some(answer) = answers_rx.recv() => {
                let effects = state.handle_prompt_answer(answer, now_secs());
                run!(effects, SendOrigin::Log);
            }

            // ── 4. Sends that failed in an outbound queue ───────
            Some(failed) = failures_rx.recv() => {
                let effects = surface_failure(&mut state, failed);
                run!(effects, SendOrigin::Log);
            }

            // ── 5. Timers ───────────────────────────────────────
            _ = heartbeat.tick() => {
                let effects = state.tick_heartbeat();
                run!(effects, SendOrigin::Log);
            }

            _ = sweep.tick() => {
                let effects = state.tick_sweep(now_secs());
                run!(effects, SendOrigin::Log);
            }
        }
    }

    // ── Shutdown: LEAVE / BYE for every attached window ─────────────
    let effects = state.shutdown();
    run!(effects, SendOrigin::Log);
    ui.clear();
    outbound.drain(config.shutdown_grace).await;

    if let Err(e) = node.shutdown().await {
        tracing::warn!("transport shutdown: {e}");
    }
    tracing::info!("runtime stopped");
}

/// Reply to a transient command once its sends are settled.
///
/// Runs off the reactor, so the loop keeps serving while a peer is slow.
/// Each failed send adds its notice to the reply.
fn answer_when_sent(mut text: String, deliveries: Vec<Delivery>, reply: oneshot::Sender<String>) {
    if deliveries.is_empty() {
        let _ = reply.send(text);
        return;
    }
    tokio::spawn(async move {
        for delivery in deliveries {
            if let Ok(Err(failure)) = delivery.await {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(&failure.notice());
            }
        }
        let _ = reply.send(text);
    });
}

/// Let the state roll back, then tell whoever caused the send.
fn surface_failure(state: &mut RuntimeState, failed: FailedSend) -> Vec<RuntimeEffect> {
    let FailedSend { failure, origin } = failed;
    let mut effects = state.handle_send_failure(&failure);
    let notice = failure.notice();
    match origin {
        SendOrigin::Ui(session) => effects.push(RuntimeEffect::UiLine {
            session,
            line: format!("[SYSTEM] {notice}"),
        }),
        SendOrigin::Log => tracing::warn!("{} not delivered: {notice}", failure.kind),
        // already appended to the command's reply
        SendOrigin::Reply => tracing::debug!("{} not delivered: {notice}", failure.kind),
    }
    effects
}
