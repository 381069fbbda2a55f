//! Gateway over an MQTT broker.
//!
//! Topics and payloads are plain `chat/<room>` strings and JSON, so this backend talks to any
//! other MQTT chat client that follows the same convention.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    SubscribeReasonCode,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::timeout;

use crate::common::NetworkEvent;
use crate::config::BrokerSettings;
use crate::error::TransportError;

use super::gateway::TransportGateway;

/// Outstanding requests rumqttc buffers before `subscribe`/`publish` start to wait.
const REQUEST_CAPACITY: usize = 64;
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

type AckReply = oneshot::Sender<Result<(), TransportError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum AckKind {
    Subscribe,
    Unsubscribe,
}

/// Một yêu cầu đang chờ SUBACK/UNSUBACK từ broker.
#[derive(Debug)]
struct AckWaiter {
    topic: String,
    reply: AckReply,
}

/// Waiters queued in request order, before rumqttc has assigned them a packet id.
#[derive(Debug, Default)]
struct PendingAcks {
    subscribe: VecDeque<AckWaiter>,
    unsubscribe: VecDeque<AckWaiter>,
}

impl PendingAcks {
    fn queue(&mut self, kind: AckKind) -> &mut VecDeque<AckWaiter> {
        match kind {
            AckKind::Subscribe => &mut self.subscribe,
            AckKind::Unsubscribe => &mut self.unsubscribe,
        }
    }
}

type SharedAcks = Arc<Mutex<PendingAcks>>;

fn lock_acks(acks: &SharedAcks) -> std::sync::MutexGuard<'_, PendingAcks> {
    acks.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct MqttGateway {
    client: AsyncClient,
    qos: QoS,
    acks: SharedAcks,
    ack_timeout: Duration,
    event_loop: AbortHandle,
}

impl MqttGateway {
    /// Connect and wait for the broker's CONNACK, at most `connect_timeout`.
    ///
    /// The same bound applies later to every SUBACK and UNSUBACK.
    pub async fn connect(
        settings: &BrokerSettings,
        client_id: &str,
        connect_timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<NetworkEvent>), TransportError> {
        let mut options = MqttOptions::new(client_id, settings.host.as_str(), settings.port);
        options.set_keep_alive(Duration::from_secs(settings.keep_alive_secs).max(MIN_KEEP_ALIVE));
        options.set_clean_session(true);

        let (client, event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (event_sender, event_receiver) = mpsc::unbounded_channel();
        let (ready_sender, ready_receiver) = oneshot::channel();
        let acks = SharedAcks::default();

        let handle = tokio::spawn(run_event_loop(
            event_loop,
            event_sender,
            ready_sender,
            Arc::clone(&acks),
        ));
        let abort = handle.abort_handle();

        match timeout(connect_timeout, ready_receiver).await {
            Ok(Ok(Ok(()))) => {
                log::info!(
                    "Connected to MQTT broker {}:{} as {client_id}",
                    settings.host,
                    settings.port
                );
                let gateway = Self {
                    client,
                    qos: qos_level(settings.qos),
                    acks,
                    ack_timeout: connect_timeout,
                    event_loop: abort,
                };
                Ok((gateway, event_receiver))
            }
            Ok(Ok(Err(err))) => {
                abort.abort();
                Err(err)
            }
            Ok(Err(_)) => {
                abort.abort();
                Err(TransportError::Connect(
                    "event loop stopped before the broker answered".to_string(),
                ))
            }
            Err(_) => {
                abort.abort();
                Err(TransportError::ConnectTimeout(connect_timeout))
            }
        }
    }

    fn expect_ack(&self, kind: AckKind, topic: &str) -> oneshot::Receiver<Result<(), TransportError>> {
        let (reply, answer) = oneshot::channel();
        lock_acks(&self.acks).queue(kind).push_back(AckWaiter {
            topic: topic.to_string(),
            reply,
        });
        answer
    }

    /// Drop the waiter queued for a request rumqttc refused to send.
    fn forget_last(&self, kind: AckKind) {
        lock_acks(&self.acks).queue(kind).pop_back();
    }

    async fn wait_for_ack(
        &self,
        answer: oneshot::Receiver<Result<(), TransportError>>,
        failure: impl FnOnce(String) -> TransportError,
    ) -> Result<(), TransportError> {
        match timeout(self.ack_timeout, answer).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => Err(failure(format!(
                "broker did not acknowledge within {:?}",
                self.ack_timeout
            ))),
        }
    }
}

impl Drop for MqttGateway {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

#[async_trait]
impl TransportGateway for MqttGateway {
    /// Succeeds only once the broker has granted the subscription.
    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let failure = |reason: String| TransportError::Subscribe {
            topic: topic.to_string(),
            reason,
        };
        let answer = self.expect_ack(AckKind::Subscribe, topic);
        if let Err(err) = self.client.subscribe(topic, self.qos).await {
            self.forget_last(AckKind::Subscribe);
            return Err(failure(err.to_string()));
        }
        self.wait_for_ack(answer, failure).await
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let failure = |reason: String| TransportError::Unsubscribe {
            topic: topic.to_string(),
            reason,
        };
        let answer = self.expect_ack(AckKind::Unsubscribe, topic);
        if let Err(err) = self.client.unsubscribe(topic).await {
            self.forget_last(AckKind::Unsubscribe);
            return Err(failure(err.to_string()));
        }
        self.wait_for_ack(answer, failure).await
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .publish(topic, self.qos, false, payload)
            .await
            .map_err(|err| TransportError::Publish {
                topic: topic.to_string(),
                reason: err.to_string(),
            })
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.client.disconnect().await.map_err(|err| {
            log::debug!("MQTT disconnect request failed: {err}");
            TransportError::Closed
        })
    }
}

fn qos_level(level: u8) -> QoS {
    match level {
        2 => QoS::ExactlyOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::AtMostOnce,
    }
}

fn suback_outcome(topic: String, codes: &[SubscribeReasonCode]) -> Result<(), TransportError> {
    if codes
        .iter()
        .any(|code| matches!(code, SubscribeReasonCode::Failure))
    {
        return Err(TransportError::Subscribe {
            topic,
            reason: "broker rejected the subscription".to_string(),
        });
    }
    Ok(())
}

/// Delivery context for the MQTT backend.
///
/// Runs until the connection ends; there is no reconnect. Never waits on the event receiver,
/// so acks keep flowing while the session holds its lock.
async fn run_event_loop(
    mut event_loop: EventLoop,
    events: mpsc::UnboundedSender<NetworkEvent>,
    ready: oneshot::Sender<Result<(), TransportError>>,
    acks: SharedAcks,
) {
    let mut ready = Some(ready);
    let mut in_flight: HashMap<(AckKind, u16), AckWaiter> = HashMap::new();

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let outcome = if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(TransportError::Connect(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )))
                };
                let refused = outcome.is_err();
                if let Some(ready) = ready.take() {
                    let _ = ready.send(outcome);
                }
                if refused {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let delivery = NetworkEvent::Delivery {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                if events.send(delivery).is_err() {
                    log::debug!("Delivery receiver dropped; discarding MQTT message");
                }
            }
            Ok(Event::Outgoing(Outgoing::Subscribe(pkid))) => {
                if let Some(waiter) = lock_acks(&acks).subscribe.pop_front() {
                    in_flight.insert((AckKind::Subscribe, pkid), waiter);
                }
            }
            Ok(Event::Outgoing(Outgoing::Unsubscribe(pkid))) => {
                if let Some(waiter) = lock_acks(&acks).unsubscribe.pop_front() {
                    in_flight.insert((AckKind::Unsubscribe, pkid), waiter);
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                match in_flight.remove(&(AckKind::Subscribe, ack.pkid)) {
                    Some(waiter) => {
                        let outcome = suback_outcome(waiter.topic, &ack.return_codes);
                        if let Err(err) = &outcome {
                            log::warn!("{err}");
                        }
                        let _ = waiter.reply.send(outcome);
                    }
                    None => log::debug!("Unexpected SUBACK (packet id {})", ack.pkid),
                }
            }
            Ok(Event::Incoming(Packet::UnsubAck(ack))) => {
                if let Some(waiter) = in_flight.remove(&(AckKind::Unsubscribe, ack.pkid)) {
                    let _ = waiter.reply.send(Ok(()));
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                log::debug!("MQTT disconnect sent");
                break;
            }
            Ok(event) => {
                log::trace!("MQTT event: {event:?}");
            }
            Err(err) => {
                match ready.take() {
                    Some(ready) => {
                        let _ = ready.send(Err(TransportError::Connect(err.to_string())));
                    }
                    None => {
                        log::warn!("MQTT connection lost: {err}");
                        let _ = events.send(NetworkEvent::Disconnected {
                            reason: err.to_string(),
                        });
                    }
                }
                break;
            }
        }
    }

    // Anyone still waiting gets `Closed` instead of a timeout.
    let mut pending = lock_acks(&acks);
    pending.subscribe.clear();
    pending.unsubscribe.clear();
}
