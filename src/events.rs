//! Sink de eventos respaldado por un canal.
//!
//! Es el análogo local del stream de suscripciones: `emit` publica el
//! payload en un canal tokio sin bloquear y un consumidor externo lo
//! drena (en la demo, un task que los imprime). La entrega es
//! at-least-once desde la perspectiva del consumidor; el orden entre
//! correlation ids no está garantizado.

use dlc_core::{CoreError, EventSink, MeterEventPayload};
use log::debug;
use tokio::sync::mpsc;

/// Sink que publica cada evento en un canal sin límite.
pub struct ChannelEventSink {
    tx: mpsc::UnboundedSender<MeterEventPayload>,
}

impl ChannelEventSink {
    /// Crea el sink junto con el extremo de consumo.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MeterEventPayload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ChannelEventSink { tx }, rx)
    }
}

impl EventSink for ChannelEventSink {
    fn emit(&self, payload: MeterEventPayload) -> Result<(), CoreError> {
        debug!("emitting event for correlation id {:?}", payload.correlation_id);
        self.tx
            .send(payload)
            .map_err(|e| CoreError::SinkFailure(format!("event channel closed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use dlc_core::NewRequest;
    use dlc_domain::{Stage, SwitchDirection};

    fn payload(stage: Stage) -> MeterEventPayload {
        let now = Utc.with_ymd_and_hms(2022, 6, 9, 10, 0, 0).unwrap();
        let header = NewRequest { correlation_id: "CRL-1".into(),
                                  subscription_id: "sub-1".into(),
                                  site: "S1".into(),
                                  meter_serial: "M1".into(),
                                  override_value: SwitchDirection::On,
                                  group_id: None,
                                  request_start: None,
                                  request_end: None }.into_header(now)
                                                     .unwrap();
        MeterEventPayload::for_milestone(&header, stage, now, "")
    }

    #[tokio::test]
    async fn emitted_payloads_reach_the_consumer() {
        let (sink, mut rx) = ChannelEventSink::new();
        sink.emit(payload(Stage::Queued)).unwrap();
        sink.emit(payload(Stage::PolicyCreated)).unwrap();

        assert_eq!(rx.recv().await.unwrap().milestone, Some(Stage::Queued));
        assert_eq!(rx.recv().await.unwrap().milestone, Some(Stage::PolicyCreated));
    }

    #[tokio::test]
    async fn closed_channel_surfaces_a_sink_failure() {
        let (sink, rx) = ChannelEventSink::new();
        drop(rx);
        let err = sink.emit(payload(Stage::Queued)).unwrap_err();
        assert!(matches!(err, CoreError::SinkFailure(_)));
    }
}
