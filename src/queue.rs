//! Cola de ingreso en memoria.
//!
//! Reemplaza al transporte de colas externo (fuera de alcance): entrega
//! at-least-once hacia el despachador. El gate "¿sigue en RECEIVED?" del
//! despachador absorbe cualquier reentrega.

use dlc_domain::OverrideRequest;
use log::debug;
use tokio::sync::mpsc;

use dlc_core::CoreError;

/// Solicitud aceptada en espera de despacho.
#[derive(Debug, Clone)]
pub struct QueuedSubmission {
    pub correlation_id: String,
    pub subscription_id: String,
    pub request: OverrideRequest,
}

/// Extremo de escritura de la cola de ingreso.
#[derive(Clone)]
pub struct IngressQueue {
    tx: mpsc::Sender<QueuedSubmission>,
}

/// Extremo de lectura de la cola de ingreso (lo consume el despachador).
pub struct IngressReceiver {
    rx: mpsc::Receiver<QueuedSubmission>,
}

/// Crea el par de extremos de la cola.
pub fn ingress_queue(capacity: usize) -> (IngressQueue, IngressReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (IngressQueue { tx }, IngressReceiver { rx })
}

impl IngressQueue {
    /// Encola una solicitud aceptada. Falla si la cola está cerrada o
    /// llena (el caller lo reporta como fallo de encolado).
    pub async fn enqueue(&self, submission: QueuedSubmission) -> Result<(), CoreError> {
        debug!("enqueueing correlation id {}", submission.correlation_id);
        self.tx
            .send(submission)
            .await
            .map_err(|e| CoreError::Internal(format!("ingress queue closed: {e}")))
    }
}

impl IngressReceiver {
    /// Espera al menos una solicitud y drena hasta `max` sin bloquear.
    /// Devuelve `None` cuando la cola se cerró y vació.
    pub async fn next_batch(&mut self, max: usize) -> Option<Vec<QueuedSubmission>> {
        let first = self.rx.recv().await?;
        let mut batch = vec![first];
        while batch.len() < max {
            match self.rx.try_recv() {
                Ok(submission) => batch.push(submission),
                Err(_) => break,
            }
        }
        Some(batch)
    }

    /// Drena lo que haya encolado ahora mismo, sin esperar.
    pub fn drain_now(&mut self, max: usize) -> Vec<QueuedSubmission> {
        let mut batch = Vec::new();
        while batch.len() < max {
            match self.rx.try_recv() {
                Ok(submission) => batch.push(submission),
                Err(_) => break,
            }
        }
        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(id: &str) -> QueuedSubmission {
        QueuedSubmission { correlation_id: id.into(),
                           subscription_id: "sub-1".into(),
                           request: serde_json::from_str("{}").unwrap() }
    }

    #[tokio::test]
    async fn batch_drains_up_to_max() {
        let (queue, mut receiver) = ingress_queue(16);
        for i in 0..5 {
            queue.enqueue(submission(&format!("CRL-{i}"))).await.unwrap();
        }

        let batch = receiver.next_batch(3).await.unwrap();
        assert_eq!(batch.len(), 3);
        let rest = receiver.drain_now(16);
        assert_eq!(rest.len(), 2);
    }

    #[tokio::test]
    async fn drain_now_is_non_blocking() {
        let (_queue, mut receiver) = ingress_queue(16);
        assert!(receiver.drain_now(8).is_empty());
    }
}
