use std::collections::HashMap;
use std::sync::Arc;

use linesheet_core::UserId;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::events::{EventContext, EventDispatcher, HandlerResult};
use crate::reply::ReplyTransport;
use crate::webhook::LineEnvelope;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum EventOutcome {
    Replied,
    Ignored,
    Failed { reason: String },
}

/// Outcome of one event, reported back to the webhook caller in body order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct EventResult {
    pub event_id: String,
    #[serde(flatten)]
    pub outcome: EventOutcome,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BatchError {
    #[error("event task {index} was cancelled before completing")]
    Cancelled { index: usize },
}

/// Runs a webhook batch. Events from the same user form a chain handled in
/// arrival order; chains for different users run concurrently. Replies are sent
/// from inside the chain and results come back in the order the events arrived.
#[derive(Clone)]
pub struct BatchProcessor {
    dispatcher: Arc<EventDispatcher>,
    transport: Arc<dyn ReplyTransport>,
}

/// Events of one chain, each tagged with its position in the batch.
type Chain = Vec<(usize, LineEnvelope)>;

fn into_chains(envelopes: Vec<LineEnvelope>) -> Vec<Chain> {
    let mut chains: Vec<Chain> = Vec::new();
    let mut by_user: HashMap<UserId, usize> = HashMap::new();

    for (index, envelope) in envelopes.into_iter().enumerate() {
        match envelope.event.user_id().cloned() {
            Some(user_id) => {
                let slot = *by_user.entry(user_id).or_insert_with(|| {
                    chains.push(Vec::new());
                    chains.len() - 1
                });
                chains[slot].push((index, envelope));
            }
            None => chains.push(vec![(index, envelope)]),
        }
    }

    chains
}

impl BatchProcessor {
    pub fn new(dispatcher: Arc<EventDispatcher>, transport: Arc<dyn ReplyTransport>) -> Self {
        Self { dispatcher, transport }
    }

    pub async fn process(
        &self,
        envelopes: Vec<LineEnvelope>,
        ctx: &EventContext,
    ) -> Result<Vec<EventResult>, BatchError> {
        let event_count = envelopes.len();
        let chains = into_chains(envelopes);
        info!(
            event_name = "ingress.line.batch_received",
            correlation_id = %ctx.correlation_id,
            event_count,
            chain_count = chains.len(),
            "processing webhook batch"
        );

        let tasks: Vec<_> = chains
            .into_iter()
            .map(|chain| {
                let first_index = chain.first().map(|(index, _)| *index).unwrap_or_default();
                let processor = self.clone();
                let ctx = ctx.clone();
                (first_index, tokio::spawn(async move { processor.run_chain(chain, &ctx).await }))
            })
            .collect();

        let mut slots: Vec<Option<EventResult>> = vec![None; event_count];
        for (first_index, task) in tasks {
            let finished = match task.await {
                Ok(finished) => finished?,
                Err(_) => {
                    warn!(
                        event_name = "dispatch.batch.cancelled",
                        correlation_id = %ctx.correlation_id,
                        index = first_index,
                        "chain task did not complete; abandoning batch"
                    );
                    return Err(BatchError::Cancelled { index: first_index });
                }
            };
            for (index, result) in finished {
                slots[index] = Some(result);
            }
        }

        Ok(slots.into_iter().flatten().collect())
    }

    /// Handles one user's events strictly one after another. Each event still
    /// runs in its own task so a panic fails that event and the chain carries on.
    async fn run_chain(
        &self,
        chain: Chain,
        ctx: &EventContext,
    ) -> Result<Vec<(usize, EventResult)>, BatchError> {
        let mut finished = Vec::with_capacity(chain.len());
        for (index, envelope) in chain {
            let event_id = envelope.event_id.clone();
            let dispatcher = Arc::clone(&self.dispatcher);
            let transport = Arc::clone(&self.transport);
            let task_ctx = ctx.clone();
            let task = tokio::spawn(async move {
                run_event(&dispatcher, transport.as_ref(), &envelope, &task_ctx).await
            });

            let outcome = match task.await {
                Ok(outcome) => outcome,
                Err(error) if error.is_panic() => {
                    warn!(
                        event_name = "dispatch.event.panicked",
                        correlation_id = %ctx.correlation_id,
                        event_id = %event_id,
                        "event task panicked"
                    );
                    EventOutcome::Failed { reason: "event task panicked".to_owned() }
                }
                Err(_) => {
                    warn!(
                        event_name = "dispatch.batch.cancelled",
                        correlation_id = %ctx.correlation_id,
                        event_id = %event_id,
                        index,
                        "event task cancelled; abandoning batch"
                    );
                    return Err(BatchError::Cancelled { index });
                }
            };
            finished.push((index, EventResult { event_id, outcome }));
        }

        Ok(finished)
    }
}

async fn run_event(
    dispatcher: &EventDispatcher,
    transport: &dyn ReplyTransport,
    envelope: &LineEnvelope,
    ctx: &EventContext,
) -> EventOutcome {
    let result = match dispatcher.dispatch(envelope, ctx).await {
        Ok(result) => result,
        Err(error) => {
            warn!(
                event_name = "dispatch.event.failed",
                correlation_id = %ctx.correlation_id,
                event_id = %envelope.event_id,
                error = %error,
                "event handler failed"
            );
            return EventOutcome::Failed { reason: error.to_string() };
        }
    };

    let message = match result {
        HandlerResult::Responded(message) => message,
        HandlerResult::Ignored => {
            debug!(
                event_name = "dispatch.event.ignored",
                correlation_id = %ctx.correlation_id,
                event_id = %envelope.event_id,
                event_type = ?envelope.event.event_type(),
                "event ignored"
            );
            return EventOutcome::Ignored;
        }
    };

    let Some(reply_token) = envelope.event.reply_token() else {
        return EventOutcome::Failed { reason: "event carries no reply token".to_owned() };
    };
    match transport.reply(reply_token, std::slice::from_ref(&message)).await {
        Ok(()) => EventOutcome::Replied,
        Err(error) => {
            warn!(
                event_name = "egress.line.reply_failed",
                correlation_id = %ctx.correlation_id,
                event_id = %envelope.event_id,
                error = %error,
                "reply delivery failed"
            );
            EventOutcome::Failed { reason: error.to_string() }
        }
    }
}
