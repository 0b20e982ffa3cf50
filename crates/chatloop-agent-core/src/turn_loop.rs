use std::future::Future;

use chatloop_ai::{
    decode_stream_payload, SseFrame, SseFrameDecoder, TurnRequest, TurnResponseClient,
};
use futures_util::StreamExt;
use serde_json::Value;

use crate::{
    dispatcher::ToolDispatcher, event_processor::EventProcessor, transcript::TurnState,
    CooperativeCancellationToken, TurnConfig, TurnError, TurnEvent,
};

/// Collaborators borrowed for the duration of one turn.
pub struct TurnContext<'a> {
    pub client: &'a dyn TurnResponseClient,
    pub dispatcher: &'a dyn ToolDispatcher,
    pub tools_configuration: &'a Value,
    pub config: &'a TurnConfig,
    pub cancellation_token: Option<&'a CooperativeCancellationToken>,
    pub observer: &'a (dyn Fn(&TurnEvent) + Send + Sync),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnSummary {
    pub rounds: usize,
}

enum StreamEnd {
    Done,
    Eof,
}

struct RoundStream {
    end: StreamEnd,
    response_completed: bool,
}

/// Runs upstream rounds until a stream ends with no continuation pending.
///
/// `is_loading` is set for the duration and cleared on every exit. Failures
/// other than an unpaired call (which reports itself) leave a visible error
/// record behind; records already streamed are kept.
pub async fn run_turn(
    state: &mut TurnState,
    context: &TurnContext<'_>,
) -> Result<TurnSummary, TurnError> {
    state.is_loading = true;
    (context.observer)(&TurnEvent::TurnStart);

    let result = run_rounds(state, context).await;

    if let Err(error) = &result {
        tracing::warn!(error = %error, "turn aborted");
        if !matches!(error, TurnError::UnpairedFunctionCalls { .. }) {
            let index = state.push_error(format!("Error: {error}"));
            notify_record(state, context, index);
        }
    }
    state.is_loading = false;
    (context.observer)(&TurnEvent::TurnEnd {
        rounds: result.as_ref().map(|summary| summary.rounds).unwrap_or_default(),
        error: result.as_ref().err().map(ToString::to_string),
    });
    result
}

async fn run_rounds(
    state: &mut TurnState,
    context: &TurnContext<'_>,
) -> Result<TurnSummary, TurnError> {
    let max_rounds = context.config.max_rounds.max(1);
    ensure_paired(state, context)?;

    for round in 1..=max_rounds {
        (context.observer)(&TurnEvent::RoundStart { round });
        state.needs_continuation = false;

        let RoundStream {
            end,
            response_completed,
        } = stream_round(state, context).await?;
        if matches!(end, StreamEnd::Eof) && !response_completed {
            tracing::warn!(round, "stream closed before the response completed");
        }
        tracing::debug!(
            round,
            clean_end = matches!(end, StreamEnd::Done),
            response_completed,
            needs_continuation = state.needs_continuation,
            "turn stream finished"
        );

        if let Err(error) = ensure_paired(state, context) {
            (context.observer)(&TurnEvent::RoundEnd {
                round,
                needs_continuation: false,
                response_completed,
            });
            return Err(error);
        }

        let continue_turn = state.needs_continuation;
        (context.observer)(&TurnEvent::RoundEnd {
            round,
            needs_continuation: continue_turn,
            response_completed,
        });
        if !continue_turn {
            return Ok(TurnSummary { rounds: round });
        }
    }

    state.needs_continuation = false;
    Err(TurnError::MaxRoundsExceeded(max_rounds))
}

/// Blocks continuation while any function call lacks its adjacent output.
fn ensure_paired(state: &mut TurnState, context: &TurnContext<'_>) -> Result<(), TurnError> {
    let call_ids = state.unpaired_call_ids();
    if call_ids.is_empty() {
        return Ok(());
    }
    state.needs_continuation = false;
    let error = TurnError::UnpairedFunctionCalls { call_ids };
    let index = state.push_error(format!("Error: {error}"));
    notify_record(state, context, index);
    Err(error)
}

async fn stream_round(
    state: &mut TurnState,
    context: &TurnContext<'_>,
) -> Result<RoundStream, TurnError> {
    let request = TurnRequest {
        conversation_items: state.conversation_items.clone(),
        tools_configuration: context.tools_configuration.clone(),
    };
    let mut stream = until_cancelled(context, context.client.open_stream(&request))
        .await
        .ok_or(TurnError::Cancelled)??;
    let mut decoder = SseFrameDecoder::new();
    let processor = EventProcessor::new(context.dispatcher);
    let mut response_completed = false;

    loop {
        let next = until_cancelled(context, stream.next())
            .await
            .ok_or(TurnError::Cancelled)?;
        let (frames, at_eof) = match next {
            Some(chunk) => (decoder.push(&chunk?), false),
            None => (decoder.finish(), true),
        };

        for frame in frames {
            if is_cancelled(context) {
                return Err(TurnError::Cancelled);
            }
            let raw = match frame {
                SseFrame::Done => {
                    return Ok(RoundStream {
                        end: StreamEnd::Done,
                        response_completed,
                    })
                }
                SseFrame::Data(raw) => raw,
            };
            let event = match decode_stream_payload(&raw) {
                Ok(event) => event,
                Err(error) => {
                    tracing::warn!(error = %error, "dropping undecodable stream frame");
                    continue;
                }
            };
            let outcome = until_cancelled(context, processor.apply(state, event))
                .await
                .ok_or(TurnError::Cancelled)?;
            response_completed |= outcome.response_completed;
            for index in outcome.touched {
                notify_record(state, context, index);
            }
        }

        if at_eof {
            return Ok(RoundStream {
                end: StreamEnd::Eof,
                response_completed,
            });
        }
    }
}

fn notify_record(state: &TurnState, context: &TurnContext<'_>, index: usize) {
    if let Some(record) = state.display_records.get(index) {
        (context.observer)(&TurnEvent::RecordUpdated {
            index,
            record: record.clone(),
        });
    }
}

fn is_cancelled(context: &TurnContext<'_>) -> bool {
    context
        .cancellation_token
        .is_some_and(CooperativeCancellationToken::is_cancelled)
}

async fn until_cancelled<F>(context: &TurnContext<'_>, future: F) -> Option<F::Output>
where
    F: Future,
{
    match context.cancellation_token {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => None,
                output = future => Some(output),
            }
        }
        None => Some(future.await),
    }
}
