use std::ops::ControlFlow;
use std::sync::Arc;

use futures::StreamExt as _;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::content::{ContentPart, Conversation, Message, Role, ToolCall};
use crate::dispatch::ToolDispatcher;
use crate::errors::{HarnessError, RunFailure};
use crate::model::RunOptions;
use crate::observer::EventObservers;
use crate::provider::{ProviderAdapter, ProviderRequest};
use crate::stream::{StreamEvent, Usage};
use crate::tool::ToolResult;

/// Why a run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// The model answered without requesting tools.
    Finished,
    /// The step cap was reached after a tool step. Not an error.
    MaxSteps,
    /// An observer returned `ControlFlow::Break`.
    Stopped,
    /// The cancellation token fired or the run timed out.
    Cancelled,
    /// A fatal provider, transport or protocol failure.
    Errored,
}

/// How a single step ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Finish,
    ToolCalls,
    Error,
    Cancelled,
}

/// Record of one model call and the tool calls it triggered.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AgentStep {
    pub index: usize,
    /// Events delivered during the step, in arrival order.
    pub events: Vec<StreamEvent>,
    pub tool_calls: Vec<ToolCall>,
    /// Results in completion order.
    pub tool_results: Vec<ToolResult>,
    pub usage: Option<Usage>,
    pub outcome: StepOutcome,
}

/// Everything a finished run produced.
#[derive(Clone, Debug, PartialEq)]
pub struct RunOutcome {
    pub run_id: uuid::Uuid,
    /// Input conversation plus every fully applied step.
    pub conversation: Conversation,
    pub steps: Vec<AgentStep>,
    pub reason: TerminalReason,
    /// First fatal failure, set when `reason` is `Errored`.
    pub error: Option<RunFailure>,
    /// Usage summed over all steps.
    pub usage: Usage,
}

impl RunOutcome {
    /// Text of the last assistant message.
    pub fn text(&self) -> String {
        self.conversation.last_assistant_text().unwrap_or_default()
    }

    /// Converts an errored outcome into its failure.
    pub fn into_result(self) -> Result<Self, RunFailure> {
        match self.error {
            Some(failure) => Err(failure),
            None => Ok(self),
        }
    }
}

/// Handle used to request cancellation of a running stream.
#[derive(Clone, Debug)]
pub struct AbortHandle {
    token: CancellationToken,
}

impl AbortHandle {
    /// Requests cancellation.
    ///
    /// The run observes it at its next suspension point and ends with
    /// `TerminalReason::Cancelled`.
    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Streaming handle returned by `Agent::stream`.
///
/// Use `next_event()` to consume events as they arrive and `finish()` to obtain
/// the outcome after the terminal `finish` event. Dropping the handle cancels
/// the run.
pub struct RunStream {
    run_id: uuid::Uuid,
    rx: mpsc::Receiver<StreamEvent>,
    final_rx: oneshot::Receiver<RunOutcome>,
    abort_handle: AbortHandle,
    saw_terminal: bool,
}

impl RunStream {
    pub(crate) fn start(config: RunConfig, conversation: Conversation, token: CancellationToken) -> Self {
        let run_id = uuid::Uuid::new_v4();
        let (tx, rx) = mpsc::channel(config.options.stream_buffer_capacity.max(1));
        let (final_tx, final_rx) = oneshot::channel();
        let abort_handle = AbortHandle {
            token: token.clone(),
        };
        tokio::spawn(async move {
            let outcome = execute(run_id, &config, conversation, token, Some(tx)).await;
            let _ = final_tx.send(outcome);
        });
        Self {
            run_id,
            rx,
            final_rx,
            abort_handle,
            saw_terminal: false,
        }
    }

    pub fn run_id(&self) -> uuid::Uuid {
        self.run_id
    }

    /// Returns a handle that can cancel the run.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort_handle.clone()
    }

    /// Waits for the next event; `None` once the run's channel is closed.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        let event = self.rx.recv().await;
        if let Some(StreamEvent::Finish { .. }) = &event {
            self.saw_terminal = true;
        }
        event
    }

    /// Drains the remaining events and returns the run outcome.
    pub async fn finish(mut self) -> Result<RunOutcome, HarnessError> {
        while !self.saw_terminal {
            match self.rx.recv().await {
                Some(StreamEvent::Finish { .. }) => self.saw_terminal = true,
                Some(_) => {}
                None => break,
            }
        }
        (&mut self.final_rx).await.map_err(|_| {
            HarnessError::Internal(format!("run task {} ended without an outcome", self.run_id))
        })
    }
}

impl Drop for RunStream {
    fn drop(&mut self) {
        if !self.saw_terminal {
            self.abort_handle.abort();
        }
    }
}

/// Everything a run needs besides its conversation.
#[derive(Clone)]
pub(crate) struct RunConfig {
    pub provider: Arc<dyn ProviderAdapter>,
    pub model: String,
    pub dispatcher: ToolDispatcher,
    pub observers: EventObservers,
    pub options: RunOptions,
    pub vendor_options: Option<serde_json::Value>,
}

/// Aborts the deadline timer when the run ends first.
struct DeadlineGuard(JoinHandle<()>);

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Fans events out to observers and, for streamed runs, the channel.
struct Emitter {
    observers: EventObservers,
    tx: Option<mpsc::Sender<StreamEvent>>,
    token: CancellationToken,
    /// Set once an observer breaks; observers see nothing afterwards.
    stopped: bool,
}

impl Emitter {
    async fn emit(&mut self, event: &StreamEvent) -> ControlFlow<()> {
        if let Some(tx) = &self.tx
            && tx.send(event.clone()).await.is_err()
        {
            debug!("run stream receiver dropped, cancelling run");
            self.tx = None;
            self.token.cancel();
        }
        if self.stopped {
            return ControlFlow::Break(());
        }
        let flow = self.observers.notify(event);
        if flow.is_break() {
            self.stopped = true;
        }
        flow
    }
}

/// Content and bookkeeping accumulated while one step is consumed.
#[derive(Default)]
struct StepBuffer {
    events: Vec<StreamEvent>,
    parts: Vec<ContentPart>,
    tool_calls: Vec<ToolCall>,
}

impl StepBuffer {
    fn record(&mut self, event: &StreamEvent) {
        self.events.push(event.clone());
        match event {
            StreamEvent::TextDelta { text, .. } => match self.parts.last_mut() {
                Some(ContentPart::Text { text: current }) => current.push_str(text),
                _ => self.parts.push(ContentPart::Text { text: text.clone() }),
            },
            StreamEvent::ReasoningDelta { text, .. } => match self.parts.last_mut() {
                Some(ContentPart::Reasoning { text: current }) => current.push_str(text),
                _ => self.parts.push(ContentPart::Reasoning { text: text.clone() }),
            },
            StreamEvent::ToolCallEnd {
                id,
                tool_name,
                arguments,
            } => {
                let call = ToolCall {
                    id: id.clone(),
                    name: tool_name.clone(),
                    arguments: arguments.clone(),
                };
                self.parts.push(ContentPart::ToolCall(call.clone()));
                self.tool_calls.push(call);
            }
            _ => {}
        }
    }

    fn into_step(self, index: usize, results: Vec<ToolResult>, usage: Option<Usage>, outcome: StepOutcome) -> AgentStep {
        AgentStep {
            index,
            events: self.events,
            tool_calls: self.tool_calls,
            tool_results: results,
            usage,
            outcome,
        }
    }
}

enum Consumed {
    /// Transport ended normally.
    Complete,
    /// An observer broke delivery.
    Stopped,
    Cancelled,
    Failed(RunFailure),
}

/// Drives one run to its terminal reason.
///
/// Steps run sequentially; tool calls within a step run concurrently. The
/// conversation only ever receives whole steps: a cancelled or failed step is
/// recorded in `steps` but never appended.
pub(crate) async fn execute(
    run_id: uuid::Uuid,
    config: &RunConfig,
    mut conversation: Conversation,
    token: CancellationToken,
    tx: Option<mpsc::Sender<StreamEvent>>,
) -> RunOutcome {
    let provider_id = config.provider.id();
    info!(
        run_id = %run_id,
        provider = %provider_id,
        model = %config.model,
        max_steps = config.options.max_steps,
        tools = config.dispatcher.tools().len(),
        "agent run started"
    );

    let _deadline = config.options.timeout.map(|timeout| {
        let token = token.clone();
        DeadlineGuard(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            debug!(run_id = %run_id, ?timeout, "run deadline reached");
            token.cancel();
        }))
    });

    let mut emitter = Emitter {
        observers: config.observers.clone(),
        tx,
        token: token.clone(),
        stopped: false,
    };
    let mut steps = Vec::new();
    let mut usage = Usage::default();
    let mut error = None;
    let mut step = 0;

    let reason = loop {
        if token.is_cancelled() {
            break TerminalReason::Cancelled;
        }
        debug!(run_id = %run_id, step, messages = conversation.messages.len(), "requesting generation");
        let request = ProviderRequest {
            run_id,
            step,
            model: config.model.clone(),
            system_prompt: conversation.system_prompt.clone(),
            messages: conversation.messages.clone(),
            tools: config.dispatcher.tools().definitions(),
            vendor_options: config.vendor_options.clone(),
        };
        let started = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            started = config.provider.start_stream(request, token.clone()) => Some(started),
        };
        let mut handle = match started {
            None => {
                steps.push(StepBuffer::default().into_step(step, Vec::new(), None, StepOutcome::Cancelled));
                break TerminalReason::Cancelled;
            }
            Some(Err(err)) => {
                warn!(
                    run_id = %run_id,
                    step,
                    provider = %provider_id,
                    status = ?err.status_code(),
                    error = %err,
                    "model call failed"
                );
                let failure = RunFailure::from(&err);
                let mut buffer = StepBuffer::default();
                let event = StreamEvent::Error {
                    error: failure.clone(),
                };
                buffer.record(&event);
                let _ = emitter.emit(&event).await;
                steps.push(buffer.into_step(step, Vec::new(), None, StepOutcome::Error));
                error = Some(failure);
                break TerminalReason::Errored;
            }
            Some(Ok(handle)) => handle,
        };

        let mut normalizer = config.provider.normalizer();
        let mut buffer = StepBuffer::default();
        let consumed = 'consume: loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break 'consume Consumed::Cancelled,
                next = handle.stream.next() => next,
            };
            let (events, complete) = match next {
                Some(Ok(chunk)) => (normalizer.normalize(chunk), false),
                Some(Err(err)) => {
                    warn!(run_id = %run_id, step, provider = %provider_id, error = %err, "stream read failed");
                    let failure = RunFailure::from(&err);
                    let event = StreamEvent::Error {
                        error: failure.clone(),
                    };
                    buffer.record(&event);
                    let _ = emitter.emit(&event).await;
                    break 'consume Consumed::Failed(failure);
                }
                None => (normalizer.finish(), true),
            };
            for event in events {
                buffer.record(&event);
                let flow = emitter.emit(&event).await;
                if let StreamEvent::Error { error } = event {
                    warn!(run_id = %run_id, step, error = %error, "stream normalization failed");
                    break 'consume Consumed::Failed(error);
                }
                if flow.is_break() {
                    break 'consume Consumed::Stopped;
                }
            }
            if complete {
                break 'consume Consumed::Complete;
            }
        };

        let meta = normalizer.response_meta().clone();
        if let Some(step_usage) = meta.usage {
            usage += step_usage;
        }
        let mut stopped = match consumed {
            Consumed::Complete => false,
            Consumed::Stopped => true,
            Consumed::Cancelled => {
                debug!(run_id = %run_id, step, "step cancelled mid-stream");
                steps.push(buffer.into_step(step, Vec::new(), meta.usage, StepOutcome::Cancelled));
                break TerminalReason::Cancelled;
            }
            Consumed::Failed(failure) => {
                steps.push(buffer.into_step(step, Vec::new(), meta.usage, StepOutcome::Error));
                error = Some(failure);
                break TerminalReason::Errored;
            }
        };

        if !stopped {
            let event = StreamEvent::StepFinish {
                id: meta
                    .response_id
                    .clone()
                    .unwrap_or_else(|| format!("{run_id}-step-{step}")),
                step,
                finish_reason: meta.finish_reason.clone(),
                usage: meta.usage,
            };
            buffer.record(&event);
            stopped = emitter.emit(&event).await.is_break();
        }

        let calls = buffer.tool_calls.clone();
        let mut results = Vec::with_capacity(calls.len());
        if !calls.is_empty() {
            debug!(run_id = %run_id, step, calls = calls.len(), "dispatching tool calls");
            let mut in_flight = config.dispatcher.spawn_all(&calls, &token);
            while let Some(result) = in_flight.next().await {
                let event = StreamEvent::ToolResult {
                    id: result.tool_call_id.clone(),
                    result: result.clone(),
                };
                buffer.record(&event);
                let _ = emitter.emit(&event).await;
                results.push(result);
            }
        }

        if token.is_cancelled() {
            steps.push(buffer.into_step(step, results, meta.usage, StepOutcome::Cancelled));
            break TerminalReason::Cancelled;
        }

        append_step(&mut conversation, &buffer.parts, &calls, &results);
        let outcome = if calls.is_empty() {
            StepOutcome::Finish
        } else {
            StepOutcome::ToolCalls
        };
        steps.push(buffer.into_step(step, results, meta.usage, outcome));
        step += 1;

        if stopped {
            break TerminalReason::Stopped;
        }
        if calls.is_empty() {
            break TerminalReason::Finished;
        }
        if step >= config.options.max_steps {
            break TerminalReason::MaxSteps;
        }
    };

    let _ = emitter.emit(&StreamEvent::Finish { reason, usage }).await;
    info!(
        run_id = %run_id,
        ?reason,
        steps = steps.len(),
        input_tokens = usage.input_tokens,
        output_tokens = usage.output_tokens,
        "agent run ended"
    );
    RunOutcome {
        run_id,
        conversation,
        steps,
        reason,
        error,
        usage,
    }
}

/// Appends the assistant turn and, when tools ran, one tool turn with the
/// results in call order.
fn append_step(conversation: &mut Conversation, parts: &[ContentPart], calls: &[ToolCall], results: &[ToolResult]) {
    if !parts.is_empty() {
        conversation.push(Message {
            role: Role::Assistant,
            parts: parts.to_vec(),
        });
    }
    if calls.is_empty() {
        return;
    }
    let ordered = calls
        .iter()
        .filter_map(|call| results.iter().find(|result| result.tool_call_id == call.id))
        .cloned()
        .map(ContentPart::ToolResult)
        .collect();
    conversation.push(Message {
        role: Role::Tool,
        parts: ordered,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::EventKind;
    use crate::test_support::{
        Script, ScriptedProvider, counter_tool, failing_tool, finish_chunk, slow_tool, text_chunk,
        tool_call_chunk,
    };
    use crate::tool::{Tool, ToolErrorKind, ToolSet};
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn config(provider: Arc<ScriptedProvider>, tools: Vec<Arc<dyn Tool>>, max_steps: usize) -> RunConfig {
        RunConfig {
            provider,
            model: "scripted-model".into(),
            dispatcher: ToolDispatcher::new(Arc::new(ToolSet::new(tools).expect("tools"))),
            observers: EventObservers::new(),
            options: RunOptions {
                max_steps,
                ..RunOptions::default()
            },
            vendor_options: None,
        }
    }

    fn prompt() -> Conversation {
        Conversation::new(Some("be brief".into()), vec![Message::user("count for me")])
    }

    fn tool_step(id: &str, args: &str) -> Script {
        Script::chunks(vec![
            tool_call_chunk(0, id, "count", args),
            finish_chunk("tool_calls"),
        ])
    }

    async fn run(config: &RunConfig, token: CancellationToken) -> RunOutcome {
        execute(uuid::Uuid::new_v4(), config, prompt(), token, None).await
    }

    #[tokio::test]
    async fn text_only_response_finishes_after_one_step() {
        let provider = ScriptedProvider::new(vec![Script::chunks(vec![
            text_chunk("Hello"),
            text_chunk(" there"),
            finish_chunk("stop"),
        ])]);
        let outcome = run(&config(provider.clone(), vec![], 8), CancellationToken::new()).await;
        assert_eq!(outcome.reason, TerminalReason::Finished);
        assert_eq!(outcome.text(), "Hello there");
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.steps[0].outcome, StepOutcome::Finish);
        assert_eq!(outcome.conversation.messages.len(), 2);
        assert_eq!(provider.calls(), 1);
        let last = outcome.steps[0].events.last().expect("event");
        assert_eq!(last.kind(), EventKind::StepFinish);
    }

    #[tokio::test]
    async fn tool_results_feed_the_next_step() {
        let (tool, total) = counter_tool("count");
        let provider = ScriptedProvider::new(vec![
            tool_step("call_1", r#"{"step":2}"#),
            Script::chunks(vec![text_chunk("done"), finish_chunk("stop")]),
        ]);
        let outcome = run(&config(provider.clone(), vec![tool], 8), CancellationToken::new()).await;
        assert_eq!(outcome.reason, TerminalReason::Finished);
        assert_eq!(total.load(Ordering::SeqCst), 2);
        let requests = provider.requests();
        assert_eq!(requests.len(), 2);
        let second = &requests[1];
        assert_eq!(second.step, 1);
        assert_eq!(second.messages.len(), 3);
        assert_eq!(second.messages[1].tool_calls().count(), 1);
        assert_eq!(second.messages[2].role, Role::Tool);
        assert_eq!(second.tools.len(), 1);
    }

    #[tokio::test]
    async fn max_steps_one_dispatches_tools_then_stops() {
        let (tool, total) = counter_tool("count");
        let provider = ScriptedProvider::new(vec![
            tool_step("call_1", "{}"),
            Script::chunks(vec![text_chunk("never requested")]),
        ]);
        let outcome = run(&config(provider.clone(), vec![tool], 1), CancellationToken::new()).await;
        assert_eq!(outcome.reason, TerminalReason::MaxSteps);
        assert!(outcome.error.is_none());
        assert_eq!(provider.calls(), 1);
        assert_eq!(total.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.steps[0].tool_results.len(), 1);
        assert_eq!(outcome.steps[0].outcome, StepOutcome::ToolCalls);
    }

    #[tokio::test]
    async fn failing_tool_is_reported_and_the_run_continues() {
        let provider = ScriptedProvider::new(vec![
            Script::chunks(vec![
                tool_call_chunk(0, "call_f", "fail", "{}"),
                finish_chunk("tool_calls"),
            ]),
            Script::chunks(vec![text_chunk("recovered"), finish_chunk("stop")]),
        ]);
        let outcome = run(&config(provider, vec![failing_tool("fail")], 8), CancellationToken::new()).await;
        assert_eq!(outcome.reason, TerminalReason::Finished);
        let result = outcome.steps[0]
            .events
            .iter()
            .find_map(|event| match event {
                StreamEvent::ToolResult { result, .. } => Some(result.clone()),
                _ => None,
            })
            .expect("tool-result event");
        assert!(result.is_error);
        assert_eq!(result.error_kind, Some(ToolErrorKind::Execution));
        assert_eq!(outcome.text(), "recovered");
    }

    #[tokio::test]
    async fn cancelling_mid_stream_does_not_append_the_partial_step() {
        let provider = ScriptedProvider::new(vec![Script::chunks_then_pending(vec![text_chunk("partial")])]);
        let config = config(provider, vec![], 8);
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let outcome = tokio::time::timeout(Duration::from_secs(5), run(&config, token))
            .await
            .expect("run ends after cancel");
        assert_eq!(outcome.reason, TerminalReason::Cancelled);
        assert_eq!(outcome.conversation, prompt());
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.steps[0].outcome, StepOutcome::Cancelled);
        assert_eq!(outcome.steps[0].events.len(), 1);
    }

    #[tokio::test]
    async fn cancelling_during_tool_dispatch_leaves_the_conversation_untouched() {
        let (slow, finished) = slow_tool("slow", Duration::from_secs(5));
        let provider = ScriptedProvider::new(vec![
            Script::chunks(vec![
                tool_call_chunk(0, "call_1", "slow", "{}"),
                finish_chunk("tool_calls"),
            ]),
            Script::chunks(vec![text_chunk("never requested")]),
        ]);
        let config = config(provider.clone(), vec![slow], 8);
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });
        let outcome = tokio::time::timeout(Duration::from_secs(2), run(&config, token))
            .await
            .expect("run ends after cancel");
        assert_eq!(outcome.reason, TerminalReason::Cancelled);
        assert_eq!(outcome.conversation, prompt());
        assert_eq!(provider.calls(), 1);
        assert_eq!(outcome.steps.len(), 1);
        assert_eq!(outcome.steps[0].outcome, StepOutcome::Cancelled);
        let kinds: Vec<_> = outcome.steps[0]
            .tool_results
            .iter()
            .map(|result| result.error_kind)
            .collect();
        assert_eq!(kinds, vec![Some(ToolErrorKind::Cancelled)]);
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn timeout_cancels_the_run() {
        let provider = ScriptedProvider::new(vec![Script::chunks_then_pending(vec![])]);
        let mut config = config(provider, vec![], 8);
        config.options.timeout = Some(Duration::from_millis(30));
        let outcome = tokio::time::timeout(Duration::from_secs(5), run(&config, CancellationToken::new()))
            .await
            .expect("deadline fires");
        assert_eq!(outcome.reason, TerminalReason::Cancelled);
    }

    #[tokio::test]
    async fn observer_break_stops_the_run_after_dispatching_completed_calls() {
        let (tool, total) = counter_tool("count");
        let provider = ScriptedProvider::new(vec![Script::chunks(vec![
            tool_call_chunk(0, "call_1", "count", "{}"),
            finish_chunk("tool_calls"),
            text_chunk("not delivered"),
        ])]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut config = config(provider.clone(), vec![tool], 8);
        config.observers = EventObservers::new()
            .on(EventKind::ToolCallEnd, |_| ControlFlow::Break(()))
            .on(EventKind::TextDelta, move |event| {
                sink.lock().expect("lock").push(event.clone());
                ControlFlow::Continue(())
            });
        let outcome = run(&config, CancellationToken::new()).await;
        assert_eq!(outcome.reason, TerminalReason::Stopped);
        assert_eq!(provider.calls(), 1);
        assert_eq!(total.load(Ordering::SeqCst), 1);
        assert!(seen.lock().expect("lock").is_empty());
        let tool_turn = outcome.conversation.messages.last().expect("tool turn");
        assert_eq!(tool_turn.role, Role::Tool);
    }

    #[tokio::test]
    async fn provider_failure_ends_the_run_errored() {
        let provider = ScriptedProvider::new(vec![Script::fail(crate::errors::ProviderError::provider(
            "scripted",
            "quota exceeded",
            Some(429),
        ))]);
        let outcome = run(&config(provider, vec![], 8), CancellationToken::new()).await;
        assert_eq!(outcome.reason, TerminalReason::Errored);
        assert!(matches!(
            outcome.error,
            Some(RunFailure::Provider { ref message, .. }) if message == "quota exceeded"
        ));
        assert_eq!(outcome.conversation, prompt());
    }

    #[tokio::test]
    async fn protocol_violation_keeps_earlier_steps() {
        let (tool, _) = counter_tool("count");
        let provider = ScriptedProvider::new(vec![
            tool_step("call_1", "{}"),
            Script::chunks(vec![text_chunk("ok"), crate::sse::RawChunk::data("{broken")]),
        ]);
        let outcome = run(&config(provider, vec![tool], 8), CancellationToken::new()).await;
        assert_eq!(outcome.reason, TerminalReason::Errored);
        assert!(matches!(outcome.error, Some(RunFailure::Protocol { .. })));
        assert_eq!(outcome.steps.len(), 2);
        assert_eq!(outcome.conversation.messages.len(), 3);
    }

    #[tokio::test]
    async fn usage_is_summed_across_steps() {
        let (tool, _) = counter_tool("count");
        let usage = crate::test_support::usage_chunk(10, 2);
        let provider = ScriptedProvider::new(vec![
            Script::chunks(vec![
                tool_call_chunk(0, "call_1", "count", "{}"),
                finish_chunk("tool_calls"),
                usage.clone(),
            ]),
            Script::chunks(vec![text_chunk("done"), finish_chunk("stop"), usage]),
        ]);
        let outcome = run(&config(provider, vec![tool], 8), CancellationToken::new()).await;
        assert_eq!(
            outcome.usage,
            Usage {
                input_tokens: 20,
                output_tokens: 4
            }
        );
    }

    #[tokio::test]
    async fn run_stream_delivers_events_and_outcome() {
        let provider = ScriptedProvider::new(vec![Script::chunks(vec![text_chunk("hi"), finish_chunk("stop")])]);
        let mut stream = RunStream::start(config(provider, vec![], 8), prompt(), CancellationToken::new());
        let first = stream.next_event().await.expect("event");
        assert_eq!(first.kind(), EventKind::TextDelta);
        let outcome = stream.finish().await.expect("outcome");
        assert_eq!(outcome.reason, TerminalReason::Finished);
        assert_eq!(outcome.text(), "hi");
    }

    #[tokio::test]
    async fn abort_handle_cancels_a_streamed_run() {
        let provider = ScriptedProvider::new(vec![Script::chunks_then_pending(vec![text_chunk("a")])]);
        let mut stream = RunStream::start(config(provider, vec![], 8), prompt(), CancellationToken::new());
        let first = stream.next_event().await.expect("event");
        assert_eq!(first.kind(), EventKind::TextDelta);
        stream.abort_handle().abort();
        let mut last = None;
        while let Some(event) = stream.next_event().await {
            last = Some(event);
        }
        assert!(matches!(
            last,
            Some(StreamEvent::Finish {
                reason: TerminalReason::Cancelled,
                ..
            })
        ));
        let outcome = stream.finish().await.expect("outcome");
        assert_eq!(outcome.reason, TerminalReason::Cancelled);
    }
}
