//! Run polling: one state-machine step per `advance`, and a driver that
//! sleeps between steps until the run settles or the turn is cancelled.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use unconstrained_api::{AssistantsApi, CreateRunRequest, RunStatus};

use crate::{
    conversation::{NextAction, TranscriptEntry, render_transcript},
    error::Result,
    events::ChatEvent,
    session::ChatSession,
};

/// Shown when failed runs exhaust the retry ceiling
pub const OVERLOAD_MESSAGE: &str = "FAILED: The OpenAI API is currently processing too many requests. Please try again later ......";

/// Polling configuration
#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    /// Delay between polls while the run is queued or in progress
    pub working_delay: Duration,
    /// Delay before retrying a failed run, and between polls in odd states
    pub retry_delay: Duration,
    /// Failed runs tolerated per turn before giving up
    pub retry_ceiling: u32,
    /// Give up polling one turn after this long
    pub max_wait: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            working_delay: Duration::from_secs(1),
            retry_delay: Duration::from_secs(3),
            retry_ceiling: 3,
            max_wait: Some(Duration::from_secs(600)),
        }
    }
}

/// Outcome of one poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollStep {
    /// No run is tracked
    Idle,
    /// Run is queued or in progress; poll again after `delay`
    Working { status: RunStatus, delay: Duration },
    /// Run failed; a replacement starts after `delay`
    Retrying { attempt: u32, delay: Duration },
    /// Run is in a state outside the normal progression; poll again after `delay`
    Waiting { status: RunStatus, delay: Duration },
    /// Run finished and the transcript was re-rendered
    Completed {
        transcript: Vec<TranscriptEntry>,
        partial: bool,
    },
    /// Retries exhausted
    Failed { message: String },
    /// Polling budget exhausted before the run settled
    Stalled { status: RunStatus },
    /// Run was cancelled
    Cancelled,
}

impl PollStep {
    /// How long to wait before the next `advance`, if another is due
    pub fn delay(&self) -> Option<Duration> {
        match self {
            PollStep::Working { delay, .. }
            | PollStep::Retrying { delay, .. }
            | PollStep::Waiting { delay, .. } => Some(*delay),
            _ => None,
        }
    }

    /// Whether polling is over for this turn
    pub fn is_settled(&self) -> bool {
        self.delay().is_none()
    }

    fn to_event(&self, ceiling: u32) -> Option<ChatEvent> {
        Some(match self {
            PollStep::Idle => return None,
            PollStep::Working { status, .. } => ChatEvent::Working { status: *status },
            PollStep::Retrying { attempt, .. } => ChatEvent::Retrying {
                attempt: *attempt,
                ceiling,
            },
            PollStep::Waiting { status, .. } => ChatEvent::Waiting { status: *status },
            PollStep::Completed {
                transcript,
                partial,
            } => ChatEvent::Completed {
                transcript: transcript.clone(),
                partial: *partial,
            },
            PollStep::Failed { message } => ChatEvent::Failed {
                message: message.clone(),
            },
            PollStep::Stalled { status } => ChatEvent::Stalled { status: *status },
            PollStep::Cancelled => ChatEvent::Cancelled,
        })
    }
}

/// Perform one poll of the session's run.
///
/// Makes at most one state-changing call to the service (refresh the run,
/// or start a replacement run), plus a message listing once the run has
/// completed. Never sleeps; the returned step carries the delay.
pub async fn advance(session: &mut ChatSession) -> Result<PollStep> {
    let config = session.config.polling.clone();
    let api: Arc<dyn AssistantsApi> = Arc::clone(&session.api);
    let conversation = &mut session.conversation;

    let Some(tracked) = conversation.run.as_ref() else {
        return Ok(PollStep::Idle);
    };
    if !conversation.polling {
        if let Some(ref step) = conversation.settled {
            return Ok(step.clone());
        }
    }
    let thread_id = tracked.thread_id.clone();
    let previous = tracked.status;

    let run = match conversation.next_action {
        NextAction::Evaluate => tracked.clone(),
        NextAction::Refresh => api.retrieve_run(&thread_id, &tracked.id).await?,
        NextAction::Resubmit => {
            let request = CreateRunRequest {
                assistant_id: tracked.assistant_id.clone(),
            };
            let run = api.create_run(&thread_id, request).await?;
            tracing::info!("Started replacement run {}", run.id);
            let _ = session.event_tx.send(ChatEvent::RunCreated {
                run_id: run.id.clone(),
            });
            run
        }
    };
    if run.status != previous {
        tracing::debug!("Run {}: {} -> {}", run.id, previous, run.status);
    }

    let status = run.status;
    let last_error = run.last_error.clone();
    conversation.run = Some(run);
    conversation.next_action = NextAction::Evaluate;

    let ceiling = config.retry_ceiling;
    let out_of_time = conversation
        .turn_started
        .zip(config.max_wait)
        .is_some_and(|(started, max)| started.elapsed() >= max);
    let may_continue = conversation.retry_count < ceiling && !out_of_time;

    let step = match status {
        RunStatus::Queued | RunStatus::InProgress => {
            if may_continue {
                conversation.next_action = NextAction::Refresh;
                PollStep::Working {
                    status,
                    delay: config.working_delay,
                }
            } else {
                PollStep::Stalled { status }
            }
        }
        RunStatus::Failed | RunStatus::Expired => {
            if conversation.retry_count >= ceiling {
                PollStep::Failed {
                    message: OVERLOAD_MESSAGE.to_string(),
                }
            } else {
                conversation.retry_count += 1;
                let attempt = conversation.retry_count;
                match last_error {
                    Some(e) => tracing::warn!("Run {} ({}/{}): {}: {}", status, attempt, ceiling, e.code, e.message),
                    None => tracing::warn!("Run {} ({}/{})", status, attempt, ceiling),
                }
                if attempt < ceiling && !out_of_time {
                    conversation.next_action = NextAction::Resubmit;
                    PollStep::Retrying {
                        attempt,
                        delay: config.retry_delay,
                    }
                } else {
                    PollStep::Failed {
                        message: OVERLOAD_MESSAGE.to_string(),
                    }
                }
            }
        }
        RunStatus::Completed | RunStatus::Incomplete => {
            let messages = api.list_messages(&thread_id).await?;
            conversation.transcript = render_transcript(messages);
            conversation.retry_count = 0;
            PollStep::Completed {
                transcript: conversation.transcript.clone(),
                partial: status == RunStatus::Incomplete,
            }
        }
        RunStatus::Cancelled => PollStep::Cancelled,
        RunStatus::RequiresAction | RunStatus::Cancelling | RunStatus::Unknown => {
            if may_continue {
                conversation.next_action = NextAction::Refresh;
                PollStep::Waiting {
                    status,
                    delay: config.retry_delay,
                }
            } else {
                PollStep::Stalled { status }
            }
        }
    };

    conversation.polling = !step.is_settled();
    match &step {
        PollStep::Failed { message } => {
            conversation.error = Some(message.clone());
            conversation.settled = Some(step.clone());
        }
        PollStep::Stalled { status } => {
            conversation.error = Some(format!("Stopped waiting for the assistant (run {})", status));
            conversation.settled = Some(step.clone());
        }
        _ => {}
    }

    Ok(step)
}

/// Call [`advance`] until the run settles, sleeping between polls.
///
/// Every step is published to subscribers. Cancelling `cancel` while waiting
/// stops the loop and asks the service to cancel the run.
pub async fn poll_until_settled(
    session: &mut ChatSession,
    cancel: &CancellationToken,
) -> Result<PollStep> {
    let ceiling = session.config.polling.retry_ceiling;

    loop {
        if cancel.is_cancelled() {
            return Ok(cancel_active_run(session).await);
        }

        let step = advance(session).await?;
        if let Some(event) = step.to_event(ceiling) {
            let _ = session.event_tx.send(event);
        }

        let Some(delay) = step.delay() else {
            return Ok(step);
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                return Ok(cancel_active_run(session).await);
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Best-effort remote cancel of the tracked run.
async fn cancel_active_run(session: &mut ChatSession) -> PollStep {
    let api = Arc::clone(&session.api);
    let conversation = &mut session.conversation;
    conversation.next_action = NextAction::Evaluate;
    conversation.polling = false;
    let active = conversation.has_active_run();

    if let Some(run) = conversation.run.as_mut() {
        if active {
            match api.cancel_run(&run.thread_id, &run.id).await {
                Ok(updated) => *run = updated,
                Err(e) => tracing::warn!("Failed to cancel run {}: {}", run.id, e),
            }
        }
        tracing::info!("Cancelled turn (run {} is {})", run.id, run.status);
    }

    let _ = session.event_tx.send(ChatEvent::Cancelled);
    PollStep::Cancelled
}
