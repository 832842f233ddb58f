use std::ops::ControlFlow;
use std::sync::Arc;

use agent_harness::observability::init_observability;
use agent_harness::prelude::*;
use agent_harness::vendors::openai::OpenAiProvider;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), HarnessError> {
    let _ = dotenvy::dotenv();
    init_observability();

    let observers = EventObservers::new().on(EventKind::ReasoningStart, |_| {
        eprintln!("[thinking]");
        ControlFlow::Continue(())
    });
    let agent = Agent::builder(Arc::new(OpenAiProvider::from_env()?), "gpt-4o-mini")
        .system_prompt("Reply with a short greeting.")
        .observers(observers)
        .timeout(std::time::Duration::from_secs(60))
        .build()?;

    let mut stream = agent.stream("Stream a greeting.")?;
    while let Some(event) = stream.next_event().await {
        match event {
            StreamEvent::TextDelta { text, .. } => print!("{text}"),
            StreamEvent::StepFinish { finish_reason, .. } => {
                println!();
                eprintln!("step finished: {finish_reason:?}");
            }
            StreamEvent::Error { error } => eprintln!("run error: {error}"),
            StreamEvent::Finish { reason, usage } => {
                eprintln!("{reason:?}, {} tokens", usage.total_tokens());
            }
            _ => {}
        }
    }

    let outcome = stream.finish().await?;
    eprintln!("{} step(s)", outcome.steps.len());
    Ok(())
}
