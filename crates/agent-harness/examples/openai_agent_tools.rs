use std::sync::Arc;

use agent_harness::observability::init_observability;
use agent_harness::prelude::*;
use agent_harness::vendors::openai::{OpenAiAgentBuilderExt, OpenAiProvider, OpenAiRequestOptions};
use serde_json::json;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), HarnessError> {
    let _ = dotenvy::dotenv();
    init_observability();

    let weather = FnTool::new(
        ToolDefinition::new(
            "get_weather",
            "Returns the current temperature in Celsius for a city",
            json!({
                "type": "object",
                "properties": {"city": {"type": "string"}},
                "required": ["city"]
            }),
        ),
        |input, _ctx| async move {
            let city = input["city"].as_str().unwrap_or("unknown").to_string();
            Ok(json!({"city": city, "celsius": 21}))
        },
    );

    let agent = Agent::builder(Arc::new(OpenAiProvider::from_env()?), "gpt-4o-mini")
        .system_prompt("Use tools when they help. Answer in one sentence.")
        .tool(Arc::new(weather))
        .options(RunOptions::from_env()?)
        .openai_options(OpenAiRequestOptions::default().temperature(0.2))?
        .build()?;

    let outcome = agent.run("Is it warm in Lisbon right now?").await?;
    for step in &outcome.steps {
        println!(
            "step {}: {:?}, {} tool call(s)",
            step.index,
            step.outcome,
            step.tool_calls.len()
        );
    }
    if let Some(error) = &outcome.error {
        eprintln!("run error: {error}");
    }
    println!("{:?}: {}", outcome.reason, outcome.text());

    let schema = json!({
        "type": "object",
        "properties": {"city": {"type": "string"}, "country": {"type": "string"}},
        "required": ["city", "country"]
    });
    let object = agent
        .generate_object("Name a European capital and its country.", &schema)
        .await?;
    println!("{object}");
    Ok(())
}
