use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use wiremock::matchers::{body_partial_json, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use actionprompt::actions::{ActionHandler, ActionRegistry};
use actionprompt::config::{build_provider, ProviderSettings, RetrySettings, StaticConfiguration};
use actionprompt::errors::{AgentError, AgentResult};
use actionprompt::generation::Generation;
use actionprompt::models::message::Message;
use actionprompt::models::options::GenerationOptions;
use actionprompt::models::prompt::Prompt;
use actionprompt::models::role::Role;
use actionprompt::models::tool::Action;
use actionprompt::providers::configs::{OpenAiProviderConfig, ProviderConfig};
use actionprompt::render::{render_message, TemplateRenderer};

/// Two-operand arithmetic, reported with one decimal place
struct Calculator {
    name: &'static str,
    operation: fn(f64, f64) -> f64,
}

impl Calculator {
    fn operand(action: &Action, key: &str) -> AgentResult<f64> {
        action
            .param(key)
            .and_then(Value::as_f64)
            .ok_or_else(|| AgentError::InvalidParameters(format!("{} must be a number", key)))
    }
}

#[async_trait]
impl ActionHandler for Calculator {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "Apply the operation to a and b"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
            "required": ["a", "b"]
        })
    }

    async fn perform(&self, action: &Action) -> AgentResult<String> {
        let a = Self::operand(action, "a")?;
        let b = Self::operand(action, "b")?;
        Ok(format!("{:.1}", (self.operation)(a, b)))
    }
}

fn calculator_actions() -> ActionRegistry {
    ActionRegistry::new()
        .with_handler(Calculator {
            name: "add",
            operation: |a, b| a + b,
        })
        .with_handler(Calculator {
            name: "multiply",
            operation: |a, b| a * b,
        })
        .with_handler(Calculator {
            name: "divide",
            operation: |a, b| {
                if b == 0.0 {
                    f64::NAN
                } else {
                    a / b
                }
            },
        })
}

fn tool_call_reply(id: &str, name: &str, arguments: Value) -> Value {
    json!({
        "id": format!("chatcmpl-{}", id),
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": arguments.to_string()}
                }]
            },
            "finish_reason": "tool_calls"
        }],
        "usage": {"prompt_tokens": 40, "completion_tokens": 10, "total_tokens": 50}
    })
}

fn text_reply(text: &str) -> Value {
    json!({
        "id": "chatcmpl-final",
        "model": "gpt-4o",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": text},
            "finish_reason": "stop"
        }],
        "usage": {"prompt_tokens": 60, "completion_tokens": 6, "total_tokens": 66}
    })
}

/// Serve `replies` in order, one per request
async fn sequenced_server(replies: Vec<Value>) -> MockServer {
    let server = MockServer::start().await;
    for reply in replies {
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer sk-calculator"))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
    }
    server
}

fn generation_for(server: &MockServer) -> Result<Generation> {
    let mut openai = OpenAiProviderConfig::new("sk-calculator");
    openai.host = server.uri();
    openai.model = Some("gpt-4o".to_string());

    let source = StaticConfiguration::new().with_provider(
        "test",
        "openai",
        ProviderSettings::new(ProviderConfig::OpenAi(openai)).with_retry(RetrySettings {
            enabled: false,
            ..Default::default()
        }),
    );
    let provider = build_provider(&source, "openai", "test", GenerationOptions::new())?;
    Ok(Generation::new(provider).with_actions(calculator_actions()))
}

fn calculator_prompt(question: &str) -> Result<Prompt> {
    let renderer = TemplateRenderer::new().with_template("instructions", "You are a {{ kind }} agent")?;
    let mut params = Map::new();
    params.insert("kind".to_string(), json!("calculator"));
    let system = render_message(&renderer, Role::System, "instructions", &params)?;

    Ok(Prompt::from_messages(vec![system, Message::user(question)])?)
}

#[tokio::test]
async fn test_basic_turn() -> Result<()> {
    let server = sequenced_server(vec![
        tool_call_reply("call_add", "add", json!({"a": 2, "b": 3})),
        text_reply("2 plus 3 is 5."),
    ])
    .await;

    let completion = generation_for(&server)?
        .generate(calculator_prompt("Add 2 and 3")?)
        .await?;

    let messages = completion.prompt.messages();
    assert_eq!(messages.len(), 5);
    assert_eq!(messages[0].text(), "You are a calculator agent");
    assert_eq!(messages[2].requested_actions[0].name, "add");
    assert_eq!(messages[3].role, Role::Tool);
    assert_eq!(messages[3].text(), "5.0");
    assert!(completion.message().text().contains('5'));
    assert_eq!(completion.response.usage.total_tokens, Some(66));

    // the key never reaches the recorded request
    let raw = completion.response.raw_request.to_string();
    assert!(!raw.contains("sk-calculator"));
    Ok(())
}

#[tokio::test]
async fn test_tool_result_is_resubmitted() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({
            "messages": [{}, {}, {}, {"role": "tool", "tool_call_id": "call_add", "content": "5.0"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(text_reply("5")))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_string_contains("Add 2 and 3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(tool_call_reply(
            "call_add",
            "add",
            json!({"a": 2, "b": 3}),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let mut openai = OpenAiProviderConfig::new("sk-calculator");
    openai.host = server.uri();
    openai.model = Some("gpt-4o".to_string());
    let source = StaticConfiguration::new().with_provider(
        "test",
        "openai",
        ProviderSettings::new(ProviderConfig::OpenAi(openai)),
    );
    let generation = Generation::new(build_provider(
        &source,
        "openai",
        "test",
        GenerationOptions::new(),
    )?)
    .with_actions(calculator_actions());

    let completion = generation.generate(calculator_prompt("Add 2 and 3")?).await?;
    assert_eq!(completion.message().text(), "5");
    Ok(())
}

#[tokio::test]
async fn test_multi_tool_chain() -> Result<()> {
    let server = sequenced_server(vec![
        tool_call_reply("call_area", "multiply", json!({"a": 5, "b": 10})),
        tool_call_reply("call_double", "multiply", json!({"a": 50, "b": 2})),
        text_reply("The area doubled is 100."),
    ])
    .await;

    let generation = generation_for(&server)?;
    let mut stream = generation.reply(calculator_prompt(
        "Calculate the area of a 5x10 rectangle, then multiply by 2",
    )?);

    let mut tool_results = Vec::new();
    let mut last = None;
    while let Some(message) = stream.next().await {
        let message = message?;
        if message.role == Role::Tool {
            tool_results.push(message.text());
        }
        last = Some(message);
    }

    assert_eq!(tool_results, vec!["50.0", "100.0"]);
    assert!(last.map(|m| m.text()).unwrap_or_default().contains("100"));
    Ok(())
}

#[tokio::test]
async fn test_failing_action_is_reported_to_the_model() -> Result<()> {
    let server = sequenced_server(vec![
        tool_call_reply("call_bad", "add", json!({"a": "two", "b": 3})),
        text_reply("Sorry, I need numbers."),
    ])
    .await;

    let completion = generation_for(&server)?
        .generate(calculator_prompt("Add two and 3")?)
        .await?;

    let tool = &completion.prompt.messages()[3];
    assert_eq!(tool.action_id.as_deref(), Some("call_bad"));
    assert_eq!(tool.text(), "Error: Invalid parameters: a must be a number");
    Ok(())
}

#[tokio::test]
async fn test_streaming_turn() -> Result<()> {
    let server = MockServer::start().await;
    let sse = [
        json!({"choices": [{"index": 0, "delta": {"role": "assistant", "content": "2 plus 3 "}}]}),
        json!({"choices": [{"index": 0, "delta": {"content": "is 5."}, "finish_reason": "stop"}]}),
    ]
    .iter()
    .map(|chunk| format!("data: {}\n\n", chunk))
    .collect::<String>()
        + "data: [DONE]\n\n";
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (tx, mut rx) = mpsc::channel(16);
    let completion = generation_for(&server)?
        .generate_streaming(calculator_prompt("Add 2 and 3")?, tx)
        .await?;
    assert_eq!(completion.message().text(), "2 plus 3 is 5.");

    let mut text = String::new();
    let mut last_finished = false;
    while let Some(delta) = rx.recv().await {
        text.push_str(&delta.text);
        last_finished = delta.finished;
    }
    assert_eq!(text, "2 plus 3 is 5.");
    assert!(last_finished);
    Ok(())
}
