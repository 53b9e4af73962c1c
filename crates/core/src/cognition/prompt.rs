//! Model input assembly: fixed system prompts, few-shot turns, the live
//! conversation and per-turn facts about the home.

use chrono::NaiveDateTime;
use hearth_llm::provider::{ChatMessage, ToolCall, ToolDefinition};
use serde_json::{Value, json};

use super::normalizer::TOOL_NAME;

/// Replaced with the speaker's usage patterns in [`PATTERN_PROMPT`].
pub const PATTERN_PLACEHOLDER: &str = "[User Patterns]";

const INIT_PROMPT: &str = r#"# Home Assistant Helper

## Role
Your name is HAI, a Home Assistant helper. You control the user's IoT devices through the Home Assistant REST API using the `home_assistant_api` tool. Also answer requests unrelated to the home. If you cannot tell what the user wants, ask for more information.

## Rules
- Reply in a polite, informal, spoken tone. No lists, tables or documents.
- If the user wants a streaming app on the TV (YouTube, Netflix, "search for ... on YouTube"), reply only with "{marker}". Follow-up requests about the same app get "{marker}" again.
- Do not suggest automations unless the request relates to the user's patterns.
- Never use media_player.telnet.

## Context
- User usage patterns: habits derived from the user's history. You may suggest automating them; "patterns" are not automations.
- now_datetime: the current date and time.
- homeassistant_entities_overview: entity states as <domain>.<object_id> with attributes.
- homeassistant_services_overview: services per domain, with the fields they accept.

## API
- post /api/services/<domain>/<service>: call a service. Put the target in body.entity_id.
- post /api/config/automation/config/<alias>: create an automation. <alias> is a short snake_case slug naming it, e.g. turn_off_living_room_light_every_night. Body holds trigger, condition and action.
- delete /api/config/automation/config/<alias>: delete the automation created under that same slug.

## Automations
An automation has a trigger (what starts it), optional conditions (tests that must hold) and actions (service calls to run). Put times only in the trigger's `at`; use conditions for dates and weekdays, e.g. "{{ now().strftime('%A') == 'Monday' }}". Compute relative times ("in 10 seconds") from now_datetime.
"#;

const AUTOMATION_SCRIPT_PROMPT: &str = r#"# Automation Scripts
An automation is stored under the slug in its endpoint; reuse that slug to delete it.

1. "Turn on the fan in 10 seconds", now is 2024-12-23 18:27:45.
{"method":"post","endpoint":"/api/config/automation/config/turn_on_fan_in_10_seconds","body":{"alias":"Turn on fan in 10 seconds","trigger":{"platform":"time","at":"18:27:55"},"condition":[{"condition":"template","value_template":"{{ now().strftime('%Y-%m-%d') == '2024-12-23' }}"}],"action":[{"service":"fan.turn_on","data":{"entity_id":"fan.living_room"}}]}}

2. "Turn on the air purifier every Monday at 7 AM".
{"method":"post","endpoint":"/api/config/automation/config/turn_on_air_purifier_every_monday","body":{"alias":"Turn on air purifier every monday","trigger":{"platform":"time","at":"07:00:00"},"condition":[{"condition":"template","value_template":"{{ now().strftime('%A') == 'Monday' }}"}],"action":[{"service":"fan.turn_on","data":{"entity_id":"fan.air_purifier"}}]}}

3. "Living room light on at 7:30 PM on weekdays".
{"method":"post","endpoint":"/api/config/automation/config/turn_on_living_room_light_every_weekday","body":{"alias":"Turn on living room light every weekday","trigger":{"platform":"time","at":"19:30:00"},"condition":[{"condition":"template","value_template":"{{ now().strftime('%A') in ['Monday', 'Tuesday', 'Wednesday', 'Thursday', 'Friday'] }}"}],"action":[{"service":"light.turn_on","data":{"entity_id":"light.living_room"}}]}}

4. "Cancel the weekday living room light".
{"method":"delete","endpoint":"/api/config/automation/config/turn_on_living_room_light_every_weekday"}
"#;

const PATTERN_PROMPT: &str = "## User Patterns\n[User Patterns]\n\nUse these patterns to anticipate the user's requests and to suggest automations when the user asks for recommendations.";

/// Patterns shown when the speaker has none on record.
pub const DEMO_PATTERNS: &[&str] = &[
    "Turns on the air purifier at 7:00 AM on weekdays",
    "Runs the robot vacuum every Monday",
    "Turns on the living room lights at 7:30 PM on weekdays",
    "Turns off all living room lights at 10:00 PM every day",
];

/// The one tool the model may call.
pub fn tool_definition() -> ToolDefinition {
    ToolDefinition {
        name: TOOL_NAME.into(),
        description: "Home Assistant API".into(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "method": {"type": "string", "enum": ["get", "post", "delete"]},
                "endpoint": {"type": "string", "description": "The endpoint of the Home Assistant API"},
                "body": {"type": "object", "description": "The body of the Home Assistant API"}
            },
            "required": ["method", "endpoint"],
            "additionalProperties": false
        }),
    }
}

pub fn init_prompt(handoff_marker: &str) -> ChatMessage {
    ChatMessage::system(INIT_PROMPT.replace("{marker}", handoff_marker))
}

/// Worked automation create/delete calls.
pub fn automation_script() -> ChatMessage {
    ChatMessage::system(AUTOMATION_SCRIPT_PROMPT)
}

/// Pattern prompt for the speaker, or the demo set when `patterns` is empty.
pub fn pattern_prompt(patterns: &[String]) -> ChatMessage {
    let lines: Vec<String> = if patterns.is_empty() {
        DEMO_PATTERNS.iter().map(|p| format!("- {p}")).collect()
    } else {
        patterns.iter().map(|p| format!("- {p}")).collect()
    };
    ChatMessage::system(PATTERN_PROMPT.replace(PATTERN_PLACEHOLDER, &lines.join("\n")))
}

/// Worked TV on/off turns showing the tool-call wire shape.
pub fn few_shot() -> Vec<ChatMessage> {
    let turn = |id: &str, ask: &str, say: &str, service: &str| {
        let args = json!({
            "method": "post",
            "endpoint": format!("/api/services/media_player/{service}"),
            "body": {"entity_id": "media_player.chromecast"}
        });
        [
            ChatMessage::user(ask),
            ChatMessage::Assistant {
                content: Some(say.into()),
                tool_calls: vec![ToolCall::function(id, TOOL_NAME, args.to_string())],
            },
            ChatMessage::tool(id, "Success"),
        ]
    };
    turn("call_fewshot_tv_on", "Turn on the TV", "Turning the TV on with the Chromecast.", "turn_on")
        .into_iter()
        .chain(turn("call_fewshot_tv_off", "Turn off the TV", "Turning the TV off.", "turn_off"))
        .collect()
}

pub fn datetime_message(now: NaiveDateTime) -> ChatMessage {
    ChatMessage::system_named(
        "now_datetime",
        format!(
            "Current time is {}.\nToday's date is {}, and it's {} today.",
            now.format("%H:%M:%S"),
            now.format("%Y-%m-%d"),
            now.format("%A"),
        ),
    )
}

pub fn entities_message(states: &[Value]) -> ChatMessage {
    ChatMessage::system_named(
        "homeassistant_entities_overview",
        format!("An overview of the states in this smart home:\n{}", to_yaml(states)),
    )
}

pub fn services_message(services: &[Value]) -> ChatMessage {
    ChatMessage::system_named(
        "homeassistant_services_overview",
        format!("An overview of the services in this smart home:\n{}", to_yaml(services)),
    )
}

fn to_yaml(items: &[Value]) -> String {
    serde_yaml::to_string(items).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "yaml snapshot failed; falling back to json");
        Value::Array(items.to_vec()).to_string()
    })
}

/// Per-turn facts the model sees after the conversation.
#[derive(Debug, Clone, Default)]
pub struct TurnContext {
    pub patterns: Vec<String>,
    pub states: Vec<Value>,
    pub services: Vec<Value>,
}

/// Full model input: system prompts, few-shot turns, history, then facts.
pub fn assemble_model_input(
    handoff_marker: &str,
    context: &TurnContext,
    history: Vec<ChatMessage>,
    now: NaiveDateTime,
) -> Vec<ChatMessage> {
    let mut messages = vec![
        init_prompt(handoff_marker),
        automation_script(),
        pattern_prompt(&context.patterns),
    ];
    messages.extend(few_shot());
    messages.extend(history);
    messages.push(datetime_message(now));
    messages.push(entities_message(&context.states));
    messages.push(services_message(&context.services));
    messages
}
