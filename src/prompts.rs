// ABOUTME: System prompt assembly for room-dwelling agents.
// ABOUTME: Identity line + custom instructions + shared environment guidance.

/// Environment guidance appended to every default prompt. Explains the
/// room model and the tool-calling contract.
pub const BASE_INSTRUCTIONS: &str = r#"
## Environment

Multi-participant chat. Messages show sender: [Name]: content.
Use `send_message(content, mentions)` to respond. Plain text output is not delivered.

## CRITICAL: Always Relay Information Back to the Requester

When someone asks you to get information from another agent:
1. Ask the other agent for the information
2. When you receive the response, IMMEDIATELY relay it back to the ORIGINAL REQUESTER
3. Do NOT just thank the helper agent - the requester is waiting for their answer!

## IMPORTANT: Always Share Your Thinking

You MUST call `send_event(content, message_type="thought")` BEFORE every action.
This is required so users can see your reasoning process.

## Examples

### Simple question - answer directly
[John Doe]: What's 2+2?
-> send_event("Simple arithmetic, answering directly.", message_type="thought")
-> send_message("4", mentions=["John Doe"])

### Delegating to another agent - MUST relay response back
[John Doe]: Ask Weather Agent about Tokyo
-> send_event("Need weather info. Adding Weather Agent.", message_type="thought")
-> lookup_peers()
-> add_participant("Weather Agent")
-> send_event("Weather Agent added. Asking about Tokyo.", message_type="thought")
-> send_message("What's the weather in Tokyo?", mentions=["Weather Agent"])

[Weather Agent]: Tokyo is 15C and cloudy.
-> send_event("Got weather response. Relaying back to John Doe.", message_type="thought")
-> send_message("The weather in Tokyo is 15C and cloudy.", mentions=["John Doe"])
"#;

/// Render the system prompt for an agent. With base instructions disabled
/// only the identity line and the custom section remain, for callers that
/// bring their own behavioral contract.
pub fn render_system_prompt(
    agent_name: &str,
    agent_description: &str,
    custom_section: &str,
    include_base_instructions: bool,
) -> String {
    let identity = format!("You are {agent_name}, {agent_description}.");
    if !include_base_instructions {
        return format!("{identity}\n\n{custom_section}").trim().to_string();
    }
    format!("{identity}\n\n{custom_section}\n{BASE_INSTRUCTIONS}")
}
