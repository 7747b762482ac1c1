// SPDX-License-Identifier: MIT

//! Prompt templates of the ReAct agent

use crate::adk::template::PromptTemplate;

const SYSTEM: &str = r#"You are a helpful assistant that reasons step by step and uses functions when they help.{{#instructions}}

# Instructions
{{instructions}}{{/instructions}}

# Functions
{{#tools}}You can call the following functions:

{{tools}}{{/tools}}{{^tools}}No functions are available. Answer from your own knowledge.{{/tools}}

# Communication structure
You communicate only in instruction lines. Every line starts with one of these prefixes:

Thought: your reasoning about what to do next
Function Name: the function to call{{^tools}} (not available){{/tools}}
Function Input: the function input as a JSON object on a single line
Function Output: the result of the function, written by the system, never by you
Final Answer: the answer to the user

Start every response with 'Thought:'. After a thought, either call exactly one function with 'Function Name:' and 'Function Input:', then stop and wait for 'Function Output:', or finish with 'Final Answer:'."#;

const USER: &str = "{{input}}{{#context}}\n\nContext: {{context}}{{/context}}{{#expected_output}}\n\nExpected output: {{expected_output}}{{/expected_output}}";

const USER_EMPTY: &str = "Message: Empty message.";

const SCHEMA_ERROR: &str = "Error: The generated response does not adhere to the communication structure mentioned in the system prompt.\n{{reason}}\nYou communicate only in instruction lines. Valid lines start with 'Thought:', followed by either 'Function Name:' and 'Function Input:', or 'Final Answer:'.";

const TOOL_ERROR: &str = "The function has failed; the error log is shown below. If the function cannot accomplish what you want, use a different function or explain why you cannot use it.\n\n{{reason}}";

const TOOL_INPUT_ERROR: &str = "{{reason}}\n\nHINT: Invalid 'Function Input'. Correct it so that it matches the input schema of the function '{{tool}}'.";

const TOOL_NOT_FOUND: &str = "Function '{{tool}}' does not exist!{{#tools}} Available functions: {{tools}}.{{/tools}}{{^tools}} No functions are available.{{/tools}}";

const TOOL_NO_RESULT: &str = "No results were found!";

/// Every template the ReAct runner renders.
///
/// Customise with [`PromptTemplate::with_overrides`] on a field, e.g.
/// `templates.system = templates.system.with_overrides(|t| t.set_default("instructions", "Be brief."))`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReActTemplates {
    pub system: PromptTemplate,
    pub user: PromptTemplate,
    pub user_empty: PromptTemplate,
    pub schema_error: PromptTemplate,
    pub tool_error: PromptTemplate,
    pub tool_input_error: PromptTemplate,
    pub tool_not_found: PromptTemplate,
    pub tool_no_result: PromptTemplate,
}

impl Default for ReActTemplates {
    fn default() -> Self {
        Self {
            system: PromptTemplate::new(SYSTEM)
                .with_default("instructions", "")
                .with_default("tools", ""),
            user: PromptTemplate::new(USER),
            user_empty: PromptTemplate::new(USER_EMPTY),
            schema_error: PromptTemplate::new(SCHEMA_ERROR),
            tool_error: PromptTemplate::new(TOOL_ERROR),
            tool_input_error: PromptTemplate::new(TOOL_INPUT_ERROR),
            tool_not_found: PromptTemplate::new(TOOL_NOT_FOUND).with_default("tools", ""),
            tool_no_result: PromptTemplate::new(TOOL_NO_RESULT),
        }
    }
}
