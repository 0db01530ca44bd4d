use std::fmt::Write as _;

use crate::markers::MarkerSet;
use crate::protocol::ToolSpec;

/// Render the declared tools into the numbered list embedded in the prompt.
fn format_tools_list(tools: &[ToolSpec]) -> String {
    let mut out = String::new();
    for (i, tool) in tools.iter().enumerate() {
        let func = &tool.function;
        let description = func.description.as_deref().unwrap_or("None");
        let parameters = serde_json::to_string_pretty(&func.parameters)
            .unwrap_or_else(|_| "null".to_string());
        let _ = write!(
            out,
            "{idx}. {name}\n\
             \x20\x20\x20Description: {description}\n\
             \x20\x20\x20Parameters (JSON Schema):\n\
             {parameters}",
            idx = i + 1,
            name = func.name,
        );
        if i + 1 < tools.len() {
            out.push_str("\n\n");
        }
    }
    out
}

/// Compose the tool-protocol contract injected into the system prompt.
///
/// The text declares the protocol, enumerates the available tools with their
/// schemas, shows one exemplar invocation using the live markers, and states
/// the four protocol rules the model must follow.
#[must_use]
pub fn compose_tool_prompt(tools: &[ToolSpec], markers: &MarkerSet) -> String {
    let tools_list = format_tools_list(tools);

    format!(
        "# DELIMITED TOOL CALL PROTOCOL\n\
         \n\
         You have access to the following tools:\n\
         \n\
         {tools_list}\n\
         \n\
         To call a tool, emit a block using EXACTLY this format (markers included verbatim):\n\
         \n\
         {tc_start}\n\
         {name_start}tool_name{name_end}\n\
         {args_start}{{\"argument\": \"value\"}}{args_end}\n\
         {tc_end}\n\
         \n\
         Rules:\n\
         1. Tool calls MUST appear at the END of your response, after any explanatory text.\n\
         2. Copy the marker sequences exactly as shown above. Do not translate, reorder, or \
         omit any of them.\n\
         3. The arguments block MUST contain a single valid JSON object matching the tool's \
         parameter schema.\n\
         4. Emit exactly one tool per block. To call several tools, emit several consecutive \
         blocks in the order they should run.",
        tc_start = markers.tc_start,
        tc_end = markers.tc_end,
        name_start = markers.name_start,
        name_end = markers.name_end,
        args_start = markers.args_start,
        args_end = markers.args_end,
    )
}
