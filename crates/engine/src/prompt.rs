//! System prompt rendering.
//!
//! The prompt is assembled deterministically: directive-format preamble,
//! planning clause, mode-dependent permissions clause, the categorised tool
//! catalogue, and workflow rules. Downstream context (project map, rules,
//! memory primer, checkpoint) is appended by the session manager.

use isocode_tools::Dispatcher;

const PREAMBLE: &str = r#"You are a coding agent operating inside a user's workspace.

Reply with EXACTLY ONE JSON object per turn, nothing else. The object must be one of:

{"type":"thought","content":"<reasoning, plans, progress notes>"}
{"type":"action","tool":"<tool name>","args":{...}}
{"type":"diff_request","filePath":"<workspace-relative path>","diff":"<unified diff>"}
{"type":"final","content":"<your answer to the user>"}"#;

const DELEGATE_CLAUSE: &str = r#"{"type":"delegate","tasks":["<subtask>", {"task":"<subtask>","model":"<optional model>"}]}
Use delegate for independent subtasks that can run in parallel."#;

const PLANNING_CLAUSE: &str = r#"Planning:
- Your FIRST reply must be a thought starting with "PLAN:" followed by a numbered task list.
- After completing each task, emit a thought starting with "PROGRESS:" saying what is done.
- Only emit "final" when every planned task is complete."#;

const AGENT_PERMISSIONS: &str = r#"Permissions:
- You may read and search freely.
- Propose EVERY file mutation as a diff_request and wait for the user's decision.
- After an approval or rejection observation, continue the plan."#;

const AGENT_PLUS_PERMISSIONS: &str = r#"Permissions:
- All permissions are granted. Apply file mutations directly with write_file,
  replace_in_file, or apply_diff. Do NOT emit diff_request."#;

const WORKFLOW_RULES: &str = r#"Workflow rules:
- Read a file before writing or editing it.
- Prefer surgical edits (replace_in_file) over whole-file rewrites.
- Batch related reads with read_many_files instead of one read per turn.
- Keep thoughts short; spend your turns on actions.
- If a tool reports a missing file, probe the directory with list_files."#;

/// Render the fixed part of the system prompt.
pub fn render_system_prompt(dispatcher: &Dispatcher, agent_plus: bool, override_preamble: Option<&str>) -> String {
    let mut prompt = String::new();

    prompt.push_str(override_preamble.unwrap_or(PREAMBLE));
    if agent_plus {
        prompt.push('\n');
        prompt.push_str(DELEGATE_CLAUSE);
    }
    prompt.push_str("\n\n");
    prompt.push_str(PLANNING_CLAUSE);
    prompt.push_str("\n\n");
    prompt.push_str(if agent_plus {
        AGENT_PLUS_PERMISSIONS
    } else {
        AGENT_PERMISSIONS
    });

    prompt.push_str("\n\nAvailable tools:\n");
    for (category, tools) in dispatcher.catalogue() {
        prompt.push_str(&format!("\n{}:\n", category.label()));
        for tool in tools {
            let params = parameter_signature(&tool.parameters_schema());
            prompt.push_str(&format!("- {}({params}) — {}\n", tool.name(), tool.description()));
        }
    }

    prompt.push('\n');
    prompt.push_str(WORKFLOW_RULES);
    prompt
}

/// `name: type, name: type` from a JSON Schema's properties.
fn parameter_signature(schema: &serde_json::Value) -> String {
    let Some(properties) = schema["properties"].as_object() else {
        return String::new();
    };
    let required: Vec<&str> = schema["required"]
        .as_array()
        .map(|r| r.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    let mut parts: Vec<String> = properties
        .iter()
        .map(|(name, prop)| {
            let ty = prop["type"].as_str().unwrap_or("any");
            if required.contains(&name.as_str()) {
                format!("{name}: {ty}")
            } else {
                format!("{name}?: {ty}")
            }
        })
        .collect();
    parts.sort();
    parts.join(", ")
}
