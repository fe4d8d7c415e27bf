#![no_main]

use azsh_agent::{PermissionDecision, ToolInvocation};
use azsh_safety::{ToolSafetyGate, DESTRUCTIVE_KEYWORDS};
use libfuzzer_sys::fuzz_target;
use serde_json::json;

fuzz_target!(|data: &[u8]| {
    let command = String::from_utf8_lossy(data);
    let gate = ToolSafetyGate::new().expect("keyword matcher builds");
    let invocation = ToolInvocation::new("run_command", json!({ "command": command }));
    let outcome = gate.pre_invocation(&invocation);

    let lowered = command.to_ascii_lowercase();
    let expects_ask = DESTRUCTIVE_KEYWORDS
        .iter()
        .any(|keyword| lowered.contains(keyword));
    assert_eq!(
        matches!(outcome.decision, PermissionDecision::Ask { .. }),
        expects_ask
    );
});
