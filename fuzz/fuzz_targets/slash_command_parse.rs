#![no_main]

use azsh_cli::{canonical_command_name, parse_command, unknown_command_message};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let raw = String::from_utf8_lossy(data);
    let Some(parsed) = parse_command(&raw) else {
        assert!(!raw.trim().starts_with('/'));
        return;
    };
    assert!(parsed.name.starts_with('/'));
    assert!(!parsed.name.chars().any(char::is_whitespace));
    assert_eq!(parsed.args, parsed.args.trim());

    let canonical = canonical_command_name(&parsed.name);
    assert!(canonical.starts_with('/'));
    let message = unknown_command_message(&parsed.name);
    assert!(message.ends_with("Type /help for available commands."));
});
