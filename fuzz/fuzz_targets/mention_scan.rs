#![no_main]

use std::{sync::Arc, time::Duration};

use azsh_backend::AzCli;
use azsh_mentions::{MentionEngine, MentionSources};
use azsh_scope::ActiveScope;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let backend = Arc::new(AzCli::default());
    let scope = ActiveScope::new(backend.clone());
    let sources = MentionSources::from_process(backend, scope);
    let engine = MentionEngine::builtin(&sources, Duration::from_millis(1))
        .expect("builtin grammar compiles");

    let mut tokens = engine.scan(&text);
    for token in &tokens {
        assert!(token.start < token.end);
        assert_eq!(&text[token.span()], token.literal);
        assert!(token.literal.starts_with('@'));
    }

    // Tokens come back in grammar priority order, so order by position first.
    tokens.sort_by_key(|token| token.start);
    for pair in tokens.windows(2) {
        assert!(pair[0].end <= pair[1].start, "spans must not overlap");
    }
});
