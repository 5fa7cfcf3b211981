use std::time::Duration;

use model_mock::ScriptedGenerator;

const TOKEN_DELAY_MS: u64 = 40;

/// Offline backend: echoes each prompt word by word at a readable pace.
pub fn mock_generator() -> ScriptedGenerator {
    ScriptedGenerator::new().with_chunk_delay(Duration::from_millis(TOKEN_DELAY_MS))
}
