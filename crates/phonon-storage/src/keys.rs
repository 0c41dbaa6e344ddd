//! Shared key generation for storage backends.

use phonon_core::models::AudioFormat;
use uuid::Uuid;

const AUDIO_PREFIX: &str = "audio";
const SERVED_PREFIX: &str = "served";

/// Fresh key for an uploaded original.
///
/// Every upload gets its own directory, so a second upload racing the first
/// for the same (user, phrase) pair never writes over the first one's bytes.
pub fn original_key(user_id: i64, phrase_id: i64, format: AudioFormat) -> String {
    format!(
        "{}/{}/{}/{}/original.{}",
        AUDIO_PREFIX,
        user_id,
        phrase_id,
        Uuid::new_v4(),
        format.extension()
    )
}

/// Key of the converted rendition, placed next to the original.
///
/// Never equal to `input_key`, so converting into the same format does not
/// overwrite the original.
pub fn converted_key(input_key: &str, format: AudioFormat) -> String {
    match input_key.rsplit_once('/') {
        Some((dir, _)) => format!("{}/stored.{}", dir, format.extension()),
        None => format!("stored.{}", format.extension()),
    }
}

/// Fresh key for an ephemeral copy handed to a client
pub fn served_key(format: AudioFormat) -> String {
    format!("{}/{}.{}", SERVED_PREFIX, Uuid::new_v4(), format.extension())
}

/// Whether `key` is a short-lived served copy, the only keys that may be
/// handed out under `/files` or deleted by cleanup
pub fn is_served_key(key: &str) -> bool {
    key.strip_prefix(SERVED_PREFIX)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|name| !name.is_empty() && !name.contains('/'))
        && is_safe_key(key)
}

/// Check that a key cannot escape the storage root
pub fn is_safe_key(key: &str) -> bool {
    !key.is_empty() && !key.contains("..") && !key.starts_with('/') && !key.contains('\\')
}
